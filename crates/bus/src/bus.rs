//! Event Bus - registry of subscribers keyed by event name
//!
//! Design decisions:
//! 1. One `Channel` per event name holds both subscribers and buffered events
//! 2. Delivery iterates a snapshot; no map guard is held while callbacks run
//! 3. Each subscriber carries an `active` flag checked right before invocation,
//!    so unsubscribing mid-publish takes effect immediately

use dashmap::DashMap;
use serde_json::Value;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{BusError, Result};
use crate::event::{DynamicEvent, Event, EventName};
use crate::subscription::{
    Callback, SubscribeOptions, Subscriber, Subscription, SubscriptionGroup, SubscriptionId,
};

/// Buffered events kept per name before the oldest is dropped
pub const DEFAULT_PENDING_LIMIT: usize = 1024;

struct Channel<E> {
    subscribers: Vec<Arc<Subscriber<E>>>,
    pending: VecDeque<E>,
}

impl<E> Default for Channel<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            pending: VecDeque::new(),
        }
    }
}

impl<E> Channel<E> {
    fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.pending.is_empty()
    }
}

/// Shared state behind every clone of an [`EventBus`]
pub(crate) struct Registry<E> {
    channels: DashMap<EventName, Channel<E>>,
    next_id: AtomicU64,
    pending_limit: usize,
}

impl<E> Registry<E> {
    pub(crate) fn remove_subscriber(&self, name: &str, id: SubscriptionId) {
        if let Some(mut channel) = self.channels.get_mut(name) {
            channel.subscribers.retain(|s| s.id != id);
        }
        // Guard above is released; freeing the entry needs the shard lock again
        self.channels.remove_if(name, |_, channel| channel.is_empty());
    }
}

/// Publish/subscribe registry for events of type `E`.
///
/// Cloning is cheap and every clone shares the same subscribers.
pub struct EventBus<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        Self::with_pending_limit(DEFAULT_PENDING_LIMIT)
    }

    /// Bus that buffers at most `limit` undelivered events per name
    pub fn with_pending_limit(limit: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                pending_limit: limit.max(1),
            }),
        }
    }

    /// Subscribe to every event published under `name`
    pub fn subscribe<F>(&self, name: impl Into<EventName>, callback: F) -> Result<Subscription<E>>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(name.into(), SubscribeOptions::new(), Arc::new(callback))
    }

    /// Subscribe with a filter and/or one-shot delivery
    pub fn subscribe_with<F>(
        &self,
        name: impl Into<EventName>,
        options: SubscribeOptions<E>,
        callback: F,
    ) -> Result<Subscription<E>>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(name.into(), options, Arc::new(callback))
    }

    /// Subscribe for a single delivery; the subscription removes itself afterwards
    pub fn once<F>(&self, name: impl Into<EventName>, callback: F) -> Result<Subscription<E>>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(name.into(), SubscribeOptions::new().once(), Arc::new(callback))
    }

    pub fn once_with<F>(
        &self,
        name: impl Into<EventName>,
        options: SubscribeOptions<E>,
        callback: F,
    ) -> Result<Subscription<E>>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(name.into(), options.once(), Arc::new(callback))
    }

    /// Register one subscription per `(name, callback)` pair.
    ///
    /// All-or-nothing: if any name is rejected, the ones already registered
    /// are removed again.
    pub fn subscribe_multiple<I, N>(
        &self,
        handlers: I,
        options: SubscribeOptions<E>,
    ) -> Result<SubscriptionGroup<E>>
    where
        I: IntoIterator<Item = (N, Callback<E>)>,
        N: Into<EventName>,
    {
        let mut subscriptions = Vec::new();
        for (name, callback) in handlers {
            match self.register(name.into(), options.clone(), callback) {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    for subscription in &subscriptions {
                        subscription.unsubscribe();
                    }
                    return Err(e);
                }
            }
        }
        Ok(SubscriptionGroup::new(subscriptions))
    }

    /// Deliver `event` to every current subscriber of `event.name()`, in
    /// registration order. With no subscribers the event is buffered for the
    /// next one.
    pub fn publish(&self, event: E) {
        let name = event.name().to_owned();
        if name.is_empty() {
            tracing::warn!("Dropping event with empty name");
            return;
        }

        let snapshot = {
            let mut channel = self.registry.channels.entry(name.clone()).or_default();
            if channel.subscribers.is_empty() {
                if channel.pending.len() >= self.registry.pending_limit {
                    channel.pending.pop_front();
                    tracing::warn!(event = %name, "Pending buffer full, dropped oldest event");
                }
                channel.pending.push_back(event);
                tracing::debug!(event = %name, "No subscribers, event buffered");
                return;
            }
            channel.subscribers.clone()
        };

        for subscriber in snapshot {
            if !subscriber.is_active() || !passes(&name, &subscriber, &event) {
                continue;
            }
            if subscriber.once {
                if !subscriber.claim() {
                    continue;
                }
                self.registry.remove_subscriber(&name, subscriber.id);
            }
            invoke(&name, &subscriber, &event);
        }
    }

    /// Remove all subscriptions and buffered events for `name`
    pub fn clear_event(&self, name: &str) {
        if let Some((_, channel)) = self.registry.channels.remove(name) {
            for subscriber in &channel.subscribers {
                subscriber.deactivate();
            }
            tracing::debug!(
                event = %name,
                subscribers = channel.subscribers.len(),
                pending = channel.pending.len(),
                "Cleared event"
            );
        }
    }

    /// Reset the bus to its initial empty state
    pub fn clear(&self) {
        for name in self.event_names() {
            self.clear_event(&name);
        }
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.registry
            .channels
            .get(name)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    pub fn pending_count(&self, name: &str) -> usize {
        self.registry
            .channels
            .get(name)
            .map(|c| c.pending.len())
            .unwrap_or(0)
    }

    /// Names with at least one subscriber or buffered event
    pub fn event_names(&self) -> Vec<EventName> {
        self.registry
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn register(
        &self,
        name: EventName,
        options: SubscribeOptions<E>,
        callback: Callback<E>,
    ) -> Result<Subscription<E>> {
        if name.is_empty() {
            return Err(BusError::EmptyEventName);
        }

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber::new(id, callback, options));

        // Filters run under the channel lock here and must not call back into the bus
        let replay = {
            let mut channel = self.registry.channels.entry(name.clone()).or_default();
            let replay = take_pending(&name, &mut channel.pending, &subscriber);
            let consumed = subscriber.once && !replay.is_empty();
            if !consumed {
                channel.subscribers.push(Arc::clone(&subscriber));
            }
            replay
        };

        tracing::debug!(event = %name, id, once = subscriber.once, replay = replay.len(), "Subscribed");

        if subscriber.once && !replay.is_empty() {
            // Never registered, so the now-empty entry has to be freed here
            self.registry.channels.remove_if(&name, |_, c| c.is_empty());
            if subscriber.claim() {
                invoke(&name, &subscriber, &replay[0]);
            }
        } else {
            for event in &replay {
                if !subscriber.is_active() {
                    break;
                }
                invoke(&name, &subscriber, event);
            }
        }

        Ok(Subscription::new(
            name,
            subscriber,
            Arc::downgrade(&self.registry),
        ))
    }
}

impl EventBus<DynamicEvent> {
    /// Untyped publish: `emit("inventory:low_stock", json!({...}))`
    pub fn emit(&self, name: impl Into<EventName>, payload: Value) {
        self.publish(DynamicEvent::new(name, payload));
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Move the buffered events this subscriber accepts out of `pending`.
/// A `once` subscriber takes at most one.
fn take_pending<E>(name: &str, pending: &mut VecDeque<E>, subscriber: &Subscriber<E>) -> Vec<E> {
    let mut taken = Vec::new();
    if pending.is_empty() {
        return taken;
    }

    let mut kept = VecDeque::with_capacity(pending.len());
    for event in pending.drain(..) {
        let wanted = !(subscriber.once && !taken.is_empty()) && passes(name, subscriber, &event);
        if wanted {
            taken.push(event);
        } else {
            kept.push_back(event);
        }
    }
    *pending = kept;
    taken
}

fn passes<E>(name: &str, subscriber: &Subscriber<E>, event: &E) -> bool {
    let Some(filter) = subscriber.filter.as_ref() else {
        return true;
    };
    match catch_unwind(AssertUnwindSafe(|| filter(event))) {
        Ok(accepted) => accepted,
        Err(panic) => {
            tracing::error!(
                event = %name,
                id = subscriber.id,
                "Subscriber filter panicked: {}",
                panic_message(&panic)
            );
            false
        }
    }
}

fn invoke<E>(name: &str, subscriber: &Subscriber<E>, event: &E) {
    let callback = &subscriber.callback;
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
        tracing::error!(
            event = %name,
            id = subscriber.id,
            "Subscriber panicked: {}",
            panic_message(&panic)
        );
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
