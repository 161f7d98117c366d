//! Subscriptions and their unsubscribe handles

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::bus::Registry;
use crate::event::EventName;

/// Subscriber callback
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Delivery predicate - the callback only sees events it returns `true` for
pub type Filter<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

pub(crate) type SubscriptionId = u64;

/// Options for [`EventBus::subscribe_with`](crate::EventBus::subscribe_with)
pub struct SubscribeOptions<E> {
    pub filter: Option<Filter<E>>,
    pub once: bool,
}

impl<E> SubscribeOptions<E> {
    pub fn new() -> Self {
        Self {
            filter: None,
            once: false,
        }
    }

    pub fn filter(mut self, filter: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

impl<E> Default for SubscribeOptions<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for SubscribeOptions<E> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            once: self.once,
        }
    }
}

impl<E> fmt::Debug for SubscribeOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("filter", &self.filter.is_some())
            .field("once", &self.once)
            .finish()
    }
}

/// One registered interest in an event name
pub(crate) struct Subscriber<E> {
    pub(crate) id: SubscriptionId,
    pub(crate) callback: Callback<E>,
    pub(crate) filter: Option<Filter<E>>,
    pub(crate) once: bool,
    active: AtomicBool,
}

impl<E> Subscriber<E> {
    pub(crate) fn new(id: SubscriptionId, callback: Callback<E>, options: SubscribeOptions<E>) -> Self {
        Self {
            id,
            callback,
            filter: options.filter,
            once: options.once,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Flip active -> inactive. Only one caller ever wins.
    pub(crate) fn claim(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Unsubscribe handle returned by `subscribe`/`once`.
///
/// Dropping the handle leaves the subscription in place; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription<E> {
    name: EventName,
    subscriber: Arc<Subscriber<E>>,
    registry: Weak<Registry<E>>,
}

impl<E> Subscription<E> {
    pub(crate) fn new(
        name: EventName,
        subscriber: Arc<Subscriber<E>>,
        registry: Weak<Registry<E>>,
    ) -> Self {
        Self {
            name,
            subscriber,
            registry,
        }
    }

    pub fn event_name(&self) -> &str {
        &self.name
    }

    /// False once unsubscribed, cleared, or a `once` subscription has fired
    pub fn is_active(&self) -> bool {
        self.subscriber.is_active()
    }

    /// Remove the subscription. Safe to call more than once.
    pub fn unsubscribe(&self) {
        self.subscriber.deactivate();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_subscriber(&self.name, self.subscriber.id);
        }
    }
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("id", &self.subscriber.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Handles from [`EventBus::subscribe_multiple`](crate::EventBus::subscribe_multiple)
pub struct SubscriptionGroup<E> {
    subscriptions: Vec<Subscription<E>>,
}

impl<E> SubscriptionGroup<E> {
    pub(crate) fn new(subscriptions: Vec<Subscription<E>>) -> Self {
        Self { subscriptions }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription<E>> {
        self.subscriptions.iter()
    }

    pub fn unsubscribe_all(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}
