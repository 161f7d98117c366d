//! Event Bus - in-process publish/subscribe for dashboard widgets
//!
//! Producers and consumers agree on an event type, not on each other.
//!
//! ```text
//! publish(event) ──► event.name() ──► Channel { subscribers, pending }
//!                                         │              │
//!                          registration order      buffered until the
//!                                                  next subscriber arrives
//! ```
//!
//! Rules:
//! 1. Delivery is synchronous and follows registration order
//! 2. An event published with nobody listening is replayed to exactly one later subscriber
//! 3. A panicking subscriber never stops its siblings

pub mod bus;
pub mod error;
pub mod event;
pub mod events;
pub mod subscription;

pub use bus::EventBus;
pub use error::{BusError, Result};
pub use event::{DynamicEvent, Event, EventName};
pub use events::{DashboardEvent, NotificationLevel};
pub use subscription::{Callback, Filter, SubscribeOptions, Subscription, SubscriptionGroup};
