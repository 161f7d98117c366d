//! Event trait and the untyped fallback event

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name - opaque key, `domain:action` by convention
pub type EventName = String;

/// Anything that can travel over an [`EventBus`](crate::EventBus).
///
/// The payload carries its own name, so a publisher cannot put a
/// `patient:updated` payload on the `inventory:low_stock` channel.
pub trait Event: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;
}

/// Name plus arbitrary JSON payload, for call sites without a typed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicEvent {
    pub name: EventName,
    #[serde(default)]
    pub payload: Value,
}

impl DynamicEvent {
    pub fn new(name: impl Into<EventName>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Event without a payload (`Null`)
    pub fn bare(name: impl Into<EventName>) -> Self {
        Self::new(name, Value::Null)
    }
}

impl Event for DynamicEvent {
    fn name(&self) -> &str {
        &self.name
    }
}
