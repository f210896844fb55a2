// Event module - structured lifecycle events and their transport
// Events are immutable once created; correlation ids group all events
// belonging to one logical execution (a test unit or a whole run).

pub mod bus;
pub mod channel;

pub use bus::EventBus;
pub use channel::{ChannelError, EventSender, WireEvent, event_channel};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Event payload - insertion-ordered string keyed mapping
pub type Payload = Map<String, Value>;

/// Built-in event names
pub mod names {
    pub const TEST_RUN_START: &str = "test_run_start";
    pub const TEST_RUN_END: &str = "test_run_end";
    pub const TEST_RUN_ERROR: &str = "test_run_error";
    pub const TEST_RUN_INTERRUPTED: &str = "test_run_interrupted";
    pub const TEST_START: &str = "test_start";
    pub const TEST_END: &str = "test_end";
    pub const TEST_SETUP: &str = "test_setup";
    pub const TEST_TEARDOWN: &str = "test_teardown";
    pub const TEST_SUCCESS: &str = "test_success";
    pub const TEST_FAILURE: &str = "test_failure";
    pub const TEST_ERROR: &str = "test_error";
    pub const TEST_SKIP: &str = "test_skip";
}

/// Opaque identifier grouping the events of one logical execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh correlation id
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A single lifecycle transition or user-defined occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub correlation_id: CorrelationId,
    pub payload: Payload,
    pub emitted_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        correlation_id: CorrelationId,
        payload: Payload,
    ) -> Self {
        Self {
            name: name.into(),
            correlation_id,
            payload,
            emitted_at: Utc::now(),
        }
    }

    /// Payload value lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Payload string lookup
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

/// Convert a `json!({..})` object literal into a payload map
pub fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Cloneable handle for publishing events into a worker's channel.
///
/// Handed to test code so it can emit custom events; the same pipeline
/// carries them to the parent process and every registered reporter.
#[derive(Clone)]
pub struct EventPublisher {
    sender: EventSender,
}

impl EventPublisher {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }

    /// Fire-and-forget publication. A closed channel is logged, never fatal:
    /// a cancelled run may drop the receiving half before workers finish.
    pub fn publish(&self, name: &str, correlation_id: &CorrelationId, payload: Payload) {
        let event = Event::new(name, correlation_id.clone(), payload);
        if let Err(e) = self.sender.send(&event) {
            tracing::debug!("event '{}' dropped: {}", name, e);
        }
    }
}
