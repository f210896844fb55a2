// Worker-to-parent event transport.
// Events cross the boundary as explicitly serialized frames so the channel
// stays a typed contract rather than a shared-memory shortcut.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{CorrelationId, Event, Payload};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("event channel closed")]
    Closed,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Wire shape of an event crossing the worker boundary.
///
/// `emitted_at` is deliberately absent: the parent re-stamps events when it
/// re-publishes them, and per-unit ordering is carried by the channel itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub name: String,
    pub correlation_id: String,
    pub payload: Payload,
}

impl WireEvent {
    pub fn from_event(event: &Event) -> Self {
        Self {
            name: event.name.clone(),
            correlation_id: event.correlation_id.as_str().to_string(),
            payload: event.payload.clone(),
        }
    }

    pub fn into_event(self) -> Event {
        Event::new(
            self.name,
            CorrelationId::from(self.correlation_id.as_str()),
            self.payload,
        )
    }

    pub fn encode(event: &Event) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(&Self::from_event(event))?)
    }

    pub fn decode(frame: &str) -> Result<Self, ChannelError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Sending half of a worker's event channel
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<String>,
}

impl EventSender {
    pub fn send(&self, event: &Event) -> Result<(), ChannelError> {
        let frame = WireEvent::encode(event)?;
        self.tx.send(frame).map_err(|_| ChannelError::Closed)
    }
}

/// Create a fresh worker channel. The receiving half is a stream the runner
/// fans in together with every other worker's channel.
pub fn event_channel() -> (EventSender, UnboundedReceiverStream<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, UnboundedReceiverStream::new(rx))
}
