// In-process publish/subscribe.
// Lives only in the parent process and is driven exclusively by the runner's
// drain loop, so no locking is needed here.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use super::Event;

type Handler = Box<dyn FnMut(&Event) + Send>;

/// Synchronous event bus with per-name and catch-all subscriptions.
///
/// Delivery is in subscription order; a panicking handler is isolated and
/// recorded as a framework-level error without aborting dispatch.
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<String, Vec<Handler>>,
    catch_all: Vec<Handler>,
    handler_errors: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to one event name
    pub fn subscribe(&mut self, name: impl Into<String>, handler: impl FnMut(&Event) + Send + 'static) {
        self.subscribers
            .entry(name.into())
            .or_default()
            .push(Box::new(handler));
    }

    /// Subscribe a handler to every event
    pub fn subscribe_all(&mut self, handler: impl FnMut(&Event) + Send + 'static) {
        self.catch_all.push(Box::new(handler));
    }

    /// Deliver an event to all matching handlers, then to catch-all handlers
    pub fn publish(&mut self, event: &Event) {
        if let Some(handlers) = self.subscribers.get_mut(&event.name) {
            for handler in handlers.iter_mut() {
                if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                    self.handler_errors += 1;
                    tracing::error!("subscriber for '{}' panicked; continuing dispatch", event.name);
                }
            }
        }
        for handler in self.catch_all.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                self.handler_errors += 1;
                tracing::error!("catch-all subscriber panicked on '{}'; continuing dispatch", event.name);
            }
        }
    }

    /// Number of handler panics recorded so far
    pub fn handler_errors(&self) -> usize {
        self.handler_errors
    }
}
