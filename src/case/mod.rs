// Test case surface - the unittest-like lifecycle seam.
// Assertion helpers live in the check!/check_eq!/skip! macros; anything that
// unwinds out of a test body is an error, not a failure.

pub mod shim;

use std::any::Any;

use serde_json::Value;
use thiserror::Error;

use crate::event::{CorrelationId, EventPublisher, Payload};

/// Typed outcome of a lifecycle step or test body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaseFailure {
    /// Expected test-logic failure (assertion)
    #[error("{0}")]
    Assertion(String),

    /// Explicit skip request
    #[error("{0}")]
    Skip(String),

    /// Anything else the test signals as broken
    #[error("{0}")]
    Error(String),
}

impl CaseFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

pub type CaseResult = Result<(), CaseFailure>;

/// A registered test case type.
///
/// `set_up` runs before each test body, `tear_down` after it (also after a
/// failing body). Both default to no-ops.
pub trait TestCase: Any + Send {
    fn set_up(&mut self, _cx: &mut TestContext) -> CaseResult {
        Ok(())
    }

    fn tear_down(&mut self, _cx: &mut TestContext) -> CaseResult {
        Ok(())
    }
}

/// Per-unit context handed to set_up, the test body and tear_down.
pub struct TestContext {
    correlation_id: CorrelationId,
    publisher: EventPublisher,
    extensions: Payload,
    class_fields: Payload,
    buffer: Option<String>,
}

impl TestContext {
    pub fn new(
        correlation_id: CorrelationId,
        publisher: EventPublisher,
        extensions: Payload,
        class_fields: Payload,
        buffer_output: bool,
    ) -> Self {
        Self {
            correlation_id,
            publisher,
            extensions,
            class_fields,
            buffer: buffer_output.then(String::new),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Publish a custom event from inside a test. It travels the same
    /// pipeline as built-in events and reaches every registered reporter.
    pub fn publish(&self, name: &str, payload: Payload) {
        self.publisher.publish(name, &self.correlation_id, payload);
    }

    /// Value a hook exposed through the context extensions mapping
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    /// Named field a hook attached to the class descriptor
    pub fn class_field(&self, key: &str) -> Option<&Value> {
        self.class_fields.get(key)
    }

    /// Record a line of test output. When output buffering is enabled the
    /// collected text is attached to the unit's terminal event payload;
    /// otherwise it is written through immediately.
    pub fn capture(&mut self, line: impl AsRef<str>) {
        match &mut self.buffer {
            Some(buf) => {
                buf.push_str(line.as_ref());
                buf.push('\n');
            }
            None => println!("{}", line.as_ref()),
        }
    }

    pub(crate) fn take_output(&mut self) -> Option<String> {
        self.buffer.take().filter(|b| !b.is_empty())
    }
}

/// Fail the test when a condition does not hold
#[macro_export]
macro_rules! check {
    ($cond:expr) => {
        if !$cond {
            return Err($crate::case::CaseFailure::assertion(format!(
                "check failed: {}",
                stringify!($cond)
            )));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::case::CaseFailure::assertion(format!($($arg)+)));
        }
    };
}

/// Fail the test when two values differ
#[macro_export]
macro_rules! check_eq {
    ($left:expr, $right:expr) => {{
        let (left, right) = (&$left, &$right);
        if left != right {
            return Err($crate::case::CaseFailure::assertion(format!(
                "check failed: {:?} != {:?}",
                left, right
            )));
        }
    }};
}

/// Skip the rest of the test with a reason
#[macro_export]
macro_rules! skip {
    ($($arg:tt)+) => {
        return Err($crate::case::CaseFailure::skip(format!($($arg)+)))
    };
}
