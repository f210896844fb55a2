// Hook manager - ordered, named extension points across the pipeline.
// A TestServer customizes execution purely by registering hooks here.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;

use crate::case::TestCase;
use crate::event::{CorrelationId, EventPublisher, Payload};

/// The fixed set of pipeline extension points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    BeforeImport,
    AfterImport,
    BeforeGetTestClass,
    AfterGetTestClass,
    BeforeCreateTest,
    AfterCreateTest,
    BeforeRunTest,
    AfterRunTest,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeImport => "before_import",
            Self::AfterImport => "after_import",
            Self::BeforeGetTestClass => "before_get_test_class",
            Self::AfterGetTestClass => "after_get_test_class",
            Self::BeforeCreateTest => "before_create_test",
            Self::AfterCreateTest => "after_create_test",
            Self::BeforeRunTest => "before_run_test",
            Self::AfterRunTest => "after_run_test",
        }
    }
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook '{hook}' failed at {stage}: {message}")]
    Failed {
        stage: &'static str,
        hook: String,
        message: String,
    },

    #[error("hook '{hook}' panicked at {stage}: {message}")]
    Panicked {
        stage: &'static str,
        hook: String,
        message: String,
    },
}

pub type HookResult = Result<(), HookError>;

/// Handle returned by `register`; identifies the callback's slot in its stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookRegistration {
    pub stage: HookStage,
    pub index: usize,
}

/// The module currently being resolved for a unit
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub case_count: usize,
}

/// Mutable descriptor of the test class about to be instantiated.
///
/// Hooks may extend `fields` with additional named values before
/// instantiation; test code reads them through `TestContext::class_field`.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub module_name: String,
    pub name: String,
    pub fields: Payload,
}

impl ClassDescriptor {
    pub fn new(module_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            name: name.into(),
            fields: Payload::new(),
        }
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

/// Shared mutable context passed through every hook of a stage.
///
/// Callbacks may read and write; mutations are visible to subsequent hooks in
/// the same stage and to the pipeline code that resumes after the stage.
pub struct HookContext {
    pub correlation_id: CorrelationId,
    pub publisher: EventPublisher,
    pub module: Option<ModuleDescriptor>,
    pub class: Option<ClassDescriptor>,
    pub instance: Option<Box<dyn TestCase>>,
    /// Free-form values hooks expose to test code (`TestContext::extension`)
    pub extensions: Payload,
}

impl HookContext {
    pub fn new(correlation_id: CorrelationId, publisher: EventPublisher) -> Self {
        Self {
            correlation_id,
            publisher,
            module: None,
            class: None,
            instance: None,
            extensions: Payload::new(),
        }
    }
}

type HookFn = Box<dyn Fn(&mut HookContext) -> HookResult + Send + Sync>;

/// Ordered, named hook registry shared across worker threads
#[derive(Default)]
pub struct HookManager {
    hooks: HashMap<HookStage, Vec<(String, HookFn)>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named callback to a stage's ordered list
    pub fn register(
        &mut self,
        stage: HookStage,
        name: impl Into<String>,
        callback: impl Fn(&mut HookContext) -> HookResult + Send + Sync + 'static,
    ) -> HookRegistration {
        let slot = self.hooks.entry(stage).or_default();
        slot.push((name.into(), Box::new(callback)));
        HookRegistration {
            stage,
            index: slot.len() - 1,
        }
    }

    /// Run every callback registered for a stage, in registration order.
    /// The first error (or panic) aborts the stage.
    pub fn run(&self, stage: HookStage, context: &mut HookContext) -> HookResult {
        let Some(callbacks) = self.hooks.get(&stage) else {
            return Ok(());
        };

        for (name, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(context))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(panic) => {
                    return Err(HookError::Panicked {
                        stage: stage.as_str(),
                        hook: name.clone(),
                        message: panic_message(panic),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn count(&self, stage: HookStage) -> usize {
        self.hooks.get(&stage).map(Vec::len).unwrap_or(0)
    }
}

/// Best-effort extraction of a panic payload message
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
