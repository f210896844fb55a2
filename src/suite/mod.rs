// Suite registry - the ordered source of test unit descriptors.
// File-system discovery stays outside the engine; consumers register
// modules, case types and test functions here, and the runner enumerates
// them as TestUnits. "Importing" a module is a registry lookup wrapped by
// the import hook stages.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::case::{CaseFailure, CaseResult, TestCase, TestContext};
use crate::event::CorrelationId;

/// Lifecycle status of one test unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Errored,
    Skipped,
}

impl TestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed | Self::Errored | Self::Skipped
        )
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid status transition {from:?} -> {to:?} for '{unit}'")]
    InvalidTransition {
        unit: String,
        from: TestStatus,
        to: TestStatus,
    },
}

/// One discovered test method invocation.
///
/// Owned by exactly one worker for its lifetime; the terminal status is set
/// exactly once.
#[derive(Debug, Clone)]
pub struct TestUnit {
    pub module_name: String,
    pub class_name: String,
    pub test_name: String,
    pub correlation_id: CorrelationId,
    status: TestStatus,
    detail: Option<String>,
}

impl TestUnit {
    pub fn new(
        module_name: impl Into<String>,
        class_name: impl Into<String>,
        test_name: impl Into<String>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            class_name: class_name.into(),
            test_name: test_name.into(),
            correlation_id: CorrelationId::mint(),
            status: TestStatus::Pending,
            detail: None,
        }
    }

    /// Dotted path used for display and pattern filtering
    pub fn path(&self) -> String {
        format!("{}.{}.{}", self.module_name, self.class_name, self.test_name)
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Pending -> Running
    pub fn start(&mut self) -> Result<(), StateError> {
        if self.status != TestStatus::Pending {
            return Err(StateError::InvalidTransition {
                unit: self.path(),
                from: self.status,
                to: TestStatus::Running,
            });
        }
        self.status = TestStatus::Running;
        Ok(())
    }

    /// Set the terminal status exactly once
    pub fn finish(&mut self, status: TestStatus, detail: Option<String>) -> Result<(), StateError> {
        if !status.is_terminal() || self.status.is_terminal() {
            return Err(StateError::InvalidTransition {
                unit: self.path(),
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.detail = detail;
        Ok(())
    }
}

pub type CaseFactory = Arc<dyn Fn() -> Box<dyn TestCase> + Send + Sync>;
pub type TestFn = Arc<dyn Fn(&mut dyn TestCase, &mut TestContext) -> CaseResult + Send + Sync>;

/// A named test method of a case
pub struct TestEntry {
    pub name: String,
    pub run: TestFn,
}

/// A registered test case type and its test methods
pub struct CaseEntry {
    pub class_name: String,
    pub factory: CaseFactory,
    tests: Vec<TestEntry>,
}

impl CaseEntry {
    /// Register a test method. The function receives the concrete case type;
    /// a unit whose registered type does not match errors at run time.
    pub fn test<C>(
        &mut self,
        name: impl Into<String>,
        test: impl Fn(&mut C, &mut TestContext) -> CaseResult + Send + Sync + 'static,
    ) -> &mut Self
    where
        C: TestCase + 'static,
    {
        let wrapped: TestFn = Arc::new(move |case, cx| {
            let any: &mut dyn std::any::Any = case;
            let case = any.downcast_mut::<C>().ok_or_else(|| {
                CaseFailure::error("registered test function does not match case type")
            })?;
            test(case, cx)
        });
        self.tests.push(TestEntry {
            name: name.into(),
            run: wrapped,
        });
        self
    }

    pub fn test_fn(&self, name: &str) -> Option<&TestFn> {
        self.tests.iter().find(|t| t.name == name).map(|t| &t.run)
    }

    pub fn test_names(&self) -> impl Iterator<Item = &str> {
        self.tests.iter().map(|t| t.name.as_str())
    }
}

/// A registered module grouping case entries
pub struct ModuleEntry {
    pub name: String,
    cases: Vec<CaseEntry>,
}

impl ModuleEntry {
    /// Register a case type under this module
    pub fn case<C>(
        &mut self,
        class_name: impl Into<String>,
        factory: impl Fn() -> C + Send + Sync + 'static,
    ) -> &mut CaseEntry
    where
        C: TestCase + 'static,
    {
        self.cases.push(CaseEntry {
            class_name: class_name.into(),
            factory: Arc::new(move || Box::new(factory())),
            tests: Vec::new(),
        });
        self.cases.last_mut().unwrap()
    }

    pub fn case_entry(&self, class_name: &str) -> Option<&CaseEntry> {
        self.cases.iter().find(|c| c.class_name == class_name)
    }

    pub fn case_count(&self) -> usize {
        self.cases.len()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid discovery pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Explicit registration table replacing reflective discovery
#[derive(Default)]
pub struct SuiteRegistry {
    modules: Vec<ModuleEntry>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a module entry
    pub fn module(&mut self, name: impl Into<String>) -> &mut ModuleEntry {
        let name = name.into();
        if let Some(idx) = self.modules.iter().position(|m| m.name == name) {
            return &mut self.modules[idx];
        }
        self.modules.push(ModuleEntry {
            name,
            cases: Vec::new(),
        });
        self.modules.last_mut().unwrap()
    }

    pub fn resolve_module(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Enumerate units in registration order, optionally filtered by a regex
    /// matched against the `module.Class.test` path.
    pub fn discover(&self, pattern: Option<&str>) -> Result<Vec<TestUnit>, RegistryError> {
        let filter = match pattern {
            Some(p) => Some(regex::Regex::new(p).map_err(|source| RegistryError::Pattern {
                pattern: p.to_string(),
                source,
            })?),
            None => None,
        };

        let mut units = Vec::new();
        for module in &self.modules {
            for case in &module.cases {
                for test in &case.tests {
                    let unit = TestUnit::new(&module.name, &case.class_name, &test.name);
                    if let Some(re) = &filter {
                        if !re.is_match(&unit.path()) {
                            continue;
                        }
                    }
                    units.push(unit);
                }
            }
        }
        Ok(units)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
