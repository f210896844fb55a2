pub mod case;
pub mod cli;
pub mod config;
pub mod event;
pub mod hooks;
pub mod logging;
pub mod report;
pub mod runner;
pub mod server;
pub mod suite;
pub mod worker;

pub use case::{CaseFailure, CaseResult, TestCase, TestContext};
pub use event::{CorrelationId, Event, EventBus, EventPublisher, Payload};
pub use hooks::{HookContext, HookManager, HookStage};
pub use report::{Reporter, ReporterRegistry};
pub use runner::{CancelHandle, EventDrivenTestRunner, RunReport, RunnerConfig};
pub use server::{ServerRegistry, TestServer};
pub use suite::{SuiteRegistry, TestStatus, TestUnit};

/// Lookup key shared by the name-keyed registries: the conventional type
/// suffix is stripped and the rest lowercased, so `ConsoleReporter`,
/// `Console` and `console` all resolve the same entry.
pub(crate) fn registry_key(name: &str, suffix: &str) -> String {
    name.trim_end_matches(suffix).to_ascii_lowercase()
}
