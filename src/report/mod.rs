// Reporting - observers of the ordered event stream.
// Reporters are invoked only from the runner's drain loop, one event at a
// time, so implementations never need interior locking.

pub mod console;
pub mod json;

use std::collections::HashMap;

use anyhow::Result;

pub use console::ConsoleReporter;
pub use json::JsonReporter;

use crate::event::{Event, Payload, names};

/// Observer of the run's event stream.
///
/// Every method defaults to a no-op; a reporter overrides only the events it
/// cares about. `dispatch` routes built-in names to the typed methods and
/// everything else to `on_custom_event`.
pub trait Reporter: Send {
    fn name(&self) -> &str;

    fn on_test_run_start(&mut self, _event: &Event) {}
    fn on_test_run_end(&mut self, _event: &Event) {}
    fn on_test_run_error(&mut self, _event: &Event) {}
    fn on_test_run_interrupted(&mut self, _event: &Event) {}
    fn on_test_start(&mut self, _event: &Event) {}
    fn on_test_end(&mut self, _event: &Event) {}
    fn on_test_setup(&mut self, _event: &Event) {}
    fn on_test_teardown(&mut self, _event: &Event) {}
    fn on_test_success(&mut self, _event: &Event) {}
    fn on_test_failure(&mut self, _event: &Event) {}
    fn on_test_error(&mut self, _event: &Event) {}
    fn on_test_skip(&mut self, _event: &Event) {}

    /// Any event whose name is not one of the built-ins
    fn on_custom_event(&mut self, _event: &Event) {}

    fn dispatch(&mut self, event: &Event) {
        match event.name.as_str() {
            names::TEST_RUN_START => self.on_test_run_start(event),
            names::TEST_RUN_END => self.on_test_run_end(event),
            names::TEST_RUN_ERROR => self.on_test_run_error(event),
            names::TEST_RUN_INTERRUPTED => self.on_test_run_interrupted(event),
            names::TEST_START => self.on_test_start(event),
            names::TEST_END => self.on_test_end(event),
            names::TEST_SETUP => self.on_test_setup(event),
            names::TEST_TEARDOWN => self.on_test_teardown(event),
            names::TEST_SUCCESS => self.on_test_success(event),
            names::TEST_FAILURE => self.on_test_failure(event),
            names::TEST_ERROR => self.on_test_error(event),
            names::TEST_SKIP => self.on_test_skip(event),
            _ => self.on_custom_event(event),
        }
    }
}

type ReporterFactory = Box<dyn Fn(&Payload) -> Result<Box<dyn Reporter>> + Send + Sync>;

/// Name-keyed factory table for reporters.
///
/// Lookup is tolerant about spelling: `Console`, `console` and
/// `ConsoleReporter` all resolve to the same factory.
pub struct ReporterRegistry {
    factories: HashMap<String, ReporterFactory>,
}

impl Default for ReporterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("console", |options| {
            Ok(Box::new(ConsoleReporter::from_options(options)))
        });
        registry.register("json", |options| {
            Ok(Box::new(JsonReporter::from_options(options)?))
        });
        registry
    }
}

impl ReporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&Payload) -> Result<Box<dyn Reporter>> + Send + Sync + 'static,
    ) {
        self.factories
            .insert(normalize(&name.into()), Box::new(factory));
    }

    /// Instantiate a reporter by name with reporter-specific options
    pub fn create(&self, name: &str, options: &Payload) -> Result<Box<dyn Reporter>> {
        let key = normalize(name);
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| anyhow::anyhow!("unknown reporter '{}'", name))?;
        factory(options)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Registry key for a reporter name; the CLI uses the same rule when it
/// groups `--<reporter>-<option>` passthrough arguments.
pub(crate) fn normalize(name: &str) -> String {
    crate::registry_key(name, "Reporter")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CorrelationId;

    #[derive(Default)]
    struct Recording {
        calls: Vec<String>,
    }

    impl Reporter for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn on_test_success(&mut self, event: &Event) {
            self.calls.push(format!("success:{}", event.name));
        }

        fn on_custom_event(&mut self, event: &Event) {
            self.calls.push(format!("custom:{}", event.name));
        }
    }

    fn event(name: &str) -> Event {
        Event::new(name, CorrelationId::mint(), Payload::new())
    }

    #[test]
    fn test_dispatch_routes_builtin_names() {
        let mut reporter = Recording::default();
        reporter.dispatch(&event(names::TEST_SUCCESS));
        reporter.dispatch(&event(names::TEST_FAILURE)); // no override, no-op
        assert_eq!(reporter.calls, vec!["success:test_success"]);
    }

    #[test]
    fn test_dispatch_routes_unknown_names_to_custom() {
        let mut reporter = Recording::default();
        reporter.dispatch(&event("database_query"));
        assert_eq!(reporter.calls, vec!["custom:database_query"]);
    }

    #[test]
    fn test_registry_name_normalization() {
        let registry = ReporterRegistry::new();
        let options = Payload::new();
        assert!(registry.create("console", &options).is_ok());
        assert!(registry.create("Console", &options).is_ok());
        assert!(registry.create("ConsoleReporter", &options).is_ok());
        assert!(registry.create("bogus", &options).is_err());
    }

    #[test]
    fn test_registry_lists_builtins() {
        let registry = ReporterRegistry::new();
        assert_eq!(registry.names(), vec!["console", "json"]);
    }
}
