// Test servers - named bundles of hook registrations.
// A server customizes the pipeline exclusively through the hook manager;
// there is no other extension surface into execution.

use std::collections::HashMap;

use anyhow::Result;

use crate::hooks::HookManager;

/// A pluggable execution profile.
///
/// `install` registers whatever hooks the server needs; the engine calls it
/// once before workers spawn. Servers hold no per-unit state themselves -
/// anything test code should see goes through the hook context.
pub trait TestServer: Send {
    fn name(&self) -> &str;

    fn install(&self, hooks: &mut HookManager) -> Result<()>;
}

/// The stock server: no hooks, plain pipeline behavior.
#[derive(Debug, Default)]
pub struct DefaultTestServer;

impl TestServer for DefaultTestServer {
    fn name(&self) -> &str {
        "default"
    }

    fn install(&self, _hooks: &mut HookManager) -> Result<()> {
        Ok(())
    }
}

type ServerFactory = Box<dyn Fn() -> Box<dyn TestServer> + Send + Sync>;

/// Name-keyed factory table for test servers.
///
/// Like reporters, lookup strips the conventional suffix: `Default`,
/// `default` and `DefaultTestServer` all resolve the same entry.
pub struct ServerRegistry {
    factories: HashMap<String, ServerFactory>,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("default", || Box::new(DefaultTestServer));
        registry
    }
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn TestServer> + Send + Sync + 'static,
    ) {
        self.factories
            .insert(normalize(&name.into()), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn TestServer>> {
        let factory = self
            .factories
            .get(&normalize(name))
            .ok_or_else(|| anyhow::anyhow!("unknown test server '{}'", name))?;
        Ok(factory())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn normalize(name: &str) -> String {
    crate::registry_key(name, "TestServer")
}
