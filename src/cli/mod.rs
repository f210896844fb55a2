// CLI entry point - argument parsing, config merging and engine assembly.
// Consumers call `run` (or `run_with` for custom reporter/server registries)
// from their own binary after registering suites.

pub mod args;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;

pub use args::Cli;

use crate::config::Config;
use crate::event::Payload;
use crate::report::{ReporterRegistry, normalize};
use crate::runner::{EventDrivenTestRunner, RunnerConfig};
use crate::server::ServerRegistry;
use crate::suite::SuiteRegistry;

/// Run with the built-in reporters and servers. Returns the process exit
/// code; the caller decides when to `std::process::exit`.
pub async fn run(registry: SuiteRegistry) -> Result<i32> {
    run_with(registry, ReporterRegistry::new(), ServerRegistry::new()).await
}

/// Run with custom reporter and server registries
pub async fn run_with(
    registry: SuiteRegistry,
    reporters: ReporterRegistry,
    servers: ServerRegistry,
) -> Result<i32> {
    let cli = Cli::parse();
    run_parsed(cli, registry, reporters, servers).await
}

pub async fn run_parsed(
    cli: Cli,
    registry: SuiteRegistry,
    reporters: ReporterRegistry,
    servers: ServerRegistry,
) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => Config::load().unwrap_or_default(),
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    crate::logging::init(level);

    let runner_config = merge(&cli, &config);
    let reporter_names = if cli.reporters.is_empty() {
        config.report.reporters.clone()
    } else {
        cli.reporters.clone()
    };
    let server_name = cli.server.as_deref().unwrap_or(&config.run.server);

    let mut options = parse_reporter_options(&reporter_names, &cli.reporter_options)?;

    let mut runner = EventDrivenTestRunner::new(registry, runner_config);
    let server = servers.create(server_name)?;
    runner.install_server(server.as_ref())?;
    for name in &reporter_names {
        let opts = options.remove(&normalize(name)).unwrap_or_default();
        let reporter = reporters
            .create(name, &opts)
            .with_context(|| format!("failed to create reporter '{name}'"))?;
        runner.add_reporter(reporter);
    }

    let report = runner.run().await?;
    Ok(report.exit_code())
}

/// CLI flags override file values, which override defaults.
fn merge(cli: &Cli, config: &Config) -> RunnerConfig {
    RunnerConfig {
        workers: cli.workers.or_else(|| config.worker_count()),
        pattern: cli.pattern.clone().or_else(|| config.run.pattern.clone()),
        fail_fast: cli.fail_fast || config.run.fail_fast,
        catch_interrupt: if cli.no_catch_interrupt {
            false
        } else {
            config.run.catch_interrupt
        },
        grace_period: Duration::from_secs(
            cli.grace_period.unwrap_or(config.run.grace_period),
        ),
        buffer_output: if cli.no_capture {
            false
        } else {
            config.run.capture_output
        },
    }
}

/// Split trailing `--<reporter>-<option> <value>` pairs into per-reporter
/// option maps. Only active reporter names are recognized; the longest
/// matching name wins (`--json-lines-path` prefers a `json-lines` reporter
/// over `json`).
pub fn parse_reporter_options(
    active: &[String],
    raw: &[String],
) -> Result<HashMap<String, Payload>> {
    let mut names: Vec<String> = active.iter().map(|n| normalize(n)).collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));

    let mut options: HashMap<String, Payload> = HashMap::new();
    let mut tokens = raw.iter();
    while let Some(token) = tokens.next() {
        let Some(stripped) = token.strip_prefix("--") else {
            bail!("unexpected argument '{token}', expected --<reporter>-<option>");
        };

        let Some(name) = names
            .iter()
            .find(|n| stripped.strip_prefix(n.as_str()).is_some_and(|r| r.starts_with('-')))
        else {
            bail!("option '{token}' does not match any active reporter");
        };

        let key = stripped[name.len() + 1..].replace('-', "_");
        if key.is_empty() {
            bail!("option '{token}' is missing an option name");
        }
        let Some(value) = tokens.next() else {
            bail!("option '{token}' is missing a value");
        };

        options
            .entry(name.clone())
            .or_default()
            .insert(key, json!(value));
    }
    Ok(options)
}
