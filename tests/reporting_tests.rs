// Reporter behavior through full runs, plus CLI assembly of reporters.

use std::sync::{Arc, Mutex};

use eventest::case::{CaseFailure, TestCase, TestContext};
use eventest::cli::{self, Cli};
use eventest::event::{Event, object};
use eventest::report::{Reporter, ReporterRegistry};
use eventest::runner::{EventDrivenTestRunner, RunnerConfig};
use eventest::server::ServerRegistry;
use eventest::suite::SuiteRegistry;
use serde_json::json;

#[derive(Default)]
struct PlainCase;
impl TestCase for PlainCase {}

fn config() -> RunnerConfig {
    RunnerConfig {
        workers: Some(1),
        catch_interrupt: false,
        ..RunnerConfig::default()
    }
}

fn sample_registry() -> SuiteRegistry {
    let mut registry = SuiteRegistry::new();
    registry
        .module("sample")
        .case("SampleCase", PlainCase::default)
        .test("test_pass", |_c: &mut PlainCase, cx: &mut TestContext| {
            cx.publish("throughput_measured", object(json!({"rps": 1200})));
            Ok(())
        })
        .test("test_fail", |_c: &mut PlainCase, _cx| {
            Err(CaseFailure::assertion("expected 1, got 2"))
        });
    registry
}

#[tokio::test]
async fn test_json_reporter_streams_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let mut options = eventest::Payload::new();
    options.insert("path".into(), json!(path.to_str().unwrap()));

    let mut runner = EventDrivenTestRunner::new(sample_registry(), config());
    let reporter = ReporterRegistry::new().create("json", &options).unwrap();
    runner.add_reporter(reporter);
    runner.run().await.unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines.first().unwrap()["event"], "test_run_start");
    assert_eq!(lines.last().unwrap()["event"], "test_run_end");

    // Custom events travel the same stream as built-ins
    let custom = lines
        .iter()
        .find(|l| l["event"] == "throughput_measured")
        .unwrap();
    assert_eq!(custom["payload"]["rps"], 1200);
    assert!(custom["correlation_id"].is_string());
    assert!(custom["timestamp"].is_string());

    let failure = lines.iter().find(|l| l["event"] == "test_failure").unwrap();
    assert_eq!(failure["payload"]["failure"], "expected 1, got 2");
}

/// A reporter that panics on every success event
struct Grenade;

impl Reporter for Grenade {
    fn name(&self) -> &str {
        "grenade"
    }

    fn on_test_success(&mut self, _event: &Event) {
        panic!("reporter bug");
    }
}

struct Counter {
    count: Arc<Mutex<usize>>,
}

impl Reporter for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    fn dispatch(&mut self, _event: &Event) {
        *self.count.lock().unwrap() += 1;
    }
}

#[tokio::test]
async fn test_panicking_reporter_does_not_stop_delivery() {
    let count = Arc::new(Mutex::new(0));
    let mut runner = EventDrivenTestRunner::new(sample_registry(), config());
    runner.add_reporter(Box::new(Grenade));
    runner.add_reporter(Box::new(Counter {
        count: count.clone(),
    }));

    let report = runner.run().await.unwrap();
    assert_eq!(report.session.totals.passed, 1);

    // run_start + 2 full brackets (5 + custom) + run_end
    assert!(*count.lock().unwrap() >= 13);
}

#[tokio::test]
async fn test_cli_assembles_reporters_from_passthrough_options() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cli-events.jsonl");

    let cli = Cli {
        reporters: vec!["json".into()],
        reporter_options: vec![
            "--json-path".into(),
            path.to_str().unwrap().into(),
        ],
        workers: Some(1),
        ..Cli::default()
    };

    let exit = cli::run_parsed(
        cli,
        sample_registry(),
        ReporterRegistry::new(),
        ServerRegistry::new(),
    )
    .await
    .unwrap();
    assert_eq!(exit, 1, "failing test maps to exit code 1");

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.lines().count() > 2);
}

#[tokio::test]
async fn test_cli_rejects_unknown_reporter() {
    let cli = Cli {
        reporters: vec!["holographic".into()],
        ..Cli::default()
    };
    let result = cli::run_parsed(
        cli,
        sample_registry(),
        ReporterRegistry::new(),
        ServerRegistry::new(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_custom_reporter_registration() {
    let count = Arc::new(Mutex::new(0));
    let mut reporters = ReporterRegistry::new();
    let shared = count.clone();
    reporters.register("counting", move |_options| {
        Ok(Box::new(Counter {
            count: shared.clone(),
        }))
    });

    let cli = Cli {
        reporters: vec!["CountingReporter".into()],
        workers: Some(1),
        ..Cli::default()
    };
    cli::run_parsed(cli, sample_registry(), reporters, ServerRegistry::new())
        .await
        .unwrap();

    assert!(*count.lock().unwrap() > 0);
}
