// End-to-end runs through the engine: event ordering, totals, cancellation.

use std::sync::{Arc, Mutex};

use eventest::case::{CaseFailure, TestCase, TestContext};
use eventest::event::{Event, names, object};
use eventest::report::Reporter;
use eventest::runner::{EventDrivenTestRunner, RunnerConfig};
use eventest::suite::SuiteRegistry;
use serde_json::json;

/// Clones every delivered event into shared storage
struct Collect {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Reporter for Collect {
    fn name(&self) -> &str {
        "collect"
    }

    fn dispatch(&mut self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn collector() -> (Collect, Arc<Mutex<Vec<Event>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    (
        Collect {
            events: events.clone(),
        },
        events,
    )
}

fn config(workers: usize) -> RunnerConfig {
    RunnerConfig {
        workers: Some(workers),
        catch_interrupt: false,
        ..RunnerConfig::default()
    }
}

#[derive(Default)]
struct PlainCase;
impl TestCase for PlainCase {}

#[tokio::test]
async fn test_single_unit_event_sequence() {
    let mut registry = SuiteRegistry::new();
    registry
        .module("math")
        .case("ArithmeticCase", PlainCase::default)
        .test("test_add", |_c: &mut PlainCase, cx: &mut TestContext| {
            cx.publish("calculation_done", object(json!({"result": 4})));
            Ok(())
        });

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(registry, config(1));
    runner.add_reporter(Box::new(reporter));
    let report = runner.run().await.unwrap();
    assert!(report.success());

    let events = events.lock().unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "test_run_start",
            "test_start",
            "test_setup",
            "calculation_done",
            "test_teardown",
            "test_success",
            "test_end",
            "test_run_end",
        ]
    );

    // Every per-unit event shares the unit's correlation id
    let cid = &events[1].correlation_id;
    assert!(events[1..7].iter().all(|e| e.correlation_id == *cid));
    assert_ne!(events[0].correlation_id, *cid);

    // Terminal payload identifies the unit
    let success = &events[5];
    assert_eq!(success.get_str("test_name"), Some("test_add"));
    assert_eq!(success.get_str("class_name"), Some("ArithmeticCase"));
    assert_eq!(success.get_str("module_name"), Some("math"));
}

#[tokio::test]
async fn test_per_unit_order_holds_under_parallelism() {
    let mut registry = SuiteRegistry::new();
    let module = registry.module("para");
    let case = module.case("ParallelCase", PlainCase::default);
    for i in 0..20 {
        case.test(format!("test_{i}"), |_c: &mut PlainCase, _cx| Ok(()));
    }

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(registry, config(4));
    runner.add_reporter(Box::new(reporter));
    let report = runner.run().await.unwrap();
    assert_eq!(report.session.totals.passed, 20);

    let events = events.lock().unwrap();
    assert_eq!(events.first().unwrap().name, names::TEST_RUN_START);
    assert_eq!(events.last().unwrap().name, names::TEST_RUN_END);

    // Interleaving across units is free, but each unit's own events arrive
    // in lifecycle order.
    let mut per_unit: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();
    for event in events[1..events.len() - 1].iter() {
        per_unit
            .entry(event.correlation_id.to_string())
            .or_default()
            .push(event.name.clone());
    }
    assert_eq!(per_unit.len(), 20);
    for sequence in per_unit.values() {
        assert_eq!(
            sequence,
            &vec![
                "test_start",
                "test_setup",
                "test_teardown",
                "test_success",
                "test_end"
            ]
        );
    }
}

#[tokio::test]
async fn test_outcome_taxonomy_and_exit_code() {
    let mut registry = SuiteRegistry::new();
    registry
        .module("outcomes")
        .case("OutcomeCase", PlainCase::default)
        .test("test_pass", |_c: &mut PlainCase, _cx| Ok(()))
        .test("test_fail", |_c: &mut PlainCase, _cx| {
            Err(CaseFailure::assertion("2 + 2 != 5"))
        })
        .test("test_skip", |_c: &mut PlainCase, _cx| {
            Err(CaseFailure::skip("needs network"))
        })
        .test("test_panic", |_c: &mut PlainCase, _cx| -> eventest::CaseResult {
            panic!("unexpected state")
        });

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(registry, config(2));
    runner.add_reporter(Box::new(reporter));
    let report = runner.run().await.unwrap();

    let totals = report.session.totals;
    assert_eq!(totals.total, 4);
    assert_eq!(totals.passed, 1);
    assert_eq!(totals.failed, 1);
    assert_eq!(totals.skipped, 1);
    assert_eq!(totals.errored, 1);
    assert_eq!(report.exit_code(), 1);

    let events = events.lock().unwrap();
    let failure = events.iter().find(|e| e.name == names::TEST_FAILURE).unwrap();
    assert_eq!(failure.get_str("failure"), Some("2 + 2 != 5"));

    let skip = events.iter().find(|e| e.name == names::TEST_SKIP).unwrap();
    assert_eq!(skip.get_str("reason"), Some("needs network"));

    // A panicking body is an error carrying the panic message
    let error = events.iter().find(|e| e.name == names::TEST_ERROR).unwrap();
    assert_eq!(error.get_str("error"), Some("unexpected state"));
}

#[tokio::test]
async fn test_fail_fast_skips_remaining_units() {
    let mut registry = SuiteRegistry::new();
    let case = registry
        .module("ff")
        .case("FailFastCase", PlainCase::default);
    case.test("test_0_fails", |_c: &mut PlainCase, _cx| {
        Err(CaseFailure::assertion("first"))
    });
    for i in 1..10 {
        case.test(format!("test_{i}"), |_c: &mut PlainCase, _cx| {
            std::thread::sleep(std::time::Duration::from_millis(10));
            Ok(())
        });
    }

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(
        registry,
        RunnerConfig {
            fail_fast: true,
            ..config(1)
        },
    );
    runner.add_reporter(Box::new(reporter));
    let report = runner.run().await.unwrap();

    let totals = report.session.totals;
    assert_eq!(totals.failed, 1);
    assert!(totals.skipped > 0, "remaining units should be skipped");
    assert_eq!(totals.passed + totals.failed + totals.skipped, 10);

    let events = events.lock().unwrap();
    let skip = events.iter().find(|e| e.name == names::TEST_SKIP).unwrap();
    assert_eq!(skip.get_str("reason"), Some("run cancelled"));
}

#[tokio::test]
async fn test_discovery_pattern_limits_run() {
    let mut registry = SuiteRegistry::new();
    registry
        .module("alpha")
        .case("AlphaCase", PlainCase::default)
        .test("test_a", |_c: &mut PlainCase, _cx| Ok(()));
    registry
        .module("beta")
        .case("BetaCase", PlainCase::default)
        .test("test_b", |_c: &mut PlainCase, _cx| Ok(()));

    let runner = EventDrivenTestRunner::new(
        registry,
        RunnerConfig {
            pattern: Some("^alpha".into()),
            ..config(2)
        },
    );
    let report = runner.run().await.unwrap();
    assert_eq!(report.session.totals.total, 1);
    assert_eq!(report.session.totals.passed, 1);
}

#[tokio::test]
async fn test_invalid_pattern_is_an_error() {
    let mut registry = SuiteRegistry::new();
    registry
        .module("m")
        .case("C", PlainCase::default)
        .test("test_t", |_c: &mut PlainCase, _cx| Ok(()));

    let runner = EventDrivenTestRunner::new(
        registry,
        RunnerConfig {
            pattern: Some("[".into()),
            ..config(1)
        },
    );
    assert!(runner.run().await.is_err());
}

struct ExplodingCtorCase;
impl TestCase for ExplodingCtorCase {}

#[tokio::test]
async fn test_panicking_constructor_errors_only_its_unit() {
    let mut registry = SuiteRegistry::new();
    registry
        .module("ctor")
        .case("ExplodingCtorCase", || -> ExplodingCtorCase {
            panic!("constructor blew up")
        })
        .test("test_never_constructed", |_c: &mut ExplodingCtorCase, _cx| {
            Ok(())
        });
    let case = registry.module("ctor").case("SteadyCase", PlainCase::default);
    for i in 0..3 {
        case.test(format!("test_steady_{i}"), |_c: &mut PlainCase, _cx| Ok(()));
    }

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(registry, config(1));
    runner.add_reporter(Box::new(reporter));
    let report = runner.run().await.unwrap();

    // The worker survives the panic and finishes its partition
    let totals = report.session.totals;
    assert_eq!(totals.total, 4);
    assert_eq!(totals.errored, 1);
    assert_eq!(totals.passed, 3);
    assert_eq!(totals.run_errors, 0);

    let events = events.lock().unwrap();
    let error = events.iter().find(|e| e.name == names::TEST_ERROR).unwrap();
    assert!(error.get_str("error").unwrap().contains("constructor blew up"));
}

#[tokio::test]
async fn test_cancellation_drains_and_skips_remaining_units() {
    let mut registry = SuiteRegistry::new();
    let case = registry.module("slow").case("SlowCase", PlainCase::default);
    for i in 0..10 {
        case.test(format!("test_slow_{i}"), |_c: &mut PlainCase, _cx| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(())
        });
    }

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(registry, config(1));
    runner.add_reporter(Box::new(reporter));
    let handle = runner.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.cancel();
    });

    let report = runner.run().await.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.exit_code(), 130);

    let totals = report.session.totals;
    assert_eq!(totals.passed + totals.skipped, 10);
    assert!(totals.skipped > 0, "units after the cancel point are skipped");
    assert_eq!(totals.failed, 0);
    assert_eq!(totals.errored, 0);
    assert_eq!(totals.run_errors, 0);

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| e.name == names::TEST_RUN_INTERRUPTED));
    assert_eq!(events.last().unwrap().name, names::TEST_RUN_END);
    let skip = events.iter().find(|e| e.name == names::TEST_SKIP).unwrap();
    assert_eq!(skip.get_str("reason"), Some("run cancelled"));
}

struct LifecycleCase {
    ready: bool,
}

impl TestCase for LifecycleCase {
    fn set_up(&mut self, _cx: &mut TestContext) -> eventest::CaseResult {
        self.ready = true;
        Ok(())
    }

    fn tear_down(&mut self, cx: &mut TestContext) -> eventest::CaseResult {
        cx.publish("teardown_reached", object(json!({})));
        Ok(())
    }
}

#[tokio::test]
async fn test_teardown_runs_after_failing_body() {
    let mut registry = SuiteRegistry::new();
    registry
        .module("lifecycle")
        .case("LifecycleCase", || LifecycleCase { ready: false })
        .test("test_fails", |c: &mut LifecycleCase, _cx| {
            assert!(c.ready, "set_up ran before the body");
            Err(CaseFailure::assertion("deliberate"))
        });

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(registry, config(1));
    runner.add_reporter(Box::new(reporter));
    let report = runner.run().await.unwrap();
    assert_eq!(report.session.totals.failed, 1);

    let events = events.lock().unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"teardown_reached"));
    let teardown = names.iter().position(|n| *n == "test_teardown").unwrap();
    let failure = names.iter().position(|n| *n == "test_failure").unwrap();
    assert!(teardown < failure);
}

struct BrokenSetupCase;

impl TestCase for BrokenSetupCase {
    fn set_up(&mut self, _cx: &mut TestContext) -> eventest::CaseResult {
        Err(CaseFailure::error("fixture unavailable"))
    }
}

#[tokio::test]
async fn test_setup_failure_skips_body_and_markers() {
    let mut registry = SuiteRegistry::new();
    registry
        .module("fixtures")
        .case("BrokenSetupCase", || BrokenSetupCase)
        .test("test_never_runs", |_c: &mut BrokenSetupCase, cx: &mut TestContext| {
            cx.publish("body_ran", object(json!({})));
            Ok(())
        });

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(registry, config(1));
    runner.add_reporter(Box::new(reporter));
    let report = runner.run().await.unwrap();
    assert_eq!(report.session.totals.errored, 1);

    let events = events.lock().unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "test_run_start",
            "test_start",
            "test_error",
            "test_end",
            "test_run_end",
        ]
    );
}

#[tokio::test]
async fn test_captured_output_attached_to_terminal_event() {
    let mut registry = SuiteRegistry::new();
    registry
        .module("output")
        .case("OutputCase", PlainCase::default)
        .test("test_noisy", |_c: &mut PlainCase, cx: &mut TestContext| {
            cx.capture("first line");
            cx.capture("second line");
            Ok(())
        });

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(registry, config(1));
    runner.add_reporter(Box::new(reporter));
    runner.run().await.unwrap();

    let events = events.lock().unwrap();
    let success = events.iter().find(|e| e.name == names::TEST_SUCCESS).unwrap();
    assert_eq!(success.get_str("output"), Some("first line\nsecond line\n"));
}

#[tokio::test]
async fn test_run_end_totals_match_report() {
    let mut registry = SuiteRegistry::new();
    registry
        .module("totals")
        .case("TotalsCase", PlainCase::default)
        .test("test_a", |_c: &mut PlainCase, _cx| Ok(()))
        .test("test_b", |_c: &mut PlainCase, _cx| {
            Err(CaseFailure::assertion("nope"))
        });

    let (reporter, events) = collector();
    let mut runner = EventDrivenTestRunner::new(registry, config(2));
    runner.add_reporter(Box::new(reporter));
    let report = runner.run().await.unwrap();

    let events = events.lock().unwrap();
    let end = events.iter().find(|e| e.name == names::TEST_RUN_END).unwrap();
    assert_eq!(end.get("total"), Some(&json!(2)));
    assert_eq!(end.get("passed"), Some(&json!(report.session.totals.passed)));
    assert_eq!(end.get("failed"), Some(&json!(report.session.totals.failed)));
    assert_eq!(end.get("interrupted"), Some(&json!(false)));
    assert!(end.get("duration_ms").is_some());

    let start = events.iter().find(|e| e.name == names::TEST_RUN_START).unwrap();
    assert_eq!(start.get("total"), Some(&json!(2)));
    assert_eq!(
        start.get_str("run_id"),
        Some(report.session.run_id.as_str())
    );
}
