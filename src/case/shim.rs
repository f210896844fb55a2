// Test unit execution shim.
// Runs one test method under set_up -> body -> tear_down, converts the
// outcome into events, and guarantees the per-unit bracketing:
// test_start .. exactly one terminal event .. test_end.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::json;

use super::{CaseFailure, CaseResult, TestCase, TestContext};
use crate::event::{EventPublisher, Payload, names};
use crate::hooks::panic_message;
use crate::suite::{TestFn, TestStatus, TestUnit};

/// Identity payload attached to every per-unit event
pub fn unit_payload(unit: &TestUnit) -> Payload {
    let mut payload = Payload::new();
    payload.insert("test_name".into(), json!(unit.test_name));
    payload.insert("class_name".into(), json!(unit.class_name));
    payload.insert("module_name".into(), json!(unit.module_name));
    payload
}

/// Execute one unit's full lifecycle and emit its event sequence.
///
/// tear_down still runs after a failing body; a failure in tear_down only
/// surfaces when the body itself succeeded.
pub fn run_unit(
    unit: &mut TestUnit,
    case: &mut dyn TestCase,
    test: &TestFn,
    cx: &mut TestContext,
    publisher: &EventPublisher,
) -> TestStatus {
    let cid = unit.correlation_id.clone();
    let base = unit_payload(unit);

    publisher.publish(names::TEST_START, &cid, base.clone());
    if let Err(e) = unit.start() {
        tracing::warn!("unit '{}' started twice: {}", unit.path(), e);
    }

    let outcome = match run_step(|| case.set_up(cx)) {
        Ok(()) => {
            publisher.publish(names::TEST_SETUP, &cid, base.clone());

            let body = run_step(|| test(case, cx));
            let teardown = run_step(|| case.tear_down(cx));
            publisher.publish(names::TEST_TEARDOWN, &cid, base.clone());

            match (body, teardown) {
                (Err(f), _) => Err(f),
                (Ok(()), Err(f)) => Err(f),
                (Ok(()), Ok(())) => Ok(()),
            }
        }
        // set_up never ran to completion: no marker events, no body
        Err(f) => Err(f),
    };

    let (status, name, detail) = classify(outcome);
    let mut terminal = base.clone();
    match (&status, &detail) {
        (TestStatus::Failed, Some(message)) => {
            terminal.insert("failure".into(), json!(message));
        }
        (TestStatus::Errored, Some(message)) => {
            terminal.insert("error".into(), json!(message));
        }
        (TestStatus::Skipped, Some(reason)) => {
            terminal.insert("reason".into(), json!(reason));
        }
        _ => {}
    }
    if let Some(output) = cx.take_output() {
        terminal.insert("output".into(), json!(output));
    }
    publisher.publish(name, &cid, terminal);

    if let Err(e) = unit.finish(status, detail) {
        tracing::warn!("unit '{}' finished twice: {}", unit.path(), e);
    }
    publisher.publish(names::TEST_END, &cid, base);

    status
}

/// Emit the full bracket for a unit that never runs (e.g. run cancelled)
pub fn skip_unit(unit: &mut TestUnit, publisher: &EventPublisher, reason: &str) {
    let cid = unit.correlation_id.clone();
    let base = unit_payload(unit);

    publisher.publish(names::TEST_START, &cid, base.clone());
    let _ = unit.start();

    let mut terminal = base.clone();
    terminal.insert("reason".into(), json!(reason));
    publisher.publish(names::TEST_SKIP, &cid, terminal);

    let _ = unit.finish(TestStatus::Skipped, Some(reason.to_string()));
    publisher.publish(names::TEST_END, &cid, base);
}

/// Emit the full bracket for a unit stopped by a run-stage hook failure
pub fn error_unit(unit: &mut TestUnit, publisher: &EventPublisher, message: &str) {
    let cid = unit.correlation_id.clone();
    let base = unit_payload(unit);

    publisher.publish(names::TEST_START, &cid, base.clone());
    let _ = unit.start();

    let mut terminal = base.clone();
    terminal.insert("error".into(), json!(message));
    publisher.publish(names::TEST_ERROR, &cid, terminal);

    let _ = unit.finish(TestStatus::Errored, Some(message.to_string()));
    publisher.publish(names::TEST_END, &cid, base);
}

/// Run one lifecycle step, converting an unwind into a typed error
fn run_step(step: impl FnOnce() -> CaseResult) -> CaseResult {
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(panic) => Err(CaseFailure::Error(panic_message(panic))),
    }
}

fn classify(outcome: CaseResult) -> (TestStatus, &'static str, Option<String>) {
    match outcome {
        Ok(()) => (TestStatus::Passed, names::TEST_SUCCESS, None),
        Err(CaseFailure::Assertion(m)) => (TestStatus::Failed, names::TEST_FAILURE, Some(m)),
        Err(CaseFailure::Skip(r)) => (TestStatus::Skipped, names::TEST_SKIP, Some(r)),
        Err(CaseFailure::Error(m)) => (TestStatus::Errored, names::TEST_ERROR, Some(m)),
    }
}
