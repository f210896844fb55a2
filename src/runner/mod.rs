// Runner - single-writer orchestration of a whole run.
// Owns discovery, worker spawn, the fan-in drain loop, reporter delivery
// and the final session accounting. Only this module ever touches totals
// or invokes reporters, so the whole run needs no shared-state locking.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::stream::select_all;
use serde::Serialize;
use serde_json::json;
use tokio_stream::StreamExt;

use crate::event::{CorrelationId, Event, EventBus, WireEvent, names, object};
use crate::hooks::HookManager;
use crate::report::Reporter;
use crate::server::TestServer;
use crate::suite::{SuiteRegistry, TestStatus};
use crate::worker::{self, CANCELLED_REASON};

/// Coarse phases of one `run` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    NotStarted,
    Discovering,
    Dispatching,
    Draining,
    Finalizing,
    Done,
}

/// Aggregated outcome counters for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    /// Framework-level errors that are not attributable to test logic
    pub run_errors: usize,
}

impl RunTotals {
    fn absorb(&mut self, status: TestStatus) {
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Errored => self.errored += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Pending | TestStatus::Running => {}
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.errored == 0 && self.run_errors == 0
    }
}

/// Identity and accounting of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSession {
    pub run_id: CorrelationId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub totals: RunTotals,
}

impl RunSession {
    fn new() -> Self {
        Self {
            run_id: CorrelationId::mint(),
            started_at: Utc::now(),
            ended_at: None,
            totals: RunTotals::default(),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or(0)
    }
}

/// Tunables for one run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Worker thread count; `None` picks the machine's parallelism
    pub workers: Option<usize>,
    /// Regex applied to the `module.Class.test` path during discovery
    pub pattern: Option<String>,
    /// Cancel remaining units after the first failure or error
    pub fail_fast: bool,
    /// Listen for Ctrl-C and turn it into a graceful cancellation
    pub catch_interrupt: bool,
    /// How long to keep draining events after an interrupt
    pub grace_period: Duration,
    /// Buffer per-test captured output into terminal event payloads
    pub buffer_output: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            pattern: None,
            fail_fast: false,
            catch_interrupt: true,
            grace_period: Duration::from_secs(5),
            buffer_output: true,
        }
    }
}

impl RunnerConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Final result handed back to the caller
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session: RunSession,
    pub interrupted: bool,
}

impl RunReport {
    pub fn success(&self) -> bool {
        !self.interrupted && self.session.totals.is_clean()
    }

    /// Process exit code: 0 clean, 130 interrupted, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else if self.session.totals.is_clean() {
            0
        } else {
            1
        }
    }
}

struct UnitTrack {
    path: String,
    started: bool,
    terminal: Option<TestStatus>,
}

/// Cancels a run in progress from outside the drain loop.
///
/// Obtained from [`EventDrivenTestRunner::cancel_handle`] before the run
/// starts; `cancel` triggers the same graceful shutdown as Ctrl-C.
#[derive(Clone)]
pub struct CancelHandle {
    notify: Arc<tokio::sync::Notify>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.notify.notify_one();
    }
}

/// The engine: wires registry, hooks, reporters and workers together.
pub struct EventDrivenTestRunner {
    registry: SuiteRegistry,
    hooks: HookManager,
    bus: EventBus,
    reporters: Vec<Box<dyn Reporter>>,
    config: RunnerConfig,
    cancel_notify: Arc<tokio::sync::Notify>,
}

impl EventDrivenTestRunner {
    pub fn new(registry: SuiteRegistry, config: RunnerConfig) -> Self {
        Self {
            registry,
            hooks: HookManager::new(),
            bus: EventBus::new(),
            reporters: Vec::new(),
            config,
            cancel_notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Handle for cancelling the run programmatically; `run` consumes the
    /// runner, so grab this first.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            notify: self.cancel_notify.clone(),
        }
    }

    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    /// Let a test server register its hooks
    pub fn install_server(&mut self, server: &dyn TestServer) -> Result<()> {
        tracing::debug!("installing test server '{}'", server.name());
        server.install(&mut self.hooks)
    }

    pub fn hooks_mut(&mut self) -> &mut HookManager {
        &mut self.hooks
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Execute the full run to completion.
    pub async fn run(self) -> Result<RunReport> {
        let Self {
            registry,
            hooks,
            mut bus,
            mut reporters,
            config,
            cancel_notify,
        } = self;

        let mut state = RunnerState::NotStarted;
        let mut session = RunSession::new();

        transition(&mut state, RunnerState::Discovering);
        let units = registry.discover(config.pattern.as_deref())?;
        session.totals.total = units.len();

        let run_start = Event::new(
            names::TEST_RUN_START,
            session.run_id.clone(),
            object(json!({"run_id": session.run_id, "total": units.len()})),
        );
        deliver(&mut bus, &mut reporters, &run_start);

        if units.is_empty() {
            transition(&mut state, RunnerState::Finalizing);
            session.ended_at = Some(Utc::now());
            let report = RunReport {
                session,
                interrupted: false,
            };
            emit_run_end(&mut bus, &mut reporters, &report);
            transition(&mut state, RunnerState::Done);
            return Ok(report);
        }

        let mut tracked: HashMap<CorrelationId, UnitTrack> = units
            .iter()
            .map(|u| {
                (
                    u.correlation_id.clone(),
                    UnitTrack {
                        path: u.path(),
                        started: false,
                        terminal: None,
                    },
                )
            })
            .collect();

        transition(&mut state, RunnerState::Dispatching);
        let cancel = Arc::new(AtomicBool::new(false));
        let partitions = worker::partition(units, config.worker_count());
        let workers = worker::spawn_workers(
            partitions,
            Arc::new(registry),
            Arc::new(hooks),
            cancel.clone(),
            config.buffer_output,
        );

        let (streams, joins): (Vec<_>, Vec<_>) =
            workers.into_iter().map(|w| (w.stream, w.join)).unzip();
        let mut merged = select_all(streams);

        transition(&mut state, RunnerState::Draining);
        let mut interrupted = false;
        let mut grace_deadline: Option<tokio::time::Instant> = None;
        let mut drain_timed_out = false;
        let mut interrupt = pin!(tokio::signal::ctrl_c());

        loop {
            tokio::select! {
                frame = merged.next() => {
                    match frame {
                        Some(frame) => absorb_frame(
                            &frame,
                            &mut bus,
                            &mut reporters,
                            &mut tracked,
                            &mut session.totals,
                            &config,
                            &cancel,
                        ),
                        None => break,
                    }
                }
                _ = &mut interrupt, if config.catch_interrupt && !interrupted => {
                    tracing::info!("interrupt received, cancelling run");
                    interrupted = true;
                    cancel.store(true, Ordering::SeqCst);
                    grace_deadline =
                        Some(tokio::time::Instant::now() + config.grace_period);
                    let event = Event::new(
                        names::TEST_RUN_INTERRUPTED,
                        session.run_id.clone(),
                        object(json!({"run_id": session.run_id, "reason": "interrupt"})),
                    );
                    deliver(&mut bus, &mut reporters, &event);
                }
                _ = cancel_notify.notified(), if !interrupted => {
                    tracing::info!("cancellation requested, cancelling run");
                    interrupted = true;
                    cancel.store(true, Ordering::SeqCst);
                    grace_deadline =
                        Some(tokio::time::Instant::now() + config.grace_period);
                    let event = Event::new(
                        names::TEST_RUN_INTERRUPTED,
                        session.run_id.clone(),
                        object(json!({"run_id": session.run_id, "reason": "cancelled"})),
                    );
                    deliver(&mut bus, &mut reporters, &event);
                }
                _ = tokio::time::sleep_until(
                    grace_deadline.unwrap_or_else(far_future)
                ), if grace_deadline.is_some() => {
                    tracing::warn!("grace period expired with workers still running");
                    drain_timed_out = true;
                    break;
                }
            }
        }

        // Pull whatever is already buffered, even after a timed-out drain
        while let Some(Some(frame)) = merged.next().now_or_never() {
            absorb_frame(
                &frame,
                &mut bus,
                &mut reporters,
                &mut tracked,
                &mut session.totals,
                &config,
                &cancel,
            );
        }

        transition(&mut state, RunnerState::Finalizing);

        // A worker stuck past the grace deadline cannot be joined safely;
        // its units are accounted for by synthesis below.
        if !drain_timed_out {
            for join in joins {
                if let Err(e) = join.await {
                    session.totals.run_errors += 1;
                    let event = Event::new(
                        names::TEST_RUN_ERROR,
                        session.run_id.clone(),
                        object(json!({"error": format!("worker crashed: {e}")})),
                    );
                    deliver(&mut bus, &mut reporters, &event);
                }
            }
        }

        synthesize_orphans(
            &mut bus,
            &mut reporters,
            &mut tracked,
            &mut session.totals,
            cancel.load(Ordering::SeqCst),
        );

        session.ended_at = Some(Utc::now());
        let report = RunReport {
            session,
            interrupted,
        };
        emit_run_end(&mut bus, &mut reporters, &report);
        transition(&mut state, RunnerState::Done);
        Ok(report)
    }
}

fn transition(state: &mut RunnerState, next: RunnerState) {
    tracing::debug!("runner {:?} -> {:?}", state, next);
    *state = next;
}

fn far_future() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(86_400)
}

/// Re-publish one wire frame: decode, re-stamp, account, deliver.
fn absorb_frame(
    frame: &str,
    bus: &mut EventBus,
    reporters: &mut [Box<dyn Reporter>],
    tracked: &mut HashMap<CorrelationId, UnitTrack>,
    totals: &mut RunTotals,
    config: &RunnerConfig,
    cancel: &AtomicBool,
) {
    let event = match WireEvent::decode(frame) {
        Ok(wire) => wire.into_event(),
        Err(e) => {
            tracing::error!("dropping undecodable event frame: {}", e);
            totals.run_errors += 1;
            return;
        }
    };

    if event.name == names::TEST_START
        && let Some(track) = tracked.get_mut(&event.correlation_id)
    {
        track.started = true;
    }

    let terminal = match event.name.as_str() {
        names::TEST_SUCCESS => Some(TestStatus::Passed),
        names::TEST_FAILURE => Some(TestStatus::Failed),
        names::TEST_ERROR => Some(TestStatus::Errored),
        names::TEST_SKIP => Some(TestStatus::Skipped),
        // A per-unit pipeline error carries the unit's payload
        names::TEST_RUN_ERROR => {
            totals.run_errors += 1;
            event.get_str("test_name").map(|_| TestStatus::Errored)
        }
        _ => None,
    };

    if let Some(status) = terminal {
        if let Some(track) = tracked.get_mut(&event.correlation_id) {
            // First terminal wins; a duplicate would be a shim bug
            if track.terminal.is_none() {
                track.terminal = Some(status);
                totals.absorb(status);

                let aborts = matches!(status, TestStatus::Failed | TestStatus::Errored);
                if aborts && config.fail_fast && !cancel.load(Ordering::SeqCst) {
                    tracing::info!("fail-fast: cancelling after '{}'", track.path);
                    cancel.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    deliver(bus, reporters, &event);
}

/// Publish to bus subscribers, then to each reporter in registration order.
/// A panicking reporter is isolated and logged; delivery continues.
fn deliver(bus: &mut EventBus, reporters: &mut [Box<dyn Reporter>], event: &Event) {
    bus.publish(event);
    for reporter in reporters.iter_mut() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| reporter.dispatch(event))) {
            tracing::error!(
                "reporter '{}' panicked on '{}': {}",
                reporter.name(),
                event.name,
                crate::hooks::panic_message(panic)
            );
        }
    }
}

/// Give every unit that never reached a terminal event a synthetic one, so
/// consumers can rely on exactly one terminal per unit.
fn synthesize_orphans(
    bus: &mut EventBus,
    reporters: &mut [Box<dyn Reporter>],
    tracked: &mut HashMap<CorrelationId, UnitTrack>,
    totals: &mut RunTotals,
    cancelled: bool,
) {
    for (cid, track) in tracked.iter_mut() {
        if track.terminal.is_some() {
            continue;
        }

        // Synthetic terminals get the same bracket real ones have: a unit
        // that never reported a test_start gets one before its terminal.
        if !track.started {
            track.started = true;
            deliver(
                bus,
                reporters,
                &Event::new(
                    names::TEST_START,
                    cid.clone(),
                    object(json!({"test_name": track.path})),
                ),
            );
        }

        let (status, event) = if cancelled {
            (
                TestStatus::Skipped,
                Event::new(
                    names::TEST_SKIP,
                    cid.clone(),
                    object(json!({"test_name": track.path, "reason": CANCELLED_REASON})),
                ),
            )
        } else {
            totals.run_errors += 1;
            (
                TestStatus::Errored,
                Event::new(
                    names::TEST_RUN_ERROR,
                    cid.clone(),
                    object(json!({
                        "test_name": track.path,
                        "error": "worker exited before finishing test",
                    })),
                ),
            )
        };

        track.terminal = Some(status);
        totals.absorb(status);
        deliver(bus, reporters, &event);
        deliver(
            bus,
            reporters,
            &Event::new(
                names::TEST_END,
                cid.clone(),
                object(json!({"test_name": track.path})),
            ),
        );
    }
}

fn emit_run_end(bus: &mut EventBus, reporters: &mut [Box<dyn Reporter>], report: &RunReport) {
    let totals = &report.session.totals;
    let event = Event::new(
        names::TEST_RUN_END,
        report.session.run_id.clone(),
        object(json!({
            "run_id": report.session.run_id,
            "total": totals.total,
            "passed": totals.passed,
            "failed": totals.failed,
            "errored": totals.errored,
            "skipped": totals.skipped,
            "run_errors": totals.run_errors,
            "interrupted": report.interrupted,
            "duration_ms": report.session.duration_ms(),
        })),
    );
    deliver(bus, reporters, &event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::TestCase;
    use std::sync::Mutex;

    #[derive(Default)]
    struct PlainCase;
    impl TestCase for PlainCase {}

    /// Records dispatched event names into shared storage
    struct Tap {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Reporter for Tap {
        fn name(&self) -> &str {
            "tap"
        }

        fn dispatch(&mut self, event: &Event) {
            self.seen.lock().unwrap().push(event.name.clone());
        }
    }

    fn config() -> RunnerConfig {
        RunnerConfig {
            workers: Some(2),
            catch_interrupt: false,
            ..RunnerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_empty_run_brackets_and_succeeds() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut runner = EventDrivenTestRunner::new(SuiteRegistry::new(), config());
        runner.add_reporter(Box::new(Tap { seen: seen.clone() }));

        let report = runner.run().await.unwrap();
        assert!(report.success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.session.totals.total, 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["test_run_start", "test_run_end"]
        );
    }

    #[tokio::test]
    async fn test_mixed_outcomes_are_totalled() {
        let mut registry = SuiteRegistry::new();
        registry
            .module("sample")
            .case("SampleCase", PlainCase::default)
            .test("test_pass", |_c: &mut PlainCase, _cx| Ok(()))
            .test("test_fail", |_c: &mut PlainCase, _cx| {
                Err(crate::case::CaseFailure::assertion("nope"))
            })
            .test("test_skip", |_c: &mut PlainCase, _cx| {
                Err(crate::case::CaseFailure::skip("later"))
            });

        let runner = EventDrivenTestRunner::new(registry, config());
        let report = runner.run().await.unwrap();

        let totals = report.session.totals;
        assert_eq!(totals.total, 3);
        assert_eq!(totals.passed, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.skipped, 1);
        assert_eq!(totals.errored, 0);
        assert_eq!(report.exit_code(), 1);
        assert!(report.session.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_import_hook_failure_is_a_run_error() {
        let mut registry = SuiteRegistry::new();
        registry
            .module("present")
            .case("Case", PlainCase::default)
            .test("test_ok", |_c: &mut PlainCase, _cx| Ok(()));
        let mut runner = EventDrivenTestRunner::new(registry, config());
        runner.hooks_mut().register(
            crate::hooks::HookStage::BeforeImport,
            "refuse",
            |_| {
                Err(crate::hooks::HookError::Failed {
                    stage: "before_import",
                    hook: "refuse".into(),
                    message: "not today".into(),
                })
            },
        );

        let report = runner.run().await.unwrap();
        let totals = report.session.totals;
        assert_eq!(totals.errored, 1);
        assert_eq!(totals.run_errors, 1);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_exit_codes() {
        let mut report = RunReport {
            session: RunSession::new(),
            interrupted: false,
        };
        assert_eq!(report.exit_code(), 0);

        report.session.totals.failed = 1;
        assert_eq!(report.exit_code(), 1);

        report.interrupted = true;
        assert_eq!(report.exit_code(), 130);
    }

    #[test]
    fn test_synthetic_terminals_get_a_full_bracket() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let mut reporters: Vec<Box<dyn Reporter>> = vec![Box::new(Tap { seen: seen.clone() })];
        let mut totals = RunTotals::default();
        let mut tracked = HashMap::new();
        tracked.insert(
            CorrelationId::mint(),
            UnitTrack {
                path: "m.Case.test_gone".into(),
                started: false,
                terminal: None,
            },
        );

        synthesize_orphans(&mut bus, &mut reporters, &mut tracked, &mut totals, true);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["test_start", "test_skip", "test_end"]
        );
        assert_eq!(totals.skipped, 1);
    }

    #[test]
    fn test_synthetic_terminal_keeps_an_observed_start() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let mut reporters: Vec<Box<dyn Reporter>> = vec![Box::new(Tap { seen: seen.clone() })];
        let mut totals = RunTotals::default();
        let mut tracked = HashMap::new();
        tracked.insert(
            CorrelationId::mint(),
            UnitTrack {
                path: "m.Case.test_half_done".into(),
                started: true,
                terminal: None,
            },
        );

        synthesize_orphans(&mut bus, &mut reporters, &mut tracked, &mut totals, false);

        assert_eq!(*seen.lock().unwrap(), vec!["test_run_error", "test_end"]);
        assert_eq!(totals.errored, 1);
        assert_eq!(totals.run_errors, 1);
    }

    #[test]
    fn test_totals_absorb_ignores_non_terminal() {
        let mut totals = RunTotals::default();
        totals.absorb(TestStatus::Running);
        totals.absorb(TestStatus::Passed);
        assert_eq!(totals.passed, 1);
        assert!(totals.is_clean());
    }
}
