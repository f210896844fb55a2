// Worker pool - parallel execution across dedicated OS threads.
// Each worker owns a disjoint partition of discovered units, runs them
// sequentially under the active hook chain, and relays every event through
// its own typed channel back to the runner's drain loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::case::{TestContext, shim};
use crate::event::{EventPublisher, event_channel, names};
use crate::hooks::{ClassDescriptor, HookContext, HookManager, HookStage, ModuleDescriptor, panic_message};
use crate::suite::{SuiteRegistry, TestStatus, TestUnit};

/// Reason a unit was cancelled before it started
pub const CANCELLED_REASON: &str = "run cancelled";

/// A spawned worker: its id, the stream of event frames it produces, and the
/// join handle of its blocking task.
pub struct WorkerHandle {
    pub id: usize,
    pub stream: UnboundedReceiverStream<String>,
    pub join: JoinHandle<()>,
}

/// Split units into at most `workers` contiguous chunks.
///
/// Static partitioning keeps ownership disjoint: no two workers ever touch
/// the same unit, so no cross-worker state is shared.
pub fn partition(units: Vec<TestUnit>, workers: usize) -> Vec<Vec<TestUnit>> {
    if units.is_empty() {
        return Vec::new();
    }
    let workers = workers.max(1).min(units.len());
    let chunk = units.len().div_ceil(workers);

    let mut parts: Vec<Vec<TestUnit>> = Vec::with_capacity(workers);
    let mut rest = units;
    while !rest.is_empty() {
        let tail = rest.split_off(chunk.min(rest.len()));
        parts.push(rest);
        rest = tail;
    }
    parts
}

/// Spawn one worker per partition. Workers run on the blocking thread pool
/// so test code gets true OS-level parallelism.
pub fn spawn_workers(
    partitions: Vec<Vec<TestUnit>>,
    registry: Arc<SuiteRegistry>,
    hooks: Arc<HookManager>,
    cancel: Arc<AtomicBool>,
    buffer_output: bool,
) -> Vec<WorkerHandle> {
    partitions
        .into_iter()
        .enumerate()
        .map(|(id, units)| {
            let (sender, stream) = event_channel();
            let registry = registry.clone();
            let hooks = hooks.clone();
            let cancel = cancel.clone();
            let join = tokio::task::spawn_blocking(move || {
                let publisher = EventPublisher::new(sender);
                run_partition(id, &registry, &hooks, units, &publisher, &cancel, buffer_output);
            });
            WorkerHandle { id, stream, join }
        })
        .collect()
}

fn run_partition(
    worker_id: usize,
    registry: &SuiteRegistry,
    hooks: &HookManager,
    units: Vec<TestUnit>,
    publisher: &EventPublisher,
    cancel: &AtomicBool,
    buffer_output: bool,
) {
    tracing::debug!("worker {} starting with {} unit(s)", worker_id, units.len());

    for mut unit in units {
        if cancel.load(Ordering::SeqCst) {
            shim::skip_unit(&mut unit, publisher, CANCELLED_REASON);
            continue;
        }
        execute_unit(registry, hooks, &mut unit, publisher, buffer_output);
    }

    tracing::debug!("worker {} finished", worker_id);
}

/// Drive one unit through the full pipeline:
/// import -> get class -> create instance -> run, with the corresponding
/// hook stages wrapped around each step.
fn execute_unit(
    registry: &SuiteRegistry,
    hooks: &HookManager,
    unit: &mut TestUnit,
    publisher: &EventPublisher,
    buffer_output: bool,
) {
    let mut cx = HookContext::new(unit.correlation_id.clone(), publisher.clone());

    // Import stage: resolve the module in the registry
    if let Err(e) = hooks.run(HookStage::BeforeImport, &mut cx) {
        return run_error(unit, publisher, &e.to_string());
    }
    let Some(module) = registry.resolve_module(&unit.module_name) else {
        return run_error(
            unit,
            publisher,
            &format!("module '{}' is not registered", unit.module_name),
        );
    };
    cx.module = Some(ModuleDescriptor {
        name: module.name.clone(),
        case_count: module.case_count(),
    });
    if let Err(e) = hooks.run(HookStage::AfterImport, &mut cx) {
        return run_error(unit, publisher, &e.to_string());
    }

    // Class stage: resolve the case entry
    if let Err(e) = hooks.run(HookStage::BeforeGetTestClass, &mut cx) {
        return run_error(unit, publisher, &e.to_string());
    }
    let Some(case_entry) = module.case_entry(&unit.class_name) else {
        return run_error(
            unit,
            publisher,
            &format!(
                "class '{}' is not registered in module '{}'",
                unit.class_name, unit.module_name
            ),
        );
    };
    cx.class = Some(ClassDescriptor::new(
        unit.module_name.clone(),
        unit.class_name.clone(),
    ));
    if let Err(e) = hooks.run(HookStage::AfterGetTestClass, &mut cx) {
        return run_error(unit, publisher, &e.to_string());
    }

    // Instance stage: build the case through the registered factory
    if let Err(e) = hooks.run(HookStage::BeforeCreateTest, &mut cx) {
        return run_error(unit, publisher, &e.to_string());
    }
    // The factory is user test code; a panicking constructor must stay
    // scoped to this unit, not take down the worker's whole partition
    match catch_unwind(AssertUnwindSafe(|| (case_entry.factory)())) {
        Ok(instance) => cx.instance = Some(instance),
        Err(panic) => {
            let message = format!("test constructor panicked: {}", panic_message(panic));
            shim::error_unit(unit, publisher, &message);
            return;
        }
    }
    if let Err(e) = hooks.run(HookStage::AfterCreateTest, &mut cx) {
        return run_error(unit, publisher, &e.to_string());
    }

    let Some(test) = case_entry.test_fn(&unit.test_name) else {
        return run_error(
            unit,
            publisher,
            &format!("test '{}' is not registered on '{}'", unit.test_name, unit.class_name),
        );
    };

    // Run stage: hook failures here count against the test, not the run
    if let Err(e) = hooks.run(HookStage::BeforeRunTest, &mut cx) {
        shim::error_unit(unit, publisher, &e.to_string());
        return;
    }

    let class_fields = cx
        .class
        .as_ref()
        .map(|c| c.fields.clone())
        .unwrap_or_default();
    let mut test_cx = TestContext::new(
        unit.correlation_id.clone(),
        publisher.clone(),
        cx.extensions.clone(),
        class_fields,
        buffer_output,
    );

    let Some(mut case) = cx.instance.take() else {
        // A hook removed the instance without replacing it
        shim::error_unit(unit, publisher, "test instance missing after create stage");
        return;
    };
    let status = shim::run_unit(unit, case.as_mut(), test, &mut test_cx, publisher);
    cx.instance = Some(case);

    // The unit already has a terminal status; a failure here is framework
    // level and is reported without touching the unit's outcome.
    if let Err(e) = hooks.run(HookStage::AfterRunTest, &mut cx) {
        publisher.publish(
            names::TEST_RUN_ERROR,
            &unit.correlation_id,
            crate::event::object(json!({"error": e.to_string(), "test_name": unit.test_name})),
        );
    }

    tracing::trace!("unit '{}' finished as {:?}", unit.path(), status);
}

/// Framework-level failure before the unit's run stage: the unit never
/// starts; it is surfaced as test_run_error and counted as errored.
fn run_error(unit: &mut TestUnit, publisher: &EventPublisher, message: &str) {
    let mut payload = shim::unit_payload(unit);
    payload.insert("error".into(), json!(message));
    publisher.publish(names::TEST_RUN_ERROR, &unit.correlation_id, payload);
    let _ = unit.finish(TestStatus::Errored, Some(message.to_string()));
}
