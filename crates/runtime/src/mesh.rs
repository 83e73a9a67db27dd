//! Mesh: cooperative multiplexing of wires on one thread
//!
//! A mesh owns a set of running flows (one root wire each), the shared
//! variable table, injected refs, and the instance types visible to every
//! hosted wire. `tick` resumes each due wire once, in scheduling order;
//! within a tick no two shard activations overlap, so shared variables need
//! no locking discipline beyond the cells themselves.
//!
//! Failures never throw out of `tick`: failed wires are collected with their
//! last error and exposed through `failed_wires`/`errors`, and the tick
//! returns false so a host driver can decide to restart or terminate.
//!
//! Observer callbacks run on the mesh's thread, in registration order, and
//! must not themselves schedule work.

use crate::compose::{ComposeCallback, compose_wire};
use crate::error::{ComposeError, WireError};
use crate::shard::InstanceData;
use crate::types::{ExposedInfo, derive_type_info};
use crate::value::Value;
use crate::variables::{VarCell, new_cell};
use crate::wire::{self, WireCoroutine, WireRef, WireState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

/// Scheduling unit: a root wire plus its live coroutine.
struct Flow {
    wire: WireRef,
    coro: WireCoroutine,
}

/// Hooks around the wire lifecycle. Every method has an empty default, so an
/// observer implements only what it watches.
pub trait MeshObserver: Send {
    fn before_compose(&self, _wire: &WireRef) {}
    fn before_prepare(&self, _wire: &WireRef) {}
    fn before_start(&self, _wire: &WireRef) {}
    fn before_tick(&self, _wire: &WireRef) {}
    fn before_stop(&self, _wire: &WireRef) {}
}

#[derive(Default)]
pub(crate) struct MeshInner {
    flows: Mutex<Vec<Flow>>,
    shared: Mutex<HashMap<String, VarCell>>,
    refs: Mutex<HashMap<String, VarCell>>,
    instance_types: Mutex<Vec<ExposedInfo>>,
    failed: Mutex<Vec<(WireRef, String)>>,
    observers: Mutex<Vec<Box<dyn MeshObserver>>>,
    /// Embedder-injected namespace; lookup tries `prefix/name` before `name`
    prefix: Mutex<Option<String>>,
}

impl Drop for MeshInner {
    fn drop(&mut self) {
        // Let every parked coroutine run its cleanup instead of unwinding it
        if let Ok(flows) = self.flows.get_mut() {
            for mut flow in std::mem::take(flows) {
                wire::stop_wire(&flow.wire, Some(&mut flow.coro));
            }
        }
    }
}

/// Shared handle to a mesh. Wires hold it weakly.
#[derive(Clone, Default)]
pub struct Mesh(Arc<MeshInner>);

/// Weak mesh handle stored on wires, breaking the wire -> mesh cycle.
#[derive(Clone, Default)]
pub struct WeakMesh(Weak<MeshInner>);

impl WeakMesh {
    pub fn new() -> WeakMesh {
        WeakMesh(Weak::new())
    }

    pub fn upgrade(&self) -> Option<Mesh> {
        self.0.upgrade().map(Mesh)
    }
}

impl Mesh {
    pub fn new() -> Mesh {
        Mesh::default()
    }

    pub(crate) fn downgrade(&self) -> WeakMesh {
        WeakMesh(Arc::downgrade(&self.0))
    }

    // -- observers ----------------------------------------------------------

    pub fn add_observer(&self, observer: Box<dyn MeshObserver>) {
        self.0
            .observers
            .lock()
            .expect("mesh observers poisoned")
            .push(observer);
    }

    fn notify(&self, f: impl Fn(&dyn MeshObserver)) {
        for obs in self.0.observers.lock().expect("mesh observers poisoned").iter() {
            f(obs.as_ref());
        }
    }

    // -- scheduling ---------------------------------------------------------

    /// Compose (optionally), prepare, start and enlist a wire. The wire's
    /// coroutine is live after this; the first `tick` runs its first
    /// iteration.
    pub fn schedule(
        &self,
        wire: WireRef,
        input: Value,
        do_compose: bool,
    ) -> Result<(), WireError> {
        self.schedule_with_callback(wire, input, do_compose, None)
    }

    /// `schedule`, with compose diagnostics routed through `callback`.
    pub fn schedule_with_callback(
        &self,
        wire: WireRef,
        input: Value,
        do_compose: bool,
        callback: Option<ComposeCallback<'_>>,
    ) -> Result<(), WireError> {
        if wire.is_running() || wire.state() == WireState::Prepared {
            return Err(WireError::new(wire.name(), "already scheduled"));
        }
        if do_compose {
            self.notify(|o| o.before_compose(&wire));
            let mut data = self.compose_data();
            data.input_type = derive_type_info(&input, &InstanceData::default(), None);
            compose_wire(&wire, &data, callback)
                .map_err(|e: ComposeError| WireError::new(wire.name(), e.to_string()))?;
        }

        self.notify(|o| o.before_prepare(&wire));
        let mut coro = wire::prepare(&wire, self);
        if wire.state() == WireState::Failed {
            let msg = wire
                .finished_error()
                .unwrap_or_else(|| "warmup failed".to_string());
            self.0
                .failed
                .lock()
                .expect("mesh failed list poisoned")
                .push((wire.clone(), msg.clone()));
            wire::stop_wire(&wire, Some(&mut coro));
            return Err(WireError::new(wire.name(), msg));
        }

        self.notify(|o| o.before_start(&wire));
        wire::start(&wire, input);

        self.0
            .flows
            .lock()
            .expect("mesh flows poisoned")
            .push(Flow { wire, coro });
        Ok(())
    }

    /// Remove a wire from the active set, stopping it gracefully.
    pub fn unschedule(&self, wire: &WireRef) {
        let flow = {
            let mut flows = self.0.flows.lock().expect("mesh flows poisoned");
            flows
                .iter()
                .position(|f| &f.wire == wire)
                .map(|i| flows.remove(i))
        };
        if let Some(mut flow) = flow {
            self.notify(|o| o.before_stop(&flow.wire));
            wire::stop_wire(&flow.wire, Some(&mut flow.coro));
        }
    }

    /// Resume every due wire once, in scheduling order. Finished wires are
    /// stopped and unlinked. Returns true iff no wire failed during this
    /// tick.
    pub fn tick(&self) -> bool {
        // Take the flow list so wires scheduling new wires mid-tick (Detach)
        // never deadlock on the mesh
        let flows: Vec<Flow> = {
            let mut guard = self.0.flows.lock().expect("mesh flows poisoned");
            std::mem::take(&mut *guard)
        };
        let now = Instant::now();
        let mut no_errors = true;
        let mut keep: Vec<Flow> = Vec::with_capacity(flows.len());

        for mut flow in flows {
            self.notify(|o| o.before_tick(&flow.wire));
            wire::tick_wire(&flow.wire, &mut flow.coro, now);

            if flow.wire.is_running() {
                keep.push(flow);
                continue;
            }

            // The wire finished inside this tick
            let state = flow.wire.state();
            if state == WireState::Failed {
                let msg = flow
                    .wire
                    .finished_error()
                    .unwrap_or_else(|| "unknown failure".to_string());
                tracing::error!(wire = %flow.wire.name(), error = %msg, "wire failed");
                self.0
                    .failed
                    .lock()
                    .expect("mesh failed list poisoned")
                    .push((flow.wire.clone(), msg));
                no_errors = false;
            }
            self.notify(|o| o.before_stop(&flow.wire));
            wire::stop_wire(&flow.wire, Some(&mut flow.coro));
        }

        // Survivors first, then anything scheduled while we ran
        let mut guard = self.0.flows.lock().expect("mesh flows poisoned");
        let scheduled_during_tick = std::mem::take(&mut *guard);
        keep.extend(scheduled_during_tick);
        *guard = keep;
        no_errors
    }

    /// No wires left to run.
    pub fn is_empty(&self) -> bool {
        self.0.flows.lock().expect("mesh flows poisoned").is_empty()
    }

    /// Wires currently enlisted, in scheduling order.
    pub fn wires(&self) -> Vec<WireRef> {
        self.0
            .flows
            .lock()
            .expect("mesh flows poisoned")
            .iter()
            .map(|f| f.wire.clone())
            .collect()
    }

    /// Stop every wire, clear variables and refs. Dangling shared variables
    /// are logged, never destroyed.
    pub fn terminate(&self) {
        let flows: Vec<Flow> = {
            let mut guard = self.0.flows.lock().expect("mesh flows poisoned");
            std::mem::take(&mut *guard)
        };
        for mut flow in flows {
            self.notify(|o| o.before_stop(&flow.wire));
            wire::stop_wire(&flow.wire, Some(&mut flow.coro));
        }

        {
            let shared = self.0.shared.lock().expect("mesh shared vars poisoned");
            for (name, cell) in shared.iter() {
                if !cell.is_external() && Arc::strong_count(cell) > 1 {
                    tracing::warn!(
                        variable = %name,
                        references = Arc::strong_count(cell) - 1,
                        "global variable still referenced at mesh termination"
                    );
                }
            }
        }
        self.0
            .shared
            .lock()
            .expect("mesh shared vars poisoned")
            .clear();
        self.0.refs.lock().expect("mesh refs poisoned").clear();
    }

    // -- failures -----------------------------------------------------------

    pub fn failed_wires(&self) -> Vec<WireRef> {
        self.0
            .failed
            .lock()
            .expect("mesh failed list poisoned")
            .iter()
            .map(|(w, _)| w.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.0
            .failed
            .lock()
            .expect("mesh failed list poisoned")
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn clear_errors(&self) {
        self.0
            .failed
            .lock()
            .expect("mesh failed list poisoned")
            .clear();
    }

    // -- shared variables ---------------------------------------------------

    /// Lookup in the shared table; the namespace prefix is tried first.
    pub fn find_shared(&self, name: &str) -> Option<VarCell> {
        let shared = self.0.shared.lock().expect("mesh shared vars poisoned");
        if let Some(prefix) = self.0.prefix.lock().expect("mesh prefix poisoned").as_ref() {
            let prefixed = format!("{}/{}", prefix, name);
            if let Some(cell) = shared.get(&prefixed) {
                return Some(cell.clone());
            }
        }
        shared.get(name).cloned()
    }

    /// Create-on-read lookup, the `referenceGlobalVariable` semantic.
    pub fn get_or_create_shared(&self, name: &str) -> VarCell {
        self.0
            .shared
            .lock()
            .expect("mesh shared vars poisoned")
            .entry(name.to_string())
            .or_insert_with(|| new_cell(Value::None))
            .clone()
    }

    /// Injected reference lookup (embedder-owned cells).
    pub fn find_ref(&self, name: &str) -> Option<VarCell> {
        let refs = self.0.refs.lock().expect("mesh refs poisoned");
        if let Some(prefix) = self.0.prefix.lock().expect("mesh prefix poisoned").as_ref() {
            let prefixed = format!("{}/{}", prefix, name);
            if let Some(cell) = refs.get(&prefixed) {
                return Some(cell.clone());
            }
        }
        refs.get(name).cloned()
    }

    pub fn set_ref(&self, name: &str, cell: VarCell) {
        self.0
            .refs
            .lock()
            .expect("mesh refs poisoned")
            .insert(name.to_string(), cell);
    }

    pub fn set_namespace_prefix(&self, prefix: Option<String>) {
        *self.0.prefix.lock().expect("mesh prefix poisoned") = prefix;
    }

    // -- instance data ------------------------------------------------------

    /// Types every hosted wire sees at compose time.
    pub fn set_instance_types(&self, types: Vec<ExposedInfo>) {
        *self
            .0
            .instance_types
            .lock()
            .expect("mesh instance types poisoned") = types;
    }

    pub fn compose_data(&self) -> InstanceData {
        InstanceData {
            input_type: Default::default(),
            shared: self
                .0
                .instance_types
                .lock()
                .expect("mesh instance types poisoned")
                .clone(),
            wire: None,
            on_worker_thread: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Run-loop / exit callbacks and the sleep driver helper
// ---------------------------------------------------------------------------

type HookFn = Box<dyn Fn() + Send + Sync>;

static RUN_LOOP_HOOKS: OnceLock<Mutex<Vec<(String, HookFn)>>> = OnceLock::new();
static EXIT_HOOKS: OnceLock<Mutex<Vec<(String, HookFn)>>> = OnceLock::new();

fn run_loop_hooks() -> &'static Mutex<Vec<(String, HookFn)>> {
    RUN_LOOP_HOOKS.get_or_init(|| Mutex::new(Vec::new()))
}

fn exit_hooks() -> &'static Mutex<Vec<(String, HookFn)>> {
    EXIT_HOOKS.get_or_init(|| Mutex::new(Vec::new()))
}

pub fn register_run_loop_callback(name: impl Into<String>, f: impl Fn() + Send + Sync + 'static) {
    run_loop_hooks()
        .lock()
        .expect("run loop hooks poisoned")
        .push((name.into(), Box::new(f)));
}

pub fn unregister_run_loop_callback(name: &str) {
    run_loop_hooks()
        .lock()
        .expect("run loop hooks poisoned")
        .retain(|(n, _)| n != name);
}

pub fn register_exit_callback(name: impl Into<String>, f: impl Fn() + Send + Sync + 'static) {
    exit_hooks()
        .lock()
        .expect("exit hooks poisoned")
        .push((name.into(), Box::new(f)));
}

pub fn unregister_exit_callback(name: &str) {
    exit_hooks()
        .lock()
        .expect("exit hooks poisoned")
        .retain(|(n, _)| n != name);
}

pub fn run_exit_callbacks() {
    for (_, f) in exit_hooks().lock().expect("exit hooks poisoned").iter() {
        f();
    }
}

/// Driver-side sleep between ticks: run the run-loop callbacks, then sleep
/// whatever remains of `seconds` (negative means "callbacks only").
pub fn sleep(seconds: f64, run_callbacks: bool) {
    let start = Instant::now();
    if run_callbacks {
        for (_, f) in run_loop_hooks()
            .lock()
            .expect("run loop hooks poisoned")
            .iter()
        {
            f();
        }
    }
    if seconds >= 0.0 {
        let budget = Duration::from_secs_f64(seconds);
        let spent = start.elapsed();
        if budget > spent {
            std::thread::sleep(budget - spent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::create_shard;

    fn simple_wire(name: &str, shards: &[(&str, &[Value])]) -> WireRef {
        let wire = WireRef::new(name);
        for (shard_name, params) in shards {
            let s = create_shard(shard_name).expect("core shard");
            for (i, p) in params.iter().enumerate() {
                s.set_param(i, p).expect("param accepted");
            }
            wire.add_shard(s).expect("added");
        }
        wire
    }

    #[test]
    fn test_schedule_and_run_to_completion() {
        let mesh = Mesh::new();
        let wire = simple_wire("s1", &[("Const", &[Value::Int(42)]), ("Pass", &[])]);
        mesh.schedule(wire.clone(), Value::None, true).expect("schedules");
        assert!(!mesh.is_empty());

        while !mesh.is_empty() {
            assert!(mesh.tick(), "no failures expected");
        }
        assert_eq!(wire.finished_output(), Value::Int(42));
        assert_eq!(wire.state(), WireState::Stopped);
        assert!(mesh.failed_wires().is_empty());
    }

    #[test]
    fn test_schedule_twice_is_refused() {
        let mesh = Mesh::new();
        let wire = simple_wire("twice", &[("Const", &[Value::Int(1)])]);
        mesh.schedule(wire.clone(), Value::None, true).expect("first");
        let err = mesh.schedule(wire, Value::None, true).unwrap_err();
        assert!(err.msg.contains("already scheduled"));
    }

    #[test]
    fn test_failed_wire_is_collected() {
        let mesh = Mesh::new();
        let wire = simple_wire(
            "failing",
            &[("Fail", &[Value::String("boom".into())])],
        );
        mesh.schedule(wire.clone(), Value::None, true).expect("schedules");
        let ok = mesh.tick();
        assert!(!ok, "tick reports the failure");
        assert_eq!(mesh.failed_wires().len(), 1);
        assert!(mesh.errors()[0].contains("boom"));
        assert_eq!(wire.state(), WireState::Stopped);
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_tick_order_is_scheduling_order() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static SEEN: Mutex<Vec<String>> = Mutex::new(Vec::new());
        static TICKS: AtomicUsize = AtomicUsize::new(0);

        struct OrderObserver;
        impl MeshObserver for OrderObserver {
            fn before_tick(&self, wire: &WireRef) {
                if TICKS.load(Ordering::SeqCst) == 0 {
                    SEEN.lock().unwrap().push(wire.name().to_string());
                }
            }
        }

        let mesh = Mesh::new();
        mesh.add_observer(Box::new(OrderObserver));
        for name in ["first", "second", "third"] {
            let wire = simple_wire(name, &[("Const", &[Value::Int(1)])]);
            mesh.schedule(wire, Value::None, true).expect("schedules");
        }
        mesh.tick();
        TICKS.fetch_add(1, Ordering::SeqCst);
        assert_eq!(
            SEEN.lock().unwrap().clone(),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn test_terminate_clears_everything() {
        let mesh = Mesh::new();
        let wire = simple_wire("looper", &[("Const", &[Value::Int(1)])]);
        wire.set_looped(true);
        mesh.schedule(wire.clone(), Value::None, true).expect("schedules");
        mesh.tick();
        assert!(!mesh.is_empty(), "looped wire keeps running");

        mesh.get_or_create_shared("g").set(Value::Int(1));
        mesh.terminate();
        assert!(mesh.is_empty());
        assert!(mesh.find_shared("g").is_none());
        assert_eq!(wire.state(), WireState::Stopped);
    }

    #[test]
    fn test_namespace_prefix_lookup() {
        let mesh = Mesh::new();
        mesh.get_or_create_shared("ns/x").set(Value::Int(7));
        mesh.get_or_create_shared("x").set(Value::Int(1));
        assert_eq!(mesh.find_shared("x").unwrap().get(), Value::Int(1));
        mesh.set_namespace_prefix(Some("ns".to_string()));
        assert_eq!(mesh.find_shared("x").unwrap().get(), Value::Int(7));
    }

    #[test]
    fn test_run_loop_callbacks_fire_on_sleep() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        register_run_loop_callback("test-hook", || {
            CALLS.fetch_add(1, Ordering::SeqCst);
        });
        sleep(0.0, true);
        assert!(CALLS.load(Ordering::SeqCst) >= 1);
        unregister_run_loop_callback("test-hook");
        let before = CALLS.load(Ordering::SeqCst);
        sleep(0.0, true);
        assert_eq!(CALLS.load(Ordering::SeqCst), before);
    }
}
