//! Wires: shard pipelines run as stackful coroutines
//!
//! A wire owns an ordered shard sequence plus configuration and runtime
//! state. While scheduled, the wire's `WireBody` lives *inside* the coroutine
//! (taken out of the handle at prepare, put back at termination); the mesh
//! only ever touches the control block, so no lock is ever held across a
//! yield point.
//!
//! ## State machine
//!
//! ```text
//! Stopped -> Prepared -> Starting -> Iterating -> IterationEnded (loop)
//!                                              \-> Ended  -> Stopped
//!                                              \-> Failed -> Stopped
//! ```
//!
//! The coroutine exists exactly while the state is in Prepared..IterationEnded.
//!
//! ## The runner
//!
//! `run_shard_seq` drives one pass over a shard slice: inline fast path or
//! `activate`, previous output feeding the next input, flow inspection after
//! every shard. Looped wires yield once between iterations (unless flagged
//! unsafe) so no wire can monopolize the scheduler.

use crate::context::{Context, FlowState};
use crate::error::{ActivationError, WireError};
use crate::hash::{Hash128, hash_value};
use crate::mesh::{Mesh, WeakMesh};
use crate::shard::{InlineShard, ShardRef};
use crate::types::{ExposedInfo, TypeInfo};
use crate::value::Value;
use crate::variables::{VarCell, new_cell};
use generator::{Generator, Gn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default coroutine stack: 128 KiB.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Stack for looped wires that ask for headroom (`:LStack`): 1 MiB.
pub const LARGE_STACK_SIZE: usize = 0x100000;

/// Wire runtime state. See the module docs for the transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum WireState {
    #[default]
    Stopped,
    Prepared,
    Starting,
    Iterating,
    IterationEnded,
    Ended,
    Failed,
}

impl WireState {
    /// Started and not yet finished; the tick driver only resumes these.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            WireState::Starting | WireState::Iterating | WireState::IterationEnded
        )
    }

    pub fn has_ended(self) -> bool {
        matches!(self, WireState::Ended | WireState::Failed)
    }
}

/// Mesh-visible control block; always accessible, even mid-run.
#[derive(Default)]
struct WireControl {
    state: WireState,
    /// Next allowed resume; `None` means "as soon as possible"
    next: Option<Instant>,
    should_stop: bool,
    on_last_resume: bool,
    cancel: Option<String>,
    root_input: Value,
    finished_output: Value,
    finished_error: Option<String>,
}

/// The owned half of a wire: shards, configuration, compose results.
pub struct WireBody {
    pub shards: Vec<ShardRef>,
    pub looped: bool,
    /// Skip the mandatory between-iterations yield (trusted hot wires)
    pub unsafe_: bool,
    /// Declared pure; carried and serialized, checked only at compose time
    pub pure: bool,
    pub stack_size: usize,
    pub input_type: TypeInfo,
    pub output_type: TypeInfo,
    pub required: Vec<ExposedInfo>,
    pub composed: bool,
}

impl Default for WireBody {
    fn default() -> WireBody {
        WireBody {
            shards: Vec::new(),
            looped: false,
            unsafe_: false,
            pure: false,
            stack_size: DEFAULT_STACK_SIZE,
            input_type: TypeInfo::any(),
            output_type: TypeInfo::any(),
            required: Vec::new(),
            composed: false,
        }
    }
}

struct WireInner {
    name: Mutex<String>,
    control: Mutex<WireControl>,
    /// Present while the wire is not running; the coroutine takes it
    body: Mutex<Option<WireBody>>,
    variables: Mutex<HashMap<String, VarCell>>,
    externals: Mutex<HashMap<String, VarCell>>,
    mesh: Mutex<WeakMesh>,
}

/// Shared handle to a wire. Cloning shares; equality is identity. The mesh
/// back-reference is weak, so wire values reachable from shard parameters
/// never keep a mesh alive.
#[derive(Clone)]
pub struct WireRef(Arc<WireInner>);

pub(crate) type WireCoroutine = Generator<'static, (), ()>;

impl WireRef {
    pub fn new(name: impl Into<String>) -> WireRef {
        WireRef(Arc::new(WireInner {
            name: Mutex::new(name.into()),
            control: Mutex::new(WireControl::default()),
            body: Mutex::new(Some(WireBody::default())),
            variables: Mutex::new(HashMap::new()),
            externals: Mutex::new(HashMap::new()),
            mesh: Mutex::new(WeakMesh::new()),
        }))
    }

    pub fn name(&self) -> String {
        self.0.name.lock().expect("wire name poisoned").clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.0.name.lock().expect("wire name poisoned") = name.into();
    }

    /// Stable address for identity hashing, dedup maps and visited sets.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    // -- control block ------------------------------------------------------

    fn control<R>(&self, f: impl FnOnce(&mut WireControl) -> R) -> R {
        f(&mut self.0.control.lock().expect("wire control poisoned"))
    }

    pub fn state(&self) -> WireState {
        self.control(|c| c.state)
    }

    pub(crate) fn set_state(&self, state: WireState) {
        self.control(|c| c.state = state);
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn has_ended(&self) -> bool {
        self.state().has_ended()
    }

    /// Schedule the next resume `seconds` from now; zero or negative means
    /// "next tick".
    pub fn set_next_resume(&self, seconds: f64) {
        let next = if seconds > 0.0 {
            Some(Instant::now() + Duration::from_secs_f64(seconds))
        } else {
            None
        };
        self.control(|c| c.next = next);
    }

    /// Whether the scheduler may resume this wire at `now`.
    pub fn due(&self, now: Instant) -> bool {
        self.control(|c| c.next.map_or(true, |next| now >= next))
    }

    pub fn request_stop(&self) {
        self.control(|c| c.should_stop = true);
    }

    pub fn stop_requested(&self) -> bool {
        self.control(|c| c.should_stop)
    }

    pub(crate) fn set_on_last_resume(&self) {
        self.control(|c| c.on_last_resume = true);
    }

    pub(crate) fn on_last_resume(&self) -> bool {
        self.control(|c| c.on_last_resume)
    }

    /// Flag the wire as cancelled; observed at the next suspension point.
    pub fn cancel_flow(&self, msg: impl Into<String>) {
        let msg = msg.into();
        self.control(|c| c.cancel = Some(msg));
    }

    pub(crate) fn take_cancel(&self) -> Option<String> {
        self.control(|c| c.cancel.take())
    }

    pub(crate) fn set_root_input(&self, v: Value) {
        self.control(|c| c.root_input = v);
    }

    pub(crate) fn root_input(&self) -> Value {
        self.control(|c| c.root_input.clone())
    }

    /// Clear the control flags a previous run may have left behind, so a
    /// stopped wire can be scheduled again.
    pub(crate) fn reset_for_run(&self) {
        self.control(|c| {
            c.should_stop = false;
            c.on_last_resume = false;
            c.cancel = None;
            c.next = None;
            c.finished_output = Value::None;
            c.finished_error = None;
        });
    }

    pub fn finished_output(&self) -> Value {
        self.control(|c| c.finished_output.clone())
    }

    pub fn finished_error(&self) -> Option<String> {
        self.control(|c| c.finished_error.clone())
    }

    fn record_finish(&self, output: Value, error: Option<String>) {
        self.control(|c| {
            c.finished_output = output;
            c.finished_error = error;
        });
    }

    // -- body ---------------------------------------------------------------

    /// Access the owned body. Returns `None` while the wire runs (the
    /// coroutine holds it).
    pub fn with_body<R>(&self, f: impl FnOnce(&mut WireBody) -> R) -> Option<R> {
        let mut guard = self.0.body.lock().expect("wire body poisoned");
        guard.as_mut().map(f)
    }

    pub(crate) fn take_body(&self) -> Option<WireBody> {
        self.0.body.lock().expect("wire body poisoned").take()
    }

    pub(crate) fn put_body(&self, body: WireBody) {
        *self.0.body.lock().expect("wire body poisoned") = Some(body);
    }

    pub fn set_looped(&self, looped: bool) {
        self.with_body(|b| b.looped = looped);
    }

    pub fn set_unsafe(&self, unsafe_: bool) {
        self.with_body(|b| b.unsafe_ = unsafe_);
    }

    pub fn set_pure(&self, pure: bool) {
        self.with_body(|b| b.pure = pure);
    }

    pub fn set_stack_size(&self, size: usize) {
        self.with_body(|b| b.stack_size = size);
    }

    /// Append a shard, claiming exclusive ownership. Inserting an instance
    /// already owned by any wire is a hard error.
    pub fn add_shard(&self, shard: ShardRef) -> Result<(), WireError> {
        let claimed = shard.with(|inst| {
            if inst.owned {
                false
            } else {
                inst.owned = true;
                true
            }
        });
        if !claimed {
            return Err(WireError::new(
                self.name(),
                format!("shard {} is already owned by a wire", shard.name()),
            ));
        }
        match self.with_body(|b| {
            b.shards.push(shard.clone());
            b.composed = false;
        }) {
            Some(()) => Ok(()),
            None => {
                // Roll the claim back; the wire is running
                shard.with(|inst| inst.owned = false);
                Err(WireError::new(self.name(), "cannot add shards while running"))
            }
        }
    }

    /// Remove a shard, releasing its ownership flag so it can be placed
    /// elsewhere.
    pub fn remove_shard(&self, shard: &ShardRef) -> Result<(), WireError> {
        let removed = self
            .with_body(|b| {
                let before = b.shards.len();
                b.shards.retain(|s| s != shard);
                b.composed = false;
                before != b.shards.len()
            })
            .ok_or_else(|| WireError::new(self.name(), "cannot remove shards while running"))?;
        if removed {
            shard.with(|inst| inst.owned = false);
            Ok(())
        } else {
            Err(WireError::new(self.name(), "shard not part of this wire"))
        }
    }

    /// Snapshot of the shard list; empty while the wire runs.
    pub fn shards(&self) -> Vec<ShardRef> {
        self.with_body(|b| b.shards.clone()).unwrap_or_default()
    }

    // -- variables ----------------------------------------------------------

    pub fn find_local(&self, name: &str) -> Option<VarCell> {
        self.0
            .variables
            .lock()
            .expect("wire variables poisoned")
            .get(name)
            .cloned()
    }

    pub fn get_or_create_local(&self, name: &str) -> VarCell {
        self.0
            .variables
            .lock()
            .expect("wire variables poisoned")
            .entry(name.to_string())
            .or_insert_with(|| new_cell(Value::None))
            .clone()
    }

    pub fn find_external(&self, name: &str) -> Option<VarCell> {
        self.0
            .externals
            .lock()
            .expect("wire externals poisoned")
            .get(name)
            .cloned()
    }

    pub(crate) fn insert_external(&self, name: &str, cell: VarCell) {
        self.0
            .externals
            .lock()
            .expect("wire externals poisoned")
            .insert(name.to_string(), cell);
    }

    pub fn remove_external(&self, name: &str) {
        self.0
            .externals
            .lock()
            .expect("wire externals poisoned")
            .remove(name);
    }

    /// Name-sorted snapshot of the external variables, for compose
    /// visibility.
    pub(crate) fn externals_snapshot(&self) -> Vec<(String, Value)> {
        let vars = self.0.externals.lock().expect("wire externals poisoned");
        let mut out: Vec<(String, Value)> = vars
            .iter()
            .map(|(name, cell)| (name.clone(), cell.get()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Name-sorted snapshot of the wire's local variables, for content
    /// hashing and diagnostics.
    pub(crate) fn locals_snapshot(&self) -> Vec<(String, Value)> {
        let vars = self.0.variables.lock().expect("wire variables poisoned");
        let mut out: Vec<(String, Value)> = vars
            .iter()
            .map(|(name, cell)| (name.clone(), cell.get()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Variable names with live references beyond the owning table.
    /// Diagnostics only; externals are exempt.
    fn dangling_locals(&self) -> Vec<(String, usize)> {
        let vars = self.0.variables.lock().expect("wire variables poisoned");
        vars.iter()
            .filter(|(_, cell)| !cell.is_external() && Arc::strong_count(cell) > 1)
            .map(|(name, cell)| (name.clone(), Arc::strong_count(cell) - 1))
            .collect()
    }

    fn clear_locals(&self) {
        self.0
            .variables
            .lock()
            .expect("wire variables poisoned")
            .clear();
    }

    // -- mesh back-reference ------------------------------------------------

    pub fn mesh(&self) -> Option<Mesh> {
        self.0.mesh.lock().expect("wire mesh ref poisoned").upgrade()
    }

    pub(crate) fn set_mesh(&self, mesh: &Mesh) {
        *self.0.mesh.lock().expect("wire mesh ref poisoned") = mesh.downgrade();
    }
}

impl PartialEq for WireRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for WireRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WireRef({}, {:?})", self.name(), self.state())
    }
}

/// Host-facing summary of a wire.
#[derive(Debug, Clone, PartialEq)]
pub struct WireInfo {
    pub name: String,
    pub looped: bool,
    pub unsafe_: bool,
    pub shard_count: usize,
    pub state: WireState,
    pub failed: bool,
    pub error: Option<String>,
}

pub fn get_wire_info(wire: &WireRef) -> WireInfo {
    let (looped, unsafe_, shard_count) = wire
        .with_body(|b| (b.looped, b.unsafe_, b.shards.len()))
        .unwrap_or((false, false, 0));
    let state = wire.state();
    WireInfo {
        name: wire.name(),
        looped,
        unsafe_,
        shard_count,
        state,
        failed: state == WireState::Failed,
        error: wire.finished_error(),
    }
}

// ---------------------------------------------------------------------------
// Lifecycle driven by the mesh
// ---------------------------------------------------------------------------

/// Allocate the coroutine and run it up to the post-warmup yield. After this
/// returns, the wire is `Prepared` (or `Failed` when warmup errored).
pub(crate) fn prepare(wire: &WireRef, mesh: &Mesh) -> WireCoroutine {
    let stack_size = wire
        .with_body(|b| b.stack_size)
        .unwrap_or(DEFAULT_STACK_SIZE);
    wire.reset_for_run();
    wire.set_mesh(mesh);
    let wire2 = wire.clone();
    let mesh2 = mesh.clone();
    let mut coro: WireCoroutine = Gn::<()>::new_scoped_opt(stack_size, move |mut scope| {
        let mut yield_fn = || {
            scope.yield_(());
        };
        wire_main(wire2, mesh2, &mut yield_fn);
    });
    // Preroll: warmup runs now, inside the coroutine
    coro.resume();
    coro
}

/// Transition Prepared -> Starting and stash the tick input.
pub fn start(wire: &WireRef, input: Value) {
    if wire.state() != WireState::Prepared {
        tracing::error!(wire = %wire.name(), "attempted to start a wire not ready for running");
        return;
    }
    wire.set_root_input(input);
    wire.set_state(WireState::Starting);
}

/// Stop a wire, letting the coroutine run its cleanup inside one final
/// resume. Returns true when the wire had ended naturally.
pub(crate) fn stop_wire(wire: &WireRef, coro: Option<&mut WireCoroutine>) -> bool {
    if wire.state() == WireState::Stopped {
        return true;
    }
    if let Some(coro) = coro {
        let state = wire.state();
        if !coro.is_done() && state >= WireState::Prepared && state <= WireState::IterationEnded {
            wire.request_stop();
            wire.set_on_last_resume();
            coro.resume();
        }
    }
    let ended = wire.state() == WireState::Ended;
    wire.set_state(WireState::Stopped);
    ended
}

/// Resume the coroutine if the wire is due. Returns false once the wire can
/// no longer run.
pub(crate) fn tick_wire(wire: &WireRef, coro: &mut WireCoroutine, now: Instant) -> bool {
    if coro.is_done() || !wire.is_running() {
        return false;
    }
    if wire.due(now) {
        coro.resume();
    }
    true
}

// ---------------------------------------------------------------------------
// The coroutine body
// ---------------------------------------------------------------------------

fn wire_main(wire: WireRef, mesh: Mesh, yielder: &mut dyn FnMut()) {
    let Some(mut body) = wire.take_body() else {
        wire.record_finish(
            Value::None,
            Some("wire body unavailable (already scheduled?)".to_string()),
        );
        wire.set_state(WireState::Failed);
        return;
    };

    wire.set_state(WireState::Prepared);
    wire.record_finish(Value::None, None);

    let mut ctx = Context::new(wire.clone(), Some(mesh));
    ctx.yielder = Some(yielder);

    // Warm every shard up, in order. A failure unwinds the already-warmed
    // prefix in reverse and aborts startup.
    let mut warmed = 0usize;
    let mut warmup_error: Option<String> = None;
    for shard in &body.shards {
        match shard.with(|inst| inst.shard.warmup(&mut ctx)) {
            Ok(()) => warmed += 1,
            Err(e) => {
                tracing::error!(
                    wire = %wire.name(),
                    shard = %shard.name(),
                    error = %e.msg,
                    "wire warmup failed"
                );
                warmup_error = Some(e.msg);
                break;
            }
        }
    }
    if let Some(msg) = warmup_error {
        for shard in body.shards[..warmed].iter().rev() {
            shard.with(|inst| inst.shard.cleanup());
        }
        wire.record_finish(Value::None, Some(msg));
        wire.put_body(body);
        wire.set_state(WireState::Failed);
        return;
    }

    // Yield after warming up; `start` and the first tick take it from here
    ctx.yield_now();

    let mut previous_output = Value::None;
    let mut failure: Option<String> = None;

    if wire.stop_requested() {
        tracing::debug!(wire = %wire.name(), "wire stopped before starting");
    } else {
        let mut running = true;
        while running {
            running = body.looped;
            ctx.continue_flow();
            wire.set_state(WireState::Iterating);

            for shard in &body.shards {
                if shard.with(|inst| inst.shard.wants_next_frame()) {
                    if let Err(e) = shard.with(|inst| inst.shard.next_frame(&mut ctx)) {
                        failure = Some(e.msg);
                    }
                }
            }
            if failure.is_some() {
                break;
            }

            ctx.root_input = wire.root_input();
            let tick_input = ctx.root_input.clone();
            let res = run_shard_seq(&mut ctx, &body.shards, &tick_input, false);
            wire.set_state(WireState::IterationEnded);

            match res {
                Err(e) => {
                    failure = Some(e.msg);
                    break;
                }
                Ok(outcome) => match outcome.state {
                    FlowState::Continue => previous_output = outcome.output,
                    FlowState::Return | FlowState::Stop => {
                        // The flow storage carries the effective result
                        previous_output = ctx.flow_storage.clone();
                        break;
                    }
                    FlowState::Restart => {
                        wire.set_root_input(ctx.flow_storage.clone());
                    }
                    other => {
                        debug_assert!(false, "runner returned invalid state {:?}", other);
                    }
                },
            }

            if running && !body.unsafe_ {
                // Mandatory yield so a looped wire cannot monopolize the mesh
                wire.set_next_resume(0.0);
                ctx.yield_now();
                if wire.take_cancel().is_some() || wire.stop_requested() {
                    tracing::debug!(wire = %wire.name(), "wire aborted on resume");
                    break;
                }
            }
        }
    }

    wire.record_finish(previous_output, failure.clone());

    // Cleanup in reverse order, inside the coroutine
    for shard in body.shards.iter().rev() {
        shard.with(|inst| inst.shard.cleanup());
    }

    // Dangling references are diagnostics, never destroyed here
    for (name, refs) in wire.dangling_locals() {
        tracing::warn!(
            wire = %wire.name(),
            variable = %name,
            references = refs,
            "variable still referenced at wire cleanup"
        );
    }
    wire.clear_locals();

    wire.put_body(body);
    wire.set_state(if failure.is_some() {
        WireState::Failed
    } else {
        WireState::Ended
    });
}

// ---------------------------------------------------------------------------
// The shard-sequence runner
// ---------------------------------------------------------------------------

/// Result of one pass over a shard slice: the flow state that ended the pass
/// (`Continue` when it ran to the end) and the final output.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqOutcome {
    pub state: FlowState,
    pub output: Value,
}

/// Execute one shard, taking the inline fast path when the dispatch id allows.
pub(crate) fn activate_shard(
    shard: &ShardRef,
    ctx: &mut Context<'_>,
    input: &Value,
) -> Result<Value, ActivationError> {
    let (inline, cached) = shard.with(|inst| (inst.inline, inst.cached_const.clone()));
    match inline {
        InlineShard::NoopShard => Ok(input.clone()),
        InlineShard::CoreConst => match cached {
            Some(v) => Ok(v),
            None => shard.with(|inst| inst.shard.activate(ctx, input)),
        },
        InlineShard::CoreInput => Ok(ctx.root_input.clone()),
        // Every other id falls through to the virtual call; the tag is an
        // optimization, not a correctness requirement
        _ => shard.with(|inst| inst.shard.activate(ctx, input)),
    }
}

/// Run `shards` in order over `seq_input`.
///
/// Flow handling after each shard:
/// - `Continue`: previous output becomes the next input
/// - `Return`: exit; when `handles_return` the state is reset to Continue so
///   only the immediate caller consumes the semantic
/// - `Stop` / `Restart`: exit, bubbling the state to the caller
/// - `Rebase`: the next shard sees the root tick input
/// - `Error`: converted into an `ActivationError` and raised
pub fn run_shard_seq(
    ctx: &mut Context<'_>,
    shards: &[ShardRef],
    seq_input: &Value,
    handles_return: bool,
) -> Result<SeqOutcome, ActivationError> {
    run_shard_seq_inner(ctx, shards, seq_input, handles_return, None)
}

fn run_shard_seq_inner(
    ctx: &mut Context<'_>,
    shards: &[ShardRef],
    seq_input: &Value,
    handles_return: bool,
    mut hasher: Option<&mut Sha256>,
) -> Result<SeqOutcome, ActivationError> {
    let mut input = seq_input.clone();
    for shard in shards {
        if let Some(h) = hasher.as_deref_mut() {
            feed_activation_prefix(h, shard, &input)?;
        }
        let output = match activate_shard(shard, ctx, &input) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    shard = %shard.name(),
                    error = %e.msg,
                    "shard activation error"
                );
                if !ctx.failed() {
                    ctx.cancel_flow(e.msg.clone());
                }
                return Err(e);
            }
        };
        if let Some(h) = hasher.as_deref_mut() {
            feed_value(h, &output)?;
        }
        if !ctx.should_continue() {
            match ctx.flow.clone() {
                FlowState::Return => {
                    if handles_return {
                        ctx.continue_flow();
                    }
                    return Ok(SeqOutcome {
                        state: FlowState::Return,
                        output,
                    });
                }
                FlowState::Stop => {
                    return Ok(SeqOutcome {
                        state: FlowState::Stop,
                        output,
                    });
                }
                FlowState::Restart => {
                    return Ok(SeqOutcome {
                        state: FlowState::Restart,
                        output,
                    });
                }
                FlowState::Rebase => {
                    input = ctx.root_input.clone();
                    ctx.continue_flow();
                    continue;
                }
                FlowState::Error(msg) => {
                    tracing::error!(
                        shard = %shard.name(),
                        error = %msg,
                        "shard activation error"
                    );
                    return Err(ActivationError::new(msg));
                }
                FlowState::Continue => unreachable!(),
            }
        }
        input = output;
    }
    Ok(SeqOutcome {
        state: FlowState::Continue,
        output: input,
    })
}

/// `run_shard_seq` with Return collapsed for the caller - the shape subwire
/// shards want.
pub fn run_shards(
    ctx: &mut Context<'_>,
    shards: &[ShardRef],
    input: &Value,
) -> Result<SeqOutcome, ActivationError> {
    run_shard_seq(ctx, shards, input, true)
}

/// Like `run_shards`, but also folds a 128-bit activation hash over
/// (shard hash, input, parameter values, output) for every step. The output
/// participates: the hash keys memoization, and identical inputs can still
/// produce divergent stateful outputs.
pub fn run_shards_hashed(
    ctx: &mut Context<'_>,
    shards: &[ShardRef],
    input: &Value,
) -> Result<(SeqOutcome, Hash128), ActivationError> {
    let mut hasher = Sha256::new();
    let outcome = run_shard_seq_inner(ctx, shards, input, true, Some(&mut hasher))?;
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Ok((outcome, Hash128(u128::from_le_bytes(bytes))))
}

fn feed_activation_prefix(
    h: &mut Sha256,
    shard: &ShardRef,
    input: &Value,
) -> Result<(), ActivationError> {
    h.update(shard.shard_hash().to_le_bytes());
    feed_value(h, input)?;
    let params = shard.with(|inst| {
        let n = inst.shard.parameters().len();
        (0..n).map(|i| inst.shard.get_param(i)).collect::<Vec<_>>()
    });
    for p in &params {
        feed_value(h, p)?;
    }
    Ok(())
}

fn feed_value(h: &mut Sha256, v: &Value) -> Result<(), ActivationError> {
    let hv = hash_value(v).map_err(|e| ActivationError::new(e.to_string()))?;
    h.update(hv.0.to_le_bytes());
    Ok(())
}

/// Run a child wire inline within the caller's coroutine: push it onto the
/// wire stack, drive its shards once, pop. Warmup/cleanup are the *caller
/// shard's* responsibility (done once per wire lifecycle, not per run).
///
/// Return collapses into the outcome; Stop and Restart bubble to the caller
/// for policy decisions. Failures mark the child wire failed and propagate.
pub fn run_sub_wire(
    ctx: &mut Context<'_>,
    wire: &WireRef,
    input: &Value,
) -> Result<SeqOutcome, ActivationError> {
    let Some(body) = wire.take_body() else {
        return Err(ActivationError::new(format!(
            "wire {} is already running",
            wire.name()
        )));
    };
    wire.set_state(WireState::Iterating);
    ctx.wire_stack.push(wire.clone());
    // The child's shards see the child's input as their root: `Input` and
    // Rebase address the innermost wire, not the coroutine's root
    let saved_root = std::mem::replace(&mut ctx.root_input, input.clone());
    let res = run_shard_seq(ctx, &body.shards, input, true);
    ctx.root_input = saved_root;
    ctx.wire_stack.pop();
    wire.put_body(body);
    match res {
        Ok(outcome) => {
            wire.record_finish(outcome.output.clone(), None);
            wire.set_state(WireState::Ended);
            Ok(outcome)
        }
        Err(e) => {
            wire.record_finish(Value::None, Some(e.msg.clone()));
            wire.set_state(WireState::Failed);
            // The child consumed the error state; the caller decides whether
            // it propagates
            ctx.continue_flow();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActivationError;
    use crate::shard::Shard;
    use crate::types::Types;

    struct Echo;

    impl Shard for Echo {
        fn name(&self) -> &'static str {
            "TestEcho"
        }

        fn input_types(&self) -> Types {
            vec![TypeInfo::any()]
        }

        fn output_types(&self) -> Types {
            vec![TypeInfo::any()]
        }

        fn activate(
            &mut self,
            _ctx: &mut Context<'_>,
            input: &Value,
        ) -> Result<Value, ActivationError> {
            Ok(input.clone())
        }
    }

    #[test]
    fn test_new_wire_defaults() {
        let w = WireRef::new("w");
        assert_eq!(w.state(), WireState::Stopped);
        assert_eq!(w.with_body(|b| b.stack_size), Some(DEFAULT_STACK_SIZE));
        assert!(!w.is_running());
    }

    #[test]
    fn test_add_shard_ownership_is_exclusive() {
        let a = WireRef::new("a");
        let b = WireRef::new("b");
        let s = ShardRef::new(Box::new(Echo));
        a.add_shard(s.clone()).expect("first insert claims");
        let err = b.add_shard(s.clone()).unwrap_err();
        assert!(err.msg.contains("already owned"));

        // Removing releases ownership for reuse
        a.remove_shard(&s).expect("shard is present");
        b.add_shard(s).expect("released shard can be reclaimed");
    }

    #[test]
    fn test_remove_unknown_shard() {
        let a = WireRef::new("a");
        let s = ShardRef::new(Box::new(Echo));
        assert!(a.remove_shard(&s).is_err());
    }

    #[test]
    fn test_due_with_deadline() {
        let w = WireRef::new("w");
        assert!(w.due(Instant::now()), "no deadline means due");
        w.set_next_resume(10.0);
        assert!(!w.due(Instant::now()));
        w.set_next_resume(0.0);
        assert!(w.due(Instant::now()));
    }

    #[test]
    fn test_wire_identity() {
        let a = WireRef::new("same-name");
        let b = WireRef::new("same-name");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_wire_info_snapshot() {
        let w = WireRef::new("info");
        w.set_looped(true);
        w.add_shard(ShardRef::new(Box::new(Echo))).unwrap();
        let info = get_wire_info(&w);
        assert_eq!(info.name, "info");
        assert!(info.looped);
        assert_eq!(info.shard_count, 1);
        assert!(!info.failed);
    }

    #[test]
    fn test_start_requires_prepared() {
        let w = WireRef::new("w");
        start(&w, Value::Int(1));
        assert_eq!(w.state(), WireState::Stopped, "start on unprepared is refused");
    }
}
