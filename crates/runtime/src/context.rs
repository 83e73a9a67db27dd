//! Per-tick wire context and cooperative suspension
//!
//! A `Context` travels down the shard call chain during one coroutine run:
//! it carries the flow status, the flow-storage value (the payload of
//! Return/Restart/Stop), the root tick input, and the wire nesting stack used
//! for variable resolution. The yield hook is only present while executing
//! inside a wire coroutine; calling `suspend` anywhere else is an error.
//!
//! Control flow is data, not exceptions: shards set the flow state through
//! the `*_flow` methods and the runner reacts after each activation.

use crate::error::ActivationError;
use crate::mesh::{Mesh, WeakMesh};
use crate::value::Value;
use crate::wire::WireRef;

/// Flow status of the current tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FlowState {
    #[default]
    Continue,
    /// Exit the current shard sequence, yielding the flow storage
    Return,
    /// Stop the wire; flow storage becomes the finished output
    Stop,
    /// Restart the outer loop with flow storage as the new root input
    Restart,
    /// Give the next shard the root tick input instead of the previous output
    Rebase,
    /// Activation failure with the captured message
    Error(String),
}

/// Tick-local state threaded through every shard activation.
pub struct Context<'a> {
    pub flow: FlowState,
    /// Value carried by Return/Restart/Stop
    pub flow_storage: Value,
    /// The wire's input for this tick; `Input` and Rebase read it
    pub root_input: Value,
    /// Innermost wire last; `wire_stack[0]` owns the coroutine
    pub wire_stack: Vec<WireRef>,
    /// Weak so a parked coroutine never keeps its mesh alive
    mesh: WeakMesh,
    pub(crate) yielder: Option<&'a mut dyn FnMut()>,
}

impl<'a> Context<'a> {
    /// A context rooted at `wire`. Detached from any coroutine until the
    /// runner installs a yield hook.
    pub fn new(wire: WireRef, mesh: Option<Mesh>) -> Context<'a> {
        Context {
            flow: FlowState::Continue,
            flow_storage: Value::None,
            root_input: Value::None,
            wire_stack: vec![wire],
            mesh: mesh.map(|m| m.downgrade()).unwrap_or_default(),
            yielder: None,
        }
    }

    /// The mesh hosting this run, if it is still alive.
    pub fn mesh(&self) -> Option<Mesh> {
        self.mesh.upgrade()
    }

    /// The wire owning the coroutine this context runs in.
    pub fn root_wire(&self) -> &WireRef {
        &self.wire_stack[0]
    }

    /// The innermost wire currently executing.
    pub fn current_wire(&self) -> &WireRef {
        self.wire_stack.last().expect("wire stack never empty")
    }

    pub fn continue_flow(&mut self) {
        self.flow = FlowState::Continue;
    }

    pub fn return_flow(&mut self, value: Value) {
        self.flow_storage = value;
        self.flow = FlowState::Return;
    }

    pub fn stop_flow(&mut self, value: Value) {
        self.flow_storage = value;
        self.flow = FlowState::Stop;
    }

    pub fn restart_flow(&mut self, value: Value) {
        self.flow_storage = value;
        self.flow = FlowState::Restart;
    }

    pub fn rebase_flow(&mut self) {
        self.flow = FlowState::Rebase;
    }

    /// Record an activation failure. Honored at the next flow inspection or
    /// suspension point.
    pub fn cancel_flow(&mut self, msg: impl Into<String>) {
        self.flow = FlowState::Error(msg.into());
    }

    pub fn should_continue(&self) -> bool {
        matches!(self.flow, FlowState::Continue)
    }

    pub fn should_stop(&self) -> bool {
        matches!(self.flow, FlowState::Stop)
    }

    pub fn failed(&self) -> bool {
        matches!(self.flow, FlowState::Error(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.flow {
            FlowState::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Yield without touching the resume deadline. Runner-internal; shards go
    /// through `suspend`.
    pub(crate) fn yield_now(&mut self) -> bool {
        match self.yielder.as_mut() {
            Some(y) => {
                y();
                true
            }
            None => false,
        }
    }
}

/// Suspend the current wire for `seconds` (0 means "yield once, resume on the
/// next scheduler tick"). Returns the flow state observed on resume, so
/// shards can react to stop/cancel requests that arrived while suspended.
///
/// The deadline lands on the root wire's control block; the mesh will not
/// resume the coroutine before it elapses.
pub fn suspend(ctx: &mut Context<'_>, seconds: f64) -> Result<FlowState, ActivationError> {
    if ctx.yielder.is_none() {
        return Err(ActivationError::new(
            "suspend called outside of a wire coroutine",
        ));
    }
    ctx.root_wire().set_next_resume(seconds);
    ctx.yield_now();

    // Honor external control that arrived while we were away
    if let Some(msg) = ctx.root_wire().take_cancel() {
        ctx.cancel_flow(msg);
    } else if ctx.root_wire().stop_requested() || ctx.root_wire().on_last_resume() {
        ctx.stop_flow(Value::None);
    }
    Ok(ctx.flow.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_transitions() {
        let wire = WireRef::new("test");
        let mut ctx = Context::new(wire, None);
        assert!(ctx.should_continue());

        ctx.return_flow(Value::Int(1));
        assert_eq!(ctx.flow, FlowState::Return);
        assert_eq!(ctx.flow_storage, Value::Int(1));

        ctx.continue_flow();
        assert!(ctx.should_continue());

        ctx.cancel_flow("boom");
        assert!(ctx.failed());
        assert_eq!(ctx.error_message(), Some("boom"));
    }

    #[test]
    fn test_suspend_outside_coroutine_errors() {
        let wire = WireRef::new("test");
        let mut ctx = Context::new(wire, None);
        let err = suspend(&mut ctx, 0.0).unwrap_err();
        assert!(err.msg.contains("outside of a wire coroutine"));
    }

    #[test]
    fn test_wire_stack_roles() {
        let root = WireRef::new("root");
        let child = WireRef::new("child");
        let mut ctx = Context::new(root.clone(), None);
        ctx.wire_stack.push(child.clone());
        assert_eq!(ctx.root_wire().name(), "root");
        assert_eq!(ctx.current_wire().name(), "child");
    }
}
