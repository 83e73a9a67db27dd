//! Subwire shards: inline children, branches with failure policy, detached
//! scheduling

use crate::context::{Context, FlowState};
use crate::error::{ActivationError, ComposeError, ParamError, WarmupError};
use crate::shard::{InstanceData, ParamInfo, Shard};
use crate::types::{ExposedInfo, TypeInfo, Types};
use crate::value::Value;
use crate::wire::{WireRef, run_sub_wire};

fn wire_param(value: &Value) -> Result<WireRef, String> {
    match value {
        Value::Wire(w) => Ok(w.clone()),
        other => Err(format!("expected a wire, found {:?}", other.kind())),
    }
}

fn warmup_wire(wire: &WireRef, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
    let shards = wire.shards();
    ctx.wire_stack.push(wire.clone());
    let mut result = Ok(());
    for s in &shards {
        result = s.with(|inst| inst.shard.warmup(ctx));
        if result.is_err() {
            break;
        }
    }
    ctx.wire_stack.pop();
    result
}

fn cleanup_wire(wire: &WireRef) {
    for s in wire.shards().iter().rev() {
        s.with(|inst| inst.shard.cleanup());
    }
}

/// Runs a child wire inline, in the caller's coroutine. Restart re-runs the
/// child; Stop bubbles to the parent.
#[derive(Default)]
pub struct DoShard {
    wire: Option<WireRef>,
}

impl Shard for DoShard {
    fn name(&self) -> &'static str {
        "Do"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new("Wire", "The wire to run", vec![TypeInfo::wire()])]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match index {
            0 => {
                self.wire = Some(wire_param(value).map_err(|msg| ParamError {
                    shard: "Do".to_string(),
                    index: 0,
                    msg,
                })?);
                Ok(())
            }
            _ => Err(ParamError {
                shard: "Do".to_string(),
                index,
                msg: "no such parameter slot".to_string(),
            }),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match (index, &self.wire) {
            (0, Some(w)) => Value::Wire(w.clone()),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        let wire = self
            .wire
            .as_ref()
            .ok_or_else(|| ComposeError::new("Do requires a wire parameter"))?;
        let result = crate::compose::compose_wire(wire, data, None)?;
        Ok(result.output_type)
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        match &self.wire {
            Some(wire) => warmup_wire(&wire.clone(), ctx),
            None => Err(WarmupError::new("Do requires a wire parameter")),
        }
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let wire = self
            .wire
            .as_ref()
            .ok_or_else(|| ActivationError::new("Do requires a wire parameter"))?
            .clone();
        let mut current = input.clone();
        loop {
            let outcome = run_sub_wire(ctx, &wire, &current)?;
            match outcome.state {
                FlowState::Restart => {
                    // The child restarts itself with its flow storage
                    current = ctx.flow_storage.clone();
                    ctx.continue_flow();
                }
                _ => return Ok(outcome.output),
            }
        }
    }

    fn cleanup(&mut self) {
        if let Some(wire) = &self.wire {
            cleanup_wire(wire);
        }
    }
}

/// Failure policy for `Branch` children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchFailure {
    /// Any child failure fails the branch
    #[default]
    Everything,
    /// Failures of the branch's own children fail the branch
    Known,
    /// Child failures are recorded on the child, never propagated
    Ignore,
}

impl BranchFailure {
    fn parse(s: &str) -> Option<BranchFailure> {
        match s {
            "Everything" => Some(BranchFailure::Everything),
            "Known" => Some(BranchFailure::Known),
            "Ignore" => Some(BranchFailure::Ignore),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            BranchFailure::Everything => "Everything",
            BranchFailure::Known => "Known",
            BranchFailure::Ignore => "Ignore",
        }
    }
}

/// Runs a set of child wires in sequence each activation, with a configurable
/// failure policy. The input passes through untouched.
#[derive(Default)]
pub struct BranchShard {
    wires: Vec<WireRef>,
    policy: BranchFailure,
    /// Requirements captured from the children at compose time
    captured: Vec<ExposedInfo>,
}

impl Shard for BranchShard {
    fn name(&self) -> &'static str {
        "Branch"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![
            ParamInfo::new(
                "Wires",
                "Child wires to run",
                vec![TypeInfo::seq_of(vec![TypeInfo::wire()]), TypeInfo::wire()],
            ),
            ParamInfo::new(
                "Failure",
                "Everything, Known or Ignore",
                vec![TypeInfo::string()],
            ),
        ]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match (index, value) {
            (0, Value::Wire(w)) => {
                self.wires = vec![w.clone()];
                Ok(())
            }
            (0, Value::Seq(elems)) => {
                let mut wires = Vec::with_capacity(elems.len());
                for e in elems {
                    wires.push(wire_param(e).map_err(|msg| ParamError {
                        shard: "Branch".to_string(),
                        index: 0,
                        msg,
                    })?);
                }
                self.wires = wires;
                Ok(())
            }
            (0, _) => Err(ParamError {
                shard: "Branch".to_string(),
                index: 0,
                msg: "expected a wire or a sequence of wires".to_string(),
            }),
            (1, Value::String(s)) => match BranchFailure::parse(s) {
                Some(policy) => {
                    self.policy = policy;
                    Ok(())
                }
                None => Err(ParamError {
                    shard: "Branch".to_string(),
                    index: 1,
                    msg: format!("unknown failure policy: {}", s),
                }),
            },
            (1, _) => Err(ParamError {
                shard: "Branch".to_string(),
                index: 1,
                msg: "expected a policy name".to_string(),
            }),
            _ => Err(ParamError {
                shard: "Branch".to_string(),
                index,
                msg: "no such parameter slot".to_string(),
            }),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::Seq(self.wires.iter().cloned().map(Value::Wire).collect()),
            1 => Value::String(self.policy.label().to_string()),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        // Deep capture: children's unmet requirements become ours
        self.captured.clear();
        for wire in &self.wires {
            let result = crate::compose::compose_wire(wire, data, None)?;
            for req in result.required {
                if !self.captured.iter().any(|e| e.name == req.name) {
                    self.captured.push(req);
                }
            }
        }
        Ok(data.input_type.clone())
    }

    fn required_variables(&self) -> Vec<ExposedInfo> {
        self.captured.clone()
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        for wire in &self.wires {
            warmup_wire(wire, ctx)?;
        }
        Ok(())
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        for wire in &self.wires {
            match run_sub_wire(ctx, wire, input) {
                Ok(_) => {}
                Err(e) => match self.policy {
                    BranchFailure::Everything | BranchFailure::Known => {
                        return Err(e);
                    }
                    BranchFailure::Ignore => {
                        tracing::debug!(
                            wire = %wire.name(),
                            error = %e.msg,
                            "branch child failed (ignored by policy)"
                        );
                    }
                },
            }
        }
        Ok(input.clone())
    }

    fn cleanup(&mut self) {
        for wire in self.wires.iter().rev() {
            cleanup_wire(wire);
        }
    }
}

/// Schedules a child wire on the owning mesh: it runs independently from the
/// next tick on. The input passes through.
#[derive(Default)]
pub struct DetachShard {
    wire: Option<WireRef>,
}

impl Shard for DetachShard {
    fn name(&self) -> &'static str {
        "Detach"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new("Wire", "The wire to schedule", vec![TypeInfo::wire()])]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match index {
            0 => {
                self.wire = Some(wire_param(value).map_err(|msg| ParamError {
                    shard: "Detach".to_string(),
                    index: 0,
                    msg,
                })?);
                Ok(())
            }
            _ => Err(ParamError {
                shard: "Detach".to_string(),
                index,
                msg: "no such parameter slot".to_string(),
            }),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match (index, &self.wire) {
            (0, Some(w)) => Value::Wire(w.clone()),
            _ => Value::None,
        }
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let wire = self
            .wire
            .as_ref()
            .ok_or_else(|| ActivationError::new("Detach requires a wire parameter"))?;
        let mesh = ctx
            .mesh()
            .ok_or_else(|| ActivationError::new("Detach requires a mesh"))?;
        if wire.is_running() {
            tracing::debug!(wire = %wire.name(), "detached wire already running");
            return Ok(input.clone());
        }
        mesh.schedule(wire.clone(), input.clone(), true)
            .map_err(|e| ActivationError::new(e.to_string()))?;
        Ok(input.clone())
    }
}
