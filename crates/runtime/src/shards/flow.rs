//! Flow-control shards: terminal signals and short-circuit combinators

use crate::context::Context;
use crate::error::{ActivationError, ParamError};
use crate::shard::{ParamInfo, Shard};
use crate::types::{TypeInfo, Types};
use crate::value::Value;

/// Exits the current shard sequence, yielding the input upward.
pub struct ReturnShard;

impl Shard for ReturnShard {
    fn name(&self) -> &'static str {
        "Return"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        ctx.return_flow(input.clone());
        Ok(input.clone())
    }
}

/// Restarts the wire's outer loop with the input as the new root input.
pub struct RestartShard;

impl Shard for RestartShard {
    fn name(&self) -> &'static str {
        "Restart"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        ctx.restart_flow(input.clone());
        Ok(input.clone())
    }
}

/// Stops the wire; the input becomes its finished output.
pub struct StopShard;

impl Shard for StopShard {
    fn name(&self) -> &'static str {
        "Stop"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        ctx.stop_flow(input.clone());
        Ok(input.clone())
    }
}

/// Fails the wire with a message.
#[derive(Default)]
pub struct FailShard {
    message: String,
}

impl Shard for FailShard {
    fn name(&self) -> &'static str {
        "Fail"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new(
            "Message",
            "Failure message",
            vec![TypeInfo::string()],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match (index, value) {
            (0, Value::String(s)) => {
                self.message = s.clone();
                Ok(())
            }
            (0, _) => Err(ParamError {
                shard: "Fail".to_string(),
                index: 0,
                msg: "expected a string".to_string(),
            }),
            _ => Err(ParamError {
                shard: "Fail".to_string(),
                index,
                msg: "no such parameter slot".to_string(),
            }),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::String(self.message.clone()),
            _ => Value::None,
        }
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        if self.message.is_empty() {
            if let Value::String(s) = input {
                return Err(ActivationError::new(s.clone()));
            }
        }
        Err(ActivationError::new(self.message.clone()))
    }
}

/// Short-circuit conjunction: a falsy input exits the sequence returning it;
/// a truthy input rebases flow so the next shard sees the wire input.
pub struct AndShard;

impl Shard for AndShard {
    fn name(&self) -> &'static str {
        "And"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::bool_type()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        if input.is_truthy() {
            ctx.rebase_flow();
        } else {
            ctx.return_flow(input.clone());
        }
        Ok(input.clone())
    }
}

/// Short-circuit disjunction: the mirror image of `And`.
pub struct OrShard;

impl Shard for OrShard {
    fn name(&self) -> &'static str {
        "Or"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::bool_type()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        if input.is_truthy() {
            ctx.return_flow(input.clone());
        } else {
            ctx.rebase_flow();
        }
        Ok(input.clone())
    }
}

/// Boolean negation of the input's truthiness.
pub struct NotShard;

impl Shard for NotShard {
    fn name(&self) -> &'static str {
        "Not"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::bool_type()]
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        Ok(Value::Bool(!input.is_truthy()))
    }
}
