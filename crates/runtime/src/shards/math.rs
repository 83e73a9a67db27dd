//! Math binaries and comparators
//!
//! Every operator takes its right operand as a parameter and the left one as
//! input: `3 | Math.Add(4)` is 7. Int and Float cross-promote to Float;
//! bitwise operators demand Int on both sides.

use crate::context::Context;
use crate::error::{ActivationError, ComposeError, ParamError};
use crate::shard::{InstanceData, ParamInfo, Shard};
use crate::types::{TypeInfo, Types};
use crate::value::{Value, ValueKind};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Xor,
    And,
    Or,
}

impl MathOp {
    fn bitwise(self) -> bool {
        matches!(self, MathOp::Xor | MathOp::And | MathOp::Or)
    }
}

pub struct MathShard {
    op: MathOp,
    operand: Value,
}

impl MathShard {
    pub fn new(op: MathOp) -> MathShard {
        MathShard {
            op,
            operand: Value::Int(0),
        }
    }

    fn apply(&self, input: &Value) -> Result<Value, ActivationError> {
        let op = self.op;
        match (input, &self.operand) {
            (Value::Int(a), Value::Int(b)) => int_op(op, *a, *b),
            (Value::Float(a), Value::Float(b)) if !op.bitwise() => Ok(Value::Float(float_op(op, *a, *b)?)),
            (Value::Int(a), Value::Float(b)) if !op.bitwise() => {
                Ok(Value::Float(float_op(op, *a as f64, *b)?))
            }
            (Value::Float(a), Value::Int(b)) if !op.bitwise() => {
                Ok(Value::Float(float_op(op, *a, *b as f64)?))
            }
            (a, b) => Err(ActivationError::new(format!(
                "math operation not applicable to {:?} and {:?}",
                a.kind(),
                b.kind()
            ))),
        }
    }
}

fn int_op(op: MathOp, a: i64, b: i64) -> Result<Value, ActivationError> {
    let out = match op {
        MathOp::Add => a.wrapping_add(b),
        MathOp::Subtract => a.wrapping_sub(b),
        MathOp::Multiply => a.wrapping_mul(b),
        MathOp::Divide => {
            if b == 0 {
                return Err(ActivationError::new("division by zero"));
            }
            a.wrapping_div(b)
        }
        MathOp::Mod => {
            if b == 0 {
                return Err(ActivationError::new("modulo by zero"));
            }
            a.wrapping_rem(b)
        }
        MathOp::Xor => a ^ b,
        MathOp::And => a & b,
        MathOp::Or => a | b,
    };
    Ok(Value::Int(out))
}

fn float_op(op: MathOp, a: f64, b: f64) -> Result<f64, ActivationError> {
    Ok(match op {
        MathOp::Add => a + b,
        MathOp::Subtract => a - b,
        MathOp::Multiply => a * b,
        MathOp::Divide => {
            if b == 0.0 {
                return Err(ActivationError::new("division by zero"));
            }
            a / b
        }
        MathOp::Mod => a % b,
        _ => unreachable!("bitwise ops never reach the float path"),
    })
}

impl Shard for MathShard {
    fn name(&self) -> &'static str {
        match self.op {
            MathOp::Add => "Math.Add",
            MathOp::Subtract => "Math.Subtract",
            MathOp::Multiply => "Math.Multiply",
            MathOp::Divide => "Math.Divide",
            MathOp::Mod => "Math.Mod",
            MathOp::Xor => "Math.Xor",
            MathOp::And => "Math.And",
            MathOp::Or => "Math.Or",
        }
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::int(), TypeInfo::float()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::int(), TypeInfo::float()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new(
            "Operand",
            "Right-hand operand",
            vec![TypeInfo::int(), TypeInfo::float()],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match (index, value) {
            (0, Value::Int(_)) | (0, Value::Float(_)) => {
                self.operand = value.clone();
                Ok(())
            }
            (0, _) => Err(ParamError {
                shard: self.name().to_string(),
                index: 0,
                msg: "expected a number".to_string(),
            }),
            _ => Err(ParamError {
                shard: self.name().to_string(),
                index,
                msg: "no such parameter slot".to_string(),
            }),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => self.operand.clone(),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        if self.op.bitwise() {
            if data.input_type.kind == ValueKind::Float || self.operand.kind() == ValueKind::Float {
                return Err(ComposeError::new("bitwise operators require integers"));
            }
            return Ok(TypeInfo::int());
        }
        if data.input_type.kind == ValueKind::Float || self.operand.kind() == ValueKind::Float {
            Ok(TypeInfo::float())
        } else {
            Ok(TypeInfo::int())
        }
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        self.apply(input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Is,
    IsNot,
    IsMore,
    IsLess,
    IsMoreEqual,
    IsLessEqual,
}

pub struct CompareShard {
    op: CompareOp,
    operand: Value,
}

impl CompareShard {
    pub fn new(op: CompareOp) -> CompareShard {
        CompareShard {
            op,
            operand: Value::None,
        }
    }
}

impl Shard for CompareShard {
    fn name(&self) -> &'static str {
        match self.op {
            CompareOp::Is => "Is",
            CompareOp::IsNot => "IsNot",
            CompareOp::IsMore => "IsMore",
            CompareOp::IsLess => "IsLess",
            CompareOp::IsMoreEqual => "IsMoreEqual",
            CompareOp::IsLessEqual => "IsLessEqual",
        }
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::bool_type()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new(
            "Operand",
            "Value compared against the input",
            vec![TypeInfo::any()],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match index {
            0 => {
                self.operand = value.clone();
                Ok(())
            }
            _ => Err(ParamError {
                shard: self.name().to_string(),
                index,
                msg: "no such parameter slot".to_string(),
            }),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => self.operand.clone(),
            _ => Value::None,
        }
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let result = match self.op {
            CompareOp::Is => input == &self.operand,
            CompareOp::IsNot => input != &self.operand,
            ordered => {
                let Some(ordering) = input.compare(&self.operand) else {
                    return Err(ActivationError::new(format!(
                        "cannot order {:?} against {:?}",
                        input.kind(),
                        self.operand.kind()
                    )));
                };
                match ordered {
                    CompareOp::IsMore => ordering == Ordering::Greater,
                    CompareOp::IsLess => ordering == Ordering::Less,
                    CompareOp::IsMoreEqual => ordering != Ordering::Less,
                    CompareOp::IsLessEqual => ordering != Ordering::Greater,
                    _ => unreachable!(),
                }
            }
        };
        Ok(Value::Bool(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireRef;

    fn ctx<'a>() -> Context<'a> {
        Context::new(WireRef::new("math-test"), None)
    }

    #[test]
    fn test_int_arithmetic() {
        let mut add = MathShard::new(MathOp::Add);
        add.set_param(0, &Value::Int(4)).unwrap();
        assert_eq!(add.activate(&mut ctx(), &Value::Int(3)).unwrap(), Value::Int(7));

        let mut div = MathShard::new(MathOp::Divide);
        div.set_param(0, &Value::Int(0)).unwrap();
        assert!(div.activate(&mut ctx(), &Value::Int(3)).is_err());
    }

    #[test]
    fn test_float_promotion() {
        let mut mul = MathShard::new(MathOp::Multiply);
        mul.set_param(0, &Value::Float(0.5)).unwrap();
        assert_eq!(
            mul.activate(&mut ctx(), &Value::Int(4)).unwrap(),
            Value::Float(2.0)
        );
    }

    #[test]
    fn test_bitwise_requires_ints() {
        let mut xor = MathShard::new(MathOp::Xor);
        xor.set_param(0, &Value::Int(0b1010)).unwrap();
        assert_eq!(
            xor.activate(&mut ctx(), &Value::Int(0b0110)).unwrap(),
            Value::Int(0b1100)
        );
        assert!(xor.activate(&mut ctx(), &Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_comparators() {
        let mut is = CompareShard::new(CompareOp::Is);
        is.set_param(0, &Value::Int(5)).unwrap();
        assert_eq!(is.activate(&mut ctx(), &Value::Int(5)).unwrap(), Value::Bool(true));
        assert_eq!(
            is.activate(&mut ctx(), &Value::Int(6)).unwrap(),
            Value::Bool(false)
        );

        let mut more = CompareShard::new(CompareOp::IsMore);
        more.set_param(0, &Value::Float(1.5)).unwrap();
        assert_eq!(
            more.activate(&mut ctx(), &Value::Int(2)).unwrap(),
            Value::Bool(true)
        );
        assert!(more.activate(&mut ctx(), &Value::Seq(vec![])).is_err());
    }

    #[test]
    fn test_compose_output_type() {
        let mut add = MathShard::new(MathOp::Add);
        add.set_param(0, &Value::Float(1.0)).unwrap();
        let mut data = InstanceData::default();
        data.input_type = TypeInfo::int();
        assert_eq!(add.compose(&data).unwrap().kind, ValueKind::Float);

        add.set_param(0, &Value::Int(1)).unwrap();
        assert_eq!(add.compose(&data).unwrap().kind, ValueKind::Int);
    }
}
