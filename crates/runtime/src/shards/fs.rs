//! Filesystem shards, bridged through the blocking-work pool
//!
//! The mesh thread never touches the OS directly: reads run on pool workers
//! while the wire cooperatively suspends. These shards double as the
//! reference usage of `run_blocking`.

use crate::context::Context;
use crate::error::{ActivationError, ComposeError, ParamError};
use crate::pool::run_blocking;
use crate::shard::{InstanceData, ParamInfo, Shard};
use crate::types::{TypeInfo, Types};
use crate::value::Value;

/// Reads a file named by the input, as text or raw bytes.
#[derive(Default)]
pub struct FsReadShard {
    as_bytes: bool,
}

impl Shard for FsReadShard {
    fn name(&self) -> &'static str {
        "FS.Read"
    }

    fn help(&self) -> &'static str {
        "Reads the file at the input path on the work pool"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::string(), TypeInfo::path()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::string(), TypeInfo::bytes()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new(
            "Bytes",
            "Return raw bytes instead of text",
            vec![TypeInfo::bool_type()],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match (index, value) {
            (0, Value::Bool(b)) => {
                self.as_bytes = *b;
                Ok(())
            }
            (0, _) => Err(ParamError {
                shard: "FS.Read".to_string(),
                index: 0,
                msg: "expected a bool".to_string(),
            }),
            _ => Err(ParamError {
                shard: "FS.Read".to_string(),
                index,
                msg: "no such parameter slot".to_string(),
            }),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::Bool(self.as_bytes),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, _data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        Ok(if self.as_bytes {
            TypeInfo::bytes()
        } else {
            TypeInfo::string()
        })
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let path = match input {
            Value::String(s) | Value::Path(s) => s.clone(),
            other => {
                return Err(ActivationError::new(format!(
                    "FS.Read expects a path, found {:?}",
                    other.kind()
                )));
            }
        };
        if self.as_bytes {
            let bytes = run_blocking(
                ctx,
                move || std::fs::read(&path).map_err(|e| format!("{}: {}", path, e)),
                None::<fn()>,
            )?;
            Ok(Value::Bytes(bytes))
        } else {
            let text = run_blocking(
                ctx,
                move || std::fs::read_to_string(&path).map_err(|e| format!("{}: {}", path, e)),
                None::<fn()>,
            )?;
            Ok(Value::String(text))
        }
    }
}
