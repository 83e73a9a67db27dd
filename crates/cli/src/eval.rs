//! Evaluator: turns read forms into wires and drives the mesh
//!
//! Special forms:
//!
//! - `(wire "name" :looped :unsafe :pure :LStack <shard-form>*)` builds a wire
//! - `(shards <shard-form>*)` builds a shard-sequence value (body parameters)
//! - `(schedule <wire> [input])`, `(tick)`, `(run)` drive the session mesh
//! - `(def name <expr>)` binds a value, `(load-file "path")` evaluates a file
//! - `(save-wire <wire> "path")` / `(load-wire "path")` use the binary codec
//!
//! Any other list form `(Name arg...)` constructs the registered shard `Name`
//! with positional parameters.

use crate::config::WeftConfig;
use crate::reader::{Form, read_all};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use weft_runtime::mesh::{self, Mesh};
use weft_runtime::serialize::{decode_wire, encode_wire};
use weft_runtime::shard::create_shard;
use weft_runtime::value::Value;
use weft_runtime::wire::{LARGE_STACK_SIZE, WireRef};

#[derive(Debug, Clone, PartialEq)]
pub struct EvalError(pub String);

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eval error: {}", self.0)
    }
}

impl std::error::Error for EvalError {}

fn err(msg: impl Into<String>) -> EvalError {
    EvalError(msg.into())
}

/// One evaluation session: a mesh, the user's bindings, the config.
pub struct Env {
    mesh: Mesh,
    defs: HashMap<String, Value>,
    config: WeftConfig,
}

impl Env {
    pub fn new(config: WeftConfig) -> Env {
        Env {
            mesh: Mesh::new(),
            defs: HashMap::new(),
            config,
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Bind a value under `name`, as `def` would.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.defs.insert(name.into(), value);
    }

    /// Evaluate every form in `src`, returning the last result.
    pub fn eval_str(&mut self, src: &str) -> Result<Value, EvalError> {
        let forms = read_all(src).map_err(|e| err(e.to_string()))?;
        let mut last = Value::None;
        for form in &forms {
            last = self.eval(form)?;
        }
        Ok(last)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<Value, EvalError> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| err(format!("{}: {}", path.display(), e)))?;
        self.eval_str(&src)
    }

    pub fn eval(&mut self, form: &Form) -> Result<Value, EvalError> {
        match form {
            Form::Int(i) => Ok(Value::Int(*i)),
            Form::Float(f) => Ok(Value::Float(*f)),
            Form::Str(s) => Ok(Value::String(s.clone())),
            Form::Bool(b) => Ok(Value::Bool(*b)),
            Form::Nil => Ok(Value::None),
            Form::Keyword(k) => Err(err(format!("keyword :{} outside a wire form", k))),
            Form::Symbol(s) => self
                .defs
                .get(s)
                .cloned()
                .ok_or_else(|| err(format!("unbound symbol: {}", s))),
            Form::List(items) => self.eval_list(items),
        }
    }

    fn eval_list(&mut self, items: &[Form]) -> Result<Value, EvalError> {
        let Some(Form::Symbol(head)) = items.first() else {
            return Err(err("expected a symbol at the head of a list"));
        };
        match head.as_str() {
            "wire" => self.eval_wire(&items[1..]),
            "shards" => {
                let mut out = Vec::with_capacity(items.len() - 1);
                for form in &items[1..] {
                    out.push(self.eval_shard_form(form)?);
                }
                Ok(Value::Seq(out))
            }
            "def" => {
                let (name, expr) = match &items[1..] {
                    [Form::Symbol(name), expr] => (name.clone(), expr),
                    _ => return Err(err("def expects (def name expr)")),
                };
                let value = self.eval(expr)?;
                self.defs.insert(name, value.clone());
                Ok(value)
            }
            "schedule" => {
                let wire = match items.get(1) {
                    Some(form) => self.eval_wire_value(form)?,
                    None => return Err(err("schedule expects a wire")),
                };
                let input = match items.get(2) {
                    Some(form) => self.eval(form)?,
                    None => Value::None,
                };
                let mut cb = |shard: &str, msg: &str, warning: bool| {
                    if warning {
                        tracing::warn!(shard = %shard, "{}", msg);
                    } else {
                        tracing::error!(shard = %shard, "{}", msg);
                    }
                };
                self.mesh
                    .schedule_with_callback(wire, input, true, Some(&mut cb))
                    .map_err(|e| err(e.to_string()))?;
                Ok(Value::None)
            }
            "tick" => Ok(Value::Bool(self.mesh.tick())),
            "run" => {
                let interval = self.config.tick_interval().as_secs_f64();
                loop {
                    let ok = self.mesh.tick();
                    if !ok {
                        let errors = self.mesh.errors().join("; ");
                        self.mesh.clear_errors();
                        return Err(err(format!("wire failed: {}", errors)));
                    }
                    if self.mesh.is_empty() {
                        return Ok(Value::None);
                    }
                    mesh::sleep(interval, true);
                }
            }
            "load-file" => {
                let path = match &items[1..] {
                    [Form::Str(path)] => path.clone(),
                    _ => return Err(err("load-file expects a path string")),
                };
                self.load_file(Path::new(&path))
            }
            "save-wire" => {
                let (wire_form, path) = match &items[1..] {
                    [wire_form, Form::Str(path)] => (wire_form, path.clone()),
                    _ => return Err(err("save-wire expects (save-wire wire \"path\")")),
                };
                let wire = self.eval_wire_value(wire_form)?;
                let bytes = encode_wire(&wire).map_err(|e| err(e.to_string()))?;
                std::fs::write(&path, bytes).map_err(|e| err(format!("{}: {}", path, e)))?;
                Ok(Value::None)
            }
            "load-wire" => {
                let path = match &items[1..] {
                    [Form::Str(path)] => path.clone(),
                    _ => return Err(err("load-wire expects a path string")),
                };
                let bytes =
                    std::fs::read(&path).map_err(|e| err(format!("{}: {}", path, e)))?;
                let wire = decode_wire(&bytes).map_err(|e| err(e.to_string()))?;
                Ok(Value::Wire(wire))
            }
            _ => self.eval_shard_form(&Form::List(items.to_vec())),
        }
    }

    fn eval_wire_value(&mut self, form: &Form) -> Result<WireRef, EvalError> {
        match self.eval(form)? {
            Value::Wire(w) => Ok(w),
            other => Err(err(format!("expected a wire, found {}", other))),
        }
    }

    fn eval_wire(&mut self, items: &[Form]) -> Result<Value, EvalError> {
        let Some(Form::Str(name)) = items.first() else {
            return Err(err("wire expects a name string first"));
        };
        let wire = WireRef::new(name.clone());
        if let Some(size) = self.config.stack_size {
            wire.set_stack_size(size);
        }
        for form in &items[1..] {
            match form {
                Form::Keyword(flag) => match flag.as_str() {
                    "looped" => wire.set_looped(true),
                    "unsafe" => wire.set_unsafe(true),
                    "pure" => wire.set_pure(true),
                    "LStack" => wire.set_stack_size(LARGE_STACK_SIZE),
                    other => return Err(err(format!("unknown wire flag :{}", other))),
                },
                shard_form => {
                    let shard = match self.eval_shard_form(shard_form)? {
                        Value::Shard(s) => s,
                        other => {
                            return Err(err(format!("expected a shard form, found {}", other)));
                        }
                    };
                    wire.add_shard(shard).map_err(|e| err(e.to_string()))?;
                }
            }
        }
        Ok(Value::Wire(wire))
    }

    /// `(Name arg...)` constructs shard `Name` with positional parameters.
    fn eval_shard_form(&mut self, form: &Form) -> Result<Value, EvalError> {
        let items = match form {
            Form::List(items) => items,
            other => return Err(err(format!("expected a shard form, found {}", other))),
        };
        let Some(Form::Symbol(name)) = items.first() else {
            return Err(err("shard form expects a shard name"));
        };
        let shard = create_shard(name).map_err(|e| err(e.to_string()))?;
        for (i, arg) in items[1..].iter().enumerate() {
            let value = self.eval(arg)?;
            shard
                .set_param(i, &value)
                .map_err(|e| err(e.to_string()))?;
        }
        Ok(Value::Shard(shard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Env {
        Env::new(WeftConfig {
            tick_ms: Some(0),
            ..WeftConfig::default()
        })
    }

    #[test]
    fn test_literals() {
        let mut e = env();
        assert_eq!(e.eval_str("42").unwrap(), Value::Int(42));
        assert_eq!(e.eval_str("\"hi\"").unwrap(), Value::String("hi".into()));
        assert_eq!(e.eval_str("nil").unwrap(), Value::None);
    }

    #[test]
    fn test_def_and_lookup() {
        let mut e = env();
        e.eval_str("(def x 7)").unwrap();
        assert_eq!(e.eval_str("x").unwrap(), Value::Int(7));
        assert!(e.eval_str("y").is_err());
    }

    #[test]
    fn test_wire_form_builds_a_wire() {
        let mut e = env();
        let v = e
            .eval_str("(wire \"w\" :looped (Const 42) (Pass))")
            .unwrap();
        match v {
            Value::Wire(w) => {
                assert_eq!(w.name(), "w");
                assert_eq!(w.shards().len(), 2);
                assert!(w.with_body(|b| b.looped).unwrap());
            }
            other => panic!("expected wire, got {}", other),
        }
    }

    #[test]
    fn test_schedule_and_run() {
        let mut e = env();
        e.eval_str("(def w (wire \"adder\" (Const 3) (Math.Add 4)))")
            .unwrap();
        e.eval_str("(schedule w)").unwrap();
        e.eval_str("(run)").unwrap();
        let wire = match e.defs.get("w").unwrap() {
            Value::Wire(w) => w.clone(),
            _ => unreachable!(),
        };
        assert_eq!(wire.finished_output(), Value::Int(7));
    }

    #[test]
    fn test_failed_wire_surfaces_in_run() {
        let mut e = env();
        e.eval_str("(schedule (wire \"boom\" (Fail \"kaput\")))")
            .unwrap();
        let result = e.eval_str("(run)");
        assert!(result.unwrap_err().0.contains("kaput"));
    }

    #[test]
    fn test_unknown_shard_is_an_error() {
        let mut e = env();
        assert!(e.eval_str("(wire \"w\" (NoSuchShard))").is_err());
    }

    #[test]
    fn test_save_and_load_wire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.weft");
        let mut e = env();
        e.eval_str(&format!(
            "(save-wire (wire \"saved\" (Const 1) (Math.Add 1)) {:?})",
            path.to_str().unwrap()
        ))
        .unwrap();
        let v = e
            .eval_str(&format!("(load-wire {:?})", path.to_str().unwrap()))
            .unwrap();
        match v {
            Value::Wire(w) => {
                assert_eq!(w.name(), "saved");
                assert_eq!(w.shards().len(), 2);
            }
            other => panic!("expected wire, got {}", other),
        }
    }

    #[test]
    fn test_shards_body_parameter() {
        let mut e = env();
        // A loop body updating a counter
        e.eval_str(
            "(def w (wire \"count\" (Const 0) (Set \"i\") \
             (Repeat (shards (Get \"i\") (Math.Add 1) (Update \"i\")) 5)))",
        )
        .unwrap();
        e.eval_str("(schedule w)").unwrap();
        e.eval_str("(run)").unwrap();
    }
}
