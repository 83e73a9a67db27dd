//! Core shards: constants, pass-throughs, variables and loops

use crate::context::{Context, FlowState, suspend};
use crate::error::{ActivationError, ComposeError, ParamError, WarmupError};
use crate::shard::{InstanceData, ParamInfo, Shard, ShardRef};
use crate::types::{ExposedInfo, TypeInfo, Types, derive_type_info};
use crate::value::{Value, clone_into};
use crate::variables::{VarCell, reference_variable, reference_wire_variable};
use crate::wire::run_shard_seq;

fn param_err(shard: &'static str, index: usize, msg: &str) -> ParamError {
    ParamError {
        shard: shard.to_string(),
        index,
        msg: msg.to_string(),
    }
}

/// Extract the shard list out of a ShardsSeq parameter value.
fn shards_param(value: &Value) -> Result<Vec<ShardRef>, String> {
    match value {
        Value::Seq(elems) => {
            let mut out = Vec::with_capacity(elems.len());
            for e in elems {
                match e {
                    Value::Shard(s) => out.push(s.clone()),
                    other => return Err(format!("expected shards, found {:?}", other.kind())),
                }
            }
            Ok(out)
        }
        Value::Shard(s) => Ok(vec![s.clone()]),
        other => Err(format!("expected a shard sequence, found {:?}", other.kind())),
    }
}

fn shards_to_value(shards: &[ShardRef]) -> Value {
    Value::Seq(shards.iter().cloned().map(Value::Shard).collect())
}

fn warmup_all(shards: &[ShardRef], ctx: &mut Context<'_>) -> Result<(), WarmupError> {
    for s in shards {
        s.with(|inst| inst.shard.warmup(ctx))?;
    }
    Ok(())
}

fn cleanup_all(shards: &[ShardRef]) {
    for s in shards.iter().rev() {
        s.with(|inst| inst.shard.cleanup());
    }
}

// ---------------------------------------------------------------------------
// Const / Pass / Input / Comment / Log / Pause
// ---------------------------------------------------------------------------

/// Emits its `Value` parameter, ignoring input.
#[derive(Default)]
pub struct ConstShard {
    value: Value,
}

impl Shard for ConstShard {
    fn name(&self) -> &'static str {
        "Const"
    }

    fn help(&self) -> &'static str {
        "Outputs its parameter value, ignoring input"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::none()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new("Value", "The value to output", vec![TypeInfo::any()])]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match index {
            0 => {
                self.value = value.clone();
                Ok(())
            }
            _ => Err(param_err("Const", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => self.value.clone(),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        Ok(derive_type_info(&self.value, data, None))
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, _input: &Value) -> Result<Value, ActivationError> {
        Ok(self.value.clone())
    }
}

/// Returns its input unchanged.
pub struct PassShard;

impl Shard for PassShard {
    fn name(&self) -> &'static str {
        "Pass"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        Ok(input.clone())
    }
}

/// Re-injects the wire's tick input, whatever came before.
pub struct InputShard;

impl Shard for InputShard {
    fn name(&self) -> &'static str {
        "Input"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::none()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn activate(&mut self, ctx: &mut Context<'_>, _input: &Value) -> Result<Value, ActivationError> {
        Ok(ctx.root_input.clone())
    }
}

/// Inert annotation; the runner noop-dispatches it.
#[derive(Default)]
pub struct CommentShard {
    text: String,
}

impl Shard for CommentShard {
    fn name(&self) -> &'static str {
        "Comment"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new("Text", "The comment text", vec![TypeInfo::string()])]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match (index, value) {
            (0, Value::String(s)) => {
                self.text = s.clone();
                Ok(())
            }
            (0, _) => Err(param_err("Comment", 0, "expected a string")),
            _ => Err(param_err("Comment", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::String(self.text.clone()),
            _ => Value::None,
        }
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        Ok(input.clone())
    }
}

/// Logs the flowing value and passes it through.
#[derive(Default)]
pub struct LogShard {
    prefix: String,
}

impl Shard for LogShard {
    fn name(&self) -> &'static str {
        "Log"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new("Prefix", "Message prefix", vec![TypeInfo::string()])]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match (index, value) {
            (0, Value::String(s)) => {
                self.prefix = s.clone();
                Ok(())
            }
            (0, _) => Err(param_err("Log", 0, "expected a string")),
            _ => Err(param_err("Log", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::String(self.prefix.clone()),
            _ => Value::None,
        }
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let wire = ctx.current_wire().name().to_string();
        if self.prefix.is_empty() {
            tracing::info!(wire = %wire, "{}", input);
        } else {
            tracing::info!(wire = %wire, "{}: {}", self.prefix, input);
        }
        Ok(input.clone())
    }
}

/// Cooperatively sleeps for `Time` seconds, passing the input through.
#[derive(Default)]
pub struct PauseShard {
    seconds: f64,
}

impl Shard for PauseShard {
    fn name(&self) -> &'static str {
        "Pause"
    }

    fn help(&self) -> &'static str {
        "Suspends the wire; 0 yields once to the scheduler"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new(
            "Time",
            "Seconds to sleep",
            vec![TypeInfo::float(), TypeInfo::int()],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match (index, value) {
            (0, Value::Float(f)) => {
                self.seconds = *f;
                Ok(())
            }
            (0, Value::Int(i)) => {
                self.seconds = *i as f64;
                Ok(())
            }
            (0, _) => Err(param_err("Pause", 0, "expected seconds")),
            _ => Err(param_err("Pause", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::Float(self.seconds),
            _ => Value::None,
        }
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        suspend(ctx, self.seconds)?;
        Ok(input.clone())
    }
}

// ---------------------------------------------------------------------------
// Variable shards
// ---------------------------------------------------------------------------

fn name_param_types() -> Types {
    vec![TypeInfo::string(), TypeInfo::context_var()]
}

fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) | Value::ContextVar(s) => Some(s.clone()),
        _ => None,
    }
}

/// `Set` (mutable) and `Ref` (immutable binding) share one implementation;
/// the composer enforces the Set/Ref coherence rules by shard name.
pub struct SetShard {
    as_ref: bool,
    var_name: String,
    global: bool,
    exposed_type: TypeInfo,
    cell: Option<VarCell>,
}

impl SetShard {
    pub fn new(as_ref: bool) -> SetShard {
        SetShard {
            as_ref,
            var_name: String::new(),
            global: false,
            exposed_type: TypeInfo::any(),
            cell: None,
        }
    }
}

impl Shard for SetShard {
    fn name(&self) -> &'static str {
        if self.as_ref { "Ref" } else { "Set" }
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![
            ParamInfo::new("Name", "The variable name", name_param_types()),
            ParamInfo::new(
                "Global",
                "Store in the mesh's shared table",
                vec![TypeInfo::bool_type()],
            ),
        ]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match index {
            0 => match string_of(value) {
                Some(s) => {
                    self.var_name = s;
                    Ok(())
                }
                None => Err(param_err(if self.as_ref { "Ref" } else { "Set" }, 0, "expected a name")),
            },
            1 => match value {
                Value::Bool(b) => {
                    self.global = *b;
                    Ok(())
                }
                _ => Err(param_err(if self.as_ref { "Ref" } else { "Set" }, 1, "expected a bool")),
            },
            _ => Err(param_err(
                if self.as_ref { "Ref" } else { "Set" },
                index,
                "no such parameter slot",
            )),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::String(self.var_name.clone()),
            1 => Value::Bool(self.global),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        if self.var_name.is_empty() {
            return Err(ComposeError::new("variable name parameter is required"));
        }
        // Expose the actual inferred input type, pass the input through
        self.exposed_type = data.input_type.clone();
        Ok(data.input_type.clone())
    }

    fn exposed_variables(&self) -> Vec<ExposedInfo> {
        if self.var_name.is_empty() {
            return Vec::new();
        }
        let mut info = ExposedInfo::variable(
            self.var_name.clone(),
            self.exposed_type.clone(),
            !self.as_ref,
        );
        info.global = self.global;
        vec![info]
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        let cell = if self.global {
            match ctx.mesh() {
                Some(mesh) => mesh.get_or_create_shared(&self.var_name),
                None => return Err(WarmupError::new("global variable outside a mesh")),
            }
        } else {
            reference_wire_variable(ctx.current_wire(), &self.var_name)
        };
        self.cell = Some(cell);
        Ok(())
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let cell = self
            .cell
            .as_ref()
            .ok_or_else(|| ActivationError::new("variable cell not warmed up"))?;
        cell.with_value(|v| clone_into(v, input));
        Ok(input.clone())
    }

    fn cleanup(&mut self) {
        self.cell = None;
    }
}

/// Reads a variable, with an optional default when unset.
#[derive(Default)]
pub struct GetShard {
    var_name: String,
    global: bool,
    default: Value,
    cell: Option<VarCell>,
}

impl Shard for GetShard {
    fn name(&self) -> &'static str {
        "Get"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::none(), TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![
            ParamInfo::new("Name", "The variable name", name_param_types()),
            ParamInfo::new(
                "Default",
                "Value when the variable is unset",
                vec![TypeInfo::any()],
            ),
            ParamInfo::new(
                "Global",
                "Read from the mesh's shared table",
                vec![TypeInfo::bool_type()],
            ),
        ]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match index {
            0 => match string_of(value) {
                Some(s) => {
                    self.var_name = s;
                    Ok(())
                }
                None => Err(param_err("Get", 0, "expected a name")),
            },
            1 => {
                self.default = value.clone();
                Ok(())
            }
            2 => match value {
                Value::Bool(b) => {
                    self.global = *b;
                    Ok(())
                }
                _ => Err(param_err("Get", 2, "expected a bool")),
            },
            _ => Err(param_err("Get", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::String(self.var_name.clone()),
            1 => self.default.clone(),
            2 => Value::Bool(self.global),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        if self.var_name.is_empty() {
            return Err(ComposeError::new("variable name parameter is required"));
        }
        for info in &data.shared {
            if info.name == self.var_name {
                return Ok(info.ti.clone());
            }
        }
        if self.default != Value::None {
            return Ok(derive_type_info(&self.default, data, None));
        }
        // Unknown at compose time; the variable may be bound late
        Ok(TypeInfo::any())
    }

    fn required_variables(&self) -> Vec<ExposedInfo> {
        if self.var_name.is_empty() {
            return Vec::new();
        }
        vec![ExposedInfo::variable(
            self.var_name.clone(),
            TypeInfo::any(),
            false,
        )]
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        let cell = if self.global {
            match ctx.mesh() {
                Some(mesh) => mesh.get_or_create_shared(&self.var_name),
                None => return Err(WarmupError::new("global variable outside a mesh")),
            }
        } else {
            reference_variable(ctx, &self.var_name)
        };
        self.cell = Some(cell);
        Ok(())
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, _input: &Value) -> Result<Value, ActivationError> {
        let cell = self
            .cell
            .as_ref()
            .ok_or_else(|| ActivationError::new("variable cell not warmed up"))?;
        let value = cell.get();
        if value == Value::None && self.default != Value::None {
            return Ok(self.default.clone());
        }
        Ok(value)
    }

    fn cleanup(&mut self) {
        self.cell = None;
    }
}

/// Overwrites an existing mutable variable in place.
#[derive(Default)]
pub struct UpdateShard {
    var_name: String,
    cell: Option<VarCell>,
}

impl Shard for UpdateShard {
    fn name(&self) -> &'static str {
        "Update"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new("Name", "The variable name", name_param_types())]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match index {
            0 => match string_of(value) {
                Some(s) => {
                    self.var_name = s;
                    Ok(())
                }
                None => Err(param_err("Update", 0, "expected a name")),
            },
            _ => Err(param_err("Update", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::String(self.var_name.clone()),
            _ => Value::None,
        }
    }

    fn required_variables(&self) -> Vec<ExposedInfo> {
        if self.var_name.is_empty() {
            return Vec::new();
        }
        vec![ExposedInfo::variable(
            self.var_name.clone(),
            TypeInfo::any(),
            true,
        )]
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        self.cell = Some(reference_variable(ctx, &self.var_name));
        Ok(())
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let cell = self
            .cell
            .as_ref()
            .ok_or_else(|| ActivationError::new("variable cell not warmed up"))?;
        cell.with_value(|v| clone_into(v, input));
        Ok(input.clone())
    }

    fn cleanup(&mut self) {
        self.cell = None;
    }
}

/// Appends the input to a sequence variable, creating it on first push.
#[derive(Default)]
pub struct PushShard {
    var_name: String,
    cell: Option<VarCell>,
}

impl Shard for PushShard {
    fn name(&self) -> &'static str {
        "Push"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new("Name", "The sequence variable", name_param_types())]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match index {
            0 => match string_of(value) {
                Some(s) => {
                    self.var_name = s;
                    Ok(())
                }
                None => Err(param_err("Push", 0, "expected a name")),
            },
            _ => Err(param_err("Push", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::String(self.var_name.clone()),
            _ => Value::None,
        }
    }

    fn exposed_variables(&self) -> Vec<ExposedInfo> {
        if self.var_name.is_empty() {
            return Vec::new();
        }
        vec![ExposedInfo::variable(
            self.var_name.clone(),
            TypeInfo::any_seq(),
            true,
        )]
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        self.cell = Some(reference_variable(ctx, &self.var_name));
        Ok(())
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let cell = self
            .cell
            .as_ref()
            .ok_or_else(|| ActivationError::new("variable cell not warmed up"))?;
        cell.with_value(|v| match v {
            Value::Seq(elems) => elems.push(input.clone()),
            slot => *slot = Value::Seq(vec![input.clone()]),
        });
        Ok(input.clone())
    }

    fn cleanup(&mut self) {
        self.cell = None;
    }
}

/// Swaps the values of two variables; the input flows through untouched.
#[derive(Default)]
pub struct SwapShard {
    first: String,
    second: String,
    first_cell: Option<VarCell>,
    second_cell: Option<VarCell>,
}

impl Shard for SwapShard {
    fn name(&self) -> &'static str {
        "Swap"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![
            ParamInfo::new("First", "First variable", name_param_types()),
            ParamInfo::new("Second", "Second variable", name_param_types()),
        ]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        let name = string_of(value).ok_or_else(|| param_err("Swap", index, "expected a name"))?;
        match index {
            0 => {
                self.first = name;
                Ok(())
            }
            1 => {
                self.second = name;
                Ok(())
            }
            _ => Err(param_err("Swap", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::String(self.first.clone()),
            1 => Value::String(self.second.clone()),
            _ => Value::None,
        }
    }

    fn required_variables(&self) -> Vec<ExposedInfo> {
        let mut out = Vec::new();
        if !self.first.is_empty() {
            out.push(ExposedInfo::variable(self.first.clone(), TypeInfo::any(), true));
        }
        if !self.second.is_empty() {
            out.push(ExposedInfo::variable(self.second.clone(), TypeInfo::any(), true));
        }
        out
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        self.first_cell = Some(reference_variable(ctx, &self.first));
        self.second_cell = Some(reference_variable(ctx, &self.second));
        Ok(())
    }

    fn activate(&mut self, _ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let (a, b) = match (&self.first_cell, &self.second_cell) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(ActivationError::new("variable cells not warmed up")),
        };
        let tmp = a.get();
        a.set(b.get());
        b.set(tmp);
        Ok(input.clone())
    }

    fn cleanup(&mut self) {
        self.first_cell = None;
        self.second_cell = None;
    }
}

// ---------------------------------------------------------------------------
// Once / Repeat / ForRange
// ---------------------------------------------------------------------------

/// Runs its body exactly once per wire lifecycle, then passes through.
#[derive(Default)]
pub struct OnceShard {
    body: Vec<ShardRef>,
    done: bool,
}

impl Shard for OnceShard {
    fn name(&self) -> &'static str {
        "Once"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![ParamInfo::new(
            "Action",
            "Shards to run once",
            vec![TypeInfo::shard_seq(), TypeInfo::shard()],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match index {
            0 => {
                self.body = shards_param(value).map_err(|msg| param_err("Once", 0, &msg))?;
                Ok(())
            }
            _ => Err(param_err("Once", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => shards_to_value(&self.body),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        crate::compose::compose_shards(&self.body, data, None)?;
        // Pass-through regardless of what the body computes
        Ok(data.input_type.clone())
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        self.done = false;
        warmup_all(&self.body, ctx)
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        if !self.done {
            self.done = true;
            run_shard_seq(ctx, &self.body, input, true)?;
        }
        Ok(input.clone())
    }

    fn cleanup(&mut self) {
        cleanup_all(&self.body);
        self.done = false;
    }
}

/// Runs its body `Times` times per activation (or forever), passing the
/// original input through.
#[derive(Default)]
pub struct RepeatShard {
    body: Vec<ShardRef>,
    times: i64,
    forever: bool,
}

impl Shard for RepeatShard {
    fn name(&self) -> &'static str {
        "Repeat"
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
                "Action",
                "Shards to repeat",
                vec![TypeInfo::shard_seq(), TypeInfo::shard()],
            ),
            ParamInfo::new("Times", "Iteration count", vec![TypeInfo::int()]),
            ParamInfo::new(
                "Forever",
                "Repeat until the flow stops",
                vec![TypeInfo::bool_type()],
            ),
        ]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match (index, value) {
            (0, v) => {
                self.body = shards_param(v).map_err(|msg| param_err("Repeat", 0, &msg))?;
                Ok(())
            }
            (1, Value::Int(n)) => {
                self.times = *n;
                Ok(())
            }
            (1, _) => Err(param_err("Repeat", 1, "expected an integer")),
            (2, Value::Bool(b)) => {
                self.forever = *b;
                Ok(())
            }
            (2, _) => Err(param_err("Repeat", 2, "expected a bool")),
            _ => Err(param_err("Repeat", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => shards_to_value(&self.body),
            1 => Value::Int(self.times),
            2 => Value::Bool(self.forever),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        crate::compose::compose_shards(&self.body, data, None)?;
        Ok(data.input_type.clone())
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        warmup_all(&self.body, ctx)
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        let mut remaining = self.times;
        loop {
            if !self.forever {
                if remaining <= 0 {
                    break;
                }
                remaining -= 1;
            }
            let outcome = run_shard_seq(ctx, &self.body, input, true)?;
            match outcome.state {
                FlowState::Continue => {}
                // Return exits the repeat; Stop/Restart bubble to the wire
                // runner via ctx.flow
                _ => break,
            }
        }
        Ok(input.clone())
    }

    fn cleanup(&mut self) {
        cleanup_all(&self.body);
    }
}

/// Feeds every integer in `[From, To]` through its body.
#[derive(Default)]
pub struct ForRangeShard {
    from: i64,
    to: i64,
    body: Vec<ShardRef>,
}

impl Shard for ForRangeShard {
    fn name(&self) -> &'static str {
        "ForRange"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn parameters(&self) -> Vec<ParamInfo> {
        vec![
            ParamInfo::new("From", "First index", vec![TypeInfo::int()]),
            ParamInfo::new("To", "Last index, inclusive", vec![TypeInfo::int()]),
            ParamInfo::new(
                "Action",
                "Shards receiving each index",
                vec![TypeInfo::shard_seq(), TypeInfo::shard()],
            ),
        ]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> Result<(), ParamError> {
        match (index, value) {
            (0, Value::Int(n)) => {
                self.from = *n;
                Ok(())
            }
            (1, Value::Int(n)) => {
                self.to = *n;
                Ok(())
            }
            (2, v) => {
                self.body = shards_param(v).map_err(|msg| param_err("ForRange", 2, &msg))?;
                Ok(())
            }
            (0, _) | (1, _) => Err(param_err("ForRange", index, "expected an integer")),
            _ => Err(param_err("ForRange", index, "no such parameter slot")),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => Value::Int(self.from),
            1 => Value::Int(self.to),
            2 => shards_to_value(&self.body),
            _ => Value::None,
        }
    }

    fn has_compose(&self) -> bool {
        true
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        let mut body_data = data.clone();
        body_data.input_type = TypeInfo::int();
        crate::compose::compose_shards(&self.body, &body_data, None)?;
        Ok(data.input_type.clone())
    }

    fn warmup(&mut self, ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        warmup_all(&self.body, ctx)
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError> {
        for i in self.from..=self.to {
            let outcome = run_shard_seq(ctx, &self.body, &Value::Int(i), true)?;
            match outcome.state {
                FlowState::Continue => {}
                FlowState::Return => break,
                _ => break,
            }
        }
        Ok(input.clone())
    }

    fn cleanup(&mut self) {
        cleanup_all(&self.body);
    }
}
