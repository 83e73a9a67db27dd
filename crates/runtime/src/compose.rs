//! Compose: static type inference and variable-scope checking
//!
//! Composing walks a shard sequence once, threading the inferred output type
//! of each shard into the input check of the next, collecting exposed and
//! required variables, and annotating shards with their inline-dispatch ids.
//! Compose is pure with respect to the shard list: it only fills derived
//! fields (inline id, cached const, resolved output type, wire io types).
//! Running it twice produces the same result.
//!
//! ## Specials
//!
//! Three shards are special-cased by name, mirroring their runtime behavior:
//! `Input` replaces the inferred type with the wire's declared input; `And`
//! and `Or` reset it to the original input (they short-circuit, they do not
//! transform).
//!
//! ## Diagnostics
//!
//! All findings flow through the caller's callback as (shard, message,
//! warning) triples. Warnings are advisory; any non-warning finding makes the
//! pass fail after the walk completes, so one compose reports every error.

use crate::error::ComposeError;
use crate::shard::{InlineShard, InstanceData, ShardRef};
use crate::types::{ExposedInfo, TypeInfo, derive_type_info, match_types};
use crate::value::ValueKind;
use crate::wire::WireRef;
use std::collections::{HashMap, HashSet};

/// Diagnostic sink: (shard name, message, warning-only).
pub type ComposeCallback<'a> = &'a mut dyn FnMut(&str, &str, bool);

/// What a compose pass found out.
#[derive(Debug, Clone, Default)]
pub struct ComposeResult {
    pub output_type: TypeInfo,
    pub exposed: Vec<ExposedInfo>,
    pub required: Vec<ExposedInfo>,
    /// The sequence ends in Restart/Stop/Return/Fail; its output never flows
    pub flow_stopper: bool,
}

struct ComposeCtx<'a, 'b> {
    original_input: TypeInfo,
    prev: TypeInfo,
    wire: Option<WireRef>,
    on_worker_thread: bool,
    exposed: Vec<ExposedInfo>,
    inherited: Vec<ExposedInfo>,
    required: Vec<ExposedInfo>,
    /// Names introduced by Set (managed storage)
    variables: HashSet<String>,
    /// Names introduced by Ref (borrowed storage)
    references: HashSet<String>,
    callback: Option<&'b mut ComposeCallback<'a>>,
    failed: Option<String>,
}

impl ComposeCtx<'_, '_> {
    fn report(&mut self, shard: &str, msg: &str, warning: bool) {
        if let Some(cb) = self.callback.as_deref_mut() {
            cb(shard, msg, warning);
        }
        if !warning && self.failed.is_none() {
            self.failed = Some(format!("{}: {}", shard, msg));
        }
    }

    fn visible(&self) -> Vec<ExposedInfo> {
        let mut all = self.exposed.clone();
        all.extend(self.inherited.iter().cloned());
        all
    }
}

/// Compose a bare shard sequence under the given instance data.
pub fn compose_shards(
    shards: &[ShardRef],
    data: &InstanceData,
    mut callback: Option<ComposeCallback<'_>>,
) -> Result<ComposeResult, ComposeError> {
    let mut ctx = ComposeCtx {
        original_input: data.input_type.clone(),
        prev: data.input_type.clone(),
        wire: data.wire.clone(),
        on_worker_thread: data.on_worker_thread,
        exposed: Vec::new(),
        inherited: data.shared.clone(),
        required: Vec::new(),
        variables: HashSet::new(),
        references: HashSet::new(),
        callback: callback.as_mut(),
        failed: None,
    };

    // External wire variables are visible as mutable inherited entries
    if let Some(wire) = &ctx.wire {
        let externals = wire.externals_snapshot();
        let empty = InstanceData::default();
        for (name, value) in externals {
            let ti = derive_type_info(&value, &empty, None);
            ctx.inherited.push(ExposedInfo {
                name,
                help: String::new(),
                ti,
                mutable: true,
                global: false,
            });
        }
    }

    for shard in shards {
        let name = shard.name();
        match name.as_str() {
            // Hard-coded behavior so the follow-up validates against the
            // actual wire input
            "Input" => {
                ctx.prev = ctx
                    .wire
                    .as_ref()
                    .and_then(|w| w.with_body(|b| b.input_type.clone()))
                    .unwrap_or_else(|| ctx.original_input.clone());
            }
            "And" | "Or" => {
                ctx.prev = ctx.original_input.clone();
            }
            _ => validate_connection(&mut ctx, shard)?,
        }
        // Annotate the instance either way: dispatch id and, for Const, the
        // pre-cloned parameter
        shard.with(|inst| {
            inst.inline = InlineShard::for_name(inst.shard.name());
            if inst.inline == InlineShard::CoreConst {
                inst.cached_const = Some(inst.shard.get_param(0));
            }
            inst.output_type = ctx.prev.clone();
        });
    }

    if let Some(msg) = ctx.failed {
        return Err(ComposeError::new(msg));
    }

    let flow_stopper = shards
        .last()
        .map(|s| matches!(s.name().as_str(), "Restart" | "Stop" | "Return" | "Fail"))
        .unwrap_or(false);

    Ok(ComposeResult {
        output_type: ctx.prev,
        exposed: ctx.exposed,
        required: ctx.required,
        flow_stopper,
    })
}

/// Compose a wire: settle its declared input type, compose the shards, and
/// record the derived io types and required variables on the body.
pub fn compose_wire(
    wire: &WireRef,
    data: &InstanceData,
    callback: Option<ComposeCallback<'_>>,
) -> Result<ComposeResult, ComposeError> {
    let shards = wire.shards();
    if wire.with_body(|_| ()).is_none() {
        return Err(ComposeError::new(format!(
            "wire {} is running and cannot be composed",
            wire.name()
        )));
    }

    // A wire whose first shard only accepts None (and that never reads Input)
    // has a None input; everything else adopts the instance data's input
    let has_input_shard = shards.iter().any(|s| s.name() == "Input");
    let input_type = if !shards.is_empty() && !has_input_shard {
        let first_inputs = shards[0].with(|inst| inst.shard.input_types());
        if first_inputs.len() == 1 && first_inputs[0].kind == ValueKind::None {
            TypeInfo::none()
        } else {
            data.input_type.clone()
        }
    } else {
        data.input_type.clone()
    };
    wire.with_body(|b| b.input_type = input_type.clone());

    let mut child = data.clone();
    child.input_type = input_type;
    child.wire = Some(wire.clone());

    let result = compose_shards(&shards, &child, callback)?;

    wire.with_body(|b| {
        b.output_type = result.output_type.clone();
        b.required = result.required.clone();
        b.composed = true;
    });
    Ok(result)
}

fn validate_connection(ctx: &mut ComposeCtx<'_, '_>, shard: &ShardRef) -> Result<(), ComposeError> {
    let name = shard.name();
    let (input_types, output_types, has_compose) = shard.with(|inst| {
        (
            inst.shard.input_types(),
            inst.shard.output_types(),
            inst.shard.has_compose(),
        )
    });

    // Input check. A lone None input means "also accepts absence" and always
    // passes.
    let input_matches = if input_types.len() == 1 && input_types[0].kind == ValueKind::None {
        true
    } else {
        input_types
            .iter()
            .any(|ti| match_types(&ctx.prev, ti, false, true))
    };
    if !input_matches {
        let msg = format!(
            "could not find a matching input type, expected one of {:?}, found {:?}",
            input_types.iter().map(|t| t.kind).collect::<Vec<_>>(),
            ctx.prev.kind
        );
        ctx.report(&name, &msg, false);
    }

    // Output inference
    if has_compose {
        let data = InstanceData {
            input_type: ctx.prev.clone(),
            shared: ctx.visible(),
            wire: ctx.wire.clone(),
            on_worker_thread: ctx.on_worker_thread,
        };
        match shard.with(|inst| inst.shard.compose(&data)) {
            Ok(out) => ctx.prev = out,
            Err(e) => ctx.report(&name, &e.msg, false),
        }
    } else if output_types.len() == 1 {
        if output_types[0].kind != ValueKind::Any {
            ctx.prev = output_types[0].clone();
        } else if input_types.len() == 1 && input_types[0].kind != ValueKind::Any {
            // Specific input, Any output: not a pass-through
            ctx.prev = output_types[0].clone();
        }
        // Any -> Any keeps the previous type (pass-through)
    } else {
        return Err(ComposeError::new(format!(
            "shard {} has multiple possible output types and is missing the compose method",
            name
        )));
    }

    // Exposed variables, after inference so their types are specialized
    let exposed = shard.with(|inst| inst.shard.exposed_variables());
    for info in exposed {
        let var_name = info.name.clone();
        match name.as_str() {
            "Ref" => {
                if ctx.variables.contains(&var_name) {
                    let msg = format!(
                        "Ref variable name already used as Set; overwriting a Set variable with Ref is not allowed: {}",
                        var_name
                    );
                    ctx.report(&name, &msg, false);
                }
                ctx.references.insert(var_name.clone());
            }
            "Set" => {
                if ctx.references.contains(&var_name) {
                    let msg = format!(
                        "Set variable name already used as Ref; overwriting a Ref variable with Set is not allowed: {}",
                        var_name
                    );
                    ctx.report(&name, &msg, false);
                }
                ctx.variables.insert(var_name.clone());
            }
            "Update" => {
                if ctx.references.contains(&var_name) {
                    let msg = format!(
                        "Update variable name already used as Ref; a Ref variable cannot be updated in place: {}",
                        var_name
                    );
                    ctx.report(&name, &msg, false);
                }
            }
            "Push" => {
                if ctx.references.contains(&var_name) {
                    let msg = format!(
                        "Push variable name already used as Ref; a Ref variable cannot be pushed into: {}",
                        var_name
                    );
                    ctx.report(&name, &msg, false);
                }
                ctx.variables.insert(var_name.clone());
            }
            _ => {}
        }
        upsert(&mut ctx.exposed, info);
    }

    // Required variables: group by name, accept the first shape that matches
    // anything visible
    let required = shard.with(|inst| inst.shard.required_variables());
    let mut by_name: HashMap<String, Vec<ExposedInfo>> = HashMap::new();
    for info in required {
        // "name key" forms address into a table; only the variable part binds
        let base = info
            .name
            .split(' ')
            .next()
            .unwrap_or(info.name.as_str())
            .to_string();
        by_name.entry(base).or_default().push(info);
    }

    for (var_name, shapes) in by_name {
        let mut matched: Option<ExposedInfo> = None;
        let found = ctx
            .exposed
            .iter()
            .chain(ctx.inherited.iter())
            .filter(|e| e.name == var_name)
            .cloned()
            .collect::<Vec<_>>();
        if found.is_empty() {
            // Warning only; a later compose may still bind it
            let msg = format!("required variable not found: {}", var_name);
            ctx.report(&name, &msg, true);
            continue;
        }
        'outer: for shape in &shapes {
            for candidate in &found {
                if match_types(&candidate.ti, &shape.ti, false, true) {
                    matched = Some(shape.clone());
                    break 'outer;
                }
            }
        }
        match matched {
            Some(shape) => {
                // Bubble into required unless this very sequence exposes it
                if !ctx.exposed.iter().any(|e| e.name == var_name) {
                    upsert(&mut ctx.required, shape);
                }
            }
            None => {
                let msg = format!(
                    "required types do not match currently exposed ones for variable '{}'",
                    var_name
                );
                ctx.report(&name, &msg, false);
            }
        }
    }

    Ok(())
}

fn upsert(list: &mut Vec<ExposedInfo>, info: ExposedInfo) {
    match list.iter_mut().find(|e| e.name == info.name) {
        Some(slot) => *slot = info,
        None => list.push(info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::create_shard;
    use crate::value::Value;

    fn wire_of(names_and_params: &[(&str, &[Value])]) -> WireRef {
        let wire = WireRef::new("compose-test");
        for (name, params) in names_and_params {
            let s = create_shard(name).expect("core shard");
            for (i, p) in params.iter().enumerate() {
                s.set_param(i, p).expect("param accepted");
            }
            wire.add_shard(s).expect("shard added");
        }
        wire
    }

    #[test]
    fn test_const_pass_infers_int() {
        let wire = wire_of(&[("Const", &[Value::Int(42)]), ("Pass", &[])]);
        let res = compose_wire(&wire, &InstanceData::default(), None).expect("composes");
        assert_eq!(res.output_type.kind, ValueKind::Int);
        assert!(!res.flow_stopper);
        assert!(wire.with_body(|b| b.composed).unwrap());
    }

    #[test]
    fn test_compose_idempotent() {
        // Composing twice must produce the same result
        let wire = wire_of(&[
            ("Const", &[Value::Int(3)]),
            ("Math.Add", &[Value::Int(4)]),
            ("Set", &[Value::String("x".into())]),
        ]);
        let a = compose_wire(&wire, &InstanceData::default(), None).expect("first");
        let b = compose_wire(&wire, &InstanceData::default(), None).expect("second");
        assert_eq!(a.output_type, b.output_type);
        assert_eq!(a.exposed.len(), b.exposed.len());
        assert_eq!(a.required.len(), b.required.len());
    }

    #[test]
    fn test_set_exposes_get_requires() {
        let wire = wire_of(&[
            ("Const", &[Value::Int(1)]),
            ("Set", &[Value::String("x".into())]),
            ("Get", &[Value::String("x".into())]),
        ]);
        let res = compose_wire(&wire, &InstanceData::default(), None).expect("composes");
        assert!(res.exposed.iter().any(|e| e.name == "x"));
        // x is exposed by the same sequence, so it does not bubble up
        assert!(!res.required.iter().any(|e| e.name == "x"));
    }

    #[test]
    fn test_get_unknown_variable_is_a_warning() {
        let wire = wire_of(&[("Get", &[Value::String("ghost".into())])]);
        let mut warnings = Vec::new();
        let mut cb = |shard: &str, msg: &str, warning: bool| {
            if warning {
                warnings.push(format!("{}: {}", shard, msg));
            }
        };
        compose_wire(&wire, &InstanceData::default(), Some(&mut cb)).expect("warns only");
        assert!(!warnings.is_empty());
    }

    #[test]
    fn test_ref_then_set_is_rejected() {
        let wire = wire_of(&[
            ("Const", &[Value::Int(1)]),
            ("Ref", &[Value::String("x".into())]),
            ("Const", &[Value::Int(2)]),
            ("Set", &[Value::String("x".into())]),
        ]);
        let err = compose_wire(&wire, &InstanceData::default(), None).unwrap_err();
        assert!(err.msg.contains("Ref"));
    }

    #[test]
    fn test_set_then_ref_is_rejected() {
        let wire = wire_of(&[
            ("Const", &[Value::Int(1)]),
            ("Set", &[Value::String("x".into())]),
            ("Const", &[Value::Int(2)]),
            ("Ref", &[Value::String("x".into())]),
        ]);
        assert!(compose_wire(&wire, &InstanceData::default(), None).is_err());
    }

    #[test]
    fn test_update_of_ref_is_rejected() {
        let wire = wire_of(&[
            ("Const", &[Value::Int(1)]),
            ("Ref", &[Value::String("x".into())]),
            ("Const", &[Value::Int(2)]),
            ("Update", &[Value::String("x".into())]),
        ]);
        assert!(compose_wire(&wire, &InstanceData::default(), None).is_err());
    }

    #[test]
    fn test_input_mismatch_is_an_error() {
        // Math.Add wants a number, Const feeds it a string
        let wire = wire_of(&[
            ("Const", &[Value::String("oops".into())]),
            ("Math.Add", &[Value::Int(1)]),
        ]);
        let err = compose_wire(&wire, &InstanceData::default(), None).unwrap_err();
        assert!(err.msg.contains("matching input type"));
    }

    #[test]
    fn test_flow_stopper_detection() {
        let wire = wire_of(&[("Const", &[Value::Int(1)]), ("Stop", &[])]);
        let res = compose_wire(&wire, &InstanceData::default(), None).expect("composes");
        assert!(res.flow_stopper);
    }

    #[test]
    fn test_const_cached_for_inline_dispatch() {
        let wire = wire_of(&[("Const", &[Value::Int(9)])]);
        compose_wire(&wire, &InstanceData::default(), None).expect("composes");
        let cached = wire.shards()[0].with(|inst| inst.cached_const.clone());
        assert_eq!(cached, Some(Value::Int(9)));
    }

    #[test]
    fn test_and_resets_to_original_input() {
        // [IsMore(0), And, Math.Add(1)] over Int input: And resets the
        // inferred type from Bool back to Int so Math.Add composes
        let wire = wire_of(&[
            ("IsMore", &[Value::Int(0)]),
            ("And", &[]),
            ("Math.Add", &[Value::Int(1)]),
        ]);
        let mut data = InstanceData::default();
        data.input_type = TypeInfo::int();
        let res = compose_wire(&wire, &data, None).expect("composes");
        assert_eq!(res.output_type.kind, ValueKind::Int);
    }
}
