//! The shard contract: operators, their handles and the factory registry
//!
//! A shard is an opaque operator: typed inputs/outputs, parameter slots,
//! optional compose for type refinement, warmup/activate/cleanup lifecycle.
//! Shard instances are shared through `ShardRef` handles (parameters can
//! carry shards) but are **uniquely owned** by at most one wire; the `owned`
//! flag enforces that inserting an already-claimed instance is a hard error.
//!
//! ## Inline fast paths
//!
//! Well-known shards get an `InlineShard` id at construction (and the
//! composer re-asserts it). The wire runner checks the id first and executes
//! the hot ones without the virtual call. This is an optimization only:
//! every id falls back to `activate` correctly.

use crate::context::Context;
use crate::error::{ActivationError, ComposeError, ParamError, RegistryError, WarmupError};
use crate::types::{ExposedInfo, TypeInfo, Types, derive_type_info, match_any};
use crate::value::Value;
use crate::wire::WireRef;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Once, OnceLock};

/// One parameter slot: a name, help text and the set of accepted types.
#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: &'static str,
    pub help: &'static str,
    pub types: Types,
}

impl ParamInfo {
    pub fn new(name: &'static str, help: &'static str, types: Types) -> ParamInfo {
        ParamInfo { name, help, types }
    }
}

/// Compose-time bundle handed to `Shard::compose`: the inferred input type,
/// the variables currently visible, the owning wire and target hints.
#[derive(Clone, Default)]
pub struct InstanceData {
    pub input_type: TypeInfo,
    pub shared: Vec<ExposedInfo>,
    pub wire: Option<WireRef>,
    pub on_worker_thread: bool,
}

/// The operator interface.
///
/// `activate` is the only mandatory behavior. Everything else has a neutral
/// default: no parameters, no compose refinement, no variables, no state.
pub trait Shard: Send {
    fn name(&self) -> &'static str;

    /// Stable identity hash, written into serialized shard records.
    fn hash(&self) -> u32 {
        fnv1a32(self.name().as_bytes())
    }

    fn help(&self) -> &'static str {
        ""
    }

    fn input_types(&self) -> Types;

    fn output_types(&self) -> Types;

    fn parameters(&self) -> Vec<ParamInfo> {
        Vec::new()
    }

    fn set_param(&mut self, index: usize, _value: &Value) -> Result<(), ParamError> {
        Err(ParamError {
            shard: self.name().to_string(),
            index,
            msg: "shard has no parameters".to_string(),
        })
    }

    fn get_param(&self, _index: usize) -> Value {
        Value::None
    }

    /// Whether `compose` carries real logic. The composer only calls
    /// `compose` when this is true; otherwise it applies the declared-output
    /// defaulting rules.
    fn has_compose(&self) -> bool {
        false
    }

    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        let _ = data;
        Ok(self
            .output_types()
            .into_iter()
            .next()
            .unwrap_or_else(TypeInfo::any))
    }

    fn exposed_variables(&self) -> Vec<ExposedInfo> {
        Vec::new()
    }

    fn required_variables(&self) -> Vec<ExposedInfo> {
        Vec::new()
    }

    fn warmup(&mut self, _ctx: &mut Context<'_>) -> Result<(), WarmupError> {
        Ok(())
    }

    fn activate(&mut self, ctx: &mut Context<'_>, input: &Value) -> Result<Value, ActivationError>;

    fn cleanup(&mut self) {}

    /// Opt into the per-iteration `next_frame` walk.
    fn wants_next_frame(&self) -> bool {
        false
    }

    fn next_frame(&mut self, _ctx: &mut Context<'_>) -> Result<(), ActivationError> {
        Ok(())
    }

    /// Serializable internal state, if any. Participates in content hashing
    /// and in the ShardRef wire format.
    fn get_state(&self) -> Option<Value> {
        None
    }

    fn set_state(&mut self, _state: &Value) {}
}

/// 32-bit FNV-1a, the default shard identity hash.
pub(crate) const fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811c9dc5u32;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x01000193);
        i += 1;
    }
    hash
}

/// Inline-dispatch ids for well-known shards. `NotInline` means "use the
/// virtual call"; everything else lets the runner skip it for the hot cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InlineShard {
    #[default]
    NotInline,
    /// Pass / Comment / OnCleanup: output is the input, untouched
    NoopShard,
    CoreConst,
    CoreInput,
    CoreSleep,
    CoreForRange,
    CoreRepeat,
    CoreOnce,
    CoreSet,
    CoreUpdate,
    CoreSwap,
    CorePush,
    CoreIs,
    CoreIsNot,
    CoreIsMore,
    CoreIsLess,
    CoreIsMoreEqual,
    CoreIsLessEqual,
    CoreAnd,
    CoreOr,
    CoreNot,
    MathAdd,
    MathSubtract,
    MathMultiply,
    MathDivide,
    MathMod,
    MathXor,
    MathAnd,
    MathOr,
}

impl InlineShard {
    /// The hook table applied at construction time.
    pub fn for_name(name: &str) -> InlineShard {
        match name {
            "Const" => InlineShard::CoreConst,
            "Pass" | "Comment" | "OnCleanup" => InlineShard::NoopShard,
            "Input" => InlineShard::CoreInput,
            "Pause" => InlineShard::CoreSleep,
            "ForRange" => InlineShard::CoreForRange,
            "Repeat" => InlineShard::CoreRepeat,
            "Once" => InlineShard::CoreOnce,
            "Set" => InlineShard::CoreSet,
            "Update" => InlineShard::CoreUpdate,
            "Swap" => InlineShard::CoreSwap,
            "Push" => InlineShard::CorePush,
            "Is" => InlineShard::CoreIs,
            "IsNot" => InlineShard::CoreIsNot,
            "IsMore" => InlineShard::CoreIsMore,
            "IsLess" => InlineShard::CoreIsLess,
            "IsMoreEqual" => InlineShard::CoreIsMoreEqual,
            "IsLessEqual" => InlineShard::CoreIsLessEqual,
            "And" => InlineShard::CoreAnd,
            "Or" => InlineShard::CoreOr,
            "Not" => InlineShard::CoreNot,
            "Math.Add" => InlineShard::MathAdd,
            "Math.Subtract" => InlineShard::MathSubtract,
            "Math.Multiply" => InlineShard::MathMultiply,
            "Math.Divide" => InlineShard::MathDivide,
            "Math.Mod" => InlineShard::MathMod,
            "Math.Xor" => InlineShard::MathXor,
            "Math.And" => InlineShard::MathAnd,
            "Math.Or" => InlineShard::MathOr,
            _ => InlineShard::NotInline,
        }
    }
}

/// A shard plus its runner-side annotations.
pub struct ShardInstance {
    pub shard: Box<dyn Shard>,
    pub inline: InlineShard,
    /// Filled by the composer for `Const`: the parameter value, pre-cloned so
    /// the fast path never touches the virtual call
    pub cached_const: Option<Value>,
    /// Claimed by a wire; inserting an owned instance elsewhere is an error
    pub owned: bool,
    /// Output type resolved by the last compose pass
    pub output_type: TypeInfo,
}

/// Shared handle to a shard instance. Cloning shares; equality is identity.
#[derive(Clone)]
pub struct ShardRef(Arc<Mutex<ShardInstance>>);

impl ShardRef {
    pub fn new(shard: Box<dyn Shard>) -> ShardRef {
        let inline = InlineShard::for_name(shard.name());
        ShardRef(Arc::new(Mutex::new(ShardInstance {
            shard,
            inline,
            cached_const: None,
            owned: false,
            output_type: TypeInfo::any(),
        })))
    }

    /// Run `f` with the locked instance. Callers must not re-enter the same
    /// handle from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&mut ShardInstance) -> R) -> R {
        let mut guard = self.0.lock().expect("shard instance poisoned");
        f(&mut guard)
    }

    pub fn name(&self) -> String {
        self.with(|inst| inst.shard.name().to_string())
    }

    pub fn shard_hash(&self) -> u32 {
        self.with(|inst| inst.shard.hash())
    }

    /// Validated parameter assignment: the value's derived type must match
    /// one of the slot's allowed types.
    pub fn set_param(&self, index: usize, value: &Value) -> Result<(), ParamError> {
        self.with(|inst| {
            let params = inst.shard.parameters();
            let Some(info) = params.get(index) else {
                return Err(ParamError {
                    shard: inst.shard.name().to_string(),
                    index,
                    msg: "no such parameter slot".to_string(),
                });
            };
            let data = InstanceData::default();
            let ti = derive_type_info(value, &data, None);
            if !match_any(&ti, &info.types, true, true) {
                return Err(ParamError {
                    shard: inst.shard.name().to_string(),
                    index,
                    msg: format!("value of kind {:?} not accepted by slot {}", ti.kind, info.name),
                });
            }
            inst.shard.set_param(index, value)
        })
    }

    pub fn get_param(&self, index: usize) -> Value {
        self.with(|inst| inst.shard.get_param(index))
    }

    /// Stable address for identity hashing and visited sets.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for ShardRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ShardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardRef({})", self.name())
    }
}

// ---------------------------------------------------------------------------
// Factory registry. Built at startup; compose-time readers only race with
// observer-driven inserts, which are a startup concern.
// ---------------------------------------------------------------------------

type ShardFactory = Arc<dyn Fn() -> Box<dyn Shard> + Send + Sync>;

static SHARD_REGISTRY: OnceLock<Mutex<HashMap<String, ShardFactory>>> = OnceLock::new();
static CORE_SHARDS: Once = Once::new();

fn registry() -> &'static Mutex<HashMap<String, ShardFactory>> {
    SHARD_REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Make the built-in operator set available. Idempotent; called lazily by
/// `create_shard` so embedders never need to remember it.
pub fn ensure_core_shards() {
    CORE_SHARDS.call_once(crate::shards::register_core_shards);
}

/// Register a shard factory under `name`. Re-registration replaces the
/// factory (the last writer wins, matching registry semantics elsewhere).
pub fn register_shard(
    name: impl Into<String>,
    factory: impl Fn() -> Box<dyn Shard> + Send + Sync + 'static,
) {
    registry()
        .lock()
        .expect("shard registry poisoned")
        .insert(name.into(), Arc::new(factory));
}

/// Construct a fresh instance of a registered shard.
pub fn create_shard(name: &str) -> Result<ShardRef, RegistryError> {
    ensure_core_shards();
    let factory = registry()
        .lock()
        .expect("shard registry poisoned")
        .get(name)
        .cloned();
    match factory {
        Some(f) => Ok(ShardRef::new(f())),
        None => Err(RegistryError {
            name: name.to_string(),
        }),
    }
}

/// Names currently registered, sorted. Used by the CLI and diagnostics.
pub fn registered_shard_names() -> Vec<String> {
    ensure_core_shards();
    let mut names: Vec<String> = registry()
        .lock()
        .expect("shard registry poisoned")
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl Shard for Probe {
        fn name(&self) -> &'static str {
            "TestProbe"
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
    fn test_fnv1a32_known_vectors() {
        // FNV-1a reference values
        assert_eq!(fnv1a32(b""), 0x811c9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c292c);
    }

    #[test]
    fn test_default_hash_is_name_hash() {
        let probe = Probe;
        assert_eq!(probe.hash(), fnv1a32(b"TestProbe"));
    }

    #[test]
    fn test_inline_table() {
        assert_eq!(InlineShard::for_name("Const"), InlineShard::CoreConst);
        assert_eq!(InlineShard::for_name("Pass"), InlineShard::NoopShard);
        assert_eq!(InlineShard::for_name("Comment"), InlineShard::NoopShard);
        assert_eq!(InlineShard::for_name("Math.Add"), InlineShard::MathAdd);
        assert_eq!(InlineShard::for_name("Whatever"), InlineShard::NotInline);
    }

    #[test]
    fn test_shard_ref_identity() {
        let a = ShardRef::new(Box::new(Probe));
        let b = ShardRef::new(Box::new(Probe));
        let a2 = a.clone();
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_registry_create_unknown() {
        let err = create_shard("DoesNotExist").unwrap_err();
        assert_eq!(err.name, "DoesNotExist");
    }

    #[test]
    fn test_registry_register_and_create() {
        register_shard("TestProbe", || Box::new(Probe));
        let s = create_shard("TestProbe").expect("registered shard should construct");
        assert_eq!(s.name(), "TestProbe");
    }

    #[test]
    fn test_set_param_rejects_out_of_range() {
        let s = ShardRef::new(Box::new(Probe));
        let err = s.set_param(0, &Value::Int(1)).unwrap_err();
        assert!(err.msg.contains("no such parameter"));
    }
}
