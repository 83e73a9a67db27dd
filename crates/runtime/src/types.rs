//! Type descriptors and compose-time compatibility
//!
//! `TypeInfo` describes what a `Value` looks like to the composer. Compound
//! kinds carry element detail: sequences and sets list their element types,
//! tables carry parallel key/type vectors, arrays their inner blittable kind,
//! enums and objects their (vendor, type) tag.
//!
//! ## The permissive trailing table key
//!
//! This rule is load-bearing and downstream shards depend on it: a receiver
//! table whose *last* key is the empty string accepts any number of
//! additional input keys, provided their value types match the empty key's
//! type. A receiver table with no keys at all accepts any keys whose value
//! types are covered by the receiver's type list (an empty list covers
//! everything).

use crate::shard::InstanceData;
use crate::value::{Value, ValueKind};
use fxhash::FxHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Mutex, OnceLock};

/// A list of acceptable types, as used by shard input/output declarations and
/// parameter slots.
pub type Types = Vec<TypeInfo>;

/// Compound-kind detail carried next to the kind tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TypeDetail {
    #[default]
    None,
    /// Element types of a Seq
    Seq(Vec<TypeInfo>),
    /// Element types of a Set
    Set(Vec<TypeInfo>),
    /// Parallel key/type vectors of a Table
    Table {
        keys: Vec<String>,
        types: Vec<TypeInfo>,
    },
    /// Inner blittable kind of an Array
    Array(ValueKind),
    /// (vendor, type) of an Enum; (0, 0) in a receiver means "any enum"
    Enumeration { vendor: i32, type_id: i32 },
    /// (vendor, type) of an Object; (0, 0) in a receiver means "any object"
    Object { vendor: i32, type_id: i32 },
}

/// Describes a Value's type as seen at compose time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeInfo {
    pub kind: ValueKind,
    pub detail: TypeDetail,
    /// For sequences: minimum element count a receiver demands, or the exact
    /// element count an input was derived with. Zero means unconstrained.
    pub fixed_size: u32,
}

impl TypeInfo {
    pub fn of(kind: ValueKind) -> TypeInfo {
        TypeInfo {
            kind,
            detail: TypeDetail::None,
            fixed_size: 0,
        }
    }

    pub fn none() -> TypeInfo {
        TypeInfo::of(ValueKind::None)
    }

    pub fn any() -> TypeInfo {
        TypeInfo::of(ValueKind::Any)
    }

    pub fn bool_type() -> TypeInfo {
        TypeInfo::of(ValueKind::Bool)
    }

    pub fn int() -> TypeInfo {
        TypeInfo::of(ValueKind::Int)
    }

    pub fn float() -> TypeInfo {
        TypeInfo::of(ValueKind::Float)
    }

    pub fn string() -> TypeInfo {
        TypeInfo::of(ValueKind::String)
    }

    pub fn path() -> TypeInfo {
        TypeInfo::of(ValueKind::Path)
    }

    pub fn bytes() -> TypeInfo {
        TypeInfo::of(ValueKind::Bytes)
    }

    pub fn context_var() -> TypeInfo {
        TypeInfo::of(ValueKind::ContextVar)
    }

    pub fn wire() -> TypeInfo {
        TypeInfo::of(ValueKind::WireRef)
    }

    pub fn shard() -> TypeInfo {
        TypeInfo::of(ValueKind::ShardRef)
    }

    /// A sequence of the given element types.
    pub fn seq_of(types: Vec<TypeInfo>) -> TypeInfo {
        TypeInfo {
            kind: ValueKind::Seq,
            detail: TypeDetail::Seq(types),
            fixed_size: 0,
        }
    }

    /// A sequence accepting any elements.
    pub fn any_seq() -> TypeInfo {
        TypeInfo::seq_of(vec![TypeInfo::any()])
    }

    /// A sequence of shard references (the shape of body parameters).
    pub fn shard_seq() -> TypeInfo {
        TypeInfo::seq_of(vec![TypeInfo::shard()])
    }

    pub fn set_of(types: Vec<TypeInfo>) -> TypeInfo {
        TypeInfo {
            kind: ValueKind::Set,
            detail: TypeDetail::Set(types),
            fixed_size: 0,
        }
    }

    pub fn table(keys: Vec<String>, types: Vec<TypeInfo>) -> TypeInfo {
        TypeInfo {
            kind: ValueKind::Table,
            detail: TypeDetail::Table { keys, types },
            fixed_size: 0,
        }
    }

    /// A table accepting anything.
    pub fn any_table() -> TypeInfo {
        TypeInfo::table(Vec::new(), Vec::new())
    }

    pub fn array_of(kind: ValueKind) -> TypeInfo {
        TypeInfo {
            kind: ValueKind::Array,
            detail: TypeDetail::Array(kind),
            fixed_size: 0,
        }
    }

    pub fn enumeration(vendor: i32, type_id: i32) -> TypeInfo {
        TypeInfo {
            kind: ValueKind::Enum,
            detail: TypeDetail::Enumeration { vendor, type_id },
            fixed_size: 0,
        }
    }

    pub fn object(vendor: i32, type_id: i32) -> TypeInfo {
        TypeInfo {
            kind: ValueKind::Object,
            detail: TypeDetail::Object { vendor, type_id },
            fixed_size: 0,
        }
    }

    /// Stable 64-bit hash, used as a compose-cache key and to fingerprint
    /// external-variable shapes.
    pub fn hash64(&self) -> u64 {
        let mut h = FxHasher::default();
        feed_type(&mut h, self);
        h.finish()
    }
}

fn feed_type(h: &mut FxHasher, ti: &TypeInfo) {
    h.write_u8(ti.kind as u8);
    h.write_u32(ti.fixed_size);
    match &ti.detail {
        TypeDetail::None => h.write_u8(0),
        TypeDetail::Seq(types) => {
            h.write_u8(1);
            for t in types {
                feed_type(h, t);
            }
        }
        TypeDetail::Set(types) => {
            h.write_u8(2);
            for t in types {
                feed_type(h, t);
            }
        }
        TypeDetail::Table { keys, types } => {
            h.write_u8(3);
            for (k, t) in keys.iter().zip(types.iter()) {
                h.write(k.as_bytes());
                feed_type(h, t);
            }
        }
        TypeDetail::Array(kind) => {
            h.write_u8(4);
            h.write_u8(*kind as u8);
        }
        TypeDetail::Enumeration { vendor, type_id } => {
            h.write_u8(5);
            h.write_i32(*vendor);
            h.write_i32(*type_id);
        }
        TypeDetail::Object { vendor, type_id } => {
            h.write_u8(6);
            h.write_i32(*vendor);
            h.write_i32(*type_id);
        }
    }
}

/// A variable a shard exposes into scope, or requires from it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExposedInfo {
    pub name: String,
    pub help: String,
    pub ti: TypeInfo,
    /// Subsequent shards may overwrite the variable (Set-introduced)
    pub mutable: bool,
    /// Lives in the mesh's shared table rather than the wire's locals
    pub global: bool,
}

impl ExposedInfo {
    pub fn variable(name: impl Into<String>, ti: TypeInfo, mutable: bool) -> ExposedInfo {
        ExposedInfo {
            name: name.into(),
            help: String::new(),
            ti,
            mutable,
            global: false,
        }
    }

    pub fn global_variable(name: impl Into<String>, ti: TypeInfo, mutable: bool) -> ExposedInfo {
        ExposedInfo {
            name: name.into(),
            help: String::new(),
            ti,
            mutable,
            global: true,
        }
    }
}

/// Derive the compose-time type of a value.
///
/// A `ContextVar` resolves against the instance data's visible variables and
/// yields the variable's exposed type; when the variable is unknown the
/// result is an `Any` placeholder and `contains_variables` is set to false.
pub fn derive_type_info(
    v: &Value,
    data: &InstanceData,
    mut contains_variables: Option<&mut bool>,
) -> TypeInfo {
    match v {
        Value::ContextVar(name) => {
            for info in &data.shared {
                if &info.name == name {
                    if let Some(out) = contains_variables.as_deref_mut() {
                        *out = true;
                    }
                    return info.ti.clone();
                }
            }
            if let Some(out) = contains_variables.as_deref_mut() {
                *out = false;
            }
            TypeInfo::any()
        }
        Value::Seq(elems) => {
            let mut types: Vec<TypeInfo> = Vec::new();
            for e in elems {
                let ti = derive_type_info(e, data, contains_variables.as_deref_mut());
                if !types.contains(&ti) {
                    types.push(ti);
                }
            }
            let mut ti = TypeInfo::seq_of(types);
            ti.fixed_size = elems.len() as u32;
            ti
        }
        Value::Table(entries) => {
            let mut keys = Vec::with_capacity(entries.len());
            let mut types = Vec::with_capacity(entries.len());
            for (k, e) in entries {
                keys.push(k.clone());
                types.push(derive_type_info(e, data, contains_variables.as_deref_mut()));
            }
            TypeInfo::table(keys, types)
        }
        Value::Set(set) => {
            let mut types: Vec<TypeInfo> = Vec::new();
            for e in &set.0 {
                let ti = derive_type_info(e, data, contains_variables.as_deref_mut());
                if !types.contains(&ti) {
                    types.push(ti);
                }
            }
            TypeInfo::set_of(types)
        }
        Value::Array(a) => TypeInfo::array_of(a.kind),
        Value::Enum(e) => TypeInfo::enumeration(e.vendor, e.type_id),
        Value::Object(o) => TypeInfo::object(o.vendor, o.type_id),
        other => TypeInfo::of(other.kind()),
    }
}

/// Compatibility between an input type and a receiver's declared type.
///
/// `Any` receivers match everything. Kinds must otherwise agree. Enum/Object
/// receivers tagged (0, 0) accept any tag. In strict mode sequence, set and
/// table details are checked structurally; see the module docs for the table
/// regimes. `is_parameter` marks parameter-slot validation; it does not alter
/// the rules today but is part of the stable signature.
pub fn match_types(input: &TypeInfo, receiver: &TypeInfo, is_parameter: bool, strict: bool) -> bool {
    let _ = is_parameter;
    if receiver.kind == ValueKind::Any {
        return true;
    }
    if input.kind != receiver.kind {
        return false;
    }
    match (&input.detail, &receiver.detail) {
        (
            TypeDetail::Enumeration { vendor, type_id },
            TypeDetail::Enumeration {
                vendor: rv,
                type_id: rt,
            },
        )
        | (
            TypeDetail::Object { vendor, type_id },
            TypeDetail::Object {
                vendor: rv,
                type_id: rt,
            },
        ) => {
            if *rv == 0 && *rt == 0 {
                true
            } else {
                vendor == rv && type_id == rt
            }
        }
        (TypeDetail::Array(ik), TypeDetail::Array(rk)) => ik == rk,
        _ if !strict => true,
        (TypeDetail::Seq(input_types), TypeDetail::Seq(recv_types))
        | (TypeDetail::Set(input_types), TypeDetail::Set(recv_types)) => {
            if receiver.fixed_size > 0 && input.fixed_size < receiver.fixed_size {
                return false;
            }
            if input_types.is_empty() {
                // An empty input element list is only known to be compatible
                // with a receiver that accepts anything
                return recv_types.is_empty()
                    || recv_types.iter().any(|t| t.kind == ValueKind::Any);
            }
            if recv_types.is_empty() {
                return true;
            }
            input_types
                .iter()
                .all(|it| recv_types.iter().any(|rt| match_types(it, rt, false, true)))
        }
        (
            TypeDetail::Table {
                keys: in_keys,
                types: in_types,
            },
            TypeDetail::Table {
                keys: recv_keys,
                types: recv_types,
            },
        ) => {
            if recv_keys.is_empty() {
                // Keyless receiver: value types must be covered (empty list
                // covers everything)
                if recv_types.is_empty() {
                    return true;
                }
                return in_types
                    .iter()
                    .all(|it| recv_types.iter().any(|rt| match_types(it, rt, false, true)));
            }
            // Keyed receiver: key-for-key, with the permissive trailing ""
            let tail = match recv_keys.last().map(|k| k.as_str()) {
                Some("") => recv_types.last(),
                _ => None,
            };
            for (ik, it) in in_keys.iter().zip(in_types.iter()) {
                let slot = recv_keys
                    .iter()
                    .position(|rk| rk == ik)
                    .and_then(|i| recv_types.get(i));
                match slot {
                    Some(rt) => {
                        if !match_types(it, rt, false, true) {
                            return false;
                        }
                    }
                    None => match tail {
                        Some(rt) => {
                            if !match_types(it, rt, false, true) {
                                return false;
                            }
                        }
                        None => return false,
                    },
                }
            }
            // Every named receiver key must be present in the input
            for (rk, _) in recv_keys.iter().zip(recv_types.iter()) {
                if rk.is_empty() {
                    continue;
                }
                if !in_keys.iter().any(|ik| ik == rk) {
                    return false;
                }
            }
            true
        }
        _ => true,
    }
}

/// True when `input` matches at least one entry of `receivers`.
pub fn match_any(input: &TypeInfo, receivers: &[TypeInfo], is_parameter: bool, strict: bool) -> bool {
    receivers
        .iter()
        .any(|r| match_types(input, r, is_parameter, strict))
}

// ---------------------------------------------------------------------------
// Object / enum type registries. Built at startup; compose-time readers only
// see inserts from registration callbacks.
// ---------------------------------------------------------------------------

/// Host-visible description of a registered object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTypeInfo {
    pub name: String,
}

/// Host-visible description of a registered enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumTypeInfo {
    pub name: String,
    pub labels: Vec<String>,
}

static OBJECT_TYPES: OnceLock<Mutex<HashMap<(i32, i32), ObjectTypeInfo>>> = OnceLock::new();
static ENUM_TYPES: OnceLock<Mutex<HashMap<(i32, i32), EnumTypeInfo>>> = OnceLock::new();

fn object_types() -> &'static Mutex<HashMap<(i32, i32), ObjectTypeInfo>> {
    OBJECT_TYPES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn enum_types() -> &'static Mutex<HashMap<(i32, i32), EnumTypeInfo>> {
    ENUM_TYPES.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn register_object_type(vendor: i32, type_id: i32, info: ObjectTypeInfo) {
    object_types()
        .lock()
        .expect("object type registry poisoned")
        .insert((vendor, type_id), info);
}

pub fn register_enum_type(vendor: i32, type_id: i32, info: EnumTypeInfo) {
    enum_types()
        .lock()
        .expect("enum type registry poisoned")
        .insert((vendor, type_id), info);
}

pub fn find_object_type(vendor: i32, type_id: i32) -> Option<ObjectTypeInfo> {
    object_types()
        .lock()
        .expect("object type registry poisoned")
        .get(&(vendor, type_id))
        .cloned()
}

pub fn find_enum_type(vendor: i32, type_id: i32) -> Option<EnumTypeInfo> {
    enum_types()
        .lock()
        .expect("enum type registry poisoned")
        .get(&(vendor, type_id))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn empty_data() -> InstanceData {
        InstanceData::default()
    }

    #[test]
    fn test_any_receiver_matches_everything() {
        for ti in [
            TypeInfo::none(),
            TypeInfo::int(),
            TypeInfo::any_seq(),
            TypeInfo::any_table(),
        ] {
            assert!(match_types(&ti, &TypeInfo::any(), false, true));
        }
    }

    #[test]
    fn test_kind_mismatch() {
        assert!(!match_types(&TypeInfo::int(), &TypeInfo::float(), false, true));
        assert!(!match_types(&TypeInfo::int(), &TypeInfo::float(), false, false));
    }

    #[test]
    fn test_enum_wildcard_tag() {
        let input = TypeInfo::enumeration(7, 3);
        assert!(match_types(&input, &TypeInfo::enumeration(0, 0), false, true));
        assert!(match_types(&input, &TypeInfo::enumeration(7, 3), false, true));
        assert!(!match_types(&input, &TypeInfo::enumeration(7, 4), false, true));
    }

    #[test]
    fn test_seq_strict_element_coverage() {
        let input = TypeInfo::seq_of(vec![TypeInfo::int(), TypeInfo::float()]);
        let ints_only = TypeInfo::seq_of(vec![TypeInfo::int()]);
        let numbers = TypeInfo::seq_of(vec![TypeInfo::int(), TypeInfo::float()]);
        assert!(!match_types(&input, &ints_only, false, true));
        assert!(match_types(&input, &numbers, false, true));
        assert!(match_types(&input, &TypeInfo::any_seq(), false, true));
    }

    #[test]
    fn test_empty_input_seq_needs_any_receiver() {
        let empty = TypeInfo::seq_of(vec![]);
        assert!(match_types(&empty, &TypeInfo::any_seq(), false, true));
        let ints_only = TypeInfo::seq_of(vec![TypeInfo::int()]);
        assert!(!match_types(&empty, &ints_only, false, true));
    }

    #[test]
    fn test_seq_fixed_size_minimum() {
        let mut input = TypeInfo::seq_of(vec![TypeInfo::int()]);
        input.fixed_size = 2;
        let mut recv = TypeInfo::seq_of(vec![TypeInfo::int()]);
        recv.fixed_size = 3;
        assert!(!match_types(&input, &recv, false, true));
        recv.fixed_size = 2;
        assert!(match_types(&input, &recv, false, true));
    }

    #[test]
    fn test_table_keyless_regimes() {
        // No keys + no types matches any table input
        let input = TypeInfo::table(
            vec!["a".into(), "b".into()],
            vec![TypeInfo::int(), TypeInfo::string()],
        );
        assert!(match_types(&input, &TypeInfo::any_table(), false, true));

        // One allowed type: every input value type must match it
        let int_only = TypeInfo::table(vec![], vec![TypeInfo::int()]);
        assert!(!match_types(&input, &int_only, false, true));
        let int_input = TypeInfo::table(vec!["x".into()], vec![TypeInfo::int()]);
        assert!(match_types(&int_input, &int_only, false, true));
    }

    #[test]
    fn test_table_keyed_matching() {
        let recv = TypeInfo::table(
            vec!["a".into(), "b".into()],
            vec![TypeInfo::int(), TypeInfo::string()],
        );
        let good = TypeInfo::table(
            vec!["a".into(), "b".into()],
            vec![TypeInfo::int(), TypeInfo::string()],
        );
        assert!(match_types(&good, &recv, false, true));

        let missing = TypeInfo::table(vec!["a".into()], vec![TypeInfo::int()]);
        assert!(!match_types(&missing, &recv, false, true));

        let extra = TypeInfo::table(
            vec!["a".into(), "b".into(), "c".into()],
            vec![TypeInfo::int(), TypeInfo::string(), TypeInfo::float()],
        );
        assert!(!match_types(&extra, &recv, false, true));
    }

    #[test]
    fn test_table_trailing_empty_key_is_permissive() {
        let recv = TypeInfo::table(
            vec!["a".into(), "".into()],
            vec![TypeInfo::int(), TypeInfo::float()],
        );
        let input = TypeInfo::table(
            vec!["a".into(), "x".into(), "y".into()],
            vec![TypeInfo::int(), TypeInfo::float(), TypeInfo::float()],
        );
        assert!(match_types(&input, &recv, false, true));

        let bad_tail = TypeInfo::table(
            vec!["a".into(), "x".into()],
            vec![TypeInfo::int(), TypeInfo::string()],
        );
        assert!(!match_types(&bad_tail, &recv, false, true));
    }

    #[test]
    fn test_derive_scalar_and_containers() {
        let data = empty_data();
        assert_eq!(derive_type_info(&Value::Int(1), &data, None).kind, ValueKind::Int);

        let seq = Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Float(0.5)]);
        let ti = derive_type_info(&seq, &data, None);
        assert_eq!(ti.kind, ValueKind::Seq);
        assert_eq!(ti.fixed_size, 3);
        match &ti.detail {
            TypeDetail::Seq(types) => {
                assert_eq!(types.len(), 2, "duplicate element types collapse");
            }
            other => panic!("expected seq detail, got {:?}", other),
        }

        let table = Value::Table(BTreeMap::from([
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::String("s".into())),
        ]));
        let ti = derive_type_info(&table, &data, None);
        match &ti.detail {
            TypeDetail::Table { keys, types } => {
                assert_eq!(keys, &vec!["a".to_string(), "b".to_string()]);
                assert_eq!(types[0].kind, ValueKind::Int);
                assert_eq!(types[1].kind, ValueKind::String);
            }
            other => panic!("expected table detail, got {:?}", other),
        }
    }

    #[test]
    fn test_derive_context_var() {
        let mut data = empty_data();
        data.shared
            .push(ExposedInfo::variable("x", TypeInfo::int(), true));

        let mut contains = true;
        let ti = derive_type_info(
            &Value::ContextVar("x".into()),
            &data,
            Some(&mut contains),
        );
        assert_eq!(ti.kind, ValueKind::Int);
        assert!(contains);

        let mut contains = true;
        let ti = derive_type_info(
            &Value::ContextVar("missing".into()),
            &data,
            Some(&mut contains),
        );
        assert_eq!(ti.kind, ValueKind::Any);
        assert!(!contains);
    }

    #[test]
    fn test_type_hash_stability() {
        let a = TypeInfo::seq_of(vec![TypeInfo::int(), TypeInfo::float()]);
        let b = TypeInfo::seq_of(vec![TypeInfo::int(), TypeInfo::float()]);
        assert_eq!(a.hash64(), b.hash64());
        let c = TypeInfo::seq_of(vec![TypeInfo::float(), TypeInfo::int()]);
        assert_ne!(a.hash64(), c.hash64(), "element order is significant");
    }

    #[test]
    fn test_object_enum_registries() {
        register_object_type(
            900,
            1,
            ObjectTypeInfo {
                name: "test-object".into(),
            },
        );
        register_enum_type(
            900,
            2,
            EnumTypeInfo {
                name: "test-enum".into(),
                labels: vec!["A".into(), "B".into()],
            },
        );
        assert_eq!(
            find_object_type(900, 1).map(|i| i.name),
            Some("test-object".to_string())
        );
        assert_eq!(find_enum_type(900, 2).map(|i| i.labels.len()), Some(2));
        assert!(find_object_type(900, 99).is_none());
    }
}
