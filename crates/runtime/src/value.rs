//! Value: what wires talk about
//!
//! A `Value` is a tagged variant. Kinds partition into **blittable** payloads
//! (numbers, vectors, colors, enums - trivially copyable, no ownership) and
//! **owning** payloads (strings, buffers, containers, shard/wire handles,
//! foreign objects).
//!
//! ## Cloning and reuse
//!
//! `clone_into` is the workhorse: a deep copy that reuses the destination's
//! existing allocation whenever the kinds match (strings, bytes, sequences,
//! tables and friends). Hot loops that recycle a destination value of the
//! right shape never allocate.
//!
//! ## Destruction
//!
//! `destroy` assigns `Value::None`; Rust's ownership drops the payload. The
//! operation is idempotent by construction and can never fail.
//!
//! ## Identity vs structure
//!
//! Containers compare element-wise. Shard and wire handles compare by
//! identity (same underlying instance), foreign objects by pointer + tag.

use crate::shard::ShardRef;
use crate::wire::WireRef;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Discriminant for every value kind the runtime knows about.
///
/// The numeric order is load-bearing: it is the serializer's kind byte, and
/// everything strictly below `EndOfBlittable` is a blittable payload.
/// `Any` and `EndOfBlittable` are type-system markers only - they never occur
/// as runtime payloads.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ValueKind {
    #[default]
    None = 0,
    Any = 1,
    Bool = 2,
    Int = 3,
    Int2 = 4,
    Int3 = 5,
    Int4 = 6,
    Int8 = 7,
    Int16 = 8,
    Float = 9,
    Float2 = 10,
    Float3 = 11,
    Float4 = 12,
    Color = 13,
    Enum = 14,
    EndOfBlittable = 15,
    String = 16,
    Path = 17,
    ContextVar = 18,
    Bytes = 19,
    Image = 20,
    Audio = 21,
    Seq = 22,
    Table = 23,
    Set = 24,
    Array = 25,
    ShardRef = 26,
    WireRef = 27,
    Object = 28,
}

impl ValueKind {
    /// Kinds whose payload is trivially copyable with no ownership.
    pub fn is_blittable(self) -> bool {
        (self as u8) < (ValueKind::EndOfBlittable as u8)
    }

    /// Kinds that carry externally owned, shareable payloads - the ones the
    /// variable machinery reference-counts.
    pub fn is_reference_counted(self) -> bool {
        (self as u8) > (ValueKind::EndOfBlittable as u8)
    }

    /// Serialized payload size of a blittable kind, in bytes.
    ///
    /// Returns `None` for owning kinds and for the markers.
    pub fn blittable_size(self) -> Option<usize> {
        Some(match self {
            ValueKind::None => 0,
            ValueKind::Bool => 1,
            ValueKind::Int => 8,
            ValueKind::Int2 => 16,
            ValueKind::Int3 => 12,
            ValueKind::Int4 => 16,
            ValueKind::Int8 => 16,
            ValueKind::Int16 => 16,
            ValueKind::Float => 8,
            ValueKind::Float2 => 16,
            ValueKind::Float3 => 12,
            ValueKind::Float4 => 16,
            ValueKind::Color => 4,
            ValueKind::Enum => 12,
            _ => return None,
        })
    }

    /// Inverse of the serializer's kind byte.
    pub fn from_u8(b: u8) -> Option<ValueKind> {
        Some(match b {
            0 => ValueKind::None,
            1 => ValueKind::Any,
            2 => ValueKind::Bool,
            3 => ValueKind::Int,
            4 => ValueKind::Int2,
            5 => ValueKind::Int3,
            6 => ValueKind::Int4,
            7 => ValueKind::Int8,
            8 => ValueKind::Int16,
            9 => ValueKind::Float,
            10 => ValueKind::Float2,
            11 => ValueKind::Float3,
            12 => ValueKind::Float4,
            13 => ValueKind::Color,
            14 => ValueKind::Enum,
            15 => ValueKind::EndOfBlittable,
            16 => ValueKind::String,
            17 => ValueKind::Path,
            18 => ValueKind::ContextVar,
            19 => ValueKind::Bytes,
            20 => ValueKind::Image,
            21 => ValueKind::Audio,
            22 => ValueKind::Seq,
            23 => ValueKind::Table,
            24 => ValueKind::Set,
            25 => ValueKind::Array,
            26 => ValueKind::ShardRef,
            27 => ValueKind::WireRef,
            28 => ValueKind::Object,
            _ => return None,
        })
    }
}

/// RGBA color, one byte per lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Build from a partial lane list; missing lanes default to (0, 0, 0, 255).
    pub fn from_partial(lanes: &[u8]) -> Color {
        Color {
            r: lanes.first().copied().unwrap_or(0),
            g: lanes.get(1).copied().unwrap_or(0),
            b: lanes.get(2).copied().unwrap_or(0),
            a: lanes.get(3).copied().unwrap_or(255),
        }
    }
}

/// A (vendor, type, value) enum instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub vendor: i32,
    pub type_id: i32,
    pub value: i32,
}

/// Raster payload. `data` holds `width * height * channels` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageData {
    pub width: u16,
    pub height: u16,
    pub channels: u8,
    pub flags: u16,
    pub data: Vec<u8>,
}

/// PCM payload, interleaved f32 samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioData {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// An unordered collection with equality-based membership.
///
/// Values are not `Hash`/`Ord` in the std sense (floats), so the set is an
/// insertion-ordered vector with linear membership checks. Content hashing
/// (see `hash`) is order-independent regardless.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetData(pub Vec<Value>);

impl SetData {
    pub fn new() -> SetData {
        SetData(Vec::new())
    }

    pub fn contains(&self, v: &Value) -> bool {
        self.0.iter().any(|e| e == v)
    }

    /// Insert if absent; returns true when the value was added.
    pub fn insert(&mut self, v: Value) -> bool {
        if self.contains(&v) {
            false
        } else {
            self.0.push(v);
            true
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A packed array of blittable payloads with an inner-kind tag.
///
/// Elements are stored serialized back-to-back (`kind.blittable_size()` bytes
/// each), so a million `Int` elements cost 8 MB flat, not a vector of tagged
/// variants.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArrayData {
    pub kind: ValueKind,
    pub data: Vec<u8>,
}

impl ArrayData {
    pub fn new(kind: ValueKind) -> ArrayData {
        debug_assert!(kind.is_blittable());
        ArrayData {
            kind,
            data: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        match self.kind.blittable_size() {
            Some(0) | None => 0,
            Some(n) => self.data.len() / n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append one element. The value's kind must equal the array's inner kind.
    pub fn push(&mut self, v: &Value) -> bool {
        if v.kind() != self.kind {
            return false;
        }
        write_blittable_payload(&mut self.data, v);
        true
    }

    /// Decode element `i`, or `None` when out of range.
    pub fn get(&self, i: usize) -> Option<Value> {
        let n = self.kind.blittable_size()?;
        if n == 0 {
            return None;
        }
        let start = i.checked_mul(n)?;
        let bytes = self.data.get(start..start + n)?;
        read_blittable_payload(self.kind, bytes)
    }
}

/// Foreign object payloads implement this. Tag equality plus pointer identity
/// is the full equality story; the runtime never looks inside.
pub trait ObjectData: std::any::Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn std::any::Any;
}

/// A (vendor, type) tagged foreign object.
#[derive(Debug, Clone)]
pub struct ObjectValue {
    pub vendor: i32,
    pub type_id: i32,
    pub data: Arc<dyn ObjectData>,
}

impl PartialEq for ObjectValue {
    fn eq(&self, other: &Self) -> bool {
        self.vendor == other.vendor
            && self.type_id == other.type_id
            && Arc::ptr_eq(&self.data, &other.data)
    }
}

/// The tagged variant. See the module docs for the kind partition.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Int2([i64; 2]),
    Int3([i32; 3]),
    Int4([i32; 4]),
    Int8([i16; 8]),
    Int16([i8; 16]),
    Float(f64),
    Float2([f64; 2]),
    Float3([f32; 3]),
    Float4([f32; 4]),
    Color(Color),
    Enum(EnumValue),
    String(String),
    Path(String),
    ContextVar(String),
    Bytes(Vec<u8>),
    Image(ImageData),
    Audio(AudioData),
    Seq(Vec<Value>),
    Table(BTreeMap<String, Value>),
    Set(SetData),
    Array(ArrayData),
    Shard(ShardRef),
    Wire(WireRef),
    Object(ObjectValue),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::None,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Int2(_) => ValueKind::Int2,
            Value::Int3(_) => ValueKind::Int3,
            Value::Int4(_) => ValueKind::Int4,
            Value::Int8(_) => ValueKind::Int8,
            Value::Int16(_) => ValueKind::Int16,
            Value::Float(_) => ValueKind::Float,
            Value::Float2(_) => ValueKind::Float2,
            Value::Float3(_) => ValueKind::Float3,
            Value::Float4(_) => ValueKind::Float4,
            Value::Color(_) => ValueKind::Color,
            Value::Enum(_) => ValueKind::Enum,
            Value::String(_) => ValueKind::String,
            Value::Path(_) => ValueKind::Path,
            Value::ContextVar(_) => ValueKind::ContextVar,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Image(_) => ValueKind::Image,
            Value::Audio(_) => ValueKind::Audio,
            Value::Seq(_) => ValueKind::Seq,
            Value::Table(_) => ValueKind::Table,
            Value::Set(_) => ValueKind::Set,
            Value::Array(_) => ValueKind::Array,
            Value::Shard(_) => ValueKind::ShardRef,
            Value::Wire(_) => ValueKind::WireRef,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Broadcast a scalar into every lane of an Int3.
    pub fn int3_splat(v: i32) -> Value {
        Value::Int3([v; 3])
    }

    /// Broadcast a scalar into every lane of an Int4.
    pub fn int4_splat(v: i32) -> Value {
        Value::Int4([v; 4])
    }

    /// Broadcast a scalar into every lane of a Float3.
    pub fn float3_splat(v: f32) -> Value {
        Value::Float3([v; 3])
    }

    /// Broadcast a scalar into every lane of a Float4.
    pub fn float4_splat(v: f32) -> Value {
        Value::Float4([v; 4])
    }

    /// Flow-control truthiness: `None` and zero-ish scalars are false,
    /// everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Ordering for the comparator shards. Int/Float cross-compare; strings
    /// compare lexically. Everything else is unordered.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::Seq(v)
    }
}

/// Deep copy `src` into `dst`, reusing `dst`'s allocation when the kinds
/// match. The contract: no allocation when the caller recycles a destination
/// of matching shape and sufficient capacity.
pub fn clone_into(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::String(d), Value::String(s))
        | (Value::Path(d), Value::Path(s))
        | (Value::ContextVar(d), Value::ContextVar(s)) => d.clone_from(s),
        (Value::Bytes(d), Value::Bytes(s)) => d.clone_from(s),
        (Value::Image(d), Value::Image(s)) => {
            d.width = s.width;
            d.height = s.height;
            d.channels = s.channels;
            d.flags = s.flags;
            d.data.clone_from(&s.data);
        }
        (Value::Audio(d), Value::Audio(s)) => {
            d.channels = s.channels;
            d.sample_rate = s.sample_rate;
            d.samples.clone_from(&s.samples);
        }
        (Value::Seq(d), Value::Seq(s)) => {
            // Element-wise clone_into keeps nested buffers alive too
            d.truncate(s.len());
            for (i, e) in s.iter().enumerate() {
                match d.get_mut(i) {
                    Some(slot) => clone_into(slot, e),
                    None => d.push(e.clone()),
                }
            }
        }
        (Value::Table(d), Value::Table(s)) => d.clone_from(s),
        (Value::Set(d), Value::Set(s)) => d.0.clone_from(&s.0),
        (Value::Array(d), Value::Array(s)) => {
            d.kind = s.kind;
            d.data.clone_from(&s.data);
        }
        (dst, src) => *dst = src.clone(),
    }
}

/// Free the payload and leave `Value::None` behind. Idempotent.
pub fn destroy(v: &mut Value) {
    *v = Value::None;
}

// ---------------------------------------------------------------------------
// Blittable payload codec, shared by ArrayData and the serializer.
// Fixed little-endian on disk (same-architecture pairs; see serialize docs).
// ---------------------------------------------------------------------------

pub(crate) fn write_blittable_payload(buf: &mut Vec<u8>, v: &Value) {
    match v {
        Value::None => {}
        Value::Bool(b) => buf.push(*b as u8),
        Value::Int(i) => buf.extend_from_slice(&i.to_le_bytes()),
        Value::Int2(l) => {
            for x in l {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Int3(l) => {
            for x in l {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Int4(l) => {
            for x in l {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Int8(l) => {
            for x in l {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Int16(l) => {
            for x in l {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Float(f) => buf.extend_from_slice(&f.to_le_bytes()),
        Value::Float2(l) => {
            for x in l {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Float3(l) => {
            for x in l {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Float4(l) => {
            for x in l {
                buf.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Color(c) => buf.extend_from_slice(&[c.r, c.g, c.b, c.a]),
        Value::Enum(e) => {
            buf.extend_from_slice(&e.vendor.to_le_bytes());
            buf.extend_from_slice(&e.type_id.to_le_bytes());
            buf.extend_from_slice(&e.value.to_le_bytes());
        }
        other => unreachable!("write_blittable_payload on owning kind {:?}", other.kind()),
    }
}

pub(crate) fn read_blittable_payload(kind: ValueKind, bytes: &[u8]) -> Option<Value> {
    fn arr<const N: usize>(b: &[u8], off: usize) -> Option<[u8; N]> {
        b.get(off..off + N)?.try_into().ok()
    }
    Some(match kind {
        ValueKind::None => Value::None,
        ValueKind::Bool => Value::Bool(*bytes.first()? != 0),
        ValueKind::Int => Value::Int(i64::from_le_bytes(arr::<8>(bytes, 0)?)),
        ValueKind::Int2 => {
            let mut l = [0i64; 2];
            for (i, x) in l.iter_mut().enumerate() {
                *x = i64::from_le_bytes(arr::<8>(bytes, i * 8)?);
            }
            Value::Int2(l)
        }
        ValueKind::Int3 => {
            let mut l = [0i32; 3];
            for (i, x) in l.iter_mut().enumerate() {
                *x = i32::from_le_bytes(arr::<4>(bytes, i * 4)?);
            }
            Value::Int3(l)
        }
        ValueKind::Int4 => {
            let mut l = [0i32; 4];
            for (i, x) in l.iter_mut().enumerate() {
                *x = i32::from_le_bytes(arr::<4>(bytes, i * 4)?);
            }
            Value::Int4(l)
        }
        ValueKind::Int8 => {
            let mut l = [0i16; 8];
            for (i, x) in l.iter_mut().enumerate() {
                *x = i16::from_le_bytes(arr::<2>(bytes, i * 2)?);
            }
            Value::Int8(l)
        }
        ValueKind::Int16 => {
            let mut l = [0i8; 16];
            for (i, x) in l.iter_mut().enumerate() {
                *x = *bytes.get(i)? as i8;
            }
            Value::Int16(l)
        }
        ValueKind::Float => Value::Float(f64::from_le_bytes(arr::<8>(bytes, 0)?)),
        ValueKind::Float2 => {
            let mut l = [0f64; 2];
            for (i, x) in l.iter_mut().enumerate() {
                *x = f64::from_le_bytes(arr::<8>(bytes, i * 8)?);
            }
            Value::Float2(l)
        }
        ValueKind::Float3 => {
            let mut l = [0f32; 3];
            for (i, x) in l.iter_mut().enumerate() {
                *x = f32::from_le_bytes(arr::<4>(bytes, i * 4)?);
            }
            Value::Float3(l)
        }
        ValueKind::Float4 => {
            let mut l = [0f32; 4];
            for (i, x) in l.iter_mut().enumerate() {
                *x = f32::from_le_bytes(arr::<4>(bytes, i * 4)?);
            }
            Value::Float4(l)
        }
        ValueKind::Color => {
            let b = arr::<4>(bytes, 0)?;
            Value::Color(Color {
                r: b[0],
                g: b[1],
                b: b[2],
                a: b[3],
            })
        }
        ValueKind::Enum => Value::Enum(EnumValue {
            vendor: i32::from_le_bytes(arr::<4>(bytes, 0)?),
            type_id: i32::from_le_bytes(arr::<4>(bytes, 4)?),
            value: i32::from_le_bytes(arr::<4>(bytes, 8)?),
        }),
        _ => return None,
    })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Int2(l) => write!(f, "({} {})", l[0], l[1]),
            Value::Int3(l) => write!(f, "({} {} {})", l[0], l[1], l[2]),
            Value::Int4(l) => write!(f, "({} {} {} {})", l[0], l[1], l[2], l[3]),
            Value::Int8(l) => {
                write!(f, "(")?;
                for (i, x) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, ")")
            }
            Value::Int16(l) => {
                write!(f, "(")?;
                for (i, x) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, ")")
            }
            Value::Float(v) => write!(f, "{}", v),
            Value::Float2(l) => write!(f, "({} {})", l[0], l[1]),
            Value::Float3(l) => write!(f, "({} {} {})", l[0], l[1], l[2]),
            Value::Float4(l) => write!(f, "({} {} {} {})", l[0], l[1], l[2], l[3]),
            Value::Color(c) => write!(f, "#{:02x}{:02x}{:02x}{:02x}", c.r, c.g, c.b, c.a),
            Value::Enum(e) => write!(f, "enum({}/{}: {})", e.vendor, e.type_id, e.value),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Path(s) => write!(f, "path({})", s),
            Value::ContextVar(s) => write!(f, "var({})", s),
            Value::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Value::Image(i) => write!(f, "image({}x{}x{})", i.width, i.height, i.channels),
            Value::Audio(a) => write!(
                f,
                "audio({} ch, {} Hz, {} samples)",
                a.channels,
                a.sample_rate,
                a.samples.len()
            ),
            Value::Seq(s) => {
                write!(f, "[")?;
                for (i, e) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
            Value::Table(t) => {
                write!(f, "{{")?;
                for (i, (k, v)) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Set(s) => {
                write!(f, "#{{")?;
                for (i, e) in s.0.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "}}")
            }
            Value::Array(a) => write!(f, "array<{:?}>[{}]", a.kind, a.len()),
            Value::Shard(s) => write!(f, "shard({})", s.name()),
            Value::Wire(w) => write!(f, "wire({})", w.name()),
            Value::Object(o) => write!(f, "object({}/{})", o.vendor, o.type_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for b in 0u8..=28 {
            let kind = ValueKind::from_u8(b).expect("kind byte should decode");
            assert_eq!(kind as u8, b);
        }
        assert!(ValueKind::from_u8(29).is_none());
    }

    #[test]
    fn test_blittable_partition() {
        assert!(ValueKind::Int.is_blittable());
        assert!(ValueKind::Color.is_blittable());
        assert!(ValueKind::Enum.is_blittable());
        assert!(!ValueKind::String.is_blittable());
        assert!(!ValueKind::Seq.is_blittable());
        assert!(!ValueKind::EndOfBlittable.is_blittable());
        assert!(ValueKind::String.is_reference_counted());
        assert!(!ValueKind::Int.is_reference_counted());
    }

    #[test]
    fn test_color_partial_defaults() {
        let c = Color::from_partial(&[10, 20]);
        assert_eq!((c.r, c.g, c.b, c.a), (10, 20, 0, 255));
        let full = Color::from_partial(&[1, 2, 3, 4]);
        assert_eq!((full.r, full.g, full.b, full.a), (1, 2, 3, 4));
    }

    #[test]
    fn test_splat_constructors() {
        assert_eq!(Value::int3_splat(7), Value::Int3([7, 7, 7]));
        assert_eq!(Value::float4_splat(0.5), Value::Float4([0.5; 4]));
    }

    #[test]
    fn test_clone_into_reuses_string_capacity() {
        let mut dst = Value::String(String::with_capacity(64));
        let before = match &dst {
            Value::String(s) => s.as_ptr(),
            _ => unreachable!(),
        };
        let src = Value::String("hello".to_string());
        clone_into(&mut dst, &src);
        assert_eq!(dst, src);
        let after = match &dst {
            Value::String(s) => s.as_ptr(),
            _ => unreachable!(),
        };
        assert_eq!(before, after, "matching-kind clone must reuse the buffer");
    }

    #[test]
    fn test_clone_into_seq_elementwise() {
        let mut dst = Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let src = Value::Seq(vec![Value::Int(9), Value::String("x".into())]);
        clone_into(&mut dst, &src);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_clone_into_kind_change() {
        let mut dst = Value::Int(1);
        clone_into(&mut dst, &Value::Float(2.5));
        assert_eq!(dst, Value::Float(2.5));
    }

    #[test]
    fn test_destroy_idempotent() {
        let mut v = Value::String("gone".into());
        destroy(&mut v);
        assert_eq!(v, Value::None);
        destroy(&mut v);
        assert_eq!(v, Value::None);
    }

    #[test]
    fn test_clone_equal_law() {
        let samples = vec![
            Value::None,
            Value::Bool(true),
            Value::Int(-3),
            Value::Int2([1, 2]),
            Value::Int16([1; 16]),
            Value::Float(1.25),
            Value::Float3([0.0, 1.0, 2.0]),
            Value::Color(Color::from_partial(&[1])),
            Value::Enum(EnumValue {
                vendor: 1,
                type_id: 2,
                value: 3,
            }),
            Value::String("s".into()),
            Value::Bytes(vec![1, 2, 3]),
            Value::Seq(vec![Value::Int(1), Value::Seq(vec![Value::Bool(false)])]),
            Value::Table(BTreeMap::from([("a".to_string(), Value::Int(1))])),
            Value::Set(SetData(vec![Value::Int(1), Value::Int(2)])),
        ];
        for v in samples {
            let mut dst = Value::None;
            clone_into(&mut dst, &v);
            assert_eq!(dst, v);
        }
    }

    #[test]
    fn test_set_semantics() {
        let mut s = SetData::new();
        assert!(s.insert(Value::Int(1)));
        assert!(!s.insert(Value::Int(1)));
        assert!(s.insert(Value::Int(2)));
        assert_eq!(s.len(), 2);
        assert!(s.contains(&Value::Int(2)));
    }

    #[test]
    fn test_array_pack_unpack() {
        let mut a = ArrayData::new(ValueKind::Int);
        assert!(a.push(&Value::Int(5)));
        assert!(a.push(&Value::Int(-1)));
        assert!(!a.push(&Value::Float(1.0)), "kind mismatch must be refused");
        assert_eq!(a.len(), 2);
        assert_eq!(a.get(0), Some(Value::Int(5)));
        assert_eq!(a.get(1), Some(Value::Int(-1)));
        assert_eq!(a.get(2), None);
    }

    #[test]
    fn test_array_color_payload() {
        let mut a = ArrayData::new(ValueKind::Color);
        a.push(&Value::Color(Color::from_partial(&[1, 2, 3, 4])));
        assert_eq!(a.data.len(), 4);
        assert_eq!(a.get(0), Some(Value::Color(Color::from_partial(&[1, 2, 3, 4]))));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::Int(1).is_truthy());
        assert!(Value::Seq(vec![]).is_truthy());
    }

    #[test]
    fn test_compare_cross_numeric() {
        use std::cmp::Ordering;
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::Float(2.0).compare(&Value::Int(2)), Some(Ordering::Equal));
        assert_eq!(Value::Int(1).compare(&Value::String("x".into())), None);
    }

    #[test]
    fn test_blittable_payload_sizes_match_codec() {
        let samples = vec![
            Value::Bool(true),
            Value::Int(7),
            Value::Int2([1, 2]),
            Value::Int3([1, 2, 3]),
            Value::Int4([1, 2, 3, 4]),
            Value::Int8([1; 8]),
            Value::Int16([-1; 16]),
            Value::Float(1.0),
            Value::Float2([1.0, 2.0]),
            Value::Float3([1.0, 2.0, 3.0]),
            Value::Float4([1.0; 4]),
            Value::Color(Color::from_partial(&[])),
            Value::Enum(EnumValue {
                vendor: -1,
                type_id: 2,
                value: 3,
            }),
        ];
        for v in samples {
            let mut buf = Vec::new();
            write_blittable_payload(&mut buf, &v);
            assert_eq!(Some(buf.len()), v.kind().blittable_size(), "{:?}", v.kind());
            let back = read_blittable_payload(v.kind(), &buf).expect("payload should decode");
            assert_eq!(back, v);
        }
    }
}
