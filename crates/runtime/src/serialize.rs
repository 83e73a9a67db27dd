//! Canonical binary serialization of values and wires
//!
//! The format backs wire-provider hot reload and IPC, so its bytes are part
//! of the protocol (this is why the codec is hand-written rather than
//! derived):
//!
//! - `Value`: kind byte, then a per-kind payload (fixed-size for blittables,
//!   length-prefixed for owning kinds)
//! - `ShardRef`: name, identity hash, `(paramIndex:i32, value)*` terminated
//!   by -1, then the shard state (a `None` value when the shard is stateless)
//! - `Wire`: name, 128-bit content hash, a `full` flag byte, flags, shard
//!   records. Repeated wires are deduplicated: after the first full record,
//!   later occurrences write `full = 0` and decode resolves them to the
//!   first-seen instance, restoring identity
//!
//! Integers are little-endian on the wire. Equal values always produce equal
//! bytes (`Table` iterates sorted keys), and decoding is never silently
//! partial. The format carries no architecture tag; pairs exchanging buffers
//! are expected to agree on one.
//!
//! Decoding into an existing destination (`decode_value_into`) recycles the
//! destination's buffers when the kinds line up, mirroring `clone_into`.

use crate::error::SerializeError;
use crate::hash::{Hash128, hash_wire};
use crate::shard::{ShardRef, create_shard};
use crate::value::{
    ArrayData, AudioData, ImageData, SetData, Value, ValueKind, read_blittable_payload,
    write_blittable_payload,
};
use crate::wire::WireRef;
use std::collections::{BTreeMap, HashMap};

/// Streaming encoder with a wire dedup map. One encoder per logical stream.
pub struct Encoder {
    buf: Vec<u8>,
    seen_wires: HashMap<u128, ()>,
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new()
    }
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder {
            buf: Vec::new(),
            seen_wires: HashMap::new(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn put_str(&mut self, s: &str) {
        self.buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_value(&mut self, v: &Value) -> Result<(), SerializeError> {
        self.buf.push(v.kind() as u8);
        match v {
            _ if v.kind().is_blittable() => {
                write_blittable_payload(&mut self.buf, v);
            }
            Value::String(s) | Value::Path(s) | Value::ContextVar(s) => {
                self.put_str(s);
            }
            Value::Bytes(b) => {
                self.buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
                self.buf.extend_from_slice(b);
            }
            Value::Image(img) => {
                self.buf.push(img.channels);
                self.buf.extend_from_slice(&img.flags.to_le_bytes());
                self.buf.extend_from_slice(&img.width.to_le_bytes());
                self.buf.extend_from_slice(&img.height.to_le_bytes());
                self.buf.extend_from_slice(&img.data);
            }
            Value::Audio(audio) => {
                self.buf
                    .extend_from_slice(&(audio.samples.len() as u16).to_le_bytes());
                self.buf.extend_from_slice(&audio.channels.to_le_bytes());
                self.buf.extend_from_slice(&audio.sample_rate.to_le_bytes());
                for s in &audio.samples {
                    self.buf.extend_from_slice(&s.to_le_bytes());
                }
            }
            Value::Seq(elems) => {
                self.buf
                    .extend_from_slice(&(elems.len() as u32).to_le_bytes());
                for e in elems {
                    self.write_value(e)?;
                }
            }
            Value::Table(entries) => {
                self.buf
                    .extend_from_slice(&(entries.len() as u64).to_le_bytes());
                for (k, e) in entries {
                    self.put_str(k);
                    self.write_value(e)?;
                }
            }
            Value::Set(set) => {
                self.buf
                    .extend_from_slice(&(set.0.len() as u64).to_le_bytes());
                for e in &set.0 {
                    self.write_value(e)?;
                }
            }
            Value::Array(a) => {
                self.buf.push(a.kind as u8);
                self.buf
                    .extend_from_slice(&(a.len() as u32).to_le_bytes());
                self.buf.extend_from_slice(&a.data);
            }
            Value::Shard(s) => self.write_shard(s)?,
            Value::Wire(w) => self.write_wire(w)?,
            Value::Object(_) => return Err(SerializeError::Unsupported("objects")),
            _ => unreachable!("blittable arm covers the rest"),
        }
        Ok(())
    }

    pub fn write_shard(&mut self, shard: &ShardRef) -> Result<(), SerializeError> {
        let (name, hash, params, state) = shard.with(|inst| {
            let n = inst.shard.parameters().len();
            let params: Vec<Value> = (0..n).map(|i| inst.shard.get_param(i)).collect();
            (
                inst.shard.name().to_string(),
                inst.shard.hash(),
                params,
                inst.shard.get_state(),
            )
        });
        self.put_str(&name);
        self.buf.extend_from_slice(&hash.to_le_bytes());
        for (i, p) in params.iter().enumerate() {
            self.buf.extend_from_slice(&(i as i32).to_le_bytes());
            self.write_value(p)?;
        }
        self.buf.extend_from_slice(&(-1i32).to_le_bytes());
        self.write_value(&state.unwrap_or(Value::None))?;
        Ok(())
    }

    pub fn write_wire(&mut self, wire: &WireRef) -> Result<(), SerializeError> {
        let hash = hash_wire(wire)
            .map_err(|e| SerializeError::InvalidData(e.to_string()))?;
        self.put_str(&wire.name());
        self.buf.extend_from_slice(&hash.to_le_bytes());
        if self.seen_wires.contains_key(&hash.0) {
            // Back-reference; decode resolves to the first-seen instance
            self.buf.push(0);
            return Ok(());
        }
        self.seen_wires.insert(hash.0, ());
        self.buf.push(1);

        let (looped, unsafe_, pure) = wire
            .with_body(|b| (b.looped, b.unsafe_, b.pure))
            .ok_or_else(|| {
                SerializeError::InvalidData(format!("wire {} is running", wire.name()))
            })?;
        self.buf.push(looped as u8);
        self.buf.push(unsafe_ as u8);
        self.buf.push(pure as u8);
        let shards = wire.shards();
        self.buf
            .extend_from_slice(&(shards.len() as u32).to_le_bytes());
        for s in &shards {
            self.write_shard(s)?;
        }
        Ok(())
    }
}

/// Streaming decoder, sharing a wire identity map across reads.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    wires: HashMap<u128, WireRef>,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Decoder<'a> {
        Decoder {
            buf,
            pos: 0,
            wires: HashMap::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SerializeError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(SerializeError::UnexpectedEof)?;
        if end > self.buf.len() {
            return Err(SerializeError::UnexpectedEof);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn get_u8(&mut self) -> Result<u8, SerializeError> {
        Ok(self.take(1)?[0])
    }

    fn get_u16(&mut self) -> Result<u16, SerializeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn get_u32(&mut self) -> Result<u32, SerializeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn get_i32(&mut self) -> Result<i32, SerializeError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn get_u64(&mut self) -> Result<u64, SerializeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn get_u128(&mut self) -> Result<u128, SerializeError> {
        Ok(u128::from_le_bytes(self.take(16)?.try_into().unwrap()))
    }

    fn get_f32(&mut self) -> Result<f32, SerializeError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn get_str(&mut self) -> Result<&'a str, SerializeError> {
        let len = self.get_u32()? as usize;
        Ok(std::str::from_utf8(self.take(len)?)?)
    }

    pub fn read_value(&mut self) -> Result<Value, SerializeError> {
        let mut out = Value::None;
        self.read_value_into(&mut out)?;
        Ok(out)
    }

    /// Decode the next value, reusing `dst`'s buffers when the kinds match.
    pub fn read_value_into(&mut self, dst: &mut Value) -> Result<(), SerializeError> {
        let kind_byte = self.get_u8()?;
        let kind = ValueKind::from_u8(kind_byte).ok_or(SerializeError::UnknownKind(kind_byte))?;

        if kind.is_blittable() {
            let size = kind.blittable_size().expect("blittable kinds have sizes");
            let bytes = self.take(size)?;
            *dst = read_blittable_payload(kind, bytes).ok_or(SerializeError::UnexpectedEof)?;
            return Ok(());
        }

        match kind {
            ValueKind::String | ValueKind::Path | ValueKind::ContextVar => {
                let s = self.get_str()?;
                // Recycle a matching-kind destination buffer
                let reuse = match (&mut *dst, kind) {
                    (Value::String(d), ValueKind::String)
                    | (Value::Path(d), ValueKind::Path)
                    | (Value::ContextVar(d), ValueKind::ContextVar) => {
                        d.clear();
                        d.push_str(s);
                        true
                    }
                    _ => false,
                };
                if !reuse {
                    *dst = match kind {
                        ValueKind::String => Value::String(s.to_string()),
                        ValueKind::Path => Value::Path(s.to_string()),
                        _ => Value::ContextVar(s.to_string()),
                    };
                }
            }
            ValueKind::Bytes => {
                let len = self.get_u32()? as usize;
                let bytes = self.take(len)?;
                if let Value::Bytes(d) = dst {
                    d.clear();
                    d.extend_from_slice(bytes);
                } else {
                    *dst = Value::Bytes(bytes.to_vec());
                }
            }
            ValueKind::Image => {
                let channels = self.get_u8()?;
                let flags = self.get_u16()?;
                let width = self.get_u16()?;
                let height = self.get_u16()?;
                let len = width as usize * height as usize * channels as usize;
                let bytes = self.take(len)?;
                if let Value::Image(d) = dst {
                    d.channels = channels;
                    d.flags = flags;
                    d.width = width;
                    d.height = height;
                    d.data.clear();
                    d.data.extend_from_slice(bytes);
                } else {
                    *dst = Value::Image(ImageData {
                        width,
                        height,
                        channels,
                        flags,
                        data: bytes.to_vec(),
                    });
                }
            }
            ValueKind::Audio => {
                let nsamples = self.get_u16()? as usize;
                let channels = self.get_u16()?;
                let sample_rate = self.get_u32()?;
                let mut samples = match std::mem::replace(dst, Value::None) {
                    Value::Audio(mut a) => {
                        a.samples.clear();
                        a.samples
                    }
                    _ => Vec::with_capacity(nsamples),
                };
                for _ in 0..nsamples {
                    samples.push(self.get_f32()?);
                }
                *dst = Value::Audio(AudioData {
                    channels,
                    sample_rate,
                    samples,
                });
            }
            ValueKind::Seq => {
                let len = self.get_u32()? as usize;
                let mut elems = match std::mem::replace(dst, Value::None) {
                    Value::Seq(mut v) => {
                        v.truncate(len);
                        v
                    }
                    _ => Vec::with_capacity(len),
                };
                for i in 0..len {
                    match elems.get_mut(i) {
                        Some(slot) => self.read_value_into(slot)?,
                        None => {
                            let mut v = Value::None;
                            self.read_value_into(&mut v)?;
                            elems.push(v);
                        }
                    }
                }
                *dst = Value::Seq(elems);
            }
            ValueKind::Table => {
                let count = self.get_u64()?;
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key = self.get_str()?.to_string();
                    let value = self.read_value()?;
                    entries.insert(key, value);
                }
                *dst = Value::Table(entries);
            }
            ValueKind::Set => {
                let count = self.get_u64()?;
                let mut set = SetData::new();
                for _ in 0..count {
                    set.insert(self.read_value()?);
                }
                *dst = Value::Set(set);
            }
            ValueKind::Array => {
                let inner_byte = self.get_u8()?;
                let inner = ValueKind::from_u8(inner_byte)
                    .filter(|k| k.is_blittable())
                    .ok_or(SerializeError::UnknownKind(inner_byte))?;
                let len = self.get_u32()? as usize;
                let size = inner.blittable_size().expect("blittable");
                let total = len
                    .checked_mul(size)
                    .ok_or_else(|| SerializeError::InvalidData("array too large".into()))?;
                let bytes = self.take(total)?;
                if let Value::Array(d) = dst {
                    d.kind = inner;
                    d.data.clear();
                    d.data.extend_from_slice(bytes);
                } else {
                    *dst = Value::Array(ArrayData {
                        kind: inner,
                        data: bytes.to_vec(),
                    });
                }
            }
            ValueKind::ShardRef => {
                *dst = Value::Shard(self.read_shard()?);
            }
            ValueKind::WireRef => {
                *dst = Value::Wire(self.read_wire()?);
            }
            ValueKind::Object => return Err(SerializeError::Unsupported("objects")),
            _ => return Err(SerializeError::UnknownKind(kind_byte)),
        }
        Ok(())
    }

    pub fn read_shard(&mut self) -> Result<ShardRef, SerializeError> {
        let name = self.get_str()?.to_string();
        let hash = self.get_u32()?;
        let shard =
            create_shard(&name).map_err(|_| SerializeError::UnknownShard(name.clone()))?;
        if shard.shard_hash() != hash {
            return Err(SerializeError::ShardHashMismatch(name));
        }
        loop {
            let index = self.get_i32()?;
            if index < 0 {
                break;
            }
            let value = self.read_value()?;
            shard
                .set_param(index as usize, &value)
                .map_err(|e| SerializeError::InvalidData(e.to_string()))?;
        }
        let state = self.read_value()?;
        if state != Value::None {
            shard.with(|inst| inst.shard.set_state(&state));
        }
        Ok(shard)
    }

    pub fn read_wire(&mut self) -> Result<WireRef, SerializeError> {
        let name = self.get_str()?.to_string();
        let hash = Hash128(self.get_u128()?);
        let full = self.get_u8()?;
        if full == 0 {
            return self
                .wires
                .get(&hash.0)
                .cloned()
                .ok_or_else(|| {
                    SerializeError::InvalidData(format!(
                        "back-reference to unseen wire {} ({})",
                        name, hash
                    ))
                });
        }
        let looped = self.get_u8()? != 0;
        let unsafe_ = self.get_u8()? != 0;
        let pure = self.get_u8()? != 0;
        let shard_count = self.get_u32()? as usize;
        let wire = WireRef::new(name.clone());
        wire.set_looped(looped);
        wire.set_unsafe(unsafe_);
        wire.set_pure(pure);
        for _ in 0..shard_count {
            let shard = self.read_shard()?;
            wire.add_shard(shard)
                .map_err(|e| SerializeError::InvalidData(e.to_string()))?;
        }
        self.wires.insert(hash.0, wire.clone());
        Ok(wire)
    }
}

/// One-shot value encode.
pub fn encode_value(v: &Value) -> Result<Vec<u8>, SerializeError> {
    let mut enc = Encoder::new();
    enc.write_value(v)?;
    Ok(enc.into_bytes())
}

/// One-shot value decode.
pub fn decode_value(bytes: &[u8]) -> Result<Value, SerializeError> {
    let mut dec = Decoder::new(bytes);
    let v = dec.read_value()?;
    if dec.remaining() != 0 {
        return Err(SerializeError::InvalidData("trailing bytes".into()));
    }
    Ok(v)
}

/// One-shot decode into an existing destination, recycling its buffers.
pub fn decode_value_into(dst: &mut Value, bytes: &[u8]) -> Result<(), SerializeError> {
    let mut dec = Decoder::new(bytes);
    dec.read_value_into(dst)?;
    if dec.remaining() != 0 {
        return Err(SerializeError::InvalidData("trailing bytes".into()));
    }
    Ok(())
}

/// One-shot wire encode.
pub fn encode_wire(wire: &WireRef) -> Result<Vec<u8>, SerializeError> {
    let mut enc = Encoder::new();
    enc.write_wire(wire)?;
    Ok(enc.into_bytes())
}

/// One-shot wire decode.
pub fn decode_wire(bytes: &[u8]) -> Result<WireRef, SerializeError> {
    let mut dec = Decoder::new(bytes);
    let w = dec.read_wire()?;
    if dec.remaining() != 0 {
        return Err(SerializeError::InvalidData("trailing bytes".into()));
    }
    Ok(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Color, EnumValue};

    fn roundtrip(v: &Value) {
        let bytes = encode_value(v).expect("encodes");
        let back = decode_value(&bytes).expect("decodes");
        assert_eq!(&back, v);
        // Round-trip law: re-encoding is byte-identical
        assert_eq!(encode_value(&back).unwrap(), bytes);
    }

    #[test]
    fn test_roundtrip_every_primitive_kind() {
        roundtrip(&Value::None);
        roundtrip(&Value::Bool(true));
        roundtrip(&Value::Int(-7));
        roundtrip(&Value::Int2([1, -2]));
        roundtrip(&Value::Int3([1, 2, 3]));
        roundtrip(&Value::Int4([1, 2, 3, 4]));
        roundtrip(&Value::Int8([5; 8]));
        roundtrip(&Value::Int16([-3; 16]));
        roundtrip(&Value::Float(2.5));
        roundtrip(&Value::Float2([0.5, -0.5]));
        roundtrip(&Value::Float3([1.0, 2.0, 3.0]));
        roundtrip(&Value::Float4([4.0; 4]));
        roundtrip(&Value::Color(Color::from_partial(&[1, 2, 3])));
        roundtrip(&Value::Enum(EnumValue {
            vendor: 10,
            type_id: 20,
            value: 30,
        }));
    }

    #[test]
    fn test_roundtrip_owning_kinds() {
        roundtrip(&Value::String("hello".into()));
        roundtrip(&Value::Path("/tmp/x".into()));
        roundtrip(&Value::ContextVar("var-name".into()));
        roundtrip(&Value::Bytes(vec![0, 1, 2, 255]));
        roundtrip(&Value::Seq(vec![
            Value::Int(1),
            Value::String("s".into()),
            Value::Seq(vec![Value::Bool(false)]),
        ]));
        roundtrip(&Value::Table(BTreeMap::from([
            ("a".to_string(), Value::Float(1.0)),
            ("b".to_string(), Value::String("x".into())),
        ])));
        roundtrip(&Value::Set(SetData(vec![Value::Int(1), Value::Int(2)])));

        let mut arr = ArrayData::new(ValueKind::Int);
        arr.push(&Value::Int(10));
        arr.push(&Value::Int(20));
        roundtrip(&Value::Array(arr));

        roundtrip(&Value::Image(ImageData {
            width: 2,
            height: 2,
            channels: 1,
            flags: 0,
            data: vec![9, 8, 7, 6],
        }));
        roundtrip(&Value::Audio(AudioData {
            channels: 1,
            sample_rate: 44100,
            samples: vec![0.0, 0.5, -0.5],
        }));
    }

    #[test]
    fn test_decode_into_reuses_string_buffer() {
        let bytes = encode_value(&Value::String("abc".into())).unwrap();
        let mut dst = Value::String(String::with_capacity(64));
        let ptr_before = match &dst {
            Value::String(s) => s.as_ptr(),
            _ => unreachable!(),
        };
        decode_value_into(&mut dst, &bytes).expect("decodes");
        assert_eq!(dst, Value::String("abc".into()));
        let ptr_after = match &dst {
            Value::String(s) => s.as_ptr(),
            _ => unreachable!(),
        };
        assert_eq!(ptr_before, ptr_after);
    }

    #[test]
    fn test_malformed_input_is_never_partial() {
        assert_eq!(decode_value(&[]), Err(SerializeError::UnexpectedEof));
        assert_eq!(decode_value(&[200]), Err(SerializeError::UnknownKind(200)));
        // Int kind with a truncated payload
        assert_eq!(
            decode_value(&[ValueKind::Int as u8, 1, 2]),
            Err(SerializeError::UnexpectedEof)
        );
        // A valid value followed by garbage
        let mut bytes = encode_value(&Value::Bool(true)).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_value(&bytes),
            Err(SerializeError::InvalidData(_))
        ));
    }

    #[test]
    fn test_shard_roundtrip() {
        let shard = create_shard("Const").unwrap();
        shard.set_param(0, &Value::Int(42)).unwrap();
        let mut enc = Encoder::new();
        enc.write_shard(&shard).unwrap();
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        let back = dec.read_shard().unwrap();
        assert_eq!(back.name(), "Const");
        assert_eq!(back.get_param(0), Value::Int(42));
    }

    #[test]
    fn test_wire_roundtrip_and_stable_bytes() {
        let wire = WireRef::new("roundtrip");
        wire.set_looped(true);
        let c = create_shard("Const").unwrap();
        c.set_param(0, &Value::Int(1)).unwrap();
        wire.add_shard(c).unwrap();
        wire.add_shard(create_shard("Pass").unwrap()).unwrap();

        let bytes = encode_wire(&wire).unwrap();
        let back = decode_wire(&bytes).unwrap();
        assert_eq!(back.name(), "roundtrip");
        assert_eq!(back.shards().len(), 2);
        assert!(back.with_body(|b| b.looped).unwrap());

        let bytes2 = encode_wire(&back).unwrap();
        assert_eq!(bytes, bytes2, "re-encoding must be byte-identical");
    }

    #[test]
    fn test_wire_dedup_restores_identity() {
        let child = WireRef::new("child");
        child.add_shard(create_shard("Pass").unwrap()).unwrap();
        let seq = Value::Seq(vec![Value::Wire(child.clone()), Value::Wire(child)]);

        let bytes = encode_value(&seq).unwrap();
        let back = decode_value(&bytes).unwrap();
        match back {
            Value::Seq(elems) => {
                let (a, b) = match (&elems[0], &elems[1]) {
                    (Value::Wire(a), Value::Wire(b)) => (a.clone(), b.clone()),
                    other => panic!("expected two wires, got {:?}", other),
                };
                assert_eq!(a, b, "dedup must restore identity");
            }
            other => panic!("expected seq, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_shard_is_an_error() {
        let mut enc = Encoder::new();
        enc.put_str("NoSuchShard");
        enc.buf.extend_from_slice(&0u32.to_le_bytes());
        enc.buf.extend_from_slice(&(-1i32).to_le_bytes());
        let mut sub = Encoder::new();
        sub.write_value(&Value::None).unwrap();
        enc.buf.extend(sub.into_bytes());
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(
            dec.read_shard(),
            Err(SerializeError::UnknownShard("NoSuchShard".into()))
        );
    }
}
