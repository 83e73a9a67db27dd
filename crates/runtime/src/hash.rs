//! 128-bit content hashing of values, shards and wires
//!
//! The hash is stable across runs and processes: it feeds the serializer's
//! wire dedup map and compose caches. Rules:
//!
//! - ordered containers (Seq, Array) hash in element order
//! - unordered containers hash order-independently: Table iterates its sorted
//!   keys, Set sorts the element digests before folding them in
//! - shards hash as (name, each parameter's hash, optional state)
//! - wires hash as (name, looped, unsafe, shard hashes, variable pairs);
//!   recursion through wire graphs is de-duplicated with a per-call visited
//!   set, so self-referential graphs terminate
//!
//! Depth is bounded: a tree deeper than the recursion limit reports
//! `HashError::TooDeep` instead of overflowing the stack.

use crate::shard::ShardRef;
use crate::value::{Value, write_blittable_payload};
use crate::wire::WireRef;
use sha2::{Digest, Sha256};
use std::fmt;

/// Recursion limit for value trees. Generous for real data, tight enough to
/// fail fast on adversarial nesting.
pub const MAX_HASH_DEPTH: usize = 100;

/// A 128-bit content hash (the first half of a SHA-256 digest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash128(pub u128);

impl Hash128 {
    pub fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Hash128 {
        Hash128(u128::from_le_bytes(bytes))
    }
}

impl fmt::Display for Hash128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Value tree exceeded `MAX_HASH_DEPTH`
    TooDeep,
    /// Wire body is inside a running coroutine; content is unavailable
    WireBusy(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashError::TooDeep => write!(f, "value tree exceeds hashing depth limit"),
            HashError::WireBusy(name) => write!(f, "wire {} is running and cannot be hashed", name),
        }
    }
}

impl std::error::Error for HashError {}

/// Content hash of a value.
pub fn hash_value(v: &Value) -> Result<Hash128, HashError> {
    let mut hasher = ContentHasher::new();
    let digest = hasher.value_digest(v, 0)?;
    Ok(fold(digest))
}

/// Content hash of a shard: name, parameters, optional state.
pub fn hash_shard(shard: &ShardRef) -> Result<Hash128, HashError> {
    let mut hasher = ContentHasher::new();
    let digest = hasher.shard_digest(shard, 0)?;
    Ok(fold(digest))
}

/// Content hash of a wire, de-duplicating revisited wires.
pub fn hash_wire(wire: &WireRef) -> Result<Hash128, HashError> {
    let mut hasher = ContentHasher::new();
    let digest = hasher.wire_digest(wire, 0)?;
    Ok(fold(digest))
}

fn fold(digest: [u8; 32]) -> Hash128 {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Hash128(u128::from_le_bytes(bytes))
}

struct ContentHasher {
    /// Wire addresses in first-visit order; revisits hash as back-references
    visited: Vec<usize>,
}

impl ContentHasher {
    fn new() -> ContentHasher {
        ContentHasher {
            visited: Vec::new(),
        }
    }

    fn value_digest(&mut self, v: &Value, depth: usize) -> Result<[u8; 32], HashError> {
        if depth > MAX_HASH_DEPTH {
            return Err(HashError::TooDeep);
        }
        let mut h = Sha256::new();
        h.update([v.kind() as u8]);
        match v {
            Value::None => {}
            _ if v.kind().is_blittable() => {
                let mut payload = Vec::with_capacity(16);
                write_blittable_payload(&mut payload, v);
                h.update(&payload);
            }
            Value::String(s) | Value::Path(s) | Value::ContextVar(s) => {
                h.update(s.as_bytes());
            }
            Value::Bytes(b) => h.update(b),
            Value::Image(img) => {
                h.update([img.channels]);
                h.update(img.flags.to_le_bytes());
                h.update(img.width.to_le_bytes());
                h.update(img.height.to_le_bytes());
                h.update(&img.data);
            }
            Value::Audio(audio) => {
                h.update(audio.channels.to_le_bytes());
                h.update(audio.sample_rate.to_le_bytes());
                for s in &audio.samples {
                    h.update(s.to_le_bytes());
                }
            }
            Value::Seq(elems) => {
                for e in elems {
                    h.update(self.value_digest(e, depth + 1)?);
                }
            }
            Value::Array(a) => {
                h.update([a.kind as u8]);
                h.update(&a.data);
            }
            Value::Table(entries) => {
                // BTreeMap iterates key-sorted; insertion order cannot leak in
                for (k, e) in entries {
                    h.update((k.len() as u32).to_le_bytes());
                    h.update(k.as_bytes());
                    h.update(self.value_digest(e, depth + 1)?);
                }
            }
            Value::Set(set) => {
                let mut digests = Vec::with_capacity(set.0.len());
                for e in &set.0 {
                    digests.push(self.value_digest(e, depth + 1)?);
                }
                digests.sort_unstable();
                for d in digests {
                    h.update(d);
                }
            }
            Value::Shard(s) => h.update(self.shard_digest(s, depth + 1)?),
            Value::Wire(w) => h.update(self.wire_digest(w, depth + 1)?),
            Value::Object(o) => {
                h.update(o.vendor.to_le_bytes());
                h.update(o.type_id.to_le_bytes());
                // Identity, matching object equality semantics
                let ptr = std::sync::Arc::as_ptr(&o.data) as *const () as usize as u64;
                h.update(ptr.to_le_bytes());
            }
            _ => unreachable!("blittable arm covers the rest"),
        }
        Ok(h.finalize().into())
    }

    fn shard_digest(&mut self, shard: &ShardRef, depth: usize) -> Result<[u8; 32], HashError> {
        if depth > MAX_HASH_DEPTH {
            return Err(HashError::TooDeep);
        }
        let (name, params, state) = shard.with(|inst| {
            let n = inst.shard.parameters().len();
            let params: Vec<Value> = (0..n).map(|i| inst.shard.get_param(i)).collect();
            (
                inst.shard.name().to_string(),
                params,
                inst.shard.get_state(),
            )
        });
        let mut h = Sha256::new();
        h.update(name.as_bytes());
        for p in &params {
            h.update(self.value_digest(p, depth + 1)?);
        }
        if let Some(state) = state {
            h.update([1u8]);
            h.update(self.value_digest(&state, depth + 1)?);
        } else {
            h.update([0u8]);
        }
        Ok(h.finalize().into())
    }

    fn wire_digest(&mut self, wire: &WireRef, depth: usize) -> Result<[u8; 32], HashError> {
        if depth > MAX_HASH_DEPTH {
            return Err(HashError::TooDeep);
        }
        let addr = wire.addr();
        if let Some(index) = self.visited.iter().position(|&a| a == addr) {
            // Back-reference: stable within this hashing pass
            let mut h = Sha256::new();
            h.update([0xffu8]);
            h.update((index as u64).to_le_bytes());
            return Ok(h.finalize().into());
        }
        self.visited.push(addr);

        let mut h = Sha256::new();
        h.update(wire.name().as_bytes());
        let flags = wire
            .with_body(|b| (b.looped, b.unsafe_))
            .ok_or_else(|| HashError::WireBusy(wire.name().to_string()))?;
        h.update([flags.0 as u8, flags.1 as u8]);
        let shards = wire.shards();
        for s in &shards {
            h.update(self.shard_digest(s, depth + 1)?);
        }
        for (name, value) in wire.locals_snapshot() {
            h.update((name.len() as u32).to_le_bytes());
            h.update(name.as_bytes());
            h.update(self.value_digest(&value, depth + 1)?);
        }
        Ok(h.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SetData;
    use std::collections::BTreeMap;

    #[test]
    fn test_hash_stable_for_equal_values() {
        let a = Value::Seq(vec![Value::Int(1), Value::String("x".into())]);
        let b = Value::Seq(vec![Value::Int(1), Value::String("x".into())]);
        assert_eq!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn test_seq_hash_is_order_sensitive() {
        let a = Value::Seq(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::Seq(vec![Value::Int(2), Value::Int(1)]);
        assert_ne!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn test_set_hash_is_order_independent() {
        let a = Value::Set(SetData(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        let b = Value::Set(SetData(vec![Value::Int(3), Value::Int(1), Value::Int(2)]));
        assert_eq!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn test_table_hash_ignores_insertion_order() {
        let mut m1 = BTreeMap::new();
        m1.insert("a".to_string(), Value::Int(1));
        m1.insert("b".to_string(), Value::Int(2));
        let mut m2 = BTreeMap::new();
        m2.insert("b".to_string(), Value::Int(2));
        m2.insert("a".to_string(), Value::Int(1));
        assert_eq!(
            hash_value(&Value::Table(m1)).unwrap(),
            hash_value(&Value::Table(m2)).unwrap()
        );
    }

    #[test]
    fn test_kind_participates() {
        assert_ne!(
            hash_value(&Value::Int(0)).unwrap(),
            hash_value(&Value::Float(0.0)).unwrap()
        );
        assert_ne!(
            hash_value(&Value::String("p".into())).unwrap(),
            hash_value(&Value::Path("p".into())).unwrap()
        );
    }

    #[test]
    fn test_depth_limit_errors_not_overflows() {
        let mut v = Value::Int(0);
        for _ in 0..(MAX_HASH_DEPTH + 10) {
            v = Value::Seq(vec![v]);
        }
        assert_eq!(hash_value(&v), Err(HashError::TooDeep));
    }

    #[test]
    fn test_wire_hash_and_dedup() {
        use crate::wire::WireRef;
        let w1 = WireRef::new("w");
        let w2 = WireRef::new("w");
        assert_eq!(hash_wire(&w1).unwrap(), hash_wire(&w2).unwrap());

        // The same wire referenced twice hashes identically in one pass
        let seq = Value::Seq(vec![Value::Wire(w1.clone()), Value::Wire(w1.clone())]);
        let h1 = hash_value(&seq).unwrap();
        let h2 = hash_value(&seq).unwrap();
        assert_eq!(h1, h2);
    }
}
