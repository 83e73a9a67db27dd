//! Runtime error taxonomy
//!
//! Weft distinguishes errors by the phase that raised them:
//!
//! - `ComposeError` - static analysis; fatal diagnostics abort compose,
//!   warnings are advisory and flow through the compose callback
//! - `WarmupError` - raised while warming a wire up; aborts wire startup
//! - `ActivationError` - raised inside a shard's activate; captured into the
//!   wire's flow state and bubbled to the mesh
//! - `ParamError` - parameter slot validation failures
//! - `RegistryError` - constructing an unknown shard
//! - `SerializeError` - malformed or unknown-kind input to the decoder
//!
//! Wire stop/restart are *not* errors: they are `FlowState` values carried
//! through the context, so a stopped wire never logs as a failure.

use std::fmt;

/// Fatal compose-time diagnostic. Warnings never become a `ComposeError`;
/// they only pass through the compose callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeError {
    pub msg: String,
}

impl ComposeError {
    pub fn new(msg: impl Into<String>) -> ComposeError {
        ComposeError { msg: msg.into() }
    }
}

impl fmt::Display for ComposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compose error: {}", self.msg)
    }
}

impl std::error::Error for ComposeError {}

/// Error raised from inside a shard's `activate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationError {
    pub msg: String,
}

impl ActivationError {
    pub fn new(msg: impl Into<String>) -> ActivationError {
        ActivationError { msg: msg.into() }
    }
}

impl fmt::Display for ActivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activation error: {}", self.msg)
    }
}

impl std::error::Error for ActivationError {}

/// Error raised during `warmup`; aborts wire startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupError {
    pub msg: String,
}

impl WarmupError {
    pub fn new(msg: impl Into<String>) -> WarmupError {
        WarmupError { msg: msg.into() }
    }
}

impl fmt::Display for WarmupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warmup error: {}", self.msg)
    }
}

impl std::error::Error for WarmupError {}

impl From<WarmupError> for ActivationError {
    fn from(e: WarmupError) -> ActivationError {
        ActivationError { msg: e.msg }
    }
}

/// Parameter slot validation failure: wrong index or a value whose derived
/// type matches none of the slot's allowed types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamError {
    pub shard: String,
    pub index: usize,
    pub msg: String,
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter error: {} slot {}: {}",
            self.shard, self.index, self.msg
        )
    }
}

impl std::error::Error for ParamError {}

/// Structural wire manipulation failure: inserting an already-owned shard,
/// mutating a running wire, scheduling twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError {
    pub wire: String,
    pub msg: String,
}

impl WireError {
    pub fn new(wire: impl Into<String>, msg: impl Into<String>) -> WireError {
        WireError {
            wire: wire.into(),
            msg: msg.into(),
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire error: {}: {}", self.wire, self.msg)
    }
}

impl std::error::Error for WireError {}

/// Attempt to construct a shard whose name is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryError {
    pub name: String,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown shard: {}", self.name)
    }
}

impl std::error::Error for RegistryError {}

impl From<RegistryError> for ComposeError {
    fn from(e: RegistryError) -> ComposeError {
        ComposeError::new(e.to_string())
    }
}

/// Error during binary encode/decode. Decoding is never silently partial:
/// any malformed input surfaces as one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializeError {
    /// Input ended before the payload it promised
    UnexpectedEof,
    /// Kind byte outside the known table
    UnknownKind(u8),
    /// ShardRef names a shard missing from the registry
    UnknownShard(String),
    /// Registered hash does not match the serialized one
    ShardHashMismatch(String),
    /// Kind is known but has no canonical encoding (objects, context-bound handles)
    Unsupported(&'static str),
    /// Structurally invalid data (bad lengths, duplicate wire refs, non-UTF-8 names)
    InvalidData(String),
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializeError::UnexpectedEof => write!(f, "unexpected end of input"),
            SerializeError::UnknownKind(b) => write!(f, "unknown value kind byte {}", b),
            SerializeError::UnknownShard(name) => write!(f, "unknown shard in stream: {}", name),
            SerializeError::ShardHashMismatch(name) => {
                write!(f, "shard hash mismatch for {}", name)
            }
            SerializeError::Unsupported(what) => write!(f, "{} cannot be serialized", what),
            SerializeError::InvalidData(msg) => write!(f, "invalid data: {}", msg),
        }
    }
}

impl std::error::Error for SerializeError {}

impl From<std::str::Utf8Error> for SerializeError {
    fn from(e: std::str::Utf8Error) -> SerializeError {
        SerializeError::InvalidData(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        assert_eq!(
            ComposeError::new("bad input type").to_string(),
            "compose error: bad input type"
        );
        assert_eq!(
            ActivationError::new("boom").to_string(),
            "activation error: boom"
        );
        assert_eq!(
            RegistryError {
                name: "Nope".into()
            }
            .to_string(),
            "unknown shard: Nope"
        );
        assert_eq!(
            SerializeError::UnknownKind(200).to_string(),
            "unknown value kind byte 200"
        );
    }

    #[test]
    fn test_warmup_into_activation() {
        let w = WarmupError::new("no file");
        let a: ActivationError = w.into();
        assert_eq!(a.msg, "no file");
    }
}
