//! Weft Runtime: a dataflow wire runtime
//!
//! Weft composes sequences of typed operators ("shards") into coroutine-backed
//! pipelines ("wires") that are multiplexed over a shared cooperative
//! scheduler ("mesh"). Key design principles:
//!
//! - Value: tagged variant values, blittable or owning, with allocation-reusing
//!   deep clone (`clone_into`)
//! - Shard: an opaque operator with typed inputs/outputs, parameters and an
//!   activate function; uniquely owned by at most one wire
//! - Compose: a static analysis pass that infers types and resolves variable
//!   scopes before anything runs
//! - Wire: one stackful coroutine per pipeline; suspension points are explicit
//!   (`suspend`, looped-iteration yields, blocking-work awaits)
//! - Mesh: single-threaded cooperative scheduling; blocking calls are bridged
//!   to an off-thread worker pool

pub mod compose;
pub mod context;
pub mod error;
pub mod ffi;
pub mod hash;
pub mod mesh;
pub mod pool;
pub mod serialize;
pub mod shard;
pub mod shards;
pub mod types;
pub mod value;
pub mod variables;
pub mod wire;

// Re-export key types so embedders rarely need to reach into modules
pub use compose::{ComposeCallback, ComposeResult, compose_shards, compose_wire};
pub use context::{Context, FlowState, suspend};
pub use error::{
    ActivationError, ComposeError, ParamError, RegistryError, SerializeError, WarmupError,
};
pub use hash::{Hash128, hash_value};
pub use mesh::{Mesh, MeshObserver};
pub use pool::run_blocking;
pub use shard::{
    InlineShard, InstanceData, ParamInfo, Shard, ShardRef, create_shard, register_shard,
};
pub use types::{ExposedInfo, TypeDetail, TypeInfo, Types, match_types};
pub use value::{Value, ValueKind};
pub use variables::VarCell;
pub use wire::{WireRef, WireState};
