//! The built-in operator set
//!
//! One module per family, registered into the shard factory table by
//! `register_core_shards` (invoked lazily by `create_shard`). These are the
//! operators the composer special-cases, the runner inline-dispatches, and
//! the serializer round-trips; richer operator libraries plug in through the
//! same registry.

pub mod core;
pub mod flow;
pub mod fs;
pub mod math;
pub mod wires;

use crate::shard::register_shard;

/// Register every built-in shard. Idempotent via the registry's last-writer
/// semantics; `ensure_core_shards` guards the call anyway.
pub(crate) fn register_core_shards() {
    // Core
    register_shard("Const", || Box::new(core::ConstShard::default()));
    register_shard("Pass", || Box::new(core::PassShard));
    register_shard("Input", || Box::new(core::InputShard));
    register_shard("Comment", || Box::new(core::CommentShard::default()));
    register_shard("Log", || Box::new(core::LogShard::default()));
    register_shard("Pause", || Box::new(core::PauseShard::default()));
    register_shard("Set", || Box::new(core::SetShard::new(false)));
    register_shard("Ref", || Box::new(core::SetShard::new(true)));
    register_shard("Get", || Box::new(core::GetShard::default()));
    register_shard("Update", || Box::new(core::UpdateShard::default()));
    register_shard("Push", || Box::new(core::PushShard::default()));
    register_shard("Swap", || Box::new(core::SwapShard::default()));
    register_shard("Once", || Box::new(core::OnceShard::default()));
    register_shard("Repeat", || Box::new(core::RepeatShard::default()));
    register_shard("ForRange", || Box::new(core::ForRangeShard::default()));

    // Flow
    register_shard("Return", || Box::new(flow::ReturnShard));
    register_shard("Restart", || Box::new(flow::RestartShard));
    register_shard("Stop", || Box::new(flow::StopShard));
    register_shard("Fail", || Box::new(flow::FailShard::default()));
    register_shard("And", || Box::new(flow::AndShard));
    register_shard("Or", || Box::new(flow::OrShard));
    register_shard("Not", || Box::new(flow::NotShard));

    // Comparison
    register_shard("Is", || Box::new(math::CompareShard::new(math::CompareOp::Is)));
    register_shard("IsNot", || {
        Box::new(math::CompareShard::new(math::CompareOp::IsNot))
    });
    register_shard("IsMore", || {
        Box::new(math::CompareShard::new(math::CompareOp::IsMore))
    });
    register_shard("IsLess", || {
        Box::new(math::CompareShard::new(math::CompareOp::IsLess))
    });
    register_shard("IsMoreEqual", || {
        Box::new(math::CompareShard::new(math::CompareOp::IsMoreEqual))
    });
    register_shard("IsLessEqual", || {
        Box::new(math::CompareShard::new(math::CompareOp::IsLessEqual))
    });

    // Math
    register_shard("Math.Add", || Box::new(math::MathShard::new(math::MathOp::Add)));
    register_shard("Math.Subtract", || {
        Box::new(math::MathShard::new(math::MathOp::Subtract))
    });
    register_shard("Math.Multiply", || {
        Box::new(math::MathShard::new(math::MathOp::Multiply))
    });
    register_shard("Math.Divide", || {
        Box::new(math::MathShard::new(math::MathOp::Divide))
    });
    register_shard("Math.Mod", || Box::new(math::MathShard::new(math::MathOp::Mod)));
    register_shard("Math.Xor", || Box::new(math::MathShard::new(math::MathOp::Xor)));
    register_shard("Math.And", || Box::new(math::MathShard::new(math::MathOp::And)));
    register_shard("Math.Or", || Box::new(math::MathShard::new(math::MathOp::Or)));

    // Subwires
    register_shard("Do", || Box::new(wires::DoShard::default()));
    register_shard("Branch", || Box::new(wires::BranchShard::default()));
    register_shard("Detach", || Box::new(wires::DetachShard::default()));

    // Blocking I/O
    register_shard("FS.Read", || Box::new(fs::FsReadShard::default()));
}
