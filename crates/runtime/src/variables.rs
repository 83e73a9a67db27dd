//! Context variables: named cells resolved by scope
//!
//! A variable is a shared cell (`VarCell`). Resolution order for a lookup by
//! name, first hit wins:
//!
//! 1. current-wire locals
//! 2. any enclosing wire's locals (inner to outer)
//! 3. each enclosing wire's external table (same walk)
//! 4. the mesh's shared table
//! 5. the mesh's injected refs
//!
//! If nothing hits and the lookup is a *reference*, a fresh `None` cell is
//! created at the **innermost** wire.
//!
//! Reference counting maps onto `Arc::strong_count`: every holder of the cell
//! (the owning table plus each referencing shard) contributes one count.
//! Cells flagged external are embedder-owned storage and are exempt from the
//! leak diagnostics.

use crate::context::Context;
use crate::value::Value;
use crate::wire::WireRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared storage slot behind a variable name.
#[derive(Debug, Default)]
pub struct VarSlot {
    value: Mutex<Value>,
    external: AtomicBool,
}

impl VarSlot {
    pub fn get(&self) -> Value {
        self.value.lock().expect("variable slot poisoned").clone()
    }

    pub fn set(&self, v: Value) {
        *self.value.lock().expect("variable slot poisoned") = v;
    }

    /// In-place access, for mutations that should reuse the allocation.
    pub fn with_value<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        f(&mut self.value.lock().expect("variable slot poisoned"))
    }

    /// Storage lifetime is controlled by the embedder; exempt from refcount
    /// diagnostics and from destroy-on-release.
    pub fn is_external(&self) -> bool {
        self.external.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_external(&self) {
        self.external.store(true, Ordering::Relaxed);
    }
}

/// A reference-counted variable cell.
pub type VarCell = Arc<VarSlot>;

pub fn new_cell(value: Value) -> VarCell {
    Arc::new(VarSlot {
        value: Mutex::new(value),
        external: AtomicBool::new(false),
    })
}

/// Look a name up through the full scope chain without creating anything.
pub fn find_variable(ctx: &Context<'_>, name: &str) -> Option<VarCell> {
    // Wire locals, inner to outer
    for wire in ctx.wire_stack.iter().rev() {
        if let Some(cell) = wire.find_local(name) {
            return Some(cell);
        }
    }
    // External tables, same walk
    for wire in ctx.wire_stack.iter().rev() {
        if let Some(cell) = wire.find_external(name) {
            return Some(cell);
        }
    }
    // Mesh shared table, then injected refs (namespace prefix tried first)
    if let Some(mesh) = ctx.mesh() {
        if let Some(cell) = mesh.find_shared(name) {
            return Some(cell);
        }
        if let Some(cell) = mesh.find_ref(name) {
            return Some(cell);
        }
    }
    None
}

/// Resolve a name to a cell, creating a fresh `None` cell in the innermost
/// wire when the name is unbound anywhere.
pub fn reference_variable(ctx: &Context<'_>, name: &str) -> VarCell {
    if let Some(cell) = find_variable(ctx, name) {
        return cell;
    }
    ctx.current_wire().get_or_create_local(name)
}

/// Resolve against one wire's locals only, creating on miss.
pub fn reference_wire_variable(wire: &WireRef, name: &str) -> VarCell {
    wire.get_or_create_local(name)
}

/// Resolve against the mesh's shared table, creating on miss.
pub fn reference_global_variable(ctx: &Context<'_>, name: &str) -> Option<VarCell> {
    ctx.mesh().map(|m| m.get_or_create_shared(name))
}

/// Release a previously acquired reference. With `Arc` semantics this is a
/// drop; the function exists so embedders (and the FFI) release explicitly.
/// External cells are never destroyed here regardless of count.
pub fn release_variable(cell: VarCell) {
    drop(cell);
}

/// Install embedder-owned storage under `name` on a wire. Bypasses the
/// refcount machinery entirely.
pub fn set_external_variable(wire: &WireRef, name: &str, value: Value) -> VarCell {
    let cell = new_cell(value);
    cell.mark_external();
    wire.insert_external(name, cell.clone());
    cell
}
