//! C-shaped embedding API
//!
//! Hosts link against an ABI-stable vtable (`WeftCoreVTable`, obtained from
//! `weft_interface`) of plain function pointers. Handles cross the boundary
//! as raw pointers to boxed runtime objects:
//!
//! - `*mut Value` - a boxed value (`weft_alloc_var` / `weft_free_var`)
//! - `*mut WireRef` / `*mut Mesh` / `*mut ShardRef` - boxed shared handles
//! - `*mut VarCell` - a boxed variable reference; freeing releases it
//! - `*mut c_void` context cookies - valid only inside an activate callback
//!
//! Returned C strings point into a thread-local cache and are valid until the
//! next call that returns a string on the same thread.
//!
//! External shards register through `ExternShardDesc`: a user pointer plus
//! function pointers. They run on the mesh's thread only.

use crate::context::Context;
use crate::mesh::Mesh;
use crate::shard::{Shard, ShardRef, create_shard, register_shard};
use crate::types::{EnumTypeInfo, ObjectTypeInfo, TypeInfo, Types, register_enum_type, register_object_type};
use crate::value::{Value, clone_into, destroy};
use crate::variables::{VarCell, release_variable, set_external_variable};
use crate::wire::{WireRef, get_wire_info};
use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::{Mutex, OnceLock};

thread_local! {
    /// Cache keeping returned C strings alive until the next string-returning
    /// call on this thread
    static RETURNED_STRING: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn return_string(s: String) -> *const c_char {
    RETURNED_STRING.with(|cache| {
        let safe: String = s.chars().map(|c| if c == '\0' { '?' } else { c }).collect();
        let cstring = CString::new(safe).expect("null bytes already replaced");
        let ptr = cstring.as_ptr();
        *cache.borrow_mut() = Some(cstring);
        ptr
    })
}

unsafe fn cstr<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

const ALLOC_ALIGN: usize = 16;

/// Allocate `size` bytes, 16-byte aligned and zero-initialized. The size is
/// stashed in a header so `weft_free` needs only the pointer.
///
/// # Safety
/// The returned pointer must be released with `weft_free` only.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_alloc(size: u64) -> *mut u8 {
    let total = size as usize + ALLOC_ALIGN;
    let layout = std::alloc::Layout::from_size_align(total, ALLOC_ALIGN)
        .expect("allocation layout invalid");
    let base = unsafe { std::alloc::alloc_zeroed(layout) };
    if base.is_null() {
        return std::ptr::null_mut();
    }
    unsafe {
        (base as *mut u64).write(size);
        base.add(ALLOC_ALIGN)
    }
}

/// Free a pointer returned by `weft_alloc`. Null is a no-op.
///
/// # Safety
/// `ptr` must come from `weft_alloc` and not have been freed before.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        let base = ptr.sub(ALLOC_ALIGN);
        let size = (base as *const u64).read() as usize;
        let layout = std::alloc::Layout::from_size_align(size + ALLOC_ALIGN, ALLOC_ALIGN)
            .expect("allocation layout invalid");
        std::alloc::dealloc(base, layout);
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Allocate a fresh `None` value.
#[unsafe(no_mangle)]
pub extern "C" fn weft_alloc_var() -> *mut Value {
    Box::into_raw(Box::new(Value::None))
}

/// Free a boxed value.
///
/// # Safety
/// `v` must come from this API and not have been freed before.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_free_var(v: *mut Value) {
    if !v.is_null() {
        drop(unsafe { Box::from_raw(v) });
    }
}

/// Deep-copy `src` into `dst`, reusing `dst`'s buffers where possible.
///
/// # Safety
/// Both pointers must be valid boxed values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_clone_var(dst: *mut Value, src: *const Value) {
    unsafe { clone_into(&mut *dst, &*src) }
}

/// Destroy the payload in place, leaving `None` behind. Idempotent.
///
/// # Safety
/// `v` must be a valid boxed value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_destroy_var(v: *mut Value) {
    unsafe { destroy(&mut *v) }
}

/// Append to a Seq value. A non-Seq destination becomes a one-element Seq.
///
/// # Safety
/// Both pointers must be valid boxed values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_seq_push(seq: *mut Value, v: *const Value) {
    let (seq, v) = unsafe { (&mut *seq, &*v) };
    match seq {
        Value::Seq(elems) => elems.push(v.clone()),
        slot => *slot = Value::Seq(vec![v.clone()]),
    }
}

/// Resize a Seq, filling new slots with `None`. Non-Seq values become a Seq.
///
/// # Safety
/// `seq` must be a valid boxed value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_seq_resize(seq: *mut Value, len: u32) {
    let seq = unsafe { &mut *seq };
    if !matches!(seq, Value::Seq(_)) {
        *seq = Value::Seq(Vec::new());
    }
    if let Value::Seq(elems) = seq {
        elems.resize(len as usize, Value::None);
    }
}

/// Pop the last element into `out`. Returns false on empty or non-Seq.
///
/// # Safety
/// Both pointers must be valid boxed values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_seq_pop(seq: *mut Value, out: *mut Value) -> bool {
    let (seq, out) = unsafe { (&mut *seq, &mut *out) };
    match seq {
        Value::Seq(elems) => match elems.pop() {
            Some(v) => {
                *out = v;
                true
            }
            None => false,
        },
        _ => false,
    }
}

/// Insert at `index` (clamped to the length).
///
/// # Safety
/// Both pointers must be valid boxed values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_seq_insert(seq: *mut Value, index: u32, v: *const Value) {
    let (seq, v) = unsafe { (&mut *seq, &*v) };
    if !matches!(seq, Value::Seq(_)) {
        *seq = Value::Seq(Vec::new());
    }
    if let Value::Seq(elems) = seq {
        let at = (index as usize).min(elems.len());
        elems.insert(at, v.clone());
    }
}

/// Remove the element at `index`. Out-of-range is a no-op.
///
/// # Safety
/// `seq` must be a valid boxed value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_seq_delete(seq: *mut Value, index: u32) {
    let seq = unsafe { &mut *seq };
    if let Value::Seq(elems) = seq {
        if (index as usize) < elems.len() {
            elems.remove(index as usize);
        }
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// An externally implemented shard: a user cookie plus callbacks.
///
/// `activate` receives the context cookie (forward it to `weft_suspend` /
/// `weft_async_activate`) and the input; it returns a boxed output value, or
/// null to fail the activation (set the message via the returned string of a
/// prior call or leave a generic failure).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExternShardDesc {
    pub user: *mut c_void,
    pub activate: unsafe extern "C" fn(user: *mut c_void, ctx: *mut c_void, input: *const Value) -> *mut Value,
    pub cleanup: Option<unsafe extern "C" fn(user: *mut c_void)>,
    pub destroy: Option<unsafe extern "C" fn(user: *mut c_void)>,
}

pub type ExternShardCtor = unsafe extern "C" fn() -> ExternShardDesc;

struct ExternShard {
    name: &'static str,
    desc: ExternShardDesc,
}

// The mesh drives extern shards from a single thread; the host contract
// (documented on ExternShardDesc) forbids cross-thread use of `user`.
unsafe impl Send for ExternShard {}

impl Shard for ExternShard {
    fn name(&self) -> &'static str {
        self.name
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn activate(
        &mut self,
        ctx: &mut Context<'_>,
        input: &Value,
    ) -> Result<Value, crate::error::ActivationError> {
        let ctx_ptr = ctx as *mut Context<'_> as *mut c_void;
        let out = unsafe { (self.desc.activate)(self.desc.user, ctx_ptr, input as *const Value) };
        if out.is_null() {
            return Err(crate::error::ActivationError::new(format!(
                "external shard {} failed",
                self.name
            )));
        }
        Ok(*unsafe { Box::from_raw(out) })
    }

    fn cleanup(&mut self) {
        if let Some(f) = self.desc.cleanup {
            unsafe { f(self.desc.user) }
        }
    }
}

impl Drop for ExternShard {
    fn drop(&mut self) {
        if let Some(f) = self.desc.destroy {
            unsafe { f(self.desc.user) }
        }
    }
}

/// Register an externally implemented shard under `name`.
///
/// # Safety
/// `name` must be a valid C string; `ctor` must stay callable for the process
/// lifetime and produce descriptors whose callbacks outlive their instances.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_register_shard(name: *const c_char, ctor: ExternShardCtor) {
    let name: &'static str = Box::leak(unsafe { cstr(name) }.to_string().into_boxed_str());
    register_shard(name, move || {
        Box::new(ExternShard {
            name,
            desc: unsafe { ctor() },
        })
    });
}

/// Construct a registered shard; null when the name is unknown.
///
/// # Safety
/// `name` must be a valid C string. Free the result with `weft_free_shard`
/// or hand it to a wire.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_create_shard(name: *const c_char) -> *mut ShardRef {
    match create_shard(unsafe { cstr(name) }) {
        Ok(shard) => Box::into_raw(Box::new(shard)),
        Err(e) => {
            tracing::error!(error = %e, "shard construction failed");
            std::ptr::null_mut()
        }
    }
}

/// Free an unowned shard handle.
///
/// # Safety
/// `shard` must come from `weft_create_shard` and not have been added to a
/// wire.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_free_shard(shard: *mut ShardRef) {
    if !shard.is_null() {
        drop(unsafe { Box::from_raw(shard) });
    }
}

/// Set a shard parameter; returns false (and logs) on validation failure.
///
/// # Safety
/// `shard` and `value` must be valid handles from this API.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_set_param(shard: *mut ShardRef, index: u32, value: *const Value) -> bool {
    let (shard, value) = unsafe { (&*shard, &*value) };
    match shard.set_param(index as usize, value) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "set_param failed");
            false
        }
    }
}

/// # Safety
/// `name` must be a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_register_object_type(vendor: i32, type_id: i32, name: *const c_char) {
    register_object_type(
        vendor,
        type_id,
        ObjectTypeInfo {
            name: unsafe { cstr(name) }.to_string(),
        },
    );
}

/// # Safety
/// `name` must be a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_register_enum_type(vendor: i32, type_id: i32, name: *const c_char) {
    register_enum_type(
        vendor,
        type_id,
        EnumTypeInfo {
            name: unsafe { cstr(name) }.to_string(),
            labels: Vec::new(),
        },
    );
}

/// # Safety
/// `name` must be a valid C string; `f` must stay callable until
/// unregistered.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_register_run_loop_callback(name: *const c_char, f: extern "C" fn()) {
    crate::mesh::register_run_loop_callback(unsafe { cstr(name) }.to_string(), move || f());
}

/// # Safety
/// `name` must be a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_unregister_run_loop_callback(name: *const c_char) {
    crate::mesh::unregister_run_loop_callback(unsafe { cstr(name) });
}

/// # Safety
/// `name` must be a valid C string; `f` must stay callable until
/// unregistered.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_register_exit_callback(name: *const c_char, f: extern "C" fn()) {
    crate::mesh::register_exit_callback(unsafe { cstr(name) }.to_string(), move || f());
}

/// # Safety
/// `name` must be a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_unregister_exit_callback(name: *const c_char) {
    crate::mesh::unregister_exit_callback(unsafe { cstr(name) });
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// Acquire a reference to a wire-local variable, creating it on first use.
///
/// # Safety
/// `wire` must be a valid wire handle; `name` a valid C string. Release the
/// result with `weft_release_variable`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_reference_wire_variable(
    wire: *const WireRef,
    name: *const c_char,
) -> *mut VarCell {
    let wire = unsafe { &*wire };
    let cell = crate::variables::reference_wire_variable(wire, unsafe { cstr(name) });
    Box::into_raw(Box::new(cell))
}

/// Release a variable reference obtained from this API.
///
/// # Safety
/// `cell` must come from this API and not have been released before.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_release_variable(cell: *mut VarCell) {
    if !cell.is_null() {
        release_variable(*unsafe { Box::from_raw(cell) });
    }
}

/// Copy the referenced variable's current value into `out`.
///
/// # Safety
/// Both pointers must be valid handles from this API.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_get_variable(cell: *const VarCell, out: *mut Value) {
    let (cell, out) = unsafe { (&*cell, &mut *out) };
    cell.with_value(|v| clone_into(out, v));
}

/// Overwrite the referenced variable with `value`.
///
/// # Safety
/// Both pointers must be valid handles from this API.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_set_variable(cell: *const VarCell, value: *const Value) {
    let (cell, value) = unsafe { (&*cell, &*value) };
    cell.with_value(|v| clone_into(v, value));
}

/// Install embedder-owned storage on a wire, bypassing refcount accounting.
///
/// # Safety
/// `wire` and `value` must be valid handles; `name` a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_set_external_variable(
    wire: *const WireRef,
    name: *const c_char,
    value: *const Value,
) {
    let (wire, value) = unsafe { (&*wire, &*value) };
    set_external_variable(wire, unsafe { cstr(name) }, value.clone());
}

/// Remove an external variable installed earlier.
///
/// # Safety
/// `wire` must be a valid wire handle; `name` a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_remove_external_variable(wire: *const WireRef, name: *const c_char) {
    unsafe { &*wire }.remove_external(unsafe { cstr(name) });
}

// ---------------------------------------------------------------------------
// Compose / run
// ---------------------------------------------------------------------------

/// Compose a wire under default instance data. Diagnostics go to the log;
/// returns false on fatal compose errors.
///
/// # Safety
/// `wire` must be a valid wire handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_compose_wire(wire: *const WireRef) -> bool {
    let wire = unsafe { &*wire };
    let mut cb = |shard: &str, msg: &str, warning: bool| {
        if warning {
            tracing::warn!(shard = %shard, "{}", msg);
        } else {
            tracing::error!(shard = %shard, "{}", msg);
        }
    };
    crate::compose::compose_wire(wire, &crate::shard::InstanceData::default(), Some(&mut cb))
        .is_ok()
}

fn shards_of(value: &Value) -> Option<Vec<ShardRef>> {
    match value {
        Value::Seq(elems) => {
            let mut out = Vec::with_capacity(elems.len());
            for e in elems {
                match e {
                    Value::Shard(s) => out.push(s.clone()),
                    _ => return None,
                }
            }
            Some(out)
        }
        Value::Shard(s) => Some(vec![s.clone()]),
        _ => None,
    }
}

/// Compose a bare shard sequence (a Seq of shard values) under default
/// instance data. Diagnostics go to the log.
///
/// # Safety
/// `shards` must be a valid boxed value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_compose_shards(shards: *const Value) -> bool {
    let Some(list) = shards_of(unsafe { &*shards }) else {
        tracing::error!("compose_shards expects a sequence of shards");
        return false;
    };
    let mut cb = |shard: &str, msg: &str, warning: bool| {
        if warning {
            tracing::warn!(shard = %shard, "{}", msg);
        } else {
            tracing::error!(shard = %shard, "{}", msg);
        }
    };
    crate::compose::compose_shards(&list, &crate::shard::InstanceData::default(), Some(&mut cb))
        .is_ok()
}

/// Run a shard sequence inside the current activation. Returns the boxed
/// output, or null on failure.
///
/// # Safety
/// `ctx` must be a live activate-context cookie; `shards` and `input` valid
/// boxed values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_run_shards(
    ctx: *mut c_void,
    shards: *const Value,
    input: *const Value,
) -> *mut Value {
    let ctx = unsafe { &mut *(ctx as *mut Context<'_>) };
    let Some(list) = shards_of(unsafe { &*shards }) else {
        tracing::error!("run_shards expects a sequence of shards");
        return std::ptr::null_mut();
    };
    match crate::wire::run_shards(ctx, &list, unsafe { &*input }) {
        Ok(outcome) => Box::into_raw(Box::new(outcome.output)),
        Err(e) => {
            tracing::error!(error = %e, "run_shards failed");
            std::ptr::null_mut()
        }
    }
}

/// `weft_run_shards`, also writing the 128-bit activation hash into
/// `hash_out` (16 bytes, little-endian).
///
/// # Safety
/// As `weft_run_shards`; `hash_out` must point to 16 writable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_run_shards_hashed(
    ctx: *mut c_void,
    shards: *const Value,
    input: *const Value,
    hash_out: *mut u8,
) -> *mut Value {
    let ctx = unsafe { &mut *(ctx as *mut Context<'_>) };
    let Some(list) = shards_of(unsafe { &*shards }) else {
        tracing::error!("run_shards expects a sequence of shards");
        return std::ptr::null_mut();
    };
    match crate::wire::run_shards_hashed(ctx, &list, unsafe { &*input }) {
        Ok((outcome, hash)) => {
            let bytes = hash.to_le_bytes();
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), hash_out, 16) };
            Box::into_raw(Box::new(outcome.output))
        }
        Err(e) => {
            tracing::error!(error = %e, "run_shards failed");
            std::ptr::null_mut()
        }
    }
}

/// Cooperatively suspend from inside an external shard's activate.
/// Returns 0 on Continue, 1 on Stop, 2 on Restart, 3 on failure.
///
/// # Safety
/// `ctx` must be the context cookie passed into the running activate
/// callback, on the same thread, within the same call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_suspend(ctx: *mut c_void, seconds: f64) -> i32 {
    let ctx = unsafe { &mut *(ctx as *mut Context<'_>) };
    match crate::context::suspend(ctx, seconds) {
        Ok(crate::context::FlowState::Stop) => 1,
        Ok(crate::context::FlowState::Restart) => 2,
        Ok(crate::context::FlowState::Error(_)) => 3,
        Ok(_) => 0,
        Err(_) => 3,
    }
}

/// Run a blocking host callback on the work pool while the wire suspends.
/// Returns the boxed result of `proc`, or null if it failed or was
/// cancelled.
///
/// # Safety
/// `ctx` must be a live activate-context cookie; `proc`/`cancel` must be
/// callable from any thread with `user`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_async_activate(
    ctx: *mut c_void,
    user: *mut c_void,
    proc: unsafe extern "C" fn(user: *mut c_void) -> *mut Value,
    cancel: Option<unsafe extern "C" fn(user: *mut c_void)>,
) -> *mut Value {
    let ctx = unsafe { &mut *(ctx as *mut Context<'_>) };
    // Pointers are not Send; carry them as integers under the host's
    // any-thread contract for `proc`
    let user_addr = user as usize;
    let result = crate::pool::run_blocking(
        ctx,
        move || {
            let out = unsafe { proc(user_addr as *mut c_void) };
            if out.is_null() {
                Err("async activation failed".to_string())
            } else {
                Ok(out as usize)
            }
        },
        cancel.map(|c| move || unsafe { c(user_addr as *mut c_void) }),
    );
    match result {
        Ok(addr) => addr as *mut Value,
        Err(e) => {
            tracing::error!(error = %e, "async activation failed");
            std::ptr::null_mut()
        }
    }
}

// ---------------------------------------------------------------------------
// Mesh
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn weft_create_mesh() -> *mut Mesh {
    Box::into_raw(Box::new(Mesh::new()))
}

/// # Safety
/// `mesh` must come from `weft_create_mesh` and not have been destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_destroy_mesh(mesh: *mut Mesh) {
    if !mesh.is_null() {
        let mesh = unsafe { Box::from_raw(mesh) };
        mesh.terminate();
    }
}

/// Schedule a wire with compose. Returns false on failure.
///
/// # Safety
/// All pointers must be valid handles from this API; `input` may be null for
/// a `None` input.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_schedule(mesh: *const Mesh, wire: *const WireRef, input: *const Value) -> bool {
    let (mesh, wire) = unsafe { (&*mesh, &*wire) };
    let input = if input.is_null() {
        Value::None
    } else {
        unsafe { &*input }.clone()
    };
    match mesh.schedule(wire.clone(), input, true) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "schedule failed");
            false
        }
    }
}

/// # Safety
/// Both pointers must be valid handles from this API.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_unschedule(mesh: *const Mesh, wire: *const WireRef) {
    unsafe { &*mesh }.unschedule(unsafe { &*wire });
}

/// Tick the mesh once. Returns true iff no wire failed.
///
/// # Safety
/// `mesh` must be a valid mesh handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_tick(mesh: *const Mesh) -> bool {
    unsafe { &*mesh }.tick()
}

/// # Safety
/// `mesh` must be a valid mesh handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_is_empty(mesh: *const Mesh) -> bool {
    unsafe { &*mesh }.is_empty()
}

#[unsafe(no_mangle)]
pub extern "C" fn weft_sleep(seconds: f64, run_callbacks: bool) {
    crate::mesh::sleep(seconds, run_callbacks);
}

// ---------------------------------------------------------------------------
// Wires
// ---------------------------------------------------------------------------

/// # Safety
/// `name` must be a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_create_wire(name: *const c_char) -> *mut WireRef {
    Box::into_raw(Box::new(WireRef::new(unsafe { cstr(name) })))
}

/// # Safety
/// `wire` must be a valid wire handle; `name` a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_set_wire_name(wire: *const WireRef, name: *const c_char) {
    unsafe { &*wire }.set_name(unsafe { cstr(name) });
}

/// # Safety
/// `wire` must be a valid wire handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_set_wire_looped(wire: *const WireRef, looped: bool) {
    unsafe { &*wire }.set_looped(looped);
}

/// # Safety
/// `wire` must be a valid wire handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_set_wire_unsafe(wire: *const WireRef, unsafe_: bool) {
    unsafe { &*wire }.set_unsafe(unsafe_);
}

/// Move a shard handle into a wire. The handle is consumed on success and
/// left with the caller on failure (which returns false).
///
/// # Safety
/// Both pointers must be valid handles from this API.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_add_shard(wire: *const WireRef, shard: *mut ShardRef) -> bool {
    let wire = unsafe { &*wire };
    let shard_ref = unsafe { &*shard }.clone();
    match wire.add_shard(shard_ref) {
        Ok(()) => {
            drop(unsafe { Box::from_raw(shard) });
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "add_shard failed");
            false
        }
    }
}

/// Remove a shard by handle, releasing its ownership flag.
///
/// # Safety
/// Both pointers must be valid handles from this API.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_remove_shard(wire: *const WireRef, shard: *const ShardRef) -> bool {
    let (wire, shard) = unsafe { (&*wire, &*shard) };
    wire.remove_shard(shard).is_ok()
}

/// Request a graceful stop; honored at the wire's next suspension point.
///
/// # Safety
/// `wire` must be a valid wire handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_stop_wire(wire: *const WireRef) {
    unsafe { &*wire }.request_stop();
}

/// # Safety
/// `wire` must come from this API and not have been destroyed before.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_destroy_wire(wire: *mut WireRef) {
    if !wire.is_null() {
        drop(unsafe { Box::from_raw(wire) });
    }
}

/// Wire summary for hosts.
#[repr(C)]
pub struct WeftWireInfo {
    pub name: *const c_char,
    pub looped: bool,
    pub unsafe_: bool,
    pub failed: bool,
    pub shard_count: u32,
}

/// Snapshot a wire's info. The name pointer follows the thread-local string
/// cache rules.
///
/// # Safety
/// `wire` must be a valid wire handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_get_wire_info(wire: *const WireRef) -> WeftWireInfo {
    let info = get_wire_info(unsafe { &*wire });
    WeftWireInfo {
        name: return_string(info.name),
        looped: info.looped,
        unsafe_: info.unsafe_,
        failed: info.failed,
        shard_count: info.shard_count as u32,
    }
}

// ---------------------------------------------------------------------------
// Root path
// ---------------------------------------------------------------------------

static ROOT_PATH: OnceLock<Mutex<String>> = OnceLock::new();

fn root_path_storage() -> &'static Mutex<String> {
    ROOT_PATH.get_or_init(|| Mutex::new(".".to_string()))
}

/// Process-wide root path for relative resource resolution.
pub fn get_root_path() -> String {
    root_path_storage()
        .lock()
        .expect("root path poisoned")
        .clone()
}

pub fn set_root_path(path: &str) {
    *root_path_storage().lock().expect("root path poisoned") = path.to_string();
}

#[unsafe(no_mangle)]
pub extern "C" fn weft_get_root_path() -> *const c_char {
    return_string(get_root_path())
}

/// # Safety
/// `path` must be a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn weft_set_root_path(path: *const c_char) {
    set_root_path(unsafe { cstr(path) });
}

// ---------------------------------------------------------------------------
// The vtable
// ---------------------------------------------------------------------------

/// ABI-stable function-pointer table for hosts that prefer one entry point.
#[repr(C)]
pub struct WeftCoreVTable {
    pub alloc: unsafe extern "C" fn(u64) -> *mut u8,
    pub free: unsafe extern "C" fn(*mut u8),
    pub alloc_var: extern "C" fn() -> *mut Value,
    pub free_var: unsafe extern "C" fn(*mut Value),
    pub clone_var: unsafe extern "C" fn(*mut Value, *const Value),
    pub destroy_var: unsafe extern "C" fn(*mut Value),
    pub seq_push: unsafe extern "C" fn(*mut Value, *const Value),
    pub seq_resize: unsafe extern "C" fn(*mut Value, u32),
    pub seq_pop: unsafe extern "C" fn(*mut Value, *mut Value) -> bool,
    pub seq_insert: unsafe extern "C" fn(*mut Value, u32, *const Value),
    pub seq_delete: unsafe extern "C" fn(*mut Value, u32),
    pub register_shard: unsafe extern "C" fn(*const c_char, ExternShardCtor),
    pub create_shard: unsafe extern "C" fn(*const c_char) -> *mut ShardRef,
    pub free_shard: unsafe extern "C" fn(*mut ShardRef),
    pub set_param: unsafe extern "C" fn(*mut ShardRef, u32, *const Value) -> bool,
    pub register_object_type: unsafe extern "C" fn(i32, i32, *const c_char),
    pub register_enum_type: unsafe extern "C" fn(i32, i32, *const c_char),
    pub register_run_loop_callback: unsafe extern "C" fn(*const c_char, extern "C" fn()),
    pub unregister_run_loop_callback: unsafe extern "C" fn(*const c_char),
    pub register_exit_callback: unsafe extern "C" fn(*const c_char, extern "C" fn()),
    pub unregister_exit_callback: unsafe extern "C" fn(*const c_char),
    pub reference_wire_variable: unsafe extern "C" fn(*const WireRef, *const c_char) -> *mut VarCell,
    pub release_variable: unsafe extern "C" fn(*mut VarCell),
    pub get_variable: unsafe extern "C" fn(*const VarCell, *mut Value),
    pub set_variable: unsafe extern "C" fn(*const VarCell, *const Value),
    pub set_external_variable: unsafe extern "C" fn(*const WireRef, *const c_char, *const Value),
    pub remove_external_variable: unsafe extern "C" fn(*const WireRef, *const c_char),
    pub compose_wire: unsafe extern "C" fn(*const WireRef) -> bool,
    pub compose_shards: unsafe extern "C" fn(*const Value) -> bool,
    pub run_shards: unsafe extern "C" fn(*mut c_void, *const Value, *const Value) -> *mut Value,
    pub run_shards_hashed:
        unsafe extern "C" fn(*mut c_void, *const Value, *const Value, *mut u8) -> *mut Value,
    pub suspend: unsafe extern "C" fn(*mut c_void, f64) -> i32,
    pub async_activate: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        unsafe extern "C" fn(*mut c_void) -> *mut Value,
        Option<unsafe extern "C" fn(*mut c_void)>,
    ) -> *mut Value,
    pub create_mesh: extern "C" fn() -> *mut Mesh,
    pub destroy_mesh: unsafe extern "C" fn(*mut Mesh),
    pub schedule: unsafe extern "C" fn(*const Mesh, *const WireRef, *const Value) -> bool,
    pub unschedule: unsafe extern "C" fn(*const Mesh, *const WireRef),
    pub tick: unsafe extern "C" fn(*const Mesh) -> bool,
    pub is_empty: unsafe extern "C" fn(*const Mesh) -> bool,
    pub sleep: extern "C" fn(f64, bool),
    pub create_wire: unsafe extern "C" fn(*const c_char) -> *mut WireRef,
    pub set_wire_name: unsafe extern "C" fn(*const WireRef, *const c_char),
    pub set_wire_looped: unsafe extern "C" fn(*const WireRef, bool),
    pub set_wire_unsafe: unsafe extern "C" fn(*const WireRef, bool),
    pub add_shard: unsafe extern "C" fn(*const WireRef, *mut ShardRef) -> bool,
    pub remove_shard: unsafe extern "C" fn(*const WireRef, *const ShardRef) -> bool,
    pub stop_wire: unsafe extern "C" fn(*const WireRef),
    pub destroy_wire: unsafe extern "C" fn(*mut WireRef),
    pub get_wire_info: unsafe extern "C" fn(*const WireRef) -> WeftWireInfo,
    pub get_root_path: extern "C" fn() -> *const c_char,
    pub set_root_path: unsafe extern "C" fn(*const c_char),
}

static VTABLE: WeftCoreVTable = WeftCoreVTable {
    alloc: weft_alloc,
    free: weft_free,
    alloc_var: weft_alloc_var,
    free_var: weft_free_var,
    clone_var: weft_clone_var,
    destroy_var: weft_destroy_var,
    seq_push: weft_seq_push,
    seq_resize: weft_seq_resize,
    seq_pop: weft_seq_pop,
    seq_insert: weft_seq_insert,
    seq_delete: weft_seq_delete,
    register_shard: weft_register_shard,
    create_shard: weft_create_shard,
    free_shard: weft_free_shard,
    set_param: weft_set_param,
    register_object_type: weft_register_object_type,
    register_enum_type: weft_register_enum_type,
    register_run_loop_callback: weft_register_run_loop_callback,
    unregister_run_loop_callback: weft_unregister_run_loop_callback,
    register_exit_callback: weft_register_exit_callback,
    unregister_exit_callback: weft_unregister_exit_callback,
    reference_wire_variable: weft_reference_wire_variable,
    release_variable: weft_release_variable,
    get_variable: weft_get_variable,
    set_variable: weft_set_variable,
    set_external_variable: weft_set_external_variable,
    remove_external_variable: weft_remove_external_variable,
    compose_wire: weft_compose_wire,
    compose_shards: weft_compose_shards,
    run_shards: weft_run_shards,
    run_shards_hashed: weft_run_shards_hashed,
    suspend: weft_suspend,
    async_activate: weft_async_activate,
    create_mesh: weft_create_mesh,
    destroy_mesh: weft_destroy_mesh,
    schedule: weft_schedule,
    unschedule: weft_unschedule,
    tick: weft_tick,
    is_empty: weft_is_empty,
    sleep: weft_sleep,
    create_wire: weft_create_wire,
    set_wire_name: weft_set_wire_name,
    set_wire_looped: weft_set_wire_looped,
    set_wire_unsafe: weft_set_wire_unsafe,
    add_shard: weft_add_shard,
    remove_shard: weft_remove_shard,
    stop_wire: weft_stop_wire,
    destroy_wire: weft_destroy_wire,
    get_wire_info: weft_get_wire_info,
    get_root_path: weft_get_root_path,
    set_root_path: weft_set_root_path,
};

/// The host entry point: a stable pointer to the function table.
#[unsafe(no_mangle)]
pub extern "C" fn weft_interface() -> *const WeftCoreVTable {
    &VTABLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_roundtrip() {
        unsafe {
            let p = weft_alloc(64);
            assert!(!p.is_null());
            assert_eq!(p as usize % 16, 0, "16-byte alignment");
            for i in 0..64 {
                assert_eq!(*p.add(i), 0, "zero-initialized");
            }
            weft_free(p);
            weft_free(std::ptr::null_mut());
        }
    }

    #[test]
    fn test_var_lifecycle() {
        unsafe {
            let v = weft_alloc_var();
            assert_eq!(*v, Value::None);
            let src = Box::into_raw(Box::new(Value::Int(42)));
            weft_clone_var(v, src);
            assert_eq!(*v, Value::Int(42));
            weft_destroy_var(v);
            assert_eq!(*v, Value::None);
            weft_free_var(v);
            weft_free_var(src);
        }
    }

    #[test]
    fn test_seq_helpers() {
        unsafe {
            let seq = weft_alloc_var();
            let one = Box::into_raw(Box::new(Value::Int(1)));
            let two = Box::into_raw(Box::new(Value::Int(2)));
            weft_seq_push(seq, one);
            weft_seq_push(seq, two);
            weft_seq_insert(seq, 0, two);
            assert_eq!(
                *seq,
                Value::Seq(vec![Value::Int(2), Value::Int(1), Value::Int(2)])
            );
            weft_seq_delete(seq, 0);
            let out = weft_alloc_var();
            assert!(weft_seq_pop(seq, out));
            assert_eq!(*out, Value::Int(2));
            weft_seq_resize(seq, 3);
            assert_eq!(
                *seq,
                Value::Seq(vec![Value::Int(1), Value::None, Value::None])
            );
            weft_free_var(seq);
            weft_free_var(out);
            weft_free_var(one);
            weft_free_var(two);
        }
    }

    #[test]
    fn test_wire_over_ffi() {
        unsafe {
            let name = CString::new("ffi-wire").unwrap();
            let wire = weft_create_wire(name.as_ptr());
            let shard_name = CString::new("Const").unwrap();
            let shard = weft_create_shard(shard_name.as_ptr());
            assert!(!shard.is_null());
            let v = Box::into_raw(Box::new(Value::Int(7)));
            assert!(weft_set_param(shard, 0, v));
            assert!(weft_add_shard(wire, shard));
            assert!(weft_compose_wire(wire));

            let mesh = weft_create_mesh();
            assert!(weft_schedule(mesh, wire, std::ptr::null()));
            while !weft_is_empty(mesh) {
                assert!(weft_tick(mesh));
            }
            assert_eq!((*wire).finished_output(), Value::Int(7));

            weft_destroy_mesh(mesh);
            weft_destroy_wire(wire);
            weft_free_var(v);
        }
    }

    #[test]
    fn test_vtable_is_wired() {
        let vt = weft_interface();
        assert!(!vt.is_null());
        unsafe {
            let v = ((*vt).alloc_var)();
            assert_eq!(*v, Value::None);
            ((*vt).free_var)(v);
        }
    }

    #[test]
    fn test_root_path() {
        unsafe {
            let p = CString::new("/tmp/weft-root").unwrap();
            weft_set_root_path(p.as_ptr());
            assert_eq!(get_root_path(), "/tmp/weft-root");
            let back = weft_get_root_path();
            assert_eq!(cstr(back), "/tmp/weft-root");
            set_root_path(".");
        }
    }
}
