//! Execution contexts.
//!
//! A [`Context`] is one sandboxed instance's mutable state inside a
//! [`Compartment`]. Its [`ContextRuntimeData`] block lives in the
//! compartment's reserved region at `id * stride`, so generated code can
//! address globals with a single base pointer.

use std::fmt;
use std::mem::{offset_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use tracing::trace;

use super::compartment::Compartment;
use super::error::RuntimeResult;

/// Size of one context's runtime-data block before page rounding
pub const CONTEXT_RUNTIME_DATA_SIZE: usize = 4096;

/// Scratch bytes invoke thunks use to pass arguments and results
pub const MAX_THUNK_ARG_AND_RETURN_BYTES: usize = 256;

/// Capacity of a context's mutable global storage
pub const MAX_GLOBAL_BYTES: usize = CONTEXT_RUNTIME_DATA_SIZE - MAX_THUNK_ARG_AND_RETURN_BYTES;

/// Byte offset of [`ContextRuntimeData::global_data`] from the block base
pub const GLOBAL_DATA_OFFSET: usize = offset_of!(ContextRuntimeData, global_data);

/// Stable index of a context within its compartment.
///
/// Ids are handed out in creation order and never reused, so an id that
/// outlives its context can only ever observe "not live".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(usize);

impl ContextId {
    /// Id for slot `index`, e.g. one recorded by generated code.
    pub const fn new(index: usize) -> Self {
        ContextId(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-context mutable state addressed by generated code.
///
/// This struct is `#[repr(C)]` so its layout can be baked into machine code.
#[repr(C, align(16))]
pub struct ContextRuntimeData {
    pub thunk_arg_and_return_data: [u8; MAX_THUNK_ARG_AND_RETURN_BYTES],
    pub global_data: [u8; MAX_GLOBAL_BYTES],
}

const _: () = assert!(size_of::<ContextRuntimeData>() == CONTEXT_RUNTIME_DATA_SIZE);

/// A sandboxed execution context
pub struct Context {
    id: ContextId,
    compartment: Compartment,
    runtime_data: NonNull<ContextRuntimeData>,
}

// SAFETY: `runtime_data` points into the compartment's region, which the
// `compartment` handle keeps mapped for as long as this context exists.
// Mutation of the block goes through `unsafe` methods whose callers
// provide the synchronization.
unsafe impl Send for Context {}
// SAFETY: see above.
unsafe impl Sync for Context {}

impl Context {
    pub(crate) fn new(
        id: ContextId,
        compartment: Compartment,
        runtime_data: NonNull<ContextRuntimeData>,
    ) -> Self {
        Context {
            id,
            compartment,
            runtime_data,
        }
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The owning compartment. The relationship is fixed at creation.
    #[inline]
    pub fn compartment(&self) -> &Compartment {
        &self.compartment
    }

    /// Base of this context's runtime-data block.
    #[inline]
    pub fn runtime_data(&self) -> NonNull<ContextRuntimeData> {
        self.runtime_data
    }

    /// Address of the first global byte, `runtime_data + GLOBAL_DATA_OFFSET`.
    #[inline]
    pub fn global_data_ptr(&self) -> *mut u8 {
        // SAFETY: the block is committed and `global_data` is in bounds.
        unsafe { ptr::addr_of_mut!((*self.runtime_data.as_ptr()).global_data).cast::<u8>() }
    }

    /// Whether the compartment still holds this context in its slot.
    pub fn is_live(&self) -> bool {
        self.compartment.is_live(self.id)
    }

    /// Retire this context's slot.
    ///
    /// The id is never handed out again and the runtime-data pages stay
    /// committed, since in-flight calls may still hold the address. Returns
    /// `false` if the context had already been finalized.
    pub fn finalize(&self) -> bool {
        let was_live = self.compartment.retire_slot(self.id);
        trace!(target: "isojit::runtime::context::finalize", id = %self.id, was_live, "Finalized context");
        was_live
    }

    /// The first `num_global_bytes` bytes of this context's global storage.
    ///
    /// # Safety
    ///
    /// No other thread or generated code may write the globals while the
    /// returned slice is alive.
    pub unsafe fn global_bytes(&self) -> &[u8] {
        // SAFETY: the block is committed for the lifetime of `self` and the
        // caller excludes concurrent writers.
        unsafe {
            std::slice::from_raw_parts(
                self.global_data_ptr(),
                self.compartment.num_global_bytes(),
            )
        }
    }

    /// Overwrite global bytes starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the write does not fit in `num_global_bytes`.
    ///
    /// # Safety
    ///
    /// No other thread or generated code may access the globals concurrently.
    pub unsafe fn write_global_bytes(&self, offset: usize, bytes: &[u8]) {
        let limit = self.compartment.num_global_bytes();
        assert!(
            offset.checked_add(bytes.len()).is_some_and(|end| end <= limit),
            "global write of {} bytes at offset {} exceeds {} global bytes",
            bytes.len(),
            offset,
            limit
        );
        // SAFETY: bounds checked above, exclusivity provided by the caller.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.global_data_ptr().add(offset), bytes.len());
        }
    }

    /// Fork this context into `target`. See [`clone_context`].
    ///
    /// # Errors
    ///
    /// Propagates [`Compartment::create_context`] failures.
    ///
    /// # Safety
    ///
    /// See [`clone_context`].
    pub unsafe fn fork_into(&self, target: &Compartment) -> RuntimeResult<Arc<Context>> {
        // SAFETY: forwarded caller obligation.
        unsafe { clone_context(self, target) }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("runtime_data", &self.runtime_data)
            .finish_non_exhaustive()
    }
}

/// Create a context in `target` whose globals are a copy of `source`'s.
///
/// Exactly `source.compartment().num_global_bytes()` bytes are copied; any
/// remaining target globals keep the target's template values.
///
/// # Panics
///
/// Panics before creating anything if `target` has fewer global bytes than
/// the source compartment.
///
/// # Errors
///
/// Propagates [`Compartment::create_context`] failures.
///
/// # Safety
///
/// The caller guarantees `source` is not mutated (by threads or generated
/// code) for the duration of the call.
pub unsafe fn clone_context(source: &Context, target: &Compartment) -> RuntimeResult<Arc<Context>> {
    let num_global_bytes = source.compartment().num_global_bytes();
    assert!(
        num_global_bytes <= target.num_global_bytes(),
        "cannot clone context {} with {} global bytes into a compartment with {} global bytes",
        source.id(),
        num_global_bytes,
        target.num_global_bytes()
    );

    let cloned = target.create_context()?;
    // SAFETY: both blocks are committed, the clone is not yet shared, and the
    // caller guarantees the source is quiescent.
    unsafe {
        ptr::copy_nonoverlapping(source.global_data_ptr(), cloned.global_data_ptr(), num_global_bytes);
    }
    trace!(
        target: "isojit::runtime::context::clone",
        source = %source.id(),
        clone = %cloned.id(),
        num_global_bytes,
        "Cloned context"
    );
    Ok(cloned)
}
