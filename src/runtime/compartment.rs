//! Compartments: isolation domains hosting a table of contexts.
//!
//! # Memory layout
//!
//! ```text
//! region base                                                  base + max_contexts * stride
//! |  context #0  |  context #1  |  context #2  |   reserved, PROT_NONE ...   |
//! |<-- stride -->|
//! ```
//!
//! The whole range is reserved when the compartment is created. Each
//! context's block is committed by [`Compartment::create_context`] while the
//! slot lock is held, so a context never becomes visible before its memory
//! is backed.
//!
//! # Slot table
//!
//! Slots are append-only. Finalizing a context empties its slot, but the
//! index is retired rather than reused: a stale `(compartment, id)` pair can
//! be checked with [`Compartment::is_live`] and will never alias a newer
//! context.

use std::fmt;
use std::ptr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::{
    Context, ContextId, ContextRuntimeData, CONTEXT_RUNTIME_DATA_SIZE, MAX_GLOBAL_BYTES,
};
use super::error::{RuntimeError, RuntimeResult};
use super::region::{round_up_to_page, VirtualRegion};
use crate::config::CompartmentConfig;

/// Shared compartment state behind the [`Compartment`] handle
struct CompartmentInner {
    /// Slot table; `None` marks a finalized, retired id
    contexts: Mutex<Vec<Option<Weak<Context>>>>,

    /// Reserved range holding every context's runtime-data block
    region: VirtualRegion,

    /// Initial values of the per-instance mutable globals
    initial_globals: Box<[u8]>,

    /// Distance between consecutive contexts' blocks
    context_stride: usize,

    max_contexts: usize,
}

/// Cloneable handle to a compartment.
///
/// The reserved region is released once the last handle is dropped. Every
/// [`Context`] holds a handle, so the region outlives all of them.
#[derive(Clone)]
pub struct Compartment {
    inner: Arc<CompartmentInner>,
}

/// Snapshot of a compartment's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompartmentStats {
    /// Ids handed out so far, live or retired
    pub slots: usize,
    /// Slots still holding a reachable context
    pub live: usize,
    /// Runtime-data bytes committed for all created contexts
    pub committed_bytes: usize,
    /// Size of the reserved region
    pub reserved_bytes: usize,
}

impl Compartment {
    /// Create a compartment with the default [`CompartmentConfig`].
    ///
    /// # Errors
    ///
    /// See [`Compartment::with_config`].
    pub fn new(initial_globals: &[u8]) -> RuntimeResult<Self> {
        Self::with_config(initial_globals, &CompartmentConfig::default())
    }

    /// Create a compartment whose contexts start from `initial_globals`.
    ///
    /// # Errors
    ///
    /// Fails if the template is larger than [`MAX_GLOBAL_BYTES`], if
    /// `max_contexts` is zero or overflows the address computation, or if the
    /// host cannot reserve the region.
    pub fn with_config(initial_globals: &[u8], config: &CompartmentConfig) -> RuntimeResult<Self> {
        if initial_globals.len() > MAX_GLOBAL_BYTES {
            return Err(RuntimeError::GlobalsTooLarge {
                requested: initial_globals.len(),
                max: MAX_GLOBAL_BYTES,
            });
        }
        if config.max_contexts == 0 {
            return Err(RuntimeError::InvalidConfig("max_contexts must be at least 1".to_string()));
        }

        let context_stride = round_up_to_page(CONTEXT_RUNTIME_DATA_SIZE);
        let reserve_bytes = context_stride.checked_mul(config.max_contexts).ok_or_else(|| {
            RuntimeError::InvalidConfig(format!(
                "max_contexts {} overflows the address space",
                config.max_contexts
            ))
        })?;
        let region = VirtualRegion::reserve(reserve_bytes).map_err(|source| RuntimeError::Reserve {
            bytes: reserve_bytes,
            source,
        })?;

        debug!(
            target: "isojit::runtime::compartment::new",
            num_global_bytes = initial_globals.len(),
            max_contexts = config.max_contexts,
            reserved = region.len(),
            "Created compartment"
        );

        Ok(Compartment {
            inner: Arc::new(CompartmentInner {
                contexts: Mutex::new(Vec::new()),
                region,
                initial_globals: initial_globals.into(),
                context_stride,
                max_contexts: config.max_contexts,
            }),
        })
    }

    /// Create a new context, committing its runtime data and copying in the
    /// initial globals.
    ///
    /// Ids are assigned in call order starting at 0. On failure nothing is
    /// published and the slot table is unchanged.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::CompartmentFull`] once `max_contexts` ids have been
    /// handed out, [`RuntimeError::Commit`] if the host cannot back the block.
    pub fn create_context(&self) -> RuntimeResult<Arc<Context>> {
        let inner = &*self.inner;
        let mut contexts = inner.contexts.lock();

        let index = contexts.len();
        if index >= inner.max_contexts {
            return Err(RuntimeError::CompartmentFull {
                max_contexts: inner.max_contexts,
            });
        }
        let id = ContextId::new(index);

        let offset = index * inner.context_stride;
        inner
            .region
            .commit(offset, inner.context_stride)
            .map_err(|source| RuntimeError::Commit {
                id,
                bytes: inner.context_stride,
                source,
            })?;

        // SAFETY: `offset` is inside the region and the block was just committed.
        let runtime_data = unsafe { inner.region.base().add(offset) }.cast::<ContextRuntimeData>();
        let context = Arc::new(Context::new(id, self.clone(), runtime_data));

        // SAFETY: the block is committed and private to this not-yet-published context.
        unsafe {
            ptr::copy_nonoverlapping(
                inner.initial_globals.as_ptr(),
                context.global_data_ptr(),
                inner.initial_globals.len(),
            );
        }

        contexts.push(Some(Arc::downgrade(&context)));
        trace!(target: "isojit::runtime::compartment::create_context", %id, offset, "Created context");
        Ok(context)
    }

    /// Empty the slot for `id`. Returns whether it was occupied.
    pub(crate) fn retire_slot(&self, id: ContextId) -> bool {
        let mut contexts = self.inner.contexts.lock();
        contexts
            .get_mut(id.index())
            .and_then(Option::take)
            .is_some()
    }

    /// Look up a live context by id.
    pub fn context(&self, id: ContextId) -> Option<Arc<Context>> {
        let contexts = self.inner.contexts.lock();
        let context = contexts.get(id.index())?.as_ref()?.upgrade()?;
        debug_assert_eq!(context.id(), id);
        Some(context)
    }

    /// Whether `id` names a context that has not been finalized or dropped.
    pub fn is_live(&self, id: ContextId) -> bool {
        let contexts = self.inner.contexts.lock();
        matches!(contexts.get(id.index()), Some(Some(weak)) if weak.strong_count() > 0)
    }

    /// Number of ids handed out so far, including retired ones.
    pub fn slot_count(&self) -> usize {
        self.inner.contexts.lock().len()
    }

    pub fn max_contexts(&self) -> usize {
        self.inner.max_contexts
    }

    /// Byte length of the initial global template.
    pub fn num_global_bytes(&self) -> usize {
        self.inner.initial_globals.len()
    }

    pub fn initial_globals(&self) -> &[u8] {
        &self.inner.initial_globals
    }

    /// Distance in bytes between consecutive contexts' runtime data.
    pub fn context_stride(&self) -> usize {
        self.inner.context_stride
    }

    pub fn stats(&self) -> CompartmentStats {
        let contexts = self.inner.contexts.lock();
        let live = contexts
            .iter()
            .filter(|slot| slot.as_ref().is_some_and(|weak| weak.strong_count() > 0))
            .count();
        CompartmentStats {
            slots: contexts.len(),
            live,
            committed_bytes: contexts.len() * self.inner.context_stride,
            reserved_bytes: self.inner.region.len(),
        }
    }

    /// Whether both handles refer to the same compartment.
    pub fn ptr_eq(&self, other: &Compartment) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compartment")
            .field("num_global_bytes", &self.num_global_bytes())
            .field("max_contexts", &self.inner.max_contexts)
            .field("slots", &self.slot_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_contexts: usize) -> CompartmentConfig {
        CompartmentConfig { max_contexts }
    }

    #[test]
    fn test_ids_are_sequential() {
        let compartment = Compartment::new(&[0u8; 4]).unwrap();
        let ids: Vec<usize> = (0..5)
            .map(|_| compartment.create_context().unwrap().id().index())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_runtime_data_is_strided() {
        let compartment = Compartment::new(&[]).unwrap();
        let a = compartment.create_context().unwrap();
        let b = compartment.create_context().unwrap();
        let delta = b.runtime_data().as_ptr() as usize - a.runtime_data().as_ptr() as usize;
        assert_eq!(delta, compartment.context_stride());
        assert_eq!(compartment.context_stride() % super::super::region::page_size(), 0);
    }

    #[test]
    fn test_ids_not_reused_after_finalize() {
        let compartment = Compartment::new(&[]).unwrap();
        let a = compartment.create_context().unwrap();
        let b = compartment.create_context().unwrap();
        a.finalize();
        let c = compartment.create_context().unwrap();
        assert_eq!(c.id().index(), 2);
        assert!(!compartment.is_live(a.id()));
        assert!(compartment.is_live(b.id()));
        assert!(compartment.context(a.id()).is_none());
    }

    #[test]
    fn test_compartment_full() {
        let compartment = Compartment::with_config(&[], &config(2)).unwrap();
        compartment.create_context().unwrap();
        compartment.create_context().unwrap();
        let err = compartment.create_context().unwrap_err();
        assert!(matches!(err, RuntimeError::CompartmentFull { max_contexts: 2 }));
        assert_eq!(compartment.slot_count(), 2);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_commit_failure_publishes_nothing() {
        let compartment = Compartment::with_config(&[3u8; 4], &config(4)).unwrap();
        let a = compartment.create_context().unwrap();

        // Punch a hole where context #1's block would be committed.
        let stride = compartment.context_stride();
        let hole = unsafe { compartment.inner.region.base().as_ptr().add(stride) };
        assert_eq!(unsafe { libc::munmap(hole.cast(), stride) }, 0);

        let err = compartment.create_context().unwrap_err();
        assert!(matches!(err, RuntimeError::Commit { id, .. } if id.index() == 1));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(compartment.slot_count(), 1);
        assert!(compartment.is_live(a.id()));
        assert!(!compartment.is_live(ContextId::new(1)));

        let restored = unsafe {
            libc::mmap(
                hole.cast(),
                stride,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
                -1,
                0,
            )
        };
        if restored.cast::<u8>() != hole {
            // Someone else now owns the hole; never unmap it on drop.
            std::mem::forget(a);
            std::mem::forget(compartment);
            return;
        }

        // The failed index was never published, so it is handed out next.
        let b = compartment.create_context().unwrap();
        assert_eq!(b.id().index(), 1);
        assert_eq!(unsafe { b.global_bytes() }, &[3u8; 4]);
    }

    #[test]
    fn test_globals_too_large() {
        let template = vec![0u8; MAX_GLOBAL_BYTES + 1];
        let err = Compartment::new(&template).unwrap_err();
        assert!(matches!(err, RuntimeError::GlobalsTooLarge { .. }));
    }

    #[test]
    fn test_zero_max_contexts_rejected() {
        let err = Compartment::with_config(&[], &config(0)).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig(_)));
    }

    #[test]
    fn test_dropped_context_is_not_live() {
        let compartment = Compartment::new(&[]).unwrap();
        let id = compartment.create_context().unwrap().id();
        assert!(!compartment.is_live(id));
        assert_eq!(compartment.stats().live, 0);
        assert_eq!(compartment.stats().slots, 1);
    }

    #[test]
    fn test_stats() {
        let compartment = Compartment::with_config(&[1, 2, 3], &config(8)).unwrap();
        let a = compartment.create_context().unwrap();
        let _b = compartment.create_context().unwrap();
        a.finalize();

        let stats = compartment.stats();
        assert_eq!(stats.slots, 2);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.committed_bytes, 2 * compartment.context_stride());
        assert_eq!(stats.reserved_bytes, 8 * compartment.context_stride());
    }

    #[test]
    fn test_context_lookup_returns_same_context() {
        let compartment = Compartment::new(&[]).unwrap();
        let a = compartment.create_context().unwrap();
        let found = compartment.context(a.id()).unwrap();
        assert!(Arc::ptr_eq(&a, &found));
        assert!(found.compartment().ptr_eq(&compartment));
    }
}
