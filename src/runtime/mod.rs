//! Compartment and context lifecycle.
//!
//! - [`compartment`]: [`Compartment`], the isolation domain and its slot table
//! - [`context`]: [`Context`] and the [`ContextRuntimeData`] layout
//! - [`region`]: reserve/commit primitive over the host's virtual memory
//! - [`error`]: [`RuntimeError`], [`RuntimeResult`]

pub mod compartment;
pub mod context;
pub mod error;
pub mod region;

pub use compartment::{Compartment, CompartmentStats};
pub use context::{
    clone_context, Context, ContextId, ContextRuntimeData, CONTEXT_RUNTIME_DATA_SIZE,
    GLOBAL_DATA_OFFSET, MAX_GLOBAL_BYTES, MAX_THUNK_ARG_AND_RETURN_BYTES,
};
pub use error::{RuntimeError, RuntimeResult};
