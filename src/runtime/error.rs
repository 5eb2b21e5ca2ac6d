//! Runtime error types.
//!
//! This module defines [`RuntimeError`] and [`RuntimeResult`] for the
//! compartment and context lifecycle.

use std::fmt;
use std::io;

use super::context::ContextId;

/// Errors raised while creating compartments or contexts
#[derive(Debug)]
pub enum RuntimeError {
    /// The host refused to reserve the compartment's address range
    Reserve { bytes: usize, source: io::Error },

    /// The host could not back a context's runtime-data block
    Commit { id: ContextId, bytes: usize, source: io::Error },

    /// Every context slot of the compartment has been handed out
    CompartmentFull { max_contexts: usize },

    /// The initial global template does not fit in a context's global storage
    GlobalsTooLarge { requested: usize, max: usize },

    /// Rejected compartment configuration
    InvalidConfig(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Reserve { bytes, source } => {
                write!(f, "Failed to reserve {} bytes of address space: {}", bytes, source)
            }
            RuntimeError::Commit { id, bytes, source } => write!(
                f,
                "Failed to commit {} bytes of runtime data for context {}: {}",
                bytes, id, source
            ),
            RuntimeError::CompartmentFull { max_contexts } => {
                write!(f, "Compartment is full ({} contexts)", max_contexts)
            }
            RuntimeError::GlobalsTooLarge { requested, max } => write!(
                f,
                "Global data of {} bytes exceeds the {} byte limit",
                requested, max
            ),
            RuntimeError::InvalidConfig(msg) => write!(f, "Invalid compartment config: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Reserve { source, .. } | RuntimeError::Commit { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
