//! JIT error types.
//!
//! This module defines [`JitError`] and [`JitResult`] for the bootstrap and
//! link layer.

use std::fmt;

/// Error types for JIT bootstrap, compilation and linking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JitError {
    /// Cranelift has no native backend for this host
    HostUnsupported(String),

    /// The process's own symbol table could not be opened
    ProcessSymbols(String),

    /// Cranelift settings, declaration or compilation error
    CompilationError(String),

    /// Generated code references a symbol outside the allow-list
    UndefinedSymbol(String),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitError::HostUnsupported(msg) => write!(f, "Host not supported: {}", msg),
            JitError::ProcessSymbols(msg) => {
                write!(f, "Failed to open process symbol table: {}", msg)
            }
            JitError::CompilationError(msg) => write!(f, "Compilation error: {}", msg),
            JitError::UndefinedSymbol(name) => {
                write!(f, "Undefined external symbol: {}", name)
            }
        }
    }
}

impl std::error::Error for JitError {}

/// Result type for JIT operations
pub type JitResult<T> = Result<T, JitError>;
