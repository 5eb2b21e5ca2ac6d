//! isojit - Compartmentalized execution core for a WebAssembly-style JIT
//!
//! This library provides the process-level pieces a sandboxing JIT needs
//! before any module is compiled: isolated execution contexts with
//! per-context mutable globals, one-time native code generator bootstrap,
//! a per-session table of native types and zero constants, and the
//! allow-list that governs which host routines generated code may call.
//!
//! # Architecture
//!
//! 1. **Runtime** (`runtime` module)
//!    - `Compartment`: an isolation domain owning a reserved address range
//!    - `Context`: one instance's globals, at `id * stride` in that range
//!    - Ids are dense, creation-ordered, and never reused
//!    - Contexts can be cloned within or across compartments
//!
//! 2. **JIT linkage** (`jit` module)
//!    - `ensure_initialized`: native ISA detection and process symbol table
//!    - `TypeVocabulary`: value kind to Cranelift type and zero constant
//!    - `SymbolResolver`: allow-listed external names to host addresses
//!    - `JitSession`: a `JITModule` wired to the resolver
//!
//! 3. **Configuration** (`config` module)
//!    - TOML-backed `RuntimeConfig` for compartment sizing and code generation
//!
//! # Example
//!
//! ```rust
//! use isojit::runtime::Compartment;
//!
//! let compartment = Compartment::new(&[1, 2, 3, 4]).unwrap();
//! let context = compartment.create_context().unwrap();
//! assert_eq!(context.id().index(), 0);
//! assert_eq!(unsafe { context.global_bytes() }, &[1, 2, 3, 4]);
//!
//! let fork = unsafe { context.fork_into(&compartment) }.unwrap();
//! assert_eq!(fork.id().index(), 1);
//!
//! context.finalize();
//! assert!(!compartment.is_live(context.id()));
//! assert!(fork.is_live());
//! ```

pub mod config;
pub mod jit;
pub mod runtime;

pub use config::{CompartmentConfig, ConfigError, JitConfig, OptLevel, RuntimeConfig};
pub use jit::{
    ensure_initialized, ensure_initialized_with, JitError, JitHost, JitResult, JitSession,
    SymbolResolver, TypeVocabulary, ValueKind,
};
pub use runtime::{clone_context, Compartment, Context, ContextId, RuntimeError, RuntimeResult};
