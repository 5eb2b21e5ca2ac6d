//! Cranelift JIT linkage layer
//!
//! Generated code only ever reaches the host through this module:
//!
//! ```text
//! ensure_initialized()  ──>  JitHost { native ISA, process symbol table }
//!        │
//!        ├──>  TypeVocabulary   (value kind -> type, zero constant)
//!        └──>  SymbolResolver   (allow-listed name -> host address)
//!                     │
//!                     └──>  JitSession (JITModule link step)
//! ```
//!
//! # Modules
//!
//! - [`bootstrap`]: process-wide one-time initialization
//! - [`symbols`]: the external symbol allow-list and its resolver
//! - [`builtins`]: float helpers linked into generated code by address
//! - [`vocabulary`]: per-session type and zero-constant tables
//! - [`session`]: JIT module wiring, import declaration, function definition
//! - [`error`]: [`JitError`], [`JitResult`]

pub mod bootstrap;
pub mod builtins;
pub mod error;
pub mod session;
pub mod symbols;
pub mod vocabulary;

pub use bootstrap::{ensure_initialized, ensure_initialized_with, JitHost};
pub use error::{JitError, JitResult};
pub use session::{EmitContext, JitSession};
pub use symbols::{RuntimeSymbol, SymbolResolver, SymbolTarget, RUNTIME_SYMBOLS};
pub use vocabulary::{TypeVocabulary, ValueKind, ZeroConstant};
