//! Allow-listed external symbols for generated code.
//!
//! Generated machine code may only call host routines named in
//! [`RUNTIME_SYMBOLS`]. The table is fixed at compile time per target and is
//! the complete, auditable set of addresses the linker can hand out. Each
//! entry maps the name generated code references either to a name searched
//! for in the host process (which differs where a platform provides the same
//! helper under another name) or to a builtin compiled into this crate.

use std::fmt;

use cranelift_jit::JITBuilder;
use tracing::{error, trace};

use super::bootstrap::{ensure_initialized, JitHost};
use super::builtins::{self, BuiltinFn};
use super::error::JitResult;

/// Where an allow-listed name is resolved
#[derive(Debug, Clone, Copy)]
pub enum SymbolTarget {
    /// Name to search for in the host symbol table
    Host(&'static str),
    /// Helper provided by this crate
    Builtin(BuiltinFn),
}

impl fmt::Display for SymbolTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolTarget::Host(lookup) => f.write_str(lookup),
            SymbolTarget::Builtin(_) => f.write_str("<builtin>"),
        }
    }
}

/// One allow-list entry
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSymbol {
    /// Name as referenced by generated code
    pub name: &'static str,
    pub target: SymbolTarget,
}

const fn same(name: &'static str) -> RuntimeSymbol {
    RuntimeSymbol {
        name,
        target: SymbolTarget::Host(name),
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
const fn alias(name: &'static str, lookup: &'static str) -> RuntimeSymbol {
    RuntimeSymbol {
        name,
        target: SymbolTarget::Host(lookup),
    }
}

const fn builtin(name: &'static str, f: BuiltinFn) -> RuntimeSymbol {
    RuntimeSymbol {
        name,
        target: SymbolTarget::Builtin(f),
    }
}

/// Host routines generated code may reference on this target.
pub static RUNTIME_SYMBOLS: &[RuntimeSymbol] = &[
    // Cranelift lowers large copies and fills to these.
    same("memcpy"),
    same("memset"),
    same("memmove"),
    same("memcmp"),
    // Float rounding and fma become libcalls without the matching CPU extension.
    builtin("ceilf", BuiltinFn::F32(builtins::ceilf)),
    builtin("ceil", BuiltinFn::F64(builtins::ceil)),
    builtin("floorf", BuiltinFn::F32(builtins::floorf)),
    builtin("floor", BuiltinFn::F64(builtins::floor)),
    builtin("truncf", BuiltinFn::F32(builtins::truncf)),
    builtin("trunc", BuiltinFn::F64(builtins::trunc)),
    builtin("nearbyintf", BuiltinFn::F32(builtins::nearbyintf)),
    builtin("nearbyint", BuiltinFn::F64(builtins::nearbyint)),
    builtin("fmaf", BuiltinFn::F32x3(builtins::fmaf)),
    builtin("fma", BuiltinFn::F64x3(builtins::fma)),
    // Stack probe for frames larger than a page.
    #[cfg(windows)]
    same("__chkstk"),
    #[cfg(windows)]
    same("__C_specific_handler"),
    // 64-bit division on 32-bit Windows.
    #[cfg(all(windows, target_pointer_width = "32"))]
    alias("__aullrem", "_aullrem"),
    #[cfg(all(windows, target_pointer_width = "32"))]
    alias("__allrem", "_allrem"),
    #[cfg(all(windows, target_pointer_width = "32"))]
    alias("__aulldiv", "_aulldiv"),
    #[cfg(all(windows, target_pointer_width = "32"))]
    alias("__alldiv", "_alldiv"),
    #[cfg(not(windows))]
    same("_Unwind_Resume"),
    #[cfg(target_arch = "arm")]
    same("__aeabi_uidiv"),
    #[cfg(target_arch = "arm")]
    same("__aeabi_idiv"),
    #[cfg(target_arch = "arm")]
    same("__aeabi_idivmod"),
    #[cfg(target_arch = "arm")]
    same("__aeabi_uldiv"),
    #[cfg(target_arch = "arm")]
    same("__aeabi_uldivmod"),
    #[cfg(target_arch = "arm")]
    same("__aeabi_unwind_cpp_pr0"),
    #[cfg(target_arch = "arm")]
    same("__aeabi_unwind_cpp_pr1"),
];

/// Resolves external references of generated code against an allow-list
#[derive(Debug, Clone, Copy)]
pub struct SymbolResolver {
    host: &'static JitHost,
    table: &'static [RuntimeSymbol],
}

impl SymbolResolver {
    pub fn new(host: &'static JitHost, table: &'static [RuntimeSymbol]) -> Self {
        SymbolResolver { host, table }
    }

    /// Resolver over [`RUNTIME_SYMBOLS`], bootstrapping the JIT if needed.
    ///
    /// # Errors
    ///
    /// Propagates bootstrap failures from [`ensure_initialized`].
    pub fn host() -> JitResult<Self> {
        Ok(Self::new(ensure_initialized()?, RUNTIME_SYMBOLS))
    }

    fn entry(&self, name: &str) -> Option<&'static RuntimeSymbol> {
        self.table.iter().find(|symbol| symbol.name == name)
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn entries(&self) -> &'static [RuntimeSymbol] {
        self.table
    }

    /// The host whose symbol table backs this resolver.
    pub fn jit_host(&self) -> &'static JitHost {
        self.host
    }

    /// Address for `name`, or `None` if generated code may not reference it.
    ///
    /// # Panics
    ///
    /// Panics if `name` is allow-listed but its host lookup name is missing
    /// from the process: code referencing it has already been generated and cannot
    /// run.
    pub fn resolve(&self, name: &str) -> Option<*const u8> {
        let symbol = self.entry(name)?;
        let addr = match symbol.target {
            SymbolTarget::Builtin(f) => f.addr(),
            SymbolTarget::Host(lookup) => match self.host.lookup_host_symbol(lookup) {
                Some(addr) => addr,
                None => {
                    error!(target: "isojit::jit::symbols::resolve", symbol = name, lookup, "Allow-listed symbol missing from host");
                    panic!("generated code references undefined external symbol: {}", lookup);
                }
            },
        };
        trace!(target: "isojit::jit::symbols::resolve", symbol = name, via = %symbol.target, ?addr, "Resolved symbol");
        Some(addr)
    }

    /// Register this resolver as a symbol lookup function on `builder`.
    pub fn install(self, builder: &mut JITBuilder) {
        builder.symbol_lookup_fn(Box::new(move |name| self.resolve(name)));
    }
}
