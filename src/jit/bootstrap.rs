//! Process-wide JIT bootstrap.
//!
//! The first call to [`ensure_initialized`] (from any thread) detects the
//! host ISA and opens the process's own symbol table. Every caller,
//! including concurrent first callers, returns only after that work has
//! completed, and all of them observe the same [`JitHost`] or the same
//! error.

use std::fmt;
use std::sync::OnceLock;

use cranelift::prelude::*;
use cranelift::codegen::isa::OwnedTargetIsa;
use tracing::debug;

use super::error::{JitError, JitResult};
use crate::config::JitConfig;

#[cfg(unix)]
type ProcessLibrary = libloading::os::unix::Library;
#[cfg(windows)]
type ProcessLibrary = libloading::os::windows::Library;

/// Product of the one-time bootstrap: native target plus host symbol table
pub struct JitHost {
    isa: OwnedTargetIsa,
    process: ProcessLibrary,
    config: JitConfig,
}

static HOST: OnceLock<JitResult<JitHost>> = OnceLock::new();

/// Bootstrap the JIT with the default [`JitConfig`].
///
/// # Errors
///
/// See [`ensure_initialized_with`].
pub fn ensure_initialized() -> JitResult<&'static JitHost> {
    ensure_initialized_with(&JitConfig::default())
}

/// Bootstrap the JIT, using `config` if this is the first call.
///
/// Later calls return the host built by the first one regardless of their
/// own config.
///
/// # Errors
///
/// Returns the bootstrap's error, identically on every call, if the host
/// ISA is unsupported or the process symbol table cannot be opened.
pub fn ensure_initialized_with(config: &JitConfig) -> JitResult<&'static JitHost> {
    let host = HOST
        .get_or_init(|| JitHost::bootstrap(config))
        .as_ref()
        .map_err(Clone::clone)?;
    if host.config != *config {
        debug!(
            target: "isojit::jit::bootstrap",
            requested = ?config,
            active = ?host.config,
            "JIT already initialized with a different config"
        );
    }
    Ok(host)
}

impl JitHost {
    fn bootstrap(config: &JitConfig) -> JitResult<Self> {
        let isa = build_native_isa(config)?;
        let process = open_process_symbols()?;
        debug!(
            target: "isojit::jit::bootstrap",
            triple = %isa.triple(),
            pointer_bytes = isa.pointer_bytes(),
            opt_level = config.opt_level.as_flag(),
            "Initialized JIT host"
        );
        Ok(JitHost {
            isa,
            process,
            config: config.clone(),
        })
    }

    /// Native target description for the host CPU.
    pub fn isa(&self) -> &OwnedTargetIsa {
        &self.isa
    }

    pub fn triple(&self) -> String {
        self.isa.triple().to_string()
    }

    pub fn pointer_bytes(&self) -> u8 {
        self.isa.pointer_bytes()
    }

    /// Config the host was bootstrapped with.
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Look `name` up in the symbols exported by the running process and
    /// everything it has loaded.
    ///
    /// This is an unrestricted lookup; generated code only reaches it
    /// through [`SymbolResolver`](super::symbols::SymbolResolver).
    pub fn lookup_host_symbol(&self, name: &str) -> Option<*const u8> {
        // SAFETY: the symbol is only read as an address, never called or
        // dereferenced here.
        let symbol = unsafe { self.process.get::<*const u8>(name.as_bytes()) }.ok()?;
        let addr: *const u8 = *symbol;
        (!addr.is_null()).then_some(addr)
    }
}

impl fmt::Debug for JitHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitHost")
            .field("triple", &self.triple())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn build_native_isa(config: &JitConfig) -> JitResult<OwnedTargetIsa> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", config.opt_level.as_flag())
        .map_err(|e| JitError::CompilationError(format!("Failed to set opt_level: {}", e)))?;
    flag_builder
        .set("enable_verifier", if config.enable_verifier { "true" } else { "false" })
        .map_err(|e| {
            JitError::CompilationError(format!("Failed to set enable_verifier: {}", e))
        })?;
    // Runtime helpers live anywhere in the address space.
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(|e| {
            JitError::CompilationError(format!("Failed to set use_colocated_libcalls: {}", e))
        })?;
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| JitError::CompilationError(format!("Failed to set is_pic: {}", e)))?;

    let isa_builder = cranelift_native::builder()
        .map_err(|e| JitError::HostUnsupported(e.to_string()))?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| JitError::CompilationError(format!("Failed to create ISA: {}", e)))
}

#[cfg(unix)]
fn open_process_symbols() -> JitResult<ProcessLibrary> {
    Ok(ProcessLibrary::this())
}

#[cfg(windows)]
fn open_process_symbols() -> JitResult<ProcessLibrary> {
    ProcessLibrary::this().map_err(|e| JitError::ProcessSymbols(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let a = ensure_initialized().unwrap();
        let b = ensure_initialized().unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_concurrent_initialize_observes_one_host() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| ensure_initialized().unwrap() as *const JitHost as usize))
            .collect();
        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_pointer_width_matches_host() {
        let host = ensure_initialized().unwrap();
        assert_eq!(usize::from(host.pointer_bytes()), std::mem::size_of::<usize>());
    }

    #[test]
    fn test_lookup_host_symbol() {
        let host = ensure_initialized().unwrap();
        assert!(host.lookup_host_symbol("memcpy").is_some());
        assert!(host.lookup_host_symbol("__nonexistent_symbol_xyz").is_none());
    }
}
