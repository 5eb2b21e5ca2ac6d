//! Code-generation sessions.
//!
//! A [`JitSession`] owns a Cranelift [`JITModule`] whose external references
//! are resolved exclusively through the [`SymbolResolver`] allow-list, plus
//! the session's shared [`TypeVocabulary`]. Functions are defined with a
//! builder callback and come back as finalized code pointers.

use cranelift::prelude::*;
use cranelift::codegen::ir::{ExternalName, FuncRef, Function, GlobalValueData, LibCall};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, FuncId, Linkage, Module};
use tracing::{debug, trace};

use super::bootstrap::ensure_initialized_with;
use super::error::{JitError, JitResult};
use super::symbols::SymbolResolver;
use super::vocabulary::{TypeVocabulary, ValueKind};
use crate::config::JitConfig;

/// Maps Cranelift libcalls to the symbol names they link against
type LibcallNames = Box<dyn Fn(LibCall) -> String + Send + Sync>;

/// A JIT module plus everything needed to emit and link functions into it
pub struct JitSession {
    module: JITModule,
    libcall_names: LibcallNames,
    resolver: SymbolResolver,
    vocabulary: TypeVocabulary,
    func_ctx: FunctionBuilderContext,
}

/// Session state handed to function builder callbacks
pub struct EmitContext<'a> {
    module: &'a mut JITModule,
    vocabulary: &'a TypeVocabulary,
}

impl EmitContext<'_> {
    pub fn vocabulary(&self) -> &TypeVocabulary {
        self.vocabulary
    }

    /// Make an imported function callable from the function being built.
    pub fn import(&mut self, builder: &mut FunctionBuilder<'_>, func_id: FuncId) -> FuncRef {
        self.module.declare_func_in_func(func_id, builder.func)
    }

    /// Emit the zero value of `kind`; `None` for [`ValueKind::Any`].
    pub fn zero(&self, builder: &mut FunctionBuilder<'_>, kind: ValueKind) -> Option<Value> {
        self.vocabulary.emit_zero(builder, kind)
    }
}

impl JitSession {
    /// Create a session on the process-wide JIT host.
    ///
    /// # Errors
    ///
    /// Propagates bootstrap failures.
    pub fn new(config: &JitConfig) -> JitResult<Self> {
        let host = ensure_initialized_with(config)?;
        let resolver = SymbolResolver::host()?;
        let vocabulary = TypeVocabulary::new()?;

        let mut builder = JITBuilder::with_isa(host.isa().clone(), default_libcall_names());
        resolver.install(&mut builder);
        let module = JITModule::new(builder);

        debug!(target: "isojit::jit::session", triple = %host.triple(), "Created JIT session");

        Ok(JitSession {
            module,
            libcall_names: default_libcall_names(),
            resolver,
            vocabulary,
            func_ctx: FunctionBuilderContext::new(),
        })
    }

    pub fn vocabulary(&self) -> &TypeVocabulary {
        &self.vocabulary
    }

    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    /// Integer type as wide as a host pointer.
    pub fn pointer_type(&self) -> Type {
        self.vocabulary.iptr
    }

    /// Empty signature in the host's default calling convention.
    pub fn make_signature(&self) -> Signature {
        self.module.make_signature()
    }

    /// Declare an external runtime helper.
    ///
    /// # Errors
    ///
    /// [`JitError::UndefinedSymbol`] if `name` is not on the allow-list,
    /// [`JitError::CompilationError`] if Cranelift rejects the declaration.
    pub fn declare_import(&mut self, name: &str, signature: &Signature) -> JitResult<FuncId> {
        if !self.resolver.is_allowed(name) {
            return Err(JitError::UndefinedSymbol(name.to_string()));
        }
        self.module
            .declare_function(name, Linkage::Import, signature)
            .map_err(|e| {
                JitError::CompilationError(format!("Failed to declare {}: {}", name, e))
            })
    }

    /// Build, define and finalize a local function, returning its code.
    ///
    /// `build` receives a builder with the entry block created, given the
    /// signature's parameters, and selected. It must terminate every block.
    ///
    /// # Errors
    ///
    /// Errors from `build` are returned unchanged; Cranelift declaration,
    /// definition or finalization failures become
    /// [`JitError::CompilationError`].
    pub fn define_function<F>(
        &mut self,
        name: &str,
        signature: Signature,
        build: F,
    ) -> JitResult<*const u8>
    where
        F: FnOnce(&mut FunctionBuilder<'_>, &mut EmitContext<'_>) -> JitResult<()>,
    {
        let func_id = self
            .module
            .declare_function(name, Linkage::Local, &signature)
            .map_err(|e| {
                JitError::CompilationError(format!("Failed to declare {}: {}", name, e))
            })?;

        let mut ctx = self.module.make_context();
        ctx.func.signature = signature;

        let built = {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut self.func_ctx);
            let entry = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            builder.seal_block(entry);

            let mut emit = EmitContext {
                module: &mut self.module,
                vocabulary: &self.vocabulary,
            };
            let built = build(&mut builder, &mut emit);
            if built.is_ok() {
                builder.seal_all_blocks();
                builder.finalize();
            }
            built
        };
        if let Err(e) = built {
            // The half-built function leaves SSA state behind.
            self.func_ctx = FunctionBuilderContext::new();
            return Err(e);
        }

        self.check_libcalls(&ctx.func)?;

        trace!(target: "isojit::jit::session::ir", function = name, ir = %ctx.func.display(), "Generated IR");

        self.module
            .define_function(func_id, &mut ctx)
            .map_err(|e| {
                JitError::CompilationError(format!("Failed to define {}: {:?}", name, e))
            })?;
        self.module.clear_context(&mut ctx);

        self.module.finalize_definitions().map_err(|e| {
            JitError::CompilationError(format!("Failed to finalize definitions: {}", e))
        })?;

        Ok(self.module.get_finalized_function(func_id))
    }

    /// Reject libcalls referenced directly by `func` that are not allow-listed.
    ///
    /// Named imports are checked by [`JitSession::declare_import`]; libcalls
    /// bypass it and would otherwise reach the JIT's unrestricted fallback
    /// lookup at link time.
    fn check_libcalls(&self, func: &Function) -> JitResult<()> {
        let called = func.dfg.ext_funcs.values().map(|ext| &ext.name);
        let addressed = func.global_values.values().filter_map(|gv| match gv {
            GlobalValueData::Symbol { name, .. } => Some(name),
            _ => None,
        });
        for name in called.chain(addressed) {
            if let ExternalName::LibCall(libcall) = name {
                let symbol = (self.libcall_names)(*libcall);
                if !self.resolver.is_allowed(&symbol) {
                    debug!(target: "isojit::jit::session", %symbol, "Rejected libcall outside the allow-list");
                    return Err(JitError::UndefinedSymbol(symbol));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift::codegen::ir::immediates::Imm64;

    #[test]
    fn test_declare_unlisted_import_fails() {
        let mut session = JitSession::new(&JitConfig::default()).unwrap();
        let sig = session.make_signature();
        let err = session.declare_import("puts", &sig).unwrap_err();
        assert_eq!(err, JitError::UndefinedSymbol("puts".to_string()));
    }

    #[test]
    fn test_declare_listed_import() {
        let mut session = JitSession::new(&JitConfig::default()).unwrap();
        let ptr = session.pointer_type();
        let mut sig = session.make_signature();
        sig.params.push(AbiParam::new(ptr));
        sig.params.push(AbiParam::new(ptr));
        sig.params.push(AbiParam::new(ptr));
        sig.returns.push(AbiParam::new(ptr));
        assert!(session.declare_import("memcpy", &sig).is_ok());
    }

    #[test]
    fn test_zero_function() {
        let mut session = JitSession::new(&JitConfig::default()).unwrap();
        let mut sig = session.make_signature();
        sig.returns.push(AbiParam::new(types::I64));

        let code = session
            .define_function("zero_i64", sig, |builder, emit| {
                let zero = emit
                    .zero(builder, ValueKind::I64)
                    .ok_or_else(|| JitError::CompilationError("no i64 zero".to_string()))?;
                builder.ins().return_(&[zero]);
                Ok(())
            })
            .unwrap();

        let func: extern "C" fn() -> i64 = unsafe { std::mem::transmute(code) };
        assert_eq!(func(), 0);
    }

    fn libcall_address(builder: &mut FunctionBuilder<'_>, ptr: Type, libcall: LibCall) -> Value {
        let gv = builder.create_global_value(GlobalValueData::Symbol {
            name: ExternalName::LibCall(libcall),
            offset: Imm64::new(0),
            colocated: false,
            tls: false,
        });
        builder.ins().symbol_value(ptr, gv)
    }

    #[test]
    fn test_unlisted_libcall_is_rejected() {
        let mut session = JitSession::new(&JitConfig::default()).unwrap();
        let ptr = session.pointer_type();
        let mut sig = session.make_signature();
        sig.returns.push(AbiParam::new(ptr));

        let err = session
            .define_function("tls_get_addr_address", sig, |builder, _| {
                let addr = libcall_address(builder, ptr, LibCall::ElfTlsGetAddr);
                builder.ins().return_(&[addr]);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err, JitError::UndefinedSymbol("__tls_get_addr".to_string()));
    }

    #[test]
    fn test_listed_libcall_links_through_resolver() {
        let mut session = JitSession::new(&JitConfig::default()).unwrap();
        let ptr = session.pointer_type();
        let mut sig = session.make_signature();
        sig.returns.push(AbiParam::new(ptr));

        let code = session
            .define_function("memcpy_address", sig, |builder, _| {
                let addr = libcall_address(builder, ptr, LibCall::Memcpy);
                builder.ins().return_(&[addr]);
                Ok(())
            })
            .unwrap();

        let func: extern "C" fn() -> *const u8 = unsafe { std::mem::transmute(code) };
        assert_eq!(Some(func()), session.resolver().resolve("memcpy"));
    }

    #[test]
    fn test_build_error_is_returned() {
        let mut session = JitSession::new(&JitConfig::default()).unwrap();
        let sig = session.make_signature();
        let err = session
            .define_function("fails", sig, |_, _| Err(JitError::CompilationError("nope".to_string())))
            .unwrap_err();
        assert_eq!(err, JitError::CompilationError("nope".to_string()));
    }
}
