//! Native type and zero-constant vocabulary for code generation.
//!
//! A [`TypeVocabulary`] is built once per code-generation session and shared
//! by every function compiled in it. Lookups index fixed-size tables by
//! [`ValueKind`]; nothing is computed after construction.

use cranelift::codegen::ir::immediates::{Ieee32, Ieee64, Imm64, V128Imm};
use cranelift::codegen::ir::ConstantData;
use cranelift::prelude::*;

use super::bootstrap::ensure_initialized;
use super::error::JitResult;

/// Abstract value kinds of the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    /// No concrete representation
    Any = 0,
    I32 = 1,
    I64 = 2,
    F32 = 3,
    F64 = 4,
    V128 = 5,
}

impl ValueKind {
    pub const COUNT: usize = 6;

    pub const ALL: [ValueKind; ValueKind::COUNT] = [
        ValueKind::Any,
        ValueKind::I32,
        ValueKind::I64,
        ValueKind::F32,
        ValueKind::F64,
        ValueKind::V128,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A zero value of one kind, ready to be materialized in a function
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZeroConstant {
    Int(Type, Imm64),
    F32(Ieee32),
    F64(Ieee64),
    Vector(Type, V128Imm),
}

impl ZeroConstant {
    /// The type of the value [`ZeroConstant::emit`] produces.
    pub fn ty(&self) -> Type {
        match self {
            ZeroConstant::Int(ty, _) | ZeroConstant::Vector(ty, _) => *ty,
            ZeroConstant::F32(_) => types::F32,
            ZeroConstant::F64(_) => types::F64,
        }
    }

    /// Emit this constant at the builder's current position.
    pub fn emit(&self, builder: &mut FunctionBuilder<'_>) -> Value {
        match *self {
            ZeroConstant::Int(ty, imm) => builder.ins().iconst(ty, imm),
            ZeroConstant::F32(imm) => builder.ins().f32const(imm),
            ZeroConstant::F64(imm) => builder.ins().f64const(imm),
            ZeroConstant::Vector(ty, imm) => {
                let constant = builder
                    .func
                    .dfg
                    .constants
                    .insert(ConstantData::from(imm.0.to_vec()));
                builder.ins().vconst(ty, constant)
            }
        }
    }
}

/// Cranelift types and zero constants for every value kind
#[derive(Debug, Clone)]
pub struct TypeVocabulary {
    pub i8: Type,
    pub i16: Type,
    pub i32: Type,
    pub i64: Type,
    pub i128: Type,
    pub f32: Type,
    pub f64: Type,
    /// Integer type as wide as a host pointer
    pub iptr: Type,

    pub i8x16: Type,
    pub i16x8: Type,
    pub i32x4: Type,
    pub i64x2: Type,
    pub f32x4: Type,
    pub f64x2: Type,

    value_types: [Option<Type>; ValueKind::COUNT],
    zero_constants: [Option<ZeroConstant>; ValueKind::COUNT],
}

impl TypeVocabulary {
    /// Build the vocabulary, bootstrapping the JIT first if needed.
    ///
    /// # Errors
    ///
    /// Propagates bootstrap failures from [`ensure_initialized`].
    ///
    /// # Panics
    ///
    /// Panics if the host pointer is neither 4 nor 8 bytes wide.
    pub fn new() -> JitResult<Self> {
        let host = ensure_initialized()?;

        let iptr = match std::mem::size_of::<usize>() {
            4 => types::I32,
            8 => types::I64,
            width => unreachable!("unsupported host pointer width: {} bytes", width),
        };
        debug_assert_eq!(iptr, host.isa().pointer_type());

        let i8x16 = types::I8X16;

        let mut value_types = [None; ValueKind::COUNT];
        value_types[ValueKind::I32.index()] = Some(types::I32);
        value_types[ValueKind::I64.index()] = Some(types::I64);
        value_types[ValueKind::F32.index()] = Some(types::F32);
        value_types[ValueKind::F64.index()] = Some(types::F64);
        value_types[ValueKind::V128.index()] = Some(i8x16);

        let mut zero_constants = [None; ValueKind::COUNT];
        zero_constants[ValueKind::I32.index()] = Some(ZeroConstant::Int(types::I32, Imm64::new(0)));
        zero_constants[ValueKind::I64.index()] = Some(ZeroConstant::Int(types::I64, Imm64::new(0)));
        zero_constants[ValueKind::F32.index()] = Some(ZeroConstant::F32(Ieee32::with_bits(0)));
        zero_constants[ValueKind::F64.index()] = Some(ZeroConstant::F64(Ieee64::with_bits(0)));
        zero_constants[ValueKind::V128.index()] = Some(ZeroConstant::Vector(i8x16, V128Imm([0; 16])));

        Ok(TypeVocabulary {
            i8: types::I8,
            i16: types::I16,
            i32: types::I32,
            i64: types::I64,
            i128: types::I128,
            f32: types::F32,
            f64: types::F64,
            iptr,
            i8x16,
            i16x8: types::I16X8,
            i32x4: types::I32X4,
            i64x2: types::I64X2,
            f32x4: types::F32X4,
            f64x2: types::F64X2,
            value_types,
            zero_constants,
        })
    }

    /// Native type for `kind`; `None` for [`ValueKind::Any`].
    #[inline]
    pub fn type_of(&self, kind: ValueKind) -> Option<Type> {
        self.value_types[kind.index()]
    }

    /// Zero constant for `kind`; `None` for [`ValueKind::Any`].
    #[inline]
    pub fn zero_constant_of(&self, kind: ValueKind) -> Option<&ZeroConstant> {
        self.zero_constants[kind.index()].as_ref()
    }

    /// Emit the zero value of `kind`; `None` for [`ValueKind::Any`].
    pub fn emit_zero(&self, builder: &mut FunctionBuilder<'_>, kind: ValueKind) -> Option<Value> {
        self.zero_constant_of(kind).map(|zero| zero.emit(builder))
    }
}
