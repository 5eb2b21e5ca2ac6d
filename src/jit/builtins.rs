//! Float helpers the crate provides to generated code itself.
//!
//! Cranelift lowers float rounding and fused multiply-add to libcalls when
//! the host lacks the matching CPU extension (SSE4.1, FMA). A Rust process
//! is not guaranteed to export libm, so these are compiled into the crate
//! and handed out by address instead of being looked up in the host.

pub extern "C" fn ceilf(x: f32) -> f32 {
    x.ceil()
}

pub extern "C" fn ceil(x: f64) -> f64 {
    x.ceil()
}

pub extern "C" fn floorf(x: f32) -> f32 {
    x.floor()
}

pub extern "C" fn floor(x: f64) -> f64 {
    x.floor()
}

pub extern "C" fn truncf(x: f32) -> f32 {
    x.trunc()
}

pub extern "C" fn trunc(x: f64) -> f64 {
    x.trunc()
}

/// Round to nearest, ties to even (the default floating-point environment).
pub extern "C" fn nearbyintf(x: f32) -> f32 {
    x.round_ties_even()
}

/// Round to nearest, ties to even (the default floating-point environment).
pub extern "C" fn nearbyint(x: f64) -> f64 {
    x.round_ties_even()
}

pub extern "C" fn fmaf(a: f32, b: f32, c: f32) -> f32 {
    a.mul_add(b, c)
}

pub extern "C" fn fma(a: f64, b: f64, c: f64) -> f64 {
    a.mul_add(b, c)
}

/// Address-takeable builtin, tagged by signature
#[derive(Debug, Clone, Copy)]
pub enum BuiltinFn {
    F32(extern "C" fn(f32) -> f32),
    F64(extern "C" fn(f64) -> f64),
    F32x3(extern "C" fn(f32, f32, f32) -> f32),
    F64x3(extern "C" fn(f64, f64, f64) -> f64),
}

impl BuiltinFn {
    /// Entry point of the builtin.
    pub fn addr(self) -> *const u8 {
        match self {
            BuiltinFn::F32(f) => f as *const u8,
            BuiltinFn::F64(f) => f as *const u8,
            BuiltinFn::F32x3(f) => f as *const u8,
            BuiltinFn::F64x3(f) => f as *const u8,
        }
    }
}
