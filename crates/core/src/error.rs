//! Crate-wide error type.
//!
//! Individual passes accumulate most problems into a [`crate::diagnostics::Diagnostics`]
//! sink and keep going; `AsmError` is reserved for conditions a pass cannot
//! recover from at all and that abort it immediately.

use crate::symbol::SymbolId;

/// Result alias used throughout the crate for fallible pass-level operations.
pub type AsmResult<T> = Result<T, AsmError>;

/// A hard failure that aborts the pass that produced it.
#[derive(Fail, Debug)]
pub enum AsmError {
    /// Division or modulo by zero in integer arithmetic.
    #[fail(display = "division by zero")]
    DivByZero,

    /// An expression could not be reduced to the form a value slot needs.
    #[fail(display = "expression too complex for a {}-bit value", size_bits)]
    TooComplex {
        /// Width in bits of the value slot that rejected the expression.
        size_bits: u32,
    },

    /// `Value::finalize` found more than one relative term, or a shift
    /// amount outside the representable range.
    #[fail(display = "value out of range: {}", reason)]
    OutOfRange {
        /// Human-readable description of what was out of range.
        reason: String,
    },

    /// A symbol's EQU expression referenced itself, directly or through a
    /// chain of other EQUs.
    #[fail(display = "circular EQU definition")]
    CircularEqu,

    /// Two symbols referenced in a span computation formed a dependency
    /// cycle the optimizer cannot resolve.
    #[fail(display = "circular span dependency")]
    CircularReference,

    /// A symbol was used but never defined or declared `extern`.
    #[fail(display = "undefined symbol {:?}", symbol)]
    Undefined {
        /// The symbol that was never defined.
        symbol: SymbolId,
    },

    /// A symbol was defined twice with incompatible visibility.
    #[fail(display = "redefinition of symbol {:?}", symbol)]
    Redefinition {
        /// The symbol that was redefined.
        symbol: SymbolId,
    },

    /// An `org` directive's target address was before the current offset.
    #[fail(display = "org target {:#x} overlaps current offset {:#x}", target, current)]
    OrgOverlap {
        /// The target offset the directive asked for.
        target: u64,
        /// The offset already reached when the directive ran.
        current: u64,
    },

    /// The chosen object format cannot represent a relocation this value
    /// resolution needed.
    #[fail(display = "unsupported relocation: {}", reason)]
    UnsupportedReloc {
        /// Human-readable description of the unsupported case.
        reason: String,
    },
}
