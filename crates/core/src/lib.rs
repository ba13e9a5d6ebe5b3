//! In-memory object model for an x86 assembler core: arbitrary-precision
//! integers and the expression tree built from them, an interned symbol
//! table, the bytecode container with its span-dependent tail, the value
//! resolution model, and the Robertson-style length-optimization pass that
//! ties the other pieces together.
//!
//! Parsing a concrete assembly dialect, encoding concrete x86 instructions,
//! and writing a concrete object-file format are outside this crate: it
//! defines the [`isa::Arch`] and [`isa::ObjectFormat`] traits those
//! concerns implement, and carries just enough of a reference
//! implementation of each (gated behind `testing_hooks`) to exercise the
//! optimizer end to end.

#![deny(missing_docs)]

#[macro_use]
extern crate failure_derive;

pub mod bytecode;
pub mod diagnostics;
pub mod error;
pub mod expr;
pub mod intnum;
pub mod isa;
pub mod object;
pub mod optimizer;
pub mod section;
pub mod symbol;
pub mod symtab;
pub mod value;

#[cfg(any(test, feature = "testing_hooks"))]
pub mod test_isa;

#[cfg(test)]
mod proptests;

pub use crate::bytecode::{Bytecode, BytecodeId, Contents};
pub use crate::diagnostics::{Diagnostics, Severity};
pub use crate::error::{AsmError, AsmResult};
pub use crate::expr::{Expr, ExprOp, ExprTerm};
pub use crate::intnum::IntNum;
pub use crate::isa::{Arch, ArchConfig, CodeSink, ObjectFormat, Reloc, RelocKind};
pub use crate::object::{Object, ObjectOptions};
pub use crate::section::{Section, SectionId};
pub use crate::symbol::{Symbol, SymbolId, SymbolPayload, Visibility};
pub use crate::symtab::SymbolTable;
pub use crate::value::Value;
