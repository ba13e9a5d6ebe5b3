//! Reference [`ObjectFormat`](rasm_core::isa::ObjectFormat) writers, built
//! against a finalized and optimized [`Object`](rasm_core::object::Object).
//!
//! Two writers ship here, both deliberately thin: [`bin::BinWriter`] is a
//! flat-binary writer with no symbol table or relocations at all (the
//! `org`-at-a-fixed-address boot-sector case, where the whole point is
//! that there is nothing to link), and [`coff::CoffLiteWriter`] is a
//! minimal COFF writer built on the `object` crate's `write` module, kept
//! just complete enough to demonstrate emitting real relocations against
//! real section/symbol tables rather than attempting full COFF fidelity.

#![deny(missing_docs)]

pub mod bin;
pub mod coff;

pub use bin::BinWriter;
pub use coff::CoffLiteWriter;
