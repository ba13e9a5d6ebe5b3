//! Flat-binary output: every section's bytes, back to back, with no
//! header, symbol table, or relocations -- the format scenario S3's
//! `org 0x7C00` boot sector is written against (`Section::set_base_addr`
//! supplies the load address a label's value is computed relative to;
//! the file itself always starts at byte 0 regardless).

use rasm_core::error::{AsmError, AsmResult};
use rasm_core::isa::{CodeSink, ObjectFormat, Reloc, RelocKind};
use rasm_core::object::Object;

/// Collects one section's output bytes, recording (rather than
/// immediately failing on) any fixup that couldn't be resolved locally,
/// so a multi-reloc section reports every offending symbol at once
/// instead of stopping at the first.
#[derive(Default)]
struct FlatSink {
    bytes: Vec<u8>,
    unresolved: Vec<Reloc>,
}

impl CodeSink for FlatSink {
    fn output_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    fn output_gap(&mut self, size: u64) {
        self.bytes.resize(self.bytes.len() + size as usize, 0);
    }

    fn output_reloc(&mut self, reloc: Reloc) {
        self.unresolved.push(reloc);
    }
}

/// Writes a finalized, optimized [`Object`] as a flat binary: sections in
/// declaration order, concatenated with no padding between them beyond
/// whatever each section's own layout already calls for.
///
/// Cannot represent any [`RelocKind`] -- a value that doesn't resolve to a
/// concrete address at output time (an external reference, or a
/// cross-section distance when [`ObjectOptions::disable_global_sub_relative`](rasm_core::object::ObjectOptions)
/// is set) surfaces as [`AsmError::UnsupportedReloc`] rather than being
/// silently dropped.
#[derive(Debug, Default)]
pub struct BinWriter;

impl BinWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        BinWriter
    }

    /// Write every section's bytes, in order, into one flat buffer.
    pub fn write(&self, obj: &mut Object) -> AsmResult<Vec<u8>> {
        let mut out = Vec::new();
        let ids: Vec<_> = obj.sections().map(|(id, _)| id).collect();
        for id in ids {
            let mut sink = FlatSink::default();
            obj.output_section(id, &mut sink)?;
            if let Some(reloc) = sink.unresolved.into_iter().next() {
                return Err(AsmError::UnsupportedReloc {
                    reason: format!(
                        "section {:?} needs a relocation against symbol {:?}, which flat \
                         binary output cannot represent",
                        id, reloc.symbol
                    ),
                });
            }
            out.extend_from_slice(&sink.bytes);
        }
        Ok(out)
    }
}

impl ObjectFormat for BinWriter {
    fn name(&self) -> &'static str {
        "bin"
    }

    fn supports_reloc(&self, _kind: RelocKind) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasm_core::diagnostics::{Diagnostics, SourceLoc};
    use rasm_core::object::ObjectOptions;
    use rasm_core::section::SectionKind;
    use rasm_core::test_isa::TestIsa;

    #[test]
    fn concatenates_sections_in_order() {
        let mut obj = Object::new(Box::new(TestIsa), "boot.asm", "boot.bin", ObjectOptions::default());
        let loc = SourceLoc::default();
        let text = obj.append_section("text", SectionKind::Code);
        obj.section_mut(text).set_base_addr(0x7C00);
        obj.current_section_mut().unwrap().append_byte(0x90, loc);
        obj.current_section_mut().unwrap().append_byte(0xF4, loc);

        let mut diag = Diagnostics::new();
        obj.finalize(&mut diag).unwrap();
        obj.optimize(&mut diag).unwrap();
        assert!(diag.is_ok());

        let bytes = BinWriter::new().write(&mut obj).unwrap();
        assert_eq!(bytes, vec![0x90, 0xF4]);
    }

    #[test]
    fn unresolvable_fixup_is_reported() {
        use rasm_core::expr::{Expr, ExprOp, ExprTerm};
        use rasm_core::value::Value;

        let mut obj = Object::new(Box::new(TestIsa), "t.asm", "t.bin", ObjectOptions::default());
        let loc = SourceLoc::default();
        obj.append_section("text", SectionKind::Code);
        let missing = obj.declare_extern("external_thing", loc);
        let expr = Expr::new(ExprOp::Add, vec![ExprTerm::Sym(missing)]);
        obj.current_section_mut()
            .unwrap()
            .append_fixup(Value::with_expr(32, expr), 4, loc);

        let mut diag = Diagnostics::new();
        obj.finalize(&mut diag).unwrap();
        assert!(diag.is_ok());
        obj.optimize(&mut diag).unwrap();

        let err = BinWriter::new().write(&mut obj);
        assert!(err.is_err());
    }
}
