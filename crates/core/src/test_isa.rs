//! A minimal two-opcode-family instruction set used only to exercise the
//! optimizer end to end without depending on a real architecture backend.
//!
//! `nop` is fixed-length data. `jz`/`jmp` are span-dependent branches with
//! an 8-bit short form and a 32-bit near form, in the shape of a
//! relaxable-branch encoder rather than any real one: the displacement is
//! measured from the start of the branch's own bytecode to its target
//! label, not from the next instruction, since nothing here needs to
//! match real x86 semantics, only drive the same span/expand contract a
//! real backend would.

use crate::bytecode::{BytecodeId, InsnContents, SpanId, SpanSink};
use crate::error::AsmResult;
use crate::expr::{Expr, ExprOp, ExprTerm};
use crate::intnum::IntNum;
use crate::isa::{Arch, CodeSink};
use crate::symbol::SymbolId;
use crate::symtab::SymbolTable;
use crate::value::Value;

/// The test architecture: no real registers, just `nop`/`jz`/`jmp`.
#[derive(Debug, Default)]
pub struct TestIsa;

impl Arch for TestIsa {
    fn name(&self) -> &'static str {
        "test"
    }

    fn word_size_bits(&self) -> u32 {
        32
    }

    fn nop_fill(&self, len: usize) -> Vec<u8> {
        vec![0x90; len]
    }
}

/// `nop`: one fixed byte, never span-dependent.
#[derive(Debug, Default)]
pub struct NopInsn;

impl InsnContents for NopInsn {
    fn finalize(&mut self, _bc: BytecodeId, _symtab: &SymbolTable) -> AsmResult<()> {
        Ok(())
    }

    fn calc_len(&mut self, _bc: BytecodeId, _sink: &mut dyn SpanSink) -> u64 {
        1
    }

    fn expand(
        &mut self,
        _span: SpanId,
        _old_val: i64,
        _new_val: i64,
        _neg_thres: &mut i64,
        _pos_thres: &mut i64,
    ) -> (bool, u64) {
        (false, 1)
    }

    fn output(&self, sink: &mut dyn CodeSink) -> AsmResult<()> {
        sink.output_bytes(&[0x90]);
        Ok(())
    }
}

/// `jz`/`jmp`: a branch whose displacement to `target` decides between an
/// 8-bit short form (2 bytes) and a 32-bit near form (5 or 6 bytes,
/// depending on `conditional`). Once the near form is chosen it is never
/// relaxed back down to short, even if a later pass would make it fit
/// again, so the optimizer's fixed-point search always terminates.
#[derive(Debug)]
pub struct BranchInsn {
    conditional: bool,
    curpos: SymbolId,
    value: Value,
    short_form: bool,
    resolved: i64,
}

impl BranchInsn {
    /// `target` is the destination label; `curpos` must be the
    /// `SymbolId` of a `CurposLabel` symbol that, by the time `finalize`
    /// runs, points at whatever bytecode this instruction ends up
    /// appended as. Callers typically mint `curpos` with
    /// `SymbolTable::insert_anonymous` before the bytecode exists and
    /// back-patch its payload once `Section::append_instruction` returns
    /// an id.
    pub fn new(conditional: bool, target: SymbolId, curpos: SymbolId) -> Self {
        let expr = Expr::new(
            ExprOp::Add,
            vec![
                ExprTerm::Sym(target),
                ExprTerm::Sub(Box::new(Expr::new(
                    ExprOp::Mul,
                    vec![ExprTerm::Int(IntNum::from_i64(-1)), ExprTerm::Sym(curpos)],
                ))),
            ],
        );
        BranchInsn {
            conditional,
            curpos,
            value: Value::with_expr(32, expr),
            short_form: true,
            resolved: 0,
        }
    }

    fn short_len(&self) -> u64 {
        2
    }

    fn near_len(&self) -> u64 {
        if self.conditional {
            6
        } else {
            5
        }
    }
}

impl InsnContents for BranchInsn {
    fn finalize(&mut self, _bc: BytecodeId, symtab: &SymbolTable) -> AsmResult<()> {
        self.value.finalize(symtab)?;
        self.value.set_curpos_rel(symtab, self.curpos);
        Ok(())
    }

    fn calc_len(&mut self, bc: BytecodeId, sink: &mut dyn SpanSink) -> u64 {
        // Registered wide open (like `Times`'s own span) rather than
        // already narrowed to the short-form window: the optimizer's
        // first measurement of this span, before any section offsets
        // exist, is a placeholder zero, so starting pre-narrowed could
        // mean the real distance never gets checked against an actual
        // offset at all. Critical-width registration guarantees `expand`
        // is called at least once with a real, offset-derived value.
        sink.add_span(bc, self.value.clone(), i64::MIN, i64::MAX);
        self.short_len()
    }

    fn expand(
        &mut self,
        _span: SpanId,
        _old_val: i64,
        new_val: i64,
        neg_thres: &mut i64,
        pos_thres: &mut i64,
    ) -> (bool, u64) {
        self.resolved = new_val;
        if self.short_form && !(-128..=127).contains(&new_val) {
            self.short_form = false;
        }
        if self.short_form {
            *neg_thres = -128;
            *pos_thres = 127;
            (false, self.short_len())
        } else {
            *neg_thres = i64::MIN;
            *pos_thres = i64::MAX;
            (false, self.near_len())
        }
    }

    fn output(&self, sink: &mut dyn CodeSink) -> AsmResult<()> {
        if self.short_form {
            let opcode = if self.conditional { 0x74 } else { 0xEB };
            sink.output_bytes(&[opcode, self.resolved as i8 as u8]);
        } else if self.conditional {
            sink.output_bytes(&[0x0F, 0x84]);
            sink.output_bytes(&(self.resolved as i32).to_le_bytes());
        } else {
            sink.output_bytes(&[0xE9]);
            sink.output_bytes(&(self.resolved as i32).to_le_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Diagnostics, SourceLoc};
    use crate::isa::Reloc;
    use crate::object::{Object, ObjectOptions};
    use crate::section::SectionKind;
    use crate::symbol::SymbolPayload;
    use rasm_entity::EntityRef;

    #[derive(Default)]
    struct CollectSink(Vec<u8>);

    impl CodeSink for CollectSink {
        fn output_bytes(&mut self, bytes: &[u8]) {
            self.0.extend_from_slice(bytes);
        }
        fn output_gap(&mut self, size: u64) {
            self.0.resize(self.0.len() + size as usize, 0);
        }
        fn output_reloc(&mut self, _reloc: Reloc) {
            panic!("test ISA branches never need a relocation");
        }
    }

    #[test]
    fn nop_insn_emits_single_byte() {
        let mut insn = NopInsn::default();
        let bc = BytecodeId::new(0);
        let mut spans = NoSpans;
        assert_eq!(insn.calc_len(bc, &mut spans), 1);
        let mut sink = CollectSink::default();
        insn.output(&mut sink).unwrap();
        assert_eq!(sink.0, vec![0x90]);
    }

    struct NoSpans;
    impl SpanSink for NoSpans {
        fn add_span(&mut self, _bc: BytecodeId, _value: Value, _neg: i64, _pos: i64) -> SpanId {
            panic!("nop never registers a span");
        }
    }

    /// Mint a curpos symbol, build the branch, append it, then back-patch
    /// the curpos symbol's payload with the bytecode id just minted.
    fn append_branch(obj: &mut Object, conditional: bool, target: SymbolId, loc: SourceLoc) -> BytecodeId {
        let section_id = obj.current_section().unwrap();
        let curpos = obj.symtab_mut().insert_anonymous(loc);
        let insn = BranchInsn::new(conditional, target, curpos);
        let bc_id = obj
            .current_section_mut()
            .unwrap()
            .append_instruction(Box::new(insn), loc);
        obj.symtab_mut().get_mut(curpos).define(
            SymbolPayload::CurposLabel {
                section: section_id,
                bytecode: bc_id,
                offset: 0,
            },
            loc,
        );
        bc_id
    }

    fn build_with_nops(nop_count: usize) -> (Object, BytecodeId) {
        let mut obj = Object::new(Box::new(TestIsa), "t.asm", "t.o", ObjectOptions::default());
        let loc = SourceLoc::default();
        let sec = obj.append_section("text", SectionKind::Code);
        let l1_bc = obj.current_section_mut().unwrap().append_data(&[], loc);
        let l1 = obj.symtab_mut().insert("L1", loc);
        obj.symtab_mut().get_mut(l1).define(
            SymbolPayload::Label {
                section: sec,
                bytecode: l1_bc,
                offset: 0,
            },
            loc,
        );
        for _ in 0..nop_count {
            obj.current_section_mut().unwrap().append_byte(0x90, loc);
        }
        let branch_bc = append_branch(&mut obj, true, l1, loc);
        (obj, branch_bc)
    }

    #[test]
    fn short_branch_when_target_in_range() {
        let (mut obj, branch_bc) = build_with_nops(128);
        let mut diag = Diagnostics::new();
        obj.finalize(&mut diag).unwrap();
        assert!(diag.is_ok());
        obj.optimize(&mut diag).unwrap();
        assert!(diag.is_ok());
        let sec_id = obj.find_section("text").unwrap();
        assert_eq!(obj.section(sec_id).get(branch_bc).total_len(), 2);
    }

    #[test]
    fn near_branch_when_target_out_of_range() {
        let (mut obj, branch_bc) = build_with_nops(130);
        let mut diag = Diagnostics::new();
        obj.finalize(&mut diag).unwrap();
        obj.optimize(&mut diag).unwrap();
        assert!(diag.is_ok());
        let sec_id = obj.find_section("text").unwrap();
        assert_eq!(obj.section(sec_id).get(branch_bc).total_len(), 6);
    }

    #[test]
    fn near_form_never_relaxes_back_to_short() {
        let mut insn = BranchInsn::new(false, SymbolId::new(0), SymbolId::new(1));
        let span = SpanId::new(0);
        let mut neg = -128i64;
        let mut pos = 127i64;
        let (_, len) = insn.expand(span, 0, 1000, &mut neg, &mut pos);
        assert_eq!(len, 5);
        assert!(!insn.short_form);
        let (_, len) = insn.expand(span, 1000, 10, &mut neg, &mut pos);
        assert_eq!(len, 5);
    }
}
