//! The Robertson (1977) span-dependent length optimizer.
//!
//! Starts every bytecode at its minimum possible length, then iteratively
//! expands whichever ones turn out to need a longer encoding, propagating
//! the resulting offset changes to everything that depends on them until
//! nothing changes. Directly grounded on `libyasm/object.cpp`'s
//! `Optimize` class and its `step_1a`..`step_2` sequence; see that file's
//! block comment for the full algorithm write-up this module follows.
//!
//! One simplification relative to the original: a [`crate::value::Value`]
//! here can carry at most one relative and one subtracted symbol (see
//! `Value::finalize`'s `TooComplex` rejection of anything richer), and a
//! span only ever tracks genuine bytecode-to-bytecode distance when that
//! distance is PC-relative against the span's own bytecode (the `$`
//! idiom) -- exactly the case the original's `m_rel_term` covers. A plain
//! relative symbol reference that is *not* `$`-relative is immediately
//! treated as needing the longest encoding, matching the original's
//! `recalc_normal`, so no interval-tree term is created for it. Because
//! of this, dependency terms never cross section boundaries, so each
//! section gets its own independent interval tree and offset-setter list
//! rather than one global one.

use crate::bytecode::{BytecodeId, Special, SpanId, SpanSink};
use crate::diagnostics::Diagnostics;
use crate::error::{AsmError, AsmResult};
use crate::section::{Section, SectionId};
use crate::symbol::{SymbolPayload, Visibility};
use crate::symtab::SymbolTable;
use crate::value::Value;
use rasm_entity::{EntityRef, PrimaryMap};
use rasm_forest::IntervalTree;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanState {
    Active,
    Inactive,
    OnQueue,
}

#[derive(Debug, Clone)]
struct SpanTerm {
    rel_bc: BytecodeId,
    /// The label's own stored offset within `rel_bc`'s fixed head -- the
    /// same value `Object::label_offsets` adds to the bytecode's offset,
    /// so the two never disagree on where the label actually sits.
    rel_offset: i64,
    new_val: i64,
}

#[derive(Debug)]
struct Span {
    bc: BytecodeId,
    value: Value,
    cur_val: i64,
    new_val: i64,
    neg_thres: i64,
    pos_thres: i64,
    state: SpanState,
    term: Option<SpanTerm>,
    os_index: usize,
    backtrace: Vec<usize>,
}

impl Span {
    fn is_critical(&self) -> bool {
        self.neg_thres == i64::MIN && self.pos_thres == i64::MAX
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct OffsetSetterEntry {
    bc: Option<BytecodeId>,
    cur_val: u64,
    new_val: u64,
}

struct SpanCollector<'a> {
    spans: &'a mut Vec<Span>,
    os_index: usize,
}

impl SpanSink for SpanCollector<'_> {
    fn add_span(&mut self, bc: BytecodeId, value: Value, neg_thres: i64, pos_thres: i64) -> SpanId {
        let idx = self.spans.len();
        self.spans.push(Span {
            bc,
            value,
            cur_val: 0,
            new_val: 0,
            neg_thres,
            pos_thres,
            state: SpanState::Active,
            term: None,
            os_index: self.os_index,
            backtrace: Vec::new(),
        });
        SpanId::new(idx)
    }
}

/// The bytecode a `Label`/`CurposLabel` symbol points into and its stored
/// intra-bytecode offset, if it lives in `section_id` -- the same two
/// pieces `Object::label_offsets` combines with a section base address to
/// get a label's resolved value, so a span term's distance is computed
/// from exactly what the resolver will later agree on.
fn label_bc_in_section(
    symtab: &SymbolTable,
    sym: crate::symbol::SymbolId,
    section_id: SectionId,
) -> Option<(BytecodeId, i64)> {
    match symtab.get(sym).payload() {
        Some(SymbolPayload::Label { section, bytecode, offset })
        | Some(SymbolPayload::CurposLabel { section, bytecode, offset })
            if *section == section_id =>
        {
            Some((*bytecode, *offset as i64))
        }
        _ => None,
    }
}

fn offset_of(section: &Section, bc: BytecodeId) -> u64 {
    section.get(bc).offset().unwrap_or(0)
}

/// Run the full optimizer over every section of an object. Terms never
/// cross section boundaries (see module docs), so sections are optimized
/// independently of one another.
pub fn optimize(
    sections: &mut PrimaryMap<SectionId, Section>,
    symtab: &SymbolTable,
    diag: &mut Diagnostics,
) -> AsmResult<()> {
    let ids: Vec<SectionId> = sections.keys().collect();
    for id in ids {
        optimize_section(id, sections.get_mut(id).unwrap(), symtab, diag)?;
    }
    Ok(())
}

fn optimize_section(
    section_id: SectionId,
    section: &mut Section,
    symtab: &SymbolTable,
    diag: &mut Diagnostics,
) -> AsmResult<()> {
    let ids: Vec<BytecodeId> = section.iter().map(|(id, _)| id).collect();
    if ids.is_empty() {
        return Ok(());
    }

    // Step 1a: minimum-length layout, registering spans and offset setters.
    let mut spans: Vec<Span> = Vec::new();
    let mut offset_setters: Vec<OffsetSetterEntry> = vec![OffsetSetterEntry::default()];
    let mut offset = 0u64;
    for id in &ids {
        let os_index = offset_setters.len() - 1;
        let bc = section.get_mut(*id);
        bc.offset = Some(offset);
        bc.index = Some(id.index() as u32);
        {
            let mut collector = SpanCollector {
                spans: &mut spans,
                os_index,
            };
            bc.calc_len(*id, &mut collector);
        }
        if bc.special() == Special::Offset {
            bc.resolve_special(offset)?;
            let setter = offset_setters.last_mut().unwrap();
            setter.bc = Some(*id);
            setter.new_val = offset + bc.total_len();
            setter.cur_val = setter.new_val;
            offset_setters.push(OffsetSetterEntry::default());
        }
        offset += bc.total_len();
    }

    // Step 1b: build terms, do an initial recalc/expand pass. A span that
    // `recalc_normal_inner` forces to `Inactive` (its value is too complex
    // to track, e.g. a plain relative reference with no PC-relative term)
    // still gets exactly one `expand` call here, so the bytecode can
    // settle on its longest encoding; it simply never gets recalculated
    // again afterwards.
    for span in spans.iter_mut() {
        create_terms(span, symtab, section_id);
        let needs_expand = recalc_normal_inner(span);
        if span.state == SpanState::Inactive {
            diag.warn(
                section.get(span.bc).loc(),
                "span value too complex to track; assuming its longest encoding",
            );
        }
        if needs_expand {
            let bc = section.get_mut(span.bc);
            let mut neg = span.neg_thres;
            let mut pos = span.pos_thres;
            bc.expand(dummy_span_id(), span.cur_val, span.new_val, &mut neg, &mut pos);
            span.neg_thres = neg;
            span.pos_thres = pos;
        }
        span.cur_val = span.new_val;
    }

    // Step 1c: recompute offsets after step 1b's expansions.
    update_offsets(section, &ids);

    // Step 1d: refresh term distances against the new offsets; anything
    // still over threshold goes on QB.
    let mut qa: VecDeque<usize> = VecDeque::new();
    let mut qb: VecDeque<usize> = VecDeque::new();
    for (idx, span) in spans.iter_mut().enumerate() {
        if let Some(term) = &mut span.term {
            term.new_val = (offset_of(section, term.rel_bc) as i64 + term.rel_offset) - (offset_of(section, span.bc) as i64);
        }
        if recalc_normal_inner(span) {
            qb.push_back(idx);
            span.state = SpanState::OnQueue;
        }
    }

    if qb.is_empty() && qa.is_empty() {
        update_offsets(section, &ids);
        commit_section();
        return Ok(());
    }

    // Step 1e: build the interval tree and check for cycles among
    // critical (always-recalc) spans.
    let mut tree: IntervalTree<usize> = IntervalTree::new();
    for (idx, span) in spans.iter().enumerate() {
        if let Some(term) = &span.term {
            let this_idx = span.bc.index() as i64 - 1;
            let rel_idx = term.rel_bc.index() as i64;
            let (low, high) = if this_idx < rel_idx {
                (this_idx + 1, rel_idx)
            } else if this_idx > rel_idx {
                (rel_idx + 1, this_idx)
            } else {
                continue;
            };
            tree.insert(low as usize, high as usize, idx);
        }
    }
    for idx in 0..spans.len() {
        if !spans[idx].is_critical() {
            continue;
        }
        let self_idx = spans[idx].bc.index();
        let hits = query_indices(&tree, self_idx);
        for found in hits {
            if found == idx {
                continue;
            }
            check_cycle(&mut spans, found, idx)?;
        }
    }

    // Step 2: main expansion loop.
    while !qa.is_empty() || !qb.is_empty() {
        let idx = if !qa.is_empty() { qa.pop_front().unwrap() } else { qb.pop_front().unwrap() };
        if spans[idx].state == SpanState::Inactive {
            continue;
        }
        spans[idx].state = SpanState::Active;
        if !recalc_normal_inner(&mut spans[idx]) {
            continue;
        }

        let bc_id = spans[idx].bc;
        let orig_len = section.get(bc_id).total_len();
        let (cur_val, new_val) = (spans[idx].cur_val, spans[idx].new_val);
        {
            let bc = section.get_mut(bc_id);
            let mut neg = spans[idx].neg_thres;
            let mut pos = spans[idx].pos_thres;
            bc.expand(dummy_span_id(), cur_val, new_val, &mut neg, &mut pos);
            spans[idx].neg_thres = neg;
            spans[idx].pos_thres = pos;
        }
        spans[idx].cur_val = spans[idx].new_val;

        let new_len = section.get(bc_id).total_len();
        let len_diff = new_len as i64 - orig_len as i64;
        if len_diff == 0 {
            continue;
        }

        let self_idx = bc_id.index();
        let hits = query_indices(&tree, self_idx);
        for hit in hits {
            term_expand(&mut spans, &mut qa, &mut qb, hit, len_diff);
        }

        let os_start = spans[idx].os_index;
        propagate_offset_setters(
            section,
            &mut offset_setters,
            &tree,
            &mut spans,
            &mut qa,
            &mut qb,
            os_start,
            len_diff,
        )?;
    }

    // Step 3: final offset pass, then commit label values.
    update_offsets(section, &ids);
    commit_section();
    Ok(())
}

fn propagate_offset_setters(
    section: &mut Section,
    offset_setters: &mut [OffsetSetterEntry],
    tree: &IntervalTree<usize>,
    spans: &mut [Span],
    qa: &mut VecDeque<usize>,
    qb: &mut VecDeque<usize>,
    start: usize,
    mut offset_diff: i64,
) -> AsmResult<()> {
    let mut os_cursor = start;
    while os_cursor < offset_setters.len() && offset_setters[os_cursor].bc.is_some() && offset_diff != 0 {
        let os_bc = offset_setters[os_cursor].bc.unwrap();
        let os_orig_len = section.get(os_bc).total_len();
        let old_next_offset = offset_setters[os_cursor].cur_val;
        let old_start = old_next_offset - os_orig_len;

        let new_start = (old_start as i64 + offset_diff) as u64;
        let os_new_len = section.get_mut(os_bc).resolve_special(new_start)?;
        let new_end = new_start + os_new_len;

        offset_diff = new_end as i64 - old_next_offset as i64;
        let os_len_diff = os_new_len as i64 - os_orig_len as i64;
        if os_len_diff != 0 {
            let os_self_idx = os_bc.index();
            let hits = query_indices(tree, os_self_idx);
            for hit in hits {
                term_expand(spans, qa, qb, hit, os_len_diff);
            }
        }
        offset_setters[os_cursor].new_val = new_end;
        offset_setters[os_cursor].cur_val = new_end;
        os_cursor += 1;
    }
    Ok(())
}

fn query_indices(tree: &IntervalTree<usize>, point: usize) -> Vec<usize> {
    tree.query(point).into_iter().map(|id| *tree.value(id)).collect()
}

/// `Contents::expand` only uses the span id to distinguish which of
/// several spans a bytecode registered changed; no `Contents` variant
/// this crate ships registers more than one, so any id works here.
fn dummy_span_id() -> SpanId {
    SpanId::new(0)
}

fn create_terms(span: &mut Span, symtab: &SymbolTable, section_id: SectionId) {
    if !span.value.is_curpos_rel() {
        return;
    }
    if span.value.is_seg_of() || span.value.wrt().is_some() || span.value.is_section_rel() {
        return;
    }
    let Some(rel) = span.value.relative_symbol() else { return };
    if let Some((rel_bc, rel_offset)) = label_bc_in_section(symtab, rel, section_id) {
        span.term = Some(SpanTerm { rel_bc, rel_offset, new_val: 0 });
    }
}

fn recalc_normal_inner(span: &mut Span) -> bool {
    span.new_val = span.value.abs_const().unwrap_or(0);

    if let Some(term) = &span.term {
        if span.new_val != i64::MAX && term.new_val != i64::MAX {
            span.new_val = span.new_val.saturating_add(term.new_val >> span.value.rshift());
        } else {
            span.new_val = i64::MAX;
        }
    } else if span.value.relative_symbol().is_some() {
        span.new_val = i64::MAX;
    }

    if span.new_val == i64::MAX {
        span.state = SpanState::Inactive;
    }

    if span.is_critical() {
        span.new_val != span.cur_val
    } else {
        span.new_val < span.neg_thres || span.new_val > span.pos_thres
    }
}

fn check_cycle(spans: &mut [Span], found_idx: usize, span_idx: usize) -> AsmResult<()> {
    if !spans[found_idx].is_critical() {
        return Ok(());
    }
    if spans[span_idx].backtrace.contains(&found_idx) {
        return Err(AsmError::CircularReference);
    }
    let mut extended = spans[span_idx].backtrace.clone();
    extended.push(span_idx);
    spans[found_idx].backtrace.extend(extended);
    Ok(())
}

fn term_expand(spans: &mut [Span], qa: &mut VecDeque<usize>, qb: &mut VecDeque<usize>, span_idx: usize, len_diff: i64) {
    if spans[span_idx].state == SpanState::Inactive {
        return;
    }
    let this_idx = spans[span_idx].bc.index() as i64 - 1;
    let rel_idx = match &spans[span_idx].term {
        Some(t) => t.rel_bc.index() as i64,
        None => return,
    };
    if let Some(term) = &mut spans[span_idx].term {
        if this_idx < rel_idx {
            term.new_val += len_diff;
        } else {
            term.new_val -= len_diff;
        }
    }

    if spans[span_idx].state == SpanState::OnQueue {
        return;
    }
    if !recalc_normal_inner(&mut spans[span_idx]) {
        return;
    }
    if spans[span_idx].is_critical() {
        qa.push_back(span_idx);
    } else {
        qb.push_back(span_idx);
    }
    spans[span_idx].state = SpanState::OnQueue;
}

fn update_offsets(section: &mut Section, ids: &[BytecodeId]) {
    let mut offset = 0u64;
    for id in ids {
        section.get_mut(*id).offset = Some(offset);
        offset += section.get(*id).total_len();
    }
}

/// Placeholder for any per-section bookkeeping a future object-format
/// writer might need once a section's layout has settled; label values
/// themselves are committed object-wide by `commit_label_values` once
/// every section has optimized successfully.
fn commit_section() {}

/// Mark every `Label`/`CurposLabel` symbol valued once optimization has
/// settled final offsets for every section, and flag any `Common` symbol
/// that was declared but never defined as used (so a later "declared but
/// unused" pass does not also complain about it).
pub fn commit_label_values(symtab: &mut SymbolTable) {
    let ids: Vec<_> = symtab.iter_insertion_order().map(|(id, _)| id).collect();
    for id in ids {
        let sym = symtab.get_mut(id);
        let is_label = matches!(
            sym.payload(),
            Some(SymbolPayload::Label { .. }) | Some(SymbolPayload::CurposLabel { .. })
        );
        if is_label {
            sym.mark_valued();
        }
        if sym.visibility() == Visibility::Common && !sym.is_defined() {
            sym.mark_used();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceLoc;
    use crate::section::SectionKind;

    #[test]
    fn empty_section_optimizes_trivially() {
        let mut sections: PrimaryMap<SectionId, Section> = PrimaryMap::new();
        sections.push(Section::new("text", SectionKind::Code));
        let symtab = SymbolTable::new(false);
        let mut diag = Diagnostics::new();
        optimize(&mut sections, &symtab, &mut diag).unwrap();
        assert!(diag.is_ok());
    }

    #[test]
    fn times_span_settles_to_fixed_point() {
        let mut sections: PrimaryMap<SectionId, Section> = PrimaryMap::new();
        let sec_id = sections.push(Section::new("text", SectionKind::Code));
        {
            let section = sections.get_mut(sec_id).unwrap();
            section.append_data(&[0u8; 3], SourceLoc::default());
            let v = Value::with_expr(32, crate::expr::Expr::int(crate::intnum::IntNum::from_i64(5)));
            section.append_times(1, v, SourceLoc::default());
        }
        let symtab = SymbolTable::new(false);
        let mut diag = Diagnostics::new();
        optimize(&mut sections, &symtab, &mut diag).unwrap();
        assert!(diag.is_ok());
        let section = sections.get(sec_id).unwrap();
        let ids: Vec<_> = section.iter().map(|(id, _)| id).collect();
        assert_eq!(section.get(ids[1]).total_len(), 5);
    }

    #[test]
    fn align_absorbs_preceding_growth() {
        let mut sections: PrimaryMap<SectionId, Section> = PrimaryMap::new();
        let sec_id = sections.push(Section::new("text", SectionKind::Code));
        let align_bc;
        {
            let section = sections.get_mut(sec_id).unwrap();
            section.append_data(&[0u8; 1], SourceLoc::default());
            align_bc = section.append_align(4, Some(vec![0x90]), None, SourceLoc::default());
            section.append_data(&[0u8; 1], SourceLoc::default());
        }
        let symtab = SymbolTable::new(false);
        let mut diag = Diagnostics::new();
        optimize(&mut sections, &symtab, &mut diag).unwrap();
        assert!(diag.is_ok());
        let section = sections.get(sec_id).unwrap();
        // One byte of data precedes the directive, so reaching the next
        // multiple of 4 takes 3 bytes of padding.
        assert_eq!(section.get(align_bc).total_len(), 3);
    }

    #[test]
    fn org_pads_up_to_target() {
        let mut sections: PrimaryMap<SectionId, Section> = PrimaryMap::new();
        let sec_id = sections.push(Section::new("text", SectionKind::Code));
        let org_bc;
        {
            let section = sections.get_mut(sec_id).unwrap();
            section.append_data(&[0u8; 2], SourceLoc::default());
            org_bc = section.append_org(8, 0xAA, SourceLoc::default());
        }
        let symtab = SymbolTable::new(false);
        let mut diag = Diagnostics::new();
        optimize(&mut sections, &symtab, &mut diag).unwrap();
        assert!(diag.is_ok());
        let section = sections.get(sec_id).unwrap();
        assert_eq!(section.get(org_bc).total_len(), 6);
    }

    #[test]
    fn org_overlap_is_reported() {
        let mut sections: PrimaryMap<SectionId, Section> = PrimaryMap::new();
        let sec_id = sections.push(Section::new("text", SectionKind::Code));
        {
            let section = sections.get_mut(sec_id).unwrap();
            section.append_data(&[0u8; 10], SourceLoc::default());
            section.append_org(5, 0, SourceLoc::default());
        }
        let symtab = SymbolTable::new(false);
        let mut diag = Diagnostics::new();
        let err = optimize(&mut sections, &symtab, &mut diag);
        assert!(matches!(
            err,
            Err(AsmError::OrgOverlap { target: 5, current: 10 })
        ));
    }

    #[test]
    fn optimize_is_idempotent() {
        let mut sections: PrimaryMap<SectionId, Section> = PrimaryMap::new();
        let sec_id = sections.push(Section::new("text", SectionKind::Code));
        {
            let section = sections.get_mut(sec_id).unwrap();
            section.append_data(&[0u8; 1], SourceLoc::default());
            section.append_align(4, Some(vec![0x90]), None, SourceLoc::default());
            let v = Value::with_expr(32, crate::expr::Expr::int(crate::intnum::IntNum::from_i64(5)));
            section.append_times(1, v, SourceLoc::default());
        }
        let symtab = SymbolTable::new(false);
        let mut diag = Diagnostics::new();
        optimize(&mut sections, &symtab, &mut diag).unwrap();
        assert!(diag.is_ok());

        let lens_before: Vec<u64> = sections.get(sec_id).unwrap().iter().map(|(_, bc)| bc.total_len()).collect();

        let mut diag2 = Diagnostics::new();
        optimize(&mut sections, &symtab, &mut diag2).unwrap();
        assert!(diag2.is_ok());

        let lens_after: Vec<u64> = sections.get(sec_id).unwrap().iter().map(|(_, bc)| bc.total_len()).collect();
        assert_eq!(lens_before, lens_after);
    }

    #[test]
    fn branch_distance_uses_labels_own_offset_not_bytecode_end() {
        use crate::symbol::SymbolPayload;
        use crate::test_isa::BranchInsn;

        let mut sections: PrimaryMap<SectionId, Section> = PrimaryMap::new();
        let sec_id = sections.push(Section::new("text", SectionKind::Code));
        let mut symtab = SymbolTable::new(false);
        let loc = SourceLoc::default();

        let label_l = symtab.insert("L", loc);

        let section = sections.get_mut(sec_id).unwrap();
        let bc_lbl = section.append_data(&[0u8; 300], loc);

        let curpos = symtab.insert_anonymous(loc);
        let bc_branch = section.append_instruction(Box::new(BranchInsn::new(true, label_l, curpos)), loc);
        symtab.get_mut(curpos).define(
            SymbolPayload::CurposLabel {
                section: sec_id,
                bytecode: bc_branch,
                offset: 0,
            },
            loc,
        );
        // L sits 2 bytes into the 300-byte bytecode that precedes the
        // branch, nowhere near its far end, so only the near (fixed) form
        // can reach it from here.
        symtab.get_mut(label_l).define(
            SymbolPayload::Label {
                section: sec_id,
                bytecode: bc_lbl,
                offset: 2,
            },
            loc,
        );

        section.get_mut(bc_branch).contents_mut().finalize(bc_branch, &symtab).unwrap();

        let mut diag = Diagnostics::new();
        optimize(&mut sections, &symtab, &mut diag).unwrap();
        assert!(diag.is_ok());

        let section = sections.get(sec_id).unwrap();
        assert_eq!(section.get(bc_branch).total_len(), 6);
    }

    #[test]
    fn crossing_branches_report_circular_reference() {
        use crate::symbol::SymbolPayload;
        use crate::test_isa::BranchInsn;

        let mut sections: PrimaryMap<SectionId, Section> = PrimaryMap::new();
        let sec_id = sections.push(Section::new("text", SectionKind::Code));
        let mut symtab = SymbolTable::new(false);
        let loc = SourceLoc::default();

        let label_x = symtab.insert("X", loc);
        let label_z = symtab.insert("Z", loc);

        let section = sections.get_mut(sec_id).unwrap();
        let bc_x = section.append_data(&[], loc);
        section.append_data(&[0u8; 1], loc);

        let curpos_a = symtab.insert_anonymous(loc);
        let bc_a = section.append_instruction(Box::new(BranchInsn::new(true, label_z, curpos_a)), loc);
        symtab.get_mut(curpos_a).define(
            SymbolPayload::CurposLabel {
                section: sec_id,
                bytecode: bc_a,
                offset: 0,
            },
            loc,
        );

        section.append_data(&[0u8; 1], loc);

        let curpos_b = symtab.insert_anonymous(loc);
        let bc_b = section.append_instruction(Box::new(BranchInsn::new(true, label_x, curpos_b)), loc);
        symtab.get_mut(curpos_b).define(
            SymbolPayload::CurposLabel {
                section: sec_id,
                bytecode: bc_b,
                offset: 0,
            },
            loc,
        );

        let bc_z = section.append_data(&[], loc);

        symtab.get_mut(label_x).define(
            SymbolPayload::Label {
                section: sec_id,
                bytecode: bc_x,
                offset: 0,
            },
            loc,
        );
        symtab.get_mut(label_z).define(
            SymbolPayload::Label {
                section: sec_id,
                bytecode: bc_z,
                offset: 0,
            },
            loc,
        );

        section.get_mut(bc_a).contents_mut().finalize(bc_a, &symtab).unwrap();
        section.get_mut(bc_b).contents_mut().finalize(bc_b, &symtab).unwrap();

        let mut diag = Diagnostics::new();
        let err = optimize(&mut sections, &symtab, &mut diag);
        assert!(matches!(err, Err(AsmError::CircularReference)));
    }
}
