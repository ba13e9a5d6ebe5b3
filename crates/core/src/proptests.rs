//! Property tests for the quantified invariants that unit tests can only
//! sample a handful of cases of: integer byte round-tripping, the symbol
//! table's remove/enumeration contract, expression normalization reaching
//! a fixed point, and the span-dependent optimizer settling once and
//! staying settled.

use proptest::prelude::*;
use proptest::{collection, sample};

use crate::diagnostics::{Diagnostics, SourceLoc};
use crate::expr::{Expr, ExprOp, ExprTerm, RegId};
use crate::intnum::IntNum;
use crate::optimizer::optimize;
use crate::section::{Section, SectionKind};
use crate::symtab::SymbolTable;
use crate::value::Value;
use rasm_entity::PrimaryMap;
use std::collections::HashSet;

proptest! {
    /// A full 64-bit little-endian write never overflows and always reads
    /// back the exact value it was given.
    #[test]
    fn intnum_round_trips_through_64_bit_bytes(v in any::<i64>()) {
        let n = IntNum::from_i64(v);
        let mut buf = [0u8; 8];
        let overflow = n.to_bytes(&mut buf, 64, 0, true);
        prop_assert_eq!(overflow, None);
        prop_assert_eq!(i64::from_le_bytes(buf), v);
    }

    /// After removing an arbitrary subset of an arbitrary key set, `find`
    /// agrees with what was removed and each surviving key is enumerated
    /// exactly once.
    #[test]
    fn symtab_remove_respects_find_and_enumeration(
        raw_names in collection::vec("[a-z]{1,6}", 1..30),
        mask in collection::vec(any::<bool>(), 30),
    ) {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for n in raw_names {
            if seen.insert(n.clone()) {
                names.push(n);
            }
        }
        prop_assume!(!names.is_empty());

        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let ids: Vec<_> = names.iter().map(|n| t.insert(n, loc)).collect();

        for (i, name) in names.iter().enumerate() {
            if mask[i % mask.len()] {
                t.remove(name);
            }
        }

        for (i, name) in names.iter().enumerate() {
            if mask[i % mask.len()] {
                prop_assert_eq!(t.find(name), None);
            } else {
                prop_assert_eq!(t.find(name), Some(ids[i]));
            }
        }

        let live: Vec<_> = t.iter_insertion_order().map(|(id, _)| id).collect();
        for (i, id) in ids.iter().enumerate() {
            let count = live.iter().filter(|&&x| x == *id).count();
            prop_assert_eq!(count, if mask[i % mask.len()] { 0 } else { 1 });
        }
    }

    /// `order_terms` is idempotent: a second pass over its own output never
    /// moves anything further, regardless of how the terms were shuffled.
    #[test]
    fn order_terms_reaches_a_fixed_point(
        op in sample::select(vec![ExprOp::Add, ExprOp::Mul]),
        terms in collection::vec(leaf_term_strategy(), 1..6),
    ) {
        let mut expr = Expr::new(op, terms);
        expr.order_terms();
        let once = expr.clone();
        expr.order_terms();
        prop_assert_eq!(expr, once);
    }

    /// `level_tree` reaches a fixed point: leveling an already-leveled,
    /// EQU-free expression a second time reproduces it exactly.
    #[test]
    fn level_tree_reaches_a_fixed_point(
        op in sample::select(vec![ExprOp::Add, ExprOp::Mul]),
        terms in collection::vec(leaf_term_strategy(), 1..6),
    ) {
        let symtab = SymbolTable::new(false);
        let expr = Expr::new(op, terms);
        let leveled_once = expr.level_tree(&symtab, true, false, false).unwrap();
        let leveled_twice = leveled_once.level_tree(&symtab, true, false, false).unwrap();
        prop_assert_eq!(leveled_twice, leveled_once);
    }

    /// Running the span-dependent optimizer on an already-optimized section
    /// never changes any bytecode's settled length.
    #[test]
    fn optimize_reaches_a_fixed_point(
        data_lens in collection::vec(0usize..6, 0..4),
        boundaries in collection::vec(sample::select(vec![2u32, 4, 8, 16]), 0..3),
        times_counts in collection::vec(0i64..4, 0..3),
    ) {
        let mut sections: PrimaryMap<crate::section::SectionId, Section> = PrimaryMap::new();
        let sec_id = sections.push(Section::new("text", SectionKind::Code));
        {
            let section = sections.get_mut(sec_id).unwrap();
            let loc = SourceLoc::default();
            for len in &data_lens {
                section.append_data(&vec![0u8; *len], loc);
            }
            for boundary in &boundaries {
                section.append_align(*boundary, Some(vec![0x90]), None, loc);
            }
            for count in &times_counts {
                let v = Value::with_expr(32, Expr::int(IntNum::from_i64(*count)));
                section.append_times(1, v, loc);
            }
        }
        let symtab = SymbolTable::new(false);

        let mut diag = Diagnostics::new();
        optimize(&mut sections, &symtab, &mut diag).unwrap();
        let lens_once: Vec<u64> = sections.get(sec_id).unwrap().iter().map(|(_, bc)| bc.total_len()).collect();

        let mut diag2 = Diagnostics::new();
        optimize(&mut sections, &symtab, &mut diag2).unwrap();
        let lens_twice: Vec<u64> = sections.get(sec_id).unwrap().iter().map(|(_, bc)| bc.total_len()).collect();

        prop_assert_eq!(lens_once, lens_twice);
    }
}

fn leaf_term_strategy() -> impl Strategy<Value = ExprTerm> {
    prop_oneof![
        any::<i32>().prop_map(|v| ExprTerm::Int(IntNum::from_i64(v as i64))),
        (0u32..4).prop_map(|r| ExprTerm::Reg(RegId(r))),
    ]
}
