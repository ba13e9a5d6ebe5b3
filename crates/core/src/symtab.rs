//! A hash-array-mapped trie (HAMT) symbol table.
//!
//! Keyed on symbol name, 32-way branching per level (5 bits of hash per
//! level), popcount-indexed sparse child arrays so an empty or
//! near-empty node costs almost nothing. When a name's 32-bit hash is
//! exhausted before the trie has finished disambiguating a collision, the
//! name is rehashed with the current level mixed into the multiplicative
//! hash (`vHash = a*vHash*level + byte`) and descent continues from a
//! fresh 32 bits -- so two names can only collide at every level with
//! vanishing probability, not by construction.
//!
//! The trie itself stores only [`SymbolId`]s; the actual [`Symbol`] data
//! lives in a `PrimaryMap` arena, which keeps every node's payload a
//! single `u32` regardless of branching factor (one pool for the whole
//! table, rather than one allocator per node arity).

use crate::diagnostics::SourceLoc;
use crate::expr::Expr;
use crate::symbol::{Symbol, SymbolId, SymbolPayload};
use rasm_entity::PrimaryMap;
use smallvec::SmallVec;

const HASH_A: u32 = 31415;
const HASH_B: u32 = 27183;
const BITS_PER_LEVEL: u32 = 5;

fn fold_byte(b: u8, case_insensitive: bool) -> u32 {
    (if case_insensitive { b.to_ascii_lowercase() } else { b }) as u32
}

fn hash_key(name: &str, case_insensitive: bool) -> u32 {
    let mut a = HASH_A;
    let mut hash = 0u32;
    for &b in name.as_bytes() {
        hash = a.wrapping_mul(hash).wrapping_add(fold_byte(b, case_insensitive));
        a = a.wrapping_mul(HASH_B);
    }
    hash
}

fn rehash_key(name: &str, level: u32, case_insensitive: bool) -> u32 {
    let mut a = HASH_A;
    let mut hash = 0u32;
    for &b in name.as_bytes() {
        hash = a
            .wrapping_mul(hash)
            .wrapping_mul(level)
            .wrapping_add(fold_byte(b, case_insensitive));
        a = a.wrapping_mul(HASH_B);
    }
    hash
}

/// The 5-bit trie index a name occupies at `depth` levels down from the
/// root, recomputing (and, past 32 bits, rehashing with the level mixed
/// in) as needed. Depth is small in practice, so recomputing from scratch
/// on each call keeps the state trivially `Clone`-free.
fn index_at_depth(name: &str, case_insensitive: bool, depth: u32) -> u32 {
    let mut level = 0u32;
    let mut hash = hash_key(name, case_insensitive);
    let mut consumed = 0u32;
    let mut idx = 0u32;
    for _ in 0..=depth {
        if consumed + BITS_PER_LEVEL > 32 {
            level += 1;
            hash = rehash_key(name, level, case_insensitive);
            consumed = 0;
        }
        idx = (hash >> consumed) & 0x1F;
        consumed += BITS_PER_LEVEL;
    }
    idx
}

fn names_equal(a: &str, b: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

enum Slot {
    Leaf(SymbolId),
    Branch(Box<TrieNode>),
}

struct TrieNode {
    bitmap: u32,
    slots: SmallVec<[Slot; 4]>,
}

impl TrieNode {
    fn empty() -> Self {
        TrieNode {
            bitmap: 0,
            slots: SmallVec::new(),
        }
    }

    fn slot_position(&self, bit: u32) -> usize {
        (self.bitmap & (bit - 1)).count_ones() as usize
    }
}

fn find_rec(
    node: &TrieNode,
    name: &str,
    ci: bool,
    depth: u32,
    arena: &PrimaryMap<SymbolId, Symbol>,
) -> Option<SymbolId> {
    let idx = index_at_depth(name, ci, depth);
    let bit = 1u32 << idx;
    if node.bitmap & bit == 0 {
        return None;
    }
    let pos = node.slot_position(bit);
    match &node.slots[pos] {
        Slot::Leaf(id) => {
            if names_equal(arena[*id].name(), name, ci) {
                Some(*id)
            } else {
                None
            }
        }
        Slot::Branch(child) => find_rec(child, name, ci, depth + 1, arena),
    }
}

fn place_rec(
    node: &mut TrieNode,
    name: &str,
    ci: bool,
    depth: u32,
    id: SymbolId,
    arena: &PrimaryMap<SymbolId, Symbol>,
) {
    let idx = index_at_depth(name, ci, depth);
    let bit = 1u32 << idx;
    let pos = node.slot_position(bit);
    if node.bitmap & bit == 0 {
        node.slots.insert(pos, Slot::Leaf(id));
        node.bitmap |= bit;
        return;
    }
    match &mut node.slots[pos] {
        Slot::Leaf(existing_id) => {
            let existing_id = *existing_id;
            let existing_name = arena[existing_id].name().to_string();
            let mut child = TrieNode::empty();
            place_rec(&mut child, &existing_name, ci, depth + 1, existing_id, arena);
            place_rec(&mut child, name, ci, depth + 1, id, arena);
            node.slots[pos] = Slot::Branch(Box::new(child));
        }
        Slot::Branch(child) => {
            place_rec(child, name, ci, depth + 1, id, arena);
        }
    }
}

/// Like `place_rec`, but overwrites an existing leaf for `name` in place
/// instead of assuming the name is new, returning the id that used to own
/// it. Used by `SymbolTable::replace`.
fn replace_rec(
    node: &mut TrieNode,
    name: &str,
    ci: bool,
    depth: u32,
    id: SymbolId,
    arena: &PrimaryMap<SymbolId, Symbol>,
) -> Option<SymbolId> {
    let idx = index_at_depth(name, ci, depth);
    let bit = 1u32 << idx;
    let pos = node.slot_position(bit);
    if node.bitmap & bit == 0 {
        node.slots.insert(pos, Slot::Leaf(id));
        node.bitmap |= bit;
        return None;
    }
    match &mut node.slots[pos] {
        Slot::Leaf(existing_id) => {
            if names_equal(arena[*existing_id].name(), name, ci) {
                let old = *existing_id;
                *existing_id = id;
                Some(old)
            } else {
                let existing_id = *existing_id;
                let existing_name = arena[existing_id].name().to_string();
                let mut child = TrieNode::empty();
                place_rec(&mut child, &existing_name, ci, depth + 1, existing_id, arena);
                place_rec(&mut child, name, ci, depth + 1, id, arena);
                node.slots[pos] = Slot::Branch(Box::new(child));
                None
            }
        }
        Slot::Branch(child) => replace_rec(child, name, ci, depth + 1, id, arena),
    }
}

/// Remove `name`'s leaf from the trie, collapsing a branch back down to a
/// bare leaf once removal leaves it with a single leaf child, the way
/// `hamt.c`'s `HAMT_delete` prunes on the way back up the recursion.
/// Returns the id that was removed, if `name` was present.
fn remove_rec(
    node: &mut TrieNode,
    name: &str,
    ci: bool,
    depth: u32,
    arena: &PrimaryMap<SymbolId, Symbol>,
) -> Option<SymbolId> {
    let idx = index_at_depth(name, ci, depth);
    let bit = 1u32 << idx;
    if node.bitmap & bit == 0 {
        return None;
    }
    let pos = node.slot_position(bit);
    let removed = match &mut node.slots[pos] {
        Slot::Leaf(existing_id) => {
            if names_equal(arena[*existing_id].name(), name, ci) {
                Some(*existing_id)
            } else {
                None
            }
        }
        Slot::Branch(child) => remove_rec(child, name, ci, depth + 1, arena),
    };
    let removed_id = match removed {
        Some(id) => id,
        None => return None,
    };

    match &node.slots[pos] {
        Slot::Leaf(_) => {
            node.slots.remove(pos);
            node.bitmap &= !bit;
        }
        Slot::Branch(child) => {
            if child.slots.len() == 1 {
                if let Slot::Leaf(leaf_id) = &child.slots[0] {
                    let leaf_id = *leaf_id;
                    node.slots[pos] = Slot::Leaf(leaf_id);
                }
            }
        }
    }
    Some(removed_id)
}

/// A symbol table: either the general table (ordinary user symbols) or
/// the special table (architecture/object-format markers). An `Object`
/// owns one of each.
pub struct SymbolTable {
    arena: PrimaryMap<SymbolId, Symbol>,
    insertion_order: Vec<SymbolId>,
    case_insensitive: bool,
    root: TrieNode,
}

impl SymbolTable {
    /// Create an empty table. `case_insensitive` is fixed for the table's
    /// lifetime (NASM-style tables are case-sensitive; some dialects are not).
    pub fn new(case_insensitive: bool) -> Self {
        SymbolTable {
            arena: PrimaryMap::new(),
            insertion_order: Vec::new(),
            case_insensitive,
            root: TrieNode::empty(),
        }
    }

    /// Look up a symbol by name without creating it.
    pub fn find(&self, name: &str) -> Option<SymbolId> {
        find_rec(&self.root, name, self.case_insensitive, 0, &self.arena)
    }

    /// Look up a symbol by name, creating an undefined local symbol if one
    /// does not already exist. This is what a front end calls the moment
    /// it sees a bare identifier, before knowing whether it will turn out
    /// to be a label, an EQU, or stay undefined (an error at finalize time).
    pub fn insert(&mut self, name: &str, loc: SourceLoc) -> SymbolId {
        if let Some(id) = self.find(name) {
            return id;
        }
        let id = self.arena.push(Symbol::new(name, loc));
        self.insertion_order.push(id);
        place_rec(&mut self.root, name, self.case_insensitive, 0, id, &self.arena);
        id
    }

    /// Insert `name`, overwriting any existing mapping rather than keeping
    /// it, unlike `insert`. Returns the fresh id now bound to `name`, plus
    /// the id that previously owned it, if any -- that id's arena entry is
    /// left untouched but is no longer reachable by name lookup.
    pub fn replace(&mut self, name: &str, loc: SourceLoc) -> (SymbolId, Option<SymbolId>) {
        let new_id = self.arena.push(Symbol::new(name, loc));
        let old = replace_rec(&mut self.root, name, self.case_insensitive, 0, new_id, &self.arena);
        if let Some(old_id) = old {
            self.insertion_order.retain(|&x| x != old_id);
        }
        self.insertion_order.push(new_id);
        (new_id, old)
    }

    /// Remove `name` from the table. After this call `find(name)` returns
    /// `None` and the name no longer appears in `iter_insertion_order`; the
    /// removed symbol's arena entry is left in place so any `SymbolId`
    /// captured elsewhere (e.g. in an already-built `Expr`) stays valid.
    pub fn remove(&mut self, name: &str) -> Option<SymbolId> {
        let id = remove_rec(&mut self.root, name, self.case_insensitive, 0, &self.arena)?;
        self.insertion_order.retain(|&x| x != id);
        Some(id)
    }

    /// Mint a fresh anonymous symbol (never reachable by name lookup).
    pub fn insert_anonymous(&mut self, loc: SourceLoc) -> SymbolId {
        let id = self.arena.push(Symbol::new("", loc));
        self.insertion_order.push(id);
        id
    }

    /// Borrow a symbol.
    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.arena[id]
    }

    /// Mutably borrow a symbol.
    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.arena[id]
    }

    /// The `Equ` expression a symbol stands for, if it is one -- used by
    /// [`crate::expr::Expr::level_tree`] to expand EQU references inline.
    pub fn equ_expr(&self, id: SymbolId) -> Option<&Expr> {
        match self.arena.get(id)?.payload() {
            Some(SymbolPayload::Equ(e)) => Some(e),
            _ => None,
        }
    }

    /// Iterate symbols in the order they were first inserted, for
    /// deterministic symbol-table output.
    pub fn iter_insertion_order(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.insertion_order.iter().map(move |&id| (id, &self.arena[id]))
    }

    /// Number of symbols in the table.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_find() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let id = t.insert("main", loc);
        assert_eq!(t.find("main"), Some(id));
        assert_eq!(t.find("Main"), None);
    }

    #[test]
    fn insert_is_idempotent() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let id1 = t.insert("foo", loc);
        let id2 = t.insert("foo", loc);
        assert_eq!(id1, id2);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn case_insensitive_table_folds_lookups() {
        let mut t = SymbolTable::new(true);
        let loc = SourceLoc::default();
        let id = t.insert("Main", loc);
        assert_eq!(t.find("main"), Some(id));
        assert_eq!(t.find("MAIN"), Some(id));
    }

    #[test]
    fn many_insertions_preserve_distinct_identity() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let mut ids = Vec::new();
        for i in 0..2000 {
            ids.push(t.insert(&format!("sym_{}", i), loc));
        }
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(t.find(&format!("sym_{}", i)), Some(*id));
        }
        assert_eq!(t.len(), 2000);
    }

    #[test]
    fn remove_then_find_returns_none() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let id = t.insert("foo", loc);
        assert_eq!(t.remove("foo"), Some(id));
        assert_eq!(t.find("foo"), None);
    }

    #[test]
    fn remove_missing_key_is_a_no_op() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        t.insert("foo", loc);
        assert_eq!(t.remove("bar"), None);
        assert!(t.find("foo").is_some());
    }

    #[test]
    fn removed_key_is_reinsertable() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let id1 = t.insert("foo", loc);
        t.remove("foo").unwrap();
        let id2 = t.insert("foo", loc);
        assert_ne!(id1, id2);
        assert_eq!(t.find("foo"), Some(id2));
    }

    #[test]
    fn replace_overwrites_existing_mapping() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let id1 = t.insert("foo", loc);
        let (id2, old) = t.replace("foo", loc);
        assert_eq!(old, Some(id1));
        assert_ne!(id1, id2);
        assert_eq!(t.find("foo"), Some(id2));
    }

    #[test]
    fn replace_with_new_name_behaves_like_insert() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let (id, old) = t.replace("foo", loc);
        assert_eq!(old, None);
        assert_eq!(t.find("foo"), Some(id));
    }

    /// Property 6: after `remove k`, `find` returns nothing for `k`, and
    /// enumeration yields every live key exactly once -- exercised across
    /// enough keys to force branch nodes at multiple trie depths, so
    /// removal's branch-collapse path runs for real.
    #[test]
    fn remove_round_trip_over_many_keys() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let mut ids = Vec::new();
        for i in 0..200 {
            ids.push(t.insert(&format!("sym_{}", i), loc));
        }

        for i in (0..200).step_by(2) {
            let name = format!("sym_{}", i);
            assert_eq!(t.remove(&name), Some(ids[i]));
            assert_eq!(t.find(&name), None);
        }

        let live: Vec<SymbolId> = t.iter_insertion_order().map(|(id, _)| id).collect();
        assert_eq!(live.len(), 100);
        for i in (1..200).step_by(2) {
            let name = format!("sym_{}", i);
            assert_eq!(t.find(&name), Some(ids[i]));
            assert_eq!(live.iter().filter(|&&id| id == ids[i]).count(), 1);
        }
        for i in (0..200).step_by(2) {
            assert!(!live.contains(&ids[i]));
        }
    }

    #[test]
    fn insertion_order_preserved_independent_of_trie_shape() {
        let mut t = SymbolTable::new(false);
        let loc = SourceLoc::default();
        let names = ["zeta", "alpha", "mu", "beta"];
        for n in &names {
            t.insert(n, loc);
        }
        let order: Vec<&str> = t.iter_insertion_order().map(|(_, s)| s.name()).collect();
        assert_eq!(order, names.to_vec());
    }
}
