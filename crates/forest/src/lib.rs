//! An augmented interval tree over bytecode-index ranges.
//!
//! The optimizer needs, for every bytecode whose length just changed, the
//! set of span-dependency terms whose `[low, high]` range straddles that
//! bytecode's index -- a classic stabbing query. `cranelift-bforest` solves
//! a related but different problem (an ordered B+-tree keyed on a single
//! value, used for sets and maps over `Ord` keys); this crate borrows its
//! "small pool of arena-indexed nodes, no parent pointers" shape but
//! implements a genuine interval tree: a treap ordered on `low` and
//! augmented with each subtree's maximum `high`, which turns "does any
//! interval contain this point" into an O(log n) descent instead of an
//! O(n) scan.
//!
//! Node priorities come from a cheap deterministic mix of the insertion
//! sequence number rather than a random number generator, so that two
//! optimizer runs over the same input produce an identical tree shape and
//! therefore an identical query enumeration order.

#![deny(missing_docs)]

mod interval;

pub use crate::interval::{IntervalTree, NodeId};
