//! Densely numbered entity references used as arena keys throughout the
//! assembler core: sections, bytecodes, symbols, and optimizer spans are all
//! identified by a small `u32`-wrapping index type rather than a pointer or
//! back-reference, so that arenas can be plain growable vectors and the
//! borrow checker never has to reason about cyclic ownership.
//!
//! The `EntityRef` trait and the `entity_impl!` macro below are the same
//! shape used across the Cranelift code generator for `Ebb`/`Value`/`Inst`
//! and friends; `PrimaryMap` allocates and owns values, `SecondaryMap`
//! attaches auxiliary data to keys that already exist, and `PackedOption`
//! keeps an optional entity reference the same size as the entity itself.

#![deny(missing_docs)]

mod iter;
mod keys;
mod map;
mod packed_option;
mod primary_map;

pub use crate::iter::{Iter, IterMut};
pub use crate::keys::Keys;
pub use crate::map::SecondaryMap;
pub use crate::packed_option::{PackedOption, ReservedValue};
pub use crate::primary_map::PrimaryMap;

/// A type wrapping a small integer index should implement `EntityRef` so
/// it can be used as a key in `PrimaryMap` and `SecondaryMap`.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a small integer.
    fn new(index: usize) -> Self;

    /// Get the index of this reference.
    fn index(self) -> usize;
}

/// Macro that provides the common implementation of an `EntityRef` type.
///
/// This defines the relevant boilerplate -- `new`/`index`/`Display`/`Debug`
/// -- for a tuple struct wrapping a `u32`, and reserves `u32::MAX` as a
/// never-valid sentinel so it can double as the `ReservedValue` used by
/// `PackedOption`.
#[macro_export]
macro_rules! entity_impl {
    ($entity:ident) => {
        impl $crate::EntityRef for $entity {
            #[inline]
            fn new(index: usize) -> Self {
                debug_assert!(index < (::core::u32::MAX as usize));
                $entity(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::ReservedValue for $entity {
            #[inline]
            fn reserved_value() -> $entity {
                $entity(::core::u32::MAX)
            }
        }

        impl ::core::fmt::Debug for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                ::core::fmt::Display::fmt(self, f)
            }
        }
    };

    ($entity:ident, $display_prefix:expr) => {
        entity_impl!($entity);

        impl ::core::fmt::Display for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }
    };
}
