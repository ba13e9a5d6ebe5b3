//! Symbols: named or anonymous entities a value can reference.

use crate::bytecode::BytecodeId;
use crate::diagnostics::SourceLoc;
use crate::expr::Expr;
use crate::section::SectionId;
use rasm_entity::entity_impl;

/// An arena-indexed reference to a [`Symbol`], minted by a [`crate::symtab::SymbolTable`].
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);
entity_impl!(SymbolId, "sym");

/// Visibility flags. `Local` and `Global`/`Common`/`Extern` are mutually
/// exclusive as a group; `Global`, `Common`, and `Extern` are themselves
/// pairwise exclusive (a symbol cannot be both `Common` and `Extern`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Not visible outside the object being assembled.
    Local,
    /// Visible to other objects at link time.
    Global,
    /// A tentative common-block definition (size, no contents).
    Common,
    /// Declared but defined elsewhere; this object only references it.
    Extern,
}

/// What a symbol resolves to once it is [`Symbol::is_defined`].
#[derive(Debug, Clone)]
pub enum SymbolPayload {
    /// `foo EQU <expr>` -- an alias for an expression, not a storage
    /// location.
    Equ(Expr),
    /// A label: a fixed point inside a bytecode's fixed head.
    Label {
        /// The section the labeled bytecode lives in.
        section: SectionId,
        /// The bytecode this label points into.
        bytecode: BytecodeId,
        /// Byte offset within that bytecode's fixed head.
        offset: u32,
    },
    /// As `Label`, but value resolution is permitted to rewrite
    /// `expr - this` into a PC-relative reference (used for `$` / "current
    /// position" symbols bytecodes introduce for themselves).
    CurposLabel {
        /// The section the labeled bytecode lives in.
        section: SectionId,
        /// The bytecode this label points into.
        bytecode: BytecodeId,
        /// Byte offset within that bytecode's fixed head.
        offset: u32,
    },
    /// An opaque marker an architecture or object format uses internally
    /// (e.g. a GOT-base or WRT-base symbol); carries no resolvable value
    /// of its own as far as the core is concerned.
    Special,
}

/// A named or anonymous symbol.
#[derive(Debug, Clone)]
pub struct Symbol {
    name: String,
    used: bool,
    defined: bool,
    valued: bool,
    visibility: Visibility,
    payload: Option<SymbolPayload>,
    decl_loc: SourceLoc,
}

impl Symbol {
    /// Create a new, as-yet undefined, local symbol with the given name
    /// (empty string for an anonymous symbol).
    pub fn new(name: impl Into<String>, decl_loc: SourceLoc) -> Self {
        Symbol {
            name: name.into(),
            used: false,
            defined: false,
            valued: false,
            visibility: Visibility::Local,
            payload: None,
            decl_loc,
        }
    }

    /// The symbol's interned name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where this symbol was first declared or defined.
    pub fn decl_loc(&self) -> SourceLoc {
        self.decl_loc
    }

    /// Mark this symbol as having been referenced somewhere.
    pub fn mark_used(&mut self) {
        self.used = true;
    }

    /// Has this symbol been referenced?
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Has this symbol been given a payload (`Equ`/`Label`/`CurposLabel`/`Special`)?
    pub fn is_defined(&self) -> bool {
        self.defined
    }

    /// Does this symbol have a fully resolved value (true for `Equ` and,
    /// after optimization, for labels)?
    pub fn is_valued(&self) -> bool {
        self.valued
    }

    /// Current visibility.
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// The symbol's payload, if defined.
    pub fn payload(&self) -> Option<&SymbolPayload> {
        self.payload.as_ref()
    }

    /// Attempt to change visibility, enforcing the mutual-exclusion rules.
    /// `Local` is always replaceable; among `Global`/`Common`/`Extern`,
    /// only re-declaring the same one is allowed (returns `false` and
    /// leaves the symbol untouched otherwise, so the caller can turn that
    /// into an `ExternButDefined`-style warning or a hard redefinition
    /// error depending on context).
    pub fn set_visibility(&mut self, vis: Visibility) -> bool {
        match (self.visibility, vis) {
            (Visibility::Local, _) => {
                self.visibility = vis;
                true
            }
            (a, b) if a == b => true,
            _ => false,
        }
    }

    /// Define the symbol's payload. Fails (returns `false`, leaving the
    /// symbol untouched) if it is already defined.
    pub fn define(&mut self, payload: SymbolPayload, loc: SourceLoc) -> bool {
        if self.defined {
            return false;
        }
        self.valued = matches!(payload, SymbolPayload::Equ(_));
        self.payload = Some(payload);
        self.defined = true;
        self.decl_loc = loc;
        true
    }

    /// Mark a label symbol valued once the optimizer has assigned final
    /// offsets.
    pub fn mark_valued(&mut self) {
        self.valued = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_transitions() {
        let mut s = Symbol::new("foo", SourceLoc::default());
        assert!(s.set_visibility(Visibility::Global));
        assert!(s.set_visibility(Visibility::Global));
        assert!(!s.set_visibility(Visibility::Extern));
    }

    #[test]
    fn define_once() {
        let mut s = Symbol::new("foo", SourceLoc::default());
        assert!(s.define(SymbolPayload::Special, SourceLoc::default()));
        assert!(!s.define(SymbolPayload::Special, SourceLoc::default()));
    }
}
