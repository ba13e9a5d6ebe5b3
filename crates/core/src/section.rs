//! Sections: ordered containers of bytecodes.
//!
//! A `Section` owns its own bytecode arena, so [`BytecodeId`] is scoped to
//! the section that minted it, not the whole object -- the
//! optimizer-assigned dense cross-section ordering lives separately, in
//! each [`Bytecode`]'s own `index` field. `PrimaryMap` already preserves
//! push order, so that arena doubles as the section's bytecode order; no
//! separate `Vec<BytecodeId>` is needed alongside it.

use crate::bytecode::{Bytecode, BytecodeId, Contents};
use crate::bytecode::InsnContents;
use crate::diagnostics::SourceLoc;
use crate::value::Value;
use rasm_entity::{entity_impl, PrimaryMap};

/// An arena-indexed reference to a [`Section`].
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SectionId(u32);
entity_impl!(SectionId, "sect");

/// Broad classification used only to decide whether an uninitialized
/// [`Contents::Gap`] deserves a warning when output (code/data sections
/// are expected to be fully initialized; `Bss` is not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Executable code.
    Code,
    /// Initialized data.
    Data,
    /// Uninitialized data; gaps here are expected, not warned about.
    Bss,
}

/// An ordered sequence of bytecodes sharing layout and output rules.
#[derive(Debug)]
pub struct Section {
    name: String,
    kind: SectionKind,
    bytecodes: PrimaryMap<BytecodeId, Bytecode>,
    /// Absolute load address this section is declared to start at, if the
    /// object format or an `org` directive pins one (the flat-binary boot
    /// sector scenario sets this directly; a freestanding ELF/COFF-style
    /// section leaves it `None` until the linker decides).
    base_addr: Option<u64>,
}

impl Section {
    /// Create an empty section.
    pub fn new(name: impl Into<String>, kind: SectionKind) -> Self {
        Section {
            name: name.into(),
            kind,
            bytecodes: PrimaryMap::new(),
            base_addr: None,
        }
    }

    /// The section's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Broad content classification.
    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    /// Declared absolute start address, if any.
    pub fn base_addr(&self) -> Option<u64> {
        self.base_addr
    }

    /// Pin this section's absolute start address.
    pub fn set_base_addr(&mut self, addr: u64) {
        self.base_addr = Some(addr);
    }

    /// Number of bytecodes in the section.
    pub fn len(&self) -> usize {
        self.bytecodes.len()
    }

    /// Is the section empty?
    pub fn is_empty(&self) -> bool {
        self.bytecodes.is_empty()
    }

    /// Borrow a bytecode.
    pub fn get(&self, id: BytecodeId) -> &Bytecode {
        &self.bytecodes[id]
    }

    /// Mutably borrow a bytecode.
    pub fn get_mut(&mut self, id: BytecodeId) -> &mut Bytecode {
        &mut self.bytecodes[id]
    }

    /// Iterate bytecodes in section order.
    pub fn iter(&self) -> impl Iterator<Item = (BytecodeId, &Bytecode)> {
        self.bytecodes.iter()
    }

    /// Append raw constant bytes as a new fixed-content bytecode.
    pub fn append_data(&mut self, bytes: &[u8], loc: SourceLoc) -> BytecodeId {
        let mut bc = Bytecode::new(Contents::Fixed, loc);
        bc.append_bytes(bytes);
        self.bytecodes.push(bc)
    }

    /// Append a single constant byte.
    pub fn append_byte(&mut self, byte: u8, loc: SourceLoc) -> BytecodeId {
        self.append_data(&[byte], loc)
    }

    /// Append a fixed-size value slot to be resolved at output time.
    pub fn append_fixup(&mut self, value: Value, size_bytes: u32, loc: SourceLoc) -> BytecodeId {
        let mut bc = Bytecode::new(Contents::Fixed, loc);
        bc.append_fixup(value, size_bytes, loc);
        self.bytecodes.push(bc)
    }

    /// Append `size` bytes of uninitialized space (`resb`-style).
    pub fn append_gap(&mut self, size: u32, loc: SourceLoc) -> BytecodeId {
        self.bytecodes.push(Bytecode::new(Contents::Gap { size }, loc))
    }

    /// Append an alignment directive.
    pub fn append_align(
        &mut self,
        boundary: u32,
        fill: Option<Vec<u8>>,
        max_skip: Option<u32>,
        loc: SourceLoc,
    ) -> BytecodeId {
        self.bytecodes.push(Bytecode::new(
            Contents::Align {
                boundary,
                fill,
                max_skip,
            },
            loc,
        ))
    }

    /// Append an `org` directive.
    pub fn append_org(&mut self, target: u64, fill: u8, loc: SourceLoc) -> BytecodeId {
        self.bytecodes.push(Bytecode::new(Contents::Org { target, fill }, loc))
    }

    /// Append a `TIMES <value>` zero-fill repetition whose count is a
    /// still-to-be-resolved distance.
    pub fn append_times(&mut self, unit_len: u32, value: Value, loc: SourceLoc) -> BytecodeId {
        self.bytecodes
            .push(Bytecode::new(Contents::Times { unit_len, value }, loc))
    }

    /// Append an architecture-encoded instruction.
    pub fn append_instruction(&mut self, insn: Box<dyn InsnContents>, loc: SourceLoc) -> BytecodeId {
        self.bytecodes.push(Bytecode::new(Contents::Instruction(insn), loc))
    }

    /// Append raw bytes read from an external file (`incbin`).
    pub fn append_incbin(&mut self, data: Vec<u8>, loc: SourceLoc) -> BytecodeId {
        self.bytecodes.push(Bytecode::new(Contents::Incbin { data }, loc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_data_then_fetch() {
        let mut s = Section::new("text", SectionKind::Code);
        let id = s.append_data(&[1, 2, 3], SourceLoc::default());
        assert_eq!(s.get(id).head_len(), 3);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn iteration_preserves_append_order() {
        let mut s = Section::new("text", SectionKind::Code);
        let a = s.append_byte(1, SourceLoc::default());
        let b = s.append_byte(2, SourceLoc::default());
        let order: Vec<BytecodeId> = s.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![a, b]);
    }
}
