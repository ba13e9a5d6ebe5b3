//! The seam between the core and everything outside it: architecture
//! backends on one side, object-format writers on the other.
//!
//! The core never names a concrete architecture or object format. It
//! drives [`Contents::Instruction`](crate::bytecode::Contents::Instruction)
//! through [`crate::bytecode::InsnContents`] and drives output through
//! [`CodeSink`]; everything downstream of that is somebody else's crate.

use crate::error::AsmResult;
use crate::symbol::SymbolId;
use crate::value::Value;

/// What kind of relocation a [`CodeSink`] must emit when a [`Value`]
/// cannot be resolved to a final integer locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// A plain absolute address, `size_bits` wide.
    Absolute {
        /// Width of the relocated field.
        size_bits: u32,
    },
    /// PC-relative displacement from the relocated field itself.
    PcRelative {
        /// Width of the relocated field.
        size_bits: u32,
    },
    /// An offset from the owning section's base (no load-time address
    /// needed, just a link-time section layout).
    SectionRelative {
        /// Width of the relocated field.
        size_bits: u32,
    },
    /// The segment-selector half of a far pointer (`SEG x`).
    SegmentSelector,
}

/// A relocation an [`ObjectFormat`] writer must record against its symbol
/// and section tables.
#[derive(Debug, Clone)]
pub struct Reloc {
    /// Byte offset within the current section where the field being
    /// relocated starts.
    pub section_offset: u64,
    /// The symbol the relocation is against.
    pub symbol: SymbolId,
    /// What kind of relocation this is.
    pub kind: RelocKind,
    /// Constant addend folded in alongside the symbol's address.
    pub addend: i64,
}

/// Output sink an [`ObjectFormat`] writer hands the core during the
/// output pass. One `CodeSink` instance is active per section.
pub trait CodeSink {
    /// Write raw bytes at the sink's current position.
    fn output_bytes(&mut self, bytes: &[u8]);

    /// Advance the sink's position by `size` zero bytes without writing
    /// them eagerly (a gap section may be backed by a hole rather than
    /// physical zero bytes, depending on the object format).
    fn output_gap(&mut self, size: u64);

    /// Record a relocation at the sink's current position.
    fn output_reloc(&mut self, reloc: Reloc);
}

/// Architecture backend contract: sizes and emits instructions, and
/// supplies the NOP pattern `Align` padding falls back to when no
/// explicit fill is given.
pub trait Arch {
    /// Short identifying name (`"test"`, `"x86"`, ...).
    fn name(&self) -> &'static str;

    /// Natural word size in bits (used to default absolute-value widths).
    fn word_size_bits(&self) -> u32;

    /// Produce `len` bytes of architecture-appropriate no-op padding.
    fn nop_fill(&self, len: usize) -> Vec<u8>;
}

/// Object-format contract: which relocation kinds it can represent, and
/// its short identifying name (used in diagnostics).
pub trait ObjectFormat {
    /// Short identifying name (`"bin"`, `"coff"`, ...).
    fn name(&self) -> &'static str;

    /// Can this format represent a relocation of this kind at all?
    fn supports_reloc(&self, kind: RelocKind) -> bool;
}

/// Resolve a value slot against a concrete output position, writing bytes
/// into `dest` if possible or emitting a relocation through `sink`
/// otherwise. Shared by every `ObjectFormat` writer's output pass so the
/// "when do we need a relocation" decision lives in one place.
pub fn output_value(
    value: &Value,
    dest: &mut [u8],
    symtab: &crate::symtab::SymbolTable,
    bytecode_offset: u64,
    total_len: u64,
    resolve_offset: impl Fn(SymbolId) -> Option<u64>,
    sink: &mut dyn CodeSink,
    section_offset: u64,
) -> AsmResult<()> {
    let resolved = value.output_basic(dest, symtab, bytecode_offset, total_len, &resolve_offset)?;
    if resolved {
        return Ok(());
    }

    let size_bits = value.size_bits();
    let kind = if value.is_seg_of() {
        RelocKind::SegmentSelector
    } else if value.is_section_rel() {
        RelocKind::SectionRelative { size_bits }
    } else if value.is_pc_rel() {
        RelocKind::PcRelative { size_bits }
    } else {
        RelocKind::Absolute { size_bits }
    };

    let symbol = value.relative_symbol().ok_or(crate::error::AsmError::UnsupportedReloc {
        reason: "value could not be resolved locally and carries no relocatable symbol".into(),
    })?;

    sink.output_reloc(Reloc {
        section_offset,
        symbol,
        kind,
        addend: 0,
    });
    Ok(())
}

/// Typed configuration for an [`Arch`] backend, the way
/// `cranelift-codegen`'s `settings::Flags` groups typed flags instead of
/// a stringly-typed map.
#[derive(Debug, Clone)]
pub struct ArchConfig {
    /// Default operand size in bits when a front end doesn't specify one.
    pub default_operand_bits: u32,
    /// Whether branch relaxation may choose the long form speculatively
    /// on the first pass (trades optimizer iterations for fewer passes).
    pub optimistic_short_branches: bool,
}

impl Default for ArchConfig {
    fn default() -> Self {
        ArchConfig {
            default_operand_bits: 32,
            optimistic_short_branches: true,
        }
    }
}

