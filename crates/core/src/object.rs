//! `Object`: the top-level container a front end builds up and the
//! optimizer and output driver act on.
//!
//! Owns everything a single assembly unit needs -- sections, the general
//! and special symbol tables, the architecture handle -- and holds no
//! thread-shared interior mutability, so multiple `Object`s can be driven
//! concurrently on separate threads as long as each owns its own.

use crate::diagnostics::{Diagnostics, SourceLoc};
use crate::error::AsmResult;
use crate::isa::{Arch, CodeSink};
use crate::optimizer;
use crate::section::{Section, SectionId, SectionKind};
use crate::symbol::{SymbolId, SymbolPayload};
use crate::symtab::SymbolTable;
use rasm_entity::PrimaryMap;
use std::collections::HashMap;

/// Typed, non-stringly global options, the way `cranelift-codegen`'s
/// `settings::Flags` groups a backend's knobs instead of a map of strings.
#[derive(Debug, Clone, Copy)]
pub struct ObjectOptions {
    /// Disable the NASM-style "subtracting two relative symbols in
    /// different sections is allowed, the linker sorts it out" leniency;
    /// when set, such an expression is rejected at finalize time instead.
    pub disable_global_sub_relative: bool,
    /// Round `Align` boundaries that are not already a power of two up to
    /// the next one, rather than rejecting them.
    pub power_of_two_align: bool,
    /// Mark the object's stack as executable (emits a GNU-stack note of
    /// the opposite sense when `false`, on formats that support one).
    pub exec_stack: bool,
}

impl Default for ObjectOptions {
    fn default() -> Self {
        ObjectOptions {
            disable_global_sub_relative: false,
            power_of_two_align: true,
            exec_stack: false,
        }
    }
}

/// The assembler's top-level in-memory object: sections, symbols, the
/// architecture handle, and the options governing both.
pub struct Object {
    source_name: String,
    object_name: String,
    arch: Box<dyn Arch>,
    general_symtab: SymbolTable,
    special_symtab: SymbolTable,
    sections: PrimaryMap<SectionId, Section>,
    current_section: Option<SectionId>,
    options: ObjectOptions,
}

impl Object {
    /// Create an empty object for the given architecture.
    pub fn new(
        arch: Box<dyn Arch>,
        source_name: impl Into<String>,
        object_name: impl Into<String>,
        options: ObjectOptions,
    ) -> Self {
        let case_insensitive = false;
        Object {
            source_name: source_name.into(),
            object_name: object_name.into(),
            arch,
            general_symtab: SymbolTable::new(case_insensitive),
            special_symtab: SymbolTable::new(case_insensitive),
            sections: PrimaryMap::new(),
            current_section: None,
            options,
        }
    }

    /// The source file this object was assembled from.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The object file this will be written to.
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// The architecture backend this object was built against.
    pub fn arch(&self) -> &dyn Arch {
        self.arch.as_ref()
    }

    /// Global options governing this object's assembly.
    pub fn options(&self) -> &ObjectOptions {
        &self.options
    }

    /// The general symbol table (ordinary user-visible symbols).
    pub fn symtab(&self) -> &SymbolTable {
        &self.general_symtab
    }

    /// Mutably borrow the general symbol table.
    pub fn symtab_mut(&mut self) -> &mut SymbolTable {
        &mut self.general_symtab
    }

    /// The special symbol table (architecture/object-format built-in
    /// markers such as a GOT or WRT base).
    pub fn special_symtab(&self) -> &SymbolTable {
        &self.special_symtab
    }

    /// Mutably borrow the special symbol table.
    pub fn special_symtab_mut(&mut self) -> &mut SymbolTable {
        &mut self.special_symtab
    }

    /// Find an existing section by name.
    pub fn find_section(&self, name: &str) -> Option<SectionId> {
        self.sections.iter().find(|(_, s)| s.name() == name).map(|(id, _)| id)
    }

    /// Create a new, empty section and make it current. Callers that want
    /// "switch to this section, creating it if needed" should check
    /// `find_section` first.
    pub fn append_section(&mut self, name: impl Into<String>, kind: SectionKind) -> SectionId {
        let id = self.sections.push(Section::new(name, kind));
        self.current_section = Some(id);
        id
    }

    /// Switch the current-section cursor to an already-existing section.
    pub fn switch_section(&mut self, id: SectionId) {
        self.current_section = Some(id);
    }

    /// The section the front end is currently appending to, if any.
    pub fn current_section(&self) -> Option<SectionId> {
        self.current_section
    }

    /// Mutably borrow the current section, if one has been selected.
    pub fn current_section_mut(&mut self) -> Option<&mut Section> {
        let id = self.current_section?;
        self.sections.get_mut(id)
    }

    /// Borrow a section by id.
    pub fn section(&self, id: SectionId) -> &Section {
        &self.sections[id]
    }

    /// Mutably borrow a section by id.
    pub fn section_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id]
    }

    /// Iterate sections in declaration order.
    pub fn sections(&self) -> impl Iterator<Item = (SectionId, &Section)> {
        self.sections.iter()
    }

    /// Resolve every `Value` every bytecode owns directly (fixups and
    /// `Times` repeat counts) against the general symbol table. Failures
    /// accumulate into `diag` rather than aborting the pass -- one
    /// unresolvable fixup does not stop the rest of the object from being
    /// checked in the same run.
    pub fn finalize(&mut self, diag: &mut Diagnostics) -> AsmResult<()> {
        let section_ids: Vec<SectionId> = self.sections.keys().collect();
        for sec_id in section_ids {
            let section = self.sections.get_mut(sec_id).unwrap();
            let bc_ids: Vec<_> = section.iter().map(|(id, _)| id).collect();
            for bc_id in bc_ids {
                let loc = section.get(bc_id).loc();
                let bc = section.get_mut(bc_id);
                for err in bc.finalize_values(bc_id, &self.general_symtab) {
                    diag.error(loc, format!("{}", err));
                }
            }
        }
        self.check_undefined(diag);
        Ok(())
    }

    /// Flag every symbol that was referenced but never defined and is not
    /// declared `extern`, per the crate's "undefined symbols are an error,
    /// reported once" policy.
    fn check_undefined(&self, diag: &mut Diagnostics) {
        for (_, sym) in self.general_symtab.iter_insertion_order() {
            let externally_defined = sym.visibility() == crate::symbol::Visibility::Extern;
            if sym.is_used() && !sym.is_defined() && !externally_defined {
                diag.note_undefined_symbol_once(sym.decl_loc(), sym.name());
            }
        }
    }

    /// Run the length-optimization pass over every section, then mark
    /// every label symbol valued now that final offsets exist.
    pub fn optimize(&mut self, diag: &mut Diagnostics) -> AsmResult<()> {
        optimizer::optimize(&mut self.sections, &self.general_symtab, diag)?;
        optimizer::commit_label_values(&mut self.general_symtab);
        Ok(())
    }

    /// Absolute offsets of every label/curpos-label symbol, keyed by
    /// symbol id: the owning section's `base_addr` (or 0) plus the
    /// labeled bytecode's offset plus the label's own offset within it.
    /// Computed once up front for `output_section` so resolving a fixup's
    /// relative symbol never needs a borrow of `self` alongside the
    /// bytecode being patched.
    fn label_offsets(&self) -> HashMap<SymbolId, u64> {
        let mut map = HashMap::new();
        for (id, sym) in self.general_symtab.iter_insertion_order() {
            let (section, bytecode, offset) = match sym.payload() {
                Some(SymbolPayload::Label { section, bytecode, offset })
                | Some(SymbolPayload::CurposLabel { section, bytecode, offset }) => {
                    (*section, *bytecode, *offset)
                }
                _ => continue,
            };
            if let Some(sec) = self.sections.get(section) {
                let base = sec.base_addr().unwrap_or(0);
                if let Some(bc_off) = sec.get(bytecode).offset() {
                    map.insert(id, base + bc_off + offset as u64);
                }
            }
        }
        map
    }

    /// Write one section's bytes through `sink`: patch every bytecode's
    /// fixups (emitting relocations for anything not locally resolvable),
    /// then emit its bytes in order. Sections optimize and output
    /// independently, so this can run section by section as the object
    /// format's writer asks for each one.
    pub fn output_section(&mut self, id: SectionId, sink: &mut dyn CodeSink) -> AsmResult<()> {
        let offsets = self.label_offsets();
        let base = self.sections[id].base_addr().unwrap_or(0);
        let bc_ids: Vec<_> = self.sections[id].iter().map(|(bid, _)| bid).collect();

        let Object {
            sections,
            general_symtab,
            ..
        } = self;
        let section = sections.get_mut(id).unwrap();
        for bc_id in bc_ids {
            let bc_offset = base + section.get(bc_id).offset().unwrap_or(0);
            let bc = section.get_mut(bc_id);
            bc.resolve_fixups(
                general_symtab,
                bc_offset,
                |sym| offsets.get(&sym).copied(),
                sink,
                bc_offset,
            )?;
            bc.output(sink)?;
        }
        Ok(())
    }

    /// Declare a symbol `extern` (or upgrade an existing undefined local
    /// to `extern`), so `check_undefined` does not flag it.
    pub fn declare_extern(&mut self, name: &str, loc: SourceLoc) -> SymbolId {
        let id = self.general_symtab.insert(name, loc);
        self.general_symtab.get_mut(id).set_visibility(crate::symbol::Visibility::Extern);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::ArchConfig;

    #[derive(Debug)]
    struct StubArch(ArchConfig);

    impl Arch for StubArch {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn word_size_bits(&self) -> u32 {
            self.0.default_operand_bits
        }
        fn nop_fill(&self, len: usize) -> Vec<u8> {
            vec![0x90; len]
        }
    }

    fn new_object() -> Object {
        Object::new(
            Box::new(StubArch(ArchConfig::default())),
            "test.asm",
            "test.o",
            ObjectOptions::default(),
        )
    }

    #[test]
    fn append_and_find_section() {
        let mut obj = new_object();
        let id = obj.append_section("text", SectionKind::Code);
        assert_eq!(obj.current_section(), Some(id));
        assert_eq!(obj.find_section("text"), Some(id));
        assert_eq!(obj.find_section("bss"), None);
    }

    #[test]
    fn finalize_and_optimize_empty_object() {
        let mut obj = new_object();
        obj.append_section("text", SectionKind::Code);
        let mut diag = Diagnostics::new();
        obj.finalize(&mut diag).unwrap();
        assert!(diag.is_ok());
        obj.optimize(&mut diag).unwrap();
        assert!(diag.is_ok());
    }

    #[test]
    fn undefined_symbol_is_reported_once() {
        let mut obj = new_object();
        let sym = obj.symtab_mut().insert("missing", SourceLoc::default());
        obj.symtab_mut().get_mut(sym).mark_used();
        let mut diag = Diagnostics::new();
        obj.finalize(&mut diag).unwrap();
        assert!(!diag.is_ok());
        assert_eq!(diag.error_count(), 1);
    }

    #[test]
    fn extern_symbol_is_not_flagged_undefined() {
        let mut obj = new_object();
        let sym = obj.declare_extern("imported", SourceLoc::default());
        obj.symtab_mut().get_mut(sym).mark_used();
        let mut diag = Diagnostics::new();
        obj.finalize(&mut diag).unwrap();
        assert!(diag.is_ok());
    }
}
