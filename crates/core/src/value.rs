//! Value resolution: the "size-in-bits slot" every fixup ultimately is.
//!
//! A [`Value`] is logically
//! `(absolute_expr + relative_symbol - sub_symbol) >> rshift`, with WRT,
//! seg-of, section-relative, PC-relative, sign/zero-extend, jump-target,
//! and next-instruction-offset flags layered on top. [`Value::finalize`]
//! takes an arbitrary absolute `Expr` built during parsing and reduces it
//! to that canonical form (or fails with `TooComplex`), following the
//! scan rules of the original `yasm::Value::finalize`/`finalize_scan`.
//! [`Value::output_basic`] then either writes final bytes directly (when
//! the relative part, if any, is locally resolvable) or reports that the
//! object format must emit a relocation instead.

use crate::error::AsmError;
use crate::expr::{Expr, ExprOp, ExprTerm, RegId};
use crate::intnum::IntNum;
use crate::symbol::SymbolId;
use crate::symtab::SymbolTable;
use std::cmp::Ordering;

/// What a `WRT` clause targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrtTarget {
    /// `WRT` a symbol (e.g. a GOT or TLS base the object format defines).
    Symbol(SymbolId),
    /// `WRT` an architecture register (meaning is entirely up to the arch).
    Reg(RegId),
}

/// A size-in-bits value slot.
#[derive(Debug, Clone)]
pub struct Value {
    size_bits: u32,
    abs: Option<Expr>,
    rel: Option<SymbolId>,
    sub_rel: Option<SymbolId>,
    rshift: u8,
    seg_of: bool,
    wrt: Option<WrtTarget>,
    section_rel: bool,
    pc_rel: bool,
    curpos_rel: bool,
    signed: bool,
    jump_target: bool,
    next_insn_offset: bool,
}

const MAX_RSHIFT: i64 = 127;

impl Value {
    /// A value slot with no content yet (all-zero once emitted).
    pub fn new(size_bits: u32) -> Self {
        Value {
            size_bits,
            abs: None,
            rel: None,
            sub_rel: None,
            rshift: 0,
            seg_of: false,
            wrt: None,
            section_rel: false,
            pc_rel: false,
            curpos_rel: false,
            signed: false,
            jump_target: false,
            next_insn_offset: false,
        }
    }

    /// Seed with an absolute expression; call `finalize` before using.
    pub fn with_expr(size_bits: u32, expr: Expr) -> Self {
        let mut v = Value::new(size_bits);
        v.abs = Some(expr);
        v
    }

    /// Seed directly with a single relative symbol (no `finalize` needed).
    pub fn with_symbol(size_bits: u32, sym: SymbolId) -> Self {
        let mut v = Value::new(size_bits);
        v.rel = Some(sym);
        v
    }

    /// Width in bits.
    pub fn size_bits(&self) -> u32 {
        self.size_bits
    }

    /// Mark this value PC-relative (subtracts the bytecode's own position).
    pub fn set_pc_rel(&mut self) {
        self.pc_rel = true;
    }

    /// Mark this value as wanting a signed rather than zero-extended fit check.
    pub fn set_signed(&mut self, signed: bool) {
        self.signed = signed;
    }

    /// Mark this value as a jump target (informs the object format's
    /// relocation-type choice; the core does not interpret it further).
    pub fn set_jump_target(&mut self, v: bool) {
        self.jump_target = v;
    }

    /// Mark this value as measured from the offset of the *next*
    /// instruction rather than the start of the current one.
    pub fn set_next_insn_offset(&mut self, v: bool) {
        self.next_insn_offset = v;
    }

    /// Mark this value as section-relative (its emitted integer excludes
    /// the section's base address; the object format supplies the addend
    /// via a relocation).
    pub fn set_section_rel(&mut self, v: bool) {
        self.section_rel = v;
    }

    /// The relative (added) symbol, if any, after `finalize`.
    pub fn relative_symbol(&self) -> Option<SymbolId> {
        self.rel
    }

    /// The subtracted symbol, if any, after `finalize`.
    pub fn sub_symbol(&self) -> Option<SymbolId> {
        self.sub_rel
    }

    /// The right-shift amount folded out of a trailing `SHR`.
    pub fn rshift(&self) -> u8 {
        self.rshift
    }

    /// Whether a `SEG` clause was folded into this value.
    pub fn is_seg_of(&self) -> bool {
        self.seg_of
    }

    /// The `WRT` target, if any.
    pub fn wrt(&self) -> Option<WrtTarget> {
        self.wrt
    }

    /// Whether the value is PC-relative (including via `set_curpos_rel`).
    pub fn is_pc_rel(&self) -> bool {
        self.pc_rel
    }

    /// Whether this value came from a `$`-style curpos subtraction rather
    /// than an explicit PC-relative request.
    pub fn is_curpos_rel(&self) -> bool {
        self.curpos_rel
    }

    /// Whether the object format must treat this as a jump-target relocation.
    pub fn is_jump_target(&self) -> bool {
        self.jump_target
    }

    /// Whether this value excludes its section's base address.
    pub fn is_section_rel(&self) -> bool {
        self.section_rel
    }

    /// The constant residual of the absolute part, if any, after
    /// `finalize` has folded everything it can. `None` means zero, not
    /// "unresolved" -- a still-symbolic residual is a `finalize` bug, not
    /// something callers need to handle.
    pub fn abs_const(&self) -> Option<i64> {
        self.abs.as_ref().and_then(|e| e.get_intnum()).map(|n| n.to_i64_truncate())
    }

    /// Reduce `self`'s absolute expression to the canonical
    /// `abs + rel - sub_rel` form, or fail with `TooComplex`.
    pub fn finalize(&mut self, symtab: &SymbolTable) -> Result<(), AsmError> {
        let expr = match self.abs.take() {
            Some(e) => e,
            None => return Ok(()),
        };
        let leveled = expr.level_tree(symtab, true, true, false)?;

        if let Some(n) = leveled.get_intnum() {
            if !n.is_zero() {
                self.abs = Some(Expr::ident(ExprTerm::Int(n.clone())));
            }
            return Ok(());
        }
        if let Some(sym) = leveled.get_symbol() {
            self.rel = Some(sym);
            return Ok(());
        }

        let remainder = self.scan(leveled, symtab)?;
        let remainder = remainder.level_tree(symtab, true, true, false)?;
        if let Some(n) = remainder.get_intnum() {
            if !n.is_zero() {
                self.abs = Some(remainder);
            }
        } else {
            self.abs = Some(remainder);
        }
        Ok(())
    }

    /// Walk `expr`'s top-level shape looking for exactly one relative
    /// term (and optionally one subtracted term), a `SHR`, a `SEG`, or a
    /// `WRT`. Returns the residual absolute expression with the scanned
    /// symbol(s) replaced by zero.
    fn scan(&mut self, expr: Expr, symtab: &SymbolTable) -> Result<Expr, AsmError> {
        match expr.op {
            ExprOp::Shr if expr.terms.len() == 2 => {
                let mut terms = expr.terms;
                let shift_term = terms.pop().unwrap();
                let lhs = terms.pop().unwrap();
                let shift_n = match &shift_term {
                    ExprTerm::Int(n) => n.clone(),
                    ExprTerm::Sub(e) => e.get_intnum().cloned().ok_or_else(too_complex(self.size_bits))?,
                    _ => return Err(too_complex(self.size_bits)()),
                };
                let shift_val = shift_n.to_i64_truncate();
                if shift_val < 0 || shift_val > MAX_RSHIFT {
                    return Err(AsmError::OutOfRange {
                        reason: format!("shift amount {} exceeds {}", shift_val, MAX_RSHIFT),
                    });
                }
                let lhs_expr = into_expr(lhs);
                let residual = self.scan(lhs_expr.level_tree(symtab, true, true, false)?, symtab)?;
                self.rshift = shift_val as u8;
                Ok(residual)
            }
            ExprOp::Seg if expr.terms.len() == 1 => {
                let inner = into_expr(expr.terms.into_iter().next().unwrap());
                let sym = inner.get_symbol().ok_or_else(too_complex(self.size_bits))?;
                if self.rel.is_some() {
                    return Err(too_complex(self.size_bits)());
                }
                self.seg_of = true;
                self.rel = Some(sym);
                Ok(Expr::int(IntNum::zero()))
            }
            ExprOp::Wrt if expr.terms.len() == 2 => {
                let mut terms = expr.terms;
                let wrt_term = terms.pop().unwrap();
                let lhs = terms.pop().unwrap();
                let target = match &wrt_term {
                    ExprTerm::Reg(r) => WrtTarget::Reg(*r),
                    ExprTerm::Sym(s) => WrtTarget::Symbol(*s),
                    ExprTerm::Sub(e) => {
                        if let Some(s) = e.get_symbol() {
                            WrtTarget::Symbol(s)
                        } else if let Some(r) = e.get_reg() {
                            WrtTarget::Reg(r)
                        } else {
                            return Err(too_complex(self.size_bits)());
                        }
                    }
                    _ => return Err(too_complex(self.size_bits)()),
                };
                if self.wrt.is_some() {
                    return Err(too_complex(self.size_bits)());
                }
                self.wrt = Some(target);
                let lhs_expr = into_expr(lhs).level_tree(symtab, true, true, false)?;
                self.scan(lhs_expr, symtab)
            }
            ExprOp::Add => self.scan_add(expr.terms, symtab),
            _ => {
                if let Some(sym) = expr.get_symbol() {
                    if self.rel.is_some() {
                        return Err(too_complex(self.size_bits)());
                    }
                    self.rel = Some(sym);
                    Ok(Expr::int(IntNum::zero()))
                } else {
                    Err(too_complex(self.size_bits)())
                }
            }
        }
    }

    fn scan_add(&mut self, terms: Vec<ExprTerm>, symtab: &SymbolTable) -> Result<Expr, AsmError> {
        let mut remaining = Vec::new();
        for t in terms {
            match &t {
                ExprTerm::Sym(s) => {
                    self.claim_add_symbol(*s)?;
                }
                ExprTerm::Sub(e) if e.get_symbol().is_some() => {
                    self.claim_add_symbol(e.get_symbol().unwrap())?;
                }
                ExprTerm::Sub(e) if is_negated_symbol(e) => {
                    let sym = negated_symbol(e).unwrap();
                    self.claim_sub_symbol(sym)?;
                }
                ExprTerm::Sub(e) if e.op == ExprOp::Seg || e.op == ExprOp::Wrt => {
                    let residual = self.scan((**e).clone(), symtab)?;
                    if let Some(n) = residual.get_intnum() {
                        if !n.is_zero() {
                            remaining.push(ExprTerm::Int(n.clone()));
                        }
                    } else {
                        remaining.push(ExprTerm::Sub(Box::new(residual)));
                    }
                }
                _ => remaining.push(t),
            }
        }
        if remaining.is_empty() {
            Ok(Expr::int(IntNum::zero()))
        } else if remaining.len() == 1 {
            Ok(into_expr(remaining.into_iter().next().unwrap()))
        } else {
            Ok(Expr::new(ExprOp::Add, remaining))
        }
    }

    fn claim_add_symbol(&mut self, sym: SymbolId) -> Result<(), AsmError> {
        if self.rel.is_some() {
            return Err(too_complex(self.size_bits)());
        }
        self.rel = Some(sym);
        Ok(())
    }

    fn claim_sub_symbol(&mut self, sym: SymbolId) -> Result<(), AsmError> {
        if self.sub_rel.is_some() {
            return Err(too_complex(self.size_bits)());
        }
        self.sub_rel = Some(sym);
        Ok(())
    }

    /// If `sub_rel` is the curpos (`$`) symbol for `at_bytecode`, fold the
    /// subtraction into a PC-relative reference instead of a symbol-symbol
    /// distance, per the "curpos label" special case.
    pub fn set_curpos_rel(&mut self, symtab: &SymbolTable, curpos: SymbolId) {
        if self.sub_rel == Some(curpos) {
            self.sub_rel = None;
            self.curpos_rel = true;
            self.pc_rel = true;
        }
        let _ = symtab;
    }

    /// Attempt to emit this value's bytes directly into `dest`.
    ///
    /// Returns `Ok(true)` if bytes were written (no relocation needed),
    /// `Ok(false)` if the object format must generate a relocation
    /// instead (the relative symbol is external, unresolved, lives in a
    /// different section, or the value is WRT/seg-of/shifted in a way the
    /// core itself cannot fold into a final integer).
    pub fn output_basic(
        &self,
        dest: &mut [u8],
        symtab: &SymbolTable,
        bytecode_offset: u64,
        total_len: u64,
        resolve_offset: impl Fn(SymbolId) -> Option<u64>,
    ) -> Result<bool, AsmError> {
        if self.seg_of || self.wrt.is_some() || self.section_rel {
            return Ok(false);
        }

        let mut total = self
            .abs
            .as_ref()
            .and_then(|e| e.get_intnum())
            .cloned()
            .unwrap_or_else(IntNum::zero);

        if let Some(rel) = self.rel {
            let sym = symtab.get(rel);
            if !sym.is_valued() {
                return Ok(false);
            }
            match resolve_offset(rel) {
                Some(off) => total = total.add(&IntNum::from_u64(off)),
                None => return Ok(false),
            }
        }
        if let Some(sub) = self.sub_rel {
            match resolve_offset(sub) {
                Some(off) => total = total.sub(&IntNum::from_u64(off)),
                None => return Ok(false),
            }
        }
        if self.pc_rel {
            let origin = if self.next_insn_offset {
                bytecode_offset + total_len
            } else {
                bytecode_offset
            };
            total = total.sub(&IntNum::from_u64(origin));
        }

        let shifted = total.shr(self.rshift as u32);
        let overflow = shifted.to_bytes(dest, self.size_bits, 0, self.signed);
        if let Some(kind) = overflow {
            log::debug!(
                "value output overflowed a {}-bit slot ({:?})",
                self.size_bits,
                kind
            );
        }
        Ok(true)
    }
}

fn into_expr(t: ExprTerm) -> Expr {
    match t {
        ExprTerm::Sub(e) => *e,
        other => Expr::ident(other),
    }
}

fn too_complex(size_bits: u32) -> impl Fn() -> AsmError {
    move || AsmError::TooComplex { size_bits }
}

fn is_negated_symbol(e: &Expr) -> bool {
    negated_symbol(e).is_some()
}

/// Recognize the `-1 * symbol` shape `NEG(symbol)` levels into.
fn negated_symbol(e: &Expr) -> Option<SymbolId> {
    if e.op != ExprOp::Mul || e.terms.len() != 2 {
        return None;
    }
    let has_minus_one = e.terms.iter().any(|t| matches!(t, ExprTerm::Int(n) if n.cmp(&IntNum::from_i64(-1)) == Ordering::Equal));
    if !has_minus_one {
        return None;
    }
    e.terms.iter().find_map(|t| match t {
        ExprTerm::Sym(s) => Some(*s),
        ExprTerm::Sub(inner) => inner.get_symbol(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceLoc;

    #[test]
    fn finalize_plain_integer_clears_abs() {
        let symtab = SymbolTable::new(false);
        let mut v = Value::with_expr(32, Expr::int(IntNum::zero()));
        v.finalize(&symtab).unwrap();
        assert!(v.relative_symbol().is_none());
    }

    #[test]
    fn finalize_bare_symbol_becomes_relative() {
        let mut symtab = SymbolTable::new(false);
        let sym = symtab.insert("label", SourceLoc::default());
        let mut v = Value::with_expr(32, Expr::symbol(sym));
        v.finalize(&symtab).unwrap();
        assert_eq!(v.relative_symbol(), Some(sym));
    }

    #[test]
    fn finalize_label_plus_constant() {
        let mut symtab = SymbolTable::new(false);
        let sym = symtab.insert("label", SourceLoc::default());
        let expr = Expr::new(
            ExprOp::Add,
            vec![ExprTerm::Sym(sym), ExprTerm::Int(IntNum::from_i64(4))],
        );
        let mut v = Value::with_expr(32, expr);
        v.finalize(&symtab).unwrap();
        assert_eq!(v.relative_symbol(), Some(sym));
    }

    #[test]
    fn finalize_symbol_difference() {
        let mut symtab = SymbolTable::new(false);
        let a = symtab.insert("a", SourceLoc::default());
        let b = symtab.insert("b", SourceLoc::default());
        let expr = Expr::new(
            ExprOp::Add,
            vec![
                ExprTerm::Sym(a),
                ExprTerm::Sub(Box::new(Expr::new(
                    ExprOp::Mul,
                    vec![ExprTerm::Int(IntNum::from_i64(-1)), ExprTerm::Sym(b)],
                ))),
            ],
        );
        let mut v = Value::with_expr(32, expr);
        v.finalize(&symtab).unwrap();
        assert_eq!(v.relative_symbol(), Some(a));
        assert_eq!(v.sub_symbol(), Some(b));
    }

    #[test]
    fn finalize_shr_folds_into_rshift() {
        let mut symtab = SymbolTable::new(false);
        let sym = symtab.insert("label", SourceLoc::default());
        let expr = Expr::new(
            ExprOp::Shr,
            vec![ExprTerm::Sym(sym), ExprTerm::Int(IntNum::from_i64(2))],
        );
        let mut v = Value::with_expr(32, expr);
        v.finalize(&symtab).unwrap();
        assert_eq!(v.relative_symbol(), Some(sym));
        assert_eq!(v.rshift(), 2);
    }

    #[test]
    fn finalize_two_relative_symbols_fails() {
        let mut symtab = SymbolTable::new(false);
        let a = symtab.insert("a", SourceLoc::default());
        let b = symtab.insert("b", SourceLoc::default());
        let expr = Expr::new(ExprOp::Add, vec![ExprTerm::Sym(a), ExprTerm::Sym(b)]);
        let mut v = Value::with_expr(32, expr);
        assert!(v.finalize(&symtab).is_err());
    }
}
