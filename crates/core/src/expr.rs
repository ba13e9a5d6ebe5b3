//! Expression trees.
//!
//! An [`Expr`] is an operator node over an ordered list of terms. Terms are
//! either literals (integer, float, register), references into other
//! components (symbol, bytecode location), a numbered substitution
//! placeholder, or a nested sub-expression. [`Expr::level_tree`] is the
//! single normalization entry point: it expands `EQU` symbols, optionally
//! folds constant subtrees, flattens associative operators, rewrites
//! negation into multiplication by `-1`, and optionally drops identity
//! terms -- mirroring the normalization pipeline yasm's expression layer
//! runs before anything downstream (`Value::finalize`, the optimizer's
//! span terms) is allowed to pattern-match on an expression's shape.

use crate::error::AsmError;
use crate::intnum::IntNum;
use crate::symbol::SymbolId;
use crate::symtab::SymbolTable;
use std::collections::HashSet;

/// A register, kept fully opaque to the core: architectures mint and
/// interpret `RegId` values however their encoding tables want, the core
/// only ever moves them around and compares them for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegId(pub u32);

/// Operator at an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    /// A single-term pass-through node (the common case for a leaf wrapped
    /// so it can sit where an `Expr` is expected).
    Ident,
    /// `+`
    Add,
    /// `-` (binary)
    Sub,
    /// `*`
    Mul,
    /// Unsigned `/`
    Div,
    /// Signed `/`
    SignDiv,
    /// Unsigned `%`
    Mod,
    /// Signed `%`
    SignMod,
    /// Unary `-`
    Neg,
    /// Unary `~`
    Not,
    /// Bitwise `|`
    Or,
    /// Bitwise `&`
    And,
    /// Bitwise `^`
    Xor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// Logical `||`
    LogicalOr,
    /// Logical `&&`
    LogicalAnd,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `==`
    Eq,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `!=`
    Ne,
    /// `SEG x` -- the segment-selector part of a far pointer.
    Seg,
    /// `x WRT y` -- "relative to" a WRT mechanism symbol or register.
    Wrt,
    /// `seg:off` far-pointer construction.
    SegOff,
}

impl ExprOp {
    fn is_commutative_assoc(self) -> bool {
        matches!(
            self,
            ExprOp::Add | ExprOp::Mul | ExprOp::Or | ExprOp::And | ExprOp::Xor
        )
    }
}

/// A single term inside an expression's term list.
#[derive(Debug, Clone)]
pub enum ExprTerm {
    /// An integer literal.
    Int(IntNum),
    /// A floating-point literal.
    Float(f64),
    /// A register.
    Reg(RegId),
    /// A reference to a symbol.
    Sym(SymbolId),
    /// A reference to a bytecode-relative location: `(bytecode, offset)`,
    /// used internally once the optimizer starts folding symbol-to-symbol
    /// distances into plain offsets via `extra_xform`.
    Loc(crate::bytecode::BytecodeId, i64),
    /// A numbered placeholder filled in later by [`Expr::substitute`].
    Subst(usize),
    /// A nested sub-expression.
    Sub(Box<Expr>),
}

impl PartialEq for ExprTerm {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ExprTerm::Int(a), ExprTerm::Int(b)) => a == b,
            (ExprTerm::Float(a), ExprTerm::Float(b)) => a == b,
            (ExprTerm::Reg(a), ExprTerm::Reg(b)) => a == b,
            (ExprTerm::Sym(a), ExprTerm::Sym(b)) => a == b,
            (ExprTerm::Loc(a, oa), ExprTerm::Loc(b, ob)) => a == b && oa == ob,
            (ExprTerm::Subst(a), ExprTerm::Subst(b)) => a == b,
            (ExprTerm::Sub(a), ExprTerm::Sub(b)) => a == b,
            _ => false,
        }
    }
}

/// Rank used by `order_terms` to canonicalize commutative operand order:
/// registers first, then integers, then floats, then symbols, then
/// sub-expressions, preserving relative order within each rank.
fn term_rank(t: &ExprTerm) -> u8 {
    match t {
        ExprTerm::Reg(_) => 0,
        ExprTerm::Int(_) => 1,
        ExprTerm::Float(_) => 2,
        ExprTerm::Sym(_) => 3,
        ExprTerm::Loc(..) => 3,
        ExprTerm::Subst(_) => 4,
        ExprTerm::Sub(_) => 4,
    }
}

/// An expression tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// The operator at this node.
    pub op: ExprOp,
    /// The node's ordered terms.
    pub terms: Vec<ExprTerm>,
}

impl Expr {
    /// Build an expression node.
    pub fn new(op: ExprOp, terms: Vec<ExprTerm>) -> Self {
        Expr { op, terms }
    }

    /// Wrap a single term in an `Ident` node.
    pub fn ident(term: ExprTerm) -> Self {
        Expr {
            op: ExprOp::Ident,
            terms: vec![term],
        }
    }

    /// An integer-literal expression.
    pub fn int(v: IntNum) -> Self {
        Expr::ident(ExprTerm::Int(v))
    }

    /// A symbol-reference expression.
    pub fn symbol(id: SymbolId) -> Self {
        Expr::ident(ExprTerm::Sym(id))
    }

    /// Binary `+`.
    pub fn add(terms: Vec<Expr>) -> Self {
        Expr::new(
            ExprOp::Add,
            terms.into_iter().map(|e| ExprTerm::Sub(Box::new(e))).collect(),
        )
    }

    /// Peel a top-level `SEG x`, returning `x`. Fails (returns `None`,
    /// leaving `self` untouched) if the top operator is not `Seg`.
    pub fn extract_seg(self) -> Result<Expr, Expr> {
        if self.op == ExprOp::Seg && self.terms.len() == 1 {
            Ok(term_into_expr(self.terms.into_iter().next().unwrap()))
        } else {
            Err(self)
        }
    }

    /// Peel a top-level `x WRT y`, returning `(x, y)`.
    pub fn extract_wrt(self) -> Result<(Expr, ExprTerm), Expr> {
        if self.op == ExprOp::Wrt && self.terms.len() == 2 {
            let mut terms = self.terms;
            let wrt = terms.pop().unwrap();
            let lhs = terms.pop().unwrap();
            Ok((term_into_expr(lhs), wrt))
        } else {
            Err(self)
        }
    }

    /// If this expression, after simplification, is a single integer term,
    /// return it. Callers are expected to have already called
    /// [`Expr::level_tree`] with `fold_const` set; this does not simplify
    /// on its own.
    pub fn get_intnum(&self) -> Option<&IntNum> {
        match (self.op, self.terms.as_slice()) {
            (ExprOp::Ident, [ExprTerm::Int(n)]) => Some(n),
            _ => None,
        }
    }

    /// As `get_intnum`, for a lone float term.
    pub fn get_float(&self) -> Option<f64> {
        match (self.op, self.terms.as_slice()) {
            (ExprOp::Ident, [ExprTerm::Float(f)]) => Some(*f),
            _ => None,
        }
    }

    /// As `get_intnum`, for a lone symbol term.
    pub fn get_symbol(&self) -> Option<SymbolId> {
        match (self.op, self.terms.as_slice()) {
            (ExprOp::Ident, [ExprTerm::Sym(s)]) => Some(*s),
            _ => None,
        }
    }

    /// As `get_intnum`, for a lone register term.
    pub fn get_reg(&self) -> Option<RegId> {
        match (self.op, self.terms.as_slice()) {
            (ExprOp::Ident, [ExprTerm::Reg(r)]) => Some(*r),
            _ => None,
        }
    }

    /// Replace every `Subst(i)` placeholder with `terms[i]` (cloned).
    pub fn substitute(&self, terms: &[Expr]) -> Result<Expr, AsmError> {
        let mut new_terms = Vec::with_capacity(self.terms.len());
        for t in &self.terms {
            let replaced = match t {
                ExprTerm::Subst(i) => {
                    let repl = terms.get(*i).ok_or(AsmError::OutOfRange {
                        reason: format!("substitution index {} out of range", i),
                    })?;
                    ExprTerm::Sub(Box::new(repl.clone()))
                }
                ExprTerm::Sub(e) => ExprTerm::Sub(Box::new(e.substitute(terms)?)),
                other => other.clone(),
            };
            new_terms.push(replaced);
        }
        Ok(Expr {
            op: self.op,
            terms: new_terms,
        })
    }

    /// Canonicalize the order of a commutative node's terms: registers,
    /// then integers, then floats, then symbols/sub-expressions, stable
    /// within each rank. No-op on non-commutative operators.
    pub fn order_terms(&mut self) {
        if self.op.is_commutative_assoc() {
            self.terms.sort_by_key(term_rank);
        }
        for t in &mut self.terms {
            if let ExprTerm::Sub(e) = t {
                e.order_terms();
            }
        }
    }

    /// The full normalization pass.
    ///
    /// - Expands `EQU` symbol references (depth-first, cycle-checked).
    /// - If `fold_const`, evaluates integer-only subtrees.
    /// - Flattens associative `ADD`/`MUL`/`OR`/`AND`/`XOR` chains.
    /// - Rewrites `NEG(x)` into `MUL(-1, x)`.
    /// - If `simplify_ident`, drops identity terms (`+0`, `*1`, `|0`,
    ///   `&-1`, `^0`); `simplify_reg_mul` additionally allows dropping an
    ///   identity multiplier applied to a register term (by default a
    ///   register's `*1` is preserved, since some architectures need the
    ///   explicit multiplier to pick an effective-address encoding).
    pub fn level_tree(
        &self,
        symtab: &SymbolTable,
        fold_const: bool,
        simplify_ident: bool,
        simplify_reg_mul: bool,
    ) -> Result<Expr, AsmError> {
        let mut seen = HashSet::new();
        let expanded = self.expand_equ(symtab, &mut seen)?;
        let mut leveled = expanded.level_once(fold_const, simplify_ident, simplify_reg_mul)?;
        leveled.order_terms();
        Ok(leveled)
    }

    fn expand_equ(&self, symtab: &SymbolTable, seen: &mut HashSet<SymbolId>) -> Result<Expr, AsmError> {
        let mut terms = Vec::with_capacity(self.terms.len());
        for t in &self.terms {
            let replaced = match t {
                ExprTerm::Sym(id) => {
                    if let Some(equ_expr) = symtab.equ_expr(*id) {
                        if !seen.insert(*id) {
                            return Err(AsmError::CircularEqu);
                        }
                        let expanded = equ_expr.expand_equ(symtab, seen)?;
                        seen.remove(id);
                        ExprTerm::Sub(Box::new(expanded))
                    } else {
                        ExprTerm::Sym(*id)
                    }
                }
                ExprTerm::Sub(e) => ExprTerm::Sub(Box::new(e.expand_equ(symtab, seen)?)),
                other => other.clone(),
            };
            terms.push(replaced);
        }
        Ok(Expr { op: self.op, terms })
    }

    fn level_once(
        self,
        fold_const: bool,
        simplify_ident: bool,
        simplify_reg_mul: bool,
    ) -> Result<Expr, AsmError> {
        // Post-order: level children first.
        let op = self.op;
        let mut terms = Vec::with_capacity(self.terms.len());
        for t in self.terms {
            let leveled = match t {
                ExprTerm::Sub(e) => {
                    let e = e.level_once(fold_const, simplify_ident, simplify_reg_mul)?;
                    flatten_or_wrap(op, e)
                }
                other => vec![other],
            };
            terms.extend(leveled);
        }

        // NEG(x) -> MUL(-1, x).
        let (op, terms) = if op == ExprOp::Neg {
            let mut new_terms = vec![ExprTerm::Int(IntNum::from_i64(-1))];
            new_terms.extend(terms);
            (ExprOp::Mul, new_terms)
        } else {
            (op, terms)
        };

        let mut node = Expr { op, terms };

        if fold_const {
            node = fold_constants(node)?;
        }

        if simplify_ident {
            node = drop_identities(node, simplify_reg_mul);
        }

        // IDENT with a single sub-expression term collapses into it.
        if node.op == ExprOp::Ident && node.terms.len() == 1 {
            if let ExprTerm::Sub(inner) = node.terms.into_iter().next().unwrap() {
                return Ok(*inner);
            } else {
                unreachable!("Ident term put back without reaching here");
            }
        }

        Ok(node)
    }
}

fn term_into_expr(t: ExprTerm) -> Expr {
    match t {
        ExprTerm::Sub(e) => *e,
        other => Expr::ident(other),
    }
}

/// When flattening, a child leveled to the same associative operator as
/// its parent has its terms spliced in directly instead of being kept as
/// one `Sub` term.
fn flatten_or_wrap(parent_op: ExprOp, child: Expr) -> Vec<ExprTerm> {
    if parent_op.is_commutative_assoc() && child.op == parent_op {
        child.terms
    } else {
        vec![ExprTerm::Sub(Box::new(child))]
    }
}

fn fold_constants(node: Expr) -> Result<Expr, AsmError> {
    let all_int: Option<Vec<IntNum>> = node
        .terms
        .iter()
        .map(|t| match t {
            ExprTerm::Int(n) => Some(n.clone()),
            ExprTerm::Sub(e) => e.get_intnum().cloned(),
            _ => None,
        })
        .collect();
    let ints = match all_int {
        Some(ints) if !ints.is_empty() => ints,
        _ => return Ok(node),
    };

    let folded = match node.op {
        ExprOp::Add => Some(ints.into_iter().fold(IntNum::zero(), |acc, n| acc.add(&n))),
        ExprOp::Mul => Some(
            ints.into_iter()
                .fold(IntNum::from_i64(1), |acc, n| acc.mul(&n)),
        ),
        ExprOp::Or => Some(ints.into_iter().fold(IntNum::zero(), |acc, n| acc.or(&n))),
        ExprOp::And => Some(
            ints.into_iter()
                .fold(IntNum::from_i64(-1), |acc, n| acc.and(&n)),
        ),
        ExprOp::Xor => Some(ints.into_iter().fold(IntNum::zero(), |acc, n| acc.xor(&n))),
        ExprOp::Sub if ints.len() == 2 => Some(ints[0].sub(&ints[1])),
        ExprOp::Div if ints.len() == 2 => Some(ints[0].div(&ints[1])?),
        ExprOp::SignDiv if ints.len() == 2 => Some(ints[0].div(&ints[1])?),
        ExprOp::Mod if ints.len() == 2 => Some(ints[0].rem(&ints[1])?),
        ExprOp::SignMod if ints.len() == 2 => Some(ints[0].rem(&ints[1])?),
        ExprOp::Shl if ints.len() == 2 => {
            Some(ints[0].shl(ints[1].to_i64_truncate() as u32))
        }
        ExprOp::Shr if ints.len() == 2 => {
            Some(ints[0].shr(ints[1].to_i64_truncate() as u32))
        }
        ExprOp::Not if ints.len() == 1 => Some(ints[0].not()),
        _ => None,
    };

    Ok(match folded {
        Some(n) => Expr::ident(ExprTerm::Int(n)),
        None => node,
    })
}

fn drop_identities(node: Expr, simplify_reg_mul: bool) -> Expr {
    let is_reg_term = |t: &ExprTerm| matches!(t, ExprTerm::Reg(_));
    let keep: Vec<ExprTerm> = match node.op {
        ExprOp::Add => node
            .terms
            .into_iter()
            .filter(|t| !matches!(t, ExprTerm::Int(n) if n.is_zero()))
            .collect(),
        ExprOp::Mul => node
            .terms
            .into_iter()
            .filter(|t| {
                let is_one = matches!(t, ExprTerm::Int(n) if n.cmp(&IntNum::from_i64(1)) == std::cmp::Ordering::Equal);
                !is_one
            })
            .collect(),
        ExprOp::Or | ExprOp::Xor => node
            .terms
            .into_iter()
            .filter(|t| !matches!(t, ExprTerm::Int(n) if n.is_zero()))
            .collect(),
        ExprOp::And => node
            .terms
            .into_iter()
            .filter(|t| {
                !matches!(t, ExprTerm::Int(n) if n.cmp(&IntNum::from_i64(-1)) == std::cmp::Ordering::Equal)
            })
            .collect(),
        _ => node.terms,
    };
    // When `simplify_reg_mul` is false (the default), MUL must keep at
    // least one identity multiplier next to a lone register so the
    // architecture can still see an explicit scale of 1; restore it if
    // filtering emptied the list down to just the register.
    let keep = if node.op == ExprOp::Mul && !simplify_reg_mul && keep.len() == 1 && is_reg_term(&keep[0])
    {
        vec![ExprTerm::Int(IntNum::from_i64(1)), keep.into_iter().next().unwrap()]
    } else {
        keep
    };

    let keep = if keep.is_empty() {
        match node.op {
            ExprOp::Add | ExprOp::Or | ExprOp::Xor => vec![ExprTerm::Int(IntNum::zero())],
            ExprOp::Mul => vec![ExprTerm::Int(IntNum::from_i64(1))],
            ExprOp::And => vec![ExprTerm::Int(IntNum::from_i64(-1))],
            _ => keep,
        }
    } else {
        keep
    };

    if keep.len() == 1 && node.op.is_commutative_assoc() {
        Expr {
            op: ExprOp::Ident,
            terms: keep,
        }
    } else {
        Expr {
            op: node.op,
            terms: keep,
        }
    }
}
