/**************************************************************************/
/*  This file is part of POLYCOUNT.                                       */
/*                                                                        */
/*  Copyright (C) 2025                                                    */
/*    CEA (Commissariat à l'énergie atomique et aux énergies              */
/*         alternatives)                                                  */
/*                                                                        */
/*  you can redistribute it and/or modify it under the terms of the GNU   */
/*  Lesser General Public License as published by the Free Software       */
/*  Foundation, version 2.1.                                              */
/*                                                                        */
/*  It is distributed in the hope that it will be useful,                 */
/*  but WITHOUT ANY WARRANTY; without even the implied warranty of        */
/*  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the         */
/*  GNU Lesser General Public License for more details.                   */
/*                                                                        */
/*  See the GNU Lesser General Public License version 2.1                 */
/*  for more details (enclosed in the file licenses/LGPLv2.1).            */
/*                                                                        */
/**************************************************************************/

//! Normalizing DAG constructors
//!
//! Every constructor rewrites eagerly into the canonical fragment: Boolean
//! structure is `and`/`or` over literals, numeric structure is `add` over
//! scaled variables and numeric if-then-else, and comparisons become interned
//! atomic inequalities. Negation never allocates: it flips the handle's
//! polarity or scale.

use crate::dag::{Node, NodeKind};
use crate::error::Fault;
use crate::ineq::LinearAtom;
use crate::solver::Solver;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use std::collections::BTreeMap;

/// One linear branch of a comparison under construction: the hoisted
/// if-then-else conditions, the coefficient map and the constant part.
#[derive(Clone)]
struct LinForm {
    conds: Vec<Node>,
    coefs: BTreeMap<usize, BigRational>,
    constant: BigRational,
}

impl LinForm {
    fn new() -> LinForm {
        LinForm {
            conds: Vec::new(),
            coefs: BTreeMap::new(),
            constant: BigRational::zero(),
        }
    }
}

impl Solver {
    /// The constant `true`.
    pub fn mk_true(&self) -> anyhow::Result<Node> {
        self.ensure_building()?;
        Ok(Node::true_())
    }

    /// The constant `false`.
    pub fn mk_false(&self) -> anyhow::Result<Node> {
        self.ensure_building()?;
        Ok(Node::false_())
    }

    /// A numeric constant.
    pub fn mk_const(&self, value: BigRational) -> anyhow::Result<Node> {
        self.ensure_building()?;
        Ok(Node::const_num(value))
    }

    /// Declares a Boolean variable.
    pub fn mk_bool_decl(&mut self, name: &str) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if self.vnum_list.find(name).is_some() {
            return Err(Fault::MultipleDecl(name.to_owned()).into());
        }
        match self.vbool_list.push(name) {
            Some(id) => Ok(Node::var_bool(id)),
            None => Err(Fault::MultipleDecl(name.to_owned()).into()),
        }
    }

    /// Declares a numeric variable.
    pub fn mk_var_decl(&mut self, name: &str) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if self.vbool_list.find(name).is_some() {
            return Err(Fault::MultipleDecl(name.to_owned()).into());
        }
        match self.vnum_list.push(name) {
            Some(id) => Ok(Node::var_num(id)),
            None => Err(Fault::MultipleDecl(name.to_owned()).into()),
        }
    }

    /// Logical negation. Flips the handle's polarity; like the arithmetic
    /// negation, no sort check is performed here.
    pub fn mk_not(&self, param: Node) -> anyhow::Result<Node> {
        self.ensure_building()?;
        Ok(param.not())
    }

    /// Conjunction. Nested conjunctions of positive polarity are flattened
    /// and constants folded.
    pub fn mk_and(&mut self, params: Vec<Node>) -> anyhow::Result<Node> {
        self.ensure_building()?;
        let mut flat = Vec::new();
        for p in params {
            if !p.is_bool() {
                return Err(Fault::ParamNotBool("and".to_owned()).into());
            }
            if p.is_const_bool() {
                if !p.bool_value() {
                    return Ok(Node::false_());
                }
            } else if p.kind == NodeKind::And && !p.negated {
                flat.extend_from_slice(self.bop_list.children(p.id));
            } else {
                flat.push(p);
            }
        }
        match flat.len() {
            0 => Ok(Node::true_()),
            1 => Ok(flat.pop().expect("just checked length")),
            _ => {
                let id = self.bop_list.push(NodeKind::And, flat);
                Ok(Node::op(NodeKind::And, id))
            }
        }
    }

    /// Disjunction, dual of [`Solver::mk_and`].
    pub fn mk_or(&mut self, params: Vec<Node>) -> anyhow::Result<Node> {
        self.ensure_building()?;
        let mut flat = Vec::new();
        for p in params {
            if !p.is_bool() {
                return Err(Fault::ParamNotBool("or".to_owned()).into());
            }
            if p.is_const_bool() {
                if p.bool_value() {
                    return Ok(Node::true_());
                }
            } else if p.kind == NodeKind::Or && !p.negated {
                flat.extend_from_slice(self.bop_list.children(p.id));
            } else {
                flat.push(p);
            }
        }
        match flat.len() {
            0 => Ok(Node::false_()),
            1 => Ok(flat.pop().expect("just checked length")),
            _ => {
                let id = self.bop_list.push(NodeKind::Or, flat);
                Ok(Node::op(NodeKind::Or, id))
            }
        }
    }

    /// Right-associative implication: `(=> a b c)` is `a → (b → c)`.
    pub fn mk_imply(&mut self, mut params: Vec<Node>) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if params.len() < 2 {
            return Err(Fault::ParamMismatch("=>".to_owned()).into());
        }
        let conclusion = params.pop().expect("at least two parameters");
        let mut clause: Vec<Node> = params.into_iter().map(|p| p.not()).collect();
        clause.push(conclusion);
        self.mk_or(clause)
    }

    /// Exclusive or, folded pairwise: `a ⊕ b = (a ∨ b) ∧ ¬(a ∧ b)`.
    pub fn mk_xor(&mut self, params: Vec<Node>) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if params.len() < 2 {
            return Err(Fault::ParamMismatch("xor".to_owned()).into());
        }
        let mut it = params.into_iter();
        let mut acc = it.next().expect("at least two parameters");
        for p in it {
            let both = self.mk_and(vec![acc.clone(), p.clone()])?;
            let either = self.mk_or(vec![acc, p])?;
            acc = self.mk_and(vec![either, both.not()])?;
        }
        Ok(acc)
    }

    /// Chained equality: adjacent pairs are equated and conjoined.
    pub fn mk_eq(&mut self, params: Vec<Node>) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if params.len() < 2 {
            return Err(Fault::ParamMismatch("=".to_owned()).into());
        }
        let mut pairs = Vec::new();
        for w in params.windows(2) {
            pairs.push(self.mk_eq2(w[0].clone(), w[1].clone())?);
        }
        self.mk_and(pairs)
    }

    fn mk_eq2(&mut self, l: Node, r: Node) -> anyhow::Result<Node> {
        if l.is_bool() && r.is_bool() {
            // iff, as a conjunction of implications
            let fwd = self.mk_or(vec![l.not(), r.clone()])?;
            let bwd = self.mk_or(vec![r.not(), l])?;
            self.mk_and(vec![fwd, bwd])
        } else if l.is_num() && r.is_num() {
            // l = r as (l <= r) and (r <= l); the two atoms are shared with
            // any inequality already interned
            let le = self.mk_ineq(false, l.clone(), r.clone())?;
            let ge = self.mk_ineq(false, r, l)?;
            self.mk_and(vec![le, ge])
        } else {
            Err(Fault::ParamNotSame("=".to_owned()).into())
        }
    }

    /// Pairwise disequality.
    pub fn mk_distinct(&mut self, params: Vec<Node>) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if params.len() < 2 {
            return Err(Fault::ParamMismatch("distinct".to_owned()).into());
        }
        let mut pairs = Vec::new();
        for i in 0..params.len() {
            for j in (i + 1)..params.len() {
                let eq = self.mk_eq2(params[i].clone(), params[j].clone())?;
                pairs.push(eq.not());
            }
        }
        self.mk_and(pairs)
    }

    /// If-then-else. Boolean sort expands to `(c ∧ t) ∨ (¬c ∧ e)`; numeric
    /// sort allocates an `IteNum` operator, later hoisted out of comparisons.
    pub fn mk_ite(&mut self, c: Node, t: Node, e: Node) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if !c.is_bool() {
            return Err(Fault::ParamNotBool("ite".to_owned()).into());
        }
        if t.is_bool() && e.is_bool() {
            let then_part = self.mk_and(vec![c.clone(), t])?;
            let else_part = self.mk_and(vec![c.not(), e])?;
            self.mk_or(vec![then_part, else_part])
        } else if t.is_num() && e.is_num() {
            if c.is_const_bool() {
                return Ok(if c.bool_value() { t } else { e });
            }
            let id = self.nop_list.push(NodeKind::IteNum, vec![c, t, e]);
            Ok(Node::op(NodeKind::IteNum, id))
        } else {
            Err(Fault::ParamNotSame("ite".to_owned()).into())
        }
    }

    /// Addition. Nested additions are flattened and the constant part is
    /// coalesced into the node's offset.
    pub fn mk_add(&mut self, params: Vec<Node>) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if params.is_empty() {
            return Err(Fault::ParamMismatch("+".to_owned()).into());
        }
        let mut offset = BigRational::zero();
        let mut terms = Vec::new();
        for p in params {
            if !p.is_num() {
                return Err(Fault::ParamNotNum("+".to_owned()).into());
            }
            if p.is_const_num() {
                offset += p.num_value();
            } else if p.kind == NodeKind::Add {
                // a nested sum denotes scale * (children + offset)
                offset += &p.scale * &p.value;
                let children = self.nop_list.children(p.id).to_vec();
                for child in children {
                    terms.push(child.scaled(&p.scale));
                }
            } else {
                terms.push(p);
            }
        }
        if terms.is_empty() {
            return Ok(Node::const_num(offset));
        }
        if terms.len() == 1 && offset.is_zero() {
            return Ok(terms.pop().expect("just checked length"));
        }
        let id = self.nop_list.push(NodeKind::Add, terms);
        Ok(Node::add_op(id, offset))
    }

    /// Arithmetic negation: flips the handle's scale, no allocation.
    pub fn mk_neg(&self, param: Node) -> anyhow::Result<Node> {
        self.ensure_building()?;
        Ok(param.scaled(&-BigRational::one()))
    }

    /// Subtraction: `(- a b c)` is `a - b - c`; unary minus negates.
    pub fn mk_minus(&mut self, params: Vec<Node>) -> anyhow::Result<Node> {
        self.ensure_building()?;
        match params.len() {
            0 => Err(Fault::ParamMismatch("-".to_owned()).into()),
            1 => self.mk_neg(params.into_iter().next().expect("one parameter")),
            _ => {
                let mut it = params.into_iter();
                let mut sum = vec![it.next().expect("at least two parameters")];
                for p in it {
                    sum.push(self.mk_neg(p)?);
                }
                self.mk_add(sum)
            }
        }
    }

    /// Multiplication. At most one factor may be non-constant after folding;
    /// the constant product becomes a scale update with no allocation.
    pub fn mk_mul(&mut self, params: Vec<Node>) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if params.is_empty() {
            return Err(Fault::ParamMismatch("*".to_owned()).into());
        }
        let mut constant = BigRational::one();
        let mut var_part: Option<Node> = None;
        for p in params {
            if !p.is_num() {
                return Err(Fault::ParamNotNum("*".to_owned()).into());
            }
            if p.is_const_num() {
                constant *= p.num_value();
            } else if var_part.is_none() {
                var_part = Some(p);
            } else {
                return Err(Fault::Nonlinear("*".to_owned()).into());
            }
        }
        Ok(match var_part {
            None => Node::const_num(constant),
            Some(v) => v.scaled(&constant),
        })
    }

    /// Division by a constant. A variable divisor is nonlinear and a zero
    /// divisor is a fault; otherwise identical to scaling by the reciprocal.
    pub fn mk_div(&mut self, l: Node, r: Node) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if !l.is_num() || !r.is_num() {
            return Err(Fault::ParamNotNum("/".to_owned()).into());
        }
        if !r.is_const_num() {
            return Err(Fault::Nonlinear("/".to_owned()).into());
        }
        let d = r.num_value();
        if d.is_zero() {
            return Err(Fault::ZeroDivisor.into());
        }
        Ok(l.scaled(&d.recip()))
    }

    /// `l ≤ r`.
    pub fn mk_le(&mut self, l: Node, r: Node) -> anyhow::Result<Node> {
        self.mk_ineq(false, l, r)
    }

    /// `l < r`, as `¬(r ≤ l)`.
    pub fn mk_lt(&mut self, l: Node, r: Node) -> anyhow::Result<Node> {
        Ok(self.mk_ineq(false, r, l)?.not())
    }

    /// `l ≥ r`, as `r ≤ l`.
    pub fn mk_ge(&mut self, l: Node, r: Node) -> anyhow::Result<Node> {
        self.mk_ineq(false, r, l)
    }

    /// `l > r`, as `¬(l ≤ r)`.
    pub fn mk_gt(&mut self, l: Node, r: Node) -> anyhow::Result<Node> {
        Ok(self.mk_ineq(false, l, r)?.not())
    }

    /// Builds the atom `l - r ◇ 0`, rearranged to `Σ aᵢxᵢ ◇ c` and interned.
    /// Numeric if-then-else subterms are hoisted: each branch combination
    /// yields its own atom guarded by the branch conditions.
    pub fn mk_ineq(&mut self, is_eq: bool, l: Node, r: Node) -> anyhow::Result<Node> {
        self.ensure_building()?;
        let op = if is_eq { "=" } else { "<=" };
        if !l.is_num() || !r.is_num() {
            return Err(Fault::ParamNotNum(op.to_owned()).into());
        }
        let forms = vec![LinForm::new()];
        let forms = self.linearize(&l, &BigRational::one(), forms)?;
        let forms = self.linearize(&r, &-BigRational::one(), forms)?;
        let mut branches = Vec::new();
        for form in forms {
            let bound = -form.constant;
            let atom_node = match LinearAtom::new(form.coefs, bound.clone(), is_eq) {
                // all coefficients vanished: the comparison is decided
                None => Node::const_bool(if is_eq {
                    bound.is_zero()
                } else {
                    !bound.is_negative()
                }),
                Some(atom) => Node::ineq(self.ineq_list.intern(atom)),
            };
            if form.conds.is_empty() {
                branches.push(atom_node);
            } else {
                let mut guarded = form.conds;
                guarded.push(atom_node);
                branches.push(self.mk_and(guarded)?);
            }
        }
        if branches.len() == 1 {
            Ok(branches.pop().expect("just checked length"))
        } else {
            self.mk_or(branches)
        }
    }

    /// Re-interns the atom behind an inequality handle; the canonical key
    /// guarantees the original index comes back.
    pub fn remk_ineq(&mut self, root: &Node) -> anyhow::Result<Node> {
        self.ensure_building()?;
        if !root.is_ineq() {
            return Err(Fault::ParamMismatch("remk_ineq".to_owned()).into());
        }
        let atom = self.ineq_list.atom(root.id).clone();
        let id = self.ineq_list.intern(atom);
        let mut node = Node::ineq(id);
        node.negated = root.negated;
        Ok(node)
    }

    /// Accumulates `mult * node` into every pending linear form, forking the
    /// form list at numeric if-then-else nodes.
    fn linearize(
        &self,
        node: &Node,
        mult: &BigRational,
        mut forms: Vec<LinForm>,
    ) -> anyhow::Result<Vec<LinForm>> {
        match node.kind {
            NodeKind::ConstNum => {
                let c = mult * &node.value;
                for form in forms.iter_mut() {
                    form.constant += &c;
                }
                Ok(forms)
            }
            NodeKind::VarNum => {
                let c = mult * &node.scale;
                for form in forms.iter_mut() {
                    let entry = form
                        .coefs
                        .entry(node.id)
                        .or_insert_with(BigRational::zero);
                    *entry += &c;
                }
                Ok(forms)
            }
            NodeKind::Add => {
                let m = mult * &node.scale;
                let c = &m * &node.value;
                for form in forms.iter_mut() {
                    form.constant += &c;
                }
                for child in self.nop_list.children(node.id) {
                    forms = self.linearize(child, &m, forms)?;
                }
                Ok(forms)
            }
            NodeKind::IteNum => {
                let m = mult * &node.scale;
                let children = self.nop_list.children(node.id);
                let cond = children[0].clone();
                let then_child = children[1].clone();
                let else_child = children[2].clone();
                let mut out = Vec::new();
                for form in forms {
                    let mut then_form = form.clone();
                    then_form.conds.push(cond.clone());
                    out.extend(self.linearize(&then_child, &m, vec![then_form])?);
                    let mut else_form = form;
                    else_form.conds.push(cond.not());
                    out.extend(self.linearize(&else_child, &m, vec![else_form])?);
                }
                Ok(out)
            }
            _ => Err(Fault::ParamNotNum("<=".to_owned()).into()),
        }
    }
}
