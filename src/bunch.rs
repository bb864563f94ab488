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

//! The bunching loop
//!
//! Each oracle assignment is shrunk to a *bunch*: the decided literals that
//! force the formula true, every other literal being free. The bunch is
//! blocked in the oracle and handed to the polytope pipeline; the loop ends
//! when the oracle answers unsatisfiable.

use crate::dag::{Node, NodeKind, TriBool};
use crate::oracle::{Assignment, CheckResult, Oracle, SatOracle};
use crate::solver::Solver;
use fixedbitset::FixedBitSet;
use num_traits::Zero;
use tracing::{trace, trace_span};

/// One disjoint region of the assignment space: the truth values of all
/// atoms and Boolean variables, `Unknown` marking the free ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bunch {
    /// truth values of the atomic inequalities
    pub ineq_vals: Vec<TriBool>,
    /// truth values of the declared Boolean variables
    pub vbool_vals: Vec<TriBool>,
}

impl Bunch {
    /// Number of decided literals.
    pub fn decided(&self) -> usize {
        self.ineq_vals
            .iter()
            .chain(self.vbool_vals.iter())
            .filter(|v| !v.is_unknown())
            .count()
    }

    /// Number of free Boolean variables.
    pub fn free_bools(&self) -> usize {
        self.vbool_vals.iter().filter(|v| v.is_unknown()).count()
    }

    /// The bunch multiplier: each free Boolean variable doubles the region.
    /// Free atoms are handled geometrically, not here.
    pub fn multiplier(&self) -> f64 {
        2f64.powi(self.free_bools() as i32)
    }

    /// Whether the two bunches disagree on a literal decided in both, which
    /// makes them disjoint.
    pub fn conflicts_with(&self, other: &Bunch) -> bool {
        let conflict = |a: &[TriBool], b: &[TriBool]| {
            a.iter()
                .zip(b.iter())
                .any(|(x, y)| !x.is_unknown() && !y.is_unknown() && x != y)
        };
        conflict(&self.ineq_vals, &other.ineq_vals)
            || conflict(&self.vbool_vals, &other.vbool_vals)
    }
}

impl Solver {
    /// Runs the bunching loop to completion: freezes the DAG, initializes
    /// the in-process oracle with the configured word length, and
    /// accumulates disjoint bunches until the oracle answers UNSAT.
    ///
    /// Returns satisfiability; the bunch pool is left in `bunch_list`.
    pub fn solve(&mut self) -> anyhow::Result<bool> {
        self.freeze();
        self.dump_ast();
        if self.is_lia() {
            // finite-range approximation of the integers, surfaced to the
            // caller through the options echoed in the result
            tracing::info!(
                wordlength = self.options.wordlength,
                "integer variables are bounded to the configured word length"
            );
        }
        let mut oracle = SatOracle::new(self)?;
        self.solve_with(&mut oracle)
    }

    /// The bunching loop over an arbitrary oracle.
    pub fn solve_with(&mut self, oracle: &mut dyn Oracle) -> anyhow::Result<bool> {
        let span = trace_span!("bunching", timing = true).entered();
        self.bunch_list.clear();
        loop {
            match oracle.check()? {
                CheckResult::Unsat => break,
                CheckResult::Sat => {
                    let assignment = oracle.assignment()?;
                    let bunch = self.shrink_to_bunch(&assignment)?;
                    oracle.block(&bunch)?;
                    trace!(
                        decided = bunch.decided(),
                        free_bools = bunch.free_bools(),
                        model = %self.model_to_string(&bunch),
                        "accumulated bunch"
                    );
                    self.bunch_list.push(bunch);
                }
            }
        }
        drop(span);
        trace!(bunches = self.bunch_list.len(), stats = true);
        Ok(!self.bunch_list.is_empty())
    }

    /// Computes the flip list of an assignment and returns the shrunk bunch:
    /// literals outside the decisive set of the assert conjunction are free.
    pub(crate) fn shrink_to_bunch(&mut self, a: &Assignment) -> anyhow::Result<Bunch> {
        for (i, &v) in a.ineq_vals.iter().enumerate() {
            self.ineq_list.set_val(i, v);
        }
        for (j, &v) in a.vbool_vals.iter().enumerate() {
            self.vbool_list.set_val(j, v);
        }
        self.eval_bops();

        let mut ineq_dec = FixedBitSet::with_capacity(self.ineq_list.len());
        let mut vbool_dec = FixedBitSet::with_capacity(self.vbool_list.len());
        if self.options.enable_bunch {
            for root in self.assert_list.iter() {
                self.mark_decisive(root, &mut ineq_dec, &mut vbool_dec);
            }
        } else {
            ineq_dec.set_range(.., true);
            vbool_dec.set_range(.., true);
        }

        let mut bunch = Bunch {
            ineq_vals: a
                .ineq_vals
                .iter()
                .enumerate()
                .map(|(i, &v)| if ineq_dec.contains(i) { v } else { TriBool::Unknown })
                .collect(),
            vbool_vals: a
                .vbool_vals
                .iter()
                .enumerate()
                .map(|(j, &v)| if vbool_dec.contains(j) { v } else { TriBool::Unknown })
                .collect(),
        };
        self.separate_from_previous(&mut bunch, a)?;
        Ok(bunch)
    }

    /// The shrunk cube may still intersect an earlier bunch. The assignment
    /// satisfies every earlier blocking clause, so it conflicts each earlier
    /// bunch on some literal; decide that literal in the new bunch too.
    fn separate_from_previous(
        &self,
        bunch: &mut Bunch,
        a: &Assignment,
    ) -> anyhow::Result<()> {
        for previous in self.bunch_list.iter() {
            if bunch.conflicts_with(previous) {
                continue;
            }
            let mut fixed = false;
            for (i, v) in previous.ineq_vals.iter().enumerate() {
                if !v.is_unknown() && a.ineq_vals[i] != *v {
                    bunch.ineq_vals[i] = a.ineq_vals[i];
                    fixed = true;
                    break;
                }
            }
            if !fixed {
                for (j, v) in previous.vbool_vals.iter().enumerate() {
                    if !v.is_unknown() && a.vbool_vals[j] != *v {
                        bunch.vbool_vals[j] = a.vbool_vals[j];
                        fixed = true;
                        break;
                    }
                }
            }
            anyhow::ensure!(
                fixed,
                "oracle returned an assignment inside an already counted bunch"
            );
        }
        Ok(())
    }

    /// Value of a Boolean-sorted handle under the current evaluation state.
    pub(crate) fn node_val(&self, node: &Node) -> TriBool {
        let raw = match node.kind {
            NodeKind::ConstBool => TriBool::from_bool(!node.value.is_zero()),
            NodeKind::VarBool => self.vbool_list.val(node.id),
            NodeKind::Ineq => self.ineq_list.val(node.id),
            NodeKind::And | NodeKind::Or => self.bop_list.val(node.id),
            _ => TriBool::Unknown,
        };
        raw.with_polarity(node.negated)
    }

    /// Evaluates all Boolean operators bottom-up. Children always precede
    /// their parent in the append-only table, so a single pass in index
    /// order suffices.
    fn eval_bops(&mut self) {
        for id in 0..self.bop_list.len() {
            let kind = self.bop_list.kind(id);
            let mut value = match kind {
                NodeKind::And => TriBool::True,
                NodeKind::Or => TriBool::False,
                k => unreachable!("boolean operator {:?}", k),
            };
            for child in self.bop_list.children(id) {
                let v = self.node_val(child);
                value = match (kind, v) {
                    (NodeKind::And, TriBool::False) => TriBool::False,
                    (NodeKind::Or, TriBool::True) => TriBool::True,
                    (_, TriBool::Unknown) if !value.is_unknown() => TriBool::Unknown,
                    _ => value,
                };
                if (kind == NodeKind::And && value.is_false())
                    || (kind == NodeKind::Or && value.is_true())
                {
                    break;
                }
            }
            self.bop_list.set_val(id, value);
        }
    }

    /// Marks the decisive literal subset of a subtree. A conjunction that is
    /// false (or a disjunction that is true) is decided by a single witness
    /// child; otherwise every child is decisive.
    fn mark_decisive(
        &self,
        node: &Node,
        ineq_dec: &mut FixedBitSet,
        vbool_dec: &mut FixedBitSet,
    ) {
        match node.kind {
            NodeKind::ConstBool => {}
            NodeKind::VarBool => vbool_dec.insert(node.id),
            NodeKind::Ineq => ineq_dec.insert(node.id),
            NodeKind::And | NodeKind::Or => {
                let kind = self.bop_list.kind(node.id);
                let raw = self.bop_list.val(node.id);
                let witness = match (kind, raw) {
                    (NodeKind::And, TriBool::False) => Some(TriBool::False),
                    (NodeKind::Or, TriBool::True) => Some(TriBool::True),
                    _ => None,
                };
                match witness {
                    Some(target) => {
                        for child in self.bop_list.children(node.id) {
                            if self.node_val(child) == target {
                                self.mark_decisive(child, ineq_dec, vbool_dec);
                                return;
                            }
                        }
                        unreachable!("operator value without a witness child");
                    }
                    None => {
                        for child in self.bop_list.children(node.id) {
                            self.mark_decisive(child, ineq_dec, vbool_dec);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parsed(input: &str) -> Solver {
        let mut s = Solver::new();
        s.parse_smtlib2(input.as_bytes(), "<test>").expect("parsing");
        s
    }

    fn assert_pairwise_disjoint(s: &Solver) {
        for (i, a) in s.bunch_list.iter().enumerate() {
            for b in s.bunch_list.iter().skip(i + 1) {
                assert!(
                    a.conflicts_with(b),
                    "bunches are not disjoint: {:?} and {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn generalized_cubes_stay_disjoint() {
        // the classic overlap: a or b generalizes the first model to a cube
        // that the second model's cube must be separated from
        let mut s = parsed(
            "(set-logic QF_LRA)
             (declare-const a Bool)
             (declare-const b Bool)
             (assert (or a b))",
        );
        assert!(s.solve().unwrap());
        assert_pairwise_disjoint(&s);
        // the cubes tile the 3 models of (or a b)
        let covered: f64 = s.bunch_list.iter().map(|b| b.multiplier()).sum();
        assert_eq!(covered, 3.0);
    }

    #[test]
    fn unsat_formula_yields_no_bunch() {
        let mut s = parsed(
            "(set-logic QF_LRA)
             (declare-const a Bool)
             (assert a)
             (assert (not a))",
        );
        assert!(!s.solve().unwrap());
        assert!(s.bunch_list.is_empty());
    }

    #[test]
    fn empty_assert_list_gives_one_trivial_bunch() {
        let mut s = parsed("(set-logic QF_LRA)(declare-const a Bool)");
        assert!(s.solve().unwrap());
        assert_eq!(s.bunch_list.len(), 1);
        assert_eq!(s.bunch_list[0].decided(), 0);
        assert_eq!(s.bunch_list[0].multiplier(), 2.0);
    }

    #[test]
    fn decided_conjunction_has_no_free_literal() {
        let mut s = parsed(
            "(set-logic QF_LRA)
             (declare-const a Bool)
             (declare-const b Bool)
             (assert (and a b))",
        );
        assert!(s.solve().unwrap());
        assert_eq!(s.bunch_list.len(), 1);
        assert_eq!(s.bunch_list[0].decided(), 2);
        assert_eq!(s.bunch_list[0].multiplier(), 1.0);
    }

    #[test]
    fn bunching_disabled_decides_everything() {
        let mut s = parsed(
            "(set-logic QF_LRA)
             (declare-const a Bool)
             (declare-const b Bool)
             (assert (or a b))",
        );
        s.options.enable_bunch = false;
        assert!(s.solve().unwrap());
        assert_eq!(s.bunch_list.len(), 3);
        for b in s.bunch_list.iter() {
            assert_eq!(b.decided(), 2);
        }
        assert_pairwise_disjoint(&s);
    }

    #[test]
    fn termination_is_bounded_by_assignment_space() {
        let mut s = parsed(
            "(set-logic QF_LRA)
             (declare-const a Bool)
             (declare-const b Bool)
             (declare-const c Bool)
             (assert (or a b c))",
        );
        assert!(s.solve().unwrap());
        assert!(s.bunch_list.len() <= 8);
        let covered: f64 = s.bunch_list.iter().map(|b| b.multiplier()).sum();
        assert_eq!(covered, 7.0);
        assert_pairwise_disjoint(&s);
    }

    #[test]
    fn atoms_participate_in_bunches() {
        let mut s = parsed(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (assert (or (<= x 1) (<= x 4)))",
        );
        assert!(s.solve().unwrap());
        assert_pairwise_disjoint(&s);
        // two atoms, each bunch decides at least one
        for b in s.bunch_list.iter() {
            assert!(b.decided() >= 1);
        }
    }

    #[test]
    fn xor_evaluation_and_flip_list() {
        let mut s = parsed(
            "(set-logic QF_LRA)
             (declare-const a Bool)
             (declare-const b Bool)
             (assert (xor a b))",
        );
        assert!(s.solve().unwrap());
        let covered: f64 = s.bunch_list.iter().map(|b| b.multiplier()).sum();
        assert_eq!(covered, 2.0);
        assert_pairwise_disjoint(&s);
    }
}
