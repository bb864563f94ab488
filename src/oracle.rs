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

//! The Boolean-satisfaction oracle behind the bunching loop
//!
//! Atoms are lifted to fresh Boolean variables and the DAG's Boolean
//! skeleton is mirrored in the oracle by a Tseitin transformation. The
//! oracle enumerates satisfying assignments; blocking clauses keep counted
//! bunches out of later answers.

use crate::bunch::Bunch;
use crate::dag::{Node, NodeKind, TriBool};
use crate::solver::Solver;
use anyhow::Context;
use num_traits::Zero;
use std::collections::HashMap;
use tracing::trace;
use varisat::{ExtendFormula, Lit, Var};

/// Outcome of an oracle query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckResult {
    /// a satisfying assignment was found
    Sat,
    /// no satisfying assignment remains
    Unsat,
}

/// A full truth assignment over all declared atoms and Boolean variables.
#[derive(Clone, Debug)]
pub struct Assignment {
    /// truth values of the atomic inequalities
    pub ineq_vals: Vec<TriBool>,
    /// truth values of the declared Boolean variables
    pub vbool_vals: Vec<TriBool>,
}

/// The external Boolean-satisfaction oracle driving the bunching loop.
pub trait Oracle {
    /// Queries satisfiability of the formula under all blocking added so far.
    fn check(&mut self) -> anyhow::Result<CheckResult>;

    /// The assignment found by the last successful [`Oracle::check`].
    fn assignment(&mut self) -> anyhow::Result<Assignment>;

    /// Blocks every assignment consistent with the bunch: future answers
    /// must flip at least one of its decided literals.
    fn block(&mut self, bunch: &Bunch) -> anyhow::Result<()>;
}

/// In-process oracle over a CNF encoding of the frozen DAG.
///
/// Variable layout: atoms first, then declared Boolean variables, then
/// Tseitin gates.
pub struct SatOracle {
    sat: varisat::Solver<'static>,
    n_ineqs: usize,
    n_vbools: usize,
    gates: HashMap<usize, Var>,
    const_true: Option<Var>,
    last_model: Option<Vec<bool>>,
}

impl SatOracle {
    /// Encodes the solver's assert conjunction. The DAG must be frozen.
    pub fn new(solver: &Solver) -> anyhow::Result<SatOracle> {
        let mut oracle = SatOracle {
            sat: varisat::Solver::new(),
            n_ineqs: solver.ineq_list.len(),
            n_vbools: solver.vbool_list.len(),
            gates: HashMap::new(),
            const_true: None,
            last_model: None,
        };
        // reserve the leaf variables so their indices are stable
        for _ in 0..(oracle.n_ineqs + oracle.n_vbools) {
            oracle.sat.new_var();
        }
        for root in solver.assert_list.iter() {
            let lit = oracle.encode(solver, root)?;
            oracle.sat.add_clause(&[lit]);
        }
        trace!(
            atoms = oracle.n_ineqs,
            bools = oracle.n_vbools,
            gates = oracle.gates.len(),
            "oracle initialized"
        );
        Ok(oracle)
    }

    fn true_lit(&mut self) -> Lit {
        let var = match self.const_true {
            Some(v) => v,
            None => {
                let v = self.sat.new_var();
                self.sat.add_clause(&[Lit::from_var(v, true)]);
                self.const_true = Some(v);
                v
            }
        };
        Lit::from_var(var, true)
    }

    fn encode(&mut self, solver: &Solver, node: &Node) -> anyhow::Result<Lit> {
        let positive = match node.kind {
            NodeKind::ConstBool => {
                let t = self.true_lit();
                if node.value.is_zero() {
                    !t
                } else {
                    t
                }
            }
            NodeKind::Ineq => Lit::from_var(Var::from_index(node.id), true),
            NodeKind::VarBool => {
                Lit::from_var(Var::from_index(self.n_ineqs + node.id), true)
            }
            NodeKind::And | NodeKind::Or => {
                if let Some(&g) = self.gates.get(&node.id) {
                    Lit::from_var(g, true)
                } else {
                    let children = solver.bop_list.children(node.id).to_vec();
                    let mut lits = Vec::with_capacity(children.len());
                    for child in children.iter() {
                        lits.push(self.encode(solver, child)?);
                    }
                    let g = self.sat.new_var();
                    let glit = Lit::from_var(g, true);
                    match solver.bop_list.kind(node.id) {
                        NodeKind::And => {
                            let mut long: Vec<Lit> = lits.iter().map(|&l| !l).collect();
                            long.push(glit);
                            self.sat.add_clause(&long);
                            for &l in lits.iter() {
                                self.sat.add_clause(&[!glit, l]);
                            }
                        }
                        NodeKind::Or => {
                            let mut long = lits.clone();
                            long.push(!glit);
                            self.sat.add_clause(&long);
                            for &l in lits.iter() {
                                self.sat.add_clause(&[!l, glit]);
                            }
                        }
                        k => unreachable!("gate for {:?}", k),
                    }
                    self.gates.insert(node.id, g);
                    glit
                }
            }
            k => anyhow::bail!("node kind {:?} in the Boolean skeleton", k),
        };
        Ok(if node.negated { !positive } else { positive })
    }
}

impl Oracle for SatOracle {
    fn check(&mut self) -> anyhow::Result<CheckResult> {
        let sat = self
            .sat
            .solve()
            .map_err(|e| anyhow::anyhow!("oracle failure: {}", e))?;
        if !sat {
            self.last_model = None;
            return Ok(CheckResult::Unsat);
        }
        let model = self
            .sat
            .model()
            .context("oracle reported satisfiable but returned no model")?;
        // variables absent from every clause may be missing: default them
        let mut vals = vec![true; self.n_ineqs + self.n_vbools];
        for lit in model {
            let index = lit.var().index();
            if index < vals.len() {
                vals[index] = lit.is_positive();
            }
        }
        self.last_model = Some(vals);
        Ok(CheckResult::Sat)
    }

    fn assignment(&mut self) -> anyhow::Result<Assignment> {
        let model = self
            .last_model
            .as_ref()
            .context("assignment requested before a successful check")?;
        Ok(Assignment {
            ineq_vals: model[..self.n_ineqs]
                .iter()
                .map(|&b| TriBool::from_bool(b))
                .collect(),
            vbool_vals: model[self.n_ineqs..]
                .iter()
                .map(|&b| TriBool::from_bool(b))
                .collect(),
        })
    }

    fn block(&mut self, bunch: &Bunch) -> anyhow::Result<()> {
        let mut clause = Vec::new();
        for (i, v) in bunch.ineq_vals.iter().enumerate() {
            if !v.is_unknown() {
                clause.push(Lit::from_var(Var::from_index(i), v.is_false()));
            }
        }
        for (j, v) in bunch.vbool_vals.iter().enumerate() {
            if !v.is_unknown() {
                clause.push(Lit::from_var(
                    Var::from_index(self.n_ineqs + j),
                    v.is_false(),
                ));
            }
        }
        // an empty clause is correct: a bunch with no decided literal covers
        // the whole space, so nothing may come after it
        self.sat.add_clause(&clause);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lra_solver() -> Solver {
        let mut s = Solver::new();
        s.set_logic("QF_LRA").unwrap();
        s
    }

    fn full_bunch(a: &Assignment) -> Bunch {
        Bunch {
            ineq_vals: a.ineq_vals.clone(),
            vbool_vals: a.vbool_vals.clone(),
        }
    }

    /// enumerate all models by blocking full assignments
    fn count_models(solver: &Solver) -> usize {
        let mut oracle = SatOracle::new(solver).unwrap();
        let mut n = 0;
        while oracle.check().unwrap() == CheckResult::Sat {
            let a = oracle.assignment().unwrap();
            oracle.block(&full_bunch(&a)).unwrap();
            n += 1;
        }
        n
    }

    #[test]
    fn disjunction_has_three_models() {
        let mut s = lra_solver();
        let a = s.mk_bool_decl("a").unwrap();
        let b = s.mk_bool_decl("b").unwrap();
        let or = s.mk_or(vec![a, b]).unwrap();
        s.assert(or).unwrap();
        s.freeze();
        assert_eq!(count_models(&s), 3);
    }

    #[test]
    fn contradiction_is_unsat() {
        let mut s = lra_solver();
        let a = s.mk_bool_decl("a").unwrap();
        s.assert(a.clone()).unwrap();
        s.assert(a.not()).unwrap();
        s.freeze();
        let mut oracle = SatOracle::new(&s).unwrap();
        assert_eq!(oracle.check().unwrap(), CheckResult::Unsat);
    }

    #[test]
    fn empty_formula_has_one_blocking_round() {
        let mut s = lra_solver();
        s.freeze();
        let mut oracle = SatOracle::new(&s).unwrap();
        assert_eq!(oracle.check().unwrap(), CheckResult::Sat);
        let a = oracle.assignment().unwrap();
        assert!(a.ineq_vals.is_empty());
        // blocking the trivial all-free bunch adds the empty clause
        oracle
            .block(&Bunch {
                ineq_vals: vec![],
                vbool_vals: vec![],
            })
            .unwrap();
        assert_eq!(oracle.check().unwrap(), CheckResult::Unsat);
    }

    #[test]
    fn atoms_behave_as_fresh_booleans() {
        let mut s = lra_solver();
        let x = s.mk_var_decl("x").unwrap();
        let one = s.mk_const(num_rational::BigRational::from_integer(1.into())).unwrap();
        let atom = s.mk_le(x, one).unwrap();
        s.assert(atom.not()).unwrap();
        s.freeze();
        let mut oracle = SatOracle::new(&s).unwrap();
        assert_eq!(oracle.check().unwrap(), CheckResult::Sat);
        let a = oracle.assignment().unwrap();
        assert_eq!(a.ineq_vals, vec![TriBool::False]);
    }

    #[test]
    fn nested_structure_with_negation() {
        let mut s = lra_solver();
        let a = s.mk_bool_decl("a").unwrap();
        let b = s.mk_bool_decl("b").unwrap();
        let c = s.mk_bool_decl("c").unwrap();
        // (a or b) and not (b and c): 8 - 4(or false: 2) - models with b,c
        let or = s.mk_or(vec![a.clone(), b.clone()]).unwrap();
        let and = s.mk_and(vec![b, c]).unwrap();
        let f = s.mk_and(vec![or, and.not()]).unwrap();
        s.assert(f).unwrap();
        s.freeze();
        // models: abc in {100, 101, 110, 010} = 4
        assert_eq!(count_models(&s), 4);
    }
}
