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

//! Polytopes under preparation
//!
//! A bunch's decided atoms project into dense constraint rows; false atoms
//! contribute their polarity-flipped row. Strictness is ignored for Lebesgue
//! measure; lattice counting tightens strict integer rows by one. False
//! equalities split the bunch into its two strict half-space variants.

use crate::bunch::Bunch;
use crate::dag::TriBool;
use crate::error::Fault;
use crate::result::VolResult;
use crate::solver::{Logic, Solver};
use anyhow::Context;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

/// Row relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Relation {
    /// less than or equal
    Le,
    /// equal
    Eq,
}

/// One constraint row `coefs · x ◇ bound`, dense over the polytope's
/// variable list.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    /// coefficients, one per polytope variable
    pub coefs: Vec<BigRational>,
    /// right-hand side
    pub bound: BigRational,
    /// `≤` or `=`
    pub rel: Relation,
}

impl Row {
    /// Whether every coefficient is zero.
    pub fn is_zero(&self) -> bool {
        self.coefs.iter().all(|c| c.is_zero())
    }

    /// A zero row is either trivially satisfied or plainly infeasible.
    pub fn zero_row_feasible(&self) -> bool {
        match self.rel {
            Relation::Le => !self.bound.is_negative(),
            Relation::Eq => self.bound.is_zero(),
        }
    }
}

/// A dense polytope: constraint rows over a list of free numeric variables.
#[derive(Clone, Debug, PartialEq)]
pub struct Polytope {
    /// indices into the solver's numeric variable table
    pub vars: Vec<usize>,
    /// constraint rows, dense over `vars`
    pub rows: Vec<Row>,
}

/// Cache key: the canonicalized polytope. Variables are relabelled by their
/// dense position (the variable list is kept sorted), then rows are sorted,
/// so structurally equal sub-polytopes share a key whatever variables they
/// were built from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PolytopeKey {
    rows: Vec<(Vec<BigRational>, BigRational, Relation)>,
}

/// Per-axis bounds; `None` is an open side.
pub type Interval = (Option<BigRational>, Option<BigRational>);

/// Outcome of the bounding sweep.
#[derive(Clone, Debug, PartialEq)]
pub enum BoxStatus {
    /// the sweep proved the polytope empty
    Infeasible,
    /// per-axis outer bounds
    Bounds(Vec<Interval>),
}

impl Polytope {
    pub fn canonical_key(&self) -> PolytopeKey {
        let mut rows: Vec<(Vec<BigRational>, BigRational, Relation)> = self
            .rows
            .iter()
            .map(|r| (r.coefs.clone(), r.bound.clone(), r.rel))
            .collect();
        rows.sort();
        PolytopeKey { rows }
    }

    /// A dimension that no row can possibly bound on some side: such a
    /// component is unbounded for sure. Open box sides with bounding rows
    /// present are left to the back-end, since the sweep is approximate.
    pub fn certainly_unbounded(&self, bbox: &[Interval]) -> Option<usize> {
        for (j, (lo, hi)) in bbox.iter().enumerate() {
            if hi.is_none() {
                let boundable = self.rows.iter().any(|r| {
                    !r.coefs[j].is_zero()
                        && (r.rel == Relation::Eq || r.coefs[j].is_positive())
                });
                if !boundable {
                    return Some(self.vars[j]);
                }
            }
            if lo.is_none() {
                let boundable = self.rows.iter().any(|r| {
                    !r.coefs[j].is_zero()
                        && (r.rel == Relation::Eq || r.coefs[j].is_negative())
                });
                if !boundable {
                    return Some(self.vars[j]);
                }
            }
        }
        None
    }
}

/// Axis-aligned bounding box by interval propagation: each row tightens the
/// axes it mentions from the current bounds of the other axes, until a
/// fixpoint or a pass limit. Sound as an outer box; exact in dimension 1.
pub fn bounding_box(p: &Polytope) -> BoxStatus {
    let n = p.vars.len();
    let mut lo: Vec<Option<BigRational>> = vec![None; n];
    let mut hi: Vec<Option<BigRational>> = vec![None; n];
    for row in p.rows.iter() {
        if row.is_zero() && !row.zero_row_feasible() {
            return BoxStatus::Infeasible;
        }
    }
    let max_passes = 2 * n + 2;
    for _ in 0..max_passes {
        let mut changed = false;
        for row in p.rows.iter() {
            changed |= tighten(&row.coefs, &row.bound, &mut lo, &mut hi);
            if row.rel == Relation::Eq {
                let neg: Vec<BigRational> = row.coefs.iter().map(|c| -c).collect();
                changed |= tighten(&neg, &(-&row.bound), &mut lo, &mut hi);
            }
        }
        if !changed {
            break;
        }
    }
    for j in 0..n {
        if let (Some(l), Some(h)) = (&lo[j], &hi[j]) {
            if l > h {
                return BoxStatus::Infeasible;
            }
        }
    }
    BoxStatus::Bounds(lo.into_iter().zip(hi.into_iter()).collect())
}

/// Tightens the box with one `coefs · x ≤ bound` row. Returns whether a
/// bound moved.
fn tighten(
    coefs: &[BigRational],
    bound: &BigRational,
    lo: &mut [Option<BigRational>],
    hi: &mut [Option<BigRational>],
) -> bool {
    let mut changed = false;
    'axis: for j in 0..coefs.len() {
        if coefs[j].is_zero() {
            continue;
        }
        // c_j x_j <= bound - min(rest of the row)
        let mut rest = BigRational::zero();
        for (k, c) in coefs.iter().enumerate() {
            if k == j || c.is_zero() {
                continue;
            }
            let best = if c.is_positive() { &lo[k] } else { &hi[k] };
            match best {
                Some(b) => rest += c * b,
                None => continue 'axis,
            }
        }
        let limit = (bound - &rest) / &coefs[j];
        if coefs[j].is_positive() {
            if hi[j].as_ref().map_or(true, |h| &limit < h) {
                hi[j] = Some(limit);
                changed = true;
            }
        } else if lo[j].as_ref().map_or(true, |l| &limit > l) {
            lo[j] = Some(limit);
            changed = true;
        }
    }
    changed
}

/// Measure of a 1-dimensional polytope from its exact interval: length for
/// reals, lattice point count for integers.
pub fn interval_measure(interval: &Interval, logic: Logic) -> anyhow::Result<VolResult> {
    match interval {
        (Some(lo), Some(hi)) => {
            let value = match logic {
                Logic::QfLra => (hi - lo).to_f64().context("interval length overflow")?,
                Logic::QfLia => {
                    let count = hi.floor().to_integer() - lo.ceil().to_integer() + BigInt::one();
                    if count.is_negative() {
                        0.
                    } else {
                        count.to_f64().context("lattice count overflow")?
                    }
                }
                Logic::Unknown => anyhow::bail!("measuring an interval without a logic"),
            };
            Ok(VolResult::exact(value.max(0.)))
        }
        _ => Err(Fault::UnboundedPolytope.into()),
    }
}

impl Solver {
    /// Dense row of an atom over the full variable set. Under QF_LIA the
    /// atom is scaled to its primitive integer row first so that strict
    /// negation can tighten the bound by one.
    fn atom_dense(&self, id: usize, n: usize) -> (Vec<BigRational>, BigRational, bool) {
        let atom = self.ineq_list.atom(id);
        let mut dense = vec![BigRational::zero(); n];
        if self.is_lia() {
            let (coefs, bound) = atom.integer_form();
            for (v, c) in coefs {
                dense[v] = BigRational::from_integer(c);
            }
            (dense, BigRational::from_integer(bound), atom.is_eq)
        } else {
            for (v, c) in atom.coefs.iter() {
                dense[*v] = c.clone();
            }
            (dense, atom.bound.clone(), atom.is_eq)
        }
    }

    /// Projects a bunch into its constraint row sets. Decided-false
    /// equalities are re-split: each one doubles the variants into its `<`
    /// and `>` half-spaces, summed by the caller. Under QF_LIA the
    /// word-length box rows are appended to every variant.
    pub(crate) fn bunch_row_sets(&self, bunch: &Bunch) -> anyhow::Result<Vec<Polytope>> {
        let n = self.vnum_list.len();
        let lia = self.is_lia();
        let one = BigRational::one();
        let mut base: Vec<Row> = Vec::new();
        let mut eq_splits: Vec<(Vec<BigRational>, BigRational)> = Vec::new();
        for (i, v) in bunch.ineq_vals.iter().enumerate() {
            match v {
                TriBool::Unknown => {}
                TriBool::True => {
                    let (coefs, bound, is_eq) = self.atom_dense(i, n);
                    base.push(Row {
                        coefs,
                        bound,
                        rel: if is_eq { Relation::Eq } else { Relation::Le },
                    });
                }
                TriBool::False => {
                    let (coefs, bound, is_eq) = self.atom_dense(i, n);
                    if is_eq {
                        eq_splits.push((coefs, bound));
                    } else {
                        let coefs = coefs.iter().map(|c| -c).collect();
                        let bound = if lia { -bound - &one } else { -bound };
                        base.push(Row {
                            coefs,
                            bound,
                            rel: Relation::Le,
                        });
                    }
                }
            }
        }
        let mut variants = vec![base];
        for (coefs, bound) in eq_splits {
            let mut next = Vec::with_capacity(variants.len() * 2);
            for rows in variants {
                let mut less = rows.clone();
                less.push(Row {
                    coefs: coefs.clone(),
                    bound: if lia { &bound - &one } else { bound.clone() },
                    rel: Relation::Le,
                });
                next.push(less);
                let mut greater = rows;
                greater.push(Row {
                    coefs: coefs.iter().map(|c| -c).collect(),
                    bound: if lia { -&bound - &one } else { -&bound },
                    rel: Relation::Le,
                });
                next.push(greater);
            }
            variants = next;
        }
        if lia && self.options.wordlength > 0 {
            let half = BigInt::one() << (self.options.wordlength - 1) as usize;
            let upper = BigRational::from_integer(&half - BigInt::one());
            let lower = BigRational::from_integer(half);
            for rows in variants.iter_mut() {
                for j in 0..n {
                    let mut up = vec![BigRational::zero(); n];
                    up[j] = BigRational::one();
                    rows.push(Row {
                        coefs: up,
                        bound: upper.clone(),
                        rel: Relation::Le,
                    });
                    let mut down = vec![BigRational::zero(); n];
                    down[j] = -BigRational::one();
                    rows.push(Row {
                        coefs: down,
                        bound: lower.clone(),
                        rel: Relation::Le,
                    });
                }
            }
        }
        let vars: Vec<usize> = (0..n).collect();
        Ok(variants
            .into_iter()
            .map(|rows| Polytope {
                vars: vars.clone(),
                rows,
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rat(n: i64) -> BigRational {
        BigRational::from_integer(n.into())
    }

    fn le(coefs: &[i64], bound: i64) -> Row {
        Row {
            coefs: coefs.iter().map(|&c| rat(c)).collect(),
            bound: rat(bound),
            rel: Relation::Le,
        }
    }

    fn eq(coefs: &[i64], bound: i64) -> Row {
        Row {
            coefs: coefs.iter().map(|&c| rat(c)).collect(),
            bound: rat(bound),
            rel: Relation::Eq,
        }
    }

    #[test]
    fn unit_square_box() {
        // 0 <= x <= 1, 0 <= y <= 1
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![le(&[1, 0], 1), le(&[-1, 0], 0), le(&[0, 1], 1), le(&[0, -1], 0)],
        };
        match bounding_box(&p) {
            BoxStatus::Bounds(b) => {
                assert_eq!(b[0], (Some(rat(0)), Some(rat(1))));
                assert_eq!(b[1], (Some(rat(0)), Some(rat(1))));
            }
            s => panic!("unexpected {:?}", s),
        }
    }

    #[test]
    fn triangle_box_needs_propagation() {
        // x >= 0, y >= 0, x + y <= 1
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![le(&[-1, 0], 0), le(&[0, -1], 0), le(&[1, 1], 1)],
        };
        match bounding_box(&p) {
            BoxStatus::Bounds(b) => {
                assert_eq!(b[0], (Some(rat(0)), Some(rat(1))));
                assert_eq!(b[1], (Some(rat(0)), Some(rat(1))));
            }
            s => panic!("unexpected {:?}", s),
        }
    }

    #[test]
    fn contradictory_rows_are_infeasible() {
        // x <= 0 and x >= 2
        let p = Polytope {
            vars: vec![0],
            rows: vec![le(&[1], 0), le(&[-1], -2)],
        };
        assert_eq!(bounding_box(&p), BoxStatus::Infeasible);
    }

    #[test]
    fn zero_row_infeasibility() {
        let p = Polytope {
            vars: vec![0],
            rows: vec![le(&[0], -1)],
        };
        assert_eq!(bounding_box(&p), BoxStatus::Infeasible);
        let p = Polytope {
            vars: vec![0],
            rows: vec![eq(&[0], 1)],
        };
        assert_eq!(bounding_box(&p), BoxStatus::Infeasible);
    }

    #[test]
    fn equality_bounds_both_sides() {
        let p = Polytope {
            vars: vec![0],
            rows: vec![eq(&[2], 1)],
        };
        match bounding_box(&p) {
            BoxStatus::Bounds(b) => {
                assert_eq!(b[0], (Some(BigRational::new(1.into(), 2.into())), Some(BigRational::new(1.into(), 2.into()))));
            }
            s => panic!("unexpected {:?}", s),
        }
    }

    #[test]
    fn interval_measures() {
        let i = (Some(rat(0)), Some(rat(5)));
        assert_eq!(interval_measure(&i, Logic::QfLra).unwrap(), VolResult::exact(5.0));
        assert_eq!(interval_measure(&i, Logic::QfLia).unwrap(), VolResult::exact(6.0));
        // no lattice point in (non-integral) pinned interval
        let half = BigRational::new(1.into(), 2.into());
        let i = (Some(half.clone()), Some(half));
        assert_eq!(interval_measure(&i, Logic::QfLia).unwrap(), VolResult::exact(0.0));
        let open = (None, Some(rat(1)));
        let e = interval_measure(&open, Logic::QfLra).unwrap_err();
        assert_eq!(e.downcast_ref::<Fault>(), Some(&Fault::UnboundedPolytope));
    }

    #[test]
    fn canonical_key_ignores_row_order() {
        let a = Polytope {
            vars: vec![0, 1],
            rows: vec![le(&[1, 0], 1), le(&[0, 1], 2)],
        };
        let b = Polytope {
            vars: vec![3, 7],
            rows: vec![le(&[0, 1], 2), le(&[1, 0], 1)],
        };
        assert_eq!(a.canonical_key(), b.canonical_key());
        let c = Polytope {
            vars: vec![0, 1],
            rows: vec![le(&[1, 0], 1), le(&[0, 1], 3)],
        };
        assert_ne!(a.canonical_key(), c.canonical_key());
    }

    #[test]
    fn unbounded_detection() {
        // x >= 0 alone has no upper bounding row
        let p = Polytope {
            vars: vec![4],
            rows: vec![le(&[-1], 0)],
        };
        match bounding_box(&p) {
            BoxStatus::Bounds(b) => {
                assert_eq!(p.certainly_unbounded(&b), Some(4));
            }
            s => panic!("unexpected {:?}", s),
        }
        // a diamond has bounding rows on both sides of each axis: never
        // reported certainly unbounded even if the sweep leaves it open
        let d = Polytope {
            vars: vec![0, 1],
            rows: vec![
                le(&[1, 1], 1),
                le(&[1, -1], 1),
                le(&[-1, 1], 1),
                le(&[-1, -1], 1),
            ],
        };
        match bounding_box(&d) {
            BoxStatus::Bounds(b) => assert_eq!(d.certainly_unbounded(&b), None),
            s => panic!("unexpected {:?}", s),
        }
    }

    #[test]
    fn row_sets_flip_false_atoms() {
        let mut s = Solver::new();
        s.set_logic("QF_LRA").unwrap();
        let x = s.mk_var_decl("x").unwrap();
        let five = s.mk_const(rat(5)).unwrap();
        let atom = s.mk_le(x, five).unwrap();
        s.assert(atom.clone()).unwrap();
        let bunch = Bunch {
            ineq_vals: vec![TriBool::False],
            vbool_vals: vec![],
        };
        let sets = s.bunch_row_sets(&bunch).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].rows, vec![le(&[-1], -5)]);
    }

    #[test]
    fn lia_negation_tightens_by_one() {
        let mut s = Solver::new();
        s.set_logic("QF_LIA").unwrap();
        s.options.wordlength = 0;
        let x = s.mk_var_decl("x").unwrap();
        let five = s.mk_const(rat(5)).unwrap();
        let _atom = s.mk_le(x, five).unwrap();
        let bunch = Bunch {
            ineq_vals: vec![TriBool::False],
            vbool_vals: vec![],
        };
        let sets = s.bunch_row_sets(&bunch).unwrap();
        // not (x <= 5) over the integers is -x <= -6
        assert_eq!(sets[0].rows, vec![le(&[-1], -6)]);
    }

    #[test]
    fn false_equality_splits_into_two_variants() {
        let mut s = Solver::new();
        s.set_logic("QF_LIA").unwrap();
        s.options.wordlength = 0;
        let x = s.mk_var_decl("x").unwrap();
        let three = s.mk_const(rat(3)).unwrap();
        let _atom = s.mk_ineq(true, x, three).unwrap();
        let bunch = Bunch {
            ineq_vals: vec![TriBool::False],
            vbool_vals: vec![],
        };
        let sets = s.bunch_row_sets(&bunch).unwrap();
        assert_eq!(sets.len(), 2);
        // x <= 2 on one side, x >= 4 on the other
        assert_eq!(sets[0].rows, vec![le(&[1], 2)]);
        assert_eq!(sets[1].rows, vec![le(&[-1], -4)]);
    }

    #[test]
    fn lia_box_rows_bound_every_variable() {
        let mut s = Solver::new();
        s.set_logic("QF_LIA").unwrap();
        s.options.wordlength = 4;
        s.mk_var_decl("x").unwrap();
        let bunch = Bunch {
            ineq_vals: vec![],
            vbool_vals: vec![],
        };
        let sets = s.bunch_row_sets(&bunch).unwrap();
        // [-8, 7] for a word length of 4
        assert_eq!(sets[0].rows, vec![le(&[1], 7), le(&[-1], 8)]);
    }
}
