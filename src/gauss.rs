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

//! Gaussian elimination of equality rows
//!
//! Each successful pivot substitutes one variable away and drops its row,
//! shrinking the polytope's dimension; an eliminated variable contributes a
//! measure factor of 1. Inconsistent systems short-circuit to volume 0.
//!
//! Under QF_LIA a pivot is only taken on a unit coefficient, so the
//! substitution maps lattice points to lattice points; other equality rows
//! are passed through to the back-end.

use crate::polytope::{Polytope, Relation, Row};
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use tracing::trace;

/// Outcome of the elimination.
#[derive(Clone, Debug, PartialEq)]
pub enum GaussResult {
    /// the equality system is inconsistent: the polytope is empty
    Infeasible,
    /// the reduced polytope over the surviving variables
    Reduced(Polytope),
}

fn usable_pivot(row: &Row, lia: bool) -> Option<usize> {
    let unit = BigRational::one();
    let mut first = None;
    for (j, c) in row.coefs.iter().enumerate() {
        if c.is_zero() {
            continue;
        }
        if first.is_none() {
            first = Some(j);
        }
        if lia {
            if c.abs() == unit {
                return Some(j);
            }
        } else {
            return Some(j);
        }
    }
    if lia {
        None
    } else {
        first
    }
}

/// Merges pairs of opposite `≤` rows into `=` rows. The builder expands
/// `l = r` into the two inequalities, so this is where equalities re-enter
/// the elimination.
fn merge_opposite_rows(rows: &mut Vec<Row>) {
    let mut i = 0;
    while i < rows.len() {
        if rows[i].rel == Relation::Le {
            let mut j = i + 1;
            while j < rows.len() {
                let opposite = rows[j].rel == Relation::Le
                    && rows[j].bound == -&rows[i].bound
                    && rows[j]
                        .coefs
                        .iter()
                        .zip(rows[i].coefs.iter())
                        .all(|(a, b)| a == &(-b));
                if opposite {
                    rows.remove(j);
                    rows[i].rel = Relation::Eq;
                    break;
                }
                j += 1;
            }
        }
        i += 1;
    }
}

/// Full-pivot elimination of the `=` rows of a polytope.
pub fn eliminate_equalities(p: Polytope, lia: bool) -> GaussResult {
    let mut rows = p.rows;
    merge_opposite_rows(&mut rows);
    let mut eliminated: Vec<usize> = Vec::new();
    loop {
        // a zero equality row is either redundant or a contradiction
        let mut contradiction = false;
        rows.retain(|r| {
            if r.rel == Relation::Eq && r.is_zero() {
                if !r.zero_row_feasible() {
                    contradiction = true;
                }
                false
            } else {
                true
            }
        });
        if contradiction {
            return GaussResult::Infeasible;
        }
        let position = rows
            .iter()
            .position(|r| r.rel == Relation::Eq && usable_pivot(r, lia).is_some());
        let index = match position {
            Some(i) => i,
            None => break,
        };
        let pivot_row = rows.remove(index);
        let p_col = usable_pivot(&pivot_row, lia).expect("pivot checked above");
        let p_coef = pivot_row.coefs[p_col].clone();
        for row in rows.iter_mut() {
            if row.coefs[p_col].is_zero() {
                continue;
            }
            let factor = &row.coefs[p_col] / &p_coef;
            for (c, e) in row.coefs.iter_mut().zip(pivot_row.coefs.iter()) {
                *c -= &factor * e;
            }
            row.bound -= &factor * &pivot_row.bound;
            // exact arithmetic: the pivot column is now exactly zero
            debug_assert!(row.coefs[p_col].is_zero());
        }
        eliminated.push(p_col);
        // a zero inequality row left by the substitution decides feasibility
        let mut infeasible = false;
        rows.retain(|r| {
            if r.rel == Relation::Le && r.is_zero() {
                if !r.zero_row_feasible() {
                    infeasible = true;
                }
                false
            } else {
                true
            }
        });
        if infeasible {
            return GaussResult::Infeasible;
        }
    }
    if eliminated.is_empty() {
        return GaussResult::Reduced(Polytope { vars: p.vars, rows });
    }
    trace!(eliminated = eliminated.len(), "gauss elimination");
    let keep: Vec<usize> = (0..p.vars.len())
        .filter(|j| !eliminated.contains(j))
        .collect();
    let vars = keep.iter().map(|&j| p.vars[j]).collect();
    let rows = rows
        .into_iter()
        .map(|r| Row {
            coefs: keep.iter().map(|&j| r.coefs[j].clone()).collect(),
            bound: r.bound,
            rel: r.rel,
        })
        .collect();
    GaussResult::Reduced(Polytope { vars, rows })
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
    fn pinned_variable_is_substituted() {
        // x = 3, x + y <= 5  ->  y <= 2
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![eq(&[1, 0], 3), le(&[1, 1], 5)],
        };
        match eliminate_equalities(p, false) {
            GaussResult::Reduced(q) => {
                assert_eq!(q.vars, vec![1]);
                assert_eq!(q.rows, vec![le(&[1], 2)]);
            }
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn inconsistent_system_is_infeasible() {
        // x + y = 1 and x + y = 2
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![eq(&[1, 1], 1), eq(&[1, 1], 2)],
        };
        assert_eq!(eliminate_equalities(p, false), GaussResult::Infeasible);
    }

    #[test]
    fn substitution_can_empty_an_inequality() {
        // x = 3 and x <= 2
        let p = Polytope {
            vars: vec![0],
            rows: vec![eq(&[1], 3), le(&[1], 2)],
        };
        assert_eq!(eliminate_equalities(p, false), GaussResult::Infeasible);
    }

    #[test]
    fn chained_equalities_reduce_to_a_point() {
        // x + y = 2, x - y = 0
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![eq(&[1, 1], 2), eq(&[1, -1], 0)],
        };
        match eliminate_equalities(p, false) {
            GaussResult::Reduced(q) => {
                assert!(q.vars.is_empty());
                assert!(q.rows.is_empty());
            }
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn lia_keeps_non_unit_pivots() {
        // 2x = 1 has no integer solution; the row must survive for the
        // back-end (or the interval path) to rule it out
        let p = Polytope {
            vars: vec![0],
            rows: vec![eq(&[2], 1)],
        };
        match eliminate_equalities(p, true) {
            GaussResult::Reduced(q) => {
                assert_eq!(q.vars, vec![0]);
                assert_eq!(q.rows.len(), 1);
                assert_eq!(q.rows[0].rel, Relation::Eq);
            }
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn lia_unit_pivot_is_taken() {
        // x + 2y = 4 pivots on x over the integers
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![eq(&[1, 2], 4), le(&[1, 0], 10)],
        };
        match eliminate_equalities(p, true) {
            GaussResult::Reduced(q) => {
                assert_eq!(q.vars, vec![1]);
                // x = 4 - 2y, so x <= 10 becomes -2y <= 6
                assert_eq!(q.rows, vec![le(&[-2], 6)]);
            }
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn opposite_rows_merge_into_an_equality() {
        // x <= 3 and -x <= -3 are x = 3; with y <= x the variable goes away
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![le(&[1, 0], 3), le(&[-1, 0], -3), le(&[-1, 1], 0)],
        };
        match eliminate_equalities(p, false) {
            GaussResult::Reduced(q) => {
                assert_eq!(q.vars, vec![1]);
                assert_eq!(q.rows, vec![le(&[1], 3)]);
            }
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn rational_pivoting_is_exact() {
        // x/2 + y = 1, x - y <= 0  ->  x = 2 - 2y  ->  3y <= 2... over y
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![
                Row {
                    coefs: vec![BigRational::new(1.into(), 2.into()), rat(1)],
                    bound: rat(1),
                    rel: Relation::Eq,
                },
                le(&[1, -1], 0),
            ],
        };
        match eliminate_equalities(p, false) {
            GaussResult::Reduced(q) => {
                assert_eq!(q.vars, vec![1]);
                assert_eq!(q.rows, vec![le(&[-3], -2)]);
            }
            r => panic!("unexpected {:?}", r),
        }
    }
}
