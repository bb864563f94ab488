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

//! Measure results with bounds

use serde::Serialize;
use std::ops::{Add, Mul};

/// A measure (volume or lattice count) together with an upper and a lower
/// bound, as returned by the volume-to-lattice back-end.
///
/// Exact back-ends produce a degenerate triple where all three components are
/// equal. Negative bound inputs are clamped to zero; the value itself must be
/// non-negative.
///
/// Addition and multiplication act componentwise, so the triple survives both
/// factorization (product of sub-polytopes) and bunching (sum of disjoint
/// regions).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct VolResult {
    /// The measure itself
    pub value: f64,
    /// Upper bound, included
    pub upper: f64,
    /// Lower bound, included
    pub lower: f64,
}

impl VolResult {
    /// Builds a triple, clamping negative bounds to zero.
    pub fn new(value: f64, upper: f64, lower: f64) -> VolResult {
        assert!(value >= 0., "negative measure {}", value);
        VolResult {
            value,
            upper: if upper < 0. { 0. } else { upper },
            lower: if lower < 0. { 0. } else { lower },
        }
    }

    /// An exact result: all three components equal.
    pub fn exact(value: f64) -> VolResult {
        VolResult::new(value, value, value)
    }

    /// The additive identity.
    pub fn zero() -> VolResult {
        VolResult::exact(0.)
    }

    /// The multiplicative identity (the measure of a 0-dimensional point).
    pub fn one() -> VolResult {
        VolResult::exact(1.)
    }

    /// Whether the triple is degenerate (an exact result).
    pub fn is_exact(&self) -> bool {
        self.value == self.upper && self.value == self.lower
    }
}

impl Add for VolResult {
    type Output = VolResult;
    fn add(self, rhs: VolResult) -> VolResult {
        VolResult::new(
            self.value + rhs.value,
            self.upper + rhs.upper,
            self.lower + rhs.lower,
        )
    }
}

impl Mul for VolResult {
    type Output = VolResult;
    fn mul(self, rhs: VolResult) -> VolResult {
        VolResult::new(
            self.value * rhs.value,
            self.upper * rhs.upper,
            self.lower * rhs.lower,
        )
    }
}

impl Mul<f64> for VolResult {
    type Output = VolResult;
    fn mul(self, rhs: f64) -> VolResult {
        VolResult::new(self.value * rhs, self.upper * rhs, self.lower * rhs)
    }
}

impl std::fmt::Display for VolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_exact() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} in [{}, {}]", self.value, self.lower, self.upper)
        }
    }
}

#[test]
fn clamping() {
    let r = VolResult::new(1., -2., -3.);
    assert_eq!(r.upper, 0.);
    assert_eq!(r.lower, 0.);
    assert_eq!(r.value, 1.);
}

#[test]
#[should_panic]
fn negative_value_rejected() {
    VolResult::new(-1., 0., 0.);
}

#[test]
fn componentwise_algebra() {
    let a = VolResult::new(2., 3., 1.);
    let b = VolResult::new(5., 6., 4.);
    assert_eq!(a + b, VolResult::new(7., 9., 5.));
    assert_eq!(a * b, VolResult::new(10., 18., 4.));
    assert_eq!(a * 2., VolResult::new(4., 6., 2.));
    assert_eq!(VolResult::exact(3.) + VolResult::zero(), VolResult::exact(3.));
    assert_eq!(VolResult::exact(3.) * VolResult::one(), VolResult::exact(3.));
}

#[test]
fn display() {
    assert_eq!(VolResult::exact(2.5).to_string(), "2.5");
    assert_eq!(VolResult::new(2., 3., 1.).to_string(), "2 in [1, 3]");
}
