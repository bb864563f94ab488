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

//! Canonical atomic inequalities and their interning table

use crate::dag::TriBool;
use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use std::collections::{BTreeMap, HashMap};

/// A canonical linear atom `Σ aᵢ·xᵢ ◇ b` with `◇ ∈ {≤, =}`.
///
/// The coefficient vector is sorted by variable index, contains no zero
/// entry, and is never empty. Canonicalization scales the atom by the
/// absolute value of its leading coefficient (a positive factor preserves
/// `≤`); equality atoms are additionally flipped so the leading coefficient
/// is positive. The atom itself is the dedupe key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LinearAtom {
    /// `(variable index, coefficient)`, sorted by variable index
    pub coefs: Vec<(usize, BigRational)>,
    /// right-hand side
    pub bound: BigRational,
    /// `=` instead of `≤`
    pub is_eq: bool,
}

impl LinearAtom {
    /// Builds a canonical atom from a coefficient map. Returns `None` when
    /// every coefficient is zero (the comparison is trivially decided and
    /// must not become an atom).
    pub fn new(
        coefs: BTreeMap<usize, BigRational>,
        bound: BigRational,
        is_eq: bool,
    ) -> Option<LinearAtom> {
        let coefs: Vec<(usize, BigRational)> =
            coefs.into_iter().filter(|(_, c)| !c.is_zero()).collect();
        if coefs.is_empty() {
            return None;
        }
        let mut atom = LinearAtom {
            coefs,
            bound,
            is_eq,
        };
        atom.canonicalize();
        Some(atom)
    }

    fn canonicalize(&mut self) {
        let leading = self.coefs[0].1.clone();
        let factor = if self.is_eq {
            // flipping the sign renames an equality but would change a
            // half-space, so only `=` atoms normalize to a positive leading
            // coefficient
            leading.recip()
        } else {
            leading.abs().recip()
        };
        for (_, c) in self.coefs.iter_mut() {
            *c *= &factor;
        }
        self.bound *= &factor;
    }

    /// Number of variables mentioned by the atom.
    pub fn arity(&self) -> usize {
        self.coefs.len()
    }

    /// The atom scaled to the smallest integer row `(coefs, bound)`, used
    /// for lattice back-ends.
    pub fn integer_form(&self) -> (Vec<(usize, BigInt)>, BigInt) {
        let mut lcm = self.bound.denom().clone();
        for (_, c) in self.coefs.iter() {
            lcm = lcm.lcm(c.denom());
        }
        let scale = BigRational::from_integer(lcm);
        let coefs: Vec<(usize, BigInt)> = self
            .coefs
            .iter()
            .map(|(v, c)| (*v, (c * &scale).to_integer()))
            .collect();
        let bound = (&self.bound * &scale).to_integer();
        let mut gcd = bound.abs();
        for (_, c) in coefs.iter() {
            gcd = gcd.gcd(c);
        }
        if gcd.is_zero() || gcd.is_one() {
            return (coefs, bound);
        }
        (
            coefs.into_iter().map(|(v, c)| (v, c / &gcd)).collect(),
            bound / &gcd,
        )
    }
}

impl std::fmt::Display for LinearAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (i, (v, c)) in self.coefs.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{}*x{}", c, v)?;
        }
        write!(f, " {} {}", if self.is_eq { "=" } else { "<=" }, self.bound)
    }
}

/// The interning table of atomic inequalities. Atoms are deduplicated modulo
/// their canonical form, named `_ieN`, and behave as fresh Boolean variables
/// at the oracle layer, so each entry also carries an evaluation state.
#[derive(Debug, Default, Clone)]
pub struct IneqTable {
    atoms: Vec<LinearAtom>,
    names: Vec<String>,
    index: HashMap<LinearAtom, usize>,
    name_index: BTreeMap<String, usize>,
    vals: Vec<TriBool>,
}

impl IneqTable {
    /// An empty table.
    pub fn new() -> IneqTable {
        IneqTable::default()
    }

    /// Number of interned atoms.
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    /// Whether no atom was interned.
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Interns a canonical atom, returning its index. An atom equal modulo
    /// the canonical key to an existing one returns the existing index.
    pub fn intern(&mut self, atom: LinearAtom) -> usize {
        if let Some(&id) = self.index.get(&atom) {
            return id;
        }
        let id = self.atoms.len();
        let name = format!("_ie{}", id);
        self.index.insert(atom.clone(), id);
        self.name_index.insert(name.clone(), id);
        self.names.push(name);
        self.atoms.push(atom);
        self.vals.push(TriBool::Unknown);
        id
    }

    /// The canonical atom at an index.
    pub fn atom(&self, id: usize) -> &LinearAtom {
        &self.atoms[id]
    }

    /// The `_ieN` name of an atom.
    pub fn name(&self, id: usize) -> &str {
        &self.names[id]
    }

    /// Index of an atom by its `_ieN` name.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    /// Current truth state of an atom.
    pub fn val(&self, id: usize) -> TriBool {
        self.vals[id]
    }

    /// Sets the truth state of an atom.
    pub fn set_val(&mut self, id: usize, val: TriBool) {
        self.vals[id] = val;
    }

    /// Resets all truth states to unknown.
    pub fn init_vals(&mut self) {
        for v in self.vals.iter_mut() {
            *v = TriBool::Unknown;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use num_traits::FromPrimitive;

    fn rat(n: i64) -> BigRational {
        BigRational::from_i64(n).unwrap()
    }

    fn atom(coefs: &[(usize, i64)], bound: i64, is_eq: bool) -> LinearAtom {
        let m: BTreeMap<usize, BigRational> =
            coefs.iter().map(|&(v, c)| (v, rat(c))).collect();
        LinearAtom::new(m, rat(bound), is_eq).expect("non trivial atom")
    }

    #[test]
    fn scaling_canonicalizes() {
        // 2x <= 10 and x <= 5 are the same atom
        assert_eq!(atom(&[(0, 2)], 10, false), atom(&[(0, 1)], 5, false));
        // -2x <= 10 scales by a positive factor only
        let a = atom(&[(0, -2)], 10, false);
        assert_eq!(a.coefs[0].1, rat(-1));
        assert_eq!(a.bound, rat(5));
        // ...so it stays distinct from x <= -5
        assert_ne!(a, atom(&[(0, 1)], -5, false));
    }

    #[test]
    fn equality_flips_to_positive_leading() {
        assert_eq!(atom(&[(0, -2), (1, 4)], 6, true), atom(&[(0, 1), (1, -2)], -3, true));
    }

    #[test]
    fn trivial_atom_is_rejected() {
        let m: BTreeMap<usize, BigRational> = vec![(0, rat(0))].into_iter().collect();
        assert!(LinearAtom::new(m, rat(1), false).is_none());
        assert!(LinearAtom::new(BTreeMap::new(), rat(1), false).is_none());
    }

    #[test]
    fn integer_form_is_primitive() {
        let m: BTreeMap<usize, BigRational> = vec![
            (0, BigRational::new(1.into(), 2.into())),
            (1, BigRational::new(1.into(), 3.into())),
        ]
        .into_iter()
        .collect();
        let a = LinearAtom::new(m, rat(1), false).unwrap();
        let (coefs, bound) = a.integer_form();
        assert_eq!(coefs, vec![(0, 3.into()), (1, 2.into())]);
        assert_eq!(bound, 6.into());
    }

    #[test]
    fn interning_dedupes_and_names() {
        let mut t = IneqTable::new();
        let a = t.intern(atom(&[(0, 1)], 5, false));
        let b = t.intern(atom(&[(0, 2)], 10, false));
        let c = t.intern(atom(&[(0, 1)], 4, false));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(t.len(), 2);
        assert_eq!(t.name(a), "_ie0");
        assert_eq!(t.name(c), "_ie1");
        assert_eq!(t.find("_ie1"), Some(c));
        assert_eq!(t.find("_ie9"), None);
    }
}
