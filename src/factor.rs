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

//! Polytope factorization
//!
//! Connected components of the row/variable incidence graph are independent:
//! the constraint matrix is block-diagonal in that partition, the polytope
//! is a Cartesian product across components, and Lebesgue measure (and the
//! lattice count) factorizes over the product.

use crate::polytope::{Polytope, Row};
use num_traits::Zero;
use tracing::trace;

/// Union-find over variable columns, path-halving with union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> UnionFind {
        UnionFind {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// Splits a polytope into its independent components. Variables mentioned by
/// no row become 1-dimensional unconstrained components of their own.
pub fn factorize(p: Polytope) -> Vec<Polytope> {
    let n = p.vars.len();
    if n <= 1 {
        return vec![p];
    }
    let mut uf = UnionFind::new(n);
    for row in p.rows.iter() {
        let mut first = None;
        for (j, c) in row.coefs.iter().enumerate() {
            if c.is_zero() {
                continue;
            }
            match first {
                None => first = Some(j),
                Some(f) => uf.union(f, j),
            }
        }
    }
    // group columns by root, ordered by smallest member column
    let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
    for j in 0..n {
        let root = uf.find(j);
        match groups.iter_mut().find(|(r, _)| *r == root) {
            Some((_, cols)) => cols.push(j),
            None => groups.push((root, vec![j])),
        }
    }
    if groups.len() == 1 {
        return vec![p];
    }
    let mut components = Vec::with_capacity(groups.len());
    for (root, cols) in groups {
        let rows: Vec<Row> = p
            .rows
            .iter()
            .filter(|row| {
                row.coefs
                    .iter()
                    .enumerate()
                    .any(|(j, c)| !c.is_zero() && uf.find(j) == root)
            })
            .map(|row| Row {
                coefs: cols.iter().map(|&j| row.coefs[j].clone()).collect(),
                bound: row.bound.clone(),
                rel: row.rel,
            })
            .collect();
        components.push(Polytope {
            vars: cols.iter().map(|&j| p.vars[j]).collect(),
            rows,
        });
    }
    trace!(components = components.len(), "factorized polytope");
    components
}
