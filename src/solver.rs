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

//! The solver: DAG tables, configuration, statistics and the volume routine

use crate::backend::{Backend, BackendCtx};
use crate::bunch::Bunch;
use crate::dag::{Node, NodeKind, OpTable, TriBool, VarTable};
use crate::error::Fault;
use crate::factor;
use crate::gauss::{self, GaussResult};
use crate::ineq::IneqTable;
use crate::polytope::{self, BoxStatus, Polytope, PolytopeKey};
use crate::result::VolResult;
use anyhow::Context;
use num_rational::BigRational;
use num_traits::{One, Zero};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, trace, trace_span};

/// The declared logic of the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Logic {
    /// no set-logic command was seen yet
    Unknown,
    /// quantifier-free linear integer arithmetic
    QfLia,
    /// quantifier-free linear real arithmetic
    QfLra,
}

/// Feature toggles and paths for the volume routine.
#[derive(Clone, Debug)]
pub struct Options {
    /// generalize oracle assignments into bunches via flip lists
    pub enable_bunch: bool,
    /// factorize polytopes into independent components
    pub enable_fact: bool,
    /// eliminate equality rows by Gaussian elimination
    pub enable_ge: bool,
    /// bit width bounding integer variables under QF_LIA
    pub wordlength: u32,
    /// directory containing the back-end executables
    pub tool_dir: PathBuf,
    /// directory for temporary polytope files
    pub result_dir: PathBuf,
    /// PolyVest relative error
    pub epsilon: f64,
    /// PolyVest failure probability
    pub delta: f64,
    /// PolyVest sampling constant, forwarded verbatim
    pub coef: f64,
    /// per-call timeout for back-end executables
    pub backend_timeout: Option<std::time::Duration>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            enable_bunch: true,
            enable_fact: true,
            enable_ge: true,
            wordlength: 8,
            tool_dir: PathBuf::from("."),
            result_dir: std::env::temp_dir(),
            epsilon: 0.1,
            delta: 0.05,
            coef: 1.0,
            backend_timeout: None,
        }
    }
}

/// Counters of the volume routine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// back-end invocations (cache misses)
    pub vol_calls: u64,
    /// cache hits
    pub vol_reuses: u64,
    /// sum of sub-polytope dimensions
    pub total_dims: u64,
    /// largest sub-polytope dimension
    pub max_dims: u64,
    /// bunches that factorized non-trivially
    pub fact_bunches: u64,
}

/// The solver. Owns the formula DAG, the atom table, the bunch pool, the
/// volume cache and the statistics counters.
///
/// Lifecycle: *building* (parser callbacks construct the DAG) then *solving*
/// (the DAG is frozen; the oracle enumerates bunches; the volume routine
/// measures them). Construction attempts after the freeze fault with
/// [`Fault::SolvingInitialized`].
pub struct Solver {
    /// roots of the asserted conjunction
    pub assert_list: Vec<Node>,
    /// Boolean operator nodes
    pub bop_list: OpTable,
    /// numeric operator nodes
    pub nop_list: OpTable,
    /// declared Boolean variables
    pub vbool_list: VarTable,
    /// declared numeric variables
    pub vnum_list: VarTable,
    /// interned atomic inequalities
    pub ineq_list: IneqTable,
    /// disjoint regions accumulated by the solve loop
    pub bunch_list: Vec<Bunch>,
    /// feature toggles and paths
    pub options: Options,
    /// counters
    pub stats: Stats,
    pub(crate) logic: Logic,
    pub(crate) solving_initialized: bool,
    vol_map: HashMap<PolytopeKey, VolResult>,
}

impl Solver {
    /// A solver with default options.
    pub fn new() -> Solver {
        Solver::with_options(Options::default())
    }

    /// A solver with the given options.
    pub fn with_options(options: Options) -> Solver {
        Solver {
            assert_list: Vec::new(),
            bop_list: OpTable::new(),
            nop_list: OpTable::new(),
            vbool_list: VarTable::new(),
            vnum_list: VarTable::new(),
            ineq_list: IneqTable::new(),
            bunch_list: Vec::new(),
            options,
            stats: Stats::default(),
            logic: Logic::Unknown,
            solving_initialized: false,
            vol_map: HashMap::new(),
        }
    }

    /// The declared logic.
    pub fn logic(&self) -> Logic {
        self.logic
    }

    /// Whether no set-logic command was seen yet.
    pub fn logic_not_set(&self) -> bool {
        self.logic == Logic::Unknown
    }

    /// Whether the input is integer arithmetic.
    pub fn is_lia(&self) -> bool {
        self.logic == Logic::QfLia
    }

    /// Whether the input is real arithmetic.
    pub fn is_lra(&self) -> bool {
        self.logic == Logic::QfLra
    }

    /// Declares the logic. Faults when set twice or unsupported.
    pub fn set_logic(&mut self, name: &str) -> anyhow::Result<()> {
        self.ensure_building()?;
        if !self.logic_not_set() {
            return Err(Fault::Logic(format!("logic set twice ({})", name)).into());
        }
        self.logic = match name {
            "QF_LIA" => Logic::QfLia,
            "QF_LRA" => Logic::QfLra,
            _ => return Err(Fault::Logic(name.to_owned()).into()),
        };
        Ok(())
    }

    /// Faults when the DAG is already frozen.
    pub fn ensure_building(&self) -> anyhow::Result<()> {
        if self.solving_initialized {
            Err(Fault::SolvingInitialized.into())
        } else {
            Ok(())
        }
    }

    /// Freezes the DAG and resets all evaluation slots. Called when the
    /// oracle is initialized; tables are append-only and now fixed.
    pub(crate) fn freeze(&mut self) {
        self.solving_initialized = true;
        self.vbool_list.init_vals();
        self.vnum_list.init_vals();
        self.ineq_list.init_vals();
        self.bop_list.init_vals();
        self.nop_list.init_vals();
    }

    /// Whether the building phase is over.
    pub fn is_frozen(&self) -> bool {
        self.solving_initialized
    }

    /// Asserts a Boolean-sorted term.
    pub fn assert(&mut self, node: Node) -> anyhow::Result<()> {
        self.ensure_building()?;
        if !node.is_bool() {
            return Err(Fault::ParamNotBool("assert".to_owned()).into());
        }
        self.assert_list.push(node);
        Ok(())
    }

    /// An atom rendered with declared variable names, for diagnostics.
    pub fn ineq_to_string(&self, id: usize) -> String {
        use std::fmt::Write;
        let atom = self.ineq_list.atom(id);
        let mut out = String::new();
        for (i, (v, c)) in atom.coefs.iter().enumerate() {
            if i > 0 {
                out.push_str(" + ");
            }
            write!(out, "{}*{}", c, self.vnum_list.name(*v)).expect("writing to string");
        }
        write!(
            out,
            " {} {}",
            if atom.is_eq { "=" } else { "<=" },
            atom.bound
        )
        .expect("writing to string");
        out
    }

    /// A term rendered the way it is stored: operators walk their children,
    /// polarity prints as `not` and numeric multipliers as `*`.
    pub fn ast_to_string(&self, node: &Node) -> String {
        let mut out = String::new();
        self.push_ast(node, &mut out);
        out
    }

    fn push_ast(&self, node: &Node, out: &mut String) {
        use std::fmt::Write;
        if node.kind == NodeKind::ConstBool {
            out.push_str(if node.bool_value() { "true" } else { "false" });
            return;
        }
        if node.is_bool() && node.negated {
            out.push_str("(not ");
            self.push_ast(&node.not(), out);
            out.push(')');
            return;
        }
        if node.is_num() && !node.scale.is_one() {
            write!(out, "(* {} ", node.scale).expect("writing to string");
            let mut unscaled = node.clone();
            unscaled.scale = BigRational::one();
            self.push_ast(&unscaled, out);
            out.push(')');
            return;
        }
        match node.kind {
            NodeKind::ConstNum => write!(out, "{}", node.num_value()).expect("writing to string"),
            NodeKind::VarBool => out.push_str(self.vbool_list.name(node.id)),
            NodeKind::VarNum => out.push_str(self.vnum_list.name(node.id)),
            NodeKind::Ineq => out.push_str(&self.ineq_to_string(node.id)),
            NodeKind::And | NodeKind::Or => {
                out.push('(');
                out.push_str(if node.kind == NodeKind::And { "and" } else { "or" });
                for child in self.bop_list.children(node.id) {
                    out.push(' ');
                    self.push_ast(child, out);
                }
                out.push(')');
            }
            NodeKind::Add => {
                out.push_str("(+");
                for child in self.nop_list.children(node.id) {
                    out.push(' ');
                    self.push_ast(child, out);
                }
                if !node.value.is_zero() {
                    write!(out, " {}", node.value).expect("writing to string");
                }
                out.push(')');
            }
            NodeKind::IteNum => {
                out.push_str("(ite");
                for child in self.nop_list.children(node.id) {
                    out.push(' ');
                    self.push_ast(child, out);
                }
                out.push(')');
            }
            k => write!(out, "({:?})", k).expect("writing to string"),
        }
    }

    /// Traces the asserted conjunction, one root per line.
    pub fn dump_ast(&self) {
        for (index, root) in self.assert_list.iter().enumerate() {
            trace!(assert = index, ast = %self.ast_to_string(root), "assertion");
        }
    }

    /// A bunch rendered the way models are reported: declared names mapped
    /// to `1`, `0`, or `X` when free, atoms under their `_ieN` names.
    pub fn model_to_string(&self, bunch: &Bunch) -> String {
        use std::fmt::Write;
        let mark = |v: TriBool| match v {
            TriBool::True => '1',
            TriBool::False => '0',
            TriBool::Unknown => 'X',
        };
        let mut out = String::new();
        for (j, v) in bunch.vbool_vals.iter().enumerate() {
            write!(out, "{}: {},", self.vbool_list.name(j), mark(*v))
                .expect("writing to string");
        }
        for (i, v) in bunch.ineq_vals.iter().enumerate() {
            write!(out, "{}: {},", self.ineq_list.name(i), mark(*v))
                .expect("writing to string");
        }
        out
    }

    /// Total measure of the formula: the sum over all accumulated bunches of
    /// their back-end measures. `solve()` must have run first.
    pub fn volume(&mut self, backend: &dyn Backend) -> anyhow::Result<VolResult> {
        backend.check_logic(self.logic)?;
        let span = trace_span!("volume", backend = backend.name(), timing = true).entered();
        let mut total = VolResult::zero();
        for index in 0..self.bunch_list.len() {
            total = total + self.volume_of_bunch(index, backend)?;
        }
        drop(span);
        trace!(
            vol_calls = self.stats.vol_calls,
            vol_reuses = self.stats.vol_reuses,
            total_dims = self.stats.total_dims,
            max_dims = self.stats.max_dims,
            fact_bunches = self.stats.fact_bunches,
            stats = true,
        );
        Ok(total)
    }

    /// Measure of a single bunch, multiplier included.
    pub fn volume_of_bunch(
        &mut self,
        index: usize,
        backend: &dyn Backend,
    ) -> anyhow::Result<VolResult> {
        let bunch = self.bunch_list[index].clone();
        let multiplier = bunch.multiplier();
        let variants = self
            .bunch_row_sets(&bunch)
            .with_context(|| format!("building constraint rows of bunch {}", index))?;
        let mut factorized = false;
        let mut sum = VolResult::zero();
        for p in variants {
            sum = sum + self.polytope_measure(p, backend, &mut factorized)?;
        }
        if factorized {
            self.stats.fact_bunches += 1;
        }
        debug!(bunch = index, measure = %sum, multiplier, "measured bunch");
        Ok(sum * multiplier)
    }

    /// Runs one polytope through elimination, factorization and dispatch.
    fn polytope_measure(
        &mut self,
        p: Polytope,
        backend: &dyn Backend,
        factorized: &mut bool,
    ) -> anyhow::Result<VolResult> {
        let p = if self.options.enable_ge {
            match gauss::eliminate_equalities(p, self.is_lia()) {
                GaussResult::Infeasible => return Ok(VolResult::zero()),
                GaussResult::Reduced(p) => p,
            }
        } else {
            p
        };
        let components = if self.options.enable_fact {
            factor::factorize(p)
        } else {
            vec![p]
        };
        if components.len() > 1 {
            *factorized = true;
        }
        let mut product = VolResult::one();
        for component in components {
            product = product * self.component_measure(component, backend)?;
        }
        Ok(product)
    }

    /// Cache-aware measure of one independent sub-polytope.
    fn component_measure(
        &mut self,
        component: Polytope,
        backend: &dyn Backend,
    ) -> anyhow::Result<VolResult> {
        let dims = component.vars.len() as u64;
        self.stats.total_dims += dims;
        self.stats.max_dims = self.stats.max_dims.max(dims);
        let key = component.canonical_key();
        if let Some(&cached) = self.vol_map.get(&key) {
            self.stats.vol_reuses += 1;
            return Ok(cached);
        }
        let measured = self.dispatch(&component, backend)?;
        self.vol_map.insert(key, measured);
        self.stats.vol_calls += 1;
        Ok(measured)
    }

    /// Bounds the component and either measures it internally (dimension at
    /// most 1) or hands it to the back-end.
    fn dispatch(&self, component: &Polytope, backend: &dyn Backend) -> anyhow::Result<VolResult> {
        let bbox = match polytope::bounding_box(component) {
            BoxStatus::Infeasible => return Ok(VolResult::zero()),
            BoxStatus::Bounds(b) => b,
        };
        match component.vars.len() {
            // every variable was pinned by elimination: a point
            0 => Ok(VolResult::one()),
            1 => polytope::interval_measure(&bbox[0], self.logic),
            _ => {
                if let Some(var) = component.certainly_unbounded(&bbox) {
                    trace!(var, "dimension without finite bounds");
                    return Err(Fault::UnboundedPolytope.into());
                }
                let ctx = BackendCtx {
                    tool_dir: &self.options.tool_dir,
                    result_dir: &self.options.result_dir,
                    timeout: self.options.backend_timeout,
                    logic: self.logic,
                };
                backend
                    .measure(component, &bbox, &ctx)
                    .with_context(|| format!("running back-end {}", backend.name()))
            }
        }
    }

    /// Clears the bunch pool, the cache and the counters, keeping the frozen
    /// DAG. Mostly useful to re-measure with another back-end.
    pub fn reset_results(&mut self) {
        self.bunch_list.clear();
        self.vol_map.clear();
        self.stats = Stats::default();
    }
}

impl Default for Solver {
    fn default() -> Solver {
        Solver::new()
    }
}
