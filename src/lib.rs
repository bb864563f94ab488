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

#![warn(missing_docs)]

//! Volume computation and lattice point counting on SMT(QF_LRA/QF_LIA)

pub mod backend;
pub mod builder;
pub mod bunch;
pub mod dag;
pub mod error;
pub mod factor;
pub mod gauss;
pub mod ineq;
pub mod oracle;
pub mod parser;
pub mod polytope;
pub mod result;
pub mod solver;
pub mod utils;

use anyhow::Context;
use backend::Backend;
use chrono::Duration;
use serde::Serialize;
use solver::{Options, Solver, Stats};
use std::cell::RefCell;
use std::fs::File;
use std::ops::DerefMut;
use std::path::PathBuf;
use std::time::Instant;
use structopt::clap::arg_enum;
use structopt::StructOpt;

use crate::result::VolResult;

arg_enum! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum BackendName {
        Vinci,
        Latte,
        Barvinok,
        Alc,
        Polyvest,
        V2L,
        BruteForce
    }
}

fn parse_duration(txt: &str) -> anyhow::Result<Duration> {
    let n = txt.parse()?;
    Ok(Duration::milliseconds(n))
}

fn parse_millis(txt: &str) -> anyhow::Result<std::time::Duration> {
    let n = txt.parse()?;
    Ok(std::time::Duration::from_millis(n))
}

#[derive(Debug)]
/// Writes the result in json to a file.
pub struct ResultWriter {
    file: RefCell<File>,
    path: PathBuf,
}

impl ResultWriter {
    fn write<R: Serialize>(&self, result: &R) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(self.file.borrow_mut().deref_mut(), result)
            .with_context(|| format!("writing result to {}", self.path.display()))
    }
}

impl From<&std::ffi::OsStr> for ResultWriter {
    fn from(path: &std::ffi::OsStr) -> ResultWriter {
        let path: PathBuf = path.into();
        let file = match File::create(&path) {
            Ok(f) => RefCell::new(f),
            Err(e) => {
                tracing::error!(
                    "failed to open {} to write results (--json option): {}",
                    path.display(),
                    e
                );
                std::process::exit(1);
            }
        };
        ResultWriter { path, file }
    }
}

/// Configuration options
#[derive(Debug, StructOpt)]
#[structopt(
    name = "polycount",
    about = "Computes the volume or lattice point count of a QF_LRA/QF_LIA formula"
)]
pub struct Opt {
    #[structopt(possible_values = &BackendName::variants(), case_insensitive = true, default_value="vinci", short, long)]
    /// What back-end to measure polytopes with
    backend: BackendName,

    /// Directory containing the back-end executables
    #[structopt(long, parse(from_os_str), default_value = ".")]
    tool_dir: PathBuf,

    /// Directory for temporary polytope files; defaults to the system
    /// temporary directory
    #[structopt(long, parse(from_os_str))]
    result_dir: Option<PathBuf>,

    /// Input file, an SMT-LIB2 script
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Disable bunch generalization: one bunch per oracle model
    #[structopt(long)]
    no_bunch: bool,

    /// Disable polytope factorization
    #[structopt(long)]
    no_fact: bool,

    /// Disable Gaussian elimination of equality rows
    #[structopt(long)]
    no_ge: bool,

    /// Word length bounding integer variables under QF_LIA.
    ///
    /// Integer variables range over [-2^(w-1), 2^(w-1)-1]; the reported
    /// count is relative to this approximation.
    #[structopt(short, long, default_value = "8")]
    wordlength: u32,

    /// PolyVest relative error
    #[structopt(long, default_value = "0.1")]
    epsilon: f64,

    /// PolyVest failure probability
    #[structopt(long, default_value = "0.05")]
    delta: f64,

    /// PolyVest sampling constant, forwarded verbatim
    #[structopt(long, default_value = "1.0")]
    coef: f64,

    /// Per-call timeout for back-end executables, in milliseconds
    #[structopt(long, parse(try_from_str = parse_millis))]
    backend_timeout: Option<std::time::Duration>,

    /// Timeout, in milliseconds. Return code is 42 on timeout.
    #[structopt(short = "T", long, parse(try_from_str = parse_duration))]
    timeout: Option<Duration>,

    /// Enable debug output and persist temporary files for inspection.
    #[structopt(short, long)]
    debug: bool,

    /// Output some stats in json to this file
    #[structopt(long, parse(from_os_str))]
    stats: Option<PathBuf>,

    /// JSON output to the specified file
    #[structopt(short, long, parse(from_os_str))]
    json: Option<ResultWriter>,
}

impl Opt {
    fn backend(&self) -> Box<dyn Backend> {
        match self.backend {
            BackendName::Vinci => Box::new(backend::Vinci),
            BackendName::Latte => Box::new(backend::Latte),
            BackendName::Barvinok => Box::new(backend::Barvinok),
            BackendName::Alc => Box::new(backend::Alc),
            BackendName::Polyvest => Box::new(backend::PolyVest {
                epsilon: self.epsilon,
                delta: self.delta,
                coef: self.coef,
            }),
            BackendName::V2L => Box::new(backend::V2L),
            BackendName::BruteForce => Box::new(backend::BruteForce),
        }
    }

    fn options(&self) -> Options {
        Options {
            enable_bunch: !self.no_bunch,
            enable_fact: !self.no_fact,
            enable_ge: !self.no_ge,
            wordlength: self.wordlength,
            tool_dir: self.tool_dir.clone(),
            result_dir: self
                .result_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            epsilon: self.epsilon,
            delta: self.delta,
            coef: self.coef,
            backend_timeout: self.backend_timeout,
        }
    }
}

#[derive(Serialize)]
struct JsonResult {
    sat: bool,
    result: Option<VolResult>,
    bunches: usize,
    /// the finite integer range approximation in force, if any
    wordlength: Option<u32>,
    stats: Stats,
}

fn setup_tracing(opt: &Opt) -> anyhow::Result<()> {
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::prelude::*;
    let min_level = if opt.debug { Level::TRACE } else { Level::INFO };
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::filter::filter_fn(move |metadata| *metadata.level() <= min_level),
    );
    let subscriber = tracing_subscriber::Registry::default().with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing collector")?;
    Ok(())
}

/// entrypoint of the binary
pub fn run() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let start_time = Instant::now();
    setup_tracing(&opt)?;
    let global_stats = move || {
        let mut usage = nc::rusage_t::default();
        unsafe { nc::getrusage(nc::RUSAGE_SELF, &mut usage) }.unwrap_or_else(|e| {
            tracing::warn!("failed to get own memory usage: {}", e);
        });
        let max_rss_self_kb = usage.ru_maxrss;
        usage = nc::rusage_t::default();
        // max rss of the largest child, so presumably the back-end...
        unsafe { nc::getrusage(nc::RUSAGE_CHILDREN, &mut usage) }.unwrap_or_else(|e| {
            tracing::warn!("failed to get children memory usage: {}", e);
        });
        let max_rss_backend_kb = usage.ru_maxrss;
        tracing::trace!(
            wall_time_ms = start_time.elapsed().as_millis() as u64,
            max_rss_self_kb,
            max_rss_backend_kb,
            stats = true
        );
    };
    let timer = opt.timeout.map(|duration| {
        let timer = timer::Timer::new();
        let giveup = move || {
            tracing::warn!(timeout = true, stats = true);
            std::process::exit(42)
        };
        // the guard returned by schedule_with_delay must be ignored otherwise it is cancelled on
        // drop
        timer.schedule_with_delay(duration, giveup).ignore();
        // the timer must not be dropped, otherwise everything is cancelled
        timer
    });
    let mut solver = Solver::with_options(opt.options());
    let check_sat = solver
        .parse_smtlib2_file(&opt.input)
        .with_context(|| format!("parsing input file {}", opt.input.display()))?;
    if !check_sat {
        tracing::warn!("input has no check-sat command, solving anyway");
    }
    let sat = solver
        .solve()
        .with_context(|| format!("solving {}", opt.input.display()))?;
    let result = if sat {
        let backend = opt.backend();
        Some(
            solver
                .volume(backend.as_ref())
                .with_context(|| format!("measuring {}", opt.input.display()))?,
        )
    } else {
        None
    };
    match &result {
        None => println!("unsat"),
        Some(measure) => {
            println!("sat");
            if solver.is_lia() {
                println!("Model count: {}", measure);
            } else {
                println!("Volume: {}", measure);
            }
        }
    }
    if let Some(writer) = &opt.json {
        writer.write(&JsonResult {
            sat,
            result,
            bunches: solver.bunch_list.len(),
            wordlength: if solver.is_lia() {
                Some(solver.options.wordlength)
            } else {
                None
            },
            stats: solver.stats,
        })?;
    }
    if let Some(path) = &opt.stats {
        let file = File::create(path)
            .with_context(|| format!("cannot open {} for writing stats", path.display()))?;
        serde_json::to_writer(file, &solver.stats)
            .with_context(|| format!("writing stats to {}", path.display()))?;
    }
    drop(timer);
    global_stats();
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::{BruteForce, Latte, Vinci};
    use crate::error::Fault;

    fn solved(input: &str) -> Solver {
        let mut s = Solver::new();
        s.parse_smtlib2(input.as_bytes(), "<test>").expect("parsing");
        s.solve().expect("solving");
        s
    }

    #[test]
    fn unit_square_volume() {
        let mut s = solved(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (declare-const y Real)
             (assert (and (<= 0 x) (<= x 1) (<= 0 y) (<= y 1)))
             (check-sat)",
        );
        let v = s.volume(&Vinci).unwrap();
        assert_eq!(v, VolResult::exact(1.0));
        // the two axes are identical 1-D components: one call, one reuse
        assert_eq!(s.stats.vol_calls, 1);
        assert_eq!(s.stats.vol_reuses, 1);
    }

    #[test]
    fn single_interval_volume() {
        let mut s = solved(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (assert (and (<= x 5) (<= 0 x)))
             (check-sat)",
        );
        assert_eq!(s.volume(&Vinci).unwrap(), VolResult::exact(5.0));
    }

    #[test]
    fn union_of_intervals_sums_bunches() {
        let mut s = solved(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (assert (or (and (<= 0 x) (<= x 1)) (and (<= 2 x) (<= x 4))))
             (check-sat)",
        );
        assert!(s.bunch_list.len() >= 2);
        let v = s.volume(&Vinci).unwrap();
        assert_eq!(v, VolResult::exact(3.0));
    }

    #[test]
    fn factorized_box_multiplies_components() {
        let mut s = solved(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (declare-const y Real)
             (assert (and (<= 0 x) (<= x 2) (<= 0 y) (<= y 3)))
             (check-sat)",
        );
        let v = s.volume(&Vinci).unwrap();
        assert_eq!(v, VolResult::exact(6.0));
        assert_eq!(s.stats.fact_bunches, 1);
        assert_eq!(s.stats.max_dims, 1);
    }

    #[test]
    fn factorization_can_be_disabled() {
        let mut s = solved(
            "(set-logic QF_LIA)
             (declare-const x Int)
             (declare-const y Int)
             (assert (and (<= 0 x) (<= x 2) (<= 0 y) (<= y 3)))
             (check-sat)",
        );
        s.options.enable_fact = false;
        let v = s.volume(&BruteForce).unwrap();
        assert_eq!(v, VolResult::exact(12.0));
        assert_eq!(s.stats.fact_bunches, 0);
        assert_eq!(s.stats.max_dims, 2);
    }

    #[test]
    fn lattice_triangle_count() {
        let mut s = solved(
            "(set-logic QF_LIA)
             (declare-const x Int)
             (declare-const y Int)
             (assert (and (<= 0 x) (<= x 10) (<= 0 y) (<= y 10) (<= (+ x y) 10)))
             (check-sat)",
        );
        let v = s.volume(&BruteForce).unwrap();
        assert_eq!(v, VolResult::exact(66.0));
    }

    #[test]
    fn pinned_integer_has_one_point() {
        let mut s = solved(
            "(set-logic QF_LIA)
             (declare-const x Int)
             (assert (= x 3))
             (check-sat)",
        );
        let v = s.volume(&BruteForce).unwrap();
        assert_eq!(v, VolResult::exact(1.0));
    }

    #[test]
    fn empty_assert_list_counts_the_full_box() {
        let mut s = Solver::new();
        s.options.wordlength = 4;
        s.parse_smtlib2(
            "(set-logic QF_LIA)(declare-const x Int)(check-sat)".as_bytes(),
            "<test>",
        )
        .unwrap();
        assert!(s.solve().unwrap());
        assert_eq!(s.bunch_list.len(), 1);
        let v = s.volume(&BruteForce).unwrap();
        // one 4-bit integer dimension
        assert_eq!(v, VolResult::exact(16.0));
    }

    #[test]
    fn unbounded_real_is_fatal() {
        let mut s = solved(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (assert (<= 0 x))
             (check-sat)",
        );
        let e = s.volume(&Vinci).unwrap_err();
        assert_eq!(
            e.downcast_ref::<Fault>(),
            Some(&Fault::UnboundedPolytope)
        );
    }

    #[test]
    fn free_boolean_doubles_the_measure() {
        let mut s = solved(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (declare-const p Bool)
             (assert (and (<= 0 x) (<= x 2) (or p (<= x 1))))
             (check-sat)",
        );
        let v = s.volume(&Vinci).unwrap();
        // p true: [0,2]; p false: [0,1]
        assert_eq!(v, VolResult::exact(3.0));
    }

    #[test]
    fn backends_reject_the_wrong_logic() {
        let mut s = solved(
            "(set-logic QF_LIA)
             (declare-const x Int)
             (assert (<= x 1))
             (check-sat)",
        );
        let e = s.volume(&Vinci).unwrap_err();
        assert_eq!(e.downcast_ref::<Fault>(), Some(&Fault::LogicVinci));
        let mut s = solved(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (assert (and (<= 0 x) (<= x 1)))
             (check-sat)",
        );
        let e = s.volume(&Latte).unwrap_err();
        assert_eq!(e.downcast_ref::<Fault>(), Some(&Fault::LogicLatte));
    }

    #[test]
    fn commutativity_of_operand_order() {
        let mut a = solved(
            "(set-logic QF_LIA)
             (declare-const x Int)
             (declare-const y Int)
             (assert (and (<= 0 x) (<= x 3) (<= 0 y) (<= y 3) (<= (+ x y) 4)))
             (check-sat)",
        );
        let mut b = solved(
            "(set-logic QF_LIA)
             (declare-const x Int)
             (declare-const y Int)
             (assert (and (<= 0 y) (<= (+ y x) 4) (<= y 3) (<= x 3) (<= 0 x)))
             (check-sat)",
        );
        let va = a.volume(&BruteForce).unwrap();
        let vb = b.volume(&BruteForce).unwrap();
        assert_eq!(va, vb);
    }

    #[test]
    fn cache_accounting_law() {
        let mut s = solved(
            "(set-logic QF_LIA)
             (declare-const x Int)
             (declare-const y Int)
             (declare-const z Int)
             (assert (and (<= 0 x) (<= x 1) (<= 0 y) (<= y 1) (<= 0 z) (<= z 1)))
             (check-sat)",
        );
        let v = s.volume(&BruteForce).unwrap();
        assert_eq!(v, VolResult::exact(8.0));
        // three identical 1-D components
        assert_eq!(s.stats.vol_calls, 1);
        assert_eq!(s.stats.vol_reuses, 2);
        assert_eq!(s.stats.total_dims, 3);
    }

    #[test]
    fn disabling_gauss_keeps_equality_rows() {
        let mut s = solved(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (declare-const y Real)
             (assert (and (= x 3) (<= 0 y) (<= y 2)))
             (check-sat)",
        );
        s.options.enable_ge = false;
        let v = s.volume(&Vinci).unwrap();
        // x = 3 is the pair x <= 3, x >= 3: a 1-D interval of length 0...
        // times the y interval of length 2, except the pinned axis is exact
        assert_eq!(v.value, 0.0);
        s.options.enable_ge = true;
        s.reset_results();
        assert!(s.solve().unwrap());
        let v = s.volume(&Vinci).unwrap();
        assert_eq!(v, VolResult::exact(2.0));
    }

    /// Requires a real vinci executable in PATH-visible tool_dir: run with
    /// `cargo test -- --ignored` on a machine with the tools installed.
    #[test]
    #[ignore]
    fn triangle_volume_with_real_vinci() {
        let mut s = solved(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (declare-const y Real)
             (assert (and (<= 0 x) (<= 0 y) (<= (+ x y) 1)))
             (check-sat)",
        );
        let v = s.volume(&Vinci).unwrap();
        assert!((v.value - 0.5).abs() < 1e-9);
    }
}
