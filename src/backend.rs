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

//! Volume and lattice-count back-ends
//!
//! Each adapter writes the polytope to a temporary file in the tool's native
//! H-representation, spawns the executable from the tool directory, parses
//! the final numeric token of its stdout, and cleans the file up. Adapters
//! are strategy objects chosen at dispatch time.

use crate::error::Fault;
use crate::polytope::{Interval, Polytope, Relation, Row};
use crate::result::VolResult;
use crate::solver::Logic;
use crate::utils::{try_wait_timeout, PersistableTempFile, PipeCapture};
use anyhow::Context;
use itertools::Itertools;
use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, ToPrimitive, Zero};
use std::fmt::Write as _;
use std::io::Write as _;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::time::Duration;
use tracing::trace;

/// Invocation context handed to a back-end.
pub struct BackendCtx<'a> {
    /// directory containing the executables
    pub tool_dir: &'a Path,
    /// directory for temporary polytope files
    pub result_dir: &'a Path,
    /// per-call timeout; expiry is fatal for the bunch
    pub timeout: Option<Duration>,
    /// the declared logic
    pub logic: Logic,
}

/// A volume or lattice-count back-end.
pub trait Backend {
    /// Name of the back-end (and of its executable, for external tools).
    fn name(&self) -> &'static str;

    /// Faults when the back-end does not apply to the declared logic.
    fn check_logic(&self, logic: Logic) -> anyhow::Result<()>;

    /// Measures one bounded sub-polytope. `bbox` is the axis-aligned outer
    /// box from the bounding sweep.
    fn measure(
        &self,
        p: &Polytope,
        bbox: &[Interval],
        ctx: &BackendCtx,
    ) -> anyhow::Result<VolResult>;
}

/// The last whitespace-separated token of `text` that parses as a number.
pub fn last_number(text: &str) -> anyhow::Result<f64> {
    text.split_whitespace()
        .rev()
        .filter_map(|tok| tok.trim_matches(|c: char| c == ',' || c == ';' || c == ':').parse().ok())
        .next()
        .with_context(|| format!("no numeric token in tool output: {:?}", tail(text)))
}

/// The last `n` numeric tokens, in their original order.
pub fn last_numbers(text: &str, n: usize) -> anyhow::Result<Vec<f64>> {
    let nums: Vec<f64> = text
        .split_whitespace()
        .filter_map(|tok| tok.trim_matches(|c: char| c == ',' || c == ';' || c == ':').parse().ok())
        .collect();
    anyhow::ensure!(
        nums.len() >= n,
        "expected {} numeric tokens in tool output, found {}: {:?}",
        n,
        nums.len(),
        tail(text)
    );
    Ok(nums[nums.len() - n..].to_vec())
}

fn tail(text: &str) -> &str {
    let start = text.len().saturating_sub(200);
    // not necessarily a char boundary; back off until it is
    let mut start = start;
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    &text[start..]
}

/// Writes the polytope file and runs the tool on it, returning stdout.
fn invoke(
    tool: &str,
    content: &str,
    extension: &str,
    extra_args: &[String],
    ctx: &BackendCtx,
) -> anyhow::Result<String> {
    let mut file = PersistableTempFile::new_in(ctx.result_dir, tool, extension)
        .context("creating polytope file")?;
    file.write_all(content.as_bytes())
        .context("writing polytope file")?;
    file.flush().context("flushing polytope file")?;
    let exe = ctx.tool_dir.join(tool);
    let mut cmd = std::process::Command::new(&exe);
    cmd.arg(file.as_ref() as &Path)
        .args(extra_args)
        .current_dir(ctx.result_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    unsafe {
        cmd.pre_exec(|| prctl::set_death_signal(9).map_err(std::io::Error::from_raw_os_error))
    };
    trace!(?cmd, "starting back-end");
    let mut process = cmd
        .spawn()
        .with_context(|| format!("failed to run {}", exe.display()))?;
    let stdout = PipeCapture::new(process.stdout.take().expect("stdout was piped"));
    let stderr = PipeCapture::new(process.stderr.take().expect("stderr was piped"));
    let status = match ctx.timeout {
        None => process
            .wait()
            .with_context(|| format!("waiting for {}", tool))?,
        Some(timeout) => match try_wait_timeout(&mut process, timeout)
            .with_context(|| format!("waiting for {}", tool))?
        {
            Some(status) => status,
            None => {
                let _ignore = process.kill();
                let _ignore = process.wait();
                anyhow::bail!("{} timed out after {:?}", tool, timeout);
            }
        },
    };
    stdout.wait_done(Duration::from_secs(1));
    stderr.wait_done(Duration::from_secs(1));
    let out = stdout.get();
    let err = stderr.get();
    anyhow::ensure!(
        status.success(),
        "{} failed with code {:?} signal {:?}: {} {}",
        tool,
        status.code(),
        status.signal(),
        String::from_utf8_lossy(&out),
        String::from_utf8_lossy(&err)
    );
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// The row scaled to integers by the least common denominator.
fn integer_row(row: &Row) -> (Vec<BigInt>, BigInt) {
    let mut lcm = row.bound.denom().clone();
    for c in row.coefs.iter() {
        lcm = lcm.lcm(c.denom());
    }
    let scale = BigRational::from_integer(lcm);
    (
        row.coefs.iter().map(|c| (c * &scale).to_integer()).collect(),
        (&row.bound * &scale).to_integer(),
    )
}

fn rational_to_f64(x: &BigRational) -> anyhow::Result<f64> {
    x.to_f64().context("coefficient overflows a double")
}

/// Expands `=` rows into their two `≤` rows, for tools without linearity
/// support. The volume of a degenerate polytope is 0 either way.
fn le_rows(p: &Polytope) -> Vec<Row> {
    let mut rows = Vec::with_capacity(p.rows.len());
    for row in p.rows.iter() {
        match row.rel {
            Relation::Le => rows.push(row.clone()),
            Relation::Eq => {
                rows.push(Row {
                    coefs: row.coefs.clone(),
                    bound: row.bound.clone(),
                    rel: Relation::Le,
                });
                rows.push(Row {
                    coefs: row.coefs.iter().map(|c| -c).collect(),
                    bound: -&row.bound,
                    rel: Relation::Le,
                });
            }
        }
    }
    rows
}

/// cddlib-style `.ine` file: `b - A x ≥ 0` rows, real numbers.
pub fn vinci_file(p: &Polytope) -> anyhow::Result<String> {
    let rows = le_rows(p);
    let mut out = String::new();
    writeln!(out, "polytope").expect("writing to string");
    writeln!(out, "H-representation").expect("writing to string");
    writeln!(out, "begin").expect("writing to string");
    writeln!(out, " {} {} real", rows.len(), p.vars.len() + 1).expect("writing to string");
    for row in rows.iter() {
        let mut line = format!(" {}", rational_to_f64(&row.bound)?);
        for c in row.coefs.iter() {
            write!(line, " {}", rational_to_f64(&-c)?).expect("writing to string");
        }
        writeln!(out, "{}", line).expect("writing to string");
    }
    writeln!(out, "end").expect("writing to string");
    Ok(out)
}

/// LattE hrep file: integer `b -A` rows with a trailing linearity line for
/// the `=` rows.
pub fn latte_file(p: &Polytope) -> String {
    let mut out = String::new();
    writeln!(out, "{} {}", p.rows.len(), p.vars.len() + 1).expect("writing to string");
    let mut linearity = Vec::new();
    for (i, row) in p.rows.iter().enumerate() {
        let (coefs, bound) = integer_row(row);
        if row.rel == Relation::Eq {
            linearity.push(i + 1);
        }
        writeln!(out, "{} {}", bound, coefs.iter().map(|c| -c).format(" "))
            .expect("writing to string");
    }
    if !linearity.is_empty() {
        writeln!(out, "linearity {} {}", linearity.len(), linearity.iter().format(" "))
            .expect("writing to string");
    }
    out
}

/// polylib constraint matrix: `{1|0} -A b` rows, 1 flagging an inequality
/// `b - A x ≥ 0` and 0 an equality.
pub fn polylib_file(p: &Polytope) -> String {
    let mut out = String::new();
    writeln!(out, "{} {}", p.rows.len(), p.vars.len() + 2).expect("writing to string");
    for row in p.rows.iter() {
        let (coefs, bound) = integer_row(row);
        let flag = if row.rel == Relation::Eq { 0 } else { 1 };
        writeln!(out, "{} {} {}", flag, coefs.iter().map(|c| -c).format(" "), bound)
            .expect("writing to string");
    }
    out
}

/// PolyVest input: `m n` then real `A | b` rows.
pub fn polyvest_file(p: &Polytope) -> anyhow::Result<String> {
    let rows = le_rows(p);
    let mut out = String::new();
    writeln!(out, "{} {}", rows.len(), p.vars.len()).expect("writing to string");
    for row in rows.iter() {
        let mut line = String::new();
        for c in row.coefs.iter() {
            write!(line, "{} ", rational_to_f64(c)?).expect("writing to string");
        }
        write!(line, "{}", rational_to_f64(&row.bound)?).expect("writing to string");
        writeln!(out, "{}", line).expect("writing to string");
    }
    Ok(out)
}

/// Exact volume computation with Vinci.
pub struct Vinci;

impl Backend for Vinci {
    fn name(&self) -> &'static str {
        "vinci"
    }

    fn check_logic(&self, logic: Logic) -> anyhow::Result<()> {
        match logic {
            Logic::QfLra => Ok(()),
            _ => Err(Fault::LogicVinci.into()),
        }
    }

    fn measure(
        &self,
        p: &Polytope,
        _bbox: &[Interval],
        ctx: &BackendCtx,
    ) -> anyhow::Result<VolResult> {
        let content = vinci_file(p)?;
        let out = invoke("vinci", &content, ".ine", &[], ctx)?;
        Ok(VolResult::exact(last_number(&out)?))
    }
}

/// Exact lattice point counting with LattE (`count`).
pub struct Latte;

impl Backend for Latte {
    fn name(&self) -> &'static str {
        "latte"
    }

    fn check_logic(&self, logic: Logic) -> anyhow::Result<()> {
        match logic {
            Logic::QfLia => Ok(()),
            _ => Err(Fault::LogicLatte.into()),
        }
    }

    fn measure(
        &self,
        p: &Polytope,
        _bbox: &[Interval],
        ctx: &BackendCtx,
    ) -> anyhow::Result<VolResult> {
        let content = latte_file(p);
        let out = invoke("count", &content, ".hrep", &[], ctx)?;
        Ok(VolResult::exact(last_number(&out)?))
    }
}

/// Exact lattice point counting with Barvinok.
pub struct Barvinok;

impl Backend for Barvinok {
    fn name(&self) -> &'static str {
        "barvinok"
    }

    fn check_logic(&self, logic: Logic) -> anyhow::Result<()> {
        match logic {
            Logic::QfLia => Ok(()),
            _ => Err(Fault::LogicLatte.into()),
        }
    }

    fn measure(
        &self,
        p: &Polytope,
        _bbox: &[Interval],
        ctx: &BackendCtx,
    ) -> anyhow::Result<VolResult> {
        let content = polylib_file(p);
        let out = invoke("barvinok_count", &content, ".polylib", &[], ctx)?;
        Ok(VolResult::exact(last_number(&out)?))
    }
}

/// Approximate lattice counting with ALC.
pub struct Alc;

impl Backend for Alc {
    fn name(&self) -> &'static str {
        "alc"
    }

    fn check_logic(&self, logic: Logic) -> anyhow::Result<()> {
        match logic {
            Logic::QfLia => Ok(()),
            _ => Err(Fault::LogicLatte.into()),
        }
    }

    fn measure(
        &self,
        p: &Polytope,
        _bbox: &[Interval],
        ctx: &BackendCtx,
    ) -> anyhow::Result<VolResult> {
        let content = latte_file(p);
        let out = invoke("alc", &content, ".hrep", &[], ctx)?;
        Ok(VolResult::exact(last_number(&out)?))
    }
}

/// Randomized volume estimation with PolyVest: with probability at least
/// `1 - delta` the result is within relative error `epsilon`; `coef` is the
/// tool's sampling constant, forwarded verbatim.
pub struct PolyVest {
    pub epsilon: f64,
    pub delta: f64,
    pub coef: f64,
}

impl Backend for PolyVest {
    fn name(&self) -> &'static str {
        "polyvest"
    }

    fn check_logic(&self, logic: Logic) -> anyhow::Result<()> {
        match logic {
            Logic::QfLra => Ok(()),
            _ => Err(Fault::LogicPolyvest.into()),
        }
    }

    fn measure(
        &self,
        p: &Polytope,
        _bbox: &[Interval],
        ctx: &BackendCtx,
    ) -> anyhow::Result<VolResult> {
        let content = polyvest_file(p)?;
        let args = vec![
            self.epsilon.to_string(),
            self.delta.to_string(),
            self.coef.to_string(),
        ];
        let out = invoke("polyvest", &content, ".vest", &args, ctx)?;
        Ok(VolResult::exact(last_number(&out)?))
    }
}

/// Volume-to-lattice estimation: returns the estimated count with its upper
/// and lower bounds.
pub struct V2L;

impl Backend for V2L {
    fn name(&self) -> &'static str {
        "v2l"
    }

    fn check_logic(&self, logic: Logic) -> anyhow::Result<()> {
        match logic {
            Logic::QfLia => Ok(()),
            _ => Err(Fault::LogicLatte.into()),
        }
    }

    fn measure(
        &self,
        p: &Polytope,
        _bbox: &[Interval],
        ctx: &BackendCtx,
    ) -> anyhow::Result<VolResult> {
        let content = latte_file(p);
        let out = invoke("v2l", &content, ".hrep", &[], ctx)?;
        let nums = last_numbers(&out, 3)?;
        Ok(VolResult::new(nums[0], nums[1], nums[2]))
    }
}

/// limit on in-process lattice enumeration
const BRUTE_FORCE_CAP: u64 = 10_000_000;

/// Lattice point counting by enumerating the bounding box, in process. The
/// reference back-end for tests and tiny problems.
pub struct BruteForce;

impl Backend for BruteForce {
    fn name(&self) -> &'static str {
        "bruteforce"
    }

    fn check_logic(&self, logic: Logic) -> anyhow::Result<()> {
        match logic {
            Logic::QfLia => Ok(()),
            _ => Err(Fault::LogicLatte.into()),
        }
    }

    fn measure(
        &self,
        p: &Polytope,
        bbox: &[Interval],
        _ctx: &BackendCtx,
    ) -> anyhow::Result<VolResult> {
        let n = p.vars.len();
        if n == 0 {
            return Ok(VolResult::exact(if satisfies(p, &[]) { 1. } else { 0. }));
        }
        let mut lows = Vec::with_capacity(n);
        let mut highs = Vec::with_capacity(n);
        let mut total = BigInt::one();
        for interval in bbox.iter() {
            match interval {
                (Some(lo), Some(hi)) => {
                    let lo = lo.ceil().to_integer();
                    let hi = hi.floor().to_integer();
                    if lo > hi {
                        return Ok(VolResult::zero());
                    }
                    total *= &hi - &lo + BigInt::one();
                    lows.push(lo);
                    highs.push(hi);
                }
                _ => return Err(Fault::UnboundedPolytope.into()),
            }
        }
        anyhow::ensure!(
            total <= BigInt::from(BRUTE_FORCE_CAP),
            "brute force enumeration over {} lattice points",
            total
        );
        let mut point = lows.clone();
        let mut count = 0u64;
        'point: loop {
            if satisfies(p, &point) {
                count += 1;
            }
            let mut j = 0;
            loop {
                point[j] += BigInt::one();
                if point[j] <= highs[j] {
                    break;
                }
                point[j] = lows[j].clone();
                j += 1;
                if j == n {
                    break 'point;
                }
            }
        }
        Ok(VolResult::exact(count as f64))
    }
}

fn satisfies(p: &Polytope, point: &[BigInt]) -> bool {
    for row in p.rows.iter() {
        let mut lhs = BigRational::zero();
        for (c, x) in row.coefs.iter().zip(point.iter()) {
            if !c.is_zero() {
                lhs += c * &BigRational::from_integer(x.clone());
            }
        }
        let ok = match row.rel {
            Relation::Le => lhs <= row.bound,
            Relation::Eq => lhs == row.bound,
        };
        if !ok {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::polytope::{bounding_box, BoxStatus};

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
    fn last_number_takes_the_final_token() {
        assert_eq!(last_number("Volume: 2.5\n").unwrap(), 2.5);
        assert_eq!(last_number("steps 12\nresult 3.0e+01\n").unwrap(), 30.0);
        assert_eq!(last_number("count is 66.").unwrap(), 66.0);
        assert!(last_number("no numbers here").is_err());
    }

    #[test]
    fn last_numbers_keep_order() {
        assert_eq!(
            last_numbers("a 1 b 2 c 3 4", 3).unwrap(),
            vec![2.0, 3.0, 4.0]
        );
        assert!(last_numbers("only 1", 3).is_err());
    }

    #[test]
    fn vinci_format() {
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![le(&[1, 0], 1), le(&[-1, 0], 0)],
        };
        let content = vinci_file(&p).unwrap();
        assert_eq!(
            content,
            "polytope\nH-representation\nbegin\n 2 3 real\n 1 -1 0\n 0 1 0\nend\n"
        );
    }

    #[test]
    fn latte_format_with_linearity() {
        let p = Polytope {
            vars: vec![0],
            rows: vec![le(&[1], 5), eq(&[2], 3)],
        };
        let content = latte_file(&p);
        assert_eq!(content, "2 2\n5 -1\n3 -2\nlinearity 1 2\n");
    }

    #[test]
    fn latte_rows_are_scaled_to_integers() {
        let p = Polytope {
            vars: vec![0],
            rows: vec![Row {
                coefs: vec![BigRational::new(1.into(), 2.into())],
                bound: rat(1),
                rel: Relation::Le,
            }],
        };
        assert_eq!(latte_file(&p), "1 2\n2 -1\n");
    }

    #[test]
    fn polylib_format() {
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![le(&[1, 1], 1), eq(&[1, -1], 0)],
        };
        assert_eq!(polylib_file(&p), "2 4\n1 -1 -1 1\n0 -1 1 0\n");
    }

    #[test]
    fn polyvest_expands_equalities() {
        let p = Polytope {
            vars: vec![0],
            rows: vec![eq(&[1], 2)],
        };
        let content = polyvest_file(&p).unwrap();
        assert_eq!(content, "2 1\n1 2\n-1 -2\n");
    }

    #[test]
    fn logic_checks() {
        assert!(Vinci.check_logic(Logic::QfLra).is_ok());
        let e = Vinci.check_logic(Logic::QfLia).unwrap_err();
        assert_eq!(e.downcast_ref::<Fault>(), Some(&Fault::LogicVinci));
        let e = Latte.check_logic(Logic::QfLra).unwrap_err();
        assert_eq!(e.downcast_ref::<Fault>(), Some(&Fault::LogicLatte));
        let e = PolyVest {
            epsilon: 0.1,
            delta: 0.05,
            coef: 1.0,
        }
        .check_logic(Logic::QfLia)
        .unwrap_err();
        assert_eq!(e.downcast_ref::<Fault>(), Some(&Fault::LogicPolyvest));
        assert!(BruteForce.check_logic(Logic::QfLia).is_ok());
    }

    fn lia_ctx(dir: &Path) -> BackendCtx {
        BackendCtx {
            tool_dir: dir,
            result_dir: dir,
            timeout: None,
            logic: Logic::QfLia,
        }
    }

    #[test]
    fn brute_force_counts_the_triangle() {
        // x >= 0, y >= 0, x + y <= 10: 66 lattice points
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![le(&[-1, 0], 0), le(&[0, -1], 0), le(&[1, 1], 10)],
        };
        let bbox = match bounding_box(&p) {
            BoxStatus::Bounds(b) => b,
            s => panic!("unexpected {:?}", s),
        };
        let dir = tempfile::tempdir().unwrap();
        let count = BruteForce.measure(&p, &bbox, &lia_ctx(dir.path())).unwrap();
        assert_eq!(count, VolResult::exact(66.0));
    }

    #[test]
    fn brute_force_respects_equalities() {
        // x + y = 3 inside the box [0,3]^2: 4 points
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![
                le(&[-1, 0], 0),
                le(&[0, -1], 0),
                le(&[1, 0], 3),
                le(&[0, 1], 3),
                eq(&[1, 1], 3),
            ],
        };
        let bbox = match bounding_box(&p) {
            BoxStatus::Bounds(b) => b,
            s => panic!("unexpected {:?}", s),
        };
        let dir = tempfile::tempdir().unwrap();
        let count = BruteForce.measure(&p, &bbox, &lia_ctx(dir.path())).unwrap();
        assert_eq!(count, VolResult::exact(4.0));
    }

    #[test]
    fn missing_tool_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let p = Polytope {
            vars: vec![0, 1],
            rows: vec![le(&[1, 1], 1), le(&[-1, 0], 0), le(&[0, -1], 0)],
        };
        let ctx = BackendCtx {
            tool_dir: dir.path(),
            result_dir: dir.path(),
            timeout: None,
            logic: Logic::QfLra,
        };
        let e = Vinci.measure(&p, &[], &ctx).unwrap_err();
        assert!(format!("{:#}", e).contains("vinci"));
    }
}
