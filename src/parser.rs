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

//! SMT-LIB2 front-end driving the builder

use crate::dag::Node;
use crate::error::Fault;
use crate::solver::Solver;
use anyhow::Context;
use num_bigint::BigInt;
use num_rational::BigRational;
use smt2parser::concrete::{Command, Constant, Identifier, QualIdentifier, Sort, Term};
use smt2parser::CommandStream;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

fn head_symbol(qi: &QualIdentifier) -> anyhow::Result<&str> {
    match qi {
        QualIdentifier::Simple {
            identifier: Identifier::Simple { symbol },
        } => Ok(&symbol.0),
        other => Err(Fault::UnknownSymbol(format!("{}", other)).into()),
    }
}

fn numeral_to_rational(n: &smt2parser::Numeral) -> anyhow::Result<BigRational> {
    let i: BigInt = n
        .to_string()
        .parse()
        .context("parsing numeral constant")?;
    Ok(BigRational::from_integer(i))
}

fn decimal_to_rational(d: &smt2parser::Decimal) -> anyhow::Result<BigRational> {
    let text = d.to_string();
    // numerator/denominator notation
    if let Ok(r) = text.parse::<BigRational>() {
        return Ok(r);
    }
    // decimal point notation
    let negative = text.starts_with('-');
    let unsigned = text.trim_start_matches('-');
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some(parts) => parts,
        None => (unsigned, ""),
    };
    let digits = format!("{}{}", int_part, frac_part);
    let numer: BigInt = digits
        .parse()
        .with_context(|| format!("parsing decimal constant {}", text))?;
    let denom = num_traits::pow(BigInt::from(10), frac_part.len());
    let r = BigRational::new(numer, denom);
    Ok(if negative { -r } else { r })
}

impl Solver {
    /// Parses a whole SMT-LIB2 file. Returns whether `check-sat` was
    /// requested.
    pub fn parse_smtlib2_file(&mut self, path: &Path) -> anyhow::Result<bool> {
        let file = File::open(path).map_err(|e| {
            anyhow::Error::new(e).context(Fault::OpenFile(path.display().to_string()))
        })?;
        self.parse_smtlib2(BufReader::new(file), &path.display().to_string())
    }

    /// Parses an SMT-LIB2 command stream. `display` names the input in
    /// diagnostics. Returns whether `check-sat` was requested.
    pub fn parse_smtlib2(
        &mut self,
        read: impl BufRead,
        display: &str,
    ) -> anyhow::Result<bool> {
        let commands = CommandStream::new(
            read,
            smt2parser::concrete::SyntaxBuilder,
            Some(display.to_string()),
        );
        let mut check_sat = false;
        let mut warned: BTreeSet<String> = BTreeSet::new();
        for (ordinal, command) in commands.into_iter().enumerate() {
            let command = match command {
                Ok(c) => c,
                Err(position) => {
                    return Err(Fault::SymbolMismatch(format!("{}", position)).into());
                }
            };
            match command {
                Command::SetLogic { symbol } => self
                    .set_logic(&symbol.0)
                    .with_context(|| format!("in command {} of {}", ordinal + 1, display))?,
                Command::DeclareConst { symbol, sort } => self
                    .declare(&symbol.0, &sort)
                    .with_context(|| format!("in command {} of {}", ordinal + 1, display))?,
                Command::DeclareFun {
                    symbol,
                    parameters,
                    sort,
                } => {
                    if !parameters.is_empty() {
                        return Err(anyhow::Error::new(Fault::ParamMismatch(
                            symbol.0.clone(),
                        ))
                        .context("only zero-arity functions are supported"));
                    }
                    self.declare(&symbol.0, &sort)
                        .with_context(|| format!("in command {} of {}", ordinal + 1, display))?;
                }
                Command::Assert { term } => {
                    let mut lets = Vec::new();
                    let node = self
                        .build_term(&term, &mut lets)
                        .with_context(|| format!("in command {} of {}", ordinal + 1, display))?;
                    self.assert(node)
                        .with_context(|| format!("in command {} of {}", ordinal + 1, display))?;
                }
                Command::CheckSat => check_sat = true,
                Command::Exit => break,
                Command::SetInfo { .. } | Command::SetOption { .. } => {}
                other => {
                    // push/pop included: warned and skipped, once per kind
                    let summary = format!("{:?}", other);
                    let kind = summary
                        .split(|c: char| c == ' ' || c == '{' || c == '(')
                        .next()
                        .unwrap_or("command")
                        .to_owned();
                    if warned.insert(kind.clone()) {
                        warn!("unsupported command {} ignored", kind);
                    }
                }
            }
        }
        Ok(check_sat)
    }

    fn declare(&mut self, name: &str, sort: &Sort) -> anyhow::Result<()> {
        let sort_name = match sort {
            Sort::Simple {
                identifier: Identifier::Simple { symbol },
            } => symbol.0.as_str(),
            other => return Err(Fault::Logic(format!("unsupported sort {}", other)).into()),
        };
        match sort_name {
            "Bool" => {
                self.mk_bool_decl(name)?;
            }
            "Int" => {
                if !self.is_lia() {
                    return Err(Fault::Logic(format!(
                        "Int variable {} requires QF_LIA",
                        name
                    ))
                    .into());
                }
                self.mk_var_decl(name)?;
            }
            "Real" => {
                if !self.is_lra() {
                    return Err(Fault::Logic(format!(
                        "Real variable {} requires QF_LRA",
                        name
                    ))
                    .into());
                }
                self.mk_var_decl(name)?;
            }
            other => {
                return Err(Fault::Logic(format!("unsupported sort {}", other)).into());
            }
        }
        Ok(())
    }

    fn symbol_node(
        &self,
        name: &str,
        lets: &[BTreeMap<String, Node>],
    ) -> anyhow::Result<Node> {
        for scope in lets.iter().rev() {
            if let Some(node) = scope.get(name) {
                return Ok(node.clone());
            }
        }
        match name {
            "true" => return Ok(Node::true_()),
            "false" => return Ok(Node::false_()),
            _ => {}
        }
        if let Some(id) = self.vbool_list.find(name) {
            return Ok(Node::var_bool(id));
        }
        if let Some(id) = self.vnum_list.find(name) {
            return Ok(Node::var_num(id));
        }
        if let Some(id) = self.ineq_list.find(name) {
            return Ok(Node::ineq(id));
        }
        Err(Fault::UnknownSymbol(name.to_owned()).into())
    }

    /// Chained comparison `(op a b c)` as the conjunction of adjacent pairs.
    fn build_chain(
        &mut self,
        op: &str,
        args: Vec<Node>,
    ) -> anyhow::Result<Node> {
        if args.len() < 2 {
            return Err(Fault::ParamMismatch(op.to_owned()).into());
        }
        let mut pairs = Vec::new();
        for w in args.windows(2) {
            let (l, r) = (w[0].clone(), w[1].clone());
            pairs.push(match op {
                "<=" => self.mk_le(l, r)?,
                "<" => self.mk_lt(l, r)?,
                ">=" => self.mk_ge(l, r)?,
                ">" => self.mk_gt(l, r)?,
                _ => unreachable!("not a comparison: {}", op),
            });
        }
        self.mk_and(pairs)
    }

    fn build_term(
        &mut self,
        term: &Term,
        lets: &mut Vec<BTreeMap<String, Node>>,
    ) -> anyhow::Result<Node> {
        match term {
            Term::Constant(Constant::Numeral(n)) => self.mk_const(numeral_to_rational(n)?),
            Term::Constant(Constant::Decimal(d)) => {
                let v = decimal_to_rational(d)?;
                if self.is_lia() && !v.is_integer() {
                    return Err(Fault::Logic(format!(
                        "decimal constant {} under QF_LIA",
                        v
                    ))
                    .into());
                }
                self.mk_const(v)
            }
            Term::Constant(other) => {
                Err(Fault::UnknownSymbol(format!("constant {}", other)).into())
            }
            Term::QualIdentifier(qi) => self.symbol_node(head_symbol(qi)?, lets),
            Term::Application {
                qual_identifier,
                arguments,
            } => {
                let head = head_symbol(qual_identifier)?.to_owned();
                let mut args = Vec::with_capacity(arguments.len());
                for a in arguments {
                    args.push(self.build_term(a, lets)?);
                }
                match head.as_str() {
                    "not" => {
                        if args.len() != 1 {
                            return Err(Fault::ParamMismatch(head).into());
                        }
                        let arg = args.pop().expect("one parameter");
                        if !arg.is_bool() {
                            return Err(Fault::ParamNotBool(head).into());
                        }
                        self.mk_not(arg)
                    }
                    "and" => self.mk_and(args),
                    "or" => self.mk_or(args),
                    "=>" => self.mk_imply(args),
                    "xor" => self.mk_xor(args),
                    "=" => self.mk_eq(args),
                    "distinct" => self.mk_distinct(args),
                    "ite" => {
                        if args.len() != 3 {
                            return Err(Fault::ParamMismatch(head).into());
                        }
                        let e = args.pop().expect("three parameters");
                        let t = args.pop().expect("three parameters");
                        let c = args.pop().expect("three parameters");
                        self.mk_ite(c, t, e)
                    }
                    "+" => self.mk_add(args),
                    "-" => self.mk_minus(args),
                    "*" => self.mk_mul(args),
                    "/" => {
                        if args.len() != 2 {
                            return Err(Fault::ParamMismatch(head).into());
                        }
                        let r = args.pop().expect("two parameters");
                        let l = args.pop().expect("two parameters");
                        self.mk_div(l, r)
                    }
                    "<=" | "<" | ">=" | ">" => self.build_chain(&head, args),
                    _ => Err(Fault::UnknownSymbol(head).into()),
                }
            }
            Term::Let { var_bindings, term } => {
                // SMT-LIB let is parallel: bindings see the outer scope
                let mut scope = BTreeMap::new();
                for (symbol, bound) in var_bindings {
                    let node = self.build_term(bound, lets)?;
                    scope.insert(symbol.0.clone(), node);
                }
                lets.push(scope);
                let result = self.build_term(term, lets);
                lets.pop();
                result
            }
            Term::Forall { .. } | Term::Exists { .. } => {
                Err(Fault::UnknownSymbol("quantifier".to_owned()).into())
            }
            Term::Attributes { term, .. } => self.build_term(term, lets),
            other => Err(Fault::UnknownSymbol(format!("{}", other)).into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::NodeKind;

    fn parse(logic_and_body: &str) -> Solver {
        let mut s = Solver::new();
        s.parse_smtlib2(logic_and_body.as_bytes(), "<test>")
            .expect("parsing");
        s
    }

    #[test]
    fn declarations_and_assertions() {
        let s = parse(
            "(set-logic QF_LRA)
             (declare-fun x () Real)
             (declare-const y Real)
             (declare-const p Bool)
             (assert (<= x y))
             (assert p)
             (check-sat)",
        );
        assert_eq!(s.vnum_list.len(), 2);
        assert_eq!(s.vbool_list.len(), 1);
        assert_eq!(s.ineq_list.len(), 1);
        assert_eq!(s.assert_list.len(), 2);
    }

    #[test]
    fn check_sat_is_reported() {
        let mut s = Solver::new();
        let ran = s
            .parse_smtlib2(
                "(set-logic QF_LRA)(check-sat)".as_bytes(),
                "<test>",
            )
            .unwrap();
        assert!(ran);
        let mut s = Solver::new();
        let ran = s
            .parse_smtlib2("(set-logic QF_LRA)".as_bytes(), "<test>")
            .unwrap();
        assert!(!ran);
    }

    #[test]
    fn let_bindings_are_parallel_and_scoped() {
        let s = parse(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (assert (let ((y (+ x 1))) (<= y 2)))",
        );
        // y = x + 1, so the atom is x <= 1
        assert_eq!(s.ineq_list.len(), 1);
        let atom = s.ineq_list.atom(0);
        assert_eq!(atom.bound, BigRational::from_integer(1.into()));
    }

    #[test]
    fn negative_numerals_and_division() {
        let s = parse(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (assert (<= (- 5) (/ x 2)))",
        );
        assert_eq!(s.ineq_list.len(), 1);
    }

    #[test]
    fn decimals_require_real_logic() {
        let s = parse(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (assert (<= x 0.5))",
        );
        assert_eq!(s.ineq_list.len(), 1);
        let mut s = Solver::new();
        let e = s
            .parse_smtlib2(
                "(set-logic QF_LIA)(declare-const x Int)(assert (<= x 0.5))".as_bytes(),
                "<test>",
            )
            .unwrap_err();
        assert!(matches!(e.downcast_ref::<Fault>(), Some(Fault::Logic(_))));
    }

    #[test]
    fn sort_must_match_logic() {
        let mut s = Solver::new();
        let e = s
            .parse_smtlib2(
                "(set-logic QF_LIA)(declare-const x Real)".as_bytes(),
                "<test>",
            )
            .unwrap_err();
        assert!(matches!(e.downcast_ref::<Fault>(), Some(Fault::Logic(_))));
    }

    #[test]
    fn unknown_symbol_faults() {
        let mut s = Solver::new();
        let e = s
            .parse_smtlib2(
                "(set-logic QF_LRA)(assert (<= z 1))".as_bytes(),
                "<test>",
            )
            .unwrap_err();
        assert_eq!(
            e.downcast_ref::<Fault>(),
            Some(&Fault::UnknownSymbol("z".to_owned()))
        );
    }

    #[test]
    fn nonlinear_input_faults_before_any_dispatch() {
        let mut s = Solver::new();
        let e = s
            .parse_smtlib2(
                "(set-logic QF_LRA)
                 (declare-const x Real)(declare-const y Real)
                 (assert (<= (* x y) 1))"
                    .as_bytes(),
                "<test>",
            )
            .unwrap_err();
        assert!(matches!(
            e.downcast_ref::<Fault>(),
            Some(Fault::Nonlinear(_))
        ));
        assert_eq!(s.stats.vol_calls, 0);
    }

    #[test]
    fn unsupported_commands_are_skipped() {
        let s = parse(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (push 1)
             (assert (<= x 1))
             (pop 1)
             (get-model)
             (check-sat)",
        );
        // push/pop are no-ops: the assertion stays
        assert_eq!(s.assert_list.len(), 1);
    }

    #[test]
    fn chained_comparison() {
        let s = parse(
            "(set-logic QF_LRA)
             (declare-const x Real)
             (assert (<= 0 x 1))",
        );
        assert_eq!(s.ineq_list.len(), 2);
        assert_eq!(s.assert_list[0].kind, NodeKind::And);
    }

    #[test]
    fn comments_and_pipes() {
        let s = parse(
            "; a comment
             (set-logic QF_LRA)
             (declare-const |my var| Real)
             (assert (<= |my var| 1)) ; trailing
            ",
        );
        assert_eq!(s.vnum_list.len(), 1);
        assert_eq!(s.vnum_list.name(0), "my var");
    }

    #[test]
    fn missing_file_is_an_open_fault() {
        let mut s = Solver::new();
        let e = s
            .parse_smtlib2_file(Path::new("/nonexistent/input.smt2"))
            .unwrap_err();
        assert!(matches!(
            e.downcast_ref::<Fault>(),
            Some(Fault::OpenFile(_))
        ));
    }

    #[test]
    fn ite_and_boolean_structure() {
        let s = parse(
            "(set-logic QF_LIA)
             (declare-const x Int)
             (declare-const c Bool)
             (assert (<= (ite c x (- x)) 7))",
        );
        // one atom per branch
        assert_eq!(s.ineq_list.len(), 2);
    }
}
