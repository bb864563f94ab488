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

//! Domain fault kinds

/// A fault of the solver core. All faults are fatal: no local recovery is
/// attempted and no partial result is emitted.
///
/// Carried through `anyhow::Error` so callers can attach source locations
/// with `.context(...)` and still `downcast_ref::<Fault>()` on the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// input ended in the middle of a term
    UnexpectedEof,
    /// a different token was expected at this point
    SymbolMismatch(String),
    /// reference to an undeclared symbol
    UnknownSymbol(String),
    /// wrong number of parameters for an operator
    ParamMismatch(String),
    /// a parameter should have been Boolean
    ParamNotBool(String),
    /// a parameter should have been numeric
    ParamNotNum(String),
    /// parameters of mixed Boolean/numeric sorts
    ParamNotSame(String),
    /// command or sort inconsistent with the declared logic
    Logic(String),
    /// symbol declared twice
    MultipleDecl(String),
    /// symbol defined twice
    MultipleDef(String),
    /// nonlinear arithmetic (variable times variable, variable divisor)
    Nonlinear(String),
    /// division by the constant zero
    ZeroDivisor,
    /// DAG mutation attempted after the oracle was initialized
    SolvingInitialized,
    /// a sub-polytope has an unbounded dimension and the back-end is exact
    UnboundedPolytope,
    /// LattE-style lattice counting applied outside QF_LIA
    LogicLatte,
    /// Vinci-style volume computation applied outside QF_LRA
    LogicVinci,
    /// PolyVest estimation applied outside QF_LRA
    LogicPolyvest,
    /// input file cannot be opened
    OpenFile(String),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Fault::UnexpectedEof => write!(f, "unexpected end of file"),
            Fault::SymbolMismatch(s) => write!(f, "unexpected token near {}", s),
            Fault::UnknownSymbol(s) => write!(f, "unknown symbol {}", s),
            Fault::ParamMismatch(s) => write!(f, "wrong number of parameters for {}", s),
            Fault::ParamNotBool(s) => write!(f, "parameter of {} is not Boolean", s),
            Fault::ParamNotNum(s) => write!(f, "parameter of {} is not numeric", s),
            Fault::ParamNotSame(s) => write!(f, "parameters of {} have mixed sorts", s),
            Fault::Logic(s) => write!(f, "inconsistent with the declared logic: {}", s),
            Fault::MultipleDecl(s) => write!(f, "symbol {} declared twice", s),
            Fault::MultipleDef(s) => write!(f, "symbol {} defined twice", s),
            Fault::Nonlinear(s) => write!(f, "nonlinear term {}", s),
            Fault::ZeroDivisor => write!(f, "division by zero"),
            Fault::SolvingInitialized => {
                write!(f, "constraints cannot change once solving is initialized")
            }
            Fault::UnboundedPolytope => write!(f, "polytope is unbounded"),
            Fault::LogicLatte => write!(f, "lattice counting requires QF_LIA"),
            Fault::LogicVinci => write!(f, "volume computation requires QF_LRA"),
            Fault::LogicPolyvest => write!(f, "volume estimation requires QF_LRA"),
            Fault::OpenFile(s) => write!(f, "cannot open {}", s),
        }
    }
}

impl std::error::Error for Fault {}

#[test]
fn downcast_through_anyhow() {
    let e: anyhow::Error = Fault::ZeroDivisor.into();
    let e = e.context("parsing line 3");
    assert_eq!(e.downcast_ref::<Fault>(), Some(&Fault::ZeroDivisor));
}
