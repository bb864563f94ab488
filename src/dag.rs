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

//! DAG node handles and value tables

use num_rational::BigRational;
use num_traits::{One, Zero};
use std::collections::BTreeMap;

/// The kind of a DAG node.
///
/// `Mul` and `Div` are listed for completeness but are never allocated:
/// multiplication by a constant and division by a non-zero constant always
/// fold into the handle's scale multiplier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// placeholder for an invalid node
    Error,
    /// Boolean constant
    ConstBool,
    /// numeric constant
    ConstNum,
    /// declared Boolean variable
    VarBool,
    /// declared numeric variable
    VarNum,
    /// interned atomic inequality
    Ineq,
    /// Boolean conjunction
    And,
    /// Boolean disjunction
    Or,
    /// equality operator (normalized away at construction)
    Eq,
    /// if-then-else at Boolean sort (normalized away at construction)
    IteBool,
    /// if-then-else at numeric sort
    IteNum,
    /// numeric addition
    Add,
    /// numeric multiplication (temporary, folded into scales)
    Mul,
    /// numeric division (temporary, folded into scales)
    Div,
}

/// A handle to a DAG node.
///
/// Nodes are interned in append-only tables; a handle carries the table kind
/// and index plus a by-value payload:
///
/// * `value` is the literal for constants, and for `Add` operators the
///   additive offset coalesced during construction;
/// * `negated` is the Boolean polarity, so `NOT n` never allocates;
/// * `scale` is the multiplier of numeric-sorted handles; a handle denotes
///   `scale * (node + value)`.
///
/// Equality compares kind and table index only: `value`, `negated` and
/// `scale` are not part of identity.
#[derive(Clone, Debug)]
pub struct Node {
    /// table selector
    pub kind: NodeKind,
    /// index into the table selected by `kind`; unused for constants
    pub id: usize,
    /// constant literal, or additive offset for `Add`
    pub value: BigRational,
    /// Boolean polarity
    pub negated: bool,
    /// numeric multiplier; always 1 for numeric constants
    pub scale: BigRational,
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for Node {}

impl Node {
    fn leaf(kind: NodeKind, id: usize) -> Node {
        Node {
            kind,
            id,
            value: BigRational::zero(),
            negated: false,
            scale: BigRational::one(),
        }
    }

    /// The Boolean constant `true`.
    pub fn true_() -> Node {
        Node {
            value: BigRational::one(),
            ..Node::leaf(NodeKind::ConstBool, 0)
        }
    }

    /// The Boolean constant `false`.
    pub fn false_() -> Node {
        Node::leaf(NodeKind::ConstBool, 0)
    }

    /// A Boolean constant.
    pub fn const_bool(b: bool) -> Node {
        if b {
            Node::true_()
        } else {
            Node::false_()
        }
    }

    /// A numeric constant.
    pub fn const_num(value: BigRational) -> Node {
        Node {
            value,
            ..Node::leaf(NodeKind::ConstNum, 0)
        }
    }

    /// A declared Boolean variable.
    pub fn var_bool(id: usize) -> Node {
        Node::leaf(NodeKind::VarBool, id)
    }

    /// A declared numeric variable.
    pub fn var_num(id: usize) -> Node {
        Node::leaf(NodeKind::VarNum, id)
    }

    /// An interned atomic inequality.
    pub fn ineq(id: usize) -> Node {
        Node::leaf(NodeKind::Ineq, id)
    }

    /// An operator node.
    pub fn op(kind: NodeKind, id: usize) -> Node {
        Node::leaf(kind, id)
    }

    /// An `Add` operator node carrying its constant offset.
    pub fn add_op(id: usize, offset: BigRational) -> Node {
        Node {
            value: offset,
            ..Node::leaf(NodeKind::Add, id)
        }
    }

    /// Boolean constant handle?
    pub fn is_const_bool(&self) -> bool {
        self.kind == NodeKind::ConstBool
    }
    /// Numeric constant handle?
    pub fn is_const_num(&self) -> bool {
        self.kind == NodeKind::ConstNum
    }
    /// Constant handle of either sort?
    pub fn is_const(&self) -> bool {
        self.is_const_bool() || self.is_const_num()
    }
    /// Declared Boolean variable?
    pub fn is_var_bool(&self) -> bool {
        self.kind == NodeKind::VarBool
    }
    /// Declared numeric variable?
    pub fn is_var_num(&self) -> bool {
        self.kind == NodeKind::VarNum
    }
    /// Atomic inequality handle?
    pub fn is_ineq(&self) -> bool {
        self.kind == NodeKind::Ineq
    }
    /// Error placeholder?
    pub fn is_error(&self) -> bool {
        self.kind == NodeKind::Error
    }

    /// Whether the handle denotes a Boolean-sorted term.
    pub fn is_bool(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::ConstBool
                | NodeKind::VarBool
                | NodeKind::Ineq
                | NodeKind::And
                | NodeKind::Or
                | NodeKind::Eq
                | NodeKind::IteBool
        )
    }

    /// Whether the handle denotes a numeric-sorted term.
    pub fn is_num(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::ConstNum | NodeKind::VarNum | NodeKind::Add | NodeKind::IteNum
        )
    }

    /// Whether the handle points into an operator table.
    pub fn is_op(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::And | NodeKind::Or | NodeKind::Eq | NodeKind::IteBool | NodeKind::IteNum | NodeKind::Add
        )
    }

    /// Logical negation: flips the polarity, no allocation.
    pub fn not(&self) -> Node {
        let mut n = self.clone();
        n.negated = !n.negated;
        n
    }

    /// Scales a numeric handle. For constants the factor folds into the
    /// literal so that `scale` stays 1 on them; a zero factor collapses the
    /// handle to the constant zero.
    pub fn scaled(&self, k: &BigRational) -> Node {
        if k.is_zero() {
            return Node::const_num(BigRational::zero());
        }
        let mut n = self.clone();
        if n.kind == NodeKind::ConstNum {
            n.value *= k;
        } else {
            n.scale *= k;
        }
        n
    }

    /// Value of a Boolean constant handle, polarity included.
    pub fn bool_value(&self) -> bool {
        debug_assert!(self.is_const_bool());
        !self.value.is_zero() != self.negated
    }

    /// Value of a numeric constant handle.
    pub fn num_value(&self) -> BigRational {
        debug_assert!(self.is_const_num());
        self.value.clone()
    }
}

/// A three-valued truth value, used as the evaluation state of nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriBool {
    /// not evaluated, or free
    Unknown,
    /// evaluated to true
    True,
    /// evaluated to false
    False,
}

impl TriBool {
    /// Lifts a decided Boolean.
    pub fn from_bool(b: bool) -> TriBool {
        if b {
            TriBool::True
        } else {
            TriBool::False
        }
    }

    /// Not evaluated, or free?
    pub fn is_unknown(self) -> bool {
        self == TriBool::Unknown
    }
    /// Decided true?
    pub fn is_true(self) -> bool {
        self == TriBool::True
    }
    /// Decided false?
    pub fn is_false(self) -> bool {
        self == TriBool::False
    }

    /// Negation; unknown stays unknown.
    pub fn negate(self) -> TriBool {
        match self {
            TriBool::Unknown => TriBool::Unknown,
            TriBool::True => TriBool::False,
            TriBool::False => TriBool::True,
        }
    }

    /// Applies a handle's polarity to this value.
    pub fn with_polarity(self, negated: bool) -> TriBool {
        if negated {
            self.negate()
        } else {
            self
        }
    }
}

/// An append-only table of declared variables: names, a name index and the
/// current evaluation state of each entry.
#[derive(Debug, Default, Clone)]
pub struct VarTable {
    names: Vec<String>,
    index: BTreeMap<String, usize>,
    vals: Vec<TriBool>,
}

impl VarTable {
    /// An empty table.
    pub fn new() -> VarTable {
        VarTable::default()
    }

    /// Number of declared variables.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Declares a name. Returns its index, or `None` if already present.
    pub fn push(&mut self, name: &str) -> Option<usize> {
        if self.index.contains_key(name) {
            return None;
        }
        let id = self.names.len();
        self.index.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        self.vals.push(TriBool::Unknown);
        Some(id)
    }

    /// Index of a declared name.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Name of an entry.
    pub fn name(&self, id: usize) -> &str {
        &self.names[id]
    }

    /// Current evaluation state of an entry.
    pub fn val(&self, id: usize) -> TriBool {
        self.vals[id]
    }

    /// Sets the evaluation state of an entry.
    pub fn set_val(&mut self, id: usize, val: TriBool) {
        self.vals[id] = val;
    }

    /// Resets all evaluation states to unknown.
    pub fn init_vals(&mut self) {
        for v in self.vals.iter_mut() {
            *v = TriBool::Unknown;
        }
    }
}

/// An append-only table of operator nodes: kind, children (order significant
/// for if-then-else) and a cached evaluation slot per entry.
#[derive(Debug, Default, Clone)]
pub struct OpTable {
    kinds: Vec<NodeKind>,
    children: Vec<Vec<Node>>,
    vals: Vec<TriBool>,
}

impl OpTable {
    /// An empty table.
    pub fn new() -> OpTable {
        OpTable::default()
    }

    /// Number of operator nodes.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Appends an operator node, returning its index.
    pub fn push(&mut self, kind: NodeKind, children: Vec<Node>) -> usize {
        let id = self.kinds.len();
        self.kinds.push(kind);
        self.children.push(children);
        self.vals.push(TriBool::Unknown);
        id
    }

    /// Kind of an entry.
    pub fn kind(&self, id: usize) -> NodeKind {
        self.kinds[id]
    }

    /// Children of an entry, in construction order.
    pub fn children(&self, id: usize) -> &[Node] {
        &self.children[id]
    }

    /// Cached evaluation of an entry.
    pub fn val(&self, id: usize) -> TriBool {
        self.vals[id]
    }

    /// Sets the cached evaluation of an entry.
    pub fn set_val(&mut self, id: usize, val: TriBool) {
        self.vals[id] = val;
    }

    /// Resets all cached evaluations to unknown.
    pub fn init_vals(&mut self) {
        for v in self.vals.iter_mut() {
            *v = TriBool::Unknown;
        }
    }
}
