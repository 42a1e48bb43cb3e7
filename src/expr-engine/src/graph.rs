// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The expression graph consumed by the compiler.
//!
//! Nodes live in an append-only arena and are hash-consed on insertion:
//! building a node that is structurally equal to an existing one (same kind,
//! same metadata, same children) returns the existing `NodeId`.  Identity is
//! therefore structural, and a sub-expression used in N places is a single
//! node.  Children are always created before their parents, so ids are a
//! valid topological order and the graph cannot contain cycles.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use nalgebra::DMatrix;
use smallvec::{SmallVec, smallvec};
use sprs::CsMat;

use crate::builtins::{self, FuncHandle};
use crate::common::Result;
use crate::compile_err;
use crate::interpreter::Interpreter;
use crate::value::Value;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:05}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    MatMul,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
            BinaryOp::MatMul => "@",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sign,
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Abs => "abs",
            UnaryOp::Sign => "sign",
        }
    }
}

/// Operators that only make sense before spatial discretisation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SpatialOp {
    Gradient,
    Divergence,
}

impl SpatialOp {
    pub fn name(&self) -> &'static str {
        match self {
            SpatialOp::Gradient => "grad",
            SpatialOp::Divergence => "div",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DomainSlice {
    pub domain: String,
    pub range: Range<usize>,
}

impl DomainSlice {
    pub fn new(domain: impl Into<String>, range: Range<usize>) -> Self {
        DomainSlice {
            domain: domain.into(),
            range,
        }
    }
}

/// Placement metadata for a domain-ordered concatenation.
///
/// `slices` gives, per named domain, where that domain lands in the final
/// output.  `children_slices[i]` gives, per named domain, which rows of
/// child `i`'s own output belong to that domain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DomainLayout {
    pub slices: Vec<DomainSlice>,
    pub children_slices: Vec<Vec<DomainSlice>>,
}

impl DomainLayout {
    fn final_slice(&self, domain: &str) -> Option<&Range<usize>> {
        self.slices
            .iter()
            .find(|s| s.domain == domain)
            .map(|s| &s.range)
    }

    /// Returns `(child position, rows of that child)` pairs in the order they
    /// appear in the final output, which need not match the order the
    /// children were declared in.
    pub fn ordered_parts(&self) -> Result<Vec<(usize, Range<usize>)>> {
        let mut parts = Vec::new();
        for (child, slices) in self.children_slices.iter().enumerate() {
            for slice in slices {
                let Some(target) = self.final_slice(&slice.domain) else {
                    return compile_err!(
                        UnknownDomain,
                        format!(
                            "child {child} covers domain '{}', which has no place in the output",
                            slice.domain
                        )
                    );
                };
                parts.push((target.start, child, slice.range.clone()));
            }
        }
        // stable, so equal starts keep declaration order
        parts.sort_by_key(|(start, _, _)| *start);
        Ok(parts
            .into_iter()
            .map(|(_, child, range)| (child, range))
            .collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Concatenation {
    /// Rows of every child, in declaration order.
    Plain,
    /// Sparse vertical stack, in declaration order.
    SparseStack,
    DomainOrdered(DomainLayout),
    /// A concatenation over domains that has not been discretised yet.
    Symbolic,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Constant(Value),
    Binary(BinaryOp),
    Unary(UnaryOp),
    Function(FuncHandle),
    Index(Range<usize>),
    Concatenation(Concatenation),
    StateVector(Range<usize>),
    Time,
    Variable(String),
    SpatialOperator(SpatialOp),
}

impl NodeKind {
    /// False for kinds that have no numeric meaning until the model has
    /// been discretised.
    pub fn is_evaluable(&self) -> bool {
        !matches!(
            self,
            NodeKind::Variable(_)
                | NodeKind::SpatialOperator(_)
                | NodeKind::Concatenation(Concatenation::Symbolic)
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeKind::Constant(v) => write!(f, "constant {}", v.describe()),
            NodeKind::Binary(op) => write!(f, "binary operator '{}'", op.symbol()),
            NodeKind::Unary(op) => write!(f, "unary operator '{}'", op.name()),
            NodeKind::Function(func) => write!(f, "function '{func}'"),
            NodeKind::Index(r) => write!(f, "index [{}:{}]", r.start, r.end),
            NodeKind::Concatenation(Concatenation::Plain) => write!(f, "concatenation"),
            NodeKind::Concatenation(Concatenation::SparseStack) => write!(f, "sparse stack"),
            NodeKind::Concatenation(Concatenation::DomainOrdered(_)) => {
                write!(f, "domain concatenation")
            }
            NodeKind::Concatenation(Concatenation::Symbolic) => {
                write!(f, "symbolic concatenation")
            }
            NodeKind::StateVector(r) => write!(f, "state vector y[{}:{}]", r.start, r.end),
            NodeKind::Time => write!(f, "time"),
            NodeKind::Variable(name) => write!(f, "variable '{name}'"),
            NodeKind::SpatialOperator(op) => write!(f, "spatial operator '{}'", op.name()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    kind: NodeKind,
    children: SmallVec<[NodeId; 2]>,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    interned: HashMap<Node, NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Panics if `id` was not produced by this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn intern(&mut self, kind: NodeKind, children: SmallVec<[NodeId; 2]>) -> NodeId {
        debug_assert!(children.iter().all(|c| self.contains(*c)));
        let node = Node { kind, children };
        if let Some(&id) = self.interned.get(&node) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.interned.insert(node.clone(), id);
        self.nodes.push(node);
        id
    }

    pub fn constant(&mut self, value: Value) -> NodeId {
        self.intern(NodeKind::Constant(value), SmallVec::new())
    }

    pub fn scalar(&mut self, n: f64) -> NodeId {
        self.constant(Value::Scalar(n))
    }

    pub fn vector(&mut self, data: &[f64]) -> NodeId {
        self.constant(Value::column(data))
    }

    pub fn matrix(&mut self, m: DMatrix<f64>) -> NodeId {
        self.constant(Value::Dense(m))
    }

    pub fn sparse(&mut self, m: CsMat<f64>) -> NodeId {
        self.constant(Value::sparse(m))
    }

    pub fn state_vector(&mut self, rows: Range<usize>) -> NodeId {
        self.intern(NodeKind::StateVector(rows), SmallVec::new())
    }

    pub fn time(&mut self) -> NodeId {
        self.intern(NodeKind::Time, SmallVec::new())
    }

    pub fn variable(&mut self, name: &str) -> NodeId {
        self.intern(NodeKind::Variable(name.to_owned()), SmallVec::new())
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.intern(NodeKind::Binary(op), smallvec![lhs, rhs])
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn pow(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::Pow, lhs, rhs)
    }

    pub fn matmul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(BinaryOp::MatMul, lhs, rhs)
    }

    pub fn unary(&mut self, op: UnaryOp, child: NodeId) -> NodeId {
        self.intern(NodeKind::Unary(op), smallvec![child])
    }

    pub fn neg(&mut self, child: NodeId) -> NodeId {
        self.unary(UnaryOp::Neg, child)
    }

    pub fn abs(&mut self, child: NodeId) -> NodeId {
        self.unary(UnaryOp::Abs, child)
    }

    pub fn function(&mut self, func: FuncHandle, child: NodeId) -> NodeId {
        self.intern(NodeKind::Function(func), smallvec![child])
    }

    /// Applies a builtin function by name.
    pub fn apply(&mut self, name: &str, child: NodeId) -> Result<NodeId> {
        match builtins::lookup(name) {
            Some(func) => Ok(self.function(func, child)),
            None => compile_err!(UnknownFunction, format!("no builtin function '{name}'")),
        }
    }

    pub fn index(&mut self, child: NodeId, rows: Range<usize>) -> NodeId {
        self.intern(NodeKind::Index(rows), smallvec![child])
    }

    pub fn concatenation(&mut self, children: &[NodeId]) -> NodeId {
        self.intern(
            NodeKind::Concatenation(Concatenation::Plain),
            children.iter().copied().collect(),
        )
    }

    pub fn sparse_stack(&mut self, children: &[NodeId]) -> NodeId {
        self.intern(
            NodeKind::Concatenation(Concatenation::SparseStack),
            children.iter().copied().collect(),
        )
    }

    pub fn symbolic_concatenation(&mut self, children: &[NodeId]) -> NodeId {
        self.intern(
            NodeKind::Concatenation(Concatenation::Symbolic),
            children.iter().copied().collect(),
        )
    }

    /// Builds a concatenation whose output is laid out by domain.  Each
    /// child comes with the domains it covers and the rows of its own output
    /// holding each of them; `slices` places every domain in the output.
    pub fn domain_concatenation(
        &mut self,
        children: Vec<(NodeId, Vec<DomainSlice>)>,
        slices: Vec<DomainSlice>,
    ) -> Result<NodeId> {
        let (ids, children_slices): (SmallVec<[NodeId; 2]>, Vec<Vec<DomainSlice>>) =
            children.into_iter().unzip();
        let layout = DomainLayout {
            slices,
            children_slices,
        };
        // surfaces unknown domains
        layout.ordered_parts()?;
        for child_slice in layout.children_slices.iter().flatten() {
            let target_len = layout
                .final_slice(&child_slice.domain)
                .map(|r| r.len())
                .unwrap_or_default();
            if target_len != child_slice.range.len() {
                return compile_err!(
                    ShapeMismatch,
                    format!(
                        "domain '{}' has {} rows in the output but {} in its child",
                        child_slice.domain,
                        target_len,
                        child_slice.range.len()
                    )
                );
            }
        }
        Ok(self.intern(
            NodeKind::Concatenation(Concatenation::DomainOrdered(layout)),
            ids,
        ))
    }

    pub fn gradient(&mut self, child: NodeId) -> NodeId {
        self.intern(
            NodeKind::SpatialOperator(SpatialOp::Gradient),
            smallvec![child],
        )
    }

    pub fn divergence(&mut self, child: NodeId) -> NodeId {
        self.intern(
            NodeKind::SpatialOperator(SpatialOp::Divergence),
            smallvec![child],
        )
    }

    /// Evaluates `root` by walking the graph directly.  A flat state is
    /// treated as a column vector.
    pub fn evaluate(&self, root: NodeId, t: Option<f64>, y: Option<&[f64]>) -> Result<Value> {
        let y = y.map(|y| DMatrix::from_column_slice(y.len(), 1, y));
        Interpreter::new(self, t, y.as_ref()).evaluate(root)
    }
}
