// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use nalgebra::DMatrix;

use crate::common::Result;
use crate::eval_err;
use crate::graph::{Concatenation, Graph, NodeId, NodeKind};
use crate::ops;
use crate::value::Value;

/// Evaluates a graph by walking it directly.  This is the reference the
/// compiled program must agree with; the compiler also uses it to evaluate
/// constant subtrees.
pub struct Interpreter<'a> {
    graph: &'a Graph,
    t: Option<f64>,
    y: Option<&'a DMatrix<f64>>,
    known_evals: HashMap<NodeId, Value>,
}

impl<'a> Interpreter<'a> {
    pub fn new(graph: &'a Graph, t: Option<f64>, y: Option<&'a DMatrix<f64>>) -> Self {
        Interpreter {
            graph,
            t,
            y,
            known_evals: HashMap::new(),
        }
    }

    /// Evaluates `root`, reusing any values computed by earlier calls.
    /// Post-order over an explicit stack.
    pub fn evaluate(&mut self, root: NodeId) -> Result<Value> {
        let graph = self.graph;
        let mut stack = vec![(root, false)];

        while let Some((id, children_done)) = stack.pop() {
            if self.known_evals.contains_key(&id) {
                continue;
            }
            if children_done {
                let value = self.eval(id)?;
                self.known_evals.insert(id, value);
            } else {
                stack.push((id, true));
                for &child in graph.node(id).children().iter().rev() {
                    if !self.known_evals.contains_key(&child) {
                        stack.push((child, false));
                    }
                }
            }
        }

        Ok(self.known_evals[&root].clone())
    }

    fn arg(&self, id: NodeId) -> &Value {
        &self.known_evals[&id]
    }

    // children of `id` must already be in `known_evals`
    fn eval(&self, id: NodeId) -> Result<Value> {
        let node = self.graph.node(id);
        let children = node.children();

        let value = match node.kind() {
            NodeKind::Constant(v) => v.clone(),
            NodeKind::Binary(op) => ops::binary(*op, self.arg(children[0]), self.arg(children[1]))?,
            NodeKind::Unary(op) => ops::unary(*op, self.arg(children[0])),
            NodeKind::Function(func) => ops::apply(*func, self.arg(children[0])),
            NodeKind::Index(rows) => ops::index(self.arg(children[0]), rows)?,
            NodeKind::Concatenation(Concatenation::Plain) if children.len() == 1 => {
                self.arg(children[0]).clone()
            }
            NodeKind::Concatenation(Concatenation::Plain) => {
                ops::concatenate(&self.args(children))?
            }
            NodeKind::Concatenation(Concatenation::SparseStack) => {
                ops::vstack(&self.args(children))?
            }
            NodeKind::Concatenation(Concatenation::DomainOrdered(_)) if children.len() == 1 => {
                self.arg(children[0]).clone()
            }
            NodeKind::Concatenation(Concatenation::DomainOrdered(layout)) => {
                let args = self.args(children);
                let parts: Vec<_> = layout
                    .ordered_parts()?
                    .into_iter()
                    .map(|(child, rows)| (args[child], rows))
                    .collect();
                ops::domain_concatenate(&parts)?
            }
            NodeKind::StateVector(rows) => match self.y {
                Some(y) => ops::state_vector(y, rows)?,
                None => {
                    return eval_err!(
                        MissingInput,
                        format!("y[{}:{}] needs a state vector", rows.start, rows.end)
                    );
                }
            },
            NodeKind::Time => match self.t {
                Some(t) => Value::Scalar(t),
                None => return eval_err!(MissingInput, "t needs a time".to_string()),
            },
            kind @ (NodeKind::Variable(_)
            | NodeKind::SpatialOperator(_)
            | NodeKind::Concatenation(Concatenation::Symbolic)) => {
                return eval_err!(
                    UnsupportedOperation,
                    format!("cannot evaluate a node of kind {kind}")
                );
            }
        };

        Ok(value)
    }

    fn args(&self, ids: &[NodeId]) -> Vec<&Value> {
        ids.iter().map(|id| self.arg(*id)).collect()
    }
}
