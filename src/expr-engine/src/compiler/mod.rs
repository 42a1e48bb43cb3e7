// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Compiles an expression graph into a linear program.
//!
//! The linearizer walks the graph once in post-order.  Constant subtrees are
//! evaluated up front and land in the constant table; every other node
//! becomes exactly one instruction, emitted after the instructions of all of
//! its children.  Because node identity is structural, a subtree that is
//! shared N times is compiled once and referenced N times.

mod classify;
mod codegen;
pub mod pretty;

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::debug;

use crate::bytecode::{Constant, ConstantTable, Program, Ref};
use crate::common::Result;
use crate::compile_err;
use crate::graph::{Graph, NodeId};
use crate::interpreter::Interpreter;
use crate::vm::Artifact;

pub use self::classify::ConstantClassifier;
use self::codegen::codegen;

struct Linearizer<'g> {
    graph: &'g Graph,
    classifier: ConstantClassifier<'g>,
    // evaluates constant subtrees; it has neither a time nor a state
    interpreter: Interpreter<'g>,
    constants: ConstantTable,
    program: Program,
    memo: HashMap<NodeId, Ref>,
}

impl<'g> Linearizer<'g> {
    fn new(graph: &'g Graph) -> Self {
        Linearizer {
            graph,
            classifier: ConstantClassifier::new(graph),
            interpreter: Interpreter::new(graph, None, None),
            constants: ConstantTable::default(),
            program: Program::default(),
            memo: HashMap::new(),
        }
    }

    fn linearize(&mut self, root: NodeId) -> Result<Ref> {
        let graph = self.graph;
        let mut stack = vec![(root, false)];

        while let Some((id, children_done)) = stack.pop() {
            if self.memo.contains_key(&id) {
                continue;
            }
            let node = graph.node(id);

            if !children_done {
                if self.classifier.is_constant(id) {
                    let value = self.interpreter.evaluate(id)?;
                    debug!(node = %id, kind = %node.kind(), value = %value, "constant");
                    let cid = self.constants.insert(id, Constant::Value(value));
                    self.memo.insert(id, Ref::Const(cid));
                    continue;
                }
                stack.push((id, true));
                // reversed, so the first declared child is linearized first
                for &child in node.children().iter().rev() {
                    if !self.memo.contains_key(&child) {
                        stack.push((child, false));
                    }
                }
                continue;
            }

            let args: SmallVec<[Ref; 4]> = node.children().iter().map(|c| self.memo[c]).collect();
            let op = codegen(id, node.kind(), &args, &mut self.constants)?;
            debug!(node = %id, kind = %node.kind(), "instruction");
            let var = self.program.push(id, op);
            self.memo.insert(id, Ref::Var(var));
        }

        Ok(self.memo[&root])
    }
}

/// Compiles the subgraph reachable from `root` into an executable artifact.
pub fn compile(graph: &Graph, root: NodeId) -> Result<Artifact> {
    if !graph.contains(root) {
        return compile_err!(
            Generic,
            format!("node {root} is not part of a graph of {} nodes", graph.len())
        );
    }

    let mut linearizer = Linearizer::new(graph);
    let result = linearizer.linearize(root)?;
    let Linearizer {
        constants, program, ..
    } = linearizer;

    debug!(
        root = %root,
        constants = constants.len(),
        instructions = program.len(),
        "compiled graph"
    );

    Ok(Artifact::new(constants, program, root, result))
}
