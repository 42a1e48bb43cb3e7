// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use crate::graph::{Graph, NodeId, NodeKind};

/// Decides whether a node's value is independent of time and state.
///
/// A node is constant iff it is a constant leaf, or it is an evaluable
/// interior node whose children are all constant.  Answers are cached per
/// node so shared subtrees are only classified once.
pub struct ConstantClassifier<'g> {
    graph: &'g Graph,
    cache: HashMap<NodeId, bool>,
}

impl<'g> ConstantClassifier<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        ConstantClassifier {
            graph,
            cache: HashMap::new(),
        }
    }

    pub fn is_constant(&mut self, root: NodeId) -> bool {
        if let Some(&known) = self.cache.get(&root) {
            return known;
        }

        let graph = self.graph;
        // children are classified before their parents
        let mut stack = vec![(root, false)];
        while let Some((id, children_done)) = stack.pop() {
            if self.cache.contains_key(&id) {
                continue;
            }
            let node = graph.node(id);
            let leaf = match node.kind() {
                NodeKind::Constant(_) => Some(true),
                NodeKind::StateVector(_) | NodeKind::Time => Some(false),
                kind if !kind.is_evaluable() => Some(false),
                _ => None,
            };
            if let Some(answer) = leaf {
                self.cache.insert(id, answer);
                continue;
            }

            if children_done {
                let answer = node.children().iter().all(|c| self.cache[c]);
                self.cache.insert(id, answer);
            } else {
                stack.push((id, true));
                for &child in node.children().iter().rev() {
                    if !self.cache.contains_key(&child) {
                        stack.push((child, false));
                    }
                }
            }
        }

        self.cache[&root]
    }
}
