// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;
use std::ops::Range;

use smallvec::{SmallVec, smallvec};

use crate::builtins::FuncHandle;
use crate::graph::{BinaryOp, NodeId, UnaryOp};
use crate::value::Value;

pub type ConstId = u32; // index into the constant table
pub type VarId = u32; // index into the program, and into the per-call slots

/// A resolved operand.  Constants and computed values live in different
/// tables, and an instruction always knows which one it reads from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ref {
    Const(ConstId),
    Var(VarId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constant {
    Value(Value),
    Function(FuncHandle),
}

#[derive(Clone, Debug, Default)]
pub struct ConstantTable {
    entries: Vec<(NodeId, Constant)>,
    by_id: HashMap<NodeId, ConstId>,
}

impl ConstantTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Looks up the constant stored for node `id`.
    pub fn get(&self, id: NodeId) -> Option<&Constant> {
        self.by_id.get(&id).map(|&cid| &self.entries[cid as usize].1)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(NodeId, Constant)> {
        self.entries.iter()
    }

    pub(crate) fn insert(&mut self, id: NodeId, constant: Constant) -> ConstId {
        if let Some(&cid) = self.by_id.get(&id) {
            return cid;
        }
        let cid = self.entries.len() as ConstId;
        self.entries.push((id, constant));
        self.by_id.insert(id, cid);
        cid
    }

    pub(crate) fn entry(&self, cid: ConstId) -> &(NodeId, Constant) {
        &self.entries[cid as usize]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Binary { op: BinaryOp, lhs: Ref, rhs: Ref },
    // sparse-first elementwise product; representation checked per call
    Multiply { lhs: Ref, rhs: Ref },
    // sparse-first elementwise quotient
    Divide { lhs: Ref, rhs: Ref },
    Unary { op: UnaryOp, arg: Ref },
    Call { func: ConstId, arg: Ref },
    Index { arg: Ref, rows: Range<usize> },
    Concat { args: Vec<Ref> },
    SparseStack { args: Vec<Ref> },
    // parts are already in output order
    DomainConcat { parts: Vec<(Ref, Range<usize>)> },
    Pass(Ref),
    LoadState(Range<usize>),
    LoadTime,
}

impl Op {
    /// Every value this op reads, not counting the function handle of a
    /// `Call`.
    pub fn operands(&self) -> SmallVec<[Ref; 2]> {
        match self {
            Op::Binary { lhs, rhs, .. } | Op::Multiply { lhs, rhs } | Op::Divide { lhs, rhs } => {
                smallvec![*lhs, *rhs]
            }
            Op::Unary { arg, .. } | Op::Call { arg, .. } | Op::Index { arg, .. } | Op::Pass(arg) => {
                smallvec![*arg]
            }
            Op::Concat { args } | Op::SparseStack { args } => args.iter().copied().collect(),
            Op::DomainConcat { parts } => parts.iter().map(|(r, _)| *r).collect(),
            Op::LoadState(_) | Op::LoadTime => SmallVec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub id: NodeId,
    pub op: Op,
}

/// The instructions of a compiled graph in execution order.  Instruction
/// `i` writes slot `i`, and only reads slots below `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    code: Vec<Instruction>,
    by_id: HashMap<NodeId, VarId>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.code
    }

    /// The instruction emitted for node `id`, if it was not a constant.
    pub fn get(&self, id: NodeId) -> Option<&Instruction> {
        self.by_id.get(&id).map(|&var| &self.code[var as usize])
    }

    pub(crate) fn push(&mut self, id: NodeId, op: Op) -> VarId {
        let var = self.code.len() as VarId;
        self.code.push(Instruction { id, op });
        self.by_id.insert(id, var);
        var
    }
}
