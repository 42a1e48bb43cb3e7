// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use crate::bytecode::{Constant, ConstantTable, Op, Ref};
use crate::common::Result;
use crate::compile_err;
use crate::graph::{BinaryOp, Concatenation, NodeId, NodeKind};

/// Turns one non-constant node into one op, given references to its
/// already-linearized children.  Function nodes also register their handle
/// in `constants` under the node's own id.
pub(super) fn codegen(
    id: NodeId,
    kind: &NodeKind,
    args: &[Ref],
    constants: &mut ConstantTable,
) -> Result<Op> {
    let op = match kind {
        NodeKind::Binary(BinaryOp::Mul) => Op::Multiply {
            lhs: args[0],
            rhs: args[1],
        },
        NodeKind::Binary(BinaryOp::Div) => Op::Divide {
            lhs: args[0],
            rhs: args[1],
        },
        NodeKind::Binary(op) => Op::Binary {
            op: *op,
            lhs: args[0],
            rhs: args[1],
        },
        NodeKind::Unary(op) => Op::Unary {
            op: *op,
            arg: args[0],
        },
        NodeKind::Function(func) => {
            let func = constants.insert(id, Constant::Function(*func));
            Op::Call { func, arg: args[0] }
        }
        NodeKind::Index(rows) => Op::Index {
            arg: args[0],
            rows: rows.clone(),
        },
        NodeKind::Concatenation(Concatenation::Plain) => {
            if args.len() == 1 {
                Op::Pass(args[0])
            } else {
                Op::Concat {
                    args: args.to_vec(),
                }
            }
        }
        NodeKind::Concatenation(Concatenation::SparseStack) => Op::SparseStack {
            args: args.to_vec(),
        },
        NodeKind::Concatenation(Concatenation::DomainOrdered(layout)) => {
            if args.len() == 1 {
                Op::Pass(args[0])
            } else {
                let parts = layout
                    .ordered_parts()?
                    .into_iter()
                    .map(|(child, rows)| (args[child], rows))
                    .collect();
                Op::DomainConcat { parts }
            }
        }
        NodeKind::StateVector(rows) => Op::LoadState(rows.clone()),
        NodeKind::Time => Op::LoadTime,
        // constants never reach codegen; the rest have no numeric meaning
        NodeKind::Constant(_)
        | NodeKind::Variable(_)
        | NodeKind::SpatialOperator(_)
        | NodeKind::Concatenation(Concatenation::Symbolic) => {
            return compile_err!(
                UnsupportedOperation,
                format!("not implemented for a node of kind {kind}")
            );
        }
    };

    Ok(op)
}
