// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;

use crate::bytecode::{ConstantTable, Op, Program, Ref};
use crate::graph::UnaryOp;
use crate::vm::Artifact;

fn ref_name(constants: &ConstantTable, program: &Program, r: Ref) -> String {
    match r {
        Ref::Const(cid) => format!("const_{}", constants.entry(cid).0),
        Ref::Var(var) => format!("var_{}", program.instructions()[var as usize].id),
    }
}

/// Renders the right-hand side of one instruction.  Operands are always
/// plain references, so no parenthesization is ever needed.
pub fn pretty(constants: &ConstantTable, program: &Program, op: &Op) -> String {
    let name = |r: &Ref| ref_name(constants, program, *r);
    let list = |args: &[Ref]| args.iter().map(name).collect::<Vec<_>>().join(", ");

    match op {
        Op::Binary { op, lhs, rhs } => format!("{} {} {}", name(lhs), op.symbol(), name(rhs)),
        Op::Multiply { lhs, rhs } => format!("{} * {}", name(lhs), name(rhs)),
        Op::Divide { lhs, rhs } => format!("{} / {}", name(lhs), name(rhs)),
        Op::Unary { op, arg } => match op {
            UnaryOp::Neg => format!("-{}", name(arg)),
            _ => format!("{}({})", op.name(), name(arg)),
        },
        Op::Call { func, arg } => format!("{}({})", name(&Ref::Const(*func)), name(arg)),
        Op::Index { arg, rows } => format!("{}[{}:{}]", name(arg), rows.start, rows.end),
        Op::Concat { args } => format!("concatenate({})", list(args)),
        Op::SparseStack { args } => format!("vstack({})", list(args)),
        Op::DomainConcat { parts } => {
            let parts: Vec<_> = parts
                .iter()
                .map(|(r, rows)| format!("{}[{}:{}]", name(r), rows.start, rows.end))
                .collect();
            format!("concatenate({})", parts.join(", "))
        }
        Op::Pass(arg) => name(arg),
        Op::LoadState(rows) => format!("y[{}:{}]", rows.start, rows.end),
        Op::LoadTime => "t".to_string(),
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (constants, program) = (self.constants(), self.program());
        for inst in program.instructions() {
            writeln!(
                f,
                "var_{} = {}",
                inst.id,
                pretty(constants, program, &inst.op)
            )?;
        }
        write!(f, "return {}", ref_name(constants, program, self.result()))
    }
}
