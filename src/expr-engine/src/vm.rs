// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use nalgebra::DMatrix;

use crate::bytecode::{Constant, ConstantTable, Op, Program, Ref};
use crate::common::Result;
use crate::eval_err;
use crate::graph::NodeId;
use crate::ops;
use crate::value::Value;

/// A compiled graph, ready to be evaluated any number of times.
///
/// The artifact owns its constants and program and holds no reference to
/// the graph it came from.  Evaluation never mutates it: each call keeps
/// its intermediate values in a slot vector of its own, so one artifact can
/// be shared across threads.
#[derive(Clone, Debug)]
pub struct Artifact {
    constants: ConstantTable,
    program: Program,
    result_id: NodeId,
    result: Ref,
}

impl Artifact {
    pub(crate) fn new(
        constants: ConstantTable,
        program: Program,
        result_id: NodeId,
        result: Ref,
    ) -> Self {
        Artifact {
            constants,
            program,
            result_id,
            result,
        }
    }

    pub fn constants(&self) -> &ConstantTable {
        &self.constants
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The graph node whose value `evaluate` returns.
    pub fn result_id(&self) -> NodeId {
        self.result_id
    }

    pub fn result(&self) -> Ref {
        self.result
    }

    pub fn uses_time(&self) -> bool {
        self.program
            .instructions()
            .iter()
            .any(|inst| matches!(inst.op, Op::LoadTime))
    }

    pub fn uses_state(&self) -> bool {
        self.program
            .instructions()
            .iter()
            .any(|inst| matches!(inst.op, Op::LoadState(_)))
    }

    /// Evaluates the program.  A flat state is treated as a column vector.
    pub fn evaluate(&self, t: Option<f64>, y: Option<&[f64]>) -> Result<Value> {
        let y = y.map(|y| DMatrix::from_column_slice(y.len(), 1, y));
        self.evaluate_matrix(t, y.as_ref())
    }

    /// Evaluates the program with a state matrix that is used as-is.
    pub fn evaluate_matrix(&self, t: Option<f64>, y: Option<&DMatrix<f64>>) -> Result<Value> {
        let mut slots: Vec<Value> = Vec::with_capacity(self.program.len());
        for inst in self.program.instructions() {
            let value = self.exec(&inst.op, &slots, t, y)?;
            slots.push(value);
        }
        Ok(self.load(&slots, self.result)?.clone())
    }

    /// Evaluates several independent `(t, y)` pairs, in parallel where
    /// threads are available.  Results are in input order.
    pub fn evaluate_batch(&self, inputs: &[(f64, Vec<f64>)]) -> Vec<Result<Value>> {
        #[cfg(not(target_arch = "wasm32"))]
        {
            use rayon::prelude::*;
            inputs
                .par_iter()
                .map(|(t, y)| self.evaluate(Some(*t), Some(y.as_slice())))
                .collect()
        }
        #[cfg(target_arch = "wasm32")]
        {
            inputs
                .iter()
                .map(|(t, y)| self.evaluate(Some(*t), Some(y.as_slice())))
                .collect()
        }
    }

    fn load<'a>(&'a self, slots: &'a [Value], r: Ref) -> Result<&'a Value> {
        match r {
            Ref::Var(var) => Ok(&slots[var as usize]),
            Ref::Const(cid) => match &self.constants.entry(cid).1 {
                Constant::Value(v) => Ok(v),
                Constant::Function(func) => eval_err!(
                    Generic,
                    format!("function '{func}' used as a value")
                ),
            },
        }
    }

    fn load_all<'a>(&'a self, slots: &'a [Value], refs: &[Ref]) -> Result<Vec<&'a Value>> {
        refs.iter().map(|r| self.load(slots, *r)).collect()
    }

    fn exec(
        &self,
        op: &Op,
        slots: &[Value],
        t: Option<f64>,
        y: Option<&DMatrix<f64>>,
    ) -> Result<Value> {
        let value = match op {
            Op::Binary { op, lhs, rhs } => {
                ops::binary(*op, self.load(slots, *lhs)?, self.load(slots, *rhs)?)?
            }
            Op::Multiply { lhs, rhs } => {
                ops::multiply(self.load(slots, *lhs)?, self.load(slots, *rhs)?)?
            }
            Op::Divide { lhs, rhs } => {
                ops::divide(self.load(slots, *lhs)?, self.load(slots, *rhs)?)?
            }
            Op::Unary { op, arg } => ops::unary(*op, self.load(slots, *arg)?),
            Op::Call { func, arg } => {
                let Constant::Function(func) = &self.constants.entry(*func).1 else {
                    return eval_err!(Generic, "call of a non-function constant".to_string());
                };
                ops::apply(*func, self.load(slots, *arg)?)
            }
            Op::Index { arg, rows } => ops::index(self.load(slots, *arg)?, rows)?,
            Op::Concat { args } => ops::concatenate(&self.load_all(slots, args)?)?,
            Op::SparseStack { args } => ops::vstack(&self.load_all(slots, args)?)?,
            Op::DomainConcat { parts } => {
                let mut loaded = Vec::with_capacity(parts.len());
                for (r, rows) in parts {
                    loaded.push((self.load(slots, *r)?, rows.clone()));
                }
                ops::domain_concatenate(&loaded)?
            }
            Op::Pass(arg) => self.load(slots, *arg)?.clone(),
            Op::LoadState(rows) => match y {
                Some(y) => ops::state_vector(y, rows)?,
                None => {
                    return eval_err!(
                        MissingInput,
                        format!("y[{}:{}] needs a state vector", rows.start, rows.end)
                    );
                }
            },
            Op::LoadTime => match t {
                Some(t) => Value::Scalar(t),
                None => return eval_err!(MissingInput, "t needs a time".to_string()),
            },
        };

        Ok(value)
    }
}
