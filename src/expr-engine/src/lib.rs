// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#![forbid(unsafe_code)]

pub mod builtins;
pub mod bytecode;
pub mod common;
mod compiler;
pub mod graph;
mod interpreter;
mod ops;
pub mod solver;
mod value;
mod vm;

pub use self::bytecode::{Constant, ConstantTable, Instruction, Op, Program, Ref};
pub use self::common::{Error, ErrorCode, ErrorKind, Result};
pub use self::compiler::{ConstantClassifier, compile};
pub use self::graph::{DomainSlice, Graph, NodeId, NodeKind};
pub use self::interpreter::Interpreter;
pub use self::solver::{Method, Results, SimSpecs, simulate};
pub use self::value::Value;
pub use self::vm::Artifact;
