// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    UnsupportedOperation,
    ShapeMismatch,
    MissingInput,
    UnknownDomain,
    UnknownFunction,
    EmptyConcatenation,
    BadSimSpecs,
    BadConfig,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            UnsupportedOperation => "unsupported_operation",
            ShapeMismatch => "shape_mismatch",
            MissingInput => "missing_input",
            UnknownDomain => "unknown_domain",
            UnknownFunction => "unknown_function",
            EmptyConcatenation => "empty_concatenation",
            BadSimSpecs => "bad_sim_specs",
            BadConfig => "bad_config",
            Generic => "generic",
        };

        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Compile,
    Evaluation,
    Simulation,
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Compile => "CompileError",
            ErrorKind::Evaluation => "EvaluationError",
            ErrorKind::Simulation => "SimulationError",
            ErrorKind::Config => "ConfigError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Config,
            code: ErrorCode::BadConfig,
            details: Some(err.to_string()),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

#[macro_export]
macro_rules! compile_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Compile, ErrorCode::$code, Some($str)))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Compile, ErrorCode::$code, None))
    }};
}

#[macro_export]
macro_rules! eval_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Evaluation, ErrorCode::$code, Some($str)))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Evaluation, ErrorCode::$code, None))
    }};
}

#[macro_export]
macro_rules! sim_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Simulation, ErrorCode::$code, Some($str)))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Simulation, ErrorCode::$code, None))
    }};
}

#[test]
fn test_error_display() {
    let err = Error::new(
        ErrorKind::Compile,
        ErrorCode::UnsupportedOperation,
        Some("gradient".to_string()),
    );
    assert_eq!("CompileError{unsupported_operation: gradient}", format!("{err}"));

    let err = Error::new(ErrorKind::Evaluation, ErrorCode::MissingInput, None);
    assert_eq!("EvaluationError{missing_input}", format!("{err}"));
}

#[test]
fn test_error_macros() {
    let err: Result<()> = eval_err!(ShapeMismatch, "(2, 1) vs (3, 1)".to_string());
    let err = err.unwrap_err();
    assert_eq!(ErrorKind::Evaluation, err.kind);
    assert_eq!(ErrorCode::ShapeMismatch, err.code);
    assert_eq!(Some("(2, 1) vs (3, 1)".to_string()), err.get_details());

    let err: Result<()> = compile_err!(UnknownDomain);
    let err = err.unwrap_err();
    assert_eq!(ErrorKind::Compile, err.kind);
    assert_eq!(None, err.details);
}

#[test]
fn test_json_error_conversion() {
    let err: Error = serde_json::from_str::<f64>("{").unwrap_err().into();
    assert_eq!(ErrorKind::Config, err.kind);
    assert_eq!(ErrorCode::BadConfig, err.code);
    assert!(err.details.is_some());
}
