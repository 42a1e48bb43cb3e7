// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Runtime values flowing through both the interpreter and the VM.
//!
//! A value is a scalar, a dense column-major matrix, or a CSR sparse
//! matrix.  Which representation an intermediate result has is only known
//! at run time (it depends on the live inputs), so arithmetic dispatches on
//! the tag of each operand; see `ops`.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use float_cmp::approx_eq;
use nalgebra::DMatrix;
use sprs::{CsMat, TriMat};

#[derive(Clone, Debug)]
pub enum Value {
    Scalar(f64),
    Dense(DMatrix<f64>),
    Sparse(CsMat<f64>),
}

impl Value {
    /// A dense `N×1` column holding `data`.
    pub fn column(data: &[f64]) -> Value {
        Value::Dense(DMatrix::from_column_slice(data.len(), 1, data))
    }

    /// Wraps a sparse matrix, normalizing it to CSR storage.
    pub fn sparse(m: CsMat<f64>) -> Value {
        if m.is_csr() {
            Value::Sparse(m)
        } else {
            Value::Sparse(m.into_csr())
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Value::Sparse(_))
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(n) => Some(*n),
            _ => None,
        }
    }

    /// (rows, cols); scalars report `(1, 1)`.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Value::Scalar(_) => (1, 1),
            Value::Dense(m) => m.shape(),
            Value::Sparse(m) => m.shape(),
        }
    }

    /// Short human-readable description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Value::Scalar(_) => "scalar".to_string(),
            Value::Dense(m) => format!("dense {}x{}", m.nrows(), m.ncols()),
            Value::Sparse(m) => format!("sparse {}x{}", m.rows(), m.cols()),
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        self.dense().into_owned()
    }

    pub(crate) fn dense(&self) -> Cow<'_, DMatrix<f64>> {
        match self {
            Value::Scalar(n) => Cow::Owned(DMatrix::from_element(1, 1, *n)),
            Value::Dense(m) => Cow::Borrowed(m),
            Value::Sparse(m) => Cow::Owned(sparse_to_dense(m)),
        }
    }

    pub(crate) fn sparse_cow(&self) -> Cow<'_, CsMat<f64>> {
        match self {
            Value::Scalar(n) => Cow::Owned(dense_to_sparse(&DMatrix::from_element(1, 1, *n))),
            Value::Dense(m) => Cow::Owned(dense_to_sparse(m)),
            Value::Sparse(m) => Cow::Borrowed(m),
        }
    }

    /// Flattens a scalar or a single-column value into a vector.
    pub fn to_column_vec(&self) -> Option<Vec<f64>> {
        match self {
            Value::Scalar(n) => Some(vec![*n]),
            _ if self.shape().1 == 1 => Some(self.dense().as_slice().to_vec()),
            _ => None,
        }
    }

    /// Compares numerically, ignoring representation: a sparse matrix is
    /// approximately equal to a dense matrix holding the same entries.
    /// NaNs compare equal to each other.
    pub fn approx_eq(&self, other: &Value, epsilon: f64) -> bool {
        if let (Value::Scalar(a), Value::Scalar(b)) = (self, other) {
            return float_eq(*a, *b, epsilon);
        }
        if self.shape() != other.shape() {
            return false;
        }
        let (l, r) = (self.dense(), other.dense());
        l.iter().zip(r.iter()).all(|(a, b)| float_eq(*a, *b, epsilon))
    }
}

fn float_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b || approx_eq!(f64, a, b, epsilon = epsilon)
}

pub(crate) fn dense_to_sparse(m: &DMatrix<f64>) -> CsMat<f64> {
    let mut tri = TriMat::new((m.nrows(), m.ncols()));
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            let n = m[(i, j)];
            if n != 0.0 {
                tri.add_triplet(i, j, n);
            }
        }
    }
    tri.to_csr()
}

pub(crate) fn sparse_to_dense(m: &CsMat<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(m.rows(), m.cols());
    for (&n, (i, j)) in m.iter() {
        out[(i, j)] += n;
    }
    out
}

// Equality and hashing are bitwise so that constant leaves can take part
// in structural identity: 0.0 and -0.0 are distinct, all NaNs are one.
#[inline]
fn bits(n: f64) -> u64 {
    if n.is_nan() {
        f64::NAN.to_bits()
    } else {
        n.to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => bits(*a) == bits(*b),
            (Value::Dense(a), Value::Dense(b)) => {
                a.shape() == b.shape()
                    && a
                        .iter()
                        .zip(b.iter())
                        .all(|(x, y)| bits(*x) == bits(*y))
            }
            (Value::Sparse(a), Value::Sparse(b)) => {
                a.shape() == b.shape()
                    && a.nnz() == b.nnz()
                    && a.iter().zip(b.iter()).all(|((x, xi), (y, yi))| {
                        xi == yi && bits(*x) == bits(*y)
                    })
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Scalar(n) => bits(*n).hash(state),
            Value::Dense(m) => {
                m.shape().hash(state);
                for n in m.iter() {
                    bits(*n).hash(state);
                }
            }
            Value::Sparse(m) => {
                m.shape().hash(state);
                for (n, pos) in m.iter() {
                    pos.hash(state);
                    bits(*n).hash(state);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Scalar(n) => write!(f, "{n}"),
            _ => write!(f, "<{}>", self.describe()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Scalar(n)
    }
}

impl From<DMatrix<f64>> for Value {
    fn from(m: DMatrix<f64>) -> Self {
        Value::Dense(m)
    }
}

impl From<CsMat<f64>> for Value {
    fn from(m: CsMat<f64>) -> Self {
        Value::sparse(m)
    }
}
