// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Numeric kernels shared by the interpreter and the VM.  Both evaluators
//! route every operation through these functions, which is what makes the
//! compiled program produce bit-identical results to a direct walk of the
//! graph.

use std::ops::Range;

use nalgebra::DMatrix;
use sprs::{CsMat, CsMatView, TriMat};

use crate::builtins::FuncHandle;
use crate::common::Result;
use crate::eval_err;
use crate::graph::{BinaryOp, UnaryOp};
use crate::value::{Value, sparse_to_dense};

fn broadcast_dim(what: &str, l: &Value, r: &Value, a: usize, b: usize) -> Result<usize> {
    if a == b || b == 1 {
        Ok(a)
    } else if a == 1 {
        Ok(b)
    } else {
        eval_err!(
            ShapeMismatch,
            format!("cannot {what} {} and {}", l.describe(), r.describe())
        )
    }
}

// index of (i, j) in a matrix broadcast along its unit axes
#[inline(always)]
fn broadcast_get(m: &DMatrix<f64>, i: usize, j: usize) -> f64 {
    let i = if m.nrows() == 1 { 0 } else { i };
    let j = if m.ncols() == 1 { 0 } else { j };
    m[(i, j)]
}

/// Dense elementwise application of `f` with scalar and 2-D broadcasting.
fn elementwise(what: &str, l: &Value, r: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    match (l, r) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(*a, *b))),
        (Value::Scalar(a), _) => Ok(Value::Dense(r.dense().map(|b| f(*a, b)))),
        (_, Value::Scalar(b)) => Ok(Value::Dense(l.dense().map(|a| f(a, *b)))),
        _ => {
            let (a, b) = (l.dense(), r.dense());
            let rows = broadcast_dim(what, l, r, a.nrows(), b.nrows())?;
            let cols = broadcast_dim(what, l, r, a.ncols(), b.ncols())?;
            Ok(Value::Dense(DMatrix::from_fn(rows, cols, |i, j| {
                f(broadcast_get(&a, i, j), broadcast_get(&b, i, j))
            })))
        }
    }
}

/// Elementwise product keeping `s`'s shape and sparsity pattern.
fn sparse_multiply(s: &CsMat<f64>, other: &Value) -> Result<Value> {
    let (rows, cols) = s.shape();
    let result = match other {
        Value::Scalar(n) => s.map(|x| x * n),
        Value::Dense(m) => {
            let (r, c) = m.shape();
            if !((r == rows || r == 1) && (c == cols || c == 1)) {
                return eval_err!(
                    ShapeMismatch,
                    format!(
                        "cannot multiply sparse {rows}x{cols} elementwise by {}",
                        other.describe()
                    )
                );
            }
            let mut tri = TriMat::with_capacity((rows, cols), s.nnz());
            for (&x, (i, j)) in s.iter() {
                tri.add_triplet(i, j, x * broadcast_get(m, i, j));
            }
            tri.to_csr()
        }
        Value::Sparse(o) => {
            if o.shape() != s.shape() {
                return eval_err!(
                    ShapeMismatch,
                    format!(
                        "cannot multiply sparse {rows}x{cols} elementwise by {}",
                        other.describe()
                    )
                );
            }
            let mut tri = TriMat::with_capacity((rows, cols), s.nnz());
            for (&x, (i, j)) in s.iter() {
                tri.add_triplet(i, j, x * o.get(i, j).copied().unwrap_or(0.0));
            }
            tri.to_csr()
        }
    };
    Ok(Value::Sparse(result))
}

// Whether `s ⊙ other` has `s`'s shape, so the sparse kernel can keep
// `s`'s pattern.  Anything that broadcasts past it goes through the dense
// kernel instead.
fn receives(s: &CsMat<f64>, other: &Value) -> bool {
    let (rows, cols) = s.shape();
    match other {
        Value::Scalar(_) => true,
        Value::Dense(m) => {
            let (r, c) = m.shape();
            (r == rows || r == 1) && (c == cols || c == 1)
        }
        Value::Sparse(o) => o.shape() == s.shape(),
    }
}

/// Elementwise product.  Which kernel runs depends on the operand
/// representations seen at run time: a sparse left operand wins, then a
/// sparse right operand, then the dense product.  A sparse operand only
/// keeps its pattern when the result has its shape.
pub fn multiply(l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Sparse(s), _) if receives(s, r) => sparse_multiply(s, r),
        (_, Value::Sparse(s)) if receives(s, l) => sparse_multiply(s, l),
        _ => elementwise("multiply", l, r, |a, b| a * b),
    }
}

pub fn divide(l: &Value, r: &Value) -> Result<Value> {
    if let Value::Sparse(s) = l {
        let reciprocal = match r {
            Value::Scalar(n) => Value::Scalar(1.0 / n),
            _ => Value::Dense(r.dense().map(|x| 1.0 / x)),
        };
        if receives(s, &reciprocal) {
            return sparse_multiply(s, &reciprocal);
        }
    }
    elementwise("divide", l, r, |a, b| a / b)
}

fn add_sub(l: &Value, r: &Value, negate: bool) -> Result<Value> {
    if let (Value::Sparse(a), Value::Sparse(b)) = (l, r) {
        if a.shape() != b.shape() {
            return eval_err!(
                ShapeMismatch,
                format!("cannot add {} and {}", l.describe(), r.describe())
            );
        }
        let sign = if negate { -1.0 } else { 1.0 };
        let mut tri = TriMat::with_capacity(a.shape(), a.nnz() + b.nnz());
        for (&x, (i, j)) in a.iter() {
            tri.add_triplet(i, j, x);
        }
        for (&x, (i, j)) in b.iter() {
            tri.add_triplet(i, j, sign * x);
        }
        return Ok(Value::Sparse(tri.to_csr()));
    }
    if negate {
        elementwise("subtract", l, r, |a, b| a - b)
    } else {
        elementwise("add", l, r, |a, b| a + b)
    }
}

pub fn matmul(l: &Value, r: &Value) -> Result<Value> {
    let mismatch = || {
        eval_err!(
            ShapeMismatch,
            format!("cannot matrix-multiply {} by {}", l.describe(), r.describe())
        )
    };
    if l.is_scalar() || r.is_scalar() {
        return mismatch();
    }
    let ((m, k), (k2, n)) = (l.shape(), r.shape());
    if k != k2 {
        return mismatch();
    }
    let result = match (l, r) {
        (Value::Sparse(a), Value::Sparse(b)) => Value::Sparse(a * b),
        (Value::Sparse(a), Value::Dense(b)) => {
            let mut out = DMatrix::zeros(m, n);
            for (i, row) in a.outer_iterator().enumerate() {
                for (kk, &x) in row.iter() {
                    for j in 0..n {
                        out[(i, j)] += x * b[(kk, j)];
                    }
                }
            }
            Value::Dense(out)
        }
        (Value::Dense(a), Value::Sparse(b)) => {
            let mut out = DMatrix::zeros(m, n);
            for (&x, (kk, j)) in b.iter() {
                for i in 0..m {
                    out[(i, j)] += a[(i, kk)] * x;
                }
            }
            Value::Dense(out)
        }
        _ => Value::Dense(&*l.dense() * &*r.dense()),
    };
    Ok(result)
}

pub fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add => add_sub(l, r, false),
        BinaryOp::Sub => add_sub(l, r, true),
        BinaryOp::Mul => multiply(l, r),
        BinaryOp::Div => divide(l, r),
        BinaryOp::Pow => elementwise("raise", l, r, f64::powf),
        BinaryOp::MatMul => matmul(l, r),
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        x
    }
}

pub fn unary(op: UnaryOp, v: &Value) -> Value {
    let f: fn(f64) -> f64 = match op {
        UnaryOp::Neg => |x| -x,
        UnaryOp::Abs => f64::abs,
        UnaryOp::Sign => sign,
    };
    match v {
        Value::Scalar(n) => Value::Scalar(f(*n)),
        Value::Dense(m) => Value::Dense(m.map(f)),
        Value::Sparse(s) => Value::Sparse(s.map(|x| f(*x))),
    }
}

pub fn apply(func: FuncHandle, v: &Value) -> Value {
    match v {
        Value::Scalar(n) => Value::Scalar(func.call(*n)),
        Value::Dense(m) => Value::Dense(m.map(|x| func.call(x))),
        Value::Sparse(s) => Value::Dense(sparse_to_dense(s).map(|x| func.call(x))),
    }
}

fn check_rows(v: &Value, rows: &Range<usize>, nrows: usize) -> Result<()> {
    if rows.start > rows.end || rows.end > nrows {
        return eval_err!(
            ShapeMismatch,
            format!(
                "rows {}:{} out of range for {}",
                rows.start,
                rows.end,
                v.describe()
            )
        );
    }
    Ok(())
}

fn sparse_rows(s: &CsMat<f64>, rows: &Range<usize>) -> CsMat<f64> {
    let mut tri = TriMat::new((rows.len(), s.cols()));
    for (&x, (i, j)) in s.iter() {
        if rows.contains(&i) {
            tri.add_triplet(i - rows.start, j, x);
        }
    }
    tri.to_csr()
}

/// Row slice of a matrix.
pub fn index(v: &Value, rows: &Range<usize>) -> Result<Value> {
    match v {
        Value::Scalar(_) => eval_err!(
            ShapeMismatch,
            format!("cannot index a scalar with {}:{}", rows.start, rows.end)
        ),
        Value::Dense(m) => {
            check_rows(v, rows, m.nrows())?;
            Ok(Value::Dense(m.rows(rows.start, rows.len()).into_owned()))
        }
        Value::Sparse(s) => {
            check_rows(v, rows, s.rows())?;
            Ok(Value::Sparse(sparse_rows(s, rows)))
        }
    }
}

fn stack_dense(parts: &[DMatrix<f64>]) -> Result<Value> {
    let Some(first) = parts.first() else {
        return eval_err!(EmptyConcatenation);
    };
    let cols = first.ncols();
    if let Some(bad) = parts.iter().find(|m| m.ncols() != cols) {
        return eval_err!(
            ShapeMismatch,
            format!(
                "cannot concatenate a matrix with {} columns onto one with {cols}",
                bad.ncols()
            )
        );
    }
    let total = parts.iter().map(|m| m.nrows()).sum();
    let mut out = DMatrix::zeros(total, cols);
    let mut offset = 0;
    for m in parts {
        out.rows_mut(offset, m.nrows()).copy_from(m);
        offset += m.nrows();
    }
    Ok(Value::Dense(out))
}

/// Stacks the rows of every argument in order.  Scalars count as 1x1.
pub fn concatenate(args: &[&Value]) -> Result<Value> {
    let parts: Vec<DMatrix<f64>> = args.iter().map(|v| v.to_dense()).collect();
    stack_dense(&parts)
}

/// Sparse vertical stack; dense arguments are converted first.
pub fn vstack(args: &[&Value]) -> Result<Value> {
    if args.is_empty() {
        return eval_err!(EmptyConcatenation);
    }
    let mats: Vec<_> = args.iter().map(|v| v.sparse_cow()).collect();
    let cols = mats[0].cols();
    if let Some(bad) = mats.iter().find(|m| m.cols() != cols) {
        return eval_err!(
            ShapeMismatch,
            format!(
                "cannot stack a matrix with {} columns onto one with {cols}",
                bad.cols()
            )
        );
    }
    let views: Vec<CsMatView<f64>> = mats.iter().map(|m| m.view()).collect();
    Ok(Value::Sparse(sprs::vstack(&views)))
}

/// Concatenates row ranges of several values, in the order given.
pub fn domain_concatenate(parts: &[(&Value, Range<usize>)]) -> Result<Value> {
    let mut slices = Vec::with_capacity(parts.len());
    for (v, rows) in parts {
        let m = v.dense();
        check_rows(v, rows, m.nrows())?;
        slices.push(m.rows(rows.start, rows.len()).into_owned());
    }
    stack_dense(&slices)
}

pub fn state_vector(y: &DMatrix<f64>, rows: &Range<usize>) -> Result<Value> {
    if rows.start > rows.end || rows.end > y.nrows() {
        return eval_err!(
            ShapeMismatch,
            format!(
                "state has {} rows but y[{}:{}] was requested",
                y.nrows(),
                rows.start,
                rows.end
            )
        );
    }
    Ok(Value::Dense(y.rows(rows.start, rows.len()).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCode;
    use crate::value::dense_to_sparse;

    fn laplacian(n: usize) -> CsMat<f64> {
        let mut tri = TriMat::new((n, n));
        for i in 0..n {
            tri.add_triplet(i, i, -2.0);
            if i > 0 {
                tri.add_triplet(i, i - 1, 1.0);
            }
            if i + 1 < n {
                tri.add_triplet(i, i + 1, 1.0);
            }
        }
        tri.to_csr()
    }

    #[test]
    fn test_broadcasting() {
        let col = Value::column(&[1.0, 2.0]);
        let row = Value::Dense(DMatrix::from_row_slice(1, 3, &[10.0, 20.0, 30.0]));
        let sum = binary(BinaryOp::Add, &col, &row).unwrap();
        assert_eq!(
            Value::Dense(DMatrix::from_row_slice(
                2,
                3,
                &[11.0, 21.0, 31.0, 12.0, 22.0, 32.0]
            )),
            sum
        );

        let err = binary(BinaryOp::Add, &col, &Value::column(&[1.0, 2.0, 3.0])).unwrap_err();
        assert_eq!(ErrorCode::ShapeMismatch, err.code);
        assert!(err.get_details().unwrap().contains("dense 2x1"));
        assert!(err.get_details().unwrap().contains("dense 3x1"));
    }

    #[test]
    fn test_sparse_multiply_matches_dense() {
        let s = Value::sparse(laplacian(4));
        let d = Value::column(&[1.0, 2.0, 3.0, 4.0]);
        let dense_s = Value::Dense(s.to_dense());
        let expected = multiply(&dense_s, &d).unwrap();

        let left = multiply(&s, &d).unwrap();
        let right = multiply(&d, &s).unwrap();
        assert!(left.is_sparse());
        assert!(right.is_sparse());
        assert!(left.approx_eq(&expected, 1e-12));
        assert!(right.approx_eq(&expected, 1e-12));
    }

    #[test]
    fn test_sparse_multiply_prefers_left() {
        // the receiver's pattern survives, so the stored entries tell us
        // which operand was used
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 0, 2.0);
        tri.add_triplet(0, 1, 3.0);
        let a: CsMat<f64> = tri.to_csr();
        let b: CsMat<f64> = CsMat::eye(2);
        let ab = multiply(&Value::sparse(a.clone()), &Value::sparse(b.clone())).unwrap();
        let ba = multiply(&Value::sparse(b), &Value::sparse(a)).unwrap();
        assert!(ab.approx_eq(&ba, 1e-12));
        match (ab, ba) {
            (Value::Sparse(ab), Value::Sparse(ba)) => {
                assert_eq!(Some(&0.0), ab.get(0, 1));
                assert_eq!(None, ab.get(1, 1));
                assert_eq!(None, ba.get(0, 1));
                assert_eq!(Some(&0.0), ba.get(1, 1));
            }
            _ => panic!("expected sparse results"),
        }
    }

    #[test]
    fn test_sparse_multiply_broadcasts_past_receiver() {
        let col = Value::from(dense_to_sparse(&DMatrix::from_column_slice(
            3,
            1,
            &[1.0, 0.0, 2.0],
        )));
        let row = Value::Dense(DMatrix::from_row_slice(1, 2, &[10.0, 20.0]));
        let expected = multiply(&Value::Dense(col.to_dense()), &row).unwrap();
        assert_eq!((3, 2), expected.shape());

        for product in [multiply(&col, &row).unwrap(), multiply(&row, &col).unwrap()] {
            assert_eq!((3, 2), product.shape());
            assert!(product.approx_eq(&expected, 1e-12));
        }

        let unit = Value::from(dense_to_sparse(&DMatrix::from_element(1, 1, 3.0)));
        let d = Value::column(&[1.0, 2.0, 3.0]);
        assert_eq!(Value::column(&[3.0, 6.0, 9.0]), multiply(&unit, &d).unwrap());

        let q = divide(&col, &row).unwrap();
        assert_eq!((3, 2), q.shape());
        assert!(q.approx_eq(
            &Value::Dense(DMatrix::from_row_slice(3, 2, &[0.1, 0.05, 0.0, 0.0, 0.2, 0.1])),
            1e-12
        ));

        let err = multiply(&col, &Value::column(&[1.0, 2.0])).unwrap_err();
        assert_eq!(ErrorCode::ShapeMismatch, err.code);
    }

    #[test]
    fn test_sparse_divide() {
        let s = Value::sparse(laplacian(3));
        let q = divide(&s, &Value::Scalar(2.0)).unwrap();
        assert!(q.is_sparse());
        assert!(q.approx_eq(&Value::Dense(s.to_dense() / 2.0), 1e-12));

        let d = Value::column(&[1.0, 2.0, 4.0]);
        let q = divide(&d, &s).unwrap();
        assert!(!q.is_sparse());
    }

    #[test]
    fn test_matmul() {
        let l = laplacian(3);
        let x = Value::column(&[1.0, 4.0, 9.0]);
        let expected = Value::column(&[2.0, 2.0, -14.0]);

        let sd = matmul(&Value::sparse(l.clone()), &x).unwrap();
        assert_eq!(expected, sd);

        let dense_l = Value::Dense(sparse_to_dense(&l));
        assert_eq!(expected, matmul(&dense_l, &x).unwrap());

        let ss = matmul(&Value::sparse(l.clone()), &Value::sparse(l.clone())).unwrap();
        assert!(ss.is_sparse());

        let xt = Value::Dense(DMatrix::from_row_slice(1, 3, &[1.0, 4.0, 9.0]));
        let ds = matmul(&xt, &Value::sparse(l)).unwrap();
        assert_eq!(Value::Dense(DMatrix::from_row_slice(1, 3, &[2.0, 2.0, -14.0])), ds);

        let err = matmul(&x, &x).unwrap_err();
        assert_eq!(ErrorCode::ShapeMismatch, err.code);
        let err = matmul(&Value::Scalar(1.0), &x).unwrap_err();
        assert_eq!(ErrorCode::ShapeMismatch, err.code);
    }

    #[test]
    fn test_index_and_concatenate() {
        let v = Value::column(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(Value::column(&[2.0, 3.0]), index(&v, &(1..3)).unwrap());
        assert_eq!(
            ErrorCode::ShapeMismatch,
            index(&v, &(3..5)).unwrap_err().code
        );

        let s = Value::sparse(laplacian(4));
        let rows = index(&s, &(1..3)).unwrap();
        assert_eq!((2, 4), rows.shape());
        assert!(rows.is_sparse());

        let a = Value::column(&[1.0]);
        let b = Value::Scalar(2.0);
        assert_eq!(
            Value::column(&[1.0, 2.0, 1.0]),
            concatenate(&[&a, &b, &a]).unwrap()
        );
        assert_eq!(
            ErrorCode::EmptyConcatenation,
            concatenate(&[]).unwrap_err().code
        );
    }

    #[test]
    fn test_vstack() {
        let a = Value::sparse(laplacian(2));
        let b = Value::Dense(DMatrix::from_row_slice(1, 2, &[5.0, 0.0]));
        let stacked = vstack(&[&a, &b]).unwrap();
        assert!(stacked.is_sparse());
        assert_eq!(
            Value::Dense(DMatrix::from_row_slice(
                3,
                2,
                &[-2.0, 1.0, 1.0, -2.0, 5.0, 0.0]
            )),
            Value::Dense(stacked.to_dense())
        );
    }

    #[test]
    fn test_domain_concatenate() {
        let a = Value::column(&[1.0, 2.0, 3.0]);
        let b = Value::column(&[7.0, 8.0]);
        let out = domain_concatenate(&[(&b, 0..2), (&a, 1..3)]).unwrap();
        assert_eq!(Value::column(&[7.0, 8.0, 2.0, 3.0]), out);
    }

    #[test]
    fn test_unary_preserves_representation() {
        let s = Value::sparse(laplacian(2));
        assert!(unary(UnaryOp::Neg, &s).is_sparse());
        assert_eq!(
            Value::column(&[-1.0, 0.0, 1.0]),
            unary(UnaryOp::Sign, &Value::column(&[-3.0, 0.0, 2.0]))
        );
    }
}
