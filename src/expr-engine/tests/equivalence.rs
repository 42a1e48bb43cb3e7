// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Property tests: a compiled artifact must agree with direct evaluation of
//! the graph it was compiled from.

use expr_engine::{DomainSlice, Graph, NodeId, Value, compile};
use nalgebra::DMatrix;
use proptest::prelude::*;
use sprs::{CsMat, TriMat};

const N: usize = 4;

fn sparse_column(entries: &[(usize, f64)]) -> CsMat<f64> {
    let mut tri = TriMat::new((N, 1));
    for &(i, x) in entries {
        tri.add_triplet(i, 0, x);
    }
    tri.to_csr()
}

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

/// Builds a graph from a list of `(op, lhs, rhs)` steps.  Operands pick
/// among the nodes built so far, so later steps reuse earlier ones and the
/// graph ends up with plenty of sharing.
fn build(steps: &[(u8, usize, usize)]) -> (Graph, NodeId) {
    let mut g = Graph::new();
    let mut nodes = vec![
        g.state_vector(0..N),
        g.state_vector(1..3),
        g.time(),
        g.vector(&[0.5, -1.0, 2.0, 3.0]),
        g.scalar(1.5),
        g.sparse(laplacian(N)),
        g.sparse(sparse_column(&[(0, 2.0), (2, -1.0)])),
        g.matrix(DMatrix::from_row_slice(1, 3, &[1.0, -2.0, 0.5])),
    ];
    let laplacian_id = nodes[5];

    for &(op, a, b) in steps {
        let a = nodes[a % nodes.len()];
        let b = nodes[b % nodes.len()];
        let id = match op % 18 {
            0 => g.add(a, b),
            1 => g.sub(a, b),
            2 => g.mul(a, b),
            3 => g.div(a, b),
            4 => g.neg(a),
            5 => g.abs(a),
            6 => g.apply("tanh", a).unwrap(),
            7 => g.index(a, 0..2),
            8 => g.concatenation(&[a, b]),
            9 => g.matmul(laplacian_id, a),
            10 => g.sparse_stack(&[a, b]),
            // children declared against the spatial order
            11 => g
                .domain_concatenation(
                    vec![
                        (b, vec![DomainSlice::new("right", 0..1)]),
                        (a, vec![DomainSlice::new("left", 0..2)]),
                    ],
                    vec![
                        DomainSlice::new("left", 0..2),
                        DomainSlice::new("right", 2..3),
                    ],
                )
                .unwrap(),
            // `a` straddles the domain owned by `b`
            12 => g
                .domain_concatenation(
                    vec![
                        (
                            a,
                            vec![
                                DomainSlice::new("left", 0..1),
                                DomainSlice::new("right", 1..2),
                            ],
                        ),
                        (b, vec![DomainSlice::new("middle", 0..1)]),
                    ],
                    vec![
                        DomainSlice::new("left", 0..1),
                        DomainSlice::new("middle", 1..2),
                        DomainSlice::new("right", 2..3),
                    ],
                )
                .unwrap(),
            13 => g.pow(a, b),
            14 => g.matmul(a, laplacian_id),
            15 => g.div(a, laplacian_id),
            16 => g.mul(a, b),
            _ => g.concatenation(&[a]),
        };
        nodes.push(id);
    }

    let root = *nodes.last().unwrap();
    (g, root)
}

#[test]
fn deep_constant_chain_matches_direct() {
    let mut g = Graph::new();
    let tenth = g.scalar(0.1);
    let mut acc = g.scalar(1.0);
    for i in 0..100_000 {
        acc = if i % 2 == 0 { g.add(acc, tenth) } else { g.mul(acc, tenth) };
    }
    let y = g.state_vector(0..N);
    let root = g.add(y, acc);
    let state = [1.0, 2.0, 3.0, 4.0];

    let artifact = compile(&g, root).unwrap();
    assert_eq!(2, artifact.program().len());
    assert_eq!(
        g.evaluate(root, None, Some(&state[..])).unwrap(),
        artifact.evaluate(None, Some(&state[..])).unwrap()
    );
}

fn steps_strategy() -> impl Strategy<Value = Vec<(u8, usize, usize)>> {
    prop::collection::vec((any::<u8>(), 0usize..64, 0usize..64), 1..24)
}

fn state_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-3.0f64..3.0, N)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn compiled_matches_direct(steps in steps_strategy(), t in -2.0f64..2.0, y in state_strategy()) {
        let (g, root) = build(&steps);
        let direct = g.evaluate(root, Some(t), Some(y.as_slice()));
        let compiled = compile(&g, root).and_then(|a| a.evaluate(Some(t), Some(y.as_slice())));

        match (direct, compiled) {
            (Ok(direct), Ok(compiled)) => prop_assert_eq!(direct, compiled),
            (Err(_), Err(_)) => {}
            (direct, compiled) => {
                prop_assert!(false, "direct {:?} but compiled {:?}", direct, compiled);
            }
        }
    }

    #[test]
    fn compiled_is_deterministic(steps in steps_strategy()) {
        let (g1, r1) = build(&steps);
        let (g2, r2) = build(&steps);
        if let (Ok(a1), Ok(a2)) = (compile(&g1, r1), compile(&g2, r2)) {
            prop_assert_eq!(a1.program(), a2.program());
            prop_assert_eq!(a1.result(), a2.result());
        }
    }

    #[test]
    fn one_instruction_per_node(steps in steps_strategy()) {
        let (g, root) = build(&steps);
        if let Ok(artifact) = compile(&g, root) {
            let code = artifact.program().instructions();
            let mut ids: Vec<_> = code.iter().map(|inst| inst.id).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(code.len(), ids.len());
            for inst in code {
                // only function nodes live in both tables
                let in_constants = artifact.constants().contains(inst.id);
                let is_call = matches!(inst.op, expr_engine::Op::Call { .. });
                prop_assert_eq!(in_constants, is_call);
            }
        }
    }

    #[test]
    fn sparse_multiply_matches_dense(
        entries in prop::collection::vec((0usize..N, 0usize..N, -4.0f64..4.0), 1..8),
        y in state_strategy(),
        sparse_on_left in any::<bool>(),
    ) {
        let mut tri = TriMat::new((N, N));
        let mut dense = DMatrix::zeros(N, N);
        for &(i, j, x) in &entries {
            tri.add_triplet(i, j, x);
            dense[(i, j)] += x;
        }
        let sparse: CsMat<f64> = tri.to_csr();

        let product = |m: Value| {
            let mut g = Graph::new();
            let m = g.constant(m);
            let state = g.state_vector(0..N);
            let root = if sparse_on_left { g.mul(m, state) } else { g.mul(state, m) };
            compile(&g, root).unwrap().evaluate(None, Some(y.as_slice())).unwrap()
        };

        let from_sparse = product(Value::from(sparse));
        let from_dense = product(Value::Dense(dense));
        prop_assert!(from_sparse.is_sparse());
        prop_assert!(from_sparse.approx_eq(&from_dense, 1e-12));
    }

    #[test]
    fn sparse_column_times_row_matches_dense(
        entries in prop::collection::vec((0usize..N, -4.0f64..4.0), 1..4),
        row in prop::collection::vec(-3.0f64..3.0, 3),
        t in 0.5f64..2.0,
        sparse_on_left in any::<bool>(),
    ) {
        let column = sparse_column(&entries);
        let mut dense = DMatrix::zeros(N, 1);
        for &(i, x) in &entries {
            dense[(i, 0)] += x;
        }

        let product = |m: Value| {
            let mut g = Graph::new();
            let m = g.constant(m);
            let row = g.matrix(DMatrix::from_row_slice(1, 3, &row));
            let time = g.time();
            let scaled = g.mul(time, row);
            let root = if sparse_on_left { g.mul(m, scaled) } else { g.mul(scaled, m) };
            compile(&g, root).unwrap().evaluate(Some(t), None).unwrap()
        };

        let from_sparse = product(Value::from(column));
        let from_dense = product(Value::Dense(dense));
        prop_assert_eq!((N, 3), from_sparse.shape());
        prop_assert!(from_sparse.approx_eq(&from_dense, 1e-12));
    }
}
