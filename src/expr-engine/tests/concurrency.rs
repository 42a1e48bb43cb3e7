// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::sync::Arc;
use std::thread;

use expr_engine::{Graph, Value, compile};

#[test]
fn shared_artifact_across_threads() {
    let mut g = Graph::new();
    let y = g.state_vector(0..3);
    let t = g.time();
    let s = g.apply("sin", t).unwrap();
    let scaled = g.mul(y, s);
    let root = g.add(scaled, y);
    let artifact = Arc::new(compile(&g, root).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let artifact = Arc::clone(&artifact);
            thread::spawn(move || {
                let t = i as f64;
                let y = [i as f64, 1.0, -1.0];
                let mut last = None;
                for _ in 0..500 {
                    let value = artifact.evaluate(Some(t), Some(&y[..])).unwrap();
                    if let Some(prev) = &last {
                        assert_eq!(prev, &value);
                    }
                    last = Some(value);
                }
                (i, last.unwrap())
            })
        })
        .collect();

    for handle in handles {
        let (i, value) = handle.join().unwrap();
        let t = i as f64;
        let expected: Vec<f64> = [i as f64, 1.0, -1.0]
            .iter()
            .map(|y| y * t.sin() + y)
            .collect();
        assert_eq!(Value::column(&expected), value);
    }
}

#[test]
fn batch_matches_sequential() {
    let mut g = Graph::new();
    let y = g.state_vector(0..2);
    let t = g.time();
    let e = g.apply("exp", t).unwrap();
    let root = g.div(y, e);
    let artifact = compile(&g, root).unwrap();

    let inputs: Vec<(f64, Vec<f64>)> = (0..200)
        .map(|i| (i as f64 / 100.0, vec![i as f64, -(i as f64)]))
        .collect();
    let batch = artifact.evaluate_batch(&inputs);

    assert_eq!(inputs.len(), batch.len());
    for ((t, y), value) in inputs.iter().zip(batch) {
        let sequential = artifact.evaluate(Some(*t), Some(y.as_slice())).unwrap();
        assert_eq!(sequential, value.unwrap());
    }
}
