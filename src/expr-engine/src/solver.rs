// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! A small fixed-step integrator for `dy/dt = f(t, y)`, where `f` is a
//! compiled artifact.  It exists to drive artifacts the way a real solver
//! does: the same program evaluated many times with fresh inputs.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::Result;
use crate::sim_err;
use crate::vm::Artifact;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Euler,
    Rk4,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimSpecs {
    pub start_time: f64,
    pub end_time: f64,
    pub dt: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_step: Option<f64>,
    #[serde(default)]
    pub method: Method,
}

impl SimSpecs {
    pub fn from_json(contents: &str) -> Result<SimSpecs> {
        let specs: SimSpecs = serde_json::from_str(contents)?;
        specs.validate()
    }

    /// Checks the specs, returning a copy with `save_step` filled in.
    pub fn validate(&self) -> Result<SimSpecs> {
        if self.dt.is_nan() || self.dt <= 0.0 {
            return sim_err!(BadSimSpecs, format!("dt must be positive, not {}", self.dt));
        }
        if self.end_time < self.start_time {
            return sim_err!(
                BadSimSpecs,
                format!(
                    "end_time {} is before start_time {}",
                    self.end_time, self.start_time
                )
            );
        }
        let save_step = match self.save_step {
            None => self.dt,
            Some(save_step) if save_step < self.dt => {
                warn!(save_step, dt = self.dt, "save_step smaller than dt; using dt");
                self.dt
            }
            Some(save_step) => save_step,
        };
        Ok(SimSpecs {
            save_step: Some(save_step),
            ..self.clone()
        })
    }

    fn save_step(&self) -> f64 {
        self.save_step.unwrap_or(self.dt)
    }
}

#[derive(Clone, Debug)]
pub struct Results {
    // one large allocation; each row is [t, y0, .., yN]
    pub data: Box<[f64]>,
    pub step_size: usize,
    pub step_count: usize,
    pub specs: SimSpecs,
}

impl Results {
    pub fn iter(&self) -> std::iter::Take<std::slice::Chunks<'_, f64>> {
        self.data.chunks(self.step_size).take(self.step_count)
    }

    /// The state saved at row `step`, without its time column.
    pub fn state(&self, step: usize) -> Option<&[f64]> {
        self.iter().nth(step).map(|row| &row[1..])
    }
}

fn derivative(artifact: &Artifact, t: f64, y: &[f64]) -> Result<Vec<f64>> {
    let value = artifact.evaluate(Some(t), Some(y))?;
    match value.to_column_vec() {
        Some(dydt) if dydt.len() == y.len() => Ok(dydt),
        _ => sim_err!(
            ShapeMismatch,
            format!(
                "derivative of a {}-element state evaluated to {}",
                y.len(),
                value.describe()
            )
        ),
    }
}

// y + h * k, elementwise
fn offset(y: &[f64], h: f64, k: &[f64]) -> Vec<f64> {
    y.iter().zip(k).map(|(y, k)| y + h * k).collect()
}

fn step(artifact: &Artifact, method: Method, t: f64, dt: f64, y: &mut [f64]) -> Result<()> {
    match method {
        Method::Euler => {
            let k = derivative(artifact, t, y)?;
            for (y, k) in y.iter_mut().zip(k) {
                *y += dt * k;
            }
        }
        Method::Rk4 => {
            let k1 = derivative(artifact, t, y)?;
            let k2 = derivative(artifact, t + dt / 2.0, &offset(y, dt / 2.0, &k1))?;
            let k3 = derivative(artifact, t + dt / 2.0, &offset(y, dt / 2.0, &k2))?;
            let k4 = derivative(artifact, t + dt, &offset(y, dt, &k3))?;
            for (i, y) in y.iter_mut().enumerate() {
                *y += dt / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
            }
        }
    }
    Ok(())
}

/// Integrates from `y0` over the interval in `specs`, saving a row every
/// `save_step`.
pub fn simulate(artifact: &Artifact, specs: &SimSpecs, y0: &[f64]) -> Result<Results> {
    let specs = specs.validate()?;
    let (dt, save_step) = (specs.dt, specs.save_step());

    let n_chunks: usize = ((specs.end_time - specs.start_time) / save_step + 1.0) as usize;
    let save_every = std::cmp::max(1, (save_step / dt + 0.5).floor() as usize);
    let step_size = y0.len() + 1;

    let mut data = vec![0.0; step_size * n_chunks].into_boxed_slice();
    let mut y = y0.to_vec();
    let mut steps_taken: usize = 0;

    for (chunk, row) in data.chunks_mut(step_size).enumerate() {
        if chunk > 0 {
            for _ in 0..save_every {
                let t = specs.start_time + steps_taken as f64 * dt;
                step(artifact, specs.method, t, dt, &mut y)?;
                steps_taken += 1;
            }
        }
        row[0] = specs.start_time + steps_taken as f64 * dt;
        row[1..].copy_from_slice(&y);
    }

    Ok(Results {
        data,
        step_size,
        step_count: n_chunks,
        specs,
    })
}
