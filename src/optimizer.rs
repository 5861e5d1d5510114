//! Derivative-free minimization with the Nelder-Mead simplex method.
//!
//! The optimizer owns no global state: the simplex and its objective values
//! live inside one [`NelderMead::minimize`] call, and vertex ordering uses a
//! comparator over that call's own values. Independent minimizations can
//! therefore run concurrently.

use crate::{
    config::OptimizerConfig,
    constants::{SIMPLEX_CHI, SIMPLEX_PSI, SIMPLEX_RHO, SIMPLEX_SIGMA},
};
use log::trace;
use nalgebra::DVector;

/// Why the optimizer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Both value and vertex spread fell below tolerance
    Converged,
    /// Iteration budget exhausted
    IterationLimit,
    /// Objective evaluation budget exhausted
    EvaluationLimit,
}

/// Best vertex found by a minimization
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Location of the best vertex
    pub point: DVector<f64>,
    /// Objective value at `point`
    pub value: f64,
    /// Iterations performed, counting simplex setup as the first
    pub iterations: usize,
    /// Objective evaluations performed
    pub evaluations: usize,
    /// Stop reason
    pub termination: Termination,
}

/// Simplex of `n + 1` vertices kept sorted by objective value
struct Simplex {
    vertices: Vec<DVector<f64>>,
    values: Vec<f64>,
}

impl Simplex {
    fn sort(&mut self) {
        let values = &self.values;
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

        self.vertices = order.iter().map(|&i| self.vertices[i].clone()).collect();
        self.values = order.iter().map(|&i| self.values[i]).collect();
    }

    fn worst(&self) -> usize {
        self.vertices.len() - 1
    }

    /// Centroid of every vertex except the worst
    fn centroid(&self) -> DVector<f64> {
        let n = self.worst();
        let mut sum = DVector::zeros(self.vertices[0].len());
        for vertex in &self.vertices[..n] {
            sum += vertex;
        }
        sum / n as f64
    }

    /// Largest objective gap to the best vertex
    fn value_spread(&self) -> f64 {
        let best = self.values[0];
        self.values[1..].iter().map(|v| (best - v).abs()).fold(0.0, f64::max)
    }

    /// Largest coordinate gap to the best vertex
    fn vertex_spread(&self) -> f64 {
        let best = &self.vertices[0];
        self.vertices[1..]
            .iter()
            .map(|v| (v - best).amax())
            .fold(0.0, f64::max)
    }
}

/// Nelder-Mead minimizer with reflection 1, expansion 2, contraction 0.5, shrink 0.5
#[derive(Debug, Clone)]
pub struct NelderMead {
    max_iterations: usize,
    max_evaluations: usize,
    tol_x: f64,
    tol_f: f64,
    usual_delta: f64,
    zero_term_delta: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self::new(&OptimizerConfig::default())
    }
}

impl NelderMead {
    /// Create a minimizer from configuration
    #[must_use]
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_evaluations: config.max_evaluations,
            tol_x: config.tol_x,
            tol_f: config.tol_f,
            usual_delta: config.usual_delta,
            zero_term_delta: config.zero_term_delta,
        }
    }

    /// Minimize `objective` starting from `start`
    ///
    /// Never fails: when a budget runs out the best vertex so far is
    /// returned. Budgets are checked before each iteration, so a final
    /// iteration may overshoot the evaluation budget by at most `n + 1`.
    pub fn minimize<F>(&self, start: &DVector<f64>, mut objective: F) -> Minimum
    where
        F: FnMut(&DVector<f64>) -> f64,
    {
        let n = start.len();
        let mut vertices = Vec::with_capacity(n + 1);
        let mut values = Vec::with_capacity(n + 1);

        vertices.push(start.clone());
        values.push(objective(start));

        // Perturb one coordinate per vertex
        for j in 0..n {
            let mut y = start.clone();
            if y[j] == 0.0 {
                y[j] = self.zero_term_delta;
            } else {
                y[j] *= 1.0 + self.usual_delta;
            }
            values.push(objective(&y));
            vertices.push(y);
        }

        let mut simplex = Simplex { vertices, values };
        simplex.sort();

        let mut evaluations = n + 1;
        let mut iterations = 1;
        let mut converged = false;

        while evaluations < self.max_evaluations && iterations < self.max_iterations {
            if simplex.value_spread() <= self.tol_f && simplex.vertex_spread() <= self.tol_x {
                converged = true;
                break;
            }

            let worst = simplex.worst();
            let xbar = simplex.centroid();
            let xr = &xbar * (1.0 + SIMPLEX_RHO) - &simplex.vertices[worst] * SIMPLEX_RHO;
            let fxr = objective(&xr);
            evaluations += 1;

            let step = if fxr < simplex.values[0] {
                let xe = &xbar * (1.0 + SIMPLEX_RHO * SIMPLEX_CHI) - &simplex.vertices[worst] * (SIMPLEX_RHO * SIMPLEX_CHI);
                let fxe = objective(&xe);
                evaluations += 1;

                if fxe < fxr {
                    simplex.vertices[worst] = xe;
                    simplex.values[worst] = fxe;
                    "expand"
                } else {
                    simplex.vertices[worst] = xr;
                    simplex.values[worst] = fxr;
                    "reflect"
                }
            } else if fxr < simplex.values[worst - 1] {
                simplex.vertices[worst] = xr;
                simplex.values[worst] = fxr;
                "reflect"
            } else {
                let contracted = if fxr < simplex.values[worst] {
                    let xc = &xbar * (1.0 + SIMPLEX_PSI * SIMPLEX_RHO) - &simplex.vertices[worst] * (SIMPLEX_PSI * SIMPLEX_RHO);
                    let fxc = objective(&xc);
                    evaluations += 1;
                    (fxc <= fxr).then_some((xc, fxc, "contract outside"))
                } else {
                    let xcc = &xbar * (1.0 - SIMPLEX_PSI) + &simplex.vertices[worst] * SIMPLEX_PSI;
                    let fxcc = objective(&xcc);
                    evaluations += 1;
                    (fxcc < simplex.values[worst]).then_some((xcc, fxcc, "contract inside"))
                };

                if let Some((point, value, how)) = contracted {
                    simplex.vertices[worst] = point;
                    simplex.values[worst] = value;
                    how
                } else {
                    let best = simplex.vertices[0].clone();
                    for j in 1..=worst {
                        let shrunk = &best + (&simplex.vertices[j] - &best) * SIMPLEX_SIGMA;
                        simplex.values[j] = objective(&shrunk);
                        simplex.vertices[j] = shrunk;
                    }
                    evaluations += worst;
                    "shrink"
                }
            };

            simplex.sort();
            iterations += 1;
            trace!("iteration {:3} evals {:3} f = {:.6e} {}", iterations, evaluations, simplex.values[0], step);
        }

        let termination = if converged {
            Termination::Converged
        } else if evaluations >= self.max_evaluations {
            Termination::EvaluationLimit
        } else {
            Termination::IterationLimit
        };

        Minimum {
            point: simplex.vertices.swap_remove(0),
            value: simplex.values[0],
            iterations,
            evaluations,
            termination,
        }
    }
}
