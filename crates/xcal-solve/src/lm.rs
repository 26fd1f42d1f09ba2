//! Levenberg-Marquardt refinement on top of the `levenberg-marquardt` crate.
//!
//! Problems implement the small [`LeastSquaresProblem`] trait here (residuals
//! and an optional analytic Jacobian); [`minimize`] adapts them to the crate's
//! storage-generic trait and folds its termination into an [`LmReport`].

use levenberg_marquardt::{LevenbergMarquardt, TerminationReason};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

/// Nonlinear least-squares problem `min 0.5 * |r(x)|^2`.
pub trait LeastSquaresProblem {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of [`residuals`](Self::residuals); central differences unless
    /// overridden.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        numeric_jacobian(|p| self.residuals(p), x)
    }
}

/// Central-difference Jacobian of `f` at `x`.
pub fn numeric_jacobian(f: impl Fn(&DVector<f64>) -> DVector<f64>, x: &DVector<f64>) -> DMatrix<f64> {
    let r0 = f(x);
    let mut jac = DMatrix::zeros(r0.len(), x.len());
    let mut shifted = x.clone();
    for j in 0..x.len() {
        let h = 1e-6 * x[j].abs().max(1.0);
        shifted[j] = x[j] + h;
        let plus = f(&shifted);
        shifted[j] = x[j] - h;
        let minus = f(&shifted);
        shifted[j] = x[j];
        jac.set_column(j, &((plus - minus) / (2.0 * h)));
    }
    jac
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmOptions {
    /// Evaluation budget: the solver gives up after
    /// `max_iterations * (parameters + 1)` residual evaluations.
    pub max_iterations: usize,
    /// Relative cost reduction below which the solve has converged.
    pub ftol: f64,
    /// Relative step size below which the solve has converged.
    pub xtol: f64,
    /// Cosine between residual and Jacobian columns below which the solve
    /// has converged.
    pub gtol: f64,
    /// Initial trust-region radius factor.
    pub stepbound: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
            stepbound: 100.0,
        }
    }
}

/// Largest residual/Jacobian-column cosine a stalled solve may end with and
/// still count as converged.
pub const STALL_STATIONARITY: f64 = 1e-4;

/// RMS residual under which a solve is at an exact fit.
const EXACT_FIT_RMS: f64 = 1e-9;

#[derive(Debug, PartialEq)]
pub struct LmReport {
    /// Residual evaluations spent.
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub termination: TerminationReason,
    /// [`stationarity`] at the returned parameters.
    pub stationarity: f64,
}

impl LmReport {
    pub fn converged(&self) -> bool {
        match self.termination {
            TerminationReason::ResidualsZero
            | TerminationReason::Orthogonal
            | TerminationReason::Converged { .. } => true,
            TerminationReason::NoImprovementPossible(_) => {
                self.stationarity <= STALL_STATIONARITY
            }
            _ => false,
        }
    }
}

/// First-order optimality measure: the largest cosine between `r` and a
/// column of `jac`. Zero at an exact fit, infinite for non-finite input.
pub fn stationarity(jac: &DMatrix<f64>, r: &DVector<f64>) -> f64 {
    if r.iter().chain(jac.iter()).any(|v| !v.is_finite()) {
        return f64::INFINITY;
    }
    let r_norm = r.norm();
    if r.is_empty() || r_norm / (r.len() as f64).sqrt() <= EXACT_FIT_RMS {
        return 0.0;
    }
    jac.column_iter()
        .filter_map(|col| {
            let col_norm = col.norm();
            (col_norm > 0.0).then(|| col.dot(r).abs() / (col_norm * r_norm))
        })
        .fold(0.0, f64::max)
}

fn cost(r: &DVector<f64>) -> f64 {
    0.5 * r.norm_squared()
}

struct LmAdapter<'a, P: ?Sized> {
    problem: &'a P,
    params: DVector<f64>,
}

impl<P> levenberg_marquardt::LeastSquaresProblem<f64, Dyn, Dyn> for LmAdapter<'_, P>
where
    P: LeastSquaresProblem + ?Sized,
{
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.problem.residuals(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let jac = self.problem.jacobian(&self.params);
        jac.iter().all(|v| v.is_finite()).then_some(jac)
    }
}

fn non_negative(v: f64) -> f64 {
    if v >= 0.0 {
        v
    } else {
        0.0
    }
}

/// Minimise `problem` from `x0`.
pub fn minimize<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    x0: DVector<f64>,
    opts: &LmOptions,
) -> (DVector<f64>, LmReport) {
    let initial_cost = cost(&problem.residuals(&x0));

    let (x, iterations, termination) = if opts.max_iterations == 0 {
        (x0, 0, TerminationReason::LostPatience)
    } else {
        let stepbound = if opts.stepbound > 0.0 { opts.stepbound } else { 100.0 };
        let lm = LevenbergMarquardt::new()
            .with_ftol(non_negative(opts.ftol))
            .with_xtol(non_negative(opts.xtol))
            .with_gtol(non_negative(opts.gtol))
            .with_stepbound(stepbound)
            .with_patience(opts.max_iterations);
        let (adapter, report) = lm.minimize(LmAdapter {
            problem,
            params: x0,
        });
        (adapter.params, report.number_of_evaluations, report.termination)
    };

    let r = problem.residuals(&x);
    let report = LmReport {
        iterations,
        initial_cost,
        final_cost: cost(&r),
        termination,
        stationarity: stationarity(&problem.jacobian(&x), &r),
    };
    (x, report)
}
