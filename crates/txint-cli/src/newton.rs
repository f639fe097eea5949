//! A small dense Newton solver for the demo circuits.
//!
//! Real deployments plug in a sparse, possibly distributed nonlinear solver;
//! the toy circuits here have one or two unknowns, so a dense LU refactor
//! every iteration is plenty fast and keeps the demo self-contained.

use nalgebra::{DMatrix, DVector};
use txint_core::StateVector;
use txint_solver::loader::{AnalysisMode, ConvergenceStatus, Loader, NonlinearSolver};
use txint_solver::Result;

pub struct DenseNewtonSolver {
    pub max_iterations: usize,
    pub abs_tol: f64,
    iterations_used: usize,
    max_norm_f: f64,
    max_norm_f_index: usize,
}

impl DenseNewtonSolver {
    pub fn new(max_iterations: usize, abs_tol: f64) -> Self {
        Self {
            max_iterations,
            abs_tol,
            iterations_used: 0,
            max_norm_f: 0.0,
            max_norm_f_index: 0,
        }
    }
}

impl<L: Loader<Jacobian = DMatrix<f64>>> NonlinearSolver<L> for DenseNewtonSolver {
    fn solve(
        &mut self,
        loader: &mut L,
        x: &mut StateVector,
        t: f64,
        c_j: f64,
        qn0: &StateVector,
        qpn0: &StateVector,
    ) -> Result<ConvergenceStatus> {
        self.iterations_used = 0;
        for iter in 0..self.max_iterations {
            self.iterations_used = iter + 1;
            let rhs = loader.load_rhs(x, t);

            let mut residual = rhs.q.clone();
            residual.axpy(-1.0, qn0)?;
            residual.scale_mut(c_j);
            residual.add_assign(qpn0)?;
            residual.add_assign(&rhs.f)?;
            residual.axpy(-1.0, &rhs.b)?;

            let (worst, worst_idx) = residual
                .as_slice()
                .iter()
                .enumerate()
                .map(|(i, v)| (v.abs(), i))
                .fold((0.0, 0), |a, b| if b.0 > a.0 { b } else { a });
            self.max_norm_f = worst;
            self.max_norm_f_index = worst_idx;

            if worst < self.abs_tol {
                return Ok(ConvergenceStatus::Converged);
            }

            let jac = loader.load_jacobian(x, t, c_j);
            let neg_residual = DVector::from_vec(residual.as_slice().iter().map(|v| -v).collect());
            let Some(delta) = jac.clone().lu().solve(&neg_residual) else {
                return Ok(ConvergenceStatus::NormalFailure);
            };
            let delta_vec = StateVector::from_vec(delta.iter().copied().collect());
            x.add_assign(&delta_vec)?;

            let step_norm: f64 = delta_vec.as_slice().iter().map(|v| v * v).sum::<f64>().sqrt();
            if step_norm > 1e6 {
                return Ok(ConvergenceStatus::UpdateTooBig);
            }
        }
        Ok(ConvergenceStatus::TooManyIterations)
    }

    fn set_analysis_mode(&mut self, _mode: AnalysisMode) {}

    fn num_iterations(&self) -> usize {
        self.iterations_used
    }

    fn max_norm_f(&self) -> f64 {
        self.max_norm_f
    }

    fn max_norm_f_index(&self) -> usize {
        self.max_norm_f_index
    }
}
