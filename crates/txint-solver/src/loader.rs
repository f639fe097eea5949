//! External collaborator interfaces: the device-model loader and the
//! nonlinear (Newton) solver.
//!
//! Neither is implemented by this crate. Device evaluation, sparsity, and
//! distributed assembly belong to the loader; Newton iteration belongs to
//! the nonlinear solver. The integration core only needs the contracts below
//! to drive a step. `txint-cli` ships toy implementations for demonstration.

use txint_core::StateVector;

use crate::breakpoints::BreakpointKind;

/// Which phase of the analysis is asking the nonlinear solver to converge.
/// Solvers commonly relax tolerances for the DC operating point relative to
/// the transient phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    DcOperatingPoint,
    Transient,
}

/// The outcome of one nonlinear solve, collapsed from the solver's signed
/// integer convergence code down to the cases the driver actually branches
/// on. Any negative code not otherwise enumerated (NaN, small-update-near-
/// convergence, ...) is preserved in `Other` so the driver can still log it,
/// but is treated identically to `NormalFailure` for control-flow purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Converged,
    NormalFailure,
    TooManyIterations,
    UpdateTooBig,
    Stalled,
    Other(i32),
}

impl ConvergenceStatus {
    /// Reconstruct a status from the solver's raw convergence code:
    /// positive = converged, 0 = normal failure, -1/-2/-3 the enumerated
    /// failures, any other negative code falls into `Other`.
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c > 0 => ConvergenceStatus::Converged,
            0 => ConvergenceStatus::NormalFailure,
            -1 => ConvergenceStatus::TooManyIterations,
            -2 => ConvergenceStatus::UpdateTooBig,
            -3 => ConvergenceStatus::Stalled,
            c => ConvergenceStatus::Other(c),
        }
    }

    pub fn converged(self) -> bool {
        matches!(self, ConvergenceStatus::Converged)
    }

    /// True for the two failure modes `PASSNLSTALL` is allowed to promote to
    /// a pass when the step is already tiny.
    pub fn is_stall_or_oversized_update(self) -> bool {
        matches!(
            self,
            ConvergenceStatus::Stalled | ConvergenceStatus::UpdateTooBig
        )
    }
}

/// Residual/Jacobian contributions the loader assembles at a given `(x, t)`.
///
/// `q` and `f` are the DAE's charge-like and resistive/algebraic terms; `b`
/// is the independent-source forcing. The integrator forms the actual
/// residual `R` and Jacobian `J = c_j * dQ/dx + dF/dx` itself (see
/// [`crate::bdf`]); the loader only needs to supply these pieces and a
/// Jacobian handle the nonlinear solver already knows how to factor.
pub struct RhsContribution {
    pub q: StateVector,
    pub f: StateVector,
    pub b: StateVector,
}

/// The device-model evaluator. `J` is an opaque, loader-owned Jacobian
/// representation (dense, sparse, whatever the backend prefers) that the
/// paired [`NonlinearSolver`] knows how to factor and solve against.
pub trait Loader {
    type Jacobian;

    /// Number of unknowns in `x` (and hence in `q`, `f`, `b`).
    fn num_unknowns(&self) -> usize;

    /// Populate Q, F, B at the given solution and time.
    fn load_rhs(&mut self, x: &StateVector, t: f64) -> RhsContribution;

    /// Build the already-combined Jacobian `c_j * dQ/dx + dF/dx`.
    fn load_jacobian(&mut self, x: &StateVector, t: f64, c_j: f64) -> Self::Jacobian;

    /// Re-evaluate time-dependent independent sources ahead of a solve.
    fn update_sources(&mut self, t: f64);

    /// Called once a step is accepted, before history rotation. Devices with
    /// their own internal history (e.g. transmission lines) latch state here.
    fn accept_step(&mut self);

    fn step_success(&mut self, mode: AnalysisMode);
    fn step_failure(&mut self, mode: AnalysisMode);

    /// Device-specific output (e.g. mesh-based fields); called once per
    /// accepted step, before history is rotated.
    fn output(&mut self);
    fn finish_output(&mut self);

    /// Seed for two-level error aggregation: the wRMS-equivalent norm of Q
    /// at step 0, used by an outer integrator's error test.
    fn initial_qnorm(&self) -> f64 {
        0.0
    }

    /// Breakpoints the loader wants to contribute this step (e.g. a pulse
    /// source's next edge). May be called after any accepted step.
    fn break_points(&self) -> Vec<(f64, BreakpointKind)> {
        Vec::new()
    }

    /// An optional device-driven cap on the step size (e.g. a
    /// time-dependent `MAXTIMEEXPRESSION`).
    fn max_time_step(&self) -> Option<f64> {
        None
    }

    /// Called once before the first step.
    fn set_initial_guess(&mut self, _x: &mut StateVector) {}
}

/// The nonlinear (Newton) solver. A black box from the integrator's point of
/// view: it is handed the loader, the predictor state the BDF corrector
/// equation is centered on (`qn0`, `qpn0`), and `c_j`, and asked to converge
/// `x` at time `t`. The combined residual it drives to zero is
/// `c_j*(Q(x)-qn0) + F(x) - qpn0 - B(x,t)`; forming it is the solver's job
/// since only it knows how to interleave residual evaluation with its own
/// Jacobian updates.
pub trait NonlinearSolver<L: Loader> {
    #[allow(clippy::too_many_arguments)]
    fn solve(
        &mut self,
        loader: &mut L,
        x: &mut StateVector,
        t: f64,
        c_j: f64,
        qn0: &StateVector,
        qpn0: &StateVector,
    ) -> crate::error::Result<ConvergenceStatus>;

    fn set_analysis_mode(&mut self, mode: AnalysisMode);

    fn num_iterations(&self) -> usize;
    fn max_norm_f(&self) -> f64;
    fn max_norm_f_index(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convergence_status_from_code() {
        assert_eq!(ConvergenceStatus::from_code(5), ConvergenceStatus::Converged);
        assert_eq!(ConvergenceStatus::from_code(0), ConvergenceStatus::NormalFailure);
        assert_eq!(ConvergenceStatus::from_code(-1), ConvergenceStatus::TooManyIterations);
        assert_eq!(ConvergenceStatus::from_code(-2), ConvergenceStatus::UpdateTooBig);
        assert_eq!(ConvergenceStatus::from_code(-3), ConvergenceStatus::Stalled);
        assert_eq!(ConvergenceStatus::from_code(-7), ConvergenceStatus::Other(-7));
    }

    #[test]
    fn stall_promotion_predicate() {
        assert!(ConvergenceStatus::Stalled.is_stall_or_oversized_update());
        assert!(ConvergenceStatus::UpdateTooBig.is_stall_or_oversized_update());
        assert!(!ConvergenceStatus::TooManyIterations.is_stall_or_oversized_update());
        assert!(!ConvergenceStatus::Converged.is_stall_or_oversized_update());
    }
}
