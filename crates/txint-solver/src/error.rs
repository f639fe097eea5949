//! Error taxonomy for the transient integration core.
//!
//! The integrator itself never throws across its API: `StepErrorControl` and
//! `BdfIntegrator` report rejection through `StepOutcome`, not `Result::Err`.
//! This type exists for the failures that actually unwind: invalid
//! configuration caught before the loop starts, and the handful of
//! unrecoverable / internal-invariant conditions the driver can hit mid-run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// TSTOP <= TSTART, an unrecognized option, or any other malformed
    /// configuration caught before the transient loop starts.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A vector/weight length mismatch surfaced from the core crate.
    #[error(transparent)]
    Core(#[from] txint_core::Error),

    /// The step size fell below the machine-precision floor with no
    /// recovery budget left, or a constant-step run hit a nonlinear failure.
    #[error("unrecoverable step failure at t={time:.6e}, step {step_number}: {reason}")]
    UnrecoverableStep {
        time: f64,
        step_number: u64,
        reason: String,
    },

    /// A history slot was missing, a restart record's byte budget didn't
    /// match, or some other condition that should be structurally impossible.
    #[error("internal invariant violated: {0}")]
    InvariantViolated(String),

    /// A restart record failed to parse or had an inconsistent length.
    #[error("restart record error: {0}")]
    Restart(String),
}

pub type Result<T> = std::result::Result<T, Error>;
