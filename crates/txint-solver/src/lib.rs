//! Variable-order, variable-step BDF transient integrator for DAE systems of
//! the form `F(x,t) + dQ(x,t)/dt - B(t) = 0`.
//!
//! [`driver::TransientDriver`] is the entry point: it ties together
//! [`step_control::StepErrorControl`] (the scalar coefficient/order/step
//! state machine), [`bdf::BdfIntegrator`] (the vector-level predictor,
//! residual, and history rotation), and [`breakpoints::BreakpointSet`]
//! (discontinuity and pause scheduling) against a caller-supplied
//! [`loader::Loader`] and [`loader::NonlinearSolver`].

pub mod bdf;
pub mod breakpoints;
pub mod config;
pub mod driver;
pub mod error;
pub mod loader;
pub mod restart;
pub mod step_control;

pub use config::{ErrorNorm, IntegrationMethod, TimeIntegrationConfig, TransientSpan};
pub use driver::{RunSummary, StepHistoryLog, StepRecord, StopReason, TransientDriver};
pub use error::{Error, Result};
pub use loader::{AnalysisMode, ConvergenceStatus, Loader, NonlinearSolver, RhsContribution};
pub use step_control::{StepErrorControl, TiaAction, TuningConstants};
