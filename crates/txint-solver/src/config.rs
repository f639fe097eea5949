//! `.OPTIONS TIMEINT`-style configuration: the tunables a netlist (or a
//! programmatic caller) sets before a transient run starts, resolved into
//! the typed structures [`crate::step_control::StepErrorControl`] and
//! [`crate::driver::TransientDriver`] are built from.

use txint_core::ToleranceSpec;

use crate::error::{Error, Result};
use crate::step_control::TuningConstants;

/// Selects which BDF order ladder entry is used; `Gear` aliases to the same
/// variable-order BDF corrector with a different default order ceiling,
/// matching how the reference options set exposes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationMethod {
    BackwardDifferentiation,
    TrapezoidOneStep,
}

/// Which error estimate the order/step control reads: the joint
/// solution+charge wRMS norm, or the solution-only norm (`NEWLTE=0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorNorm {
    Joint,
    SolutionOnly,
}

/// Builder for the run-wide transient configuration. Mirrors the option
/// tags a `.OPTIONS TIMEINT` line would carry: tolerances, order bounds,
/// step bounds, and the handful of policy toggles (stall promotion, fixed
/// error-analysis mode, history-tracking depth).
#[derive(Debug, Clone)]
pub struct TimeIntegrationConfig {
    pub method: IntegrationMethod,
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub min_order: usize,
    pub max_order: usize,
    pub error_norm: ErrorNorm,
    pub nl_iters_min: usize,
    pub nl_iters_max: usize,
    pub timesteps_reversal: bool,
    pub max_time_step: f64,
    pub min_time_step: f64,
    pub starting_time_step: f64,
    pub pass_nl_stall: bool,
    pub min_time_step_recovery: f64,
    pub error_analysis_option: u8,
    pub history_tracking_depth: usize,
    pub constant_step_size: bool,
    pub breakpoint_tolerance: f64,
    pub tuning: TuningConstants,
}

impl Default for TimeIntegrationConfig {
    fn default() -> Self {
        Self {
            method: IntegrationMethod::BackwardDifferentiation,
            rel_tol: 1e-3,
            abs_tol: 1e-9,
            min_order: 1,
            max_order: 5,
            error_norm: ErrorNorm::Joint,
            nl_iters_min: 0,
            nl_iters_max: 0,
            timesteps_reversal: false,
            max_time_step: f64::INFINITY,
            min_time_step: 0.0,
            starting_time_step: 0.0,
            pass_nl_stall: false,
            min_time_step_recovery: 1e-9,
            error_analysis_option: 0,
            history_tracking_depth: 32,
            constant_step_size: false,
            breakpoint_tolerance: 1e-10,
            tuning: TuningConstants::default(),
        }
    }
}

impl TimeIntegrationConfig {
    pub fn with_tolerances(mut self, rel_tol: f64, abs_tol: f64) -> Self {
        self.rel_tol = rel_tol;
        self.abs_tol = abs_tol;
        self
    }

    pub fn with_order_bounds(mut self, min_order: usize, max_order: usize) -> Self {
        self.min_order = min_order;
        self.max_order = max_order;
        self
    }

    pub fn with_newlte(mut self, solution_only: bool) -> Self {
        self.error_norm = if solution_only {
            ErrorNorm::SolutionOnly
        } else {
            ErrorNorm::Joint
        };
        self
    }

    pub fn with_max_time_step(mut self, delmax: f64) -> Self {
        self.max_time_step = delmax;
        self
    }

    pub fn with_pass_nl_stall(mut self, enabled: bool) -> Self {
        self.pass_nl_stall = enabled;
        self
    }

    pub fn with_constant_step_size(mut self, enabled: bool) -> Self {
        self.constant_step_size = enabled;
        self
    }

    pub fn with_history_tracking_depth(mut self, depth: usize) -> Self {
        self.history_tracking_depth = depth;
        self
    }

    /// Validates the assembled configuration, surfacing the kind of
    /// mistake a hand-written options line tends to contain.
    pub fn validate(&self) -> Result<()> {
        if self.min_order == 0 || self.min_order > self.max_order {
            return Err(Error::InvalidConfig(format!(
                "min_order {} must be >= 1 and <= max_order {}",
                self.min_order, self.max_order
            )));
        }
        if self.max_order > 5 {
            return Err(Error::InvalidConfig(format!(
                "max_order {} exceeds the BDF1-5 ceiling",
                self.max_order
            )));
        }
        if self.rel_tol < 0.0 || self.abs_tol <= 0.0 {
            return Err(Error::InvalidConfig(
                "RELTOL must be >= 0 and ABSTOL must be > 0".into(),
            ));
        }
        if self.min_time_step < 0.0 || self.max_time_step <= 0.0 {
            return Err(Error::InvalidConfig(
                "MINTIMESTEP must be >= 0 and DELMAX must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn tolerance_spec(&self) -> Result<ToleranceSpec> {
        Ok(ToleranceSpec::new(self.rel_tol, self.abs_tol)?)
    }
}

/// `TSTART`/`TSTOP`/initial-step bounds for one transient analysis run.
#[derive(Debug, Clone, Copy)]
pub struct TransientSpan {
    pub t_start: f64,
    pub t_stop: f64,
    pub initial_time: f64,
    pub use_initial_conditions: bool,
}

impl TransientSpan {
    pub fn new(t_start: f64, t_stop: f64) -> Result<Self> {
        if t_stop <= t_start {
            return Err(Error::InvalidConfig(format!(
                "TSTOP {t_stop} must be greater than TSTART {t_start}"
            )));
        }
        Ok(Self {
            t_start,
            t_stop,
            initial_time: t_start,
            use_initial_conditions: false,
        })
    }

    pub fn with_uic(mut self, enabled: bool) -> Self {
        self.use_initial_conditions = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(TimeIntegrationConfig::default().validate().is_ok());
    }

    #[test]
    fn max_order_above_five_rejected() {
        let cfg = TimeIntegrationConfig::default().with_order_bounds(1, 7);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tstop_before_tstart_rejected() {
        assert!(TransientSpan::new(5.0, 1.0).is_err());
    }

    #[test]
    fn builder_chain_sets_fields() {
        let cfg = TimeIntegrationConfig::default()
            .with_tolerances(1e-6, 1e-12)
            .with_order_bounds(1, 2)
            .with_newlte(true)
            .with_pass_nl_stall(true);
        assert_eq!(cfg.rel_tol, 1e-6);
        assert_eq!(cfg.max_order, 2);
        assert_eq!(cfg.error_norm, ErrorNorm::SolutionOnly);
        assert!(cfg.pass_nl_stall);
    }
}
