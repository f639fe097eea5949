//! The transient analysis loop: predict, ask the loader to refresh sources,
//! hand the corrector to the nonlinear solver, evaluate the step error,
//! accept or reject, and repeat until a pause point or the stop time.
//!
//! Mirrors the reference driver's `loopProcess` structure: a DC operating
//! point phase that seeds history, then a transient phase that advances
//! step by step, checking breakpoints and the stall-promotion rule on every
//! iteration.

use log::{debug, info, warn};

use txint_core::{GlobalReduce, LocalReduce, StateVector, ToleranceSpec};

use crate::bdf::{BdfIntegrator, DataStore};
use crate::breakpoints::BreakpointSet;
use crate::config::{ErrorNorm, TimeIntegrationConfig, TransientSpan};
use crate::error::{Error, Result};
use crate::loader::{AnalysisMode, ConvergenceStatus, Loader, NonlinearSolver};
use crate::step_control::{OrderErrorNorms, StepErrorControl, TuningConstants};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ReachedStopTime,
    Paused,
    StepBudgetExhausted,
}

/// One row of the in-memory step history, kept for diagnostics and for the
/// "worst offender" report a rejected run can ask for.
#[derive(Debug, Clone, Copy)]
pub struct StepRecord {
    pub time: f64,
    pub step: f64,
    pub order: usize,
    pub accepted: bool,
    pub newton_iterations: usize,
    pub worst_offender_index: usize,
}

/// Fixed-depth ring buffer of recent [`StepRecord`]s.
pub struct StepHistoryLog {
    records: Vec<StepRecord>,
    capacity: usize,
    next: usize,
    filled: bool,
}

impl StepHistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            next: 0,
            filled: false,
        }
    }

    pub fn push(&mut self, record: StepRecord) {
        if self.records.len() < self.capacity {
            self.records.push(record);
        } else {
            self.records[self.next] = record;
            self.filled = true;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Oldest-to-newest view of whatever is currently retained.
    pub fn iter(&self) -> impl Iterator<Item = &StepRecord> {
        let (tail, head) = if self.filled {
            self.records.split_at(self.next)
        } else {
            self.records.split_at(0)
        };
        head.iter().chain(tail.iter())
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.iter().last()
    }
}

/// Outcome of one call to [`TransientDriver::run`].
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub steps_attempted: u64,
    pub steps_accepted: u64,
    pub final_time: f64,
}

/// Orchestrates a full transient run against a [`Loader`]/[`NonlinearSolver`]
/// pair. Owns the scalar and vector integrator state; the loader owns the
/// device physics, the nonlinear solver owns the Newton iteration.
pub struct TransientDriver<L: Loader, N: NonlinearSolver<L>> {
    pub bdf: BdfIntegrator,
    pub breakpoints: BreakpointSet,
    pub span: TransientSpan,
    pub config: TimeIntegrationConfig,
    pub history_log: StepHistoryLog,
    current_time: f64,
    beginning_integration: bool,
    dcop_flag: bool,
    errors_since_reset: u32,
    _marker: std::marker::PhantomData<(L, N)>,
}

impl<L: Loader, N: NonlinearSolver<L>> TransientDriver<L, N> {
    pub fn new(config: TimeIntegrationConfig, span: TransientSpan, loader: &L) -> Result<Self> {
        config.validate()?;
        let n = loader.num_unknowns();
        let mut sec = StepErrorControl::new(config.min_order, config.max_order, config.tuning);
        sec.min_step = config.min_time_step;
        sec.max_step = config.max_time_step;
        sec.constant_step_size = config.constant_step_size;
        sec.error_analysis_option = config.error_analysis_option;
        sec.use_joint_norm = matches!(config.error_norm, ErrorNorm::Joint);

        let data = DataStore::new(n, n, n, n);
        // Merge tolerance defaults to 2*minTimeStep, matching the reference
        // rule for "close enough to be the same breakpoint"; an explicit
        // config value overrides it only if set larger.
        let merge_tolerance = config.breakpoint_tolerance.max(2.0 * config.min_time_step);
        let mut breakpoints = BreakpointSet::new(merge_tolerance);
        breakpoints.initialize(span.initial_time, span.t_start, span.t_stop);

        Ok(Self {
            bdf: BdfIntegrator::new(sec, data),
            breakpoints,
            span,
            history_log: StepHistoryLog::new(config.history_tracking_depth),
            current_time: span.initial_time,
            beginning_integration: true,
            dcop_flag: true,
            errors_since_reset: 0,
            config,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// The solution at `current_time`, i.e. `x_history` slot 0 after the
    /// last accepted step.
    pub fn last_solution(&self) -> &StateVector {
        self.bdf.data.x_history.slot(0)
    }

    /// Rejected steps since the last accepted one. Resets to zero on every
    /// acceptance; a caller driving `ERROROPTION` resets off of this rather
    /// than `StepErrorControl::nef`, which only counts failures within the
    /// current step-size collapse.
    pub fn consecutive_rejections(&self) -> u32 {
        self.errors_since_reset
    }

    /// Runs until a `Pause` breakpoint is reached, the stop time is reached,
    /// or `max_steps` attempts are made (whichever comes first).
    pub fn run(&mut self, loader: &mut L, solver: &mut N, max_steps: u64) -> Result<RunSummary> {
        let tol = self.config.tolerance_spec()?;
        let mut steps_attempted = 0u64;
        let mut steps_accepted = 0u64;

        if self.dcop_flag {
            solver.set_analysis_mode(AnalysisMode::DcOperatingPoint);
            self.run_dcop(loader, solver, &tol)?;
        }
        solver.set_analysis_mode(AnalysisMode::Transient);

        loop {
            if steps_attempted >= max_steps {
                return Ok(RunSummary {
                    stop_reason: StopReason::StepBudgetExhausted,
                    steps_attempted,
                    steps_accepted,
                    final_time: self.current_time,
                });
            }
            steps_attempted += 1;

            let accepted = self.take_step(loader, solver, &tol)?;
            if accepted {
                steps_accepted += 1;
                if let Some(pause) = self.breakpoints.pause_time() {
                    if (pause - self.current_time).abs() < self.breakpoints.merge_tolerance() {
                        self.breakpoints.simulation_paused(self.current_time);
                        info!("paused at t={:.6e}", self.current_time);
                        return Ok(RunSummary {
                            stop_reason: StopReason::Paused,
                            steps_attempted,
                            steps_accepted,
                            final_time: self.current_time,
                        });
                    }
                }
                if self.current_time >= self.span.t_stop {
                    return Ok(RunSummary {
                        stop_reason: StopReason::ReachedStopTime,
                        steps_attempted,
                        steps_accepted,
                        final_time: self.current_time,
                    });
                }
            }
        }
    }

    fn run_dcop(&mut self, loader: &mut L, solver: &mut N, tol: &ToleranceSpec) -> Result<()> {
        let mut x = StateVector::zeros(loader.num_unknowns());
        loader.set_initial_guess(&mut x);
        loader.update_sources(self.span.initial_time);
        let zero = StateVector::zeros(x.len());
        let status = solver.solve(loader, &mut x, self.span.initial_time, 0.0, &zero, &zero)?;
        if !status.converged() {
            return Err(Error::UnrecoverableStep {
                time: self.span.initial_time,
                step_number: 0,
                reason: "DC operating point failed to converge".into(),
            });
        }
        let rhs = loader.load_rhs(&x, self.span.initial_time);
        let zeros = StateVector::zeros(x.len());
        let step = self.starting_step(loader, tol);
        self.bdf
            .data
            .begin_integration(&x, &rhs.q, &rhs.f, &zeros, &zeros, &zeros, step)?;
        self.bdf.sec.begin_integration(step);
        self.current_time = self.span.initial_time;
        self.beginning_integration = true;
        self.dcop_flag = false;
        Ok(())
    }

    fn starting_step(&self, loader: &L, _tol: &ToleranceSpec) -> f64 {
        let time_to_stop = self.span.t_stop - self.span.initial_time;
        let user_step = self.config.starting_time_step;
        self.bdf
            .compute_initial_step(time_to_stop, loader.initial_qnorm(), user_step, true, 0.0, &LocalReduce)
    }

    /// One predict/solve/correct/accept-or-reject cycle.
    fn take_step(&mut self, loader: &mut L, solver: &mut N, tol: &ToleranceSpec) -> Result<bool> {
        self.bdf.sec.update_coeffs();
        let (x_pred, qp_pred) = self.bdf.obtain_predictor()?;
        let mut x = x_pred.clone();
        let t_next = self.current_time + self.bdf.sec.current_step;

        loader.update_sources(t_next);
        let c_j = self.bdf.sec.c_j;
        let qn0 = self.bdf.data.q_history.slot(0).clone();
        let status = solver.solve(loader, &mut x, t_next, c_j, &qn0, &qp_pred)?;

        let mut accepted = status.converged();
        if !accepted && self.config.pass_nl_stall && status.is_stall_or_oversized_update() {
            if self.bdf.sec.current_step <= self.config.min_time_step_recovery {
                warn!(
                    "promoting stalled/oversized-update step to a pass near the step floor (t={:.6e})",
                    t_next
                );
                accepted = true;
            }
        }

        let correction = {
            let mut c = x.clone();
            c.axpy(-1.0, &x_pred)?;
            c
        };

        let record_order = self.bdf.sec.current_order;
        if !accepted {
            let weights = tol.error_weights(&x_pred);
            let dnorm = correction.wrms_norm(&weights, &LocalReduce).unwrap_or(f64::MAX);
            let outcome = self
                .bdf
                .sec
                .reject_step(status, OrderErrorNorms { dnorm, ..Default::default() });
            if outcome.restore_history {
                self.bdf.restore_history();
            }
            self.errors_since_reset += 1;
            self.history_log.push(StepRecord {
                time: t_next,
                step: self.bdf.sec.current_step,
                order: record_order,
                accepted: false,
                newton_iterations: solver.num_iterations(),
                worst_offender_index: solver.max_norm_f_index(),
            });
            if self.bdf.sec.current_step < self.config.min_time_step_recovery
                && self.bdf.sec.nef > 6
            {
                return Err(Error::UnrecoverableStep {
                    time: t_next,
                    step_number: self.bdf.sec.number_of_steps,
                    reason: "step size collapsed below the recovery floor".into(),
                });
            }
            return Ok(false);
        }

        let rhs = loader.load_rhs(&x, t_next);
        let qn0 = self.bdf.data.q_history.slot(0).clone();
        let residual = self.bdf.obtain_residual(&rhs.q, &rhs.f, &qn0, &qp_pred)?;
        debug!(
            "accepted step t={:.6e} h={:.3e} order={} |R|={:.3e}",
            t_next,
            self.bdf.sec.current_step,
            self.bdf.sec.current_order,
            residual.as_slice().iter().cloned().fold(0.0, f64::max)
        );

        let x_weights = tol.error_weights(&x);
        let q_weights = tol.error_weights(&rhs.q);
        let dnorm_x = correction.wrms_norm(&x_weights, &LocalReduce)?;
        let dnorm = if self.bdf.sec.use_joint_norm {
            let q_correction = {
                let mut c = rhs.q.clone();
                c.axpy(-1.0, &qn0)?;
                c
            };
            let sq_x = correction.partial_sq_sum(&x_weights)?;
            let sq_q = q_correction.partial_sq_sum(&q_weights)?;
            let n = (correction.len() + q_correction.len()).max(1) as f64;
            ((sq_x + sq_q) / n).sqrt()
        } else {
            dnorm_x
        };

        loader.accept_step();
        self.bdf.update_history(&correction)?;
        let zero = StateVector::zeros(correction.len());
        self.bdf
            .update_secondary_histories(&rhs.q, &zero, &zero, &zero)?;

        let dnorm_kp1 = self.bdf.order_kp1_norm(&x_weights, &LocalReduce)?;
        let action = self.bdf.sec.complete_step(OrderErrorNorms {
            dnorm,
            dnorm_kp1,
            ..Default::default()
        });
        debug!("order action {:?}, next order={}", action, self.bdf.sec.current_order);
        self.errors_since_reset = 0;
        loader.step_success(AnalysisMode::Transient);
        loader.output();
        self.current_time = t_next;
        self.beginning_integration = false;

        let entries = loader.break_points();
        self.breakpoints.update_from_loader(&entries, self.current_time);
        self.breakpoints.purge_up_to(self.current_time);
        if let Some(max_step) = loader.max_time_step() {
            self.bdf.sec.max_step = self.bdf.sec.max_step.min(max_step);
        }
        if let Some(next_bp) = self.breakpoints.next_stop_after(self.current_time) {
            let remaining = next_bp - self.current_time;
            if remaining < self.bdf.sec.current_step {
                self.bdf.sec.current_step = remaining.max(self.bdf.sec.min_step);
            }
        }
        self.bdf.sec.current_step = self.bdf.sec.current_step.min(self.span.t_stop - self.current_time).max(0.0);

        self.history_log.push(StepRecord {
            time: self.current_time,
            step: self.bdf.sec.used_step,
            order: self.bdf.sec.used_order,
            accepted: true,
            newton_iterations: solver.num_iterations(),
            worst_offender_index: solver.max_norm_f_index(),
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_history_log_wraps_at_capacity() {
        let mut log = StepHistoryLog::new(3);
        for i in 0..5 {
            log.push(StepRecord {
                time: i as f64,
                step: 1e-3,
                order: 1,
                accepted: true,
                newton_iterations: 3,
                worst_offender_index: 0,
            });
        }
        let times: Vec<f64> = log.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn step_history_log_under_capacity_preserves_order() {
        let mut log = StepHistoryLog::new(5);
        for i in 0..3 {
            log.push(StepRecord {
                time: i as f64,
                step: 1e-3,
                order: 1,
                accepted: true,
                newton_iterations: 1,
                worst_offender_index: 0,
            });
        }
        let times: Vec<f64> = log.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
    }
}
