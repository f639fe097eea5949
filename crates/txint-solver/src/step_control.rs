//! Step-size and order control for the BDF corrector.
//!
//! This is the scalar state machine: it owns the six-element coefficient
//! arrays (`alpha`, `beta`, `gamma`, `sigma`, `psi`), the derived scalars
//! (`alpha_s`, `alpha_0`, `c_j`, `c_k`), and the accept/reject/raise/lower
//! decisions. It never touches a [`txint_core::StateVector`] directly —
//! [`crate::bdf::BdfIntegrator`] supplies already-reduced wRMS norms and
//! applies the resulting step/order/history changes to the actual history
//! arrays.

use crate::loader::ConvergenceStatus;

pub const MAX_ORDER: usize = 5;

/// What `complete_step` decided to do to the order for the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TiaAction {
    Raise,
    Lower,
    #[default]
    Maintain,
    Unset,
}

/// Tuning constants governing the accept/reject/order decisions. Defaults
/// match the values embedded in the reference step-control implementation.
#[derive(Debug, Clone, Copy)]
pub struct TuningConstants {
    pub r_safety: f64,
    pub r_fudge: f64,
    pub r_min: f64,
    pub r_max: f64,
    pub r_factor: f64,
    pub r_hincr: f64,
    pub r_hincr_test: f64,
    pub h_phase0_incr: f64,
    pub tkm1_tk_safety: f64,
    pub tkp1_tk_safety: f64,
    pub h0_safety: f64,
    pub h0_max_factor: f64,
}

impl Default for TuningConstants {
    fn default() -> Self {
        Self {
            r_safety: 2.0,
            r_fudge: 0.0001,
            r_min: 0.25,
            r_max: 0.9,
            r_factor: 0.9,
            r_hincr: 2.0,
            r_hincr_test: 2.0,
            h_phase0_incr: 2.0,
            tkm1_tk_safety: 1.0,
            tkp1_tk_safety: 1.0,
            h0_safety: 2.0,
            h0_max_factor: 0.001,
        }
    }
}

/// The per-order wRMS norms `check_reduce_order` needs. Computed by the
/// caller from the history-array deltas, since forming them requires vector
/// operations this module has no business doing.
///
/// `dnorm_kp1` is the wRMS norm of the order-`(current_order + 1)` divided
/// difference (history slot `current_order + 1`, freshly rotated in by the
/// just-accepted step), not a Newton correction — there is no correction at
/// an order nothing was solved at. `None` when `current_order == max_order`,
/// since there is no such slot to judge raising into.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderErrorNorms {
    pub dnorm: f64,
    pub dnorm_km1: Option<f64>,
    pub dnorm_km2: Option<f64>,
    pub dnorm_kp1: Option<f64>,
}

/// What the caller must do to its history arrays after a rejected step.
#[derive(Debug, Clone, Copy)]
pub struct RejectOutcome {
    pub restore_history: bool,
    pub rescale_first_step: Option<f64>,
}

/// Scalar BDF step/order control state: coefficient arrays, order, step
/// size, and the bookkeeping the accept/reject decisions need.
#[derive(Debug, Clone)]
pub struct StepErrorControl {
    pub alpha: [f64; MAX_ORDER + 1],
    pub beta: [f64; MAX_ORDER + 1],
    pub gamma: [f64; MAX_ORDER + 1],
    pub sigma: [f64; MAX_ORDER + 1],
    pub psi: [f64; MAX_ORDER + 1],

    pub alpha_s: f64,
    pub alpha_0: f64,
    pub c_j: f64,
    pub c_k: f64,

    pub current_order: usize,
    pub used_order: usize,
    pub new_order: usize,
    pub min_order: usize,
    pub max_order: usize,

    pub current_step: f64,
    pub used_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub starting_step: f64,

    pub nscsco: usize,
    pub nef: u32,
    pub number_of_steps: u64,
    pub initial_phase: bool,
    pub constant_step_size: bool,
    pub error_analysis_option: u8,
    pub use_joint_norm: bool,

    pub e_k: f64,
    pub e_km1: f64,
    pub e_km2: f64,
    pub e_kp1: f64,
    pub t_k: f64,
    pub t_km1: f64,
    pub t_km2: f64,
    pub t_kp1: f64,
    pub est: f64,

    pub tuning: TuningConstants,
}

impl StepErrorControl {
    pub fn new(min_order: usize, max_order: usize, tuning: TuningConstants) -> Self {
        let max_order = max_order.min(MAX_ORDER).max(min_order);
        Self {
            alpha: [0.0; MAX_ORDER + 1],
            beta: [0.0; MAX_ORDER + 1],
            gamma: [0.0; MAX_ORDER + 1],
            sigma: [0.0; MAX_ORDER + 1],
            psi: [0.0; MAX_ORDER + 1],
            alpha_s: 0.0,
            alpha_0: 0.0,
            c_j: 0.0,
            c_k: 0.0,
            current_order: 1,
            used_order: 1,
            new_order: 1,
            min_order: min_order.max(1),
            max_order,
            current_step: 0.0,
            used_step: 0.0,
            min_step: 0.0,
            max_step: f64::INFINITY,
            starting_step: 0.0,
            nscsco: 0,
            nef: 0,
            number_of_steps: 0,
            initial_phase: true,
            constant_step_size: false,
            error_analysis_option: 0,
            use_joint_norm: true,
            e_k: 0.0,
            e_km1: 0.0,
            e_km2: 0.0,
            e_kp1: 0.0,
            t_k: 0.0,
            t_km1: 0.0,
            t_km2: 0.0,
            t_kp1: f64::INFINITY,
            est: 0.0,
            tuning,
        }
    }

    /// Seeds coefficients for the very first step: order 1, a fresh `psi`
    /// ladder, and `nscsco` reset so the first `update_coeffs` recomputes.
    pub fn begin_integration(&mut self, initial_step: f64) {
        self.current_step = initial_step;
        self.used_step = initial_step;
        self.psi[0] = initial_step;
        self.c_j = 1.0 / self.psi[0];
        self.current_order = 1;
        self.used_order = 1;
        self.nscsco = 0;
        self.number_of_steps = 0;
        self.nef = 0;
        self.initial_phase = true;
    }

    /// The BDF coefficient recursion. Coefficients are only recomputed once
    /// `nscsco` has caught up with `current_order + 1`, i.e. after enough
    /// consecutive constant-step, constant-order steps — recomputing every
    /// step is wasted work since most of the ladder is unchanged.
    pub fn update_coeffs(&mut self) {
        if self.current_step != self.used_step || self.current_order != self.used_order {
            self.nscsco = 0;
        }
        self.nscsco = (self.nscsco + 1).min(self.used_order + 2);

        if self.current_order + 1 < self.nscsco {
            return;
        }

        self.beta[0] = 1.0;
        self.alpha[0] = 1.0;
        self.sigma[0] = 1.0;
        self.gamma[0] = 0.0;
        let mut temp1 = self.current_step;

        // Run the ladder one rung past current_order whenever there is a
        // next order to raise into: complete_step's raise test needs a
        // genuine sigma[current_order + 1] to form T_{k+1} from, not just
        // the usual 1..=current_order coefficients.
        let upper = if self.current_order < self.max_order {
            self.current_order + 1
        } else {
            self.current_order
        };

        for i in 1..=upper {
            let temp2 = self.psi[i - 1];
            self.psi[i - 1] = temp1;
            self.beta[i] = self.beta[i - 1] * self.psi[i - 1] / temp2;
            temp1 = temp2 + self.current_step;
            self.alpha[i] = self.current_step / temp1;
            self.sigma[i] = (i as f64 + 1.0) * self.sigma[i - 1] * self.alpha[i];
            self.gamma[i] = self.gamma[i - 1] + self.alpha[i - 1] / self.current_step;
        }
        self.psi[upper] = temp1;

        self.alpha_s = 0.0;
        self.alpha_0 = 0.0;
        for i in 0..self.current_order {
            self.alpha_s -= 1.0 / (i as f64 + 1.0);
            self.alpha_0 -= self.alpha[i];
        }
        self.c_j = -self.alpha_s / self.current_step;
        self.c_k = (self.alpha[self.current_order] + self.alpha_s - self.alpha_0).abs();
        self.c_k = self.c_k.max(self.alpha[self.current_order]);
    }

    /// Decide whether the *next* order should drop by one, updating `Est`
    /// and `new_order` to match. Called both from `reject_step` (on a failed
    /// step, to pick the order for the retry) and from `complete_step` (on a
    /// successful step, to pick the order for what comes after).
    pub fn check_reduce_order(&mut self, norms: OrderErrorNorms) {
        self.e_k = self.sigma[self.current_order] * norms.dnorm;
        self.t_k = (self.current_order as f64 + 1.0) * self.e_k;
        self.est = self.e_k;
        self.new_order = self.current_order;

        if self.current_order > 1 {
            let dnorm_km1 = norms.dnorm_km1.unwrap_or(norms.dnorm);
            self.e_km1 = self.sigma[self.current_order - 1] * dnorm_km1;
            self.t_km1 = self.current_order as f64 * self.e_km1;

            if self.current_order > 2 {
                let dnorm_km2 = norms.dnorm_km2.unwrap_or(dnorm_km1);
                self.e_km2 = self.sigma[self.current_order - 2] * dnorm_km2;
                self.t_km2 = (self.current_order as f64 - 1.0) * self.e_km2;
                if self.t_km1.max(self.t_km2) <= self.t_k {
                    self.new_order -= 1;
                    self.est = self.e_km1;
                }
            } else if self.t_km1 <= self.tuning.tkm1_tk_safety * self.t_k {
                self.new_order -= 1;
                self.est = self.e_km1;
            }
        }

        self.e_kp1 = 0.0;
        self.t_kp1 = f64::INFINITY;
        if self.current_order < self.max_order {
            if let Some(dnorm_kp1) = norms.dnorm_kp1 {
                self.e_kp1 = self.sigma[self.current_order + 1] * dnorm_kp1;
                self.t_kp1 = (self.current_order as f64 + 2.0) * self.e_kp1;
            }
        }
    }

    /// Process a failed step: bump the failure counter, shrink the step (or
    /// floor the order to 1 on repeated or Newton-driven failure), and
    /// report whether the caller must restore its history arrays.
    pub fn reject_step(
        &mut self,
        newton_status: ConvergenceStatus,
        norms: OrderErrorNorms,
    ) -> RejectOutcome {
        self.check_reduce_order(norms);
        let adjust_step = !self.constant_step_size;
        if !adjust_step {
            return RejectOutcome {
                restore_history: false,
                rescale_first_step: None,
            };
        }

        self.initial_phase = false;
        self.nef += 1;

        let rr = if !newton_status.converged() {
            if self.nef > 2 {
                self.new_order = 1;
            }
            self.tuning.r_min
        } else if self.nef == 1 {
            (self.tuning.r_safety * (self.est + self.tuning.r_fudge))
                .powf(-1.0 / (self.new_order as f64 + 1.0))
                * self.tuning.r_factor
        } else if self.nef == 2 {
            self.tuning.r_min
        } else {
            self.new_order = 1;
            self.tuning.r_min
        };
        let rr = rr.clamp(self.tuning.r_min, self.tuning.r_max);

        if self.new_order >= self.min_order {
            self.current_order = self.new_order;
        }

        let mut rescale_first_step = None;
        if self.number_of_steps == 0 {
            self.psi[0] = self.current_step * rr;
            rescale_first_step = Some(rr);
        }

        let mut new_step = (self.current_step * rr).clamp(self.min_step, self.max_step);
        new_step = new_step.min(self.max_step);
        self.current_step = new_step;

        RejectOutcome {
            restore_history: true,
            rescale_first_step,
        }
    }

    /// Process a successfully accepted step: advance the step/failure
    /// counters, pick the order and step ratio for the *next* step, and
    /// report the action taken so the caller can rotate its history arrays.
    pub fn complete_step(&mut self, norms: OrderErrorNorms) -> TiaAction {
        self.number_of_steps += 1;
        self.nef = 0;
        self.check_reduce_order(norms);

        let order_diff = self.current_order as i64 - self.used_order as i64;
        self.used_order = self.current_order;
        self.used_step = self.current_step;

        if self.new_order + 1 == self.current_order || self.current_order == self.max_order {
            self.initial_phase = false;
        }

        if self.initial_phase {
            if self.current_order < self.max_order {
                self.current_order += 1;
            }
            self.current_step *= self.tuning.h_phase0_incr;
            self.current_step = self.current_step.min(self.max_step);
            return TiaAction::Raise;
        }

        let action = if self.new_order + 1 == self.current_order {
            TiaAction::Lower
        } else if self.current_order == self.max_order {
            TiaAction::Maintain
        } else if self.current_order + 1 >= self.nscsco || order_diff == 1 {
            TiaAction::Maintain
        } else {
            // t_kp1 is infinite (never favors raising) unless the caller
            // supplied a real order-(k+1) divided-difference norm.
            let t_kp1 = self.t_kp1;
            if self.current_order == 1 {
                if t_kp1 >= self.tuning.tkp1_tk_safety * self.t_k {
                    TiaAction::Maintain
                } else {
                    TiaAction::Raise
                }
            } else if self.t_km1 <= self.t_k.min(t_kp1) {
                TiaAction::Lower
            } else if t_kp1 >= self.t_k {
                TiaAction::Maintain
            } else {
                TiaAction::Raise
            }
        };

        let action = if self.current_order < self.min_order {
            TiaAction::Raise
        } else if self.current_order == self.min_order && action == TiaAction::Lower {
            TiaAction::Maintain
        } else {
            action
        };

        match action {
            TiaAction::Raise if self.current_order < self.max_order => {
                self.current_order += 1;
            }
            TiaAction::Lower if self.current_order > self.min_order => {
                self.current_order -= 1;
                self.est = self.e_km1;
            }
            _ => {}
        }

        let rr = if self.error_analysis_option == 1 {
            0.4 / self.tuning.r_min
        } else {
            (self.tuning.r_safety * (self.est + self.tuning.r_fudge))
                .powf(-1.0 / (self.current_order as f64 + 1.0))
        };
        let rr = if rr >= self.tuning.r_hincr_test {
            self.tuning.r_hincr
        } else if rr <= 1.0 {
            rr.clamp(self.tuning.r_min, self.tuning.r_max)
        } else {
            rr
        };

        self.current_step = (self.current_step * rr).clamp(self.min_step, self.max_step);
        action
    }

    /// Undo a `beta`-scaling pass over the history arrays: `1/beta[i]` for
    /// `i` in `nscsco..=current_order`, followed by rebuilding `psi` for the
    /// step that is about to be retried. The caller applies the
    /// `1/beta[i]` factors to its own history arrays; this just hands back
    /// the range and updates `psi`.
    pub fn restore_psi(&mut self) {
        for i in 1..=self.current_order {
            self.psi[i - 1] = self.psi[i] - self.current_step;
        }
    }

    pub fn beta_restore_range(&self) -> std::ops::RangeInclusive<usize> {
        self.nscsco..=self.current_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sec() -> StepErrorControl {
        let mut s = StepErrorControl::new(1, 5, TuningConstants::default());
        s.min_step = 1e-15;
        s.max_step = 1.0;
        s.begin_integration(1e-3);
        s
    }

    #[test]
    fn first_coeff_update_sets_order_one_identities() {
        let mut s = sec();
        s.update_coeffs();
        assert_eq!(s.alpha[0], 1.0);
        assert_eq!(s.beta[0], 1.0);
        assert_eq!(s.sigma[0], 1.0);
        assert!((s.c_j - 1.0 / s.current_step).abs() < 1e-12);
    }

    #[test]
    fn nscsco_resets_on_step_change() {
        let mut s = sec();
        s.update_coeffs();
        s.update_coeffs();
        assert_eq!(s.nscsco, 2);
        s.current_step *= 1.5;
        s.update_coeffs();
        assert_eq!(s.nscsco, 1);
    }

    #[test]
    fn reject_step_on_newton_failure_uses_r_min() {
        let mut s = sec();
        s.update_coeffs();
        let outcome = s.reject_step(
            ConvergenceStatus::NormalFailure,
            OrderErrorNorms {
                dnorm: 10.0,
                ..Default::default()
            },
        );
        assert!(outcome.restore_history);
        assert!((s.current_step - 1e-3 * s.tuning.r_min).abs() < 1e-12);
    }

    #[test]
    fn reject_step_third_failure_forces_order_one() {
        let mut s = sec();
        s.current_order = 3;
        s.used_order = 3;
        s.nef = 2;
        s.update_coeffs();
        s.reject_step(
            ConvergenceStatus::Converged,
            OrderErrorNorms {
                dnorm: 5.0,
                dnorm_km1: Some(4.0),
                dnorm_km2: Some(3.0),
                ..Default::default()
            },
        );
        assert_eq!(s.current_order, 1);
    }

    #[test]
    fn check_reduce_order_computes_real_kp1_norm_when_supplied() {
        let mut s = sec();
        s.current_order = 2;
        s.update_coeffs();
        s.check_reduce_order(OrderErrorNorms {
            dnorm: 1e-6,
            dnorm_kp1: Some(2.0),
            ..Default::default()
        });
        let sigma_kp1 = s.sigma[3];
        assert!(sigma_kp1 > 0.0);
        assert!((s.e_kp1 - sigma_kp1 * 2.0).abs() < 1e-12);
        assert!((s.t_kp1 - 4.0 * s.e_kp1).abs() < 1e-12);
    }

    #[test]
    fn check_reduce_order_kp1_is_infinite_without_data() {
        let mut s = sec();
        s.current_order = 2;
        s.update_coeffs();
        s.check_reduce_order(OrderErrorNorms {
            dnorm: 1e-6,
            ..Default::default()
        });
        assert!(s.t_kp1.is_infinite());
    }

    #[test]
    fn complete_step_raises_when_kp1_norm_is_small() {
        let mut s = sec();
        s.min_step = 1e-15;
        s.max_step = 1.0;
        s.current_order = 1;
        s.used_order = 1;
        s.initial_phase = false;
        // Three constant-step, constant-order calls saturate nscsco at
        // used_order + 2 = 3, matching the steady state a real run settles
        // into before the raise/lower decision is ever consulted.
        s.update_coeffs();
        s.update_coeffs();
        s.update_coeffs();
        let action = s.complete_step(OrderErrorNorms {
            dnorm: 1e-3,
            dnorm_kp1: Some(1e-12),
            ..Default::default()
        });
        assert_eq!(action, TiaAction::Raise);
        assert_eq!(s.current_order, 2);
    }

    #[test]
    fn complete_step_without_kp1_norm_never_raises_past_initial_phase() {
        let mut s = sec();
        s.min_step = 1e-15;
        s.max_step = 1.0;
        s.current_order = 1;
        s.used_order = 1;
        s.initial_phase = false;
        s.update_coeffs();
        s.update_coeffs();
        s.update_coeffs();
        let action = s.complete_step(OrderErrorNorms {
            dnorm: 1e-3,
            ..Default::default()
        });
        assert_eq!(action, TiaAction::Maintain);
    }

    #[test]
    fn complete_step_in_initial_phase_raises_and_doubles() {
        let mut s = sec();
        s.update_coeffs();
        let action = s.complete_step(OrderErrorNorms {
            dnorm: 1e-6,
            ..Default::default()
        });
        assert_eq!(action, TiaAction::Raise);
        assert_eq!(s.current_order, 2);
        assert!((s.current_step - 1e-3 * s.tuning.h_phase0_incr).abs() < 1e-12);
    }

    #[test]
    fn constant_step_size_reject_is_a_no_op() {
        let mut s = sec();
        s.constant_step_size = true;
        s.update_coeffs();
        let before = s.current_step;
        let outcome = s.reject_step(
            ConvergenceStatus::NormalFailure,
            OrderErrorNorms {
                dnorm: 100.0,
                ..Default::default()
            },
        );
        assert!(!outcome.restore_history);
        assert_eq!(s.current_step, before);
    }
}
