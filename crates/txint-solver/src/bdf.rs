//! Variable-order BDF predictor/corrector mechanics: history arrays, the
//! predictor, the DAE residual and Jacobian the corrector solves against,
//! dense-output interpolation, and history rotation on accept/reject.
//!
//! [`StepErrorControl`] owns the scalar coefficients; this module is the
//! vector-level consumer of them. Five independent quantities carry their
//! own history: the solution, the DAE charge term, device state, device
//! store variables, and the store's lead-current-Q component. They rotate
//! identically; [`HistoryArray`] is written once and instantiated five
//! times in [`DataStore`].

use txint_core::{GlobalReduce, Result as CoreResult, StateVector};

use crate::step_control::{StepErrorControl, MAX_ORDER};

/// Divided-difference history for one quantity: `slots[i]` is the `i`-th
/// backward difference, `slots[0]` the value itself.
#[derive(Debug, Clone)]
pub struct HistoryArray {
    slots: Vec<StateVector>,
}

impl HistoryArray {
    pub fn zeros(len: usize) -> Self {
        Self {
            slots: (0..=MAX_ORDER + 1).map(|_| StateVector::zeros(len)).collect(),
        }
    }

    pub fn slot(&self, i: usize) -> &StateVector {
        &self.slots[i]
    }

    pub fn slot_mut(&mut self, i: usize) -> &mut StateVector {
        &mut self.slots[i]
    }

    /// `slots[i] *= beta[i]` for `i` in `range`, the scaling pass
    /// `obtain_predictor` applies before forming the prediction.
    pub fn scale_range(&mut self, beta: &[f64], range: std::ops::RangeInclusive<usize>) {
        for i in range {
            self.slots[i].scale_mut(beta[i]);
        }
    }

    /// `1/beta[i]` undo of [`Self::scale_range`], used when a step is
    /// rejected and the history must be put back the way it was.
    pub fn restore_range(&mut self, beta: &[f64], range: std::ops::RangeInclusive<usize>) {
        for i in range {
            self.slots[i].scale_mut(1.0 / beta[i]);
        }
    }

    /// `slots[0] + sum(slots[1..=order])`, the predicted value.
    pub fn sum_predictor(&self, order: usize) -> CoreResult<StateVector> {
        let mut acc = self.slots[0].clone();
        for i in 1..=order {
            acc.add_assign(&self.slots[i])?;
        }
        Ok(acc)
    }

    /// `sum(gamma[i] * slots[i])` for `i` in `1..=order`, the predicted
    /// time-derivative used to seed the residual for quantities that need
    /// one (the DAE charge term, and any device state/store array the
    /// loader wants a `d/dt` estimate for).
    pub fn sum_derivative_predictor(&self, gamma: &[f64], order: usize) -> CoreResult<StateVector> {
        let mut acc = StateVector::zeros(self.slots[0].len());
        for i in 1..=order {
            acc.axpy(gamma[i], &self.slots[i])?;
        }
        Ok(acc)
    }

    /// Rotate the divided-difference table forward after a successful step:
    /// the Newton correction becomes the new top difference, then cascades
    /// down through the lower orders.
    pub fn update(&mut self, correction: &StateVector, used_order: usize, max_order: usize) -> CoreResult<()> {
        if used_order < max_order {
            self.slots[used_order + 1] = correction.clone();
        }
        self.slots[used_order].add_assign(correction)?;
        for j in (0..used_order).rev() {
            let addend = self.slots[j + 1].clone();
            self.slots[j].add_assign(&addend)?;
        }
        Ok(())
    }
}

/// The five quantities the integrator carries history for, plus the
/// current-step snapshots the loader reads and writes.
pub struct DataStore {
    pub x_history: HistoryArray,
    pub q_history: HistoryArray,
    pub s_history: HistoryArray,
    pub sto_history: HistoryArray,
    pub sto_lead_current_q_history: HistoryArray,

    pub x_weights: StateVector,
    pub q_weights: StateVector,

    pub next_solution: StateVector,
    pub next_state: StateVector,
    pub next_store: StateVector,
    pub next_store_lead_current_q: StateVector,
}

impl DataStore {
    pub fn new(n_solution: usize, n_state: usize, n_store: usize, n_lead_current_q: usize) -> Self {
        Self {
            x_history: HistoryArray::zeros(n_solution),
            q_history: HistoryArray::zeros(n_solution),
            s_history: HistoryArray::zeros(n_state),
            sto_history: HistoryArray::zeros(n_store),
            sto_lead_current_q_history: HistoryArray::zeros(n_lead_current_q),
            x_weights: StateVector::zeros(n_solution),
            q_weights: StateVector::zeros(n_solution),
            next_solution: StateVector::zeros(n_solution),
            next_state: StateVector::zeros(n_state),
            next_store: StateVector::zeros(n_store),
            next_store_lead_current_q: StateVector::zeros(n_lead_current_q),
        }
    }

    /// Seed all five histories for the first step: `slots[0]` from the DC
    /// operating point, `slots[1] = -h * dQ/dt` for the charge term (the
    /// rest start at zero, since there is no prior step to difference
    /// against).
    pub fn begin_integration(
        &mut self,
        x0: &StateVector,
        q0: &StateVector,
        f0: &StateVector,
        s0: &StateVector,
        sto0: &StateVector,
        sto_lead_q0: &StateVector,
        initial_step: f64,
    ) -> CoreResult<()> {
        *self.x_history.slot_mut(0) = x0.clone();
        self.x_history.slot_mut(1).scale_mut(0.0);

        *self.q_history.slot_mut(0) = q0.clone();
        self.q_history.slot_mut(1).copy_scaled_from(-initial_step, f0)?;

        *self.s_history.slot_mut(0) = s0.clone();
        self.s_history.slot_mut(1).scale_mut(0.0);

        *self.sto_history.slot_mut(0) = sto0.clone();
        self.sto_history.slot_mut(1).scale_mut(0.0);

        *self.sto_lead_current_q_history.slot_mut(0) = sto_lead_q0.clone();
        self.sto_lead_current_q_history.slot_mut(1).scale_mut(0.0);

        self.next_solution = x0.clone();
        Ok(())
    }
}

/// Drives the history arrays through predictor, residual/Jacobian, and
/// accept/reject rotation, coordinating with a [`StepErrorControl`] for the
/// scalar coefficients.
pub struct BdfIntegrator {
    pub sec: StepErrorControl,
    pub data: DataStore,
}

impl BdfIntegrator {
    pub fn new(sec: StepErrorControl, data: DataStore) -> Self {
        Self { sec, data }
    }

    /// Scale the histories by `beta[nscsco..=order]`, then form the
    /// predicted solution and the predicted `dQ/dt` the residual needs.
    /// Returns `(x_predicted, qp_predicted)`.
    pub fn obtain_predictor(&mut self) -> CoreResult<(StateVector, StateVector)> {
        let range = self.sec.beta_restore_range();
        let order = self.sec.current_order;
        for history in [
            &mut self.data.x_history,
            &mut self.data.q_history,
            &mut self.data.s_history,
            &mut self.data.sto_history,
            &mut self.data.sto_lead_current_q_history,
        ] {
            history.scale_range(&self.sec.beta, range.clone());
        }
        let xn0 = self.data.x_history.sum_predictor(order)?;
        let qpn0 = self
            .data
            .q_history
            .sum_derivative_predictor(&self.sec.gamma, order)?;
        self.data.next_solution = xn0.clone();
        Ok((xn0, qpn0))
    }

    /// `R = -( qpn0 + (-alpha_s/h) * (Q - qn0) + F )`, the negated DAE
    /// residual the corrector's nonlinear solver drives to zero.
    pub fn obtain_residual(
        &self,
        dae_q: &StateVector,
        dae_f: &StateVector,
        qn0: &StateVector,
        qpn0: &StateVector,
    ) -> CoreResult<StateVector> {
        let mut r = dae_q.clone();
        r.axpy(-1.0, qn0)?;
        let scale = -self.sec.alpha_s / self.sec.current_step;
        r.scale_mut(scale);
        r.add_assign(qpn0)?;
        r.add_assign(dae_f)?;
        r.scale_mut(-1.0);
        Ok(r)
    }

    /// The coefficient the loader's `c_j` matches: `-alpha_s / h`, so the
    /// combined Jacobian is `c_j * dQ/dx + dF/dx`.
    pub fn jacobian_scale(&self) -> f64 {
        -self.sec.alpha_s / self.sec.current_step
    }

    /// Backward-difference dense-output interpolation for a time within the
    /// last accepted step (used for breakpoint landing and restart output).
    pub fn interpolate_solution(&self, time: f64, current_time: f64) -> CoreResult<StateVector> {
        let h = self.sec.current_step;
        let used_order = self.sec.used_order.max(1);
        let delt = time - current_time;
        let mut gam = delt / self.sec.psi[0];
        let mut acc = self.data.x_history.slot(0).clone();
        let mut c = 1.0;
        for j in 1..=used_order {
            c *= gam;
            acc.axpy(c, self.data.x_history.slot(j))?;
            if j < used_order {
                gam = (delt + self.sec.psi[j - 1]) / self.sec.psi[j];
            }
        }
        let _ = h;
        Ok(acc)
    }

    /// Rotate every history array forward using the Newton correction from
    /// the just-accepted step.
    pub fn update_history(&mut self, x_correction: &StateVector) -> CoreResult<()> {
        let used_order = self.sec.used_order;
        let max_order = self.sec.max_order;
        self.data.x_history.update(x_correction, used_order, max_order)?;
        Ok(())
    }

    /// Apply the same rotation to the four non-solution histories, given
    /// their own already-computed corrections (q/state/store/lead-current-Q
    /// deltas are whatever the loader produced alongside the accepted x).
    pub fn update_secondary_histories(
        &mut self,
        q_correction: &StateVector,
        s_correction: &StateVector,
        sto_correction: &StateVector,
        sto_lead_q_correction: &StateVector,
    ) -> CoreResult<()> {
        let used_order = self.sec.used_order;
        let max_order = self.sec.max_order;
        self.data.q_history.update(q_correction, used_order, max_order)?;
        self.data.s_history.update(s_correction, used_order, max_order)?;
        self.data.sto_history.update(sto_correction, used_order, max_order)?;
        self.data
            .sto_lead_current_q_history
            .update(sto_lead_q_correction, used_order, max_order)?;
        Ok(())
    }

    /// The wRMS norm of the order-`(current_order + 1)` divided difference,
    /// freshly rotated into history by the `update_history` call that just
    /// accepted this step. `None` at `max_order`, where there is no such
    /// slot to judge raising into.
    pub fn order_kp1_norm(
        &self,
        weights: &StateVector,
        reduce: &impl GlobalReduce,
    ) -> CoreResult<Option<f64>> {
        if self.sec.current_order >= self.sec.max_order {
            return Ok(None);
        }
        let slot = self.data.x_history.slot(self.sec.current_order + 1);
        Ok(Some(slot.wrms_norm(weights, reduce)?))
    }

    /// Undo the `beta` scaling on a rejected step and rebuild `psi` for the
    /// retry, across all five histories (the reference implementation
    /// leaves the lead-current-Q history unrestored; we treat that as an
    /// oversight rather than a rule worth reproducing — see `DESIGN.md`).
    pub fn restore_history(&mut self) {
        let range = self.sec.beta_restore_range();
        for history in [
            &mut self.data.x_history,
            &mut self.data.q_history,
            &mut self.data.s_history,
            &mut self.data.sto_history,
            &mut self.data.sto_lead_current_q_history,
        ] {
            history.restore_range(&self.sec.beta, range.clone());
        }
        self.sec.restore_psi();
    }

    /// Initial step-size selection ahead of the first corrector solve:
    /// `min(userStep, h0SafetyFactor-scaled rate-of-change estimate)`,
    /// clamped to `maxStep`, and additionally floored by the step that
    /// preceded a breakpoint when this isn't the very first step of the run.
    pub fn compute_initial_step(
        &self,
        time_to_stop: f64,
        dnorm_q1: f64,
        user_starting_step: f64,
        is_dcop: bool,
        last_step: f64,
        reduce: &impl GlobalReduce,
    ) -> f64 {
        let _ = reduce;
        if self.sec.constant_step_size {
            return user_starting_step.min(0.1 * time_to_stop.abs()).max(self.sec.min_step);
        }
        let h0_safety = self.sec.tuning.h0_safety;
        let h0_max_factor = self.sec.tuning.h0_max_factor;
        let mut step = if dnorm_q1 > 0.0 {
            (h0_max_factor * time_to_stop.abs()).min(2f64.sqrt() / (h0_safety * dnorm_q1))
        } else {
            h0_max_factor * time_to_stop.abs()
        };
        if user_starting_step > 0.0 {
            step = step.min(user_starting_step);
        }
        let rh = step.abs() / self.sec.max_step;
        if rh > 1.0 {
            step /= rh;
        }
        if !is_dcop {
            step = step.min(last_step);
        }
        step.max(self.sec.min_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step_control::TuningConstants;
    use txint_core::LocalReduce;

    fn integrator(n: usize) -> BdfIntegrator {
        let mut sec = StepErrorControl::new(1, 5, TuningConstants::default());
        sec.min_step = 1e-15;
        sec.max_step = 1.0;
        sec.begin_integration(1e-3);
        sec.update_coeffs();
        let data = DataStore::new(n, n, n, n);
        BdfIntegrator::new(sec, data)
    }

    #[test]
    fn predictor_at_order_one_equals_slot_zero_plus_slot_one() {
        let mut bdf = integrator(3);
        *bdf.data.x_history.slot_mut(0) = StateVector::from_vec(vec![1.0, 2.0, 3.0]);
        *bdf.data.x_history.slot_mut(1) = StateVector::from_vec(vec![0.1, 0.1, 0.1]);
        let (xn0, _) = bdf.obtain_predictor().unwrap();
        assert_eq!(xn0.as_slice(), &[1.1, 2.1, 3.1]);
    }

    #[test]
    fn update_history_places_correction_then_cascades() {
        let mut bdf = integrator(1);
        bdf.sec.used_order = 1;
        *bdf.data.x_history.slot_mut(0) = StateVector::from_vec(vec![1.0]);
        *bdf.data.x_history.slot_mut(1) = StateVector::from_vec(vec![0.5]);
        let correction = StateVector::from_vec(vec![0.2]);
        bdf.update_history(&correction).unwrap();
        assert_eq!(bdf.data.x_history.slot(1).as_slice(), &[0.2]);
        assert!((bdf.data.x_history.slot(0).as_slice()[0] - 1.7).abs() < 1e-12);
    }

    #[test]
    fn residual_is_negated_and_scaled_by_alpha_s_over_h() {
        let bdf = integrator(1);
        let q = StateVector::from_vec(vec![1.0]);
        let f = StateVector::from_vec(vec![0.0]);
        let qn0 = StateVector::from_vec(vec![0.0]);
        let qpn0 = StateVector::from_vec(vec![0.0]);
        let r = bdf.obtain_residual(&q, &f, &qn0, &qpn0).unwrap();
        let expected = -(bdf.sec.alpha_s / bdf.sec.current_step * -1.0 * 1.0);
        assert!((r.as_slice()[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn initial_step_uses_min_of_user_and_rate_based_estimate() {
        let bdf = integrator(1);
        let step = bdf.compute_initial_step(10.0, 1e6, 0.0, true, 0.0, &LocalReduce);
        assert!(step > 0.0 && step <= bdf.sec.max_step);
    }

    #[test]
    fn initial_step_floored_by_last_step_when_not_dcop() {
        let bdf = integrator(1);
        let step = bdf.compute_initial_step(10.0, 0.0, 0.0, false, 1e-4, &LocalReduce);
        assert!(step <= 1e-4);
    }
}
