//! Toy single- and two-node circuits used to exercise the integrator from
//! the command line: an RC discharge, and an RC charged by a pulsed
//! independent source (for exercising breakpoint landing).

use nalgebra::DMatrix;
use txint_core::StateVector;
use txint_solver::breakpoints::BreakpointKind;
use txint_solver::loader::{AnalysisMode, Loader, RhsContribution};

/// `C dv/dt + v/R = 0`, a single node discharging to ground.
pub struct RcDecay {
    pub resistance: f64,
    pub capacitance: f64,
    pub initial_voltage: f64,
}

impl Loader for RcDecay {
    type Jacobian = DMatrix<f64>;

    fn num_unknowns(&self) -> usize {
        1
    }

    fn load_rhs(&mut self, x: &StateVector, _t: f64) -> RhsContribution {
        let v = x.as_slice()[0];
        RhsContribution {
            q: StateVector::from_vec(vec![self.capacitance * v]),
            f: StateVector::from_vec(vec![v / self.resistance]),
            b: StateVector::zeros(1),
        }
    }

    fn load_jacobian(&mut self, _x: &StateVector, _t: f64, c_j: f64) -> Self::Jacobian {
        DMatrix::from_element(1, 1, c_j * self.capacitance + 1.0 / self.resistance)
    }

    fn update_sources(&mut self, _t: f64) {}

    fn accept_step(&mut self) {}

    fn step_success(&mut self, _mode: AnalysisMode) {}
    fn step_failure(&mut self, _mode: AnalysisMode) {}

    fn output(&mut self) {}
    fn finish_output(&mut self) {}

    fn set_initial_guess(&mut self, x: &mut StateVector) {
        *x = StateVector::from_vec(vec![self.initial_voltage]);
    }
}

/// `C dv/dt + v/R = v_src(t)/R`, where `v_src` is a single rising edge at
/// `edge_time`: 0 V before, `high` after. The edge is registered as a
/// breakpoint so the integrator lands on it exactly instead of stepping
/// over the discontinuity.
pub struct PulsedRc {
    pub resistance: f64,
    pub capacitance: f64,
    pub edge_time: f64,
    pub high: f64,
    source_level: f64,
}

impl PulsedRc {
    pub fn new(resistance: f64, capacitance: f64, edge_time: f64, high: f64) -> Self {
        Self {
            resistance,
            capacitance,
            edge_time,
            high,
            source_level: 0.0,
        }
    }
}

impl Loader for PulsedRc {
    type Jacobian = DMatrix<f64>;

    fn num_unknowns(&self) -> usize {
        1
    }

    fn load_rhs(&mut self, x: &StateVector, _t: f64) -> RhsContribution {
        let v = x.as_slice()[0];
        RhsContribution {
            q: StateVector::from_vec(vec![self.capacitance * v]),
            f: StateVector::from_vec(vec![v / self.resistance]),
            b: StateVector::from_vec(vec![self.source_level / self.resistance]),
        }
    }

    fn load_jacobian(&mut self, _x: &StateVector, _t: f64, c_j: f64) -> Self::Jacobian {
        DMatrix::from_element(1, 1, c_j * self.capacitance + 1.0 / self.resistance)
    }

    fn update_sources(&mut self, t: f64) {
        self.source_level = if t >= self.edge_time { self.high } else { 0.0 };
    }

    fn accept_step(&mut self) {}

    fn step_success(&mut self, _mode: AnalysisMode) {}
    fn step_failure(&mut self, _mode: AnalysisMode) {}

    fn output(&mut self) {}
    fn finish_output(&mut self) {}

    fn break_points(&self) -> Vec<(f64, BreakpointKind)> {
        vec![(self.edge_time, BreakpointKind::Simple)]
    }

    fn set_initial_guess(&mut self, x: &mut StateVector) {
        *x = StateVector::zeros(1);
    }
}
