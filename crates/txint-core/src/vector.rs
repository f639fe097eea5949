//! The distributed-vector abstraction used throughout the integration core.
//!
//! A real deployment partitions each [`StateVector`] across ranks with a
//! ghost/halo region and reduces norms with a communicator. This crate only
//! ever sees the rank-local view; the [`GlobalReduce`] trait is the seam a
//! parallel backend plugs into. The default [`LocalReduce`] is a no-op and is
//! what every test and the demo CLI use.

use nalgebra::DVector;

use crate::error::{Error, Result};

/// A named tag for the kind of quantity a [`StateVector`] holds. DataStore
/// keeps a separate tolerance pair per category, since charge-like and
/// voltage-like quantities are rarely on the same scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Solution,
    Charge,
    State,
    Store,
    StoreLeadCurrentQ,
}

/// Reduces a rank-local partial sum into the value every rank must agree on.
///
/// Implementors model the collectives described for the core: `sumAll`,
/// `minAll`, `maxAll`, `scanSum`. [`LocalReduce`] is the single-rank identity.
pub trait GlobalReduce {
    fn sum_all(&self, local: f64) -> f64;
    fn min_all(&self, local: f64) -> f64;
    fn max_all(&self, local: f64) -> f64;
    fn global_len(&self, local_len: usize) -> usize;
}

/// Single-rank reducer: every collective is the identity on the local value.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalReduce;

impl GlobalReduce for LocalReduce {
    fn sum_all(&self, local: f64) -> f64 {
        local
    }
    fn min_all(&self, local: f64) -> f64 {
        local
    }
    fn max_all(&self, local: f64) -> f64 {
        local
    }
    fn global_len(&self, local_len: usize) -> usize {
        local_len
    }
}

/// A rank-local vector of one [`Quantity`].
///
/// Thin wrapper over `nalgebra::DVector<f64>` that adds the handful of
/// elementwise operations the integrator needs (scaled accumulation, scaling
/// in place, weighted-RMS norms) without pulling matrix algebra into this
/// crate.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVector {
    data: DVector<f64>,
}

impl StateVector {
    pub fn zeros(len: usize) -> Self {
        Self {
            data: DVector::zeros(len),
        }
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        Self {
            data: DVector::from_vec(values),
        }
    }

    pub fn from_dvector(data: DVector<f64>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        self.data.as_slice()
    }

    pub fn as_dvector(&self) -> &DVector<f64> {
        &self.data
    }

    pub fn into_dvector(self) -> DVector<f64> {
        self.data
    }

    fn check_len(&self, other_len: usize) -> Result<()> {
        if self.len() != other_len {
            return Err(Error::DimensionMismatch {
                expected: self.len(),
                actual: other_len,
            });
        }
        Ok(())
    }

    /// `self <- self + alpha * other`.
    pub fn axpy(&mut self, alpha: f64, other: &StateVector) -> Result<()> {
        self.check_len(other.len())?;
        self.data.axpy(alpha, &other.data, 1.0);
        Ok(())
    }

    /// `self <- self + other` (alpha = 1).
    pub fn add_assign(&mut self, other: &StateVector) -> Result<()> {
        self.axpy(1.0, other)
    }

    /// `self <- scale * self`.
    pub fn scale_mut(&mut self, scale: f64) {
        self.data *= scale;
    }

    /// `self <- scale * other` (overwrites, resizing is a caller bug).
    pub fn copy_scaled_from(&mut self, scale: f64, other: &StateVector) -> Result<()> {
        self.check_len(other.len())?;
        self.data.copy_from(&other.data);
        self.data *= scale;
        Ok(())
    }

    /// Weighted-RMS norm `sqrt((1/N) * sum((v_i / w_i)^2))`, globally reduced.
    ///
    /// `N` and the sum of squares are both taken through `reduce` so a
    /// distributed backend can substitute a real communicator.
    pub fn wrms_norm(&self, weights: &StateVector, reduce: &impl GlobalReduce) -> Result<f64> {
        self.check_len(weights.len())?;
        let local_sum: f64 = self
            .data
            .iter()
            .zip(weights.data.iter())
            .map(|(v, w)| {
                let r = v / w;
                r * r
            })
            .sum();
        let global_sum = reduce.sum_all(local_sum);
        let n = reduce.global_len(self.len());
        if n == 0 {
            return Ok(0.0);
        }
        Ok((global_sum / n as f64).sqrt())
    }

    /// Partial (un-normalized) sum of squared weighted components, for
    /// combining several vectors into one joint wRMS norm (e.g. the joint
    /// `sqrt(0.5||dx||^2 + 0.5||dq||^2)` error norm).
    pub fn partial_sq_sum(&self, weights: &StateVector) -> Result<f64> {
        self.check_len(weights.len())?;
        Ok(self
            .data
            .iter()
            .zip(weights.data.iter())
            .map(|(v, w)| {
                let r = v / w;
                r * r
            })
            .sum())
    }
}

/// Per-category relative/absolute tolerance pair used to build error-weight
/// vectors: `w_i = relTol * |x_i| + absTol`.
#[derive(Debug, Clone, Copy)]
pub struct ToleranceSpec {
    pub rel_tol: f64,
    pub abs_tol: f64,
}

impl ToleranceSpec {
    pub fn new(rel_tol: f64, abs_tol: f64) -> Result<Self> {
        if rel_tol < 0.0 {
            return Err(Error::InvalidTolerance(rel_tol));
        }
        if abs_tol <= 0.0 {
            return Err(Error::InvalidTolerance(abs_tol));
        }
        Ok(Self { rel_tol, abs_tol })
    }

    /// Build the error-weight vector for `x` under this tolerance pair.
    pub fn error_weights(&self, x: &StateVector) -> StateVector {
        let weights: Vec<f64> = x
            .as_slice()
            .iter()
            .map(|v| self.rel_tol * v.abs() + self.abs_tol)
            .collect();
        StateVector::from_vec(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrms_of_equal_to_weight_is_one() {
        let v = StateVector::from_vec(vec![2.0, 2.0, 2.0, 2.0]);
        let w = StateVector::from_vec(vec![2.0, 2.0, 2.0, 2.0]);
        let norm = v.wrms_norm(&w, &LocalReduce).unwrap();
        assert!((norm - 1.0).abs() < 1e-14);
    }

    #[test]
    fn wrms_of_zero_is_zero() {
        let v = StateVector::zeros(5);
        let w = StateVector::from_vec(vec![1.0; 5]);
        assert_eq!(v.wrms_norm(&w, &LocalReduce).unwrap(), 0.0);
    }

    #[test]
    fn dimension_mismatch_errors() {
        let v = StateVector::zeros(3);
        let w = StateVector::zeros(4);
        assert!(matches!(
            v.wrms_norm(&w, &LocalReduce),
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn error_weights_are_reltol_times_x_plus_abstol() {
        let tol = ToleranceSpec::new(1e-3, 1e-9).unwrap();
        let x = StateVector::from_vec(vec![1.0, -2.0, 0.0]);
        let w = tol.error_weights(&x);
        assert!((w.as_slice()[0] - (1e-3 + 1e-9)).abs() < 1e-15);
        assert!((w.as_slice()[1] - (2e-3 + 1e-9)).abs() < 1e-15);
        assert!((w.as_slice()[2] - 1e-9).abs() < 1e-15);
    }

    #[test]
    fn invalid_tolerance_rejected() {
        assert!(ToleranceSpec::new(-1.0, 1e-9).is_err());
        assert!(ToleranceSpec::new(1e-3, 0.0).is_err());
    }

    #[test]
    fn axpy_accumulates() {
        let mut a = StateVector::from_vec(vec![1.0, 1.0]);
        let b = StateVector::from_vec(vec![2.0, 3.0]);
        a.axpy(0.5, &b).unwrap();
        assert_eq!(a.as_slice(), &[2.0, 2.5]);
    }
}
