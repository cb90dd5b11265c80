//! Measurement update and calibration.
//!
//! [`GainMatrixUpdator`] is the Kalman gain update. Covariances are handled as
//! `DMatrix` so strip and pixel measurements share one code path.

use crate::surface::Surface;
use crate::track_state::{BoundParameters, TrackState, BOUND_SIZE, PHI, THETA};
use nalgebra::{DMatrix, DVector, Matrix5, Vector5};
use std::f64::consts::PI;

/// Result of a successful update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedParameters {
    pub parameters: BoundParameters,
    pub chi2: f64,
}

/// Combines a prediction with the measurement of a track state.
///
/// `None` means the measurement is rejected.
pub trait Updator {
    fn update(
        &self,
        state: &TrackState,
        predicted: &BoundParameters,
        surface: &Surface,
    ) -> Option<UpdatedParameters>;
}

/// Refines the measurement of a track state given the predicted parameters.
pub trait Calibrator {
    fn calibrate(&mut self, state: &mut TrackState, predicted: &BoundParameters);
}

/// Passes the prediction through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidUpdator;

impl Updator for VoidUpdator {
    fn update(&self, _: &TrackState, predicted: &BoundParameters, _: &Surface) -> Option<UpdatedParameters> {
        Some(UpdatedParameters {
            parameters: predicted.clone(),
            chi2: 0.0,
        })
    }
}

/// Leaves measurements as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidCalibrator;

impl Calibrator for VoidCalibrator {
    fn calibrate(&mut self, _: &mut TrackState, _: &BoundParameters) {}
}

// ============================================================================
// GAIN MATRIX UPDATOR
// ============================================================================

/// Kalman gain update with an optional chi2 cut.
#[derive(Debug, Clone, Copy, Default)]
pub struct GainMatrixUpdator {
    /// Reject measurements whose predicted chi2 exceeds this value
    pub max_chi2: Option<f64>,
}

impl GainMatrixUpdator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chi2(mut self, max_chi2: f64) -> Self {
        self.max_chi2 = Some(max_chi2);
        self
    }
}

impl Updator for GainMatrixUpdator {
    fn update(
        &self,
        state: &TrackState,
        predicted: &BoundParameters,
        surface: &Surface,
    ) -> Option<UpdatedParameters> {
        let covariance = predicted.covariance.as_ref()?;
        let measurement = &state.measurement;

        let x = DVector::from_column_slice(predicted.parameters.as_slice());
        let p = DMatrix::from_column_slice(BOUND_SIZE, BOUND_SIZE, covariance.as_slice());
        let h = measurement.projector();
        let v = measurement.covariance();

        // y = m - H * x
        let residual = measurement.values() - &h * &x;

        // S = H * P * H^T + V
        let s = &h * &p * h.transpose() + &v;
        let s_inv = s.cholesky()?.inverse();

        let chi2 = (residual.transpose() * &s_inv * &residual)[(0, 0)];
        if self.max_chi2.is_some_and(|max| chi2 > max) {
            return None;
        }

        // K = P * H^T * S^-1
        let k = &p * h.transpose() * &s_inv;
        let x_new = &x + &k * &residual;

        // Joseph form: P = (I - K*H) * P * (I - K*H)^T + K*V*K^T
        let ikh = DMatrix::identity(BOUND_SIZE, BOUND_SIZE) - &k * &h;
        let p_new = &ikh * &p * ikh.transpose() + &k * &v * k.transpose();

        let mut parameters = Vector5::from_column_slice(x_new.as_slice());
        parameters[PHI] = wrap_phi(parameters[PHI]);
        parameters[THETA] = parameters[THETA].clamp(f64::EPSILON, PI - f64::EPSILON);
        let covariance = Matrix5::from_column_slice(p_new.as_slice());

        Some(UpdatedParameters {
            parameters: BoundParameters::new(
                predicted.surface,
                surface,
                parameters,
                Some(covariance),
                predicted.charge,
            ),
            chi2,
        })
    }
}

/// Wrap an angle into (-pi, pi].
fn wrap_phi(phi: f64) -> f64 {
    let wrapped = (phi + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

// ============================================================================
// TESTS
// ============================================================================
