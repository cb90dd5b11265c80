//! Event data: bound track parameters, measurements and track states.

use crate::geometry::SurfaceId;
use crate::identifier::Identifier;
use crate::surface::Surface;
use nalgebra::{DMatrix, DVector, Matrix2, Matrix5, Vector2, Vector3, Vector5};
use serde::{Deserialize, Serialize};

/// Index of the first local coordinate.
pub const LOC0: usize = 0;
/// Index of the second local coordinate.
pub const LOC1: usize = 1;
/// Index of the azimuthal angle of the momentum.
pub const PHI: usize = 2;
/// Index of the polar angle of the momentum.
pub const THETA: usize = 3;
/// Index of charge over momentum (or 1/p for neutral tracks).
pub const QOP: usize = 4;

/// Number of bound track parameters.
pub const BOUND_SIZE: usize = 5;

// ============================================================================
// BOUND PARAMETERS
// ============================================================================

/// Track parameters expressed on a surface.
///
/// `parameters` is `[loc0, loc1, phi, theta, q/p]`. The global position and
/// momentum are derived once at construction and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundParameters {
    pub surface: SurfaceId,
    pub parameters: Vector5<f64>,
    pub covariance: Option<Matrix5<f64>>,
    pub charge: f64,
    position: Vector3<f64>,
    momentum: Vector3<f64>,
}

impl BoundParameters {
    /// Build from local parameters on `surface`.
    pub fn new(
        surface_id: SurfaceId,
        surface: &Surface,
        parameters: Vector5<f64>,
        covariance: Option<Matrix5<f64>>,
        charge: f64,
    ) -> Self {
        let direction = direction_from_angles(parameters[PHI], parameters[THETA]);
        let position = surface.local_to_global(
            &Vector2::new(parameters[LOC0], parameters[LOC1]),
            &direction,
        );
        let momentum = direction * momentum_magnitude(parameters[QOP], charge);
        Self {
            surface: surface_id,
            parameters,
            covariance,
            charge,
            position,
            momentum,
        }
    }

    /// Build from a global position and momentum lying on `surface`.
    pub fn from_global(
        surface_id: SurfaceId,
        surface: &Surface,
        position: Vector3<f64>,
        momentum: Vector3<f64>,
        charge: f64,
        covariance: Option<Matrix5<f64>>,
    ) -> Self {
        let p = momentum.norm();
        let direction = momentum / p;
        let local = surface.global_to_local(&position, &direction);
        let qop = if charge != 0.0 { charge / p } else { 1.0 / p };
        let parameters = Vector5::new(
            local.x,
            local.y,
            direction.y.atan2(direction.x),
            direction.z.clamp(-1.0, 1.0).acos(),
            qop,
        );
        Self {
            surface: surface_id,
            parameters,
            covariance,
            charge,
            position,
            momentum,
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub fn momentum(&self) -> Vector3<f64> {
        self.momentum
    }

    /// Unit direction of the momentum.
    pub fn direction(&self) -> Vector3<f64> {
        direction_from_angles(self.parameters[PHI], self.parameters[THETA])
    }
}

/// Unit vector for azimuth `phi` and polar angle `theta`.
pub fn direction_from_angles(phi: f64, theta: f64) -> Vector3<f64> {
    let (sin_theta, cos_theta) = theta.sin_cos();
    Vector3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta)
}

fn momentum_magnitude(qop: f64, charge: f64) -> f64 {
    if charge != 0.0 {
        (charge / qop).abs()
    } else {
        1.0 / qop.abs()
    }
}

// ============================================================================
// MEASUREMENT
// ============================================================================

/// A calibrated measurement in the local frame of its surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Measurement {
    /// One-dimensional, measures loc0
    Strip { value: f64, variance: f64 },

    /// Two-dimensional, measures (loc0, loc1)
    Pixel {
        values: Vector2<f64>,
        covariance: Matrix2<f64>,
    },
}

impl Measurement {
    pub fn dim(&self) -> usize {
        match self {
            Measurement::Strip { .. } => 1,
            Measurement::Pixel { .. } => 2,
        }
    }

    pub fn values(&self) -> DVector<f64> {
        match self {
            Measurement::Strip { value, .. } => DVector::from_element(1, *value),
            Measurement::Pixel { values, .. } => DVector::from_column_slice(values.as_slice()),
        }
    }

    pub fn covariance(&self) -> DMatrix<f64> {
        match self {
            Measurement::Strip { variance, .. } => DMatrix::from_element(1, 1, *variance),
            Measurement::Pixel { covariance, .. } => {
                DMatrix::from_column_slice(2, 2, covariance.as_slice())
            }
        }
    }

    /// Projection from bound parameters onto the measured coordinates.
    pub fn projector(&self) -> DMatrix<f64> {
        let mut h = DMatrix::zeros(self.dim(), BOUND_SIZE);
        for row in 0..self.dim() {
            h[(row, row)] = 1.0;
        }
        h
    }
}

// ============================================================================
// TRACK STATE
// ============================================================================

/// One measurement slot of a trajectory, filled in as the fit proceeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    /// Surface the measurement lives on
    pub surface: SurfaceId,

    /// Source link of the measurement
    pub source: Identifier,

    pub measurement: Measurement,

    /// Parameters transported onto the surface before the update
    pub predicted: Option<BoundParameters>,

    /// Parameters after the measurement update
    pub filtered: Option<BoundParameters>,

    /// Parameters after smoothing (filled by a later stage)
    pub smoothed: Option<BoundParameters>,

    pub chi2: Option<f64>,

    /// Set when the update for this state was rejected
    pub outlier: bool,
}

impl TrackState {
    pub fn new(surface: SurfaceId, source: Identifier, measurement: Measurement) -> Self {
        Self {
            surface,
            source,
            measurement,
            predicted: None,
            filtered: None,
            smoothed: None,
            chi2: None,
            outlier: false,
        }
    }

    /// True once the state has been visited by the fit, successfully or not.
    pub fn is_processed(&self) -> bool {
        self.filtered.is_some() || self.outlier
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bound_parameters_global_consistency() {
        let plane = Surface::plane_with_normal(Vector3::new(100.0, 0.0, 0.0), Vector3::x(), 50.0, 50.0);
        let position = Vector3::new(100.0, 3.0, -2.0);
        let momentum = Vector3::new(2.0, 0.1, 0.2);

        let bound = BoundParameters::from_global(SurfaceId(0), &plane, position, momentum, -1.0, None);
        assert_relative_eq!(bound.parameters[QOP], -1.0 / momentum.norm(), epsilon = 1e-12);
        assert_relative_eq!(bound.direction(), momentum.normalize(), epsilon = 1e-12);

        // Rebuilding from the local parameters lands on the same global state
        let rebuilt = BoundParameters::new(SurfaceId(0), &plane, bound.parameters, None, -1.0);
        assert_relative_eq!(rebuilt.position(), position, epsilon = 1e-9);
        assert_relative_eq!(rebuilt.momentum(), momentum, epsilon = 1e-9);
    }

    #[test]
    fn test_neutral_momentum_uses_inverse_p() {
        let plane = Surface::plane_with_normal(Vector3::zeros(), Vector3::x(), 1.0, 1.0);
        let bound = BoundParameters::from_global(
            SurfaceId(0),
            &plane,
            Vector3::zeros(),
            Vector3::new(4.0, 0.0, 0.0),
            0.0,
            None,
        );
        assert_relative_eq!(bound.parameters[QOP], 0.25, epsilon = 1e-12);
        assert_relative_eq!(bound.momentum().norm(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_measurement_projectors() {
        let strip = Measurement::Strip { value: 1.5, variance: 0.01 };
        let h = strip.projector();
        assert_eq!(h.shape(), (1, 5));
        assert_eq!(h[(0, LOC0)], 1.0);
        assert_eq!(strip.values()[0], 1.5);

        let pixel = Measurement::Pixel {
            values: Vector2::new(1.0, 2.0),
            covariance: Matrix2::identity() * 0.04,
        };
        let h = pixel.projector();
        assert_eq!(h.shape(), (2, 5));
        assert_eq!(h[(1, LOC1)], 1.0);
        assert_eq!(h.sum(), 2.0);
        assert_eq!(pixel.covariance()[(1, 1)], 0.04);
    }

    #[test]
    fn test_fresh_state_is_unprocessed() {
        let state = TrackState::new(
            SurfaceId(3),
            Identifier::new(9),
            Measurement::Strip { value: 0.0, variance: 1.0 },
        );
        assert!(!state.is_processed());
        assert!(state.predicted.is_none() && state.smoothed.is_none());
    }
}
