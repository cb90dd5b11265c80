//! Straight-line reference stepper.
//!
//! Tracks move on straight lines (no magnetic field). The bound covariance is
//! transported with a jacobian whose angle columns are obtained by central
//! differences of the target-surface intersection, taken from the point where
//! the covariance was last committed. Local coordinates are carried over one
//! to one.

use nalgebra::{Matrix5, Vector3};
use trackfit_core::surface::Surface;
use trackfit_core::track_state::{direction_from_angles, BoundParameters, LOC0, LOC1, PHI, THETA};
use trackfit_core::{Stepper, SurfaceId};
use trackfit_env::{NavigationDirection, PropagationError};

/// Angle step (rad) for the numerical jacobian.
const JACOBIAN_EPSILON: f64 = 1e-6;

/// Kinematic state moving along straight lines.
#[derive(Debug, Clone, PartialEq)]
pub struct StraightLineStepper {
    position: Vector3<f64>,
    direction: Vector3<f64>,
    momentum: f64,
    charge: f64,
    covariance: Matrix5<f64>,
    nav_direction: NavigationDirection,

    /// Position at which `covariance` is expressed
    commit_position: Vector3<f64>,

    /// Total path travelled (mm)
    path_length: f64,
}

impl StraightLineStepper {
    pub fn new(
        position: Vector3<f64>,
        direction: Vector3<f64>,
        momentum: f64,
        charge: f64,
        covariance: Matrix5<f64>,
    ) -> Self {
        Self {
            position,
            direction: direction.normalize(),
            momentum,
            charge,
            covariance,
            nav_direction: NavigationDirection::Forward,
            commit_position: position,
            path_length: 0.0,
        }
    }

    pub fn with_nav_direction(mut self, nav_direction: NavigationDirection) -> Self {
        self.nav_direction = nav_direction;
        self
    }

    pub fn nav_direction(&self) -> NavigationDirection {
        self.nav_direction
    }

    /// Move `distance` along the navigation-signed direction.
    pub fn step(&mut self, distance: f64) {
        self.position += self.direction * (self.nav_direction.sign() * distance);
        self.path_length += distance.abs();
    }

    pub fn path_length(&self) -> f64 {
        self.path_length
    }

    fn angles(&self) -> (f64, f64) {
        (
            self.direction.y.atan2(self.direction.x),
            self.direction.z.clamp(-1.0, 1.0).acos(),
        )
    }

    /// Jacobian from the committed bound frame to `surface`.
    fn transport_jacobian(&self, surface: &Surface) -> Matrix5<f64> {
        let mut jacobian = Matrix5::identity();
        let (phi, theta) = self.angles();

        let local_at = |phi: f64, theta: f64| {
            let direction = direction_from_angles(phi, theta);
            let hit = surface.intersection_estimate(
                &self.commit_position,
                &direction,
                self.nav_direction,
                false,
            );
            hit.valid.then(|| surface.global_to_local(&hit.position, &direction))
        };

        for (column, d_phi, d_theta) in [(PHI, JACOBIAN_EPSILON, 0.0), (THETA, 0.0, JACOBIAN_EPSILON)] {
            let plus = local_at(phi + d_phi, theta + d_theta);
            let minus = local_at(phi - d_phi, theta - d_theta);
            if let (Some(plus), Some(minus)) = (plus, minus) {
                let derivative = (plus - minus) / (2.0 * JACOBIAN_EPSILON);
                jacobian[(LOC0, column)] = derivative.x;
                jacobian[(LOC1, column)] = derivative.y;
            }
        }
        jacobian
    }
}

impl Stepper for StraightLineStepper {
    fn position(&self) -> Vector3<f64> {
        self.position
    }

    fn direction(&self) -> Vector3<f64> {
        self.direction
    }

    fn momentum(&self) -> f64 {
        self.momentum
    }

    fn charge(&self) -> f64 {
        self.charge
    }

    fn covariance(&self) -> &Matrix5<f64> {
        &self.covariance
    }

    fn set_covariance(&mut self, covariance: Matrix5<f64>) {
        self.covariance = covariance;
        self.commit_position = self.position;
    }

    fn bind(
        &self,
        surface_id: SurfaceId,
        surface: &Surface,
        with_covariance: bool,
    ) -> Result<BoundParameters, PropagationError> {
        let hit = surface.intersection_estimate(&self.position, &self.direction, self.nav_direction, false);
        if !hit.valid {
            return Err(PropagationError::transport(format!(
                "surface {} not reachable from {:?}",
                surface.geometry_id(),
                self.position
            )));
        }

        let covariance = with_covariance.then(|| {
            let jacobian = self.transport_jacobian(surface);
            jacobian * self.covariance * jacobian.transpose()
        });

        Ok(BoundParameters::from_global(
            surface_id,
            surface,
            hit.position,
            self.direction * self.momentum,
            self.charge,
            covariance,
        ))
    }

    fn update(&mut self, position: Vector3<f64>, direction: Vector3<f64>, momentum: f64) {
        self.position = position;
        self.direction = direction;
        self.momentum = momentum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plane_at_x(x: f64) -> Surface {
        Surface::plane_with_normal(Vector3::new(x, 0.0, 0.0), Vector3::x(), 50.0, 50.0)
    }

    #[test]
    fn test_step_and_path_length() {
        let mut stepper = StraightLineStepper::new(
            Vector3::zeros(),
            Vector3::new(3.0, 4.0, 0.0),
            1.0,
            1.0,
            Matrix5::identity(),
        );
        stepper.step(10.0);
        assert_relative_eq!(stepper.position(), Vector3::new(6.0, 8.0, 0.0), epsilon = 1e-12);

        let mut backward = stepper.clone().with_nav_direction(NavigationDirection::Backward);
        backward.step(5.0);
        assert_relative_eq!(backward.position(), Vector3::new(3.0, 4.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(backward.path_length(), 15.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bind_is_side_effect_free() {
        let stepper = StraightLineStepper::new(Vector3::zeros(), Vector3::x(), 2.0, -1.0, Matrix5::identity());
        let before = stepper.clone();
        let bound = stepper.bind(SurfaceId(0), &plane_at_x(100.0), true).unwrap();

        assert_eq!(stepper, before);
        assert_relative_eq!(bound.position(), Vector3::new(100.0, 0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(bound.parameters[4], -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_covariance_grows_with_path() {
        let stepper = StraightLineStepper::new(Vector3::zeros(), Vector3::x(), 2.0, 1.0, Matrix5::identity() * 1e-4);
        let near = stepper.bind(SurfaceId(0), &plane_at_x(10.0), true).unwrap();
        let far = stepper.bind(SurfaceId(1), &plane_at_x(100.0), true).unwrap();

        let near_cov = near.covariance.unwrap();
        let far_cov = far.covariance.unwrap();
        // loc1 follows phi, loc0 follows theta: var = 1e-4 * (1 + s^2)
        assert_relative_eq!(near_cov[(LOC1, LOC1)], 1e-4 * 101.0, max_relative = 1e-5);
        assert_relative_eq!(far_cov[(LOC1, LOC1)], 1e-4 * 10_001.0, max_relative = 1e-5);
        assert_relative_eq!(far_cov[(LOC0, LOC0)], 1e-4 * 10_001.0, max_relative = 1e-5);
        assert!(stepper.bind(SurfaceId(2), &plane_at_x(100.0), false).unwrap().covariance.is_none());
    }

    #[test]
    fn test_commit_resets_transport_origin() {
        let mut stepper = StraightLineStepper::new(Vector3::zeros(), Vector3::x(), 2.0, 1.0, Matrix5::identity() * 1e-4);
        stepper.step(90.0);
        stepper.set_covariance(Matrix5::identity() * 1e-4);
        let bound = stepper.bind(SurfaceId(0), &plane_at_x(100.0), true).unwrap();
        assert_relative_eq!(bound.covariance.unwrap()[(LOC1, LOC1)], 1e-4 * 101.0, max_relative = 1e-5);
    }

    #[test]
    fn test_unreachable_surface_is_transport_error() {
        let stepper = StraightLineStepper::new(Vector3::zeros(), Vector3::x(), 2.0, 1.0, Matrix5::identity());
        let err = stepper.bind(SurfaceId(0), &plane_at_x(-10.0), true).unwrap_err();
        assert!(matches!(err, PropagationError::Transport(_)));
    }
}
