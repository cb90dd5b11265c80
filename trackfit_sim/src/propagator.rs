//! Propagation loop: actor, navigate, step, repeat.

use crate::navigator::Navigator;
use crate::stepper::StraightLineStepper;
use nalgebra::Vector3;
use tracing::{debug, trace};
use trackfit_core::{Actor, PropagatorState, Stepper, TrackingGeometry};
use trackfit_env::{PropagationError, PropagatorOptions};

/// Everything a finished propagation hands back.
#[derive(Debug, Clone)]
pub struct PropagationOutput<R> {
    /// The actor's result
    pub result: R,

    /// Kinematic state at the end
    pub stepper: StraightLineStepper,

    pub steps: usize,

    /// True if the track left the world before the actor stopped it
    pub left_world: bool,

    /// Per-step debug lines (only filled with `PropagatorOptions::debug`)
    pub debug_string: String,
}

impl<R> PropagationOutput<R> {
    pub fn final_position(&self) -> Vector3<f64> {
        self.stepper.position()
    }
}

/// Drives a single actor along a straight-line track.
#[derive(Debug, Clone, Copy, Default)]
pub struct Propagator {
    navigator: Navigator,
}

impl Propagator {
    pub fn new(navigator: Navigator) -> Self {
        Self { navigator }
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Run `actor` from `start` until it stops the propagation or the track
    /// leaves the world.
    ///
    /// The actor is called once before the first step and once after every
    /// step.
    pub fn propagate<A>(
        &self,
        geometry: &TrackingGeometry,
        start: StraightLineStepper,
        options: PropagatorOptions,
        actor: &mut A,
    ) -> Result<PropagationOutput<A::Result>, A::Error>
    where
        A: Actor<StraightLineStepper>,
    {
        let momentum = start.momentum();
        if momentum.is_nan() || momentum <= 0.0 || !start.direction().iter().all(|c| c.is_finite()) {
            return Err(PropagationError::InvalidState(format!(
                "momentum {} direction {:?}",
                momentum,
                start.direction()
            ))
            .into());
        }

        let stepper = start.with_nav_direction(options.direction);
        let mut state = PropagatorState::new(geometry, stepper, options);
        self.navigator.initialize(&mut state)?;

        let mut result = A::Result::default();
        let mut steps = 0;
        let mut left_world = false;

        loop {
            actor.act(&mut state, &mut result)?;
            if state.is_stopped() {
                break;
            }
            if steps >= state.options.max_steps {
                return Err(PropagationError::StepLimitReached(steps).into());
            }

            let target = self
                .navigator
                .next_target(&state)
                .ok_or_else(|| PropagationError::navigation("nothing reachable ahead of the track"))?;
            if state.stepping.path_length() + target.path_length > state.options.path_limit {
                return Err(PropagationError::PathLimitReached(state.options.path_limit).into());
            }

            state.stepping.step(target.path_length);
            steps += 1;
            trace!(step = steps, target = ?target.kind, path = target.path_length, "Step");

            if !self.navigator.reach(&mut state, &target) {
                debug!(steps, "Track left the world");
                left_world = true;
                break;
            }
        }

        Ok(PropagationOutput {
            result,
            stepper: state.stepping,
            steps,
            left_world,
            debug_string: state.options.debug_string,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector;
    use approx::assert_relative_eq;
    use nalgebra::Matrix5;
    use trackfit_core::{FitError, KalmanActor, SurfaceId};

    /// Records every surface the navigator reports.
    #[derive(Default)]
    struct SurfaceRecorder {
        stop_after: Option<usize>,
    }

    impl Actor<StraightLineStepper> for SurfaceRecorder {
        type Result = Vec<SurfaceId>;
        type Error = PropagationError;

        fn act(
            &mut self,
            state: &mut PropagatorState<'_, StraightLineStepper>,
            result: &mut Vec<SurfaceId>,
        ) -> Result<(), PropagationError> {
            if let Some(surface) = state.navigation.current_surface {
                result.push(surface);
            }
            if self.stop_after == Some(result.len()) {
                state.stop();
            }
            Ok(())
        }
    }

    fn start_along_x() -> StraightLineStepper {
        StraightLineStepper::new(Vector3::new(1.0, 0.0, 0.0), Vector3::x(), 1.0, 1.0, Matrix5::identity())
    }

    #[test]
    fn test_stop_on_all_visits_layers_in_order() {
        let geometry = detector::telescope(4, 100.0, 50.0).unwrap();
        let propagator = Propagator::new(Navigator::new().with_stop_on_all(true));
        let mut recorder = SurfaceRecorder::default();

        let output = propagator
            .propagate(&geometry, start_along_x(), PropagatorOptions::default(), &mut recorder)
            .unwrap();

        let expected: Vec<SurfaceId> = geometry.sensitive_surfaces().collect();
        assert_eq!(output.result, expected);
        assert!(output.left_world);
        assert_relative_eq!(output.final_position().x, 500.0, epsilon = 1e-9);
    }

    #[test]
    fn test_actor_stop_ends_propagation() {
        let geometry = detector::telescope(4, 100.0, 50.0).unwrap();
        let propagator = Propagator::new(Navigator::new().with_stop_on_all(true));
        let mut recorder = SurfaceRecorder { stop_after: Some(2) };

        let output = propagator
            .propagate(&geometry, start_along_x(), PropagatorOptions::default(), &mut recorder)
            .unwrap();
        assert_eq!(output.result.len(), 2);
        assert_eq!(output.steps, 2);
        assert!(!output.left_world);
    }

    #[test]
    fn test_step_limit() {
        let geometry = detector::telescope(4, 100.0, 50.0).unwrap();
        let propagator = Propagator::new(Navigator::new().with_stop_on_all(true));
        let options = PropagatorOptions::default().with_max_steps(2);

        let err = propagator
            .propagate(&geometry, start_along_x(), options, &mut SurfaceRecorder::default())
            .unwrap_err();
        assert_eq!(err, PropagationError::StepLimitReached(2));
    }

    #[test]
    fn test_path_limit() {
        let geometry = detector::telescope(4, 100.0, 50.0).unwrap();
        let propagator = Propagator::new(Navigator::new().with_stop_on_all(true));
        let options = PropagatorOptions::default().with_path_limit(150.0);

        let err = propagator
            .propagate(&geometry, start_along_x(), options, &mut SurfaceRecorder::default())
            .unwrap_err();
        assert_eq!(err, PropagationError::PathLimitReached(150.0));
    }

    #[test]
    fn test_start_outside_world_is_navigation_error() {
        let geometry = detector::telescope(4, 100.0, 50.0).unwrap();
        let start = StraightLineStepper::new(Vector3::new(-900.0, 0.0, 0.0), Vector3::x(), 1.0, 1.0, Matrix5::identity());
        let mut actor = KalmanActor::new(Vec::new());

        let err = Propagator::default()
            .propagate(&geometry, start, PropagatorOptions::default(), &mut actor)
            .unwrap_err();
        assert!(matches!(err, FitError::Propagation(PropagationError::Navigation(_))));
    }

    #[test]
    fn test_unreachable_indexed_state_leaves_fit_active() {
        use nalgebra::{Isometry3, Vector2};
        use trackfit_core::track_state::{Measurement, TrackState};
        use trackfit_core::{ActorStatus, GeometryBuilder, Identifier, Surface, VolumeBounds};

        let mut builder = GeometryBuilder::new();
        let world = builder
            .add_volume(
                "world",
                Isometry3::identity(),
                VolumeBounds::Cuboid { half_x: 500.0, half_y: 100.0, half_z: 100.0 },
                None,
            )
            .unwrap();
        let mut measured = Vec::new();
        for x in [100.0, 200.0, 300.0] {
            let plane = Surface::plane_with_normal(Vector3::new(x, 0.0, 0.0), Vector3::x(), 50.0, 50.0);
            let layer = builder.add_layer(world, plane.clone(), 1.0).unwrap();
            measured.push(builder.add_sensitive_surface(layer, plane).unwrap());
        }
        // Resolves onto the last layer, but the track passes beside it
        let beside = builder.add_detached_surface(Surface::plane_with_normal(
            Vector3::new(300.0, 5.0, 0.0),
            Vector3::x(),
            0.5,
            0.5,
        ));
        measured.push(beside);
        let geometry = builder.build(world).unwrap();

        let states = measured
            .iter()
            .enumerate()
            .map(|(i, &surface)| {
                TrackState::new(
                    surface,
                    Identifier::new(i as u64),
                    Measurement::Pixel { values: Vector2::zeros(), covariance: nalgebra::Matrix2::identity() },
                )
            })
            .collect();
        let mut actor = KalmanActor::new(states);

        let output = Propagator::default()
            .propagate(&geometry, start_along_x(), PropagatorOptions::default(), &mut actor)
            .unwrap();

        assert!(output.left_world);
        assert_eq!(output.result.expected_states(), 4);
        assert_eq!(output.result.processed_states, 3);
        assert_eq!(output.result.status, ActorStatus::Active);
        assert!(output.result.unresolved.is_empty());
        assert!(!output.result.fitted_states[3].is_processed());
    }

    #[test]
    fn test_zero_momentum_rejected() {
        let geometry = detector::telescope(2, 100.0, 50.0).unwrap();
        let start = StraightLineStepper::new(Vector3::zeros(), Vector3::x(), 0.0, 1.0, Matrix5::identity());
        let err = Propagator::default()
            .propagate(&geometry, start, PropagatorOptions::default(), &mut SurfaceRecorder::default())
            .unwrap_err();
        assert!(matches!(err, PropagationError::InvalidState(_)));
    }

    #[test]
    fn test_barrel_crosses_shells_and_leaves_world() {
        let geometry = detector::barrel(&[30.0, 60.0, 90.0], 500.0).unwrap();
        let propagator = Propagator::new(Navigator::new().with_stop_on_all(true));
        let start = StraightLineStepper::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 0.2), 1.0, 1.0, Matrix5::identity());

        let output = propagator
            .propagate(&geometry, start, PropagatorOptions::default(), &mut SurfaceRecorder::default())
            .unwrap();

        let expected: Vec<SurfaceId> = geometry.sensitive_surfaces().collect();
        assert_eq!(output.result, expected);
        assert!(output.left_world);
    }
}
