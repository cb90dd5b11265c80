//! Seams between the fit and the propagation engine.
//!
//! The engine owns a [`PropagatorState`] (stepper, navigation and options)
//! and hands it by mutable reference to an [`Actor`] once per step. Actors
//! never keep the state between calls.

use crate::geometry::{SurfaceId, TrackingGeometry, VolumeId};
use crate::kalman::MeasurementSurfaces;
use crate::surface::Surface;
use crate::track_state::BoundParameters;
use nalgebra::{Matrix5, Vector3};
use trackfit_env::{PropagationError, PropagatorOptions};

/// Running kinematic state of the propagation.
pub trait Stepper {
    fn position(&self) -> Vector3<f64>;

    /// Unit direction of motion.
    fn direction(&self) -> Vector3<f64>;

    /// Momentum magnitude.
    fn momentum(&self) -> f64;

    fn charge(&self) -> f64;

    /// Bound covariance as last committed.
    fn covariance(&self) -> &Matrix5<f64>;

    fn set_covariance(&mut self, covariance: Matrix5<f64>);

    /// Transport the current state onto `surface` and express it there.
    ///
    /// Must not change the stepper; callers commit results through
    /// [`Stepper::update`] and [`Stepper::set_covariance`].
    fn bind(
        &self,
        surface_id: SurfaceId,
        surface: &Surface,
        with_covariance: bool,
    ) -> Result<BoundParameters, PropagationError>;

    /// Overwrite position, direction and momentum magnitude.
    fn update(&mut self, position: Vector3<f64>, direction: Vector3<f64>, momentum: f64);
}

/// Hints the actors give the navigator.
#[derive(Debug, Clone, Default)]
pub struct NavigationSequence {
    /// Surfaces the navigator should stop on
    pub external_surfaces: MeasurementSurfaces,
}

/// Navigation part of the propagation state.
#[derive(Debug, Clone)]
pub struct NavigationState<'g> {
    pub geometry: &'g TrackingGeometry,
    pub world_volume: Option<VolumeId>,
    pub current_volume: Option<VolumeId>,

    /// Surface reached by the last step, if any
    pub current_surface: Option<SurfaceId>,

    pub sequence: NavigationSequence,

    /// Set to stop the propagation after the current step
    pub target_reached: bool,
}

impl<'g> NavigationState<'g> {
    pub fn new(geometry: &'g TrackingGeometry) -> Self {
        Self {
            geometry,
            world_volume: Some(geometry.world_volume()),
            current_volume: None,
            current_surface: None,
            sequence: NavigationSequence::default(),
            target_reached: false,
        }
    }
}

/// Everything an actor may read or modify during one step.
#[derive(Debug, Clone)]
pub struct PropagatorState<'g, S> {
    pub stepping: S,
    pub navigation: NavigationState<'g>,
    pub options: PropagatorOptions,
}

impl<'g, S: Stepper> PropagatorState<'g, S> {
    pub fn new(geometry: &'g TrackingGeometry, stepping: S, options: PropagatorOptions) -> Self {
        Self {
            stepping,
            navigation: NavigationState::new(geometry),
            options,
        }
    }

    /// Ask the engine to stop after this step.
    pub fn stop(&mut self) {
        self.navigation.target_reached = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.navigation.target_reached
    }
}

/// A per-step callback run by the propagation engine.
pub trait Actor<S: Stepper> {
    /// Running result, created empty by the engine at the start.
    type Result: Default;

    type Error: From<PropagationError>;

    fn act(
        &mut self,
        state: &mut PropagatorState<'_, S>,
        result: &mut Self::Result,
    ) -> Result<(), Self::Error>;
}
