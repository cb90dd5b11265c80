//! Kalman fitting actor.
//!
//! The [`KalmanActor`] runs inside the propagation loop. On its first call it
//! takes ownership of the trajectory, resolves a layer for every track state
//! and builds the [`MeasurementSurfaces`] index that tells the navigator where
//! to stop. On every later call it checks whether the surface just reached
//! carries a measurement, and if so transports the track onto it, runs the
//! measurement update and commits the result back into the stepper.
//!
//! States whose layer cannot be resolved are kept in the trajectory but are
//! never updated, and the fit terminates once every *resolved* state has been
//! processed.

use crate::geometry::{LayerId, SurfaceId};
use crate::propagator::{Actor, PropagatorState, Stepper};
use crate::track_state::TrackState;
use crate::updator::{Calibrator, Updator, VoidCalibrator, VoidUpdator};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, warn};
use trackfit_env::PropagationError;

const DEBUG_PREFIX: &str = "KalmanActor";

// ============================================================================
// MEASUREMENT SURFACES
// ============================================================================

/// Ordered multi-map from layer to the measurement surfaces on it.
///
/// Layers are ordered by handle; surfaces within one layer keep insertion
/// order. The order says nothing about the order the track crosses them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementSurfaces {
    entries: BTreeMap<LayerId, Vec<SurfaceId>>,
}

impl MeasurementSurfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer: LayerId, surface: SurfaceId) {
        self.entries.entry(layer).or_default().push(surface);
    }

    /// Total number of (layer, surface) entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Surfaces registered for `layer`, in insertion order.
    pub fn surfaces_on(&self, layer: LayerId) -> &[SurfaceId] {
        self.entries.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn layers(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayerId, SurfaceId)> + '_ {
        self.entries
            .iter()
            .flat_map(|(&layer, surfaces)| surfaces.iter().map(move |&surface| (layer, surface)))
    }

    pub fn contains(&self, surface: SurfaceId) -> bool {
        self.entries.values().any(|surfaces| surfaces.contains(&surface))
    }
}

// ============================================================================
// FIT RESULT
// ============================================================================

/// Lifecycle of a fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorStatus {
    #[default]
    Uninitialized,
    Active,
    Terminated,
}

/// Running state of one fit, owned by the propagation loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitResult {
    /// The trajectory, moved in from the actor on initialization
    pub fitted_states: Vec<TrackState>,

    /// Number of states visited so far (updated or rejected)
    pub processed_states: usize,

    /// Position of each measurement surface in `fitted_states`
    pub access_index: BTreeMap<SurfaceId, usize>,

    pub status: ActorStatus,

    /// Positions of states whose layer could not be resolved
    pub unresolved: Vec<usize>,

    /// Number of rejected updates
    pub outliers: usize,

    processed: BTreeSet<SurfaceId>,
}

impl FitResult {
    /// Number of states the fit waits for before terminating.
    pub fn expected_states(&self) -> usize {
        self.access_index.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.status == ActorStatus::Terminated
    }

    /// States that received a successful update.
    pub fn filtered_states(&self) -> impl Iterator<Item = &TrackState> {
        self.fitted_states.iter().filter(|state| state.filtered.is_some())
    }

    /// Sum of chi2 over successfully updated states.
    pub fn chi2_sum(&self) -> f64 {
        self.fitted_states.iter().filter_map(|state| state.chi2).sum()
    }
}

// ============================================================================
// KALMAN ACTOR
// ============================================================================

/// Propagation actor performing the forward Kalman filter.
#[derive(Debug, Clone)]
pub struct KalmanActor<U = VoidUpdator, C = VoidCalibrator> {
    track_states: Option<Vec<TrackState>>,
    pub updator: U,
    pub calibrator: C,
}

impl KalmanActor {
    /// Create an actor that will fit `track_states`.
    pub fn new(track_states: Vec<TrackState>) -> Self {
        Self {
            track_states: Some(track_states),
            updator: VoidUpdator,
            calibrator: VoidCalibrator,
        }
    }
}

impl<U, C> KalmanActor<U, C> {
    pub fn with_updator<V>(self, updator: V) -> KalmanActor<V, C> {
        KalmanActor {
            track_states: self.track_states,
            updator,
            calibrator: self.calibrator,
        }
    }

    pub fn with_calibrator<D>(self, calibrator: D) -> KalmanActor<U, D> {
        KalmanActor {
            track_states: self.track_states,
            updator: self.updator,
            calibrator,
        }
    }

    /// True once the trajectory has been handed to a fit result.
    pub fn is_consumed(&self) -> bool {
        self.track_states.is_none()
    }
}

impl<U: Updator, C: Calibrator> KalmanActor<U, C> {
    /// Take the trajectory and build the measurement index.
    fn initialize<S: Stepper>(
        &mut self,
        state: &mut PropagatorState<'_, S>,
        result: &mut FitResult,
    ) -> Result<(), FitError> {
        if !result.fitted_states.is_empty() {
            return Err(FitError::TrajectoryConsumed);
        }
        let track_states = self.track_states.take().ok_or(FitError::TrajectoryConsumed)?;

        let mut surfaces = MeasurementSurfaces::new();
        for (index, track_state) in track_states.iter().enumerate() {
            let surface = track_state.surface;
            if result.access_index.contains_key(&surface) {
                error!(?surface, index, "Two track states share one surface");
                return Err(FitError::DuplicateSurface(surface));
            }
            match resolve_layer(state, surface) {
                Some(layer) => {
                    surfaces.insert(layer, surface);
                    result.access_index.insert(surface, index);
                }
                None => {
                    warn!(?surface, index, "No layer for track state, it will not be updated");
                    result.unresolved.push(index);
                }
            }
        }

        let (total, resolved) = (track_states.len(), surfaces.len());
        debug!(total, resolved, "Kalman fit initialized");
        state.options.debug_log(DEBUG_PREFIX, || {
            format!("Initialized {} of {} track states", resolved, total)
        });

        state.navigation.sequence.external_surfaces = surfaces;
        result.fitted_states = track_states;
        result.status = ActorStatus::Active;
        Ok(())
    }

    /// Transport onto `surface_id`, update and commit.
    fn update<S: Stepper>(
        &mut self,
        state: &mut PropagatorState<'_, S>,
        result: &mut FitResult,
        surface_id: SurfaceId,
        index: usize,
    ) -> Result<(), FitError> {
        if result.processed.contains(&surface_id) {
            error!(surface = ?surface_id, "Measurement surface reached twice");
            return Err(FitError::SurfaceRevisited(surface_id));
        }

        let geometry = state.navigation.geometry;
        let surface = geometry.surface(surface_id).ok_or_else(|| {
            PropagationError::navigation(format!("unknown surface {:?}", surface_id))
        })?;
        let predicted = state.stepping.bind(surface_id, surface, true)?;
        result.processed.insert(surface_id);

        let track_state = &mut result.fitted_states[index];
        self.calibrator.calibrate(track_state, &predicted);

        match self.updator.update(track_state, &predicted, surface) {
            Some(updated) => {
                let filtered = updated.parameters;
                let momentum = filtered.momentum();
                state
                    .stepping
                    .update(filtered.position(), momentum.normalize(), momentum.norm());
                if let Some(covariance) = filtered.covariance {
                    state.stepping.set_covariance(covariance);
                }
                state.options.debug_log(DEBUG_PREFIX, || {
                    format!("Updated on {} with chi2 = {:.3}", surface.geometry_id(), updated.chi2)
                });
                track_state.chi2 = Some(updated.chi2);
                track_state.filtered = Some(filtered);
            }
            None => {
                warn!(surface = ?surface_id, source = %track_state.source, "Measurement update rejected");
                state.options.debug_log(DEBUG_PREFIX, || {
                    format!("Rejected on {}", surface.geometry_id())
                });
                track_state.outlier = true;
                result.outliers += 1;
            }
        }

        track_state.predicted = Some(predicted);
        result.processed_states += 1;
        Ok(())
    }
}

/// Layer of a measurement surface: the back reference if present, otherwise
/// looked up at the surface's forward intersection with the current track.
///
/// The intersection is not bounds checked: a point outside the surface bounds
/// still resolves the layer whose envelope contains it.
fn resolve_layer<S: Stepper>(state: &PropagatorState<'_, S>, surface_id: SurfaceId) -> Option<LayerId> {
    let geometry = state.navigation.geometry;
    let surface = geometry.surface(surface_id)?;
    if let Some(layer) = surface.associated_layer() {
        return Some(layer);
    }

    let intersection = surface.intersection_estimate(
        &state.stepping.position(),
        &state.stepping.direction(),
        state.options.direction,
        false,
    );
    if !intersection.valid {
        return None;
    }
    let world = state.navigation.world_volume?;
    let volume = geometry.tracking_volume(world, &intersection.position)?;
    geometry.associated_layer(volume, &intersection.position)
}

impl<S, U, C> Actor<S> for KalmanActor<U, C>
where
    S: Stepper,
    U: Updator,
    C: Calibrator,
{
    type Result = FitResult;
    type Error = FitError;

    fn act(&mut self, state: &mut PropagatorState<'_, S>, result: &mut FitResult) -> Result<(), FitError> {
        match result.status {
            ActorStatus::Terminated => return Ok(()),
            ActorStatus::Uninitialized => self.initialize(state, result)?,
            ActorStatus::Active => {}
        }

        if let Some(surface) = state.navigation.current_surface {
            if let Some(&index) = result.access_index.get(&surface) {
                self.update(state, result, surface, index)?;
            }
        }

        let expected = result.expected_states();
        if result.processed_states > expected {
            error!(processed = result.processed_states, expected, "Processed more states than expected");
            return Err(FitError::CountMismatch {
                processed: result.processed_states,
                expected,
            });
        }
        if result.processed_states == expected {
            debug!(processed = result.processed_states, outliers = result.outliers, "Kalman fit finished");
            state.options.debug_log(DEBUG_PREFIX, || {
                format!("All {} measurement states processed, stopping", expected)
            });
            result.status = ActorStatus::Terminated;
            state.stop();
        }
        Ok(())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that abort a fit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("Trajectory was already consumed by an earlier initialization")]
    TrajectoryConsumed,

    #[error("Surface {0:?} was reached again after being processed")]
    SurfaceRevisited(SurfaceId),

    #[error("Processed {processed} states, expected at most {expected}")]
    CountMismatch { processed: usize, expected: usize },

    #[error("More than one track state on surface {0:?}")]
    DuplicateSurface(SurfaceId),

    #[error("Propagation failed: {0}")]
    Propagation(#[from] PropagationError),
}

// ============================================================================
// TESTS
// ============================================================================
