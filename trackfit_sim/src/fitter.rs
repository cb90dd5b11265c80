//! Glue between simulated tracks and the Kalman actor.
//!
//! One fit is one propagation: the actor is seeded with the track states of a
//! [`SimulatedTrack`], the propagation starts from the truth vertex and the
//! filled [`FitResult`] is condensed into a serializable [`TrackFitSummary`].

use crate::error::SimError;
use crate::navigator::Navigator;
use crate::oracle::SimulatedTrack;
use crate::propagator::Propagator;
use crate::stepper::StraightLineStepper;
use nalgebra::Matrix5;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;
use trackfit_core::{FitResult, GainMatrixUpdator, GeometryId, Identifier, KalmanActor, TrackingGeometry};
use trackfit_env::PropagatorOptions;

/// Chi2 above which an update is rejected as an outlier.
pub const DEFAULT_MAX_CHI2: f64 = 50.0;

/// How tracks are fitted.
#[derive(Debug, Clone)]
pub struct FitSettings {
    /// Navigate every sensitive surface, not only the measured ones
    pub stop_on_all: bool,

    pub max_chi2: Option<f64>,

    pub options: PropagatorOptions,

    /// Covariance of the start parameters
    pub initial_covariance: Matrix5<f64>,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            stop_on_all: false,
            max_chi2: Some(DEFAULT_MAX_CHI2),
            options: PropagatorOptions::default(),
            initial_covariance: Matrix5::from_diagonal(&nalgebra::Vector5::new(1.0, 1.0, 1e-2, 1e-2, 1e-2)),
        }
    }
}

impl FitSettings {
    pub fn with_stop_on_all(mut self, stop_on_all: bool) -> Self {
        self.stop_on_all = stop_on_all;
        self
    }

    pub fn with_max_chi2(mut self, max_chi2: Option<f64>) -> Self {
        self.max_chi2 = max_chi2;
        self
    }

    pub fn with_options(mut self, options: PropagatorOptions) -> Self {
        self.options = options;
        self
    }
}

/// Per-state outcome, in trajectory order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateRecord {
    pub geometry_id: GeometryId,
    pub source: Identifier,
    pub processed: bool,
    pub outlier: bool,
    pub chi2: Option<f64>,
    pub filtered: Option<[f64; 3]>,
    pub truth: Option<[f64; 3]>,
    /// Distance between filtered and truth position (mm)
    pub residual: Option<f64>,
}

/// Condensed outcome of one track fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackFitSummary {
    pub track_id: u64,
    pub states: usize,
    pub processed: usize,
    pub outliers: usize,
    pub unresolved: usize,
    pub terminated: bool,
    pub chi2: f64,
    pub ndf: usize,
    pub max_position_error: f64,
    pub steps: usize,
    pub path_length: f64,
    pub records: Vec<StateRecord>,
}

impl TrackFitSummary {
    /// Same fit outcome regardless of the trajectory order.
    pub fn same_outcome(&self, other: &TrackFitSummary) -> bool {
        let sorted = |summary: &TrackFitSummary| {
            let mut records = summary.records.clone();
            records.sort_by_key(|record| record.geometry_id);
            records
        };
        self.track_id == other.track_id
            && self.processed == other.processed
            && self.outliers == other.outliers
            && self.unresolved == other.unresolved
            && self.terminated == other.terminated
            && self.chi2 == other.chi2
            && self.steps == other.steps
            && sorted(self) == sorted(other)
    }

    pub fn chi2_per_ndf(&self) -> Option<f64> {
        (self.ndf > 0).then(|| self.chi2 / self.ndf as f64)
    }
}

/// A finished fit.
#[derive(Debug, Clone)]
pub struct TrackFit {
    pub summary: TrackFitSummary,
    pub result: FitResult,
}

/// Fit one simulated track, starting from its truth vertex.
pub fn fit_track(
    geometry: &TrackingGeometry,
    track: &SimulatedTrack,
    settings: &FitSettings,
) -> Result<TrackFit, SimError> {
    let particle = &track.particle;
    let start = StraightLineStepper::new(
        particle.origin,
        particle.direction,
        particle.momentum,
        particle.charge,
        settings.initial_covariance,
    );

    let updator = match settings.max_chi2 {
        Some(max_chi2) => GainMatrixUpdator::new().with_max_chi2(max_chi2),
        None => GainMatrixUpdator::new(),
    };
    let mut actor = KalmanActor::new(track.track_states.clone()).with_updator(updator);
    let propagator = Propagator::new(Navigator::new().with_stop_on_all(settings.stop_on_all));

    let output = propagator.propagate(geometry, start, settings.options.clone(), &mut actor)?;
    if !output.debug_string.is_empty() {
        debug!(track = particle.id, "\n{}", output.debug_string);
    }

    let result = output.result;
    let records: Vec<StateRecord> = result
        .fitted_states
        .iter()
        .map(|state| {
            let filtered = state.filtered.as_ref().map(|p| p.position());
            let truth = track.truth_position(state.surface);
            StateRecord {
                geometry_id: geometry
                    .surface(state.surface)
                    .map(|surface| surface.geometry_id())
                    .unwrap_or_default(),
                source: state.source,
                processed: state.is_processed(),
                outlier: state.outlier,
                chi2: state.chi2,
                filtered: filtered.map(|p| [p.x, p.y, p.z]),
                truth: truth.map(|p| [p.x, p.y, p.z]),
                residual: filtered.zip(truth).map(|(f, t)| (f - t).norm()),
            }
        })
        .collect();

    let summary = TrackFitSummary {
        track_id: particle.id,
        states: result.fitted_states.len(),
        processed: result.processed_states,
        outliers: result.outliers,
        unresolved: result.unresolved.len(),
        terminated: result.is_terminated(),
        chi2: result.chi2_sum(),
        ndf: result.filtered_states().map(|state| state.measurement.dim()).sum(),
        max_position_error: records
            .iter()
            .filter(|record| !record.outlier)
            .filter_map(|record| record.residual)
            .fold(0.0, f64::max),
        steps: output.steps,
        path_length: output.stepper.path_length(),
        records,
    };

    Ok(TrackFit { summary, result })
}

/// Fit every track in order.
pub fn fit_all(
    geometry: &TrackingGeometry,
    tracks: &[SimulatedTrack],
    settings: &FitSettings,
) -> Result<Vec<TrackFitSummary>, SimError> {
    tracks
        .iter()
        .map(|track| fit_track(geometry, track, settings).map(|fit| fit.summary))
        .collect()
}

/// Fit every track on the blocking pool, sharing one geometry.
///
/// Summaries come back in input order.
pub async fn fit_parallel(
    geometry: Arc<TrackingGeometry>,
    tracks: Vec<SimulatedTrack>,
    settings: FitSettings,
) -> Result<Vec<TrackFitSummary>, SimError> {
    let settings = Arc::new(settings);
    let mut tasks = JoinSet::new();
    for (index, track) in tracks.into_iter().enumerate() {
        let geometry = Arc::clone(&geometry);
        let settings = Arc::clone(&settings);
        tasks.spawn_blocking(move || fit_track(&geometry, &track, &settings).map(|fit| (index, fit.summary)));
    }

    let mut summaries = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let fitted = joined.map_err(|e| SimError::Join(e.to_string()))?;
        summaries.push(fitted?);
    }
    summaries.sort_by_key(|(index, _)| *index);
    Ok(summaries.into_iter().map(|(_, summary)| summary).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector;
    use crate::oracle::{Oracle, OracleConfig};
    use nalgebra::Vector3;
    use proptest::prelude::*;

    fn telescope_tracks(seed: u64, count: usize, config: OracleConfig) -> (TrackingGeometry, Vec<SimulatedTrack>) {
        let geometry = detector::telescope(5, 100.0, 200.0).unwrap();
        let mut oracle = Oracle::new(seed, config).unwrap();
        let tracks = (0..count)
            .map(|_| {
                let particle = oracle.spawn_particle(&Vector3::x());
                oracle.simulate(&geometry, particle)
            })
            .collect();
        (geometry, tracks)
    }

    #[test]
    fn test_fit_recovers_truth() {
        let (geometry, tracks) = telescope_tracks(1, 3, OracleConfig::default());
        for track in &tracks {
            let fit = fit_track(&geometry, track, &FitSettings::default()).unwrap();
            let summary = fit.summary;
            assert!(summary.terminated);
            assert_eq!(summary.states, 5);
            assert_eq!(summary.processed, 5);
            assert_eq!(summary.outliers, 0);
            assert_eq!(summary.ndf, 10);
            assert!(summary.max_position_error < 0.5, "error {}", summary.max_position_error);
            assert!(summary.records.iter().all(|record| record.processed));
        }
    }

    #[test]
    fn test_outliers_flagged() {
        let config = OracleConfig::default().with_outliers(0.5, 5.0);
        let (geometry, tracks) = telescope_tracks(9, 5, config);
        for track in &tracks {
            let summary = fit_track(&geometry, track, &FitSettings::default()).unwrap().summary;
            assert_eq!(summary.outliers, track.injected_outliers());
            assert_eq!(summary.processed, summary.states);
            assert!(summary.terminated);
        }
    }

    #[test]
    fn test_shuffled_trajectory_same_outcome() {
        let (geometry, tracks) = telescope_tracks(4, 2, OracleConfig::default());
        let mut oracle = Oracle::new(4, OracleConfig::default()).unwrap();
        for track in &tracks {
            let mut shuffled = track.clone();
            oracle.shuffle_states(&mut shuffled);
            let a = fit_track(&geometry, track, &FitSettings::default()).unwrap().summary;
            let b = fit_track(&geometry, &shuffled, &FitSettings::default()).unwrap().summary;
            assert!(a.same_outcome(&b));
        }
    }

    #[test]
    fn test_empty_track_terminates_immediately() {
        let (geometry, tracks) = telescope_tracks(2, 1, OracleConfig::default().with_efficiency(0.0));
        let summary = fit_track(&geometry, &tracks[0], &FitSettings::default()).unwrap().summary;
        assert!(summary.terminated);
        assert_eq!(summary.steps, 0);
        assert_eq!(summary.chi2_per_ndf(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_fit_independent_of_trajectory_order(seed in any::<u64>()) {
            let (geometry, ordered) = telescope_tracks(seed, 1, OracleConfig::default());
            let (_, shuffled) = telescope_tracks(seed, 1, OracleConfig::default().with_shuffle(true));

            let a = fit_track(&geometry, &ordered[0], &FitSettings::default()).unwrap().summary;
            let b = fit_track(&geometry, &shuffled[0], &FitSettings::default()).unwrap().summary;
            prop_assert!(a.same_outcome(&b));
            prop_assert!(b.terminated);
        }
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let (geometry, tracks) = telescope_tracks(5, 6, OracleConfig::default());
        let sequential = fit_all(&geometry, &tracks, &FitSettings::default()).unwrap();
        let parallel = fit_parallel(Arc::new(geometry), tracks, FitSettings::default())
            .await
            .unwrap();
        assert_eq!(sequential, parallel);
    }
}
