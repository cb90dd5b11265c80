//! Scenario runner - simulates tracks, fits them and checks the outcome.

use crate::detector;
use crate::error::SimError;
use crate::fitter::{self, FitSettings, TrackFitSummary};
use crate::oracle::{Oracle, OracleConfig, SimulatedTrack};
use crate::scenarios::ScenarioId;

use nalgebra::Vector3;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use trackfit_core::track_state::{Measurement, TrackState};
use trackfit_core::{Identifier, TrackingGeometry};
use trackfit_env::PropagatorOptions;

/// Plane spacing (mm) of the telescope.
const TELESCOPE_SPACING: f64 = 100.0;

/// Half size (mm) of the telescope planes.
const TELESCOPE_HALF_SIZE: f64 = 200.0;

/// Radius step (mm) between barrel layers.
const BARREL_RADIUS_STEP: f64 = 30.0;

const BARREL_HALF_Z: f64 = 500.0;

/// Largest accepted distance (mm) between filtered and true position.
const MAX_POSITION_ERROR: f64 = 0.5;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// One summary per fitted track
    pub summaries: Vec<TrackFitSummary>,
}

impl ScenarioResult {
    fn from_fits(
        scenario: ScenarioId,
        seed: u64,
        summaries: Vec<TrackFitSummary>,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            scenario,
            seed,
            passed: failure_reason.is_none(),
            failure_reason,
            metrics: ScenarioMetrics::from_summaries(&summaries),
            summaries,
        }
    }

    fn failed(scenario: ScenarioId, seed: u64, error: SimError) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            failure_reason: Some(error.to_string()),
            metrics: ScenarioMetrics::default(),
            summaries: Vec::new(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub tracks: usize,

    /// Track states handed to the fitter
    pub states_total: usize,

    /// Track states updated or rejected
    pub states_processed: usize,

    pub outliers_flagged: usize,

    /// Outliers put in by the oracle
    pub outliers_injected: usize,

    pub unresolved_states: usize,

    pub terminated_fits: usize,

    /// Mean chi2/ndf over tracks with at least one update
    pub mean_chi2_per_ndf: f64,

    /// Largest filtered position error (mm) over all tracks
    pub max_position_error: f64,

    pub total_steps: usize,
}

impl ScenarioMetrics {
    fn from_summaries(summaries: &[TrackFitSummary]) -> Self {
        let ratios: Vec<f64> = summaries.iter().filter_map(|s| s.chi2_per_ndf()).collect();
        Self {
            tracks: summaries.len(),
            states_total: summaries.iter().map(|s| s.states).sum(),
            states_processed: summaries.iter().map(|s| s.processed).sum(),
            outliers_flagged: summaries.iter().map(|s| s.outliers).sum(),
            outliers_injected: 0,
            unresolved_states: summaries.iter().map(|s| s.unresolved).sum(),
            terminated_fits: summaries.iter().filter(|s| s.terminated).count(),
            mean_chi2_per_ndf: if ratios.is_empty() {
                0.0
            } else {
                ratios.iter().sum::<f64>() / ratios.len() as f64
            },
            max_position_error: summaries.iter().map(|s| s.max_position_error).fold(0.0, f64::max),
            total_steps: summaries.iter().map(|s| s.steps).sum(),
        }
    }
}

/// Runs fit scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of tracks per scenario
    num_tracks: usize,

    /// Number of detector layers
    num_layers: usize,

    /// Worker threads for the parallel scenario
    workers: usize,

    /// Collect per-step actor debug output
    debug: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_tracks: usize) -> Self {
        Self {
            seed,
            num_tracks,
            num_layers: 5,
            workers: 4,
            debug: false,
        }
    }

    /// Sets the number of detector layers.
    pub fn with_layers(mut self, layers: usize) -> Self {
        self.num_layers = layers;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let outcome = match scenario {
            ScenarioId::Nominal => self.run_nominal(),
            ScenarioId::Shuffled => self.run_shuffled(),
            ScenarioId::UnresolvedLayer => self.run_unresolved_layer(),
            ScenarioId::Outlier => self.run_outlier(),
            ScenarioId::StopOnAll => self.run_stop_on_all(),
            ScenarioId::Parallel => self.run_parallel(),
            ScenarioId::Barrel => self.run_barrel(),
        };

        outcome.unwrap_or_else(|e| ScenarioResult::failed(scenario, self.seed, e))
    }

    fn settings(&self) -> FitSettings {
        FitSettings::default().with_options(PropagatorOptions::default().with_debug(self.debug))
    }

    fn telescope(&self) -> Result<TrackingGeometry, SimError> {
        Ok(detector::telescope(self.num_layers, TELESCOPE_SPACING, TELESCOPE_HALF_SIZE)?)
    }

    /// Tracks along the telescope axis.
    fn simulate_along_x(
        &self,
        geometry: &TrackingGeometry,
        config: OracleConfig,
    ) -> Result<Vec<SimulatedTrack>, SimError> {
        let mut oracle = Oracle::new(self.seed, config)?;
        Ok((0..self.num_tracks)
            .map(|_| {
                let particle = oracle.spawn_particle(&Vector3::x());
                oracle.simulate(geometry, particle)
            })
            .collect())
    }

    /// FIT-001: Nominal - ordered trajectory, every state filtered.
    fn run_nominal(&self) -> Result<ScenarioResult, SimError> {
        info!("FIT-001: Nominal - ordered telescope fit");

        let geometry = self.telescope()?;
        let tracks = self.simulate_along_x(&geometry, OracleConfig::default())?;
        let summaries = fitter::fit_all(&geometry, &tracks, &self.settings())?;

        let failure = check_completed(&summaries)
            .or_else(|| check_no_outliers(&summaries))
            .or_else(|| check_precision(&summaries, MAX_POSITION_ERROR));

        let result = ScenarioResult::from_fits(ScenarioId::Nominal, self.seed, summaries, failure);
        info!(
            "✓ Nominal complete: {} states, max error {:.3} mm",
            result.metrics.states_processed, result.metrics.max_position_error
        );
        Ok(result)
    }

    /// FIT-002: Shuffled - the trajectory order must not matter.
    fn run_shuffled(&self) -> Result<ScenarioResult, SimError> {
        info!("FIT-002: Shuffled - trajectory order independence");

        let geometry = self.telescope()?;
        let ordered = self.simulate_along_x(&geometry, OracleConfig::default())?;
        let shuffled = self.simulate_along_x(&geometry, OracleConfig::default().with_shuffle(true))?;

        let settings = self.settings();
        let reference = fitter::fit_all(&geometry, &ordered, &settings)?;
        let summaries = fitter::fit_all(&geometry, &shuffled, &settings)?;

        let failure = check_completed(&summaries).or_else(|| {
            reference
                .iter()
                .zip(&summaries)
                .find(|(a, b)| !a.same_outcome(b))
                .map(|(a, _)| format!("track {} fits differently when shuffled", a.track_id))
        });

        Ok(ScenarioResult::from_fits(ScenarioId::Shuffled, self.seed, summaries, failure))
    }

    /// FIT-003: UnresolvedLayer - a state on a detached plane is skipped.
    fn run_unresolved_layer(&self) -> Result<ScenarioResult, SimError> {
        info!("FIT-003: UnresolvedLayer - state without a layer");

        let (geometry, stray) =
            detector::telescope_with_stray(self.num_layers, TELESCOPE_SPACING, TELESCOPE_HALF_SIZE)?;
        let mut tracks = self.simulate_along_x(&geometry, OracleConfig::default())?;
        for track in &mut tracks {
            let source = Identifier::new((track.particle.id << 16) | 0xffff);
            track.track_states.push(TrackState::new(
                stray,
                source,
                Measurement::Strip { value: 0.0, variance: 1.0 },
            ));
        }

        let summaries = fitter::fit_all(&geometry, &tracks, &self.settings())?;
        let failure = check_completed(&summaries).or_else(|| {
            summaries
                .iter()
                .find(|s| s.unresolved != 1 || s.processed + 1 != s.states)
                .map(|s| {
                    format!(
                        "track {}: {} unresolved, {} of {} processed",
                        s.track_id, s.unresolved, s.processed, s.states
                    )
                })
        });

        Ok(ScenarioResult::from_fits(ScenarioId::UnresolvedLayer, self.seed, summaries, failure))
    }

    /// FIT-004: Outlier - displaced hits are rejected by the chi2 cut.
    fn run_outlier(&self) -> Result<ScenarioResult, SimError> {
        info!("FIT-004: Outlier - chi2 rejection");

        let geometry = self.telescope()?;
        let tracks = self.simulate_along_x(&geometry, OracleConfig::default().with_outliers(0.3, 5.0))?;
        let summaries = fitter::fit_all(&geometry, &tracks, &self.settings())?;

        let failure = check_completed(&summaries)
            .or_else(|| {
                tracks.iter().zip(&summaries).find_map(|(track, summary)| {
                    let injected = track.injected_outliers();
                    (summary.outliers != injected).then(|| {
                        format!(
                            "track {}: {} outliers flagged, {} injected",
                            summary.track_id, summary.outliers, injected
                        )
                    })
                })
            })
            .or_else(|| check_precision(&summaries, MAX_POSITION_ERROR));

        let mut result = ScenarioResult::from_fits(ScenarioId::Outlier, self.seed, summaries, failure);
        result.metrics.outliers_injected = tracks.iter().map(SimulatedTrack::injected_outliers).sum();
        info!(
            "✓ Outlier complete: {} flagged / {} injected",
            result.metrics.outliers_flagged, result.metrics.outliers_injected
        );
        Ok(result)
    }

    /// FIT-005: StopOnAll - inefficient detector, navigator stops everywhere.
    fn run_stop_on_all(&self) -> Result<ScenarioResult, SimError> {
        info!("FIT-005: StopOnAll - 60% efficiency");

        let geometry = self.telescope()?;
        let tracks = self.simulate_along_x(&geometry, OracleConfig::default().with_efficiency(0.6))?;
        let settings = self.settings().with_stop_on_all(true);
        let summaries = fitter::fit_all(&geometry, &tracks, &settings)?;

        let failure = check_completed(&summaries)
            .or_else(|| check_precision(&summaries, MAX_POSITION_ERROR))
            .or_else(|| {
                summaries
                    .iter()
                    .find(|s| s.steps < s.processed)
                    .map(|s| format!("track {}: {} steps for {} states", s.track_id, s.steps, s.processed))
            });

        Ok(ScenarioResult::from_fits(ScenarioId::StopOnAll, self.seed, summaries, failure))
    }

    /// FIT-006: Parallel - fits on the blocking pool share one geometry.
    fn run_parallel(&self) -> Result<ScenarioResult, SimError> {
        info!("FIT-006: Parallel - {} workers", self.workers);

        let geometry = Arc::new(self.telescope()?);
        let tracks = self.simulate_along_x(&geometry, OracleConfig::default())?;
        let settings = self.settings();
        let sequential = fitter::fit_all(&geometry, &tracks, &settings)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.workers)
            .build()
            .map_err(|e| SimError::Config(format!("tokio runtime: {e}")))?;
        let summaries = runtime.block_on(fitter::fit_parallel(Arc::clone(&geometry), tracks, settings))?;
        debug!("Parallel fits done: {}", summaries.len());

        let failure = check_completed(&summaries).or_else(|| {
            (summaries != sequential).then(|| "parallel fits differ from sequential fits".to_string())
        });

        Ok(ScenarioResult::from_fits(ScenarioId::Parallel, self.seed, summaries, failure))
    }

    /// FIT-007: Barrel - radial tracks through nested cylinder volumes.
    fn run_barrel(&self) -> Result<ScenarioResult, SimError> {
        info!("FIT-007: Barrel - nested cylinder volumes");

        let radii: Vec<f64> = (1..=self.num_layers).map(|i| BARREL_RADIUS_STEP * i as f64).collect();
        let geometry = detector::barrel(&radii, BARREL_HALF_Z)?;
        let mut oracle = Oracle::new(self.seed, OracleConfig::default())?;
        let tracks: Vec<SimulatedTrack> = (0..self.num_tracks)
            .map(|_| {
                let particle = oracle.spawn_radial();
                oracle.simulate(&geometry, particle)
            })
            .collect();

        let summaries = fitter::fit_all(&geometry, &tracks, &self.settings())?;
        let failure = check_completed(&summaries)
            .or_else(|| check_no_outliers(&summaries))
            .or_else(|| check_precision(&summaries, 2.0 * MAX_POSITION_ERROR));

        Ok(ScenarioResult::from_fits(ScenarioId::Barrel, self.seed, summaries, failure))
    }
}

/// Every fit terminated on its own and visited every resolved state.
fn check_completed(summaries: &[TrackFitSummary]) -> Option<String> {
    summaries.iter().find_map(|s| {
        if !s.terminated {
            Some(format!("track {} did not terminate", s.track_id))
        } else if s.processed + s.unresolved != s.states {
            Some(format!(
                "track {}: {} of {} states processed ({} unresolved)",
                s.track_id, s.processed, s.states, s.unresolved
            ))
        } else {
            None
        }
    })
}

fn check_no_outliers(summaries: &[TrackFitSummary]) -> Option<String> {
    summaries
        .iter()
        .find(|s| s.outliers > 0)
        .map(|s| format!("track {}: {} unexpected outliers", s.track_id, s.outliers))
}

fn check_precision(summaries: &[TrackFitSummary], limit: f64) -> Option<String> {
    summaries.iter().find(|s| s.max_position_error > limit).map(|s| {
        format!(
            "track {}: position error {:.3} mm exceeds {:.1} mm",
            s.track_id, s.max_position_error, limit
        )
    })
}
