//! Ground truth oracle for simulation.
//!
//! The Oracle generates straight-line truth particles from a seed, crosses
//! them with the sensitive surfaces of a geometry and turns every crossing
//! into a smeared pixel measurement:
//! - Gaussian smearing of the local coordinates
//! - optional hit inefficiency
//! - optional outliers (a hit displaced far beyond its resolution)
//! - optional shuffling of the trajectory order
//!
//! Shuffling draws from its own RNG stream, so switching it on does not change
//! the particles or hits that are generated.

use crate::error::SimError;
use nalgebra::{Matrix2, Vector2, Vector3};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use trackfit_core::track_state::{Measurement, TrackState};
use trackfit_core::{Identifier, SurfaceId, TrackingGeometry};
use trackfit_env::NavigationDirection;

/// Salt separating the shuffle stream from the physics stream.
const SHUFFLE_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Oracle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Pixel resolution (mm) in both local coordinates
    pub pixel_sigma: f64,

    /// Spread (rad) of the particle direction around the detector axis
    pub angular_spread: f64,

    /// Spread (mm) of the particle origin transverse to the detector axis
    pub origin_spread: f64,

    /// Momentum range (GeV)
    pub momentum_range: (f64, f64),

    /// Probability that a crossing produces a hit
    pub efficiency: f64,

    /// Probability that a hit becomes an outlier
    pub outlier_probability: f64,

    /// Displacement (mm) of an outlier along loc0
    pub outlier_shift: f64,

    /// Hits with a smaller crossing index are never turned into outliers
    pub outlier_min_index: usize,

    /// Shuffle the track states of every simulated track
    pub shuffle: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            pixel_sigma: 0.05,
            angular_spread: 0.05,
            origin_spread: 1.0,
            momentum_range: (1.0, 10.0),
            efficiency: 1.0,
            outlier_probability: 0.0,
            outlier_shift: 5.0,
            outlier_min_index: 2,
            shuffle: false,
        }
    }
}

impl OracleConfig {
    pub fn with_efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = efficiency;
        self
    }

    pub fn with_outliers(mut self, probability: f64, shift: f64) -> Self {
        self.outlier_probability = probability;
        self.outlier_shift = shift;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_pixel_sigma(mut self, sigma: f64) -> Self {
        self.pixel_sigma = sigma;
        self
    }

    fn validate(&self) -> Result<(), SimError> {
        let probability = |name: &str, p: f64| {
            if (0.0..=1.0).contains(&p) {
                Ok(())
            } else {
                Err(SimError::Config(format!("{name} must be in [0, 1], got {p}")))
            }
        };
        probability("efficiency", self.efficiency)?;
        probability("outlier_probability", self.outlier_probability)?;

        let (p_min, p_max) = self.momentum_range;
        if !(p_min > 0.0 && p_max >= p_min) {
            return Err(SimError::Config(format!("invalid momentum range {:?}", self.momentum_range)));
        }
        if self.pixel_sigma <= 0.0 {
            return Err(SimError::Config(format!("pixel_sigma must be positive, got {}", self.pixel_sigma)));
        }
        Ok(())
    }
}

/// A truth particle on a straight line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthParticle {
    pub id: u64,
    pub origin: Vector3<f64>,
    /// Unit direction
    pub direction: Vector3<f64>,
    /// Momentum magnitude (GeV)
    pub momentum: f64,
    pub charge: f64,
}

/// Truth information of one hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedHit {
    pub surface: SurfaceId,
    /// True global crossing point
    pub position: Vector3<f64>,
    /// True local coordinates
    pub local: Vector2<f64>,
    pub outlier: bool,
}

/// A truth particle with its hits and the track states to fit.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTrack {
    pub particle: TruthParticle,
    /// Hits in crossing order
    pub hits: Vec<SimulatedHit>,
    pub track_states: Vec<TrackState>,
}

impl SimulatedTrack {
    pub fn injected_outliers(&self) -> usize {
        self.hits.iter().filter(|hit| hit.outlier).count()
    }

    pub fn truth_position(&self, surface: SurfaceId) -> Option<Vector3<f64>> {
        self.hits.iter().find(|hit| hit.surface == surface).map(|hit| hit.position)
    }
}

/// The Oracle - generates truth particles and their measurements.
pub struct Oracle {
    config: OracleConfig,
    physics_rng: ChaCha8Rng,
    shuffle_rng: ChaCha8Rng,
    smearing: Normal<f64>,
    angular: Normal<f64>,
    transverse: Normal<f64>,
    next_id: u64,
}

impl Oracle {
    pub fn new(seed: u64, config: OracleConfig) -> Result<Self, SimError> {
        config.validate()?;
        let normal = |sigma: f64| Normal::new(0.0, sigma).map_err(|e| SimError::Config(e.to_string()));
        Ok(Self {
            physics_rng: ChaCha8Rng::seed_from_u64(seed),
            shuffle_rng: ChaCha8Rng::seed_from_u64(seed ^ SHUFFLE_SALT),
            smearing: normal(config.pixel_sigma)?,
            angular: normal(config.angular_spread)?,
            transverse: normal(config.origin_spread)?,
            config,
            next_id: 0,
        })
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// New particle spread around `axis`.
    pub fn spawn_particle(&mut self, axis: &Vector3<f64>) -> TruthParticle {
        let axis = axis.normalize();
        let helper = if axis.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        let u = axis.cross(&helper).normalize();
        let v = axis.cross(&u);

        let rng = &mut self.physics_rng;
        let direction = (axis
            + u * self.angular.sample(rng)
            + v * self.angular.sample(rng))
        .normalize();
        let origin = u * self.transverse.sample(rng) + v * self.transverse.sample(rng);
        let (p_min, p_max) = self.config.momentum_range;
        let momentum = if p_max > p_min { rng.gen_range(p_min..p_max) } else { p_min };
        let charge = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };

        let id = self.next_id;
        self.next_id += 1;
        TruthParticle { id, origin, direction, momentum, charge }
    }

    /// New particle leaving the z axis in a random transverse direction.
    pub fn spawn_radial(&mut self) -> TruthParticle {
        let phi = self.physics_rng.gen_range(-PI..PI);
        self.spawn_particle(&Vector3::new(phi.cos(), phi.sin(), 0.0))
    }

    /// Cross `particle` with all sensitive surfaces and build its track states.
    pub fn simulate(&mut self, geometry: &TrackingGeometry, particle: TruthParticle) -> SimulatedTrack {
        let mut crossings: Vec<(f64, SurfaceId, Vector3<f64>)> = geometry
            .sensitive_surfaces()
            .filter_map(|id| {
                let surface = geometry.surface(id)?;
                let hit = surface.intersection_estimate(
                    &particle.origin,
                    &particle.direction,
                    NavigationDirection::Forward,
                    true,
                );
                (hit.valid && hit.path_length > 0.0).then_some((hit.path_length, id, hit.position))
            })
            .collect();
        crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

        let sigma = self.config.pixel_sigma;
        let mut hits = Vec::with_capacity(crossings.len());
        let mut track_states = Vec::with_capacity(crossings.len());
        for (index, (_, surface_id, position)) in crossings.into_iter().enumerate() {
            let rng = &mut self.physics_rng;
            if !rng.gen_bool(self.config.efficiency) {
                continue;
            }
            let Some(surface) = geometry.surface(surface_id) else {
                continue;
            };

            let local = surface.global_to_local(&position, &particle.direction);
            let mut measured = local + Vector2::new(self.smearing.sample(rng), self.smearing.sample(rng));
            let outlier = index >= self.config.outlier_min_index
                && rng.gen_bool(self.config.outlier_probability);
            if outlier {
                measured.x += self.config.outlier_shift;
            }

            let source = Identifier::new((particle.id << 16) | hits.len() as u64);
            track_states.push(TrackState::new(
                surface_id,
                source,
                Measurement::Pixel {
                    values: measured,
                    covariance: Matrix2::identity() * (sigma * sigma),
                },
            ));
            hits.push(SimulatedHit { surface: surface_id, position, local, outlier });
        }

        let mut track = SimulatedTrack { particle, hits, track_states };
        if self.config.shuffle {
            self.shuffle_states(&mut track);
        }
        track
    }

    /// Shuffle the track states of `track` (the hits keep crossing order).
    pub fn shuffle_states(&mut self, track: &mut SimulatedTrack) {
        track.track_states.shuffle(&mut self.shuffle_rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector;

    fn simulate(seed: u64, config: OracleConfig) -> SimulatedTrack {
        let geometry = detector::telescope(5, 100.0, 200.0).unwrap();
        let mut oracle = Oracle::new(seed, config).unwrap();
        let particle = oracle.spawn_particle(&Vector3::x());
        oracle.simulate(&geometry, particle)
    }

    #[test]
    fn test_hits_in_crossing_order() {
        let track = simulate(42, OracleConfig::default());
        assert_eq!(track.hits.len(), 5);
        assert_eq!(track.track_states.len(), 5);
        assert!(track.hits.windows(2).all(|pair| pair[0].position.x < pair[1].position.x));
        assert!(track
            .hits
            .iter()
            .zip(&track.track_states)
            .all(|(hit, state)| hit.surface == state.surface));
    }

    #[test]
    fn test_deterministic_per_seed() {
        assert_eq!(simulate(7, OracleConfig::default()), simulate(7, OracleConfig::default()));
        assert_ne!(
            simulate(7, OracleConfig::default()).particle,
            simulate(8, OracleConfig::default()).particle
        );
    }

    #[test]
    fn test_shuffle_keeps_physics_stream() {
        let ordered = simulate(3, OracleConfig::default());
        let shuffled = simulate(3, OracleConfig::default().with_shuffle(true));

        assert_eq!(ordered.particle, shuffled.particle);
        assert_eq!(ordered.hits, shuffled.hits);

        let mut a = ordered.track_states.clone();
        let mut b = shuffled.track_states.clone();
        a.sort_by_key(|state| state.surface);
        b.sort_by_key(|state| state.surface);
        assert_eq!(a, b);
    }

    #[test]
    fn test_outliers_respect_min_index() {
        let track = simulate(11, OracleConfig::default().with_outliers(1.0, 5.0));
        let flags: Vec<bool> = track.hits.iter().map(|hit| hit.outlier).collect();
        assert_eq!(flags, vec![false, false, true, true, true]);
        assert_eq!(track.injected_outliers(), 3);
    }

    #[test]
    fn test_zero_efficiency_gives_no_hits() {
        let track = simulate(5, OracleConfig::default().with_efficiency(0.0));
        assert!(track.hits.is_empty());
        assert!(track.track_states.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Oracle::new(1, OracleConfig::default().with_efficiency(1.5)).is_err());
        assert!(Oracle::new(1, OracleConfig::default().with_pixel_sigma(0.0)).is_err());
    }
}
