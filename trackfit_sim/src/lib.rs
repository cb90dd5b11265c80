//! Deterministic simulation harness for the trackfit Kalman fitter.
//!
//! Everything that turns the geometry and fitting machinery of
//! `trackfit_core` into runnable fits lives here:
//! - **Stepper**: straight-line transport with covariance propagation
//! - **Navigator**: picks the next measurement surface or volume boundary
//! - **Propagator**: the act / navigate / step loop driving an actor
//! - **Oracle**: seeded truth particles and smeared measurements
//!
//! All randomness derives from a single 64-bit seed, so a scenario run is
//! reproducible bit for bit.
//!
//! # Architecture
//!
//! ```text
//!   Oracle ──► SimulatedTrack ──► KalmanActor
//!                                     │
//!        ┌────────────── Propagator ──┴──────────────┐
//!        │  act ─► Navigator::next_target ─► step    │
//!        │   ▲                                  │    │
//!        │   └──────── Navigator::reach ◄───────┘    │
//!        └───────────────────────────────────────────┘
//!                           │
//!                      FitResult ──► TrackFitSummary
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trackfit_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 100).run(ScenarioId::Shuffled);
//! assert!(result.passed);
//! ```

pub mod detector;
mod error;
pub mod exporter;
pub mod fitter;
pub mod navigator;
pub mod oracle;
pub mod propagator;
pub mod runner;
pub mod scenarios;
pub mod stepper;

pub use error::SimError;
pub use exporter::SimExport;
pub use fitter::{fit_all, fit_parallel, fit_track, FitSettings, StateRecord, TrackFit, TrackFitSummary};
pub use navigator::{NavigationTarget, Navigator, TargetKind};
pub use oracle::{Oracle, OracleConfig, SimulatedHit, SimulatedTrack, TruthParticle};
pub use propagator::{PropagationOutput, Propagator};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use stepper::StraightLineStepper;
