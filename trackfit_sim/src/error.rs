//! Error types for the simulation harness.

use trackfit_core::{FitError, GeometryError};

/// Errors raised while building detectors, simulating or fitting tracks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SimError {
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Fit error: {0}")]
    Fit(#[from] FitError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Parallel fit task failed: {0}")]
    Join(String),
}
