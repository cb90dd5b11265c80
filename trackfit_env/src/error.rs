//! Error types for the propagation environment.

use thiserror::Error;

/// Errors raised by a propagation engine or its stepping/navigation parts.
///
/// From the fitter's point of view these are collaborator failures: they are
/// passed up to the caller of the fit without any retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropagationError {
    /// The step budget was exhausted before the actors stopped the propagation
    #[error("Step limit reached after {0} steps")]
    StepLimitReached(usize),

    /// The path budget was exhausted before the actors stopped the propagation
    #[error("Path limit reached after {0} mm")]
    PathLimitReached(f64),

    /// The stepper state cannot be used (zero momentum, NaN direction, ...)
    #[error("Invalid stepper state: {0}")]
    InvalidState(String),

    /// Geometry navigation failed
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// Transporting the state onto a surface failed
    #[error("Transport error: {0}")]
    Transport(String),
}

impl PropagationError {
    /// Creates a navigation error.
    pub fn navigation(msg: impl Into<String>) -> Self {
        Self::Navigation(msg.into())
    }

    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
