//! Common types for the propagation environment.

use serde::{Deserialize, Serialize};

/// Direction of propagation relative to the particle momentum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NavigationDirection {
    /// Along the momentum
    #[default]
    Forward,

    /// Against the momentum
    Backward,
}

impl NavigationDirection {
    /// Returns +1.0 for forward and -1.0 for backward propagation.
    pub fn sign(&self) -> f64 {
        match self {
            NavigationDirection::Forward => 1.0,
            NavigationDirection::Backward => -1.0,
        }
    }

    /// Returns the reverse direction.
    pub fn reversed(&self) -> Self {
        match self {
            NavigationDirection::Forward => NavigationDirection::Backward,
            NavigationDirection::Backward => NavigationDirection::Forward,
        }
    }

    /// Arrow used as prefix in the propagation debug output.
    pub fn arrow(&self) -> &'static str {
        match self {
            NavigationDirection::Forward => "K->",
            NavigationDirection::Backward => "<-K",
        }
    }
}

impl std::fmt::Display for NavigationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavigationDirection::Forward => write!(f, "forward"),
            NavigationDirection::Backward => write!(f, "backward"),
        }
    }
}
