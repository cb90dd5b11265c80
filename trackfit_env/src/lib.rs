//! trackfit Propagation Environment
//!
//! This crate holds the geometry-free pieces shared by the fitter and by
//! whatever propagation engine drives it:
//! - Navigation direction (`Forward` / `Backward`)
//! - Propagator options (step and path limits, debug output settings)
//! - The lazy debug-log sink used on the per-step hot path
//! - The propagation error taxonomy
//!
//! # Example
//!
//! ```
//! use trackfit_env::PropagatorOptions;
//!
//! let mut options = PropagatorOptions::default().with_debug(true);
//! options.debug_log("KalmanActor", || "initialized 5 states".to_string());
//! assert!(options.debug_string.contains("KalmanActor"));
//! ```

mod options;
mod types;
mod error;

pub use options::PropagatorOptions;
pub use types::NavigationDirection;
pub use error::PropagationError;
