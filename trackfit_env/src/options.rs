//! Propagator options and the lazy debug-log sink.

use crate::types::NavigationDirection;
use serde::{Deserialize, Serialize};

/// Options steering one propagation (and every actor running inside it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagatorOptions {
    /// Maximum number of steps before the propagation is aborted
    pub max_steps: usize,

    /// Maximum path length in mm before the propagation is aborted
    pub path_limit: f64,

    /// Direction of propagation
    pub direction: NavigationDirection,

    /// Collect per-step debug output into `debug_string`
    pub debug: bool,

    /// Width of the prefix column of the debug output
    pub debug_pfx_width: usize,

    /// Width of the message column of the debug output
    pub debug_msg_width: usize,

    /// Accumulated debug output
    #[serde(default)]
    pub debug_string: String,
}

impl Default for PropagatorOptions {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            path_limit: 10_000.0, // 10 m
            direction: NavigationDirection::Forward,
            debug: false,
            debug_pfx_width: 30,
            debug_msg_width: 50,
            debug_string: String::new(),
        }
    }
}

impl PropagatorOptions {
    /// Enables or disables the debug output.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the step limit.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets the path limit (mm).
    pub fn with_path_limit(mut self, path_limit: f64) -> Self {
        self.path_limit = path_limit;
        self
    }

    /// Sets the propagation direction.
    pub fn with_direction(mut self, direction: NavigationDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Appends one line of debug output produced by `log_action`.
    ///
    /// `log_action` is only called when `debug` is set, so formatting costs
    /// nothing on the hot path when debugging is off.
    pub fn debug_log<F>(&mut self, prefix: &str, log_action: F)
    where
        F: FnOnce() -> String,
    {
        if !self.debug {
            return;
        }
        let line = format!(
            "{}{:>pfx$} | {:<msg$}\n",
            self.direction.arrow(),
            prefix,
            log_action(),
            pfx = self.debug_pfx_width,
            msg = self.debug_msg_width,
        );
        self.debug_string.push_str(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_debug_log_not_evaluated_when_disabled() {
        let mut options = PropagatorOptions::default();
        let called = Cell::new(false);

        options.debug_log("KalmanActor", || {
            called.set(true);
            "never".to_string()
        });

        assert!(!called.get());
        assert!(options.debug_string.is_empty());
    }

    #[test]
    fn test_debug_log_appends_when_enabled() {
        let mut options = PropagatorOptions::default().with_debug(true);

        options.debug_log("KalmanActor", || "first".to_string());
        options.debug_log("KalmanActor", || "second".to_string());

        let lines: Vec<&str> = options.debug_string.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("K->"));
        assert!(lines[0].contains("KalmanActor | first"));
        assert!(lines[1].contains("second"));
    }

    #[test]
    fn test_debug_log_backward_arrow() {
        let mut options = PropagatorOptions::default()
            .with_debug(true)
            .with_direction(NavigationDirection::Backward);

        options.debug_log("Navigator", || "step".to_string());
        assert!(options.debug_string.starts_with("<-K"));
    }
}
