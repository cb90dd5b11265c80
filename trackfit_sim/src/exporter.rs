//! JSON exporter for fit results.
//!
//! Writes the per-track summaries of a scenario run to a file for offline
//! inspection.

use crate::fitter::TrackFitSummary;
use crate::runner::{ScenarioMetrics, ScenarioResult};
use serde::Serialize;
use std::fs::File;
use std::io::Write;

/// Complete scenario export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Fitted tracks
    pub tracks: Vec<TrackFitSummary>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ScenarioMetrics>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            tracks: Vec::new(),
            passed: false,
            failure_reason: None,
            metrics: None,
        }
    }

    /// Export of a finished scenario run.
    pub fn from_result(result: &ScenarioResult) -> Self {
        let mut export = Self::new(result.scenario.name(), result.seed);
        for summary in &result.summaries {
            export.add_track(summary.clone());
        }
        export.metrics = Some(result.metrics.clone());
        export.finalize(result.passed, result.failure_reason.clone());
        export
    }

    pub fn add_track(&mut self, track: TrackFitSummary) {
        self.tracks.push(track);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
