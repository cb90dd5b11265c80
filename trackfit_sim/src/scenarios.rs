//! Fit scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// FIT-001: Ordered trajectory on a planar telescope
    Nominal,

    /// FIT-002: Shuffled trajectory must fit like the ordered one
    Shuffled,

    /// FIT-003: One state per track sits on a surface without a layer
    UnresolvedLayer,

    /// FIT-004: Displaced hits must be rejected by the chi2 cut
    Outlier,

    /// FIT-005: Inefficient detector, navigating every sensitive surface
    StopOnAll,

    /// FIT-006: Many fits sharing one geometry across threads
    Parallel,

    /// FIT-007: Nested cylinder volumes
    Barrel,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Nominal,
            ScenarioId::Shuffled,
            ScenarioId::UnresolvedLayer,
            ScenarioId::Outlier,
            ScenarioId::StopOnAll,
            ScenarioId::Parallel,
            ScenarioId::Barrel,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "nominal",
            ScenarioId::Shuffled => "shuffled",
            ScenarioId::UnresolvedLayer => "unresolved_layer",
            ScenarioId::Outlier => "outlier",
            ScenarioId::StopOnAll => "stop_on_all",
            ScenarioId::Parallel => "parallel",
            ScenarioId::Barrel => "barrel",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "Telescope, ordered trajectory: every state filtered, fit stops itself",
            ScenarioId::Shuffled => "Telescope, shuffled trajectory: outcome identical to the ordered fit",
            ScenarioId::UnresolvedLayer => "Extra state on a detached plane: skipped, fit still terminates",
            ScenarioId::Outlier => "Hits displaced by 5 mm: each one flagged as outlier",
            ScenarioId::StopOnAll => "60% efficiency, navigator stops on every sensitive surface",
            ScenarioId::Parallel => "Fits on the blocking pool match the sequential fits",
            ScenarioId::Barrel => "Radial tracks through nested cylinder volumes",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nominal" | "fit-001" => Ok(ScenarioId::Nominal),
            "shuffled" | "fit-002" => Ok(ScenarioId::Shuffled),
            "unresolved_layer" | "unresolved" | "fit-003" => Ok(ScenarioId::UnresolvedLayer),
            "outlier" | "outliers" | "fit-004" => Ok(ScenarioId::Outlier),
            "stop_on_all" | "stoponall" | "fit-005" => Ok(ScenarioId::StopOnAll),
            "parallel" | "fit-006" => Ok(ScenarioId::Parallel),
            "barrel" | "fit-007" => Ok(ScenarioId::Barrel),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("FIT-004".parse::<ScenarioId>(), Ok(ScenarioId::Outlier));
        assert!("warp".parse::<ScenarioId>().is_err());
    }
}
