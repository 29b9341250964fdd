use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tunables shared by every engine request.
///
/// Every field falls back to its default when missing from a JSON payload, so
/// callers only send what they want to override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Uniform sample count for root/extrema/intersection scans.
    pub samples: usize,
    /// Simpson intervals for definite integrals and arc length.
    pub simpson_intervals: usize,
    /// Wall-clock cap on scalar field sampling.
    pub field_time_budget_ms: u64,
    /// ODE samples beyond this magnitude truncate a branch.
    pub magnitude_bound: f64,
    /// Stride-subsampling cap for edge-crossing point clouds.
    pub max_contour_points: usize,
    /// Cap on reported curve intersections.
    pub max_intersections: usize,
    /// Cap on iterations of a single `sum`/`prod`.
    pub sum_iteration_cap: usize,
    /// Largest accepted cells-per-axis for implicit field requests.
    pub max_resolution: usize,
    pub ode: OdeTolerances,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            samples: 400,
            simpson_intervals: 1000,
            field_time_budget_ms: 1500,
            magnitude_bound: 1e6,
            max_contour_points: 20_000,
            max_intersections: 32,
            sum_iteration_cap: 10_000,
            max_resolution: 256,
            ode: OdeTolerances::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid engine settings JSON.")
    }
}

/// Error control for the adaptive stepper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdeTolerances {
    pub rtol: f64,
    pub atol: f64,
    pub max_steps: usize,
}

impl Default for OdeTolerances {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-9,
            max_steps: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = EngineSettings::from_json(r#"{ "samples": 800, "ode": { "rtol": 1e-8 } }"#)
            .expect("settings should parse");
        assert_eq!(settings.samples, 800);
        assert_eq!(settings.simpson_intervals, 1000);
        assert_eq!(settings.ode.rtol, 1e-8);
        assert_eq!(settings.ode.atol, 1e-9);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(EngineSettings::from_json("{ samples: }").is_err());
    }
}
