//! Serializable results returned across the request boundary.

use crate::implicit::Polyline;
use serde::{Deserialize, Serialize};

/// The shape of an analysis answer. Every variant records the `method` that
/// produced it and any human-readable `steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisResult {
    Scalar {
        value: f64,
        method: String,
        #[serde(default)]
        steps: Vec<String>,
    },
    Vector {
        values: Vec<f64>,
        method: String,
        #[serde(default)]
        steps: Vec<String>,
    },
    Matrix {
        rows: Vec<Vec<f64>>,
        method: String,
        #[serde(default)]
        steps: Vec<String>,
    },
    Point {
        point: [f64; 2],
        method: String,
        #[serde(default)]
        steps: Vec<String>,
    },
    PointSet {
        points: Vec<[f64; 2]>,
        method: String,
        #[serde(default)]
        steps: Vec<String>,
    },
    ContourSet {
        polylines: Vec<Polyline>,
        timed_out: bool,
        method: String,
        #[serde(default)]
        steps: Vec<String>,
    },
    Error {
        message: String,
        method: String,
        #[serde(default)]
        steps: Vec<String>,
    },
}

impl AnalysisResult {
    pub fn error(method: &str, message: impl Into<String>) -> Self {
        AnalysisResult::Error {
            message: message.into(),
            method: method.to_string(),
            steps: Vec::new(),
        }
    }

    pub fn method(&self) -> &str {
        match self {
            AnalysisResult::Scalar { method, .. }
            | AnalysisResult::Vector { method, .. }
            | AnalysisResult::Matrix { method, .. }
            | AnalysisResult::Point { method, .. }
            | AnalysisResult::PointSet { method, .. }
            | AnalysisResult::ContourSet { method, .. }
            | AnalysisResult::Error { method, .. } => method,
        }
    }

    pub fn steps(&self) -> &[String] {
        match self {
            AnalysisResult::Scalar { steps, .. }
            | AnalysisResult::Vector { steps, .. }
            | AnalysisResult::Matrix { steps, .. }
            | AnalysisResult::Point { steps, .. }
            | AnalysisResult::PointSet { steps, .. }
            | AnalysisResult::ContourSet { steps, .. }
            | AnalysisResult::Error { steps, .. } => steps,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, AnalysisResult::Error { .. })
    }
}
