use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::anomaly::null_as_default;

/// Live alert carried in the line status payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineAlert {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Snapshot returned by `/api/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineStatus {
    /// RUN, STOP or FAULT.
    pub state: String,
    pub recipe: String,
    /// Pieces per minute.
    pub speed: f64,
    /// Instant power draw (kW).
    pub power: f64,
    pub temperature: f64,
    pub vibration: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub alerts: Vec<LineAlert>,
    pub energy_kwh: f64,
    pub produced: u64,
    pub scrap: u64,
    pub oee_percent: f64,
    pub timestamp: Option<String>,
}

impl LineStatus {
    /// One-line operator summary.
    pub fn summary(&self) -> String {
        format!(
            "{} {} | {:.1} pcs/min | OEE {:.1}% | produced {} scrap {} | {:.2} kWh | {} alert(s)",
            if self.state.is_empty() { "?" } else { &self.state },
            self.recipe,
            self.speed,
            self.oee_percent,
            self.produced,
            self.scrap,
            self.energy_kwh,
            self.alerts.len()
        )
    }
}

/// Body of `/api/metrics`. Points are passed through to the renderer untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistory {
    #[serde(default, deserialize_with = "null_as_default")]
    pub history: Vec<Value>,
}

/// One bar of the stop-cause ranking from `/api/pareto`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoEntry {
    pub reason: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub duration_min: f64,
}
