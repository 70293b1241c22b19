use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::constants::CRITICAL_DEVIATION_SIGMA;

/// Severity of a detected anomaly event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Stable identity of an anomaly: `"{timestamp}-{TYPE}"`.
///
/// Two events with the same timestamp and severity are the same anomaly,
/// whatever their message or details say.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnomalyIdentity(String);

impl AnomalyIdentity {
    pub fn new(timestamp: f64, severity: Severity) -> Self {
        Self(format!("{}-{}", timestamp, severity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnomalyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signal readings attached to an event. Unknown keys are kept verbatim
/// so they reach the analysis backend unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A detected anomaly, as produced by the backend detector.
/// Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// Backend row id, when the event came from persistent storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Epoch seconds.
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub severity: Severity,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub details: AnomalyDetails,
    /// Reading of the selected signal, set when built from a chart point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl AnomalyEvent {
    pub fn identity(&self) -> AnomalyIdentity {
        AnomalyIdentity::new(self.timestamp, self.severity)
    }

    /// Local wall-clock time of the event, if the timestamp is representable.
    pub fn occurred_at(&self) -> Option<DateTime<Local>> {
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1e9) as u32;
        Local.timestamp_opt(secs as i64, nanos).single()
    }

    /// The most recent event: highest timestamp, first one wins on ties.
    pub fn newest(events: &[AnomalyEvent]) -> Option<&AnomalyEvent> {
        events.iter().fold(None, |best, e| match best {
            Some(b) if b.timestamp >= e.timestamp => Some(b),
            _ => Some(e),
        })
    }
}

/// Direction of a statistical deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deviation {
    High,
    Low,
}

/// Per-signal anomaly annotation embedded in a stream point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetail {
    #[serde(rename = "type")]
    pub kind: Deviation,
    pub deviation_sigma: f64,
    pub value: f64,
    pub threshold: f64,
}

/// Detector verdict on a single stream point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointStatus {
    Ok,
    Warning,
    Critical,
    Calibrating,
    #[serde(other)]
    Unknown,
}

/// One sample of the production line signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPoint {
    pub timestamp: f64,
    #[serde(default)]
    pub vibration: f64,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub power: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomalies: Option<BTreeMap<String, AnomalyDetail>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PointStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ready: Option<bool>,
}

impl SignalPoint {
    /// Reading of a named signal.
    pub fn signal(&self, name: &str) -> Option<f64> {
        match name {
            "vibration" => Some(self.vibration),
            "temperature" => Some(self.temperature),
            "power" => Some(self.power),
            _ => None,
        }
    }

    pub fn is_anomalous(&self) -> bool {
        matches!(
            self.status,
            Some(PointStatus::Warning) | Some(PointStatus::Critical)
        ) || self.anomalies.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Build the event an operator hands off when selecting this point on
    /// the history of `signal`. Returns `None` for normal points and
    /// unknown signal names.
    pub fn to_event(&self, signal: &str) -> Option<AnomalyEvent> {
        let value = self.signal(signal)?;
        if !self.is_anomalous() {
            return None;
        }

        let severe_deviation = self.anomalies.as_ref().is_some_and(|a| {
            a.values()
                .any(|d| d.deviation_sigma >= CRITICAL_DEVIATION_SIGMA)
        });
        let severity = if self.status == Some(PointStatus::Critical) || severe_deviation {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Some(AnomalyEvent {
            id: None,
            timestamp: self.timestamp,
            severity,
            message: format!("Historical Anomaly detected in {}", signal),
            details: AnomalyDetails {
                vibration: Some(self.vibration),
                temperature: Some(self.temperature),
                power: Some(self.power),
                extra: Map::new(),
            },
            value: Some(value),
        })
    }
}

/// Mean/std-derived normal-range envelope for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalBand {
    pub mean: f64,
    pub std: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<u64>,
}

impl StatisticalBand {
    /// `lower_bound <= mean <= upper_bound`, with no NaN anywhere.
    pub fn is_consistent(&self) -> bool {
        self.lower_bound <= self.mean && self.mean <= self.upper_bound
    }
}

/// Per-signal bands, keyed by signal name.
pub type SignalStats = BTreeMap<String, StatisticalBand>;

/// Drop bands that violate the band invariant, logging each one.
pub fn retain_consistent(mut stats: SignalStats) -> SignalStats {
    stats.retain(|signal, band| {
        let ok = band.is_consistent();
        if !ok {
            tracing::warn!(
                signal = %signal,
                mean = band.mean,
                lower = band.lower_bound,
                upper = band.upper_bound,
                "dropping inconsistent statistical band"
            );
        }
        ok
    });
    stats
}

/// Detector readiness as reported by `/api/anomaly/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub model_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_models: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reading: Option<Value>,
}

/// Treat an explicit JSON `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(ts: f64, severity: Severity) -> AnomalyEvent {
        AnomalyEvent {
            id: None,
            timestamp: ts,
            severity,
            message: "Anomaly detected! Score: 60.0".to_string(),
            details: AnomalyDetails::default(),
            value: None,
        }
    }

    fn point(status: Option<PointStatus>) -> SignalPoint {
        SignalPoint {
            timestamp: 1_700_000_000.0,
            vibration: 6.2,
            temperature: 71.5,
            power: 48.0,
            anomalies: None,
            status,
            anomaly_score: None,
            model_ready: Some(true),
        }
    }

    // ── Identity ──────────────────────────────────────────────────

    #[test]
    fn identity_combines_timestamp_and_type() {
        let e = event(1700000000.5, Severity::Critical);
        assert_eq!(e.identity().as_str(), "1700000000.5-CRITICAL");
    }

    #[test]
    fn identity_ignores_message_and_details() {
        let a = event(10.0, Severity::Warning);
        let mut b = a.clone();
        b.message = "different".into();
        b.details.vibration = Some(9.0);
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), event(10.0, Severity::Critical).identity());
    }

    // ── Wire format ───────────────────────────────────────────────

    #[test]
    fn deserializes_service_event_with_passthrough_details() {
        let raw = json!({
            "timestamp": 1700000123.0,
            "type": "WARNING",
            "message": "Anomaly detected! Score: 60.0",
            "details": {
                "temperature": 66.1,
                "vibration": 4.2,
                "power": 51.0,
                "anomaly_score": 60.0,
                "status": "warning"
            }
        });
        let e: AnomalyEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(e.severity, Severity::Warning);
        assert_eq!(e.details.vibration, Some(4.2));
        assert_eq!(e.details.extra.get("anomaly_score"), Some(&json!(60.0)));

        let back = serde_json::to_value(&e).unwrap();
        assert_eq!(back["type"], "WARNING");
        assert_eq!(back["details"]["status"], "warning");
        assert!(back.get("id").is_none());
    }

    #[test]
    fn deserializes_stored_event_with_nulls() {
        let raw = json!({
            "id": 7,
            "timestamp": 5.0,
            "type": "CRITICAL",
            "message": null,
            "details": null,
            "created_at": "2024-01-01 00:00:00"
        });
        let e: AnomalyEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(e.id, Some(7));
        assert!(e.message.is_empty());
        assert_eq!(e.details, AnomalyDetails::default());
    }

    // ── Newest ────────────────────────────────────────────────────

    #[test]
    fn newest_picks_highest_timestamp() {
        let events = vec![
            event(30.0, Severity::Warning),
            event(50.0, Severity::Critical),
            event(40.0, Severity::Warning),
        ];
        assert_eq!(AnomalyEvent::newest(&events).unwrap().timestamp, 50.0);
    }

    #[test]
    fn newest_prefers_first_on_tie() {
        let events = vec![event(50.0, Severity::Warning), event(50.0, Severity::Critical)];
        assert_eq!(
            AnomalyEvent::newest(&events).unwrap().severity,
            Severity::Warning
        );
        assert!(AnomalyEvent::newest(&[]).is_none());
    }

    // ── Signal points ─────────────────────────────────────────────

    #[test]
    fn normal_point_has_no_event() {
        assert!(point(Some(PointStatus::Ok)).to_event("vibration").is_none());
        assert!(point(None).to_event("vibration").is_none());
    }

    #[test]
    fn warning_point_becomes_warning_event() {
        let e = point(Some(PointStatus::Warning)).to_event("temperature").unwrap();
        assert_eq!(e.severity, Severity::Warning);
        assert_eq!(e.value, Some(71.5));
        assert_eq!(e.message, "Historical Anomaly detected in temperature");
        assert_eq!(e.details.power, Some(48.0));
    }

    #[test]
    fn large_deviation_escalates_to_critical() {
        let mut p = point(None);
        let mut anomalies = BTreeMap::new();
        anomalies.insert(
            "vibration".to_string(),
            AnomalyDetail {
                kind: Deviation::High,
                deviation_sigma: 3.4,
                value: 6.2,
                threshold: 5.0,
            },
        );
        p.anomalies = Some(anomalies);
        assert!(p.is_anomalous());
        assert_eq!(p.to_event("vibration").unwrap().severity, Severity::Critical);
    }

    #[test]
    fn unknown_signal_has_no_event() {
        assert!(point(Some(PointStatus::Critical)).to_event("pressure").is_none());
    }

    #[test]
    fn unknown_point_status_is_tolerated() {
        let p: SignalPoint =
            serde_json::from_value(json!({"timestamp": 1.0, "status": "degraded"})).unwrap();
        assert_eq!(p.status, Some(PointStatus::Unknown));
        assert!(!p.is_anomalous());
    }

    // ── Bands ─────────────────────────────────────────────────────

    #[test]
    fn band_consistency() {
        let band = StatisticalBand {
            mean: 50.0,
            std: 2.0,
            lower_bound: 45.0,
            upper_bound: 55.0,
            min: None,
            max: None,
            sample_count: Some(300),
        };
        assert!(band.is_consistent());

        let inverted = StatisticalBand {
            lower_bound: 56.0,
            ..band.clone()
        };
        assert!(!inverted.is_consistent());
        let nan = StatisticalBand {
            mean: f64::NAN,
            ..band
        };
        assert!(!nan.is_consistent());
    }

    #[test]
    fn retain_consistent_drops_only_bad_bands() {
        let stats: SignalStats = serde_json::from_value(json!({
            "temperature": {"mean": 50.0, "std": 1.0, "lower_bound": 47.5, "upper_bound": 52.5},
            "power": {"mean": 50.0, "std": 1.0, "lower_bound": 51.0, "upper_bound": 52.5}
        }))
        .unwrap();
        let kept = retain_consistent(stats);
        assert!(kept.contains_key("temperature"));
        assert!(!kept.contains_key("power"));
    }
}
