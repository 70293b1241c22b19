//! Request/response shapes of the diagnosis and offline-analysis endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::anomaly::AnomalyEvent;
use crate::error::BackendError;

/// Provider settings as the backend expects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderWireConfig {
    pub url: String,
    pub model: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

/// Body of `POST /api/diagnosis/analyze`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeRequest {
    pub query: String,
    /// `"ollama"` or `"gemini"`.
    pub provider: String,
    pub config: ProviderWireConfig,
    pub anomaly_context: Option<AnomalyEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_id: Option<i64>,
}

/// A successfully transported analyze reply.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeResponse {
    /// Text produced by the provider.
    Answer(String),
    /// The backend answered with an explicit error field.
    Reported(String),
}

impl AnalyzeResponse {
    /// Classify a decoded body. `success` is whether the HTTP status was 2xx.
    ///
    /// Returns `None` when the body carries neither an answer nor an error
    /// (treated by the caller as a transport failure).
    pub fn from_body(success: bool, body: &Value) -> Option<Self> {
        if let Some(err) = error_text(body) {
            return Some(AnalyzeResponse::Reported(err));
        }
        if !success {
            return None;
        }
        body.get("response")
            .and_then(Value::as_str)
            .map(|text| AnalyzeResponse::Answer(text.to_string()))
    }
}

/// Extract an explicit error string from `error` or FastAPI's `detail`.
fn error_text(body: &Value) -> Option<String> {
    ["error", "detail"].iter().find_map(|key| match body.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

// ── Offline ML analysis ───────────────────────────────────────────

/// One entry of the offline-analysis algorithm catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogWire {
    List(Vec<AlgorithmInfo>),
    Map(BTreeMap<String, String>),
}

#[derive(Deserialize)]
struct WrappedCatalog {
    algorithms: CatalogWire,
}

/// Parse the catalog from any of the shapes the backend has used:
/// a list of objects, an `id -> name` map, or either wrapped in
/// `{"algorithms": ...}`.
pub fn parse_algorithm_catalog(body: Value) -> Result<Vec<AlgorithmInfo>, BackendError> {
    let wire = match serde_json::from_value::<WrappedCatalog>(body.clone()) {
        Ok(wrapped) => wrapped.algorithms,
        Err(_) => serde_json::from_value::<CatalogWire>(body)?,
    };
    Ok(match wire {
        CatalogWire::List(list) => list,
        CatalogWire::Map(map) => map
            .into_iter()
            .map(|(id, name)| AlgorithmInfo {
                id,
                name,
                description: None,
            })
            .collect(),
    })
}

/// Body of `POST /api/anomaly/ml/analyze`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MlAnalysisRequest {
    pub algorithm: String,
    pub window_size: usize,
    pub params: Value,
}

/// Outcome of an offline analysis run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MlAnalysisResult {
    #[serde(default)]
    pub summary: Value,
    #[serde(default)]
    pub anomaly_count: usize,
    #[serde(default)]
    pub analyzed_at: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
}

impl MlAnalysisResult {
    /// Decode a body, turning `{"success": false, "error": ...}` into a
    /// reported error.
    pub fn from_body(body: Value) -> Result<Self, BackendError> {
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = error_text(&body).unwrap_or_else(|| "analysis failed".to_string());
            return Err(BackendError::Reported(reason));
        }
        Ok(serde_json::from_value(body)?)
    }

    /// Summary rendered as plain text.
    pub fn summary_text(&self) -> String {
        match &self.summary {
            Value::String(s) => s.clone(),
            Value::Null => format!("{} anomalies", self.anomaly_count),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Analyze classification ────────────────────────────────────

    #[test]
    fn answer_from_success_body() {
        let r = AnalyzeResponse::from_body(true, &json!({"response": "Check bearing 3"}));
        assert_eq!(r, Some(AnalyzeResponse::Answer("Check bearing 3".into())));
    }

    #[test]
    fn error_field_is_reported_even_on_success() {
        let r = AnalyzeResponse::from_body(true, &json!({"error": "model not loaded"}));
        assert_eq!(r, Some(AnalyzeResponse::Reported("model not loaded".into())));
    }

    #[test]
    fn fastapi_detail_is_reported() {
        let r = AnalyzeResponse::from_body(false, &json!({"detail": "Unknown LLM provider: x"}));
        assert_eq!(
            r,
            Some(AnalyzeResponse::Reported("Unknown LLM provider: x".into()))
        );
    }

    #[test]
    fn bare_failure_is_unclassified() {
        assert_eq!(AnalyzeResponse::from_body(false, &json!({"response": "hi"})), None);
        assert_eq!(AnalyzeResponse::from_body(true, &json!({})), None);
        assert_eq!(AnalyzeResponse::from_body(true, &json!({"error": null, "response": "ok"})),
            Some(AnalyzeResponse::Answer("ok".into())));
    }

    #[test]
    fn request_serializes_wire_names() {
        let req = AnalyzeRequest {
            query: "why?".into(),
            provider: "ollama".into(),
            config: ProviderWireConfig {
                url: "http://localhost:11434".into(),
                model: "llama3.1:latest".into(),
                api_key: String::new(),
            },
            anomaly_context: None,
            anomaly_id: None,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["config"]["apiKey"], "");
        assert!(v["anomaly_context"].is_null());
        assert!(v.get("anomaly_id").is_none());
    }

    // ── Catalog ───────────────────────────────────────────────────

    #[test]
    fn catalog_from_map() {
        let list = parse_algorithm_catalog(json!({
            "isolation_forest": "Isolation Forest",
            "dbscan": "DBSCAN Clustering"
        }))
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "dbscan");
    }

    #[test]
    fn catalog_from_wrapped_list() {
        let list = parse_algorithm_catalog(json!({
            "algorithms": [
                {"id": "one_class_svm", "name": "One-Class SVM", "description": "kernel"}
            ]
        }))
        .unwrap();
        assert_eq!(list[0].name, "One-Class SVM");
        assert_eq!(list[0].description.as_deref(), Some("kernel"));
    }

    #[test]
    fn catalog_rejects_garbage() {
        assert!(parse_algorithm_catalog(json!(42)).is_err());
    }

    // ── ML result ─────────────────────────────────────────────────

    #[test]
    fn ml_result_success() {
        let r = MlAnalysisResult::from_body(json!({
            "success": true,
            "summary": "Found 3 anomalies (1.0%) using Isolation Forest",
            "anomaly_count": 3,
            "analyzed_at": "2024-05-01T10:00:00"
        }))
        .unwrap();
        assert_eq!(r.anomaly_count, 3);
        assert!(r.summary_text().starts_with("Found 3"));
    }

    #[test]
    fn ml_result_failure_is_reported() {
        let err = MlAnalysisResult::from_body(json!({
            "success": false,
            "error": "Insufficient data for ML analysis (minimum 20 points required)"
        }))
        .unwrap_err();
        assert!(matches!(err, BackendError::Reported(ref m) if m.contains("minimum 20")));
    }
}
