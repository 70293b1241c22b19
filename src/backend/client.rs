use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::Backend;
use crate::constants::{CONNECT_TIMEOUT_SECS, ERROR_BODY_MAX_LEN};
use crate::error::BackendError;
use crate::models::{
    parse_algorithm_catalog, retain_consistent, AlgorithmInfo, AnalyzeRequest, AnalyzeResponse,
    AnomalyEvent, AnomalyStatus, ClearReport, CsvExport, LineStatus, MetricsHistory,
    MlAnalysisRequest, MlAnalysisResult, ParetoEntry, SignalPoint, SignalStats, StatisticalBand,
};

/// reqwest implementation of [`Backend`].
///
/// Poll endpoints are bounded by `poll_timeout`; the analyze and offline ML
/// endpoints by the longer `analyze_timeout`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    poll_timeout: Duration,
    analyze_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: &str, poll_timeout: Duration, analyze_timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_timeout,
            analyze_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).timeout(self.poll_timeout)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let resp = self.get(path).send().await?;
        decode(resp).await
    }

    async fn post_confirmed(&self, path: &str) -> Result<ClearReport, BackendError> {
        let resp = self
            .client
            .post(self.url(path))
            .timeout(self.poll_timeout)
            .json(&json!({ "confirm": true }))
            .send()
            .await?;
        let report: ClearReport = decode(resp).await?;
        if !report.is_success() {
            return Err(BackendError::Reported(if report.message.is_empty() {
                format!("clear failed with status '{}'", report.status)
            } else {
                report.message
            }));
        }
        Ok(report)
    }
}

/// Read the body and decode it, mapping non-2xx statuses to
/// [`BackendError::Status`].
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(status_error(status.as_u16(), &text));
    }
    Ok(serde_json::from_str(&text)?)
}

fn status_error(status: u16, body: &str) -> BackendError {
    BackendError::Status {
        status,
        body: body.chars().take(ERROR_BODY_MAX_LEN).collect(),
    }
}

/// Decode the per-signal band map, skipping entries that are not bands
/// and dropping inconsistent ones.
fn parse_stats(body: Value) -> Result<SignalStats, BackendError> {
    let Value::Object(map) = body else {
        return Err(BackendError::Parse("stats payload is not an object".into()));
    };
    let mut stats = SignalStats::new();
    for (signal, raw) in map {
        match serde_json::from_value::<StatisticalBand>(raw) {
            Ok(band) => {
                stats.insert(signal, band);
            }
            Err(e) => tracing::debug!(signal = %signal, error = %e, "skipping non-band stats entry"),
        }
    }
    Ok(retain_consistent(stats))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn line_status(&self) -> Result<LineStatus, BackendError> {
        self.get_json("/api/status").await
    }

    async fn metrics(&self) -> Result<MetricsHistory, BackendError> {
        self.get_json("/api/metrics").await
    }

    async fn pareto(&self) -> Result<Vec<ParetoEntry>, BackendError> {
        self.get_json("/api/pareto").await
    }

    async fn anomaly_stream(&self, limit: usize) -> Result<Vec<SignalPoint>, BackendError> {
        self.get_json(&format!("/api/anomaly/stream?limit={}", limit))
            .await
    }

    async fn anomaly_events(&self) -> Result<Vec<AnomalyEvent>, BackendError> {
        self.get_json("/api/anomaly/events").await
    }

    async fn anomaly_status(&self) -> Result<AnomalyStatus, BackendError> {
        self.get_json("/api/anomaly/status").await
    }

    async fn anomaly_stats(&self) -> Result<SignalStats, BackendError> {
        let body: Value = self.get_json("/api/anomaly/stats").await?;
        parse_stats(body)
    }

    async fn ml_algorithms(&self) -> Result<Vec<AlgorithmInfo>, BackendError> {
        let body: Value = self.get_json("/api/anomaly/ml/algorithms").await?;
        parse_algorithm_catalog(body)
    }

    async fn ml_analyze(&self, req: &MlAnalysisRequest) -> Result<MlAnalysisResult, BackendError> {
        let resp = self
            .client
            .post(self.url("/api/anomaly/ml/analyze"))
            .timeout(self.analyze_timeout)
            .json(req)
            .send()
            .await?;
        let body: Value = decode(resp).await?;
        MlAnalysisResult::from_body(body)
    }

    async fn export_csv(&self) -> Result<CsvExport, BackendError> {
        let export: CsvExport = self.get_json("/api/anomaly/export/csv").await?;
        if !export.status.is_empty() && !export.status.eq_ignore_ascii_case("success") {
            return Err(BackendError::Reported(format!(
                "export failed with status '{}'",
                export.status
            )));
        }
        Ok(export)
    }

    async fn clear_history(&self) -> Result<ClearReport, BackendError> {
        self.post_confirmed("/api/anomaly/clear-history").await
    }

    async fn clear_events(&self) -> Result<ClearReport, BackendError> {
        self.post_confirmed("/api/anomaly/clear-events").await
    }

    async fn fetch_manual(&self) -> Result<String, BackendError> {
        let body: Value = self.get_json("/api/diagnosis/manual").await?;
        body.get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::Parse("manual payload has no text field".into()))
    }

    async fn save_manual(&self, text: &str) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.url("/api/diagnosis/manual"))
            .timeout(self.poll_timeout)
            .json(&json!({ "text": text }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }
        Ok(())
    }

    async fn analyze(&self, req: &AnalyzeRequest) -> Result<AnalyzeResponse, BackendError> {
        let resp = self
            .client
            .post(self.url("/api/diagnosis/analyze"))
            .timeout(self.analyze_timeout)
            .json(req)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => return Err(status_error(status.as_u16(), &text)),
        };

        AnalyzeResponse::from_body(status.is_success(), &body).ok_or_else(|| {
            if status.is_success() {
                BackendError::Parse("analyze reply has neither response nor error".into())
            } else {
                status_error(status.as_u16(), &text)
            }
        })
    }
}
