//! In-memory [`Backend`] used by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

use super::Backend;
use crate::error::BackendError;
use crate::models::{
    AlgorithmInfo, AnalyzeRequest, AnalyzeResponse, AnomalyEvent, AnomalyStatus, ClearReport,
    CsvExport, LineStatus, MetricsHistory, MlAnalysisRequest, MlAnalysisResult, ParetoEntry,
    SignalPoint, SignalStats,
};

/// Records every call. Analyze calls can be held in flight behind a
/// semaphore gate; each call consumes one permit.
#[derive(Default)]
pub(crate) struct MockBackend {
    calls: Mutex<Vec<&'static str>>,
    pub analyze_requests: Mutex<Vec<AnalyzeRequest>>,
    analyze_replies: Mutex<VecDeque<Result<AnalyzeResponse, BackendError>>>,
    gate: Option<Arc<Semaphore>>,
    pub events: Mutex<Vec<AnomalyEvent>>,
    pub points: Mutex<Vec<SignalPoint>>,
    pub manual: Mutex<String>,
    pub export_payload: Mutex<Option<CsvExport>>,
    pub fail_polls: AtomicBool,
    pub panic_on_analyze: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_events(self, events: Vec<AnomalyEvent>) -> Self {
        *self.events.lock() = events;
        self
    }

    pub fn with_points(self, points: Vec<SignalPoint>) -> Self {
        *self.points.lock() = points;
        self
    }

    pub fn push_analyze_reply(&self, reply: Result<AnalyzeResponse, BackendError>) {
        self.analyze_replies.lock().push_back(reply);
    }

    /// Number of calls made to the named endpoint method.
    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == name).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().push(name);
    }

    fn poll_result<T>(&self, value: T) -> Result<T, BackendError> {
        if self.fail_polls.load(Ordering::SeqCst) {
            Err(BackendError::Connection("connection refused".into()))
        } else {
            Ok(value)
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn line_status(&self) -> Result<LineStatus, BackendError> {
        self.record("line_status");
        self.poll_result(LineStatus {
            state: "RUN".into(),
            ..LineStatus::default()
        })
    }

    async fn metrics(&self) -> Result<MetricsHistory, BackendError> {
        self.record("metrics");
        self.poll_result(MetricsHistory::default())
    }

    async fn pareto(&self) -> Result<Vec<ParetoEntry>, BackendError> {
        self.record("pareto");
        self.poll_result(Vec::new())
    }

    async fn anomaly_stream(&self, limit: usize) -> Result<Vec<SignalPoint>, BackendError> {
        self.record("anomaly_stream");
        let points = self.points.lock();
        let skip = points.len().saturating_sub(limit);
        let tail = points[skip..].to_vec();
        drop(points);
        self.poll_result(tail)
    }

    async fn anomaly_events(&self) -> Result<Vec<AnomalyEvent>, BackendError> {
        self.record("anomaly_events");
        let events = self.events.lock().clone();
        self.poll_result(events)
    }

    async fn anomaly_status(&self) -> Result<AnomalyStatus, BackendError> {
        self.record("anomaly_status");
        self.poll_result(AnomalyStatus {
            status: "ok".into(),
            model_ready: true,
            ..AnomalyStatus::default()
        })
    }

    async fn anomaly_stats(&self) -> Result<SignalStats, BackendError> {
        self.record("anomaly_stats");
        self.poll_result(SignalStats::new())
    }

    async fn ml_algorithms(&self) -> Result<Vec<AlgorithmInfo>, BackendError> {
        self.record("ml_algorithms");
        Ok(vec![AlgorithmInfo {
            id: "isolation_forest".into(),
            name: "Isolation Forest".into(),
            description: None,
        }])
    }

    async fn ml_analyze(&self, req: &MlAnalysisRequest) -> Result<MlAnalysisResult, BackendError> {
        self.record("ml_analyze");
        MlAnalysisResult::from_body(json!({
            "success": true,
            "summary": format!("ran {}", req.algorithm),
            "anomaly_count": 0,
            "algorithm": req.algorithm,
        }))
    }

    async fn export_csv(&self) -> Result<CsvExport, BackendError> {
        self.record("export_csv");
        if let Some(payload) = self.export_payload.lock().clone() {
            return Ok(payload);
        }
        let points = self.points.lock();
        let mut data = String::from("timestamp,vibration,temperature,power\n");
        for p in points.iter() {
            data.push_str(&format!(
                "{},{},{},{}\n",
                p.timestamp, p.vibration, p.temperature, p.power
            ));
        }
        Ok(CsvExport {
            status: "success".into(),
            data,
            filename: Some("anomaly_export_test.csv".into()),
            rows_count: Some(points.len() as u64),
        })
    }

    async fn clear_history(&self) -> Result<ClearReport, BackendError> {
        self.record("clear_history");
        let deleted = std::mem::take(&mut *self.points.lock()).len() as u64;
        Ok(ClearReport {
            status: "success".into(),
            message: format!("Cleared {} historical data points", deleted),
            deleted,
        })
    }

    async fn clear_events(&self) -> Result<ClearReport, BackendError> {
        self.record("clear_events");
        let deleted = std::mem::take(&mut *self.events.lock()).len() as u64;
        Ok(ClearReport {
            status: "success".into(),
            message: format!("Cleared {} anomaly events", deleted),
            deleted,
        })
    }

    async fn fetch_manual(&self) -> Result<String, BackendError> {
        self.record("fetch_manual");
        Ok(self.manual.lock().clone())
    }

    async fn save_manual(&self, text: &str) -> Result<(), BackendError> {
        self.record("save_manual");
        *self.manual.lock() = text.to_string();
        Ok(())
    }

    async fn analyze(&self, req: &AnalyzeRequest) -> Result<AnalyzeResponse, BackendError> {
        self.record("analyze");
        self.analyze_requests.lock().push(req.clone());

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.panic_on_analyze.load(Ordering::SeqCst) {
            panic!("analysis backend blew up");
        }

        self.analyze_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(AnalyzeResponse::Answer(format!("answer to: {}", req.query))))
    }
}
