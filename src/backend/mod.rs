//! The line backend's REST surface.
//!
//! Every component talks to the backend through the [`Backend`] trait so
//! the coordinator and its tests never depend on a live server.

mod client;
#[cfg(test)]
pub(crate) mod mock;

pub use client::HttpBackend;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::models::{
    AlgorithmInfo, AnalyzeRequest, AnalyzeResponse, AnomalyEvent, AnomalyStatus, ClearReport,
    CsvExport, LineStatus, MetricsHistory, MlAnalysisRequest, MlAnalysisResult, ParetoEntry,
    SignalPoint, SignalStats,
};

/// One method per backend endpoint.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /api/status`
    async fn line_status(&self) -> Result<LineStatus, BackendError>;
    /// `GET /api/metrics`
    async fn metrics(&self) -> Result<MetricsHistory, BackendError>;
    /// `GET /api/pareto`
    async fn pareto(&self) -> Result<Vec<ParetoEntry>, BackendError>;
    /// `GET /api/anomaly/stream?limit=N`
    async fn anomaly_stream(&self, limit: usize) -> Result<Vec<SignalPoint>, BackendError>;
    /// `GET /api/anomaly/events`, newest first.
    async fn anomaly_events(&self) -> Result<Vec<AnomalyEvent>, BackendError>;
    /// `GET /api/anomaly/status`
    async fn anomaly_status(&self) -> Result<AnomalyStatus, BackendError>;
    /// `GET /api/anomaly/stats`. Only consistent bands are returned.
    async fn anomaly_stats(&self) -> Result<SignalStats, BackendError>;
    /// `GET /api/anomaly/ml/algorithms`
    async fn ml_algorithms(&self) -> Result<Vec<AlgorithmInfo>, BackendError>;
    /// `POST /api/anomaly/ml/analyze`
    async fn ml_analyze(&self, req: &MlAnalysisRequest) -> Result<MlAnalysisResult, BackendError>;
    /// `GET /api/anomaly/export/csv`
    async fn export_csv(&self) -> Result<CsvExport, BackendError>;
    /// `POST /api/anomaly/clear-history`
    async fn clear_history(&self) -> Result<ClearReport, BackendError>;
    /// `POST /api/anomaly/clear-events`
    async fn clear_events(&self) -> Result<ClearReport, BackendError>;
    /// `GET /api/diagnosis/manual`
    async fn fetch_manual(&self) -> Result<String, BackendError>;
    /// `POST /api/diagnosis/manual`
    async fn save_manual(&self, text: &str) -> Result<(), BackendError>;
    /// `POST /api/diagnosis/analyze`
    async fn analyze(&self, req: &AnalyzeRequest) -> Result<AnalyzeResponse, BackendError>;
}
