use serde::{Deserialize, Serialize};

/// Body of `/api/anomaly/export/csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvExport {
    #[serde(default)]
    pub status: String,
    /// The CSV document.
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub rows_count: Option<u64>,
}

/// Result of a clear-history / clear-events call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    /// `data_deleted` or `events_deleted`, depending on the endpoint.
    #[serde(default, alias = "data_deleted", alias = "events_deleted")]
    pub deleted: u64,
}

impl ClearReport {
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}
