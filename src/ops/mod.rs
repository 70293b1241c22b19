//! Export and destructive clear operations.
//!
//! Destructive calls go out only after the host's [`Confirm`] capability
//! approves them. Re-polling after a successful clear is the caller's job.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::constants::DEFAULT_EXPORT_FILENAME;
use crate::error::OpsError;
use crate::models::{ClearReport, SignalPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestructiveOp {
    ClearHistory,
    ClearEvents,
}

impl DestructiveOp {
    /// Text shown when asking the host to confirm.
    pub fn warning(self) -> &'static str {
        match self {
            DestructiveOp::ClearHistory => {
                "This permanently deletes all historical sensor data. Continue?"
            }
            DestructiveOp::ClearEvents => "This permanently deletes all anomaly events. Continue?",
        }
    }
}

/// What the host is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub op: DestructiveOp,
    pub warning: String,
}

/// Confirmation capability implemented by the host UI.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, request: &ConfirmRequest) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClearOutcome {
    /// The operator declined; no call was made.
    Declined,
    Cleared(ClearReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    /// Data rows in the written file, header excluded.
    pub rows: usize,
}

pub struct DataManagementOps {
    backend: Arc<dyn Backend>,
    export_dir: PathBuf,
}

impl DataManagementOps {
    pub fn new(backend: Arc<dyn Backend>, export_dir: PathBuf) -> Self {
        Self {
            backend,
            export_dir,
        }
    }

    pub async fn clear_history(&self, confirm: &dyn Confirm) -> Result<ClearOutcome, OpsError> {
        self.clear(DestructiveOp::ClearHistory, confirm).await
    }

    pub async fn clear_events(&self, confirm: &dyn Confirm) -> Result<ClearOutcome, OpsError> {
        self.clear(DestructiveOp::ClearEvents, confirm).await
    }

    async fn clear(&self, op: DestructiveOp, confirm: &dyn Confirm) -> Result<ClearOutcome, OpsError> {
        let request = ConfirmRequest {
            op,
            warning: op.warning().to_string(),
        };
        if !confirm.confirm(&request).await {
            info!(op = ?op, "destructive operation declined");
            return Ok(ClearOutcome::Declined);
        }

        let report = match op {
            DestructiveOp::ClearHistory => self.backend.clear_history().await?,
            DestructiveOp::ClearEvents => self.backend.clear_events().await?,
        };
        info!(op = ?op, deleted = report.deleted, "destructive operation completed");
        Ok(ClearOutcome::Cleared(report))
    }

    /// Fetch the CSV export and write it under the export directory.
    ///
    /// `known_points` is the last stream snapshot; with nothing loaded the
    /// export is refused without a request.
    pub async fn export_csv(
        &self,
        known_points: Option<&[SignalPoint]>,
    ) -> Result<ExportReport, OpsError> {
        if known_points.map_or(true, |p| p.is_empty()) {
            return Err(OpsError::NothingToExport);
        }

        let export = self.backend.export_csv().await?;
        let rows = count_csv_rows(&export.data)?;
        if let Some(reported) = export.rows_count {
            if reported != rows as u64 {
                warn!(reported, parsed = rows, "export row count mismatch");
            }
        }

        let filename = sanitize_filename(export.filename.as_deref());
        let path = self.export_dir.join(filename);
        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|source| OpsError::Io {
                path: self.export_dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, export.data.as_bytes())
            .await
            .map_err(|source| OpsError::Io {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), rows, "anomaly data exported");
        Ok(ExportReport { path, rows })
    }
}

/// Keep only the last path component of a server-supplied filename.
pub fn sanitize_filename(name: Option<&str>) -> String {
    let candidate = name
        .unwrap_or_default()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        DEFAULT_EXPORT_FILENAME.to_string()
    } else {
        candidate.to_string()
    }
}

/// Count data rows of a CSV document, checking every record has as many
/// fields as the header. Quoted fields may contain commas, doubled quotes
/// and line breaks; blank lines are ignored.
pub fn count_csv_rows(data: &str) -> Result<usize, OpsError> {
    let records = split_records(data)?;
    let mut iter = records.into_iter();
    let header = iter
        .next()
        .ok_or_else(|| OpsError::Malformed("empty document".into()))?;

    let mut rows = 0;
    for (i, fields) in iter.enumerate() {
        if fields != header {
            return Err(OpsError::Malformed(format!(
                "row {} has {} fields, header has {}",
                i + 1,
                fields,
                header
            )));
        }
        rows += 1;
    }
    Ok(rows)
}

/// Field count of each non-blank record.
fn split_records(data: &str) -> Result<Vec<usize>, OpsError> {
    let mut records = Vec::new();
    let mut fields = 1;
    let mut record_has_content = false;
    let mut in_quotes = false;
    let mut chars = data.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' => {
                in_quotes = true;
                record_has_content = true;
            }
            ',' if !in_quotes => {
                fields += 1;
                record_has_content = true;
            }
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                if record_has_content {
                    records.push(fields);
                }
                fields = 1;
                record_has_content = false;
            }
            _ => record_has_content = true,
        }
    }
    if in_quotes {
        return Err(OpsError::Malformed("unterminated quoted field".into()));
    }
    if record_has_content {
        records.push(fields);
    }
    Ok(records)
}
