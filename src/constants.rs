//! Application-wide constants.
//!
//! Centralizes cadences, timeouts, capacities, fixed prompt texts and
//! filesystem locations so the rest of the crate never hardcodes them.

use std::path::PathBuf;

// ── Backend ───────────────────────────────────────────────────────
/// Default base URL of the line backend.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
/// Environment variable that overrides the backend URL.
pub const BACKEND_URL_ENV: &str = "LINEWATCH_BACKEND_URL";

// ── Polling cadences ──────────────────────────────────────────────
/// Minimum allowed poll interval (ms).
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
/// Primary line status poll interval (ms).
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;
/// Foundation metrics + pareto poll interval (ms).
pub const DEFAULT_FOUNDATION_INTERVAL_MS: u64 = 1000;
/// Anomaly stream/events/status/stats poll interval (ms).
pub const DEFAULT_ANOMALY_INTERVAL_MS: u64 = 10_000;

// ── Timeouts ──────────────────────────────────────────────────────
/// Upper bound on a single poll fetch (seconds).
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 10;
/// Upper bound on a single analyze request (seconds).
pub const DEFAULT_ANALYZE_TIMEOUT_SECS: u64 = 30;
/// Lower bound accepted for either timeout (seconds).
pub const MIN_TIMEOUT_SECS: u64 = 1;
/// TCP connect timeout for the HTTP client (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 3;

// ── Capacities ────────────────────────────────────────────────────
/// Number of stream points requested from `/api/anomaly/stream`.
pub const DEFAULT_STREAM_LIMIT: usize = 1000;
/// Largest stream limit accepted from config.
pub const MAX_STREAM_LIMIT: usize = 10_000;
/// Maximum characters of a non-JSON error body kept in a `BackendError`.
pub const ERROR_BODY_MAX_LEN: usize = 300;
/// Default offline ML analysis window (points).
pub const DEFAULT_ML_WINDOW: usize = 300;

// ── Anomaly classification ────────────────────────────────────────
/// Deviation (in sigma) at which a historical point counts as critical.
pub const CRITICAL_DEVIATION_SIGMA: f64 = 3.0;
/// Signals carried by every stream point.
pub const SIGNAL_NAMES: &[&str] = &["vibration", "temperature", "power"];

// ── Diagnosis ─────────────────────────────────────────────────────
/// First message of every fresh transcript.
pub const DIAGNOSIS_GREETING: &str =
    "Hello. I am your AI Diagnostic Assistant. How can I help you today?";
/// Query issued automatically when a new anomaly is handed off.
pub const AUTO_DIAGNOSE_QUERY: &str =
    "Analyze the detected anomaly and suggest immediate actions based on the manual.";
/// Transcript text for a transport failure during analysis.
pub const ANALYZE_TRANSPORT_FAILURE: &str = "Failed to communicate with diagnosis service.";
/// Default local (Ollama) endpoint.
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:11434";
/// Default local model.
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.1:latest";
/// Environment variable seeding the remote provider API key.
pub const REMOTE_API_KEY_ENV: &str = "GEMINI_API_KEY";

// ── Export ────────────────────────────────────────────────────────
/// Filename used when the backend does not supply a usable one.
pub const DEFAULT_EXPORT_FILENAME: &str = "anomaly_export.csv";

// ── Console ───────────────────────────────────────────────────────
/// Column width for wrapped transcript output.
pub const TRANSCRIPT_WRAP_WIDTH: usize = 96;

// ── Paths ─────────────────────────────────────────────────────────

/// Returns the user's home directory, falling back to /tmp.
pub fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// Returns `~/.config/linewatch/`.
pub fn config_dir() -> PathBuf {
    home_dir().join(".config").join("linewatch")
}

/// Returns `~/.config/linewatch/config.toml`.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Returns `~/.config/linewatch/.env` (provider credentials, never committed).
pub fn env_file_path() -> PathBuf {
    config_dir().join(".env")
}

/// Returns `~/.local/share/linewatch/`.
pub fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("linewatch")
}

/// Returns `~/.local/share/linewatch/exports/`.
pub fn default_export_dir() -> PathBuf {
    data_dir().join("exports")
}
