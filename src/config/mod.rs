use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::constants::*;
use crate::diagnosis::{ProviderConfig, ProviderKind};

/// Application configuration with sensible defaults.
///
/// Can be overridden via ~/.config/linewatch/config.toml
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the line backend
    pub backend_url: String,
    /// Line status poll interval (ms)
    pub status_interval_ms: u64,
    /// Metrics + pareto poll interval (ms)
    pub foundation_interval_ms: u64,
    /// Anomaly stream/events/status/stats poll interval (ms)
    pub anomaly_interval_ms: u64,
    /// Upper bound on one poll fetch (s)
    pub poll_timeout_secs: u64,
    /// Upper bound on one analyze request (s)
    pub analyze_timeout_secs: u64,
    /// Points requested from the anomaly stream
    pub stream_limit: usize,
    /// Where CSV exports are written
    pub export_dir: PathBuf,
    /// Initial analysis provider settings
    pub provider: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
            foundation_interval_ms: DEFAULT_FOUNDATION_INTERVAL_MS,
            anomaly_interval_ms: DEFAULT_ANOMALY_INTERVAL_MS,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            analyze_timeout_secs: DEFAULT_ANALYZE_TIMEOUT_SECS,
            stream_limit: DEFAULT_STREAM_LIMIT,
            export_dir: default_export_dir(),
            provider: ProviderConfig::default(),
        }
    }
}

/// TOML-deserializable config file format.
/// All fields are optional; missing fields use defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    backend_url: Option<String>,
    status_interval_ms: Option<u64>,
    foundation_interval_ms: Option<u64>,
    anomaly_interval_ms: Option<u64>,
    poll_timeout_secs: Option<u64>,
    analyze_timeout_secs: Option<u64>,
    stream_limit: Option<usize>,
    export_dir: Option<PathBuf>,
    provider: Option<FileProviderConfig>,
}

/// TOML-deserializable `[provider]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileProviderConfig {
    kind: Option<ProviderKind>,
    endpoint_url: Option<String>,
    model_name: Option<String>,
    api_key: Option<String>,
}

impl Config {
    /// Load config from ~/.config/linewatch/config.toml plus the `.env` file
    /// next to it and the environment.
    pub fn load() -> Self {
        Self::load_at(&config_file_path())
    }

    /// Like [`Config::load`] with an explicit config file.
    pub fn load_at(path: &Path) -> Self {
        let _ = dotenvy::from_path(env_file_path());
        let mut config = Self::load_from(path);
        config.apply_env(
            std::env::var(BACKEND_URL_ENV).ok(),
            std::env::var(REMOTE_API_KEY_ENV).ok(),
        );
        config
    }

    /// Load from an explicit path. A missing file yields pure defaults; a
    /// malformed one is reported and also yields defaults.
    pub fn load_from(path: &Path) -> Self {
        let config = Config::default();

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return config, // No config file, use defaults
        };

        match toml::from_str::<FileConfig>(&content) {
            Ok(file_config) => config.merge(file_config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                config
            }
        }
    }

    fn merge(mut self, file: FileConfig) -> Self {
        if let Some(v) = file.backend_url {
            if !v.trim().is_empty() {
                self.backend_url = v.trim().to_string();
            }
        }
        if let Some(v) = file.status_interval_ms {
            self.status_interval_ms = v.max(MIN_POLL_INTERVAL_MS);
        }
        if let Some(v) = file.foundation_interval_ms {
            self.foundation_interval_ms = v.max(MIN_POLL_INTERVAL_MS);
        }
        if let Some(v) = file.anomaly_interval_ms {
            self.anomaly_interval_ms = v.max(MIN_POLL_INTERVAL_MS);
        }
        if let Some(v) = file.poll_timeout_secs {
            self.poll_timeout_secs = v.max(MIN_TIMEOUT_SECS);
        }
        if let Some(v) = file.analyze_timeout_secs {
            self.analyze_timeout_secs = v.max(MIN_TIMEOUT_SECS);
        }
        if let Some(v) = file.stream_limit {
            self.stream_limit = v.clamp(1, MAX_STREAM_LIMIT);
        }
        if let Some(v) = file.export_dir {
            self.export_dir = v;
        }
        if let Some(p) = file.provider {
            if let Some(kind) = p.kind {
                self.provider.kind = kind;
            }
            if let Some(v) = p.endpoint_url.filter(|v| !v.is_empty()) {
                self.provider.endpoint_url = v;
            }
            if let Some(v) = p.model_name.filter(|v| !v.is_empty()) {
                self.provider.model_name = v;
            }
            if let Some(v) = p.api_key {
                self.provider.api_key = v;
            }
        }
        self
    }

    /// Environment overrides: the backend URL always wins, the API key only
    /// fills an empty one.
    pub fn apply_env(&mut self, backend_url: Option<String>, api_key: Option<String>) {
        if let Some(url) = backend_url.filter(|u| !u.trim().is_empty()) {
            self.backend_url = url.trim().to_string();
        }
        if self.provider.api_key.is_empty() {
            if let Some(key) = api_key.filter(|k| !k.is_empty()) {
                self.provider.api_key = key;
            }
        }
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn foundation_interval(&self) -> Duration {
        Duration::from_millis(self.foundation_interval_ms)
    }

    pub fn anomaly_interval(&self) -> Duration {
        Duration::from_millis(self.anomaly_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_secs(self.analyze_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    // ── Defaults ──────────────────────────────────────────────────

    #[test]
    fn default_values() {
        let c = Config::default();
        assert_eq!(c.backend_url, "http://localhost:8000");
        assert_eq!(c.status_interval_ms, 1000);
        assert_eq!(c.foundation_interval_ms, 1000);
        assert_eq!(c.anomaly_interval_ms, 10_000);
        assert_eq!(c.poll_timeout(), Duration::from_secs(10));
        assert_eq!(c.analyze_timeout(), Duration::from_secs(30));
        assert_eq!(c.stream_limit, 1000);
        assert_eq!(c.provider.kind, ProviderKind::Local);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = Config::load_from(&dir.path().join("absent.toml"));
        assert_eq!(c.backend_url, DEFAULT_BACKEND_URL);
    }

    // ── File merge ────────────────────────────────────────────────

    #[test]
    fn file_overrides_and_clamps() {
        let f = write_config(
            r#"
backend_url = "http://line-7.plant:8000"
status_interval_ms = 5
anomaly_interval_ms = 20000
analyze_timeout_secs = 0
stream_limit = 50000
export_dir = "/srv/exports"

[provider]
kind = "remote"
api_key = "file-key"
"#,
        );
        let c = Config::load_from(f.path());
        assert_eq!(c.backend_url, "http://line-7.plant:8000");
        assert_eq!(c.status_interval_ms, MIN_POLL_INTERVAL_MS);
        assert_eq!(c.anomaly_interval_ms, 20_000);
        assert_eq!(c.analyze_timeout_secs, MIN_TIMEOUT_SECS);
        assert_eq!(c.stream_limit, MAX_STREAM_LIMIT);
        assert_eq!(c.export_dir, PathBuf::from("/srv/exports"));
        assert_eq!(c.provider.kind, ProviderKind::Remote);
        assert_eq!(c.provider.api_key, "file-key");
        assert_eq!(c.provider.model_name, DEFAULT_LOCAL_MODEL);
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let f = write_config("status_interval_ms = \"fast\"\n");
        let c = Config::load_from(f.path());
        assert_eq!(c.status_interval_ms, DEFAULT_STATUS_INTERVAL_MS);
    }

    #[test]
    fn zero_stream_limit_is_raised() {
        let f = write_config("stream_limit = 0\n");
        assert_eq!(Config::load_from(f.path()).stream_limit, 1);
    }

    // ── Environment ───────────────────────────────────────────────

    #[test]
    fn env_backend_url_wins() {
        let mut c = Config::default();
        c.apply_env(Some("http://10.0.0.5:8000".into()), None);
        assert_eq!(c.backend_url, "http://10.0.0.5:8000");
    }

    #[test]
    fn env_api_key_only_fills_empty() {
        let mut c = Config::default();
        c.apply_env(None, Some("env-key".into()));
        assert_eq!(c.provider.api_key, "env-key");

        c.apply_env(None, Some("other".into()));
        assert_eq!(c.provider.api_key, "env-key");
    }
}
