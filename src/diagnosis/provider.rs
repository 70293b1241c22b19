use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_LOCAL_ENDPOINT, DEFAULT_LOCAL_MODEL};
use crate::models::ProviderWireConfig;

/// Which LLM target the backend should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Self-hosted runtime (Ollama).
    #[default]
    Local,
    /// Hosted API (Gemini).
    Remote,
}

impl ProviderKind {
    /// Name the backend expects in the `provider` field.
    pub fn wire_name(self) -> &'static str {
        match self {
            ProviderKind::Local => "ollama",
            ProviderKind::Remote => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Local => write!(f, "local"),
            ProviderKind::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "ollama" => Ok(ProviderKind::Local),
            "remote" | "gemini" => Ok(ProviderKind::Remote),
            other => Err(format!("unknown provider '{}' (expected local or remote)", other)),
        }
    }
}

/// Analysis provider settings owned by the diagnosis session.
///
/// `endpoint_url` and `model_name` matter to the local provider, `api_key`
/// to the remote one. Switching kind keeps every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub endpoint_url: String,
    pub model_name: String,
    pub api_key: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Local,
            endpoint_url: DEFAULT_LOCAL_ENDPOINT.to_string(),
            model_name: DEFAULT_LOCAL_MODEL.to_string(),
            api_key: String::new(),
        }
    }
}

impl ProviderConfig {
    pub fn set_kind(&mut self, kind: ProviderKind) {
        self.kind = kind;
    }

    pub fn wire_name(&self) -> &'static str {
        self.kind.wire_name()
    }

    pub fn wire_config(&self) -> ProviderWireConfig {
        ProviderWireConfig {
            url: self.endpoint_url.clone(),
            model: self.model_name.clone(),
            api_key: self.api_key.clone(),
        }
    }

    /// Operator-facing one-liner. Never shows the key itself.
    pub fn describe(&self) -> String {
        match self.kind {
            ProviderKind::Local => format!("local ({} @ {})", self.model_name, self.endpoint_url),
            ProviderKind::Remote => format!(
                "remote (api key {})",
                if self.api_key.is_empty() { "not set" } else { "set" }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_local_runtime() {
        let p = ProviderConfig::default();
        assert_eq!(p.kind, ProviderKind::Local);
        assert_eq!(p.wire_name(), "ollama");
        assert_eq!(p.endpoint_url, "http://localhost:11434");
        assert_eq!(p.model_name, "llama3.1:latest");
    }

    #[test]
    fn switching_kind_keeps_other_fields() {
        let mut p = ProviderConfig {
            api_key: "secret".into(),
            ..ProviderConfig::default()
        };
        p.set_kind(ProviderKind::Remote);
        assert_eq!(p.wire_name(), "gemini");
        p.set_kind(ProviderKind::Local);
        assert_eq!(p.api_key, "secret");
        assert_eq!(p.model_name, "llama3.1:latest");
    }

    #[test]
    fn parses_kind_names() {
        assert_eq!("remote".parse::<ProviderKind>(), Ok(ProviderKind::Remote));
        assert_eq!("Ollama".parse::<ProviderKind>(), Ok(ProviderKind::Local));
        assert!("openai".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn describe_hides_key() {
        let p = ProviderConfig {
            kind: ProviderKind::Remote,
            api_key: "AIza-secret".into(),
            ..ProviderConfig::default()
        };
        assert!(!p.describe().contains("AIza"));
    }
}
