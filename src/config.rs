use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AnalysisError;

pub const DEFAULT_LLM_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_LLM_MODEL: &str = "llama3.3:70b";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// Connection settings for the chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of the shared table store. Physical tables live under `tables/`.
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub database_url: String,
    pub llm: LlmSettings,
}

impl ServiceConfig {
    /// Everything under one directory, no API key. Used by tests and local runs.
    pub fn with_root(root: &Path) -> Self {
        let data_dir = root.join("data");
        Self {
            database_url: data_dir.join("catalog.db").to_string_lossy().into_owned(),
            data_dir,
            upload_dir: root.join("uploads"),
            llm: LlmSettings::default(),
        }
    }

    pub fn from_env() -> Result<Self, AnalysisError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AnalysisError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "./data".to_string()));
        let upload_dir =
            PathBuf::from(lookup("UPLOAD_DIR").unwrap_or_else(|| "./uploads".to_string()));
        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| data_dir.join("catalog.db").to_string_lossy().into_owned());

        let timeout_secs = match lookup("LLM_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| AnalysisError::ConfigError {
                message: format!("Invalid LLM_TIMEOUT_SECS: {}", raw),
            })?,
            None => DEFAULT_LLM_TIMEOUT_SECS,
        };

        let llm = LlmSettings {
            base_url: lookup("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            api_key: lookup("LLM_API_KEY").filter(|key| !key.trim().is_empty()),
            model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            data_dir,
            upload_dir,
            database_url,
            llm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = ServiceConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert!(config.database_url.ends_with("catalog.db"));
        assert_eq!(config.llm.base_url, DEFAULT_LLM_BASE_URL);
        assert_eq!(config.llm.model, DEFAULT_LLM_MODEL);
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.llm.timeout, Duration::from_secs(120));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config =
            ServiceConfig::from_lookup(lookup_from(&[("LLM_API_KEY", "   ")])).unwrap();
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("DATA_DIR", "/srv/data"),
            ("DATABASE_URL", "/srv/meta.db"),
            ("LLM_API_KEY", "secret"),
            ("LLM_MODEL", "gpt-4o-mini"),
            ("LLM_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/data"));
        assert_eq!(config.database_url, "/srv/meta.db");
        assert_eq!(config.llm.api_key.as_deref(), Some("secret"));
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_timeout_is_a_config_error() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("LLM_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ConfigError { .. }));
    }
}
