//! Application configuration.
//!
//! `AppConfig` is read from an optional JSON file and then overridden by
//! environment variables. Only the public Supabase URL and anon key live
//! here; session tokens are kept by the backend's session persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::debounce::DEFAULT_SEARCH_DEBOUNCE;
use crate::util::{normalize_site_url, normalize_text_option};
use crate::{Error, Result};

pub const ENV_SUPABASE_URL: &str = "NOTESAPP_SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "NOTESAPP_SUPABASE_KEY";
pub const ENV_SITE_URL: &str = "NOTESAPP_SITE_URL";
pub const ENV_DATA_DIR: &str = "NOTESAPP_DATA_DIR";

const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_anon_key: Option<String>,
    /// Public app URL used as the sign-up confirmation redirect.
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub search_debounce_ms: Option<u64>,
    #[serde(default)]
    pub auth_timeout_secs: Option<u64>,
}

/// Endpoint and key for the remote backend. Only built when both are present.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub site_url: String,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("anon_key", &"[REDACTED]")
            .field("site_url", &self.site_url)
            .finish()
    }
}

impl AppConfig {
    /// Load `path` if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::load_from_path(path)?.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Parse the JSON file at `path`; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|error| {
            Error::Config(format!(
                "Failed to parse config at {}: {}",
                path.display(),
                error
            ))
        })
    }

    /// Apply non-empty values returned by `lookup` over the current ones.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(ENV_SUPABASE_URL)) {
            self.supabase_url = Some(url);
        }
        if let Some(key) = normalize_text_option(lookup(ENV_SUPABASE_KEY)) {
            self.supabase_anon_key = Some(key);
        }
        if let Some(site_url) = normalize_text_option(lookup(ENV_SITE_URL)) {
            self.site_url = Some(site_url);
        }
        if let Some(data_dir) = normalize_text_option(lookup(ENV_DATA_DIR)) {
            self.data_dir = Some(PathBuf::from(data_dir));
        }
        self
    }

    /// Backend settings, or `None` when either the URL or the key is missing.
    pub fn backend(&self) -> Option<BackendConfig> {
        let url = normalize_text_option(self.supabase_url.clone());
        let anon_key = normalize_text_option(self.supabase_anon_key.clone());
        match (url, anon_key) {
            (Some(url), Some(anon_key)) => Some(BackendConfig {
                url,
                anon_key,
                site_url: self.site_url(),
            }),
            (None, None) => None,
            _ => {
                tracing::info!(
                    "Only one of {} / {} is set; running in offline mode",
                    ENV_SUPABASE_URL,
                    ENV_SUPABASE_KEY
                );
                None
            }
        }
    }

    pub fn site_url(&self) -> String {
        normalize_site_url(self.site_url.clone())
    }

    pub fn search_debounce(&self) -> Duration {
        self.search_debounce_ms
            .map_or(DEFAULT_SEARCH_DEBOUNCE, Duration::from_millis)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs.unwrap_or(DEFAULT_AUTH_TIMEOUT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn backend_requires_url_and_key() {
        let config = AppConfig::default().with_overrides(lookup(&[(
            ENV_SUPABASE_URL,
            "https://demo.supabase.co",
        )]));
        assert!(config.backend().is_none());

        let config = config.with_overrides(lookup(&[(ENV_SUPABASE_KEY, "anon")]));
        let backend = config.backend().expect("backend configured");
        assert_eq!(backend.url, "https://demo.supabase.co");
        assert_eq!(backend.anon_key, "anon");
        assert_eq!(backend.site_url, "http://localhost:3000/");
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let config = AppConfig {
            supabase_url: Some("https://file.supabase.co".to_string()),
            ..Default::default()
        }
        .with_overrides(lookup(&[(ENV_SUPABASE_URL, "   ")]));
        assert_eq!(
            config.supabase_url.as_deref(),
            Some("https://file.supabase.co")
        );
    }

    #[test]
    fn defaults_for_timings() {
        let config = AppConfig::default();
        assert_eq!(config.search_debounce(), Duration::from_millis(200));
        assert_eq!(config.auth_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn load_from_path_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"supabase_url": "https://x.co", "unexpected": 1}"#).unwrap();

        let error = AppConfig::load_from_path(&path).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn load_from_missing_path_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn backend_config_debug_redacts_key() {
        let config = AppConfig {
            supabase_url: Some("https://demo.supabase.co".to_string()),
            supabase_anon_key: Some("anon-secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config.backend().unwrap());
        assert!(!rendered.contains("anon-secret"));
    }
}
