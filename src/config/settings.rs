//! Settings structures for MultiSearch-RS configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main settings structure loaded from settings.yml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub race: RaceSettings,
    pub outgoing: OutgoingSettings,
    pub backends: Vec<BackendConfig>,
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse settings from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(content)?;
        Ok(settings)
    }

    /// Merge with environment variables (MULTISEARCH_* prefix)
    pub fn merge_env(&mut self) {
        self.merge_vars(|key| std::env::var(key).ok());
    }

    fn merge_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("MULTISEARCH_DEBUG") {
            self.general.debug = val.parse().unwrap_or(false);
        }
        if let Some(val) = var("MULTISEARCH_CONCURRENCY") {
            if let Ok(cap) = val.parse() {
                self.race.concurrency_cap = cap;
            }
        }
        if let Some(val) = var("MULTISEARCH_TIMEOUT") {
            if let Ok(timeout) = val.parse() {
                self.race.timeout = Some(timeout);
            }
        }
        if let Some(val) = var("MULTISEARCH_RETURN_ON_WIN") {
            self.race.return_on_win = val.parse().unwrap_or(false);
        }
    }

    /// Reject settings the race cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.race.concurrency_cap == 0 {
            bail!("race.concurrency_cap must be at least 1");
        }
        if let Some(timeout) = self.race.timeout {
            if !timeout.is_finite() || timeout <= 0.0 {
                bail!("race.timeout must be a positive number of seconds");
            }
        }
        let request_timeout = self.outgoing.request_timeout;
        if !request_timeout.is_finite() || request_timeout <= 0.0 {
            bail!("outgoing.request_timeout must be a positive number of seconds");
        }
        for backend in &self.backends {
            if backend.name.is_empty() {
                bail!("backend with url '{}' has no name", backend.url);
            }
            if backend.url.is_empty() {
                bail!("backend '{}' has no url", backend.name);
            }
        }
        Ok(())
    }

    /// Get backend config by name
    pub fn get_backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Get all enabled backends
    pub fn enabled_backends(&self) -> Vec<&BackendConfig> {
        self.backends.iter().filter(|b| !b.disabled).collect()
    }
}

/// General settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Enable debug logging
    pub debug: bool,
}

/// How a race is run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceSettings {
    /// Maximum number of operations executing at once
    pub concurrency_cap: usize,
    /// Overall deadline for a race in seconds
    pub timeout: Option<f64>,
    /// Return as soon as a winner exists instead of waiting for the rest
    pub return_on_win: bool,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            concurrency_cap: crate::DEFAULT_CONCURRENCY_CAP,
            timeout: None,
            return_on_win: false,
        }
    }
}

impl RaceSettings {
    /// Race deadline as a duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Outgoing request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutgoingSettings {
    /// Default request timeout in seconds
    pub request_timeout: f64,
    /// Appended to the generated user agent
    pub useragent_suffix: Option<String>,
    /// Pool max size
    pub pool_maxsize: usize,
    /// Verify SSL certificates
    pub verify_ssl: bool,
    /// Proxy settings
    pub proxies: ProxySettings,
    /// Extra headers to send
    pub extra_headers: HashMap<String, String>,
}

impl Default for OutgoingSettings {
    fn default() -> Self {
        Self {
            request_timeout: crate::DEFAULT_TIMEOUT as f64,
            useragent_suffix: None,
            pool_maxsize: 20,
            verify_ssl: true,
            proxies: ProxySettings::default(),
            extra_headers: HashMap::new(),
        }
    }
}

/// Proxy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub http: Option<String>,
    pub https: Option<String>,
    pub all: Option<String>,
}

/// A search backend reachable over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend name (unique identifier)
    pub name: String,
    /// Endpoint receiving the query
    pub url: String,
    /// Query-string parameter carrying the query
    pub query_param: String,
    /// Whether the backend is disabled
    pub disabled: bool,
    /// Custom request timeout for this backend in seconds
    pub timeout: Option<f64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            query_param: "q".to_string(),
            disabled: false,
            timeout: None,
        }
    }
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }
}
