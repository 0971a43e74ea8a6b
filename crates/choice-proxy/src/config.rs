//! Configuration types and loading logic.

use choice_tracing::TracingConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use reqwest::Url;
use serde::Deserialize;

use crate::error::{ProxyError, Result};

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// The two backends requests are routed to.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Receives audited transaction submissions.
    #[serde(default)]
    pub bidder_url: Option<String>,

    /// Receives every other request.
    #[serde(default)]
    pub vanilla_url: Option<String>,

    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Largest request body read into memory for classification.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Where audit records are written.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    #[default]
    Firestore,
    Memory,
}

/// Whether the request waits for the audit write before forwarding.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    #[default]
    Sync,
    Background,
}

/// How Firestore writes authenticate when no static token is configured.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// Service account token from the GCE metadata server.
    #[default]
    Metadata,
    /// Unauthenticated, for the Firestore emulator.
    None,
}

/// Audit store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub backend: AuditBackend,

    #[serde(default)]
    pub mode: AuditMode,

    /// Firestore project identifier.
    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_firestore_base_url")]
    pub base_url: String,

    /// Fixed bearer token for Firestore writes. Takes precedence over
    /// `credentials`.
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub credentials: CredentialSource,

    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,

    #[serde(default = "default_audit_timeout")]
    pub timeout_secs: u64,

    /// Background mode only: writes beyond this many in flight are shed.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_upstream_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_database() -> String {
    "(default)".to_string()
}

fn default_collection() -> String {
    "txs".to_string()
}

fn default_firestore_base_url() -> String {
    "https://firestore.googleapis.com".to_string()
}

fn default_metadata_url() -> String {
    "http://metadata.google.internal".to_string()
}

fn default_audit_timeout() -> u64 {
    10
}

fn default_max_in_flight() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            bidder_url: None,
            vanilla_url: None,
            timeout_secs: default_upstream_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: AuditBackend::default(),
            mode: AuditMode::default(),
            project_id: None,
            database: default_database(),
            collection: default_collection(),
            base_url: default_firestore_base_url(),
            access_token: None,
            credentials: CredentialSource::default(),
            metadata_url: default_metadata_url(),
            timeout_secs: default_audit_timeout(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Flat deployment variables (`CHOICE_BIDDER_URL`, `CHOICE_VANILLA_URL`,
    ///    `CHOICE_PROJECT_ID`, `CHOICE_PORT`, `FIRESTORE_EMULATOR_HOST`)
    /// 2. Environment variables (CHOICE_ prefix, __ for nesting)
    /// 3. TOML config file
    /// 4. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("CHOICE_").split("__"));
        let mut config = Self::from_figment(figment)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        Ok(figment.extract()?)
    }

    /// Apply the flat variables the service has always been deployed with.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("CHOICE_BIDDER_URL") {
            self.upstream.bidder_url = Some(url);
        }
        if let Some(url) = lookup("CHOICE_VANILLA_URL") {
            self.upstream.vanilla_url = Some(url);
        }
        if let Some(project) = lookup("CHOICE_PROJECT_ID") {
            self.audit.project_id = Some(project);
        }
        if let Some(port) = lookup("CHOICE_PORT").filter(|p| !p.is_empty()) {
            self.server.listen_address = format!("0.0.0.0:{port}");
        }
        if let Some(host) = lookup("FIRESTORE_EMULATOR_HOST").filter(|h| !h.is_empty()) {
            self.audit.base_url = format!("http://{host}");
            self.audit.credentials = CredentialSource::None;
        }
    }

    /// Reject configurations the proxy cannot start with.
    pub fn validate(&self) -> Result<()> {
        self.bidder_url()?;
        self.vanilla_url()?;
        if self.audit.backend == AuditBackend::Firestore
            && self.audit.project_id.as_deref().map_or(true, str::is_empty)
        {
            return Err(ProxyError::InvalidConfig(
                "CHOICE_PROJECT_ID must be set when the firestore audit backend is used".into(),
            ));
        }
        if self.audit.mode == AuditMode::Background && self.audit.max_in_flight == 0 {
            return Err(ProxyError::InvalidConfig(
                "audit.max_in_flight must be at least 1 in background mode".into(),
            ));
        }
        Ok(())
    }

    pub fn bidder_url(&self) -> Result<Url> {
        parse_upstream_url("CHOICE_BIDDER_URL", self.upstream.bidder_url.as_deref())
    }

    pub fn vanilla_url(&self) -> Result<Url> {
        parse_upstream_url("CHOICE_VANILLA_URL", self.upstream.vanilla_url.as_deref())
    }
}

fn parse_upstream_url(name: &str, raw: Option<&str>) -> Result<Url> {
    let raw = raw
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProxyError::InvalidConfig(format!("set environment variable {name}")))?;
    let url = Url::parse(raw)
        .map_err(|e| ProxyError::InvalidConfig(format!("{name} is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ProxyError::InvalidConfig(format!(
            "{name} must be an http(s) URL with a host, got {raw}"
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_toml(toml: &str) -> ProxyConfig {
        ProxyConfig::from_figment(Figment::from(Toml::string(toml))).unwrap()
    }

    #[test]
    fn test_defaults_without_any_sections() {
        let config = from_toml("");
        assert_eq!(config.server.listen_address, "0.0.0.0:8080");
        assert_eq!(config.upstream.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(config.audit.collection, "txs");
        assert_eq!(config.audit.database, "(default)");
        assert_eq!(config.audit.mode, AuditMode::Sync);
        assert_eq!(config.audit.backend, AuditBackend::Firestore);
        assert_eq!(config.audit.credentials, CredentialSource::Metadata);
        assert_eq!(config.audit.metadata_url, "http://metadata.google.internal");
    }

    #[test]
    fn test_missing_bidder_url_is_fatal() {
        let config = from_toml(
            r#"
            [upstream]
            vanilla_url = "http://node:8545"
            [audit]
            backend = "memory"
            "#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("CHOICE_BIDDER_URL"));
    }

    #[test]
    fn test_non_http_upstream_rejected() {
        let config = from_toml(
            r#"
            [upstream]
            bidder_url = "ws://bidder:8546"
            vanilla_url = "http://node:8545"
            [audit]
            backend = "memory"
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_firestore_requires_project() {
        let config = from_toml(
            r#"
            [upstream]
            bidder_url = "http://bidder:8545"
            vanilla_url = "https://mainnet.example.io/v3/key"
            "#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("CHOICE_PROJECT_ID"));
    }

    #[test]
    fn test_flat_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CHOICE_BIDDER_URL", "http://bidder:8545"),
            ("CHOICE_VANILLA_URL", "http://vanilla:8545"),
            ("CHOICE_PROJECT_ID", "choice-audit"),
            ("CHOICE_PORT", "9000"),
            ("FIRESTORE_EMULATOR_HOST", "localhost:8200"),
        ]);
        let mut config = from_toml("");
        config.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.listen_address, "0.0.0.0:9000");
        assert_eq!(config.audit.project_id.as_deref(), Some("choice-audit"));
        assert_eq!(config.audit.base_url, "http://localhost:8200");
        assert_eq!(config.audit.credentials, CredentialSource::None);
        assert!(config.validate().is_ok());
        assert_eq!(config.bidder_url().unwrap().host_str(), Some("bidder"));
    }

    #[test]
    fn test_empty_port_keeps_default() {
        let mut config = from_toml("");
        config.apply_env_overrides(|k| (k == "CHOICE_PORT").then(String::new));
        assert_eq!(config.server.listen_address, "0.0.0.0:8080");
    }
}
