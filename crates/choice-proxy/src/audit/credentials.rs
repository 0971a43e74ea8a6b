//! Access tokens for Firestore writes.
//!
//! On GCP the token comes from the instance metadata server and is cached
//! until shortly before it expires. A configured static token, or no token at
//! all for the emulator, override that.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::AuditError;

const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the metadata server says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Where the bearer token for audit writes comes from.
#[derive(Debug)]
pub enum Credentials {
    /// No `Authorization` header (Firestore emulator).
    Anonymous,
    /// A fixed token, used until the process restarts.
    Static(String),
    /// Default service account of the instance the proxy runs on.
    Metadata(MetadataTokenSource),
}

impl Credentials {
    /// Current bearer token, or `None` when requests go out unauthenticated.
    pub async fn token(&self) -> Result<Option<String>, AuditError> {
        match self {
            Credentials::Anonymous => Ok(None),
            Credentials::Static(token) => Ok(Some(token.clone())),
            Credentials::Metadata(source) => source.token().await.map(Some),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Fetches service account tokens from the GCE metadata server.
#[derive(Debug)]
pub struct MetadataTokenSource {
    client: reqwest::Client,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataTokenSource {
    pub fn new(client: reqwest::Client, metadata_url: &str) -> Self {
        Self {
            client,
            token_url: format!("{}{TOKEN_PATH}", metadata_url.trim_end_matches('/')),
            cached: Mutex::new(None),
        }
    }

    /// Cached token, fetching a fresh one when missing or close to expiry.
    ///
    /// The lock is held across the fetch so concurrent writers share one
    /// refresh.
    pub async fn token(&self) -> Result<String, AuditError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.fetch().await?;
        let value = fresh.access_token.clone();
        tracing::debug!(expires_in = fresh.expires_in, "Fetched audit store access token");
        *cached = Some(CachedToken {
            value: fresh.access_token,
            refresh_at: Instant::now()
                + Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN),
        });
        Ok(value)
    }

    async fn fetch(&self) -> Result<TokenResponse, AuditError> {
        let response = self
            .client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| AuditError::Credentials(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::Credentials(format!(
                "metadata server answered {status}"
            )));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuditError::Credentials(e.to_string()))
    }
}
