//! OAuth2 secret storage and bearer tokens
//!
//! Secrets live outside the process in a storage backend; the default is
//! a JSON file under the user's home directory. A [`BearerCredential`]
//! wraps loaded secrets and exchanges them for short-lived access tokens
//! at the token endpoint, caching a token until shortly before expiry.
//!
//! Secret material is never printed: `Debug` implementations redact it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Tokens are refreshed this long before their reported expiry, so a
/// token is never presented moments before it lapses.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Error raised by secret storage.
#[derive(Debug, Error)]
pub enum SecretError {
    /// No secrets exist at the given location. Expected for deployments
    /// that do not use OAuth2.
    #[error("no secrets found at '{path}'")]
    NotFound { path: String },

    /// Secrets exist but could not be read or parsed.
    #[error("invalid secrets at '{path}': {message}")]
    Invalid { path: String, message: String },
}

/// OAuth2 client secrets plus an optional stored refresh token.
#[derive(Clone, Deserialize)]
pub struct OAuthSecrets {
    pub client_id: String,
    pub client_secret: String,
    /// Token endpoint URL.
    pub token_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for OAuthSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Source of OAuth2 secrets.
pub trait SecretStorage: Send + Sync {
    /// Load the secrets, or [`SecretError::NotFound`] when none exist.
    fn load(&self) -> std::result::Result<OAuthSecrets, SecretError>;
}

/// JSON-file secret storage.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Storage at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at the conventional per-user location,
    /// `~/.terrace/client_secrets.json`.
    pub fn default_location() -> Self {
        let mut path = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        path.push(".terrace");
        path.push("client_secrets.json");
        Self { path }
    }

    /// Path this storage reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretStorage for JsonFileStorage {
    fn load(&self) -> std::result::Result<OAuthSecrets, SecretError> {
        let path = self.path.display().to_string();
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SecretError::NotFound { path });
            }
            Err(err) => {
                return Err(SecretError::Invalid {
                    path,
                    message: err.to_string(),
                });
            }
        };
        serde_json::from_str(&raw).map_err(|err| SecretError::Invalid {
            path,
            message: err.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() + EXPIRY_MARGIN < at,
            None => true,
        }
    }
}

/// Bearer credential backed by OAuth2 secrets.
///
/// Exchanges the stored refresh token (when present) or the client
/// credentials for an access token, and reuses that token until it nears
/// expiry. [`BearerCredential::invalidate`] drops the cached token so the
/// next request fetches a fresh one.
pub struct BearerCredential {
    secrets: OAuthSecrets,
    cached: RwLock<Option<CachedToken>>,
}

impl BearerCredential {
    pub fn new(secrets: OAuthSecrets) -> Self {
        Self {
            secrets,
            cached: RwLock::new(None),
        }
    }

    /// Current access token, fetching one from the token endpoint if the
    /// cache is empty or stale.
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
                return Ok(token.access_token.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        let token = self.fetch_token(http).await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token. The next [`BearerCredential::access_token`]
    /// call hits the token endpoint again.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn fetch_token(&self, http: &reqwest::Client) -> Result<CachedToken> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", &self.secrets.client_id),
            ("client_secret", &self.secrets.client_secret),
        ];
        let scopes = self.secrets.scopes.join(" ");
        match &self.secrets.refresh_token {
            Some(refresh_token) => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", refresh_token));
            }
            None => {
                form.push(("grant_type", "client_credentials"));
                if !scopes.is_empty() {
                    form.push(("scope", &scopes));
                }
            }
        }

        debug!(token_url = %self.secrets.token_url, "requesting access token");
        let response = http
            .post(&self.secrets.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| Error::transport(self.secrets.token_url.clone(), err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::connection(
                format!("token endpoint returned {status}"),
                self.secrets.token_url.clone(),
                crate::error::ConnectionKind::Transport,
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| Error::transport(self.secrets.token_url.clone(), err))?;

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredential")
            .field("secrets", &self.secrets)
            .finish_non_exhaustive()
    }
}
