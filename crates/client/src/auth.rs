//! Long-lived FlyEM token lifecycle.
//!
//! A token comes from the configuration, the local token cache, or is
//! issued by the store in exchange for a short-lived identity token. The
//! token's `exp` claim is read without verifying the signature; the issuer
//! is trusted. Expired tokens are refreshed through the same exchange.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::config::{normalize_server_url, parse_token, ClientConfig};
use crate::error::{AuthError, ClioError};
use crate::url::{make_url, with_app_identifier};

/// Tokens expiring within this many seconds are treated as expired.
pub const TOKEN_EXPIRY_LEEWAY_SECS: i64 = 60;

/// Path, relative to the server, of the token-issuance endpoint.
pub const TOKEN_ENDPOINT: &str = "v2/server/token";

/// Where a short-lived identity token comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdentitySource {
    /// `gcloud auth print-identity-token`, falling back to a prompt.
    #[default]
    Gcloud,
    /// Read from stdin.
    Prompt,
    /// A token supplied up front.
    Static(String),
    /// Never obtain identity tokens; expired tokens cannot be refreshed.
    Disabled,
}

impl IdentitySource {
    pub async fn identity_token(&self) -> Result<String, AuthError> {
        match self {
            Self::Gcloud => match gcloud_identity_token().await {
                Ok(token) => Ok(token),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Unable to get identity token from gcloud, switching to manual entry. \
                         Copy the token from the clio.janelia.org User Settings page",
                    );
                    prompt_identity_token().await
                }
            },
            Self::Prompt => prompt_identity_token().await,
            Self::Static(token) => Ok(token.trim().to_string()),
            Self::Disabled => Err(AuthError::RefreshUnavailable),
        }
    }
}

async fn gcloud_identity_token() -> Result<String, AuthError> {
    let output = tokio::process::Command::new("gcloud")
        .args(["auth", "print-identity-token"])
        .output()
        .await
        .map_err(|e| AuthError::IdentityToken(format!("gcloud not runnable: {e}")))?;

    if !output.status.success() {
        return Err(AuthError::IdentityToken(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(AuthError::IdentityToken("gcloud printed no token".into()));
    }
    Ok(token)
}

async fn prompt_identity_token() -> Result<String, AuthError> {
    let line = tokio::task::spawn_blocking(|| {
        eprint!("Enter your user identity token: ");
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(|e| AuthError::IdentityToken(e.to_string()))?
    .map_err(|e| AuthError::IdentityToken(e.to_string()))?;

    let token = line.trim().to_string();
    if token.is_empty() {
        return Err(AuthError::IdentityToken("no token entered".into()));
    }
    Ok(token)
}

#[derive(Debug, Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// Read the `exp` claim of a JWT without verifying its signature.
///
/// Opaque (non-JWT) tokens have no expiry and yield `Ok(None)`.
pub fn token_expiry(token: &str) -> Result<Option<DateTime<Utc>>, AuthError> {
    if token.split('.').count() != 3 {
        return Ok(None);
    }

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| AuthError::Undecodable(e.to_string()))?;

    Ok(data
        .claims
        .exp
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single()))
}

/// Whether the token expires within [`TOKEN_EXPIRY_LEEWAY_SECS`] of `now`.
pub fn is_expired(token: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
    Ok(token_expiry(token)?
        .is_some_and(|exp| exp.timestamp() - now.timestamp() <= TOKEN_EXPIRY_LEEWAY_SECS))
}

/// Exchange an identity token for a long-lived FlyEM token.
pub async fn exchange_identity_token(
    http: &reqwest::Client,
    server: &str,
    app_id: &str,
    identity_token: &str,
) -> Result<String, ClioError> {
    let url = with_app_identifier(make_url::<&str>(server, &[TOKEN_ENDPOINT], &[])?, app_id);

    let response = http
        .post(url)
        .bearer_auth(identity_token)
        .send()
        .await
        .map_err(AuthError::ExchangeRequest)?;

    let status = response.status();
    let body = response.text().await.map_err(AuthError::ExchangeRequest)?;
    if !status.is_success() {
        return Err(AuthError::Exchange {
            status: status.as_u16(),
            body,
        }
        .into());
    }

    Ok(parse_token(body.trim().trim_matches('"'))?)
}

async fn read_cached_token(path: &Path) -> Result<Option<String>, AuthError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(parse_token(&contents).ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(AuthError::Cache {
            path: path.display().to_string(),
            source,
        }),
    }
}

async fn write_cached_token(path: &Path, token: &str) -> Result<(), AuthError> {
    tokio::fs::write(path, token)
        .await
        .map_err(|source| AuthError::Cache {
            path: path.display().to_string(),
            source,
        })
}

/// Holds the current bearer token and refreshes it when it expires.
pub struct TokenManager {
    current: RwLock<String>,
    refresh_lock: Mutex<()>,
    server: String,
    app_id: String,
    cache_path: Option<PathBuf>,
    identity: IdentitySource,
}

impl TokenManager {
    /// Wrap a known token. Refreshes use `identity` and skip the cache file.
    pub fn new(token: String, server: &str, app_id: &str, identity: IdentitySource) -> Self {
        Self {
            current: RwLock::new(token),
            refresh_lock: Mutex::new(()),
            server: server.to_string(),
            app_id: app_id.to_string(),
            cache_path: None,
            identity,
        }
    }

    /// Resolve the initial token: explicit config, then the cache file,
    /// then an identity-token exchange (whose result is cached).
    pub async fn resolve(
        config: &ClientConfig,
        server: &str,
        http: &reqwest::Client,
    ) -> Result<Self, ClioError> {
        let mut manager = Self::new(String::new(), server, &config.app_id, config.identity.clone());
        manager.cache_path = Some(config.token_cache.clone());

        let token = if let Some(raw) = &config.token {
            parse_token(raw)?
        } else if let Some(cached) = read_cached_token(&config.token_cache).await? {
            tracing::debug!(path = %config.token_cache.display(), "Using cached FlyEM token");
            cached
        } else {
            manager.issue(http).await?
        };

        *manager.current.get_mut() = token;
        Ok(manager)
    }

    /// The token to send, refreshed first if it has expired.
    pub async fn bearer(&self, http: &reqwest::Client) -> Result<String, ClioError> {
        let token = self.current.read().await.clone();
        if is_expired(&token, Utc::now())? {
            tracing::info!("FlyEM token expired, refreshing");
            return self.refresh(http, &token).await;
        }
        Ok(token)
    }

    /// Replace `stale` with a freshly issued token.
    ///
    /// If another caller already replaced `stale`, its token is returned
    /// without issuing a new one.
    pub async fn refresh(&self, http: &reqwest::Client, stale: &str) -> Result<String, ClioError> {
        let _guard = self.refresh_lock.lock().await;
        {
            let current = self.current.read().await;
            if current.as_str() != stale {
                return Ok(current.clone());
            }
        }

        let token = self.issue(http).await?;
        *self.current.write().await = token.clone();
        Ok(token)
    }

    async fn issue(&self, http: &reqwest::Client) -> Result<String, ClioError> {
        let identity = self.identity.identity_token().await?;
        let token = exchange_identity_token(http, &self.server, &self.app_id, &identity).await?;
        if let Some(path) = &self.cache_path {
            write_cached_token(path, &token).await?;
        }
        tracing::info!("Issued long-lived FlyEM token");
        Ok(token)
    }
}

/// Issue a new long-lived token and write it to the token cache, ignoring
/// any token already configured or cached.
pub async fn issue_token(config: &ClientConfig) -> Result<String, ClioError> {
    let server = normalize_server_url(&config.server, config.allow_insecure_http)?;
    let http = config.http_client()?;
    let mut manager = TokenManager::new(String::new(), &server, &config.app_id, config.identity.clone());
    manager.cache_path = Some(config.token_cache.clone());
    manager.issue(&http).await
}
