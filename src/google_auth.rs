//! Google OAuth access tokens for the Gmail and Sheets adapters.
//!
//! Two grants are supported, both consuming credential files produced by
//! other tools:
//! - **authorized user** (Gmail): refresh-token grant from a token cache file,
//!   with client id/secret optionally taken from the installed-app secrets.
//! - **service account** (Sheets): RS256-signed JWT bearer grant.
//!
//! Tokens are cached until shortly before they expire.

use std::path::Path;
use std::time::Duration;

use base64::prelude::*;
use chrono::Utc;
use ring::rand::SystemRandom;
use ring::signature::{RSA_PKCS1_SHA256, RsaKeyPair};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AuthError;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Scope for appending rows to spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const JWT_LIFETIME_SECS: i64 = 3600;

// ── Credential file layouts ─────────────────────────────────────────

/// Authorized-user token cache (`token.json`).
#[derive(Debug, Deserialize)]
struct AuthorizedUserFile {
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_uri: Option<String>,
}

/// Installed-app client secrets (`credentials.json`).
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    token_uri: Option<String>,
}

/// Service-account key file.
#[derive(Debug, Deserialize)]
struct ServiceAccountFile {
    client_email: String,
    private_key: String,
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

// ── Token provider ──────────────────────────────────────────────────

enum Grant {
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount {
        client_email: String,
        key_pair: RsaKeyPair,
        scope: String,
    },
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Issues and caches access tokens for one credential.
pub struct TokenProvider {
    /// Label used in error messages ("gmail", "sheets").
    provider: &'static str,
    grant: Grant,
    token_uri: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Build a refresh-token provider from the token cache, falling back to
    /// the client secrets file for the client id and secret.
    pub fn authorized_user(
        token_path: &Path,
        credentials_path: &Path,
        http: reqwest::Client,
    ) -> Result<Self, AuthError> {
        let token: AuthorizedUserFile = read_json(token_path)?;
        let refresh_token = token
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::CredentialFile {
                path: token_path.display().to_string(),
                reason: "no refresh_token; authorize the account first".into(),
            })?;

        let (client_id, client_secret, token_uri) = match (token.client_id, token.client_secret)
        {
            (Some(id), Some(secret)) => (id, secret, token.token_uri),
            _ => {
                let secrets: ClientSecretsFile = read_json(credentials_path)?;
                let app = secrets.installed.or(secrets.web).ok_or_else(|| {
                    AuthError::CredentialFile {
                        path: credentials_path.display().to_string(),
                        reason: "expected an \"installed\" or \"web\" client".into(),
                    }
                })?;
                (
                    app.client_id,
                    app.client_secret,
                    token.token_uri.or(app.token_uri),
                )
            }
        };

        Ok(Self {
            provider: "gmail",
            grant: Grant::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            },
            token_uri: token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URL.into()),
            http,
            cached: Mutex::new(None),
        })
    }

    /// Build a JWT-bearer provider from a service-account key file.
    pub fn service_account(
        key_path: &Path,
        scope: &str,
        http: reqwest::Client,
    ) -> Result<Self, AuthError> {
        let key: ServiceAccountFile = read_json(key_path)?;
        let der = pem_to_der(&key.private_key)?;
        let key_pair = RsaKeyPair::from_pkcs8(&der)
            .map_err(|e| AuthError::SigningKey(format!("not an RSA PKCS#8 key: {e}")))?;

        Ok(Self {
            provider: "sheets",
            grant: Grant::ServiceAccount {
                client_email: key.client_email,
                key_pair,
                scope: scope.to_string(),
            },
            token_uri: key.token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URL.into()),
            http,
            cached: Mutex::new(None),
        })
    }

    /// Point the grant at a different token endpoint.
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    /// A valid access token, fetching a new one when the cache is stale.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.expires_at
        {
            return Ok(token.value.clone());
        }

        let response = self.request_token().await?;
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        let expires_at = Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN);
        tracing::debug!(provider = self.provider, "Access token refreshed");

        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at,
        });
        Ok(response.access_token)
    }

    /// Drop the cached token so the next call performs a fresh grant.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn request_token(&self) -> Result<TokenResponse, AuthError> {
        let params: Vec<(&str, String)> = match &self.grant {
            Grant::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => vec![
                ("client_id", client_id.clone()),
                ("client_secret", client_secret.clone()),
                ("refresh_token", refresh_token.clone()),
                ("grant_type", "refresh_token".into()),
            ],
            Grant::ServiceAccount {
                client_email,
                key_pair,
                scope,
            } => vec![
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:jwt-bearer".into(),
                ),
                (
                    "assertion",
                    signed_jwt(key_pair, client_email, scope, &self.token_uri)?,
                ),
            ],
        };

        let response = self
            .http
            .post(&self.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_client_error() {
                AuthError::GrantRejected {
                    provider: self.provider.to_string(),
                    reason: format!("{status}: {body}"),
                }
            } else {
                AuthError::Unavailable(format!("{status}: {body}"))
            });
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("parse token response: {e}")))
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, AuthError> {
    let file_error = |reason: String| AuthError::CredentialFile {
        path: path.display().to_string(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| file_error(e.to_string()))
}

/// Decode the base64 body of a PEM block.
fn pem_to_der(pem: &str) -> Result<Vec<u8>, AuthError> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("-----"))
        .collect();
    BASE64_STANDARD
        .decode(body)
        .map_err(|e| AuthError::SigningKey(format!("invalid PEM: {e}")))
}

/// Build and sign the JWT assertion for the service-account grant.
fn signed_jwt(
    key_pair: &RsaKeyPair,
    client_email: &str,
    scope: &str,
    audience: &str,
) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    let header = serde_json::json!({ "alg": "RS256", "typ": "JWT" });
    let claims = serde_json::json!({
        "iss": client_email,
        "scope": scope,
        "aud": audience,
        "iat": now,
        "exp": now + JWT_LIFETIME_SECS,
    });

    let signing_input = format!(
        "{}.{}",
        BASE64_URL_SAFE_NO_PAD.encode(header.to_string()),
        BASE64_URL_SAFE_NO_PAD.encode(claims.to_string()),
    );

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &RSA_PKCS1_SHA256,
            &SystemRandom::new(),
            signing_input.as_bytes(),
            &mut signature,
        )
        .map_err(|_| AuthError::SigningKey("RSA signing failed".into()))?;

    Ok(format!(
        "{signing_input}.{}",
        BASE64_URL_SAFE_NO_PAD.encode(signature)
    ))
}
