//! User directory lookups against the identity provider's management API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info_span, Instrument};
use url::Url;

use super::endpoint_base;

/// Refresh the management token this long before the provider says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{endpoint} returned {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },
    #[error("invalid directory url: {0}")]
    Url(#[from] url::ParseError),
    #[error("users endpoint returned a non-object body")]
    UnexpectedBody,
    #[error("invalid user document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The slice of a provider user record the authorizer asks for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DirectoryUser {
    #[serde(default)]
    pub user_metadata: Value,
}

/// Read-only lookup of a subject in the user directory.
///
/// `Ok(None)` means the directory answered and the subject does not exist;
/// errors mean the directory could not answer.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, subject: &str) -> Result<Option<DirectoryUser>, DirectoryError>;
}

/// Client credentials for the management API.
#[derive(Debug, Clone)]
pub struct ManagementCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Defaults to `<issuer>/api/v2/`.
    pub audience: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

const fn default_expires_in() -> u64 {
    86_400
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

/// [`UserDirectory`] backed by the provider's management API.
#[derive(Debug)]
pub struct ManagementDirectory {
    client: Client,
    token_url: Url,
    users_url: Url,
    audience: String,
    credentials: ManagementCredentials,
    token_cache: RwLock<Option<CachedToken>>,
}

impl ManagementDirectory {
    /// Derive the token and users endpoints from the trusted issuer.
    ///
    /// # Errors
    ///
    /// Returns an error if `issuer` is not an absolute URL.
    pub fn new(
        issuer: &str,
        client: Client,
        credentials: ManagementCredentials,
    ) -> Result<Self, DirectoryError> {
        let issuer = endpoint_base(issuer)?;
        let api_base = issuer.join("api/v2/")?;
        let audience = credentials
            .audience
            .clone()
            .unwrap_or_else(|| api_base.to_string());

        Ok(Self {
            client,
            token_url: issuer.join("oauth/token")?,
            users_url: api_base.join("users/")?,
            audience,
            credentials,
            token_cache: RwLock::new(None),
        })
    }

    /// Return a cached management token or request a new one.
    async fn access_token(&self) -> Result<SecretString, DirectoryError> {
        if let Some(cached) = self.token_cache.read().await.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let span = info_span!("directory.token", http.method = "POST", url = %self.token_url);
        let body = json!({
            "grant_type": "client_credentials",
            "client_id": self.credentials.client_id,
            "client_secret": self.credentials.client_secret.expose_secret(),
            "audience": self.audience,
        });
        let response = self
            .client
            .post(self.token_url.clone())
            .json(&body)
            .send()
            .instrument(span)
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                endpoint: "token endpoint",
                status,
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let cached = CachedToken {
            token: SecretString::from(token.access_token),
            expires_at: Instant::now() + lifetime,
        };
        debug!(expires_in = token.expires_in, "management token acquired");

        let secret = cached.token.clone();
        *self.token_cache.write().await = Some(cached);
        Ok(secret)
    }
}

#[async_trait]
impl UserDirectory for ManagementDirectory {
    async fn find_user(&self, subject: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        let token = self.access_token().await?;

        let mut url = self.users_url.clone();
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(subject);
        url.query_pairs_mut()
            .append_pair("fields", "user_metadata")
            .append_pair("include_fields", "true");

        let span = info_span!("directory.user", http.method = "GET", subject = %subject);
        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .instrument(span)
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED => {
                // revoked or rotated credentials: the next lookup fetches a new token
                self.token_cache.write().await.take();
                Err(DirectoryError::Status {
                    endpoint: "users endpoint",
                    status: StatusCode::UNAUTHORIZED,
                })
            }
            status if status.is_success() => match response.json::<Value>().await? {
                user @ Value::Object(_) => Ok(Some(serde_json::from_value(user)?)),
                _ => Err(DirectoryError::UnexpectedBody),
            },
            status => Err(DirectoryError::Status {
                endpoint: "users endpoint",
                status,
            }),
        }
    }
}
