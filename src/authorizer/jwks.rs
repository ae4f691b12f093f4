//! JSON Web Key Set model and the time-bounded key set cache.
//!
//! The identity provider rotates its signing keys and publishes them at
//! `<issuer>/.well-known/jwks.json`. The cache keeps the last fetched set for a
//! TTL and refreshes early when a token names a `kid` the cached set does not
//! know. A refresh that fails is an error: stale sets are never served.

use super::token::Error as TokenError;
use base64ct::{Base64UrlUnpadded, Encoding};
use reqwest::{header::ACCEPT, Client, StatusCode};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, info_span, Instrument};
use url::Url;

/// Default lifetime of a cached key set.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// A set fetched more recently than this is trusted to be current, so an
/// unknown `kid` is rejected without another fetch.
pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("jwks request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("jwks endpoint returned {0}")]
    Status(StatusCode),
    #[error("invalid jwks document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no key with kid {0}")]
    UnknownKid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a JWKS from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not valid JSON or doesn't match the expected JWKS shape.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

/// A single published key. Members other than these (`x5c`, `x5t`, ...) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    /// Build a signing JWK from an `RsaPublicKey`.
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            kid: Some(kid.into()),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: Some(Base64UrlUnpadded::encode_string(
                &public_key.n().to_bytes_be(),
            )),
            e: Some(Base64UrlUnpadded::encode_string(
                &public_key.e().to_bytes_be(),
            )),
        }
    }

    /// Convert this JWK to an `RsaPublicKey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not an RSA key, the modulus or exponent
    /// is missing or not base64url, or the RSA parameters are invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, TokenError> {
        if self.kty != "RSA" {
            return Err(TokenError::UnsupportedKeyType(self.kty.clone()));
        }
        let decode = |value: Option<&String>| -> Result<BigUint, TokenError> {
            let value = value.ok_or(TokenError::Base64)?;
            let bytes = Base64UrlUnpadded::decode_vec(value).map_err(|_| TokenError::Base64)?;
            Ok(BigUint::from_bytes_be(&bytes))
        };
        let n = decode(self.n.as_ref())?;
        let e = decode(self.e.as_ref())?;
        Ok(RsaPublicKey::new(n, e)?)
    }
}

#[derive(Debug, Clone)]
struct CachedKeySet {
    jwks: Arc<Jwks>,
    fetched_at: Instant,
}

impl CachedKeySet {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Remote key set with an in-memory TTL cache.
#[derive(Debug)]
pub struct KeySetCache {
    url: Url,
    client: Client,
    ttl: Duration,
    refresh_cooldown: Duration,
    state: RwLock<Option<CachedKeySet>>,
    /// Serializes fetches so a burst of unknown `kid`s costs one round trip.
    refresh_lock: Mutex<()>,
}

impl KeySetCache {
    #[must_use]
    pub fn new(url: Url, client: Client, ttl: Duration) -> Self {
        Self {
            url,
            client,
            ttl,
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN.min(ttl),
            state: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = cooldown.min(self.ttl);
        self
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Find the key for `kid`, fetching the key set when the cache is stale or
    /// when `kid` is unknown to a set older than the refresh cooldown.
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::UnknownKid`] if no key matches after the refresh
    /// policy ran, and any other variant if the fetch failed.
    pub async fn resolve(&self, kid: &str) -> Result<Jwk, JwksError> {
        let snapshot = self.state.read().await.clone();

        if let Some(cached) = snapshot.as_ref().filter(|c| c.is_fresh(self.ttl)) {
            if let Some(jwk) = cached.jwks.find_by_kid(kid) {
                return Ok(jwk.clone());
            }
            if cached.fetched_at.elapsed() < self.refresh_cooldown {
                debug!(kid = %kid, "kid unknown to a just-fetched key set");
                return Err(JwksError::UnknownKid(kid.to_string()));
            }
        }

        let jwks = self.refresh(snapshot.map(|c| c.fetched_at)).await?;
        jwks.find_by_kid(kid)
            .cloned()
            .ok_or_else(|| JwksError::UnknownKid(kid.to_string()))
    }

    /// Make sure a fresh key set is available, fetching it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key set cannot be fetched.
    pub async fn check(&self) -> Result<(), JwksError> {
        self.refresh(None).await.map(|_| ())
    }

    /// Fetch the key set unless another caller already replaced the one
    /// observed at `observed` with a fresh set while we waited for the lock.
    async fn refresh(&self, observed: Option<Instant>) -> Result<Arc<Jwks>, JwksError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(cached) = self.state.read().await.as_ref() {
            if Some(cached.fetched_at) != observed && cached.is_fresh(self.ttl) {
                return Ok(cached.jwks.clone());
            }
        }

        let jwks = Arc::new(fetch_jwks(&self.client, &self.url).await?);
        *self.state.write().await = Some(CachedKeySet {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        info!(keys = jwks.keys.len(), "jwks cache refreshed");

        Ok(jwks)
    }
}

/// Fetch and parse the JWKS document.
async fn fetch_jwks(client: &Client, url: &Url) -> Result<Jwks, JwksError> {
    let span = info_span!("jwks.fetch", http.method = "GET", url = %url);
    async {
        let response = client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(JwksError::Status(status));
        }
        let body = response.text().await?;
        Ok(Jwks::from_json(&body)?)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::authorizer::testutil::{jwks, public_key};
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JWKS_PATH: &str = "/.well-known/jwks.json";

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn cache_for(server: &MockServer, ttl: Duration) -> KeySetCache {
        let url = Url::parse(&format!("{}{JWKS_PATH}", server.uri())).unwrap();
        KeySetCache::new(url, Client::new(), ttl)
    }

    #[test]
    fn parses_provider_document_with_extra_members() {
        let document = json!({
            "keys": [
                {
                    "kty": "RSA",
                    "use": "sig",
                    "n": "sXch",
                    "e": "AQAB",
                    "kid": "abc",
                    "x5t": "thumb",
                    "x5c": ["MIIC"],
                    "alg": "RS256"
                },
                { "kty": "EC", "kid": "ec-1", "crv": "P-256", "x": "x", "y": "y" }
            ]
        });
        let set = Jwks::from_json(&document.to_string()).unwrap();
        assert_eq!(set.keys.len(), 2);
        assert_eq!(set.find_by_kid("abc").unwrap().key_use.as_deref(), Some("sig"));
        assert!(set.find_by_kid("missing").is_none());
    }

    #[test]
    fn rsa_key_round_trips_through_jwk() {
        let set = jwks("k1");
        let key = set.find_by_kid("k1").unwrap().to_rsa_public_key().unwrap();
        assert_eq!(key, public_key());
    }

    #[test]
    fn non_rsa_keys_cannot_verify() {
        let jwk = Jwk {
            kty: "EC".to_string(),
            kid: Some("ec-1".to_string()),
            alg: None,
            key_use: None,
            n: None,
            e: None,
        };
        assert!(matches!(
            jwk.to_rsa_public_key(),
            Err(TokenError::UnsupportedKeyType(_))
        ));
    }

    #[tokio::test]
    async fn serves_from_cache_within_ttl() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks("k1")))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL);
        for _ in 0..3 {
            let jwk = cache.resolve("k1").await.unwrap();
            assert_eq!(jwk.kid.as_deref(), Some("k1"));
        }
    }

    #[tokio::test]
    async fn zero_ttl_fetches_every_time() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks("k1")))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::ZERO);
        cache.resolve("k1").await.unwrap();
        cache.resolve("k1").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_kid_refreshes_once_then_fails() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks("k1")))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL).with_refresh_cooldown(Duration::ZERO);
        cache.resolve("k1").await.unwrap();

        let result = cache.resolve("rotated").await;
        assert!(matches!(result, Err(JwksError::UnknownKid(kid)) if kid == "rotated"));
    }

    #[tokio::test]
    async fn unknown_kid_within_cooldown_does_not_refetch() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks("k1")))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL);
        cache.resolve("k1").await.unwrap();
        assert!(matches!(
            cache.resolve("other").await,
            Err(JwksError::UnknownKid(_))
        ));
    }

    #[tokio::test]
    async fn rotated_key_is_picked_up_on_unknown_kid() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks("k1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks("k2")))
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL).with_refresh_cooldown(Duration::ZERO);
        cache.resolve("k1").await.unwrap();
        let jwk = cache.resolve("k2").await.unwrap();
        assert_eq!(jwk.kid.as_deref(), Some("k2"));
    }

    #[tokio::test]
    async fn upstream_errors_are_not_unknown_kid() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL);
        assert!(matches!(
            cache.resolve("k1").await,
            Err(JwksError::Status(StatusCode::SERVICE_UNAVAILABLE))
        ));
        assert!(cache.check().await.is_err());
    }

    #[tokio::test]
    async fn malformed_document_is_rejected() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL);
        assert!(matches!(
            cache.resolve("k1").await,
            Err(JwksError::Parse(_))
        ));
    }
}
