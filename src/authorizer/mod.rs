//! Bearer token authorization.
//!
//! [`TokenAuthorizer`] runs the verification chain
//! `decode -> issuer -> key -> signature -> subject` and either returns an
//! Allow [`AccessDecision`] or fails closed with [`Unauthorized`]. Its
//! collaborators (key set, user directory, optional user records) are
//! injected at construction.

pub mod directory;
pub mod error;
pub mod jwks;
pub mod policy;
pub mod records;
pub mod token;

#[cfg(test)]
pub(crate) mod testutil;

pub use directory::{DirectoryUser, ManagementCredentials, ManagementDirectory, UserDirectory};
pub use error::{AuthorizerError, Unauthorized};
pub use jwks::{Jwk, Jwks, KeySetCache};
pub use policy::{AccessDecision, Effect};
pub use records::{PgUserRecords, UserRecords, UserStatus};

use std::sync::Arc;
use token::DecodedToken;
use tracing::{debug, instrument, warn};
use url::Url;

/// Literal prefix gateways put in front of the credential.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Build the trusted issuer URL (`https://<domain>/`) from a provider domain.
///
/// # Errors
///
/// Returns an error if the domain does not form a valid URL.
pub fn issuer_from_domain(domain: &str) -> Result<Url, url::ParseError> {
    let domain = domain
        .trim()
        .trim_start_matches("https://")
        .trim_end_matches('/');
    Url::parse(&format!("https://{domain}/"))
}

/// Base URL the provider endpoints hang off: the issuer with a trailing `/`,
/// so joining never drops the last path segment.
///
/// # Errors
///
/// Returns an error if `issuer` is not an absolute URL.
pub fn endpoint_base(issuer: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(issuer)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

/// Well-known JWKS location for an issuer: `<issuer>/.well-known/jwks.json`.
///
/// # Errors
///
/// Returns an error if `issuer` is not an absolute URL.
pub fn jwks_url(issuer: &str) -> Result<Url, url::ParseError> {
    endpoint_base(issuer)?.join(".well-known/jwks.json")
}

/// Strip the optional bearer prefix; `None` when nothing is left.
#[must_use]
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let value = authorization?;
    let token = value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

pub struct TokenAuthorizer {
    issuer: String,
    keys: Arc<KeySetCache>,
    directory: Arc<dyn UserDirectory>,
    records: Option<Arc<dyn UserRecords>>,
}

impl std::fmt::Debug for TokenAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthorizer")
            .field("issuer", &self.issuer)
            .field("jwks_url", &self.keys.url().as_str())
            .field("records", &self.records.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenAuthorizer {
    /// `issuer` is compared byte for byte with the token's `iss`.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        keys: Arc<KeySetCache>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            keys,
            directory,
            records: None,
        }
    }

    /// Additionally require an `ACTIVE` local user record for the subject.
    #[must_use]
    pub fn with_records(mut self, records: Arc<dyn UserRecords>) -> Self {
        self.records = Some(records);
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn keys(&self) -> &KeySetCache {
        &self.keys
    }

    #[must_use]
    pub fn records(&self) -> Option<&dyn UserRecords> {
        self.records.as_deref()
    }

    /// Authorize a request for `resource`.
    ///
    /// `authorization` is the raw header value, with or without the `Bearer `
    /// prefix. On success the decision allows exactly `resource` and carries
    /// the decoded token as JSON under the `user` context key.
    ///
    /// # Errors
    ///
    /// Returns [`Unauthorized`] if any verification stage fails. The failing
    /// stage is logged, never returned.
    #[instrument(skip(self, authorization))]
    pub async fn authorize(
        &self,
        authorization: Option<&str>,
        resource: &str,
    ) -> Result<AccessDecision, Unauthorized> {
        match self.verify(authorization).await {
            Ok(decoded) => {
                let user = serde_json::to_string(&decoded).map_err(|e| {
                    warn!(error = %e, "failed to serialize decoded token");
                    Unauthorized
                })?;
                debug!(sub = ?decoded.claims.sub, "authorization allowed");
                Ok(AccessDecision::allow(resource, user))
            }
            Err(err) => {
                warn!(stage = err.stage(), error = %err, "authorization denied");
                Err(Unauthorized)
            }
        }
    }

    /// Run every verification stage, reporting which one failed.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthorizerError`] of the first stage that fails.
    pub async fn verify(
        &self,
        authorization: Option<&str>,
    ) -> Result<DecodedToken, AuthorizerError> {
        let raw = bearer_token(authorization).ok_or(AuthorizerError::MissingCredential)?;

        let decoded = token::decode(raw).map_err(AuthorizerError::MalformedToken)?;

        if decoded.claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Err(AuthorizerError::UntrustedIssuer(decoded.claims.iss.clone()));
        }

        let kid = decoded
            .kid()
            .ok_or(AuthorizerError::KeyResolutionFailure(None))?;
        let jwk = self.keys.resolve(kid).await?;
        let key = jwk
            .to_rsa_public_key()
            .map_err(AuthorizerError::SignatureOrClaimInvalid)?;

        token::verify_rs256(&decoded, &key, token::now_unix_seconds())
            .map_err(AuthorizerError::SignatureOrClaimInvalid)?;

        let subject = decoded
            .claims
            .sub
            .as_deref()
            .filter(|sub| !sub.trim().is_empty())
            .ok_or_else(|| AuthorizerError::SubjectNotAuthorized("missing sub".to_string()))?;
        self.authorize_subject(subject).await?;

        Ok(decoded)
    }

    async fn authorize_subject(&self, subject: &str) -> Result<(), AuthorizerError> {
        if self.directory.find_user(subject).await?.is_none() {
            return Err(AuthorizerError::SubjectNotAuthorized(format!(
                "{subject} not found in directory"
            )));
        }

        if let Some(records) = &self.records {
            match records.status(subject).await? {
                Some(status) if status.is_permitted() => {}
                Some(status) => {
                    return Err(AuthorizerError::SubjectNotAuthorized(format!(
                        "{subject} record is {status}"
                    )));
                }
                None => {
                    return Err(AuthorizerError::SubjectNotAuthorized(format!(
                        "{subject} has no user record"
                    )));
                }
            }
        }

        Ok(())
    }
}
