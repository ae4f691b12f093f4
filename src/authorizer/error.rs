//! Authorization failure taxonomy.
//!
//! [`AuthorizerError`] records which stage rejected a request so operators can
//! diagnose denials from the logs. Callers only ever see [`Unauthorized`].

use super::{directory::DirectoryError, jwks::JwksError, records::RecordsError, token};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthorizerError {
    #[error("missing bearer token")]
    MissingCredential,

    #[error("malformed token: {0}")]
    MalformedToken(#[source] token::Error),

    #[error("untrusted issuer: {0:?}")]
    UntrustedIssuer(Option<String>),

    #[error("no signing key for kid {0:?}")]
    KeyResolutionFailure(Option<String>),

    #[error("token rejected: {0}")]
    SignatureOrClaimInvalid(#[source] token::Error),

    #[error("subject not authorized: {0}")]
    SubjectNotAuthorized(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl AuthorizerError {
    /// Stable label of the failing stage, used as a log field.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::MissingCredential => "credential",
            Self::MalformedToken(_) => "decode",
            Self::UntrustedIssuer(_) => "issuer",
            Self::KeyResolutionFailure(_) => "key",
            Self::SignatureOrClaimInvalid(_) => "signature",
            Self::SubjectNotAuthorized(_) => "subject",
            Self::UpstreamUnavailable(_) => "upstream",
        }
    }
}

impl From<JwksError> for AuthorizerError {
    fn from(err: JwksError) -> Self {
        match err {
            JwksError::UnknownKid(kid) => Self::KeyResolutionFailure(Some(kid)),
            other => Self::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<DirectoryError> for AuthorizerError {
    fn from(err: DirectoryError) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }
}

impl From<RecordsError> for AuthorizerError {
    fn from(err: RecordsError) -> Self {
        match err {
            RecordsError::UnknownStatus(status) => {
                Self::SubjectNotAuthorized(format!("unknown record status {status}"))
            }
            other @ RecordsError::Database(_) => Self::UpstreamUnavailable(other.to_string()),
        }
    }
}

/// The single externally visible outcome of a failed authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unauthorized")]
pub struct Unauthorized;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_message_is_opaque() {
        assert_eq!(Unauthorized.to_string(), "Unauthorized");
    }

    #[test]
    fn unknown_kid_maps_to_key_resolution() {
        let err = AuthorizerError::from(JwksError::UnknownKid("k9".to_string()));
        assert!(matches!(err, AuthorizerError::KeyResolutionFailure(Some(ref kid)) if kid == "k9"));
        assert_eq!(err.stage(), "key");
    }

    #[test]
    fn jwks_transport_errors_map_to_upstream() {
        let err = AuthorizerError::from(JwksError::Status(reqwest::StatusCode::BAD_GATEWAY));
        assert_eq!(err.stage(), "upstream");
    }

    #[test]
    fn unknown_record_status_is_a_subject_failure() {
        let err = AuthorizerError::from(RecordsError::UnknownStatus("DELETED".to_string()));
        assert_eq!(err.stage(), "subject");
    }

    #[test]
    fn error_display() {
        let err = AuthorizerError::UntrustedIssuer(Some("https://evil.test/".to_string()));
        assert_eq!(err.to_string(), "untrusted issuer: Some(\"https://evil.test/\")");

        let err = AuthorizerError::SignatureOrClaimInvalid(token::Error::Expired);
        assert_eq!(err.to_string(), "token rejected: token expired");
    }
}
