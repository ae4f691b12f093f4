//! Compact JWS decoding and RS256 verification.
//!
//! Decoding never trusts the token: it only splits the three segments and
//! parses header and payload so the issuer and `kid` can be inspected before
//! any key is fetched. [`verify_rs256`] is the step that establishes trust.

use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{errors::Error as RsaError, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::time::SystemTime;
use thiserror::Error;

/// The only signing algorithm accepted.
pub const SUPPORTED_ALG: &str = "RS256";

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("rsa error")]
    Rsa(#[from] RsaError),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("missing expiration")]
    MissingExp,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
}

/// Registered claims the authorizer looks at. Everything else in the payload
/// is passed through untouched in [`DecodedToken::payload`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: Option<String>,
    pub sub: Option<String>,
    pub exp: Option<i64>,
    pub nbf: Option<i64>,
    pub email_verified: Option<bool>,
}

/// A token split into its parts. Serializes as `{header, payload, signature}`.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedToken {
    pub header: Map<String, Value>,
    pub payload: Map<String, Value>,
    pub signature: String,
    #[serde(skip)]
    pub claims: Claims,
    #[serde(skip)]
    signing_input: String,
}

impl DecodedToken {
    #[must_use]
    pub fn alg(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }
}

fn b64d_object(segment: &str) -> Result<Map<String, Value>, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| Error::Base64)?;
    match serde_json::from_slice(&bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::TokenFormat),
    }
}

/// Decode a compact JWS without verifying it.
///
/// # Errors
///
/// Returns an error if the token does not have exactly three segments, or if
/// the header or payload is not a base64url encoded JSON object.
pub fn decode(token: &str) -> Result<DecodedToken, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let payload_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let signature = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() || signature.is_empty() {
        return Err(Error::TokenFormat);
    }

    let header = b64d_object(header_b64)?;
    let payload = b64d_object(payload_b64)?;
    let claims: Claims = serde_json::from_value(Value::Object(payload.clone()))?;

    Ok(DecodedToken {
        header,
        payload,
        signature: signature.to_string(),
        claims,
        signing_input: format!("{header_b64}.{payload_b64}"),
    })
}

/// Verify the RS256 signature and the `exp`/`nbf` claims of a decoded token.
///
/// `exp` is mandatory. A token is expired when `now >= exp` and not yet valid
/// when `now < nbf`.
///
/// # Errors
///
/// Returns an error if the algorithm is not RS256, the signature does not
/// verify with `key`, or a time claim fails.
pub fn verify_rs256(
    token: &DecodedToken,
    key: &RsaPublicKey,
    now_unix_seconds: i64,
) -> Result<(), Error> {
    match token.alg() {
        Some(SUPPORTED_ALG) => {}
        other => return Err(Error::UnsupportedAlg(other.unwrap_or("none").to_string())),
    }

    let signature_bytes =
        Base64UrlUnpadded::decode_vec(&token.signature).map_err(|_| Error::Base64)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::InvalidSignature)?;
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(token.signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    let exp = token.claims.exp.ok_or(Error::MissingExp)?;
    if now_unix_seconds >= exp {
        return Err(Error::Expired);
    }
    if let Some(nbf) = token.claims.nbf {
        if now_unix_seconds < nbf {
            return Err(Error::NotYetValid);
        }
    }

    Ok(())
}

/// Unix seconds used for time claim validation.
#[must_use]
pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
