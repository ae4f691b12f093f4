//! # Gatekeeper (bearer token authorizer)
//!
//! `gatekeeper` answers API gateway "TOKEN" authorizer requests. Each request
//! carries an `Authorization` header value and the ARN of the method being
//! invoked; the answer is either an Allow policy document or an opaque
//! `Unauthorized`.
//!
//! ## Verification chain
//!
//! Tokens are RS256 JWTs minted by a remote identity provider. A token is
//! allowed only when, in order:
//!
//! 1. it decodes structurally,
//! 2. its `iss` equals the configured trusted issuer exactly,
//! 3. its `kid` resolves in the provider's JWKS (cached, refreshed on unknown `kid`),
//! 4. its signature, `exp` and `nbf` verify,
//! 5. its `sub` still exists in the provider's user directory and, when a
//!    database is configured, the local user record is `ACTIVE`.
//!
//! Any failure is logged with the stage that failed and collapsed into a single
//! `Unauthorized` so callers learn nothing about which check tripped.

pub mod authorizer;
pub mod cli;
pub mod gatekeeper;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
