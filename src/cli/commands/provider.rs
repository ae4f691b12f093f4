//! Identity provider options: trusted issuer, management API credentials and
//! upstream tuning.

use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;
use crate::authorizer::{endpoint_base, issuer_from_domain, ManagementCredentials};

pub const ARG_DOMAIN: &str = "domain";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_CLIENT_ID: &str = "client-id";
pub const ARG_CLIENT_SECRET: &str = "client-secret";
pub const ARG_AUDIENCE: &str = "audience";
pub const ARG_JWKS_CACHE_TTL: &str = "jwks-cache-ttl";
pub const ARG_UPSTREAM_TIMEOUT: &str = "upstream-timeout";

#[derive(Debug, Clone)]
pub struct Options {
    /// Compared verbatim with the token `iss`.
    pub issuer: String,
    pub credentials: ManagementCredentials,
    pub jwks_cache_ttl: Duration,
    pub upstream_timeout: Duration,
}

impl Options {
    /// Parse provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing or the issuer is not a valid URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let issuer = match (get_non_empty(ARG_ISSUER), get_non_empty(ARG_DOMAIN)) {
            (Some(issuer), _) => {
                let issuer = issuer.trim().to_string();
                endpoint_base(&issuer)?;
                issuer
            }
            (None, Some(domain)) => issuer_from_domain(&domain)?.to_string(),
            (None, None) => anyhow::bail!("missing required argument: --{ARG_DOMAIN}"),
        };

        let Some(client_id) = get_non_empty(ARG_CLIENT_ID) else {
            anyhow::bail!("missing required argument: --{ARG_CLIENT_ID}");
        };
        let Some(client_secret) = get_non_empty(ARG_CLIENT_SECRET) else {
            anyhow::bail!("missing required argument: --{ARG_CLIENT_SECRET}");
        };

        Ok(Self {
            issuer,
            credentials: ManagementCredentials {
                client_id,
                client_secret: SecretString::from(client_secret),
                audience: get_non_empty(ARG_AUDIENCE),
            },
            jwks_cache_ttl: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_JWKS_CACHE_TTL)
                    .copied()
                    .unwrap_or(300),
            ),
            upstream_timeout: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_UPSTREAM_TIMEOUT)
                    .copied()
                    .unwrap_or(3),
            ),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DOMAIN)
                .long(ARG_DOMAIN)
                .help("Identity provider domain, example: tenant.eu.auth0.com")
                .long_help(
                    "Identity provider domain. The trusted issuer is https://<domain>/ and keys are fetched from\nhttps://<domain>/.well-known/jwks.json.",
                )
                .env("GATEKEEPER_DOMAIN")
                .required_unless_present(ARG_ISSUER),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Trusted issuer URL, matched verbatim against the token iss; overrides --domain")
                .env("GATEKEEPER_ISSUER"),
        )
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long(ARG_CLIENT_ID)
                .help("Management API client id")
                .env("GATEKEEPER_CLIENT_ID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CLIENT_SECRET)
                .long(ARG_CLIENT_SECRET)
                .help("Management API client secret")
                .env("GATEKEEPER_CLIENT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_AUDIENCE)
                .long(ARG_AUDIENCE)
                .help("Management API audience (default: <issuer>/api/v2/)")
                .env("GATEKEEPER_AUDIENCE"),
        )
        .arg(
            Arg::new(ARG_JWKS_CACHE_TTL)
                .long(ARG_JWKS_CACHE_TTL)
                .help("Seconds a fetched key set is reused, 0 fetches it on every request")
                .default_value("300")
                .env("GATEKEEPER_JWKS_CACHE_TTL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_UPSTREAM_TIMEOUT)
                .long(ARG_UPSTREAM_TIMEOUT)
                .help("Timeout in seconds for every upstream call")
                .default_value("3")
                .env("GATEKEEPER_UPSTREAM_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
