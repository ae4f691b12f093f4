use crate::{
    authorizer::{jwks_url, KeySetCache, ManagementDirectory, PgUserRecords, TokenAuthorizer},
    cli::{commands::provider, telemetry},
    gatekeeper, APP_USER_AGENT,
};
use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub provider: provider::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the HTTP client or database pool cannot be built, or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let timeout = args.provider.upstream_timeout;
    let client = Client::builder()
        .user_agent(APP_USER_AGENT)
        .use_rustls_tls()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let keys = KeySetCache::new(
        jwks_url(&args.provider.issuer)?,
        client.clone(),
        args.provider.jwks_cache_ttl,
    );
    let directory =
        ManagementDirectory::new(&args.provider.issuer, client, args.provider.credentials)?;

    let mut authorizer =
        TokenAuthorizer::new(&args.provider.issuer, Arc::new(keys), Arc::new(directory));

    if let Some(dsn) = &args.dsn {
        // lazy pool: an unreachable database shows up in /health instead of failing startup
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .acquire_timeout(timeout)
            .test_before_acquire(true)
            .connect_lazy(dsn.expose_secret())
            .context("Invalid database connection string")?;
        authorizer = authorizer.with_records(Arc::new(PgUserRecords::new(pool)));
    }

    let result = gatekeeper::new(args.port, Arc::new(authorizer)).await;

    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("issuer", args.provider.issuer.clone()),
        ("client_id", args.provider.credentials.client_id.clone()),
        (
            "audience",
            args.provider
                .credentials
                .audience
                .clone()
                .unwrap_or_else(|| "default".to_string()),
        ),
        (
            "jwks_cache_ttl",
            format!("{}s", args.provider.jwks_cache_ttl.as_secs()),
        ),
        (
            "upstream_timeout",
            format!("{}s", args.provider.upstream_timeout.as_secs()),
        ),
        (
            "records",
            args.dsn
                .as_ref()
                .map_or_else(|| "disabled".to_string(), |dsn| redact_dsn(dsn.expose_secret())),
        ),
    ];

    info!(
        "gatekeeper {} - {}\n\nStartup configuration:{}",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH),
        format_entries(&entries)
    );
}

/// One `\n  key: value` line per entry, values aligned.
fn format_entries(entries: &[(&str, String)]) -> String {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    entries
        .iter()
        .map(|(key, value)| {
            let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
            format!("\n  {key}:{padding} {value}")
        })
        .collect()
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
