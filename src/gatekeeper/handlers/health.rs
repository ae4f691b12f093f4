//! Health report for the authorizer and its upstreams.
//!
//! `/health` fetches the key set when the cache is stale and pings the user
//! records database when the record gate is enabled. Either failing turns the
//! response into a `503`.

use crate::{authorizer::TokenAuthorizer, GIT_COMMIT_HASH};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, warn};

const HEALTH_RECORDS_TIMEOUT_SECONDS: u64 = 2;

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    jwks: String,
    records: String,
}

// axum handler for health
pub async fn health(authorizer: Extension<Arc<TokenAuthorizer>>) -> impl IntoResponse {
    let jwks_healthy = match authorizer.keys().check().await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to fetch key set: {}", err);
            false
        }
    };

    let records = probe_records(&authorizer).await;
    let healthy = jwks_healthy && records != "error";

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        jwks: if jwks_healthy { "ok" } else { "error" }.to_string(),
        records: records.to_string(),
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, Json(health))
}

async fn probe_records(authorizer: &TokenAuthorizer) -> &'static str {
    let Some(records) = authorizer.records() else {
        return "disabled";
    };

    match timeout(
        Duration::from_secs(HEALTH_RECORDS_TIMEOUT_SECONDS),
        records.ping(),
    )
    .await
    {
        Ok(Ok(())) => "ok",
        Ok(Err(err)) => {
            error!("Failed to ping user records: {}", err);
            "error"
        }
        Err(_) => {
            warn!("User records health check timed out");
            "error"
        }
    }
}
