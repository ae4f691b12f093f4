use crate::authorizer::TokenAuthorizer;
use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Only `TOKEN` authorizer events carry a bearer credential.
pub const TOKEN_EVENT: &str = "TOKEN";

/// Gateway TOKEN authorizer event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerEvent {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub authorization_token: Option<String>,
    pub method_arn: String,
}

// axum handler for authorize
#[instrument(skip(authorizer, payload))]
pub async fn authorize(
    authorizer: Extension<Arc<TokenAuthorizer>>,
    payload: Result<Json<AuthorizerEvent>, JsonRejection>,
) -> Response {
    let event = match payload {
        Ok(Json(event)) => event,
        Err(rejection) => {
            debug!("Invalid authorizer event: {}", rejection.body_text());
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    if let Some(kind) = event.kind.as_deref().filter(|kind| *kind != TOKEN_EVENT) {
        debug!("Unsupported authorizer event type: {}", kind);
        return (
            StatusCode::BAD_REQUEST,
            format!("unsupported authorizer type: {kind}"),
        )
            .into_response();
    }

    match authorizer
        .authorize(event.authorization_token.as_deref(), &event.method_arn)
        .await
    {
        Ok(decision) => (StatusCode::OK, Json(decision)).into_response(),
        Err(unauthorized) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": unauthorized.to_string() })),
        )
            .into_response(),
    }
}
