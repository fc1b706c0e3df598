// =============================================================================
// Bearer token gate for the admin-facing endpoints
// =============================================================================
//
// Screen/recommend requests must carry `Authorization: Bearer <token>`
// matching whatever value is stored in the admin token env var (named by
// `SCREENER_ADMIN_TOKEN_ENV`, defaulting to `SCREENER_ADMIN_TOKEN`). Wire it
// in as an Axum extractor:
//
//   async fn handler(AuthBearer(token): AuthBearer, ...) { ... }
//
// A missing, malformed, or wrong token short-circuits to a 403 before the
// handler body runs.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

const DEFAULT_ENV_VAR: &str = "SCREENER_ADMIN_TOKEN";

/// Byte-for-byte equality that doesn't branch on where the first mismatch
/// occurs, so a timing attacker can't use response latency to recover the
/// token one byte at a time. Every position up to the longer slice's length
/// gets folded in, missing positions standing in as zero.
fn tokens_match(provided: &[u8], expected: &[u8]) -> bool {
    let len_diff = (provided.len() != expected.len()) as u8;
    let longest = provided.len().max(expected.len());

    let byte_diff = (0..longest).fold(0u8, |acc, i| {
        let p = provided.get(i).copied().unwrap_or(0);
        let e = expected.get(i).copied().unwrap_or(0);
        acc | (p ^ e)
    });

    len_diff == 0 && byte_diff == 0
}

fn admin_token_env_var() -> String {
    std::env::var("SCREENER_ADMIN_TOKEN_ENV").unwrap_or_else(|_| DEFAULT_ENV_VAR.to_string())
}

/// Holds the bearer token once it has passed validation, in case a handler
/// wants it for logging or an audit trail.
pub struct AuthBearer(pub String);

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

fn forbidden(message: &'static str) -> AuthRejection {
    AuthRejection {
        status: StatusCode::FORBIDDEN,
        message,
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    header.strip_prefix("Bearer ")
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let env_var = admin_token_env_var();
        let expected = std::env::var(&env_var).unwrap_or_default();

        // Read fresh on every request: rotating the env var doesn't need a
        // process restart to take effect.
        if expected.is_empty() {
            warn!(env_var, "admin token env var is not set, rejecting all authenticated requests");
            return Err(forbidden("Server authentication not configured"));
        }

        let Some(token) = bearer_token(parts) else {
            warn!("request has no Bearer authorization header");
            return Err(forbidden("Missing or invalid authorization token"));
        };

        if !tokens_match(token.as_bytes(), expected.as_bytes()) {
            warn!("rejected request with a non-matching admin token");
            return Err(forbidden("Invalid authorization token"));
        }

        Ok(AuthBearer(token.to_string()))
    }
}
