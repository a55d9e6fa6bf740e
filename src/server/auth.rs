/// Admin authentication.
///
/// The admin endpoints (sweep, anchoring, contract deploy) are guarded by a
/// single shared bearer token configured at startup. Comparison happens on
/// the raw token string; the token is operator-provisioned, not
/// user-facing.
use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::AppState;

/// Standard error body for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Length check, then a full byte fold; the comparison touches every byte
/// regardless of where the first difference sits, so response timing does
/// not leak a prefix match.
fn token_matches(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Extractor proving the request carried the admin bearer token.
///
/// ```ignore
/// async fn handler(_admin: AdminToken, ...) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AdminToken;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminToken {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("Invalid Authorization format"))?;

        if !token_matches(token, &state.admin_token) {
            return Err(unauthorized("Invalid admin token"));
        }

        Ok(AdminToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches_exact_only() {
        assert!(token_matches("s3cret", "s3cret"));
        assert!(!token_matches("s3cret", "s3creT"));
        assert!(!token_matches("s3cre", "s3cret"));
        assert!(!token_matches("s3cret-longer", "s3cret"));
        assert!(!token_matches("", "s3cret"));
        assert!(token_matches("", ""));
    }
}
