//! Authentication middleware for per-agent servers.
//!
//! The authenticator is supplied at registry construction by the surrounding
//! service; every per-agent server runs it before touching the protocol
//! conversation.

use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Identity extracted from an inbound request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: String,
}

/// Extracts an [`AuthContext`] from request parts.
#[async_trait::async_trait]
pub trait AuthExtractor: Send + Sync {
    async fn extract(&self, parts: &mut Parts) -> Result<AuthContext, AuthError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Authentication failed: {0}")]
    Failed(String),

    #[error("Insufficient permissions")]
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Header-based extractor for development deployments.
///
/// Reads the principal from `X-Principal`, defaulting to `anonymous`.
#[derive(Debug, Default)]
pub struct HeaderAuthExtractor;

#[async_trait::async_trait]
impl AuthExtractor for HeaderAuthExtractor {
    async fn extract(&self, parts: &mut Parts) -> Result<AuthContext, AuthError> {
        let principal = parts
            .headers
            .get("X-Principal")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("anonymous")
            .to_string();
        Ok(AuthContext { principal })
    }
}

/// Extractor that admits every request.
#[derive(Debug, Default)]
pub struct NoAuthExtractor;

#[async_trait::async_trait]
impl AuthExtractor for NoAuthExtractor {
    async fn extract(&self, _parts: &mut Parts) -> Result<AuthContext, AuthError> {
        Ok(AuthContext {
            principal: "anonymous".to_string(),
        })
    }
}
