//! Error types for the router core.
//!
//! Routing errors (bad path, unknown agent) render as plain-text HTTP
//! responses with the exact bodies the dispatch contract promises. Everything
//! else renders as a JSON-RPC error envelope so protocol callers always get a
//! well-formed reply.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    // === Routing errors ===
    #[error("Agent namespace not provided")]
    NamespaceMissing,

    #[error("Agent name not provided")]
    NameMissing,

    #[error("Agent {key} not found")]
    AgentNotFound { key: String },

    // === Registration errors ===
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Handler construction failed for {key}: {reason}")]
    HandlerConstruction { key: String, reason: String },

    // === Processing errors ===
    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Network error: {operation}: {reason}")]
    Network { operation: String, reason: String },

    #[error("Serialization error: {format}: {reason}")]
    Serialization { format: String, reason: String },

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Invalid JSON-RPC request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    // === Task management errors ===
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Invalid task state transition: {from} -> {to}")]
    InvalidTaskStateTransition { from: String, to: String },

    // === Registrar errors ===
    #[error("Inventory sync failed: {0}")]
    SyncFailed(String),

    // === General system errors ===
    #[error("Internal error: {component}: {reason}")]
    Internal { component: String, reason: String },
}

/// Convenience type alias
pub type RouterResult<T> = std::result::Result<T, RouterError>;

impl From<serde_json::Error> for RouterError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            format: "json".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for RouterError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network {
            operation: "http_request".to_string(),
            reason: error.to_string(),
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        // Routing errors carry their exact message as a plain-text body.
        match self {
            Self::NamespaceMissing | Self::NameMissing => {
                return (StatusCode::BAD_REQUEST, self.to_string()).into_response();
            }
            Self::AgentNotFound { .. } => {
                return (StatusCode::NOT_FOUND, self.to_string()).into_response();
            }
            _ => {}
        }

        let (status, code) = match &self {
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, -32600),
            Self::MethodNotFound(_) => (StatusCode::NOT_FOUND, -32601),
            Self::InvalidParams(_)
            | Self::MissingInput(_)
            | Self::InvalidConfiguration { .. }
            | Self::InvalidTaskStateTransition { .. } => (StatusCode::BAD_REQUEST, -32602),
            Self::Serialization { .. } => (StatusCode::BAD_REQUEST, -32700),
            Self::TaskNotFound { .. } => (StatusCode::NOT_FOUND, -32001),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, -32603),
        };

        let body = Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": code,
                "message": self.to_string(),
            },
            "id": null,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_error_messages_match_dispatch_contract() {
        assert_eq!(
            RouterError::NamespaceMissing.to_string(),
            "Agent namespace not provided"
        );
        assert_eq!(
            RouterError::NameMissing.to_string(),
            "Agent name not provided"
        );
        let err = RouterError::AgentNotFound {
            key: "default/echo".to_string(),
        };
        assert_eq!(err.to_string(), "Agent default/echo not found");
    }

    #[test]
    fn error_to_string_contains_context() {
        let err = RouterError::HandlerConstruction {
            key: "default/echo".into(),
            reason: "agent card has no name".into(),
        };
        let message = err.to_string();
        assert!(message.contains("default/echo"));
        assert!(message.contains("no name"));
    }
}
