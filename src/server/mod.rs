//! Per-agent protocol server and the front-end gateway.
//!
//! An [`AgentServer`] is one agent's complete request surface: auth
//! middleware, the agent card, and the JSON-RPC methods `message/send`,
//! `message/stream` (SSE) and `tasks/get`, all executed through the agent's
//! [`MessageProcessor`]. The [`Gateway`] is the thin HTTP front-end that
//! feeds every request into [`HandlerRegistry::dispatch`].

pub mod auth;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::a2a::{
    AgentCard, JsonRpcId, JsonRpcRequest, JsonRpcResponse, MessageSendParams, SendMessageResult,
    TaskQueryParams, AGENT_CARD_PATH,
};
use crate::errors::{RouterError, RouterResult};
use crate::processor::{MessageBackend, MessageProcessor};
use crate::registry::{HandlerRegistry, RequestHandler};
use crate::tasks::TaskHandle;

pub use auth::{AuthContext, AuthError, AuthExtractor, HeaderAuthExtractor, NoAuthExtractor};

/// Largest accepted JSON-RPC request body.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Request handler for a single agent.
pub struct AgentServer {
    processor: MessageProcessor,
    card: AgentCard,
    auth: Arc<dyn AuthExtractor>,
}

impl AgentServer {
    /// Builds the server for `backend`, described by `card`.
    ///
    /// Fails on a malformed descriptor; the registry reports that to the
    /// caller instead of installing a half-built handler.
    pub fn new(
        backend: Arc<dyn MessageBackend>,
        tasks: Arc<dyn TaskHandle>,
        card: AgentCard,
        auth: Arc<dyn AuthExtractor>,
    ) -> RouterResult<Self> {
        if card.name.is_empty() {
            return Err(RouterError::InvalidConfiguration {
                field: "card.name".to_string(),
                reason: "agent card has no name".to_string(),
            });
        }
        if card.url.is_empty() {
            return Err(RouterError::InvalidConfiguration {
                field: "card.url".to_string(),
                reason: "agent card has no url".to_string(),
            });
        }
        Ok(Self {
            processor: MessageProcessor::new(backend, tasks),
            card,
            auth,
        })
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    async fn handle_rpc(&self, rpc: JsonRpcRequest) -> Response {
        if let Err(e) = rpc.validate() {
            return e.into_response();
        }
        let id = rpc.id.clone();
        match rpc.method.as_str() {
            "message/send" => match self.parse_params::<MessageSendParams>(rpc.params) {
                Ok(params) => self.message_send(id, params).await,
                Err(e) => e.into_response(),
            },
            "message/stream" => match self.parse_params::<MessageSendParams>(rpc.params) {
                Ok(params) => self.message_stream(id, params).await,
                Err(e) => e.into_response(),
            },
            "tasks/get" => match self.parse_params::<TaskQueryParams>(rpc.params) {
                Ok(params) => self.tasks_get(id, params).await,
                Err(e) => e.into_response(),
            },
            method => RouterError::MethodNotFound(method.to_string()).into_response(),
        }
    }

    fn parse_params<T: serde::de::DeserializeOwned>(
        &self,
        params: Option<serde_json::Value>,
    ) -> RouterResult<T> {
        let params = params.ok_or_else(|| RouterError::InvalidParams("missing params".into()))?;
        serde_json::from_value(params).map_err(|e| RouterError::InvalidParams(e.to_string()))
    }

    async fn message_send(&self, id: Option<JsonRpcId>, params: MessageSendParams) -> Response {
        match self.processor.process(params).await {
            Ok(message) => {
                let result = SendMessageResult::Message(message);
                match serde_json::to_value(&result) {
                    Ok(value) => Json(JsonRpcResponse::success(id, value)).into_response(),
                    Err(e) => RouterError::from(e).into_response(),
                }
            }
            Err(e) => e.into_response(),
        }
    }

    async fn message_stream(&self, id: Option<JsonRpcId>, params: MessageSendParams) -> Response {
        // The token mirrors the caller's connection: dropping the SSE stream
        // (client disconnect included) cancels the detached worker.
        let cancel = CancellationToken::new();
        let subscription = match self
            .processor
            .process_streaming(params, cancel.child_token())
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => return e.into_response(),
        };
        let guard = cancel.drop_guard();

        let stream = subscription.into_stream().map(move |event| {
            let _guard = &guard;
            let payload = serde_json::to_value(&event).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to serialize stream event");
                serde_json::Value::Null
            });
            let response = JsonRpcResponse::success(id.clone(), payload);
            let data = serde_json::to_string(&response).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to encode stream frame");
                String::new()
            });
            Ok::<_, Infallible>(Event::default().data(data))
        });

        Sse::new(stream)
            .keep_alive(
                KeepAlive::new()
                    .interval(Duration::from_secs(30))
                    .text("keep-alive"),
            )
            .into_response()
    }

    async fn tasks_get(&self, id: Option<JsonRpcId>, params: TaskQueryParams) -> Response {
        match self.processor.tasks().get_task(&params.id).await {
            Some(task) => match serde_json::to_value(&task) {
                Ok(value) => Json(JsonRpcResponse::success(id, value)).into_response(),
                Err(e) => RouterError::from(e).into_response(),
            },
            None => RouterError::TaskNotFound { task_id: params.id }.into_response(),
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for AgentServer {
    async fn handle_request(&self, request: Request) -> Response {
        let (mut parts, body) = request.into_parts();

        let auth_ctx = match self.auth.extract(&mut parts).await {
            Ok(auth_ctx) => auth_ctx,
            Err(e) => return e.into_response(),
        };
        tracing::debug!(
            agent = %self.card.name,
            principal = %auth_ctx.principal,
            path = %parts.uri.path(),
            "handling agent request"
        );

        if parts.method == Method::GET {
            if parts.uri.path().ends_with(AGENT_CARD_PATH) {
                return Json(self.card.clone()).into_response();
            }
            return RouterError::MethodNotFound(format!("GET {}", parts.uri.path()))
                .into_response();
        }
        if parts.method != Method::POST {
            return RouterError::InvalidRequest(format!("unsupported method {}", parts.method))
                .into_response();
        }

        let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return RouterError::InvalidRequest(format!("failed to read body: {e}"))
                    .into_response()
            }
        };
        let rpc: JsonRpcRequest = match serde_json::from_slice(&bytes) {
            Ok(rpc) => rpc,
            Err(e) => return RouterError::from(e).into_response(),
        };

        self.handle_rpc(rpc).await
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// HTTP front-end feeding every request into the registry.
pub struct Gateway {
    registry: Arc<HandlerRegistry>,
}

impl Gateway {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Converts the gateway into an axum router.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(dispatch)
            .layer(CorsLayer::permissive())
            .with_state(self.registry)
    }

    /// Binds `addr` and serves until the process is stopped.
    pub async fn serve(self, addr: impl tokio::net::ToSocketAddrs) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("🚀 A2A router listening at http://{local_addr}");
        tracing::info!(agents = self.registry.len().await, "registered agents");
        axum::serve(listener, self.into_router()).await
    }
}

async fn dispatch(State(registry): State<Arc<HandlerRegistry>>, request: Request) -> Response {
    registry.dispatch(request).await
}
