//! Path-based dispatch, handler replacement semantics, and registry
//! behavior under concurrent mutation.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use a2a_router::a2a::{AgentCapabilities, AgentCard};
use a2a_router::registry::{AgentKey, HandlerRegistry, RequestHandler};
use a2a_router::server::NoAuthExtractor;
use a2a_router::tasks::InMemoryTaskHandle;

use common::ScriptedBackend;

/// Handler that answers with a fixed label, so tests can tell which
/// registration served a request.
struct LabeledHandler(&'static str);

#[async_trait::async_trait]
impl RequestHandler for LabeledHandler {
    async fn handle_request(&self, _request: Request) -> Response {
        self.0.into_response()
    }
}

fn registry() -> HandlerRegistry {
    HandlerRegistry::new(
        "/api/a2a",
        Arc::new(NoAuthExtractor),
        Arc::new(InMemoryTaskHandle::new()),
    )
}

fn get(path: &str) -> Request {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn card(name: &str) -> AgentCard {
    AgentCard {
        name: name.to_string(),
        description: "test agent".to_string(),
        url: "http://localhost:9100".to_string(),
        version: "0.1.0".to_string(),
        capabilities: AgentCapabilities {
            streaming: Some(true),
            push_notifications: Some(false),
        },
    }
}

#[tokio::test]
async fn missing_namespace_is_a_400() {
    let registry = registry();
    let response = registry.dispatch(get("/api/a2a")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Agent namespace not provided");
}

#[tokio::test]
async fn missing_name_is_a_400() {
    let registry = registry();
    let response = registry.dispatch(get("/api/a2a/default/")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Agent name not provided");
}

#[tokio::test]
async fn paths_outside_the_base_are_never_routed() {
    let registry = registry();
    // A key that happens to spell out a foreign path must not be reachable
    // through it.
    registry
        .register(&AgentKey::new("other", "x"), Arc::new(LabeledHandler("leak")))
        .await;

    let response = registry.dispatch(get("/other/x/y")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_ne!(body_text(response).await, "leak");

    let response = registry.dispatch(get("/api/a2a/other/x/y")).await;
    assert_eq!(body_text(response).await, "leak");

    // A longer first segment sharing the prefix is still foreign.
    let response = registry.dispatch(get("/api/a2a-admin/other/x")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_agent_is_a_404() {
    let registry = registry();
    let response = registry.dispatch(get("/api/a2a/default/echo")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, "Agent default/echo not found");
}

#[tokio::test]
async fn dispatch_routes_to_the_last_registered_handler() {
    let registry = registry();
    let key = AgentKey::new("default", "echo");

    registry.register(&key, Arc::new(LabeledHandler("one"))).await;
    let response = registry.dispatch(get("/api/a2a/default/echo/rest")).await;
    assert_eq!(body_text(response).await, "one");

    registry.register(&key, Arc::new(LabeledHandler("two"))).await;
    assert_eq!(registry.len().await, 1);
    let response = registry.dispatch(get("/api/a2a/default/echo")).await;
    assert_eq!(body_text(response).await, "two");

    registry.remove_handler(&key).await;
    let response = registry.dispatch(get("/api/a2a/default/echo")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn remove_handler_is_a_noop_for_absent_keys() {
    let registry = registry();
    registry.remove_handler(&AgentKey::new("default", "ghost")).await;
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn set_handler_rejects_a_malformed_descriptor() {
    let registry = registry();
    let key = AgentKey::new("default", "echo");

    registry
        .set_handler(&key, Arc::new(ScriptedBackend::replying(["ok"])), &card("echo"))
        .await
        .unwrap();
    let installed = registry.handler(&key).await.unwrap();

    let mut bad_card = card("echo");
    bad_card.name = String::new();
    let err = registry
        .set_handler(&key, Arc::new(ScriptedBackend::replying(["ok"])), &bad_card)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Handler construction failed"));

    // The previous handler stays installed, untouched.
    let still_installed = registry.handler(&key).await.unwrap();
    assert!(Arc::ptr_eq(&installed, &still_installed));
}

#[tokio::test]
async fn registered_agent_answers_message_send_end_to_end() {
    let registry = registry();
    let key = AgentKey::new("default", "echo");
    registry
        .set_handler(&key, Arc::new(ScriptedBackend::replying(["pong"])), &card("echo"))
        .await
        .unwrap();

    let rpc = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "message/send",
        "params": {
            "message": {
                "kind": "message",
                "messageId": "m1",
                "role": "user",
                "parts": [{ "kind": "text", "text": "ping" }],
            },
        },
        "id": 1,
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/a2a/default/echo")
        .header("Content-Type", "application/json")
        .body(Body::from(rpc.to_string()))
        .unwrap();

    let response = registry.dispatch(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["result"]["parts"][0]["text"], "pong");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mutation_settles_to_last_writer_wins() {
    let registry = Arc::new(registry());
    let writers = 8;
    let rounds = 50;

    let mut handles = Vec::new();
    for writer in 0..writers {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let key = AgentKey::new("stress", format!("agent-{writer}"));
            for round in 0..rounds {
                registry.register(&key, Arc::new(LabeledHandler("live"))).await;
                // Interleave lookups on every key, present or not.
                let probe = format!("/api/a2a/stress/agent-{}", (writer + round) % writers);
                let _ = registry.dispatch(get(&probe)).await;
                if round % 2 == 1 {
                    registry.remove_handler(&key).await;
                }
            }
            // Final op decides the key's fate: rounds is even, so the last
            // round removed the handler.
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Sequential replay of each writer's ops ends with a removal.
    assert_eq!(registry.len().await, 0);
    for writer in 0..writers {
        let response = registry
            .dispatch(get(&format!("/api/a2a/stress/agent-{writer}")))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
