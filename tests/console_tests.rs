//! Console API integration tests.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use replyd::history::ReplyStatus;
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::test_app;

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

fn json_request(uri: &str, method: Method, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app().await;

    let response = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_list_conversations() {
    let app = test_app().await;
    app.repo.add_message("+15550001", "user", "hello", Some(11)).await.unwrap();
    app.repo.add_message("+15550001", "assistant", "hi there", None).await.unwrap();
    app.repo.add_call("+15550001", 5, Some(8), 150, None).await.unwrap();

    let response = app.router.oneshot(get("/conversations")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["peer"], "+15550001");
    assert_eq!(list[0]["message_count"], 2);
    assert!(list[0]["last_call_error"].is_null());
}

#[tokio::test]
async fn test_get_conversation_messages() {
    let app = test_app().await;
    app.repo.add_message("+15550001", "user", "hello", Some(11)).await.unwrap();
    app.repo.add_message("+15550001", "assistant", "hi there", None).await.unwrap();

    let response = app
        .router
        .oneshot(get("/conversations/+15550001/messages"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let messages = json.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["content"], "hi there");
}

#[tokio::test]
async fn test_unknown_conversation_is_404() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(get("/conversations/+19990000/messages"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_clear_conversation() {
    let app = test_app().await;
    app.repo.add_message("+15550001", "user", "hello", Some(11)).await.unwrap();
    app.registry.restore("+15550001", 11, Vec::new());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/conversations/+15550001")
                .method(Method::DELETE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["cleared"], "+15550001");

    assert!(app.repo.messages_for_peer("+15550001", None).await.unwrap().is_empty());
    assert!(app.registry.history("+15550001").is_empty());
    // The cursor survives so answered messages are not replayed.
    assert_eq!(app.registry.last_seen("+15550001"), Some(11));
}

#[tokio::test]
async fn test_list_replies_and_calls() {
    let app = test_app().await;
    app.repo
        .add_reply("+15550001", "hi there", 11, ReplyStatus::Sent, None)
        .await
        .unwrap();
    app.repo
        .add_call("+15550001", 5, Some(8), 210, None)
        .await
        .unwrap();

    let response = app.router.clone().oneshot(get("/replies")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let replies = body_json(response).await;
    assert_eq!(replies[0]["status"], "sent");
    assert_eq!(replies[0]["in_reply_to"], 11);

    let response = app.router.oneshot(get("/calls?limit=10")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let calls = body_json(response).await;
    assert_eq!(calls[0]["latency_ms"], 210);
}

#[tokio::test]
async fn test_get_config_redacts_api_key() {
    let app = test_app().await;

    let response = app.router.oneshot(get("/config")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["api_key_set"], true);
    assert!(json.get("api_key").is_none());
    assert_eq!(json["model_name"], "deepseek-chat");
}

#[tokio::test]
async fn test_update_config_partial() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(json_request(
            "/config",
            Method::PUT,
            json!({"model_name": "gpt-4o-mini", "temperature": 0.7}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["model_name"], "gpt-4o-mini");
    assert_eq!(json["temperature"], 0.7);
    // Untouched fields keep their values.
    assert_eq!(json["max_history"], 10);

    let active = app.settings.snapshot().await;
    assert_eq!(active.model_name, "gpt-4o-mini");
}

#[tokio::test]
async fn test_invalid_config_rejected_and_prior_kept() {
    let app = test_app().await;
    let before = app.settings.snapshot().await;

    let response = app
        .router
        .oneshot(json_request(
            "/config",
            Method::PUT,
            json!({"temperature": 9.0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(app.settings.snapshot().await, before);
}

#[tokio::test]
async fn test_config_test_endpoint() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(json_request(
            "/config/test",
            Method::POST,
            json!({"message": "ping"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["reply"], "stub reply");
    assert!(json["latency_ms"].is_number());
}

#[tokio::test]
async fn test_config_test_does_not_save_candidate() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(json_request(
            "/config/test",
            Method::POST,
            json!({"api_key": "bad-key"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The rejected candidate never became the active config.
    assert_eq!(app.settings.snapshot().await.api_key, "test-key");
}
