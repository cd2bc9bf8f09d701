//! Reflection client against a live server

use std::sync::Arc;

use axum::{Json, Router, http::StatusCode, routing::post};
use reflect_gateway::api::{self, ApiState};
use reflect_gateway::db::TurnRepo;
use reflect_gateway::{Error, HttpReflectionClient, ReflectionClient, ReflectionEngine, Tone};
use tokio::net::TcpListener;

mod common;
use common::{StubEngine, setup_test_db};

/// Serve `router` on an ephemeral port, returning its base URL
async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_round_trip_issues_and_reuses_identity() {
    let db = setup_test_db();
    let engine: Arc<dyn ReflectionEngine> =
        Arc::new(StubEngine::answering(Tone::Anxious, "That sounds stressful."));
    let base = spawn_server(api::router(ApiState::new(db.clone(), Some(engine)), None)).await;
    let client = HttpReflectionClient::new(&base).unwrap();

    let first = client
        .reflect("I have an exam tomorrow", None)
        .await
        .unwrap();
    assert_eq!(first.tone, Tone::Anxious);
    assert_eq!(first.reply, "That sounds stressful.");
    assert!(!first.identity.is_empty());

    let second = client
        .reflect("and I haven't slept", Some(&first.identity))
        .await
        .unwrap();
    assert_eq!(second.identity, first.identity);

    let turns = TurnRepo::new(db).list_for_user(&first.identity).unwrap();
    assert_eq!(turns.len(), 2);
}

#[tokio::test]
async fn test_server_error_is_failure() {
    let db = setup_test_db();
    let engine: Arc<dyn ReflectionEngine> = Arc::new(StubEngine::failing());
    let base = spawn_server(api::router(ApiState::new(db, Some(engine)), None)).await;
    let client = HttpReflectionClient::new(&base).unwrap();

    let err = client.reflect("nothing works today", None).await.unwrap_err();
    match err {
        Error::Reflection(message) => assert!(message.contains("Failed to process reflection")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_incomplete_payload_is_failure() {
    let router = Router::new().route(
        "/api/reflect",
        post(|| async {
            (
                StatusCode::OK,
                Json(serde_json::json!({ "response": "Hello", "userId": "u1" })),
            )
        }),
    );
    let base = spawn_server(router).await;
    let client = HttpReflectionClient::new(&base).unwrap();

    assert!(client.reflect("a perfectly fine sentence", None).await.is_err());
}

#[tokio::test]
async fn test_unreachable_server_is_failure() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpReflectionClient::new(&format!("http://{addr}")).unwrap();
    assert!(client.reflect("is anybody there", None).await.is_err());
}
