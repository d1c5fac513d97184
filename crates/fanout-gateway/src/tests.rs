use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use super::{build_relay_gateway_router, resolve_log_limit, RelayGatewayState};
use fanout_engine::FanoutEngine;
use fanout_store::{InMemoryRelayStore, RelayStore};
use fanout_transport::{PostTransport, TransportFailure, TransportResult};
use fanout_types::{
    ForwardRecord, FormattedText, LogKind, LogStatus, MediaRef, MessageId, NewLogEntry, SourceKey,
    TargetCopy,
};

const SOURCE: &str = "-1001";

/// Accepts every call except deletes in channels listed in `reject_deletes`.
struct StubTransport {
    reject_deletes: Vec<String>,
}

#[async_trait]
impl PostTransport for StubTransport {
    async fn copy_post(
        &self,
        _target_channel: &str,
        _source_channel: &str,
        source_message: MessageId,
        _reply_anchor: Option<MessageId>,
    ) -> TransportResult<MessageId> {
        Ok(source_message + 1000)
    }

    async fn edit_post_text(
        &self,
        _channel: &str,
        _message: MessageId,
        _text: &FormattedText,
    ) -> TransportResult<()> {
        Ok(())
    }

    async fn edit_post_caption(
        &self,
        _channel: &str,
        _message: MessageId,
        _caption: &FormattedText,
    ) -> TransportResult<()> {
        Ok(())
    }

    async fn delete_post(&self, channel: &str, _message: MessageId) -> TransportResult<()> {
        if self.reject_deletes.iter().any(|rejected| rejected == channel) {
            return Err(TransportFailure::rejected(
                "400: Bad Request: message to delete not found",
            ));
        }
        Ok(())
    }

    async fn fetch_media_url(&self, media: &MediaRef) -> TransportResult<String> {
        Ok(format!("https://files.test/{}", media.file_id))
    }
}

async fn test_app(reject_deletes: &[&str]) -> (Router, Arc<InMemoryRelayStore>) {
    let store = Arc::new(InMemoryRelayStore::new());
    let transport = Arc::new(StubTransport {
        reject_deletes: reject_deletes.iter().map(|c| c.to_string()).collect(),
    });
    let engine = Arc::new(FanoutEngine::new(store.clone(), transport));
    engine.set_targets(&["-100a", "-100b"]).await.expect("targets");
    let app = build_relay_gateway_router(Arc::new(RelayGatewayState::new(engine, SOURCE)));
    (app, store)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[test]
fn unit_resolve_log_limit_defaults_and_caps() {
    assert_eq!(resolve_log_limit(None), 50);
    assert_eq!(resolve_log_limit(Some("abc")), 50);
    assert_eq!(resolve_log_limit(Some("0")), 50);
    assert_eq!(resolve_log_limit(Some("7")), 7);
    assert_eq!(resolve_log_limit(Some("999999")), 1000);
}

#[tokio::test]
async fn functional_stats_and_config_reflect_store_state() {
    let (app, store) = test_app(&[]).await;
    store.set_running(true).await.expect("running");

    let (status, stats) = send(&app, get("/api/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["is_running"], true);
    assert_eq!(stats["is_paused"], false);
    assert_eq!(stats["counters"]["forwarded"], 0);

    let (status, config) = send(&app, get("/api/config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["source_chat_id"], SOURCE);
    assert_eq!(
        config["target_channels"],
        json!(["-100a", "-100b", "", "", ""])
    );
}

#[tokio::test]
async fn functional_logs_endpoint_is_newest_first_and_limited() {
    let (app, store) = test_app(&[]).await;
    for index in 0..60 {
        store
            .append_log(NewLogEntry::new(
                LogKind::Info,
                LogStatus::Success,
                &SourceKey::new(SOURCE, index),
                format!("entry {index}"),
            ))
            .await
            .expect("append");
    }

    let (_, default_page) = send(&app, get("/api/logs")).await;
    let entries = default_page.as_array().expect("array");
    assert_eq!(entries.len(), 50);
    assert_eq!(entries[0]["message"], "entry 59");

    let (_, small_page) = send(&app, get("/api/logs?limit=2")).await;
    assert_eq!(small_page.as_array().expect("array").len(), 2);
}

#[tokio::test]
async fn functional_channel_update_validates_payload() {
    let (app, store) = test_app(&[]).await;

    let (status, body) = send(
        &app,
        post_json("/api/config/channels", json!({"channels": ["-100c", "", "-100c", "-100d"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channels"], json!(["-100c", "-100d", "", "", ""]));
    assert_eq!(
        store.target_channels().await.expect("slots"),
        vec!["-100c", "-100d", "", "", ""]
    );

    let (status, body) = send(
        &app,
        post_json("/api/config/channels", json!({"channels": "-100c"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_channels");

    let (status, body) = send(
        &app,
        post_json(
            "/api/config/channels",
            json!({"channels": ["a", "b", "c", "d", "e", "f"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "too_many_channels");
}

#[tokio::test]
async fn functional_pause_endpoint_toggles_gate() {
    let (app, store) = test_app(&[]).await;

    let (status, stats) = send(&app, post_json("/api/bot/pause", json!({"paused": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["is_paused"], true);
    assert!(store.is_paused().await.expect("paused"));

    let (_, stats) = send(&app, post_json("/api/bot/pause", json!({"paused": false}))).await;
    assert_eq!(stats["is_paused"], false);
}

#[tokio::test]
async fn functional_delete_endpoint_reports_outcomes() {
    let (app, store) = test_app(&["-100b"]).await;
    store
        .upsert_mapping(
            &SourceKey::new(SOURCE, 7),
            ForwardRecord::new(vec![
                TargetCopy::new("-100a", 70),
                TargetCopy::new("-100b", 71),
            ]),
        )
        .await
        .expect("seed");

    let (status, outcome) = send(&app, post_json("/api/messages/7/delete", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["success_count"], 2);
    assert_eq!(outcome["total_count"], 3);
    assert_eq!(outcome["partial_failure"], true);
    assert_eq!(outcome["remaining_count"], 1);

    let (status, outcome) = send(&app, post_json("/api/messages/8/delete", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(outcome["reason"], "not found in forwarding history");
}

#[tokio::test]
async fn integration_served_router_answers_over_http() {
    let (app, _store) = test_app(&[]).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let stats: Value = reqwest::Client::new()
        .get(format!("http://{addr}/api/stats"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(stats["counters"]["errors"], 0);
    server.abort();
}
