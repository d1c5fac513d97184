//! JSON control API for operating the relay: stats, activity log, target
//! channel configuration, the pause gate and explicit deletes.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;

use fanout_engine::{FanoutEngine, FanoutError};
use fanout_types::{pad_target_slots, MessageId, SourceKey};

const STATS_ENDPOINT: &str = "/api/stats";
const LOGS_ENDPOINT: &str = "/api/logs";
const CONFIG_ENDPOINT: &str = "/api/config";
const CHANNELS_ENDPOINT: &str = "/api/config/channels";
const PAUSE_ENDPOINT: &str = "/api/bot/pause";
const DELETE_ENDPOINT: &str = "/api/messages/{message_id}/delete";

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct RelayGatewayConfig {
    pub bind: String,
    pub source_chat_id: String,
}

impl Default for RelayGatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            source_chat_id: String::new(),
        }
    }
}

pub struct RelayGatewayState {
    engine: Arc<FanoutEngine>,
    source_chat_id: String,
}

impl RelayGatewayState {
    pub fn new(engine: Arc<FanoutEngine>, source_chat_id: impl Into<String>) -> Self {
        Self {
            engine,
            source_chat_id: source_chat_id.into(),
        }
    }
}

/// Serves the control API until `shutdown` flips to true.
pub async fn run_relay_gateway(
    config: RelayGatewayConfig,
    engine: Arc<FanoutEngine>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let bind_addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid --bind '{}': expected host:port", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind control api on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve control api listen address")?;
    tracing::info!(addr = %local_addr, "control api listening");

    let app = build_relay_gateway_router(Arc::new(RelayGatewayState::new(
        engine,
        config.source_chat_id,
    )));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("control api server exited unexpectedly")?;
    Ok(())
}

pub fn build_relay_gateway_router(state: Arc<RelayGatewayState>) -> Router {
    Router::new()
        .route(STATS_ENDPOINT, get(handle_stats))
        .route(LOGS_ENDPOINT, get(handle_logs))
        .route(CONFIG_ENDPOINT, get(handle_config))
        .route(CHANNELS_ENDPOINT, post(handle_update_channels))
        .route(PAUSE_ENDPOINT, post(handle_pause))
        .route(DELETE_ENDPOINT, post(handle_delete_message))
        .with_state(state)
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message.into(),
            }
        })),
    )
        .into_response()
}

fn engine_error_response(error: FanoutError) -> Response {
    let message = error.to_string();
    match error {
        FanoutError::TooManyTargets { .. } => {
            error_response(StatusCode::BAD_REQUEST, "too_many_channels", message)
        }
        FanoutError::Store(_) => {
            tracing::error!("control api store failure: {message}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_failure", message)
        }
    }
}

async fn handle_stats(State(state): State<Arc<RelayGatewayState>>) -> Response {
    match state.engine.get_stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(error) => engine_error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default)]
    limit: Option<String>,
}

/// Unparseable or zero limits fall back to the default.
fn resolve_log_limit(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .min(MAX_LOG_LIMIT)
}

async fn handle_logs(
    State(state): State<Arc<RelayGatewayState>>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let limit = resolve_log_limit(query.limit.as_deref());
    match state.engine.recent_logs(limit).await {
        Ok(logs) => (StatusCode::OK, Json(logs)).into_response(),
        Err(error) => engine_error_response(error),
    }
}

async fn handle_config(State(state): State<Arc<RelayGatewayState>>) -> Response {
    match state.engine.target_set().await {
        Ok(targets) => (
            StatusCode::OK,
            Json(json!({
                "source_chat_id": state.source_chat_id,
                "target_channels": pad_target_slots(targets.as_slice()),
            })),
        )
            .into_response(),
        Err(error) => engine_error_response(error),
    }
}

fn parse_channel_list(body: &Value) -> Result<Vec<String>, String> {
    let Some(channels) = body.get("channels").and_then(Value::as_array) else {
        return Err("channels must be an array".to_string());
    };
    channels
        .iter()
        .map(|channel| {
            channel
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| "channels must contain only strings".to_string())
        })
        .collect()
}

async fn handle_update_channels(
    State(state): State<Arc<RelayGatewayState>>,
    Json(body): Json<Value>,
) -> Response {
    let channels = match parse_channel_list(&body) {
        Ok(channels) => channels,
        Err(message) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_channels", message)
        }
    };
    match state.engine.set_targets(channels.as_slice()).await {
        Ok(targets) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "channels": pad_target_slots(targets.as_slice()),
            })),
        )
            .into_response(),
        Err(error) => engine_error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct PauseRequest {
    paused: bool,
}

async fn handle_pause(
    State(state): State<Arc<RelayGatewayState>>,
    Json(request): Json<PauseRequest>,
) -> Response {
    if let Err(error) = state.engine.set_paused(request.paused).await {
        return engine_error_response(error);
    }
    match state.engine.get_stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(error) => engine_error_response(error),
    }
}

async fn handle_delete_message(
    State(state): State<Arc<RelayGatewayState>>,
    Path(message_id): Path<MessageId>,
) -> Response {
    let key = SourceKey::new(state.source_chat_id.clone(), message_id);
    match state.engine.handle_delete(&key).await {
        Ok(outcome) => {
            let status = if outcome.is_not_found() {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::OK
            };
            (status, Json(outcome)).into_response()
        }
        Err(error) => engine_error_response(error),
    }
}

#[cfg(test)]
mod tests;
