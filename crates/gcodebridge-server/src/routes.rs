//! Route table and request handlers

use crate::error::ApiError;
use crate::ws;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use gcodebridge_communication::{
    list_ports, BridgeState, CommandReply, ConnectOptions, Controller, JogRequest,
    RealtimeCommand, SerialPortInfo, StatusReport,
};
use gcodebridge_core::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// The controller every command is forwarded to
    pub controller: Arc<dyn Controller>,
    /// Version string reported by `/health`
    pub version: &'static str,
}

impl AppState {
    /// State for `controller`
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        Self {
            controller,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Body of a successful command request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Terminal line from the controller
    pub response: String,
    /// Informational lines that preceded it
    pub lines: Vec<String>,
}

impl From<CommandReply> for CommandResponse {
    fn from(reply: CommandReply) -> Self {
        Self {
            response: reply.response,
            lines: reply.lines,
        }
    }
}

/// Body of `POST /send_gcode`
#[derive(Debug, Clone, Deserialize)]
pub struct SendCommandRequest {
    /// The line to send
    #[serde(alias = "gcode", alias = "cmd")]
    pub command: String,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/send_gcode", post(send_gcode_body))
        .route("/send_gcode/{command}", get(send_gcode_path))
        .route("/home", get(home).post(home))
        .route("/jog", post(jog))
        .route("/unlock", post(unlock))
        .route("/realtime/{action}", post(realtime))
        .route("/status", get(status))
        .route("/connection", get(connection))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/ports", get(ports))
        .route("/health", get(health))
        .route("/ws", get(ws::websocket))
        .with_state(state)
}

async fn send(state: &AppState, command: &str) -> ApiResult<CommandResponse> {
    tracing::debug!("Forwarding command '{}'", command.trim());
    let reply = state.controller.send_command(command).await?;
    Ok(Json(reply.into()))
}

/// GET /send_gcode/{command}
async fn send_gcode_path(
    State(state): State<AppState>,
    Path(command): Path<String>,
) -> ApiResult<CommandResponse> {
    send(&state, &command).await
}

/// POST /send_gcode
async fn send_gcode_body(
    State(state): State<AppState>,
    body: Result<Json<SendCommandRequest>, JsonRejection>,
) -> ApiResult<CommandResponse> {
    let Json(request) = body?;
    send(&state, &request.command).await
}

async fn home(State(state): State<AppState>) -> ApiResult<CommandResponse> {
    let reply = state.controller.home().await?;
    Ok(Json(reply.into()))
}

async fn jog(
    State(state): State<AppState>,
    body: Result<Json<JogRequest>, JsonRejection>,
) -> ApiResult<CommandResponse> {
    let Json(request) = body?;
    let reply = state.controller.jog(request).await?;
    Ok(Json(reply.into()))
}

async fn unlock(State(state): State<AppState>) -> ApiResult<CommandResponse> {
    let reply = state.controller.unlock().await?;
    Ok(Json(reply.into()))
}

async fn realtime(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> ApiResult<Value> {
    let command: RealtimeCommand = action.parse().map_err(Error::from)?;
    state.controller.realtime(command).await?;
    Ok(Json(json!({ "response": "sent", "command": command.to_string() })))
}

async fn status(State(state): State<AppState>) -> ApiResult<StatusReport> {
    Ok(Json(state.controller.query_status().await?))
}

async fn connection(State(state): State<AppState>) -> Json<BridgeState> {
    Json(state.controller.state())
}

/// POST /connect; an empty body connects with the configured port
async fn connect(State(state): State<AppState>, body: Bytes) -> ApiResult<Value> {
    let options = if body.iter().all(u8::is_ascii_whitespace) {
        ConnectOptions::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid connect options: {}", e)))?
    };

    let port = state.controller.connect(options).await?;
    Ok(Json(json!({ "response": "connected", "port": port })))
}

async fn disconnect(State(state): State<AppState>) -> ApiResult<Value> {
    state.controller.disconnect().await?;
    Ok(Json(json!({ "response": "disconnected" })))
}

async fn ports() -> ApiResult<Vec<SerialPortInfo>> {
    let ports = tokio::task::spawn_blocking(list_ports)
        .await
        .map_err(|e| Error::other(format!("port listing task failed: {}", e)))??;
    Ok(Json(ports))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "connection": state.controller.state(),
    }))
}
