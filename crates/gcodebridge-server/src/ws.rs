//! WebSocket relay
//!
//! Each client gets its own event bus receiver. Controller output is sent as
//! `{"event": "response", "line": ..., "timestamp": ...}` frames; connection
//! changes, alarms and link errors get frames of their own. A client that
//! falls behind skips the frames it missed.

use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use gcodebridge_core::{AppEvent, CommunicationEvent, ConnectionEvent, MachineEvent};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

/// GET /ws
///
/// The client is subscribed before the upgrade completes, so nothing
/// published after the handshake is missed.
pub async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.controller.events();
    let rx = events.receiver();
    tracing::info!(
        "WebSocket client connected ({} receivers)",
        events.receiver_count()
    );
    ws.on_upgrade(move |socket| relay(socket, rx))
}

async fn relay(mut socket: WebSocket, mut rx: Receiver<AppEvent>) {
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!("WebSocket receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
            event = rx.recv() => match event {
                Ok(event) => {
                    let Some(frame) = frame_for(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("WebSocket client lagging, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("WebSocket client disconnected");
}

/// The frame relayed to clients for `event`, if any
pub fn frame_for(event: &AppEvent) -> Option<Value> {
    let timestamp = chrono::Utc::now().to_rfc3339();
    match event {
        AppEvent::Communication(CommunicationEvent::DataReceived { data }) => Some(json!({
            "event": "response",
            "line": data,
            "timestamp": timestamp,
        })),
        AppEvent::Connection(connection) => {
            let frame = match connection {
                ConnectionEvent::Connecting { port } => {
                    json!({ "event": "connection", "status": "connecting", "port": port })
                }
                ConnectionEvent::Connected { port } => {
                    json!({ "event": "connection", "status": "connected", "port": port })
                }
                ConnectionEvent::Disconnected { port, reason } => json!({
                    "event": "connection",
                    "status": "disconnected",
                    "port": port,
                    "reason": reason,
                }),
                ConnectionEvent::ConnectionFailed { port, error } => json!({
                    "event": "connection",
                    "status": "failed",
                    "port": port,
                    "error": error,
                }),
            };
            Some(with_timestamp(frame, timestamp))
        }
        AppEvent::Machine(MachineEvent::AlarmTriggered { code, message }) => Some(json!({
            "event": "alarm",
            "code": code,
            "message": message,
            "timestamp": timestamp,
        })),
        AppEvent::Error(error) => Some(json!({
            "event": "error",
            "source": error.source,
            "message": error.message,
            "timestamp": timestamp,
        })),
        _ => None,
    }
}

fn with_timestamp(mut frame: Value, timestamp: String) -> Value {
    if let Some(object) = frame.as_object_mut() {
        object.insert("timestamp".to_string(), Value::String(timestamp));
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcodebridge_core::{DisconnectReason, ErrorEvent};

    #[test]
    fn test_response_frame() {
        let frame = frame_for(&AppEvent::Communication(CommunicationEvent::DataReceived {
            data: "ok".to_string(),
        }))
        .unwrap();
        assert_eq!(frame["event"], "response");
        assert_eq!(frame["line"], "ok");
        assert!(frame["timestamp"].is_string());
    }

    #[test]
    fn test_connection_frames() {
        let frame = frame_for(&AppEvent::Connection(ConnectionEvent::Disconnected {
            port: "/dev/ttyUSB0".to_string(),
            reason: DisconnectReason::ConnectionLost,
        }))
        .unwrap();
        assert_eq!(frame["event"], "connection");
        assert_eq!(frame["status"], "disconnected");
        assert_eq!(frame["reason"], "ConnectionLost");
        assert!(frame["timestamp"].is_string());
    }

    #[test]
    fn test_error_frame() {
        let frame = frame_for(&AppEvent::Error(ErrorEvent::new(
            "serial-io",
            "/dev/ttyUSB0: device removed",
        )))
        .unwrap();
        assert_eq!(frame["event"], "error");
        assert_eq!(frame["source"], "serial-io");
        assert_eq!(frame["message"], "/dev/ttyUSB0: device removed");
    }

    #[test]
    fn test_outgoing_traffic_not_relayed() {
        assert!(frame_for(&AppEvent::Communication(CommunicationEvent::DataSent {
            data: "G0 X1".to_string(),
        }))
        .is_none());
        assert!(frame_for(&AppEvent::Machine(MachineEvent::HomingStarted)).is_none());
    }
}
