//! WebSocket handler for state pushes and browser commands

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use curio_core::{SessionId, SessionRequest, Utterance, ViewState};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::ClientCommand;
use crate::state::AppState;

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "state")]
    State(Box<ViewState>),
    #[serde(rename = "speak")]
    Speak(Utterance),
    #[serde(rename = "cancel_speech")]
    CancelSpeech,
    #[serde(rename = "probe_xr")]
    ProbeXr { mode: String },
    #[serde(rename = "request_xr_session")]
    RequestXrSession {
        request_id: Uuid,
        request: SessionRequest,
    },
    #[serde(rename = "attach_xr_session")]
    AttachXrSession { session: Option<SessionId> },
    #[serde(rename = "activate_ar")]
    ActivateAr,
    #[serde(rename = "pong")]
    Pong,
}

impl From<ClientCommand> for WsMessage {
    fn from(command: ClientCommand) -> Self {
        match command {
            ClientCommand::Speak(utterance) => WsMessage::Speak(utterance),
            ClientCommand::CancelSpeech => WsMessage::CancelSpeech,
            ClientCommand::ProbeXr { mode } => WsMessage::ProbeXr { mode },
            ClientCommand::RequestXrSession { request_id, request } => {
                WsMessage::RequestXrSession { request_id, request }
            }
            ClientCommand::AttachXrSession { session } => WsMessage::AttachXrSession { session },
            ClientCommand::ActivateAr => WsMessage::ActivateAr,
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WebSocket message");
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut view_events = state.scene.subscribe();
    let mut client_commands = state.bridge.subscribe();

    info!("WebSocket client connected");

    // Send current view state on connect
    if let Ok(view) = state.scene.snapshot().await {
        if !send(&mut sender, &WsMessage::State(Box::new(view))).await {
            return;
        }
    }

    // A browser is now listening, so XR capability can actually be checked
    if let Err(e) = state.scene.probe_xr().await {
        debug!(error = %e, "Could not re-probe XR capability");
    }

    loop {
        tokio::select! {
            // Forward view state to client
            event = view_events.recv() => {
                match event {
                    Ok(view) => {
                        if !send(&mut sender, &WsMessage::State(Box::new(view))).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "View state channel lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("View state channel closed");
                        break;
                    }
                }
            }

            // Forward narration and XR commands to client
            command = client_commands.recv() => {
                match command {
                    Ok(command) => {
                        if !send(&mut sender, &WsMessage::from(command)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Client command channel lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" && !send(&mut sender, &WsMessage::Pong).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
