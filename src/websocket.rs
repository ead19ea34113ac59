//! `/console/ws` upgrade handler: query-param auth, history replay, then a
//! live bidirectional stream of console output and commands.
//!
//! Grounded on this codebase's `console_streamer` WS plumbing, adapted to
//! query-string auth (`?api_key=`/`?token=`) since browsers can't set a
//! custom header during the WS handshake.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::state::AppState;

const CLOSE_UNAUTHORIZED: u16 = 4001;
const CLOSE_FORBIDDEN: u16 = 4003;

#[derive(Deserialize)]
pub struct ConsoleWsQuery {
    api_key: Option<String>,
    token: Option<String>,
    #[serde(default)]
    history_lines: i64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Command { content: String },
    #[serde(other)]
    Unknown,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Error { content: String },
}

pub async fn console_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConsoleWsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
        .await;
}

async fn handle_socket(socket: WebSocket, state: AppState, query: ConsoleWsQuery) {
    let role = if let Some(api_key) = &query.api_key {
        state.auth.authenticate(api_key).ok()
    } else if let Some(token) = &query.token {
        state.ws_tokens.validate(token).await
    } else {
        None
    };

    let Some(role) = role else {
        close_with(socket, CLOSE_UNAUTHORIZED, "invalid or missing credentials").await;
        return;
    };
    if role != Role::Admin {
        close_with(socket, CLOSE_FORBIDDEN, "admin role required").await;
        return;
    }

    run_stream(socket, state, query.history_lines).await;
}

async fn run_stream(mut socket: WebSocket, state: AppState, history_lines: i64) {
    for line in state.console.get_history(history_lines).await {
        if socket.send(Message::Text(line)).await.is_err() {
            return;
        }
    }

    let mut live = state.console.subscribe();
    loop {
        tokio::select! {
            line = live.recv() => {
                match line {
                    Ok(line) => {
                        if socket.send(Message::Text(line)).await.is_err() {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(response) = handle_client_message(&state, &text).await {
                            let _ = socket
                                .send(Message::Text(serde_json::to_string(&response).unwrap()))
                                .await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
        }
    }
}

/// Validates and forwards a console command; returns a server message to
/// send back to the client on validation failure. Unknown message types
/// are silently ignored per the protocol.
async fn handle_client_message(state: &AppState, raw: &str) -> Result<(), ServerMessage> {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(_) => return Ok(()),
    };
    match message {
        ClientMessage::Command { content } => {
            if content.is_empty() || content.chars().count() > 1000 {
                return Err(ServerMessage::Error {
                    content: "command must be 1-1000 characters".to_string(),
                });
            }
            if !state.supervisor.send_command(&content).await {
                return Err(ServerMessage::Error { content: "failed to send command".to_string() });
            }
            Ok(())
        }
        ClientMessage::Unknown => Ok(()),
    }
}
