// SPDX-License-Identifier: GPL-3.0-only
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use crate::api::handlers::ApiHandlers;
use crate::job::{JobStatus, Slot};

/// Commands a progress subscriber may send back
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Cancel,
}

#[derive(Debug, Serialize, Deserialize)]
struct WsError {
    error: String,
}

/// Streams job progress of one slot to a WebSocket client
pub struct WebSocketServer {
    handlers: Arc<ApiHandlers>,
}

impl WebSocketServer {
    pub fn new(handlers: Arc<ApiHandlers>) -> Self {
        Self { handlers }
    }

    pub fn router(&self) -> Router {
        let handlers = self.handlers.clone();
        Router::new().route(
            "/api/jobs/:slot/progress",
            get(move |Path(slot): Path<String>, ws: WebSocketUpgrade| async move {
                upgrade(slot, ws, handlers)
            }),
        )
    }
}

fn upgrade(slot: String, ws: WebSocketUpgrade, handlers: Arc<ApiHandlers>) -> Response {
    // Subscribing before the upgrade lets an idle or unknown slot answer with a plain status code
    let (slot, updates) = match handlers.subscribe(&slot) {
        Ok(subscription) => subscription,
        Err(status) => return status.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, slot, updates, handlers))
}

async fn handle_socket(
    socket: WebSocket,
    slot: Slot,
    mut updates: mpsc::UnboundedReceiver<JobStatus>,
    handlers: Arc<ApiHandlers>,
) {
    let (mut sender, mut receiver) = socket.split();
    info!(%slot, "Progress subscriber connected");

    let mut send_task = tokio::spawn(async move {
        // Ends when the job finishes or another subscriber takes over
        while let Some(status) = updates.recv().await {
            let terminal = status.phase.is_terminal();
            match serde_json::to_string(&status) {
                Ok(text) => {
                    if let Err(e) = sender.send(Message::Text(text)).await {
                        error!(error = %e, "Failed to send WebSocket message");
                        return;
                    }
                }
                Err(e) => error!(error = %e, "Failed to encode job status"),
            }
            if terminal {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match parse_command(&text) {
                    Ok(WsCommand::Cancel) => handlers.cancel_slot(slot),
                    Err(e) => debug!(error = %e.error, "Ignoring WebSocket message"),
                },
                Message::Close(_) => {
                    info!(%slot, "Progress subscriber disconnected");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };
}

fn parse_command(text: &str) -> Result<WsCommand, WsError> {
    serde_json::from_str(text).map_err(|e| WsError { error: format!("Invalid message format: {}", e) })
}
