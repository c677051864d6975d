use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::AppState;
use super::models::{Board, Card, Column};
use super::reorder::ReorderOutcome;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before the connection counts as dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Event types ──────────────────────────────────────────────────────

/// Change notifications pushed to every connected client once the change
/// has been committed. Every event names its board so clients can filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BoardEvent {
    BoardUpdated {
        board: Board,
    },
    BoardDeleted {
        board_id: i64,
    },
    MembersChanged {
        board_id: i64,
    },
    ColumnCreated {
        board_id: i64,
        column: Column,
    },
    ColumnUpdated {
        board_id: i64,
        column: Column,
    },
    ColumnDeleted {
        board_id: i64,
        column_id: i64,
    },
    ColumnMoved {
        board_id: i64,
        outcome: MoveSummary,
    },
    CardCreated {
        board_id: i64,
        card: Card,
    },
    CardUpdated {
        board_id: i64,
        card: Card,
    },
    CardDeleted {
        board_id: i64,
        card_id: i64,
    },
    CardMoved {
        board_id: i64,
        outcome: MoveSummary,
    },
    /// Labels, assignees or comments of a card changed.
    CardDetailsChanged {
        board_id: i64,
        card_id: i64,
    },
    LabelsChanged {
        board_id: i64,
    },
}

/// Wire form of a committed move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveSummary {
    pub item_id: i64,
    pub from_parent: i64,
    pub to_parent: i64,
    pub old_position: i32,
    pub new_position: i32,
    /// Number of rows whose position or parent was rewritten.
    pub writes: usize,
}

impl From<&ReorderOutcome> for MoveSummary {
    fn from(outcome: &ReorderOutcome) -> Self {
        Self {
            item_id: outcome.item_id,
            from_parent: outcome.from_parent,
            to_parent: outcome.to_parent,
            old_position: outcome.old_position,
            new_position: outcome.new_position,
            writes: outcome.writes.len(),
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    let rx = state.events.subscribe();
    debug!("websocket client connected");
    run_socket_loop(sender, receiver, rx).await;
    debug!("websocket client disconnected");
}

/// Forward broadcast events to one client with ping/pong keepalive.
///
/// Exits when the client closes, a send fails, the channel closes, or no
/// Pong arrives within [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("websocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket client lagged behind event stream");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast an event. Having no subscribers is not an error.
pub fn broadcast_event(tx: &broadcast::Sender<String>, event: &BoardEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            warn!(error = %e, "failed to serialize board event");
        }
    }
}
