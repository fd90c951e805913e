//! Job progress WebSocket.
//!
//! Clients send `{"action":"join","jobId":…}` or `{"action":"leave",…}` as
//! text frames and receive `{"event":"progress","job":…}` for every job they
//! joined.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::models::{WsClientMessage, WsServerMessage};
use crate::api::server::AppState;
use crate::domain::JobSnapshot;
use crate::notification::JobEventHub;

/// Heartbeat interval in seconds.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Per-connection buffer between job subscriptions and the socket.
const OUTBOUND_CAPACITY: usize = 64;

/// Create the WebSocket router.
pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(progress_ws))
}

async fn progress_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Forward one job's updates into the connection's outbound queue.
fn spawn_forwarder(
    hub: &JobEventHub,
    job_id: &str,
    outbound: mpsc::Sender<JobSnapshot>,
) -> JoinHandle<()> {
    let mut rx = hub.subscribe(job_id);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    if outbound.send(snapshot).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Progress subscriber lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn encode(snapshot: JobSnapshot) -> Option<Message> {
    serde_json::to_string(&WsServerMessage::Progress { job: snapshot })
        .ok()
        .map(|text| Message::Text(text.into()))
}

/// Handle an established WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<JobSnapshot>(OUTBOUND_CAPACITY);
    let mut joined: HashMap<String, JoinHandle<()>> = HashMap::new();

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsClientMessage>(text.as_str()) {
                            Ok(WsClientMessage::Join { job_id }) => {
                                if joined.contains_key(&job_id) {
                                    continue;
                                }
                                let forwarder =
                                    spawn_forwarder(&state.hub, &job_id, outbound_tx.clone());
                                joined.insert(job_id.clone(), forwarder);

                                // Current state first, so late joiners are not blank.
                                if let Ok(Some(snapshot)) = state.scheduler.get(&job_id).await
                                    && let Some(message) = encode(snapshot)
                                    && sender.send(message).await.is_err()
                                {
                                    break;
                                }
                            }
                            Ok(WsClientMessage::Leave { job_id }) => {
                                if let Some(forwarder) = joined.remove(&job_id) {
                                    forwarder.abort();
                                }
                            }
                            Err(e) => {
                                debug!("Failed to decode client message: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            Some(snapshot) = outbound_rx.recv() => {
                if let Some(message) = encode(snapshot)
                    && let Err(e) = sender.send(message).await
                {
                    debug!("Failed to send progress, closing connection: {}", e);
                    break;
                }
            }

            _ = heartbeat_interval.tick() => {
                if awaiting_pong {
                    debug!("Client failed to respond to Ping, closing connection");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_ok() {
                    awaiting_pong = true;
                } else {
                    break;
                }
            }
        }
    }

    for (_, forwarder) in joined {
        forwarder.abort();
    }
}
