//! WebSocket progress channel.
//!
//! Each connection keeps its own registration set, driven by
//! `register-analysis` / `unregister-analysis` frames. Only events whose
//! analysis (or batch) id is registered are forwarded; everything else is
//! filtered out server-side. Disconnects clean up implicitly since the set
//! lives on the connection task's stack.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use repolens_common::wire::{self, ClientMessage};

use crate::http_api::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    let mut registered: HashSet<String> = HashSet::new();

    debug!("websocket connection opened");
    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match wire::decode_client(text.as_str()) {
                            Ok(ClientMessage::RegisterAnalysis(r)) => {
                                debug!(analysis_id = %r.analysis_id, "registered");
                                registered.insert(r.analysis_id);
                            }
                            Ok(ClientMessage::UnregisterAnalysis(r)) => {
                                debug!(analysis_id = %r.analysis_id, "unregistered");
                                registered.remove(&r.analysis_id);
                            }
                            Err(e) => {
                                // Malformed frames are dropped, not fatal.
                                warn!(error = %e, "ignoring malformed client frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket receive error");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(frame) => {
                        let wanted = frame
                            .analysis_id()
                            .is_some_and(|id| registered.contains(id));
                        if !wanted {
                            continue;
                        }
                        let text = wire::encode(&frame);
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket connection lagged behind event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    debug!("websocket connection closed");
}
