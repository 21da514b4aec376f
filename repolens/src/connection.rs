//! WebSocket connection manager.
//!
//! A single actor task owns the socket; the public handle only sends
//! commands. Connect and disconnect are idempotent, subscriptions survive
//! reconnects, and every inbound frame is normalized onto the shared
//! [`ProgressStore`] through one path regardless of shape.
//!
//! Reconnection is bounded: a fixed delay between attempts and a hard cap on
//! the attempt count. When the cap is reached the manager writes a terminal
//! give-up line into the store and stays disconnected until asked again.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use repolens_common::config::ReconnectConfig;
use repolens_common::progress::{AnalysisStatus, ProgressStore, ProgressUpdate};
use repolens_common::wire::{self, AnalysisRef, ClientMessage, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const COMMAND_BUFFER: usize = 32;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Subscribe(String),
    Unsubscribe(String),
}

/// Handle to the connection actor. Cheap to clone; dropping every handle
/// shuts the actor down.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    connected: watch::Receiver<bool>,
}

impl ConnectionManager {
    /// Spawn the actor. No connection is made until [`Self::connect`].
    pub fn new(url: String, reconnect: ReconnectConfig, store: Arc<ProgressStore>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (connected_tx, connected_rx) = watch::channel(false);

        let actor = Actor {
            url,
            reconnect,
            store,
            subscriptions: HashSet::new(),
            connected_tx,
            commands: commands_rx,
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            connected: connected_rx,
        }
    }

    /// Request a connection. Idempotent: a no-op while already connected.
    pub async fn connect(&self) {
        let _ = self.commands.send(Command::Connect).await;
    }

    /// Request a disconnect. Idempotent and final: no reconnection follows.
    pub async fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect).await;
    }

    /// Register interest in one analysis (or batch) id. Registration is sent
    /// immediately when connected and replayed after every reconnect.
    pub async fn subscribe_to_analysis(&self, analysis_id: impl Into<String>) {
        let _ = self
            .commands
            .send(Command::Subscribe(analysis_id.into()))
            .await;
    }

    pub async fn unsubscribe_from_analysis(&self, analysis_id: impl Into<String>) {
        let _ = self
            .commands
            .send(Command::Unsubscribe(analysis_id.into()))
            .await;
    }

    /// Last observed connection state.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Receiver for awaiting connection state transitions.
    pub fn connection_watch(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }
}

struct Actor {
    url: String,
    reconnect: ReconnectConfig,
    store: Arc<ProgressStore>,
    subscriptions: HashSet<String>,
    connected_tx: watch::Sender<bool>,
    commands: mpsc::Receiver<Command>,
}

/// One iteration's input: a command from the handle or a frame (or error)
/// from the socket.
enum Input {
    Command(Option<Command>),
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

impl Actor {
    async fn run(mut self) {
        let mut stream: Option<WsStream> = None;
        loop {
            let input = match stream.as_mut() {
                Some(ws) => tokio::select! {
                    command = self.commands.recv() => Input::Command(command),
                    frame = ws.next() => Input::Frame(frame),
                },
                None => Input::Command(self.commands.recv().await),
            };

            match input {
                // Every handle dropped: close and stop.
                Input::Command(None) => {
                    if let Some(ws) = stream.as_mut() {
                        let _ = ws.close(None).await;
                    }
                    return;
                }
                Input::Command(Some(Command::Connect)) => {
                    if stream.is_none() {
                        stream = self.connect_with_retries().await;
                    }
                }
                Input::Command(Some(Command::Disconnect)) => {
                    if let Some(mut ws) = stream.take() {
                        let _ = ws.close(None).await;
                        self.set_connected(false);
                        info!("disconnected");
                    }
                }
                Input::Command(Some(Command::Subscribe(id))) => {
                    self.subscriptions.insert(id.clone());
                    if let Some(ws) = stream.as_mut() {
                        let frame = ClientMessage::RegisterAnalysis(AnalysisRef::new(id));
                        if ws.send(Message::Text(wire::encode(&frame))).await.is_err() {
                            stream = self.handle_drop().await;
                        }
                    }
                }
                Input::Command(Some(Command::Unsubscribe(id))) => {
                    self.subscriptions.remove(&id);
                    if let Some(ws) = stream.as_mut() {
                        let frame = ClientMessage::UnregisterAnalysis(AnalysisRef::new(id));
                        if ws.send(Message::Text(wire::encode(&frame))).await.is_err() {
                            stream = self.handle_drop().await;
                        }
                    }
                }
                Input::Frame(Some(Ok(Message::Text(text)))) => self.handle_frame(&text),
                // Pings are answered by the protocol layer.
                Input::Frame(Some(Ok(_))) => {}
                Input::Frame(Some(Err(e))) => {
                    debug!(error = %e, "socket error");
                    stream = self.handle_drop().await;
                }
                Input::Frame(None) => {
                    stream = self.handle_drop().await;
                }
            }
        }
    }

    fn set_connected(&self, connected: bool) {
        let _ = self.connected_tx.send(connected);
    }

    /// The socket dropped out from under us: try to get back.
    async fn handle_drop(&mut self) -> Option<WsStream> {
        self.set_connected(false);
        warn!("connection lost, attempting to reconnect");
        self.connect_with_retries().await
    }

    /// Fixed-delay, capped-attempt connection loop. On success the full
    /// subscription set is re-registered before any frame is read.
    async fn connect_with_retries(&mut self) -> Option<WsStream> {
        let delay = Duration::from_millis(self.reconnect.delay_ms);
        for attempt in 1..=self.reconnect.max_attempts {
            match connect_async(&self.url).await {
                Ok((mut ws, _)) => {
                    debug!(attempt, "connected to {}", self.url);
                    let mut registered = true;
                    for id in &self.subscriptions {
                        let frame = ClientMessage::RegisterAnalysis(AnalysisRef::new(id.clone()));
                        if ws.send(Message::Text(wire::encode(&frame))).await.is_err() {
                            warn!(attempt, "connection dropped during registration");
                            registered = false;
                            break;
                        }
                    }
                    if registered {
                        self.set_connected(true);
                        self.store.set_progress(ProgressUpdate {
                            log: Some("WebSocket connected".to_string()),
                            ..ProgressUpdate::default()
                        });
                        return Some(ws);
                    }
                    if attempt < self.reconnect.max_attempts && !self.retry_delay(delay).await {
                        return None;
                    }
                }
                Err(e) => {
                    warn!(attempt, max = self.reconnect.max_attempts, error = %e, "connection attempt failed");
                    self.store.set_progress(ProgressUpdate {
                        log: Some(format!(
                            "Connection attempt {}/{} failed",
                            attempt, self.reconnect.max_attempts
                        )),
                        ..ProgressUpdate::default()
                    });
                    if attempt < self.reconnect.max_attempts && !self.retry_delay(delay).await {
                        return None;
                    }
                }
            }
        }

        let line = format!(
            "Connection lost: giving up after {} attempts",
            self.reconnect.max_attempts
        );
        info!("{}", line);
        self.store.set_progress(ProgressUpdate {
            log: Some(line.clone()),
            error: Some(line),
            ..ProgressUpdate::default()
        });
        None
    }

    /// Wait between attempts while staying responsive to commands, so a
    /// disconnect does not sit behind the remaining retries. Returns false
    /// when the retry loop must stop.
    async fn retry_delay(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => {}
                    Some(Command::Subscribe(id)) => {
                        self.subscriptions.insert(id);
                    }
                    Some(Command::Unsubscribe(id)) => {
                        self.subscriptions.remove(&id);
                    }
                    Some(Command::Disconnect) => {
                        info!("disconnect requested, abandoning reconnect");
                        self.store.set_progress(ProgressUpdate {
                            log: Some("Reconnect cancelled".to_string()),
                            ..ProgressUpdate::default()
                        });
                        return false;
                    }
                    // Every handle dropped.
                    None => return false,
                },
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let message = match wire::decode_server(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "ignoring malformed server frame");
                return;
            }
        };
        let (update, result) = normalize(message);
        // Results land before the terminal progress update so a watcher woken
        // by the status change always sees them.
        if let Some(result) = result {
            self.store.set_results(Some(result));
        }
        self.store.set_progress(update);
    }
}

/// Map any server frame onto a [`ProgressUpdate`] plus an optional result.
/// Single and batch shapes write through this one path; a human-readable
/// `log` line is always present afterwards.
fn normalize(message: ServerMessage) -> (ProgressUpdate, Option<Value>) {
    match message {
        ServerMessage::AnalysisProgress(event) => {
            let mut update = event.update;
            if update.log.is_none() {
                update.log = Some(synthesize_log(&update));
            }
            (update, None)
        }
        ServerMessage::AnalysisComplete(event) => {
            let update = ProgressUpdate {
                status: Some(AnalysisStatus::Completed),
                progress: Some(100),
                total_steps: Some(100),
                log: Some("Analysis complete".to_string()),
                ..ProgressUpdate::default()
            };
            (update, Some(event.result))
        }
        ServerMessage::AnalysisError(event) => {
            let update = ProgressUpdate {
                status: Some(AnalysisStatus::Failed),
                error: Some(event.message.clone()),
                log: Some(format!("Analysis failed: {}", event.message)),
                ..ProgressUpdate::default()
            };
            (update, None)
        }
        ServerMessage::BatchAnalysisProgress(event) => {
            let mut update = event.update;
            let repository = event.repository.as_deref().unwrap_or("batch");
            let mut line = format!("[{}/{}] {}", event.completed + 1, event.total, repository);
            if event.failed > 0 {
                line.push_str(&format!(" ({} failed)", event.failed));
            }
            update.log = Some(line);
            if update.current_step.is_none() {
                update.current_step = Some(repository.to_string());
            }
            // Batch counters map onto the same snapshot fields the single
            // analysis shape uses.
            if update.files_processed.is_none() {
                update.files_processed = Some(u64::from(event.completed));
            }
            if update.total_files.is_none() {
                update.total_files = Some(u64::from(event.total));
            }
            (update, None)
        }
        ServerMessage::BatchAnalysisComplete(event) => {
            let update = ProgressUpdate {
                status: Some(AnalysisStatus::Completed),
                progress: Some(100),
                total_steps: Some(100),
                log: Some(format!(
                    "Batch complete: {} repositories",
                    event.repositories.len()
                )),
                ..ProgressUpdate::default()
            };
            (update, Some(json!({ "repositories": event.repositories })))
        }
    }
}

fn synthesize_log(update: &ProgressUpdate) -> String {
    match (&update.current_step, update.progress) {
        (Some(step), Some(progress)) => format!("{} ({}%)", step, progress),
        (Some(step), None) => step.clone(),
        (None, Some(progress)) => format!("{}% complete", progress),
        (None, None) => "Working...".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repolens_common::wire::{
        AnalysisCompleteEvent, AnalysisErrorEvent, AnalysisProgressEvent, BatchCompleteEvent,
        BatchProgressEvent,
    };

    #[test]
    fn test_normalize_progress_synthesizes_log() {
        let (update, result) = normalize(ServerMessage::AnalysisProgress(AnalysisProgressEvent {
            analysis_id: "an-1".into(),
            update: ProgressUpdate {
                current_step: Some("parsing".into()),
                progress: Some(30),
                ..ProgressUpdate::default()
            },
        }));
        assert_eq!(update.log.as_deref(), Some("parsing (30%)"));
        assert!(result.is_none());
    }

    #[test]
    fn test_normalize_progress_keeps_server_log() {
        let (update, _) = normalize(ServerMessage::AnalysisProgress(AnalysisProgressEvent {
            analysis_id: "an-1".into(),
            update: ProgressUpdate {
                log: Some("Scanning /repo".into()),
                ..ProgressUpdate::default()
            },
        }));
        assert_eq!(update.log.as_deref(), Some("Scanning /repo"));
    }

    #[test]
    fn test_normalize_complete_forces_terminal_fields() {
        let (update, result) = normalize(ServerMessage::AnalysisComplete(AnalysisCompleteEvent {
            analysis_id: "an-1".into(),
            result: json!({ "fileCount": 9 }),
        }));
        assert_eq!(update.status, Some(AnalysisStatus::Completed));
        assert_eq!(update.progress, Some(100));
        assert_eq!(update.total_steps, Some(100));
        assert_eq!(result, Some(json!({ "fileCount": 9 })));
    }

    #[test]
    fn test_normalize_error_sets_failed() {
        let (update, result) = normalize(ServerMessage::AnalysisError(AnalysisErrorEvent {
            analysis_id: "an-1".into(),
            message: "provider unavailable".into(),
        }));
        assert_eq!(update.status, Some(AnalysisStatus::Failed));
        assert_eq!(update.error.as_deref(), Some("provider unavailable"));
        assert!(update.log.as_deref().unwrap().contains("provider unavailable"));
        assert!(result.is_none());
    }

    #[test]
    fn test_normalize_batch_progress_synthesizes_counter_log() {
        let (update, _) = normalize(ServerMessage::BatchAnalysisProgress(BatchProgressEvent {
            batch_id: "b-1".into(),
            repository: Some("/repo/a".into()),
            completed: 0,
            total: 3,
            failed: 0,
            update: ProgressUpdate::default(),
        }));
        assert_eq!(update.log.as_deref(), Some("[1/3] /repo/a"));
        assert_eq!(update.current_step.as_deref(), Some("/repo/a"));
        assert_eq!(update.files_processed, Some(0));
        assert_eq!(update.total_files, Some(3));
    }

    #[test]
    fn test_normalize_batch_progress_reports_failures() {
        let (update, _) = normalize(ServerMessage::BatchAnalysisProgress(BatchProgressEvent {
            batch_id: "b-1".into(),
            repository: Some("/repo/c".into()),
            completed: 2,
            total: 3,
            failed: 1,
            update: ProgressUpdate::default(),
        }));
        assert_eq!(update.log.as_deref(), Some("[3/3] /repo/c (1 failed)"));
    }

    #[test]
    fn test_normalize_batch_complete_carries_all_results() {
        let (update, result) =
            normalize(ServerMessage::BatchAnalysisComplete(BatchCompleteEvent {
                batch_id: "b-1".into(),
                repositories: vec![json!({ "path": "/a" }), json!({ "path": "/b" })],
            }));
        assert_eq!(update.status, Some(AnalysisStatus::Completed));
        assert_eq!(
            result,
            Some(json!({ "repositories": [{ "path": "/a" }, { "path": "/b" }] }))
        );
    }
}
