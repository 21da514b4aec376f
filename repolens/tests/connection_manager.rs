//! Connection manager integration tests against an in-process WebSocket
//! server.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use repolens::ConnectionManager;
use repolens_common::config::ReconnectConfig;
use repolens_common::progress::{AnalysisStatus, ProgressStore};
use repolens_common::wire::{
    self, AnalysisCompleteEvent, AnalysisProgressEvent, ClientMessage, ServerMessage,
};

const WAIT: Duration = Duration::from_secs(5);

/// One-connection WebSocket server: inbound client frames go to the returned
/// receiver, frames pushed into the returned sender go to the client.
async fn spawn_server() -> (
    SocketAddr,
    mpsc::UnboundedReceiver<ClientMessage>,
    mpsc::UnboundedSender<ServerMessage>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sender, mut receiver) = ws.split();
        loop {
            tokio::select! {
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(message) = wire::decode_client(&text) {
                            let _ = inbound_tx.send(message);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
                outbound = outbound_rx.recv() => match outbound {
                    Some(message) => {
                        if sender.send(Message::Text(wire::encode(&message))).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    (addr, inbound_rx, outbound_tx)
}

fn reconnect(max_attempts: u32, delay_ms: u64) -> ReconnectConfig {
    ReconnectConfig {
        max_attempts,
        delay_ms,
    }
}

fn manager_for(addr: SocketAddr, store: Arc<ProgressStore>) -> ConnectionManager {
    ConnectionManager::new(format!("ws://{}", addr), reconnect(3, 50), store)
}

#[tokio::test]
async fn connect_sends_registration_for_prior_subscriptions() {
    let (addr, mut inbound, _outbound) = spawn_server().await;
    let store = Arc::new(ProgressStore::new());
    let manager = manager_for(addr, store.clone());

    manager.subscribe_to_analysis("an-1").await;
    manager.connect().await;

    let frame = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    let ClientMessage::RegisterAnalysis(register) = frame else {
        panic!("expected registration frame, got {:?}", frame);
    };
    assert_eq!(register.analysis_id, "an-1");

    let mut watch = manager.connection_watch();
    timeout(WAIT, watch.wait_for(|connected| *connected))
        .await
        .unwrap()
        .unwrap();
    assert!(manager.is_connected());

    let mut progress = store.watch();
    let snapshot = timeout(
        WAIT,
        progress.wait_for(|s| s.log.as_deref() == Some("WebSocket connected")),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn subscribe_while_connected_sends_registration() {
    let (addr, mut inbound, _outbound) = spawn_server().await;
    let manager = manager_for(addr, Arc::new(ProgressStore::new()));

    manager.connect().await;
    let mut watch = manager.connection_watch();
    timeout(WAIT, watch.wait_for(|connected| *connected))
        .await
        .unwrap()
        .unwrap();

    manager.subscribe_to_analysis("an-2").await;
    let frame = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(
        frame,
        ClientMessage::RegisterAnalysis(wire::AnalysisRef::new("an-2"))
    );

    manager.unsubscribe_from_analysis("an-2").await;
    let frame = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(
        frame,
        ClientMessage::UnregisterAnalysis(wire::AnalysisRef::new("an-2"))
    );
}

#[tokio::test]
async fn inbound_progress_is_normalized_onto_the_store() {
    let (addr, mut inbound, outbound) = spawn_server().await;
    let store = Arc::new(ProgressStore::new());
    let manager = manager_for(addr, store.clone());

    manager.subscribe_to_analysis("an-3").await;
    manager.connect().await;
    timeout(WAIT, inbound.recv()).await.unwrap().unwrap();

    let mut watch = store.watch();
    outbound
        .send(ServerMessage::AnalysisProgress(AnalysisProgressEvent {
            analysis_id: "an-3".into(),
            update: repolens_common::progress::ProgressUpdate {
                status: Some(AnalysisStatus::Running),
                current_step: Some("scanning".into()),
                progress: Some(20),
                ..Default::default()
            },
        }))
        .unwrap();

    timeout(WAIT, watch.changed()).await.unwrap().unwrap();
    let snapshot = watch.borrow().clone();
    assert_eq!(snapshot.status, AnalysisStatus::Running);
    assert_eq!(snapshot.progress, Some(20));
    // A log line is always synthesized when the server sends none.
    assert_eq!(snapshot.log.as_deref(), Some("scanning (20%)"));
}

#[tokio::test]
async fn completion_forces_full_progress_and_stores_results() {
    let (addr, mut inbound, outbound) = spawn_server().await;
    let store = Arc::new(ProgressStore::new());
    let manager = manager_for(addr, store.clone());

    manager.subscribe_to_analysis("an-4").await;
    manager.connect().await;
    timeout(WAIT, inbound.recv()).await.unwrap().unwrap();

    let mut watch = store.watch();
    outbound
        .send(ServerMessage::AnalysisComplete(AnalysisCompleteEvent {
            analysis_id: "an-4".into(),
            result: json!({ "fileCount": 12 }),
        }))
        .unwrap();

    timeout(WAIT, watch.wait_for(|s| s.status.is_terminal()))
        .await
        .unwrap()
        .unwrap();
    let snapshot = store.snapshot();
    assert_eq!(snapshot.status, AnalysisStatus::Completed);
    assert_eq!(snapshot.progress, Some(100));
    assert_eq!(snapshot.total_steps, Some(100));
    assert_eq!(store.results(), Some(json!({ "fileCount": 12 })));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (addr, _inbound, _outbound) = spawn_server().await;
    let manager = manager_for(addr, Arc::new(ProgressStore::new()));

    manager.connect().await;
    let mut watch = manager.connection_watch();
    timeout(WAIT, watch.wait_for(|connected| *connected))
        .await
        .unwrap()
        .unwrap();

    manager.disconnect().await;
    timeout(WAIT, watch.wait_for(|connected| !*connected))
        .await
        .unwrap()
        .unwrap();

    // A second disconnect (and one while never connected) is a no-op.
    manager.disconnect().await;
    manager.disconnect().await;
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn disconnect_aborts_pending_reconnect_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = Arc::new(ProgressStore::new());
    // With a one-minute delay, sitting out the remaining attempts would blow
    // every timeout below.
    let manager =
        ConnectionManager::new(format!("ws://{}", addr), reconnect(5, 60_000), store.clone());

    let mut watch = store.watch();
    manager.connect().await;
    timeout(
        WAIT,
        watch.wait_for(|s| s.log.as_deref() == Some("Connection attempt 1/5 failed")),
    )
    .await
    .unwrap()
    .unwrap();

    manager.disconnect().await;
    timeout(
        WAIT,
        watch.wait_for(|s| s.log.as_deref() == Some("Reconnect cancelled")),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(!manager.is_connected());
    // The give-up line was never reached.
    assert!(store.snapshot().error.is_none());
}

#[tokio::test]
async fn bounded_reconnect_gives_up_and_reports_to_store() {
    // Bind then drop so the port is very likely unused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = Arc::new(ProgressStore::new());
    let manager = ConnectionManager::new(format!("ws://{}", addr), reconnect(2, 10), store.clone());

    let mut watch = store.watch();
    manager.connect().await;

    // Attempt diagnostics precede the terminal line.
    let snapshot = timeout(
        WAIT,
        watch.wait_for(|s| s.log.as_deref().is_some_and(|l| l.contains("giving up"))),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(
        snapshot.log.as_deref(),
        Some("Connection lost: giving up after 2 attempts")
    );
    assert!(snapshot.error.is_some());
    assert!(!manager.is_connected());

    let history = store.snapshot();
    assert_eq!(history.error.as_deref(), snapshot.error.as_deref());
}
