//! Event broadcast for analysis progress frames.

use tokio::sync::broadcast;

use repolens_common::wire::ServerMessage;

const DEFAULT_BUFFER: usize = 256;

/// Broadcast channel carrying [`ServerMessage`] frames from the analysis
/// pipeline to every open WebSocket connection. Each connection filters by
/// its own registration set.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerMessage>,
}

impl EventBus {
    /// Create a new event bus with the provided buffer size.
    ///
    /// Note: the effective buffer is clamped to at least `DEFAULT_BUFFER` to
    /// avoid frequent lag/drop behavior for bursty progress streams.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.sender.subscribe()
    }

    /// Emit a frame. Send errors only mean no connection is listening.
    pub fn emit(&self, message: ServerMessage) {
        let _ = self.sender.send(message);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
