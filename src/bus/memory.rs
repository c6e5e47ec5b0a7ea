// =============================================================================
// In-Memory Bus — broadcast-backed broker for single-process deployments
// =============================================================================
//
// Each channel is a `tokio::sync::broadcast` sender; a connection fans its
// subscribed channels into one mpsc inbox so the agent loop has a single
// poll point. Fan-out semantics: every subscriber receives every message
// published after its subscribe completed. Slow consumers lag and drop
// (at-most-once delivery, matching the bus contract).
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

use super::{BusConnector, BusError, BusTransport, Channel, Envelope};

/// Per-channel broadcast capacity. Lagging subscribers drop the oldest
/// messages rather than blocking publishers.
const CHANNEL_CAPACITY: usize = 1024;

/// Per-connection inbox capacity.
const INBOX_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// The broker handle. Cheap to clone; every agent gets its own connection
/// via [`BusConnector::connect`].
#[derive(Clone)]
pub struct MemoryBus {
    channels: Arc<HashMap<Channel, broadcast::Sender<Envelope>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        for channel in Channel::ALL {
            let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
            channels.insert(channel, tx);
        }
        Self {
            channels: Arc::new(channels),
        }
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<Envelope> {
        // The map is built over Channel::ALL, so every channel is present.
        &self.channels[&channel]
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusConnector for MemoryBus {
    async fn connect(&self) -> Result<Box<dyn BusTransport>, BusError> {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        Ok(Box::new(MemoryBusConnection {
            bus: self.clone(),
            inbox_tx,
            inbox_rx,
            forwards: Vec::new(),
            closed: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One agent's connection: an inbox plus one forwarding task per subscribed
/// channel. Per-channel ordering is preserved by the dedicated forward task.
pub struct MemoryBusConnection {
    bus: MemoryBus,
    inbox_tx: mpsc::Sender<Envelope>,
    inbox_rx: mpsc::Receiver<Envelope>,
    forwards: Vec<JoinHandle<()>>,
    closed: bool,
}

impl MemoryBusConnection {
    fn abort_forwards(&mut self) {
        for handle in self.forwards.drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl BusTransport for MemoryBusConnection {
    async fn subscribe(&mut self, channels: &[Channel]) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::Closed);
        }

        for &channel in channels {
            let mut rx = self.bus.sender(channel).subscribe();
            let inbox = self.inbox_tx.clone();

            self.forwards.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(envelope) => {
                            if inbox.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(channel = %channel, dropped = n, "subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), BusError> {
        self.abort_forwards();
        Ok(())
    }

    async fn publish(&mut self, channel: Channel, envelope: &Envelope) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::Closed);
        }

        // Fire-and-forget: a send error only means nobody is subscribed.
        let _ = self.bus.sender(channel).send(envelope.clone());
        Ok(())
    }

    async fn next_message(&mut self, timeout: Duration) -> Result<Option<Envelope>, BusError> {
        if self.closed {
            return Err(BusError::Closed);
        }

        match tokio::time::timeout(timeout, self.inbox_rx.recv()).await {
            Ok(Some(envelope)) => Ok(Some(envelope)),
            // Inbox sender is held by `self`, so recv() only yields None when
            // the connection is being torn down.
            Ok(None) => Err(BusError::Closed),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.abort_forwards();
        self.closed = true;
        Ok(())
    }
}

impl Drop for MemoryBusConnection {
    fn drop(&mut self) {
        self.abort_forwards();
    }
}
