use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::hub::{HubHandle, Payload};
use crate::store::PlayerStore;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Receiving half of a client's outbound queue, drained by the write pump.
pub type ClientQueue = mpsc::Receiver<Payload>;

/// Identifies one registration of a player id.
///
/// The serial distinguishes two connections that share a player id, so an
/// unregister from a replaced connection cannot remove its successor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub id: String,
    pub serial: u64,
}

// Client representation held by the hub
#[derive(Debug)]
pub struct Client {
    key: ClientKey,
    sender: mpsc::Sender<Payload>,
    alive: Arc<AtomicBool>,
}

impl Client {
    pub fn new(id: impl Into<String>, capacity: usize) -> (Self, ClientQueue) {
        let (sender, queue) = mpsc::channel(capacity.max(1));
        let client = Client {
            key: ClientKey {
                id: id.into(),
                serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            },
            sender,
            alive: Arc::new(AtomicBool::new(true)),
        };
        (client, queue)
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }

    pub fn key(&self) -> ClientKey {
        self.key.clone()
    }

    /// Shared view of the liveness flag, cleared when the hub closes the queue.
    pub fn liveness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    // Non-blocking enqueue; false means the queue is full or its consumer is gone
    pub fn send(&self, payload: Payload) -> bool {
        self.sender.try_send(payload).is_ok()
    }

    /// Closes the outbound queue. The write pump sees end-of-queue once the
    /// already-queued payloads are drained.
    pub fn close(self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// Runs one WebSocket connection from registration to teardown.
///
/// Inbound frames are decoded and applied to the store in arrival order.
/// Outbound payloads are drained from the client's queue. When either side
/// ends, the other is stopped and the client is unregistered exactly once.
pub async fn serve_connection(
    socket: WebSocket,
    id: String,
    hub: HubHandle,
    store: Arc<PlayerStore>,
    capacity: usize,
) {
    let (client, mut queue) = Client::new(id.clone(), capacity);
    let key = client.key();
    let alive = client.liveness();

    if let Err(e) = hub.register(client) {
        warn!("Rejecting connection {}: {}", id, e);
        return;
    }
    info!("Client {} connected", id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(payload) = queue.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(payload.to_string().into())).await {
                debug!("Write to {} failed: {}", writer_id, e);
                return;
            }
        }
        // Queue closed by the hub
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let reader_id = id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        debug!("Dropping non-UTF-8 binary frame from {}", reader_id);
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Read from {} failed: {}", reader_id, e);
                    break;
                }
            };

            if !alive.load(Ordering::Acquire) {
                break;
            }

            match Command::decode(&text) {
                Ok(command) => {
                    store.apply_command(&reader_id, &command).await;
                }
                Err(e) => debug!("Dropping message from {}: {}", reader_id, e),
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    // A no-op if the hub already evicted this connection
    let _ = hub.unregister(key);
    info!("Client {} disconnected", id);
}
