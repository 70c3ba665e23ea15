//! Connection hub: the single task that owns the set of live clients
//!
//! Every change to membership arrives as a message on one of the hub's input
//! channels, and the hub processes them one at a time. Registration,
//! unregistration and broadcast are therefore strictly serialized, and the
//! membership map needs no lock of its own.
//!
//! The hub mirrors membership into the [`PlayerStore`]: a client is a member
//! if and only if its player record exists.
//!
//! A broadcast never waits on a client. A payload that does not fit in a
//! client's outbound queue evicts that client exactly as if it had
//! disconnected, which keeps fan-out latency independent of slow consumers.

use log::{debug, info, warn};
use shared::Player;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::client::{Client, ClientKey};
use crate::leaderboard::{LeaderboardClient, ScoreRecord};
use crate::store::PlayerStore;

/// A serialized broadcast, shared by every client it is delivered to.
pub type Payload = Arc<str>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is no longer running")]
    Closed,
}

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Queued broadcasts the hub may fall behind by before `broadcast` waits
    pub broadcast_backlog: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_backlog: 16,
        }
    }
}

/// Why a member left the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    Disconnected,
    Evicted,
    Replaced,
    Shutdown,
}

/// Cloneable sender side of the hub's inputs.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<Client>,
    unregister_tx: mpsc::UnboundedSender<ClientKey>,
    broadcast_tx: mpsc::Sender<Payload>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl HubHandle {
    pub fn register(&self, client: Client) -> Result<(), HubError> {
        self.register_tx.send(client).map_err(|_| HubError::Closed)
    }

    pub fn unregister(&self, key: ClientKey) -> Result<(), HubError> {
        self.unregister_tx.send(key).map_err(|_| HubError::Closed)
    }

    /// Queues a payload for fan-out. Waits only when the hub itself is
    /// behind by more than its broadcast backlog.
    pub async fn broadcast(&self, payload: impl Into<Payload>) -> Result<(), HubError> {
        self.broadcast_tx
            .send(payload.into())
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Asks the hub loop to close every client and exit.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        self.register_tx.is_closed()
    }
}

/// Hub state, owned by the coordinating task while it runs.
pub struct Hub {
    clients: HashMap<String, Client>,
    store: Arc<PlayerStore>,
    leaderboard: Option<LeaderboardClient>,

    register_rx: mpsc::UnboundedReceiver<Client>,
    unregister_rx: mpsc::UnboundedReceiver<ClientKey>,
    broadcast_rx: mpsc::Receiver<Payload>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Hub {
    pub fn new(store: Arc<PlayerStore>, config: HubConfig) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_backlog.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let hub = Hub {
            clients: HashMap::new(),
            store,
            leaderboard: None,
            register_rx,
            unregister_rx,
            broadcast_rx,
            shutdown_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            shutdown_tx: Arc::new(shutdown_tx),
        };

        (hub, handle)
    }

    /// Final scores of departing players are submitted here.
    pub fn with_leaderboard(mut self, leaderboard: LeaderboardClient) -> Self {
        self.leaderboard = Some(leaderboard);
        self
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// Main hub loop. Runs until `shutdown` is requested or every handle
    /// has been dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                Some(client) = self.register_rx.recv() => {
                    self.handle_register(client).await;
                }
                Some(key) = self.unregister_rx.recv() => {
                    self.handle_unregister(&key).await;
                }
                Some(payload) = self.broadcast_rx.recv() => {
                    self.handle_broadcast(payload).await;
                }
                else => break,
            }
        }

        self.close_all().await;
        info!("Hub stopped");
    }

    pub(crate) async fn handle_register(&mut self, client: Client) {
        let id = client.id().to_string();

        if let Some(previous) = self.clients.remove(&id) {
            // Same player id on a new connection: the old queue goes away and
            // the record is reset by `add_player` below.
            self.depart(previous, Departure::Replaced).await;
        }

        self.clients.insert(id.clone(), client);
        self.store.add_player(&id).await;
        debug!("Registered {} ({} clients)", id, self.clients.len());
    }

    pub(crate) async fn handle_unregister(&mut self, key: &ClientKey) {
        let is_current = self
            .clients
            .get(&key.id)
            .is_some_and(|client| client.key().serial == key.serial);

        if !is_current {
            debug!("Ignoring stale unregister for {}", key.id);
            return;
        }

        if let Some(client) = self.clients.remove(&key.id) {
            self.depart(client, Departure::Disconnected).await;
        }
    }

    pub(crate) async fn handle_broadcast(&mut self, payload: Payload) {
        let mut evicted = Vec::new();

        for (id, client) in &self.clients {
            if !client.send(Arc::clone(&payload)) {
                evicted.push(id.clone());
            }
        }

        for id in evicted {
            if let Some(client) = self.clients.remove(&id) {
                warn!("Evicting {}: outbound queue full or closed", id);
                self.depart(client, Departure::Evicted).await;
            }
        }
    }

    async fn close_all(&mut self) {
        let clients: Vec<Client> = self.clients.drain().map(|(_, client)| client).collect();
        for client in clients {
            self.depart(client, Departure::Shutdown).await;
        }

        // Registrations that raced with shutdown never become members
        self.register_rx.close();
        while let Ok(client) = self.register_rx.try_recv() {
            client.close();
        }
    }

    async fn depart(&mut self, client: Client, reason: Departure) {
        let id = client.id().to_string();
        client.close();

        // A replaced connection keeps the player record; registration resets it.
        if reason == Departure::Replaced {
            debug!("Closed previous connection for {}", id);
            return;
        }

        if let Some(player) = self.store.remove_player(&id).await {
            debug!("Removed {} ({:?})", id, reason);
            self.submit_score(player);
        }
    }

    fn submit_score(&self, player: Player) {
        let Some(leaderboard) = self.leaderboard.clone() else {
            return;
        };
        if player.score == 0 {
            return;
        }

        let record = ScoreRecord::from(&player);
        tokio::spawn(async move {
            if let Err(e) = leaderboard.save_score(&record).await {
                warn!("Failed to save score for {}: {}", record.player_id, e);
            }
        });
    }
}
