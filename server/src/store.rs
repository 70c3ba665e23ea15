//! Authoritative player state shared by the hub and every connection
//!
//! The store is the only owner of live player records. Writers (join, leave,
//! gameplay commands) take the exclusive lock; broadcast snapshots take the
//! shared lock and copy the map out, so a snapshot never observes a
//! half-applied command and never aliases live records.

use log::{debug, info};
use shared::{Command, GameState, Player};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct PlayerStore {
    players: RwLock<HashMap<String, Player>>,
}

impl PlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a player with default state.
    ///
    /// Re-adding an id that is already present replaces its record with fresh
    /// defaults; a rejoin is treated as a reset, not an error.
    pub async fn add_player(&self, id: &str) {
        let player = Player::new(id);
        let mut players = self.players.write().await;

        if players.insert(id.to_string(), player).is_some() {
            info!("Player {} rejoined, state reset", id);
        } else {
            info!("Player {} joined the game", id);
        }
    }

    /// Removes a player and hands back the final record, if there was one.
    pub async fn remove_player(&self, id: &str) -> Option<Player> {
        let removed = self.players.write().await.remove(id);
        if removed.is_some() {
            info!("Player {} left the game", id);
        }
        removed
    }

    /// Applies an already-decoded command to one player.
    ///
    /// Returns false when the player is gone, which happens when a message
    /// races with a disconnect. The command is dropped in that case.
    pub async fn apply_command(&self, id: &str, command: &Command) -> bool {
        let mut players = self.players.write().await;
        let Some(player) = players.get_mut(id) else {
            debug!("Dropping {:?} for unknown player {}", command, id);
            return false;
        };

        match command {
            Command::Move { x, y } => {
                player.x = *x;
                player.y = *y;
            }
            Command::Shoot { target } => match target {
                Some((x, y)) => info!("Player {} shot at ({}, {})", id, x, y),
                None => info!("Player {} shot", id),
            },
            Command::UpdateUsername { username } => {
                player.username = username.clone();
            }
            Command::Unknown(kind) => {
                debug!("Ignoring unknown command {:?} from {}", kind, id);
            }
        }

        true
    }

    /// Adds points to a player's score, saturating at `u32::MAX`.
    ///
    /// Returns the new score, or None when the player is gone.
    pub async fn add_score(&self, id: &str, points: u32) -> Option<u32> {
        let mut players = self.players.write().await;
        let player = players.get_mut(id)?;
        player.score = player.score.saturating_add(points);
        Some(player.score)
    }

    /// Copies out every player under the shared lock.
    pub async fn snapshot(&self) -> GameState {
        let players = self.players.read().await;
        GameState {
            players: players.clone(),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Player> {
        self.players.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.players.read().await.is_empty()
    }
}
