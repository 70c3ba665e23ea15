use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub const SPAWN_X: f64 = 100.0;
pub const SPAWN_Y: f64 = 100.0;
pub const MAX_HEALTH: i32 = 100;
pub const USERNAME_PREFIX: &str = "Player_";
pub const USERNAME_ID_CHARS: usize = 8;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub health: i32,
    pub score: u32,
    pub username: String,
}

impl Player {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            x: SPAWN_X,
            y: SPAWN_Y,
            health: MAX_HEALTH,
            score: 0,
            username: default_username(id),
        }
    }

    pub fn set_health(&mut self, health: i32) {
        self.health = health.clamp(0, MAX_HEALTH);
    }
}

/// Display name given to a player until they pick their own.
pub fn default_username(id: &str) -> String {
    let prefix: String = id.chars().take(USERNAME_ID_CHARS).collect();
    format!("{}{}", USERNAME_PREFIX, prefix)
}

/// Point-in-time copy of every player, keyed by player id.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct GameState {
    pub players: HashMap<String, Player>,
}

impl GameState {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("invalid data for `{kind}` message: {source}")]
    InvalidData {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Inbound wire envelope: `{"type": ..., "data": ...}`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct MoveData {
    x: f64,
    y: f64,
}

#[derive(Debug, Default, Deserialize)]
struct ShootData {
    #[serde(rename = "targetX")]
    target_x: Option<f64>,
    #[serde(rename = "targetY")]
    target_y: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct UsernameData {
    username: String,
}

/// A decoded gameplay instruction from one client.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move { x: f64, y: f64 },
    Shoot { target: Option<(f64, f64)> },
    UpdateUsername { username: String },
    Unknown(String),
}

impl Command {
    /// Decodes one text frame.
    ///
    /// Unrecognized `type` values decode to [`Command::Unknown`] rather than
    /// failing, so newer clients can talk to older servers.
    pub fn decode(text: &str) -> Result<Command, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        Command::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Command, ProtocolError> {
        match envelope.kind.as_str() {
            "move" => {
                let data: MoveData = serde_json::from_value(envelope.data)
                    .map_err(|source| ProtocolError::InvalidData { kind: "move", source })?;
                Ok(Command::Move { x: data.x, y: data.y })
            }
            "shoot" => {
                // Aim data is optional and never rejects the shot.
                let data: ShootData = serde_json::from_value(envelope.data).unwrap_or_default();
                let target = data.target_x.zip(data.target_y);
                Ok(Command::Shoot { target })
            }
            "update_username" => {
                let data: UsernameData = serde_json::from_value(envelope.data).map_err(
                    |source| ProtocolError::InvalidData {
                        kind: "update_username",
                        source,
                    },
                )?;
                Ok(Command::UpdateUsername {
                    username: data.username,
                })
            }
            _ => Ok(Command::Unknown(envelope.kind)),
        }
    }

    /// Encodes the command back into a wire envelope. Used by bots and tests.
    pub fn to_json(&self) -> String {
        let (kind, data) = match self {
            Command::Move { x, y } => ("move", serde_json::json!({ "x": x, "y": y })),
            Command::Shoot { target: Some((x, y)) } => {
                ("shoot", serde_json::json!({ "targetX": x, "targetY": y }))
            }
            Command::Shoot { target: None } => ("shoot", serde_json::json!({})),
            Command::UpdateUsername { username } => {
                ("update_username", serde_json::json!({ "username": username }))
            }
            Command::Unknown(kind) => (kind.as_str(), serde_json::json!({})),
        };
        serde_json::json!({ "type": kind, "data": data }).to_string()
    }
}
