//! Client for the remote score service
//!
//! The service speaks a PostgREST-style HTTP API under `/rest/v1/scores`.
//! Calls are independent round-trips; failures are returned to the caller
//! and never retried here.

use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use shared::Player;
use thiserror::Error;

const SCORES_PATH: &str = "/rest/v1/scores";

#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("leaderboard credentials not configured")]
    NotConfigured,
    #[error("leaderboard request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("leaderboard returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// One persisted score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub player_id: String,
    pub username: String,
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl From<&Player> for ScoreRecord {
    fn from(player: &Player) -> Self {
        Self {
            id: None,
            player_id: player.id.clone(),
            username: player.username.clone(),
            score: player.score,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    base_url: String,
    api_key: String,
}

/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct LeaderboardClient {
    credentials: Option<Credentials>,
    http: reqwest::Client,
}

impl LeaderboardClient {
    /// Builds a client. Missing or empty credentials leave it unconfigured;
    /// every call then fails with [`LeaderboardError::NotConfigured`].
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        let credentials = match (base_url, api_key) {
            (Some(base_url), Some(api_key)) if !base_url.is_empty() && !api_key.is_empty() => {
                Some(Credentials {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    api_key,
                })
            }
            _ => None,
        };

        Self {
            credentials,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn credentials(&self) -> Result<&Credentials, LeaderboardError> {
        self.credentials.as_ref().ok_or(LeaderboardError::NotConfigured)
    }

    pub async fn save_score(&self, record: &ScoreRecord) -> Result<(), LeaderboardError> {
        let creds = self.credentials()?;

        let response = self
            .http
            .post(format!("{}{}", creds.base_url, SCORES_PATH))
            .header("apikey", &creds.api_key)
            .bearer_auth(&creds.api_key)
            .header("Prefer", "return=representation")
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(LeaderboardError::Status { status, body });
        }

        debug!("Saved score {} for {}", record.score, record.player_id);
        Ok(())
    }

    /// Highest scores first.
    pub async fn top_scores(&self, limit: usize) -> Result<Vec<ScoreRecord>, LeaderboardError> {
        let creds = self.credentials()?;

        let response = self
            .http
            .get(format!("{}{}", creds.base_url, SCORES_PATH))
            .query(&[("order", "score.desc".to_string()), ("limit", limit.to_string())])
            .header("apikey", &creds.api_key)
            .bearer_auth(&creds.api_key)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(LeaderboardError::Status { status, body });
        }

        Ok(response.json().await?)
    }
}
