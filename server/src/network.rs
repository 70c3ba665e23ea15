//! HTTP and WebSocket surface of the server, plus the task that turns store
//! snapshots into broadcasts

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::client::serve_connection;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::{Hub, HubConfig, HubHandle};
use crate::leaderboard::{LeaderboardClient, LeaderboardError};
use crate::store::PlayerStore;

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub store: Arc<PlayerStore>,
    pub leaderboard: LeaderboardClient,
    pub send_queue: usize,
}

pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.hub.is_closed() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let id = Uuid::new_v4().to_string();
    ws.on_upgrade(move |socket| {
        serve_connection(socket, id, state.hub, state.store, state.send_queue)
    })
}

async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);

    match state.leaderboard.top_scores(limit).await {
        Ok(scores) => Json(scores).into_response(),
        Err(LeaderboardError::NotConfigured) => {
            (StatusCode::SERVICE_UNAVAILABLE, "leaderboard not configured").into_response()
        }
        Err(e) => {
            warn!("Leaderboard query failed: {}", e);
            (StatusCode::BAD_GATEWAY, "leaderboard unavailable").into_response()
        }
    }
}

/// Spawns the task that snapshots the store every tick and submits the
/// serialized state to the hub for fan-out.
///
/// Ticks with no players are skipped. The task ends once the hub stops.
pub fn spawn_state_broadcaster(
    store: Arc<PlayerStore>,
    hub: HubHandle,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sent: u64 = 0;

        loop {
            ticker.tick().await;

            let state = store.snapshot().await;
            if state.is_empty() {
                if hub.is_closed() {
                    break;
                }
                continue;
            }

            let payload = match state.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize game state: {}", e);
                    continue;
                }
            };

            if hub.broadcast(payload).await.is_err() {
                break;
            }

            sent += 1;
            if sent % 300 == 0 {
                debug!("Broadcast {} states, {} players", sent, state.len());
            }
        }

        debug!("State broadcaster stopped");
    })
}

/// Main server tying the hub, the broadcaster and the HTTP listener together
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    store: Arc<PlayerStore>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(&config.address)
                .await
                .map_err(|source| ServerError::Bind {
                    address: config.address.clone(),
                    source,
                })?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            config,
            store: Arc::new(PlayerStore::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> Arc<PlayerStore> {
        Arc::clone(&self.store)
    }

    /// Serves until `shutdown` resolves.
    ///
    /// On shutdown the hub closes every client first, then the listener
    /// stops accepting and in-flight HTTP requests finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let leaderboard = LeaderboardClient::new(
            self.config.leaderboard_url.clone(),
            self.config.leaderboard_api_key.clone(),
        );
        if !leaderboard.is_configured() {
            warn!("Leaderboard credentials not set, scores will not be saved");
        }

        let (hub, hub_handle) = Hub::new(Arc::clone(&self.store), HubConfig::default());
        let hub = hub.with_leaderboard(leaderboard.clone());
        let hub_task = tokio::spawn(hub.run());

        let broadcaster = spawn_state_broadcaster(
            Arc::clone(&self.store),
            hub_handle.clone(),
            self.config.tick_duration(),
        );

        let state = AppState {
            hub: hub_handle.clone(),
            store: Arc::clone(&self.store),
            leaderboard,
            send_queue: self.config.send_queue,
        };
        let router = build_router(state, &self.config.static_dir);

        let signal_hub = hub_handle.clone();
        let signal = async move {
            shutdown.await;
            info!("Shutting down");
            signal_hub.shutdown();
        };

        info!(
            "Server started: {} Hz broadcasts, send queue {}",
            self.config.tick_rate, self.config.send_queue
        );

        let served = axum::serve(self.listener, router)
            .with_graceful_shutdown(signal)
            .await;

        hub_handle.shutdown();
        if let Err(e) = hub_task.await {
            error!("Hub task panicked: {}", e);
        }
        broadcaster.abort();

        served.map_err(ServerError::from)
    }
}
