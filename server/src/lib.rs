//! # Game Session Server Library
//!
//! This library provides the real-time session layer of a browser-based
//! multiplayer game. It accepts WebSocket connections, keeps the authoritative
//! state of every connected player, and pushes that state to all clients
//! several times per second.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Player State
//! The [`store::PlayerStore`] owns every live player record. Gameplay
//! commands from clients are decoded outside the lock and applied under an
//! exclusive lock; broadcast snapshots are copies taken under a shared lock.
//!
//! ### Connection Lifecycle
//! The [`hub::Hub`] is a single task that owns the set of connected clients.
//! Register, unregister and broadcast requests arrive as messages and are
//! processed one at a time, so membership needs no lock. Joining adds a player
//! to the store and leaving removes it.
//!
//! ### Backpressure
//! Each client has a bounded outbound queue. A broadcast that finds a queue
//! full evicts that client instead of waiting, so one slow consumer cannot
//! stall the others. The queue size is the `--send-queue` setting.
//!
//! ## Module Organization
//!
//! - `store`: player records and command application
//! - `hub`: the membership event loop and its handle
//! - `client`: per-connection handle and the WebSocket read/write pumps
//! - `leaderboard`: HTTP client for the remote score service
//! - `network`: HTTP routes, WebSocket upgrade and the state broadcaster
//! - `config`: command line and environment configuration
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         address: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = Server::bind(config).await?;
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod leaderboard;
pub mod network;
pub mod store;
