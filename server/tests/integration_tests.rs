//! Integration tests for the session server
//!
//! These tests run a real server on an ephemeral port and talk to it over
//! HTTP and WebSocket.

use futures::{SinkExt, StreamExt};
use server::config::ServerConfig;
use server::network::Server;
use server::store::PlayerStore;
use shared::{Command, GameState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    store: Arc<PlayerStore>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let server = Server::bind(ServerConfig {
            address: "127.0.0.1:0".to_string(),
            ..config
        })
        .await
        .expect("Failed to bind test server");

        let addr = server.local_addr().unwrap();
        let store = server.store();
        let (tx, rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = rx.await;
                })
                .await
                .expect("Server failed");
        });

        TestServer {
            addr,
            store,
            shutdown: Some(tx),
            task,
        }
    }

    async fn start_default() -> Self {
        Self::start(ServerConfig {
            tick_rate: 50,
            static_dir: std::env::temp_dir().join("no-such-static-dir"),
            ..ServerConfig::default()
        })
        .await
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn connect(&self) -> Socket {
        let (socket, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("WebSocket handshake failed");
        socket
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("Server did not stop")
            .unwrap();
    }
}

/// Polls the store until `check` holds, or panics after two seconds
async fn wait_for_store<F>(store: &PlayerStore, check: F) -> GameState
where
    F: Fn(&GameState) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let state = store.snapshot().await;
        if check(&state) {
            return state;
        }
        assert!(Instant::now() < deadline, "Store never reached expected state: {:?}", state);
        sleep(Duration::from_millis(10)).await;
    }
}

/// Reads broadcasts until one satisfies `check`, or panics after two seconds
async fn wait_for_broadcast<F>(socket: &mut Socket, check: F) -> GameState
where
    F: Fn(&GameState) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let frame = timeout(remaining, socket.next())
            .await
            .expect("Timed out waiting for broadcast")
            .expect("Connection closed")
            .expect("WebSocket error");

        if let Message::Text(text) = frame {
            let state: GameState = serde_json::from_str(text.as_str()).unwrap();
            if check(&state) {
                return state;
            }
        }
    }
}

async fn send(socket: &mut Socket, command: &Command) {
    socket.send(Message::text(command.to_json())).await.unwrap();
}

/// HTTP SURFACE TESTS
mod http_tests {
    use super::*;

    /// Tests the liveness probe
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let server = TestServer::start_default().await;

        let response = reqwest::get(server.http_url("/health")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "OK");

        server.stop().await;
    }

    /// Tests that the leaderboard route reports missing credentials
    #[tokio::test]
    async fn leaderboard_unconfigured_is_unavailable() {
        let server = TestServer::start_default().await;

        let response = reqwest::get(server.http_url("/leaderboard")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        server.stop().await;
    }

    /// Tests leaderboard proxying against a stubbed score service
    #[tokio::test]
    async fn leaderboard_returns_top_scores() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let scores = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/scores"))
            .and(query_param("limit", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "player_id": "a", "username": "Ace", "score": 30 },
                { "player_id": "b", "username": "Bee", "score": 20 }
            ])))
            .mount(&scores)
            .await;

        let server = TestServer::start(ServerConfig {
            leaderboard_url: Some(scores.uri()),
            leaderboard_api_key: Some("key".to_string()),
            ..ServerConfig::default()
        })
        .await;

        let response = reqwest::get(server.http_url("/leaderboard?limit=3"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["username"], "Ace");
        assert_eq!(body[1]["score"], 20);

        server.stop().await;
    }

    /// Tests that upstream failures become a gateway error
    #[tokio::test]
    async fn leaderboard_upstream_failure_is_bad_gateway() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let scores = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&scores)
            .await;

        let server = TestServer::start(ServerConfig {
            leaderboard_url: Some(scores.uri()),
            leaderboard_api_key: Some("key".to_string()),
            ..ServerConfig::default()
        })
        .await;

        let response = reqwest::get(server.http_url("/leaderboard")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);

        server.stop().await;
    }
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    /// Join, rename, observe the broadcast, leave
    #[tokio::test]
    async fn join_rename_and_leave() {
        let server = TestServer::start_default().await;
        let mut socket = server.connect().await;

        let state = wait_for_store(&server.store, |s| s.len() == 1).await;
        let player = state.players.values().next().unwrap();
        assert_eq!(player.username, format!("Player_{}", &player.id[..8]));
        assert_eq!((player.x, player.y, player.health, player.score), (100.0, 100.0, 100, 0));

        send(
            &mut socket,
            &Command::UpdateUsername {
                username: "Rambo".to_string(),
            },
        )
        .await;

        let broadcast = wait_for_broadcast(&mut socket, |s| {
            s.players.values().any(|p| p.username == "Rambo")
        })
        .await;
        assert_eq!(broadcast.len(), 1);

        socket.close(None).await.unwrap();
        wait_for_store(&server.store, |s| s.is_empty()).await;

        server.stop().await;
    }

    /// Moves are applied verbatim and reach the mover's own broadcast
    #[tokio::test]
    async fn move_is_broadcast() {
        let server = TestServer::start_default().await;
        let mut socket = server.connect().await;
        wait_for_store(&server.store, |s| s.len() == 1).await;

        send(&mut socket, &Command::Move { x: 150.5, y: 200.3 }).await;

        let state = wait_for_broadcast(&mut socket, |s| {
            s.players.values().any(|p| p.x == 150.5 && p.y == 200.3)
        })
        .await;
        assert_eq!(state.len(), 1);

        server.stop().await;
    }

    /// Every client sees every other client
    #[tokio::test]
    async fn clients_see_each_other() {
        let server = TestServer::start_default().await;
        let mut first = server.connect().await;
        let mut second = server.connect().await;

        wait_for_store(&server.store, |s| s.len() == 2).await;
        wait_for_broadcast(&mut first, |s| s.len() == 2).await;
        wait_for_broadcast(&mut second, |s| s.len() == 2).await;

        drop(second);
        wait_for_store(&server.store, |s| s.len() == 1).await;
        wait_for_broadcast(&mut first, |s| s.len() == 1).await;

        server.stop().await;
    }

    /// Shutting the server down closes open sessions
    #[tokio::test]
    async fn shutdown_closes_sessions() {
        let server = TestServer::start_default().await;
        let mut socket = server.connect().await;
        wait_for_store(&server.store, |s| s.len() == 1).await;

        let store = Arc::clone(&server.store);
        server.stop().await;
        assert!(store.is_empty().await);

        let closed = timeout(Duration::from_secs(2), async {
            loop {
                match socket.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "Session was not closed on shutdown");
    }
}

/// STRESS AND ERROR HANDLING TESTS
mod error_handling_tests {
    use super::*;

    /// Malformed frames are dropped without closing the connection
    #[tokio::test]
    async fn malformed_messages_keep_connection_open() {
        let server = TestServer::start_default().await;
        let mut socket = server.connect().await;
        wait_for_store(&server.store, |s| s.len() == 1).await;

        for raw in ["not json", "{}", r#"{"type":"move","data":{"x":"left"}}"#] {
            socket.send(Message::text(raw)).await.unwrap();
        }
        socket
            .send(Message::binary(vec![0xff, 0xfe, 0xfd]))
            .await
            .unwrap();

        send(&mut socket, &Command::Move { x: 1.0, y: 2.0 }).await;
        wait_for_broadcast(&mut socket, |s| {
            s.players.values().any(|p| p.x == 1.0 && p.y == 2.0)
        })
        .await;

        assert_eq!(server.store.len().await, 1);
        server.stop().await;
    }

    /// Unknown command types are accepted and change nothing
    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let server = TestServer::start_default().await;
        let mut socket = server.connect().await;
        let before = wait_for_store(&server.store, |s| s.len() == 1).await;
        let id = before.players.keys().next().unwrap().clone();

        socket
            .send(Message::text(r#"{"type":"taunt","data":{}}"#))
            .await
            .unwrap();
        // Frames are applied in order, so seeing the move means the taunt was handled
        send(&mut socket, &Command::Move { x: 5.0, y: 5.0 }).await;
        wait_for_broadcast(&mut socket, |s| s.players.get(&id).is_some_and(|p| p.x == 5.0))
            .await;

        let mut expected = before.players[&id].clone();
        expected.x = 5.0;
        expected.y = 5.0;
        assert_eq!(server.store.get(&id).await, Some(expected));
        assert_eq!(server.store.len().await, 1);

        server.stop().await;
    }
}
