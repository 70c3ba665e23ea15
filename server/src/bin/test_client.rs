//! Headless bot that joins a running server, renames itself and wanders
//! around, printing each state update it receives.

use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use rand::Rng;
use shared::{Command, GameState};
use std::time::Duration;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the server
    #[arg(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Display name to announce after joining
    #[arg(short = 'n', long, default_value = "Rambo")]
    username: String,

    /// Number of moves to send before leaving
    #[arg(short, long, default_value = "10")]
    moves: u32,

    /// Milliseconds between moves
    #[arg(short, long, default_value = "500")]
    interval_ms: u64,
}

fn random_move() -> Command {
    let mut rng = rand::thread_rng();
    Command::Move {
        x: rng.gen_range(0.0..800.0),
        y: rng.gen_range(0.0..600.0),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let (socket, _) = connect_async(args.url.as_str()).await?;
    info!("Connected to {}", args.url);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let rename = Command::UpdateUsername {
        username: args.username.clone(),
    };
    ws_tx.send(Message::text(rename.to_json())).await?;

    let mut ticker = interval(Duration::from_millis(args.interval_ms));
    let mut sent = 0;

    while sent < args.moves {
        tokio::select! {
            _ = ticker.tick() => {
                let cmd = random_move();
                ws_tx.send(Message::text(cmd.to_json())).await?;
                sent += 1;
                if sent % 3 == 0 {
                    ws_tx.send(Message::text(Command::Shoot { target: None }.to_json())).await?;
                }
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<GameState>(text.as_str()) {
                            Ok(state) => {
                                println!("State update: {} players", state.len());
                                for player in state.players.values() {
                                    println!(
                                        "  {} ({}): pos=({:.1}, {:.1}) hp={} score={}",
                                        player.username, player.id, player.x, player.y,
                                        player.health, player.score
                                    );
                                }
                            }
                            Err(e) => warn!("Unexpected message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }

    ws_tx.send(Message::Close(None)).await?;
    info!("Sent {} moves, leaving", sent);
    Ok(())
}
