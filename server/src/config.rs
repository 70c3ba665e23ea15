use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments, with environment fallbacks for container deploys
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// State broadcasts per second
    #[arg(short, long, default_value = "30")]
    pub tick_rate: u32,

    /// Outbound messages a client may have queued before it is evicted
    #[arg(short = 'q', long, default_value = "256")]
    pub send_queue: usize,

    /// Directory of static frontend assets
    #[arg(long, env = "STATIC_DIR", default_value = "../frontend/dist")]
    pub static_dir: PathBuf,

    /// Base URL of the score service
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// API key for the score service
    #[arg(long, env = "SUPABASE_API_KEY", hide_env_values = true)]
    pub supabase_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub tick_rate: u32,
    /// Per-client outbound queue capacity; the backpressure eviction threshold
    pub send_queue: usize,
    pub static_dir: PathBuf,
    pub leaderboard_url: Option<String>,
    pub leaderboard_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            tick_rate: 30,
            send_queue: 256,
            static_dir: PathBuf::from("../frontend/dist"),
            leaderboard_url: None,
            leaderboard_api_key: None,
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate.max(1)))
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            address: format!("{}:{}", args.host, args.port),
            tick_rate: args.tick_rate,
            send_queue: args.send_queue,
            static_dir: args.static_dir,
            leaderboard_url: args.supabase_url,
            leaderboard_api_key: args.supabase_api_key,
        }
    }
}
