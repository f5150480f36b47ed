use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::jwt::DEFAULT_TOKEN_TTL_SECS;

/// Command-line flags. Options left unset are not serialized, so they never
/// mask values from the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "p2pchat-server", version, about = "Peer-to-peer chat relay server")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "P2PCHAT_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "P2PCHAT_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./p2pchat.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "P2PCHAT_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Print an access token for the given user and exit
    #[arg(long, value_name = "USER")]
    #[serde(skip)]
    pub issue_token: Option<String>,

    /// Data directory for persistent state (DB, keys) [default: ./data]
    #[arg(long, env = "P2PCHAT_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Shared HS256 secret used by the external token issuer.
    /// When unset, a random key is generated in the data directory.
    #[arg(long, env = "P2PCHAT_JWT_SECRET", hide_env_values = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Lifetime in seconds of tokens printed by --issue-token [default: 3600]
    #[arg(long, env = "P2PCHAT_TOKEN_TTL_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_ttl_secs: Option<i64>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: i64,

    /// WebSocket heartbeat configuration (loaded from [websocket] section in TOML)
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Command-only flags, copied from the CLI after extraction
    #[serde(skip)]
    pub config: String,
    #[serde(skip)]
    pub generate_config: bool,
    #[serde(skip)]
    pub issue_token: Option<String>,
}

/// Heartbeat policy for chat connections. A connection that stops answering
/// pings is closed and its session removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Frames queued per connection before further pushes are dropped (default: 256)
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl WebSocketConfig {
    pub fn ping_interval(&self) -> Duration {
        // tokio's interval panics on a zero period
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }

    /// mpsc::channel panics on a zero capacity
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_buffer.max(1)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_outbound_buffer() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            websocket: WebSocketConfig::default(),
            config: "./p2pchat.toml".to_string(),
            generate_config: false,
            issue_token: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (P2PCHAT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(Cli::parse())
    }

    /// Layer already-parsed CLI arguments over defaults, TOML and environment.
    pub fn load_from(cli: Cli) -> Result<Self, figment::Error> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("P2PCHAT_").split("__"))
            .merge(Serialized::defaults(cli.clone()))
            .extract()?;

        config.config = cli.config;
        config.generate_config = cli.generate_config;
        config.issue_token = cli.issue_token;
        Ok(config)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# p2pchat relay server configuration
# Place this file at ./p2pchat.toml or specify with --config <path>
# All settings can be overridden via environment variables (P2PCHAT_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite message log and generated JWT key
# data_dir = "./data"

# Shared HS256 secret of the external token issuer.
# Leave unset to generate a random key in data_dir.
# jwt_secret = ""

# Lifetime of tokens printed by --issue-token, in seconds (default: 3600)
# token_ttl_secs = 3600

# ---- WebSocket heartbeat ----
# [websocket]

# Seconds between server pings (default: 30)
# ping_interval_secs = 30

# Seconds to wait for a pong before the connection is closed (default: 10)
# pong_timeout_secs = 10

# Frames queued per connection; pushes beyond this are dropped (default: 256)
# outbound_buffer = 256
"#
    .to_string()
}
