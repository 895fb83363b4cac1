//! Configuration for Tag Warden
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::time::Duration;

use crate::db::PoolConfig;
use crate::membership::{DiscordConfig, RoleId};
use crate::reconcile::{LoopOptions, TagTrackerSettings};

/// Tag Warden - keeps a guild role in sync with members' server tags
#[derive(Parser, Debug, Clone)]
#[command(name = "tag-warden")]
#[command(about = "Grants a guild role to members displaying the server tag")]
pub struct Args {
    /// MongoDB configuration
    #[command(flatten)]
    pub mongo: MongoArgs,

    /// Tag tracker configuration
    #[command(flatten)]
    pub tracker: TrackerArgs,

    /// Discord REST configuration
    #[command(flatten)]
    pub discord: DiscordArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// MongoDB connection and pool configuration
#[derive(Parser, Debug, Clone)]
pub struct MongoArgs {
    /// MongoDB connection URI for the primary pool
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// Optional secondary pool (e.g. analytics replica)
    #[arg(long, env = "MONGODB_SECONDARY_URI")]
    pub mongodb_secondary_uri: Option<String>,

    #[arg(long, env = "MONGODB_MAX_POOL_SIZE", default_value = "100")]
    pub max_pool_size: u32,

    #[arg(long, env = "MONGODB_MIN_POOL_SIZE", default_value = "10")]
    pub min_pool_size: u32,

    #[arg(long, env = "MONGODB_MAX_IDLE_TIME_MS", default_value = "30000")]
    pub max_idle_time_ms: u64,

    #[arg(long, env = "MONGODB_SERVER_SELECTION_TIMEOUT_MS", default_value = "5000")]
    pub server_selection_timeout_ms: u64,

    #[arg(long, env = "MONGODB_CONNECT_TIMEOUT_MS", default_value = "10000")]
    pub connect_timeout_ms: u64,

    /// Round trip deadline, also bounds health probes
    #[arg(long, env = "MONGODB_SOCKET_TIMEOUT_MS", default_value = "20000")]
    pub socket_timeout_ms: u64,
}

/// Tag tracker settings and scheduling
#[derive(Parser, Debug, Clone)]
pub struct TrackerArgs {
    /// Enable the tag tracker
    #[arg(long, env = "TAG_TRACKER_ENABLED", default_value = "false")]
    pub tag_tracker_enabled: bool,

    /// Server tag that earns the role (exact, case-sensitive)
    #[arg(long, env = "SERVER_TAG")]
    pub server_tag: Option<String>,

    /// Role granted to tagged members
    #[arg(long, env = "TAG_ROLE_ID")]
    pub tag_role_id: Option<u64>,

    /// Seconds between tag checks
    #[arg(long, env = "TAG_CHECK_INTERVAL_SECS", default_value = "300")]
    pub tag_check_interval_secs: u64,

    /// Guilds reconciled concurrently
    #[arg(long, env = "TAG_SCOPE_CONCURRENCY", default_value = "2")]
    pub tag_scope_concurrency: usize,

    /// Role changes in flight per guild
    #[arg(long, env = "TAG_MUTATION_CONCURRENCY", default_value = "4")]
    pub tag_mutation_concurrency: usize,
}

/// Discord REST API access
#[derive(Parser, Debug, Clone)]
pub struct DiscordArgs {
    /// Bot token; the tag tracker does not start without it
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub discord_token: Option<String>,

    #[arg(long, env = "DISCORD_API_URL", default_value = "https://discord.com/api/v10")]
    pub discord_api_url: String,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,
}

impl Args {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_pool_size: self.mongo.max_pool_size,
            min_pool_size: self.mongo.min_pool_size,
            max_idle_time: Duration::from_millis(self.mongo.max_idle_time_ms),
            server_selection_timeout: Duration::from_millis(self.mongo.server_selection_timeout_ms),
            connect_timeout: Duration::from_millis(self.mongo.connect_timeout_ms),
            socket_timeout: Duration::from_millis(self.mongo.socket_timeout_ms),
            ..PoolConfig::default()
        }
    }

    pub fn tag_tracker_settings(&self) -> TagTrackerSettings {
        TagTrackerSettings {
            enabled: self.tracker.tag_tracker_enabled,
            server_tag: self.tracker.server_tag.clone(),
            role_id: self.tracker.tag_role_id.map(RoleId),
        }
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            period: Duration::from_secs(self.tracker.tag_check_interval_secs),
            scope_concurrency: self.tracker.tag_scope_concurrency,
            mutation_concurrency: self.tracker.tag_mutation_concurrency,
            ..LoopOptions::default()
        }
    }

    /// `None` when no bot token is configured
    pub fn discord_config(&self) -> Option<DiscordConfig> {
        let token = self.discord.discord_token.as_deref()?.trim();
        if token.is_empty() {
            return None;
        }

        Some(DiscordConfig {
            api_url: self.discord.discord_api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            request_timeout: Duration::from_millis(self.discord.request_timeout_ms),
            ..DiscordConfig::default()
        })
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.tracker.tag_check_interval_secs == 0 {
            return Err("TAG_CHECK_INTERVAL_SECS must be greater than zero".to_string());
        }

        if self.tracker.tag_scope_concurrency == 0 || self.tracker.tag_mutation_concurrency == 0 {
            return Err("TAG_SCOPE_CONCURRENCY and TAG_MUTATION_CONCURRENCY must be at least 1".to_string());
        }

        if !matches!(self.log_format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(format!("LOG_FORMAT must be text or json, got {}", self.log_format));
        }

        self.pool_config().validate().map_err(|e| e.to_string())
    }
}
