//! Tag Warden - server tag role sync for Discord guilds

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tag_warden::{
    config::Args,
    db::{MongoConnector, MongoHandle, PoolRegistry, DEFAULT_HEALTH_CHECK_INTERVAL, PRIMARY},
    lifecycle::ReadinessGate,
    membership::DiscordClient,
    reconcile::{LoopHandle, ReconciliationLoop, StaticSettings},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tag_warden={},info", args.log_level).into());
    if args.json_logs() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Tag Warden - server tag role sync");
    info!("======================================");
    info!("MongoDB: {}", args.mongo.mongodb_uri);
    if let Some(ref uri) = args.mongo.mongodb_secondary_uri {
        info!("MongoDB secondary: {}", uri);
    }
    info!(
        "Pool: {}-{} connections, health check every {}s",
        args.mongo.min_pool_size,
        args.mongo.max_pool_size,
        DEFAULT_HEALTH_CHECK_INTERVAL.as_secs()
    );
    info!(
        "Tag tracker: {} (tag: {}, role: {})",
        if args.tracker.tag_tracker_enabled { "ENABLED" } else { "DISABLED" },
        args.tracker.server_tag.as_deref().unwrap_or("-"),
        args.tracker
            .tag_role_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    info!("Tag check interval: {}s", args.tracker.tag_check_interval_secs);
    info!("======================================");

    // Store pools connect lazily; startup initialization only warms them up
    let registry = PoolRegistry::<MongoConnector>::new();
    registry.register(MongoHandle::new(
        PRIMARY,
        &args.mongo.mongodb_uri,
        args.pool_config(),
        MongoConnector::default(),
    )?);
    if let Some(ref uri) = args.mongo.mongodb_secondary_uri {
        registry.register(MongoHandle::new(
            "secondary",
            uri,
            args.pool_config(),
            MongoConnector::default(),
        )?);
    }

    let failures = registry.initialize_all().await;
    if failures.is_empty() {
        info!("MongoDB connected successfully");
    } else {
        warn!(
            "{} MongoDB pool(s) unavailable, will retry on first use",
            failures.len()
        );
    }
    for status in registry.statuses().await {
        info!(connection = %status.name, state = ?status.state, "Connection pool status");
    }

    let tracker = match args.discord_config() {
        Some(discord_config) => Some(start_tracker(&args, DiscordClient::new(discord_config)?)),
        None => {
            warn!("DISCORD_TOKEN not set, tag tracker will not run");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Some(handle) = tracker {
        handle.stop_and_join().await;
    }
    registry.close_all().await;
    for status in registry.statuses().await {
        info!(
            connection = %status.name,
            state = ?status.state,
            last_healthy_at = ?status.last_healthy_at,
            "Connection pool released"
        );
    }

    info!("Tag Warden stopped");
    Ok(())
}

/// Spawn the reconciliation loop. Its first tick waits until the bot token
/// has been verified against the REST API.
fn start_tracker(args: &Args, discord: DiscordClient) -> LoopHandle {
    let discord = Arc::new(discord);
    let readiness = ReadinessGate::new();

    let tracker = Arc::new(ReconciliationLoop::new(
        discord.clone(),
        discord.clone(),
        Arc::new(StaticSettings(args.tag_tracker_settings())),
        args.loop_options(),
    ));
    let handle = Arc::clone(&tracker).start(readiness.clone());

    let stop = tracker.stop_signal();
    tokio::spawn(async move {
        tokio::select! {
            result = discord.current_user() => match result {
                Ok(user) => {
                    info!(user = %user.username, id = %user.id, "Logged in to Discord");
                    readiness.mark_ready();
                }
                Err(e) => error!(error = %e, "Discord token check failed, tag tracker stays idle"),
            },
            _ = stop.stopped() => {}
        }
    });

    handle
}
