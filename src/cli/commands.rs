//! CLI command implementations
//!
//! Boot sequence for `start`: load config, initialize logging, construct
//! the bus, engine, and WebSocket server, then serve until ctrl-c. The
//! bus `Publisher` capability belongs to the mutation resolver layer;
//! embedders construct the same components through the library crate.

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::bus::EventBus;
use crate::config::ServerConfig;
use crate::engine::SubscriptionEngine;
use crate::schema::SubscriptionSchema;
use crate::server::WebSocketServer;

use super::args::{Cli, Command};
use super::errors::CliResult;

/// Parse arguments and dispatch to a command
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Command::Start { config } => start(&config),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Start the subscription server
pub fn start(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| super::errors::CliError::Runtime(e.to_string()))?;

    runtime.block_on(async {
        let bus = Arc::new(EventBus::new());
        let (_publisher, subscriber) = crate::bus::split(&bus);

        let schema = Arc::new(SubscriptionSchema::builtin());
        let engine = Arc::new(SubscriptionEngine::new(
            subscriber,
            schema,
            config.max_subscriptions_per_connection,
        ));

        let server = WebSocketServer::bind(&config, engine).await?;

        tokio::select! {
            result = server.run() => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received");
                server.shutdown();
            }
        }

        Ok(())
    })
}

/// Validate a configuration file and exit
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    println!("config ok: {}", config_path.display());
    println!("  bind_addr: {}", config.bind_addr);
    println!("  keepalive_interval_secs: {}", config.keepalive_interval_secs);
    println!(
        "  max_subscriptions_per_connection: {}",
        config.max_subscriptions_per_connection
    );
    Ok(())
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> CliResult<ServerConfig> {
    if path.exists() {
        Ok(ServerConfig::load(path)?)
    } else {
        eprintln!(
            "config file {} not found, using defaults",
            path.display()
        );
        Ok(ServerConfig::default())
    }
}
