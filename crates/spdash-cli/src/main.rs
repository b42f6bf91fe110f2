//! Command-line interface for the spdash state bridge.

mod viewer;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spdash_core::{config::env_vars, BridgeConfig, StateSchema};
use spdash_store::{RedisBackend, StoreClient};
use spdash_sync::{Command as SetCommand, SyncState, Synchronizer};

/// spdash - live view of the shared SP state store.
#[derive(Parser, Debug)]
#[command(name = "spdash")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML). Falls back to SPDASH_CONFIG.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for the first full read in one-shot commands.
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge and serve the dashboard API.
    Serve {
        /// Host to bind to.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print every variable as a Key/Type/Value table.
    Dump {
        /// Glob filter on keys, e.g. "robot_*".
        #[arg(short, long)]
        pattern: Option<String>,
    },
    /// Show one variable in detail.
    Get {
        key: String,
    },
    /// Write one or more variables. Exits non-zero if any is rejected.
    Set {
        /// Assignments as KEY=VALUE; all are validated before any is written.
        #[arg(required = true, value_parser = parse_assignment)]
        assignments: Vec<(String, String)>,
    },
}

fn parse_assignment(arg: &str) -> std::result::Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", arg)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = BridgeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let wait = Duration::from_secs(args.timeout);

    match args.command {
        Command::Serve { host, port } => run_server(config, host, port).await,
        Command::Dump { pattern } => run_dump(config, wait, pattern).await,
        Command::Get { key } => run_get(config, wait, key).await,
        Command::Set { assignments } => run_set(config, wait, assignments).await,
    }
}

fn init_logging() {
    // JSON output for container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spdash=info"));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_schema(path: Option<&Path>) -> Result<StateSchema> {
    match path {
        Some(path) => StateSchema::load(path)
            .with_context(|| format!("Failed to load schema {}", path.display())),
        None => {
            tracing::info!("No schema configured, accepting commands for any key");
            Ok(StateSchema::permissive())
        }
    }
}

/// Build the store client and start the synchronizer.
fn start_bridge(config: &BridgeConfig) -> Result<Synchronizer> {
    let schema = load_schema(config.schema_path.as_deref())?;
    let backend = Arc::new(RedisBackend::new(config.store.clone())?);
    let client = StoreClient::new(backend, config.store.clone());
    tracing::info!("Using store {}", config.store.display_url());
    Ok(Synchronizer::start(client, schema, config.sync.clone()))
}

/// Wait until the first full read has completed.
async fn wait_until_live(sync: &Synchronizer, wait: Duration) -> Result<()> {
    let mut states = sync.subscribe_state();
    let reached = tokio::time::timeout(wait, states.wait_for(|s| *s == SyncState::Live)).await;
    match reached {
        Ok(Ok(_)) => Ok(()),
        _ => {
            let status = sync.status();
            let reason = status
                .store
                .last_error
                .unwrap_or_else(|| format!("state is {}", status.state));
            bail!("Store not reachable within {:?}: {}", wait, reason)
        }
    }
}

async fn run_server(config: BridgeConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut server = config.server.clone();
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }
    let bind = server.bind_addr()?;

    let sync = start_bridge(&config)?;
    spdash_api::run(bind, sync).await
}

async fn run_dump(config: BridgeConfig, wait: Duration, pattern: Option<String>) -> Result<()> {
    let sync = start_bridge(&config)?;
    let result = wait_until_live(&sync, wait).await;
    if result.is_ok() {
        print!("{}", viewer::render_table(&sync.current_snapshot(), pattern.as_deref()));
    }
    sync.shutdown().await;
    result
}

async fn run_get(config: BridgeConfig, wait: Duration, key: String) -> Result<()> {
    let sync = start_bridge(&config)?;
    let result: Result<()> = async {
        wait_until_live(&sync, wait).await?;
        let snapshot = sync.current_snapshot();
        let var = snapshot
            .get(&key)
            .with_context(|| format!("Variable '{}' not found", key))?;
        print!(
            "{}",
            viewer::render_detail(var, sync.schema().get(&key), snapshot.stale.as_ref())
        );
        Ok(())
    }
    .await;
    sync.shutdown().await;
    result
}

async fn run_set(
    config: BridgeConfig,
    wait: Duration,
    assignments: Vec<(String, String)>,
) -> Result<()> {
    let sync = start_bridge(&config)?;
    let result: Result<()> = async {
        wait_until_live(&sync, wait).await?;
        let commands = assignments
            .into_iter()
            .map(|(key, value)| SetCommand::set_text(key, value))
            .collect();
        let receipts = sync.submit_batch(commands).await?;
        for receipt in receipts {
            println!("{} = {}", receipt.target, receipt.value);
        }
        Ok(())
    }
    .await;
    sync.shutdown().await;
    result
}
