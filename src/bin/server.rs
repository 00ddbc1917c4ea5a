//! Thin daemon harness: wires a [`Config`] from env/CLI, constructs the
//! [`ClientRegistry`], and starts the reaper/sweeper background tasks.
//!
//! This is deliberately not an HTTP or RPC server (out of scope per the
//! core's design) — it exists only to exercise `DATA_DIR`/`CLIENT_ID`/
//! `USE_FALLBACK` as real construction parameters and to keep the
//! background tasks alive for manual/integration testing.

use clap::Parser;
use engram::config::{Config, EmbeddingConfig};
use engram::queue::MessageQueue;
use engram::registry::ClientRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "engram-server", about = "Engram memory engine daemon")]
struct Args {
    /// Root directory under which every client's data is partitioned.
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<String>,

    /// Client id to pre-warm at startup, if any.
    #[arg(long, env = "CLIENT_ID")]
    client_id: Option<String>,

    /// Force the deterministic fallback embedder even if a network backend
    /// is compiled in.
    #[arg(long, env = "USE_FALLBACK", default_value_t = true)]
    use_fallback: bool,

    #[arg(long, env = "ENGRAM_EMBED_DIMENSIONS", default_value_t = 256)]
    embed_dimensions: usize,

    #[arg(long, env = "ENGRAM_IDLE_TTL_SECS", default_value_t = 3600)]
    idle_ttl_secs: u64,

    #[arg(long, env = "ENGRAM_REAPER_PERIOD_SECS", default_value_t = 300)]
    reaper_period_secs: u64,

    #[arg(long, env = "ENGRAM_SWEEPER_PERIOD_SECS", default_value_t = 60)]
    sweeper_period_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let data_dir = match args.data_dir {
        Some(raw) => PathBuf::from(shellexpand::tilde(&raw).into_owned()),
        None => engram::config::default_data_dir(),
    };

    let config = Config {
        data_dir,
        default_client_id: args.client_id.clone(),
        embedding: EmbeddingConfig {
            use_fallback: args.use_fallback,
            dimensions: args.embed_dimensions,
            ..EmbeddingConfig::default()
        },
        idle_ttl: std::time::Duration::from_secs(args.idle_ttl_secs),
        reaper_period: std::time::Duration::from_secs(args.reaper_period_secs),
        sweeper_period: std::time::Duration::from_secs(args.sweeper_period_secs),
        ..Config::default()
    };

    tracing::info!(data_dir = %config.data_dir.display(), "starting engram-server");

    let queue = Arc::new(MessageQueue::open(&config.data_dir.join("messages")).await?);
    let registry = Arc::new(ClientRegistry::new(config.clone(), queue.clone()));

    if let Some(client_id) = &args.client_id {
        registry.get(client_id).await?;
        tracing::info!(client_id, "pre-warmed client");
    }

    let reaper = tokio::spawn(registry.clone().run_reaper(config.reaper_period, config.idle_ttl));
    let sweeper = tokio::spawn(queue.clone().run_sweeper(config.sweeper_period));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    reaper.abort();
    sweeper.abort();
    Ok(())
}
