//! # Tidewire Node
//!
//! Standalone sequenced-packet server. Accepts TCP peers, acknowledges every
//! data frame they send and logs reactor and pipeline statistics.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults (0.0.0.0:7400)
//! tidewire-node
//!
//! # Config file with a bind override
//! tidewire-node --config node.toml --bind 127.0.0.1:9000
//!
//! # Verbose logging
//! RUST_LOG=tidewire_transport=debug tidewire-node
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tidewire_node::Node;
use tidewire_transport::config::NodeConfig;

/// Tidewire sequenced-packet node.
#[derive(Parser, Debug)]
#[command(name = "tidewire-node", version, about = "Tidewire sequenced-packet node")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address, overriding `[acceptor] bind`.
    #[arg(long, short)]
    bind: Option<SocketAddr>,

    /// Seconds between statistics log lines.
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Configuration ───────────────────────────────────────────
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.acceptor.bind = bind;
    }

    tracing::info!(
        bind = %config.acceptor.bind,
        config = ?cli.config,
        poll_timeout_ms = config.reactor.poll_timeout.as_millis() as u64,
        "tidewire-node starting"
    );

    // ── Node ────────────────────────────────────────────────────
    let mut node = Node::start(&config).context("starting node")?;

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })
        .context("installing signal handler")?;
    }

    // ── Main loop ───────────────────────────────────────────────
    let stats_interval = Duration::from_secs(cli.stats_interval.max(1));
    let mut last_stats_log = Instant::now();

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));

        if last_stats_log.elapsed() >= stats_interval {
            let stats = serde_json::to_string(&node.stats()).context("serializing stats")?;
            tracing::info!(%stats, "node stats");
            last_stats_log = Instant::now();
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────
    let final_stats = node.stats();
    node.shutdown();
    tracing::info!(
        packets = final_stats.pipeline.packets_received,
        acks_sent = final_stats.pipeline.acks_sent,
        dispatches = final_stats.reactor.dispatches,
        "tidewire-node stopped"
    );

    Ok(())
}
