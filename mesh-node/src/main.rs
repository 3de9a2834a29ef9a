//! docmesh node binary.
//!
//! ```bash
//! docmesh-node --config docmesh.toml
//! ```

use anyhow::Context;
use clap::Parser;
use docmesh_node::{Config, Node};
use docmesh_store::MemoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docmesh-node", about = "Run a docmesh peer", version)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, default_value = "docmesh.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let node = Node::new(config, Arc::new(MemoryStore::new()));
    let addr = node.start().await.context("starting node")?;
    tracing::info!(%addr, "ready; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    node.stop().await;
    Ok(())
}
