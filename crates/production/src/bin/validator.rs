//! Palisade validator node binary.

use anyhow::Context;
use clap::Parser;
use palisade_bft::RecoveredState;
use palisade_node::NodeStateMachine;
use palisade_production::{
    serve, telemetry, NodeConfig, ProductionRunner, RocksLedgerStore, ServerContext, TcpTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "palisade-validator", about = "Palisade BFT validator node")]
struct Args {
    /// Path to the node configuration file.
    #[arg(long, short)]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    telemetry::init(&config.log_filter);

    // Configuration invariants are fatal: the node must not run
    // consensus on an unusable validator set.
    let signing_key = config.signing_key().context("signing key")?;
    let registry = config.registry().context("validator set")?.into_arc();

    let store = Arc::new(
        RocksLedgerStore::open(&config.data_dir).context("opening ledger store")?,
    );
    let recovered: RecoveredState = store.recovered_state().context("recovering chain tip")?;
    info!(
        validator = %registry.local_id(),
        last_confirmed = %recovered.last_confirmed,
        "Recovered chain state"
    );

    let node = NodeStateMachine::new(
        signing_key,
        registry,
        config.pbft_config(),
        recovered,
    );

    let transport = Arc::new(TcpTransport::new(Duration::from_secs(3)));
    let runner = ProductionRunner::new(node, transport, store.clone());

    let listener = TcpListener::bind((config.listen_host.as_str(), config.listen_port))
        .await
        .with_context(|| format!("binding {}:{}", config.listen_host, config.listen_port))?;
    info!(addr = %listener.local_addr()?, "Validator RPC listening");

    let server_ctx = ServerContext {
        event_tx: runner.event_sender(),
        store,
        shared: runner.shared(),
    };
    tokio::spawn(serve(listener, server_ctx));

    tokio::select! {
        _ = runner.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }
    Ok(())
}
