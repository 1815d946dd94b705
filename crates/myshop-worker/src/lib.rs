//! # myshop-worker
//!
//! Runs the purchase indexer against an EVM JSON-RPC node and serves the
//! shop catalog, purchase queries and indexer diagnostics over HTTP.
//!
//! The binary wires three pieces from `myshop-sync` together:
//!
//! - **Chain client**: [`adapters::EvmRpcAdapter`] (`eth_blockNumber`,
//!   `eth_getLogs`, `eth_call`).
//! - **Indexer**: a `PurchaseIndexer` restored from its snapshot and
//!   spawned as one background task.
//! - **HTTP facade**: [`server::configure`] on an actix-web server.
//!
//! Ctrl-C stops the HTTP server, stops the indexer loop and flushes the
//! snapshot before exiting.

pub mod adapters;
pub mod server;


use actix_web::{web, App, HttpServer};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use log::{error, info, warn};
use myshop_sync::{
    ChainClientAdapter, IndexerConfig, MetricsRegistry, PersistConfig, PurchaseIndexer,
    QueryService, SyncError, SyncResult,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use crate::adapters::EvmRpcAdapter;
use crate::server::{configure, cors, AppState};

/// Command-line arguments for `myshop-worker`. Every option can also be
/// set through the environment.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,
    #[arg(long, env = "CHAIN_ID")]
    pub chain_id: u64,
    #[arg(long, env = "ITEMS_ADDRESS")]
    pub items_address: String,
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, env = "PORT", default_value_t = 8787)]
    pub port: u16,
    #[arg(
        long,
        env = "ENABLE_INDEXER",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub enable_indexer: bool,
    #[arg(long, env = "INDEXER_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,
    #[arg(long, env = "INDEXER_LOOKBACK_BLOCKS", default_value_t = 5000)]
    pub lookback_blocks: u64,
    #[arg(long, env = "INDEXER_REPLAY_LOOKBACK_BLOCKS", default_value_t = 12)]
    pub replay_lookback_blocks: u64,
    #[arg(
        long,
        env = "INDEXER_DEDUPE_WINDOW_BLOCKS",
        default_value_t = 5000,
        help = "Retention window in blocks; 0 disables age-out"
    )]
    pub dedupe_window_blocks: u64,
    #[arg(long, env = "INDEXER_MAX_RECORDS", default_value_t = 5000)]
    pub max_records: usize,
    #[arg(long, env = "INDEXER_MAX_BACKOFF_MS", default_value_t = 15000)]
    pub max_backoff_ms: u64,
    #[arg(
        long,
        env = "INDEXER_PERSIST",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub persist: bool,
    #[arg(
        long,
        env = "INDEXER_PERSIST_PATH",
        help = "Snapshot path; setting it also enables persistence"
    )]
    pub persist_path: Option<PathBuf>,
}

impl Args {
    pub fn indexer_config(&self) -> SyncResult<IndexerConfig> {
        let items_address = Address::from_str(self.items_address.trim()).map_err(|e| {
            SyncError::Config(format!("invalid items address {}: {}", self.items_address, e))
        })?;
        if self.max_records == 0 {
            return Err(SyncError::Config("max records must be at least 1".to_string()));
        }

        Ok(IndexerConfig {
            chain_id: self.chain_id,
            items_address,
            enabled: self.enable_indexer,
            poll_interval_ms: self.poll_interval_ms,
            lookback_blocks: self.lookback_blocks,
            replay_lookback_blocks: self.replay_lookback_blocks,
            dedupe_window_blocks: self.dedupe_window_blocks,
            max_records: self.max_records,
            max_backoff_ms: self.max_backoff_ms,
            persist: PersistConfig {
                enabled: self.persist || self.persist_path.is_some(),
                path: self.persist_path.clone(),
                ..Default::default()
            },
        })
    }
}

/// Handle Ctrl-C: the first signal requests a graceful shutdown, a second
/// one exits immediately.
pub async fn setup_signal_handler() -> Arc<AtomicBool> {
    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let shutdown_requested_clone = shutdown_requested.clone();

    tokio::spawn(async move {
        loop {
            match signal::ctrl_c().await {
                Ok(()) => {
                    if shutdown_requested_clone.load(Ordering::SeqCst) {
                        warn!("Second Ctrl-C received, exiting immediately");
                        std::process::exit(1);
                    }
                    info!("Shutdown signal received, press Ctrl-C again to force exit");
                    shutdown_requested_clone.store(true, Ordering::SeqCst);
                }
                Err(err) => {
                    error!("Error setting up signal handler: {}", err);
                    break;
                }
            }
        }
    });

    shutdown_requested
}

async fn wait_for(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Start the indexer and the HTTP server, and run until `shutdown` is set
/// or the server exits.
pub async fn run(args: Args, shutdown: Arc<AtomicBool>) -> Result<()> {
    let config = args.indexer_config()?;
    info!(
        "Starting myshop worker for {} on chain {} via {}",
        config.items_address, config.chain_id, args.rpc_url
    );

    let client = Arc::new(EvmRpcAdapter::new(args.rpc_url.clone()));
    if !client.is_connected().await {
        warn!("RPC node at {} is not reachable yet; polls will retry", args.rpc_url);
    }
    let metrics = Arc::new(MetricsRegistry::new());
    let indexer = PurchaseIndexer::new(client, config, metrics.indexer.clone());

    let indexer_handle = if indexer.is_enabled() {
        indexer.restore().await;
        Some(indexer.start())
    } else {
        info!("Indexer disabled; purchase queries go to the chain");
        None
    };

    let app_state = web::Data::new(AppState {
        query: QueryService::new(indexer.clone()),
        metrics,
        chain_id: args.chain_id,
        rpc_url: args.rpc_url.clone(),
    });

    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors())
            .app_data(app_state.clone())
            .configure(configure::<EvmRpcAdapter>)
    })
    .bind((args.host.as_str(), args.port))
    .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?
    .disable_signals()
    .run();
    let server_handle = server.handle();
    let mut server_task = tokio::spawn(server);

    info!("HTTP server running at http://{}:{}", args.host, args.port);

    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => info!("HTTP server exited"),
                Ok(Err(e)) => error!("HTTP server failed: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
        }
        _ = wait_for(shutdown) => {
            info!("Stopping HTTP server");
            server_handle.stop(true).await;
        }
    }

    indexer.shutdown(indexer_handle).await;
    info!("Shutdown complete");
    Ok(())
}
