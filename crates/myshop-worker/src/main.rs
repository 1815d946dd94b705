use anyhow::Result;
use clap::Parser;
use myshop_worker::{run, setup_signal_handler, Args};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder().format_timestamp_secs().init();

    let args = Args::parse();
    let shutdown_signal = setup_signal_handler().await;

    run(args, shutdown_signal).await
}
