//! Funding monitor entry point.
//!
//! Subscribes to `ProjectFunded` events of the configured contract and logs
//! every funded project together with its on-chain record until Ctrl-C or
//! until the event stream fails for good.

use std::sync::Arc;

use reqwest::Client;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use monitor::{
    Config, LogSubscriber, Monitor, Reconciler, RpcChainReader, RpcClient, TracingObserver,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load optional .env file (ignored if missing) so RUST_LOG can live there too.
    let _ = dotenvy::dotenv();

    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    // One HTTP client for both the log subscription and the contract reads.
    let client = Client::builder().timeout(config.request_timeout).build()?;
    let rpc = Arc::new(RpcClient::new(client, config.rpc_url.clone()));

    let reader = RpcChainReader::new(Arc::clone(&rpc), config.contract_address);
    let reconciler = Reconciler::new(reader, config.read_consistency);

    info!(
        contract = %reconciler.reader().contract(),
        rpc_url = %rpc.url(),
        consistency = ?reconciler.consistency(),
        "Starting funding monitor"
    );

    let subscriber = LogSubscriber::new(rpc, config.poll_settings());
    let mut monitor = Monitor::new(
        subscriber,
        config.contract_address,
        reconciler,
        Arc::new(TracingObserver),
    );
    monitor.start().await?;

    let outcome = tokio::select! {
        result = monitor.wait() => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            Ok(())
        }
    };

    monitor.stop().await;
    outcome?;
    Ok(())
}
