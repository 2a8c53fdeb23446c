use anyhow::Context;
use bounty_relayer::config::{RelayerCli, RelayerConfig};
use bounty_relayer::logging::{self, Phase};
use bounty_relayer::relayer::Relayer;
use clap::Parser as _;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = RelayerCli::parse();
    logging::init(&cli.log)?;

    let config = match RelayerConfig::try_from(cli) {
        Ok(config) => config,
        Err(e) => {
            error!(phase = %Phase::Err, "{}", e);
            std::process::exit(1);
        }
    };

    let relayer = Relayer::connect(&config).await.context("startup checks failed")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    relayer.run(shutdown).await.context("relayer stopped with an error")?;
    info!("relayer shut down");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            // SIGTERM not supported
            Err(_) => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm => {},
    }
    info!(phase = %Phase::Wait, "shutdown requested, finishing in-flight settlements");
    shutdown.cancel();
}
