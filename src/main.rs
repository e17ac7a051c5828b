//! streamtap - local multi-service proxy supervisor.
//!
//! Validates the requested bind address against the host's interfaces, then
//! starts each enabled service (DNS hijack, RTMP relay, TCP forward) and
//! blocks until every service task has ended. Fatal startup errors exit
//! non-zero with a diagnostic naming the failing service; everything after
//! startup is observable only via logs.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use streamtap::config::{Args, Config};
use streamtap::{services, Supervisor};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over the CLI default.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_args(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        "starting streamtap"
    );

    let mut supervisor = Supervisor::new();

    if let Some(dns) = &config.dns {
        services::dns::launch(dns, config.bind, &mut supervisor).await?;
    }
    if let Some(rtmp) = &config.rtmp {
        services::rtmp::launch(rtmp, config.bind, &mut supervisor).await?;
    }
    if let Some(forward) = &config.forward {
        services::forward::launch(forward, config.bind, &mut supervisor).await?;
    }

    if supervisor.is_empty() {
        info!("no services enabled, exiting");
        return Ok(());
    }

    // Runs until fatal error or external signal; service tasks have no
    // normal termination condition.
    supervisor.wait().await;
    Ok(())
}
