mod cli;
mod server;

use std::sync::Arc;

use clap::Parser;
use eyre::WrapErr;

use dogewire_core::electrum::{ElectrumApi, ElectrumClient};
use dogewire_core::RawTxCache;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let target = args.target();
    let client = ElectrumClient::new(target.clone(), args.network, args.client_options())
        .context("configure electrum client")?;

    // A dead upstream is not fatal: every request reconnects on demand, and
    // callers may retarget to another server.
    match client.get_height().await {
        Ok(height) => tracing::info!(%target, height, network = %args.network, "connected to electrum server"),
        Err(err) => tracing::warn!(%target, error = %err, "electrum server unreachable at startup"),
    }

    let state = server::AppState {
        electrum: Arc::new(client.clone()),
        cache: Arc::new(RawTxCache::default()),
        default_target: target,
    };

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let router = server::build_router(state);

    if args.bind == "0.0.0.0" {
        tracing::warn!("server is bound to 0.0.0.0 and reachable from the network");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("bind TCP listener")?;

    tracing::info!("listening on {bind_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("run HTTP server")?;

    client.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
