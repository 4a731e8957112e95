use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use trading_bot::api;
use trading_bot::app::App;
use trading_bot::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required by rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!(
                "Make sure .env file exists with APCA_API_KEY_ID and APCA_API_SECRET_KEY, \
                 or set ingest.provider = \"simulated\" and broker.mode = \"mock\""
            );
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
            }),
        )
        .with_writer(std::io::stdout)
        .with_ansi(false)
        .json()
        .init();

    tracing::info!(
        provider = ?config.ingest.provider,
        broker = ?config.broker.mode,
        bind = %config.server.bind,
        "Starting trading-bot"
    );

    let app = Arc::new(App::from_config(&config)?);

    for symbol in config.ingest.tradable_symbols() {
        let status = app.start_market_stream(&symbol).await;
        tracing::info!(symbol = %symbol, status = %status, "Initial stream request");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!(addr = %config.server.bind, "HTTP server listening");

    axum::serve(listener, api::router(app.clone()))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Ctrl-C received, shutting down");
        })
        .await
        .context("HTTP server failed")?;

    app.shutdown().await;
    Ok(())
}
