//! Hearth gateway binary.
//!
//! `hearth-gateway` serves on `bind_addr`; `hearth-gateway --print-config` prints the
//! effective configuration (keys masked) and exits.

use hearth_core::{CoreConfig, LocalBroker};
use hearth_gateway::{build_router, AppState, VoiceProviders};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoreConfig::load()?;
    if std::env::args().any(|a| a == "--print-config") {
        println!("{}", config.to_toml_redacted()?);
        return Ok(());
    }

    let broker = LocalBroker::default();
    let state = AppState::new(&config, Arc::new(broker.clone()), VoiceProviders::from_config(&config));
    let _delivery = broker.spawn_delivery(state.router.clone());

    let app = build_router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(
        target: "hearth::gateway",
        addr = %config.bind_addr,
        correlation = ?config.correlator.mode,
        reply_wait_ms = config.correlator.reply_wait_ms,
        "hearth gateway listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
