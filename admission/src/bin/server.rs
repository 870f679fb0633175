//! Admission server.
//!
//! Serves the purchase, check-in and payment-notification API and runs the
//! expiry sweeper.
//!
//! # Usage
//!
//! ```bash
//! # In-memory store with the mock gateway
//! STORE_BACKEND=memory GATEWAY_MOCK=true GATEWAY_SERVER_KEY=dev cargo run --bin admission-server
//! ```

use admission::{Application, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,admission=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🎟️ Starting admission server...");

    let config = Config::from_env();
    tracing::info!(
        store = ?config.server.store_backend,
        port = config.server.port,
        gateway_mock = config.gateway.mock,
        gateway_production = config.gateway.production,
        sweeper_interval_secs = config.sweeper.interval,
        pending_ttl_secs = config.sweeper.pending_ttl,
        "Configuration loaded"
    );

    let app = Application::build(config).await?;
    tracing::info!("✓ Application initialized");

    app.run().await
}
