use anyhow::Result;
use std::sync::Arc;

use shiva_api::run as run_api;
use shiva_core::audit::spawn_audit_worker;
use shiva_core::{Config, ShivaContext};
use shiva_delivery::ResendDelivery;
use shiva_notify::run as run_notify;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Shiva support server");

    let config = Config::from_env();
    let delivery = Arc::new(ResendDelivery::new(&config.delivery)?);
    let (ctx, audit_rx) = ShivaContext::connect(config, delivery).await?;

    tracing::info!("Shiva context initialized");

    spawn_audit_worker(ctx.store.clone(), ctx.local, audit_rx);

    let ctx_clone = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_notify(ctx_clone).await {
            tracing::error!("Notification runner error: {}", e);
        }
    });

    // API server runs in main task
    tracing::info!("Starting API server");
    run_api(ctx).await?;

    Ok(())
}
