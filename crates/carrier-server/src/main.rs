mod config;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use carrier_api::auth::{AppState, AppStateInner};
use carrier_api::routes;
use carrier_hub::Hub;

use crate::config::Config;

/// Time in-flight payments get to finish after the listener stops.
const PAYMENT_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "carrier=debug,carrier_hub=debug,carrier_api=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;
    let addr = config.addr()?;

    // Init database
    let db = Arc::new(carrier_db::Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    let hub = Hub::new(db.clone(), config.hub_config());
    match hub.payments().reconcile().await {
        Ok(0) => {}
        Ok(n) => info!("Resumed {} pending payments", n),
        Err(e) => warn!("Payment reconciliation failed: {}", e),
    }

    let state: AppState = Arc::new(AppStateInner {
        db,
        hub: hub.clone(),
        keys_require_auth: config.keys_require_auth,
    });
    let app = routes::router(state);

    info!("Carrier relay listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub.payments().shutdown(PAYMENT_GRACE).await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
