use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use marketplace_backend::config::AppConfig;
use marketplace_backend::{create_router, initialize_backend};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let bind_addr = config.bind_addr;
    let app_state = initialize_backend(config).await?;

    // Finish anything a previous run left half done before taking traffic
    let report = app_state.order_service.recover_in_flight().await?;
    if !report.still_in_flight.is_empty() {
        warn!(
            "{} payments still need attention: {:?}",
            report.still_in_flight.len(),
            report.still_in_flight
        );
    }

    let app = create_router(app_state)?;

    info!("Starting server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
