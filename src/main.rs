use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};

use perp_gateway::api::{router, ApiState};
use perp_gateway::app::config::GatewayConfig;
use perp_gateway::app::orchestrator::Orchestrator;
use perp_gateway::core::domain::Venue;
use perp_gateway::core::venue::{hyperliquid, AdapterRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = GatewayConfig::from_env()?;
    config.init_logging();

    info!(venues = ?config.enabled_venues, "perp-gateway starting");

    let mut adapters = AdapterRegistry::new();
    adapters.register(Venue::Hyperliquid, hyperliquid::builder());

    let orchestrator = Orchestrator::build(&config, &adapters)?;
    orchestrator.initialize().await?;

    let state = ApiState {
        orchestrator: Arc::clone(&orchestrator),
    };
    let app = router(state, &config);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "gateway listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    orchestrator.shutdown(config.shutdown_grace).await;
    info!("perp-gateway stopped");
    Ok(())
}
