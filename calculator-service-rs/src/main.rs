// calculator-service-rs/src/main.rs
// Calculator Service - reads handwritten math from images
// Port 8900 - HTTP/JSON entry point for the drawing client

use std::sync::Arc;

use calculator_service::config::CalculatorConfig;
use calculator_service::{CalculatorService, CALCULATE_PATH};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Before the subscriber so RUST_LOG may come from .env
    let loaded_dotenv = config_rs::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match loaded_dotenv {
        Some(path) => tracing::info!("Loaded environment from {}", path.display()),
        None => tracing::debug!("No .env file found, using process environment only"),
    }

    let config = CalculatorConfig::from_env();
    let addr = config.bind_addr;

    tracing::info!("Environment: {}", config.environment);
    tracing::info!("Using Gemini model: {}", config.gemini.model);

    let service = Arc::new(CalculatorService::from_config(config)?);
    if !service.is_analyzer_configured() {
        tracing::warn!("Analyzer is not configured - {} will return 503", CALCULATE_PATH);
    }

    let app = service.create_router();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Calculator service starting on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
