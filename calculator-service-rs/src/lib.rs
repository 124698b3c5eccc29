use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub mod analyzer;
pub mod config;
pub mod error;
pub mod gemini_client;
pub mod image_input;
pub mod reply_parser;
pub mod validation;

use analyzer::{AnalysisRecord, ImageAnalyzer, VariableMap};
use config::CalculatorConfig;
use error::{AnalyzerError, CalculatorError};
use gemini_client::GeminiAnalyzer;
use image_input::OpenedImage;
use validation::payload_limit_config;

/// Mount point of the calculate endpoint
pub const CALCULATE_PATH: &str = "/calculate";

pub const SUCCESS_MESSAGE: &str = "Image processed";
pub const SUCCESS_STATUS: &str = "success";

/// Calculate request body (JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    /// `data:<mime>;base64,<payload>`
    pub image: String,
    pub dict_of_vars: VariableMap,
}

/// Calculate response body (JSON)
#[derive(Debug, Serialize, Deserialize)]
pub struct CalculationResponse {
    pub message: String,
    pub data: Vec<AnalysisRecord>,
    pub status: String,
}

impl CalculationResponse {
    pub fn processed(data: Vec<AnalysisRecord>) -> Self {
        Self {
            message: SUCCESS_MESSAGE.to_string(),
            data,
            status: SUCCESS_STATUS.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub uptime_seconds: u64,
    pub status: String,
    pub checked_at: String,
}

pub type AppState = Arc<CalculatorService>;

/// Calculator service state and routes
pub struct CalculatorService {
    analyzer: Arc<dyn ImageAnalyzer>,
    config: CalculatorConfig,
    started_at: Instant,
}

impl CalculatorService {
    pub fn new(config: CalculatorConfig, analyzer: Arc<dyn ImageAnalyzer>) -> Self {
        Self {
            analyzer,
            config,
            started_at: Instant::now(),
        }
    }

    /// Build the service with the Gemini analyzer described by `config`
    pub fn from_config(config: CalculatorConfig) -> Result<Self, AnalyzerError> {
        let analyzer = GeminiAnalyzer::new(config.gemini.clone())?;
        Ok(Self::new(config, Arc::new(analyzer)))
    }

    pub fn max_payload_size(&self) -> usize {
        self.config.max_payload_size
    }

    pub fn is_analyzer_configured(&self) -> bool {
        self.analyzer.is_configured()
    }

    /// Create the Axum router with all routes and middleware
    pub fn create_router(self: Arc<Self>) -> Router {
        let limit = self.max_payload_size();

        Router::new()
            .route("/", get(Self::root_handler))
            .route("/health", get(Self::health_handler))
            .route(CALCULATE_PATH, post(Self::run_calculation))
            .layer(middleware::from_fn_with_state(
                self.clone(),
                validation::validate_request_middleware,
            ))
            .layer(DefaultBodyLimit::max(limit))
            .layer(payload_limit_config(limit))
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(self)
    }

    async fn root_handler() -> impl IntoResponse {
        Json(serde_json::json!({ "message": "Server is running" }))
    }

    async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
        let configured = state.is_analyzer_configured();

        Json(HealthResponse {
            healthy: configured,
            service_name: "calculator-service".to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            status: if configured { "SERVING" } else { "DEGRADED" }.to_string(),
            checked_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// POST /calculate - decode the image, run the analyzer, return its records in order
    #[tracing::instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
    async fn run_calculation(
        State(state): State<AppState>,
        Json(data): Json<ImageData>,
    ) -> Result<Json<CalculationResponse>, CalculatorError> {
        let image = OpenedImage::from_data_url(&data.image)?;
        tracing::info!(
            format = ?image.format(),
            bytes = image.bytes().len(),
            vars = data.dict_of_vars.len(),
            "Analyzing image"
        );

        let records = state.analyzer.analyze(image, &data.dict_of_vars).await?;

        tracing::info!(records = records.len(), "Image processed");
        if let Some(last) = records.last() {
            tracing::debug!(record = ?last, "Last analyzer record");
        }

        Ok(Json(CalculationResponse::processed(records)))
    }
}
