// calculator-service-rs/src/gemini_client.rs
//
// Image analyzer backed by the Gemini generateContent API
//
// The image is sent inline as PNG next to a prompt that embeds the caller's
// variables. The model answers with a list of {expr, result, assign}
// dictionaries which reply_parser turns into records.
//
// Configuration (.env file):
// - GEMINI_API_KEY: API key (required for analysis; startup does not fail without it)
// - GEMINI_API_URL: API base URL (default: https://generativelanguage.googleapis.com/v1beta)
// - GEMINI_MODEL: Model to use (default: gemini-1.5-flash)
// - GEMINI_MAX_RETRIES: Maximum number of retry attempts (default: 3)
// - GEMINI_INITIAL_RETRY_DELAY_MS: Initial delay between retries in ms (default: 1000)
// - GEMINI_MAX_RETRY_DELAY_MS: Maximum delay between retries in ms (default: 30000)
// - GEMINI_TIMEOUT_SECS: Per-request timeout (default: 60)

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::analyzer::{AnalysisRecord, ImageAnalyzer, VariableMap};
use crate::error::{AnalyzerError, CalculatorError};
use crate::image_input::OpenedImage;
use crate::reply_parser::parse_reply;

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_retries: 3,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            timeout_secs: 60,
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: config_rs::get_env_string("GEMINI_API_KEY"),
            api_url: config_rs::get_env_string("GEMINI_API_URL").unwrap_or(defaults.api_url),
            model: config_rs::get_env_string("GEMINI_MODEL").unwrap_or(defaults.model),
            max_retries: config_rs::get_env_or("GEMINI_MAX_RETRIES", defaults.max_retries),
            initial_retry_delay_ms: config_rs::get_env_or(
                "GEMINI_INITIAL_RETRY_DELAY_MS",
                defaults.initial_retry_delay_ms,
            ),
            max_retry_delay_ms: config_rs::get_env_or(
                "GEMINI_MAX_RETRY_DELAY_MS",
                defaults.max_retry_delay_ms,
            ),
            timeout_secs: config_rs::get_env_or("GEMINI_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u32>,
}

/// Build the instruction prompt, embedding the caller's variables as JSON
pub fn build_prompt(vars: &VariableMap) -> String {
    let vars_json = serde_json::to_string(vars).unwrap_or_else(|_| "{}".to_string());

    format!(
        "You have been given an image with some mathematical expressions, equations, or graphical problems, and you need to solve them. \
Use the PEMDAS rule for solving mathematical expressions: Parentheses, Exponents, Multiplication and Division (left to right), Addition and Subtraction (left to right). \
For example: 2 + 3 * 4 is 2 + 12 = 14, and (2 + 3) * 4 is 5 * 4 = 20. \
The image contains exactly one of the following five kinds of problem:\n\
1. A simple expression like 2 + 2 or 3 * 4. Return a list with one dict, e.g. [{{'expr': '2 + 2', 'result': 4}}].\n\
2. A set of equations like x^2 + 2x + 1 = 0 or 3y + 4x = 0. Solve for every variable and return one dict per variable with 'assign': True, \
e.g. [{{'expr': 'x', 'result': 2, 'assign': True}}, {{'expr': 'y', 'result': 5, 'assign': True}}].\n\
3. Variable assignments like x = 4 or y = 5. Return one dict per assignment with 'assign': True, e.g. [{{'expr': 'x', 'result': 4, 'assign': True}}].\n\
4. A graphical math problem, i.e. a drawn word problem such as cars colliding, trigonometry, Pythagoras, or sports scenarios. \
Pay close attention to colours and annotations. Return a list with one dict, e.g. [{{'expr': 'given expression', 'result': 'calculated answer'}}].\n\
5. An abstract concept shown in a drawing, such as love, hate, patriotism, or a historic reference. \
Return a list with one dict where 'expr' is the explanation of the drawing and 'result' is the concept.\n\
Analyze the image and answer according to the matching rule. \
Here is a dictionary of user-assigned variables; if the image uses any of them, substitute their actual values: {vars_json}. \
Do not use backticks or markdown formatting. \
Quote all keys and values as Python string literals so the answer can be parsed with ast.literal_eval."
    )
}

/// Map a non-success HTTP status to an analyzer error
fn classify_status(status: StatusCode, text: String) -> AnalyzerError {
    match status.as_u16() {
        400 => AnalyzerError::InvalidRequest(format!("Bad request: {}", text)),
        401 => AnalyzerError::InvalidRequest(format!("Unauthorized: {}", text)),
        403 => AnalyzerError::InvalidRequest(format!("Forbidden: {}", text)),
        404 => AnalyzerError::InvalidRequest(format!("Not found: {}", text)),
        429 => AnalyzerError::RateLimited(text),
        500..=599 => AnalyzerError::Server(format!("({}) {}", status, text)),
        _ => AnalyzerError::Unknown(format!("({}) {}", status, text)),
    }
}

/// Concatenate the text parts of the first candidate
fn extract_text(response: GenerateContentResponse) -> Result<String, AnalyzerError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AnalyzerError::Parse("No candidates returned in response".to_string()))?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(AnalyzerError::Parse(format!(
            "Candidate contained no text (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}

#[derive(Debug)]
pub struct GeminiAnalyzer {
    client: Client,
    config: GeminiConfig,
}

impl GeminiAnalyzer {
    pub fn new(config: GeminiConfig) -> Result<Self, AnalyzerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalyzerError::Unknown(format!("Failed to build HTTP client: {}", e)))?;

        if config.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY is not set; image analysis requests will fail");
        }

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_retry_delay_ms))
            .with_max_interval(Duration::from_millis(self.config.max_retry_delay_ms))
            .with_multiplier(2.0)
            .with_max_elapsed_time(Some(Duration::from_secs(120)))
            .with_randomization_factor(0.5)
            .build()
    }

    /// Send a request, retrying transient failures with exponential backoff
    async fn generate(&self, request: &GenerateContentRequest) -> Result<String, AnalyzerError> {
        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        tracing::info!(
            "Preparing Gemini request to {} (model: {})",
            self.config.api_url,
            self.config.model
        );

        loop {
            attempt += 1;
            if attempt > 1 {
                tracing::info!("Retry attempt {} for Gemini request", attempt);
            }

            match self.execute_request(request).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    if !err.is_retryable() || attempt > self.config.max_retries {
                        tracing::error!("Gemini request failed after {} attempts: {}", attempt, err);
                        return Err(err);
                    }

                    match backoff.next_backoff() {
                        Some(delay) => {
                            let jitter = rand::thread_rng().gen_range(0..=200u64);
                            let delay = delay + Duration::from_millis(jitter);
                            tracing::warn!("Retryable error: {}. Retrying in {:?}", err, delay);
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!("Exceeded maximum backoff time: {}", err);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    // Single request attempt
    async fn execute_request(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<String, AnalyzerError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AnalyzerError::NotConfigured("GEMINI_API_KEY is not set".to_string()))?;

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AnalyzerError::Network(format!("Request timed out: {}", err))
                } else if err.is_connect() {
                    AnalyzerError::Network(format!("Connection failed: {}", err))
                } else {
                    AnalyzerError::Network(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let data: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Parse(format!("Failed to parse response: {}", e)))?;

        if let Some(total) = data.usage_metadata.as_ref().and_then(|u| u.total_token_count) {
            tracing::info!("Gemini request completed. Used {} tokens", total);
        }

        extract_text(data)
    }
}

#[async_trait]
impl ImageAnalyzer for GeminiAnalyzer {
    async fn analyze(
        &self,
        image: OpenedImage,
        vars: &VariableMap,
    ) -> Result<Vec<AnalysisRecord>, AnalyzerError> {
        if self.config.api_key.is_none() {
            return Err(AnalyzerError::NotConfigured(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }

        let png = image.to_png().map_err(|e| match e {
            CalculatorError::UnsupportedImage(detail) => AnalyzerError::Image(detail),
            other => AnalyzerError::Image(other.to_string()),
        })?;
        drop(image);

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: Some(build_prompt(vars)),
                        ..Default::default()
                    },
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: "image/png".to_string(),
                            data: STANDARD.encode(&png),
                        }),
                        ..Default::default()
                    },
                ],
            }],
        };

        let reply = self.generate(&request).await?;
        tracing::debug!(reply = %reply, "Gemini reply");

        let mut records = parse_reply(&reply);
        for record in &mut records {
            record.set_default("assign", Value::Bool(false));
        }

        Ok(records)
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }
}
