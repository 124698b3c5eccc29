use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};

use calculator_service::analyzer::{ImageAnalyzer, VariableMap, VariableValue};
use calculator_service::error::AnalyzerError;
use calculator_service::gemini_client::{GeminiAnalyzer, GeminiConfig};
use calculator_service::image_input::OpenedImage;

const API_KEY: &str = "test-gemini-key";
const FENCED_REPLY: &str = "```python\n[{'expr': '1+1', 'result': 2}]\n```";

/// Scripted stand-in for the generateContent endpoint
struct MockGemini {
    replies: Vec<(StatusCode, Value)>,
    hits: AtomicUsize,
    api_keys: Mutex<Vec<String>>,
    paths: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
}

impl MockGemini {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn mock_handler(
    State(mock): State<Arc<MockGemini>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let index = mock.hits.fetch_add(1, Ordering::SeqCst);
    mock.paths.lock().unwrap().push(uri.path().to_string());
    mock.bodies.lock().unwrap().push(body);
    if let Some(key) = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) {
        mock.api_keys.lock().unwrap().push(key.to_string());
    }

    // Past the end of the script the last reply repeats
    let (status, reply) = mock.replies[index.min(mock.replies.len() - 1)].clone();
    (status, Json(reply)).into_response()
}

async fn start_mock(replies: Vec<(StatusCode, Value)>) -> (String, Arc<MockGemini>) {
    let mock = Arc::new(MockGemini {
        replies,
        hits: AtomicUsize::new(0),
        api_keys: Mutex::new(Vec::new()),
        paths: Mutex::new(Vec::new()),
        bodies: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .fallback(mock_handler)
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/v1beta", addr), mock)
}

fn analyzer_for(api_url: String, max_retries: u32) -> GeminiAnalyzer {
    GeminiAnalyzer::new(GeminiConfig {
        api_key: Some(API_KEY.to_string()),
        api_url,
        max_retries,
        initial_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        timeout_secs: 5,
        ..GeminiConfig::default()
    })
    .unwrap()
}

fn candidate(text: &str) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"totalTokenCount": 12}
        }),
    )
}

fn unavailable() -> (StatusCode, Value) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        json!({"error": {"code": 503, "message": "The model is overloaded"}}),
    )
}

fn sample_image() -> OpenedImage {
    let img = image::RgbImage::from_fn(4, 4, |x, y| image::Rgb([(x * 60) as u8, (y * 60) as u8, 90]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    OpenedImage::open(buf.into_inner()).unwrap()
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let (api_url, mock) = start_mock(vec![unavailable(), unavailable(), candidate(FENCED_REPLY)]).await;
    let analyzer = analyzer_for(api_url, 3);

    let records = analyzer
        .analyze(sample_image(), &VariableMap::new())
        .await
        .unwrap();

    assert_eq!(mock.hits(), 3);
    assert_eq!(
        serde_json::to_value(&records).unwrap(),
        json!([{"expr": "1+1", "result": 2, "assign": false}])
    );
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let (api_url, mock) = start_mock(vec![(
        StatusCode::UNAUTHORIZED,
        json!({"error": {"code": 401, "message": "API key not valid"}}),
    )])
    .await;
    let analyzer = analyzer_for(api_url, 3);

    let result = analyzer.analyze(sample_image(), &VariableMap::new()).await;

    assert!(matches!(result, Err(AnalyzerError::InvalidRequest(_))));
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_retries_stop_after_max_retries() {
    let (api_url, mock) = start_mock(vec![unavailable(), unavailable(), unavailable()]).await;
    let analyzer = analyzer_for(api_url, 1);

    let result = analyzer.analyze(sample_image(), &VariableMap::new()).await;

    assert!(matches!(result, Err(AnalyzerError::Server(_))));
    assert_eq!(mock.hits(), 2);
}

#[tokio::test]
async fn test_request_carries_key_model_and_inline_png() {
    let (api_url, mock) = start_mock(vec![candidate("[{'expr': 'x', 'result': 4, 'assign': True}]")]).await;
    let analyzer = analyzer_for(api_url, 0);

    let mut vars = VariableMap::new();
    vars.insert("y".to_string(), VariableValue::Number(5.into()));
    let records = analyzer.analyze(sample_image(), &vars).await.unwrap();

    // An explicit assign from the model is kept
    assert_eq!(
        serde_json::to_value(&records).unwrap(),
        json!([{"expr": "x", "result": 4, "assign": true}])
    );

    assert_eq!(*mock.api_keys.lock().unwrap(), vec![API_KEY.to_string()]);
    assert_eq!(
        *mock.paths.lock().unwrap(),
        vec!["/v1beta/models/gemini-1.5-flash:generateContent".to_string()]
    );

    let bodies = mock.bodies.lock().unwrap();
    let parts = &bodies[0]["contents"][0]["parts"];
    assert!(parts[0]["text"].as_str().unwrap().contains(r#"{"y":5}"#));
    assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
    assert!(!parts[1]["inline_data"]["data"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_unparsable_reply_yields_no_records() {
    let (api_url, mock) = start_mock(vec![candidate("I could not read that drawing.")]).await;
    let analyzer = analyzer_for(api_url, 3);

    let records = analyzer
        .analyze(sample_image(), &VariableMap::new())
        .await
        .unwrap();

    assert!(records.is_empty());
    assert_eq!(mock.hits(), 1);
}
