//! Local relay between the chat client and the analysis backend.
//!
//! The client never talks to the backend directly: it posts JSON to this
//! loopback route, which re-encodes the submission as the multipart form the
//! backend expects, forwards it, and shapes the reply back into the
//! `{success, data, error}` contract. Every call is independent; the relay
//! holds no state beyond its HTTP client and the backend address.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};

use crate::client::AnalysisModel;

const BODY_LIMIT: usize = 20 * 1024 * 1024;
const INVALID_REQUEST: &str = "Invalid request format";
const BACKEND_DOWN: &str =
    "Could not connect to the analysis backend. Please make sure it is running.";
const BACKEND_FAILED: &str = "Analysis failed";

/// JSON intake of the relay route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// JSON reply of the relay route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzeReply {
    fn done(content: String) -> Self {
        AnalyzeReply {
            success: true,
            data: Some(content),
            error: None,
        }
    }

    fn failure(explanation: impl Into<String>) -> Self {
        AnalyzeReply {
            success: false,
            data: None,
            error: Some(explanation.into()),
        }
    }
}

pub struct RelayState {
    backend_url: String,
    http: reqwest::Client,
}

impl RelayState {
    pub fn new(backend_url: impl Into<String>) -> Self {
        RelayState {
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind the relay on an ephemeral loopback port and serve it in the
/// background. Returns the bound address for the client to target.
pub async fn start(backend_url: String) -> Result<SocketAddr> {
    let state = Arc::new(RelayState::new(backend_url));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("failed to bind the analysis relay")?;
    let addr = listener.local_addr()?;
    tracing::info!("analysis relay listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("analysis relay stopped: {e}");
        }
    });

    Ok(addr)
}

/// One validated submission, ready to forward.
struct Submission {
    model: String,
    payload: Payload,
}

enum Payload {
    Image { bytes: Vec<u8>, mime: String },
    Text(String),
}

impl Submission {
    /// Image takes precedence when both are present; neither is a client
    /// error caught before any backend call.
    fn build(
        model: Option<String>,
        text: Option<String>,
        image: Option<(Vec<u8>, String)>,
    ) -> Result<Submission> {
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| AnalysisModel::default().id().to_string());

        let payload = if let Some((bytes, mime)) = image {
            Payload::Image { bytes, mime }
        } else if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            Payload::Text(text)
        } else {
            bail!("neither text nor image supplied");
        };

        Ok(Submission { model, payload })
    }

    fn from_json(request: AnalyzeRequest) -> Result<Submission> {
        let image = match request.image_data {
            Some(uri) => Some(decode_data_uri(&uri)?),
            None => None,
        };
        Submission::build(request.model, request.food_name, image)
    }
}

async fn analyze(State(state): State<Arc<RelayState>>, req: Request) -> Response {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let submission = if content_type.starts_with("application/json") {
        let bytes = match axum::body::to_bytes(req.into_body(), BODY_LIMIT).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!("failed to read request body: {e}");
                return invalid_request();
            }
        };
        let request: AnalyzeRequest = match serde_json::from_slice(&bytes) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("rejecting malformed analyze request: {e}");
                return invalid_request();
            }
        };
        match Submission::from_json(request) {
            Ok(submission) => submission,
            Err(e) => {
                tracing::debug!("rejecting analyze request: {e}");
                return invalid_request();
            }
        }
    } else if content_type.starts_with("multipart/form-data") {
        match read_multipart(req).await {
            Ok(submission) => submission,
            Err(e) => {
                tracing::debug!("rejecting multipart analyze request: {e}");
                return invalid_request();
            }
        }
    } else {
        return invalid_request();
    };

    let (status, reply) = forward(&state, submission).await;
    (status, Json(reply)).into_response()
}

async fn read_multipart(req: Request) -> Result<Submission> {
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|e| anyhow!("not a multipart body: {e}"))?;

    let mut model = None;
    let mut text = None;
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| anyhow!("broken multipart field: {e}"))?
    {
        match field.name() {
            Some("model") => model = Some(field.text().await?),
            Some("text") => text = Some(field.text().await?),
            Some("image") => {
                let mime = field.content_type().unwrap_or("image/png").to_string();
                image = Some((field.bytes().await?.to_vec(), mime));
            }
            _ => {}
        }
    }

    Submission::build(model, text, image)
}

async fn forward(state: &RelayState, submission: Submission) -> (StatusCode, AnalyzeReply) {
    let mut form = reqwest::multipart::Form::new().text("model", submission.model);
    match submission.payload {
        Payload::Image { bytes, mime } => {
            let part = match reqwest::multipart::Part::bytes(bytes)
                .file_name("upload")
                .mime_str(&mime)
            {
                Ok(part) => part,
                Err(_) => return (StatusCode::BAD_REQUEST, AnalyzeReply::failure(INVALID_REQUEST)),
            };
            form = form.part("image", part);
        }
        Payload::Text(text) => form = form.text("text", text),
    }

    let endpoint = format!("{}/api/analyze", state.backend_url);
    let response = match state.http.post(&endpoint).multipart(form).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("analysis backend unreachable at {endpoint}: {e}");
            return (StatusCode::BAD_GATEWAY, AnalyzeReply::failure(BACKEND_DOWN));
        }
    };

    // A non-JSON reply means the backend is down or something else answered
    // on its port; the body is not worth parsing.
    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);
    if !is_json {
        tracing::warn!("analysis backend returned a non-JSON reply");
        return (StatusCode::BAD_GATEWAY, AnalyzeReply::failure(BACKEND_DOWN));
    }

    let value: Value = match response.json().await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("failed to decode backend reply: {e}");
            return (StatusCode::BAD_GATEWAY, AnalyzeReply::failure(BACKEND_DOWN));
        }
    };

    let success = value
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !success {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or(BACKEND_FAILED)
            .to_string();
        return (StatusCode::BAD_REQUEST, AnalyzeReply::failure(error));
    }

    let content = extract_content(value.get("data").unwrap_or(&Value::Null));
    (StatusCode::OK, AnalyzeReply::done(content))
}

fn invalid_request() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(AnalyzeReply::failure(INVALID_REQUEST)),
    )
        .into_response()
}

/// Normalize the backend payload into one text block: strings pass through,
/// a `content` field wins over the rest, anything else is pretty-printed.
fn extract_content(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => {
            if let Some(content) = other.get("content").and_then(Value::as_str) {
                content.to_string()
            } else {
                serde_json::to_string_pretty(other).unwrap_or_default()
            }
        }
    }
}

fn decode_data_uri(uri: &str) -> Result<(Vec<u8>, String)> {
    let rest = uri
        .strip_prefix("data:")
        .context("image_data is not a data URI")?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .context("image_data is not base64-encoded")?;
    let mime = if mime.is_empty() {
        "image/png".to_string()
    } else {
        mime.to_string()
    };
    let bytes = BASE64
        .decode(payload)
        .context("image_data payload is not valid base64")?;
    Ok((bytes, mime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_payloads_pass_through() {
        assert_eq!(extract_content(&json!("Apple: 52 kcal...")), "Apple: 52 kcal...");
    }

    #[test]
    fn nested_content_field_wins() {
        let data = json!({ "content": "Rich in vitamin C", "score": 3 });
        assert_eq!(extract_content(&data), "Rich in vitamin C");
    }

    #[test]
    fn other_objects_are_pretty_printed() {
        let data = json!({ "calories": 52 });
        let text = extract_content(&data);
        assert!(text.contains("\"calories\": 52"));
    }

    #[test]
    fn data_uri_decodes_mime_and_bytes() {
        let uri = format!("data:image/jpeg;base64,{}", BASE64.encode(b"abc"));
        let (bytes, mime) = decode_data_uri(&uri).unwrap();
        assert_eq!(bytes, b"abc");
        assert_eq!(mime, "image/jpeg");
    }

    #[test]
    fn bad_data_uris_are_rejected() {
        assert!(decode_data_uri("http://example.com/a.png").is_err());
        assert!(decode_data_uri("data:image/png;base64,!!!").is_err());
        assert!(decode_data_uri("data:image/png,plain").is_err());
    }

    #[test]
    fn image_takes_precedence_over_text() {
        let submission = Submission::build(
            None,
            Some("apple".to_string()),
            Some((vec![1, 2, 3], "image/png".to_string())),
        )
        .unwrap();
        assert!(matches!(submission.payload, Payload::Image { .. }));
        assert_eq!(submission.model, "nutrix");
    }

    #[test]
    fn blank_submissions_are_rejected() {
        assert!(Submission::build(None, None, None).is_err());
        assert!(Submission::build(None, Some("   ".to_string()), None).is_err());
    }

    #[test]
    fn explicit_model_is_kept() {
        let submission =
            Submission::build(Some("gemini".to_string()), Some("rice".to_string()), None).unwrap();
        assert_eq!(submission.model, "gemini");
    }
}
