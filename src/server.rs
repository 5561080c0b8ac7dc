//! HTTP surface: JSON/multipart image routes plus gallery, speech and health.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::{Credentials, ServiceContext};
use crate::error::ImageError;
use crate::gallery::{GalleryItem, GalleryReader};
use crate::model::ProviderKind;
use crate::orchestrator::{execute, GenerationResult};
use crate::payload::{ImagePayload, Upload};
use crate::request::{parse_operation, OperationKind, RequestFields};
use crate::speech::{SpeechClient, ELEVENLABS_KEY_HEADER};

/// Headroom above the two image uploads for text fields and multipart framing.
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Shared state for every handler. Nothing per-caller lives here.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    client: Client,
}

impl AppState {
    /// Bundle configuration and the shared HTTP client.
    #[must_use]
    pub fn new(config: Arc<Config>, client: Client) -> Self {
        Self { config, client }
    }

    fn body_limit(&self) -> usize {
        let limit = self.config.limits.max_image_bytes.saturating_mul(2) + FORM_OVERHEAD_BYTES;
        usize::try_from(limit).unwrap_or(usize::MAX)
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.body_limit();
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/edit", post(edit_handler))
        .route("/api/blend", post(blend_handler))
        .route("/api/tryon", post(tryon_handler))
        .route("/api/comic", post(comic_handler))
        .route("/api/tts", post(tts_handler))
        .route("/api/gallery", get(gallery_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(config: Arc<Config>, client: Client, addr: &str) -> Result<(), ImageError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "imagefuse server listening");

    axum::serve(listener, router(AppState::new(config, client)))
        .with_graceful_shutdown(async {
            // a failed signal handler just means no graceful shutdown
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

impl IntoResponse for ImageError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn credentials(headers: &HeaderMap) -> Credentials {
    Credentials::new(
        header_value(headers, ProviderKind::Gemini.credential_header()),
        header_value(headers, ProviderKind::Fal.credential_header()),
        header_value(headers, ELEVENLABS_KEY_HEADER),
    )
}

fn bad_body(reason: impl std::fmt::Display) -> ImageError {
    ImageError::Validation(format!("unreadable request body: {reason}"))
}

/// Collect fields from a multipart form or a JSON object, by content type.
async fn read_fields(request: Request, state: &AppState) -> Result<RequestFields, ImageError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"));

    if !is_multipart {
        let body = Bytes::from_request(request, state).await.map_err(|e| bad_body(e.body_text()))?;
        let value: Value = serde_json::from_slice(&body).map_err(bad_body)?;
        return RequestFields::from_json(value);
    }

    let mut multipart =
        Multipart::from_request(request, state).await.map_err(|e| bad_body(e.body_text()))?;
    let mut fields = RequestFields::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| bad_body(e.body_text()))? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(|e| bad_body(e.body_text()))?.to_vec();
            fields.insert_file(name, Upload { file_name, content_type, bytes });
        } else {
            let text = field.text().await.map_err(|e| bad_body(e.body_text()))?;
            fields.insert_text(name, text);
        }
    }
    Ok(fields)
}

/// Parse, check credentials, normalize and generate within the request deadline.
async fn generate(
    state: &AppState,
    headers: &HeaderMap,
    request: Request,
    kind: OperationKind,
) -> Result<GenerationResult, ImageError> {
    let ctx = ServiceContext::live(credentials(headers), Arc::clone(&state.config), state.client.clone());
    let normalizer = ctx.normalizer();

    let fields = read_fields(request, state).await?;
    let request = parse_operation(kind, fields, &normalizer)?;
    debug!(provider = %request.provider, operation = request.operation.name(), "parsed request");

    let deadline = state.config.server.request_timeout();
    tokio::time::timeout(deadline, execute(request, &ctx, &normalizer))
        .await
        .map_err(|_| ImageError::DeadlineExceeded(deadline))?
}

fn data_uris(images: &[ImagePayload]) -> Vec<String> {
    images.iter().map(ImagePayload::data_uri).collect()
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn edit_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<Value>, ImageError> {
    let result = generate(&state, &headers, request, OperationKind::Edit).await?;
    Ok(Json(json!({ "images": data_uris(&result.images), "provider": result.provider })))
}

async fn blend_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<Value>, ImageError> {
    let result = generate(&state, &headers, request, OperationKind::Blend).await?;
    let images = data_uris(&result.images);
    Ok(Json(json!({
        "image": images.first(),
        "images": images,
        "provider": result.provider,
        "degraded": result.degraded,
    })))
}

async fn tryon_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<Value>, ImageError> {
    let result = generate(&state, &headers, request, OperationKind::TryOn).await?;
    Ok(Json(json!({
        "image": result.images.first().map(ImagePayload::data_uri),
        "provider": result.provider,
        "degraded": result.degraded,
    })))
}

async fn comic_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<Value>, ImageError> {
    let result = generate(&state, &headers, request, OperationKind::Comic).await?;
    Ok(Json(json!({ "panels": data_uris(&result.images), "provider": result.provider })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TtsBody {
    #[serde(default)]
    text: String,
    voice_id: Option<String>,
}

async fn tts_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TtsBody>, JsonRejection>,
) -> Result<Response, ImageError> {
    let Json(body) = body.map_err(|e| bad_body(e.body_text()))?;
    let speech = SpeechClient::new(
        state.client.clone(),
        credentials(&headers).elevenlabs().map(str::to_string),
        state.config.elevenlabs.clone(),
    );
    let audio = speech.synthesize(&body.text, body.voice_id.as_deref()).await?;
    Ok(([(CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}

#[derive(Debug, Deserialize)]
struct GalleryQuery {
    repo: Option<String>,
    branch: Option<String>,
}

async fn gallery_handler(
    State(state): State<AppState>,
    Query(query): Query<GalleryQuery>,
) -> Result<Json<Vec<GalleryItem>>, ImageError> {
    let reader = GalleryReader::new(state.client.clone(), state.config.gallery.clone());
    let items = reader.list_gallery(query.repo.as_deref(), query.branch.as_deref()).await?;
    Ok(Json(items))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use axum::http::StatusCode;

    use super::*;

    // PNG signature only; enough for the adapters, which never decode pixels.
    const PNG_SIGNATURE_B64: &str = "iVBORw0KGgo=";
    const BOUNDARY: &str = "imagefuse-test-boundary";

    fn app(config: Config) -> Router {
        router(AppState::new(Arc::new(config), Client::new()))
    }

    fn json_request(uri: &str, body: &Value, key: Option<(&str, &str)>) -> HttpRequest<Body> {
        let mut builder =
            HttpRequest::builder().method("POST").uri(uri).header(CONTENT_TYPE, "application/json");
        if let Some((name, value)) = key {
            builder = builder.header(name, value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn multipart_request(
        uri: &str,
        texts: &[(&str, &str)],
        files: &[(&str, &str, &[u8])],
        key: (&str, &str),
    ) -> HttpRequest<Body> {
        let mut body = Vec::new();
        for (name, value) in texts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        for (name, file_name, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; \
                     filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .header(key.0, key.1)
            .body(Body::from(body))
            .unwrap()
    }

    async fn read_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn png_bytes() -> Vec<u8> {
        vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]
    }

    async fn gemini_stub() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [
                    { "inlineData": { "mimeType": "image/png", "data": PNG_SIGNATURE_B64 } }
                ] } }]
            })))
            .mount(&server)
            .await;
        server
    }

    fn gemini_config(server: &MockServer) -> Config {
        let mut config = Config::default();
        config.gemini.api_base = server.uri();
        config.gemini.model = "test-model".into();
        config
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app(Config::default())
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let (status, body) = read_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn edit_without_key_is_bad_request() {
        let body = json!({ "imageUrl": "https://example.invalid/cat.png", "instruction": "hat" });
        let response =
            app(Config::default()).oneshot(json_request("/api/edit", &body, None)).await.unwrap();
        let (status, body) = read_json(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Missing Gemini API key"));
    }

    #[tokio::test]
    async fn unknown_provider_is_bad_request() {
        let body = json!({ "imageUrl": "https://x/cat.png", "provider": "midjourney" });
        let response = app(Config::default())
            .oneshot(json_request("/api/edit", &body, Some(("x-gemini-key", "k"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn multipart_edit_returns_data_uris() {
        let server = gemini_stub().await;
        let png = png_bytes();
        let request = multipart_request(
            "/api/edit",
            &[("instruction", "add a hat"), ("variants", "2")],
            &[("imageFile", "cat.png", &png)],
            ("x-gemini-key", "g-key"),
        );

        let (status, body) = read_json(app(gemini_config(&server)).oneshot(request).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["provider"], "gemini");
        let images = body["images"].as_array().unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0], format!("data:image/png;base64,{PNG_SIGNATURE_B64}"));
    }

    #[tokio::test]
    async fn json_comic_returns_four_panels() {
        let server = gemini_stub().await;
        Mock::given(method("GET"))
            .and(path("/persona.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png_bytes()),
            )
            .mount(&server)
            .await;

        let body = json!({
            "personaUrl": format!("{}/persona.png", server.uri()),
            "style": "noir",
            "panels": ["wakes", "coffee", "code", "ship"],
        });
        let response = app(gemini_config(&server))
            .oneshot(json_request("/api/comic", &body, Some(("x-gemini-key", "g-key"))))
            .await
            .unwrap();
        let (status, body) = read_json(response).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["panels"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn comic_on_fal_is_bad_request() {
        let png = png_bytes();
        let request = multipart_request(
            "/api/comic",
            &[("provider", "fal"), ("style", "noir"), ("panels", r#"["a","b","c","d"]"#)],
            &[("personaFile", "me.png", &png)],
            ("x-fal-key", "f-key"),
        );
        let response = app(Config::default()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn fal_blend_is_marked_degraded() {
        let server = MockServer::start().await;
        let uri = server.uri();
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(header("authorization", "Key f-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "job-9",
                "status": "succeeded",
                "result": { "images": [{ "url": format!("{uri}/out.png") }] }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/out.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes()))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.fal.submit_url = format!("{uri}/submit");
        config.fal.jobs_url = format!("{uri}/jobs");

        let png = png_bytes();
        let request = multipart_request(
            "/api/blend",
            &[("provider", "fal"), ("instruction", "fuse")],
            &[("baseFile", "base.png", &png), ("refFile", "ref.png", &png)],
            ("x-fal-key", "f-key"),
        );
        let (status, body) = read_json(app(config).oneshot(request).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["degraded"], true);
        assert_eq!(body["provider"], "fal");
        assert_eq!(body["image"], body["images"][0]);
    }

    #[tokio::test]
    async fn unreachable_source_is_bad_gateway() {
        let body = json!({ "imageUrl": "http://127.0.0.1:9/cat.png" });
        let response = app(Config::default())
            .oneshot(json_request("/api/edit", &body, Some(("x-gemini-key", "k"))))
            .await
            .unwrap();
        let (status, body) = read_json(response).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            body["error"],
            "Upstream fetch failed (Gemini/Fal). Check local network/proxy/SSL."
        );
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/blend")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app(Config::default()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn gallery_without_repo_is_bad_request() {
        let request = HttpRequest::builder().uri("/api/gallery").body(Body::empty()).unwrap();
        let response = app(Config::default()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
