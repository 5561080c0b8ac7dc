//! Live adapter for the Gemini `generateContent` image API.

use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::GeminiConfig;
use crate::error::ImageError;
use crate::model::ProviderKind;
use crate::payload::ImagePayload;
use crate::ports::{fan_out, Capabilities, ImageProvider, ProviderFuture};
use crate::prompt;

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,([A-Za-z0-9+/=]+)").expect("static regex")
});

static BARE_PNG_BASE64: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"iVBORw0KGgo[A-Za-z0-9+/=]{100,}").expect("static regex"));

/// Live Gemini provider bound to one caller's API key.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    settings: GeminiConfig,
}

impl GeminiProvider {
    /// Create a provider for a single request.
    #[must_use]
    pub fn new(client: Client, api_key: String, settings: GeminiConfig) -> Self {
        Self { client, api_key, settings }
    }

    fn endpoint(&self) -> String {
        let model = self.settings.model.trim_start_matches("models/");
        format!("{}/models/{model}:generateContent", self.settings.api_base.trim_end_matches('/'))
    }

    async fn post(&self, body: &Value) -> Result<(StatusCode, String), ImageError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        // an unreadable error body is reported as empty rather than masking the status
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }

    /// One synchronous generation call: prompt text first, then the images in order.
    async fn generate(
        &self,
        prompt: &str,
        images: Vec<&ImagePayload>,
    ) -> Result<ImagePayload, ImageError> {
        let mut parts = vec![json!({ "text": prompt })];
        parts.extend(images.iter().map(|image| {
            json!({ "inline_data": { "mime_type": image.mime, "data": image.to_base64() } })
        }));
        info!(model = %self.settings.model, images = images.len(), "gemini generateContent");

        let (mut status, mut text) = self.post(&request_body(&parts, true)).await?;
        if is_mime_rejection(status, &text) {
            warn!("gemini rejected responseMimeType, retrying without it");
            (status, text) = self.post(&request_body(&parts, false)).await?;
        }

        if !status.is_success() {
            return Err(ImageError::provider(ProviderKind::Gemini, status.as_u16(), &text));
        }

        let parsed: GeminiResponse = serde_json::from_str(&text).map_err(|e| {
            ImageError::provider(
                ProviderKind::Gemini,
                status.as_u16(),
                &format!("Failed to parse response: {e}"),
            )
        })?;

        let bytes = extract_image(&parsed)?;
        debug!(size = bytes.len(), "gemini returned image");
        Ok(ImagePayload::from_output(bytes))
    }
}

impl ImageProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(ProviderKind::Gemini)
    }

    fn edit<'a>(
        &'a self,
        image: &'a ImagePayload,
        prompt: &'a str,
    ) -> ProviderFuture<'a, ImagePayload> {
        Box::pin(async move { self.generate(&prompt::edit_prompt(prompt), vec![image]).await })
    }

    fn blend<'a>(
        &'a self,
        base: &'a ImagePayload,
        reference: &'a ImagePayload,
        prompt: &'a str,
    ) -> ProviderFuture<'a, ImagePayload> {
        Box::pin(
            async move { self.generate(&prompt::edit_prompt(prompt), vec![base, reference]).await },
        )
    }

    fn comic_panels<'a>(
        &'a self,
        persona: &'a ImagePayload,
        style: &'a str,
        panel_texts: &'a [String],
    ) -> ProviderFuture<'a, Vec<ImagePayload>> {
        Box::pin(async move {
            let prompts: Vec<String> =
                panel_texts.iter().map(|text| prompt::comic_panel_prompt(style, text)).collect();
            let prompts = &prompts;
            fan_out(prompts.len(), move |i| self.generate(&prompts[i], vec![persona])).await
        })
    }
}

fn request_body(parts: &[Value], negotiate_mime: bool) -> Value {
    let mut generation_config = json!({ "responseModalities": ["TEXT", "IMAGE"] });
    if negotiate_mime {
        generation_config["responseMimeType"] = json!("image/png");
    }
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config
    })
}

/// Some keys and models refuse explicit output-mime negotiation with a 400.
fn is_mime_rejection(status: StatusCode, body: &str) -> bool {
    status == StatusCode::BAD_REQUEST && body.to_ascii_lowercase().contains("allowed mimetypes")
}

/// Pull the output image out of a response.
///
/// Structured inline parts win; scanning text parts for embedded base64 is
/// the last resort for model/key combinations that answer that way.
fn extract_image(response: &GeminiResponse) -> Result<Vec<u8>, ImageError> {
    let parts = response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| c.parts.as_slice())
        .unwrap_or_default();

    if let Some(inline) = parts.iter().find_map(|p| p.inline_data.as_ref()) {
        return decode(&inline.data);
    }

    if let Some(b64) = parts.iter().filter_map(|p| p.text.as_deref()).find_map(find_base64_image) {
        debug!("recovered image from text part");
        return decode(b64);
    }

    Err(ImageError::NoImageInResponse { provider: ProviderKind::Gemini.display_name().into() })
}

fn find_base64_image(text: &str) -> Option<&str> {
    if let Some(m) = DATA_URL.captures(text).and_then(|c| c.get(1)) {
        return Some(m.as_str());
    }
    BARE_PNG_BASE64.find(text).map(|m| m.as_str())
}

fn decode(b64: &str) -> Result<Vec<u8>, ImageError> {
    base64::engine::general_purpose::STANDARD.decode(b64.trim()).map_err(|e| {
        ImageError::provider(ProviderKind::Gemini, 200, &format!("Failed to decode base64: {e}"))
    })
}

// --- Gemini API response types ---

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Deserialize)]
struct GeminiInlineData {
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    // 8x8 RGB PNG
    const PNG_B64: &str = concat!(
        "iVBORw0KGgoAAAANSUhEUgAAAAgAAAAICAIAAABLbSncAAAA00lEQVR4AQHIADf/AIBAIIBAIIBAIIBAIIBAIIBAIIBA",
        "IIBAIACAQCCAQCCAQCCAQCCAQCCAQCCAQCCAQCAAgEAggEAggEAggEAggEAggEAggEAggEAgAIBAIIBAIIBAIIBAIIBA",
        "IIBAIIBAIIBAIACAQCCAQCCAQCCAQCCAQCCAQCCAQCCAQCAAgEAggEAggEAggEAggEAggEAggEAggEAgAIBAIIBAIIBA",
        "IIBAIIBAIIBAIIBAIIBAIACAQCCAQCCAQCCAQCCAQCCAQCCAQCCAQCD6AzgBO0TriwAAAABJRU5ErkJggg=="
    );

    fn parse(value: &Value) -> GeminiResponse {
        serde_json::from_value(value.clone()).unwrap()
    }

    fn provider(server: &MockServer) -> GeminiProvider {
        let settings = GeminiConfig { api_base: server.uri(), model: "test-model".into() };
        GeminiProvider::new(Client::new(), "test-key".into(), settings)
    }

    fn input() -> ImagePayload {
        ImagePayload { bytes: vec![0x89, b'P', b'N', b'G'], mime: "image/png".into() }
    }

    fn inline_reply(data: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": data } }] } }] })
    }

    #[test]
    fn extracts_camel_case_inline_data() {
        let bytes = extract_image(&parse(&inline_reply("AQID"))).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn extracts_snake_case_inline_data() {
        let reply = json!({ "candidates": [{ "content": { "parts": [
            { "text": "here you go" },
            { "inline_data": { "mime_type": "image/png", "data": "AQID" } }
        ] } }] });
        assert_eq!(extract_image(&parse(&reply)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn inline_data_wins_over_text() {
        let reply = json!({ "candidates": [{ "content": { "parts": [
            { "text": format!("data:image/png;base64,{PNG_B64}") },
            { "inlineData": { "data": "AQID" } }
        ] } }] });
        assert_eq!(extract_image(&parse(&reply)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn falls_back_to_data_url_in_text() {
        let reply = json!({ "candidates": [{ "content": { "parts": [
            { "text": "Sure! data:image/jpeg;base64,AQID is your image" }
        ] } }] });
        assert_eq!(extract_image(&parse(&reply)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn falls_back_to_bare_png_run() {
        let reply = json!({ "candidates": [{ "content": { "parts": [
            { "text": format!("Result:\n{PNG_B64}\nEnjoy") }
        ] } }] });
        let bytes = extract_image(&parse(&reply)).unwrap();
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn short_png_prefix_is_not_an_image() {
        let reply = json!({ "candidates": [{ "content": { "parts": [
            { "text": "iVBORw0KGgoAAAA too short" }
        ] } }] });
        assert!(matches!(
            extract_image(&parse(&reply)),
            Err(ImageError::NoImageInResponse { .. })
        ));
    }

    #[test]
    fn empty_response_has_no_image() {
        assert!(matches!(
            extract_image(&parse(&json!({}))),
            Err(ImageError::NoImageInResponse { .. })
        ));
    }

    #[test]
    fn mime_rejection_detection() {
        assert!(is_mime_rejection(StatusCode::BAD_REQUEST, "Allowed MIMETYPES are text/plain"));
        assert!(!is_mime_rejection(StatusCode::BAD_REQUEST, "API key not valid"));
        assert!(!is_mime_rejection(StatusCode::FORBIDDEN, "allowed mimetypes"));
    }

    #[test]
    fn request_body_drops_only_mime_on_retry() {
        let parts = vec![json!({ "text": "hi" })];
        let first = request_body(&parts, true);
        assert_eq!(first["generationConfig"]["responseMimeType"], "image/png");
        let retry = request_body(&parts, false);
        assert!(retry["generationConfig"].get("responseMimeType").is_none());
        assert_eq!(retry["contents"][0]["parts"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn edit_sends_key_prompt_and_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(|req: &Request| {
                let body: Value = req.body_json().unwrap_or_default();
                let parts = &body["contents"][0]["parts"];
                parts[0]["text"].as_str().is_some_and(|t| t.ends_with(prompt::EDIT_DIRECTIVE))
                    && parts[1]["inline_data"]["mime_type"] == "image/png"
            })
            .respond_with(ResponseTemplate::new(200).set_body_json(inline_reply("AQID")))
            .expect(1)
            .mount(&server)
            .await;

        let out = provider(&server).edit(&input(), "make it blue").await.unwrap();
        assert_eq!(out.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn retries_once_without_response_mime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(|req: &Request| String::from_utf8_lossy(&req.body).contains("responseMimeType"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string("response_mime_type: allowed mimetypes are text/plain"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(|req: &Request| !String::from_utf8_lossy(&req.body).contains("responseMimeType"))
            .respond_with(ResponseTemplate::new(200).set_body_json(inline_reply("AQID")))
            .expect(1)
            .mount(&server)
            .await;

        let out = provider(&server).edit(&input(), "retro").await.unwrap();
        assert_eq!(out.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn other_errors_fail_immediately_with_truncated_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("z".repeat(2000)))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).edit(&input(), "anything").await.unwrap_err();
        match err {
            ImageError::ProviderError { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), 401);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn blend_sends_both_images_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(|req: &Request| {
                let body: Value = req.body_json().unwrap_or_default();
                let parts = &body["contents"][0]["parts"];
                parts[1]["inline_data"]["mime_type"] == "image/jpeg"
                    && parts[2]["inline_data"]["mime_type"] == "image/png"
            })
            .respond_with(ResponseTemplate::new(200).set_body_json(inline_reply("AQID")))
            .expect(1)
            .mount(&server)
            .await;

        let first = ImagePayload { bytes: vec![0xFF, 0xD8, 0xFF], mime: "image/jpeg".into() };
        let out = provider(&server)
            .blend(&first, &input(), &prompt::blend_prompt("fuse"))
            .await
            .unwrap();
        assert_eq!(out.bytes, vec![1, 2, 3]);
    }

    fn echo_prompt(req: &Request) -> ResponseTemplate {
        let body: Value = req.body_json().unwrap_or_default();
        let text = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default().to_string();
        if text.contains("explodes") {
            return ResponseTemplate::new(500).set_body_string("panel failed");
        }
        let data = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
        ResponseTemplate::new(200).set_body_json(inline_reply(&data))
    }

    #[tokio::test]
    async fn comic_panels_preserve_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(echo_prompt).expect(4).mount(&server).await;

        let panels: Vec<String> =
            ["wakes up", "makes coffee", "misses the bus", "laughs"].map(String::from).to_vec();
        let out = provider(&server).comic_panels(&input(), "manga", &panels).await.unwrap();

        assert_eq!(out.len(), 4);
        for (image, text) in out.iter().zip(&panels) {
            let echoed = String::from_utf8(image.bytes.clone()).unwrap();
            assert!(echoed.contains(&format!("where they: {text}.")), "{echoed}");
        }
    }

    #[tokio::test]
    async fn comic_fails_when_any_panel_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(echo_prompt).mount(&server).await;

        let panels: Vec<String> =
            ["wakes up", "makes coffee", "explodes", "laughs"].map(String::from).to_vec();
        let result = provider(&server).comic_panels(&input(), "manga", &panels).await;

        assert!(matches!(result, Err(ImageError::ProviderError { status: 500, .. })));
    }
}
