//! Text-to-speech through `ElevenLabs`.

use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use crate::config::ElevenLabsConfig;
use crate::error::{truncate_body, ImageError, MAX_ERROR_BODY_CHARS};

/// Credential header for `ElevenLabs`.
pub const ELEVENLABS_KEY_HEADER: &str = "x-elevenlabs-key";

/// `ElevenLabs` client bound to one caller's key.
pub struct SpeechClient {
    client: Client,
    api_key: Option<String>,
    settings: ElevenLabsConfig,
}

impl SpeechClient {
    /// Create a client; a missing key is reported on first use.
    #[must_use]
    pub fn new(client: Client, api_key: Option<String>, settings: ElevenLabsConfig) -> Self {
        Self { client, api_key, settings }
    }

    /// Synthesize `text` to MP3 bytes with `voice_id` or the configured voice.
    ///
    /// # Errors
    ///
    /// Fails on blank text, a missing key, or a non-success response.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_id: Option<&str>,
    ) -> Result<Vec<u8>, ImageError> {
        if text.trim().is_empty() {
            return Err(ImageError::Validation("text is required".into()));
        }
        let key = self.api_key.as_deref().filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            ImageError::MissingCredential {
                provider: "ElevenLabs".into(),
                header: ELEVENLABS_KEY_HEADER.into(),
            }
        })?;
        let voice =
            voice_id.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(self.settings.voice_id.as_str());

        let url = format!("{}/v1/text-to-speech/{voice}", self.settings.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("xi-api-key", key)
            .header(ACCEPT, "audio/mpeg")
            .json(&json!({ "model_id": self.settings.model_id, "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImageError::ProviderError {
                provider: "ElevenLabs".into(),
                status: status.as_u16(),
                body: truncate_body(&body, MAX_ERROR_BODY_CHARS),
            });
        }
        let audio = response.bytes().await?.to_vec();
        info!(voice, bytes = audio.len(), "speech synthesized");
        Ok(audio)
    }
}
