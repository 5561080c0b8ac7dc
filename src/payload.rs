//! Binary input normalization: remote URLs and uploads become `(bytes, mime)` pairs.

use std::path::Path;

use base64::Engine;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ImageError;

/// MIME types accepted as inputs.
pub const SUPPORTED_MIME_TYPES: [&str; 2] = ["image/png", "image/jpeg"];

const FALLBACK_MIME: &str = "application/octet-stream";

/// An image held in memory together with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Raw image bytes.
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `"image/png"`.
    pub mime: String,
}

impl ImagePayload {
    /// Wrap provider output bytes, sniffing the MIME type from magic bytes.
    #[must_use]
    pub fn from_output(bytes: Vec<u8>) -> Self {
        let mime = sniff_mime(&bytes).to_string();
        Self { bytes, mime }
    }

    /// Standard base64 encoding of the bytes.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// Render as the `data:image/png;base64,...` string returned to callers.
    #[must_use]
    pub fn data_uri(&self) -> String {
        format!("data:image/png;base64,{}", self.to_base64())
    }
}

/// An image input before normalization.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// A remote image, fetched after the credential check.
    Url(String),
    /// An already-normalized upload.
    Payload(ImagePayload),
}

/// An uploaded file as received at the boundary.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// Client-supplied filename.
    pub file_name: Option<String>,
    /// Client-declared content type.
    pub content_type: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// Turns URLs and uploads into validated [`ImagePayload`]s.
#[derive(Debug, Clone)]
pub struct Normalizer {
    client: Client,
    max_bytes: u64,
}

impl Normalizer {
    /// Create a normalizer enforcing `max_bytes` per image.
    #[must_use]
    pub fn new(client: Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    /// Fetch a remote image with an uncached GET.
    ///
    /// # Errors
    ///
    /// Fails on network errors, non-success status, oversize bodies, and
    /// anything that is not PNG or JPEG.
    pub async fn fetch_image(&self, url: &str) -> Result<ImagePayload, ImageError> {
        let mut response = self.client.get(url).header(CACHE_CONTROL, "no-cache").send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::UpstreamFetch { url: url.to_string(), status: status.as_u16() });
        }

        if let Some(declared) = response.content_length() {
            self.check_size(declared)?;
        }

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        // the declared length may be absent or wrong
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            self.check_size((bytes.len() + chunk.len()) as u64)?;
            bytes.extend_from_slice(&chunk);
        }

        let mime = guess_mime(url, &header_type);
        ensure_supported(&mime)?;
        debug!(url, mime, size = bytes.len(), "fetched input image");

        Ok(ImagePayload { bytes, mime })
    }

    /// Validate an uploaded file.
    ///
    /// # Errors
    ///
    /// Fails on oversize files and anything that is not PNG or JPEG.
    pub fn read_upload(&self, upload: Upload) -> Result<ImagePayload, ImageError> {
        self.check_size(upload.bytes.len() as u64)?;

        let declared = upload
            .content_type
            .as_deref()
            .map(normalize_mime)
            .filter(|m| !m.is_empty() && m != FALLBACK_MIME);
        let mime = declared
            .unwrap_or_else(|| guess_mime(upload.file_name.as_deref().unwrap_or_default(), ""));
        ensure_supported(&mime)?;

        Ok(ImagePayload { bytes: upload.bytes, mime })
    }

    /// Read a local file as if it had been uploaded.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not pass [`Normalizer::read_upload`].
    pub fn read_file(&self, path: &Path) -> Result<ImagePayload, ImageError> {
        let bytes = std::fs::read(path)?;
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        self.read_upload(Upload { file_name, content_type: None, bytes })
    }

    /// Normalize any [`ImageInput`].
    ///
    /// # Errors
    ///
    /// See [`Normalizer::fetch_image`].
    pub async fn resolve(&self, input: ImageInput) -> Result<ImagePayload, ImageError> {
        match input {
            ImageInput::Url(url) => self.fetch_image(&url).await,
            ImageInput::Payload(payload) => Ok(payload),
        }
    }

    fn check_size(&self, size: u64) -> Result<(), ImageError> {
        if size > self.max_bytes {
            Err(ImageError::PayloadTooLarge { size, limit: self.max_bytes })
        } else {
            Ok(())
        }
    }
}

/// Derive a MIME type from a response header, falling back to the URL extension.
#[must_use]
pub fn guess_mime(url: &str, header_type: &str) -> String {
    let header = normalize_mime(header_type);
    if header.starts_with("image/") {
        return header;
    }
    let path = url.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png".to_string()
    } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg".to_string()
    } else {
        FALLBACK_MIME.to_string()
    }
}

/// Whether `mime` is one of [`SUPPORTED_MIME_TYPES`].
#[must_use]
pub fn is_supported_mime(mime: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&normalize_mime(mime).as_str())
}

/// Detect PNG or JPEG from magic bytes; anything else is reported as PNG.
#[must_use]
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else {
        "image/png"
    }
}

fn normalize_mime(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

fn ensure_supported(mime: &str) -> Result<(), ImageError> {
    if is_supported_mime(mime) {
        Ok(())
    } else {
        Err(ImageError::UnsupportedMediaType { mime: mime.to_string() })
    }
}

/// Serde helper for serializing `Vec<u8>` as base64 strings in cassettes.
mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
