//! Configuration file loading with environment variable overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::model::ProviderKind;

/// Default input ceiling: 6 MiB.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 6 * 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    /// API keys used by the one-shot CLI commands (the server only takes header keys).
    #[serde(default)]
    pub keys: KeysConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Input limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Gemini adapter settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Fal adapter settings.
    #[serde(default)]
    pub fal: FalConfig,

    /// Text-to-speech collaborator settings.
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,

    /// Gallery reader settings.
    #[serde(default)]
    pub gallery: GalleryConfig,
}

/// API key configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct KeysConfig {
    /// Gemini API key.
    pub gemini: Option<String>,
    /// Fal.ai API key.
    pub fal: Option<String>,
    /// `ElevenLabs` API key.
    pub elevenlabs: Option<String>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Upper bound for one request, provider calls included.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:3000".to_string(), request_timeout_secs: 180 }
    }
}

impl ServerConfig {
    /// Request deadline as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Input limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted input image, in bytes.
    pub max_image_bytes: u64,
    /// Connect timeout for outbound HTTP.
    pub connect_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_image_bytes: DEFAULT_MAX_IMAGE_BYTES, connect_timeout_secs: 15 }
    }
}

/// Gemini adapter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API root, without the `/models` segment.
    pub api_base: String,
    /// Image model identifier.
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash-image-preview".to_string(),
        }
    }
}

/// Fal adapter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FalConfig {
    /// Job submission endpoint.
    pub submit_url: String,
    /// Job status endpoint; the job id is appended as a path segment.
    pub jobs_url: String,
    /// Fixed delay between status polls.
    pub poll_interval_ms: u64,
    /// Give up on a job after this long.
    pub timeout_secs: u64,
}

impl Default for FalConfig {
    fn default() -> Self {
        Self {
            submit_url: "https://fal.run/fal-ai/nano-banana/edit".to_string(),
            jobs_url: "https://fal.run/v1/jobs".to_string(),
            poll_interval_ms: 1200,
            timeout_secs: 60,
        }
    }
}

impl FalConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Job timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Text-to-speech settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    /// API root.
    pub api_base: String,
    /// Voice used when the request names none.
    pub voice_id: String,
    /// Synthesis model.
    pub model_id: String,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.elevenlabs.io".to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
        }
    }
}

/// Gallery reader settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// GitHub API root.
    pub api_base: String,
    /// `owner/name` of the repository holding the gallery.
    pub repo: Option<String>,
    /// Branch to list.
    pub branch: String,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            repo: None,
            branch: "main".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the given path, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
    }

    /// Get the CLI key for a provider, preferring the environment variable.
    #[must_use]
    pub fn provider_key(&self, provider: ProviderKind) -> Option<String> {
        let from_file = match provider {
            ProviderKind::Gemini => self.keys.gemini.as_ref(),
            ProviderKind::Fal => self.keys.fal.as_ref(),
        };
        non_empty_env(provider.env_var()).or_else(|| from_file.cloned())
    }

    /// Get the CLI `ElevenLabs` key, preferring `ELEVENLABS_API_KEY`.
    #[must_use]
    pub fn elevenlabs_key(&self) -> Option<String> {
        non_empty_env("ELEVENLABS_API_KEY").or_else(|| self.keys.elevenlabs.clone())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Discover the config file path using the resolution order:
/// 1. Explicit path (from `--config` flag)
/// 2. `IMAGEFUSE_CONFIG` environment variable
/// 3. `~/.config/imagefuse/config.toml`
#[must_use]
pub fn discover_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(p) = explicit {
        return PathBuf::from(p);
    }

    if let Ok(p) = std::env::var("IMAGEFUSE_CONFIG") {
        return PathBuf::from(p);
    }

    default_config_path()
}

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config/imagefuse/config.toml")
    } else {
        PathBuf::from("imagefuse.toml")
    }
}
