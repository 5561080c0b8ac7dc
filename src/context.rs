//! Per-request service context: credentials, settings and the provider factory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::adapters::live::{FalProvider, GeminiProvider};
use crate::adapters::recording::image_provider::RecordingImageProvider;
use crate::adapters::replaying::image_provider::ReplayingImageProvider;
use crate::cassette::config::load_cassette;
use crate::cassette::recorder::CassetteRecorder;
use crate::cassette::replayer::CassetteReplayer;
use crate::config::{Config, LimitsConfig};
use crate::error::ImageError;
use crate::model::ProviderKind;
use crate::payload::Normalizer;
use crate::ports::ImageProvider;

/// Directory recording sessions are written under.
const CASSETTE_ROOT: &str = ".imagefuse/cassettes";

/// Caller-supplied API keys for one request.
///
/// Blank values are treated as absent.
#[derive(Clone, Default)]
pub struct Credentials {
    gemini: Option<String>,
    fal: Option<String>,
    elevenlabs: Option<String>,
}

impl Credentials {
    /// Build from optional raw values.
    #[must_use]
    pub fn new(gemini: Option<String>, fal: Option<String>, elevenlabs: Option<String>) -> Self {
        Self { gemini: non_blank(gemini), fal: non_blank(fal), elevenlabs: non_blank(elevenlabs) }
    }

    /// Keys for the one-shot CLI commands: environment first, then `[keys]`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.provider_key(ProviderKind::Gemini),
            config.provider_key(ProviderKind::Fal),
            config.elevenlabs_key(),
        )
    }

    /// Key for an image provider, if one was supplied.
    #[must_use]
    pub fn for_provider(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Gemini => self.gemini.as_deref(),
            ProviderKind::Fal => self.fal.as_deref(),
        }
    }

    /// `ElevenLabs` key, if one was supplied.
    #[must_use]
    pub fn elevenlabs(&self) -> Option<&str> {
        self.elevenlabs.as_deref()
    }
}

// Keys never reach logs through Debug.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("gemini", &self.gemini.is_some())
            .field("fal", &self.fal.is_some())
            .field("elevenlabs", &self.elevenlabs.is_some())
            .finish()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Build the shared outbound HTTP client.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client(limits: &LimitsConfig) -> Result<Client, ImageError> {
    Ok(Client::builder().connect_timeout(Duration::from_secs(limits.connect_timeout_secs)).build()?)
}

enum Mode {
    Live,
    Recording(Arc<Mutex<CassetteRecorder>>),
    Replaying(Arc<Mutex<CassetteReplayer>>),
}

/// Resolves provider kinds into ready-to-call adapters for one request.
pub struct ServiceContext {
    credentials: Credentials,
    settings: Arc<Config>,
    client: Client,
    mode: Mode,
}

/// Handle to a recording session that must be finished after use.
pub struct RecordingSession {
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingSession {
    /// Finish the recording and write the cassette to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if an adapter is still alive or the file cannot be written.
    pub fn finish(self) -> Result<PathBuf, String> {
        let recorder = Arc::try_unwrap(self.recorder)
            .map_err(|_| "Recording adapter still has references".to_string())?
            .into_inner()
            .map_err(|e| format!("Recorder lock poisoned: {e}"))?;
        recorder.finish().map_err(|e| format!("Failed to write cassette: {e}"))
    }
}

impl ServiceContext {
    /// Context that calls the real providers.
    #[must_use]
    pub fn live(credentials: Credentials, settings: Arc<Config>, client: Client) -> Self {
        Self { credentials, settings, client, mode: Mode::Live }
    }

    /// Live context whose provider calls are also recorded to a cassette.
    #[must_use]
    pub fn recording(
        credentials: Credentials,
        settings: Arc<Config>,
        client: Client,
    ) -> (Self, RecordingSession) {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let path = PathBuf::from(CASSETTE_ROOT).join(&timestamp).join("image_provider.cassette.yaml");
        let recorder = Arc::new(Mutex::new(CassetteRecorder::new(
            path,
            format!("{timestamp}-image_provider"),
            commit_hash(),
        )));

        let ctx = Self {
            credentials,
            settings,
            client,
            mode: Mode::Recording(Arc::clone(&recorder)),
        };
        (ctx, RecordingSession { recorder })
    }

    /// Context that serves provider calls from a cassette file.
    ///
    /// No credentials are needed in this mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the cassette file cannot be loaded.
    pub fn replaying(
        path: &Path,
        credentials: Credentials,
        settings: Arc<Config>,
        client: Client,
    ) -> Result<Self, ImageError> {
        let replayer = Arc::new(Mutex::new(load_cassette(path)?));
        Ok(Self { credentials, settings, client, mode: Mode::Replaying(replayer) })
    }

    /// Input normalizer using this context's client and byte ceiling.
    #[must_use]
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.client.clone(), self.settings.limits.max_image_bytes)
    }

    /// Build the adapter for `kind`, bound to this request's credential.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::MissingCredential`] when the provider has no key.
    /// Nothing touches the network before this check.
    pub fn provider(&self, kind: ProviderKind) -> Result<Box<dyn ImageProvider>, ImageError> {
        if let Mode::Replaying(replayer) = &self.mode {
            return Ok(Box::new(ReplayingImageProvider::new(kind, Arc::clone(replayer))));
        }

        let key = self
            .credentials
            .for_provider(kind)
            .ok_or_else(|| ImageError::missing_credential(kind))?
            .to_string();
        debug!(provider = %kind, "provider credential present");

        let live: Box<dyn ImageProvider> = match kind {
            ProviderKind::Gemini => {
                Box::new(GeminiProvider::new(self.client.clone(), key, self.settings.gemini.clone()))
            }
            ProviderKind::Fal => {
                Box::new(FalProvider::new(self.client.clone(), key, self.settings.fal.clone()))
            }
        };

        Ok(match &self.mode {
            Mode::Recording(recorder) => {
                Box::new(RecordingImageProvider::new(live, Arc::clone(recorder)))
            }
            _ => live,
        })
    }
}

/// Current git commit hash, or "unknown" if unavailable.
fn commit_hash() -> String {
    std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map_or_else(|| "unknown".to_string(), |s| s.trim().to_string())
}
