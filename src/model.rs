//! Provider identity and parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported image-generation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini image models (synchronous, multi-image).
    #[default]
    Gemini,
    /// Fal.ai hosted models (asynchronous jobs, single image).
    Fal,
}

impl ProviderKind {
    /// Wire identifier (`"gemini"` / `"fal"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Fal => "fal",
        }
    }

    /// Name used in user-facing messages.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::Fal => "Fal.ai",
        }
    }

    /// Request header carrying the caller's key for this provider.
    #[must_use]
    pub fn credential_header(self) -> &'static str {
        match self {
            Self::Gemini => "x-gemini-key",
            Self::Fal => "x-fal-key",
        }
    }

    /// Environment variable consulted by the CLI.
    #[must_use]
    pub fn env_var(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::Fal => "FAL_KEY",
        }
    }

    /// Parse an optional provider field; absent or blank selects Gemini.
    ///
    /// # Errors
    ///
    /// Returns an error if the value names an unknown provider.
    pub fn parse_optional(value: Option<&str>) -> Result<Self, String> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(v) => v.parse(),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "fal" => Ok(Self::Fal),
            other => Err(format!("Invalid provider '{other}'. Expected 'gemini' or 'fal'.")),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
