//! On-disk cassette layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ProviderKind;

/// A recorded session of provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cassette {
    /// Human-readable session name.
    pub name: String,
    /// When the recording finished.
    pub recorded_at: DateTime<Utc>,
    /// Git commit the recording was made from.
    pub commit: String,
    /// Calls in the order they completed.
    pub interactions: Vec<Interaction>,
}

/// One provider call and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    /// Position within the cassette.
    pub seq: u64,
    /// Provider that served the call.
    pub provider: ProviderKind,
    /// Port method (`edit`, `blend`, `comic_panels`).
    pub method: String,
    /// Summary of the call arguments; not used for matching.
    #[serde(default)]
    pub input: serde_json::Value,
    /// `{"Ok": ...}` or `{"Err": "message"}`.
    pub output: serde_json::Value,
}
