//! Replaying adapters that serve recorded interactions from cassettes.

pub mod image_provider;

use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cassette::replayer::CassetteReplayer;
use crate::error::ImageError;
use crate::model::ProviderKind;

/// Retrieve the next recorded output for a provider and method.
///
/// # Errors
///
/// Returns [`ImageError::Config`] when the cassette has nothing left for the
/// pair.
pub(crate) fn next_output(
    replayer: &Arc<Mutex<CassetteReplayer>>,
    provider: ProviderKind,
    method: &str,
) -> Result<Value, ImageError> {
    let mut guard = replayer.lock().unwrap_or_else(PoisonError::into_inner);
    guard
        .next_interaction(provider, method)
        .map(|interaction| interaction.output.clone())
        .map_err(ImageError::Config)
}

/// Deserialize a replayed output as `Result<T, ImageError>`.
///
/// A recorded `Err` comes back as a provider error carrying the recorded
/// message.
pub(crate) fn replay_result<T: DeserializeOwned>(
    provider: ProviderKind,
    output: Value,
) -> Result<T, ImageError> {
    if let Some(err_val) = output.get("Err").or_else(|| output.get("err")) {
        let msg = err_val.as_str().unwrap_or("replayed error");
        return Err(ImageError::provider(provider, 0, msg));
    }
    let value = match output.get("Ok").or_else(|| output.get("ok")) {
        Some(ok_val) => ok_val.clone(),
        None => output,
    };
    serde_json::from_value(value)
        .map_err(|e| ImageError::Config(format!("Malformed cassette output: {e}")))
}
