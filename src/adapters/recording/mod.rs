//! Recording adapters that capture provider calls into cassettes.

pub mod image_provider;

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::cassette::recorder::CassetteRecorder;
use crate::model::ProviderKind;

/// Record a `Result<T, E>` interaction using the Ok/Err JSON convention.
///
/// A value that cannot be serialized is stored as `null` so a recording run
/// never fails the call it wraps.
pub(crate) fn record_result<T, E>(
    recorder: &Arc<Mutex<CassetteRecorder>>,
    provider: ProviderKind,
    method: &str,
    input: Value,
    result: &Result<T, E>,
) where
    T: Serialize,
    E: std::fmt::Display,
{
    let output = match result {
        Ok(v) => {
            let inner = serde_json::to_value(v).unwrap_or_else(|e| {
                warn!(%provider, method, error = %e, "could not serialize recorded output");
                Value::Null
            });
            json!({ "Ok": inner })
        }
        Err(e) => json!({ "Err": e.to_string() }),
    };

    let mut guard = recorder.lock().unwrap_or_else(PoisonError::into_inner);
    guard.record(provider, method, input, output);
}
