//! Replaying adapter for the `ImageProvider` port.

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;

use super::{next_output, replay_result};
use crate::cassette::replayer::CassetteReplayer;
use crate::error::ImageError;
use crate::model::ProviderKind;
use crate::payload::ImagePayload;
use crate::ports::{Capabilities, ImageProvider, ProviderFuture};

/// Serves recorded provider results from a cassette.
///
/// Reports the same capabilities as the live provider it stands in for, so
/// the orchestrator takes the same paths during replay.
pub struct ReplayingImageProvider {
    kind: ProviderKind,
    replayer: Arc<Mutex<CassetteReplayer>>,
}

impl ReplayingImageProvider {
    /// Create a replaying provider backed by the given replayer.
    #[must_use]
    pub fn new(kind: ProviderKind, replayer: Arc<Mutex<CassetteReplayer>>) -> Self {
        Self { kind, replayer }
    }

    fn replay<T: DeserializeOwned>(&self, method: &str) -> Result<T, ImageError> {
        let output = next_output(&self.replayer, self.kind, method)?;
        replay_result(self.kind, output)
    }
}

impl ImageProvider for ReplayingImageProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(self.kind)
    }

    fn edit<'a>(
        &'a self,
        _image: &'a ImagePayload,
        _prompt: &'a str,
    ) -> ProviderFuture<'a, ImagePayload> {
        let result = self.replay("edit");
        Box::pin(async move { result })
    }

    fn blend<'a>(
        &'a self,
        _base: &'a ImagePayload,
        _reference: &'a ImagePayload,
        _prompt: &'a str,
    ) -> ProviderFuture<'a, ImagePayload> {
        let result = self.replay("blend");
        Box::pin(async move { result })
    }

    fn comic_panels<'a>(
        &'a self,
        _persona: &'a ImagePayload,
        _style: &'a str,
        _panel_texts: &'a [String],
    ) -> ProviderFuture<'a, Vec<ImagePayload>> {
        let result = self.replay("comic_panels");
        Box::pin(async move { result })
    }
}
