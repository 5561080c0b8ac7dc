//! Recording adapter for the `ImageProvider` port.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use super::record_result;
use crate::cassette::recorder::CassetteRecorder;
use crate::model::ProviderKind;
use crate::payload::ImagePayload;
use crate::ports::{Capabilities, ImageProvider, ProviderFuture};

/// Wraps a live provider and records each call to a cassette.
pub struct RecordingImageProvider {
    inner: Box<dyn ImageProvider>,
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingImageProvider {
    /// Wrap `inner`, appending every call to `recorder`.
    pub fn new(inner: Box<dyn ImageProvider>, recorder: Arc<Mutex<CassetteRecorder>>) -> Self {
        Self { inner, recorder }
    }
}

/// Inputs are summarised by MIME and size; the bytes stay out of the cassette.
fn describe(images: &[&ImagePayload]) -> Value {
    images.iter().map(|img| json!({ "mime": img.mime, "size": img.bytes.len() })).collect()
}

impl ImageProvider for RecordingImageProvider {
    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn edit<'a>(
        &'a self,
        image: &'a ImagePayload,
        prompt: &'a str,
    ) -> ProviderFuture<'a, ImagePayload> {
        Box::pin(async move {
            let result = self.inner.edit(image, prompt).await;
            let input = json!({ "prompt": prompt, "images": describe(&[image]) });
            record_result(&self.recorder, self.kind(), "edit", input, &result);
            result
        })
    }

    fn blend<'a>(
        &'a self,
        base: &'a ImagePayload,
        reference: &'a ImagePayload,
        prompt: &'a str,
    ) -> ProviderFuture<'a, ImagePayload> {
        Box::pin(async move {
            let result = self.inner.blend(base, reference, prompt).await;
            let input = json!({ "prompt": prompt, "images": describe(&[base, reference]) });
            record_result(&self.recorder, self.kind(), "blend", input, &result);
            result
        })
    }

    fn comic_panels<'a>(
        &'a self,
        persona: &'a ImagePayload,
        style: &'a str,
        panel_texts: &'a [String],
    ) -> ProviderFuture<'a, Vec<ImagePayload>> {
        Box::pin(async move {
            let result = self.inner.comic_panels(persona, style, panel_texts).await;
            let input =
                json!({ "style": style, "panels": panel_texts, "images": describe(&[persona]) });
            record_result(&self.recorder, self.kind(), "comic_panels", input, &result);
            result
        })
    }
}
