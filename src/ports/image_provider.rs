//! Image provider port: the capability surface every provider adapter offers.

use std::future::Future;
use std::pin::Pin;

use futures::future::try_join_all;

use crate::error::ImageError;
use crate::model::ProviderKind;
use crate::payload::ImagePayload;

/// Boxed future type returned by [`ImageProvider`] methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ImageError>> + Send + 'a>>;

/// Optional operations a provider supports natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// True multi-image fusion.
    pub blend: bool,
    /// Persona-consistent comic panels.
    pub comic: bool,
}

impl Capabilities {
    /// What each provider supports natively.
    #[must_use]
    pub fn of(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Gemini => Self { blend: true, comic: true },
            ProviderKind::Fal => Self { blend: false, comic: false },
        }
    }
}

/// Generates output images from input images and a prompt.
///
/// Adapters are built per request with that request's credential, so no
/// method takes a key.
pub trait ImageProvider: Send + Sync {
    /// Which provider this is.
    fn kind(&self) -> ProviderKind;

    /// Natively supported optional operations.
    fn capabilities(&self) -> Capabilities;

    /// Edit a single image according to `prompt`.
    fn edit<'a>(&'a self, image: &'a ImagePayload, prompt: &'a str)
        -> ProviderFuture<'a, ImagePayload>;

    /// Fuse two images; `base` is sent first.
    fn blend<'a>(
        &'a self,
        _base: &'a ImagePayload,
        _reference: &'a ImagePayload,
        _prompt: &'a str,
    ) -> ProviderFuture<'a, ImagePayload> {
        let err = unsupported(self.kind(), "blend");
        Box::pin(async move { Err(err) })
    }

    /// Generate one panel per text, keeping the persona consistent.
    ///
    /// The output has the same length and order as `panel_texts`.
    fn comic_panels<'a>(
        &'a self,
        _persona: &'a ImagePayload,
        _style: &'a str,
        _panel_texts: &'a [String],
    ) -> ProviderFuture<'a, Vec<ImagePayload>> {
        let err = unsupported(self.kind(), "comic");
        Box::pin(async move { Err(err) })
    }
}

fn unsupported(kind: ProviderKind, operation: &'static str) -> ImageError {
    ImageError::UnsupportedOperation { provider: kind.display_name().to_string(), operation }
}

/// Run `count` calls concurrently and collect their results in call order.
///
/// The first failure fails the whole batch; the remaining calls are dropped.
///
/// # Errors
///
/// Returns the first error produced by any call.
pub async fn fan_out<T, F, Fut>(count: usize, call: F) -> Result<Vec<T>, ImageError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, ImageError>>,
{
    try_join_all((0..count).map(call)).await
}
