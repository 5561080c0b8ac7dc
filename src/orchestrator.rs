//! Request orchestration: credential check, input normalization, prompt
//! construction and provider fan-out.

use futures::try_join;
use tracing::{info, warn};

use crate::context::ServiceContext;
use crate::error::ImageError;
use crate::model::ProviderKind;
use crate::payload::{ImageInput, ImagePayload, Normalizer};
use crate::ports::{fan_out, ImageProvider};
use crate::prompt;

/// Number of panels in a comic.
pub const COMIC_PANELS: usize = 4;

/// How many independent outputs to generate, always within `1..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variants(usize);

impl Variants {
    /// Upper bound on variants per request.
    pub const MAX: usize = 3;

    /// Clamp a requested count into `1..=MAX`.
    #[must_use]
    pub fn new(requested: i64) -> Self {
        let clamped = requested.clamp(1, Self::MAX as i64);
        Self(usize::try_from(clamped).unwrap_or(1))
    }

    /// The clamped count.
    #[must_use]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for Variants {
    fn default() -> Self {
        Self(1)
    }
}

/// The operation a caller asked for, with its inputs.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Edit one image.
    Edit {
        /// Image to edit.
        image: ImageInput,
        /// Free-text instruction.
        instruction: String,
        /// Number of outputs.
        variants: Variants,
    },
    /// Fuse a reference image into a base image.
    Blend {
        /// Image being transformed.
        base: ImageInput,
        /// Style, texture or object reference.
        reference: ImageInput,
        /// Free-text instruction.
        instruction: String,
        /// Number of outputs.
        variants: Variants,
    },
    /// Place a wearable item on a person.
    TryOn {
        /// Photo of the person.
        base: ImageInput,
        /// Photo of the item.
        item: ImageInput,
        /// Item category, e.g. `"sunglasses"`.
        category: String,
        /// Extra placement notes.
        notes: String,
    },
    /// Four panels featuring the same persona.
    Comic {
        /// Reference photo of the persona.
        persona: ImageInput,
        /// Art style, e.g. `"noir"`.
        style: String,
        /// One text per panel.
        panels: [String; COMIC_PANELS],
    },
}

impl Operation {
    /// Short name used in logs and error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Edit { .. } => "edit",
            Self::Blend { .. } => "blend",
            Self::TryOn { .. } => "tryon",
            Self::Comic { .. } => "comic",
        }
    }
}

/// A fully parsed request.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Selected provider.
    pub provider: ProviderKind,
    /// What to do.
    pub operation: Operation,
}

/// Output of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    /// Output images in invocation order.
    pub images: Vec<ImagePayload>,
    /// Provider that produced them.
    pub provider: ProviderKind,
    /// Set when a two-image operation ran as a single-image edit.
    pub degraded: bool,
}

/// Run one request end to end.
///
/// The provider credential is checked before any input is fetched.
///
/// # Errors
///
/// Returns the first error from credential resolution, normalization or any
/// provider call.
pub async fn execute(
    request: OperationRequest,
    ctx: &ServiceContext,
    normalizer: &Normalizer,
) -> Result<GenerationResult, ImageError> {
    let provider = ctx.provider(request.provider)?;
    run(request.operation, provider.as_ref(), normalizer).await
}

/// Run an operation against an already-resolved provider.
pub(crate) async fn run(
    operation: Operation,
    provider: &dyn ImageProvider,
    normalizer: &Normalizer,
) -> Result<GenerationResult, ImageError> {
    let kind = provider.kind();
    let capabilities = provider.capabilities();

    if matches!(operation, Operation::Comic { .. }) && !capabilities.comic {
        return Err(ImageError::Validation(format!(
            "comic requires persona-consistent generation, which {} does not offer",
            kind.display_name()
        )));
    }

    info!(provider = %kind, operation = operation.name(), "dispatching");
    let mut degraded = false;

    let images = match operation {
        Operation::Edit { image, instruction, variants } => {
            let image = normalizer.resolve(image).await?;
            let prompt = prompt::edit_prompt(&instruction);
            fan_out(variants.get(), |_| provider.edit(&image, &prompt)).await?
        }
        Operation::Blend { base, reference, instruction, variants } => {
            let (base, reference) = try_join!(normalizer.resolve(base), normalizer.resolve(reference))?;
            let prompt = prompt::blend_prompt(&instruction);
            if capabilities.blend {
                fan_out(variants.get(), |_| provider.blend(&base, &reference, &prompt)).await?
            } else {
                // single-image provider: the reference image is dropped on purpose
                warn!(provider = %kind, "blend not supported; editing base image only");
                degraded = true;
                fan_out(variants.get(), |_| provider.edit(&base, &prompt)).await?
            }
        }
        Operation::TryOn { base, item, category, notes } => {
            let (base, item) = try_join!(normalizer.resolve(base), normalizer.resolve(item))?;
            let prompt = prompt::try_on_prompt(&category, &notes, true);
            let image = if capabilities.blend {
                provider.blend(&item, &base, &prompt).await?
            } else {
                // single-image provider: the item image is dropped on purpose and
                // only the prompt describes it
                warn!(provider = %kind, "try-on not supported; editing person image only");
                degraded = true;
                provider.edit(&base, &prompt).await?
            };
            vec![image]
        }
        Operation::Comic { persona, style, panels } => {
            let persona = normalizer.resolve(persona).await?;
            let images = provider.comic_panels(&persona, &style, &panels).await?;
            if images.len() != panels.len() {
                return Err(ImageError::provider(
                    kind,
                    200,
                    &format!("expected {} comic panels, got {}", panels.len(), images.len()),
                ));
            }
            images
        }
    };

    info!(provider = %kind, count = images.len(), degraded, "generation complete");
    Ok(GenerationResult { images, provider: kind, degraded })
}
