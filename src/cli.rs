//! CLI argument parsing with clap.

use std::path::Path;

use clap::{Args, Parser, Subcommand};

use crate::error::ImageError;
use crate::model::ProviderKind;
use crate::orchestrator::{Operation, OperationRequest, Variants, COMIC_PANELS};
use crate::payload::{ImageInput, Normalizer};
use crate::request::DEFAULT_TRY_ON_CATEGORY;

/// AI image editing, blending, try-on and comics over Gemini and Fal.ai.
#[derive(Parser, Debug)]
#[command(name = "imagefuse", version, about)]
pub struct Cli {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Verbose output (debug logging).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API server.
    Serve {
        /// Listen address (defaults to `[server] bind`).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Edit one image.
    Edit {
        /// Image path or http(s) URL.
        image: String,
        /// What to change.
        instruction: String,
        #[command(flatten)]
        target: Target,
        /// Number of variants (1-3).
        #[arg(short = 'n', long, default_value_t = 1)]
        variants: i64,
    },
    /// Fuse a reference image into a base image.
    Blend {
        /// Base image path or URL.
        base: String,
        /// Reference image path or URL.
        reference: String,
        /// How to blend.
        instruction: String,
        #[command(flatten)]
        target: Target,
        /// Number of variants (1-3).
        #[arg(short = 'n', long, default_value_t = 1)]
        variants: i64,
    },
    /// Place a wearable item on a person.
    TryOn {
        /// Photo of the person.
        person: String,
        /// Photo of the item.
        item: String,
        /// Item category, e.g. sunglasses, hat, watch.
        #[arg(long, default_value = DEFAULT_TRY_ON_CATEGORY)]
        category: String,
        /// Extra placement notes.
        #[arg(long, default_value = "")]
        notes: String,
        #[command(flatten)]
        target: Target,
    },
    /// Generate a four-panel comic starring the persona.
    Comic {
        /// Reference photo of the persona.
        persona: String,
        /// Art style.
        #[arg(long)]
        style: String,
        /// Panel text; give exactly four.
        #[arg(long = "panel", required = true)]
        panels: Vec<String>,
        #[command(flatten)]
        target: Target,
    },
    /// List the gallery as JSON.
    Gallery {
        /// Repository as owner/name (defaults to `[gallery] repo`).
        #[arg(long)]
        repo: Option<String>,
        /// Branch to list.
        #[arg(long)]
        branch: Option<String>,
    },
    /// Synthesize speech to an MP3 file.
    Tts {
        /// Text to speak.
        text: String,
        /// Voice id.
        #[arg(long)]
        voice: Option<String>,
        /// Output file path (auto-generated if not specified).
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Provider and output options shared by the image commands.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Provider: gemini or fal.
    #[arg(long, default_value = "gemini")]
    pub provider: ProviderKind,

    /// Output file path (auto-generated if not specified).
    #[arg(short, long)]
    pub output: Option<String>,
}

/// A parsed image command ready for the orchestrator.
#[derive(Debug)]
pub struct ImageJob {
    /// The request to run.
    pub request: OperationRequest,
    /// Text used to name output files.
    pub label: String,
    /// Explicit output path.
    pub output: Option<String>,
}

impl Command {
    /// Turn an image subcommand into a job; other subcommands yield `None`.
    ///
    /// # Errors
    ///
    /// Fails when a local image cannot be read or is invalid, or a comic does
    /// not have exactly four panels.
    pub fn image_job(&self, normalizer: &Normalizer) -> Result<Option<ImageJob>, ImageError> {
        let (operation, label, target) = match self {
            Self::Edit { image, instruction, target, variants } => (
                Operation::Edit {
                    image: image_input(image, normalizer)?,
                    instruction: instruction.clone(),
                    variants: Variants::new(*variants),
                },
                instruction.clone(),
                target,
            ),
            Self::Blend { base, reference, instruction, target, variants } => (
                Operation::Blend {
                    base: image_input(base, normalizer)?,
                    reference: image_input(reference, normalizer)?,
                    instruction: instruction.clone(),
                    variants: Variants::new(*variants),
                },
                instruction.clone(),
                target,
            ),
            Self::TryOn { person, item, category, notes, target } => (
                Operation::TryOn {
                    base: image_input(person, normalizer)?,
                    item: image_input(item, normalizer)?,
                    category: category.clone(),
                    notes: notes.clone(),
                },
                format!("try-on {category}"),
                target,
            ),
            Self::Comic { persona, style, panels, target } => (
                Operation::Comic {
                    persona: image_input(persona, normalizer)?,
                    style: style.clone(),
                    panels: comic_panels(panels)?,
                },
                format!("comic {style}"),
                target,
            ),
            Self::Serve { .. } | Self::Gallery { .. } | Self::Tts { .. } => return Ok(None),
        };

        Ok(Some(ImageJob {
            request: OperationRequest { provider: target.provider, operation },
            label,
            output: target.output.clone(),
        }))
    }
}

/// `http://` and `https://` arguments are URLs; anything else is a local file.
///
/// # Errors
///
/// Fails when a local file is unreadable, too large, or not PNG/JPEG.
pub fn image_input(arg: &str, normalizer: &Normalizer) -> Result<ImageInput, ImageError> {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        Ok(ImageInput::Url(arg.to_string()))
    } else {
        Ok(ImageInput::Payload(normalizer.read_file(Path::new(arg))?))
    }
}

fn comic_panels(panels: &[String]) -> Result<[String; COMIC_PANELS], ImageError> {
    panels.to_vec().try_into().map_err(|_| {
        ImageError::Validation(format!(
            "comic needs exactly {COMIC_PANELS} --panel values, got {}",
            panels.len()
        ))
    })
}
