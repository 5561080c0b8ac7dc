//! imagefuse - BYOK image editing, blending, try-on and comics over Gemini and Fal.ai.

mod adapters;
mod cassette;
mod cli;
mod config;
mod context;
mod error;
mod gallery;
mod model;
mod orchestrator;
mod output;
mod payload;
mod ports;
mod prompt;
mod request;
mod server;
mod speech;

use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, ImageJob};
use crate::config::Config;
use crate::context::{http_client, Credentials, RecordingSession, ServiceContext};
use crate::error::ImageError;
use crate::gallery::GalleryReader;
use crate::output::{resolve_output_path, save_images};
use crate::speech::SpeechClient;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise the server logs at info, one-shot commands at
/// warn, and `-v` raises either to debug.
fn init_tracing(cli: &Cli) {
    let default = match (cli.verbose, &cli.command) {
        (true, _) => "imagefuse=debug,tower_http=debug",
        (false, Command::Serve { .. }) => "imagefuse=info,tower_http=info",
        (false, _) => "imagefuse=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli) -> Result<(), ImageError> {
    let config_path = config::discover_config_path(cli.config.as_deref());
    let config = Arc::new(Config::load(&config_path).map_err(ImageError::Config)?);
    debug!(path = %config_path.display(), "configuration loaded");
    let client = http_client(&config.limits)?;

    match &cli.command {
        Command::Serve { bind } => {
            let addr = bind.clone().unwrap_or_else(|| config.server.bind.clone());
            server::serve(Arc::clone(&config), client, &addr).await
        }
        Command::Gallery { repo, branch } => {
            let reader = GalleryReader::new(client, config.gallery.clone());
            let items = reader.list_gallery(repo.as_deref(), branch.as_deref()).await?;
            let json = serde_json::to_string_pretty(&items).map_err(std::io::Error::other)?;
            println!("{json}");
            Ok(())
        }
        Command::Tts { text, voice, output } => {
            let speech = SpeechClient::new(client, config.elevenlabs_key(), config.elevenlabs.clone());
            let audio = speech.synthesize(text, voice.as_deref()).await?;
            let path = resolve_output_path(output.as_deref(), text, "mp3");
            std::fs::write(&path, audio)?;
            eprintln!("Saved: {}", path.display());
            Ok(())
        }
        image_command => {
            let credentials = Credentials::from_config(&config);
            let (ctx, session) = service_context(credentials, Arc::clone(&config), client)?;
            let job = image_command
                .image_job(&ctx.normalizer())?
                .ok_or_else(|| ImageError::Validation("not an image command".into()))?;
            let outcome = run_image_job(job, &ctx).await;

            // the recording adapter must be gone before the cassette is written
            drop(ctx);
            if let Some(session) = session {
                match session.finish() {
                    Ok(path) => eprintln!("Cassette saved: {}", path.display()),
                    Err(e) => warn!(error = %e, "failed to save cassette"),
                }
            }
            outcome
        }
    }
}

/// Live, recording or replaying context, chosen by `IMAGEFUSE_REPLAY` and
/// `IMAGEFUSE_REC`.
fn service_context(
    credentials: Credentials,
    config: Arc<Config>,
    client: reqwest::Client,
) -> Result<(ServiceContext, Option<RecordingSession>), ImageError> {
    if let Ok(cassette_path) = std::env::var("IMAGEFUSE_REPLAY") {
        debug!(cassette = %cassette_path, "replaying provider calls");
        let ctx = ServiceContext::replaying(Path::new(&cassette_path), credentials, config, client)?;
        return Ok((ctx, None));
    }
    if std::env::var("IMAGEFUSE_REC").is_ok_and(|v| v == "true" || v == "1") {
        debug!("recording provider calls");
        let (ctx, session) = ServiceContext::recording(credentials, config, client);
        return Ok((ctx, Some(session)));
    }
    Ok((ServiceContext::live(credentials, config, client), None))
}

async fn run_image_job(job: ImageJob, ctx: &ServiceContext) -> Result<(), ImageError> {
    let normalizer = ctx.normalizer();
    let result = orchestrator::execute(job.request, ctx, &normalizer).await?;
    if result.degraded {
        eprintln!(
            "Note: {} edits the first image only; the second image was not used.",
            result.provider.display_name()
        );
    }

    let base = resolve_output_path(job.output.as_deref(), &job.label, "png");
    for path in save_images(&result.images, &base)? {
        eprintln!("Saved: {}", path.display());
    }
    Ok(())
}
