//! Live adapter for Fal.ai asynchronous image jobs.
//!
//! Fal exposes single-image editing only. A job is submitted as multipart,
//! polled at a fixed interval until it settles, and the hosted output is then
//! downloaded.

use std::future::Future;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::FalConfig;
use crate::error::ImageError;
use crate::model::ProviderKind;
use crate::payload::ImagePayload;
use crate::ports::{Capabilities, ImageProvider, ProviderFuture};

/// Live Fal provider bound to one caller's API key.
pub struct FalProvider {
    client: Client,
    api_key: String,
    settings: FalConfig,
}

impl FalProvider {
    /// Create a provider for a single request.
    #[must_use]
    pub fn new(client: Client, api_key: String, settings: FalConfig) -> Self {
        Self { client, api_key, settings }
    }

    fn auth(&self) -> String {
        format!("Key {}", self.api_key)
    }

    async fn submit(&self, image: &ImagePayload, prompt: &str) -> Result<FalJob, ImageError> {
        let part = Part::bytes(image.bytes.clone()).file_name("image").mime_str(&image.mime)?;
        let form = Form::new().text("prompt", prompt.to_string()).part("image", part);

        let response = self
            .client
            .post(&self.settings.submit_url)
            .header(AUTHORIZATION, self.auth())
            .multipart(form)
            .send()
            .await?;
        parse_job(response).await
    }

    async fn job_status(&self, id: &str) -> Result<FalJob, ImageError> {
        let url = format!("{}/{id}", self.settings.jobs_url.trim_end_matches('/'));
        let response = self.client.get(url).header(AUTHORIZATION, self.auth()).send().await?;
        parse_job(response).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let response = self.client.get(url).timeout(self.settings.timeout()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::UpstreamFetch { url: url.to_string(), status: status.as_u16() });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn run(&self, image: &ImagePayload, prompt: &str) -> Result<ImagePayload, ImageError> {
        let job = self.submit(image, prompt).await?;
        info!(job = %job.id, status = job.status.as_str(), "fal job submitted");

        let result = match (job.status, job.result) {
            (JobStatus::Succeeded, Some(result)) => result,
            _ => {
                poll_job(&job.id, self.settings.poll_interval(), self.settings.timeout(), || {
                    self.job_status(&job.id)
                })
                .await?
            }
        };

        let url = result_image_url(&result).ok_or_else(|| ImageError::NoImageInResponse {
            provider: ProviderKind::Fal.display_name().into(),
        })?;
        debug!(job = %job.id, url, "fal job succeeded");

        let bytes = self.download(url).await?;
        Ok(ImagePayload::from_output(bytes))
    }
}

impl ImageProvider for FalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fal
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(ProviderKind::Fal)
    }

    fn edit<'a>(
        &'a self,
        image: &'a ImagePayload,
        prompt: &'a str,
    ) -> ProviderFuture<'a, ImagePayload> {
        Box::pin(self.run(image, prompt))
    }
}

async fn parse_job(response: reqwest::Response) -> Result<FalJob, ImageError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(ImageError::provider(ProviderKind::Fal, status.as_u16(), &text));
    }
    serde_json::from_str(&text).map_err(|e| {
        ImageError::provider(ProviderKind::Fal, status.as_u16(), &format!("Failed to parse job: {e}"))
    })
}

/// Poll until the job settles or `timeout` has elapsed.
///
/// Polls are issued only while the elapsed time is below `timeout`, with one
/// `interval` of sleep between them. A poll still in flight when `timeout`
/// runs out is dropped.
async fn poll_job<F, Fut>(
    id: &str,
    interval: Duration,
    timeout: Duration,
    mut poll: F,
) -> Result<Value, ImageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<FalJob, ImageError>>,
{
    let timed_out = || ImageError::ProviderTimeout { id: id.to_string(), waited: timeout };
    let started = Instant::now();
    let polling = async {
        while started.elapsed() < timeout {
            let job = poll().await?;
            match job.status {
                JobStatus::Succeeded => return Ok(job.result.unwrap_or(Value::Null)),
                JobStatus::Failed | JobStatus::Error => {
                    return Err(ImageError::ProviderJobFailed {
                        id: id.to_string(),
                        status: job.status.as_str().to_string(),
                    });
                }
                pending => debug!(job = id, status = pending.as_str(), "fal job pending"),
            }
            tokio::time::sleep(interval).await;
        }
        Err(timed_out())
    };
    tokio::time::timeout(timeout, polling).await.unwrap_or_else(|_| Err(timed_out()))
}

/// Output URL from `result.images[0].url`, falling back to `result.image.url`.
fn result_image_url(result: &Value) -> Option<&str> {
    result["images"][0]["url"].as_str().or_else(|| result["image"]["url"].as_str())
}

#[derive(Debug, Deserialize)]
struct FalJob {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: JobStatus,
    result: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Error,
    /// Any status this adapter does not recognise; treated as still in flight.
    #[default]
    #[serde(other)]
    Pending,
}

impl JobStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Pending => "pending",
        }
    }
}
