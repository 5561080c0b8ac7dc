//! Read-only gallery listing backed by a public GitHub repository.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use futures::future::join_all;
use regex::Regex;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GalleryConfig;
use crate::error::ImageError;

static FILENAME_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8})[_-]?(\d{6})").expect("static regex"));

const META_SUFFIX: &str = ".meta.json";

/// One gallery entry: an image with optional narration and metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    /// Download URL of the PNG.
    pub png_url: String,
    /// Download URL of the matching MP3, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mp3_url: Option<String>,
    /// Parsed `<stem>.meta.json`, if present and readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    download_url: Option<String>,
}

/// Lists gallery entries through the GitHub contents API.
pub struct GalleryReader {
    client: Client,
    settings: GalleryConfig,
}

impl GalleryReader {
    /// Create a reader.
    #[must_use]
    pub fn new(client: Client, settings: GalleryConfig) -> Self {
        Self { client, settings }
    }

    /// List the gallery newest first.
    ///
    /// `repo` (`owner/name`) and `branch` fall back to the configured values.
    ///
    /// # Errors
    ///
    /// Fails when no repository is known, the listing request fails, or the
    /// listing is not a directory.
    pub async fn list_gallery(
        &self,
        repo: Option<&str>,
        branch: Option<&str>,
    ) -> Result<Vec<GalleryItem>, ImageError> {
        let repo = repo
            .or(self.settings.repo.as_deref())
            .map(str::trim)
            .filter(|r| r.contains('/'))
            .ok_or_else(|| ImageError::Validation("gallery repo must be given as owner/name".into()))?;
        let branch = branch.unwrap_or(&self.settings.branch);

        let url = format!("{}/repos/{repo}/contents", self.settings.api_base.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[("ref", branch)])
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, concat!("imagefuse/", env!("CARGO_PKG_VERSION")))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::UpstreamFetch { url, status: status.as_u16() });
        }
        let entries: Vec<ContentEntry> = response.json().await?;
        debug!(repo, branch, entries = entries.len(), "listed gallery repository");

        let mut items = self.pair_entries(entries).await;
        sort_newest_first(&mut items);
        Ok(items)
    }

    async fn pair_entries(&self, entries: Vec<ContentEntry>) -> Vec<GalleryItem> {
        let mut pngs = Vec::new();
        let mut mp3s = HashMap::new();
        let mut metas = HashMap::new();

        for entry in entries {
            let Some(url) = entry.download_url.filter(|_| entry.kind == "file") else {
                continue;
            };
            let lower = entry.name.to_ascii_lowercase();
            if lower.ends_with(".png") {
                pngs.push((strip_extension(&entry.name).to_string(), url));
            } else if lower.ends_with(".mp3") {
                mp3s.insert(strip_extension(&entry.name).to_string(), url);
            } else if lower.ends_with(META_SUFFIX) {
                let stem = &entry.name[..entry.name.len() - META_SUFFIX.len()];
                metas.insert(stem.to_string(), url);
            }
        }

        let metas = join_all(pngs.iter().map(|(stem, _)| {
            let meta_url = metas.get(stem).cloned();
            async move {
                match meta_url {
                    Some(url) => self.fetch_meta(&url).await,
                    None => None,
                }
            }
        }))
        .await;

        pngs.into_iter()
            .zip(metas)
            .map(|((stem, png_url), meta)| GalleryItem {
                png_url,
                mp3_url: mp3s.get(&stem).cloned(),
                meta,
            })
            .collect()
    }

    /// Best-effort metadata fetch; failures only drop the metadata.
    async fn fetch_meta(&self, url: &str) -> Option<Value> {
        let response = match self.client.get(url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(url, status = r.status().as_u16(), "gallery metadata unavailable");
                return None;
            }
            Err(e) => {
                warn!(url, error = %e, "gallery metadata fetch failed");
                return None;
            }
        };
        response.json().await.ok()
    }
}

fn strip_extension(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

/// Timestamp embedded in a file name as `YYYYMMDD[_-]HHMMSS`.
#[must_use]
pub fn extract_timestamp(url: &str) -> Option<NaiveDateTime> {
    let caps = FILENAME_TIMESTAMP.captures(url)?;
    let digits = format!("{}{}", &caps[1], &caps[2]);
    NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M%S").ok()
}

/// Newest first; equal or missing timestamps fall back to reverse URL order,
/// and entries without a timestamp go last.
pub fn sort_newest_first(items: &mut [GalleryItem]) {
    items.sort_by(|a, b| {
        let by_time = match (extract_timestamp(&a.png_url), extract_timestamp(&b.png_url)) {
            (Some(ta), Some(tb)) => tb.cmp(&ta),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_time.then_with(|| b.png_url.cmp(&a.png_url))
    });
}
