//! Release feed lookup and installer download with progress reporting
//!
//! Networking runs on `reqwest` + `tokio`; a private current-thread runtime
//! turns every public call into a blocking one so progress callbacks always
//! fire on the caller's thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use log::info;
use serde::Deserialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::file_ops::write_file_atomic;
use crate::error::{BoxError, InstallerError, Result};

const GITHUB_API: &str = "https://api.github.com";
const API_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300); // 5 min no data

/// One published release and its downloadable assets
#[derive(Deserialize, Debug, Clone)]
pub struct Release {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// A single downloadable artifact of a release
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(rename = "browser_download_url")]
    pub url: String,
    /// Copied from the owning release during selection
    #[serde(skip)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub release_tag: String,
}

impl ReleaseAsset {
    fn matches(&self, platform_marker: &str) -> bool {
        self.content_type.contains(platform_marker)
    }
}

/// Source of release listings for a repository
pub trait ReleaseFeed {
    fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<Release>>;
}

/// Pick the first matching asset of the most recently published qualifying release
///
/// A release qualifies when at least one of its assets matches
/// `platform_marker`. Unpublished releases rank below published ones and
/// ties keep the earlier-listed release.
pub fn select_latest_asset(releases: &[Release], platform_marker: &str) -> Option<ReleaseAsset> {
    let latest = releases
        .iter()
        .filter(|r| r.assets.iter().any(|a| a.matches(platform_marker)))
        .reduce(|best, r| if r.published_at > best.published_at { r } else { best })?;

    latest
        .assets
        .iter()
        .find(|a| a.matches(platform_marker))
        .map(|a| ReleaseAsset {
            published_at: latest.published_at,
            release_tag: latest.tag_name.clone(),
            ..a.clone()
        })
}

/// Async HTTP client paired with the runtime that drives it
#[derive(Clone)]
pub struct BlockingHttp {
    runtime: Arc<tokio::runtime::Runtime>,
    client: reqwest::Client,
}

impl BlockingHttp {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| InstallerError::io("Failed to create Tokio runtime", e))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("mplaunch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| InstallerError::System(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            runtime: Arc::new(runtime),
            client,
        })
    }
}

/// Release listings from the GitHub REST API
pub struct GitHubFeed {
    http: BlockingHttp,
    api_base: String,
}

impl GitHubFeed {
    pub fn new(http: BlockingHttp) -> Self {
        Self {
            http,
            api_base: GITHUB_API.to_string(),
        }
    }
}

impl ReleaseFeed for GitHubFeed {
    fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<Release>> {
        let url = format!("{}/repos/{owner}/{repo}/releases?per_page=100", self.api_base);
        let client = &self.http.client;

        self.http.runtime.block_on(async {
            let response = client
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/vnd.github+json")
                .timeout(API_TIMEOUT)
                .send()
                .await
                .map_err(|e| InstallerError::Feed(format!("request to {url} failed: {e}")))?;

            if !response.status().is_success() {
                return Err(InstallerError::Feed(format!(
                    "GitHub API error for {owner}/{repo}: HTTP {}",
                    response.status()
                )));
            }

            response
                .json::<Vec<Release>>()
                .await
                .map_err(|e| InstallerError::Feed(format!("malformed release list: {e}")))
        })
    }
}

/// Finds and fetches release assets
pub struct ReleaseFetcher {
    feed: Box<dyn ReleaseFeed>,
    http: BlockingHttp,
}

impl ReleaseFetcher {
    pub fn new(feed: Box<dyn ReleaseFeed>, http: BlockingHttp) -> Self {
        Self { feed, http }
    }

    /// Fetcher backed by the public GitHub API
    pub fn github() -> Result<Self> {
        let http = BlockingHttp::new()?;
        Ok(Self::new(Box::new(GitHubFeed::new(http.clone())), http))
    }

    pub fn find_latest_asset(&self, owner: &str, repo: &str, platform_marker: &str) -> Result<ReleaseAsset> {
        let releases = self.feed.list_releases(owner, repo)?;
        let asset = select_latest_asset(&releases, platform_marker).ok_or_else(|| InstallerError::ReleaseNotFound {
            owner: owner.to_string(),
            repo: repo.to_string(),
            marker: platform_marker.to_string(),
        })?;
        info!("Latest {owner}/{repo} release {} ships {}", asset.release_tag, asset.name);
        Ok(asset)
    }

    /// Download `asset` to `destination`, blocking until the body is complete
    ///
    /// An existing destination is returned untouched without any network
    /// I/O or progress calls. The file only appears once fully received.
    pub fn download(
        &self,
        asset: &ReleaseAsset,
        destination: &Path,
        mut on_progress: Option<&mut dyn FnMut(u8, &str)>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if destination.exists() {
            info!("Installer already downloaded: {}", destination.display());
            return Ok(destination.to_path_buf());
        }

        let label = format!("Downloading {}", asset.name);
        let mut report = |percent: u8, label: &str| {
            if let Some(cb) = on_progress.as_mut() {
                cb(percent, label);
            }
        };

        let data = self
            .http
            .runtime
            .block_on(fetch_body(&self.http.client, &asset.url, &label, &mut report, cancel))?;

        write_file_atomic(destination, &data)?;
        info!("Downloaded {} ({} bytes)", destination.display(), data.len());
        Ok(destination.to_path_buf())
    }
}

async fn fetch_body(
    client: &reqwest::Client,
    url: &str,
    label: &str,
    on_progress: &mut dyn FnMut(u8, &str),
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(InstallerError::Cancelled),
        sent = client.get(url).send() => sent.map_err(|e| InstallerError::download(url, e))?,
    };

    let response = response
        .error_for_status()
        .map_err(|e| InstallerError::download(url, e))?;

    let total = match response.content_length() {
        Some(len) if len > 0 => len,
        _ => {
            return Err(InstallerError::download(
                url,
                "response does not declare a content length",
            ));
        }
    };

    collect_with_progress(response.bytes_stream(), total, url, label, on_progress, cancel).await
}

/// Accumulate a body into a buffer of exactly `total` bytes
///
/// Reports `floor(read / total * 100)` after every chunk, below 100, and
/// exactly one final `100` once the body is complete.
pub(crate) async fn collect_with_progress<S, B, E>(
    stream: S,
    total: u64,
    url: &str,
    label: &str,
    on_progress: &mut dyn FnMut(u8, &str),
    cancel: &CancellationToken,
) -> Result<Vec<u8>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<BoxError>,
{
    let size = usize::try_from(total)
        .map_err(|_| InstallerError::download(url, format!("{total} bytes do not fit in memory")))?;
    let mut data = vec![0u8; size];
    let mut read = 0usize;
    let mut stream = std::pin::pin!(stream);

    on_progress(0, label);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(InstallerError::Cancelled),
            next = timeout(DOWNLOAD_INACTIVITY_TIMEOUT, stream.next()) => next,
        };

        let chunk = match next {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => return Err(InstallerError::download(url, e)),
            Ok(None) => break,
            Err(_) => {
                return Err(InstallerError::download(
                    url,
                    format!(
                        "no data received for {} seconds ({read}/{total} bytes)",
                        DOWNLOAD_INACTIVITY_TIMEOUT.as_secs()
                    ),
                ));
            }
        };

        let chunk = chunk.as_ref();
        let end = read + chunk.len();
        if end > size {
            return Err(InstallerError::download(
                url,
                format!("body exceeds declared length of {total} bytes"),
            ));
        }
        data[read..end].copy_from_slice(chunk);
        read = end;

        let percent = (read as u64 * 100 / total) as u8;
        if percent < 100 {
            on_progress(percent, label);
        }
    }

    if read < size {
        return Err(InstallerError::download(
            url,
            format!("body ended after {read} of {total} bytes"),
        ));
    }

    on_progress(100, label);
    Ok(data)
}
