//! Photo acquisition: remote fetch with transport fallback and scratch
//! storage for the bytes until they are pushed to object storage.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, redirect, Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::normalize::extension_from_url;

const DESKTOP_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";
const GENERIC_UA: &str = "Mozilla/5.0";
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
const REFERER: &str = "https://www.google.com/";

/// Stable object name for an ordered photo slot (1-based).
pub fn slot_role(slot: usize) -> String {
    match slot {
        1 => "logo".to_string(),
        2 => "cover".to_string(),
        n => format!("photo_{n}"),
    }
}

/// A downloaded photo parked in scratch storage.
///
/// The scratch file is exclusively owned by the pipeline; dropping the item
/// unlinks it, so a file can never outlive the row that produced it.
#[derive(Debug)]
pub struct MediaItem {
    pub local_path: PathBuf,
    pub remote_name: String,
    pub extension: String,
}

impl MediaItem {
    pub fn object_name(&self) -> String {
        format!("{}.{}", self.remote_name, self.extension)
    }
}

impl Drop for MediaItem {
    fn drop(&mut self) {
        if self.local_path.exists() {
            if let Err(err) = fs::remove_file(&self.local_path) {
                warn!(path = %self.local_path.display(), error = %err, "failed to remove scratch file");
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("all transports failed: {0}")]
    Fetch(String),
    #[error("no writable scratch dir available")]
    NoWritableScratch,
    #[error("failed to write scratch file {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one transport attempt. Connection-layer failures are eligible
/// for the insecure TLS retry; HTTP-status failures are not.
#[derive(Debug)]
enum FetchFailure {
    Status(StatusCode),
    Connection(String),
    EmptyBody,
}

impl FetchFailure {
    fn is_connection(&self) -> bool {
        matches!(self, FetchFailure::Connection(_))
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Status(status) => write!(f, "http={status}"),
            FetchFailure::Connection(detail) => write!(f, "error={detail}"),
            FetchFailure::EmptyBody => write!(f, "empty body"),
        }
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(err: reqwest::Error) -> Self {
        FetchFailure::Connection(err.to_string())
    }
}

async fn fetch_once(client: &Client, url: &str) -> Result<Bytes, FetchFailure> {
    let resp = client
        .get(url)
        .header(header::ACCEPT, IMAGE_ACCEPT)
        .header(header::REFERER, REFERER)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchFailure::Status(status));
    }
    let body = resp.bytes().await?;
    if body.is_empty() {
        return Err(FetchFailure::EmptyBody);
    }
    Ok(body)
}

#[async_trait]
trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchFailure>;
}

/// Primary transport: desktop browser profile, bounded redirects/timeouts,
/// certificate verification on. Image hosts that reject bare clients get a
/// convincing user-agent and referer.
struct RichTransport {
    client: Client,
    insecure: Client,
}

impl RichTransport {
    fn new() -> anyhow::Result<Self> {
        let connect_timeout = Duration::from_secs(10);
        let total_timeout = Duration::from_secs(30);
        let client = Client::builder()
            .user_agent(DESKTOP_UA)
            .redirect(redirect::Policy::limited(10))
            .connect_timeout(connect_timeout)
            .timeout(total_timeout)
            .build()?;
        // Fallback for local/dev cert chain issues; only used after a
        // connection-layer failure, never for plain non-2xx responses.
        let insecure = Client::builder()
            .user_agent(DESKTOP_UA)
            .redirect(redirect::Policy::limited(10))
            .connect_timeout(connect_timeout)
            .timeout(total_timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client, insecure })
    }
}

#[async_trait]
impl Transport for RichTransport {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, FetchFailure> {
        match fetch_once(&self.client, url).await {
            Ok(body) => Ok(body),
            Err(failure) if failure.is_connection() => {
                warn!(%url, %failure, "retrying with certificate verification disabled");
                fetch_once(&self.insecure, url).await
            }
            Err(failure) => Err(failure),
        }
    }
}

/// Secondary transport: plain stream fetch with a generic user-agent.
struct BasicTransport {
    client: Client,
}

impl BasicTransport {
    fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(GENERIC_UA)
            .redirect(redirect::Policy::limited(10))
            .timeout(Duration::from_secs(25))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for BasicTransport {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, FetchFailure> {
        fetch_once(&self.client, url).await
    }
}

/// Scratch directory selection: an ordered candidate list probed with a real
/// write-then-delete, not just a permission check.
struct ScratchDirs {
    candidates: Vec<PathBuf>,
}

impl ScratchDirs {
    fn with_defaults() -> Self {
        Self {
            candidates: vec![
                std::env::temp_dir(),
                PathBuf::from("/tmp"),
                PathBuf::from("tmp_uploads"),
                PathBuf::from("../tmp_uploads"),
            ],
        }
    }

    fn pick_writable(&self) -> Option<PathBuf> {
        for dir in &self.candidates {
            if !dir.is_dir() && fs::create_dir_all(dir).is_err() {
                continue;
            }
            let probe = dir.join(format!("probe_{}", Uuid::new_v4().simple()));
            match fs::write(&probe, b"probe") {
                Ok(()) => {
                    let _ = fs::remove_file(&probe);
                    return Some(dir.clone());
                }
                Err(_) => continue,
            }
        }
        None
    }

    fn persist(&self, bytes: &[u8]) -> Result<PathBuf, MediaError> {
        let dir = self.pick_writable().ok_or(MediaError::NoWritableScratch)?;
        let path = dir.join(format!("venue_img_{}", Uuid::new_v4().simple()));
        if let Err(source) = fs::write(&path, bytes) {
            let _ = fs::remove_file(&path);
            return Err(MediaError::Persist { path, source });
        }
        Ok(path)
    }
}

/// Downloads photo slots to scratch storage, trying each transport in order.
pub struct MediaAcquirer {
    transports: Vec<Box<dyn Transport>>,
    scratch: ScratchDirs,
}

impl MediaAcquirer {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            transports: vec![
                Box::new(RichTransport::new()?),
                Box::new(BasicTransport::new()?),
            ],
            scratch: ScratchDirs::with_defaults(),
        })
    }

    /// Fetch every present photo slot for one row.
    ///
    /// Absent slots are skipped silently. A failing slot contributes an error
    /// string instead of aborting the batch.
    pub async fn acquire_batch(
        &self,
        photo_urls: &[Option<String>],
    ) -> (Vec<MediaItem>, Vec<String>) {
        let mut items = Vec::new();
        let mut errors = Vec::new();
        for (idx, url) in photo_urls.iter().enumerate() {
            let slot = idx + 1;
            let Some(url) = url else {
                continue;
            };
            match self.acquire(url).await {
                Ok(local_path) => {
                    debug!(slot, %url, path = %local_path.display(), "photo downloaded");
                    items.push(MediaItem {
                        local_path,
                        remote_name: slot_role(slot),
                        extension: extension_from_url(url),
                    });
                }
                Err(err) => errors.push(format!("photo_{slot} download failed: {err}")),
            }
        }
        (items, errors)
    }

    async fn acquire(&self, url: &str) -> Result<PathBuf, MediaError> {
        let body = self.fetch_with_fallback(url).await?;
        self.scratch.persist(&body)
    }

    async fn fetch_with_fallback(&self, url: &str) -> Result<Bytes, MediaError> {
        let mut attempts: Vec<String> = Vec::new();
        for transport in &self.transports {
            match transport.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(failure) => {
                    debug!(%url, transport = transport.name(), %failure, "transport failed");
                    attempts.push(format!("{} {failure}", transport.name()));
                }
            }
        }
        Err(MediaError::Fetch(attempts.join("; ")))
    }
}
