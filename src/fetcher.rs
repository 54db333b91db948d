//! Downloads PDFs to local files.
//!
//! URLs are pre-filtered on the `.pdf` marker before any request is made. The
//! filter is cheap and can misclassify PDFs served from URLs without the
//! marker.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::model::DownloadStatus;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("URL has no file name: {0}")]
    NoFileName(String),
}

/// How the destination file is named inside the download directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Naming {
    /// One fixed file reused by every download. Only safe with a single worker.
    Shared(String),
    /// `<tag>_<url file name>`, or `<tag>.pdf` when the URL has none. Unique
    /// per in-flight item.
    PerItem(String),
    /// The URL's last path segment.
    FromUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Where the file was (or would have been) written. `None` when no
    /// destination was ever chosen.
    pub path: Option<PathBuf>,
    pub status: DownloadStatus,
}

impl Download {
    pub fn not_a_pdf() -> Self {
        Download {
            path: None,
            status: DownloadStatus::NotAPdf,
        }
    }
}

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str, directory: &Path, naming: &Naming) -> Download;
}

pub fn is_pdf_url(url: &str) -> bool {
    url.contains(".pdf")
}

pub fn encode_spaces(url: &str) -> String {
    url.replace(' ', "%20")
}

/// Last path segment of `url`, with encoded spaces turned into underscores.
pub fn file_name_from_url(url: &str) -> Result<String, FetchError> {
    let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or_default();
    if segment.is_empty() {
        return Err(FetchError::NoFileName(url.to_string()));
    }
    Ok(segment.replace("%20", "_"))
}

/// Destination path for `url` (already space-encoded) under `directory`.
pub fn destination(directory: &Path, url: &str, naming: &Naming) -> Result<PathBuf, FetchError> {
    let name = match naming {
        Naming::Shared(name) => name.clone(),
        // The tag alone keeps the name unique when the URL has no file name.
        Naming::PerItem(tag) => match file_name_from_url(url) {
            Ok(name) => format!("{}_{}", tag, name),
            Err(_) => format!("{}.pdf", tag),
        },
        Naming::FromUrl => file_name_from_url(url)?,
    };
    Ok(directory.join(name))
}

/// [`Fetch`] over HTTP(S) with reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
    requests: AtomicUsize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(HttpFetcher {
            client,
            requests: AtomicUsize::new(0),
        })
    }

    /// Number of HTTP requests issued so far.
    pub fn requests_sent(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    async fn download_to(&self, url: &str, directory: &Path, dest: &Path) -> Result<u64, FetchError> {
        tokio::fs::create_dir_all(directory).await?;

        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut response = self.client.get(url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, directory: &Path, naming: &Naming) -> Download {
        if !is_pdf_url(url) {
            debug!(url, "skipping URL without .pdf marker");
            return Download::not_a_pdf();
        }
        let url = encode_spaces(url);

        let dest = match destination(directory, &url, naming) {
            Ok(dest) => dest,
            Err(e) => {
                warn!(url = %url, error = %e, "download failed");
                return Download {
                    path: None,
                    status: DownloadStatus::Failed,
                };
            }
        };

        match self.download_to(&url, directory, &dest).await {
            Ok(bytes) => {
                debug!(url = %url, bytes, path = %dest.display(), "downloaded");
                Download {
                    path: Some(dest),
                    status: DownloadStatus::Success,
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "download failed");
                Download {
                    path: Some(dest),
                    status: DownloadStatus::Failed,
                }
            }
        }
    }
}
