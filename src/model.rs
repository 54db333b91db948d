use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// One (origin page, URL) pair waiting to be fetched and scraped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub origin_page: i64,
    pub url: String,
}

impl WorkItem {
    pub fn new(origin_page: i64, url: impl Into<String>) -> Self {
        WorkItem {
            origin_page,
            url: url.into(),
        }
    }
}

// ── Status dimensions ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Success,
    Failed,
    NotAPdf,
    /// The item was aborted by an unexpected failure after dequeue.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fillable {
    Fillable,
    NotFillable,
    CheckFailed,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Success => "Success",
            DownloadStatus::Failed => "Failed",
            DownloadStatus::NotAPdf => "NotAPdf",
            DownloadStatus::Error => "Error",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ExtractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractStatus::Success => "Success",
            ExtractStatus::Failed => "Failed",
        })
    }
}

impl fmt::Display for Fillable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Fillable::Fillable => "Fillable",
            Fillable::NotFillable => "NotFillable",
            Fillable::CheckFailed => "CheckFailed",
        })
    }
}

/// Which pages of a document get their text extracted.
///
/// When `random_sample_size > 0` and the document has more than
/// `random_sample_size` pages beyond the first `base_pages`, the leading
/// `base_pages` pages are visited plus a uniform sample (without replacement)
/// of `random_sample_size` pages from the rest. Otherwise pages are visited in
/// order up to `max_pages`, where 0 means no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct SamplingSpec {
    pub max_pages: u32,
    pub base_pages: u32,
    pub random_sample_size: u32,
}

// ── Result rows ──

/// Column order of every result file.
pub const HEADER: [&str; 10] = [
    "pdf_id",
    "origin_page",
    "pdf_url",
    "dl_status",
    "scrape_status",
    "num_pages",
    "num_pages_scraped",
    "is_fillable",
    "text",
    "enrichment",
];

/// One output row. Field order matches [`HEADER`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeResult {
    #[serde(rename = "pdf_id")]
    pub item_id: u64,
    pub origin_page: i64,
    #[serde(rename = "pdf_url")]
    pub url: String,
    #[serde(rename = "dl_status")]
    pub download_status: DownloadStatus,
    #[serde(rename = "scrape_status")]
    pub extract_status: Option<ExtractStatus>,
    #[serde(rename = "num_pages")]
    pub total_pages: Option<u32>,
    #[serde(rename = "num_pages_scraped")]
    pub pages_scraped: Option<u32>,
    pub is_fillable: Option<Fillable>,
    pub text: Option<String>,
    #[serde(serialize_with = "compact_json")]
    pub enrichment: Option<serde_json::Value>,
}

impl ScrapeResult {
    /// Row for an item whose download never produced a usable file.
    pub fn download_failed(item_id: u64, item: &WorkItem, status: DownloadStatus) -> Self {
        ScrapeResult {
            item_id,
            origin_page: item.origin_page,
            url: item.url.clone(),
            download_status: status,
            extract_status: None,
            total_pages: None,
            pages_scraped: None,
            is_fillable: None,
            text: None,
            enrichment: None,
        }
    }

    /// Row for an item aborted by an unexpected failure. The description goes
    /// into the free-text column so status columns keep their closed value set.
    pub fn errored(item_id: u64, item: &WorkItem, description: impl Into<String>) -> Self {
        ScrapeResult {
            text: Some(flatten_newlines(&description.into())),
            ..ScrapeResult::download_failed(item_id, item, DownloadStatus::Error)
        }
    }
}

fn compact_json<S: Serializer>(
    value: &Option<serde_json::Value>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_str(&v.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Replace line breaks with spaces so a value fits on one row.
pub fn flatten_newlines(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}
