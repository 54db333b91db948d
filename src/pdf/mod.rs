//! PDF inspection: page count, fillable-form probe and sampled text extraction.
//!
//! Parsing runs on the blocking pool under a wall-clock budget, so a
//! pathological document costs at most `budget` before the caller moves on.
//! The blocking thread itself is not interrupted; it finishes in the
//! background and its result is discarded.

pub mod extract;
pub mod form;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::Document;
use thiserror::Error;
use tracing::debug;

use crate::model::{ExtractStatus, Fillable, SamplingSpec};

pub const DEFAULT_BUDGET: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("failed to parse PDF: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("document is encrypted")]
    Encrypted,
    #[error("no text could be decoded from the selected pages")]
    NoText,
    #[error("unexpected annotation entry: {0}")]
    Annotation(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("inspection task failed: {0}")]
    Task(String),
}

/// Text pulled from a document, `None` whenever extraction failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: Option<String>,
    pub status: ExtractStatus,
}

impl Extraction {
    pub fn failed() -> Self {
        Extraction {
            text: None,
            status: ExtractStatus::Failed,
        }
    }
}

/// Everything the worker learns from one downloaded document.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    /// Page count declared by the page tree, `None` when unreadable.
    pub total_pages: Option<u32>,
    pub is_fillable: Fillable,
    pub extraction: Extraction,
}

impl Inspection {
    pub fn failed() -> Self {
        Inspection {
            total_pages: None,
            is_fillable: Fillable::CheckFailed,
            extraction: Extraction::failed(),
        }
    }
}

/// Read-only inspection the worker runs against a downloaded file.
#[async_trait]
pub trait Inspect: Send + Sync {
    async fn inspect(&self, path: &Path, sampling: SamplingSpec) -> Inspection;
}

/// [`Inspect`] backed by lopdf.
pub struct LopdfInspector {
    budget: Duration,
}

impl LopdfInspector {
    pub fn new(budget: Duration) -> Self {
        LopdfInspector { budget }
    }
}

impl Default for LopdfInspector {
    fn default() -> Self {
        LopdfInspector::new(DEFAULT_BUDGET)
    }
}

#[async_trait]
impl Inspect for LopdfInspector {
    async fn inspect(&self, path: &Path, sampling: SamplingSpec) -> Inspection {
        let owned: PathBuf = path.to_path_buf();
        match bounded(self.budget, move || inspect_document(&owned, &sampling)).await {
            Ok(inspection) => inspection,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "inspection failed");
                Inspection::failed()
            }
        }
    }
}

/// Parse once, then count pages, look for form fields and extract text
/// from the same document. The form check and the extraction fail independently.
pub fn inspect_document(path: &Path, sampling: &SamplingSpec) -> Result<Inspection, PdfError> {
    let doc = Document::load(path)?;
    let total_pages = declared_page_count(&doc);

    let is_fillable = match form::has_fillable_page(&doc, sampling.max_pages) {
        Ok(true) => Fillable::Fillable,
        Ok(false) => Fillable::NotFillable,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "fillable check failed");
            Fillable::CheckFailed
        }
    };

    let extraction = match extract::extract_text(&doc, total_pages, sampling) {
        Ok(text) => Extraction {
            text: Some(text),
            status: ExtractStatus::Success,
        },
        Err(e) => {
            debug!(path = %path.display(), error = %e, "text extraction failed");
            Extraction::failed()
        }
    };

    Ok(Inspection {
        total_pages,
        is_fillable,
        extraction,
    })
}

/// Run blocking PDF work with a wall-clock limit.
pub async fn bounded<T, F>(budget: Duration, work: F) -> Result<T, PdfError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PdfError> + Send + 'static,
{
    match tokio::time::timeout(budget, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(PdfError::Task(join.to_string())),
        Err(_) => Err(PdfError::Timeout(budget)),
    }
}

/// `/Count` of the catalog's page-tree root. Reads one dictionary instead of
/// walking the tree.
pub fn declared_page_count(doc: &Document) -> Option<u32> {
    let pages = doc.catalog().ok()?.get(b"Pages").ok()?;
    let (_, pages) = doc.dereference(pages).ok()?;
    let count = pages.as_dict().ok()?.get(b"Count").ok()?;
    let (_, count) = doc.dereference(count).ok()?;
    u32::try_from(count.as_i64().ok()?).ok()
}
