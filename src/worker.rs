//! The per-item protocol: download, probe, count, extract, enrich, clean up.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::fetcher::{Fetch, Naming};
use crate::model::{DownloadStatus, SamplingSpec, ScrapeResult, WorkItem};
use crate::nlp::Annotate;
use crate::pdf::{Inspect, Inspection};

/// A downloaded file owned by one in-flight item. Removed by [`release`],
/// or on drop if the item unwinds before getting there.
///
/// [`release`]: TempFile::release
pub struct TempFile {
    path: PathBuf,
    released: bool,
}

impl TempFile {
    pub fn new(path: PathBuf) -> Self {
        TempFile {
            path,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove_if_present(&self.path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.released {
            let _ = remove_if_present(&self.path);
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Delete every file left in the download directory.
pub fn clean_temp_dir(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() {
            remove_if_present(&path).with_context(|| format!("Failed to remove {:?}", path))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// `total_pages` when known and under the cap, otherwise the cap.
/// A cap of 0 means unlimited, so a known total is reported as is.
pub fn pages_scraped(total_pages: Option<u32>, max_pages: u32) -> u32 {
    match total_pages {
        Some(total) if max_pages == 0 || total < max_pages => total,
        _ => max_pages,
    }
}

pub struct Scraper {
    fetcher: Arc<dyn Fetch>,
    inspector: Arc<dyn Inspect>,
    annotator: Option<Arc<dyn Annotate>>,
    temp_dir: PathBuf,
    sampling: SamplingSpec,
}

impl Scraper {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        inspector: Arc<dyn Inspect>,
        annotator: Option<Arc<dyn Annotate>>,
        temp_dir: PathBuf,
        sampling: SamplingSpec,
    ) -> Self {
        Scraper {
            fetcher,
            inspector,
            annotator,
            temp_dir,
            sampling,
        }
    }

    /// Run one item to a row. Failures in any stage degrade the row; an
    /// unexpected error or panic becomes an `Error` row.
    pub async fn run_item(self: Arc<Self>, item_id: u64, item: WorkItem, naming: Naming) -> ScrapeResult {
        let scraper = Arc::clone(&self);
        let task_item = item.clone();
        let outcome =
            tokio::spawn(async move { scraper.process(item_id, &task_item, &naming).await }).await;

        match outcome {
            Ok(Ok(row)) => row,
            Ok(Err(e)) => {
                warn!(item_id, url = %item.url, error = %format!("{e:#}"), "item failed");
                ScrapeResult::errored(item_id, &item, format!("{e:#}"))
            }
            Err(e) => {
                warn!(item_id, url = %item.url, error = %e, "item task aborted");
                ScrapeResult::errored(item_id, &item, e.to_string())
            }
        }
    }

    pub async fn process(&self, item_id: u64, item: &WorkItem, naming: &Naming) -> Result<ScrapeResult> {
        let download = self.fetcher.fetch(&item.url, &self.temp_dir, naming).await;
        let temp = download.path.map(TempFile::new);

        if download.status != DownloadStatus::Success {
            if let Some(temp) = temp {
                temp.release().context("Failed to remove partial download")?;
            }
            debug!(item_id, url = %item.url, status = %download.status, "download not usable");
            return Ok(ScrapeResult::download_failed(item_id, item, download.status));
        }
        let temp = temp.context("Fetcher reported success without a file")?;

        let max_pages = self.sampling.max_pages;
        let Inspection {
            total_pages,
            is_fillable,
            extraction,
        } = self.inspector.inspect(temp.path(), self.sampling).await;

        let temp_path = temp.path().to_path_buf();
        temp.release()
            .with_context(|| format!("Failed to remove {:?}", temp_path))?;

        let enrichment = match (&self.annotator, &extraction.text) {
            (Some(annotator), Some(text)) => match annotator.annotate(text).await {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(item_id, error = %e, "enrichment skipped");
                    None
                }
            },
            _ => None,
        };

        debug!(
            item_id,
            url = %item.url,
            extract = %extraction.status,
            fillable = %is_fillable,
            "scraped"
        );

        Ok(ScrapeResult {
            item_id,
            origin_page: item.origin_page,
            url: item.url.clone(),
            download_status: DownloadStatus::Success,
            extract_status: Some(extraction.status),
            total_pages,
            pages_scraped: Some(pages_scraped(total_pages, max_pages)),
            is_fillable: Some(is_fillable),
            text: extraction.text,
            enrichment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::destination;
    use crate::model::{ExtractStatus, Fillable};
    use crate::pdf::LopdfInspector;
    use crate::testing::{build_pdf, StubAnnotator, StubFetcher, StubInspector};
    use serde_json::json;

    const SAMPLING: SamplingSpec = SamplingSpec {
        max_pages: 10,
        base_pages: 5,
        random_sample_size: 5,
    };

    fn scraper(
        fetcher: StubFetcher,
        inspector: Arc<dyn Inspect>,
        annotator: Option<Arc<dyn Annotate>>,
        dir: &Path,
    ) -> Arc<Scraper> {
        Arc::new(Scraper::new(
            Arc::new(fetcher),
            inspector,
            annotator,
            dir.to_path_buf(),
            SAMPLING,
        ))
    }

    #[test]
    fn pages_scraped_reconciliation() {
        assert_eq!(pages_scraped(Some(3), 10), 3);
        assert_eq!(pages_scraped(Some(10), 10), 10);
        assert_eq!(pages_scraped(Some(250), 10), 10);
        assert_eq!(pages_scraped(None, 10), 10);
        assert_eq!(pages_scraped(Some(40), 0), 40);
        assert_eq!(pages_scraped(None, 0), 0);
    }

    #[tokio::test]
    async fn single_page_document_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = build_pdf(&["Permit application"], None);
        let scraper = scraper(
            StubFetcher::serving(pdf),
            Arc::new(LopdfInspector::default()),
            None,
            dir.path(),
        );
        let item = WorkItem::new(12, "http://x/docs/permit.pdf");
        let naming = Naming::PerItem("0".into());

        let row = scraper.process(0, &item, &naming).await.unwrap();

        assert_eq!(row.download_status, DownloadStatus::Success);
        assert_eq!(row.extract_status, Some(ExtractStatus::Success));
        assert_eq!(row.is_fillable, Some(Fillable::NotFillable));
        assert_eq!(row.total_pages, Some(1));
        assert_eq!(row.pages_scraped, Some(1));
        assert!(row.text.as_deref().unwrap().contains("Permit"));
        assert_eq!(row.origin_page, 12);

        let used = destination(dir.path(), &item.url, &naming).unwrap();
        assert!(!used.exists());
    }

    #[tokio::test]
    async fn failed_download_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let scraper = scraper(
            StubFetcher::failing(),
            Arc::new(StubInspector::default()),
            None,
            dir.path(),
        );
        let item = WorkItem::new(1, "http://x/a.pdf");
        let naming = Naming::Shared("temp.pdf".into());

        let row = scraper.process(4, &item, &naming).await.unwrap();

        assert_eq!(row, ScrapeResult::download_failed(4, &item, DownloadStatus::Failed));
        assert!(!dir.path().join("temp.pdf").exists());
    }

    #[tokio::test]
    async fn mixed_batch_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::serving(build_pdf(&["x"], None));
        let scraper = scraper(fetcher, Arc::new(StubInspector::default()), None, dir.path());
        let naming = Naming::Shared("temp.pdf".into());

        let first = scraper
            .process(0, &WorkItem::new(1, "http://x/a.pdf"), &naming)
            .await
            .unwrap();
        let second = scraper
            .process(1, &WorkItem::new(2, "http://x/notpdf.html"), &naming)
            .await
            .unwrap();

        assert_eq!(first.download_status, DownloadStatus::Success);
        assert_eq!(second.download_status, DownloadStatus::NotAPdf);
        assert!(second.extract_status.is_none());
        assert!(second.total_pages.is_none());
        assert!(second.pages_scraped.is_none());
        assert!(second.is_fillable.is_none());
        assert!(second.text.is_none());
        assert!(second.enrichment.is_none());
    }

    #[tokio::test]
    async fn enrichment_attached_when_available() {
        let dir = tempfile::tempdir().unwrap();
        let mentions = json!([{ "text": "Springfield", "ner": "CITY" }]);
        let scraper = scraper(
            StubFetcher::serving(b"%PDF".to_vec()),
            Arc::new(StubInspector::default()),
            Some(Arc::new(StubAnnotator(Some(mentions.clone())))),
            dir.path(),
        );
        let row = scraper
            .process(0, &WorkItem::new(1, "http://x/a.pdf"), &Naming::FromUrl)
            .await
            .unwrap();
        assert_eq!(row.enrichment, Some(mentions));
    }

    #[tokio::test]
    async fn enrichment_failure_does_not_fail_item() {
        let dir = tempfile::tempdir().unwrap();
        let scraper = scraper(
            StubFetcher::serving(b"%PDF".to_vec()),
            Arc::new(StubInspector::default()),
            Some(Arc::new(StubAnnotator(None))),
            dir.path(),
        );
        let row = scraper
            .process(0, &WorkItem::new(1, "http://x/a.pdf"), &Naming::FromUrl)
            .await
            .unwrap();
        assert_eq!(row.download_status, DownloadStatus::Success);
        assert_eq!(row.text.as_deref(), Some("stub text"));
        assert!(row.enrichment.is_none());
    }

    #[tokio::test]
    async fn panic_becomes_error_row_and_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = StubInspector {
            panic_on_extract: true,
            ..StubInspector::default()
        };
        let scraper = scraper(
            StubFetcher::serving(b"%PDF".to_vec()),
            Arc::new(inspector),
            None,
            dir.path(),
        );
        let item = WorkItem::new(8, "http://x/boom.pdf");

        let row = Arc::clone(&scraper)
            .run_item(3, item.clone(), Naming::PerItem("3".into()))
            .await;

        assert_eq!(row.download_status, DownloadStatus::Error);
        assert_eq!(row.item_id, 3);
        assert_eq!(row.origin_page, 8);
        assert!(row.text.is_some());
        assert!(!dir.path().join("3_boom.pdf").exists());
    }

    #[test]
    fn temp_file_released_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp.pdf");
        std::fs::write(&path, b"x").unwrap();

        TempFile::new(path.clone()).release().unwrap();
        assert!(!path.exists());
        // Releasing a path that is already gone is not an error.
        TempFile::new(path.clone()).release().unwrap();
    }

    #[test]
    fn clean_removes_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1_a.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("temp.pdf"), b"y").unwrap();
        assert_eq!(clean_temp_dir(dir.path()).unwrap(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(clean_temp_dir(&dir.path().join("missing")).unwrap(), 0);
    }
}
