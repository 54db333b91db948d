//! Worker pool: N tasks draining the shared queue, rows fanned into one sink.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::fetcher::Naming;
use crate::model::{DownloadStatus, ExtractStatus, ScrapeResult};
use crate::queue::{Pop, WorkQueue};
use crate::sink::ResultSink;
use crate::worker::Scraper;

pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(250);

/// How downloads are named in the temp directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TempNaming {
    /// One reused file. Only honoured with a single worker.
    Shared(String),
    /// Prefixed with the item id.
    PerItem,
}

impl TempNaming {
    pub fn for_item(&self, item_id: u64) -> Naming {
        match self {
            TempNaming::Shared(name) => Naming::Shared(name.clone()),
            TempNaming::PerItem => Naming::PerItem(item_id.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Items a single worker completes before exiting.
    pub per_worker_limit: Option<u64>,
    /// Items dispatched across the whole run.
    pub total_limit: Option<u64>,
    pub temp_naming: TempNaming,
    /// How long a pop waits before re-checking the stop flag.
    pub idle_wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            workers: 4,
            per_worker_limit: None,
            total_limit: None,
            temp_naming: TempNaming::PerItem,
            idle_wait: DEFAULT_IDLE_WAIT,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub rows: u64,
    pub downloaded: u64,
    pub extracted: u64,
    pub failed: u64,
    pub not_pdf: u64,
    pub errors: u64,
    /// Items dequeued or drained without being processed.
    pub discarded: u64,
}

impl RunStats {
    fn record(&mut self, row: &ScrapeResult) {
        self.rows += 1;
        match row.download_status {
            DownloadStatus::Success => self.downloaded += 1,
            DownloadStatus::Failed => self.failed += 1,
            DownloadStatus::NotAPdf => self.not_pdf += 1,
            DownloadStatus::Error => self.errors += 1,
        }
        if row.extract_status == Some(ExtractStatus::Success) {
            self.extracted += 1;
        }
    }
}

/// State every worker shares for one run.
struct Shared {
    queue: Arc<WorkQueue>,
    stop: AtomicBool,
    next_id: AtomicU64,
    dispatched: AtomicU64,
    discarded: AtomicU64,
    active: AtomicUsize,
}

pub struct ScrapePool {
    scraper: Arc<Scraper>,
    config: PoolConfig,
}

impl ScrapePool {
    pub fn new(scraper: Arc<Scraper>, mut config: PoolConfig) -> Self {
        if config.workers > 1 {
            if let TempNaming::Shared(name) = &config.temp_naming {
                debug!(name = %name, workers = config.workers, "shared temp name replaced by per-item names");
                config.temp_naming = TempNaming::PerItem;
            }
        }
        ScrapePool { scraper, config }
    }

    #[cfg(test)]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Drain `queue` with the configured workers, writing one row per
    /// processed item to `sink`. `expected` sizes the progress bar.
    ///
    /// A sink error stops the run: in-flight items finish and clean up, then
    /// the error is returned.
    pub async fn run<W: Write>(
        &self,
        queue: Arc<WorkQueue>,
        sink: &mut ResultSink<W>,
        expected: Option<u64>,
    ) -> Result<RunStats> {
        let workers = self.config.workers;
        if workers == 0 {
            bail!("Worker count must be at least 1");
        }

        let shared = Arc::new(Shared {
            queue,
            stop: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            active: AtomicUsize::new(workers),
        });

        debug!(workers, queued = shared.queue.len(), "starting pool");
        let pb = progress_bar(expected.or(self.config.total_limit))?;

        // Workers send rows; this loop is the only writer.
        let (tx, mut rx) = mpsc::channel::<ScrapeResult>(workers * 2);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let shared = Arc::clone(&shared);
            let scraper = Arc::clone(&self.scraper);
            let config = self.config.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(worker_loop(worker, shared, scraper, config, tx)));
        }
        drop(tx);

        let mut stats = RunStats::default();
        let mut fatal = None;
        while let Some(row) = rx.recv().await {
            stats.record(&row);
            if let Err(e) = sink.write(&row) {
                shared.stop.store(true, Ordering::SeqCst);
                fatal = Some(e);
                break;
            }
            pb.inc(1);
        }
        drop(rx);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {}", e);
            }
        }
        pb.finish_and_clear();

        stats.discarded = shared.discarded.load(Ordering::SeqCst);
        if let Some(e) = fatal {
            return Err(e.context("Result sink failed, run stopped"));
        }
        sink.flush()?;
        debug!(rows = sink.rows(), "sink flushed");

        info!(
            "Wrote {} rows ({} downloaded, {} extracted, {} failed, {} not pdf, {} errors)",
            stats.rows, stats.downloaded, stats.extracted, stats.failed, stats.not_pdf, stats.errors
        );
        Ok(stats)
    }
}

fn progress_bar(len: Option<u64>) -> Result<ProgressBar> {
    let pb = match len {
        Some(len) => {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                    .progress_chars("=> "),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("[{elapsed_precise}] {spinner} {pos} rows ({per_sec})")?,
            );
            pb
        }
    };
    Ok(pb)
}

async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    scraper: Arc<Scraper>,
    config: PoolConfig,
    tx: mpsc::Sender<ScrapeResult>,
) {
    let mut completed = 0u64;
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        if config.per_worker_limit.is_some_and(|limit| completed >= limit) {
            debug!(worker, completed, "per-worker limit reached");
            break;
        }

        let item = match shared.queue.pop_timeout(config.idle_wait).await {
            Pop::Item(item) => item,
            Pop::Empty => continue,
            Pop::Finished => break,
        };

        if let Some(limit) = config.total_limit {
            let claimed = shared.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
            if claimed > limit {
                shared.discarded.fetch_add(1, Ordering::SeqCst);
                shared.stop.store(true, Ordering::SeqCst);
                break;
            }
            if claimed == limit {
                shared.stop.store(true, Ordering::SeqCst);
            }
        }

        let item_id = shared.next_id.fetch_add(1, Ordering::SeqCst);
        let naming = config.temp_naming.for_item(item_id);
        let row = Arc::clone(&scraper).run_item(item_id, item, naming).await;
        if tx.send(row).await.is_err() {
            // Sink is gone; the run is stopping.
            break;
        }
        completed += 1;
    }

    if shared.active.fetch_sub(1, Ordering::SeqCst) == 1 {
        let dropped = shared.queue.drain_and_close();
        shared.discarded.fetch_add(dropped as u64, Ordering::SeqCst);
        debug!(worker, dropped, "last worker closed the queue");
    }
    debug!(worker, completed, "worker exited");
}
