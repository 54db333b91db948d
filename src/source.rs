use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::model::WorkItem;
use crate::queue::WorkQueue;

#[derive(Debug, Deserialize)]
struct SourceRow {
    pdf_id: i64,
    pdf_url: String,
}

/// Read `pdf_id, pdf_url` rows from a delimited file. Extra columns are
/// ignored; rows with a blank URL are skipped.
pub fn read_work_items(path: &Path, delimiter: u8, limit: Option<usize>) -> Result<Vec<WorkItem>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let mut items = Vec::new();
    for row in reader.deserialize::<SourceRow>() {
        if limit.is_some_and(|n| items.len() >= n) {
            break;
        }
        let row = row.with_context(|| format!("Bad row in {:?}", path))?;
        let url = row.pdf_url.trim();
        if url.is_empty() {
            continue;
        }
        items.push(WorkItem::new(row.pdf_id, url));
    }
    Ok(items)
}

/// What a producer task handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Produced {
    pub pushed: usize,
    /// Items never queued because the pool closed the queue first.
    pub rejected: usize,
}

/// Push `items` from a background task, then mark the queue finished.
/// Stops early if the pool closes the queue.
pub fn spawn_producer(queue: Arc<WorkQueue>, items: Vec<WorkItem>) -> JoinHandle<Produced> {
    tokio::spawn(async move {
        let total = items.len();
        let mut pushed = 0usize;
        for item in items {
            if let Err(e) = queue.push(item) {
                warn!("Producer stopped after {} items: {}", pushed, e);
                break;
            }
            pushed += 1;
            if pushed % 64 == 0 {
                tokio::task::yield_now().await;
            }
        }
        queue.finish();
        debug!(pushed, "producer finished");
        Produced {
            pushed,
            rejected: total - pushed,
        }
    })
}
