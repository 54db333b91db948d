use lopdf::Document;
use rand::seq::index;
use rand::Rng;
use tracing::debug;

use super::PdfError;
use crate::model::{flatten_newlines, SamplingSpec};

/// Pages chosen for extraction, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePlan {
    /// Base pages plus a random sample, sorted.
    Sampled(Vec<u32>),
    /// Pages in document order up to the cap (0 = all).
    Leading(u32),
}

pub fn plan_pages<R: Rng + ?Sized>(
    total_pages: Option<u32>,
    sampling: &SamplingSpec,
    rng: &mut R,
) -> PagePlan {
    let Some(total) = total_pages else {
        return PagePlan::Leading(sampling.max_pages);
    };
    let remainder = total.saturating_sub(sampling.base_pages);
    if sampling.random_sample_size == 0 || remainder <= sampling.random_sample_size {
        return PagePlan::Leading(sampling.max_pages);
    }

    let base = sampling.base_pages;
    let mut pages: Vec<u32> = (1..=base).collect();
    pages.extend(
        index::sample(rng, remainder as usize, sampling.random_sample_size as usize)
            .into_iter()
            .map(|offset| base + 1 + offset as u32),
    );
    pages.sort_unstable();
    PagePlan::Sampled(pages)
}

/// Extract single-line text from the pages selected by `sampling`.
pub fn extract_text(
    doc: &Document,
    total_pages: Option<u32>,
    sampling: &SamplingSpec,
) -> Result<String, PdfError> {
    if doc.is_encrypted() {
        return Err(PdfError::Encrypted);
    }
    let plan = plan_pages(total_pages, sampling, &mut rand::rng());
    extract_planned(doc, &plan)
}

pub fn extract_planned(doc: &Document, plan: &PagePlan) -> Result<String, PdfError> {
    let available = doc.get_pages();
    let selected: Vec<u32> = match plan {
        PagePlan::Sampled(pages) => pages
            .iter()
            .copied()
            .filter(|p| available.contains_key(p))
            .collect(),
        PagePlan::Leading(0) => available.keys().copied().collect(),
        PagePlan::Leading(cap) => available.keys().copied().take(*cap as usize).collect(),
    };

    let mut text = String::new();
    let mut undecodable = 0usize;
    for page in &selected {
        match doc.extract_text(&[*page]) {
            Ok(page_text) => text.push_str(&page_text),
            Err(e) => {
                undecodable += 1;
                debug!(page, error = %e, "skipping undecodable page");
            }
        }
    }

    if !selected.is_empty() && undecodable == selected.len() {
        return Err(PdfError::NoText);
    }
    Ok(flatten_newlines(&text))
}
