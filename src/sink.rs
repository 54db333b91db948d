use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use csv::{ReaderBuilder, StringRecord, Writer, WriterBuilder};

use crate::model::{ScrapeResult, HEADER};

/// Append-only delimited writer for result rows. The header is written once
/// on creation and every row is flushed as soon as it is written.
pub struct ResultSink<W: Write> {
    writer: Writer<W>,
    rows: u64,
}

impl ResultSink<File> {
    pub fn create(path: &Path, delimiter: u8) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        Self::from_writer(file, delimiter)
    }
}

impl<W: Write> ResultSink<W> {
    pub fn from_writer(inner: W, delimiter: u8) -> Result<Self> {
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(ResultSink { writer, rows: 0 })
    }

    pub fn write(&mut self, row: &ScrapeResult) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("Failed to write row {}", row.item_id))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Rows written so far, excluding the header.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    #[cfg(test)]
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush result sink: {}", e.error()))
    }
}

/// `<dir>/pdf_scrape_<month>_<day>_<hour>_<minute>.csv`
pub fn output_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    dir.join(now.format("pdf_scrape_%-m_%-d_%-H_%-M.csv").to_string())
}

/// Concatenate result files into `output`, keeping the first header only.
/// Returns the number of data rows written.
pub fn combine(output: &Path, inputs: &[PathBuf], delimiter: u8) -> Result<usize> {
    if inputs.is_empty() {
        bail!("Nothing to combine");
    }

    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_path(output)
        .with_context(|| format!("Failed to create {:?}", output))?;

    let mut header: Option<StringRecord> = None;
    let mut rows = 0usize;
    for input in inputs {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .from_path(input)
            .with_context(|| format!("Failed to open {:?}", input))?;
        let this_header = reader.headers()?.clone();

        match &header {
            None => {
                writer.write_record(&this_header)?;
                header = Some(this_header);
            }
            Some(first) if *first != this_header => {
                bail!("{:?} has a different header than {:?}", input, inputs[0]);
            }
            Some(_) => {}
        }

        for record in reader.records() {
            let record = record.with_context(|| format!("Failed to read {:?}", input))?;
            writer.write_record(&record)?;
            rows += 1;
        }
    }
    writer.flush()?;
    Ok(rows)
}
