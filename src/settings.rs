use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::model::SamplingSpec;

/// Run settings. Defaults, then `pdfscrape.toml` (or an explicit file), then
/// `PDFSCRAPE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workers: usize,
    pub max_pages: u32,
    pub base_pages: u32,
    pub random_sample: u32,
    pub per_worker_limit: Option<u64>,
    pub limit: Option<u64>,
    pub temp_dir: PathBuf,
    pub temp_name: String,
    pub output_dir: PathBuf,
    /// Delimiter of result files.
    pub delimiter: String,
    /// Delimiter of work-item input files.
    pub input_delimiter: String,
    pub extract_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub corenlp_url: Option<String>,
    pub corenlp_timeout_secs: u64,
    pub db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            workers: 4,
            max_pages: 10,
            base_pages: 5,
            random_sample: 5,
            per_worker_limit: None,
            limit: None,
            temp_dir: PathBuf::from("data/temp"),
            temp_name: "temp.pdf".into(),
            output_dir: PathBuf::from("data/scrapes"),
            delimiter: "`".into(),
            input_delimiter: ",".into(),
            extract_timeout_secs: 20,
            request_timeout_secs: 30,
            user_agent: concat!("pdfscrape/", env!("CARGO_PKG_VERSION")).into(),
            corenlp_url: None,
            corenlp_timeout_secs: 30,
            db_path: PathBuf::from("data/pdfscrape.sqlite"),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name("pdfscrape").required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("PDFSCRAPE").try_parsing(true))
            .build()
            .context("Failed to load settings")?
            .try_deserialize::<Settings>()
            .context("Invalid settings")?;
        Ok(settings)
    }

    pub fn sampling(&self) -> SamplingSpec {
        SamplingSpec {
            max_pages: self.max_pages,
            base_pages: self.base_pages,
            random_sample_size: self.random_sample,
        }
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn corenlp_timeout(&self) -> Duration {
        Duration::from_secs(self.corenlp_timeout_secs)
    }

    pub fn output_delimiter(&self) -> Result<u8> {
        delimiter_byte(&self.delimiter)
    }

    pub fn source_delimiter(&self) -> Result<u8> {
        delimiter_byte(&self.input_delimiter)
    }
}

/// A delimiter must be exactly one ASCII character.
pub fn delimiter_byte(value: &str) -> Result<u8> {
    match value.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => bail!("Delimiter must be a single ASCII character, got {:?}", value),
    }
}
