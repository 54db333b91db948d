mod db;
mod fetcher;
mod model;
mod nlp;
mod pdf;
mod pool;
mod queue;
mod settings;
mod sink;
mod source;
#[cfg(test)]
mod testing;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::fetcher::{Fetch, HttpFetcher, Naming};
use crate::model::DownloadStatus;
use crate::nlp::{Annotate, CoreNlpClient};
use crate::pdf::LopdfInspector;
use crate::pool::{PoolConfig, ScrapePool, TempNaming, DEFAULT_IDLE_WAIT};
use crate::queue::WorkQueue;
use crate::settings::Settings;
use crate::sink::ResultSink;
use crate::worker::Scraper;

#[derive(Parser)]
#[command(name = "pdfscrape", about = "Concurrent PDF download and text extraction")]
struct Cli {
    /// Settings file (default: ./pdfscrape.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and scrape every PDF in a URL list
    Scrape {
        /// Delimited file with pdf_id and pdf_url columns
        #[arg(required_unless_present = "table", conflicts_with = "table")]
        input: Option<PathBuf>,
        /// Read pdf_id and pdf_url from this SQLite table instead
        #[arg(long)]
        table: Option<String>,
        /// Max items to process (default: all)
        #[arg(short = 'n', long)]
        limit: Option<u64>,
        /// Number of workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Max items per worker
        #[arg(long)]
        per_worker: Option<u64>,
        /// Page cap, 0 for no cap
        #[arg(long)]
        max_pages: Option<u32>,
        #[arg(long)]
        base_pages: Option<u32>,
        /// Pages sampled after the leading ones, 0 to disable sampling
        #[arg(long)]
        random_sample: Option<u32>,
        /// CoreNLP server for entity enrichment
        #[arg(long)]
        corenlp_url: Option<String>,
        /// Output file (default: timestamped name in the output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Load the output into this SQLite table when done
        #[arg(long)]
        load_table: Option<String>,
    },
    /// Load a result file into a SQLite table, replacing it
    Load { file: PathBuf, table: String },
    /// Merge result files into one
    Combine {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Download a single PDF under its URL file name
    Download {
        url: String,
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Delete leftover downloads from the temp directory
    Clean,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(cli.command, settings));
    // Extractions that overran their budget may still hold blocking threads.
    runtime.shutdown_timeout(Duration::from_secs(1));

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(command: Commands, mut settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Scrape {
            input,
            table,
            limit,
            workers,
            per_worker,
            max_pages,
            base_pages,
            random_sample,
            corenlp_url,
            output,
            load_table,
        } => {
            settings.limit = limit.or(settings.limit);
            settings.workers = workers.unwrap_or(settings.workers);
            settings.per_worker_limit = per_worker.or(settings.per_worker_limit);
            settings.max_pages = max_pages.unwrap_or(settings.max_pages);
            settings.base_pages = base_pages.unwrap_or(settings.base_pages);
            settings.random_sample = random_sample.unwrap_or(settings.random_sample);
            settings.corenlp_url = corenlp_url.or(settings.corenlp_url);

            let output =
                output.unwrap_or_else(|| sink::output_path(&settings.output_dir, Local::now()));
            scrape(&settings, input.as_deref(), table.as_deref(), &output).await?;

            if let Some(table) = load_table {
                let conn = db::connect(&settings.db_path)?;
                let n = db::load_delimited(&conn, &output, &table, settings.output_delimiter()?)?;
                println!("Loaded {} rows into {}", n, table);
            }
            Ok(())
        }
        Commands::Load { file, table } => {
            let conn = db::connect(&settings.db_path)?;
            let n = db::load_delimited(&conn, &file, &table, settings.output_delimiter()?)?;
            println!("Loaded {} rows into {} ({:?})", n, table, settings.db_path);
            Ok(())
        }
        Commands::Combine { output, inputs } => {
            let n = sink::combine(&output, &inputs, settings.output_delimiter()?)?;
            println!("Combined {} files, {} rows -> {:?}", inputs.len(), n, output);
            Ok(())
        }
        Commands::Download { url, dir } => {
            let fetcher = HttpFetcher::new(settings.request_timeout(), &settings.user_agent)?;
            let download = fetcher.fetch(&url, &dir, &Naming::FromUrl).await;
            info!(requests = fetcher.requests_sent(), status = %download.status, "download");
            match (download.status, download.path) {
                (DownloadStatus::Success, Some(path)) => {
                    println!("Saved {:?}", path);
                    Ok(())
                }
                (status, _) => bail!("Download of {} failed: {}", url, status),
            }
        }
        Commands::Clean => {
            let n = worker::clean_temp_dir(&settings.temp_dir)?;
            println!("Removed {} files from {:?}", n, settings.temp_dir);
            Ok(())
        }
    }
}

async fn scrape(
    settings: &Settings,
    input: Option<&Path>,
    table: Option<&str>,
    output: &Path,
) -> anyhow::Result<()> {
    let read_limit = settings.limit.map(|n| n as usize);
    let items = match (input, table) {
        (Some(path), _) => source::read_work_items(path, settings.source_delimiter()?, read_limit)?,
        (None, Some(table)) => {
            let conn = db::connect(&settings.db_path)?;
            db::fetch_work_items(&conn, table, read_limit)?
        }
        (None, None) => bail!("Provide an input file or --table"),
    };
    if items.is_empty() {
        println!("No work items found.");
        return Ok(());
    }

    let annotator = match &settings.corenlp_url {
        Some(url) => {
            let client: Arc<dyn Annotate> =
                Arc::new(CoreNlpClient::new(url, settings.corenlp_timeout())?);
            Some(client)
        }
        None => None,
    };
    let scraper = Arc::new(Scraper::new(
        Arc::new(HttpFetcher::new(settings.request_timeout(), &settings.user_agent)?),
        Arc::new(LopdfInspector::new(settings.extract_timeout())),
        annotator,
        settings.temp_dir.clone(),
        settings.sampling(),
    ));
    let pool = ScrapePool::new(
        scraper,
        PoolConfig {
            workers: settings.workers,
            per_worker_limit: settings.per_worker_limit,
            total_limit: settings.limit,
            temp_naming: TempNaming::Shared(settings.temp_name.clone()),
            idle_wait: DEFAULT_IDLE_WAIT,
        },
    );

    let mut sink = ResultSink::create(output, settings.output_delimiter()?)?;
    let expected = items.len() as u64;
    println!(
        "Scraping {} items with {} workers -> {:?}",
        expected, settings.workers, output
    );
    info!(
        max_pages = settings.max_pages,
        base_pages = settings.base_pages,
        random_sample = settings.random_sample,
        "sampling"
    );

    let queue = Arc::new(WorkQueue::new());
    let producer = source::spawn_producer(Arc::clone(&queue), items);
    let stats = pool.run(queue, &mut sink, Some(expected)).await?;
    let produced = producer.await.context("Producer task failed")?;

    println!(
        "Done: {} rows ({} downloaded, {} extracted, {} failed, {} not pdf, {} errors, {} skipped).",
        stats.rows,
        stats.downloaded,
        stats.extracted,
        stats.failed,
        stats.not_pdf,
        stats.errors,
        stats.discarded + produced.rejected as u64
    );
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
