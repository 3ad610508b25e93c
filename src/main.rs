use std::path::{Path, PathBuf};
use std::process::ExitCode;

use docgrab::cli::{Cli, Commands};
use docgrab::config::{ConfigError, CrawlConfig};
use docgrab::crawler::CrawlError;
use docgrab::export::{self, ExportError, ExportScope};
use docgrab::logging::{LoggingError, init_logging, init_terminal_logging};
use docgrab::metrics::format_failed;
use docgrab::orchestration::{build_crawler, setup_shutdown_handler};
use docgrab::page_writer::PageWriter;
use docgrab::state::{CrawlStore, PageRecord, StoreError};
use docgrab::url_utils::{NormalizeOptions, normalize};
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum MainError {
    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("state error: {0}")]
    State(#[from] StoreError),

    #[error("export error: {0}")]
    Export(#[from] ExportError),

    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no crawl state found in {0}")]
    NoCrawl(PathBuf),
}

impl MainError {
    fn exit_code(&self) -> ExitCode {
        match self {
            MainError::Crawl(CrawlError::Store(_)) | MainError::State(_) => ExitCode::from(1),
            _ => ExitCode::from(3),
        }
    }
}

fn open_existing_store(output_dir: &Path) -> Result<CrawlStore, MainError> {
    if !output_dir.join(CrawlStore::FILE_NAME).exists() {
        return Err(MainError::NoCrawl(output_dir.to_path_buf()));
    }
    Ok(CrawlStore::open(output_dir)?)
}

fn print_record(record: Option<PageRecord>) -> Result<ExitCode, MainError> {
    match record {
        Some(record) => {
            let json = serde_json::to_string_pretty(&record).map_err(ExportError::from)?;
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("No matching record");
            Ok(ExitCode::from(1))
        }
    }
}

async fn run_crawl_command(config: CrawlConfig, verbose: bool) -> Result<ExitCode, MainError> {
    config.validate()?;
    std::fs::create_dir_all(&config.output_dir)?;
    let _guards = init_logging(config.log_dir(), verbose)?;

    info!(
        "Crawling {} into {} ({} concurrent requests, {:?} delay, depth {}, {} pages max, {} backend)",
        config.seed_url,
        config.output_dir.display(),
        config.concurrent_requests,
        config.request_delay,
        config.max_depth,
        config.max_pages,
        config.backend
    );

    let crawler = build_crawler(config)?;
    setup_shutdown_handler(crawler.cancel_handle());

    let report = crawler.run().await?;
    println!("{}", report);

    Ok(if report.interrupted {
        ExitCode::from(130)
    } else {
        ExitCode::SUCCESS
    })
}

fn run_report_command(output_dir: &Path, failed: bool) -> Result<ExitCode, MainError> {
    let store = open_existing_store(output_dir)?;
    let counts = store.status_counts()?;
    println!("{} records: {}", counts.total(), counts);

    if failed {
        let records = store.failed_records()?;
        if !records.is_empty() {
            println!("{}", format_failed(&records));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_export_command(
    output_dir: &Path,
    output: Option<PathBuf>,
    success_only: bool,
) -> Result<ExitCode, MainError> {
    let store = open_existing_store(output_dir)?;
    let path = output.unwrap_or_else(|| output_dir.join("export.jsonl"));
    let pages = PageWriter::new(output_dir.join(PageWriter::DIR_NAME));
    let scope = if success_only {
        ExportScope::SuccessOnly
    } else {
        ExportScope::AllRecords
    };

    let pages = pages.root().exists().then_some(&pages);
    let count = export::export_store(&store, pages, output_dir, scope, &path)?;
    println!("Exported {} records to {}", count, path.display());
    Ok(ExitCode::SUCCESS)
}

fn run_inspect_command(
    output_dir: &Path,
    url: Option<String>,
    canonical: Option<String>,
    hash: Option<String>,
) -> Result<ExitCode, MainError> {
    let store = open_existing_store(output_dir)?;
    // Accept un-normalized input; the store is keyed by normalized URLs.
    let key = |raw: &str| {
        normalize(raw, None, NormalizeOptions::default())
            .map(|u| u.as_str().to_string())
            .unwrap_or_else(|_| raw.to_string())
    };

    let record = if let Some(url) = url {
        store.lookup(&key(&url))?
    } else if let Some(canonical) = canonical {
        store.find_by_canonical(&key(&canonical))?
    } else if let Some(hash) = hash {
        store.find_by_content_hash(hash.trim())?
    } else {
        None
    };
    print_record(record)
}

async fn run(cli: Cli) -> Result<ExitCode, MainError> {
    let verbose = cli.verbose;
    match cli.command {
        Commands::Crawl(args) => run_crawl_command(args.into_config(), verbose).await,
        Commands::Report { output_dir, failed } => {
            init_terminal_logging(verbose)?;
            run_report_command(&output_dir, failed)
        }
        Commands::Export {
            output_dir,
            output,
            success_only,
        } => {
            init_terminal_logging(verbose)?;
            run_export_command(&output_dir, output, success_only)
        }
        Commands::Inspect {
            output_dir,
            url,
            canonical,
            hash,
        } => {
            init_terminal_logging(verbose)?;
            run_inspect_command(&output_dir, url, canonical, hash)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}
