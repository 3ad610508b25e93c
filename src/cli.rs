use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::backend::BackendKind;
use crate::config::{Config, CrawlConfig};
use crate::url_utils::normalize_url_for_cli;

/// Mirror a documentation site for offline use.
/// Exit codes: 0=success, 1=crawl failed, 2=invalid arguments, 3=I/O or config error, 130=interrupted
#[derive(Parser, Debug)]
#[command(name = "docgrab")]
#[command(about = "Resumable, deduplicating documentation site mirror")]
#[command(version)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Log per-URL decisions")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl from a seed URL. Re-running on the same output directory resumes.
    Crawl(CrawlArgs),

    /// Print record counts per status for a previous crawl.
    Report {
        #[arg(
            short,
            long,
            default_value = Config::DEFAULT_OUTPUT_DIR,
            help = "Directory containing crawl state"
        )]
        output_dir: PathBuf,

        #[arg(long, help = "Also list every failed URL with its error")]
        failed: bool,
    },

    /// Export every stored page record as JSON lines.
    Export {
        #[arg(
            short,
            long,
            default_value = Config::DEFAULT_OUTPUT_DIR,
            help = "Directory containing crawl state"
        )]
        output_dir: PathBuf,

        #[arg(long, help = "Output file (default: <output-dir>/export.jsonl)")]
        output: Option<PathBuf>,

        #[arg(long, help = "Only export successfully saved pages")]
        success_only: bool,
    },

    /// Look up a single record by URL, canonical URL or content hash.
    #[command(group(ArgGroup::new("key").required(true).args(["url", "canonical", "hash"])))]
    Inspect {
        #[arg(
            short,
            long,
            default_value = Config::DEFAULT_OUTPUT_DIR,
            help = "Directory containing crawl state"
        )]
        output_dir: PathBuf,

        #[arg(long, help = "Normalized page URL")]
        url: Option<String>,

        #[arg(long, help = "Canonical URL declared by a saved page")]
        canonical: Option<String>,

        #[arg(long, help = "SHA-256 content hash of a saved page")]
        hash: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    #[arg(short, long, help = "The URL to start crawling from; also bounds the crawl scope")]
    pub seed_url: String,

    #[arg(
        short,
        long,
        default_value = Config::DEFAULT_OUTPUT_DIR,
        help = "Directory for crawl state, saved pages and logs"
    )]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = Config::DEFAULT_MAX_DEPTH, help = "Maximum link depth from the seed")]
    pub max_depth: u32,

    #[arg(long, default_value_t = Config::DEFAULT_MAX_PAGES, help = "Stop after this many saved pages")]
    pub max_pages: usize,

    #[arg(
        long,
        default_value_t = Config::DEFAULT_REQUEST_DELAY_MS,
        help = "Minimum delay between request starts, in milliseconds"
    )]
    pub delay_ms: u64,

    #[arg(
        short,
        long,
        default_value_t = Config::DEFAULT_CONCURRENT_REQUESTS,
        help = "Maximum requests in flight"
    )]
    pub concurrent_requests: usize,

    #[arg(long, help = "Strip query strings when normalizing URLs")]
    pub ignore_get_params: bool,

    #[arg(long, help = "Do not skip pages whose canonical URL points elsewhere")]
    pub ignore_canonical: bool,

    #[arg(long, help = "Do not skip pages with duplicate content")]
    pub ignore_duplicates: bool,

    #[arg(long, default_value_t = Config::DEFAULT_RETRY_LIMIT, help = "Retries for transient failures")]
    pub retry_limit: u32,

    #[arg(
        short,
        long,
        default_value = Config::DEFAULT_USER_AGENT,
        help = "User agent string for requests and robots.txt matching"
    )]
    pub user_agent: String,

    #[arg(
        short,
        long,
        default_value_t = Config::DEFAULT_TIMEOUT_SECS,
        help = "Request timeout in seconds"
    )]
    pub timeout: u64,

    #[arg(long, value_enum, default_value_t = BackendKind::Simple, help = "Fetch and parse backend")]
    pub backend: BackendKind,

    #[arg(long, help = "Record pages in the store without writing HTML files")]
    pub no_save_pages: bool,
}

impl CrawlArgs {
    pub fn into_config(self) -> CrawlConfig {
        CrawlConfig {
            seed_url: normalize_url_for_cli(&self.seed_url),
            output_dir: self.output_dir,
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            request_delay: Duration::from_millis(self.delay_ms),
            concurrent_requests: self.concurrent_requests,
            ignore_get_params: self.ignore_get_params,
            ignore_canonical: self.ignore_canonical,
            ignore_duplicates: self.ignore_duplicates,
            retry_limit: self.retry_limit,
            user_agent: self.user_agent,
            timeout: Duration::from_secs(self.timeout),
            backend: self.backend,
            save_pages: !self.no_save_pages,
        }
    }
}

impl Cli {
    /// Parse CLI arguments so the rest of the program can rely on structured options.
    /// On error, clap prints help and exits with code 2 (usage error).
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawl_args(cli: Cli) -> CrawlArgs {
        match cli.command {
            Commands::Crawl(args) => args,
            other => panic!("Expected Crawl command, got {:?}", other),
        }
    }

    #[test]
    fn test_crawl_command_minimal() {
        let cli = Cli::try_parse_from(["docgrab", "crawl", "--seed-url", "https://ex.com/docs"]).unwrap();
        assert!(!cli.verbose);

        let config = crawl_args(cli).into_config();
        assert_eq!(config, CrawlConfig::new("https://ex.com/docs", Config::DEFAULT_OUTPUT_DIR));
    }

    #[test]
    fn test_crawl_command_with_options() {
        let cli = Cli::try_parse_from([
            "docgrab",
            "-v",
            "crawl",
            "-s",
            "ex.com/docs",
            "--output-dir",
            "/tmp/mirror",
            "--max-depth",
            "2",
            "--max-pages",
            "50",
            "--delay-ms",
            "250",
            "-c",
            "8",
            "--ignore-get-params",
            "--ignore-canonical",
            "--ignore-duplicates",
            "--retry-limit",
            "0",
            "--timeout",
            "5",
            "--backend",
            "streaming",
            "--no-save-pages",
        ])
        .unwrap();
        assert!(cli.verbose);

        let config = crawl_args(cli).into_config();
        assert_eq!(config.seed_url, "https://ex.com/docs");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/mirror"));
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.max_pages, 50);
        assert_eq!(config.request_delay, Duration::from_millis(250));
        assert_eq!(config.concurrent_requests, 8);
        assert!(config.ignore_get_params);
        assert!(config.ignore_canonical);
        assert!(config.ignore_duplicates);
        assert_eq!(config.retry_limit, 0);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.backend, BackendKind::Streaming);
        assert!(!config.save_pages);
    }

    #[test]
    fn test_report_command() {
        let cli = Cli::try_parse_from(["docgrab", "report", "-o", "./mirror", "--failed"]).unwrap();
        match cli.command {
            Commands::Report { output_dir, failed } => {
                assert_eq!(output_dir, PathBuf::from("./mirror"));
                assert!(failed);
            }
            _ => panic!("Expected Report command"),
        }
    }

    #[test]
    fn test_export_command() {
        let cli = Cli::try_parse_from(["docgrab", "export", "--output", "out.jsonl", "--success-only"])
            .unwrap();
        match cli.command {
            Commands::Export {
                output_dir,
                output,
                success_only,
            } => {
                assert_eq!(output_dir, PathBuf::from(Config::DEFAULT_OUTPUT_DIR));
                assert_eq!(output, Some(PathBuf::from("out.jsonl")));
                assert!(success_only);
            }
            _ => panic!("Expected Export command"),
        }
    }

    #[test]
    fn test_inspect_requires_exactly_one_key() {
        let err = Cli::try_parse_from(["docgrab", "inspect"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let err = Cli::try_parse_from(["docgrab", "inspect", "--url", "a", "--hash", "b"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

        let cli = Cli::try_parse_from(["docgrab", "inspect", "--hash", "abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Inspect { hash: Some(ref h), url: None, canonical: None, .. } if h == "abc"
        ));
    }

    #[test]
    fn test_missing_required_arg() {
        let err = Cli::try_parse_from(["docgrab", "crawl"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_invalid_backend() {
        let err = Cli::try_parse_from(["docgrab", "crawl", "-s", "https://ex.com", "--backend", "chrome"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_help_does_not_panic() {
        let err = Cli::try_parse_from(["docgrab", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
