mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::{Parser, ValueEnum};
use tracing::{debug, error, info};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use cfwall_aws::S3BucketStore;
use cfwall_core::{Options, Reconciler};
use cfwall_policy::ManagedPolicy;
use config::{FileConfig, Overrides, Settings};

#[derive(Parser, Debug)]
#[command(author, version, about="cfwall: keep S3 bucket policies limited to Cloudflare's edge IP ranges")]
struct Cli {
    /// Config file (YAML)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Comma-delimited bucket names
    #[arg(long, env = "TARGET_BUCKETS")]
    target_buckets: Option<String>,

    /// Region of the initial S3 client
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Account expected to own every bucket (defaults to the caller's account)
    #[arg(long, env = "EXPECTED_BUCKET_OWNER")]
    expected_owner: Option<String>,

    /// Buckets inspected at once
    #[arg(long, env = "CFWALL_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Timeout for every network call, in seconds
    #[arg(long, env = "CFWALL_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Compute policy updates without submitting them
    #[arg(long, env = "CFWALL_DRY_RUN", value_parser = FalseyValueParser::new())]
    dry_run: bool,

    /// Extra logging for debugging
    #[arg(short, long, env = "LOG_VERBOSE", value_parser = FalseyValueParser::new())]
    verbose: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "CFWALL_LOG_FORMAT")]
    log_format: LogFormat,

    #[arg(long)]
    ips_v4_url: Option<String>,

    #[arg(long)]
    ips_v6_url: Option<String>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum LogFormat { Text, Json }

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            target_buckets: self.target_buckets.clone(),
            region: self.region.clone(),
            expected_owner: self.expected_owner.clone(),
            concurrency: self.concurrency,
            timeout_secs: self.timeout_secs,
            dry_run: self.dry_run,
            ips_v4_url: self.ips_v4_url.clone(),
            ips_v6_url: self.ips_v6_url.clone(),
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let directives = if verbose {
        "info,cfwall=debug,cfwall_core=debug,cfwall_policy=debug,cfwall_ranges=debug,cfwall_aws=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().with_span_events(FmtSpan::CLOSE).init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(settings: Settings) -> Result<ExitCode> {
    info!(
        buckets = settings.buckets.len(),
        region = %settings.region,
        dry_run = settings.dry_run,
        "starting policy sync"
    );
    debug!(buckets = ?settings.buckets, "target buckets");

    let http = reqwest::Client::builder()
        .user_agent(concat!("cfwall/", env!("CARGO_PKG_VERSION")))
        .timeout(settings.timeout)
        .build()
        .context("failed to build HTTP client")?;
    let ranges = cfwall_ranges::fetch_ranges(&http, &settings.endpoints).await?;
    info!(count = ranges.len(), "got IP ranges from Cloudflare");

    let sdk_config = cfwall_aws::load_sdk_config(&settings.region, settings.timeout).await;
    let owner = match settings.expected_owner {
        Some(owner) => owner,
        None => cfwall_aws::caller_account(&sdk_config).await?,
    };
    debug!(account = %owner, "expected bucket owner");

    let store = S3BucketStore::new(sdk_config, settings.region.clone(), owner);
    let reconciler = Reconciler::new(
        store,
        Options { concurrency: settings.concurrency, dry_run: settings.dry_run },
    );
    let report = reconciler.run(&settings.buckets, &ManagedPolicy::new(ranges.into_vec())).await;
    print!("{report}");

    match report.into_result() {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            error!(%err, "policy sync failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let file = match &cli.file {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(cli.overrides(), file)?;
    run(settings).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_overrides() {
        let cli = Cli::try_parse_from([
            "cfwall",
            "--target-buckets", "a,b",
            "--region", "eu-central-1",
            "--concurrency", "3",
            "--dry-run",
            "--ips-v4-url", "http://localhost/v4",
        ])
        .unwrap();
        let o = cli.overrides();
        assert_eq!(o.target_buckets.as_deref(), Some("a,b"));
        assert_eq!(o.region.as_deref(), Some("eu-central-1"));
        assert_eq!(o.concurrency, Some(3));
        assert!(o.dry_run);
        assert_eq!(o.ips_v4_url.as_deref(), Some("http://localhost/v4"));
    }

    #[test]
    fn log_format_accepts_json() {
        let cli = Cli::try_parse_from(["cfwall", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn boolean_env_vars_accept_common_spellings() {
        std::env::set_var("LOG_VERBOSE", "1");
        std::env::set_var("CFWALL_DRY_RUN", "yes");
        let on = Cli::try_parse_from(["cfwall", "--target-buckets", "a"]).unwrap();
        std::env::set_var("LOG_VERBOSE", "0");
        std::env::set_var("CFWALL_DRY_RUN", "false");
        let off = Cli::try_parse_from(["cfwall", "--target-buckets", "a"]).unwrap();
        std::env::remove_var("LOG_VERBOSE");
        std::env::remove_var("CFWALL_DRY_RUN");

        assert!(on.verbose);
        assert!(on.dry_run);
        assert!(!off.verbose);
        assert!(!off.dry_run);
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
