use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use tsrebase::config::{default_dest, SitesConfig};
use tsrebase::rebase::batch::{DEFAULT_TIMESTAMP_COLUMN, DEFAULT_WORKERS};
use tsrebase::rebase::{plan_batch, BatchOptions, BatchReport, OffsetPolicy};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Move CSV timeseries forward so each site's data starts today"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebase one site directory.
    Rebase {
        source: PathBuf,
        /// Defaults to `<SOURCE>_rebased`.
        dest: Option<PathBuf>,
        #[command(flatten)]
        batch: BatchArgs,
        /// Never shift data backwards when it already starts today or later.
        #[arg(long)]
        floor_at_zero: bool,
        /// Write the batch report as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Rebase every site listed in a YAML file.
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Use this date instead of today (UTC).
        #[arg(long)]
        today: Option<NaiveDate>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Report the date range and the offset a rebase would apply; writes nothing.
    Scan {
        source: PathBuf,
        #[command(flatten)]
        batch: BatchArgs,
    },
}

#[derive(Args)]
struct BatchArgs {
    #[arg(long, default_value = DEFAULT_TIMESTAMP_COLUMN)]
    column: String,
    /// Worker threads; 0 uses one per CPU.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
    /// Use this date instead of today (UTC).
    #[arg(long)]
    today: Option<NaiveDate>,
}

impl BatchArgs {
    fn options(&self, offset_policy: OffsetPolicy) -> BatchOptions {
        BatchOptions {
            timestamp_column: self.column.clone(),
            workers: self.workers,
            today: self.today,
            offset_policy,
        }
    }
}

#[derive(Serialize)]
struct SiteResult {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<BatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Rebase {
            source,
            dest,
            batch,
            floor_at_zero,
            report,
        } => {
            let policy = if floor_at_zero {
                OffsetPolicy::FloorAtZero
            } else {
                OffsetPolicy::Exact
            };
            let dest = dest.unwrap_or_else(|| default_dest(&source));
            let start = Instant::now();
            let result = plan_batch(&source, &batch.options(policy))
                .and_then(|plan| plan.execute(&dest))
                .with_context(|| format!("rebasing {}", source.display()))?;
            log_report(&source.display().to_string(), &result);
            info!(elapsed = ?start.elapsed(), "done");
            if let Some(path) = report {
                write_json(&path, &result)?;
            }
            if !result.is_clean() {
                bail!("{} of {} files failed", result.failed, result.total_files);
            }
        }
        Command::Run {
            config,
            today,
            report,
        } => {
            let sites = SitesConfig::load(&config)?;
            let mut options = sites.batch_options();
            options.today = today;
            let results = run_sites(&sites, &options);
            if let Some(path) = report {
                write_json(&path, &results)?;
            }
            let aborted = results.iter().filter(|r| r.error.is_some()).count();
            let with_failures = results
                .iter()
                .filter(|r| r.report.as_ref().is_some_and(|rep| !rep.is_clean()))
                .count();
            if aborted > 0 || with_failures > 0 {
                bail!(
                    "{} site(s) aborted, {} site(s) had failed files",
                    aborted,
                    with_failures
                );
            }
        }
        Command::Scan { source, batch } => {
            let plan = plan_batch(&source, &batch.options(OffsetPolicy::Exact))
                .with_context(|| format!("scanning {}", source.display()))?;
            println!("{}", serde_json::to_string_pretty(&plan.summary())?);
        }
    }
    Ok(())
}

/// Each site gets its own scan and offset; one aborting does not stop the rest.
fn run_sites(config: &SitesConfig, options: &BatchOptions) -> Vec<SiteResult> {
    let mut results = Vec::with_capacity(config.sites.len());
    for site in &config.sites {
        info!(site = %site.name, source = %site.source.display(), "processing site");
        let dest = site.dest_dir();
        match plan_batch(&site.source, options).and_then(|plan| plan.execute(&dest)) {
            Ok(report) => {
                log_report(&site.name, &report);
                results.push(SiteResult {
                    name: site.name.clone(),
                    report: Some(report),
                    error: None,
                });
            }
            Err(e) => {
                error!(site = %site.name, "site aborted: {}", e);
                results.push(SiteResult {
                    name: site.name.clone(),
                    report: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    results
}

fn log_report(site: &str, report: &BatchReport) {
    info!(
        site,
        input = %report.source_dir.display(),
        output = %report.dest_dir.display(),
        original = %format!("{} to {}", report.original_range.min, report.original_range.max),
        offset = %report.offset,
        new_min = ?report.new_min_date,
        new_max = ?report.new_max_date,
        "{}/{} files rebased, {} failed, {} skipped",
        report.succeeded,
        report.total_files,
        report.failed,
        report.skipped
    );
    for (file, reason) in report.failures() {
        warn!(site, %file, "{}", reason);
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    info!("wrote report to {}", path.display());
    Ok(())
}
