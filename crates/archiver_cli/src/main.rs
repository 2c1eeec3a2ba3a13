//! `archiver`: keeps a local Markdown mirror of a site's numbered research articles.
//!
//! Logs go to the terminal and to `./archiver.log`; run summaries are printed to stdout.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use archiver_core::{ArticleId, Diagnosis, LedgerSummary};
use archiver_engine::{
    diagnose_archive, Archive, ArchiverSettings, HttpRenderer, LoadOrigin, Pipeline, PipelineError,
    StartupReport, StoreError,
};
use archiver_logging::{archiver_error, archiver_info, LogDestination};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::config::{load_settings, RunOverrides};

const LOG_FILE: &str = "./archiver.log";

#[derive(Parser, Debug)]
#[command(name = "archiver", version, about = "Mirror numbered research articles as Markdown")]
struct Cli {
    /// RON settings file [default: ./archiver.ron when present]
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log debug detail
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Log warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe for new articles and archive them, or archive an explicit id range
    Run(RunArgs),
    /// Load and repair the ledger against the archive, then publish statistics
    Check,
    /// Report mismatches between the ledger and the archive without changing anything
    Diagnose,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Articles fetched in this run
    #[arg(long)]
    batch_size: Option<usize>,

    /// Consecutive misses that end a range scan
    #[arg(long)]
    max_miss: Option<u32>,

    /// Seconds to pause after each archived article
    #[arg(long, value_name = "SECONDS")]
    sleep: Option<f64>,

    /// Keep the raw HTML of every fetched page
    #[arg(long)]
    save_html: bool,

    /// First id of a range scan; alone it covers one batch
    #[arg(long)]
    start_id: Option<u64>,

    /// Last id of a range scan
    #[arg(long, requires = "start_id")]
    end_id: Option<u64>,
}

/// How a command ended, as seen by the calling shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Success,
    /// The ledger could not be parsed and was replaced.
    LedgerCorrupt,
    RendererUnavailable,
}

impl Status {
    fn exit_code(self) -> ExitCode {
        match self {
            Status::Success => ExitCode::SUCCESS,
            Status::LedgerCorrupt => ExitCode::from(2),
            Status::RendererUnavailable => ExitCode::from(3),
        }
    }
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else if self.quiet {
            LevelFilter::Warn
        } else {
            LevelFilter::Info
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    archiver_logging::initialize(LogDestination::Both, cli.log_level(), Path::new(LOG_FILE));

    match execute(cli) {
        Ok(status) => status.exit_code(),
        Err(err) => {
            archiver_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> anyhow::Result<Status> {
    let settings = load_settings(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => run(settings, args),
        Command::Check => check(settings),
        Command::Diagnose => diagnose(&settings),
    }
}

fn run(mut settings: ArchiverSettings, args: RunArgs) -> anyhow::Result<Status> {
    let overrides = RunOverrides {
        batch_size: args.batch_size,
        max_miss: args.max_miss,
        sleep_secs: args.sleep,
        save_html: args.save_html,
    };
    overrides.apply(&mut settings.run)?;

    let renderer = match HttpRenderer::new(settings.fetch.clone()) {
        Ok(renderer) => renderer,
        Err(err) => {
            archiver_error!("page renderer could not start: {}", err);
            eprintln!("error: page renderer could not start: {err}");
            return Ok(Status::RendererUnavailable);
        }
    };

    let run_settings = settings.run.clone();
    let (mut pipeline, startup) =
        Pipeline::open(settings, renderer).context("failed to open the archive")?;
    print_startup(&startup);
    if startup.recovered_from_corruption() {
        return Ok(Status::LedgerCorrupt);
    }

    let report = match args.start_id {
        Some(start) => {
            let end = range_end(start, args.end_id, run_settings.batch_size);
            archiver_info!("range scan {}..={}", start, end);
            pipeline.run_manual(start, end, run_settings.max_miss)?
        }
        None => {
            archiver_info!("incremental run, batch {}", run_settings.batch_size);
            pipeline.run_incremental(run_settings.batch_size)?
        }
    };
    println!("{report}");
    Ok(Status::Success)
}

/// Last id of a range scan: `end` when given, otherwise one batch starting at `start`.
fn range_end(start: ArticleId, end: Option<ArticleId>, batch_size: usize) -> ArticleId {
    end.unwrap_or_else(|| {
        let span = u64::try_from(batch_size.max(1)).unwrap_or(u64::MAX);
        start.saturating_add(span - 1)
    })
}

fn check(settings: ArchiverSettings) -> anyhow::Result<Status> {
    let (archive, startup) = Archive::open(settings).context("failed to open the archive")?;
    print_startup(&startup);
    println!("ledger:\n{}", archive.ledger().summary());

    let (path, stats) = archive.write_stats()?;
    println!("articles: {}", stats.total_articles);
    for (label, count) in &stats.categories {
        println!("   {label}: {count}");
    }
    println!("statistics written to {}", path.display());

    if startup.recovered_from_corruption() {
        Ok(Status::LedgerCorrupt)
    } else {
        Ok(Status::Success)
    }
}

fn diagnose(settings: &ArchiverSettings) -> anyhow::Result<Status> {
    match diagnose_archive(settings) {
        Ok((diagnosis, summary)) => {
            print_diagnosis(settings, &diagnosis, &summary);
            Ok(Status::Success)
        }
        Err(PipelineError::Store(StoreError::Corrupt { path, reason })) => {
            println!("ledger {} is corrupt: {reason}", path.display());
            println!("run `archiver check` to move it aside and rebuild it from the archive");
            Ok(Status::LedgerCorrupt)
        }
        Err(err) => Err(err.into()),
    }
}

fn print_startup(startup: &StartupReport) {
    if let LoadOrigin::Recovered { backup } = &startup.origin {
        println!(
            "ledger was corrupt; moved to {} and rebuilt from the archive",
            backup.display()
        );
    }
    if !startup.repairs.is_empty() {
        println!("ledger repairs:");
        for repair in &startup.repairs {
            println!("   {repair}");
        }
    }
}

fn print_diagnosis(settings: &ArchiverSettings, diagnosis: &Diagnosis, summary: &LedgerSummary) {
    println!("ledger:\n{summary}");
    println!("files:");
    for (category, count) in &diagnosis.files_per_category {
        println!("   {}: {count}", settings.categories.label(*category));
    }
    print_ids("saved but not downloaded", &diagnosis.saved_not_downloaded);
    print_ids("archived but not in the ledger", &diagnosis.untracked_files);
    print_ids("in the ledger without a file", &diagnosis.stale_entries);
    if !diagnosis.unidentified_files.is_empty() {
        println!("files without an identifier:");
        for name in &diagnosis.unidentified_files {
            println!("   {name}");
        }
    }
    for (category, id, count) in &diagnosis.duplicates {
        println!(
            "duplicate: id {id} has {count} files in {}",
            settings.categories.label(*category)
        );
    }
    println!("pending: {}", diagnosis.pending);
    println!("estimated gaps below the newest saved id: {}", diagnosis.gap_estimate);
    if diagnosis.is_healthy() {
        println!("archive and ledger agree");
    }
}

fn print_ids(heading: &str, ids: &[ArticleId]) {
    if ids.is_empty() {
        return;
    }
    const SHOWN: usize = 20;
    let listed: Vec<String> = ids.iter().take(SHOWN).map(ArticleId::to_string).collect();
    let more = if ids.len() > SHOWN {
        format!(" (+{} more)", ids.len() - SHOWN)
    } else {
        String::new()
    };
    println!("{heading}: {}{more}", listed.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_id_alone_spans_one_batch() {
        assert_eq!(range_end(100, None, 50), 149);
        assert_eq!(range_end(100, None, 1), 100);
        assert_eq!(range_end(u64::MAX - 1, None, 50), u64::MAX);
    }

    #[test]
    fn explicit_end_id_wins() {
        assert_eq!(range_end(100, Some(120), 50), 120);
    }

    #[test]
    fn start_id_parses_without_end_id() {
        let cli = Cli::try_parse_from(["archiver", "run", "--start-id", "10"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected the run command");
        };
        assert_eq!(args.start_id, Some(10));
        assert_eq!(args.end_id, None);
        assert!(Cli::try_parse_from(["archiver", "run", "--end-id", "10"]).is_err());
    }
}
