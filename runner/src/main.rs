mod collector;
mod config;
mod configuration;
mod implementation;
mod ledger;
mod report;
mod runners;
mod scheduler;
mod sweep;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use collector::{clear_parsed, CollectionError};
use config::{BenchConfig, ConfigErrors};
use runners::{
    dry_run::DryRunner, local::LocalRunner, lsf::LsfRunner, Runner, RunnerError, Runners,
};
use scheduler::Scheduler;
use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Submit collective benchmarks and collect their results")]
struct Cli {
    /// Increase the log level (-v debug, -vv trace), RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or submit the configured sweeps
    Submit(SubmitArgs),
    /// Parse raw job reports into JSON lines
    Collect(CollectArgs),
    /// Check whether the submitted jobs are done
    Status(StatusArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[arg(short, long, default_value = "benchmark.yaml")]
    config: PathBuf,

    /// Results directory, overrides `results` of the config
    #[arg(short, long)]
    dir: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    DryRun,
    Local,
    #[value(alias = "euler")]
    Lsf,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(short, long, value_enum, default_value_t = Mode::DryRun)]
    mode: Mode,

    /// Remove the results directory first
    #[arg(long)]
    clean: bool,

    /// Run the verification sweeps instead of the benchmark sweeps
    #[arg(long)]
    check: bool,

    /// Submit one job per (nodes, job repetition) group
    #[arg(short, long)]
    grouped: bool,

    /// Only write the batch files of grouped jobs
    #[arg(long)]
    files_only: bool,
}

#[derive(Args, Debug)]
struct CollectArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Raw directory relative to the results directory
    #[arg(long)]
    raw: Option<PathBuf>,

    /// Repetitions to collect, all discovered ledgers when omitted
    #[arg(short, long)]
    repetition: Vec<u32>,

    /// Added to the repetition numbers of the output
    #[arg(long, default_value_t = 0)]
    offset: u32,

    /// Keep previously parsed files
    #[arg(long)]
    append: bool,

    /// Collect every subfolder of this directory (relative to the results directory)
    #[arg(long, conflicts_with = "raw")]
    aggregate: Option<PathBuf>,

    /// Give every aggregated folder its own repetition range
    #[arg(long, requires = "aggregate")]
    renumber: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Raw directory relative to the results directory
    #[arg(long)]
    raw: Option<PathBuf>,

    #[arg(short, long)]
    repetition: Vec<u32>,
}

#[derive(Error, Debug)]
enum Error {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error("{action} {path}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::with_default(subscriber, || match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            let mut source = std::error::Error::source(&e);
            error!("{e}");
            while let Some(cause) = source {
                error!("caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    })
}

fn run(command: Commands) -> Result<ExitCode, Error> {
    match command {
        Commands::Submit(args) => submit(args),
        Commands::Collect(args) => collect(args),
        Commands::Status(args) => status(args),
    }
}

fn load_config(common: &CommonArgs, required: bool) -> Result<BenchConfig, Error> {
    let mut config = if required || common.config.exists() {
        BenchConfig::load(&common.config)?
    } else {
        info!(
            "{} not found, using the default configuration",
            common.config.display()
        );
        BenchConfig::default()
    };

    if let Some(dir) = &common.dir {
        config.results = dir.clone();
    }

    Ok(config)
}

fn submit(args: SubmitArgs) -> Result<ExitCode, Error> {
    let config = load_config(&args.common, true)?;
    config.preflight_checks(args.mode == Mode::Local)?;

    if args.clean && config.results.exists() {
        info!("removing {}", config.results.display());
        fs::remove_dir_all(&config.results).map_err(|source| Error::Io {
            action: "Failed to remove",
            path: config.results.clone(),
            source,
        })?;
    }

    let runner = match args.mode {
        Mode::DryRun => Runners::DryRun(DryRunner::new(Box::new(io::stdout()))),
        Mode::Local => {
            let path = config.results.join(&config.local.output);
            let output = fs::create_dir_all(&config.results)
                .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
                .map_err(|source| Error::Io {
                    action: "Failed to open",
                    path,
                    source,
                })?;

            Runners::Local(LocalRunner::new(
                config.binary.clone(),
                config.launcher.clone(),
                Duration::from_secs(config.local.timeout),
                Box::new(output),
            ))
        }
        Mode::Lsf => Runners::Lsf(LsfRunner::load(&config, None)?.files_only(args.files_only)),
    };

    let mut scheduler = Scheduler::new(runner);
    scheduler.register(sweep::select(&config.sweeps, args.check));

    if args.grouped {
        scheduler.run_grouped()?;
    } else {
        scheduler.run()?;
    }

    if args.mode == Mode::DryRun {
        info!(
            "{} of {} configurations are runnable",
            scheduler.valid_configurations().len(),
            scheduler.configurations().len()
        );
    }

    Ok(ExitCode::SUCCESS)
}

/// non-hidden subfolders of `root`, relative to the results directory, sorted
fn subfolders(results: &Path, root: &Path) -> Result<Vec<PathBuf>, Error> {
    let dir = results.join(root);
    if !dir.is_dir() {
        return Err(Error::Io {
            action: "Failed to list",
            path: dir,
            source: io::ErrorKind::NotFound.into(),
        });
    }

    Ok(ledger::dir_entries(&dir)
        .into_iter()
        .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_dir()))
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| root.join(entry.file_name()))
        .collect())
}

/// Selection and numbering of the repetitions to collect
#[derive(Debug, Clone, Default)]
struct CollectOptions {
    /// all discovered ledgers when empty
    repetitions: Vec<u32>,
    offset: u32,
    append: bool,
    /// shift every folder past the repetitions of the folders before it
    renumber: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CollectSummary {
    failures: usize,
    missing_ledgers: usize,
}

/// Collect the ledgers of every raw folder into the shared parsed directory
///
/// A missing ledger is logged and counted, the remaining repetitions are still collected.
fn collect_folders(
    config: &BenchConfig,
    folders: &[PathBuf],
    options: &CollectOptions,
) -> Result<CollectSummary, Error> {
    let mut offset = options.offset;
    let mut cleared = options.append;
    let mut summary = CollectSummary::default();

    for folder in folders {
        let lsf = LsfRunner::load(config, Some(folder))?;

        if !cleared {
            let removed = clear_parsed(lsf.parsed_dir()).map_err(|source| Error::Io {
                action: "Failed to clear",
                path: lsf.parsed_dir().to_path_buf(),
                source,
            })?;
            info!("removed {removed} previously parsed files");
            cleared = true;
        }

        let repetitions = if options.repetitions.is_empty() {
            lsf.ledgers()
        } else {
            options.repetitions.clone()
        };
        if repetitions.is_empty() {
            warn!("no job ledger found in {}", lsf.raw_dir().display());
        }

        let mut runner = Runners::Lsf(lsf);
        for repetition in repetitions.iter() {
            match runner.collect(*repetition, offset) {
                Ok(report) => {
                    debug!(
                        repetition = report.repetition,
                        records = report.records,
                        jobs = report.collected.len(),
                        "wrote {}",
                        report.output.display()
                    );
                    summary.failures += report.failures.len();
                }
                Err(RunnerError::Collection(e @ CollectionError::MissingLedger { .. })) => {
                    error!(folder = %folder.display(), "{e}");
                    summary.missing_ledgers += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        match repetitions.iter().max() {
            Some(&max) if options.renumber => {
                offset = max
                    .checked_add(1)
                    .and_then(|span| offset.checked_add(span))
                    .ok_or(CollectionError::OffsetOverflow {
                        repetition: max,
                        offset,
                    })?;
            }
            _ => {}
        }
    }

    Ok(summary)
}

fn collect(args: CollectArgs) -> Result<ExitCode, Error> {
    let config = load_config(&args.common, false)?;

    let folders = match &args.aggregate {
        Some(root) => subfolders(&config.results, root)?,
        None => vec![args.raw.clone().unwrap_or_else(|| PathBuf::from("raw"))],
    };
    let options = CollectOptions {
        repetitions: args.repetition,
        offset: args.offset,
        append: args.append,
        renumber: args.renumber,
    };

    let summary = collect_folders(&config, &folders, &options)?;

    if summary.failures > 0 {
        warn!("{} jobs could not be collected completely", summary.failures);
    }

    Ok(if summary.missing_ledgers > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn status(args: StatusArgs) -> Result<ExitCode, Error> {
    let config = load_config(&args.common, false)?;
    let lsf = LsfRunner::load(&config, args.raw.as_deref())?;

    let repetitions = if args.repetition.is_empty() {
        lsf.ledgers()
    } else {
        args.repetition
    };
    if repetitions.is_empty() {
        warn!("no job ledger found in {}", lsf.raw_dir().display());
    }

    let mut runner = Runners::Lsf(lsf);
    let mut all_done = true;
    for repetition in repetitions {
        let done = runner.verify(repetition)?;
        if done {
            info!(repetition, "all jobs are done");
        } else {
            info!(repetition, "some jobs are not done yet");
        }
        all_done &= done;
    }

    Ok(if all_done {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
