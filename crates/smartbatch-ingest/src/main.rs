//! Smartbatch Ingest - chunked smartphone import

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use smartbatch_common::logging::{init_logging, LogConfig, LogLevel};
use smartbatch_ingest::{bootstrap, IngestConfig, JobParameters};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "smartbatch-ingest")]
#[command(author, version, about = "Chunked smartphone CSV import into SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (smartbatch.toml in the working directory if omitted)
    #[arg(short, long, global = true, env = "SMARTBATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import the source file once
    Run(RunArgs),

    /// List recent job runs
    History {
        /// Maximum number of runs to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Only runs of this job
        #[arg(short, long)]
        job: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Delimited input file
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// SQLite URL, e.g. sqlite://./data/smartbatch.db
    #[arg(short, long)]
    database_url: Option<String>,

    /// Records per transaction
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Single-character field delimiter
    #[arg(long)]
    delimiter: Option<String>,

    /// Leading lines to discard
    #[arg(long)]
    header_lines: Option<usize>,

    /// Skip unparseable records, failing after this many
    #[arg(long)]
    skip_limit: Option<u64>,

    /// Identifying job parameter, repeatable
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Do not add the run timestamp; identical parameters then name the same job instance
    #[arg(long)]
    no_timestamp: bool,
}

impl RunArgs {
    fn apply(&self, mut config: IngestConfig) -> IngestConfig {
        if let Some(source) = &self.source {
            config.source.path = source.clone();
        }
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config = config.with_chunk_size(chunk_size);
        }
        if let Some(delimiter) = &self.delimiter {
            config = config.with_delimiter(delimiter.clone());
        }
        if let Some(header_lines) = self.header_lines {
            config = config.with_header_lines(header_lines);
        }
        if let Some(skip_limit) = self.skip_limit {
            config = config.with_skip_policy(skip_limit);
        }
        config
    }

    fn parameters(&self) -> Result<JobParameters> {
        let mut parameters = JobParameters::new();
        for assignment in &self.params {
            parameters = parameters.with_assignment(assignment)?;
        }
        if !self.no_timestamp {
            parameters = parameters.with_run_timestamp();
        }
        Ok(parameters)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("smartbatch-ingest".to_string())
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = IngestConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run(args) => run(args.apply(config), &args).await,
        Command::History { limit, job } => history(&config, job.as_deref(), limit).await,
    }
}

async fn run(config: IngestConfig, args: &RunArgs) -> Result<ExitCode> {
    let parameters = args.parameters()?;
    let job = bootstrap::build_job(&config).await?;

    let stop = job.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            stop.cancel();
        }
    });

    let execution = job.run(parameters).await?;

    if let Some(err) = &execution.error {
        error!(run_id = %execution.run_id(), "Import failed: {}", err);
        eprintln!("Error: {}", err);
        return Ok(ExitCode::FAILURE);
    }

    info!(
        run_id = %execution.run_id(),
        status = %execution.status(),
        stats = %execution.stats(),
        "Import finished"
    );

    Ok(if execution.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn history(config: &IngestConfig, job: Option<&str>, limit: u32) -> Result<ExitCode> {
    let repository = bootstrap::open_repository(config).await?;
    let runs = repository.recent(job, limit).await?;

    if runs.is_empty() {
        println!("No job runs recorded");
        return Ok(ExitCode::SUCCESS);
    }

    for run in runs {
        let duration = run
            .duration()
            .map(|d| format!("{}ms", d.num_milliseconds()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<16} {:<9} {}  {}  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.job_name,
            run.status.as_str(),
            run.stats,
            duration,
            run.id
        );
        if let Some(message) = run.exit_message {
            println!("    {}", message);
        }
    }

    Ok(ExitCode::SUCCESS)
}
