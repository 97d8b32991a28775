//! Wiring of a runnable job from configuration

use crate::config::IngestConfig;
use crate::db;
use crate::engine::{ChunkEngine, StepSettings};
use crate::error::Result;
use crate::job::JobRunner;
use crate::repository::JobRepository;
use crate::sink::SqliteSink;
use crate::source::DelimitedFileSource;
use crate::transform::PriceAdjuster;
use tracing::info;

/// The smartphone import as assembled by [`build_job`]
pub type SmartphoneJob = JobRunner<DelimitedFileSource, PriceAdjuster, SqliteSink>;

/// Validate `config`, open and migrate the store, then build every component
/// in dependency order: source, transformer, sink, repository, engine, runner.
pub async fn build_job(config: &IngestConfig) -> Result<SmartphoneJob> {
    config.validate()?;

    let pool = db::connect(&config.database).await?;

    let source = DelimitedFileSource::new(
        &config.source.path,
        config.delimiter_byte()?,
        config.source.header_lines,
    );
    let transformer = PriceAdjuster::from(&config.transform);
    let sink = SqliteSink::new(&config.database.table)?;
    let repository = JobRepository::new(pool.clone());

    let engine = ChunkEngine::new(
        pool,
        repository.clone(),
        source,
        transformer,
        sink,
        StepSettings::from(config),
    );

    info!(
        job = %config.job_name,
        source = %config.source.path.display(),
        table = %config.database.table,
        chunk_size = config.chunk_size,
        "Job assembled"
    );

    Ok(JobRunner::new(config.job_name.clone(), engine, repository))
}

/// Open an existing store for bookkeeping queries such as run history.
/// A missing database file is an error, not created.
pub async fn open_repository(config: &IngestConfig) -> Result<JobRepository> {
    config.validate()?;
    Ok(JobRepository::new(db::open_existing(&config.database).await?))
}
