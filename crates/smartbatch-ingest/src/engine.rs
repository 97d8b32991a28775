//! Chunk-oriented step execution
//!
//! One pass over a source is driven as an explicit state machine:
//!
//! ```text
//! Idle -> ReadingChunk -> ProcessingChunk -> CommittingChunk -> ReadingChunk -> ...
//!              |                                   |
//!              +-> Completed | Stopped | Failed    +-> Failed (chunk rolled back)
//! ```
//!
//! Each chunk is written and its progress recorded in a single transaction.
//! A failure ends the pass; chunks committed before it stay committed. Stop
//! requests are honoured only between chunks.

use crate::config::{IngestConfig, RecordErrorPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_SKIP_LIMIT};
use crate::error::{IngestError, Result};
use crate::mapper::{RecordMapper, SmartphoneMapper};
use crate::repository::JobRepository;
use crate::sink::RecordSink;
use crate::source::{RecordCursor, RecordSource};
use crate::transform::Transformer;
use smartbatch_common::{RunStatus, Smartphone, StepStats};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Ordered batch of records committed together
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 1-based position of the chunk within the run
    pub number: u64,
    pub records: Vec<Smartphone>,
}

impl Chunk {
    pub fn new(number: u64, records: Vec<Smartphone>) -> Self {
        Self { number, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Step tuning taken from [`IngestConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSettings {
    pub chunk_size: usize,
    pub record_errors: RecordErrorPolicy,
    pub skip_limit: u64,
}

impl StepSettings {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            record_errors: RecordErrorPolicy::Abort,
            skip_limit: DEFAULT_SKIP_LIMIT,
        }
    }

    pub fn with_skip_policy(mut self, skip_limit: u64) -> Self {
        self.record_errors = RecordErrorPolicy::Skip;
        self.skip_limit = skip_limit;
        self
    }
}

impl Default for StepSettings {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl From<&IngestConfig> for StepSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            record_errors: config.record_errors,
            skip_limit: config.skip_limit,
        }
    }
}

/// Where the engine currently is within a pass
#[derive(Debug)]
pub enum EngineState {
    Idle,
    ReadingChunk,
    ProcessingChunk(Chunk),
    CommittingChunk(Chunk),
    Completed,
    Stopped,
    Failed(IngestError),
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::ReadingChunk => "reading",
            EngineState::ProcessingChunk(_) => "processing",
            EngineState::CommittingChunk(_) => "committing",
            EngineState::Completed => "completed",
            EngineState::Stopped => "stopped",
            EngineState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Stopped | EngineState::Failed(_)
        )
    }
}

/// Terminal result of one pass
#[derive(Debug)]
pub struct StepOutcome {
    pub status: RunStatus,
    pub stats: StepStats,
    /// Set when `status` is `FAILED`
    pub error: Option<IngestError>,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

struct StepContext<C> {
    run_id: Uuid,
    cursor: Option<C>,
    stats: StepStats,
    chunks_read: u64,
    exhausted: bool,
}

/// Reads, maps, transforms and writes records chunk by chunk
pub struct ChunkEngine<S, T, W, M = SmartphoneMapper> {
    pool: SqlitePool,
    repository: JobRepository,
    source: S,
    mapper: M,
    transformer: T,
    sink: W,
    settings: StepSettings,
}

impl<S, T, W> ChunkEngine<S, T, W, SmartphoneMapper>
where
    S: RecordSource,
    T: Transformer,
    W: RecordSink,
{
    pub fn new(
        pool: SqlitePool,
        repository: JobRepository,
        source: S,
        transformer: T,
        sink: W,
        settings: StepSettings,
    ) -> Self {
        Self {
            pool,
            repository,
            source,
            mapper: SmartphoneMapper,
            transformer,
            sink,
            settings,
        }
    }
}

impl<S, T, W, M> ChunkEngine<S, T, W, M>
where
    S: RecordSource,
    T: Transformer,
    W: RecordSink,
    M: RecordMapper,
{
    /// Replace the field mapper
    pub fn with_mapper<N: RecordMapper>(self, mapper: N) -> ChunkEngine<S, T, W, N> {
        ChunkEngine {
            pool: self.pool,
            repository: self.repository,
            source: self.source,
            mapper,
            transformer: self.transformer,
            sink: self.sink,
            settings: self.settings,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn settings(&self) -> StepSettings {
        self.settings
    }

    /// Run one full pass for `run_id`, which must already exist in the repository
    #[instrument(skip(self, stop), fields(source = %self.source.location(), chunk_size = self.settings.chunk_size))]
    pub async fn execute(&self, run_id: Uuid, stop: &CancellationToken) -> StepOutcome {
        let mut ctx = StepContext {
            run_id,
            cursor: None,
            stats: StepStats::default(),
            chunks_read: 0,
            exhausted: false,
        };
        let mut state = EngineState::Idle;

        let outcome = loop {
            state = match state {
                EngineState::Completed => {
                    break StepOutcome {
                        status: RunStatus::Completed,
                        stats: ctx.stats,
                        error: None,
                    }
                },
                EngineState::Stopped => {
                    break StepOutcome {
                        status: RunStatus::Stopped,
                        stats: ctx.stats,
                        error: None,
                    }
                },
                EngineState::Failed(err) => {
                    break StepOutcome {
                        status: RunStatus::Failed,
                        stats: ctx.stats,
                        error: Some(err),
                    }
                },
                current => {
                    let from = current.name();
                    let next = self.advance(current, &mut ctx, stop).await;
                    debug!(from, to = next.name(), "State transition");
                    next
                },
            };
        };

        if ctx.cursor.take().is_some() {
            debug!("Source closed");
        }

        outcome
    }

    async fn advance(
        &self,
        state: EngineState,
        ctx: &mut StepContext<S::Cursor>,
        stop: &CancellationToken,
    ) -> EngineState {
        match state {
            EngineState::Idle => match self.source.open() {
                Ok(cursor) => {
                    ctx.cursor = Some(cursor);
                    EngineState::ReadingChunk
                },
                Err(err) => EngineState::Failed(err),
            },
            EngineState::ReadingChunk => {
                if stop.is_cancelled() {
                    info!(commits = ctx.stats.commit_count, "Stop requested, ending at chunk boundary");
                    return EngineState::Stopped;
                }
                match self.read_chunk(ctx) {
                    Ok(chunk) if chunk.is_empty() => EngineState::Completed,
                    Ok(chunk) => EngineState::ProcessingChunk(chunk),
                    Err(err) => EngineState::Failed(err),
                }
            },
            EngineState::ProcessingChunk(chunk) => EngineState::CommittingChunk(self.process(chunk)),
            EngineState::CommittingChunk(chunk) => match self.commit(ctx, &chunk).await {
                Ok(()) => {
                    info!(
                        chunk = chunk.number,
                        records = chunk.len(),
                        written = ctx.stats.write_count,
                        "Chunk committed"
                    );
                    if ctx.exhausted {
                        EngineState::Completed
                    } else {
                        EngineState::ReadingChunk
                    }
                },
                Err(err) => {
                    error!(chunk = chunk.number, error = %err, "Chunk not committed");
                    EngineState::Failed(err)
                },
            },
            terminal => terminal,
        }
    }

    /// Pull up to `chunk_size` good records; fewer only at end of input
    fn read_chunk(&self, ctx: &mut StepContext<S::Cursor>) -> Result<Chunk> {
        let cursor = ctx
            .cursor
            .as_mut()
            .ok_or_else(|| IngestError::configuration("source read before it was opened"))?;
        let mut records = Vec::with_capacity(self.settings.chunk_size);

        while records.len() < self.settings.chunk_size {
            let fields = match cursor.next_fields() {
                Ok(Some(fields)) => fields,
                Ok(None) => {
                    ctx.exhausted = true;
                    break;
                },
                Err(err) if err.is_record_error() => {
                    ctx.stats.read_count += 1;
                    self.skip_record(&mut ctx.stats, err)?;
                    continue;
                },
                Err(err) => return Err(err),
            };

            ctx.stats.read_count += 1;
            match self.mapper.map(&fields) {
                Ok(record) => records.push(record),
                Err(err) => self.skip_record(&mut ctx.stats, err)?,
            }
        }

        if !records.is_empty() {
            ctx.chunks_read += 1;
        }
        Ok(Chunk::new(ctx.chunks_read, records))
    }

    fn skip_record(&self, stats: &mut StepStats, err: IngestError) -> Result<()> {
        match self.settings.record_errors {
            RecordErrorPolicy::Abort => Err(err),
            RecordErrorPolicy::Skip if stats.skip_count >= self.settings.skip_limit => {
                Err(IngestError::SkipLimitExceeded {
                    limit: self.settings.skip_limit,
                    source: Box::new(err),
                })
            },
            RecordErrorPolicy::Skip => {
                stats.skip_count += 1;
                warn!(line = ?err.line(), error = %err, skipped = stats.skip_count, "Skipping bad record");
                Ok(())
            },
        }
    }

    fn process(&self, chunk: Chunk) -> Chunk {
        let records = chunk
            .records
            .into_iter()
            .map(|record| self.transformer.transform(record))
            .collect();
        Chunk::new(chunk.number, records)
    }

    async fn commit(&self, ctx: &mut StepContext<S::Cursor>, chunk: &Chunk) -> Result<()> {
        let write_error = |source: sqlx::Error| IngestError::Write {
            chunk: chunk.number,
            source,
        };

        let mut tx = self.pool.begin().await.map_err(write_error)?;

        let written = match self.sink.write(&mut tx, chunk).await {
            Ok(written) => written,
            Err(err) => {
                rollback(tx, chunk.number).await;
                ctx.stats.rollback_count += 1;
                return Err(err);
            },
        };

        let mut stats = ctx.stats;
        stats.write_count += written;
        stats.commit_count += 1;

        if let Err(source) = self.repository.record_progress(&mut tx, ctx.run_id, &stats).await {
            rollback(tx, chunk.number).await;
            ctx.stats.rollback_count += 1;
            return Err(write_error(source));
        }

        tx.commit().await.map_err(write_error)?;
        ctx.stats = stats;
        Ok(())
    }
}

async fn rollback(tx: Transaction<'_, Sqlite>, chunk: u64) {
    if let Err(e) = tx.rollback().await {
        warn!(chunk, error = %e, "Explicit rollback failed, connection will discard the transaction");
    }
}
