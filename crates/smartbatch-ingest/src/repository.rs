//! Job run bookkeeping
//!
//! Every attempt to run a job gets a row in `job_runs`. The row is created
//! `STARTED`, its counters move forward inside each chunk transaction, and it
//! is closed with a terminal status once the engine stops.

use crate::error::{IngestError, Result};
use crate::job::JobParameters;
use chrono::{DateTime, Utc};
use smartbatch_common::{RunStatus, StepStats};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

const RUN_COLUMNS: &str = "id, job_name, job_key, parameters, status, started_at, finished_at, \
     read_count, write_count, commit_count, rollback_count, skip_count, exit_code, exit_message";

/// One recorded run of a job instance
#[derive(Debug, Clone, PartialEq)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    /// Fingerprint of the identifying parameters
    pub job_key: String,
    pub parameters: JobParameters,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: StepStats,
    pub exit_code: Option<String>,
    pub exit_message: Option<String>,
}

impl JobRun {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|finished| finished - self.started_at)
    }

    /// This run closed with `status`, as `finish_run` would record it
    pub fn finished(
        mut self,
        status: RunStatus,
        stats: &StepStats,
        error: Option<&IngestError>,
    ) -> JobRun {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.stats = *stats;
        self.exit_code = Some(error.map_or(status.as_str(), IngestError::kind).to_string());
        self.exit_message = error.map(ToString::to_string);
        self
    }
}

#[derive(Debug, FromRow)]
struct JobRunRow {
    id: String,
    job_name: String,
    job_key: String,
    parameters: String,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    read_count: i64,
    write_count: i64,
    commit_count: i64,
    rollback_count: i64,
    skip_count: i64,
    exit_code: Option<String>,
    exit_message: Option<String>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = IngestError;

    fn try_from(row: JobRunRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id).map_err(decode_error)?;
        let parameters = serde_json::from_str(&row.parameters).map_err(decode_error)?;
        let status = row.status.parse::<RunStatus>().map_err(decode_error)?;

        Ok(Self {
            id,
            job_name: row.job_name,
            job_key: row.job_key,
            parameters,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            stats: StepStats {
                read_count: from_column(row.read_count),
                write_count: from_column(row.write_count),
                commit_count: from_column(row.commit_count),
                rollback_count: from_column(row.rollback_count),
                skip_count: from_column(row.skip_count),
            },
            exit_code: row.exit_code,
            exit_message: row.exit_message,
        })
    }
}

fn decode_error(err: impl std::error::Error + Send + Sync + 'static) -> IngestError {
    IngestError::Repository(sqlx::Error::Decode(Box::new(err)))
}

fn from_column(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_column(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Reads and writes `job_runs`
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Most recent successful run of the instance identified by `job_key`
    pub async fn find_completed(&self, job_name: &str, job_key: &str) -> Result<Option<JobRun>> {
        let sql = format!(
            "SELECT {} FROM job_runs WHERE job_name = ? AND job_key = ? AND status = ? \
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
            RUN_COLUMNS
        );

        let row = sqlx::query_as::<_, JobRunRow>(&sql)
            .bind(job_name)
            .bind(job_key)
            .bind(RunStatus::Completed.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRun::try_from).transpose()
    }

    /// Insert a `STARTED` run with zeroed counters
    pub async fn create_run(&self, job_name: &str, parameters: &JobParameters) -> Result<JobRun> {
        let run = JobRun {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            job_key: parameters.job_key(),
            parameters: parameters.clone(),
            status: RunStatus::Started,
            started_at: Utc::now(),
            finished_at: None,
            stats: StepStats::default(),
            exit_code: None,
            exit_message: None,
        };

        let parameters_json = serde_json::to_string(&run.parameters)
            .map_err(|e| IngestError::configuration(format!("unserializable job parameters: {}", e)))?;

        sqlx::query(
            "INSERT INTO job_runs (id, job_name, job_key, parameters, status, started_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(&run.job_name)
        .bind(&run.job_key)
        .bind(parameters_json)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;

        debug!(run_id = %run.id, job = %run.job_name, "Created job run");
        Ok(run)
    }

    /// Store the counters of a run inside the chunk's own transaction
    pub async fn record_progress(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        run_id: Uuid,
        stats: &StepStats,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE job_runs SET read_count = ?, write_count = ?, commit_count = ?, \
             rollback_count = ?, skip_count = ? WHERE id = ?",
        )
        .bind(to_column(stats.read_count))
        .bind(to_column(stats.write_count))
        .bind(to_column(stats.commit_count))
        .bind(to_column(stats.rollback_count))
        .bind(to_column(stats.skip_count))
        .bind(run_id.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Close a run with its terminal status and final counters
    pub async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        stats: &StepStats,
        error: Option<&IngestError>,
    ) -> Result<JobRun> {
        let exit_code = error.map_or(status.as_str(), IngestError::kind);
        let exit_message = error.map(ToString::to_string);

        sqlx::query(
            "UPDATE job_runs SET status = ?, finished_at = ?, read_count = ?, write_count = ?, \
             commit_count = ?, rollback_count = ?, skip_count = ?, exit_code = ?, exit_message = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(to_column(stats.read_count))
        .bind(to_column(stats.write_count))
        .bind(to_column(stats.commit_count))
        .bind(to_column(stats.rollback_count))
        .bind(to_column(stats.skip_count))
        .bind(exit_code)
        .bind(exit_message)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;

        self.get(run_id).await?.ok_or_else(|| {
            IngestError::Repository(sqlx::Error::RowNotFound)
        })
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Option<JobRun>> {
        let sql = format!("SELECT {} FROM job_runs WHERE id = ?", RUN_COLUMNS);

        let row = sqlx::query_as::<_, JobRunRow>(&sql)
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRun::try_from).transpose()
    }

    /// Latest runs first, optionally restricted to one job
    pub async fn recent(&self, job_name: Option<&str>, limit: u32) -> Result<Vec<JobRun>> {
        let sql = format!(
            "SELECT {} FROM job_runs WHERE (?1 IS NULL OR job_name = ?1) \
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
            RUN_COLUMNS
        );

        let rows = sqlx::query_as::<_, JobRunRow>(&sql)
            .bind(job_name)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(JobRun::try_from).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    fn parameters(file: &str) -> JobParameters {
        JobParameters::new().with_string("input.file", file)
    }

    #[tokio::test]
    async fn test_create_and_finish_run() {
        let repository = JobRepository::new(memory_pool().await);
        let run = repository
            .create_run("smartphoneJob", &parameters("a.csv"))
            .await
            .unwrap();

        let stored = repository.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Started);
        assert_eq!(stored.stats, StepStats::default());
        assert_eq!(stored.parameters, parameters("a.csv"));
        assert!(stored.finished_at.is_none());

        let stats = StepStats {
            read_count: 12,
            write_count: 12,
            commit_count: 2,
            ..StepStats::default()
        };
        let finished = repository
            .finish_run(run.id, RunStatus::Completed, &stats, None)
            .await
            .unwrap();

        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(finished.stats, stats);
        assert_eq!(finished.exit_code.as_deref(), Some("COMPLETED"));
        assert!(finished.exit_message.is_none());
        assert!(finished.duration().is_some());
    }

    #[tokio::test]
    async fn test_failed_run_keeps_error_kind() {
        let repository = JobRepository::new(memory_pool().await);
        let run = repository.create_run("job", &parameters("a.csv")).await.unwrap();
        let error = IngestError::Mapping {
            line: 3,
            field: "price",
            message: "invalid decimal 'abc'".to_string(),
        };

        let finished = repository
            .finish_run(run.id, RunStatus::Failed, &StepStats::default(), Some(&error))
            .await
            .unwrap();

        assert_eq!(finished.exit_code.as_deref(), Some("MAPPING_ERROR"));
        assert!(finished.exit_message.unwrap().contains("line 3"));
    }

    #[tokio::test]
    async fn test_in_memory_finish_matches_recorded_finish() {
        let repository = JobRepository::new(memory_pool().await);
        let run = repository.create_run("job", &parameters("a.csv")).await.unwrap();
        let stats = StepStats {
            read_count: 4,
            rollback_count: 1,
            ..StepStats::default()
        };
        let error = IngestError::configuration("bad");

        let local = run.clone().finished(RunStatus::Failed, &stats, Some(&error));
        let recorded = repository
            .finish_run(run.id, RunStatus::Failed, &stats, Some(&error))
            .await
            .unwrap();

        assert_eq!(local.status, recorded.status);
        assert_eq!(local.stats, recorded.stats);
        assert_eq!(local.exit_code, recorded.exit_code);
        assert_eq!(local.exit_message, recorded.exit_message);
        assert!(local.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_find_completed_ignores_other_outcomes() {
        let repository = JobRepository::new(memory_pool().await);
        let params = parameters("a.csv");

        let failed = repository.create_run("job", &params).await.unwrap();
        repository
            .finish_run(failed.id, RunStatus::Failed, &StepStats::default(), None)
            .await
            .unwrap();
        assert!(repository
            .find_completed("job", &params.job_key())
            .await
            .unwrap()
            .is_none());

        let done = repository.create_run("job", &params).await.unwrap();
        repository
            .finish_run(done.id, RunStatus::Completed, &StepStats::default(), None)
            .await
            .unwrap();

        let found = repository
            .find_completed("job", &params.job_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, done.id);
        assert!(repository
            .find_completed("other", &params.job_key())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_progress_follows_transaction_outcome() {
        let repository = JobRepository::new(memory_pool().await);
        let run = repository.create_run("job", &parameters("a.csv")).await.unwrap();
        let stats = StepStats {
            read_count: 10,
            write_count: 10,
            commit_count: 1,
            ..StepStats::default()
        };

        let mut tx = repository.pool().begin().await.unwrap();
        repository.record_progress(&mut tx, run.id, &stats).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(repository.get(run.id).await.unwrap().unwrap().stats, StepStats::default());

        let mut tx = repository.pool().begin().await.unwrap();
        repository.record_progress(&mut tx, run.id, &stats).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(repository.get(run.id).await.unwrap().unwrap().stats, stats);
    }

    #[tokio::test]
    async fn test_recent_lists_newest_first() {
        let repository = JobRepository::new(memory_pool().await);
        let first = repository.create_run("job", &parameters("a.csv")).await.unwrap();
        let second = repository.create_run("job", &parameters("b.csv")).await.unwrap();
        let other = repository.create_run("other", &parameters("c.csv")).await.unwrap();

        let all = repository.recent(None, 10).await.unwrap();
        assert_eq!(
            all.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![other.id, second.id, first.id]
        );

        let only_job = repository.recent(Some("job"), 1).await.unwrap();
        assert_eq!(only_job.len(), 1);
        assert_eq!(only_job[0].id, second.id);
    }
}
