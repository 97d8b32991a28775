//! Job parameters and the job runner
//!
//! A job *instance* is a job name plus its identifying parameters, reduced to
//! a stable key. Each attempt at an instance is a *run*. Once an instance has
//! completed it cannot be run again; failed and stopped runs can be retried
//! with the same parameters.

use crate::engine::ChunkEngine;
use crate::error::{IngestError, Result};
use crate::mapper::{RecordMapper, SmartphoneMapper};
use crate::repository::{JobRepository, JobRun};
use crate::sink::RecordSink;
use crate::source::RecordSource;
use crate::transform::Transformer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smartbatch_common::{RunStatus, StepStats};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Parameter added by [`JobParameters::with_run_timestamp`]
pub const RUN_TIMESTAMP_KEY: &str = "run.timestamp";

/// One typed parameter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobParameter {
    String(String),
    Long(i64),
    Timestamp(DateTime<Utc>),
}

impl JobParameter {
    fn type_name(&self) -> &'static str {
        match self {
            JobParameter::String(_) => "string",
            JobParameter::Long(_) => "long",
            JobParameter::Timestamp(_) => "timestamp",
        }
    }
}

impl std::fmt::Display for JobParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobParameter::String(value) => write!(f, "{}", value),
            JobParameter::Long(value) => write!(f, "{}", value),
            JobParameter::Timestamp(value) => write!(f, "{}", value.timestamp_millis()),
        }
    }
}

/// Named parameters identifying a job instance, kept in key order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    values: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), JobParameter::String(value.into()));
        self
    }

    pub fn with_long(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), JobParameter::Long(value));
        self
    }

    pub fn with_timestamp(mut self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.values.insert(key.into(), JobParameter::Timestamp(value));
        self
    }

    /// Make every invocation a new instance by adding the current epoch millis
    pub fn with_run_timestamp(self) -> Self {
        self.with_long(RUN_TIMESTAMP_KEY, Utc::now().timestamp_millis())
    }

    /// Parse a `key=value` pair; integer values become longs
    pub fn with_assignment(self, assignment: &str) -> Result<Self> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| {
            IngestError::configuration(format!(
                "job parameter '{}' must have the form key=value",
                assignment
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(IngestError::configuration(format!(
                "job parameter '{}' has an empty key",
                assignment
            )));
        }

        let value = value.trim();
        Ok(match value.parse::<i64>() {
            Ok(number) => self.with_long(key, number),
            Err(_) => self.with_string(key, value),
        })
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// SHA-256 (hex) of the canonical `key=type:value;` rendering
    pub fn job_key(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.values {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.type_name().as_bytes());
            hasher.update(b":");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b";");
        }
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for JobParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in &self.values {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Result of [`JobRunner::run`]
#[derive(Debug)]
pub struct JobExecution {
    /// Run as finally recorded in the repository
    pub run: JobRun,
    /// Error that ended a `FAILED` run
    pub error: Option<IngestError>,
}

impl JobExecution {
    pub fn run_id(&self) -> Uuid {
        self.run.id
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn stats(&self) -> StepStats {
        self.run.stats
    }

    pub fn is_success(&self) -> bool {
        self.run.status.is_success()
    }
}

/// Runs a job's single chunk step and records every attempt
pub struct JobRunner<S, T, W, M = SmartphoneMapper> {
    job_name: String,
    engine: ChunkEngine<S, T, W, M>,
    repository: JobRepository,
    stop: CancellationToken,
}

impl<S, T, W, M> JobRunner<S, T, W, M>
where
    S: RecordSource,
    T: Transformer,
    W: RecordSink,
    M: RecordMapper,
{
    pub fn new(
        job_name: impl Into<String>,
        engine: ChunkEngine<S, T, W, M>,
        repository: JobRepository,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            engine,
            repository,
            stop: CancellationToken::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn engine(&self) -> &ChunkEngine<S, T, W, M> {
        &self.engine
    }

    pub fn repository(&self) -> &JobRepository {
        &self.repository
    }

    /// Token that ends the current and any later run at its next chunk boundary
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Execute the job once for `parameters`
    ///
    /// Returns `Err` only when the run could not be started or recorded; a
    /// run that failed while processing is an `Ok` execution with status
    /// `FAILED` and its error attached.
    pub async fn run(&self, parameters: JobParameters) -> Result<JobExecution> {
        let job_key = parameters.job_key();

        if let Some(previous) = self.repository.find_completed(&self.job_name, &job_key).await? {
            warn!(job = %self.job_name, run_id = %previous.id, "Job instance already completed");
            return Err(IngestError::JobInstanceAlreadyComplete {
                job_name: self.job_name.clone(),
                job_key,
                run_id: previous.id.to_string(),
            });
        }

        let run = self.repository.create_run(&self.job_name, &parameters).await?;
        info!(
            job = %self.job_name,
            run_id = %run.id,
            parameters = %parameters,
            "Job run started"
        );

        let outcome = self.engine.execute(run.id, &self.stop).await;

        if let Some(err) = &outcome.error {
            error!(job = %self.job_name, run_id = %run.id, error = %err, stats = %outcome.stats, "Job run failed");
        } else {
            info!(
                job = %self.job_name,
                run_id = %run.id,
                status = %outcome.status,
                stats = %outcome.stats,
                "Job run finished"
            );
        }

        let finished = self
            .repository
            .finish_run(run.id, outcome.status, &outcome.stats, outcome.error.as_ref())
            .await;

        let run = match (finished, &outcome.error) {
            (Ok(recorded), _) => recorded,
            // The engine error is the one to report; the stored row stays STARTED
            (Err(err), Some(_)) => {
                error!(job = %self.job_name, run_id = %run.id, error = %err, "Failed to record run outcome");
                run.finished(outcome.status, &outcome.stats, outcome.error.as_ref())
            },
            (Err(err), None) => return Err(err),
        };

        Ok(JobExecution {
            run,
            error: outcome.error,
        })
    }

    /// Latest runs of this job, newest first
    pub async fn history(&self, limit: u32) -> Result<Vec<JobRun>> {
        self.repository.recent(Some(&self.job_name), limit).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_key_is_order_independent() {
        let a = JobParameters::new()
            .with_string("input.file", "phones.csv")
            .with_long("attempt", 1);
        let b = JobParameters::new()
            .with_long("attempt", 1)
            .with_string("input.file", "phones.csv");

        assert_eq!(a, b);
        assert_eq!(a.job_key(), b.job_key());
        assert_eq!(a.job_key().len(), 64);
    }

    #[test]
    fn test_job_key_distinguishes_values_and_types() {
        let base = JobParameters::new().with_long("attempt", 1);

        assert_ne!(base.job_key(), JobParameters::new().with_long("attempt", 2).job_key());
        assert_ne!(base.job_key(), JobParameters::new().with_string("attempt", "1").job_key());
        assert_ne!(base.job_key(), JobParameters::new().job_key());
    }

    #[test]
    fn test_run_timestamp_is_epoch_millis() {
        let before = Utc::now().timestamp_millis();
        let params = JobParameters::new().with_run_timestamp();
        let after = Utc::now().timestamp_millis();

        match params.get(RUN_TIMESTAMP_KEY) {
            Some(JobParameter::Long(millis)) => assert!((before..=after).contains(millis)),
            other => panic!("unexpected parameter: {:?}", other),
        }
    }

    #[test]
    fn test_assignment_parsing() {
        let params = JobParameters::new()
            .with_assignment("batch=7")
            .unwrap()
            .with_assignment(" region = eu-west ")
            .unwrap();

        assert_eq!(params.get("batch"), Some(&JobParameter::Long(7)));
        assert_eq!(
            params.get("region"),
            Some(&JobParameter::String("eu-west".to_string()))
        );
        assert!(JobParameters::new().with_assignment("novalue").is_err());
        assert!(JobParameters::new().with_assignment("=5").is_err());
    }

    #[test]
    fn test_parameters_json_round_trip() {
        let params = JobParameters::new()
            .with_string("input.file", "phones.csv")
            .with_long("attempt", 3)
            .with_timestamp("as_of", Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains(r#""attempt":{"long":3}"#));
        assert_eq!(serde_json::from_str::<JobParameters>(&json).unwrap(), params);
    }

    #[test]
    fn test_display_lists_parameters_in_key_order() {
        let params = JobParameters::new().with_long("b", 2).with_string("a", "x");
        assert_eq!(params.to_string(), "a=x, b=2");
    }
}
