//! Smartbatch Ingest Library
//!
//! Chunk-oriented batch import of smartphone records from a delimited text
//! file into SQLite.
//!
//! # Pipeline
//!
//! - **Source**: semicolon separated file, header skipped, one record per line
//! - **Mapper**: named fields converted to a typed [`Smartphone`](smartbatch_common::Smartphone)
//! - **Transformer**: phones released before 2023 get 10% off
//! - **Sink**: bulk insert of each chunk inside its own transaction
//!
//! Every run is recorded in the `job_runs` table of the same database.
//!
//! # Example
//!
//! ```no_run
//! use smartbatch_ingest::{bootstrap, IngestConfig, JobParameters};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::new("./data/smartphones.csv", "sqlite://./data/smartbatch.db");
//!     let job = bootstrap::build_job(&config).await?;
//!
//!     let execution = job.run(JobParameters::new().with_run_timestamp()).await?;
//!     println!("{}: {}", execution.status(), execution.stats());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod job;
pub mod mapper;
pub mod repository;
pub mod sink;
pub mod source;
pub mod transform;

pub use config::{IngestConfig, RecordErrorPolicy};
pub use engine::{ChunkEngine, StepOutcome, StepSettings};
pub use error::{IngestError, Result};
pub use job::{JobExecution, JobParameters, JobRunner};
pub use repository::{JobRepository, JobRun};
