//! smartbatch common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging setup and error handling for the smartbatch workspace.
//!
//! # Overview
//!
//! - **Types**: the [`Smartphone`](types::Smartphone) domain record, run status
//!   and step counters shared by the ingestion pipeline and its reporting
//! - **Logging**: `tracing` subscriber initialisation for every binary
//! - **Error Handling**: error type for the shared types
//!
//! # Example
//!
//! ```no_run
//! use smartbatch_common::logging::{init_logging, LogConfig};
//! use smartbatch_common::types::RunStatus;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let status: RunStatus = "COMPLETED".parse()?;
//!     assert!(status.is_terminal());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{RunStatus, Smartphone, StepStats};
