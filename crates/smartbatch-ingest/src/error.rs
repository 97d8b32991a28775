//! Error taxonomy of the ingestion pipeline
//!
//! Errors are plain values: the chunk engine inspects them to decide whether
//! a record can be skipped or the run must end in `FAILED`.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Source cannot be opened or read
    #[error("Resource error on {location}: {source}")]
    Resource {
        location: String,
        #[source]
        source: std::io::Error,
    },

    /// A line could not be split into the expected fields
    #[error("Parse error at line {line}: {message}")]
    Parse { line: u64, message: String },

    /// A field could not be converted to its target type
    #[error("Mapping error at line {line}, field '{field}': {message}")]
    Mapping {
        line: u64,
        field: &'static str,
        message: String,
    },

    /// The destination rejected a chunk; its transaction was rolled back
    #[error("Write error on chunk {chunk}: {source}")]
    Write {
        chunk: u64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Skip limit of {limit} exceeded: {source}")]
    SkipLimitExceeded {
        limit: u64,
        #[source]
        source: Box<IngestError>,
    },

    #[error("Job instance '{job_name}' with key {job_key} already completed (run {run_id})")]
    JobInstanceAlreadyComplete {
        job_name: String,
        job_key: String,
        run_id: String,
    },

    /// Job repository bookkeeping failed outside of a chunk write
    #[error("Job repository error: {0}")]
    Repository(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl IngestError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn resource(location: impl Into<String>, source: std::io::Error) -> Self {
        Self::Resource {
            location: location.into(),
            source,
        }
    }

    /// Parse and mapping failures concern a single record and are the only
    /// errors a skip policy may swallow
    pub fn is_record_error(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Mapping { .. })
    }

    /// Source line the error points at, when it concerns a single record
    pub fn line(&self) -> Option<u64> {
        match self {
            Self::Parse { line, .. } | Self::Mapping { line, .. } => Some(*line),
            Self::SkipLimitExceeded { source, .. } => source.line(),
            _ => None,
        }
    }

    /// Short machine-friendly name, stored as the run's exit code
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resource { .. } => "RESOURCE_ERROR",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::Mapping { .. } => "MAPPING_ERROR",
            Self::Write { .. } => "WRITE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::SkipLimitExceeded { .. } => "SKIP_LIMIT_EXCEEDED",
            Self::JobInstanceAlreadyComplete { .. } => "JOB_INSTANCE_ALREADY_COMPLETE",
            Self::Repository(_) => "REPOSITORY_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_record_errors_are_classified() {
        let parse = IngestError::Parse {
            line: 4,
            message: "expected 6 fields, found 5".to_string(),
        };
        let mapping = IngestError::Mapping {
            line: 7,
            field: "price",
            message: "invalid decimal 'abc'".to_string(),
        };

        assert!(parse.is_record_error());
        assert!(mapping.is_record_error());
        assert!(!IngestError::configuration("chunk size").is_record_error());
        assert_eq!(mapping.line(), Some(7));
        assert_eq!(mapping.kind(), "MAPPING_ERROR");
    }

    #[test]
    fn test_skip_limit_keeps_offending_line() {
        let err = IngestError::SkipLimitExceeded {
            limit: 2,
            source: Box::new(IngestError::Parse {
                line: 12,
                message: "bad".to_string(),
            }),
        };

        assert!(!err.is_record_error());
        assert_eq!(err.line(), Some(12));
        assert!(err.to_string().contains("line 12"));
    }

    #[test]
    fn test_resource_error_message() {
        let err = IngestError::resource(
            "/missing.csv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(err.kind(), "RESOURCE_ERROR");
        assert!(err.to_string().contains("/missing.csv"));
    }
}
