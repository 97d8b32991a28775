//! Configuration management
//!
//! Values are layered, later sources overriding earlier ones:
//! built-in defaults, an optional TOML file, `SMARTBATCH_*` environment
//! variables (a `.env` file is honoured), then CLI flags applied by the
//! binary. [`IngestConfig::validate`] runs before any I/O.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Records per chunk (one transaction each).
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Leading lines discarded before the first record.
pub const DEFAULT_HEADER_LINES: usize = 1;

pub const DEFAULT_DELIMITER: &str = ";";

pub const DEFAULT_SOURCE_PATH: &str = "./data/smartphones.csv";

pub const DEFAULT_DATABASE_URL: &str = "sqlite://./data/smartbatch.db";

/// Required prefix of every database URL.
pub const SQLITE_URL_SCHEME: &str = "sqlite:";

/// Destination table created by the bundled migrations.
pub const DEFAULT_TABLE: &str = "smartphones";

pub const DEFAULT_JOB_NAME: &str = "smartphoneJob";

/// Phones released before this year get discounted.
pub const DEFAULT_CUTOFF_YEAR: i32 = 2023;

pub const DEFAULT_DISCOUNT_FACTOR: f64 = 0.9;

/// Bad records tolerated when the skip policy is enabled.
pub const DEFAULT_SKIP_LIMIT: u64 = 10;

/// SQLite has a single writer; one connection keeps runs strictly sequential.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 1;

pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "smartbatch.toml";

pub const ENV_PREFIX: &str = "SMARTBATCH";

/// Ingestion job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub job_name: String,
    pub chunk_size: usize,
    pub source: SourceConfig,
    pub database: DatabaseConfig,
    pub transform: TransformConfig,
    pub record_errors: RecordErrorPolicy,
    /// Only consulted with [`RecordErrorPolicy::Skip`]
    pub skip_limit: u64,
}

/// Delimited input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub header_lines: usize,
    pub delimiter: String,
}

/// Destination store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub table: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Price adjustment rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub cutoff_year: i32,
    pub discount_factor: f64,
}

/// What to do with a record that cannot be parsed or mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordErrorPolicy {
    /// Fail the run on the first bad record
    #[default]
    Abort,
    /// Log and count bad records, failing only past `skip_limit`
    Skip,
}

impl std::str::FromStr for RecordErrorPolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(IngestError::configuration(format!(
                "unknown record error policy '{}' (expected abort or skip)",
                other
            ))),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            job_name: DEFAULT_JOB_NAME.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            source: SourceConfig::default(),
            database: DatabaseConfig::default(),
            transform: TransformConfig::default(),
            record_errors: RecordErrorPolicy::Abort,
            skip_limit: DEFAULT_SKIP_LIMIT,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SOURCE_PATH),
            header_lines: DEFAULT_HEADER_LINES,
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            table: DEFAULT_TABLE.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    /// Only `sqlite:` URLs are accepted; anything else would be read as a file path
    pub fn check_url(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(IngestError::configuration("database URL cannot be empty"));
        }
        if !url.starts_with(SQLITE_URL_SCHEME) {
            return Err(IngestError::configuration(format!(
                "database URL '{}' is not a {} URL",
                self.url, SQLITE_URL_SCHEME
            )));
        }
        Ok(())
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            cutoff_year: DEFAULT_CUTOFF_YEAR,
            discount_factor: DEFAULT_DISCOUNT_FACTOR,
        }
    }
}

impl IngestConfig {
    /// Defaults pointed at a given input file and database
    pub fn new(source_path: impl Into<PathBuf>, database_url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.source.path = source_path.into();
        config.database.url = database_url.into();
        config
    }

    /// Load configuration from file and environment
    ///
    /// `file` must exist when given; otherwise `smartbatch.toml` is read if
    /// present. Environment variables use the `SMARTBATCH_` prefix and `__`
    /// between nested keys, e.g. `SMARTBATCH_DATABASE__URL`.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder();
        let builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| IngestError::configuration(format!("failed to load configuration: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| IngestError::configuration(format!("invalid configuration: {}", e)))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_header_lines(mut self, header_lines: usize) -> Self {
        self.source.header_lines = header_lines;
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.source.delimiter = delimiter.into();
        self
    }

    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = job_name.into();
        self
    }

    pub fn with_skip_policy(mut self, skip_limit: u64) -> Self {
        self.record_errors = RecordErrorPolicy::Skip;
        self.skip_limit = skip_limit;
        self
    }

    /// Field delimiter as the single byte the tokenizer expects
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.source.delimiter.as_bytes() {
            [b] if b.is_ascii() && !matches!(b, b'"' | b'\n' | b'\r') => Ok(*b),
            _ => Err(IngestError::configuration(format!(
                "delimiter must be a single ASCII character other than a quote or newline, got '{}'",
                self.source.delimiter
            ))),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() {
            return Err(IngestError::configuration("job name cannot be empty"));
        }

        if self.chunk_size == 0 {
            return Err(IngestError::configuration("chunk size must be at least 1"));
        }

        if self.source.path.as_os_str().is_empty() {
            return Err(IngestError::configuration("source path cannot be empty"));
        }

        self.delimiter_byte()?;

        self.database.check_url()?;

        if !is_identifier(&self.database.table) {
            return Err(IngestError::configuration(format!(
                "table name '{}' is not a plain SQL identifier",
                self.database.table
            )));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::configuration(
                "database max_connections must be greater than 0",
            ));
        }

        let factor = self.transform.discount_factor;
        if !factor.is_finite() || factor <= 0.0 || factor > 1.0 {
            return Err(IngestError::configuration(format!(
                "discount factor must be in (0, 1], got {}",
                factor
            )));
        }

        Ok(())
    }
}

/// ASCII letter or underscore, then letters, digits or underscores
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        _ => false,
    }
}
