//! Chunk writer
//!
//! The sink never opens or commits a transaction itself: the engine hands it
//! the chunk's transaction so that the rows and the run's progress counters
//! land atomically.

use crate::config::is_identifier;
use crate::engine::Chunk;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use tracing::debug;

/// SQLite caps bound parameters per statement; 6 columns x 150 rows stays well under it.
pub const MAX_ROWS_PER_STATEMENT: usize = 150;

/// Persists one chunk inside a caller-owned transaction
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert every record of `chunk`, returning the number of rows written
    async fn write(&self, tx: &mut Transaction<'_, Sqlite>, chunk: &Chunk) -> Result<u64>;
}

/// Inserts smartphones into a table with the six record columns
#[derive(Debug, Clone)]
pub struct SqliteSink {
    table: String,
}

impl SqliteSink {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(IngestError::configuration(format!(
                "table name '{}' is not a plain SQL identifier",
                table
            )));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn write(&self, tx: &mut Transaction<'_, Sqlite>, chunk: &Chunk) -> Result<u64> {
        let mut written = 0;

        for rows in chunk.records.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} (brand, model, operating_system, release_year, screen_size, price) ",
                self.table
            ));

            query_builder.push_values(rows, |mut b, phone| {
                b.push_bind(phone.brand.as_str())
                    .push_bind(phone.model.as_str())
                    .push_bind(phone.operating_system.as_str())
                    .push_bind(phone.release_year)
                    .push_bind(phone.screen_size)
                    .push_bind(phone.price);
            });

            let result = query_builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(|source| IngestError::Write {
                    chunk: chunk.number,
                    source,
                })?;
            written += result.rows_affected();
        }

        debug!(chunk = chunk.number, table = %self.table, rows = written, "Chunk rows inserted");
        Ok(written)
    }
}
