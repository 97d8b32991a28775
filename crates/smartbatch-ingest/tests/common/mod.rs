//! Common test utilities for smartbatch-ingest integration tests
//!
//! Each [`TestWorkspace`] owns a temporary directory holding the input file
//! and a SQLite database file, both removed when the workspace is dropped.

#![allow(dead_code)]

use anyhow::{Context, Result};
use smartbatch_common::Smartphone;
use smartbatch_ingest::IngestConfig;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tempfile::TempDir;

/// Header line of every generated input file
pub const HEADER: &str = "brand;model;operating_system;release_year;screen_size;price";

/// Temporary input file and database
pub struct TestWorkspace {
    dir: TempDir,
    pub source: PathBuf,
    pub database_url: String,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let source = dir.path().join("smartphones.csv");
        let database_url = format!("sqlite://{}", dir.path().join("batch.db").display());

        Ok(Self {
            dir,
            source,
            database_url,
        })
    }

    /// Write the header followed by `lines`
    pub fn write_source<S: AsRef<str>>(&self, lines: &[S]) -> Result<()> {
        let mut text = String::from(HEADER);
        text.push('\n');
        for line in lines {
            text.push_str(line.as_ref());
            text.push('\n');
        }
        std::fs::write(&self.source, text).context("Failed to write source file")
    }

    pub fn config(&self) -> IngestConfig {
        IngestConfig::new(&self.source, &self.database_url)
    }

    /// Separate pool for assertions, opened after the job created the file
    pub async fn pool(&self) -> Result<SqlitePool> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&self.database_url)
            .await
            .context("Failed to open test database")
    }

    pub async fn stored(&self) -> Result<Vec<Smartphone>> {
        let pool = self.pool().await?;
        let rows: Vec<(String, String, String, i32, f64, f64)> = sqlx::query_as(
            "SELECT brand, model, operating_system, release_year, screen_size, price \
             FROM smartphones ORDER BY id",
        )
        .fetch_all(&pool)
        .await?;
        pool.close().await;

        Ok(rows
            .into_iter()
            .map(
                |(brand, model, operating_system, release_year, screen_size, price)| Smartphone {
                    brand,
                    model,
                    operating_system,
                    release_year,
                    screen_size,
                    price,
                },
            )
            .collect())
    }

    pub async fn stored_models(&self) -> Result<Vec<String>> {
        Ok(self.stored().await?.into_iter().map(|p| p.model).collect())
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// `count` valid lines with models `M0..`, alternating release years around the cutoff
pub fn phone_lines(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let year = if i % 2 == 0 { 2021 } else { 2024 };
            format!("Acme;M{};OS{};{};6.{};{}.00", i, i % 3, year, i % 10, 100 + i)
        })
        .collect()
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}
