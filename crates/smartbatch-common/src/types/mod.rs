//! Domain types shared across smartbatch crates

use crate::error::CommonError;
use serde::{Deserialize, Serialize};

/// One smartphone row, the unit of work of the ingestion pipeline.
///
/// Built from a single source line, adjusted by the price rule, then written
/// once and dropped together with its chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Smartphone {
    pub brand: String,
    pub model: String,
    pub operating_system: String,
    pub release_year: i32,
    /// Diagonal in inches
    pub screen_size: f64,
    pub price: f64,
}

impl std::fmt::Display for Smartphone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} / {} / {} / {} / {} / {}",
            self.brand,
            self.model,
            self.operating_system,
            self.release_year,
            self.screen_size,
            self.price
        )
    }
}

// ============================================================================
// Run Tracking
// ============================================================================

/// Lifecycle status of a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
    /// A stop was requested and honoured at a chunk boundary
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "STARTED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Started)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STARTED" => Ok(RunStatus::Started),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "STOPPED" => Ok(RunStatus::Stopped),
            _ => Err(CommonError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated while a run executes its single step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    /// Records pulled from the source, skipped ones included
    pub read_count: u64,
    /// Records durably committed to the destination
    pub write_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub skip_count: u64,
}

impl std::fmt::Display for StepStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "read={} written={} commits={} rollbacks={} skipped={}",
            self.read_count,
            self.write_count,
            self.commit_count,
            self.rollback_count,
            self.skip_count
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_parsing_is_case_insensitive() {
        assert_eq!("completed".parse::<RunStatus>().unwrap(), RunStatus::Completed);
        assert_eq!("STOPPED".parse::<RunStatus>().unwrap(), RunStatus::Stopped);
        assert!(matches!(
            "UNKNOWN".parse::<RunStatus>(),
            Err(CommonError::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Started.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Completed.is_success());
        assert!(!RunStatus::Stopped.is_success());
    }

    #[test]
    fn test_run_status_serializes_uppercase() {
        let json = serde_json::to_string(&RunStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
    }

    #[test]
    fn test_smartphone_display() {
        let phone = Smartphone {
            brand: "Acme".to_string(),
            model: "X1".to_string(),
            operating_system: "OS1".to_string(),
            release_year: 2022,
            screen_size: 6.1,
            price: 90.0,
        };
        assert_eq!(phone.to_string(), "Acme / X1 / OS1 / 2022 / 6.1 / 90");
    }

    #[test]
    fn test_step_stats_display() {
        let stats = StepStats {
            read_count: 3,
            write_count: 2,
            commit_count: 1,
            rollback_count: 1,
            skip_count: 0,
        };
        assert_eq!(
            stats.to_string(),
            "read=3 written=2 commits=1 rollbacks=1 skipped=0"
        );
    }
}
