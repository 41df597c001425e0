//! Results of a test run
//!
//! Collects one record per executed test instance plus every pairing that
//! expansion dropped, and writes them as `report.json` into the result
//! directory.

use super::error::Result;
use super::suite::DroppedPairing;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the written report
pub const REPORT_FILE_NAME: &str = "report.json";

/// Outcome of one test instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    /// All checks passed
    Passed,
    /// A check failed
    Failed,
    /// The test could not be carried out
    Error,
    /// The test chose not to run
    Skipped,
}

/// Result of one test instance
#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    /// `class.name[targets]`
    pub id: String,
    /// Test class
    pub class_name: String,
    /// Test name
    pub name: String,
    /// Targets the instance ran on
    pub targets: Vec<String>,
    /// Outcome
    pub outcome: TestOutcome,
    /// Failure, error or skip message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Wall time of set-up, run and tear-down
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Passed instances
    pub passed: usize,
    /// Failed instances
    pub failed: usize,
    /// Instances that errored
    pub errors: usize,
    /// Skipped instances
    pub skipped: usize,
    /// Pairings that never ran
    pub dropped: usize,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Start of the run
    pub started: DateTime<Utc>,
    /// End of the run, once finished
    pub finished: Option<DateTime<Utc>>,
    /// Seed of the test order
    pub seed: u64,
    /// One record per executed instance, in execution order
    pub results: Vec<TestRecord>,
    /// Pairings that did not run
    pub dropped: Vec<DroppedPairing>,
}

impl RunReport {
    /// Start a report now
    pub fn new(seed: u64, dropped: Vec<DroppedPairing>) -> Self {
        Self {
            started: Utc::now(),
            finished: None,
            seed,
            results: Vec::new(),
            dropped,
        }
    }

    /// Append a record
    pub fn record(&mut self, record: TestRecord) {
        self.results.push(record);
    }

    /// Mark the run as finished
    pub fn finish(&mut self) {
        self.finished = Some(Utc::now());
    }

    /// Counts per outcome
    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            dropped: self.dropped.len(),
            ..Summary::default()
        };
        for record in &self.results {
            match record.outcome {
                TestOutcome::Passed => summary.passed += 1,
                TestOutcome::Failed => summary.failed += 1,
                TestOutcome::Error => summary.errors += 1,
                TestOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// False iff any test failed or errored
    pub fn was_successful(&self) -> bool {
        !self
            .results
            .iter()
            .any(|r| matches!(r.outcome, TestOutcome::Failed | TestOutcome::Error))
    }

    /// Write `report.json` into `dir`
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE_NAME);
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
