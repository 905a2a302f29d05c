//! Structured per-job run report.
//!
//! Written as `report.json` into the job workspace once `execute` finishes,
//! whatever the outcome.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::job::{Job, JobStatus};

/// Complete report of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    /// Tool version
    pub version: String,
    /// Timestamp of run (RFC 3339)
    pub timestamp: String,

    pub job: JobInfo,
    pub status: JobStatus,

    /// Reference panel actually merged, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    pub statistics: Statistics,

    /// Wall-clock duration of the run
    pub elapsed_seconds: f64,

    /// Failure chain, present only for failed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub title: String,
    pub submitter: String,
    pub k: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub loci: usize,
    pub samples: usize,
    pub reference_samples: usize,
    pub ancestry_rows: usize,
}

impl JobReport {
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        tracing::debug!("Wrote run report to {}", path.display());
        Ok(())
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(std::io::Error::other)
    }
}

/// Collects facts while a job runs.
#[derive(Debug, Default)]
pub struct JobReportBuilder {
    pub reference: Option<String>,
    pub statistics: Statistics,
    pub error: Option<String>,
}

impl JobReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self, job: &Job, status: JobStatus, elapsed: Duration) -> JobReport {
        let now = time::OffsetDateTime::now_utc();
        let timestamp = now
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());

        JobReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp,
            job: JobInfo {
                id: job.id.to_string(),
                title: job.title.clone(),
                submitter: job.submitter.clone(),
                k: job.k,
            },
            status,
            reference: self.reference,
            statistics: self.statistics,
            elapsed_seconds: elapsed.as_secs_f64(),
            error: self.error,
        }
    }
}
