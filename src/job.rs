use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque job identifier; doubles as the workspace directory name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid job id '{0}': expected ASCII letters and digits")]
pub struct InvalidJobId(pub String);

impl FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidJobId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

/// Lifecycle of a job.
///
/// ```text
/// Queued -> Running -> Complete
///   |          \-----> Failure
///   \-> Canceled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failure,
    Canceled,
}

impl JobStatus {
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Canceled)
                | (JobStatus::Running, JobStatus::Complete)
                | (JobStatus::Running, JobStatus::Failure)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failure | JobStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failure => "failure",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefix of the stored upload; no fixed artifact name starts with it.
pub const UPLOAD_PREFIX: &str = "upload_";

/// File layout of a job workspace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPaths {
    pub workdir: PathBuf,
    /// The upload, stored unchanged as `upload_<name>`.
    pub data_file: PathBuf,
    /// Merged dataset in native layout, handed to `structure`.
    pub input_file: PathBuf,
    /// Output stem passed to `structure` with `-o`.
    pub output_stem: PathBuf,
    /// Report `structure` writes next to the stem.
    pub output_file: PathBuf,
    pub log_file: PathBuf,
    pub q_file: PathBuf,
    pub report_file: PathBuf,
}

impl JobPaths {
    pub fn new(workdir: &Path, upload_name: &str) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            data_file: workdir.join(format!("{UPLOAD_PREFIX}{upload_name}")),
            input_file: workdir.join("inputfile"),
            output_stem: workdir.join("outputfile"),
            output_file: workdir.join("outputfile_f"),
            log_file: workdir.join("logfile"),
            q_file: workdir.join("qfile"),
            report_file: workdir.join("report.json"),
        }
    }
}

/// What a user asks for when submitting a genotype file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub title: Option<String>,
    pub submitter: String,
    pub k: u32,
    pub reference: Option<String>,
}

impl Submission {
    pub fn new(submitter: impl Into<String>, k: u32) -> Self {
        Self {
            title: None,
            submitter: submitter.into(),
            k,
            reference: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub submitter: String,
    pub k: u32,
    pub reference: Option<String>,
    pub paths: JobPaths,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Job {
    /// A freshly queued job.
    pub fn new(id: JobId, submission: Submission, paths: JobPaths) -> Self {
        let now = OffsetDateTime::now_utc();
        let title = submission
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| generate_title(&id));
        let reference = submission
            .reference
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Self {
            id,
            title,
            submitter: submission.submitter,
            k: submission.k,
            reference,
            paths,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }
}

const ADJECTIVES: &[&str] = &[
    "amber", "brisk", "calm", "daring", "eager", "fuzzy", "gentle", "hardy", "icy", "jolly",
    "keen", "lively", "mellow", "nimble", "proud", "quiet", "rapid", "silent", "tidy", "witty",
];

const ANIMALS: &[&str] = &[
    "alpaca", "badger", "condor", "dingo", "egret", "ferret", "gecko", "heron", "ibex", "jackal",
    "kiwi", "lemur", "marmot", "narwhal", "ocelot", "puffin", "quokka", "raven", "stoat", "tapir",
];

/// Readable title derived from the job id, used when the submitter gives none.
pub fn generate_title(id: &JobId) -> String {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    let hash = hasher.finish() as usize;
    let adjective = ADJECTIVES[hash % ADJECTIVES.len()];
    let animal = ANIMALS[(hash / ADJECTIVES.len()) % ANIMALS.len()];
    format!("{adjective}-{animal}")
}

/// Reduces an uploaded file name to a safe single path component.
///
/// The extension survives, since it selects the genotype codec.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        String::from("data.txt")
    } else {
        cleaned.to_string()
    }
}
