//! Durable job records.
//!
//! Status changes go through [`JobStore::transition`], which checks the
//! current status and writes the new one under a single lock. Workers claim
//! a job by moving it to `Running`; whoever loses that race sees
//! [`StoreError::InvalidTransition`].

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;

use crate::job::{Job, JobId, JobStatus};

pub const RECORD_FILE: &str = "job.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {0} already exists")]
    AlreadyExists(JobId),
    #[error("job store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt job record {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait JobStore: Send + Sync {
    fn create(&self, job: Job) -> Result<(), StoreError>;

    fn get(&self, id: &JobId) -> Result<Job, StoreError>;

    /// Moves the job to `next` if its current status allows it, refreshing
    /// `updated_at`. Returns the updated record.
    fn transition(&self, id: &JobId, next: JobStatus) -> Result<Job, StoreError>;

    /// All jobs, most recently updated first.
    fn list(&self) -> Result<Vec<Job>, StoreError>;

    /// Unfinished jobs plus jobs updated within `max_age`.
    fn recent(&self, max_age: Duration) -> Result<Vec<Job>, StoreError> {
        let cutoff = OffsetDateTime::now_utc() - max_age;
        Ok(self
            .list()?
            .into_iter()
            .filter(|job| !job.status.is_terminal() || job.updated_at >= cutoff)
            .collect())
    }
}

fn apply_transition(job: &mut Job, next: JobStatus) -> Result<(), StoreError> {
    if !job.status.can_transition_to(next) {
        return Err(StoreError::InvalidTransition {
            id: job.id.clone(),
            from: job.status,
            to: next,
        });
    }
    job.status = next;
    job.updated_at = OffsetDateTime::now_utc();
    Ok(())
}

fn newest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Job, StoreError> {
        self.jobs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn transition(&self, id: &JobId, next: JobStatus) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        apply_transition(job, next)?;
        Ok(job.clone())
    }

    fn list(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.jobs.lock().values().cloned().collect();
        newest_first(&mut jobs);
        Ok(jobs)
    }
}

/// Keeps each record as `<root>/<id>/job.json`, next to the job's artifacts.
#[derive(Debug)]
pub struct DirectoryJobStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl DirectoryJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str()).join(RECORD_FILE)
    }

    fn read(&self, id: &JobId) -> Result<Job, StoreError> {
        let path = self.record_path(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()));
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&text).map_err(|source| StoreError::Serialization { path, source })
    }

    fn write(&self, job: &Job) -> Result<(), StoreError> {
        let path = self.record_path(&job.id);
        let dir = self.root.join(job.id.as_str());
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&dir).map_err(io_err)?;
        let json = serde_json::to_vec_pretty(job).map_err(|source| StoreError::Serialization {
            path: path.clone(),
            source,
        })?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

impl JobStore for DirectoryJobStore {
    fn create(&self, job: Job) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        if self.record_path(&job.id).exists() {
            return Err(StoreError::AlreadyExists(job.id));
        }
        self.write(&job)
    }

    fn get(&self, id: &JobId) -> Result<Job, StoreError> {
        let _guard = self.lock.lock();
        self.read(id)
    }

    fn transition(&self, id: &JobId, next: JobStatus) -> Result<Job, StoreError> {
        let _guard = self.lock.lock();
        let mut job = self.read(id)?;
        apply_transition(&mut job, next)?;
        self.write(&job)?;
        Ok(job)
    }

    fn list(&self) -> Result<Vec<Job>, StoreError> {
        let _guard = self.lock.lock();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<JobId>().ok())
            else {
                continue;
            };
            match self.read(&id) {
                Ok(job) => jobs.push(job),
                Err(StoreError::NotFound(_)) => continue,
                Err(err) => {
                    tracing::warn!(job = %id, error = %err, "skipping unreadable job record");
                }
            }
        }
        newest_first(&mut jobs);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPaths, Submission};

    fn job_in(root: &Path) -> Job {
        let id = JobId::generate();
        let paths = JobPaths::new(&root.join(id.as_str()), "data.str");
        Job::new(id, Submission::new("tester", 3), paths)
    }

    fn exercise(store: &dyn JobStore, root: &Path) {
        let job = job_in(root);
        let id = job.id.clone();
        store.create(job.clone()).unwrap();
        assert!(matches!(
            store.create(job),
            Err(StoreError::AlreadyExists(_))
        ));

        assert_eq!(store.get(&id).unwrap().status, JobStatus::Queued);

        let running = store.transition(&id, JobStatus::Running).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.updated_at >= running.created_at);

        let err = store.transition(&id, JobStatus::Running).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Running,
                to: JobStatus::Running,
                ..
            }
        ));
        assert!(store.transition(&id, JobStatus::Canceled).is_err());

        store.transition(&id, JobStatus::Complete).unwrap();
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Complete);

        let unknown = JobId::generate();
        assert!(matches!(store.get(&unknown), Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.transition(&unknown, JobStatus::Running),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn memory_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&MemoryJobStore::new(), dir.path());
    }

    #[test]
    fn directory_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&DirectoryJobStore::new(dir.path()), dir.path());
    }

    #[test]
    fn directory_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        let id = job.id.clone();
        DirectoryJobStore::new(dir.path()).create(job).unwrap();

        let reopened = DirectoryJobStore::new(dir.path());
        reopened.transition(&id, JobStatus::Canceled).unwrap();
        assert_eq!(
            DirectoryJobStore::new(dir.path()).get(&id).unwrap().status,
            JobStatus::Canceled
        );
    }

    #[test]
    fn list_orders_newest_first_and_skips_strays() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryJobStore::new(dir.path());
        let first = job_in(dir.path());
        let second = job_in(dir.path());
        store.create(first.clone()).unwrap();
        store.create(second.clone()).unwrap();
        store.transition(&first.id, JobStatus::Running).unwrap();
        fs::create_dir(dir.path().join("not-a-job")).unwrap();

        let listed: Vec<JobId> = store.list().unwrap().into_iter().map(|job| job.id).collect();
        assert_eq!(listed, vec![first.id, second.id]);
    }

    #[test]
    fn recent_keeps_unfinished_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryJobStore::new();
        let queued = job_in(dir.path());
        let done = job_in(dir.path());
        store.create(queued.clone()).unwrap();
        store.create(done.clone()).unwrap();
        store.transition(&done.id, JobStatus::Canceled).unwrap();

        assert_eq!(store.recent(Duration::from_secs(3600)).unwrap().len(), 2);
        let unfinished = store.recent(Duration::ZERO).unwrap();
        assert!(unfinished.iter().any(|job| job.id == queued.id));
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(MemoryJobStore::new());
        let job = job_in(dir.path());
        let id = job.id.clone();
        store.create(job).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                std::thread::spawn(move || store.transition(&id, JobStatus::Running).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
