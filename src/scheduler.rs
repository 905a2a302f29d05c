//! Fixed-size pool of worker threads draining a queue of job ids.
//!
//! `structure` runs block their worker for the whole subprocess lifetime, so
//! the pool size bounds concurrent inference runs. Enqueueing never waits on
//! a worker.

use std::{
    io::Read,
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    job::{Job, JobId, Submission},
    pipeline::{Pipeline, SubmitError},
};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    Closed,
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    sender: Option<Sender<JobId>>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(pipeline: Arc<Pipeline>, workers: usize) -> Result<Self, SchedulerError> {
        let (sender, receiver) = mpsc::channel::<JobId>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let pipeline = Arc::clone(&pipeline);
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("structure-worker-{index}"))
                .spawn(move || work(&pipeline, &receiver))
                .map_err(SchedulerError::Spawn)?;
            handles.push(handle);
        }
        tracing::info!(workers = handles.len(), "scheduler started");

        Ok(Self {
            pipeline,
            sender: Some(sender),
            workers: handles,
        })
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn enqueue(&self, id: JobId) -> Result<(), SchedulerError> {
        let sender = self.sender.as_ref().ok_or(SchedulerError::Closed)?;
        sender.send(id).map_err(|_| SchedulerError::Closed)
    }

    /// Submits through the pipeline and queues the new job.
    pub fn submit<R>(
        &self,
        file_name: &str,
        data: R,
        submission: Submission,
    ) -> Result<Job, SchedulerError>
    where
        R: Read,
    {
        let job = self.pipeline.submit(file_name, data, submission)?;
        self.enqueue(job.id.clone())?;
        Ok(job)
    }

    /// Stops accepting work and waits for the queue to drain.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        tracing::info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(pipeline: &Pipeline, receiver: &Mutex<Receiver<JobId>>) {
    loop {
        let next = receiver.lock().recv();
        let Ok(id) = next else {
            break;
        };
        match pipeline.execute(&id) {
            Ok(status) => tracing::debug!(job = %id, %status, "worker done"),
            Err(err) => tracing::error!(job = %id, error = %err, "worker could not execute job"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PipelineConfig, job::JobStatus, reference::PanelRegistry, store::MemoryJobStore,
    };

    #[test]
    fn drains_queue_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig::from_home(dir.path()),
            PanelRegistry::empty(),
            Arc::new(MemoryJobStore::new()),
        ));
        let mut scheduler = Scheduler::start(Arc::clone(&pipeline), 2).unwrap();

        let jobs: Vec<Job> = (0..4)
            .map(|_| {
                scheduler
                    .submit("a.str", &b" A\nX 1\nX 2\n"[..], Submission::new("me", 1))
                    .unwrap()
            })
            .collect();
        scheduler.shutdown();

        for job in jobs {
            // no structure binary under the temp home
            assert_eq!(pipeline.job(&job.id).unwrap().status, JobStatus::Failure);
        }
        assert!(matches!(
            scheduler.enqueue(JobId::generate()),
            Err(SchedulerError::Closed)
        ));
    }
}
