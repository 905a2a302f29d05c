//! Job orchestration: submission, the execution state machine, and result
//! retrieval.
//!
//! `execute` claims a queued job by moving it to `Running`, then runs
//! parse → merge → write input → `structure` → parse report → summarise →
//! persist. Any stage failure leaves the job in `Failure`; the Q-table is only
//! ever written whole, after every earlier stage succeeded.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{
    codec::{self, GenotypeFormat},
    config::PipelineConfig,
    genotype::GenotypeModel,
    job::{Job, JobId, JobPaths, JobStatus, Submission, sanitize_file_name},
    qtable::{AncestryTable, BarSeries},
    reference::{PanelDefinition, PanelRegistry, ReferencePanel},
    report::JobReportBuilder,
    store::{DirectoryJobStore, JobStore, StoreError},
    structure::{StructureCommand, StructureRun},
};

pub const MAX_K: u32 = 50;

/// How far back job listings reach for finished jobs.
pub const LISTING_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submitter must not be empty")]
    MissingSubmitter,
    #[error("K must be between 1 and 50, got {0}")]
    InvalidK(u32),
    #[error("unknown reference panel '{0}'")]
    UnknownReference(String),
    #[error("failed to store upload in {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Pipeline {
    config: PipelineConfig,
    panels: PanelRegistry,
    store: Arc<dyn JobStore>,
    structure: StructureCommand,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, panels: PanelRegistry, store: Arc<dyn JobStore>) -> Self {
        let structure = StructureCommand::from_config(&config);
        Self {
            config,
            panels,
            store,
            structure,
        }
    }

    /// Standard setup under the configured home: the packaged panels that
    /// are present, and job records kept in the work directory.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config
            .ensure_dirs()
            .with_context(|| format!("failed to create {}", config.work_dir.display()))?;
        let panels = PanelRegistry::load_available(&config.resource_dir, &PanelDefinition::standard())
            .context("failed to load reference panels")?;
        let store = Arc::new(DirectoryJobStore::new(&config.work_dir));
        Ok(Self::new(config, panels, store))
    }

    pub fn with_structure(mut self, structure: StructureCommand) -> Self {
        self.structure = structure;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn panels(&self) -> &PanelRegistry {
        &self.panels
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validates the request, stores the upload unchanged in a fresh
    /// workspace and records a `Queued` job. The upload is not parsed here.
    pub fn submit<R>(&self, file_name: &str, mut data: R, submission: Submission) -> Result<Job, SubmitError>
    where
        R: Read,
    {
        if submission.submitter.trim().is_empty() {
            return Err(SubmitError::MissingSubmitter);
        }
        if !(1..=MAX_K).contains(&submission.k) {
            return Err(SubmitError::InvalidK(submission.k));
        }
        if let Some(name) = submission.reference.as_deref().map(str::trim)
            && !name.is_empty()
            && !self.panels.contains(name)
        {
            return Err(SubmitError::UnknownReference(name.to_string()));
        }

        let (id, workdir) = self.allocate_workspace()?;
        let paths = JobPaths::new(&workdir, &sanitize_file_name(file_name));
        let io_err = |source| SubmitError::Io {
            path: paths.data_file.clone(),
            source,
        };
        let mut file = File::create(&paths.data_file).map_err(io_err)?;
        io::copy(&mut data, &mut file).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        let job = Job::new(id, submission, paths);
        self.store.create(job.clone())?;
        tracing::info!(
            job = %job.id,
            title = %job.title,
            k = job.k,
            reference = job.reference.as_deref().unwrap_or("-"),
            "job queued"
        );
        Ok(job)
    }

    fn allocate_workspace(&self) -> Result<(JobId, PathBuf), SubmitError> {
        let work_dir = &self.config.work_dir;
        fs::create_dir_all(work_dir).map_err(|source| SubmitError::Io {
            path: work_dir.clone(),
            source,
        })?;
        loop {
            let id = JobId::generate();
            let dir = self.config.workspace(id.as_str());
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(SubmitError::Io { path: dir, source }),
            }
        }
    }

    /// Runs a queued job to `Complete` or `Failure` and returns the final
    /// status. A job that is not `Queued` is left alone and its current
    /// status returned.
    pub fn execute(&self, id: &JobId) -> Result<JobStatus, StoreError> {
        let job = match self.store.transition(id, JobStatus::Running) {
            Ok(job) => job,
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::debug!(job = %id, status = %from, "job not queued; skipping");
                return Ok(from);
            }
            Err(err) => return Err(err),
        };

        let started = Instant::now();
        tracing::info!(job = %id, k = job.k, "job running");

        let mut report = JobReportBuilder::new();
        let next = match self.run_stages(&job, &mut report) {
            Ok(()) => JobStatus::Complete,
            Err(err) => {
                tracing::error!(job = %id, "job failed: {err:#}");
                report.error = Some(format!("{err:#}"));
                JobStatus::Failure
            }
        };

        let report = report.build(&job, next, started.elapsed());
        if let Err(err) = report.write(&job.paths.report_file) {
            tracing::warn!(job = %id, error = %err, "failed to write run report");
        }
        if let Err(err) = self.store.transition(id, next) {
            tracing::error!(
                job = %id,
                status = %next,
                error = %err,
                "failed to record final status; job left running"
            );
            return Err(err);
        }
        tracing::info!(
            job = %id,
            status = %next,
            elapsed = ?started.elapsed(),
            "job finished"
        );
        Ok(next)
    }

    fn run_stages(&self, job: &Job, report: &mut JobReportBuilder) -> Result<()> {
        let paths = &job.paths;

        let format = GenotypeFormat::from_path(&paths.data_file);
        let upload = File::open(&paths.data_file)
            .with_context(|| format!("failed to open upload {}", paths.data_file.display()))?;
        let upload = codec::parse(BufReader::new(upload), format).with_context(|| {
            format!(
                "failed to parse {} as {format}",
                paths.data_file.display()
            )
        })?;

        let panel = self.reference_for(job);
        let merged = match panel {
            Some((_, panel)) => GenotypeModel::combine(panel.genotype(), &upload),
            None => upload,
        };
        report.reference = panel.map(|(name, _)| name.to_string());
        report.statistics.loci = merged.n_loci();
        report.statistics.samples = merged.n_samples();
        report.statistics.reference_samples = panel
            .map(|(_, panel)| panel.n_reference_samples())
            .unwrap_or(0);

        let input = File::create(&paths.input_file)
            .with_context(|| format!("failed to create {}", paths.input_file.display()))?;
        codec::write(&merged, BufWriter::new(input))
            .with_context(|| format!("failed to write {}", paths.input_file.display()))?;

        self.structure
            .run(&StructureRun {
                k: job.k,
                n_loci: merged.n_loci(),
                n_samples: merged.n_samples(),
                input: &paths.input_file,
                output_stem: &paths.output_stem,
                workdir: &paths.workdir,
                log: &paths.log_file,
            })
            .context("structure run failed")?;

        let output = File::open(&paths.output_file).with_context(|| {
            format!("structure produced no report at {}", paths.output_file.display())
        })?;
        let mut table = AncestryTable::parse(BufReader::new(output))
            .with_context(|| format!("failed to read {}", paths.output_file.display()))?;

        if let Some((name, panel)) = panel {
            table
                .summarise(panel.groups(), panel.ranges())
                .with_context(|| format!("failed to summarise reference panel {name}"))?;
        }
        report.statistics.ancestry_rows = table.n_samples();

        let mut tmp = NamedTempFile::new_in(&paths.workdir)
            .with_context(|| format!("failed to stage {}", paths.q_file.display()))?;
        table
            .write(BufWriter::new(&mut tmp))
            .with_context(|| format!("failed to write {}", paths.q_file.display()))?;
        tmp.persist(&paths.q_file)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to persist {}", paths.q_file.display()))?;

        Ok(())
    }

    /// The job's panel, if it names one the registry knows. An unknown name
    /// runs without a reference.
    fn reference_for<'a>(&'a self, job: &'a Job) -> Option<(&'a str, &'a ReferencePanel)> {
        let name = job.reference.as_deref()?;
        match self.panels.get(name) {
            Some(panel) => Some((name, panel)),
            None => {
                tracing::warn!(job = %job.id, panel = name, "unknown reference panel; running without reference");
                None
            }
        }
    }

    /// Moves a queued job to `Canceled`. Running and finished jobs are
    /// rejected with [`StoreError::InvalidTransition`].
    pub fn cancel(&self, id: &JobId) -> Result<Job, StoreError> {
        let job = self.store.transition(id, JobStatus::Canceled)?;
        tracing::info!(job = %id, "job canceled");
        Ok(job)
    }

    pub fn job(&self, id: &JobId) -> Result<Job, StoreError> {
        self.store.get(id)
    }

    /// Unfinished jobs plus those finished within the listing window.
    pub fn jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.store.recent(LISTING_WINDOW)
    }

    /// The persisted Q-table of a completed job; empty for any other status.
    pub fn ancestry(&self, id: &JobId) -> Result<AncestryTable> {
        let job = self.store.get(id)?;
        if job.status != JobStatus::Complete {
            return Ok(AncestryTable::new());
        }
        let file = File::open(&job.paths.q_file)
            .with_context(|| format!("failed to open {}", job.paths.q_file.display()))?;
        AncestryTable::open(BufReader::new(file))
            .with_context(|| format!("failed to read {}", job.paths.q_file.display()))
    }

    pub fn barplot(&self, id: &JobId) -> Result<Vec<BarSeries>> {
        Ok(self.ancestry(id)?.to_barplot())
    }
}
