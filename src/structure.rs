//! Invocation of the external `structure` program.

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::config::PipelineConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ExternalProcessError {
    #[error("failed to launch {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open log file {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("structure exited with {}", describe_exit(*code))]
    Exit { code: Option<i32> },
    #[error("structure did not finish within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("failed waiting for structure: {0}")]
    Wait(#[source] io::Error),
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => String::from("a signal"),
    }
}

/// Parameters of one run over a prepared input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureRun<'a> {
    pub k: u32,
    pub n_loci: usize,
    pub n_samples: usize,
    pub input: &'a Path,
    pub output_stem: &'a Path,
    pub workdir: &'a Path,
    pub log: &'a Path,
}

#[derive(Debug, Clone)]
pub struct StructureCommand {
    program: PathBuf,
    mainparams: PathBuf,
    extraparams: PathBuf,
    timeout: Option<Duration>,
}

impl StructureCommand {
    pub fn new(
        program: impl Into<PathBuf>,
        mainparams: impl Into<PathBuf>,
        extraparams: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            mainparams: mainparams.into(),
            extraparams: extraparams.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            &config.structure_bin,
            &config.mainparams,
            &config.extraparams,
        )
        .with_timeout(config.timeout)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self, run: &StructureRun<'_>) -> Vec<String> {
        vec![
            String::from("-m"),
            self.mainparams.display().to_string(),
            String::from("-e"),
            self.extraparams.display().to_string(),
            String::from("-K"),
            run.k.to_string(),
            String::from("-L"),
            run.n_loci.to_string(),
            String::from("-N"),
            run.n_samples.to_string(),
            String::from("-i"),
            run.input.display().to_string(),
            String::from("-o"),
            run.output_stem.display().to_string(),
        ]
    }

    /// Runs the program to completion with stdout and stderr appended to the
    /// run's log file. Only a zero exit status is success.
    pub fn run(&self, run: &StructureRun<'_>) -> Result<(), ExternalProcessError> {
        let log_err = |source| ExternalProcessError::Log {
            path: run.log.to_path_buf(),
            source,
        };
        let stdout = File::create(run.log).map_err(log_err)?;
        let stderr = stdout.try_clone().map_err(log_err)?;

        tracing::info!(
            program = %self.program.display(),
            k = run.k,
            loci = run.n_loci,
            samples = run.n_samples,
            "launching structure"
        );

        let mut child = Command::new(&self.program)
            .args(self.args(run))
            .current_dir(run.workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|source| ExternalProcessError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let status = match self.timeout {
            None => child.wait().map_err(ExternalProcessError::Wait)?,
            Some(timeout) => wait_with_timeout(&mut child, timeout)?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(ExternalProcessError::Exit {
                code: status.code(),
            })
        }
    }
}

fn wait_with_timeout(
    child: &mut std::process::Child,
    timeout: Duration,
) -> Result<ExitStatus, ExternalProcessError> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(ExternalProcessError::Wait)? {
            return Ok(status);
        }
        if started.elapsed() >= timeout {
            tracing::warn!(?timeout, "structure timed out; killing");
            if let Err(err) = child.kill() {
                tracing::warn!(pid = child.id(), error = %err, "failed to kill structure");
            }
            if let Err(err) = child.wait() {
                tracing::warn!(pid = child.id(), error = %err, "failed to reap structure");
            }
            return Err(ExternalProcessError::Timeout { timeout });
        }
        thread::sleep(POLL_INTERVAL);
    }
}
