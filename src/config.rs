use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

pub const HOME_VAR: &str = "ANCESTRY_PIPELINE_HOME";
pub const WORKERS_VAR: &str = "ANCESTRY_PIPELINE_WORKERS";
pub const STRUCTURE_VAR: &str = "ANCESTRY_PIPELINE_STRUCTURE";
pub const TIMEOUT_VAR: &str = "ANCESTRY_PIPELINE_TIMEOUT_SECS";

pub const DEFAULT_WORKERS: usize = 4;

/// Filesystem layout and runtime knobs shared by the pipeline and workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub home: PathBuf,
    /// Parent of every job workspace.
    pub work_dir: PathBuf,
    /// Packaged reference panels and parameter files.
    pub resource_dir: PathBuf,
    pub mainparams: PathBuf,
    pub extraparams: PathBuf,
    pub structure_bin: PathBuf,
    pub workers: usize,
    /// Upper bound on one `structure` run; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl PipelineConfig {
    pub fn from_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let resource_dir = home.join("resource");
        Self {
            work_dir: home.join("work"),
            mainparams: resource_dir.join("mainparams"),
            extraparams: resource_dir.join("extraparams"),
            structure_bin: resource_dir.join("structure_src").join("structure"),
            resource_dir,
            home,
            workers: DEFAULT_WORKERS,
            timeout: None,
        }
    }

    /// Reads the `ANCESTRY_PIPELINE_*` variables. The home defaults to the
    /// current directory; unparsable numbers fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup(HOME_VAR)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut config = Self::from_home(home);

        if let Some(bin) = lookup(STRUCTURE_VAR).filter(|value| !value.trim().is_empty()) {
            config.structure_bin = PathBuf::from(bin);
        }
        if let Some(raw) = lookup(WORKERS_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(workers) if workers > 0 => config.workers = workers,
                _ => tracing::warn!(value = %raw, "ignoring invalid {WORKERS_VAR}"),
            }
        }
        if let Some(raw) = lookup(TIMEOUT_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.timeout = None,
                Ok(secs) => config.timeout = Some(Duration::from_secs(secs)),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid {TIMEOUT_VAR}"),
            }
        }
        config
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_structure_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.structure_bin = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workspace(&self, id: &str) -> PathBuf {
        self.work_dir.join(id)
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.work_dir)
    }

    pub fn resource(&self, name: impl AsRef<Path>) -> PathBuf {
        self.resource_dir.join(name)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_home(".")
    }
}
