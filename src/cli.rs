use std::{
    fs::File,
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    codec::{self, GenotypeFormat},
    config::{self, PipelineConfig},
    job::{Job, JobId, JobStatus, Submission},
    pipeline::Pipeline,
    qtable::AncestryTable,
    scheduler::Scheduler,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Run ancestry inference jobs through structure", long_about = None)]
struct Cli {
    /// Pipeline home holding `work/` and `resource/` (overrides ANCESTRY_PIPELINE_HOME)
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    /// Path to the structure executable (overrides ANCESTRY_PIPELINE_STRUCTURE)
    #[arg(long, global = true, value_name = "PATH")]
    structure: Option<PathBuf>,

    /// Number of concurrent structure runs when running several files
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Kill structure runs after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Logging verbosity (e.g. error, warn, info, debug)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit genotype files and run them to completion
    Run {
        /// Genotype uploads (.csv, .tsv, .txt or .str)
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Number of ancestral populations (K)
        #[arg(short = 'k', long, default_value_t = 3)]
        k: u32,

        /// Reference panel merged ahead of the uploaded samples
        #[arg(long, value_name = "NAME")]
        reference: Option<String>,

        /// Job title (generated when omitted)
        #[arg(long)]
        title: Option<String>,

        /// Name recorded as the submitter
        #[arg(long, default_value = "cli")]
        submitter: String,
    },
    /// Convert genotype files to the native two-line layout
    Convert {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Input layout; taken from each file's extension when omitted
        #[arg(long, value_enum)]
        format: Option<GenotypeFormat>,

        /// Directory receiving `<stem>.str` outputs
        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,
    },
    /// Show one job, or list recent jobs
    Status {
        #[arg(value_name = "JOB")]
        id: Option<JobId>,
    },
    /// Cancel a queued job
    Cancel {
        #[arg(value_name = "JOB")]
        id: JobId,
    },
    /// Print the ancestry table of a completed job
    Results {
        #[arg(value_name = "JOB")]
        id: JobId,

        /// Emit chart series as JSON instead of the table
        #[arg(long)]
        barplot: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let config = resolve_config(&cli);

    match cli.command {
        Command::Run {
            files,
            k,
            reference,
            title,
            submitter,
        } => {
            let pipeline = Pipeline::from_config(config)?;
            let mut submission = Submission::new(submitter, k);
            submission.title = title;
            submission.reference = reference;
            let jobs = run_jobs(pipeline, &files, &submission)?;
            for job in &jobs {
                print_job(job);
            }
            if jobs.iter().any(|job| job.status != JobStatus::Complete) {
                bail!("one or more jobs did not complete");
            }
        }
        Command::Convert {
            files,
            format,
            output_dir,
        } => {
            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("failed to create {}", output_dir.display()))?;
            let outputs = files
                .par_iter()
                .map(|input| convert_file(input, format, &output_dir))
                .collect::<Result<Vec<_>>>()?;
            for (input, output, samples) in outputs {
                println!(
                    "{} -> {} ({samples} samples)",
                    input.display(),
                    output.display()
                );
            }
        }
        Command::Status { id } => {
            let pipeline = Pipeline::from_config(config)?;
            match id {
                Some(id) => print_job(&pipeline.job(&id)?),
                None => {
                    for job in pipeline.jobs()? {
                        print_job(&job);
                    }
                }
            }
        }
        Command::Cancel { id } => {
            let pipeline = Pipeline::from_config(config)?;
            let job = pipeline.cancel(&id)?;
            print_job(&job);
        }
        Command::Results { id, barplot } => {
            let pipeline = Pipeline::from_config(config)?;
            if barplot {
                let series = pipeline.barplot(&id)?;
                serde_json::to_writer_pretty(io::stdout().lock(), &series)
                    .context("failed to write barplot")?;
                println!();
            } else {
                print_table(&pipeline.ancestry(&id)?)?;
            }
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .ok();
    Ok(())
}

fn resolve_config(cli: &Cli) -> PipelineConfig {
    let mut config = PipelineConfig::from_vars(|key| match (key, &cli.home) {
        (config::HOME_VAR, Some(home)) => Some(home.display().to_string()),
        _ => std::env::var(key).ok(),
    });
    if let Some(structure) = &cli.structure {
        config.structure_bin = structure.clone();
    }
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    if let Some(secs) = cli.timeout {
        config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    config
}

/// Submits every file; one file runs inline, several go through the worker
/// pool.
fn run_jobs(pipeline: Pipeline, files: &[PathBuf], submission: &Submission) -> Result<Vec<Job>> {
    let workers = pipeline.config().workers;
    let pipeline = Arc::new(pipeline);

    let mut submitted = Vec::with_capacity(files.len());
    if files.len() == 1 {
        let job = submit_file(&pipeline, &files[0], submission)?;
        pipeline.execute(&job.id)?;
        submitted.push(job);
    } else {
        let mut scheduler = Scheduler::start(Arc::clone(&pipeline), workers)?;
        for file in files {
            let job = submit_file(&pipeline, file, submission)?;
            scheduler.enqueue(job.id.clone())?;
            submitted.push(job);
        }
        scheduler.shutdown();
    }

    submitted
        .iter()
        .map(|job| pipeline.job(&job.id).map_err(Into::into))
        .collect()
}

fn submit_file(pipeline: &Pipeline, path: &Path, submission: &Submission) -> Result<Job> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    pipeline
        .submit(&name, file, submission.clone())
        .with_context(|| format!("failed to submit {}", path.display()))
}

fn convert_file(
    input: &Path,
    format: Option<GenotypeFormat>,
    output_dir: &Path,
) -> Result<(PathBuf, PathBuf, usize)> {
    let format = format.unwrap_or_else(|| GenotypeFormat::from_path(input));
    let file =
        File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let model = codec::parse(BufReader::new(file), format)
        .with_context(|| format!("failed to parse {} as {format}", input.display()))?;

    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("genotypes"));
    let output = output_dir.join(format!("{stem}.str"));
    let out =
        File::create(&output).with_context(|| format!("failed to create {}", output.display()))?;
    codec::write(&model, BufWriter::new(out))
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(
        input = %input.display(),
        samples = model.n_samples(),
        loci = model.n_loci(),
        "converted"
    );
    Ok((input.to_path_buf(), output, model.n_samples()))
}

fn print_job(job: &Job) {
    println!(
        "{id}  {status:<9} {title} (K={k}, reference={reference}, submitter={submitter}, updated {updated})",
        id = job.id,
        status = job.status.as_str(),
        title = job.title,
        k = job.k,
        reference = job.reference.as_deref().unwrap_or("none"),
        submitter = job.submitter,
        updated = job
            .updated_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
    );
    if job.status == JobStatus::Failure {
        println!("  log: {}", job.paths.log_file.display());
    }
}

fn print_table(table: &AncestryTable) -> Result<()> {
    if table.is_empty() {
        println!("No ancestry results (job not complete).");
        return Ok(());
    }
    table
        .write(io::stdout().lock())
        .context("failed to write ancestry table")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_run_with_defaults() {
        let cli = Cli::parse_from(["ancestry_pipeline", "run", "upload.str"]);
        match cli.command {
            Command::Run {
                files,
                k,
                reference,
                submitter,
                ..
            } => {
                assert_eq!(files, vec![PathBuf::from("upload.str")]);
                assert_eq!(k, 3);
                assert_eq!(reference, None);
                assert_eq!(submitter, "cli");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "ancestry_pipeline",
            "run",
            "a.csv",
            "b.tsv",
            "-k",
            "4",
            "--reference",
            "ancestry",
            "--home",
            "/srv/ancestry",
            "--timeout",
            "60",
        ]);
        assert_eq!(cli.home, Some(PathBuf::from("/srv/ancestry")));
        assert_eq!(cli.timeout, Some(60));
        let Command::Run { files, k, reference, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(k, 4);
        assert_eq!(reference.as_deref(), Some("ancestry"));
    }

    #[test]
    fn parses_convert_format() {
        let cli = Cli::parse_from([
            "ancestry_pipeline",
            "convert",
            "panel.txt",
            "--format",
            "comma",
            "--output-dir",
            "out",
        ]);
        let Command::Convert { format, .. } = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(format, Some(GenotypeFormat::Comma));
    }

    #[test]
    fn rejects_malformed_job_id() {
        assert!(Cli::try_parse_from(["ancestry_pipeline", "cancel", "../x"]).is_err());
        let cli = Cli::try_parse_from(["ancestry_pipeline", "results", "abc123", "--barplot"])
            .unwrap();
        assert!(matches!(cli.command, Command::Results { barplot: true, .. }));
    }

    #[test]
    fn convert_writes_native_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("panel.csv");
        std::fs::write(&input, "name,A,B\nX,12,\nY,22,11\n").unwrap();

        let (_, output, samples) = convert_file(&input, None, dir.path()).unwrap();
        assert_eq!(samples, 2);
        assert_eq!(output, dir.path().join("panel.str"));
        let text = std::fs::read_to_string(output).unwrap();
        assert!(text.starts_with(" A B\n"));
    }
}
