#![doc = include_str!("../README.md")]

pub mod cli;
pub mod codec;
pub mod config;
pub mod genotype;
pub mod job;
pub mod pipeline;
pub mod qtable;
pub mod reference;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod structure;

pub use codec::GenotypeFormat;
pub use config::PipelineConfig;
pub use genotype::{AllelePair, GenotypeModel};
pub use job::{Job, JobId, JobStatus, Submission};
pub use pipeline::Pipeline;
pub use qtable::AncestryTable;
pub use reference::{PanelDefinition, PanelRegistry, ReferencePanel};
pub use scheduler::Scheduler;
pub use store::{DirectoryJobStore, JobStore, MemoryJobStore};
