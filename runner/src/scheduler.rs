pub mod condor;

use crate::{
    command::CommandError,
    config::{ConfigErrors, SchedulerConfig},
};
use std::{fmt, path::Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Unexpected scheduler output: {0}")]
    UnexpectedOutput(String),
}

/// Opaque handle of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    TransferringOutput,
    Suspended,
    /// the scheduler no longer knows the job
    Unknown,
}

/// Submission side of a batch scheduler
pub trait Scheduler: Sync {
    fn submit(&self, descriptor: &Path) -> Result<JobHandle, SchedulerError>;

    fn query_status(&self, handle: &JobHandle) -> Result<JobStatus, SchedulerError>;
}

#[derive(Debug, Clone)]
pub enum Schedulers {
    Condor(condor::CondorScheduler),
}

impl Schedulers {
    pub fn load(config: &SchedulerConfig) -> Result<Self, ConfigErrors> {
        match config.name.to_lowercase().as_str() {
            "condor" | "htcondor" => Ok(Self::Condor(condor::CondorScheduler::load(config)?)),
            _ => Err(ConfigErrors::UnsupportedScheduler(config.name.clone())),
        }
    }
}

impl Scheduler for Schedulers {
    fn submit(&self, descriptor: &Path) -> Result<JobHandle, SchedulerError> {
        match self {
            Self::Condor(scheduler) => scheduler.submit(descriptor),
        }
    }

    fn query_status(&self, handle: &JobHandle) -> Result<JobStatus, SchedulerError> {
        match self {
            Self::Condor(scheduler) => scheduler.query_status(handle),
        }
    }
}
