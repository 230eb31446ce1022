use super::{JobHandle, JobStatus, Scheduler, SchedulerError};
use crate::{
    command,
    config::{ConfigErrors, SchedulerConfig},
};
use std::{path::Path, process::Command, time::Duration};
use tracing::{debug, error, info};

/// Submits cards with `condor_submit` and queries them with `condor_q`
#[derive(Debug, Clone)]
pub struct CondorScheduler {
    pub submit: String,
    pub query: String,
    pub timeout: Duration,
}

impl CondorScheduler {
    pub fn load(config: &SchedulerConfig) -> Result<Self, ConfigErrors> {
        let string = |key: &str, default: &str| match config.parameter.get(key) {
            Some(value) => match value.as_str() {
                Some(value) => Ok(value.to_owned()),
                None => {
                    error!("scheduler.parameter.{key} must be a string");
                    Err(ConfigErrors::InvalidParameter(key.to_owned()))
                }
            },
            None => Ok(default.to_owned()),
        };

        let timeout = match config.parameter.get("timeout") {
            Some(value) => match value.as_u64() {
                Some(seconds) => Duration::from_secs(seconds),
                None => {
                    error!("scheduler.parameter.timeout must be a natural number of seconds");
                    return Err(ConfigErrors::InvalidParameter("timeout".into()));
                }
            },
            None => Duration::from_secs(60),
        };

        Ok(Self {
            submit: string("submit", "condor_submit")?,
            query: string("query", "condor_q")?,
            timeout,
        })
    }
}

impl Scheduler for CondorScheduler {
    fn submit(&self, descriptor: &Path) -> Result<JobHandle, SchedulerError> {
        let output = command::run(Command::new(&self.submit).arg(descriptor), self.timeout)?;

        match parse_cluster(&output.stdout) {
            Some(cluster) => {
                info!("Submitted {} as cluster {cluster}", descriptor.display());

                Ok(JobHandle(cluster.to_string()))
            }
            None => Err(SchedulerError::UnexpectedOutput(output.stdout)),
        }
    }

    fn query_status(&self, handle: &JobHandle) -> Result<JobStatus, SchedulerError> {
        let output = command::run(
            Command::new(&self.query).args([handle.0.as_str(), "-af", "JobStatus"]),
            self.timeout,
        )?;

        debug!(handle = %handle, output = output.stdout.trim(), "Queried job status");

        parse_status(&output.stdout)
    }
}

/// cluster id from "N job(s) submitted to cluster C."
fn parse_cluster(stdout: &str) -> Option<u64> {
    let (_, rest) = stdout.split_once("submitted to cluster")?;

    rest.split_whitespace()
        .next()?
        .trim_end_matches('.')
        .parse()
        .ok()
}

/// numeric `JobStatus` of the first job in the cluster
fn parse_status(stdout: &str) -> Result<JobStatus, SchedulerError> {
    let Some(line) = stdout.lines().map(str::trim).find(|line| !line.is_empty()) else {
        return Ok(JobStatus::Unknown);
    };

    match line.parse::<u8>() {
        Ok(1) => Ok(JobStatus::Idle),
        Ok(2) => Ok(JobStatus::Running),
        Ok(3) => Ok(JobStatus::Removed),
        Ok(4) => Ok(JobStatus::Completed),
        Ok(5) => Ok(JobStatus::Held),
        Ok(6) => Ok(JobStatus::TransferringOutput),
        Ok(7) => Ok(JobStatus::Suspended),
        _ => Err(SchedulerError::UnexpectedOutput(line.to_owned())),
    }
}
