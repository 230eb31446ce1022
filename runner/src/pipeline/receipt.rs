use crate::{config::RuntimeEnvironment, jobs::JobSet};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ReceiptError {
    #[error("Failed to serialize receipt")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write receipt {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Machine readable summary of the generated jobs
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub runtime_version: String,
    pub runtime_base: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_host: Option<String>,
    pub job_count: usize,
    pub jobs: BTreeMap<usize, JobReceipt>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobReceipt {
    pub config_path: PathBuf,
    pub input_file_count: usize,
    pub descriptor_path: PathBuf,
}

impl Receipt {
    pub fn new(runtime: &RuntimeEnvironment, jobs: &JobSet) -> Self {
        Self {
            runtime_version: runtime.version.clone(),
            runtime_base: runtime.base.clone(),
            submit_host: hostname(),
            job_count: jobs.len(),
            jobs: jobs
                .jobs()
                .iter()
                .map(|job| {
                    (
                        job.index,
                        JobReceipt {
                            config_path: job.paths.config.clone(),
                            input_file_count: job.inputs.len(),
                            descriptor_path: job.paths.descriptor.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), ReceiptError> {
        let text = serde_json::to_string_pretty(self)?;

        fs::write(path, text).map_err(|source| ReceiptError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved receipt to {}", path.display());

        Ok(())
    }
}

fn hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname.into_string().ok(),
        Err(error) => {
            warn!(error = ?error, "Failed to retrieve hostname for the receipt");
            None
        }
    }
}
