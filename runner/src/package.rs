use crate::{
    command::{self, CommandError},
    config::PackageConfig,
};
use itertools::Itertools;
use std::{
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum PackagingError {
    #[error("Runtime base {0} is not a directory")]
    MissingBase(PathBuf),
    #[error("None of {dirs:?} exist below {base}")]
    NothingToPack { base: PathBuf, dirs: Vec<String> },
    #[error("Failed to write executor script {path}")]
    Script {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to create archive")]
    Archive(#[from] CommandError),
}

/// Bundles the runtime environment into a single blob
pub trait Packager {
    /// pack `base` into `destination`, returning the path of the blob
    fn package(&self, base: &Path, destination: &Path) -> Result<PathBuf, PackagingError>;
}

/// Packs the configured sub-directories of the runtime base with `tar`
#[derive(Debug, Clone)]
pub struct TarPackager {
    dirs: Vec<String>,
    timeout: Duration,
}

impl TarPackager {
    pub fn load(config: &PackageConfig) -> Self {
        Self {
            dirs: config.dirs.clone(),
            timeout: Duration::from_secs(config.timeout),
        }
    }

    /// configured directories that exist below `base`
    pub fn existing_dirs(&self, base: &Path) -> Vec<String> {
        self.dirs
            .iter()
            .filter(|dir| base.join(dir).exists())
            .cloned()
            .collect_vec()
    }
}

impl Packager for TarPackager {
    #[instrument(skip(self), level = "info")]
    fn package(&self, base: &Path, destination: &Path) -> Result<PathBuf, PackagingError> {
        if !base.is_dir() {
            return Err(PackagingError::MissingBase(base.to_path_buf()));
        }

        let dirs = self.existing_dirs(base);

        if dirs.is_empty() {
            return Err(PackagingError::NothingToPack {
                base: base.to_path_buf(),
                dirs: self.dirs.clone(),
            });
        }

        if dirs.len() < self.dirs.len() {
            warn!("Only packing {dirs:?} of {:?}", self.dirs);
        }

        info!("Creating runtime archive {}", destination.display());
        command::run(
            Command::new("tar")
                .arg("czf")
                .arg(destination)
                .arg(format!("--directory={}", base.display()))
                .args(&dirs),
            self.timeout,
        )?;

        Ok(destination.to_path_buf())
    }
}
