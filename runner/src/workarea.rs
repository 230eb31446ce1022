use crate::{config::RunnerConfig, jobs::JobPaths};
use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum WorkAreaError {
    #[error("Failed to resolve the current directory")]
    CurrentDir(#[source] std::io::Error),
    #[error("Failed to remove {path}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to create {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Staging directories of a single run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkArea {
    pub root: PathBuf,
    /// config artifacts and descriptors
    pub inputs: PathBuf,
    /// reserved for the sub-jobs
    pub outputs: PathBuf,
    /// log, out and err files of the sub-jobs
    pub logs: PathBuf,
}

impl WorkArea {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inputs: root.join("ins"),
            outputs: root.join("out"),
            logs: root.join("log"),
            root,
        }
    }

    /// Remove anything at `root` and recreate an empty work area.
    /// Relative roots are resolved against the current directory since the
    /// paths end up in descriptors evaluated elsewhere.
    #[instrument(level = "info")]
    pub fn reset(root: &Path) -> Result<Self, WorkAreaError> {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            env::current_dir()
                .map_err(WorkAreaError::CurrentDir)?
                .join(root)
        };

        let removed = match fs::symlink_metadata(&root) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&root),
            Ok(_) => fs::remove_file(&root),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        };

        if let Err(source) = removed {
            return Err(WorkAreaError::Remove { path: root, source });
        }

        let area = Self::new(root);

        for dir in [&area.root, &area.inputs, &area.outputs, &area.logs] {
            debug!("Creating {}", dir.display());
            fs::create_dir_all(dir).map_err(|source| WorkAreaError::Create {
                path: dir.clone(),
                source,
            })?;
        }

        info!("Work area ready at {}", area.root.display());

        Ok(area)
    }
}

/// Every path a run writes, derived from the work area and the template name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    /// unindexed base paths, the job set inserts the job index
    pub base: JobPaths,
    pub script: PathBuf,
    pub archive: PathBuf,
    pub receipt: PathBuf,
}

impl ArtifactLayout {
    pub fn new(area: &WorkArea, config: &RunnerConfig, template: &Path) -> Self {
        let stem = template
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = run_name(&stem);
        let names = &config.names;

        Self {
            base: JobPaths {
                config: area.inputs.join(format!("{name}_dump.yaml")),
                log: area.logs.join(&names.log),
                out: area.logs.join(&names.out),
                err: area.logs.join(&names.err),
                descriptor: area.inputs.join(&names.descriptor),
            },
            script: area.root.join(format!("{name}.sh")),
            archive: area.root.join(&config.archive),
            receipt: area.inputs.join(format!("{stem}_receipt.json")),
        }
    }
}

/// template stem without a trailing `_cfg`
pub fn run_name(stem: &str) -> &str {
    match stem.strip_suffix("_cfg") {
        Some(name) if !name.is_empty() => name,
        _ => stem,
    }
}
