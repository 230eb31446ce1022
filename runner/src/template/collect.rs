use super::{FileRef, TemplateError};
use globset::GlobBuilder;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Additional input files found by walking directories
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Collect {
    pub paths: Vec<PathBuf>,
    pub glob: String,
}

impl Collect {
    /// matching files below all paths, sorted
    pub fn files(&self) -> Result<Vec<FileRef>, TemplateError> {
        let matcher = GlobBuilder::new(&self.glob).build()?.compile_matcher();
        let (first, others) = self
            .paths
            .split_first()
            .ok_or(TemplateError::EmptyCollection)?;
        let mut builder = WalkBuilder::new(first);

        // input data is collected regardless of ignore files or hidden state
        builder.standard_filters(false);
        others.iter().for_each(|path| {
            builder.add(path);
        });

        debug!("Collecting inputs with glob: {matcher:?}");

        let files = builder
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    warn!("Failed to search for input files: {error}");
                    None
                }
            })
            .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_file()))
            .map(DirEntry::into_path)
            .filter(|path| matcher.is_match(path))
            .map(|path| path.to_string_lossy().into_owned())
            .sorted()
            .dedup()
            .map(FileRef::new)
            .collect_vec();

        debug!(count = files.len(), "Collected input files");

        Ok(files)
    }
}
