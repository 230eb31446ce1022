pub mod collect;
pub mod yaml;

use crate::naming::{JobNamer, PathLike};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("No such file or directory: '{0}'")]
    NotFound(PathBuf),
    #[error("Failed to read template {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse template")]
    Parse(#[from] serde_yaml::Error),
    #[error("Process not found in config file {0}")]
    ProcessSymbolMissing(PathBuf),
    #[error("No support for secondary file names yet, found {0}")]
    UnsupportedSecondaryInputs(usize),
    #[error("Template argument '{0}' is not of the form key=value")]
    InvalidArgument(String),
    #[error("Sink {0} is not declared by the template")]
    UnknownSink(String),
    #[error("Input collection needs at least one path")]
    EmptyCollection,
    #[error("Input collection glob is invalid")]
    InvalidGlob(#[from] globset::Error),
}

/// Reference to a file as written in a template
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct FileRef(String);

impl FileRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PathLike for FileRef {
    fn as_text(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }

    fn from_text(text: String) -> Self {
        Self(text)
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named output destinations of a template, by kind
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputSinks {
    /// sinks writing a single cumulative file, e.g. histogram services
    pub aggregating: BTreeMap<String, FileRef>,
    /// sinks writing events while processing, e.g. output modules
    pub streaming: BTreeMap<String, FileRef>,
}

impl OutputSinks {
    pub fn len(&self) -> usize {
        self.aggregating.len() + self.streaming.len()
    }

    /// copy of all sinks with the job index inserted into every file name
    pub fn renamed(&self, namer: &JobNamer, index: usize) -> Self {
        let rename = |sinks: &BTreeMap<String, FileRef>| {
            sinks
                .iter()
                .map(|(name, file)| (name.clone(), namer.insert(file, index)))
                .collect()
        };

        Self {
            aggregating: rename(&self.aggregating),
            streaming: rename(&self.streaming),
        }
    }
}

/// Scoped arguments handed to a template loader
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub args: Vec<String>,
}

impl LoadOptions {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    /// `key=value` arguments as a map, later arguments win
    pub fn substitutions(&self) -> Result<BTreeMap<String, String>, TemplateError> {
        self.args
            .iter()
            .map(|arg| match arg.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
                _ => Err(TemplateError::InvalidArgument(arg.clone())),
            })
            .collect()
    }
}

/// Read-only view on a job description that can be re-materialized per job
pub trait JobTemplate: Sync {
    /// ordered primary input files, secondary inputs are rejected
    fn input_files(&self) -> Result<Vec<FileRef>, TemplateError>;

    fn output_sinks(&self) -> OutputSinks;

    /// serialize the template as loaded
    fn dump(&self) -> Result<String, TemplateError>;

    /// serialize a copy of the template reading `inputs` and writing to `sinks`
    fn rematerialize(&self, inputs: &[FileRef], sinks: &OutputSinks)
        -> Result<String, TemplateError>;
}

pub trait TemplateLoader {
    type Template: JobTemplate;

    fn load(&self, path: &Path, options: &LoadOptions) -> Result<Self::Template, TemplateError>;
}
