use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env, fs, io::ErrorKind, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Config file {0} not found")]
    FileNotFound(PathBuf),
    #[error("Failed to read config file")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config file")]
    Parse(#[from] serde_yaml::Error),
    #[error("Environment variable {0} is not set, is the runtime environment set up?")]
    MissingEnvironment(String),
    #[error("Scheduler {0} not supported")]
    UnsupportedScheduler(String),
    #[error("Invalid scheduler parameter {0}")]
    InvalidParameter(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    // root of the staging area, relative paths are resolved against the working directory
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    // file name of the runtime archive inside the work dir
    #[serde(default = "default_archive")]
    pub archive: String,
    #[serde(default)]
    pub names: NameConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub package: PackageConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    // worker threads for building and submitting jobs, rayon picks if unset
    pub threads: Option<usize>,
}

/// Base names of the per-job files, each one gets the job index inserted
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NameConfig {
    #[serde(default = "default_descriptor")]
    pub descriptor: String,
    #[serde(default = "default_log")]
    pub log: String,
    #[serde(default = "default_out")]
    pub out: String,
    #[serde(default = "default_err")]
    pub err: String,
}

/// Names of the variables describing the runtime the jobs execute in
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    #[serde(default = "default_base_variable")]
    pub base: String,
    #[serde(default = "default_version_variable")]
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
    // sub-directories of the runtime base put into the archive, missing ones are skipped
    #[serde(default = "default_package_dirs")]
    pub dirs: Vec<String>,
    // seconds
    #[serde(default = "default_package_timeout")]
    pub timeout: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // command the wrapper script runs on the job config
    #[serde(default = "default_command")]
    pub command: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    // Name of the selected scheduler, see Schedulers::load for the selection proccess
    #[serde(default = "default_scheduler")]
    pub name: String,
    // scheduler specific parameters
    #[serde(default)]
    pub parameter: BTreeMap<String, serde_yaml::Value>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            archive: default_archive(),
            names: NameConfig::default(),
            environment: EnvironmentConfig::default(),
            package: PackageConfig::default(),
            executor: ExecutorConfig::default(),
            scheduler: SchedulerConfig::default(),
            threads: None,
        }
    }
}

impl Default for NameConfig {
    fn default() -> Self {
        Self {
            descriptor: default_descriptor(),
            log: default_log(),
            out: default_out(),
            err: default_err(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            base: default_base_variable(),
            version: default_version_variable(),
        }
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            dirs: default_package_dirs(),
            timeout: default_package_timeout(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: default_scheduler(),
            parameter: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    /// read a config file, or the defaults without one
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigErrors> {
        let Some(path) = path else {
            debug!("No config file given, using defaults");
            return Ok(Self::default());
        };

        let text = fs::read_to_string(path).map_err(|error| match error.kind() {
            ErrorKind::NotFound => ConfigErrors::FileNotFound(path.to_path_buf()),
            _ => ConfigErrors::Read(error),
        })?;
        let config: Self = serde_yaml::from_str(&text)?;

        config.preflight_checks()?;

        Ok(config)
    }

    /// collect all problems instead of piece-by-piece to make debugging easier for users
    pub fn preflight_checks(&self) -> Result<(), ConfigErrors> {
        let mut problems = Vec::new();

        if self.archive.is_empty() || self.archive.contains('/') {
            problems.push(format!("archive '{}' must be a plain file name", self.archive));
        }

        for (key, name) in [
            ("descriptor", &self.names.descriptor),
            ("log", &self.names.log),
            ("out", &self.names.out),
            ("err", &self.names.err),
        ] {
            if name.is_empty() || name.contains('/') {
                problems.push(format!("names.{key} '{name}' must be a plain file name"));
            }
        }

        if self.package.dirs.is_empty() {
            problems.push("package.dirs must name at least one directory".to_owned());
        }

        if self.executor.command.trim().is_empty() {
            problems.push("executor.command cannot be empty".to_owned());
        }

        if self.threads == Some(0) {
            problems.push("threads cannot be 0".to_owned());
        }

        for problem in problems.iter() {
            error!("{problem}");
        }

        match problems.into_iter().next() {
            Some(first) => Err(ConfigErrors::Invalid(first)),
            None => Ok(()),
        }
    }
}

/// Location and version of the runtime the jobs execute in
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    pub base: PathBuf,
    pub version: String,
}

impl RuntimeEnvironment {
    pub fn from_env(config: &EnvironmentConfig) -> Result<Self, ConfigErrors> {
        Self::from_lookup(config, |name| env::var(name).ok())
    }

    pub fn from_lookup<F>(config: &EnvironmentConfig, lookup: F) -> Result<Self, ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ConfigErrors::MissingEnvironment(name.to_owned()))
        };

        Ok(Self {
            base: PathBuf::from(read(&config.base)?),
            version: read(&config.version)?,
        })
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_archive() -> String {
    "runtimepod.tgz".into()
}

fn default_descriptor() -> String {
    "condor.card".into()
}

fn default_log() -> String {
    "job.log".into()
}

fn default_out() -> String {
    "out.txt".into()
}

fn default_err() -> String {
    "err.txt".into()
}

fn default_base_variable() -> String {
    "CMSSW_BASE".into()
}

fn default_version_variable() -> String {
    "CMSSW_VERSION".into()
}

fn default_package_dirs() -> Vec<String> {
    ["bin", "lib", "python", "data"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_package_timeout() -> u64 {
    600
}

fn default_command() -> String {
    "cmsRun".into()
}

fn default_scheduler() -> String {
    "condor".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        assert_eq!(RunnerConfig::load(None).unwrap(), RunnerConfig::default());
    }

    #[test]
    fn partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kuntur.yaml");
        fs::write(
            &path,
            "work_dir: /scratch/work\nnames:\n  descriptor: job.sub\nscheduler:\n  name: condor\n  parameter:\n    timeout: 30\n",
        )
        .unwrap();

        let config = RunnerConfig::load(Some(&path)).unwrap();

        assert_eq!(config.work_dir, PathBuf::from("/scratch/work"));
        assert_eq!(config.names.descriptor, "job.sub");
        assert_eq!(config.names.log, "job.log");
        assert_eq!(config.scheduler.parameter["timeout"].as_u64(), Some(30));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kuntur.yaml");
        fs::write(&path, "workdir: typo\n").unwrap();

        assert!(matches!(
            RunnerConfig::load(Some(&path)),
            Err(ConfigErrors::Parse(_))
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            RunnerConfig::load(Some(Path::new("/nonexistent/kuntur.yaml"))),
            Err(ConfigErrors::FileNotFound(_))
        ));
    }

    #[test]
    fn nested_names_are_invalid() {
        let mut config = RunnerConfig::default();
        config.names.log = "logs/job.log".into();

        assert!(matches!(
            config.preflight_checks(),
            Err(ConfigErrors::Invalid(_))
        ));
    }

    #[test]
    fn environment_lookup() {
        let config = EnvironmentConfig::default();
        let runtime = RuntimeEnvironment::from_lookup(&config, |name| match name {
            "CMSSW_BASE" => Some("/sw/CMSSW_12_4_0".into()),
            "CMSSW_VERSION" => Some("CMSSW_12_4_0".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(runtime.base, PathBuf::from("/sw/CMSSW_12_4_0"));
        assert_eq!(runtime.version, "CMSSW_12_4_0");
    }

    #[test]
    fn environment_missing() {
        let config = EnvironmentConfig::default();
        let result = RuntimeEnvironment::from_lookup(&config, |name| match name {
            "CMSSW_BASE" => Some("/sw".into()),
            _ => None,
        });

        assert!(matches!(
            result,
            Err(ConfigErrors::MissingEnvironment(name)) if name == "CMSSW_VERSION"
        ));
    }
}
