pub mod receipt;

use crate::{
    config::{RunnerConfig, RuntimeEnvironment},
    descriptor::{self, JobFlavour, SchedulingOptions},
    jobs::{self, BuildError, JobSet},
    package::{Packager, PackagingError},
    partition::PartitionError,
    scheduler::{JobHandle, Scheduler, SchedulerError},
    template::{LoadOptions, TemplateError, TemplateLoader},
    workarea::{ArtifactLayout, WorkArea, WorkAreaError},
};
use parking_lot::FairMutex;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use receipt::{Receipt, ReceiptError};
use std::{
    fmt, fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Steps of a run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Init,
    Prepared,
    TemplateLoaded,
    Packaged,
    Split,
    DescriptorsWritten,
    Submitted,
    DryRunComplete,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug)]
#[error("job {index}: {error}")]
pub struct SubmissionFailure {
    pub index: usize,
    pub error: SchedulerError,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    ConfigNotFound(TemplateError),
    #[error("{0}")]
    ProcessSymbolMissing(TemplateError),
    #[error("{0}")]
    UnsupportedSecondaryInputs(TemplateError),
    #[error("Cannot split {items} files on {groups} jobs")]
    InsufficientItems { items: usize, groups: usize },
    #[error("Invalid job template: {0}")]
    Template(#[source] TemplateError),
    #[error("Failed to build jobs: {0}")]
    Build(String),
    #[error("Failed to reset work area: {0}")]
    WorkAreaReset(#[from] WorkAreaError),
    #[error("Failed to package runtime: {0}")]
    Packaging(#[from] PackagingError),
    #[error("Failed to write {path}: {source}")]
    DescriptorWrite {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write receipt: {0}")]
    ReceiptWrite(#[from] ReceiptError),
    #[error("Jobs {failed:?} failed to submit, {} submitted", .succeeded.len())]
    Submission {
        failed: Vec<usize>,
        succeeded: Vec<(usize, JobHandle)>,
        failures: Vec<SubmissionFailure>,
    },
}

impl PipelineError {
    /// kind of the error as reported to users
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "ConfigNotFoundError",
            Self::ProcessSymbolMissing(_) => "ProcessSymbolMissingError",
            Self::UnsupportedSecondaryInputs(_) => "UnsupportedSecondaryInputsError",
            Self::InsufficientItems { .. } => "InsufficientItemsError",
            Self::Template(_) => "TemplateError",
            Self::Build(_) => "BuildError",
            Self::WorkAreaReset(_) => "WorkAreaResetError",
            Self::Packaging(_) => "PackagingError",
            Self::DescriptorWrite { .. } => "DescriptorWriteError",
            Self::ReceiptWrite(_) => "ReceiptWriteError",
            Self::Submission { .. } => "SubmissionError",
        }
    }

    /// component the error originated from
    pub fn component(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_)
            | Self::ProcessSymbolMissing(_)
            | Self::UnsupportedSecondaryInputs(_)
            | Self::Template(_) => "job template",
            Self::InsufficientItems { .. } => "partitioner",
            Self::Build(_) => "job set builder",
            Self::WorkAreaReset(_) => "work area",
            Self::Packaging(_) => "packager",
            Self::DescriptorWrite { .. } | Self::ReceiptWrite(_) => "descriptor writer",
            Self::Submission { .. } => "scheduler",
        }
    }
}

impl From<TemplateError> for PipelineError {
    fn from(error: TemplateError) -> Self {
        match error {
            TemplateError::NotFound(_) => Self::ConfigNotFound(error),
            TemplateError::ProcessSymbolMissing(_) => Self::ProcessSymbolMissing(error),
            TemplateError::UnsupportedSecondaryInputs(_) => Self::UnsupportedSecondaryInputs(error),
            error => Self::Template(error),
        }
    }
}

impl From<BuildError> for PipelineError {
    fn from(error: BuildError) -> Self {
        match error {
            BuildError::Template(error) => error.into(),
            BuildError::Partition(PartitionError::InsufficientItems { items, groups }) => {
                Self::InsufficientItems { items, groups }
            }
            error => Self::Build(error.to_string()),
        }
    }
}

/// A failed run: the last state reached and the error that stopped it
#[derive(Error, Debug)]
#[error("pipeline failed after reaching {reached} in {}: {error}", .error.component())]
pub struct RunFailure {
    pub reached: State,
    pub error: PipelineError,
}

/// What to run, as requested on the command line
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub template: PathBuf,
    pub options: LoadOptions,
    pub jobs: usize,
    pub flavour: Option<JobFlavour>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: State,
    pub work_area: WorkArea,
    pub receipt: PathBuf,
    pub descriptors: Vec<PathBuf>,
    pub handles: Vec<(usize, JobHandle)>,
}

/// Sequences a run from an empty work area to submitted jobs.
/// Every step runs once, the first failure ends the run in `State::Failed`.
pub struct Orchestrator<L, P, S> {
    config: RunnerConfig,
    runtime: RuntimeEnvironment,
    loader: L,
    packager: P,
    scheduler: S,
    state: State,
}

impl<L, P, S> Orchestrator<L, P, S>
where
    L: TemplateLoader,
    P: Packager,
    S: Scheduler,
{
    pub fn new(
        config: RunnerConfig,
        runtime: RuntimeEnvironment,
        loader: L,
        packager: P,
        scheduler: S,
    ) -> Self {
        Self {
            config,
            runtime,
            loader,
            packager,
            scheduler,
            state: State::Init,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn advance<T>(&mut self, next: State, result: Result<T, PipelineError>) -> Result<T, RunFailure> {
        match result {
            Ok(value) => {
                info!("* {} -> {}", self.state, next);
                self.state = next;

                Ok(value)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    fn fail(&mut self, error: PipelineError) -> RunFailure {
        let reached = self.state;
        error!(state = %reached, component = error.component(), "{error}");
        self.state = State::Failed;

        RunFailure { reached, error }
    }

    #[instrument(skip(self), level = "info")]
    pub fn run(&mut self, request: &RunRequest) -> Result<RunReport, RunFailure> {
        if self.state != State::Init {
            warn!("Orchestrator already ran, starting over from {}", self.state);
            self.state = State::Init;
        }

        let pool = match self.worker_pool() {
            Ok(pool) => pool,
            Err(error) => return Err(self.fail(error)),
        };

        let work_area = self.advance(
            State::Prepared,
            WorkArea::reset(&self.config.work_dir).map_err(PipelineError::from),
        )?;
        let layout = ArtifactLayout::new(&work_area, &self.config, &request.template);

        let template = self.advance(
            State::TemplateLoaded,
            self.loader
                .load(&request.template, &request.options)
                .map_err(PipelineError::from),
        )?;

        self.advance(State::Packaged, self.package(&work_area, &layout))?;

        let jobs = self.advance(
            State::Split,
            pool.install(|| jobs::build(&template, &layout.base, request.jobs))
                .map_err(PipelineError::from),
        )?;

        let descriptors = self.advance(
            State::DescriptorsWritten,
            self.write_artifacts(&jobs, &layout, request.flavour),
        )?;

        let mut report = RunReport {
            state: self.state,
            work_area,
            receipt: layout.receipt,
            descriptors,
            handles: Vec::new(),
        };

        if request.dry_run {
            info!("Dry run, {} descriptors left unsubmitted", jobs.len());
            self.advance(State::DryRunComplete, Ok(()))?;
        } else {
            let handles = pool.install(|| submit_all(&self.scheduler, &jobs));
            report.handles = self.advance(State::Submitted, handles)?;
            self.log_status(&report.handles);
        }

        report.state = self.state;

        Ok(report)
    }

    fn worker_pool(&self) -> Result<ThreadPool, PipelineError> {
        let mut builder = ThreadPoolBuilder::new();

        if let Some(threads) = self.config.threads {
            debug!("Starting thread pool with {threads} threads");
            builder = builder.num_threads(threads);
        }

        builder
            .build()
            .map_err(|error| PipelineError::Build(error.to_string()))
    }

    /// runtime archive and the executor script unpacking it
    fn package(&self, work_area: &WorkArea, layout: &ArtifactLayout) -> Result<(), PipelineError> {
        let archive = self.packager.package(&self.runtime.base, &layout.archive)?;

        if archive != layout.archive {
            debug!("Packager placed the archive at {}", archive.display());
        }

        let script = descriptor::render_script(
            &self.runtime,
            &archive,
            &work_area.outputs,
            &self.config.executor.command,
        );
        let script_error = |source| PackagingError::Script {
            path: layout.script.clone(),
            source,
        };

        fs::write(&layout.script, script).map_err(script_error)?;
        fs::set_permissions(&layout.script, fs::Permissions::from_mode(0o755))
            .map_err(script_error)?;
        debug!("Wrote executor script {}", layout.script.display());

        Ok(())
    }

    /// configs, descriptors and the receipt, only once the whole job set exists
    #[instrument(skip_all, level = "info")]
    fn write_artifacts(
        &self,
        jobs: &JobSet,
        layout: &ArtifactLayout,
        flavour: Option<JobFlavour>,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let options = SchedulingOptions {
            executable: layout.script.clone(),
            flavour,
        };
        let write = |path: &Path, contents: &str| {
            fs::write(path, contents).map_err(|source| PipelineError::DescriptorWrite {
                path: path.to_path_buf(),
                source,
            })
        };

        for job in jobs.jobs() {
            debug!("    {}", job.paths.config.display());
            write(&job.paths.config, &job.config)?;
            write(
                &job.paths.descriptor,
                &descriptor::render(job, &options),
            )?;
        }

        Receipt::new(&self.runtime, jobs).write(&layout.receipt)?;

        Ok(jobs
            .jobs()
            .iter()
            .map(|job| job.paths.descriptor.clone())
            .collect())
    }

    /// one status query per job, no monitoring
    fn log_status(&self, handles: &[(usize, JobHandle)]) {
        for (index, handle) in handles {
            match self.scheduler.query_status(handle) {
                Ok(status) => debug!(job = index, handle = %handle, "Status {status:?}"),
                Err(error) => warn!(job = index, handle = %handle, "Failed to query status: {error}"),
            }
        }
    }
}

/// submit every job, failures don't stop the others
fn submit_all<S: Scheduler>(
    scheduler: &S,
    jobs: &JobSet,
) -> Result<Vec<(usize, JobHandle)>, PipelineError> {
    let outcomes = FairMutex::new(Vec::with_capacity(jobs.len()));

    jobs.jobs().par_iter().for_each(|job| {
        let outcome = scheduler.submit(&job.paths.descriptor);

        if let Err(error) = &outcome {
            error!(
                job = job.index,
                "Failed to submit {}: {error}",
                job.paths.descriptor.display()
            );
        }

        outcomes.lock().push((job.index, outcome));
    });

    let mut outcomes = outcomes.into_inner();
    outcomes.sort_by_key(|(index, _)| *index);

    let mut succeeded = Vec::new();
    let mut failures = Vec::new();

    for (index, outcome) in outcomes {
        match outcome {
            Ok(handle) => succeeded.push((index, handle)),
            Err(error) => failures.push(SubmissionFailure { index, error }),
        }
    }

    if failures.is_empty() {
        info!("Submitted {} jobs", succeeded.len());

        Ok(succeeded)
    } else {
        Err(PipelineError::Submission {
            failed: failures.iter().map(|failure| failure.index).collect(),
            succeeded,
            failures,
        })
    }
}

#[cfg(test)]
mod pipeline_test;
