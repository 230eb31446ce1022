mod command;
mod config;
mod descriptor;
mod jobs;
mod naming;
mod package;
mod partition;
mod pipeline;
mod scheduler;
mod template;
mod workarea;

use clap::Parser;
use config::{RunnerConfig, RuntimeEnvironment};
use descriptor::JobFlavour;
use package::TarPackager;
use pipeline::{Orchestrator, PipelineError, RunFailure, RunRequest};
use scheduler::Schedulers;
use std::{num::NonZeroUsize, path::PathBuf, process::ExitCode};
use template::{yaml::YamlLoader, LoadOptions};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Split a file-list driven job template into N batch jobs
#[derive(Parser, Debug)]
#[command(name = "kuntur", version, about, long_about = None)]
struct Cli {
    /// Write all artifacts but don't submit anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Number of jobs to split the input files on
    #[arg(short, long, default_value = "1")]
    jobs: NonZeroUsize,

    /// Scheduling flavour of the jobs
    #[arg(short, long, value_enum)]
    flavour: Option<JobFlavour>,

    /// Runner configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    /// Job template
    #[arg(value_parser = template_path)]
    template: PathBuf,

    /// Arguments passed to the template as key=value
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    template_args: Vec<String>,
}

fn template_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);

    match path.extension().and_then(|extension| extension.to_str()) {
        Some("yaml" | "yml") => Ok(path),
        _ => Err(format!("file doesn't end with one of [\"yaml\", \"yml\"]: {value}")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };

    // RUST_LOG takes precedence over --verbose
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match RunnerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ConfigError: {e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match RuntimeEnvironment::from_env(&config.environment) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("EnvironmentError: {e}");
            return ExitCode::FAILURE;
        }
    };

    let scheduler = match Schedulers::load(&config.scheduler) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            eprintln!("ConfigError: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = %runtime.version,
        base = %runtime.base.display(),
        "Using runtime"
    );

    let request = RunRequest {
        template: cli.template,
        options: LoadOptions::new(cli.template_args),
        jobs: cli.jobs.get(),
        flavour: cli.flavour,
        dry_run: cli.dry_run,
    };
    let packager = TarPackager::load(&config.package);
    let mut orchestrator = Orchestrator::new(config, runtime, YamlLoader, packager, scheduler);

    match orchestrator.run(&request) {
        Ok(report) => {
            info!(
                "Finished in state {} with {} jobs in {}",
                report.state,
                report.descriptors.len(),
                report.work_area.root.display()
            );

            info!("Job receipt at {}", report.receipt.display());

            for (index, handle) in report.handles.iter() {
                println!("{index}: {handle}");
            }

            ExitCode::SUCCESS
        }
        Err(failure) => {
            debug!("Orchestrator stopped in state {}", orchestrator.state());

            for line in failure_report(&failure) {
                eprintln!("{line}");
            }

            ExitCode::FAILURE
        }
    }
}

/// stderr lines for a failed run, partial submissions also list what made it
fn failure_report(failure: &RunFailure) -> Vec<String> {
    let mut lines = vec![format!("{}: {failure}", failure.error.kind())];

    if let PipelineError::Submission {
        succeeded,
        failures,
        ..
    } = &failure.error
    {
        lines.extend(failures.iter().map(|failed| format!("  {failed}")));

        if !succeeded.is_empty() {
            lines.push("Submitted:".to_owned());
            lines.extend(
                succeeded
                    .iter()
                    .map(|(index, handle)| format!("  {index}: {handle}")),
            );
        }
    }

    lines
}
