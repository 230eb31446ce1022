use crate::{config::RuntimeEnvironment, jobs::Job};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Condor job flavours, each one bounds the wall time of a job
#[derive(ValueEnum, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobFlavour {
    /// 20 minutes
    Espresso,
    /// 1 hour
    Microcentury,
    /// 2 hours
    Longlunch,
    /// 8 hours
    Workday,
    /// 1 day
    Tomorrow,
    /// 3 days
    Testmatch,
    /// 1 week
    Nextweek,
}

impl JobFlavour {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Espresso => "espresso",
            Self::Microcentury => "microcentury",
            Self::Longlunch => "longlunch",
            Self::Workday => "workday",
            Self::Tomorrow => "tomorrow",
            Self::Testmatch => "testmatch",
            Self::Nextweek => "nextweek",
        }
    }
}

impl fmt::Display for JobFlavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingOptions {
    pub executable: PathBuf,
    pub flavour: Option<JobFlavour>,
}

const HEADER: &str = "\
###############################################
# Condor batch system configuration card file #
###############################################
# Warning - comments must be on different lines to functional statements.
";

/// Render the submission card for a single job
pub fn render(job: &Job, options: &SchedulingOptions) -> String {
    let mut card = String::from(HEADER);

    card.push_str(&format!(
        "Universe        = vanilla
Executable      = {}
Arguments       = {}

Log             = {}
Output          = {}
Error           = {}

GetEnv          = True
",
        options.executable.display(),
        job.paths.config.display(),
        job.paths.log.display(),
        job.paths.out.display(),
        job.paths.err.display(),
    ));

    if let Some(flavour) = options.flavour {
        card.push_str(&format!("\n+JobFlavour = \"{flavour}\"\n"));
    }

    // one job per card keeps log, out and err of every job apart
    card.push_str("\n# No. of jobs to submit (N.B. no equals sign)\nQueue 1\n");

    card
}

/// Wrapper executed by every job: sets up the runtime, unpacks the archive and
/// runs `command` on the config passed as first argument inside the output area
pub fn render_script(
    runtime: &RuntimeEnvironment,
    archive: &Path,
    outputs: &Path,
    command: &str,
) -> String {
    format!(
        r#"#!/bin/bash

echo "Running '${{BASH_SOURCE}}'"

if [ "$#" -ne 1 ]; then
    echo "Usage ${{BASH_SOURCE}} <config>"
    exit 1
fi
CONFIG=$1

echo "--- Working directory ${{PWD}} ---"

echo "Setting up runtime area {version}"

scram project CMSSW {version}

cd {version}

eval `scram runtime -sh`

tar xfz {archive}

cd {outputs}

{command} ${{CONFIG}}

echo "FINISHED"
"#,
        version = runtime.version,
        archive = archive.display(),
        outputs = outputs.display(),
    )
}
