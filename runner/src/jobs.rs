use crate::{
    naming::JobNamer,
    partition::{self, PartitionError},
    template::{FileRef, JobTemplate, OutputSinks, TemplateError},
};
use itertools::Itertools;
use rayon::prelude::*;
use std::{collections::BTreeSet, path::PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error("Generated path {0} is shared by more than one job artifact")]
    PathCollision(PathBuf),
}

/// Per-job file locations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobPaths {
    pub config: PathBuf,
    pub log: PathBuf,
    pub out: PathBuf,
    pub err: PathBuf,
    pub descriptor: PathBuf,
}

impl JobPaths {
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        [
            &self.config,
            &self.log,
            &self.out,
            &self.err,
            &self.descriptor,
        ]
        .into_iter()
    }

    pub fn indexed(&self, namer: &JobNamer, index: usize) -> Self {
        Self {
            config: namer.insert(&self.config, index),
            log: namer.insert(&self.log, index),
            out: namer.insert(&self.out, index),
            err: namer.insert(&self.err, index),
            descriptor: namer.insert(&self.descriptor, index),
        }
    }
}

/// A fully concrete sub-job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub index: usize,
    pub inputs: Vec<FileRef>,
    pub sinks: OutputSinks,
    /// serialized template reading `inputs` and writing to `sinks`
    pub config: String,
    pub paths: JobPaths,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSet {
    jobs: Vec<Job>,
}

impl JobSet {
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn input_count(&self) -> usize {
        self.jobs.iter().map(|job| job.inputs.len()).sum()
    }

    /// first path generated for more than one artifact, if any
    pub fn find_collision(&self) -> Option<&PathBuf> {
        let mut seen = BTreeSet::new();

        self.jobs
            .iter()
            .flat_map(|job| job.paths.iter())
            .find(|path| !seen.insert(*path))
    }
}

/// Derive `jobs` concrete jobs from `template`, naming artifacts after `base`.
///
/// A single job reuses the template and the base paths as they are, more jobs
/// get a balanced share of the inputs and index-tagged sinks and paths. Every job
/// is materialized from the same immutable template so iterations are independent
/// and run on the current rayon pool.
#[instrument(skip(template, base), level = "info")]
pub fn build<T: JobTemplate>(
    template: &T,
    base: &JobPaths,
    jobs: usize,
) -> Result<JobSet, BuildError> {
    let set = if jobs == 1 {
        let inputs = template.input_files()?;

        JobSet {
            jobs: vec![Job {
                index: 0,
                sinks: template.output_sinks(),
                config: template.dump()?,
                paths: base.clone(),
                inputs,
            }],
        }
    } else {
        let inputs = template.input_files()?;
        let groups = partition::split(&inputs, jobs)?;
        let sinks = template.output_sinks();
        let namer = JobNamer::new(jobs);

        debug!(
            inputs = inputs.len(),
            width = namer.width(),
            sizes = ?groups.iter().map(Vec::len).collect_vec(),
            "Split input files"
        );

        let jobs = groups
            .into_par_iter()
            .enumerate()
            .map(|(index, inputs)| {
                let sinks = sinks.renamed(&namer, index);
                let config = template.rematerialize(&inputs, &sinks)?;

                Ok(Job {
                    index,
                    paths: base.indexed(&namer, index),
                    inputs,
                    sinks,
                    config,
                })
            })
            .collect::<Result<Vec<_>, TemplateError>>()?;

        JobSet { jobs }
    };

    if let Some(path) = set.find_collision() {
        return Err(BuildError::PathCollision(path.clone()));
    }

    info!("Built {} jobs over {} input files", set.len(), set.input_count());

    Ok(set)
}
