use super::*;
use crate::{
    config::RunnerConfig,
    scheduler::JobStatus,
    template::{yaml::YamlLoader, JobTemplate},
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tempfile::TempDir;

/// writes a placeholder archive
struct FakePackager;

impl Packager for FakePackager {
    fn package(&self, _base: &Path, destination: &Path) -> Result<PathBuf, PackagingError> {
        fs::write(destination, "archive").map_err(|source| PackagingError::Script {
            path: destination.to_path_buf(),
            source,
        })?;

        Ok(destination.to_path_buf())
    }
}

/// writes its archive next to the requested destination under another name
struct RelocatingPackager;

impl Packager for RelocatingPackager {
    fn package(&self, _base: &Path, destination: &Path) -> Result<PathBuf, PackagingError> {
        let archive = destination.with_file_name("relocated.tar.gz");
        fs::write(&archive, "archive").map_err(|source| PackagingError::Script {
            path: archive.clone(),
            source,
        })?;

        Ok(archive)
    }
}

struct FailingPackager;

impl Packager for FailingPackager {
    fn package(&self, base: &Path, _destination: &Path) -> Result<PathBuf, PackagingError> {
        Err(PackagingError::MissingBase(base.to_path_buf()))
    }
}

/// records submitted descriptors, failing those whose name contains one of `failing`
#[derive(Default)]
struct FakeScheduler {
    failing: Vec<&'static str>,
    submitted: Mutex<Vec<PathBuf>>,
}

impl Scheduler for FakeScheduler {
    fn submit(&self, descriptor: &Path) -> Result<JobHandle, SchedulerError> {
        let name = descriptor.to_string_lossy();

        if self.failing.iter().any(|pattern| name.contains(pattern)) {
            return Err(SchedulerError::UnexpectedOutput("queue full".into()));
        }

        let mut submitted = self.submitted.lock();
        submitted.push(descriptor.to_path_buf());

        Ok(JobHandle(format!("{}.0", 100 + submitted.len())))
    }

    fn query_status(&self, _handle: &JobHandle) -> Result<JobStatus, SchedulerError> {
        Ok(JobStatus::Idle)
    }
}

struct Fixture {
    dir: TempDir,
    config: RunnerConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            work_dir: dir.path().join("work"),
            threads: Some(2),
            ..RunnerConfig::default()
        };

        Self { dir, config }
    }

    fn template(&self, files: usize, extra: &str) -> PathBuf {
        let names = (0..files)
            .map(|i| format!("/data/in{i:02}.root"))
            .collect::<Vec<_>>()
            .join(", ");
        let path = self.dir.path().join("analysis_cfg.yaml");

        fs::write(
            &path,
            format!(
                "process:
  source:
    fileNames: [{names}]
{extra}  services:
    TFileService: {{ type: TFileService, fileName: hist.root }}
  outputModules:
    out: {{ type: PoolOutputModule, fileName: events.root }}
"
            ),
        )
        .unwrap();

        path
    }

    fn runtime(&self) -> RuntimeEnvironment {
        RuntimeEnvironment {
            base: self.dir.path().join("runtime"),
            version: "CMSSW_12_4_0".into(),
        }
    }

    fn orchestrator<P: Packager>(
        &self,
        packager: P,
        scheduler: FakeScheduler,
    ) -> Orchestrator<YamlLoader, P, FakeScheduler> {
        Orchestrator::new(
            self.config.clone(),
            self.runtime(),
            YamlLoader,
            packager,
            scheduler,
        )
    }
}

fn request(template: PathBuf, jobs: usize, dry_run: bool) -> RunRequest {
    RunRequest {
        template,
        options: LoadOptions::default(),
        jobs,
        flavour: None,
        dry_run,
    }
}

fn file_names(dir: &Path) -> BTreeSet<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn dry_run_writes_every_artifact() {
    let fixture = Fixture::new();
    let template = fixture.template(10, "");
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());

    let report = orchestrator.run(&request(template, 3, true)).unwrap();
    let ins = &report.work_area.inputs;

    assert_eq!(report.state, State::DryRunComplete);
    assert_eq!(orchestrator.state(), State::DryRunComplete);
    assert!(report.handles.is_empty());
    assert!(orchestrator.scheduler.submitted.lock().is_empty());
    assert_eq!(
        file_names(ins),
        BTreeSet::from([
            "analysis_dump_0.yaml".to_owned(),
            "analysis_dump_1.yaml".to_owned(),
            "analysis_dump_2.yaml".to_owned(),
            "condor_0.card".to_owned(),
            "condor_1.card".to_owned(),
            "condor_2.card".to_owned(),
            "analysis_cfg_receipt.json".to_owned(),
        ])
    );
    assert!(report.work_area.root.join("analysis.sh").is_file());
    assert!(report.work_area.root.join("runtimepod.tgz").is_file());

    let card = fs::read_to_string(ins.join("condor_0.card")).unwrap();
    assert!(card.contains(&format!(
        "Arguments       = {}",
        ins.join("analysis_dump_0.yaml").display()
    )));
    assert!(card.contains(&format!(
        "Log             = {}",
        report.work_area.logs.join("job_0.log").display()
    )));

    let receipt: Receipt =
        serde_json::from_str(&fs::read_to_string(&report.receipt).unwrap()).unwrap();
    assert_eq!(receipt.runtime_version, "CMSSW_12_4_0");
    assert_eq!(
        receipt
            .jobs
            .values()
            .map(|job| job.input_file_count)
            .collect::<Vec<_>>(),
        vec![4, 3, 3]
    );
}

#[test]
fn written_configs_reload_to_disjoint_jobs() {
    let fixture = Fixture::new();
    let template = fixture.template(5, "");
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());

    let report = orchestrator.run(&request(template, 2, true)).unwrap();
    let mut inputs = Vec::new();

    for index in 0..2 {
        let path = report.work_area.inputs.join(format!("analysis_dump_{index}.yaml"));
        let job = YamlLoader.load(&path, &LoadOptions::default()).unwrap();

        assert_eq!(
            job.output_sinks().streaming["out"].as_str(),
            format!("events_{index}.root")
        );
        inputs.extend(job.input_files().unwrap());
    }

    assert_eq!(inputs.len(), 5);
    assert_eq!(inputs[0].as_str(), "/data/in00.root");
    assert_eq!(inputs[4].as_str(), "/data/in04.root");
}

#[test]
fn submits_every_job() {
    let fixture = Fixture::new();
    let template = fixture.template(4, "");
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());

    let report = orchestrator.run(&request(template, 4, false)).unwrap();

    assert_eq!(report.state, State::Submitted);
    assert_eq!(
        report
            .handles
            .iter()
            .map(|(index, _)| *index)
            .collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert_eq!(orchestrator.scheduler.submitted.lock().len(), 4);
}

#[test]
fn single_job_keeps_base_names() {
    let fixture = Fixture::new();
    let template = fixture.template(3, "");
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());

    let report = orchestrator.run(&request(template, 1, false)).unwrap();

    assert_eq!(
        report.descriptors,
        vec![report.work_area.inputs.join("condor.card")]
    );
    assert!(report.work_area.inputs.join("analysis_dump.yaml").is_file());
}

#[test]
fn partial_submission_reports_indices() {
    let fixture = Fixture::new();
    let template = fixture.template(6, "");
    let scheduler = FakeScheduler {
        failing: vec!["condor_1.card", "condor_4.card"],
        ..FakeScheduler::default()
    };
    let mut orchestrator = fixture.orchestrator(FakePackager, scheduler);

    let failure = orchestrator.run(&request(template, 6, false)).unwrap_err();

    assert_eq!(failure.reached, State::DescriptorsWritten);
    assert_eq!(orchestrator.state(), State::Failed);
    match failure.error {
        PipelineError::Submission {
            failed,
            succeeded,
            failures,
        } => {
            assert_eq!(failed, vec![1, 4]);
            assert_eq!(
                succeeded.iter().map(|(index, _)| *index).collect::<Vec<_>>(),
                vec![0, 2, 3, 5]
            );
            assert_eq!(failures.len(), 2);
        }
        error => panic!("unexpected error {error}"),
    }
    // every job was attempted
    assert_eq!(orchestrator.scheduler.submitted.lock().len(), 4);
}

#[test]
fn too_few_inputs_writes_nothing() {
    let fixture = Fixture::new();
    let template = fixture.template(2, "");
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());

    let failure = orchestrator.run(&request(template, 5, false)).unwrap_err();

    assert_eq!(failure.reached, State::Packaged);
    assert_eq!(failure.error.kind(), "InsufficientItemsError");
    assert!(matches!(
        failure.error,
        PipelineError::InsufficientItems {
            items: 2,
            groups: 5
        }
    ));
    assert!(failure.to_string().contains("Cannot split 2 files on 5 jobs"));
    assert!(failure.to_string().contains("Packaged"));

    let ins = fixture.config.work_dir.join("ins");
    assert!(ins.is_dir());
    assert!(file_names(&ins).is_empty());
}

#[test]
fn secondary_inputs_fail_before_split() {
    let fixture = Fixture::new();
    let template = fixture.template(4, "    secondaryFileNames: [/data/parent.root]\n");
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());

    let failure = orchestrator.run(&request(template, 2, true)).unwrap_err();

    assert_eq!(failure.reached, State::Packaged);
    assert_eq!(failure.error.kind(), "UnsupportedSecondaryInputsError");
    assert_eq!(failure.error.component(), "job template");
}

#[test]
fn missing_template() {
    let fixture = Fixture::new();
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());

    let failure = orchestrator
        .run(&request(fixture.dir.path().join("missing.yaml"), 1, true))
        .unwrap_err();

    assert_eq!(failure.reached, State::Prepared);
    assert_eq!(failure.error.kind(), "ConfigNotFoundError");
}

#[test]
fn template_without_process() {
    let fixture = Fixture::new();
    let path = fixture.dir.path().join("empty.yaml");
    fs::write(&path, "services: {}\n").unwrap();
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());

    let failure = orchestrator.run(&request(path, 1, true)).unwrap_err();

    assert_eq!(failure.error.kind(), "ProcessSymbolMissingError");
}

#[test]
fn packaging_failure_stops_the_run() {
    let fixture = Fixture::new();
    let template = fixture.template(4, "");
    let mut orchestrator = fixture.orchestrator(FailingPackager, FakeScheduler::default());

    let failure = orchestrator.run(&request(template, 2, false)).unwrap_err();

    assert_eq!(failure.reached, State::TemplateLoaded);
    assert_eq!(failure.error.component(), "packager");
    assert!(file_names(&fixture.config.work_dir.join("ins")).is_empty());
    assert!(orchestrator.scheduler.submitted.lock().is_empty());
}

#[test]
fn script_unpacks_the_archive_the_packager_wrote() {
    let fixture = Fixture::new();
    let template = fixture.template(2, "");
    let mut orchestrator = fixture.orchestrator(RelocatingPackager, FakeScheduler::default());

    let report = orchestrator.run(&request(template, 2, true)).unwrap();
    let script = fs::read_to_string(report.work_area.root.join("analysis.sh")).unwrap();

    assert!(script.contains(&format!(
        "tar xfz {}\n",
        report.work_area.root.join("relocated.tar.gz").display()
    )));
    assert!(!script.contains("runtimepod.tgz"));
}

#[test]
fn reruns_replace_previous_artifacts() {
    let fixture = Fixture::new();
    let template = fixture.template(6, "");
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());

    orchestrator.run(&request(template.clone(), 3, true)).unwrap();
    let report = orchestrator.run(&request(template, 2, true)).unwrap();

    assert!(!report.work_area.inputs.join("condor_2.card").exists());
    assert_eq!(report.descriptors.len(), 2);
}

#[test]
fn flavour_reaches_descriptors() {
    let fixture = Fixture::new();
    let template = fixture.template(2, "");
    let mut orchestrator = fixture.orchestrator(FakePackager, FakeScheduler::default());
    let request = RunRequest {
        flavour: Some(JobFlavour::Workday),
        ..request(template, 2, true)
    };

    let report = orchestrator.run(&request).unwrap();

    for descriptor in report.descriptors {
        let card = fs::read_to_string(descriptor).unwrap();
        assert!(card.contains("+JobFlavour = \"workday\""));
    }
}
