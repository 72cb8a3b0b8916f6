use super::{check_group_member, prepare_cmd, Runner, RunnerError, SubmissionError};
use crate::{
    collector::{CollectionReport, Collector},
    config::{BenchConfig, ClusterConfig, CollectionConfig, ConfigErrors, LauncherConfig},
    configuration::{Configuration, GroupKey},
    ledger::{self, Ledger},
    report,
};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{debug, info, instrument, warn};

/// A single call of the submission tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub nodes: u32,
    pub job_repetition: u32,
    /// command to run, empty when the job is read from `stdin`
    pub command: Vec<String>,
    /// file handed to the submission tool as the job's input stream
    pub stdin: Option<PathBuf>,
    /// estimated wall time in minutes
    pub time_hint: Option<u32>,
    pub job_name: Option<String>,
}

/// Runner submitting configurations to an LSF cluster
#[derive(Debug)]
pub struct LsfRunner {
    raw_dir: PathBuf,
    parsed_dir: PathBuf,
    binary: PathBuf,
    launcher: LauncherConfig,
    cluster: ClusterConfig,
    collection: CollectionConfig,
    /// write batch files without submitting them
    files_only: bool,
}

impl LsfRunner {
    /// create a runner for `config.results`, using `raw_subdir` (default `raw`) for outputs
    pub fn load(config: &BenchConfig, raw_subdir: Option<&Path>) -> Result<Self, ConfigErrors> {
        let raw_dir = match raw_subdir {
            Some(subdir) => config.results.join(subdir),
            None => config.raw_dir(),
        };
        let parsed_dir = config.parsed_dir();

        for path in [&raw_dir, &parsed_dir] {
            fs::create_dir_all(path).map_err(|source| ConfigErrors::ResultsDirectory {
                path: path.clone(),
                source,
            })?;
        }

        Ok(Self {
            raw_dir,
            parsed_dir,
            binary: config.binary.clone(),
            launcher: config.launcher.clone(),
            cluster: config.cluster.clone(),
            collection: config.collection.clone(),
            files_only: false,
        })
    }

    pub fn files_only(mut self, files_only: bool) -> Self {
        self.files_only = files_only;
        self
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn parsed_dir(&self) -> &Path {
        &self.parsed_dir
    }

    /// repetitions with a ledger in the raw directory
    pub fn ledgers(&self) -> Vec<u32> {
        ledger::discover(&self.raw_dir)
    }

    pub fn batch_path(&self, job_name: &str) -> PathBuf {
        self.raw_dir.join(format!("batch-{job_name}"))
    }

    /// arguments for the submission tool, without the tool itself
    pub fn submit_args(&self, request: &SubmitRequest) -> Vec<String> {
        let mut args = vec![
            "-o".to_owned(),
            format!("{}/%J", self.raw_dir.display()),
            "-e".to_owned(),
            format!("{}/%J.err", self.raw_dir.display()),
            "-n".to_owned(),
            request.nodes.to_string(),
            // one core per node
            "-R".to_owned(),
            "span[ptile=1]".to_owned(),
            "-R".to_owned(),
            format!("select[model=={}]", self.cluster.hardware_model),
        ];

        if self.cluster.disable_infiniband {
            args.extend(["-R".to_owned(), "select[!ib]".to_owned()]);
        }

        if self.cluster.retryable {
            args.push("-r".to_owned());
        }

        if let Some(time) = request
            .time_hint
            .filter(|time| *time > self.cluster.walltime_threshold)
        {
            args.extend(["-W".to_owned(), time.to_string()]);
        }

        if let Some(name) = &request.job_name {
            args.extend(["-J".to_owned(), name.clone()]);
        }

        args.extend(request.command.iter().cloned());

        args
    }

    /// Submit a job and record its id in the ledger of the job repetition
    #[instrument(skip(self, request), fields(nodes = request.nodes, job_repetition = request.job_repetition), level = "debug")]
    pub fn actually_run(&self, request: &SubmitRequest) -> Result<String, RunnerError> {
        let (program, params) = self
            .cluster
            .submit
            .split_first()
            .ok_or(SubmissionError::EmptyCommand)?;
        let args = self.submit_args(request);

        debug!("executing the following command:");
        info!("{} {}", self.cluster.submit.join(" "), args.join(" "));

        let stdin = match &request.stdin {
            Some(path) => Stdio::from(File::open(path)?),
            None => Stdio::null(),
        };

        let output = Command::new(program)
            .args(params)
            .args(&args)
            .stdin(stdin)
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| SubmissionError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("{stdout}");

        let job_id = report::parse_job_id(&stdout)
            .ok_or_else(|| SubmissionError::JobIdNotFound {
                output: stdout.to_string(),
            })?
            .to_owned();

        Ledger::new(&self.raw_dir, request.job_repetition).append(&job_id)?;

        info!("submitted job {job_id}");

        Ok(job_id)
    }

    fn estimated_time(&self, commands: usize) -> u32 {
        u32::try_from(commands)
            .unwrap_or(u32::MAX)
            .saturating_mul(self.cluster.minutes_per_command)
    }

    fn collector(&self) -> Collector<'_> {
        Collector::new(&self.raw_dir, &self.parsed_dir, &self.collection)
    }
}

pub fn group_job_name(key: GroupKey) -> String {
    format!("nodes-{}-rep-{}", key.nodes, key.job_repetition)
}

impl Runner for LsfRunner {
    fn run(&mut self, config: &Configuration) -> Result<(), RunnerError> {
        if let Err(reason) = config.runnable() {
            warn!("skipping configuration: {reason}");
            return Ok(());
        }

        let command = prepare_cmd(config, &self.launcher, &self.binary)?;

        self.actually_run(&SubmitRequest {
            nodes: config.nodes,
            job_repetition: config.job_repetition,
            command,
            stdin: None,
            time_hint: None,
            job_name: None,
        })?;

        Ok(())
    }

    #[instrument(skip(self, configs), fields(configs = configs.len()), level = "info")]
    fn run_grouped(&mut self, key: GroupKey, configs: &[Configuration]) -> Result<(), RunnerError> {
        let mut commands = Vec::with_capacity(configs.len());

        for config in configs {
            if let Err(reason) = config.runnable() {
                warn!("skipping configuration: {reason}");
                continue;
            }

            check_group_member(key, config)?;
            commands.push(prepare_cmd(config, &self.launcher, &self.binary)?.join(" "));
        }

        if commands.is_empty() {
            warn!("no runnable configuration in group {key}, nothing to submit");
            return Ok(());
        }

        let job_name = group_job_name(key);
        let batch = self.batch_path(&job_name);
        let mut file = File::create(&batch).map_err(|source| RunnerError::Write {
            path: batch.clone(),
            source,
        })?;
        for line in commands.iter() {
            writeln!(file, "{line}").map_err(|source| RunnerError::Write {
                path: batch.clone(),
                source,
            })?;
        }
        drop(file);

        if self.files_only {
            info!("wrote {} commands to {}", commands.len(), batch.display());
            return Ok(());
        }

        self.actually_run(&SubmitRequest {
            nodes: key.nodes,
            job_repetition: key.job_repetition,
            command: Vec::new(),
            time_hint: Some(self.estimated_time(commands.len())),
            stdin: Some(batch),
            job_name: Some(job_name),
        })?;

        Ok(())
    }

    fn collect(&mut self, repetition: u32, offset: u32) -> Result<CollectionReport, RunnerError> {
        Ok(self.collector().collect(repetition, offset)?)
    }

    /// Best effort check whether the jobs without output are done
    #[instrument(skip(self), level = "info")]
    fn verify(&mut self, repetition: u32) -> Result<bool, RunnerError> {
        let (program, params) = self
            .cluster
            .query
            .split_first()
            .ok_or(SubmissionError::EmptyCommand)?;
        let mut completed = true;

        for job_id in Ledger::new(&self.raw_dir, repetition).job_ids()? {
            if self.raw_dir.join(&job_id).is_file() {
                continue;
            }

            let output = Command::new(program)
                .args(params)
                .args(["-o", "jobid stat exit_code", "-json", job_id.as_str()])
                .stdin(Stdio::null())
                .output()
                .map_err(|source| SubmissionError::Spawn {
                    program: program.clone(),
                    source,
                })?;

            match report::parse_status(&String::from_utf8_lossy(&output.stdout)) {
                Ok(status) => {
                    info!("{job_id} is {status}");
                    completed &= status.is_done();
                }
                Err(e) => {
                    warn!(job = %job_id, "failed to query status: {e}");
                    completed = false;
                }
            }
        }

        Ok(completed)
    }
}
