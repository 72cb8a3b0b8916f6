use crate::implementation::Implementation;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path}")]
    ReadConfig { path: PathBuf, source: Error },
    #[error("Failed to parse config file")]
    ParseConfig(#[from] serde_yaml::Error),
    #[error("Config failed preflight checks")]
    FailedPreflight,
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
    #[error("Failed to prepare results directory {path}")]
    ResultsDirectory { path: PathBuf, source: Error },
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    // path to the benchmark binary, relative to the working directory of the job
    #[serde(default = "default_binary_path")]
    pub binary: PathBuf,
    // root for raw and parsed results
    #[serde(default = "default_results_path")]
    pub results: PathBuf,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    // named sweeps, each expanded into a cross product of configurations
    #[serde(default)]
    pub sweeps: BTreeMap<String, SweepConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct LauncherConfig {
    #[serde(default = "default_mpirun")]
    pub mpirun: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    // submission tool, the first element is the program
    #[serde(default = "default_submit")]
    pub submit: Vec<String>,
    // status query tool, the first element is the program
    #[serde(default = "default_query")]
    pub query: Vec<String>,
    #[serde(default = "default_hardware_model")]
    pub hardware_model: String,
    #[serde(default = "default_true")]
    pub disable_infiniband: bool,
    #[serde(default = "default_true")]
    pub retryable: bool,
    // wall time estimate per command of a grouped job in minutes
    #[serde(default = "default_minutes_per_command")]
    pub minutes_per_command: u32,
    // wall time (minutes) up to which the queue default is used
    #[serde(default = "default_walltime_threshold")]
    pub walltime_threshold: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    // per run timeout in seconds
    #[serde(default = "default_local_timeout")]
    pub timeout: u64,
    // output file for the collected stdout, relative to the results directory
    #[serde(default = "default_local_output")]
    pub output: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct CollectionConfig {
    #[serde(default)]
    pub padding: PaddingConfig,
    // keep the records preceding a malformed payload line
    #[serde(default)]
    pub keep_partial_jobs: bool,
}

/// Lines between the report sentinels and the program output
#[derive(Deserialize, Serialize, Clone, Copy, Debug)]
#[serde(deny_unknown_fields)]
pub struct PaddingConfig {
    #[serde(default = "default_padding")]
    pub leading: usize,
    #[serde(default = "default_padding")]
    pub trailing: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    // square problem sizes, n = m = size
    pub sizes: Vec<u64>,
    pub nodes: Vec<u32>,
    pub implementations: Vec<String>,
    #[serde(default = "default_one")]
    pub repetitions: u32,
    // number of independently submitted copies of the sweep
    #[serde(default = "default_one")]
    pub job_repetitions: u32,
    #[serde(default)]
    pub verify: bool,
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigErrors::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.results.join("raw")
    }

    pub fn parsed_dir(&self) -> PathBuf {
        self.results.join("parsed")
    }

    /// Check the config for problems, logging every problem found instead of stopping at the first one
    pub fn preflight_checks(&self, local: bool) -> Result<(), ConfigErrors> {
        let mut contains_error = false;

        if self.sweeps.is_empty() {
            error!("No sweep was defined, unable to build a set of configurations");
            contains_error = true;
        }

        for (name, sweep) in self.sweeps.iter() {
            if sweep.sizes.is_empty() || sweep.nodes.is_empty() || sweep.implementations.is_empty()
            {
                warn!("sweeps.{name} has an empty axis and will not produce any configuration");
            }

            for implementation in sweep.implementations.iter() {
                if Implementation::lookup(implementation).is_none() {
                    error!("sweeps.{name} references unknown implementation '{implementation}'");
                    contains_error = true;
                }
            }

            if sweep.nodes.contains(&0) {
                error!("sweeps.{name}.nodes cannot contain 0");
                contains_error = true;
            }

            if sweep.sizes.contains(&0) {
                error!("sweeps.{name}.sizes cannot contain 0");
                contains_error = true;
            }

            if sweep.repetitions == 0 {
                error!("sweeps.{name}.repetitions cannot be 0");
                contains_error = true;
            }

            if sweep.job_repetitions == 0 {
                error!("sweeps.{name}.job_repetitions cannot be 0");
                contains_error = true;
            }
        }

        if self.cluster.submit.is_empty() {
            error!("cluster.submit must name the submission tool");
            contains_error = true;
        }

        if self.cluster.query.is_empty() {
            error!("cluster.query must name the status query tool");
            contains_error = true;
        }

        // the binary is only visible from here when running locally
        if local {
            match check_executable(&self.binary) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "Benchmark binary {} is not executable",
                        self.binary.to_string_lossy()
                    );
                    contains_error = true;
                }
                Err(e) => {
                    error!(
                        "Failed to determine if binary ({}) is an executable: {e}",
                        self.binary.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
        }

        if contains_error {
            Err(ConfigErrors::FailedPreflight)
        } else {
            Ok(())
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            binary: default_binary_path(),
            results: default_results_path(),
            launcher: LauncherConfig::default(),
            cluster: ClusterConfig::default(),
            local: LocalConfig::default(),
            collection: CollectionConfig::default(),
            sweeps: BTreeMap::new(),
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            mpirun: default_mpirun(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            submit: default_submit(),
            query: default_query(),
            hardware_model: default_hardware_model(),
            disable_infiniband: true,
            retryable: true,
            minutes_per_command: default_minutes_per_command(),
            walltime_threshold: default_walltime_threshold(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            timeout: default_local_timeout(),
            output: default_local_output(),
        }
    }
}

impl Default for PaddingConfig {
    fn default() -> Self {
        Self {
            leading: default_padding(),
            trailing: default_padding(),
        }
    }
}

fn default_binary_path() -> PathBuf {
    PathBuf::from("code/build_output/main")
}

fn default_results_path() -> PathBuf {
    PathBuf::from("results")
}

fn default_mpirun() -> String {
    "mpirun".to_owned()
}

fn default_submit() -> Vec<String> {
    vec!["bsub".to_owned()]
}

fn default_query() -> Vec<String> {
    vec!["bjobs".to_owned()]
}

// Euler III nodes
fn default_hardware_model() -> String {
    "XeonE3_1585Lv5".to_owned()
}

fn default_true() -> bool {
    true
}

// roughly 1.25 minutes per run on average
fn default_minutes_per_command() -> u32 {
    2
}

// default limit of the normal.4h queue
fn default_walltime_threshold() -> u32 {
    4 * 60
}

fn default_local_timeout() -> u64 {
    3600
}

fn default_local_output() -> PathBuf {
    PathBuf::from("local.json")
}

fn default_padding() -> usize {
    2
}

fn default_one() -> u32 {
    1
}
