pub mod dry_run;
pub mod local;
pub mod lsf;

use crate::{
    collector::{CollectionError, CollectionReport},
    config::LauncherConfig,
    configuration::{Configuration, GroupKey},
};
use std::io;
use thiserror::Error;

/// A caller bug in sweep construction, these are never skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("{implementation} specifies both an allreduce and an allgather algorithm, only one is allowed")]
    ConflictingAlgorithms { implementation: &'static str },
    #[error("different {field} in same grouping, expected {expected}, received {received}")]
    GroupMismatch {
        field: &'static str,
        expected: u32,
        received: u32,
    },
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Failed to spawn {program}")]
    Spawn { program: String, source: io::Error },
    #[error("No job id found in submission output: {output:?}")]
    JobIdNotFound { output: String },
    #[error("Empty command line")]
    EmptyCommand,
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("{runner} runner does not support {operation}")]
    Unsupported {
        runner: &'static str,
        operation: &'static str,
    },
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    #[error("Submission failed")]
    Submission(#[from] SubmissionError),
    #[error("Collection failed")]
    Collection(#[from] CollectionError),
    #[error("Failed to write {path}")]
    Write {
        path: std::path::PathBuf,
        source: io::Error,
    },
    #[error("IO error")]
    Io(#[from] io::Error),
}

/// Execution strategy for configurations
///
/// Every operation is part of the contract, runners that can't perform one answer with
/// `RunnerError::Unsupported`.
pub trait Runner {
    /// submit a single configuration
    fn run(&mut self, config: &Configuration) -> Result<(), RunnerError>;

    /// submit configurations sharing a grouping key as one unit
    fn run_grouped(&mut self, key: GroupKey, configs: &[Configuration]) -> Result<(), RunnerError>;

    /// read back the results of a job repetition
    fn collect(&mut self, repetition: u32, offset: u32) -> Result<CollectionReport, RunnerError>;

    /// check whether all jobs of a job repetition are done
    fn verify(&mut self, repetition: u32) -> Result<bool, RunnerError>;
}

/// Wrap the benchmark command into an MPI launch
pub fn prepare_cmd(
    config: &Configuration,
    launcher: &LauncherConfig,
    binary: &std::path::Path,
) -> Result<Vec<String>, ContractViolation> {
    let implementation = &config.implementation;

    if implementation.allreduce_algorithm.is_some() && implementation.allgather_algorithm.is_some()
    {
        return Err(ContractViolation::ConflictingAlgorithms {
            implementation: implementation.name,
        });
    }

    let mut args = vec![
        launcher.mpirun.clone(),
        "-np".to_owned(),
        config.nodes.to_string(),
    ];

    let selector = implementation
        .allreduce_algorithm
        .map(|id| ("coll_tuned_allreduce_algorithm", id))
        .or_else(|| {
            implementation
                .allgather_algorithm
                .map(|id| ("coll_tuned_allgather_algorithm", id))
        });

    if let Some((parameter, id)) = selector {
        args.extend(
            [
                "--mca",
                "coll_tuned_use_dynamic_rules",
                "1",
                "--mca",
                parameter,
            ]
            .map(str::to_owned),
        );
        args.push(id.to_string());
    }

    args.extend(config.command(binary));

    Ok(args)
}

/// check every member of a group against the declared key
pub fn check_group_member(key: GroupKey, config: &Configuration) -> Result<(), ContractViolation> {
    if config.nodes != key.nodes {
        return Err(ContractViolation::GroupMismatch {
            field: "number of nodes",
            expected: key.nodes,
            received: config.nodes,
        });
    }

    if config.job_repetition != key.job_repetition {
        return Err(ContractViolation::GroupMismatch {
            field: "job repetition",
            expected: key.job_repetition,
            received: config.job_repetition,
        });
    }

    Ok(())
}

/// All runner variants, see `Runner` for the shared contract
pub enum Runners {
    DryRun(dry_run::DryRunner),
    Local(local::LocalRunner),
    Lsf(lsf::LsfRunner),
}

impl Runner for Runners {
    fn run(&mut self, config: &Configuration) -> Result<(), RunnerError> {
        match self {
            Self::DryRun(runner) => runner.run(config),
            Self::Local(runner) => runner.run(config),
            Self::Lsf(runner) => runner.run(config),
        }
    }

    fn run_grouped(&mut self, key: GroupKey, configs: &[Configuration]) -> Result<(), RunnerError> {
        match self {
            Self::DryRun(runner) => runner.run_grouped(key, configs),
            Self::Local(runner) => runner.run_grouped(key, configs),
            Self::Lsf(runner) => runner.run_grouped(key, configs),
        }
    }

    fn collect(&mut self, repetition: u32, offset: u32) -> Result<CollectionReport, RunnerError> {
        match self {
            Self::DryRun(runner) => runner.collect(repetition, offset),
            Self::Local(runner) => runner.collect(repetition, offset),
            Self::Lsf(runner) => runner.collect(repetition, offset),
        }
    }

    fn verify(&mut self, repetition: u32) -> Result<bool, RunnerError> {
        match self {
            Self::DryRun(runner) => runner.verify(repetition),
            Self::Local(runner) => runner.verify(repetition),
            Self::Lsf(runner) => runner.verify(repetition),
        }
    }
}
