//! Text formats of the LSF tools
//!
//! These are scraped from plain text and break as soon as LSF changes its wording:
//! - `bsub` acknowledges a submission with `Job <ID> is submitted to queue <QUEUE>.`
//! - the job report written to `-o` embeds the program output between the line
//!   `The output (if any) follows:` and the line `PS:`, separated from both by padding lines
//! - resource usage is reported as `<key> : <value> <unit>` lines, an unavailable value is `-`
//! - `bjobs -json` reports the state of a job in `RECORDS[0].STAT`

use crate::config::PaddingConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const OUTPUT_START: &str = "The output (if any) follows:";
pub const OUTPUT_END: &str = "PS:";

pub const TURNAROUND_TIME: &str = "Turnaround time";
pub const RUN_TIME: &str = "Run time";
pub const REQUESTED_MEMORY: &str = "Total Requested Memory";
pub const MAX_MEMORY: &str = "Max Memory";

/// value LSF prints for resources it could not measure
pub const PLACEHOLDER: &str = "-";

static SUBMISSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Job <([^>]+)> is submitted to queue").expect("submission pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("expected exactly one line for key {key}, got {count}")]
    KeyCount { key: &'static str, count: usize },
    #[error("no value found for key {key} in {line:?}")]
    MissingValue { key: &'static str, line: String },
    #[error("invalid value {value:?} for key {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("malformed status output: {0}")]
    Status(String),
}

/// extract the job id from the output of `bsub`
pub fn parse_job_id(output: &str) -> Option<&str> {
    SUBMISSION_PATTERN
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str())
}

/// second line of a report, `Subject: Job <ID>: <command> in cluster <..> Done`
pub fn subject<'a>(lines: &[&'a str]) -> &'a str {
    lines.get(1).map(|line| line.trim()).unwrap_or_default()
}

/// Lines of program output with their 1-based line number
///
/// Empty if either sentinel is missing or the padding leaves nothing in between.
pub fn payload_lines<'a>(lines: &[&'a str], padding: PaddingConfig) -> Vec<(usize, &'a str)> {
    let start = lines.iter().rposition(|line| *line == OUTPUT_START);
    let end = lines.iter().rposition(|line| *line == OUTPUT_END);

    match (start, end) {
        (Some(start), Some(end)) => {
            let start = start + padding.leading;
            let end = end.saturating_sub(padding.trailing);

            if start >= end {
                return Vec::new();
            }

            lines[start..end]
                .iter()
                .enumerate()
                .map(|(offset, line)| (start + offset + 1, *line))
                .collect()
        }
        _ => Vec::new(),
    }
}

/// first token after the colon of the only line containing `key`
pub fn find_key<'a>(lines: &[&'a str], key: &'static str) -> Result<&'a str, ReportError> {
    let mut matching = lines.iter().filter(|line| line.contains(key));

    let line = match (matching.next(), matching.count()) {
        (Some(line), 0) => *line,
        (first, rest) => {
            return Err(ReportError::KeyCount {
                key,
                count: rest + usize::from(first.is_some()),
            })
        }
    };

    line.split(':')
        .nth(1)
        .and_then(|value| value.split_whitespace().next())
        .ok_or_else(|| ReportError::MissingValue {
            key,
            line: line.to_owned(),
        })
}

fn parse_key<T: std::str::FromStr>(lines: &[&str], key: &'static str) -> Result<T, ReportError> {
    let value = find_key(lines, key)?;

    value.parse().map_err(|_| ReportError::InvalidValue {
        key,
        value: value.to_owned(),
    })
}

/// Resource usage of a finished job, attached to every record as `job`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub id: String,
    /// seconds from submission to completion
    pub turnaround_time: u64,
    /// seconds
    pub runtime: u64,
    /// MB
    pub mem_requested: f64,
    /// MB, 0 when LSF could not measure it
    pub mem_max: f64,
}

impl JobMetadata {
    pub fn parse(job_id: &str, lines: &[&str]) -> Result<Self, ReportError> {
        let mem_max = match find_key(lines, MAX_MEMORY)? {
            PLACEHOLDER => 0.0,
            value => value.parse().map_err(|_| ReportError::InvalidValue {
                key: MAX_MEMORY,
                value: value.to_owned(),
            })?,
        };

        Ok(Self {
            id: job_id.to_owned(),
            turnaround_time: parse_key(lines, TURNAROUND_TIME)?,
            runtime: parse_key(lines, RUN_TIME)?,
            mem_requested: parse_key(lines, REQUESTED_MEMORY)?,
            mem_max,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Done,
    Pending,
    Running,
    Exited,
    Other(String),
}

impl JobStatus {
    pub fn from_stat(stat: &str) -> Self {
        match stat {
            "DONE" => Self::Done,
            "PEND" => Self::Pending,
            "RUN" => Self::Running,
            "EXIT" => Self::Exited,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn is_done(&self) -> bool {
        *self == Self::Done
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Exited => f.write_str("failed"),
            Self::Other(stat) => write!(f, "{stat}"),
        }
    }
}

#[derive(Deserialize)]
struct StatusOutput {
    #[serde(rename = "RECORDS", default)]
    records: Vec<StatusRecord>,
}

#[derive(Deserialize)]
struct StatusRecord {
    #[serde(rename = "STAT")]
    stat: Option<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

/// parse the output of `bjobs -o "jobid stat exit_code" -json <ID>`
pub fn parse_status(output: &str) -> Result<JobStatus, ReportError> {
    let parsed: StatusOutput =
        serde_json::from_str(output).map_err(|e| ReportError::Status(e.to_string()))?;

    match parsed.records.into_iter().next() {
        Some(StatusRecord {
            stat: Some(stat), ..
        }) => Ok(JobStatus::from_stat(&stat)),
        Some(StatusRecord {
            error: Some(error), ..
        }) => Err(ReportError::Status(error)),
        _ => Err(ReportError::Status("no STAT in first record".to_owned())),
    }
}
