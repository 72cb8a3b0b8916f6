use crate::{
    config::CollectionConfig,
    ledger::{self, Ledger},
    report::{self, JobMetadata, ReportError},
};
use serde_json::{Map, Value};
use std::{
    fs::{self, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("no ledger found for repetition {repetition} at {path}")]
    MissingLedger {
        repetition: u32,
        path: PathBuf,
        source: io::Error,
    },
    #[error("repetition {repetition} shifted by {offset} exceeds the largest repetition number")]
    OffsetOverflow { repetition: u32, offset: u32 },
    #[error("no job output file found (yet): {path}")]
    MissingOutput { path: PathBuf },
    #[error("failed to read {path}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {path}")]
    Write { path: PathBuf, source: io::Error },
    #[error("unreadable job report")]
    Report(#[from] ReportError),
    #[error("failed to parse line {line_nr}, \"{subject}\": {reason}")]
    MalformedLine {
        line_nr: usize,
        subject: String,
        reason: String,
    },
}

/// Line of program output that could not be used as a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    pub line_nr: usize,
    pub content: String,
    pub reason: String,
}

/// Records recovered from a single job report
#[derive(Debug, Clone)]
pub struct ParsedJob {
    pub job: JobMetadata,
    pub subject: String,
    /// records up to the first malformed line
    pub records: Vec<Map<String, Value>>,
    /// the malformed line processing stopped at, if any
    pub malformed: Option<MalformedLine>,
}

/// outcome of collecting one repetition
#[derive(Debug, Default)]
pub struct CollectionReport {
    pub repetition: u32,
    pub output: PathBuf,
    pub records: usize,
    pub collected: Vec<String>,
    pub failures: Vec<(String, CollectionError)>,
}

/// Turns the raw job reports of a repetition into JSON lines
#[derive(Debug, Clone)]
pub struct Collector<'a> {
    raw_dir: &'a Path,
    parsed_dir: &'a Path,
    config: &'a CollectionConfig,
}

impl<'a> Collector<'a> {
    pub fn new(raw_dir: &'a Path, parsed_dir: &'a Path, config: &'a CollectionConfig) -> Self {
        Self {
            raw_dir,
            parsed_dir,
            config,
        }
    }

    pub fn output_path(&self, repetition: u32) -> PathBuf {
        self.parsed_dir.join(format!("{repetition}.json"))
    }

    /// Parse the report of a single job, stopping at the first malformed payload line
    pub fn parse_job(&self, job_id: &str) -> Result<ParsedJob, CollectionError> {
        let path = self.raw_dir.join(job_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CollectionError::MissingOutput { path })
            }
            Err(source) => return Err(CollectionError::Read { path, source }),
        };

        let lines = content.lines().collect::<Vec<_>>();
        let subject = report::subject(&lines).to_owned();
        let job = JobMetadata::parse(job_id, &lines)?;
        let payload = report::payload_lines(&lines, self.config.padding);

        if payload.is_empty() {
            error!(job = %job_id, "no usable data lines found, {subject}");
        }

        let mut records = Vec::with_capacity(payload.len());
        let mut malformed = None;

        for (line_nr, line) in payload {
            match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(record)) => records.push(record),
                Ok(other) => {
                    malformed = Some(MalformedLine {
                        line_nr,
                        content: line.to_owned(),
                        reason: format!("expected a JSON object, got {other}"),
                    });
                    break;
                }
                Err(e) => {
                    malformed = Some(MalformedLine {
                        line_nr,
                        content: line.to_owned(),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        if let Some(ref line) = malformed {
            error!(
                job = %job_id,
                line = %line.content,
                "failed to parse line {}, \"{subject}\": {}",
                line.line_nr,
                line.reason
            );
        }

        Ok(ParsedJob {
            job,
            subject,
            records,
            malformed,
        })
    }

    /// Collect all jobs of `repetition` into `<parsed>/<repetition + offset>.json`
    ///
    /// Records are appended so several raw directories can be merged into one parsed set.
    /// Failures of single jobs are logged and reported, only a missing ledger or an
    /// unwritable output fails the whole call.
    #[instrument(skip(self), level = "info")]
    pub fn collect(&self, repetition: u32, offset: u32) -> Result<CollectionReport, CollectionError> {
        let target = repetition
            .checked_add(offset)
            .ok_or(CollectionError::OffsetOverflow { repetition, offset })?;

        let ledger = Ledger::new(self.raw_dir, repetition);
        let job_ids = ledger
            .job_ids()
            .map_err(|source| CollectionError::MissingLedger {
                repetition,
                path: ledger.path().to_path_buf(),
                source,
            })?;

        let output = self.output_path(target);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&output)
            .map_err(|source| CollectionError::Write {
                path: output.clone(),
                source,
            })?;
        let mut writer = BufWriter::new(file);

        let mut collection = CollectionReport {
            repetition: target,
            output: output.clone(),
            ..Default::default()
        };

        for job_id in job_ids {
            let parsed = match self.parse_job(&job_id) {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!(job = %job_id, "{e}");
                    collection.failures.push((job_id, e));
                    continue;
                }
            };

            let records = match parsed.malformed {
                Some(line) if !self.config.keep_partial_jobs => {
                    collection.failures.push((
                        job_id,
                        CollectionError::MalformedLine {
                            line_nr: line.line_nr,
                            subject: parsed.subject,
                            reason: line.reason,
                        },
                    ));
                    continue;
                }
                Some(line) => {
                    warn!(
                        job = %job_id,
                        "keeping {} records preceding malformed line {}",
                        parsed.records.len(),
                        line.line_nr
                    );
                    parsed.records
                }
                None => parsed.records,
            };

            let job = serde_json::to_value(&parsed.job)
                .map_err(|e| CollectionError::Write {
                    path: output.clone(),
                    source: e.into(),
                })?;

            for mut record in records {
                record.insert("job".to_owned(), job.clone());
                if offset != 0 {
                    record.insert("repetition".to_owned(), Value::from(target));
                }

                write_record(&mut writer, &record).map_err(|source| CollectionError::Write {
                    path: output.clone(),
                    source,
                })?;
                collection.records += 1;
            }

            debug!(job = %job_id, "collected");
            collection.collected.push(job_id);
        }

        writer.flush().map_err(|source| CollectionError::Write {
            path: output.clone(),
            source,
        })?;

        info!(
            "Collected {} records from {} jobs into {}, {} jobs failed",
            collection.records,
            collection.collected.len(),
            output.display(),
            collection.failures.len()
        );

        Ok(collection)
    }
}

fn write_record<W: Write>(writer: &mut W, record: &Map<String, Value>) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")
}

/// remove all parsed `*.json` outputs, returns how many were removed
pub fn clear_parsed(parsed_dir: &Path) -> io::Result<usize> {
    let mut removed = 0;

    for entry in ledger::dir_entries(parsed_dir) {
        let path = entry.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
            fs::remove_file(path)?;
            removed += 1;
        }
    }

    Ok(removed)
}
