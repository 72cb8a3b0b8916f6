use super::{prepare_cmd, Runner, RunnerError};
use crate::{
    collector::CollectionReport,
    config::LauncherConfig,
    configuration::{Configuration, GroupKey},
};
use std::{
    io::{Read, Write},
    path::PathBuf,
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, trace, warn};
use wait_timeout::ChildExt;

/// Runner that executes configurations one after another on this machine
pub struct LocalRunner {
    binary: PathBuf,
    launcher: LauncherConfig,
    timeout: Duration,
    output: Box<dyn Write>,
}

impl LocalRunner {
    pub fn new(
        binary: PathBuf,
        launcher: LauncherConfig,
        timeout: Duration,
        output: Box<dyn Write>,
    ) -> Self {
        Self {
            binary,
            launcher,
            timeout,
            output,
        }
    }

    fn execute(&mut self, args: &[String]) -> Result<(), RunnerError> {
        let (program, params) = match args.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };

        let start = Instant::now();

        let mut child = Command::new(program)
            .args(params)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        // stdout is drained while waiting, a full pipe would block the child
        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut output = String::new();
                stdout.read_to_string(&mut output).map(|_| output)
            })
        });

        match child.wait_timeout(self.timeout)? {
            Some(status) => {
                debug!(
                    "Finished in {} ms | status: {}",
                    start.elapsed().as_millis(),
                    status.success()
                );

                if !status.success() {
                    warn!(status = ?status, "Benchmark exited unsuccessfully");
                }
            }
            None => {
                // child hasn't exited yet
                warn!(
                    "Benchmark exceeded timeout of {}s, killing it",
                    self.timeout.as_secs()
                );
                child.kill()?;
                child.wait()?;
            }
        }

        let output = match reader.map(JoinHandle::join) {
            Some(Ok(output)) => output?,
            Some(Err(_)) => {
                warn!("Failed to read benchmark output");
                String::new()
            }
            None => String::new(),
        };

        trace!("Output: {output}");
        self.output.write_all(output.as_bytes())?;
        self.output.flush()?;

        Ok(())
    }
}

impl Runner for LocalRunner {
    #[instrument(skip(self), fields(config = %config), level = "info")]
    fn run(&mut self, config: &Configuration) -> Result<(), RunnerError> {
        if let Err(reason) = config.runnable() {
            warn!("skipping configuration: {reason}");
            return Ok(());
        }

        let args = prepare_cmd(config, &self.launcher, &self.binary)?;
        debug!("executing: {}", args.join(" "));

        self.execute(&args)
    }

    fn run_grouped(&mut self, key: GroupKey, configs: &[Configuration]) -> Result<(), RunnerError> {
        info!("Running group {key} with {} configurations", configs.len());

        for config in configs {
            if let Err(reason) = config.runnable() {
                warn!("skipping configuration: {reason}");
                continue;
            }

            super::check_group_member(key, config)?;
            self.run(config)?;
        }

        Ok(())
    }

    fn collect(&mut self, _repetition: u32, _offset: u32) -> Result<CollectionReport, RunnerError> {
        Err(RunnerError::Unsupported {
            runner: "local",
            operation: "collect",
        })
    }

    fn verify(&mut self, _repetition: u32) -> Result<bool, RunnerError> {
        Err(RunnerError::Unsupported {
            runner: "local",
            operation: "verify",
        })
    }
}
