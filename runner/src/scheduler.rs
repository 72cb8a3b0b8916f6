use crate::{
    configuration::{Configuration, GroupKey},
    runners::{Runner, RunnerError},
};
use itertools::Itertools;
use tracing::{debug, info, instrument};

/// Accumulates configurations and dispatches them to a runner
#[derive(Debug)]
pub struct Scheduler<R> {
    configs: Vec<Configuration>,
    runner: R,
}

impl<R: Runner> Scheduler<R> {
    pub fn new(runner: R) -> Self {
        Self {
            configs: Vec::new(),
            runner,
        }
    }

    pub fn register<I>(&mut self, configs: I)
    where
        I: IntoIterator<Item = Configuration>,
    {
        self.configs.extend(configs);
    }

    pub fn register_one(&mut self, config: Configuration) {
        self.configs.push(config);
    }

    /// all registered configurations, sorted and without duplicates
    pub fn configurations(&self) -> Vec<Configuration> {
        self.configs.iter().sorted().dedup().cloned().collect_vec()
    }

    /// like `configurations` but only the runnable ones
    pub fn valid_configurations(&self) -> Vec<Configuration> {
        self.configs
            .iter()
            .sorted()
            .dedup()
            .filter(|config| config.runnable().is_ok())
            .cloned()
            .collect_vec()
    }

    /// valid configurations partitioned by `(nodes, job_repetition)`, in key order
    pub fn groups(&self) -> Vec<(GroupKey, Vec<Configuration>)> {
        let mut configs = self.valid_configurations();
        // stable, members keep the total order within their group
        configs.sort_by_key(Configuration::group_key);

        configs
            .into_iter()
            .group_by(Configuration::group_key)
            .into_iter()
            .map(|(key, group)| (key, group.collect_vec()))
            .collect_vec()
    }

    /// dispatch every configuration on its own
    #[instrument(skip(self), level = "info")]
    pub fn run(&mut self) -> Result<(), RunnerError> {
        let configs = self.configurations();
        info!("Dispatching {} configurations", configs.len());

        for config in configs.iter() {
            self.runner.run(config)?;
        }

        Ok(())
    }

    /// dispatch one batch per grouping key
    #[instrument(skip(self), level = "info")]
    pub fn run_grouped(&mut self) -> Result<(), RunnerError> {
        let groups = self.groups();
        info!("Dispatching {} groups", groups.len());

        for (key, configs) in groups.iter() {
            debug!("Group {key} holds {} configurations", configs.len());
            self.runner.run_grouped(*key, configs)?;
        }

        Ok(())
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }
}

#[cfg(test)]
mod scheduler_test;
