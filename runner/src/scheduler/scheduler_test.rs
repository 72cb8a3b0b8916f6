use super::*;
use crate::{
    collector::CollectionReport,
    implementation::Implementation,
    runners::{dry_run::tests::SharedBuffer, dry_run::DryRunner},
};
use std::collections::BTreeSet;

/// runner remembering every dispatch
#[derive(Debug, Default)]
struct Recorder {
    single: Vec<Configuration>,
    grouped: Vec<(GroupKey, Vec<Configuration>)>,
}

impl Runner for Recorder {
    fn run(&mut self, config: &Configuration) -> Result<(), RunnerError> {
        self.single.push(config.clone());
        Ok(())
    }

    fn run_grouped(&mut self, key: GroupKey, configs: &[Configuration]) -> Result<(), RunnerError> {
        self.grouped.push((key, configs.to_vec()));
        Ok(())
    }

    fn collect(&mut self, _repetition: u32, _offset: u32) -> Result<CollectionReport, RunnerError> {
        Err(RunnerError::Unsupported {
            runner: "recorder",
            operation: "collect",
        })
    }

    fn verify(&mut self, _repetition: u32) -> Result<bool, RunnerError> {
        Ok(true)
    }
}

fn sweep() -> Vec<Configuration> {
    let implementations = ["allreduce", "allgather", "allreduce-native-ring"]
        .map(|name| Implementation::lookup(name).unwrap());

    let mut configs = Vec::new();
    for n in [16, 4096, 65536] {
        for nodes in [2, 4, 48, 64] {
            for implementation in implementations {
                for job_repetition in 0..2 {
                    configs.push(
                        Configuration::new(n, n, nodes, implementation)
                            .with_job_repetition(job_repetition),
                    );
                }
            }
        }
    }

    configs
}

#[test]
fn configurations_are_sorted_and_unique() {
    let mut scheduler = Scheduler::new(Recorder::default());
    let mut reversed = sweep();
    reversed.reverse();

    scheduler.register(reversed);
    scheduler.register(sweep());

    let configs = scheduler.configurations();
    assert_eq!(configs.len(), sweep().len());
    assert!(configs.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn registering_twice_is_idempotent() {
    let mut once = Scheduler::new(Recorder::default());
    once.register(sweep());

    let mut twice = Scheduler::new(Recorder::default());
    twice.register(sweep());
    twice.register(sweep());
    twice.register_one(sweep()[0].clone());

    assert_eq!(once.configurations(), twice.configurations());
    assert_eq!(twice.configurations(), twice.configurations());
}

#[test]
fn valid_configurations_apply_runnable() {
    let mut scheduler = Scheduler::new(Recorder::default());
    scheduler.register(sweep());

    let valid = scheduler.valid_configurations();
    let expected = scheduler
        .configurations()
        .into_iter()
        .filter(|c| c.nodes <= 48 && c.memory_usage() <= 128_000)
        .collect::<Vec<_>>();

    assert_eq!(valid, expected);
    assert!(valid.iter().all(|c| c.nodes <= 48));
    assert!(valid.len() < scheduler.configurations().len());
}

#[test]
fn run_dispatches_everything_in_order() {
    let mut scheduler = Scheduler::new(Recorder::default());
    scheduler.register(sweep());

    scheduler.run().unwrap();

    // validity is up to the runner
    assert_eq!(scheduler.runner().single, scheduler.configurations());
    assert!(scheduler.runner().grouped.is_empty());
}

#[test]
fn groups_partition_valid_configurations() {
    let mut scheduler = Scheduler::new(Recorder::default());
    scheduler.register(sweep());

    scheduler.run_grouped().unwrap();

    let grouped = &scheduler.runner().grouped;
    for (key, members) in grouped.iter() {
        assert!(!members.is_empty());
        assert!(members.iter().all(|c| c.group_key() == *key));
        assert!(members.windows(2).all(|pair| pair[0] < pair[1]));
    }

    // keys are unique and visited in order
    assert!(grouped.windows(2).all(|pair| pair[0].0 < pair[1].0));

    let union = grouped
        .iter()
        .flat_map(|(_, members)| members.iter().cloned())
        .collect::<BTreeSet<_>>();
    let valid = scheduler
        .valid_configurations()
        .into_iter()
        .collect::<BTreeSet<_>>();
    assert_eq!(union, valid);
    assert_eq!(
        grouped.iter().map(|(_, members)| members.len()).sum::<usize>(),
        valid.len()
    );
}

#[test]
fn grouping_key_is_nodes_and_job_repetition() {
    let mut scheduler = Scheduler::new(Recorder::default());
    scheduler.register(sweep());

    let keys = scheduler
        .groups()
        .into_iter()
        .map(|(key, _)| (key.nodes, key.job_repetition))
        .collect::<Vec<_>>();

    assert_eq!(keys, [(2, 0), (2, 1), (4, 0), (4, 1), (48, 0), (48, 1)]);
}

#[test]
fn dry_run_reports_every_configuration() {
    let buffer = SharedBuffer::default();
    let mut scheduler = Scheduler::new(DryRunner::new(Box::new(buffer.clone())));
    scheduler.register(sweep());

    scheduler.run().unwrap();

    let output = buffer.contents();
    let unrunnable = scheduler.configurations().len() - scheduler.valid_configurations().len();
    assert_eq!(
        output.lines().count(),
        scheduler.configurations().len() + unrunnable
    );
    assert_eq!(output.matches("not runnable").count(), unrunnable);
}

#[test]
fn runner_errors_stop_dispatch() {
    struct Failing(usize);

    impl Runner for Failing {
        fn run(&mut self, _config: &Configuration) -> Result<(), RunnerError> {
            self.0 += 1;
            Err(RunnerError::Unsupported {
                runner: "failing",
                operation: "run",
            })
        }

        fn run_grouped(&mut self, _key: GroupKey, _configs: &[Configuration]) -> Result<(), RunnerError> {
            Ok(())
        }

        fn collect(&mut self, _repetition: u32, _offset: u32) -> Result<CollectionReport, RunnerError> {
            Ok(CollectionReport::default())
        }

        fn verify(&mut self, _repetition: u32) -> Result<bool, RunnerError> {
            Ok(true)
        }
    }

    let mut scheduler = Scheduler::new(Failing(0));
    scheduler.register(sweep());

    assert!(scheduler.run().is_err());
    assert_eq!(scheduler.runner().0, 1);
}
