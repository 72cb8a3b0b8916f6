use crate::{
    config::SweepConfig, configuration::Configuration, implementation::Implementation,
};
use itertools::iproduct;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Expand a sweep into its cross product of configurations
///
/// Unknown implementation names are logged and left out, `BenchConfig::preflight_checks` is
/// expected to have rejected them before.
pub fn expand(name: &str, sweep: &SweepConfig) -> Vec<Configuration> {
    let implementations = sweep
        .implementations
        .iter()
        .filter_map(|implementation| match Implementation::lookup(implementation) {
            Some(found) => Some(found),
            None => {
                error!("sweeps.{name}: skipping unknown implementation '{implementation}'");
                None
            }
        })
        .collect::<Vec<_>>();

    let configs = iproduct!(
        sweep.sizes.iter(),
        sweep.nodes.iter(),
        implementations.iter(),
        0..sweep.job_repetitions
    )
    .map(|(&size, &nodes, &implementation, job_repetition)| {
        Configuration::new(size, size, nodes, implementation)
            .with_repetitions(sweep.repetitions)
            .with_job_repetition(job_repetition)
            .with_verify(sweep.verify)
    })
    .collect::<Vec<_>>();

    debug!("sweeps.{name} expanded into {} configurations", configs.len());

    configs
}

/// Expand all sweeps whose `verify` flag equals `verification`
pub fn select(sweeps: &BTreeMap<String, SweepConfig>, verification: bool) -> Vec<Configuration> {
    sweeps
        .iter()
        .filter(|(_, sweep)| sweep.verify == verification)
        .flat_map(|(name, sweep)| expand(name, sweep))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(verify: bool) -> SweepConfig {
        SweepConfig {
            sizes: vec![16, 32],
            nodes: vec![2, 4, 8],
            implementations: vec!["allreduce".to_owned(), "allgather".to_owned()],
            repetitions: 10,
            job_repetitions: 2,
            verify,
        }
    }

    #[test]
    fn expands_full_cross_product() {
        let configs = expand("test", &sweep(false));

        assert_eq!(configs.len(), 2 * 3 * 2 * 2);
        assert!(configs.iter().all(|c| c.n == c.m && c.repetitions == 10));
        assert!(configs.iter().any(|c| c.job_repetition == 1));
        assert!(configs.iter().all(|c| c.job_repetition < 2));
    }

    #[test]
    fn unknown_implementations_are_dropped() {
        let mut broken = sweep(false);
        broken.implementations.push("allreduce-quantum".to_owned());

        assert_eq!(expand("broken", &broken).len(), 24);
    }

    #[test]
    fn selects_by_verification_flag() {
        let sweeps = BTreeMap::from([
            ("timing".to_owned(), sweep(false)),
            ("check".to_owned(), sweep(true)),
        ]);

        let verification = select(&sweeps, true);
        assert_eq!(verification.len(), 24);
        assert!(verification.iter().all(|c| c.verify));
        assert!(select(&sweeps, false).iter().all(|c| !c.verify));
    }
}
