use crate::implementation::Implementation;
use std::{
    fmt,
    path::{Component, Path},
};
use thiserror::Error;

/// maximum number of nodes a single job may request on the cluster
pub const MAX_NODES: u32 = 48;
/// maximum memory (MB) a single job may request on the cluster
pub const MAX_MEMORY: u64 = 128_000;
/// problem size from which memory is requested proportionally to the matrix size
const MEMORY_SIZE_THRESHOLD: u64 = 8192;
/// flat per node allowance (MB) below `MEMORY_SIZE_THRESHOLD`
const MEMORY_PER_NODE: u64 = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unrunnable {
    #[error("the cluster supports only up to {max} nodes, requested {nodes}")]
    TooManyNodes { nodes: u32, max: u32 },
    #[error("too much memory requested ({requested} > {max})")]
    TooMuchMemory { requested: u64, max: u64 },
}

/// A single benchmark run
///
/// Field order matters: the derived ordering is lexicographic over the fields in declaration
/// order and defines the submission order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Configuration {
    pub n: u64,
    pub m: u64,
    pub nodes: u32,
    pub implementation: Implementation,
    /// repetitions within a job, passed as `-t`
    pub repetitions: u32,
    /// distinguishes repeated submissions of the same shape
    pub job_repetition: u32,
    pub verify: bool,
}

/// the unit of grouped submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub nodes: u32,
    pub job_repetition: u32,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.nodes, self.job_repetition)
    }
}

impl Configuration {
    pub fn new(n: u64, m: u64, nodes: u32, implementation: Implementation) -> Self {
        Self {
            n,
            m,
            nodes,
            implementation,
            repetitions: 1,
            job_repetition: 0,
            verify: false,
        }
    }

    pub fn with_repetitions(mut self, repetitions: u32) -> Self {
        self.repetitions = repetitions;
        self
    }

    pub fn with_job_repetition(mut self, job_repetition: u32) -> Self {
        self.job_repetition = job_repetition;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            nodes: self.nodes,
            job_repetition: self.job_repetition,
        }
    }

    /// memory (MB) to request for the whole job
    pub fn memory_usage(&self) -> u64 {
        if self.n < MEMORY_SIZE_THRESHOLD && self.m < MEMORY_SIZE_THRESHOLD {
            return MEMORY_PER_NODE * u64::from(self.nodes);
        }

        // saturated values are far beyond MAX_MEMORY
        (u128::from(self.n) * u128::from(self.m) / (1 << 15))
            .checked_mul(u128::from(self.nodes))
            .and_then(|usage| u64::try_from(usage).ok())
            .unwrap_or(u64::MAX)
    }

    pub fn runnable(&self) -> Result<(), Unrunnable> {
        if self.nodes > MAX_NODES {
            return Err(Unrunnable::TooManyNodes {
                nodes: self.nodes,
                max: MAX_NODES,
            });
        }

        let requested = self.memory_usage();
        if requested > MAX_MEMORY {
            return Err(Unrunnable::TooMuchMemory {
                requested,
                max: MAX_MEMORY,
            });
        }

        Ok(())
    }

    /// arguments for the benchmark binary, starting with the binary itself
    pub fn command(&self, binary: &Path) -> Vec<String> {
        let mut args = vec![
            executable_path(binary),
            "-n".to_owned(),
            self.n.to_string(),
            "-m".to_owned(),
            self.m.to_string(),
            "-t".to_owned(),
            self.repetitions.to_string(),
            "-i".to_owned(),
            self.implementation.name.to_owned(),
        ];

        if self.verify {
            args.push("-c".to_owned());
        }

        args
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.n == self.m {
            write!(f, "{}", self.n)?;
        } else {
            write!(f, "{}x{}", self.n, self.m)?;
        }

        write!(
            f,
            ", {} nodes, {}, {}x",
            self.nodes, self.implementation, self.repetitions
        )?;

        if self.verify {
            f.write_str(" [verification]")?;
        }

        Ok(())
    }
}

// a bare relative path would be resolved through PATH by the launcher
fn executable_path(binary: &Path) -> String {
    match binary.components().next() {
        Some(Component::Normal(_)) => format!("./{}", binary.display()),
        _ => binary.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::{hash_map::DefaultHasher, HashSet},
        hash::{Hash, Hasher},
        path::PathBuf,
    };

    fn allreduce() -> Implementation {
        Implementation::lookup("allreduce").unwrap()
    }

    #[test]
    fn memory_usage_below_threshold_is_flat() {
        let config = Configuration::new(4096, 4096, 8, allreduce());

        assert_eq!(config.memory_usage(), 8192);
    }

    #[test]
    fn memory_usage_above_threshold_scales() {
        let config = Configuration::new(16384, 16384, 4, allreduce());

        assert_eq!(config.memory_usage(), 32768);
        // only one dimension has to cross the threshold
        assert_eq!(
            Configuration::new(8192, 16, 2, allreduce()).memory_usage(),
            (8192 * 16 / 32768) * 2
        );
    }

    #[test]
    fn runnable_rejects_too_many_nodes() {
        assert!(Configuration::new(16, 16, 48, allreduce()).runnable().is_ok());
        assert_eq!(
            Configuration::new(16, 16, 49, allreduce()).runnable(),
            Err(Unrunnable::TooManyNodes { nodes: 49, max: 48 })
        );
    }

    #[test]
    fn runnable_rejects_too_much_memory() {
        // 65536^2 / 2^15 * 2 = 262144
        let config = Configuration::new(65536, 65536, 2, allreduce());

        assert_eq!(
            config.runnable(),
            Err(Unrunnable::TooMuchMemory {
                requested: 262144,
                max: 128_000
            })
        );
        assert!(config
            .runnable()
            .unwrap_err()
            .to_string()
            .contains("too much memory"));
    }

    #[test]
    fn huge_sizes_are_too_much_memory() {
        let config = Configuration::new(1 << 33, 1 << 33, 2, allreduce());

        // 2^66 / 2^15 * 2
        assert_eq!(config.memory_usage(), 1 << 52);
        assert!(matches!(
            config.runnable(),
            Err(Unrunnable::TooMuchMemory { .. })
        ));

        let config = Configuration::new(u64::MAX, u64::MAX, MAX_NODES, allreduce());
        assert_eq!(config.memory_usage(), u64::MAX);
        assert!(config.runnable().is_err());
        assert_eq!(
            Configuration::new(u64::MAX, u64::MAX, u32::MAX, allreduce()).memory_usage(),
            u64::MAX
        );
    }

    #[test]
    fn runnable_matches_validity_gate() {
        for n in [16, 4096, 8192, 16384, 32768] {
            for nodes in [1, 2, 8, 32, 48, 49, 64] {
                let config = Configuration::new(n, n, nodes, allreduce());
                let expected = nodes <= MAX_NODES && config.memory_usage() <= MAX_MEMORY;

                assert_eq!(config.runnable().is_ok(), expected, "{config}");
            }
        }
    }

    #[test]
    fn equality_covers_every_field() {
        let base = Configuration::new(16, 16, 2, allreduce());
        let hash = |config: &Configuration| {
            let mut hasher = DefaultHasher::new();
            config.hash(&mut hasher);
            hasher.finish()
        };

        assert_eq!(base, base.clone());
        assert_eq!(hash(&base), hash(&base.clone()));
        assert_ne!(base, base.clone().with_job_repetition(1));
        assert_ne!(base, base.clone().with_repetitions(3));
        assert_ne!(base, base.clone().with_verify(true));

        let set: HashSet<_> = [base.clone(), base.clone(), base.with_verify(true)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ordering_is_lexicographic_over_fields() {
        let small = Configuration::new(16, 16, 32, allreduce());
        let large = Configuration::new(32, 16, 2, allreduce());

        assert!(small < large);
        assert!(small.clone() < small.clone().with_verify(true));
        assert!(small.clone().with_job_repetition(0) < small.with_job_repetition(1));
    }

    #[test]
    fn command_reflects_all_fields() {
        let config = Configuration::new(16, 32, 4, allreduce())
            .with_repetitions(10)
            .with_verify(true);

        assert_eq!(
            config.command(&PathBuf::from("code/build_output/main")),
            [
                "./code/build_output/main",
                "-n",
                "16",
                "-m",
                "32",
                "-t",
                "10",
                "-i",
                "allreduce",
                "-c"
            ]
        );
    }

    #[test]
    fn command_keeps_explicit_paths() {
        let config = Configuration::new(16, 16, 4, allreduce());

        assert_eq!(config.command(&PathBuf::from("/opt/bench/main"))[0], "/opt/bench/main");
        assert_eq!(config.command(&PathBuf::from("./main"))[0], "./main");
        assert!(!config.command(&PathBuf::from("main")).contains(&"-c".to_owned()));
    }

    #[test]
    fn display_matches_sweep_logs() {
        let square = Configuration::new(16, 16, 4, allreduce()).with_repetitions(10);
        let rect = Configuration::new(16, 32, 2, allreduce()).with_verify(true);

        assert_eq!(square.to_string(), "16, 4 nodes, allreduce, 10x");
        assert_eq!(
            rect.to_string(),
            "16x32, 2 nodes, allreduce, 1x [verification]"
        );
    }
}
