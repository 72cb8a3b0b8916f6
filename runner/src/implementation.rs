use std::fmt;

/// A named algorithm variant of the benchmark binary
///
/// Native variants route the collective through the MPI library and select the algorithm with
/// the tuned collective component and carry a selector id. At most one of the two ids may be
/// set, which is only checked once a launch command is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Implementation {
    pub name: &'static str,
    pub allreduce_algorithm: Option<u8>,
    pub allgather_algorithm: Option<u8>,
}

impl Implementation {
    pub const fn custom(name: &'static str) -> Self {
        Self {
            name,
            allreduce_algorithm: None,
            allgather_algorithm: None,
        }
    }

    pub const fn native_allreduce(name: &'static str, algorithm: u8) -> Self {
        Self {
            name,
            allreduce_algorithm: Some(algorithm),
            allgather_algorithm: None,
        }
    }

    pub const fn native_allgather(name: &'static str, algorithm: u8) -> Self {
        Self {
            name,
            allreduce_algorithm: None,
            allgather_algorithm: Some(algorithm),
        }
    }

    /// look up a variant of the fixed catalog by its name
    pub fn lookup(name: &str) -> Option<Self> {
        IMPLEMENTATIONS
            .iter()
            .find(|implementation| implementation.name == name)
            .copied()
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub const IMPLEMENTATIONS: &[Implementation] = &[
    Implementation::custom("allgather"),
    Implementation::custom("allreduce"),
    Implementation::custom("allreduce-ring"),
    Implementation::custom("allreduce-ring-pipeline"),
    Implementation::custom("allreduce-butterfly"),
    Implementation::custom("allreduce-butterfly-segmented"),
    Implementation::custom("allgather-async"),
    Implementation::custom("allreduce-rabenseifner"),
    Implementation::custom("rabenseifner-gather"),
    Implementation::custom("rabenseifner-scatter"),
    Implementation::custom("g-rabenseifner-allgather"),
    Implementation::custom("g-rabenseifner-allgather-segmented"),
    Implementation::custom("g-rabenseifner-allgather-scatter"),
    Implementation::custom("g-rabenseifner-subgroup"),
    Implementation::custom("bruck-async"),
    // OpenMPI coll_tuned_allreduce_algorithm ids
    Implementation::native_allreduce("allreduce-native-basic_linear", 1),
    Implementation::native_allreduce("allreduce-native-nonoverlapping", 2),
    Implementation::native_allreduce("allreduce-native-recursive_doubling", 3),
    Implementation::native_allreduce("allreduce-native-ring", 4),
    Implementation::native_allreduce("allreduce-native-segmented_ring", 5),
    Implementation::native_allreduce("allreduce-native-rabenseifner", 6),
    // OpenMPI coll_tuned_allgather_algorithm ids
    Implementation::native_allgather("allgather-native-linear", 1),
    Implementation::native_allgather("allgather-native-bruck", 2),
    Implementation::native_allgather("allgather-native-recursive_doubling", 3),
    Implementation::native_allgather("allgather-native-ring", 4),
    Implementation::native_allgather("allgather-native-neighbor", 5),
    Implementation::native_allgather("allgather-native-sparbit", 6),
];
