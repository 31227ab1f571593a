//! Splits the configured six-axis force/torque list between the aggregate
//! transport and the legacy per-device analog transport.

/// Result of routing one flat name list across the two transports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportPartition {
    /// Names served by the aggregate view, sorted.
    pub aggregate: Vec<String>,
    /// Names left for the legacy analog view, sorted.
    pub legacy: Vec<String>,
}

/// Route `expected` names: those the aggregate reports go to the aggregate,
/// the rest go to the legacy transport.  Matching is exact and
/// case-sensitive.  Both inputs are sorted first, so the result depends only
/// on the two name sets.
///
/// Pass `None` for `aggregate_names` when no aggregate view was found; every
/// name then goes to the legacy transport.
pub fn partition_transports(
    aggregate_names: Option<&[String]>,
    expected: &[String],
) -> TransportPartition {
    let mut wanted = expected.to_vec();
    wanted.sort();
    wanted.dedup();

    let Some(aggregate_names) = aggregate_names else {
        return TransportPartition {
            aggregate: Vec::new(),
            legacy: wanted,
        };
    };

    let mut available = aggregate_names.to_vec();
    available.sort();

    let (aggregate, legacy) = wanted
        .into_iter()
        .partition(|name| available.binary_search(name).is_ok());

    TransportPartition { aggregate, legacy }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unmatched_names_fall_back_to_legacy() {
        let split = partition_transports(
            Some(names(&["r_leg_ft"]).as_slice()),
            &names(&["r_leg_ft", "r_foot_ft"]),
        );
        assert_eq!(split.aggregate, names(&["r_leg_ft"]));
        assert_eq!(split.legacy, names(&["r_foot_ft"]));
    }

    #[test]
    fn missing_aggregate_routes_everything_to_legacy() {
        let split = partition_transports(None, &names(&["r_leg_ft", "l_leg_ft"]));
        assert!(split.aggregate.is_empty());
        assert_eq!(split.legacy, names(&["l_leg_ft", "r_leg_ft"]));
    }

    #[test]
    fn extra_aggregate_instances_are_ignored() {
        let split = partition_transports(
            Some(names(&["l_arm_ft", "r_leg_ft", "l_leg_ft"]).as_slice()),
            &names(&["r_leg_ft"]),
        );
        assert_eq!(split.aggregate, names(&["r_leg_ft"]));
        assert!(split.legacy.is_empty());
    }

    #[test]
    fn matching_is_case_sensitive() {
        let split = partition_transports(Some(names(&["R_LEG_FT"]).as_slice()), &names(&["r_leg_ft"]));
        assert!(split.aggregate.is_empty());
        assert_eq!(split.legacy, names(&["r_leg_ft"]));
    }

    #[test]
    fn split_does_not_depend_on_input_order() {
        let a = partition_transports(
            Some(names(&["b", "a", "x"]).as_slice()),
            &names(&["c", "a", "b"]),
        );
        let b = partition_transports(
            Some(names(&["x", "a", "b"]).as_slice()),
            &names(&["b", "c", "a"]),
        );
        assert_eq!(a, b);
        assert_eq!(a, partition_transports(Some(names(&["b", "a", "x"]).as_slice()), &names(&["c", "a", "b"])));
    }
}
