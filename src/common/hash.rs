//! Partition hashing for storegrid
//!
//! The coordinator routes with these functions and every worker decides
//! ownership with the same ones, so they must stay bit-for-bit identical
//! on both sides.

/// 64-bit partition hash of a store name: the first 8 bytes of BLAKE3, little endian.
pub fn partition_hash(name: &str) -> u64 {
    let hash = blake3::hash(name.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(prefix)
}

/// Worker id owning `store_name` in a cluster of `total_workers`.
///
/// A cluster with no workers maps everything to worker 0.
pub fn owner_of(store_name: &str, total_workers: usize) -> usize {
    if total_workers == 0 {
        return 0;
    }
    (partition_hash(store_name) % total_workers as u64) as usize
}

/// Replica targets following `primary` in ring order.
///
/// Returns at most `replication_factor - 1` distinct ids, never including
/// the primary itself.
pub fn replica_ids(primary: usize, total_workers: usize, replication_factor: usize) -> Vec<usize> {
    if total_workers <= 1 {
        return Vec::new();
    }
    let extra = replication_factor
        .saturating_sub(1)
        .min(total_workers - 1);
    (1..=extra)
        .map(|offset| (primary + offset) % total_workers)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_owner_deterministic() {
        for n in 1..8 {
            assert_eq!(owner_of("PizzaWorld", n), owner_of("PizzaWorld", n));
        }
    }

    #[test]
    fn test_owner_in_range() {
        let names = [
            "PizzaWorld",
            "CoffeeCorner",
            "SouvlakiKing",
            "BurgerZone",
            "BakeryDelight",
            "AsiaFusion",
            "TacoPlace",
        ];
        for n in 1..6 {
            for name in names {
                assert!(owner_of(name, n) < n);
            }
        }
    }

    #[test]
    fn test_zero_workers() {
        assert_eq!(owner_of("anything", 0), 0);
    }

    #[test]
    fn test_single_worker_owns_everything() {
        assert_eq!(owner_of("a", 1), 0);
        assert_eq!(owner_of("b", 1), 0);
    }

    #[test]
    fn test_names_spread_across_workers() {
        let owners: HashSet<usize> = (0..200)
            .map(|i| owner_of(&format!("store-{}", i), 4))
            .collect();
        assert_eq!(owners.len(), 4);
    }

    #[test]
    fn test_replica_ids() {
        assert_eq!(replica_ids(0, 3, 2), vec![1]);
        assert_eq!(replica_ids(2, 3, 2), vec![0]);
        assert_eq!(replica_ids(1, 4, 3), vec![2, 3]);
        // Never wraps onto the primary
        assert_eq!(replica_ids(0, 2, 5), vec![1]);
        assert!(replica_ids(0, 1, 2).is_empty());
        assert!(replica_ids(0, 3, 1).is_empty());
    }
}
