//! Placement of directed and store-admin commands
//!
//! The primary is the partition owner of the target store; replicas are the
//! next workers in ring order and only ever receive best-effort pushes.

use crate::common::{owner_of, replica_ids, Error, Result};
use std::net::SocketAddr;

/// Where one command goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub primary_id: usize,
    pub primary: SocketAddr,
    pub replicas: Vec<SocketAddr>,
}

/// Placement handles primary and replica selection for store-scoped commands.
#[derive(Debug, Clone)]
pub struct Placement {
    /// Primary plus replicas
    replication_factor: usize,
}

impl Placement {
    pub fn new(replication_factor: usize) -> Self {
        Self {
            replication_factor: replication_factor.max(1),
        }
    }

    /// Select the primary and replica workers for `store_name`.
    /// `workers` is indexed by worker id.
    pub fn route(&self, store_name: &str, workers: &[SocketAddr]) -> Result<Route> {
        if workers.is_empty() {
            return Err(Error::NoWorkers);
        }
        let primary_id = owner_of(store_name, workers.len());
        let replicas = replica_ids(primary_id, workers.len(), self.replication_factor)
            .into_iter()
            .map(|id| workers[id])
            .collect();
        Ok(Route {
            primary_id,
            primary: workers[primary_id],
            replicas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workers(n: u16) -> Vec<SocketAddr> {
        (0..n)
            .map(|i| SocketAddr::from(([127, 0, 0, 1], 20000 + i)))
            .collect()
    }

    #[test]
    fn test_primary_matches_partition_owner() {
        let placement = Placement::new(2);
        let workers = workers(3);
        let route = placement.route("PizzaWorld", &workers).unwrap();
        let owner = owner_of("PizzaWorld", 3);
        assert_eq!(route.primary_id, owner);
        assert_eq!(route.primary, workers[owner]);
        assert_eq!(route.replicas, vec![workers[(owner + 1) % 3]]);
    }

    #[test]
    fn test_single_worker_has_no_replicas() {
        let placement = Placement::new(3);
        let route = placement.route("PizzaWorld", &workers(1)).unwrap();
        assert_eq!(route.primary_id, 0);
        assert!(route.replicas.is_empty());
    }

    #[test]
    fn test_no_workers() {
        let placement = Placement::new(2);
        assert!(matches!(
            placement.route("PizzaWorld", &[]),
            Err(Error::NoWorkers)
        ));
    }

    #[test]
    fn test_replication_capped_by_cluster() {
        let placement = Placement::new(5);
        let route = placement.route("CoffeeCorner", &workers(3)).unwrap();
        assert_eq!(route.replicas.len(), 2);
        assert!(!route.replicas.contains(&route.primary));
    }
}
