//! Partitioned view of the store catalog held by one worker
//!
//! Every worker keeps the full store list (so a reload can recompute
//! ownership, including stores added after it joined) plus the subset it
//! currently owns. Only owned stores are served or mapped.

use crate::catalog::Store;
use crate::common::protocol::{ReplayEvent, WorkerAssignment};
use crate::common::{owner_of, Error, Result};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct PartitionedCatalog {
    worker_id: usize,
    total_workers: usize,
    stores: BTreeMap<String, Store>,
    owned: BTreeSet<String>,
    deleted_products: Vec<String>,
}

impl PartitionedCatalog {
    pub fn new(worker_id: usize, total_workers: usize) -> Self {
        Self {
            worker_id,
            total_workers,
            stores: BTreeMap::new(),
            owned: BTreeSet::new(),
            deleted_products: Vec::new(),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn total_workers(&self) -> usize {
        self.total_workers
    }

    /// Would this worker own `store_name` under the current assignment?
    pub fn owns(&self, store_name: &str) -> bool {
        owner_of(store_name, self.total_workers) == self.worker_id
    }

    /// Add to the global list; the store joins the partition if owned.
    pub fn add_store(&mut self, store: Store) -> Result<()> {
        if self.stores.contains_key(&store.name) {
            return Err(Error::StoreExists(store.name));
        }
        if self.owns(&store.name) {
            self.owned.insert(store.name.clone());
        }
        self.stores.insert(store.name.clone(), store);
        Ok(())
    }

    pub fn remove_store(&mut self, name: &str) -> Result<Store> {
        self.owned.remove(name);
        self.stores
            .remove(name)
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))
    }

    /// Apply one replayed admin event. Replays are idempotent: re-adding a
    /// known store or removing an unknown one is logged and ignored.
    pub fn apply_replay(&mut self, event: &ReplayEvent) -> Result<()> {
        let outcome = match event {
            ReplayEvent::AddStore { store_json, .. } => {
                let store = Store::from_json(store_json)?;
                self.add_store(store)
            }
            ReplayEvent::RemoveStore { store_name, .. } => {
                self.remove_store(store_name).map(|_| ())
            }
        };
        match outcome {
            Err(e @ (Error::StoreExists(_) | Error::StoreNotFound(_))) => {
                tracing::debug!("Replay skipped: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    /// New cluster size; recompute ownership. Returns the owned count.
    pub fn reload(&mut self, total_workers: usize) -> usize {
        self.total_workers = total_workers;
        self.repartition()
    }

    /// New id and cluster size after a peer left.
    pub fn reassign(&mut self, assignment: WorkerAssignment) -> usize {
        self.worker_id = assignment.worker_id;
        self.total_workers = assignment.total_workers;
        self.repartition()
    }

    fn repartition(&mut self) -> usize {
        let owned: BTreeSet<String> = self
            .stores
            .keys()
            .filter(|name| self.owns(name))
            .cloned()
            .collect();
        self.owned = owned;
        self.owned.len()
    }

    /// Look up a store this worker owns.
    pub fn owned_store_mut(&mut self, name: &str) -> Result<&mut Store> {
        if !self.owned.contains(name) {
            return Err(Error::StoreNotFound(name.to_string()));
        }
        self.stores
            .get_mut(name)
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))
    }

    pub fn owned_stores(&self) -> impl Iterator<Item = &Store> + '_ {
        self.owned.iter().filter_map(move |name| self.stores.get(name))
    }

    pub fn owned_names(&self) -> Vec<String> {
        self.owned.iter().cloned().collect()
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn record_deletion(&mut self, product: &str) {
        self.deleted_products.push(product.to_string());
    }

    pub fn deleted_products(&self) -> &[String] {
        &self.deleted_products
    }
}
