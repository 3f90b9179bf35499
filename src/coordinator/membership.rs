//! Worker registry and dynamic admin log
//!
//! Worker ids are dense: a worker's id is its index in the registry. When a
//! worker leaves, every higher id shifts down by one.

use crate::common::protocol::{ReplayEvent, WorkerAssignment};
use crate::common::{Error, Result};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// An accepted store-admin event, kept for replay to later joiners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminEvent {
    pub replay: ReplayEvent,
}

impl AdminEvent {
    pub fn add_store(store_json: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            replay: ReplayEvent::AddStore {
                store_json: store_json.into(),
                job_id: job_id.into(),
            },
        }
    }

    pub fn remove_store(store_name: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            replay: ReplayEvent::RemoveStore {
                store_name: store_name.into(),
                job_id: job_id.into(),
            },
        }
    }
}

/// Outcome of registering a new worker.
#[derive(Debug)]
pub struct Admission {
    pub assignment: WorkerAssignment,
    /// Admin log snapshot taken atomically with the registration
    pub replay: Vec<ReplayEvent>,
    /// Every registered worker, the new one included
    pub workers: Vec<SocketAddr>,
}

/// Outcome of removing a worker.
#[derive(Debug)]
pub struct Departure {
    /// Workers whose id shifted down, with their new assignment
    pub renumbered: Vec<(SocketAddr, WorkerAssignment)>,
    /// Every worker still registered
    pub workers: Vec<SocketAddr>,
}

#[derive(Default)]
struct Inner {
    workers: Vec<SocketAddr>,
    admin_log: Vec<AdminEvent>,
}

#[derive(Default)]
pub struct Membership {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Assign the next id and snapshot the admin log in one critical section,
    /// so no accepted event is missed or duplicated for the newcomer.
    pub fn register(&self, addr: SocketAddr) -> Admission {
        let admission = {
            let mut inner = self.lock();
            inner.workers.push(addr);
            let total = inner.workers.len();
            Admission {
                assignment: WorkerAssignment {
                    worker_id: total - 1,
                    total_workers: total,
                },
                replay: inner.admin_log.iter().map(|e| e.replay.clone()).collect(),
                workers: inner.workers.clone(),
            }
        };
        self.changed.notify_waiters();
        admission
    }

    /// Remove the worker at `addr`, compacting the ids above it.
    ///
    /// `claimed_id` is the id the worker believes it has. It can be stale when
    /// a renumbering is still in flight, so the address decides.
    pub fn unregister(&self, claimed_id: usize, addr: SocketAddr) -> Result<Departure> {
        let mut inner = self.lock();
        let id = if inner.workers.get(claimed_id) == Some(&addr) {
            claimed_id
        } else {
            let id = inner
                .workers
                .iter()
                .position(|registered| *registered == addr)
                .ok_or_else(|| Error::Protocol(format!("unknown worker {}", addr)))?;
            tracing::warn!(
                "Worker at {} claimed id {} but is registered as {}",
                addr,
                claimed_id,
                id
            );
            id
        };
        inner.workers.remove(id);
        let total = inner.workers.len();
        let renumbered = inner
            .workers
            .iter()
            .enumerate()
            .skip(id)
            .map(|(worker_id, addr)| {
                (
                    *addr,
                    WorkerAssignment {
                        worker_id,
                        total_workers: total,
                    },
                )
            })
            .collect();
        Ok(Departure {
            renumbered,
            workers: inner.workers.clone(),
        })
    }

    /// Append an accepted admin event; returns the workers registered at
    /// that instant (the ones that will not see it via replay).
    pub fn record_admin(&self, event: AdminEvent) -> Vec<SocketAddr> {
        let mut inner = self.lock();
        inner.admin_log.push(event);
        inner.workers.clone()
    }

    pub fn workers(&self) -> Vec<SocketAddr> {
        self.lock().workers.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }

    pub fn admin_log(&self) -> Vec<AdminEvent> {
        self.lock().admin_log.clone()
    }

    /// Wait until at least one worker is registered, re-checking every
    /// `recheck`. Shutdown turns the wait into an error.
    pub async fn wait_for_workers(
        &self,
        recheck: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Vec<SocketAddr>> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let workers = self.workers();
            if !workers.is_empty() {
                return Ok(workers);
            }
            if *shutdown.borrow() {
                return Err(Error::Interrupted("worker registration".into()));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(recheck) => {
                    tracing::warn!("No workers registered; still waiting");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(Error::Interrupted("worker registration".into()));
                    }
                }
            }
        }
    }
}
