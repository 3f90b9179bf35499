//! Reduced-result table
//!
//! A client waiting on an aggregation registers a one-shot slot keyed by
//! `(command, job id)` before the command is fanned out; the reducer's
//! delivery resolves it exactly once.

use crate::common::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

type ResultKey = (String, String);

#[derive(Default)]
pub struct ResultTable {
    slots: Mutex<HashMap<ResultKey, oneshot::Sender<String>>>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ResultKey, oneshot::Sender<String>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a slot for `(command, job_id)`.
    pub fn register(self: &Arc<Self>, command: &str, job_id: &str) -> PendingResult {
        let (tx, rx) = oneshot::channel();
        let key = (command.to_string(), job_id.to_string());
        self.lock().insert(key.clone(), tx);
        PendingResult {
            key,
            rx,
            table: self.clone(),
        }
    }

    /// Resolve a slot. Returns false if nobody is waiting for it.
    pub fn deliver(&self, command: &str, job_id: &str, merged: String) -> bool {
        let slot = self
            .lock()
            .remove(&(command.to_string(), job_id.to_string()));
        match slot {
            Some(tx) => tx.send(merged).is_ok(),
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }
}

/// A registered wait. Dropping it releases the slot.
pub struct PendingResult {
    key: ResultKey,
    rx: oneshot::Receiver<String>,
    table: Arc<ResultTable>,
}

impl PendingResult {
    /// Wait for the reducer, logging every `recheck` while the job is
    /// outstanding. Shutdown converts the wait into an error.
    pub async fn wait(
        mut self,
        recheck: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<String> {
        let (command, job_id) = self.key.clone();
        let mut waited = Duration::ZERO;
        loop {
            if *shutdown.borrow() {
                return Err(Error::Interrupted(format!("{} result", command)));
            }
            tokio::select! {
                merged = &mut self.rx => {
                    return merged.map_err(|_| {
                        Error::Internal(format!("result slot for job {} closed", job_id))
                    });
                }
                _ = tokio::time::sleep(recheck) => {
                    waited += recheck;
                    tracing::warn!(
                        %job_id,
                        %command,
                        "Reduced result still pending after {:?}",
                        waited
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Err(Error::Interrupted(format!("{} result", command)));
                    }
                }
            }
        }
    }
}

impl Drop for PendingResult {
    fn drop(&mut self) {
        self.table.lock().remove(&self.key);
    }
}
