//! Per-job correlation of partial map outputs
//!
//! ```text
//! PENDING --(received == expected)--> COMPLETE --(acked == received)--> RETIRED
//! ```
//!
//! The partial that brings a job to its expected count performs the merge
//! and hands the result back to the caller for delivery. Every submitter
//! waits for `COMPLETE` before it is acknowledged; once all of them have
//! been acknowledged the job is dropped from the table.

use crate::catalog::merge_pairs;
use crate::common::protocol::{PartialSubmission, ReduceResult};
use crate::common::{KeyValue, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::watch;

/// Retired job ids remembered so stray partials are acked, not re-opened.
const RETIRED_MEMORY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Complete,
    Retired,
}

struct Job {
    command: String,
    expected: usize,
    pairs: Vec<KeyValue>,
    received: usize,
    acked: usize,
    phase: JobPhase,
    done: watch::Sender<bool>,
}

/// What a submitter must do after its partial was recorded.
#[derive(Debug)]
pub enum Submission {
    /// This partial completed the job; deliver the merged result.
    Completed(ReduceResult),
    /// Wait on the receiver until the job completes.
    Waiting(watch::Receiver<bool>),
    /// The job had already completed or retired; ack right away.
    Late,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    retired: HashSet<String>,
    retired_order: VecDeque<String>,
}

/// In-flight job table shared by all reducer connections.
#[derive(Default)]
pub struct JobTable {
    inner: Mutex<Inner>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one worker's partial output.
    pub fn submit(&self, submission: PartialSubmission) -> Result<Submission> {
        let PartialSubmission {
            job_id,
            command,
            expected_partials,
            pairs,
        } = submission;

        let mut inner = self.lock();
        if inner.retired.contains(&job_id) {
            tracing::warn!(%job_id, "Partial for retired job");
            return Ok(Submission::Late);
        }

        let job = inner.jobs.entry(job_id.clone()).or_insert_with(|| {
            tracing::debug!(%job_id, %command, expected_partials, "New job");
            Job {
                command,
                expected: expected_partials,
                pairs: Vec::new(),
                received: 0,
                acked: 0,
                phase: JobPhase::Pending,
                done: watch::channel(false).0,
            }
        });

        if job.expected != expected_partials {
            tracing::warn!(
                %job_id,
                "Partial expects {} contributors, job was opened with {}",
                expected_partials,
                job.expected
            );
        }

        job.received += 1;
        if job.phase != JobPhase::Pending {
            tracing::warn!(%job_id, "Late partial after completion");
            return Ok(Submission::Late);
        }

        job.pairs.extend(pairs);
        if job.received < job.expected {
            return Ok(Submission::Waiting(job.done.subscribe()));
        }

        let merged = serde_json::to_string(&merge_pairs(std::mem::take(&mut job.pairs)))?;
        job.phase = JobPhase::Complete;
        job.done.send_replace(true);
        tracing::debug!(%job_id, "Job complete");

        Ok(Submission::Completed(ReduceResult {
            job_id,
            command: job.command.clone(),
            merged,
        }))
    }

    /// Count one acknowledged submitter; retires the job once every
    /// received partial has been acknowledged after completion.
    pub fn acknowledge(&self, job_id: &str) -> JobPhase {
        let mut inner = self.lock();
        let retire = match inner.jobs.get_mut(job_id) {
            Some(job) => {
                job.acked += 1;
                job.phase == JobPhase::Complete && job.acked >= job.received.max(job.expected)
            }
            None => return JobPhase::Retired,
        };

        if !retire {
            return inner
                .jobs
                .get(job_id)
                .map(|job| job.phase)
                .unwrap_or(JobPhase::Retired);
        }

        inner.jobs.remove(job_id);
        inner.retired.insert(job_id.to_string());
        inner.retired_order.push_back(job_id.to_string());
        while inner.retired_order.len() > RETIRED_MEMORY {
            if let Some(old) = inner.retired_order.pop_front() {
                inner.retired.remove(&old);
            }
        }
        tracing::debug!(job_id, "Job retired");
        JobPhase::Retired
    }

    pub fn in_flight(&self) -> usize {
        self.lock().jobs.len()
    }
}

/// Block until the job behind `rx` completes.
pub async fn wait_complete(mut rx: watch::Receiver<bool>) {
    // A closed channel means the job already retired
    let _ = rx.wait_for(|done| *done).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn partial(job: &str, expected: usize, pairs: &[(&str, &str)]) -> PartialSubmission {
        PartialSubmission {
            job_id: job.into(),
            command: "LIST_STORES".into(),
            expected_partials: expected,
            pairs: pairs.iter().map(|(k, v)| KeyValue::new(*k, *v)).collect(),
        }
    }

    #[test]
    fn test_completes_only_at_expected_count() {
        let table = JobTable::new();
        let first = table
            .submit(partial("j", 3, &[("LIST_STORES", "A")]))
            .unwrap();
        assert!(matches!(first, Submission::Waiting(_)));
        let second = table.submit(partial("j", 3, &[])).unwrap();
        assert!(matches!(second, Submission::Waiting(_)));
        assert_eq!(table.in_flight(), 1);

        let third = table
            .submit(partial("j", 3, &[("LIST_STORES", "B")]))
            .unwrap();
        let result = match third {
            Submission::Completed(result) => result,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(result.job_id, "j");
        assert_eq!(result.command, "LIST_STORES");
        let merged: BTreeMap<String, String> = serde_json::from_str(&result.merged).unwrap();
        assert_eq!(merged["LIST_STORES"], "A, B");
        // Still held until the three submitters are acknowledged
        assert_eq!(table.in_flight(), 1);
    }

    #[test]
    fn test_retires_after_all_acks() {
        let table = JobTable::new();
        table.submit(partial("j", 2, &[])).unwrap();
        table.submit(partial("j", 2, &[])).unwrap();

        assert_eq!(table.acknowledge("j"), JobPhase::Complete);
        assert_eq!(table.acknowledge("j"), JobPhase::Retired);
        assert_eq!(table.in_flight(), 0);

        // Stray partial after retirement does not reopen the job
        assert!(matches!(
            table.submit(partial("j", 2, &[])).unwrap(),
            Submission::Late
        ));
        assert_eq!(table.in_flight(), 0);
    }

    #[test]
    fn test_late_partial_counts_toward_ack_quota() {
        let table = JobTable::new();
        table.submit(partial("j", 1, &[("X", "1")])).unwrap();
        assert!(matches!(
            table.submit(partial("j", 1, &[("X", "2")])).unwrap(),
            Submission::Late
        ));
        assert_eq!(table.acknowledge("j"), JobPhase::Complete);
        assert_eq!(table.acknowledge("j"), JobPhase::Retired);
    }

    #[test]
    fn test_jobs_are_independent() {
        let table = JobTable::new();
        table.submit(partial("a", 2, &[])).unwrap();
        assert!(matches!(
            table.submit(partial("b", 1, &[])).unwrap(),
            Submission::Completed(_)
        ));
        assert_eq!(table.in_flight(), 2);
        assert!(matches!(
            table.submit(partial("a", 2, &[])).unwrap(),
            Submission::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_waiters_wake_on_completion() {
        let table = Arc::new(JobTable::new());
        let mut waiters = Vec::new();
        for i in 0..3 {
            let value = i.to_string();
            match table.submit(partial("j", 4, &[("K", value.as_str())])).unwrap() {
                Submission::Waiting(rx) => waiters.push(tokio::spawn(wait_complete(rx))),
                other => panic!("unexpected {:?}", other),
            }
        }
        for waiter in &waiters {
            assert!(!waiter.is_finished());
        }

        let result = match table.submit(partial("j", 4, &[("K", "3")])).unwrap() {
            Submission::Completed(result) => result,
            other => panic!("unexpected {:?}", other),
        };
        for waiter in waiters {
            tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }

        let merged: BTreeMap<String, String> = serde_json::from_str(&result.merged).unwrap();
        let mut values: Vec<&str> = merged["K"].split(", ").collect();
        values.sort();
        assert_eq!(values, vec!["0", "1", "2", "3"]);
    }
}
