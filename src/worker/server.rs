//! Worker server

use crate::common::protocol::{
    PartialSubmission, WorkerAssignment, ACK, CMD_RESPONSE_PREFIX, DECREMENT_ID, RELOAD,
    RELOAD_RESPONSE,
};
use crate::common::{retry_with_backoff, Command, LineStream, Result, WorkerConfig};
use crate::worker::link::{self, Enrollment};
use crate::worker::partition::PartitionedCatalog;
use crate::worker::processor::{execute, Execution};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

/// State shared by every connection handler of one worker.
pub struct WorkerState {
    pub catalog: Mutex<PartitionedCatalog>,
    reducer_addr: String,
    config: WorkerConfig,
}

impl WorkerState {
    /// Current `(worker_id, total_workers)`.
    pub fn assignment(&self) -> (usize, usize) {
        let catalog = self.lock();
        (catalog.worker_id(), catalog.total_workers())
    }

    /// Names of the stores this worker currently serves.
    pub fn owned_names(&self) -> Vec<String> {
        self.lock().owned_names()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PartitionedCatalog> {
        self.catalog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct WorkerServer {
    config: WorkerConfig,
}

impl WorkerServer {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Run until Ctrl-C, then announce the departure to the coordinator.
    pub async fn serve(self) -> Result<()> {
        let worker = Worker::start(self.config).await?;
        worker
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await
    }
}

/// A bound, enrolled worker ready to accept commands.
pub struct Worker {
    listener: TcpListener,
    state: Arc<WorkerState>,
    standalone: bool,
}

impl Worker {
    /// Bind the command port, enroll with the coordinator and apply the replay.
    ///
    /// The listener is bound first so commands sent right after enrollment
    /// queue up instead of being refused.
    pub async fn start(config: WorkerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Starting worker");
        tracing::info!("  Command port: {}", local_addr);
        tracing::info!("  Coordinator: {}", config.coordinator_addr);
        tracing::info!("  Reducer: {}", config.reducer_addr);

        let enrollment = retry_with_backoff(
            || link::handshake(&config.coordinator_addr, local_addr.port(), config.io_timeout()),
            config.handshake_retries,
            config.handshake_backoff(),
        )
        .await;

        let (enrollment, standalone) = match enrollment {
            Ok(enrollment) => (enrollment, false),
            Err(e) => {
                tracing::warn!("Coordinator unreachable ({}), running standalone as 0 of 1", e);
                let standalone = Enrollment {
                    assignment: WorkerAssignment {
                        worker_id: 0,
                        total_workers: 1,
                    },
                    replay: Vec::new(),
                };
                (standalone, true)
            }
        };

        let Enrollment { assignment, replay } = enrollment;
        let mut catalog = PartitionedCatalog::new(assignment.worker_id, assignment.total_workers);
        for event in &replay {
            if let Err(e) = catalog.apply_replay(event) {
                tracing::warn!("Skipping malformed replay event: {}", e);
            }
        }

        tracing::info!(
            "✓ Worker {} of {} ready ({} replayed events, {} stores owned)",
            assignment.worker_id,
            assignment.total_workers,
            replay.len(),
            catalog.owned_names().len()
        );

        let state = Arc::new(WorkerState {
            catalog: Mutex::new(catalog),
            reducer_addr: config.reducer_addr.clone(),
            config,
        });

        Ok(Self {
            listener,
            state,
            standalone,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<WorkerState> {
        self.state.clone()
    }

    /// Accept commands until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let state = self.state.clone();
                            let span = tracing::debug_span!("worker_conn", %peer);
                            tokio::spawn(
                                async move {
                                    if let Err(e) = handle_connection(stream, state).await {
                                        tracing::debug!("Connection ended with error: {}", e);
                                    }
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => tracing::error!("Accept failed: {}", e),
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        if !self.standalone {
            let (worker_id, _) = self.state.assignment();
            let port = self.listener.local_addr()?.port();
            let config = &self.state.config;
            let notice = link::notify_shutdown(
                &config.coordinator_addr,
                worker_id,
                port,
                config.io_timeout(),
            );
            match notice.await {
                Ok(()) => tracing::info!("Worker {} deregistered", worker_id),
                Err(e) => tracing::warn!("Shutdown notice failed: {}", e),
            }
        }
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<WorkerState>) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut conn = LineStream::new(stream);

    while let Some(command) = conn.read_line().await? {
        let payload = conn.expect_line().await?;
        let job_id = conn.expect_line().await?;
        let reply = dispatch(&state, command.trim(), &payload, &job_id).await;
        conn.write_line(&reply).await?;
    }
    Ok(())
}

async fn dispatch(state: &WorkerState, command: &str, payload: &str, job_id: &str) -> String {
    match command {
        RELOAD => match payload.trim().parse::<usize>() {
            Ok(total) if total > 0 => {
                let owned = state.lock().reload(total);
                tracing::info!("Reloaded for {} workers, {} stores owned", total, owned);
                RELOAD_RESPONSE.to_string()
            }
            _ => crate::Error::Protocol(format!("bad reload total: {}", payload)).to_envelope(),
        },
        DECREMENT_ID => match WorkerAssignment::parse_pair(payload) {
            Ok(assignment) => {
                let owned = state.lock().reassign(assignment);
                tracing::info!(
                    "Renumbered to worker {} of {}, {} stores owned",
                    assignment.worker_id,
                    assignment.total_workers,
                    owned
                );
                ACK.to_string()
            }
            Err(e) => e.to_envelope(),
        },
        _ => {
            let command = Command::parse(command);
            tracing::debug!(job_id, "{} {}", command, payload);

            // Lock scope ends before any network I/O
            let (execution, total_workers) = {
                let mut catalog = state.lock();
                let execution = execute(&mut catalog, &command, payload);
                (execution, catalog.total_workers())
            };

            let body = match execution {
                Execution::Reply(pairs) => serde_json::to_string(&pairs)
                    .unwrap_or_else(|e| crate::Error::from(e).to_envelope()),
                Execution::Partial(pairs) => {
                    let submission = PartialSubmission {
                        job_id: job_id.to_string(),
                        command: command.as_str().to_string(),
                        expected_partials: total_workers,
                        pairs,
                    };
                    forward_partial(state, &submission).await
                }
            };
            format!("{}{}", CMD_RESPONSE_PREFIX, body)
        }
    }
}

async fn forward_partial(state: &WorkerState, submission: &PartialSubmission) -> String {
    match link::submit_partial(&state.reducer_addr, submission, state.config.io_timeout()).await {
        Ok(()) => serde_json::json!({ "status": "Mapping output sent" }).to_string(),
        Err(e) => {
            tracing::warn!(job_id = %submission.job_id, "Reducer submission failed: {}", e);
            serde_json::json!({ "error": format!("Error connecting to reduce server: {}", e) })
                .to_string()
        }
    }
}
