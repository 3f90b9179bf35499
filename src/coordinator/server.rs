//! Coordinator server
//!
//! One task per inbound connection. The first line decides what the peer is:
//! a worker handshake, a worker shutdown notice, a reducer delivery, or a
//! client command followed by its payload line.

use crate::catalog::Aggregation;
use crate::common::protocol::{
    is_error_envelope, is_rejected_reply, ReduceResult, ACK, REDUCE_RESULT, WORKER_HANDSHAKE,
    WORKER_SHUTDOWN_PREFIX,
};
use crate::common::{
    generate_job_id, Command, CoordinatorConfig, Error, LineStream, Result, Routing,
};
use crate::coordinator::membership::{AdminEvent, Membership};
use crate::coordinator::placement::{Placement, Route};
use crate::coordinator::results::ResultTable;
use crate::coordinator::worker_client::WorkerClient;
use futures_util::future::join_all;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::Instrument;

/// Shared coordinator state handed to every connection handler.
pub struct CoordState {
    config: CoordinatorConfig,
    pub membership: Membership,
    pub results: Arc<ResultTable>,
    placement: Placement,
    shutdown: watch::Receiver<bool>,
    /// Held while a store-admin command is dispatched and logged
    admin_turn: Mutex<()>,
    /// Mirror and reload work for accepted admin events, in log order
    admin_queue: mpsc::UnboundedSender<AdminFollowUp>,
}

impl CoordState {
    fn client(&self, addr: SocketAddr) -> WorkerClient {
        WorkerClient::new(addr, self.config.worker_timeout())
    }

    async fn wait_for_workers(&self) -> Result<Vec<SocketAddr>> {
        let mut shutdown = self.shutdown.clone();
        self.membership
            .wait_for_workers(self.config.recheck_interval(), &mut shutdown)
            .await
    }
}

pub struct CoordinatorServer {
    config: CoordinatorConfig,
}

impl CoordinatorServer {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let coordinator = Coordinator::bind(self.config).await?;
        coordinator
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await
    }
}

/// A bound coordinator.
pub struct Coordinator {
    listener: TcpListener,
    state: Arc<CoordState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Coordinator {
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        tracing::info!("Starting coordinator");
        tracing::info!("  Listening: {}", listener.local_addr()?);
        tracing::info!("  Replication factor: {}", config.replication_factor);
        tracing::info!("  Recheck interval: {:?}", config.recheck_interval());

        let (shutdown_tx, shutdown) = watch::channel(false);
        let (admin_queue, follow_ups) = mpsc::unbounded_channel();
        let state = Arc::new(CoordState {
            placement: Placement::new(config.replication_factor),
            membership: Membership::new(),
            results: Arc::new(ResultTable::new()),
            config,
            shutdown,
            admin_turn: Mutex::new(()),
            admin_queue,
        });
        tokio::spawn(drain_admin_queue(state.clone(), follow_ups));

        Ok(Self {
            listener,
            state,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<CoordState> {
        self.state.clone()
    }

    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::info!("✓ Coordinator ready");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let state = self.state.clone();
                            let span = tracing::info_span!("conn", %peer);
                            tokio::spawn(
                                async move {
                                    if let Err(e) = handle_connection(stream, peer, state).await {
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

        // Wake every pending wait so its client gets an error reply
        let _ = self.shutdown_tx.send(true);
        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<CoordState>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut conn = LineStream::new(stream);

    let first = match conn.read_line().await {
        Ok(Some(line)) => line.trim().to_string(),
        Ok(None) => return Ok(()),
        Err(e @ Error::Protocol(_)) => return conn.write_line(&e.to_envelope()).await,
        Err(e) => return Err(e),
    };

    if first == WORKER_HANDSHAKE {
        return admit_worker(&mut conn, peer, &state).await;
    }
    if let Some(id) = first.strip_prefix(WORKER_SHUTDOWN_PREFIX) {
        return release_worker(&mut conn, id, peer, &state).await;
    }
    if first == REDUCE_RESULT {
        let result = ReduceResult::read_body(&mut conn).await?;
        if !state
            .results
            .deliver(&result.command, &result.job_id, result.merged)
        {
            tracing::warn!(
                job_id = %result.job_id,
                command = %result.command,
                "Reduced result has no waiting client"
            );
        }
        return conn.write_line(ACK).await;
    }

    let payload = match conn.expect_line().await {
        Ok(payload) => payload,
        Err(e @ Error::Protocol(_)) => return conn.write_line(&e.to_envelope()).await,
        Err(e) => return Err(e),
    };
    let command = Command::parse(&first);
    let job_id = generate_job_id();
    let span = tracing::info_span!("job", %job_id, %command);

    async {
        tracing::debug!("Payload: {}", payload);
        let reply = match execute(&state, &command, &payload, &job_id).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_client_error() {
                    tracing::debug!("Rejected: {}", e);
                } else {
                    tracing::warn!("Failed: {}", e);
                }
                e.to_envelope()
            }
        };
        conn.write_line(&reply).await
    }
    .instrument(span)
    .await
}

/// Handshake: assign an id, stream the admin log, close, then reload everyone.
async fn admit_worker(conn: &mut LineStream, peer: SocketAddr, state: &CoordState) -> Result<()> {
    let port: u16 = conn
        .expect_line()
        .await?
        .trim()
        .parse()
        .map_err(|_| Error::Protocol("handshake port is not a number".into()))?;
    let addr = SocketAddr::new(peer.ip(), port);

    let admission = state.membership.register(addr);
    conn.write_line(&admission.assignment.encode()).await?;
    for event in &admission.replay {
        event.write_to(conn).await?;
    }
    conn.finish().await?;

    tracing::info!(
        "Worker {} registered at {} ({} total, {} replayed events)",
        admission.assignment.worker_id,
        addr,
        admission.assignment.total_workers,
        admission.replay.len()
    );

    broadcast_reload(state, &admission.workers, &generate_job_id()).await;
    Ok(())
}

/// Shutdown notice: drop the worker, renumber the ones above it, reload.
async fn release_worker(
    conn: &mut LineStream,
    id: &str,
    peer: SocketAddr,
    state: &CoordState,
) -> Result<()> {
    let id: usize = id.trim().parse()?;
    let port: u16 = conn
        .expect_line()
        .await?
        .trim()
        .parse()
        .map_err(|_| Error::Protocol("shutdown notice port is not a number".into()))?;
    let addr = SocketAddr::new(peer.ip(), port);
    let departure = match state.membership.unregister(id, addr) {
        Ok(departure) => departure,
        Err(e) => {
            tracing::warn!("Shutdown notice rejected: {}", e);
            return conn.write_line(&e.to_envelope()).await;
        }
    };
    conn.write_line(ACK).await?;
    tracing::info!("Worker {} left, {} remaining", id, departure.workers.len());

    let job_id = generate_job_id();
    for (addr, assignment) in &departure.renumbered {
        if let Err(e) = state.client(*addr).decrement_id(*assignment, &job_id).await {
            tracing::warn!("Renumbering worker at {} failed: {}", addr, e);
        }
    }
    broadcast_reload(state, &departure.workers, &job_id).await;
    Ok(())
}

async fn broadcast_reload(state: &CoordState, workers: &[SocketAddr], job_id: &str) {
    let total = workers.len();
    if total == 0 {
        return;
    }
    let reloads = workers.iter().map(|addr| async move {
        (*addr, state.client(*addr).reload(total, job_id).await)
    });
    for (addr, outcome) in join_all(reloads).await {
        if let Err(e) = outcome {
            tracing::warn!("Reload of worker at {} failed: {}", addr, e);
        }
    }
    tracing::debug!("Reload broadcast to {} workers", total);
}

/// Mirror and reload work for one logged admin event.
struct AdminFollowUp {
    command: Command,
    payload: String,
    job_id: String,
    primary: SocketAddr,
    /// Workers registered when the event was logged; later joiners get it by replay
    workers: Vec<SocketAddr>,
}

impl AdminFollowUp {
    /// Mirror the command to every other worker's global list, then reload.
    async fn run(self, state: &CoordState) {
        let command = self.command.as_str();
        let payload = self.payload.as_str();
        let job_id = self.job_id.as_str();

        let mirrors = self
            .workers
            .iter()
            .filter(|addr| **addr != self.primary)
            .map(|addr| async move {
                (*addr, state.client(*addr).send_command(command, payload, job_id).await)
            });
        for (addr, outcome) in join_all(mirrors).await {
            if let Err(e) = outcome {
                tracing::warn!("Mirroring {} to {} failed: {}", command, addr, e);
            }
        }
        broadcast_reload(state, &state.membership.workers(), job_id).await;
    }
}

/// Run admin follow-ups one at a time, in the order they were logged.
async fn drain_admin_queue(
    state: Arc<CoordState>,
    mut follow_ups: mpsc::UnboundedReceiver<AdminFollowUp>,
) {
    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            next = follow_ups.recv() => match next {
                Some(follow_up) => follow_up.run(&state).await,
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn execute(
    state: &CoordState,
    command: &Command,
    payload: &str,
    job_id: &str,
) -> Result<String> {
    match command.routing() {
        Routing::StoreAdmin => {
            let store_name = command.target_store(payload)?;

            // One admin command at a time: primaries, the log and the mirror
            // queue all see the same order
            let _turn = state.admin_turn.lock().await;
            let workers = state.wait_for_workers().await?;
            let route = state.placement.route(&store_name, &workers)?;
            let reply = dispatch_with_fallback(state, &route, command, payload, job_id).await?;
            if is_rejected_reply(&reply) {
                return Ok(reply);
            }

            let event = match command {
                Command::AddStore => AdminEvent::add_store(payload.trim(), job_id),
                _ => AdminEvent::remove_store(store_name, job_id),
            };
            let workers = state.membership.record_admin(event);
            let follow_up = AdminFollowUp {
                command: command.clone(),
                payload: payload.to_string(),
                job_id: job_id.to_string(),
                primary: route.primary,
                workers,
            };
            if state.admin_queue.send(follow_up).is_err() {
                tracing::warn!("Admin queue closed; {} not mirrored", command);
            }
            Ok(reply)
        }
        Routing::Directed => {
            let store_name = command.target_store(payload)?;
            let workers = state.wait_for_workers().await?;
            let route = state.placement.route(&store_name, &workers)?;
            dispatch_with_fallback(state, &route, command, payload, job_id).await
        }
        Routing::Aggregable => {
            Aggregation::parse(command, payload)?;
            let workers = state.wait_for_workers().await?;
            aggregate(state, &workers, command, payload, job_id).await
        }
        Routing::Broadcast => {
            let workers = state.wait_for_workers().await?;
            let replies = workers.iter().map(|addr| async move {
                state
                    .client(*addr)
                    .send_command(command.as_str(), payload, job_id)
                    .await
                    .unwrap_or_else(|e| e.to_envelope())
            });
            let replies: Vec<String> = join_all(replies).await;
            Ok(serde_json::to_string(&replies)?)
        }
    }
}

/// Send to the primary. On a transport failure or an error envelope, push
/// the same command to the replicas without waiting on them.
async fn dispatch_with_fallback(
    state: &CoordState,
    route: &Route,
    command: &Command,
    payload: &str,
    job_id: &str,
) -> Result<String> {
    tracing::debug!("Primary is worker {} at {}", route.primary_id, route.primary);
    let outcome = state
        .client(route.primary)
        .send_command(command.as_str(), payload, job_id)
        .await;

    let failure = match &outcome {
        Ok(body) if !is_error_envelope(body) => None,
        Ok(body) => Some(body.clone()),
        Err(e) => Some(e.to_string()),
    };
    let Some(failure) = failure else {
        return outcome;
    };

    tracing::warn!(
        "Primary worker {} failed ({}), pushing to {} replicas",
        route.primary_id,
        failure,
        route.replicas.len()
    );
    for replica in &route.replicas {
        let client = state.client(*replica);
        let command = command.as_str().to_string();
        let payload = payload.to_string();
        let job_id = job_id.to_string();
        let replica = *replica;
        tokio::spawn(async move {
            match client.send_command(&command, &payload, &job_id).await {
                Ok(_) => tracing::debug!("Replica push to {} delivered", replica),
                Err(e) => tracing::warn!("Replica push to {} failed: {}", replica, e),
            }
        });
    }
    outcome
}

/// Fan out to every worker and wait for the reducer's merged result.
async fn aggregate(
    state: &CoordState,
    workers: &[SocketAddr],
    command: &Command,
    payload: &str,
    job_id: &str,
) -> Result<String> {
    // Registered before fan-out so an early delivery is never lost
    let pending = state.results.register(command.as_str(), job_id);

    let fan_out = {
        let clients: Vec<WorkerClient> = workers.iter().map(|addr| state.client(*addr)).collect();
        let command = command.as_str().to_string();
        let payload = payload.to_string();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            let sends = clients
                .iter()
                .map(|client| client.send_aggregation(&command, &payload, &job_id));
            for reply in join_all(sends).await {
                let body = reply?;
                if is_error_envelope(&body) {
                    return Err(Error::ConnectionFailed(body));
                }
            }
            Ok(())
        })
    };

    let wait = pending.wait(state.config.recheck_interval(), state.shutdown.clone());
    tokio::pin!(wait);

    tokio::select! {
        merged = &mut wait => merged,
        dispatched = fan_out => match dispatched {
            Ok(Ok(())) => wait.await,
            Ok(Err(e)) => Err(e),
            Err(e) => Err(Error::Internal(format!("fan-out task failed: {}", e))),
        },
    }
}
