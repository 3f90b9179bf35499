//! Reducer server

use crate::common::protocol::{PartialSubmission, ReduceResult, ACK};
use crate::common::{with_timeout, Error, LineStream, ReducerConfig, Result};
use crate::reducer::jobs::{wait_complete, JobTable, Submission};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

pub struct ReducerServer {
    config: ReducerConfig,
}

impl ReducerServer {
    pub fn new(config: ReducerConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let reducer = Reducer::bind(self.config).await?;
        reducer
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await
    }
}

/// A bound reducer.
pub struct Reducer {
    listener: TcpListener,
    jobs: Arc<JobTable>,
    config: Arc<ReducerConfig>,
}

impl Reducer {
    pub async fn bind(config: ReducerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        tracing::info!("Starting reducer");
        tracing::info!("  Listening: {}", listener.local_addr()?);
        tracing::info!("  Coordinator: {}", config.coordinator_addr);

        Ok(Self {
            listener,
            jobs: Arc::new(JobTable::new()),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn jobs(&self) -> Arc<JobTable> {
        self.jobs.clone()
    }

    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::info!("✓ Reducer ready");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let jobs = self.jobs.clone();
                            let config = self.config.clone();
                            let span = tracing::debug_span!("reducer_conn", %peer);
                            tokio::spawn(
                                async move {
                                    if let Err(e) = handle_connection(stream, jobs, config).await {
                                        tracing::warn!("Partial submission failed: {}", e);
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

        tracing::info!("Reducer stopped with {} jobs in flight", self.jobs.in_flight());
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    jobs: Arc<JobTable>,
    config: Arc<ReducerConfig>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut conn = LineStream::new(stream);

    while let Some(submission) = PartialSubmission::read_from(&mut conn).await? {
        let job_id = submission.job_id.clone();
        tracing::debug!(
            %job_id,
            command = %submission.command,
            pairs = submission.pairs.len(),
            "Partial received"
        );

        match jobs.submit(submission)? {
            Submission::Completed(result) => {
                let config = config.clone();
                tokio::spawn(async move {
                    if let Err(e) = deliver(&config, &result).await {
                        // The coordinator's wait for this job will never resolve
                        tracing::error!(job_id = %result.job_id, "Result delivery failed: {}", e);
                    }
                });
            }
            Submission::Waiting(rx) => wait_complete(rx).await,
            Submission::Late => {}
        }

        jobs.acknowledge(&job_id);
        conn.write_line(ACK).await?;
    }
    Ok(())
}

/// Push a merged result to the coordinator. Not retried.
pub async fn deliver(config: &ReducerConfig, result: &ReduceResult) -> Result<()> {
    let timeout = config.io_timeout();
    let mut conn = LineStream::connect(&config.coordinator_addr, timeout).await?;
    result.write_to(&mut conn).await?;
    let reply = with_timeout(timeout, "coordinator ack", conn.expect_line()).await?;
    if reply != ACK {
        return Err(Error::Protocol(format!("unexpected coordinator reply: {}", reply)));
    }
    tracing::debug!(job_id = %result.job_id, "Result delivered");
    Ok(())
}
