//! Worker-initiated exchanges with the coordinator and the reducer

use crate::common::protocol::{
    PartialSubmission, ReplayEvent, WorkerAssignment, ACK, WORKER_HANDSHAKE,
    WORKER_SHUTDOWN_PREFIX,
};
use crate::common::{with_timeout, Error, LineStream, Result};
use std::time::Duration;

/// Result of a successful handshake: our slot plus the admin history to replay.
#[derive(Debug)]
pub struct Enrollment {
    pub assignment: WorkerAssignment,
    pub replay: Vec<ReplayEvent>,
}

/// Announce our command port and collect the assignment and replay stream.
///
/// The coordinator closes the connection once the replay is complete.
pub async fn handshake(
    coordinator_addr: &str,
    command_port: u16,
    timeout: Duration,
) -> Result<Enrollment> {
    let mut conn = LineStream::connect(coordinator_addr, timeout).await?;
    conn.write_lines(&[WORKER_HANDSHAKE, &command_port.to_string()])
        .await?;

    let first = with_timeout(timeout, "handshake reply", conn.expect_line()).await?;
    let assignment = WorkerAssignment::parse(&first)?;

    let mut replay = Vec::new();
    while let Some(event) =
        with_timeout(timeout, "replay stream", ReplayEvent::read_from(&mut conn)).await?
    {
        replay.push(event);
    }

    Ok(Enrollment { assignment, replay })
}

/// Tell the coordinator this worker is leaving. The command port lets the
/// coordinator find us even if our id is stale.
pub async fn notify_shutdown(
    coordinator_addr: &str,
    worker_id: usize,
    command_port: u16,
    timeout: Duration,
) -> Result<()> {
    let mut conn = LineStream::connect(coordinator_addr, timeout).await?;
    let notice = format!("{}{}", WORKER_SHUTDOWN_PREFIX, worker_id);
    conn.write_lines(&[notice.as_str(), &command_port.to_string()])
        .await?;
    let reply = with_timeout(timeout, "shutdown ack", conn.expect_line()).await?;
    if reply != ACK {
        return Err(Error::Protocol(format!("unexpected shutdown reply: {}", reply)));
    }
    Ok(())
}

/// Forward map output to the reducer and wait for its `ACK`.
///
/// The reducer holds the connection until every expected partial for the
/// job has arrived, so only the connect is bounded.
pub async fn submit_partial(
    reducer_addr: &str,
    submission: &PartialSubmission,
    connect_timeout: Duration,
) -> Result<()> {
    let mut conn = LineStream::connect(reducer_addr, connect_timeout).await?;
    submission.write_to(&mut conn).await?;
    let reply = conn.expect_line().await?;
    if reply != ACK {
        return Err(Error::Protocol(format!("unexpected reducer reply: {}", reply)));
    }
    Ok(())
}
