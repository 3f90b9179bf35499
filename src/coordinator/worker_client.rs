//! Coordinator-side client for worker command ports

use crate::common::protocol::{
    WorkerAssignment, ACK, CMD_RESPONSE_PREFIX, DECREMENT_ID, RELOAD, RELOAD_RESPONSE,
};
use crate::common::{with_timeout, Error, LineStream, Result};
use std::net::SocketAddr;
use std::time::Duration;

pub struct WorkerClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl WorkerClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    async fn exchange(&self, lines: &[&str], bounded: bool) -> Result<String> {
        let mut conn = LineStream::connect(&self.addr.to_string(), self.timeout).await?;
        with_timeout(self.timeout, "worker write", conn.write_lines(lines)).await?;
        let reply = if bounded {
            with_timeout(self.timeout, "worker reply", conn.expect_line()).await
        } else {
            conn.expect_line().await
        };
        reply.map_err(|e| match e {
            Error::ConnectionClosed | Error::Io(_) => {
                Error::ConnectionFailed(format!("{}: {}", self.addr, e))
            }
            other => other,
        })
    }

    /// Send a command and return the worker's result body.
    pub async fn send_command(&self, command: &str, payload: &str, job_id: &str) -> Result<String> {
        let reply = self.exchange(&[command, payload, job_id], true).await?;
        strip_response(&reply)
    }

    /// Like [`send_command`](Self::send_command) but without a reply deadline.
    /// Aggregation replies only come back once the reducer has every partial.
    pub async fn send_aggregation(
        &self,
        command: &str,
        payload: &str,
        job_id: &str,
    ) -> Result<String> {
        let reply = self.exchange(&[command, payload, job_id], false).await?;
        strip_response(&reply)
    }

    pub async fn reload(&self, total_workers: usize, job_id: &str) -> Result<()> {
        let reply = self
            .exchange(&[RELOAD, &total_workers.to_string(), job_id], true)
            .await?;
        if reply != RELOAD_RESPONSE {
            return Err(Error::Protocol(format!("unexpected reload reply: {}", reply)));
        }
        Ok(())
    }

    pub async fn decrement_id(&self, assignment: WorkerAssignment, job_id: &str) -> Result<()> {
        let reply = self
            .exchange(&[DECREMENT_ID, &assignment.encode_pair(), job_id], true)
            .await?;
        if reply != ACK {
            return Err(Error::Protocol(format!("unexpected renumber reply: {}", reply)));
        }
        Ok(())
    }
}

fn strip_response(reply: &str) -> Result<String> {
    reply
        .strip_prefix(CMD_RESPONSE_PREFIX)
        .map(|body| body.to_string())
        .ok_or_else(|| Error::Protocol(format!("unexpected worker reply: {}", reply)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn fake_worker(
        reply: &'static str,
    ) -> (SocketAddr, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = LineStream::new(stream);
            let mut lines = Vec::new();
            for _ in 0..3 {
                lines.push(conn.expect_line().await.unwrap());
            }
            conn.write_line(reply).await.unwrap();
            lines
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_send_command_strips_prefix() {
        let (addr, worker) = fake_worker(r#"CMD_RESPONSE:[{"key":"A","value":"ok"}]"#).await;
        let client = WorkerClient::new(addr, Duration::from_secs(2));
        let body = client
            .send_command("REVIEW", "A|5", "job-1")
            .await
            .unwrap();
        assert_eq!(body, r#"[{"key":"A","value":"ok"}]"#);
        assert_eq!(worker.await.unwrap(), vec!["REVIEW", "A|5", "job-1"]);
    }

    #[tokio::test]
    async fn test_reload_expects_response() {
        let (addr, worker) = fake_worker(RELOAD_RESPONSE).await;
        let client = WorkerClient::new(addr, Duration::from_secs(2));
        client.reload(3, "job-2").await.unwrap();
        assert_eq!(worker.await.unwrap()[1], "3");

        let (addr, _worker) = fake_worker("nope").await;
        let client = WorkerClient::new(addr, Duration::from_secs(2));
        assert!(client.reload(3, "job-3").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_transport_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let client = WorkerClient::new(addr, Duration::from_millis(500));
        let err = client.send_command("REVIEW", "A|5", "job-4").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
    }
}
