//! Line-oriented wire protocol shared by coordinator, workers and reducer
//!
//! Every message is a fixed sequence of newline-terminated text lines on a
//! plain TCP connection. No length prefixes; a line may not itself contain
//! a newline, which is why structured payloads travel as compact JSON.
//!
//! ```text
//! client      -> coordinator  COMMAND / payload
//! coordinator -> worker       COMMAND / payload / jobId      => CMD_RESPONSE:<result>
//! worker      -> reducer      jobId / COMMAND / expected / pairs-json   => ACK
//! reducer     -> coordinator  REDUCE_RESULT / jobId / COMMAND / merged  => ACK
//! worker      -> coordinator  WORKER_HANDSHAKE / port  => WORKER_ASSIGN:id:total, replay..., EOF
//! coordinator -> worker       RELOAD / total / jobId   => RELOAD_RESPONSE: reloaded
//! coordinator -> worker       DECREMENT_ID / id:total / jobId => ACK
//! worker      -> coordinator  WORKER_SHUTDOWN:id / port => ACK
//! ```

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub const WORKER_HANDSHAKE: &str = "WORKER_HANDSHAKE";
pub const WORKER_ASSIGN_PREFIX: &str = "WORKER_ASSIGN:";
pub const WORKER_SHUTDOWN_PREFIX: &str = "WORKER_SHUTDOWN:";
pub const ADD_STORE_REPLAY: &str = "ADD_STORE(REPLAY)";
pub const REMOVE_STORE_REPLAY: &str = "REMOVE_STORE(REPLAY)";
pub const RELOAD: &str = "RELOAD";
pub const RELOAD_RESPONSE: &str = "RELOAD_RESPONSE: reloaded";
pub const DECREMENT_ID: &str = "DECREMENT_ID";
pub const REDUCE_RESULT: &str = "REDUCE_RESULT";
pub const CMD_RESPONSE_PREFIX: &str = "CMD_RESPONSE:";
pub const ACK: &str = "ACK";

/// Key used by workers to flag a client-input error inside a reply.
pub const ERROR_KEY: &str = "ERROR";

/// One intermediate (key, value) pair produced by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ERROR_KEY, message)
    }

    pub fn is_error(&self) -> bool {
        self.key == ERROR_KEY
    }
}

/// True if `reply` is an `{"error": ...}` envelope rather than a result.
pub fn is_error_envelope(reply: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(reply) {
        Ok(serde_json::Value::Object(map)) => map.contains_key("error"),
        _ => false,
    }
}

/// True if a worker reply reports a failure of any kind: an error envelope
/// or an `ERROR`-keyed pair.
pub fn is_rejected_reply(reply: &str) -> bool {
    if is_error_envelope(reply) {
        return true;
    }
    match serde_json::from_str::<Vec<KeyValue>>(reply) {
        Ok(pairs) => pairs.iter().any(KeyValue::is_error),
        Err(_) => false,
    }
}

/// Buffered line reader/writer over a byte stream.
pub struct LineStream<S = TcpStream> {
    inner: BufReader<S>,
}

impl LineStream<TcpStream> {
    /// Connect to `addr` (host:port), bounded by `timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionFailed(format!("{}: connect timed out", addr)))?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.inner.get_ref().peer_addr()?)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> LineStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Read one line without its terminator. `None` on a clean EOF.
    ///
    /// A line that is not UTF-8 is consumed and reported as
    /// [`Error::Protocol`], so the stream stays usable for a reply.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut raw = Vec::new();
        let n = self.inner.read_until(b'\n', &mut raw).await?;
        if n == 0 {
            return Ok(None);
        }
        let mut line = String::from_utf8(raw)
            .map_err(|_| Error::Protocol("line is not valid UTF-8".into()))?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Read one line, treating EOF as a protocol error.
    pub async fn expect_line(&mut self) -> Result<String> {
        self.read_line().await?.ok_or(Error::ConnectionClosed)
    }

    /// Write each line followed by `\n`, then flush.
    pub async fn write_lines(&mut self, lines: &[&str]) -> Result<()> {
        let mut buf = String::new();
        for line in lines {
            if line.contains('\n') {
                return Err(Error::Protocol("line payload contains a newline".into()));
            }
            buf.push_str(line);
            buf.push('\n');
        }
        let stream = self.inner.get_mut();
        stream.write_all(buf.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_lines(&[line]).await
    }

    /// Half-close the write side so the peer sees EOF.
    pub async fn finish(&mut self) -> Result<()> {
        self.inner.get_mut().shutdown().await?;
        Ok(())
    }
}

/// `WORKER_ASSIGN:<id>:<total>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub worker_id: usize,
    pub total_workers: usize,
}

impl WorkerAssignment {
    pub fn encode(&self) -> String {
        format!(
            "{}{}:{}",
            WORKER_ASSIGN_PREFIX, self.worker_id, self.total_workers
        )
    }

    pub fn parse(line: &str) -> Result<Self> {
        let rest = line
            .strip_prefix(WORKER_ASSIGN_PREFIX)
            .ok_or_else(|| Error::Protocol(format!("bad handshake response: {}", line)))?;
        Self::parse_pair(rest)
    }

    /// Parse the bare `<id>:<total>` form also used by `DECREMENT_ID`.
    pub fn parse_pair(s: &str) -> Result<Self> {
        let (id, total) = s
            .split_once(':')
            .ok_or_else(|| Error::Protocol(format!("expected id:total, got {}", s)))?;
        let assignment = Self {
            worker_id: id.trim().parse()?,
            total_workers: total.trim().parse()?,
        };
        if assignment.worker_id >= assignment.total_workers {
            return Err(Error::Protocol(format!(
                "worker id {} out of range for {} workers",
                assignment.worker_id, assignment.total_workers
            )));
        }
        Ok(assignment)
    }

    pub fn encode_pair(&self) -> String {
        format!("{}:{}", self.worker_id, self.total_workers)
    }
}

/// One replayed store-admin event streamed during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayEvent {
    AddStore { store_json: String, job_id: String },
    RemoveStore { store_name: String, job_id: String },
}

impl ReplayEvent {
    pub async fn write_to<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        conn: &mut LineStream<S>,
    ) -> Result<()> {
        match self {
            ReplayEvent::AddStore { store_json, job_id } => {
                conn.write_lines(&[ADD_STORE_REPLAY, store_json, job_id])
                    .await
            }
            ReplayEvent::RemoveStore { store_name, job_id } => {
                conn.write_lines(&[REMOVE_STORE_REPLAY, store_name, job_id])
                    .await
            }
        }
    }

    /// Read the next replay block. Unknown header lines are skipped;
    /// `None` once the coordinator closes the stream.
    pub async fn read_from<S: AsyncRead + AsyncWrite + Unpin>(
        conn: &mut LineStream<S>,
    ) -> Result<Option<Self>> {
        while let Some(header) = conn.read_line().await? {
            match header.as_str() {
                ADD_STORE_REPLAY => {
                    let store_json = conn.expect_line().await?;
                    let job_id = conn.expect_line().await?;
                    return Ok(Some(ReplayEvent::AddStore { store_json, job_id }));
                }
                REMOVE_STORE_REPLAY => {
                    let store_name = conn.expect_line().await?.trim().to_string();
                    let job_id = conn.expect_line().await?;
                    return Ok(Some(ReplayEvent::RemoveStore { store_name, job_id }));
                }
                other => {
                    tracing::debug!("Ignoring unexpected replay line: {}", other);
                }
            }
        }
        Ok(None)
    }
}

/// Partial map output sent from a worker to the reducer.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialSubmission {
    pub job_id: String,
    pub command: String,
    pub expected_partials: usize,
    pub pairs: Vec<KeyValue>,
}

impl PartialSubmission {
    pub async fn write_to<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        conn: &mut LineStream<S>,
    ) -> Result<()> {
        let pairs = serde_json::to_string(&self.pairs)?;
        let expected = self.expected_partials.to_string();
        conn.write_lines(&[&self.job_id, &self.command, &expected, &pairs])
            .await
    }

    /// `None` if the peer closed before sending a job id.
    pub async fn read_from<S: AsyncRead + AsyncWrite + Unpin>(
        conn: &mut LineStream<S>,
    ) -> Result<Option<Self>> {
        let job_id = match conn.read_line().await? {
            Some(line) => line,
            None => return Ok(None),
        };
        let command = conn.expect_line().await?;
        let expected_partials: usize = conn.expect_line().await?.trim().parse()?;
        if expected_partials == 0 {
            return Err(Error::Protocol("expected partial count must be positive".into()));
        }
        let pairs: Vec<KeyValue> = serde_json::from_str(&conn.expect_line().await?)?;
        Ok(Some(Self {
            job_id,
            command,
            expected_partials,
            pairs,
        }))
    }
}

/// Merged result pushed from the reducer to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceResult {
    pub job_id: String,
    pub command: String,
    pub merged: String,
}

impl ReduceResult {
    pub async fn write_to<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        conn: &mut LineStream<S>,
    ) -> Result<()> {
        conn.write_lines(&[REDUCE_RESULT, &self.job_id, &self.command, &self.merged])
            .await
    }

    /// Read the body that follows an already-consumed `REDUCE_RESULT` header.
    pub async fn read_body<S: AsyncRead + AsyncWrite + Unpin>(
        conn: &mut LineStream<S>,
    ) -> Result<Self> {
        Ok(Self {
            job_id: conn.expect_line().await?,
            command: conn.expect_line().await?,
            merged: conn.expect_line().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = LineStream::new(a);
        let mut right = LineStream::new(b);

        left.write_lines(&["SEARCH", "FoodCategory=pizzeria", "job-1"])
            .await
            .unwrap();
        assert_eq!(right.expect_line().await.unwrap(), "SEARCH");
        assert_eq!(right.expect_line().await.unwrap(), "FoodCategory=pizzeria");
        assert_eq!(right.expect_line().await.unwrap(), "job-1");

        left.finish().await.unwrap();
        assert!(right.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_protocol_error() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut right = LineStream::new(b);

        a.write_all(b"SEA\xffRCH\nLIST_STORES\n").await.unwrap();
        assert!(matches!(right.read_line().await, Err(Error::Protocol(_))));
        // The bad line is consumed; the next one still reads
        assert_eq!(right.expect_line().await.unwrap(), "LIST_STORES");
    }

    #[tokio::test]
    async fn test_rejects_embedded_newline() {
        let (a, _b) = tokio::io::duplex(64);
        let mut conn = LineStream::new(a);
        assert!(conn.write_line("two\nlines").await.is_err());
    }

    #[tokio::test]
    async fn test_crlf_is_stripped() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"LIST_STORES\r\n").await.unwrap();
        let mut conn = LineStream::new(b);
        assert_eq!(conn.expect_line().await.unwrap(), "LIST_STORES");
    }

    #[test]
    fn test_assignment_parse() {
        let a = WorkerAssignment::parse("WORKER_ASSIGN:2:3").unwrap();
        assert_eq!(a.worker_id, 2);
        assert_eq!(a.total_workers, 3);
        assert_eq!(a.encode(), "WORKER_ASSIGN:2:3");

        assert!(WorkerAssignment::parse("WORKER_ASSIGN:3:3").is_err());
        assert!(WorkerAssignment::parse("HELLO").is_err());
        assert!(WorkerAssignment::parse_pair("x:1").is_err());
    }

    #[tokio::test]
    async fn test_replay_stream_preserves_order() {
        let (a, b) = tokio::io::duplex(4096);
        let mut tx = LineStream::new(a);
        let mut rx = LineStream::new(b);

        let events = vec![
            ReplayEvent::AddStore {
                store_json: r#"{"StoreName":"A"}"#.into(),
                job_id: "j1".into(),
            },
            ReplayEvent::RemoveStore {
                store_name: "A".into(),
                job_id: "j2".into(),
            },
        ];
        for event in &events {
            event.write_to(&mut tx).await.unwrap();
        }
        tx.finish().await.unwrap();

        let mut received = Vec::new();
        while let Some(event) = ReplayEvent::read_from(&mut rx).await.unwrap() {
            received.push(event);
        }
        assert_eq!(received, events);
    }

    #[tokio::test]
    async fn test_partial_submission_wire() {
        let (a, b) = tokio::io::duplex(4096);
        let mut tx = LineStream::new(a);
        let mut rx = LineStream::new(b);

        let sub = PartialSubmission {
            job_id: "job-7".into(),
            command: "LIST_STORES".into(),
            expected_partials: 2,
            pairs: vec![KeyValue::new("LIST_STORES", "PizzaWorld")],
        };
        sub.write_to(&mut tx).await.unwrap();
        let got = PartialSubmission::read_from(&mut rx).await.unwrap().unwrap();
        assert_eq!(got, sub);
    }

    #[test]
    fn test_rejected_reply_detection() {
        assert!(is_error_envelope(r#"{"error":"Worker comms failed"}"#));
        assert!(!is_error_envelope(r#"[{"key":"A","value":"ok"}]"#));
        assert!(is_rejected_reply(r#"[{"key":"ERROR","value":"Store X not found."}]"#));
        assert!(!is_rejected_reply(r#"[{"key":"X","value":"Store X added."}]"#));
        assert!(!is_rejected_reply("not json"));
    }
}
