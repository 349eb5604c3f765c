//! Line-level transport to the instrument.
//!
//! The protocol is deliberately primitive: open a TCP connection, write one
//! `\n`-terminated ASCII command, optionally read one line back, close. No
//! session, no pipelining. `TcpLink` reproduces that faithfully and adds
//! the two things the bare socket lacks: a per-call deadline and a mutex so
//! concurrent workers cannot interleave their round trips.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::supply::SupplyError;

/// Something that can move one command line to the instrument and bring
/// one reply line back. Split from the typed client so tests can swap in a
/// recording transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget command; no reply is read.
    async fn send(&self, command: &str) -> Result<(), SupplyError>;
    /// Query; returns the reply with the line terminator stripped.
    async fn query(&self, command: &str) -> Result<String, SupplyError>;
}

/// Connection-per-call TCP transport.
pub struct TcpLink {
    host: String,
    port: u16,
    timeout: Duration,
    // One round trip at a time. Several workers share the instrument and
    // the socket gives no framing beyond the line terminator.
    io_lock: Mutex<()>,
}

impl TcpLink {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            io_lock: Mutex::new(()),
        }
    }

    async fn round_trip(
        &self,
        command: &str,
        expect_reply: bool,
    ) -> Result<Option<String>, SupplyError> {
        let _guard = self.io_lock.lock().await;
        let io = async {
            let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.write_all(command.as_bytes()).await?;
            if !expect_reply {
                return Ok::<_, std::io::Error>(None);
            }
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
        };
        match tokio::time::timeout(self.timeout, io).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SupplyError::Timeout {
                command: command.trim_end().to_string(),
            }),
        }
    }
}

#[async_trait]
impl Transport for TcpLink {
    async fn send(&self, command: &str) -> Result<(), SupplyError> {
        self.round_trip(command, false).await?;
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String, SupplyError> {
        let reply = self.round_trip(command, true).await?;
        // round_trip always yields Some when a reply was requested.
        Ok(reply.unwrap_or_default())
    }
}
