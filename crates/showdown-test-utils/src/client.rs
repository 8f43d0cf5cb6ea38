//! Line client for end-to-end tests.
//!
//! Speaks the TCP protocol the way a thin terminal client would: read the
//! greeting, optionally answer the challenge, then exchange lines.

use crate::crypto_fixtures::challenge_from_hex;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use showdown::auth::{Challenge, PublicKey};
use showdown::session::FRAME_END;
use showdown::transport::tcp::{CLOSE_PREFIX, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

/// How long any single read may take before the test fails.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum GreetingError {
    #[error("expected greeting, got {0:?}")]
    Unexpected(String),

    #[error("greeting field is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// First line of an admitted connection.
#[derive(Debug, Clone)]
pub struct Greeting {
    host_key: Vec<u8>,
    challenge_hex: String,
    host_signature: Vec<u8>,
}

impl Greeting {
    pub fn parse(line: &str) -> Result<Self, GreetingError> {
        let unexpected = || GreetingError::Unexpected(line.to_string());
        let mut fields = line.split_whitespace();
        if fields.next() != Some(PROTOCOL_VERSION) {
            return Err(unexpected());
        }
        let host_key = STANDARD.decode(fields.next().ok_or_else(unexpected)?)?;
        let challenge_hex = fields.next().ok_or_else(unexpected)?.to_string();
        let host_signature = STANDARD.decode(fields.next().ok_or_else(unexpected)?)?;
        Ok(Self {
            host_key,
            challenge_hex,
            host_signature,
        })
    }

    /// # Panics
    ///
    /// Panics if the server sent a key that is not 32 bytes.
    pub fn host_key(&self) -> PublicKey {
        PublicKey::from_bytes(&self.host_key).expect("host key is 32 bytes")
    }

    pub fn challenge(&self) -> Challenge {
        challenge_from_hex(&self.challenge_hex)
    }

    /// Whether the host signed this connection's challenge.
    pub fn host_signature_is_valid(&self) -> bool {
        self.host_key()
            .verify(&self.challenge().host_message(), &self.host_signature)
    }
}

/// Test client over one TCP connection.
pub struct LineClient {
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, anyhow::Error> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", addr, e))?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            lines: FramedRead::new(read, LinesCodec::new()),
            writer,
        })
    }

    /// Next line, or `None` once the server has closed the connection.
    pub async fn next_line(&mut self) -> Result<Option<String>, anyhow::Error> {
        match tokio::time::timeout(READ_TIMEOUT, self.lines.next()).await {
            Err(_) => Err(anyhow::anyhow!("Timed out waiting for a line")),
            Ok(None) => Ok(None),
            Ok(Some(line)) => Ok(Some(line?)),
        }
    }

    pub async fn expect_line(&mut self) -> Result<String, anyhow::Error> {
        self.next_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("Connection closed while expecting a line"))
    }

    /// Read the greeting and the join prompt after it.
    pub async fn expect_greeting(&mut self) -> Result<Greeting, anyhow::Error> {
        let greeting = Greeting::parse(&self.expect_line().await?)?;
        self.expect_line().await?;
        Ok(greeting)
    }

    /// Read lines up to and including the first one containing `marker`.
    pub async fn read_until(&mut self, marker: &str) -> Result<Vec<String>, anyhow::Error> {
        self.read_through(marker, |line| line.contains(marker)).await
    }

    /// Read up to the end of the next frame, without the separator.
    pub async fn read_frame(&mut self) -> Result<String, anyhow::Error> {
        let separator = FRAME_END.trim_end();
        let mut lines = self.read_through(separator, |line| line == separator).await?;
        lines.pop();
        Ok(lines.iter().map(|line| format!("{line}\n")).collect())
    }

    async fn read_through(
        &mut self,
        what: &str,
        done: impl Fn(&str) -> bool,
    ) -> Result<Vec<String>, anyhow::Error> {
        let mut seen = Vec::new();
        loop {
            let Some(line) = self.next_line().await? else {
                return Err(anyhow::anyhow!(
                    "Connection closed before {:?}; saw {:?}",
                    what,
                    seen
                ));
            };
            let found = done(&line);
            seen.push(line);
            if found {
                return Ok(seen);
            }
        }
    }

    /// Skip everything until the close line and return its reason.
    pub async fn read_close_reason(&mut self) -> Result<String, anyhow::Error> {
        let lines = self.read_until(CLOSE_PREFIX).await?;
        let last = lines.last().map(String::as_str).unwrap_or_default();
        Ok(last
            .strip_prefix(CLOSE_PREFIX)
            .unwrap_or(last)
            .to_string())
    }

    pub async fn send(&mut self, line: &str) -> Result<(), anyhow::Error> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Close the write side, as a client hanging up would.
    pub async fn hang_up(mut self) -> Result<(), anyhow::Error> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
