//! Transport seams for the external collaborators.
//!
//! The engine never talks to the network directly; it goes through three
//! trait seams, one per collaborator contract:
//!
//! - [`SnapshotFetcher`] — the full-snapshot endpoint (one JSON string of
//!   `width * height` palette codes, row-major).
//! - [`FeedConnector`] — the persistent framed change-feed, split into a
//!   send half (subscribe token, heartbeats) and a receive half (framed
//!   messages).
//! - [`DrawApi`] — the draw endpoint (status code plus server-suggested
//!   cooldown).
//!
//! Concrete implementations live here too: HTTP for snapshot and draw,
//! and a length-prefixed TCP client for the feed. Tests substitute
//! in-memory implementations at the same seams.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use pixelguard_core::palette::ColorCode;

/// Upper bound on a single feed record, to keep a corrupt length prefix
/// from asking for gigabytes.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Transport-layer errors. These are recovered locally by the owning
/// component (reconnect, fallback cooldown, "no update") and never
/// propagate past it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("connection closed")]
    Closed,
}

/// One worker's identity for draw authorization.
///
/// The token is an opaque blob loaded from the credential file; the engine
/// never interprets it, only forwards it to the draw endpoint.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Display name used in logs (never the token itself).
    pub name: String,
    /// Opaque authorization blob.
    pub token: String,
}

impl Credential {
    #[must_use]
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }
}

/// Draw endpoint response contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawResponse {
    /// 0 = success; [`crate::worker::AUTH_INVALID_STATUS`] = credential
    /// rejected; anything else = transient failure.
    pub status_code: i64,
    /// Server-suggested cooldown before the next attempt. The server is
    /// the sole authority on pacing.
    pub cooldown: Duration,
}

/// Full-snapshot endpoint.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch the whole canvas as a row-major code string.
    async fn fetch_bitmap(&self) -> Result<String, TransportError>;
}

/// Draw endpoint.
#[async_trait]
pub trait DrawApi: Send + Sync {
    /// Request one pixel write on behalf of `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no well-formed response was
    /// obtained; the worker degrades to its fixed fallback cooldown.
    async fn draw(
        &self,
        credential: &Credential,
        x: u32,
        y: u32,
        color: ColorCode,
    ) -> Result<DrawResponse, TransportError>;
}

/// Send half of an established feed connection.
#[async_trait]
pub trait FeedSink: Send {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Receive half of an established feed connection.
#[async_trait]
pub trait FeedSource: Send {
    /// Next framed message, `Ok(None)` on clean close.
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Feed connection factory.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open a fresh connection, returning independent send and receive
    /// halves (the heartbeat ticker owns the sink, the read loop the
    /// source).
    async fn connect(&self)
        -> Result<(Box<dyn FeedSink>, Box<dyn FeedSource>), TransportError>;
}

// =============================================================================
// HTTP implementations
// =============================================================================

#[derive(Debug, Deserialize)]
struct SnapshotBody {
    data: SnapshotData,
}

#[derive(Debug, Deserialize)]
struct SnapshotData {
    bitmap: String,
}

/// [`SnapshotFetcher`] over HTTP GET.
pub struct HttpSnapshotFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch_bitmap(&self) -> Result<String, TransportError> {
        let body: SnapshotBody = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.data.bitmap)
    }
}

#[derive(Debug, Deserialize)]
struct DrawBody {
    code: i64,
    #[serde(default)]
    wait_time: Option<f64>,
}

/// [`DrawApi`] over HTTP POST.
pub struct HttpDrawApi {
    client: reqwest::Client,
    url: String,
}

impl HttpDrawApi {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DrawApi for HttpDrawApi {
    async fn draw(
        &self,
        credential: &Credential,
        x: u32,
        y: u32,
        color: ColorCode,
    ) -> Result<DrawResponse, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::COOKIE, &credential.token)
            .form(&[
                ("x_min", x.to_string()),
                ("y_min", y.to_string()),
                ("x_max", x.to_string()),
                ("y_max", y.to_string()),
                ("color", color.to_string()),
            ])
            .send()
            .await?;

        let body: DrawBody = response
            .json()
            .await
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;

        let cooldown = body
            .wait_time
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map_or(Duration::ZERO, Duration::from_secs_f64);

        Ok(DrawResponse {
            status_code: body.code,
            cooldown,
        })
    }
}

// =============================================================================
// TCP feed implementation
// =============================================================================

/// [`FeedConnector`] over a raw TCP endpoint speaking the framed record
/// protocol (each record is length-prefixed by its own `end_offset`
/// header field).
pub struct TcpFeedConnector {
    addr: String,
}

impl TcpFeedConnector {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl FeedConnector for TcpFeedConnector {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn FeedSink>, Box<dyn FeedSource>), TransportError> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        debug!(addr = %self.addr, "feed transport connected");
        Ok((
            Box::new(TcpFeedSink { write }),
            Box::new(TcpFeedSource { read }),
        ))
    }
}

struct TcpFeedSink {
    write: OwnedWriteHalf,
}

#[async_trait]
impl FeedSink for TcpFeedSink {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.write.write_all(frame).await?;
        self.write.flush().await?;
        Ok(())
    }
}

struct TcpFeedSource {
    read: OwnedReadHalf,
}

#[async_trait]
impl FeedSource for TcpFeedSource {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        // The first header field is the record's own total length, so one
        // read of the length prefix frames the rest.
        let mut len_prefix = [0u8; 4];
        match self.read.read_exact(&mut len_prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let record_len = u32::from_be_bytes(len_prefix) as usize;
        if !(pixelguard_core::feed::HEADER_LEN..=MAX_RECORD_LEN).contains(&record_len) {
            return Err(TransportError::MalformedResponse(format!(
                "record length {record_len} outside [{}, {MAX_RECORD_LEN}]",
                pixelguard_core::feed::HEADER_LEN
            )));
        }

        let mut record = vec![0u8; record_len];
        record[..4].copy_from_slice(&len_prefix);
        self.read.read_exact(&mut record[4..]).await?;
        Ok(Some(record))
    }
}
