//! Minimal HTTP/1.1 client for upstream APIs.
//!
//! The client never buffers a body. The response head is parsed one byte
//! at a time with a small scratch buffer reused for every header line, and
//! the body is handed out through [`ClientRequest::read`], which undoes
//! chunked framing as it goes. One byte of lookahead is available through
//! [`ClientRequest::peek`] so the JSON reader can sit directly on top.
//!
//! ```text
//!   open ──▶ issue_request ──▶ read … read ──▶ close
//!            (status line,      (Identity │ Chunked → Done)
//!             headers, first
//!             chunk size)
//! ```
//!
//! There is no retry in here. A failed fetch is reported to the caller,
//! which decides when to try again.

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::io::ByteSource;

const USER_AGENT: &str = concat!("trickle/", env!("CARGO_PKG_VERSION"));

/// Longest header name or value kept while parsing; the rest is dropped.
const SCRATCH_LEN: usize = 64;

/// How body framing is being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    Identity,
    Chunked,
    /// An encoding we cannot decode; reads fail.
    Error,
    /// Final chunk seen, body complete.
    Done,
}

/// What to do with a chunk-size line that is not valid hex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingPolicy {
    /// Log it and carry on with the digits parsed so far.
    #[default]
    Lenient,
    /// Fail the read with [`Error::Framing`].
    Strict,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Reject anything but `HTTP/1.1` in the status line.
    pub strict_version: bool,
    pub framing: FramingPolicy,
    /// Covers DNS resolution and the TCP handshake.
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            strict_version: false,
            framing: FramingPolicy::Lenient,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A single GET exchange with an upstream server.
///
/// The transport defaults to a TCP socket; any `AsyncRead + AsyncWrite`
/// stream can be supplied with [`ClientRequest::over`].
#[derive(Debug)]
pub struct ClientRequest<S = TcpStream> {
    host: String,
    path: String,
    port: u16,
    options: ClientOptions,
    stream: Option<S>,
    /// -1 until known. For chunked bodies, the sum of chunk sizes so far.
    content_length: i64,
    encoding: TransferEncoding,
    chunk_remaining: u64,
    body_read: u64,
    status: u16,
    pushback: Option<u8>,
}

impl ClientRequest<TcpStream> {
    pub fn new(host: impl Into<String>, path: impl Into<String>, port: u16) -> Self {
        Self::build(host.into(), path.into(), port, None)
    }

    /// Builds a request from an `http://` URL. Path and query are kept
    /// verbatim.
    pub fn from_url(url: &Url) -> Result<Self> {
        if url.scheme() != "http" {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme {} in {}",
                url.scheme(),
                url
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("missing host in {url}")))?;
        let port = url.port_or_known_default().unwrap_or(80);

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self::new(host, path, port))
    }

    /// Resolves the host and connects.
    pub async fn open(&mut self) -> Result<()> {
        let host = self.host.clone();
        let port = self.port;

        let connect = async {
            let addrs: Vec<_> = lookup_host((host.as_str(), port))
                .await
                .map_err(|e| connect_error(&host, port, format!("dns lookup: {e}")))?
                .collect();
            if addrs.is_empty() {
                return Err(connect_error(&host, port, "no addresses".to_string()));
            }
            let stream = TcpStream::connect(&addrs[..])
                .await
                .map_err(|e| connect_error(&host, port, e.to_string()))?;
            Ok::<TcpStream, Error>(stream)
        };

        let stream = timeout(self.options.connect_timeout, connect)
            .await
            .map_err(|_| connect_error(&host, port, "timed out".to_string()))??;

        debug!(host = %host, port, "connected to upstream");
        self.stream = Some(stream);
        Ok(())
    }
}

fn connect_error(host: &str, port: u16, reason: String) -> Error {
    Error::Connect {
        host: host.to_string(),
        port,
        reason,
    }
}

impl<S> ClientRequest<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Request over a transport that is already connected.
    pub fn over(host: impl Into<String>, path: impl Into<String>, port: u16, stream: S) -> Self {
        Self::build(host.into(), path.into(), port, Some(stream))
    }

    fn build(host: String, path: String, port: u16, stream: Option<S>) -> Self {
        Self {
            host,
            path,
            port,
            options: ClientOptions::default(),
            stream,
            content_length: -1,
            encoding: TransferEncoding::Identity,
            chunk_remaining: 0,
            body_read: 0,
            status: 0,
            pushback: None,
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Content-Length of the response, -1 if unknown. For chunked bodies
    /// this is the running total of chunk sizes seen so far.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.encoding
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// The request line and fixed header block sent upstream.
    pub fn request_head(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        let host = if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        };

        format!(
            "GET {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {USER_AGENT}\r\nAccept: */*\r\nConnection: close\r\n\r\n"
        )
    }

    /// Sends the request and parses the response head. Returns the status
    /// code. After an error the request must only be closed.
    pub async fn issue_request(&mut self) -> Result<u16> {
        let head = self.request_head();
        let stream = self.transport()?;
        stream.write_all(head.as_bytes()).await?;
        stream.flush().await?;
        trace!(host = %self.host, path = %self.path, "request sent");

        self.read_status_line().await?;
        self.read_headers().await?;

        if self.encoding == TransferEncoding::Chunked {
            self.content_length = 0;
            self.next_chunk(true).await?;
        }

        debug!(
            host = %self.host,
            status = self.status,
            content_length = self.content_length,
            encoding = ?self.encoding,
            "response head parsed"
        );
        Ok(self.status)
    }

    /// Reads up to `buf.len()` body bytes. `Ok(0)` marks the end of the
    /// body.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(b) = self.pushback.take() {
            buf[0] = b;
            return Ok(1);
        }

        match self.encoding {
            TransferEncoding::Done => Ok(0),
            TransferEncoding::Error => Err(Error::Unsupported(
                "response transfer encoding".to_string(),
            )),
            TransferEncoding::Identity => self.read_identity(buf).await,
            TransferEncoding::Chunked => self.read_chunked(buf).await,
        }
    }

    /// Looks at the next body byte without consuming it.
    pub async fn peek(&mut self) -> Result<Option<u8>> {
        if self.pushback.is_none() {
            let mut b = [0u8; 1];
            if self.read(&mut b).await? == 0 {
                return Ok(None);
            }
            self.pushback = Some(b[0]);
        }
        Ok(self.pushback)
    }

    /// Releases the transport. Safe to call in any state.
    pub async fn close(&mut self) {
        self.pushback = None;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                trace!(error = %e, "upstream shutdown failed");
            }
        }
    }

    fn transport(&mut self) -> Result<&mut S> {
        self.stream.as_mut().ok_or(Error::NotOpen)
    }

    async fn read_identity(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = if self.content_length >= 0 {
            let left = (self.content_length as u64).saturating_sub(self.body_read);
            if left == 0 {
                return Ok(0);
            }
            buf.len().min(left as usize)
        } else {
            buf.len()
        };

        let n = self.transport()?.read(&mut buf[..want]).await?;
        self.body_read += n as u64;

        if n == 0 && self.content_length > self.body_read as i64 {
            warn!(
                expected = self.content_length,
                received = self.body_read,
                "upstream closed before end of body"
            );
        }
        Ok(n)
    }

    async fn read_chunked(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.chunk_remaining == 0 {
            self.next_chunk(false).await?;
            if self.encoding == TransferEncoding::Done {
                return Ok(0);
            }
        }

        let want = buf.len().min(self.chunk_remaining as usize);
        let n = self.transport()?.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(Error::Framing("connection closed inside a chunk".to_string()));
        }
        self.chunk_remaining -= n as u64;
        Ok(n)
    }

    async fn raw_byte(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        let n = self.transport()?.read(&mut b).await?;
        Ok((n == 1).then_some(b[0]))
    }

    async fn head_byte(&mut self) -> Result<u8> {
        self.raw_byte().await?.ok_or_else(|| {
            Error::Protocol("connection closed while reading response head".to_string())
        })
    }

    async fn chunk_byte(&mut self) -> Result<u8> {
        self.raw_byte()
            .await?
            .ok_or_else(|| Error::Framing("connection closed in chunk header".to_string()))
    }

    /// Discards bytes up to and including the next LF.
    async fn skip_line(&mut self) -> Result<()> {
        while self.head_byte().await? != b'\n' {}
        Ok(())
    }

    async fn read_status_line(&mut self) -> Result<()> {
        let mut version = [0u8; 8];
        for slot in version.iter_mut() {
            *slot = self.head_byte().await?;
        }
        if &version != b"HTTP/1.1" {
            let seen = String::from_utf8_lossy(&version).into_owned();
            if self.options.strict_version {
                return Err(Error::Protocol(format!("unexpected version {seen:?}")));
            }
            warn!(version = %seen, "unexpected HTTP version, continuing");
        }

        let sp = self.head_byte().await?;
        if sp != b' ' {
            warn!(byte = sp, "expected space after HTTP version");
        }

        let mut status: u16 = 0;
        let terminator = loop {
            let b = self.head_byte().await?;
            if b.is_ascii_digit() {
                status = status.saturating_mul(10).saturating_add(u16::from(b - b'0'));
            } else {
                break b;
            }
        };
        self.status = status;

        if terminator != b'\n' {
            self.skip_line().await?;
        }
        Ok(())
    }

    async fn read_headers(&mut self) -> Result<()> {
        let mut scratch: Vec<u8> = Vec::with_capacity(SCRATCH_LEN);

        loop {
            scratch.clear();
            let first = self.head_byte().await?;
            match first {
                b'\n' => break,
                b'\r' => {
                    self.skip_line().await?;
                    break;
                }
                _ => scratch.push(first),
            }

            let mut terminated = false;
            loop {
                let b = self.head_byte().await?;
                match b {
                    b':' => break,
                    b'\n' => {
                        terminated = true;
                        break;
                    }
                    _ if scratch.len() < SCRATCH_LEN => scratch.push(b),
                    _ => {}
                }
            }
            if terminated {
                warn!(line = %String::from_utf8_lossy(&scratch), "header line without colon");
                continue;
            }

            let header = if scratch.eq_ignore_ascii_case(b"content-length") {
                Header::ContentLength
            } else if scratch.eq_ignore_ascii_case(b"transfer-encoding") {
                Header::TransferEncoding
            } else {
                self.skip_line().await?;
                continue;
            };

            scratch.clear();
            let mut b = self.head_byte().await?;
            while b == b' ' || b == b'\t' {
                b = self.head_byte().await?;
            }
            while b != b'\r' && b != b'\n' {
                if scratch.len() < SCRATCH_LEN {
                    scratch.push(b);
                }
                b = self.head_byte().await?;
            }
            if b == b'\r' {
                self.skip_line().await?;
            }

            let value = String::from_utf8_lossy(&scratch);
            let value = value.trim();
            match header {
                Header::ContentLength => match value.parse::<u64>() {
                    Ok(n) => self.content_length = n.min(i64::MAX as u64) as i64,
                    Err(_) => warn!(value = %value, "invalid Content-Length, ignoring"),
                },
                Header::TransferEncoding => {
                    self.encoding = if value.eq_ignore_ascii_case("chunked") {
                        TransferEncoding::Chunked
                    } else if value.eq_ignore_ascii_case("identity") {
                        TransferEncoding::Identity
                    } else {
                        warn!(value = %value, "unsupported Transfer-Encoding");
                        TransferEncoding::Error
                    };
                }
            }
        }
        Ok(())
    }

    /// Moves to the next chunk. Every chunk but the first is preceded by
    /// the CRLF closing the previous one. A zero-size chunk finishes the
    /// body.
    async fn next_chunk(&mut self, first: bool) -> Result<()> {
        if !first {
            self.consume_crlf().await?;
        }

        let size = self.read_chunk_size().await?;
        self.content_length = self
            .content_length
            .max(0)
            .saturating_add(size.min(i64::MAX as u64) as i64);
        self.chunk_remaining = size;
        trace!(size, "chunk");

        if size == 0 {
            self.skip_trailers().await?;
            self.encoding = TransferEncoding::Done;
        }
        Ok(())
    }

    async fn consume_crlf(&mut self) -> Result<()> {
        let mut b = self.chunk_byte().await?;
        if b == b'\r' {
            b = self.chunk_byte().await?;
        }
        if b == b'\n' {
            return Ok(());
        }

        if self.options.framing == FramingPolicy::Strict {
            return Err(Error::Framing(format!("expected CRLF after chunk, got {b:#04x}")));
        }
        warn!(byte = b, "missing CRLF after chunk, resynchronising");
        while self.chunk_byte().await? != b'\n' {}
        Ok(())
    }

    async fn read_chunk_size(&mut self) -> Result<u64> {
        let mut size: u64 = 0;
        let mut digits = 0usize;
        let mut malformed = None;

        loop {
            let b = self.chunk_byte().await?;
            match b {
                b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                    let v = (b as char).to_digit(16).unwrap_or(0) as u64;
                    size = size.saturating_mul(16).saturating_add(v);
                    digits += 1;
                }
                b';' => {
                    while self.chunk_byte().await? != b'\n' {}
                    break;
                }
                b'\r' => {
                    if self.chunk_byte().await? != b'\n' {
                        malformed = Some(b'\r');
                        while self.chunk_byte().await? != b'\n' {}
                    }
                    break;
                }
                b'\n' => break,
                other => {
                    malformed = Some(other);
                    while self.chunk_byte().await? != b'\n' {}
                    break;
                }
            }
        }

        if digits == 0 && malformed.is_none() {
            malformed = Some(b'\n');
        }
        if let Some(byte) = malformed {
            if self.options.framing == FramingPolicy::Strict {
                return Err(Error::Framing(format!("invalid chunk size line near {byte:#04x}")));
            }
            warn!(byte, partial = size, "malformed chunk size, using partial value");
        }
        Ok(size)
    }

    /// Drops trailer lines up to the blank line ending the message.
    async fn skip_trailers(&mut self) -> Result<()> {
        loop {
            let Some(b) = self.raw_byte().await? else {
                return Ok(());
            };
            match b {
                b'\n' => return Ok(()),
                b'\r' => {
                    self.raw_byte().await?;
                    return Ok(());
                }
                _ => while !matches!(self.raw_byte().await?, Some(b'\n') | None) {},
            }
        }
    }
}

enum Header {
    ContentLength,
    TransferEncoding,
}

impl<S> ByteSource for ClientRequest<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn get_byte(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        match self.read(&mut b).await? {
            0 => Ok(None),
            _ => Ok(Some(b[0])),
        }
    }

    async fn peek_byte(&mut self) -> Result<Option<u8>> {
        self.peek().await
    }
}
