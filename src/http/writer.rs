use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::http::response::{Response, StatusCode};
use crate::json::JsonSink;

const HTTP_VERSION: &str = "HTTP/1.1";

/// JSON fragments are collected up to this size before going out as one
/// body write.
const JSON_BUFFER: usize = 256;

/// How the body of a streamed response is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// Sent as Content-Length; the handler writes exactly this many bytes.
    Known(u64),
    /// Length not known up front. Every write becomes a chunk and
    /// [`ResponseWriter::finish`] sends the end-of-body marker.
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Head,
    Body { chunked: bool, declared: Option<u64> },
    Finished,
}

fn serialize_head(status: StatusCode, headers: &[(&str, &str)], length: BodyLength) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    match length {
        BodyLength::Known(n) => {
            buf.extend_from_slice(format!("Content-Length: {n}\r\n").as_bytes());
        }
        BodyLength::Chunked => buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n"),
    }
    buf.extend_from_slice(b"Connection: close\r\n");

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf
}

/// Writes one response to the client as the handler produces it.
///
/// Body slices go straight to the connection. Only JSON written through
/// the [`JsonSink`] impl is held back, in a small buffer, so an encoded
/// document does not turn into one chunk per punctuation mark.
pub struct ResponseWriter {
    out: Box<dyn AsyncWrite + Send + Unpin>,
    state: WriterState,
    body_bytes: u64,
    json: Vec<u8>,
}

impl ResponseWriter {
    pub fn new<W>(out: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            out: Box::new(out),
            state: WriterState::Head,
            body_bytes: 0,
            json: Vec::new(),
        }
    }

    pub fn head_sent(&self) -> bool {
        self.state != WriterState::Head
    }

    pub fn is_finished(&self) -> bool {
        self.state == WriterState::Finished
    }

    /// Body bytes written so far, framing excluded.
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    /// Sends the status line and headers. `Content-Length` or
    /// `Transfer-Encoding` and `Connection: close` are added here.
    pub async fn write_head(
        &mut self,
        status: StatusCode,
        headers: &[(&str, &str)],
        length: BodyLength,
    ) -> io::Result<()> {
        if self.state != WriterState::Head {
            return Err(io::Error::other("response head already sent"));
        }
        self.out
            .write_all(&serialize_head(status, headers, length))
            .await?;

        self.state = match length {
            BodyLength::Known(n) => WriterState::Body {
                chunked: false,
                declared: Some(n),
            },
            BodyLength::Chunked => WriterState::Body {
                chunked: true,
                declared: None,
            },
        };
        Ok(())
    }

    pub async fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        self.flush_json().await?;
        self.write_raw(data).await
    }

    async fn flush_json(&mut self) -> io::Result<()> {
        if self.json.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.json);
        let result = self.write_raw(&pending).await;
        self.json = pending;
        self.json.clear();
        result
    }

    async fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        let WriterState::Body { chunked, .. } = self.state else {
            return Err(io::Error::other("body write outside of response body"));
        };
        // An empty chunk would end the body.
        if data.is_empty() {
            return Ok(());
        }

        if chunked {
            self.out
                .write_all(format!("{:x}\r\n", data.len()).as_bytes())
                .await?;
            self.out.write_all(data).await?;
            self.out.write_all(b"\r\n").await?;
        } else {
            self.out.write_all(data).await?;
        }
        self.body_bytes += data.len() as u64;
        Ok(())
    }

    /// Ends the body (terminating chunk for chunked responses) and flushes.
    /// Calling it again is a no-op.
    pub async fn finish(&mut self) -> io::Result<()> {
        match self.state {
            WriterState::Head => return Err(io::Error::other("finish before response head")),
            WriterState::Finished => return Ok(()),
            WriterState::Body { chunked, declared } => {
                self.flush_json().await?;
                if chunked {
                    self.out.write_all(b"0\r\n\r\n").await?;
                }
                if let Some(n) = declared {
                    if n != self.body_bytes {
                        warn!(declared = n, written = self.body_bytes, "body length mismatch");
                    }
                }
            }
        }
        self.state = WriterState::Finished;
        self.out.flush().await
    }

    /// Ends a response whose head announced a body that is not sent, as
    /// for `HEAD`.
    pub async fn finish_without_body(&mut self) -> io::Result<()> {
        if self.state == WriterState::Head {
            return Err(io::Error::other("finish before response head"));
        }
        self.json.clear();
        self.state = WriterState::Finished;
        self.out.flush().await
    }

    /// Gives up on a response that is already under way. Whatever was
    /// written is flushed but the body is not terminated, so once the
    /// connection closes the client sees a truncated response.
    pub async fn abort(&mut self) {
        if let Err(e) = self.flush_json().await {
            debug!(error = %e, "dropping buffered json on abort");
        }
        self.json.clear();
        self.state = WriterState::Finished;
        if let Err(e) = self.out.flush().await {
            debug!(error = %e, "flush on abort failed");
        }
    }

    /// Writes a complete canned response.
    pub async fn send(&mut self, response: &Response) -> io::Result<()> {
        self.write_head(
            response.status,
            &[("Content-Type", Response::CONTENT_TYPE)],
            BodyLength::Known(response.body.len() as u64),
        )
        .await?;
        self.write_body(response.body.as_bytes()).await?;
        self.finish().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.out.shutdown().await
    }
}

impl JsonSink for ResponseWriter {
    async fn write_fragment(&mut self, fragment: &str) -> io::Result<()> {
        if !matches!(self.state, WriterState::Body { .. }) {
            return Err(io::Error::other("body write outside of response body"));
        }
        self.json.extend_from_slice(fragment.as_bytes());
        if self.json.len() >= JSON_BUFFER {
            self.flush_json().await?;
        }
        Ok(())
    }
}
