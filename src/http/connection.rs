use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, warn};

use crate::http::parser::{ParseError, parse_request_head};
use crate::http::request::{BodyReader, RequestHead, ServerRequest};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::router::RouteTable;

/// Largest request head accepted.
pub const MAX_HEAD_LEN: usize = 2048;

/// Serves exactly one request, then closes.
pub struct Connection {
    reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
    writer: ResponseWriter,
    buffer: BytesMut,
    routes: Arc<RouteTable>,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Dispatching(RequestHead),
    Closed,
}

impl Connection {
    pub fn new<S>(stream: S, routes: Arc<RouteTable>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: Some(Box::new(rd)),
            writer: ResponseWriter::new(wr),
            buffer: BytesMut::with_capacity(512),
            routes,
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    if let Some(head) = self.read_head().await? {
                        self.state = ConnectionState::Dispatching(head);
                    }
                }

                ConnectionState::Dispatching(head) => {
                    debug!(method = ?head.method, path = %head.path, "request");
                    let Some(reader) = self.reader.take() else {
                        break;
                    };
                    let length = head.content_length;
                    let body = BodyReader::new(self.buffer.split().freeze(), reader, length);
                    let mut request = ServerRequest::new(head, body);

                    self.routes.dispatch(&mut request, &mut self.writer).await?;
                }

                ConnectionState::Closed => break,
            }
        }

        // No keep-alive: every exchange ends with the connection.
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "shutdown after response failed");
        }
        Ok(())
    }

    /// Reads until a full request head is buffered. `None` when the client
    /// went away or sent garbage (in which case a 400 was sent).
    pub async fn read_head(&mut self) -> anyhow::Result<Option<RequestHead>> {
        loop {
            // Try parsing whatever we already have
            match parse_request_head(&self.buffer) {
                Ok((head, consumed)) => {
                    // Keep only body bytes that arrived with the head
                    let _ = self.buffer.split_to(consumed);
                    return Ok(Some(head));
                }

                Err(ParseError::Incomplete) => {
                    if self.buffer.len() > MAX_HEAD_LEN {
                        warn!(len = self.buffer.len(), "request head too large");
                        self.writer.send(&Response::bad_request()).await?;
                        return Ok(None);
                    }
                }

                Err(e) => {
                    warn!(error = ?e, "malformed request");
                    self.writer.send(&Response::bad_request()).await?;
                    return Ok(None);
                }
            }

            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            let mut temp = [0u8; 512];
            let n = reader.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(None);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}
