use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::error::Result;
use crate::io::ByteSource;

/// HTTP request methods.
///
/// Represents the HTTP method/verb of a request. Handlers decide which ones
/// they serve; a handler that does not serve a method declines the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use trickle::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }
}

/// Request properties handlers care about, extracted from the headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    /// `Accept-Encoding` lists gzip.
    pub accepts_gzip: bool,
}

/// Parsed request line and the headers we keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    pub query: Option<String>,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    pub content_length: usize,
    pub flags: RequestFlags,
}

/// A request being served. The body is not read up front; handlers pull
/// it through [`ServerRequest::body`].
pub struct ServerRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub version: String,
    pub flags: RequestFlags,
    pub body: BodyReader,
}

impl ServerRequest {
    pub fn new(head: RequestHead, body: BodyReader) -> Self {
        Self {
            method: head.method,
            path: head.path,
            query: head.query,
            version: head.version,
            flags: head.flags,
            body,
        }
    }

    /// Decoded value of the first query parameter called `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

impl std::fmt::Debug for ServerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("flags", &self.flags)
            .field("body_remaining", &self.body.remaining())
            .finish()
    }
}

/// Request body bounded by Content-Length.
///
/// Bytes that arrived together with the head are served first, the rest is
/// read from the connection on demand.
pub struct BodyReader {
    prefix: Bytes,
    stream: Option<Box<dyn AsyncRead + Send + Unpin>>,
    remaining: usize,
    peeked: Option<u8>,
}

impl BodyReader {
    pub fn new(prefix: Bytes, stream: Box<dyn AsyncRead + Send + Unpin>, length: usize) -> Self {
        Self {
            prefix,
            stream: Some(stream),
            remaining: length,
            peeked: None,
        }
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Body that is already complete in memory.
    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        let prefix = body.into();
        Self {
            remaining: prefix.len(),
            prefix,
            stream: None,
            peeked: None,
        }
    }

    /// Body bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.remaining + usize::from(self.peeked.is_some())
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(b) = self.peeked.take() {
            buf[0] = b;
            return Ok(1);
        }
        if self.remaining == 0 {
            return Ok(0);
        }

        let want = buf.len().min(self.remaining);
        let n = if self.prefix.has_remaining() {
            let n = want.min(self.prefix.len());
            self.prefix.copy_to_slice(&mut buf[..n]);
            n
        } else if let Some(stream) = self.stream.as_mut() {
            stream.read(&mut buf[..want]).await?
        } else {
            0
        };

        if n == 0 {
            warn!(missing = self.remaining, "request body ended early");
            self.remaining = 0;
        } else {
            self.remaining -= n;
        }
        Ok(n)
    }
}

impl ByteSource for BodyReader {
    async fn get_byte(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        match self.read(&mut b).await? {
            0 => Ok(None),
            _ => Ok(Some(b[0])),
        }
    }

    async fn peek_byte(&mut self) -> Result<Option<u8>> {
        if self.peeked.is_none() {
            let mut b = [0u8; 1];
            if self.read(&mut b).await? == 0 {
                return Ok(None);
            }
            self.peeked = Some(b[0]);
        }
        Ok(self.peeked)
    }
}

/// Builder for constructing requests outside a live connection. The
/// method defaults to `GET`.
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Option<String>,
    flags: RequestFlags,
    body: Bytes,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            target: None,
            version: None,
            flags: RequestFlags::default(),
            body: Bytes::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Request target, optionally with a query string.
    pub fn path(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn accepts_gzip(mut self, yes: bool) -> Self {
        self.flags.accepts_gzip = yes;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> std::result::Result<ServerRequest, &'static str> {
        let target = self.target.ok_or("path missing")?;
        let (path, query) = split_target(&target);
        let head = RequestHead {
            method: self.method.unwrap_or(Method::GET),
            path,
            query,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            content_length: self.body.len(),
            flags: self.flags,
        };
        Ok(ServerRequest::new(head, BodyReader::from_bytes(self.body)))
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `/path?query` into its parts. An empty target becomes `/`.
pub fn split_target(target: &str) -> (String, Option<String>) {
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (target, None),
    };
    let path = if path.is_empty() { "/" } else { path };
    (path.to_string(), query)
}
