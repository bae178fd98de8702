//! Forward proxy towards a single upstream API.
//!
//! The caller's value of one query parameter is re-encoded and appended to
//! the configured upstream URL. The upstream body is relayed slice by
//! slice, never buffered whole.

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::http::client::{ClientOptions, ClientRequest, TransferEncoding};
use crate::http::request::{Method, ServerRequest};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{BodyLength, ResponseWriter};
use crate::server::handler::{Continuation, Handler, Progress, Step};

/// Bytes relayed per call.
const RELAY_SLICE: usize = 512;

pub struct ForwardProxy {
    upstream: Url,
    query_param: String,
    options: ClientOptions,
}

impl ForwardProxy {
    pub fn new(upstream: Url, query_param: impl Into<String>) -> Self {
        Self {
            upstream,
            query_param: query_param.into(),
            options: ClientOptions::default(),
        }
    }

    pub fn from_config(cfg: &ProxyConfig, options: ClientOptions) -> Result<Self> {
        let upstream = Url::parse(&cfg.upstream)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", cfg.upstream)))?;
        Ok(Self::new(upstream, cfg.query_param.clone()).with_options(options))
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Upstream URL for `req`.
    pub fn target(&self, req: &ServerRequest) -> Url {
        let mut url = self.upstream.clone();
        if let Some(value) = req.query_param(&self.query_param) {
            url.query_pairs_mut().append_pair(&self.query_param, &value);
        }
        url
    }
}

/// Opens the upstream and reads its response head.
async fn connect(upstream: &mut ClientRequest) -> Result<u16> {
    upstream.open().await?;
    upstream.issue_request().await
}

#[async_trait]
impl Handler for ForwardProxy {
    async fn start(&self, req: &mut ServerRequest, res: &mut ResponseWriter) -> anyhow::Result<Step> {
        if req.method != Method::GET {
            return Ok(Step::NotFound);
        }

        let url = self.target(req);
        let mut upstream = match ClientRequest::from_url(&url) {
            Ok(upstream) => upstream.with_options(self.options.clone()),
            Err(e) => {
                warn!(url = %url, error = %e, "bad upstream url");
                res.send(&Response::bad_gateway()).await?;
                return Ok(Step::Done);
            }
        };

        let status = match connect(&mut upstream).await {
            Ok(status) => status,
            Err(e) => {
                upstream.close().await;
                warn!(host = %upstream.host(), error = %e, "upstream request failed");
                res.send(&Response::bad_gateway()).await?;
                return Ok(Step::Done);
            }
        };

        if upstream.transfer_encoding() == TransferEncoding::Error {
            upstream.close().await;
            warn!(host = %upstream.host(), status, "upstream body framing not supported");
            res.send(&Response::bad_gateway()).await?;
            return Ok(Step::Done);
        }

        let length = match (upstream.transfer_encoding(), upstream.content_length()) {
            (TransferEncoding::Identity, n) if n >= 0 => BodyLength::Known(n as u64),
            _ => BodyLength::Chunked,
        };
        debug!(host = %upstream.host(), status, length = ?length, "relaying upstream response");
        res.write_head(StatusCode::from_u16(status), &[], length)
            .await?;

        Ok(Step::More(Box::new(ProxyRelay {
            upstream,
            buf: [0; RELAY_SLICE],
        })))
    }
}

struct ProxyRelay {
    upstream: ClientRequest,
    buf: [u8; RELAY_SLICE],
}

#[async_trait]
impl Continuation for ProxyRelay {
    async fn resume(&mut self, res: &mut ResponseWriter) -> anyhow::Result<Progress> {
        // A failed upstream read must not look like a complete body
        // downstream, so it surfaces as an error and the response is cut off.
        let n = match self.upstream.read(&mut self.buf).await {
            Ok(n) => n,
            Err(e) => {
                self.upstream.close().await;
                return Err(anyhow::Error::new(e).context(format!(
                    "relaying body from {}",
                    self.upstream.host()
                )));
            }
        };
        if n == 0 {
            self.upstream.close().await;
            return Ok(Progress::Done);
        }

        res.write_body(&self.buf[..n]).await?;
        Ok(Progress::More)
    }
}
