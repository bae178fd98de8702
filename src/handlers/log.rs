//! Log ring as a JSON array, one entry per call.
//!
//! The stream ends at the newest entry present when the request came in,
//! so lines logged while streaming do not keep it going.

use std::sync::Arc;

use async_trait::async_trait;

use crate::http::request::{Method, ServerRequest};
use crate::http::response::StatusCode;
use crate::http::writer::{BodyLength, ResponseWriter};
use crate::json::JsonWriter;
use crate::logring::LogRing;
use crate::server::handler::{Continuation, Handler, Progress, Step};

pub struct LogEndpoint {
    ring: Arc<LogRing>,
}

impl LogEndpoint {
    pub fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }
}

#[async_trait]
impl Handler for LogEndpoint {
    async fn start(&self, req: &mut ServerRequest, res: &mut ResponseWriter) -> anyhow::Result<Step> {
        if req.method != Method::GET {
            return Ok(Step::NotFound);
        }

        res.write_head(
            StatusCode::Ok,
            &[("Content-Type", "application/json")],
            BodyLength::Chunked,
        )
        .await?;
        res.write_body(b"[").await?;

        Ok(Step::More(Box::new(LogStream {
            ring: self.ring.clone(),
            after: 0,
            until: self.ring.last_seq(),
            first: true,
        })))
    }
}

struct LogStream {
    ring: Arc<LogRing>,
    /// Sequence number of the last entry sent.
    after: u64,
    until: u64,
    first: bool,
}

#[async_trait]
impl Continuation for LogStream {
    async fn resume(&mut self, res: &mut ResponseWriter) -> anyhow::Result<Progress> {
        let entry = match self.ring.next_after(self.after) {
            Some(entry) if entry.seq <= self.until => entry,
            _ => {
                res.write_body(b"]").await?;
                return Ok(Progress::Done);
            }
        };
        self.after = entry.seq;

        if !self.first {
            res.write_body(b",").await?;
        }
        self.first = false;

        let mut w = JsonWriter::new(&mut *res);
        w.begin_object(None).await?;
        w.write_int(Some("seq"), entry.seq as i64).await?;
        w.write_int(Some("at"), entry.at as i64).await?;
        w.write_str(Some("level"), Some(entry.level.as_str())).await?;
        w.write_str(Some("message"), Some(&entry.message)).await?;
        w.end_object().await?;

        Ok(Progress::More)
    }
}
