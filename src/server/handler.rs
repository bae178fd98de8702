//! Resumable handler contract.
//!
//! A handler answers a request either in one call or by returning a
//! [`Continuation`] that the engine keeps calling until it reports
//! [`Progress::Done`]. Each call emits a bounded slice of the response, so
//! only the continuation's own state (a file cursor, an upstream
//! connection) stays alive between slices.
//!
//! The engine owns the continuation and drops it exactly once, right after
//! the `Done` call; it is never resumed afterwards.

use std::fmt;

use async_trait::async_trait;

use crate::http::request::ServerRequest;
use crate::http::writer::ResponseWriter;

/// Outcome of the first call.
pub enum Step {
    /// Response complete.
    Done,
    /// Part of the response was written; resume later.
    More(Box<dyn Continuation>),
    /// Declined. Nothing may have been written; the engine tries the next
    /// matching route.
    NotFound,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Done => f.write_str("Done"),
            Step::More(_) => f.write_str("More(..)"),
            Step::NotFound => f.write_str("NotFound"),
        }
    }
}

/// Outcome of a resumed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    More,
    Done,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn start(
        &self,
        req: &mut ServerRequest,
        res: &mut ResponseWriter,
    ) -> anyhow::Result<Step>;
}

#[async_trait]
pub trait Continuation: Send {
    async fn resume(&mut self, res: &mut ResponseWriter) -> anyhow::Result<Progress>;
}
