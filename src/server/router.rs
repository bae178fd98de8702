//! Route table and the engine that drives handlers.
//!
//! # Matching
//! - Entries are tried in table order
//! - A pattern matches its exact path, or, when it ends in `/*`, any path
//!   under that prefix
//! - A matched handler may decline with `NotFound`; the remaining entries
//!   are then tried, and a 404 is sent when none serves the request
//!
//! # Failures
//! A handler error ends the exchange. If nothing was written yet the
//! client gets a 500, otherwise the body is cut off without its end marker.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::http::request::ServerRequest;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::handler::{Continuation, Handler, Progress, Step};

pub struct Route {
    pattern: String,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn matches(&self, path: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') => path.starts_with(prefix),
            _ => self.pattern == path,
        }
    }
}

/// Ordered handler table, built once at startup and shared by all
/// connection tasks.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.routes.push(Route {
            pattern: pattern.into(),
            handler,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Serves `req` with the first route that accepts it.
    pub async fn dispatch(
        &self,
        req: &mut ServerRequest,
        res: &mut ResponseWriter,
    ) -> anyhow::Result<()> {
        for route in &self.routes {
            if !route.matches(&req.path) {
                continue;
            }
            trace!(pattern = %route.pattern, path = %req.path, "route matched");

            match route.handler.start(req, res).await {
                Err(e) => return fail(&route.pattern, res, e).await,
                Ok(Step::NotFound) => {
                    if res.head_sent() {
                        warn!(pattern = %route.pattern, "handler declined after writing");
                        return complete(res).await;
                    }
                    continue;
                }
                Ok(Step::Done) => return complete(res).await,
                Ok(Step::More(continuation)) => match drive(continuation, res).await {
                    Ok(calls) => {
                        debug!(pattern = %route.pattern, calls, bytes = res.body_bytes(), "response streamed");
                        return complete(res).await;
                    }
                    Err(e) => return fail(&route.pattern, res, e).await,
                },
            }
        }

        debug!(path = %req.path, "no handler");
        res.send(&Response::not_found()).await?;
        Ok(())
    }
}

/// Resumes until `Done`. The continuation is dropped on return, whether
/// it finished or failed. Returns the number of handler calls.
async fn drive(
    mut continuation: Box<dyn Continuation>,
    res: &mut ResponseWriter,
) -> anyhow::Result<u32> {
    let mut calls = 1u32;
    loop {
        calls += 1;
        if continuation.resume(res).await? == Progress::Done {
            return Ok(calls);
        }
    }
}

async fn fail(pattern: &str, res: &mut ResponseWriter, e: anyhow::Error) -> anyhow::Result<()> {
    error!(pattern, error = %format!("{e:#}"), "handler failed");
    if res.head_sent() {
        res.abort().await;
    } else {
        res.send(&Response::internal_error()).await?;
    }
    Ok(())
}

/// Closes a body the handler left open, or reports a handler that wrote
/// nothing at all.
async fn complete(res: &mut ResponseWriter) -> anyhow::Result<()> {
    if !res.head_sent() {
        warn!("handler finished without a response");
        res.send(&Response::internal_error()).await?;
    } else if !res.is_finished() {
        res.finish().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn start(&self, _: &mut ServerRequest, _: &mut ResponseWriter) -> anyhow::Result<Step> {
            Ok(Step::NotFound)
        }
    }

    fn route(pattern: &str) -> Route {
        Route {
            pattern: pattern.to_string(),
            handler: Arc::new(Noop),
        }
    }

    #[test]
    fn exact_pattern_matches_only_itself() {
        let r = route("/status");

        assert!(r.matches("/status"));
        assert!(!r.matches("/status/x"));
        assert!(!r.matches("/stat"));
    }

    #[test]
    fn wildcard_matches_paths_below_prefix() {
        let r = route("/files/*");

        assert!(r.matches("/files/a.txt"));
        assert!(r.matches("/files/sub/b.txt"));
        assert!(!r.matches("/files"));
        assert!(!r.matches("/other/a.txt"));
    }

    #[test]
    fn root_wildcard_matches_everything() {
        let r = route("/*");

        assert!(r.matches("/"));
        assert!(r.matches("/index.html"));
    }
}
