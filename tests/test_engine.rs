//! Route table and connection handling with in-memory transports.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

use trickle::http::connection::Connection;
use trickle::http::request::{RequestBuilder, ServerRequest};
use trickle::http::response::StatusCode;
use trickle::http::writer::{BodyLength, ResponseWriter};
use trickle::server::{Continuation, Handler, Progress, RouteTable, Step};

#[derive(Default)]
struct Counters {
    starts: AtomicUsize,
    resumes: AtomicUsize,
    drops: AtomicUsize,
}

/// Streams `parts`, one per call.
struct Parts {
    parts: &'static [&'static str],
    counters: Arc<Counters>,
}

#[async_trait]
impl Handler for Parts {
    async fn start(&self, _: &mut ServerRequest, res: &mut ResponseWriter) -> anyhow::Result<Step> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        res.write_head(StatusCode::Ok, &[], BodyLength::Chunked).await?;
        res.write_body(self.parts[0].as_bytes()).await?;
        if self.parts.len() == 1 {
            return Ok(Step::Done);
        }
        Ok(Step::More(Box::new(PartsLeft {
            rest: &self.parts[1..],
            counters: self.counters.clone(),
        })))
    }
}

struct PartsLeft {
    rest: &'static [&'static str],
    counters: Arc<Counters>,
}

#[async_trait]
impl Continuation for PartsLeft {
    async fn resume(&mut self, res: &mut ResponseWriter) -> anyhow::Result<Progress> {
        self.counters.resumes.fetch_add(1, Ordering::SeqCst);
        let (first, rest) = self
            .rest
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("resumed after Done"))?;
        res.write_body(first.as_bytes()).await?;
        self.rest = rest;
        Ok(if self.rest.is_empty() {
            Progress::Done
        } else {
            Progress::More
        })
    }
}

impl Drop for PartsLeft {
    fn drop(&mut self) {
        self.counters.drops.fetch_add(1, Ordering::SeqCst);
    }
}

struct Decline(Arc<Counters>);

#[async_trait]
impl Handler for Decline {
    async fn start(&self, _: &mut ServerRequest, _: &mut ResponseWriter) -> anyhow::Result<Step> {
        self.0.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Step::NotFound)
    }
}

struct Silent;

#[async_trait]
impl Handler for Silent {
    async fn start(&self, _: &mut ServerRequest, _: &mut ResponseWriter) -> anyhow::Result<Step> {
        Ok(Step::Done)
    }
}

struct Broken;

#[async_trait]
impl Handler for Broken {
    async fn start(&self, _: &mut ServerRequest, _: &mut ResponseWriter) -> anyhow::Result<Step> {
        anyhow::bail!("disk error")
    }
}

/// Starts a chunked body, then fails on the first resume.
struct FailsMidBody(Arc<Counters>);

#[async_trait]
impl Handler for FailsMidBody {
    async fn start(&self, _: &mut ServerRequest, res: &mut ResponseWriter) -> anyhow::Result<Step> {
        res.write_head(StatusCode::Ok, &[], BodyLength::Chunked).await?;
        res.write_body(b"first").await?;
        Ok(Step::More(Box::new(FailingTail(self.0.clone()))))
    }
}

struct FailingTail(Arc<Counters>);

#[async_trait]
impl Continuation for FailingTail {
    async fn resume(&mut self, _: &mut ResponseWriter) -> anyhow::Result<Progress> {
        self.0.resumes.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("source vanished")
    }
}

impl Drop for FailingTail {
    fn drop(&mut self) {
        self.0.drops.fetch_add(1, Ordering::SeqCst);
    }
}

async fn dispatch(routes: &RouteTable, path: &str) -> String {
    let (client, mut server) = duplex(8192);
    let mut res = ResponseWriter::new(client);
    let mut req = RequestBuilder::new().path(path).build().unwrap();

    routes.dispatch(&mut req, &mut res).await.unwrap();
    drop(res);

    let mut out = String::new();
    server.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn test_continuation_driven_until_done_and_dropped_once() {
    let counters = Arc::new(Counters::default());
    let routes = RouteTable::new().route(
        "/stream",
        Arc::new(Parts {
            parts: &["a", "bb", "ccc", "dddd"],
            counters: counters.clone(),
        }),
    );

    let out = dispatch(&routes, "/stream").await;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.contains("Transfer-Encoding: chunked\r\n"));
    assert!(out.ends_with("\r\n\r\n1\r\na\r\n2\r\nbb\r\n3\r\nccc\r\n4\r\ndddd\r\n0\r\n\r\n"));
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    assert_eq!(counters.resumes.load(Ordering::SeqCst), 3);
    assert_eq!(counters.drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_declining_handler_falls_through() {
    let counters = Arc::new(Counters::default());
    let routes = RouteTable::new()
        .route("/*", Arc::new(Decline(counters.clone())))
        .route(
            "/files/*",
            Arc::new(Parts {
                parts: &["x", "y"],
                counters: counters.clone(),
            }),
        );

    let out = dispatch(&routes, "/files/a").await;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    // Decline plus Parts
    assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
    assert_eq!(counters.drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unmatched_path_is_404() {
    let counters = Arc::new(Counters::default());
    let routes = RouteTable::new().route("/api/*", Arc::new(Decline(counters.clone())));

    assert!(dispatch(&routes, "/elsewhere").await.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(dispatch(&routes, "/api/x").await.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_single_call_handler_is_finished_by_engine() {
    let counters = Arc::new(Counters::default());
    let routes = RouteTable::new().route(
        "/once",
        Arc::new(Parts {
            parts: &["whole"],
            counters: counters.clone(),
        }),
    );

    let out = dispatch(&routes, "/once").await;

    assert!(out.ends_with("5\r\nwhole\r\n0\r\n\r\n"));
    assert_eq!(counters.resumes.load(Ordering::SeqCst), 0);
    assert_eq!(counters.drops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handler_without_response_is_500() {
    let routes = RouteTable::new().route("/quiet", Arc::new(Silent));

    let out = dispatch(&routes, "/quiet").await;

    assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
}

async fn exchange(routes: RouteTable, request: &[u8]) -> String {
    let (mut client, server) = duplex(8192);
    let task = tokio::spawn(async move {
        let mut conn = Connection::new(server, Arc::new(routes));
        conn.run().await
    });

    client.write_all(request).await.unwrap();
    let mut out = String::new();
    client.read_to_string(&mut out).await.unwrap();
    task.await.unwrap().unwrap();
    out
}

#[tokio::test]
async fn test_connection_serves_one_request_and_closes() {
    let counters = Arc::new(Counters::default());
    let routes = RouteTable::new().route(
        "/hello",
        Arc::new(Parts {
            parts: &["hi", "!"],
            counters: counters.clone(),
        }),
    );

    let out = exchange(routes, b"GET /hello HTTP/1.1\r\nHost: device\r\n\r\n").await;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.contains("Connection: close\r\n"));
    assert!(out.ends_with("2\r\nhi\r\n1\r\n!\r\n0\r\n\r\n"));
}

#[tokio::test]
async fn test_handler_error_before_head_is_500() {
    let routes = RouteTable::new().route("/broken", Arc::new(Broken));

    let out = exchange(routes, b"GET /broken HTTP/1.1\r\n\r\n").await;

    assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
}

#[tokio::test]
async fn test_handler_error_mid_body_truncates_response() {
    let counters = Arc::new(Counters::default());
    let routes = RouteTable::new().route("/partial", Arc::new(FailsMidBody(counters.clone())));

    let out = exchange(routes, b"GET /partial HTTP/1.1\r\n\r\n").await;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.ends_with("\r\n\r\n5\r\nfirst\r\n"));
    assert!(!out.contains("0\r\n\r\n"));
    assert_eq!(counters.resumes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_rejects_malformed_head() {
    let out = exchange(RouteTable::new(), b"NOT A REQUEST\r\n\r\n").await;

    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn test_connection_rejects_oversized_head() {
    let mut request = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
    request.extend(std::iter::repeat_n(b'a', 3000));

    let out = exchange(RouteTable::new(), &request).await;

    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}
