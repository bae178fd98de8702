//! Updater fetches against a local upstream.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use trickle::updater::{SharedTimezone, TimezoneInfo, TimezoneProjection, Updater};

/// Serves `responses` to consecutive connections.
async fn upstream(responses: Vec<&'static [u8]>) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    });
    Url::parse(&format!("http://127.0.0.1:{port}/api/timezone/Europe/Zurich")).unwrap()
}

const TIME_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n\
1a\r\n{\"abbreviation\":\"CEST\",\"da\r\n\
2d\r\ny\":5,\"dst\":true,\"utc_offset\":\"+02:00\",\"x\":[]}\r\n\
0\r\n\r\n";

#[tokio::test]
async fn test_fetch_once_updates_shared_state() {
    let url = upstream(vec![TIME_RESPONSE]).await;
    let shared = SharedTimezone::default();
    let updater = Updater::new("timezone", url, TimezoneProjection::new(shared.clone()));

    updater.fetch_once().await.unwrap();

    assert_eq!(
        *shared.read().await,
        Some(TimezoneInfo {
            utc_offset: "+02:00".into(),
            dst: true,
            abbreviation: "CEST".into(),
        })
    );
}

#[tokio::test]
async fn test_error_status_is_a_failed_fetch() {
    let url = upstream(vec![b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n"]).await;
    let shared = SharedTimezone::default();
    let updater = Updater::new("timezone", url, TimezoneProjection::new(shared.clone()));

    let err = updater.fetch_once().await.unwrap_err();

    assert!(err.to_string().contains("503"));
    assert!(shared.read().await.is_none());
}

#[tokio::test]
async fn test_run_retries_after_backoff() {
    let url = upstream(vec![
        b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n",
        TIME_RESPONSE,
    ])
    .await;
    let shared = SharedTimezone::default();
    let updater = Updater::new("timezone", url, TimezoneProjection::new(shared.clone()))
        .interval(Duration::from_secs(3600))
        .backoff(Duration::from_millis(20));

    let task = tokio::spawn(updater.run());
    for _ in 0..100 {
        if shared.read().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    task.abort();

    assert_eq!(shared.read().await.as_ref().unwrap().abbreviation, "CEST");
}
