use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::http::connection::Connection;
use crate::server::router::RouteTable;

pub async fn run(listen_addr: &str, routes: Arc<RouteTable>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("Listening on {}", listen_addr);

    serve(listener, routes).await
}

/// Accept loop; one task per connection.
pub async fn serve(listener: TcpListener, routes: Arc<RouteTable>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        debug!("Accepted connection from {}", peer);

        let routes = routes.clone();
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, routes);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
