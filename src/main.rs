use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use trickle::config::Config;
use trickle::handlers::{ForwardProxy, LogEndpoint, SettingsEndpoint, StaticFiles, StatusEndpoint};
use trickle::logring::{LogRing, RingLayer};
use trickle::server::{RouteTable, listener};
use trickle::settings::Settings;
use trickle::updater::{SharedTimezone, TimezoneProjection, Updater};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    let ring = Arc::new(LogRing::new(cfg.server.log_capacity));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(RingLayer::new(ring.clone()))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "trickle starting");

    let settings = Settings::load(&cfg.server.settings_path).await?;
    let settings = Arc::new(RwLock::new(settings));
    let timezone = SharedTimezone::default();

    let mut routes = RouteTable::new()
        .route("/api/status", Arc::new(StatusEndpoint::new(settings.clone(), timezone.clone())))
        .route("/api/log", Arc::new(LogEndpoint::new(ring)))
        .route(
            "/api/settings",
            Arc::new(SettingsEndpoint::new(settings.clone(), cfg.server.settings_path.clone())),
        );
    if let Some(proxy) = &cfg.proxy {
        let handler = ForwardProxy::from_config(proxy, cfg.client.options())
            .context("proxy configuration")?;
        routes = routes.route(proxy.route.clone(), Arc::new(handler));
    }
    let routes = routes.route("/*", Arc::new(StaticFiles::new("/", cfg.server.static_root.clone())));

    if cfg.timezone.enabled {
        let url = Url::parse(&cfg.timezone.url).context("timezone url")?;
        let updater = Updater::new("timezone", url, TimezoneProjection::new(timezone))
            .interval(cfg.timezone.interval())
            .backoff(cfg.timezone.backoff())
            .options(cfg.client.options());
        tokio::spawn(updater.run());
    }

    tokio::select! {
        res = listener::run(&cfg.server.listen_addr, Arc::new(routes)) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
