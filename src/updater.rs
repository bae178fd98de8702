//! Periodic fetch of upstream JSON into shared state.
//!
//! An [`Updater`] fetches its URL with the streaming client, hands the
//! body to a [`Projection`] through [`JsonReader`] and sleeps. A failed
//! fetch is retried after a fixed backoff instead of the full interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::http::client::{ClientOptions, ClientRequest};
use crate::io::ByteSource;
use crate::json::{Fields, JsonReader, TokenKind, sanitize};

/// Pulls the fields it needs out of a response body and stores them.
pub trait Projection: Send + Sync {
    fn apply<S: ByteSource>(
        &self,
        reader: &mut JsonReader<S>,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub struct Updater<P> {
    name: String,
    url: Url,
    interval: Duration,
    backoff: Duration,
    options: ClientOptions,
    projection: P,
}

impl<P: Projection> Updater<P> {
    pub fn new(name: impl Into<String>, url: Url, projection: P) -> Self {
        Self {
            name: name.into(),
            url,
            interval: Duration::from_secs(3600),
            backoff: Duration::from_secs(30),
            options: ClientOptions::default(),
            projection,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Fetch loop; runs until the task is dropped.
    pub async fn run(self) {
        info!(updater = %self.name, url = %self.url, "updater started");
        loop {
            let wait = match self.fetch_once().await {
                Ok(()) => {
                    debug!(updater = %self.name, "update applied");
                    self.interval
                }
                Err(e) => {
                    warn!(updater = %self.name, error = %format!("{e:#}"), "update failed");
                    self.backoff
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// One fetch. The connection is closed whatever the outcome.
    pub async fn fetch_once(&self) -> anyhow::Result<()> {
        let mut req = ClientRequest::from_url(&self.url)?.with_options(self.options.clone());
        let result = self.exchange(&mut req).await;
        req.close().await;
        result
    }

    async fn exchange(&self, req: &mut ClientRequest) -> anyhow::Result<()> {
        req.open().await?;
        let status = req.issue_request().await?;
        if status != 200 {
            anyhow::bail!("{} answered {}", req.host(), status);
        }

        let mut reader = JsonReader::new(req);
        self.projection
            .apply(&mut reader)
            .await
            .with_context(|| format!("decoding {}", self.url))?;
        Ok(())
    }
}

/// Offset data for the configured time zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimezoneInfo {
    /// `+01:00` style offset from UTC.
    pub utc_offset: String,
    pub dst: bool,
    pub abbreviation: String,
}

pub type SharedTimezone = Arc<RwLock<Option<TimezoneInfo>>>;

const TZ_KEYS: [&str; 3] = ["utc_offset", "dst", "abbreviation"];

/// Stores the `utc_offset`, `dst` and `abbreviation` members of a time
/// API response.
#[derive(Debug, Clone, Default)]
pub struct TimezoneProjection {
    target: SharedTimezone,
}

impl TimezoneProjection {
    pub fn new(target: SharedTimezone) -> Self {
        Self { target }
    }
}

impl Projection for TimezoneProjection {
    async fn apply<S: ByteSource>(&self, reader: &mut JsonReader<S>) -> Result<()> {
        if reader.expect(TokenKind::ObjectStart).await?.is_none() {
            return Err(Error::Protocol("time api did not return an object".to_string()));
        }

        let mut utc_offset = None;
        let mut dst = false;
        let mut abbreviation = String::new();

        let mut fields = Fields::new(&TZ_KEYS);
        while let Some(i) = reader.find_names(&mut fields).await? {
            match i {
                0 => utc_offset = reader.expect_string().await?,
                1 => dst = reader.expect_bool().await?.unwrap_or(false),
                _ => {
                    if let Some(a) = reader.expect_string().await? {
                        abbreviation = a;
                    }
                }
            }
        }

        let utc_offset =
            utc_offset.ok_or_else(|| Error::Protocol("utc_offset missing".to_string()))?;
        let info = TimezoneInfo {
            utc_offset: sanitize(&utc_offset).into_owned(),
            dst,
            abbreviation: sanitize(&abbreviation).into_owned(),
        };
        info!(offset = %info.utc_offset, dst = info.dst, abbreviation = %info.abbreviation, "timezone updated");
        *self.target.write().await = Some(info);
        Ok(())
    }
}
