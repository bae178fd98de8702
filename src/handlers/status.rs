//! Device status as JSON.

use std::time::Instant;

use async_trait::async_trait;

use crate::http::request::{Method, ServerRequest};
use crate::http::response::StatusCode;
use crate::http::writer::{BodyLength, ResponseWriter};
use crate::json::JsonWriter;
use crate::server::handler::{Handler, Step};
use crate::settings::SharedSettings;
use crate::updater::SharedTimezone;

pub struct StatusEndpoint {
    started: Instant,
    settings: SharedSettings,
    timezone: SharedTimezone,
}

impl StatusEndpoint {
    pub fn new(settings: SharedSettings, timezone: SharedTimezone) -> Self {
        Self {
            started: Instant::now(),
            settings,
            timezone,
        }
    }
}

#[async_trait]
impl Handler for StatusEndpoint {
    async fn start(&self, req: &mut ServerRequest, res: &mut ResponseWriter) -> anyhow::Result<Step> {
        if req.method != Method::GET {
            return Ok(Step::NotFound);
        }

        let access_points = self.settings.read().await.access_points.len();
        let timezone = self.timezone.read().await.clone();

        res.write_head(
            StatusCode::Ok,
            &[("Content-Type", "application/json")],
            BodyLength::Chunked,
        )
        .await?;

        let mut w = JsonWriter::new(&mut *res);
        w.begin_object(None).await?;
        w.write_str(Some("version"), Some(env!("CARGO_PKG_VERSION")))
            .await?;
        w.write_int(Some("uptime"), self.started.elapsed().as_secs() as i64)
            .await?;
        w.write_int(Some("access_points"), access_points as i64)
            .await?;
        match timezone {
            Some(tz) => {
                w.begin_object(Some("timezone")).await?;
                w.write_str(Some("utc_offset"), Some(&tz.utc_offset)).await?;
                w.write_bool(Some("dst"), tz.dst).await?;
                w.write_str(Some("abbreviation"), Some(&tz.abbreviation))
                    .await?;
                w.end_object().await?;
            }
            None => w.write_str(Some("timezone"), None).await?,
        }
        w.end_object().await?;

        Ok(Step::Done)
    }
}
