//! Read and update the persisted settings.
//!
//! `GET` returns the settings. `POST` takes a JSON object with any subset
//! of the fields, saves the result and returns it.
//!
//! The shared settings are only locked to copy them out and to swap the
//! saved result in, never while the request body is read. Posts are
//! applied one at a time through a separate update lock, so a slow client
//! holds up other posts but not readers.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::http::request::{Method, ServerRequest};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{BodyLength, ResponseWriter};
use crate::json::{JsonReader, JsonWriter};
use crate::server::handler::{Handler, Step};
use crate::settings::{Settings, SharedSettings};

pub struct SettingsEndpoint {
    settings: SharedSettings,
    path: PathBuf,
    update: Mutex<()>,
}

impl SettingsEndpoint {
    pub fn new(settings: SharedSettings, path: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            path: path.into(),
            update: Mutex::new(()),
        }
    }
}

async fn respond(res: &mut ResponseWriter, settings: &Settings) -> anyhow::Result<()> {
    res.write_head(
        StatusCode::Ok,
        &[("Content-Type", "application/json")],
        BodyLength::Chunked,
    )
    .await?;
    settings.write_json(&mut JsonWriter::new(res)).await?;
    Ok(())
}

#[async_trait]
impl Handler for SettingsEndpoint {
    async fn start(&self, req: &mut ServerRequest, res: &mut ResponseWriter) -> anyhow::Result<Step> {
        match req.method {
            Method::GET => {
                let current = self.settings.read().await.clone();
                respond(res, &current).await?;
            }
            Method::POST => {
                let _update = self.update.lock().await;
                let mut updated = self.settings.read().await.clone();

                let mut reader = JsonReader::new(&mut req.body);
                if let Err(e) = updated.apply_json(&mut reader).await {
                    warn!(error = %e, "rejected settings update");
                    res.send(&Response::bad_request()).await?;
                    return Ok(Step::Done);
                }

                if let Err(e) = updated.save(&self.path).await {
                    error!(error = %format!("{e:#}"), "settings not saved");
                    res.send(&Response::internal_error()).await?;
                    return Ok(Step::Done);
                }
                info!("settings updated");
                *self.settings.write().await = updated.clone();
                respond(res, &updated).await?;
            }
            _ => return Ok(Step::NotFound),
        }
        Ok(Step::Done)
    }
}
