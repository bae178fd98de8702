//! Persisted device settings.
//!
//! Stored as one JSON object. Writing goes through [`JsonWriter`] bound to
//! a file, reading projects the known keys out of the file with
//! [`JsonReader::find_names`]; unknown keys are skipped so older firmware
//! can read newer files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::io::{ByteSource, FileSource};
use crate::json::{Fields, FileSink, JsonReader, JsonSink, JsonWriter, Token, TokenKind, sanitize};

/// Most access points remembered.
pub const MAX_ACCESS_POINTS: usize = 8;

const KEYS: [&str; 6] = [
    "station",
    "api_key",
    "timezone",
    "brightness",
    "night_mode",
    "access_points",
];
const AP_KEYS: [&str; 2] = ["ssid", "password"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Stop or station the board shows departures for.
    pub station: String,
    pub api_key: String,
    /// IANA zone name, e.g. `Europe/Zurich`.
    pub timezone: String,
    /// 0..=255
    pub brightness: i64,
    pub night_mode: bool,
    pub access_points: Vec<AccessPoint>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            station: String::new(),
            api_key: String::new(),
            timezone: "Etc/UTC".to_string(),
            brightness: 128,
            night_mode: false,
            access_points: Vec::new(),
        }
    }
}

/// Settings shared by the endpoints and background tasks.
pub type SharedSettings = Arc<RwLock<Settings>>;

impl Settings {
    /// Loads settings from `path`, falling back to defaults when the file
    /// does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let source = match FileSource::open(path).await {
            Ok(source) => source,
            Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).context("opening settings file"),
        };

        let mut settings = Self::default();
        let mut reader = JsonReader::new(source);
        settings
            .apply_json(&mut reader)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Writes settings to `path` via a temporary file and rename.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let tmp = tmp_path(path);
        let sink = FileSink::create(&tmp)
            .await
            .with_context(|| format!("creating {}", tmp.display()))?;

        let mut writer = JsonWriter::new(sink);
        self.write_json(&mut writer).await?;
        writer.into_inner().close().await?;

        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        info!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Encodes the settings as one JSON object.
    pub async fn write_json<W: JsonSink>(&self, w: &mut JsonWriter<W>) -> crate::Result<()> {
        w.begin_object(None).await?;
        w.write_str(Some("station"), Some(&self.station)).await?;
        w.write_str(Some("api_key"), Some(&self.api_key)).await?;
        w.write_str(Some("timezone"), Some(&self.timezone)).await?;
        w.write_int(Some("brightness"), self.brightness).await?;
        w.write_bool(Some("night_mode"), self.night_mode).await?;
        w.begin_array(Some("access_points")).await?;
        for ap in &self.access_points {
            w.begin_object(None).await?;
            w.write_str(Some("ssid"), Some(&ap.ssid)).await?;
            w.write_str(Some("password"), Some(&ap.password)).await?;
            w.end_object().await?;
        }
        w.end_array().await?;
        w.end_object().await
    }

    /// Overwrites the fields present in the JSON object read from
    /// `reader`. Absent or mistyped fields keep their current value. An
    /// `access_points` array replaces the whole list.
    pub async fn apply_json<S: ByteSource>(
        &mut self,
        reader: &mut JsonReader<S>,
    ) -> crate::Result<()> {
        if reader.expect(TokenKind::ObjectStart).await?.is_none() {
            return Err(crate::Error::Syntax("settings must be a json object".to_string()));
        }

        let mut fields = Fields::new(&KEYS);
        while let Some(i) = reader.find_names(&mut fields).await? {
            match KEYS[i] {
                "station" => set_string(&mut self.station, reader.expect_string().await?),
                "api_key" => set_string(&mut self.api_key, reader.expect_string().await?),
                "timezone" => set_string(&mut self.timezone, reader.expect_string().await?),
                "brightness" => {
                    if let Some(v) = reader.expect_i64().await? {
                        self.brightness = v.clamp(0, 255);
                    }
                }
                "night_mode" => {
                    if let Some(v) = reader.expect_bool().await? {
                        self.night_mode = v;
                    }
                }
                _ => {
                    if let Some(list) = read_access_points(reader).await? {
                        self.access_points = list;
                    }
                }
            }
        }
        Ok(())
    }
}

/// `<path>.tmp`, next to the target so the rename stays on one filesystem.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn set_string(slot: &mut String, value: Option<String>) {
    if let Some(v) = value {
        *slot = sanitize(&v).into_owned();
    }
}

async fn read_access_points<S: ByteSource>(
    reader: &mut JsonReader<S>,
) -> crate::Result<Option<Vec<AccessPoint>>> {
    if reader.expect_value(TokenKind::ArrayStart).await?.is_none() {
        return Ok(None);
    }

    let mut list = Vec::new();
    let mut fields = Fields::new(&AP_KEYS);
    loop {
        match reader.next().await?.ok_or(crate::Error::UnexpectedEof)? {
            Token::ArrayEnd => break,
            Token::ObjectStart => {
                fields.reset();
                let mut ap = AccessPoint {
                    ssid: String::new(),
                    password: String::new(),
                };
                while let Some(i) = reader.find_names(&mut fields).await? {
                    let slot = if i == 0 { &mut ap.ssid } else { &mut ap.password };
                    set_string(slot, reader.expect_string().await?);
                }
                if ap.ssid.is_empty() {
                    warn!("access point without ssid, dropped");
                } else if list.len() < MAX_ACCESS_POINTS {
                    list.push(ap);
                } else {
                    warn!(ssid = %ap.ssid, "too many access points, dropped");
                }
            }
            other => {
                warn!(found = %other.kind(), "unexpected entry in access_points");
                reader.skip_rest(other).await?;
            }
        }
    }
    Ok(Some(list))
}
