//! Files below a root directory, streamed in small slices.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::http::mime::content_type_for;
use crate::http::request::{Method, ServerRequest};
use crate::http::response::StatusCode;
use crate::http::writer::{BodyLength, ResponseWriter};
use crate::server::handler::{Continuation, Handler, Progress, Step};

/// Bytes sent per call.
const FILE_SLICE: usize = 512;

const INDEX: &str = "index.html";

pub struct StaticFiles {
    prefix: String,
    root: PathBuf,
}

impl StaticFiles {
    /// Serves `root` under the URL path `prefix`, e.g. `/` or `/assets/`.
    pub fn new(prefix: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            prefix,
            root: root.into(),
        }
    }

    /// Maps a request path to a file below the root. `None` for paths
    /// outside the prefix or trying to climb out of the root.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let rest = path.strip_prefix(&self.prefix)?;

        let mut file = self.root.clone();
        for part in rest.split('/') {
            match part {
                "" | "." => continue,
                ".." => return None,
                part if part.contains('\\') => return None,
                part => file.push(part),
            }
        }
        if rest.is_empty() || rest.ends_with('/') {
            file.push(INDEX);
        }
        Some(file)
    }
}

/// `<file>.gz` next to `file`.
fn gzip_sibling(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

async fn open_file(path: &Path) -> std::io::Result<Option<(File, u64)>> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Ok(None);
    }
    Ok(Some((file, meta.len())))
}

#[async_trait]
impl Handler for StaticFiles {
    async fn start(&self, req: &mut ServerRequest, res: &mut ResponseWriter) -> anyhow::Result<Step> {
        if !matches!(req.method, Method::GET | Method::HEAD) {
            return Ok(Step::NotFound);
        }
        let Some(path) = self.resolve(&req.path) else {
            warn!(path = %req.path, "rejected file path");
            return Ok(Step::NotFound);
        };

        let mut gzip = false;
        let mut opened = None;
        if req.flags.accepts_gzip {
            opened = open_file(&gzip_sibling(&path)).await?;
            gzip = opened.is_some();
        }
        if opened.is_none() {
            opened = open_file(&path).await?;
        }
        let Some((file, len)) = opened else {
            return Ok(Step::NotFound);
        };

        let mut headers = vec![("Content-Type", content_type_for(&path))];
        if gzip {
            headers.push(("Content-Encoding", "gzip"));
        }
        res.write_head(StatusCode::Ok, &headers, BodyLength::Known(len))
            .await?;
        debug!(file = %path.display(), len, gzip, "serving file");

        if req.method == Method::HEAD {
            res.finish_without_body().await?;
            return Ok(Step::Done);
        }
        Ok(Step::More(Box::new(FileStream {
            file,
            buf: [0; FILE_SLICE],
        })))
    }
}

struct FileStream {
    file: File,
    buf: [u8; FILE_SLICE],
}

#[async_trait]
impl Continuation for FileStream {
    async fn resume(&mut self, res: &mut ResponseWriter) -> anyhow::Result<Progress> {
        let n = self.file.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(Progress::Done);
        }
        res.write_body(&self.buf[..n]).await?;
        Ok(Progress::More)
    }
}
