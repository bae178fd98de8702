//! Streaming JSON writer.
//!
//! Output goes to the sink fragment by fragment; no document is ever held
//! in memory. The writer keeps one frame per open container recording
//! whether a comma is due before the next child.
//!
//! # String content
//!
//! Strings are written verbatim, without escaping. Values must not contain
//! `"`, `\` or control characters. This holds for the configuration and
//! upstream data the device handles; do not feed untrusted text through
//! [`JsonWriter::write_str`].

use std::borrow::Cow;
use std::future::Future;
use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::{Error, Result};

/// Deepest container nesting the writer supports.
pub const MAX_DEPTH: usize = 8;

/// Destination for encoded JSON fragments.
pub trait JsonSink: Send {
    fn write_fragment(&mut self, fragment: &str) -> impl Future<Output = io::Result<()>> + Send;
}

impl<T: JsonSink + ?Sized> JsonSink for &mut T {
    fn write_fragment(&mut self, fragment: &str) -> impl Future<Output = io::Result<()>> + Send {
        (**self).write_fragment(fragment)
    }
}

impl JsonSink for String {
    async fn write_fragment(&mut self, fragment: &str) -> io::Result<()> {
        self.push_str(fragment);
        Ok(())
    }
}

impl JsonSink for Vec<u8> {
    async fn write_fragment(&mut self, fragment: &str) -> io::Result<()> {
        self.extend_from_slice(fragment.as_bytes());
        Ok(())
    }
}

/// Buffered file sink used for persisted documents.
#[derive(Debug)]
pub struct FileSink {
    out: BufWriter<File>,
}

impl FileSink {
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Flushes buffered output and syncs the file to disk.
    pub async fn close(mut self) -> io::Result<()> {
        self.out.flush().await?;
        self.out.get_mut().sync_all().await
    }
}

impl JsonSink for FileSink {
    async fn write_fragment(&mut self, fragment: &str) -> io::Result<()> {
        self.out.write_all(fragment.as_bytes()).await
    }
}

/// Makes `text` safe for [`JsonWriter::write_str`]: quotes and
/// backslashes become `'` and `/`, control characters become spaces.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    if !text.chars().any(needs_replacing) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .map(|c| match c {
                '"' => '\'',
                '\\' => '/',
                c if c.is_control() => ' ',
                c => c,
            })
            .collect(),
    )
}

fn needs_replacing(c: char) -> bool {
    c == '"' || c == '\\' || c.is_control()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: Container,
    comma: bool,
}

const EMPTY_FRAME: Frame = Frame {
    kind: Container::Object,
    comma: false,
};

/// Writer for one JSON document.
///
/// Every `begin_*` must be matched by the corresponding `end_*`; the writer
/// trusts the caller on that. Pass `None` as the name for values inside an
/// array or at the top level.
#[derive(Debug)]
pub struct JsonWriter<W> {
    sink: W,
    stack: [Frame; MAX_DEPTH],
    depth: usize,
}

impl<W: JsonSink> JsonWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            stack: [EMPTY_FRAME; MAX_DEPTH],
            depth: 0,
        }
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    pub async fn begin_object(&mut self, name: Option<&str>) -> Result<()> {
        self.begin(name, Container::Object, "{").await
    }

    pub async fn end_object(&mut self) -> Result<()> {
        self.end("}").await
    }

    pub async fn begin_array(&mut self, name: Option<&str>) -> Result<()> {
        self.begin(name, Container::Array, "[").await
    }

    pub async fn end_array(&mut self) -> Result<()> {
        self.end("]").await
    }

    /// Writes a string value verbatim; `None` is written as `null`.
    pub async fn write_str(&mut self, name: Option<&str>, value: Option<&str>) -> Result<()> {
        self.member(name).await?;
        match value {
            Some(v) => {
                self.emit("\"").await?;
                self.emit(v).await?;
                self.emit("\"").await
            }
            None => self.emit("null").await,
        }
    }

    pub async fn write_int(&mut self, name: Option<&str>, value: i64) -> Result<()> {
        self.member(name).await?;
        self.emit(&value.to_string()).await
    }

    pub async fn write_bool(&mut self, name: Option<&str>, value: bool) -> Result<()> {
        self.member(name).await?;
        self.emit(if value { "true" } else { "false" }).await
    }

    async fn begin(&mut self, name: Option<&str>, kind: Container, open: &str) -> Result<()> {
        if self.depth == MAX_DEPTH {
            return Err(Error::Nesting("json nesting deeper than 8"));
        }
        self.member(name).await?;
        self.emit(open).await?;
        self.stack[self.depth] = Frame { kind, comma: false };
        self.depth += 1;
        Ok(())
    }

    async fn end(&mut self, close: &str) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::Nesting("end without matching begin"));
        }
        self.depth -= 1;
        self.emit(close).await
    }

    /// Separator and optional `"name":` prefix for the next value.
    async fn member(&mut self, name: Option<&str>) -> Result<()> {
        if self.depth > 0 {
            let top = &mut self.stack[self.depth - 1];
            let comma = top.comma;
            top.comma = true;
            if comma {
                self.emit(",").await?;
            }
        }
        if let Some(name) = name {
            self.emit("\"").await?;
            self.emit(name).await?;
            self.emit("\":").await?;
        }
        Ok(())
    }

    async fn emit(&mut self, fragment: &str) -> Result<()> {
        self.sink.write_fragment(fragment).await?;
        Ok(())
    }

    /// True when the innermost open container is an object.
    pub fn in_object(&self) -> bool {
        self.depth > 0 && self.stack[self.depth - 1].kind == Container::Object
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nested_containers_get_commas_between_siblings_only() {
        let mut w = JsonWriter::new(String::new());

        w.begin_object(None).await.unwrap();
        w.write_str(Some("name"), Some("x")).await.unwrap();
        w.begin_array(Some("items")).await.unwrap();
        assert!(!w.in_object());
        w.begin_object(None).await.unwrap();
        w.write_int(Some("n"), 1).await.unwrap();
        w.end_object().await.unwrap();
        w.begin_object(None).await.unwrap();
        w.end_object().await.unwrap();
        w.end_array().await.unwrap();
        w.write_str(Some("missing"), None).await.unwrap();
        w.end_object().await.unwrap();

        assert_eq!(
            w.into_inner(),
            r#"{"name":"x","items":[{"n":1},{}],"missing":null}"#
        );
    }

    #[tokio::test]
    async fn depth_is_bounded() {
        let mut w = JsonWriter::new(String::new());
        for _ in 0..MAX_DEPTH {
            w.begin_array(None).await.unwrap();
        }

        assert!(matches!(w.begin_array(None).await, Err(Error::Nesting(_))));
        assert_eq!(w.depth(), MAX_DEPTH);
    }

    #[test]
    fn sanitize_replaces_only_unsafe_characters() {
        assert!(matches!(sanitize("plain text"), Cow::Borrowed(_)));
        assert_eq!(sanitize("a\"b\\c\nd"), "a'b/c d");
    }

    #[tokio::test]
    async fn unmatched_end_writes_nothing() {
        let mut w = JsonWriter::new(String::new());

        assert!(matches!(w.end_object().await, Err(Error::Nesting(_))));
        assert_eq!(w.into_inner(), "");
    }
}
