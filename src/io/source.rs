//! Single-byte sources for the streaming JSON reader.
//!
//! A [`ByteSource`] hands out one byte at a time and can look one byte
//! ahead. That is the whole contract the JSON layer needs, so the same
//! reader runs on an HTTP body, a request body or a file on disk.

use std::future::Future;
use std::path::Path;

use bytes::{Buf, Bytes};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// Size of the read block kept by [`FileSource`].
const FILE_BLOCK: usize = 64;

pub trait ByteSource: Send {
    /// Consumes and returns the next byte, `None` at end of input.
    fn get_byte(&mut self) -> impl Future<Output = Result<Option<u8>>> + Send;

    /// Returns the next byte without consuming it.
    fn peek_byte(&mut self) -> impl Future<Output = Result<Option<u8>>> + Send;
}

impl<T: ByteSource + ?Sized> ByteSource for &mut T {
    fn get_byte(&mut self) -> impl Future<Output = Result<Option<u8>>> + Send {
        (**self).get_byte()
    }

    fn peek_byte(&mut self) -> impl Future<Output = Result<Option<u8>>> + Send {
        (**self).peek_byte()
    }
}

/// In-memory source over an owned byte buffer.
#[derive(Debug, Clone)]
pub struct SliceSource {
    bytes: Bytes,
}

impl SliceSource {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }
}

impl ByteSource for SliceSource {
    async fn get_byte(&mut self) -> Result<Option<u8>> {
        if self.bytes.has_remaining() {
            Ok(Some(self.bytes.get_u8()))
        } else {
            Ok(None)
        }
    }

    async fn peek_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.bytes.first().copied())
    }
}

/// File source reading a small block at a time, so a file is never
/// loaded whole.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    block: [u8; FILE_BLOCK],
    pos: usize,
    len: usize,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(file))
    }

    pub fn new(file: File) -> Self {
        Self {
            file,
            block: [0; FILE_BLOCK],
            pos: 0,
            len: 0,
        }
    }

    /// Refills the block when exhausted. Returns false at end of file.
    async fn fill(&mut self) -> Result<bool> {
        if self.pos < self.len {
            return Ok(true);
        }
        self.len = self.file.read(&mut self.block).await?;
        self.pos = 0;
        Ok(self.len > 0)
    }
}

impl ByteSource for FileSource {
    async fn get_byte(&mut self) -> Result<Option<u8>> {
        if !self.fill().await? {
            return Ok(None);
        }
        let b = self.block[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    async fn peek_byte(&mut self) -> Result<Option<u8>> {
        if !self.fill().await? {
            return Ok(None);
        }
        Ok(Some(self.block[self.pos]))
    }
}
