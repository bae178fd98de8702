//! Byte-level input adapters.

pub mod source;

pub use source::{ByteSource, FileSource, SliceSource};
