//! Streaming JSON codec.
//!
//! - **`token`**: byte-at-a-time tokenizer over a [`ByteSource`](crate::io::ByteSource)
//! - **`decode`**: `expect` / `skip` / `find_names` projection helpers
//! - **`encode`**: fixed-depth writer bound to any [`JsonSink`]
//!
//! Neither direction materializes a document. Decoding holds one token at
//! a time, encoding holds the container stack.

pub mod decode;
pub mod encode;
pub mod token;

pub use decode::{Fields, JsonReader};
pub use encode::{FileSink, JsonSink, JsonWriter, sanitize};
pub use token::{Token, TokenKind};
