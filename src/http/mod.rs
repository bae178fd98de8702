//! HTTP protocol implementation.
//!
//! Both directions of HTTP/1.1 the device speaks, without keeping bodies in
//! memory.
//!
//! # Architecture
//!
//! - **`client`**: upstream GET requests, byte-driven head parsing, chunked decoding
//! - **`connection`**: reads one request head, dispatches it, closes
//! - **`parser`**: parses incoming request heads from byte buffers
//! - **`request`**: request representation and the streamed request body
//! - **`response`**: status codes and small canned responses
//! - **`writer`**: streams a response to the client, chunked or sized
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for the request head
//!        └──────┬──────┘
//!               │ Head parsed
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← Route table drives the handler
//!        └──────┬───────────┘   until it reports Done
//!               │
//!               ▼
//!        ┌──────────────────┐
//!        │     Closed       │
//!        └──────────────────┘
//! ```

pub mod client;
pub mod connection;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
