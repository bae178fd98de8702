//! Trickle - streaming HTTP and JSON for small devices
//!
//! Core library: a byte-at-a-time HTTP client, a streaming JSON codec and
//! a resumable request engine with the handlers the device serves.

pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod io;
pub mod json;
pub mod logring;
pub mod server;
pub mod settings;
pub mod updater;

pub use error::{Error, Result};
