//! Error types shared by the protocol layer.
//!
//! The variants follow the failure classes of the device: transport
//! failures, protocol mismatches, framing errors and codec errors. None of
//! them is fatal; every path hands control back to the caller.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// DNS resolution or TCP connect failed (or timed out).
    #[error("connect to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    /// Socket or file error after the transport was established.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer spoke something other than what we expected.
    #[error("protocol mismatch: {0}")]
    Protocol(String),

    /// Malformed chunked framing.
    #[error("framing error: {0}")]
    Framing(String),

    /// Malformed JSON input.
    #[error("json syntax error: {0}")]
    Syntax(String),

    /// Input ended inside a structure.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Encoder stack overflow or underflow.
    #[error("nesting error: {0}")]
    Nesting(&'static str),

    /// Transfer encoding we cannot decode.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Operation on a request whose transport is not open.
    #[error("request is not open")]
    NotOpen,
}

pub type Result<T> = std::result::Result<T, Error>;
