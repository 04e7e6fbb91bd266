//! Error types for the native transport bridge.
//!
//! # Design
//! `Timeout` and `Cancelled` get dedicated variants because callers
//! routinely retry the former and silently drop the latter. A native
//! `Cancelled` result without a triggered signal, or an unknown result code,
//! is an `InvariantViolation`: the native and managed sides disagree about
//! the contract and that must not be mapped onto a generic failure.

use std::io;
use std::string::FromUtf8Error;

/// Errors returned by the transport and the handler.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The native stack reported a generic failure.
    #[error("native transport failure: {0}")]
    Transport(String),

    /// The native stack timed out connecting or reading.
    #[error("the request timed out")]
    Timeout,

    /// The caller's cancellation signal was triggered.
    #[error("the request was cancelled")]
    Cancelled,

    /// Native and managed sides disagree about the calling contract.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    /// A caller-supplied value is out of range or malformed.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A per-string native buffer could not be allocated.
    #[error("failed to allocate {size} byte buffer for string {index}")]
    Allocation { index: usize, size: usize },

    /// The native stack handed back bytes that are not UTF-8.
    #[error("invalid utf-8 from native stack: {0}")]
    Decode(#[from] FromUtf8Error),

    /// `HandlerConfig` could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Reading the response body failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
