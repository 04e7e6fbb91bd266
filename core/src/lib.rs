//! Managed side of a native HTTP transport bridge.
//!
//! # Overview
//! Takes an `HttpRequest` plus handler configuration, marshals it into the
//! `#[repr(C)]` structs of a native HTTP stack, performs the blocking native
//! call on a worker thread, and turns the native result into an
//! `HttpResponse` whose body streams from a native input-stream handle.
//!
//! # Design
//! - The native stack is a `NativeStack` trait object; `NativeApi` adapts a
//!   table of `extern "C"` functions, tests use in-process fakes.
//! - Every native allocation has one owner on the managed side and a RAII
//!   guard that releases it exactly once.
//! - Callbacks from the native side carry opaque registry handles, never
//!   addresses, so a late callback cannot reach freed memory.
//! - Native result codes map onto `HttpError`; a cancellation nobody asked
//!   for is reported as an invariant violation.

pub mod abi;
pub mod config;
pub mod cookies;
pub mod error;
pub mod factory;
pub mod handler;
pub mod headers;
pub mod hooks;
pub mod http;
pub mod proxy;
pub mod redirect;
pub mod stream;
pub mod strings;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use abi::{NativeApi, NativeResult, NativeStack};
pub use config::HandlerConfig;
pub use error::HttpError;
pub use factory::create_native_handler;
pub use handler::NativeHandler;
pub use hooks::{CancellationSource, DefaultTlsHooks, NativeObject, TlsHooks};
pub use http::{Headers, HttpMethod, HttpRequest, HttpResponse};
pub use stream::ResponseBody;
