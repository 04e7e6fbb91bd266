//! Request/response transport over a [`NativeStack`].
//!
//! # Design
//! One call moves through `Building → Dispatched` and ends in exactly one of
//! `Succeeded`, `Failed`, `TimedOut` or `Cancelled`. [`NativeRequest`] and
//! [`NativeConfiguration`] own every buffer and registration the raw structs
//! point into, so they outlive the blocking native call by construction.
//!
//! The raw response is held by a guard that calls `free_response` exactly
//! once on every path. The input-stream handle is taken out of it first so
//! a decode failure afterwards still closes and releases the stream.

use std::ffi::CString;
use std::mem;
use std::ptr;
use std::slice;
use std::sync::Arc;

use url::Url;

use crate::abi::{NativeResult, NativeStack, RawConfiguration, RawProxy, RawRequest, RawResponse};
use crate::config::{timeout_millis, HandlerConfig};
use crate::error::HttpError;
use crate::headers::{self, HeaderList};
use crate::hooks::{CancellationRegistration, CancellationSource, HookTable, TlsHooks};
use crate::http::{encode_uri, Headers, HttpMethod, HttpResponse};
use crate::stream::ResponseBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Building,
    Dispatched,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

fn transition(state: RequestState) {
    tracing::debug!(?state, "native request");
}

fn c_string(value: &str, what: &str) -> Result<CString, HttpError> {
    CString::new(value).map_err(|_| HttpError::Argument(format!("{what} contains a NUL byte")))
}

/// The request half of one native call.
pub struct NativeRequest {
    method: CString,
    uri: CString,
    target: Url,
    headers: HeaderList,
}

impl NativeRequest {
    pub fn new(method: &HttpMethod, uri: &Url, headers: &Headers) -> Result<Self, HttpError> {
        transition(RequestState::Building);
        Ok(Self {
            method: c_string(method.as_str(), "method")?,
            uri: c_string(&encode_uri(uri), "request URI")?,
            target: uri.clone(),
            headers: HeaderList::encode(headers)?,
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn as_raw(&self) -> RawRequest {
        RawRequest {
            method: self.method.as_ptr(),
            uri: self.uri.as_ptr(),
            headers: self.headers.as_raw(),
        }
    }
}

/// The configuration half of one native call: proxy, timeouts, TLS hooks and
/// the cancellation linkage. Dropping it releases both registrations.
pub struct NativeConfiguration {
    use_proxy: bool,
    proxy_host: Option<CString>,
    proxy_port: i32,
    connect_timeout_ms: i32,
    read_timeout_ms: i32,
    hooks: HookTable,
    cancellation: CancellationRegistration,
}

impl NativeConfiguration {
    pub fn new(
        config: &HandlerConfig,
        proxy: Option<&Url>,
        tls_hooks: Arc<dyn TlsHooks>,
        cancellation: &CancellationSource,
    ) -> Result<Self, HttpError> {
        let connect_timeout_ms = timeout_millis(config.connect_timeout)?;
        let read_timeout_ms = timeout_millis(config.read_timeout)?;

        let (proxy_host, proxy_port) = match proxy.and_then(|url| url.host_str().map(|h| (url, h))) {
            Some((url, host)) => {
                let port = url.port_or_known_default().map_or(-1, i32::from);
                (Some(c_string(host, "proxy host")?), port)
            }
            None => (None, -1),
        };

        Ok(Self {
            use_proxy: config.use_proxy,
            proxy_host,
            proxy_port,
            connect_timeout_ms,
            read_timeout_ms,
            hooks: HookTable::register(tls_hooks),
            cancellation: CancellationRegistration::register(cancellation),
        })
    }

    pub fn as_raw(&self) -> RawConfiguration {
        RawConfiguration {
            proxy: RawProxy {
                use_proxy: self.use_proxy,
                host: self.proxy_host.as_ref().map_or(ptr::null(), |host| host.as_ptr()),
                port: self.proxy_port,
            },
            connect_timeout_ms: self.connect_timeout_ms,
            read_timeout_ms: self.read_timeout_ms,
            cancellation_token: self.cancellation.handle(),
            is_cancellation_requested: Some(self.cancellation.callback()),
            hooks: self.hooks.as_raw(),
        }
    }
}

struct ResponseGuard<'a> {
    stack: &'a dyn NativeStack,
    raw: RawResponse,
}

impl Drop for ResponseGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.stack.free_response(&mut self.raw) };
    }
}

/// Drives single native calls.
#[derive(Clone)]
pub struct Transport {
    stack: Arc<dyn NativeStack>,
}

impl Transport {
    pub fn new(stack: Arc<dyn NativeStack>) -> Self {
        Self { stack }
    }

    pub fn stack(&self) -> &Arc<dyn NativeStack> {
        &self.stack
    }

    /// Perform one blocking native call.
    pub fn execute(
        &self,
        request: &NativeRequest,
        configuration: &NativeConfiguration,
        cancellation: &CancellationSource,
    ) -> Result<HttpResponse, HttpError> {
        let raw_request = request.as_raw();
        let raw_configuration = configuration.as_raw();

        let mut guard = ResponseGuard {
            stack: self.stack.as_ref(),
            raw: RawResponse::default(),
        };

        transition(RequestState::Dispatched);
        let code = unsafe {
            self.stack
                .make_request(&raw_request, &raw_configuration, &mut guard.raw)
        };

        let input_stream = mem::replace(&mut guard.raw.input_stream, ptr::null_mut());
        let body = unsafe { ResponseBody::from_handle(self.stack.clone(), input_stream) };

        match NativeResult::from_code(code) {
            Some(NativeResult::Success) => {}
            Some(NativeResult::Error) => {
                transition(RequestState::Failed);
                return Err(HttpError::Transport(format!(
                    "{} {} failed",
                    request.method.to_string_lossy(),
                    request.target
                )));
            }
            Some(NativeResult::Timeout) => {
                transition(RequestState::TimedOut);
                return Err(HttpError::Timeout);
            }
            Some(NativeResult::Cancelled) if cancellation.is_cancellation_requested() => {
                transition(RequestState::Cancelled);
                return Err(HttpError::Cancelled);
            }
            Some(NativeResult::Cancelled) => {
                transition(RequestState::Failed);
                return Err(HttpError::InvariantViolation(
                    "native stack reported cancellation but none was requested".to_string(),
                ));
            }
            None => {
                transition(RequestState::Failed);
                return Err(HttpError::InvariantViolation(format!(
                    "unknown native result code {code}"
                )));
            }
        }

        let response = decode_response(&guard.raw, request.target(), body);
        match &response {
            Ok(response) => {
                tracing::debug!(status = response.status, "native response");
                transition(RequestState::Succeeded);
            }
            Err(_) => transition(RequestState::Failed),
        }
        response
    }
}

fn decode_response(
    raw: &RawResponse,
    target: &Url,
    body: ResponseBody,
) -> Result<HttpResponse, HttpError> {
    let status = u16::try_from(raw.status_code).map_err(|_| {
        HttpError::InvariantViolation(format!("status code {} out of range", raw.status_code))
    })?;

    let connection_uri = if raw.connection_uri.is_null() {
        target.clone()
    } else {
        let bytes = unsafe { slice::from_raw_parts(raw.connection_uri, raw.connection_uri_length) };
        let text = String::from_utf8(bytes.to_vec())?;
        Url::parse(&text).map_err(|e| {
            HttpError::InvariantViolation(format!("connection URI {text:?} is invalid: {e}"))
        })?
    };

    let mut response = HttpResponse {
        status,
        connection_uri,
        headers: Headers::new(),
        content_headers: Headers::new(),
        body,
        request: None,
    };
    unsafe { headers::copy_to(&raw.headers, &mut response)? };
    Ok(response)
}
