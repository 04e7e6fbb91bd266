//! The bundled native HTTP stack, built on `ureq`.
//!
//! # Design
//! One call to [`execute`] performs one exchange and never follows
//! redirects; 3xx, 4xx and 5xx responses come back as data with their body
//! behind the input stream. Cancellation is polled at the points where the
//! stack would otherwise commit to slow work: after the proxy is set up,
//! before the request is sent, and once the response head has arrived.
//!
//! For `https` targets the TLS hooks are consulted in the platform order:
//! the custom socket factory first and, when it declines, the key store,
//! key manager factory and trust manager factory. The objects handed to the
//! hooks are this stack's own per-connection state; objects returned by the
//! hooks are accepted and logged, but the bundled stack keeps its default
//! rustls configuration.

use std::ffi::c_void;
use std::io::{self, Read};
use std::time::Duration;

use httpbridge_core::abi::{ConfigurationFn, NativeResult, RawConfiguration};
use httpbridge_core::HttpError;
use ureq::Agent;

use crate::types::{optional_str, DecodedRequest};

#[derive(Debug, thiserror::Error)]
pub enum NativeError {
    #[error("cancellation was requested")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("http transport: {0}")]
    Http(#[from] ureq::Error),

    #[error("response encoding: {0}")]
    Encoding(#[from] HttpError),
}

impl NativeError {
    /// The result code reported across the boundary.
    pub fn result(&self) -> NativeResult {
        match self {
            NativeError::Cancelled => NativeResult::Cancelled,
            NativeError::Http(ureq::Error::Timeout(_)) => NativeResult::Timeout,
            NativeError::Http(ureq::Error::Io(e)) if e.kind() == io::ErrorKind::TimedOut => {
                NativeResult::Timeout
            }
            _ => NativeResult::Error,
        }
    }
}

/// A completed exchange, ready to be written into a `RawResponse`.
pub(crate) struct Exchange {
    pub status: u16,
    pub connection_uri: String,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Option<Box<dyn Read + Send>>,
}

/// Per-connection state the TLS hooks receive as opaque objects.
#[derive(Debug)]
struct TlsSession {
    host: String,
}

/// Read-only view of a raw configuration.
struct Settings<'a> {
    raw: &'a RawConfiguration,
}

impl Settings<'_> {
    fn is_cancellation_requested(&self) -> bool {
        self.raw
            .is_cancellation_requested
            .is_some_and(|poll| poll(self.raw.cancellation_token))
    }

    fn check_cancelled(&self, stage: &str) -> Result<(), NativeError> {
        if self.is_cancellation_requested() {
            tracing::debug!(stage, "cancellation observed");
            return Err(NativeError::Cancelled);
        }
        Ok(())
    }

    fn timeout(millis: i32) -> Option<Duration> {
        (millis > 0).then(|| Duration::from_millis(millis as u64))
    }

    fn connect_timeout(&self) -> Option<Duration> {
        Self::timeout(self.raw.connect_timeout_ms)
    }

    fn read_timeout(&self) -> Option<Duration> {
        Self::timeout(self.raw.read_timeout_ms)
    }

    fn proxy(&self) -> Option<String> {
        if !self.raw.proxy.use_proxy {
            return None;
        }
        let host = unsafe { optional_str(self.raw.proxy.host) }?;
        Some(match self.raw.proxy.port {
            port if port > 0 => format!("http://{host}:{port}"),
            _ => format!("http://{host}"),
        })
    }

    fn call_hook(&self, name: &str, hook: Option<ConfigurationFn>, object: *mut c_void) -> *mut c_void {
        let Some(hook) = hook else {
            return std::ptr::null_mut();
        };
        let result = hook(self.raw.hooks.handler, object);
        tracing::debug!(hook = name, returned_null = result.is_null(), "tls hook");
        result
    }

    fn configure_tls(&self, session: &mut TlsSession) {
        let hooks = &self.raw.hooks;
        let session_object = session as *mut TlsSession as *mut c_void;

        let socket_factory = self.call_hook(
            "configure_custom_ssl_socket_factory",
            hooks.configure_custom_ssl_socket_factory,
            session_object,
        );
        if !socket_factory.is_null() {
            tracing::debug!(host = %session.host, "custom socket factory supplied; keeping default tls");
            return;
        }

        let returned_key_store =
            self.call_hook("configure_key_store", hooks.configure_key_store, session_object);
        let key_store = if returned_key_store.is_null() {
            session_object
        } else {
            returned_key_store
        };
        self.call_hook(
            "configure_key_manager_factory",
            hooks.configure_key_manager_factory,
            key_store,
        );
        self.call_hook(
            "configure_trust_manager_factory",
            hooks.configure_trust_manager_factory,
            key_store,
        );
    }
}

fn build_agent(settings: &Settings<'_>) -> Result<Agent, NativeError> {
    let mut config = Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
        .max_redirects_will_error(false);

    if let Some(timeout) = settings.connect_timeout() {
        config = config.timeout_connect(Some(timeout));
    }
    if let Some(timeout) = settings.read_timeout() {
        config = config
            .timeout_recv_response(Some(timeout))
            .timeout_recv_body(Some(timeout));
    }
    if let Some(proxy) = settings.proxy() {
        config = config.proxy(Some(ureq::Proxy::new(&proxy)?));
    }

    Ok(config.build().new_agent())
}

/// Perform one exchange.
pub(crate) fn execute(
    request: &DecodedRequest,
    configuration: &RawConfiguration,
) -> Result<Exchange, NativeError> {
    let settings = Settings { raw: configuration };

    let uri: ureq::http::Uri = request
        .uri
        .parse()
        .map_err(|e| NativeError::InvalidRequest(format!("uri {:?}: {e}", request.uri)))?;

    let agent = build_agent(&settings)?;
    settings.check_cancelled("proxy")?;

    if uri.scheme_str() == Some("https") {
        let mut session = TlsSession {
            host: uri.host().unwrap_or_default().to_string(),
        };
        settings.configure_tls(&mut session);
    }

    let mut builder = ureq::http::Request::builder()
        .method(request.method.as_str())
        .uri(uri);
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    let http_request = builder
        .body(())
        .map_err(|e| NativeError::InvalidRequest(e.to_string()))?;

    settings.check_cancelled("connect")?;
    tracing::debug!(method = %request.method, uri = %request.uri, "sending");
    let response = agent.run(http_request)?;
    settings.check_cancelled("response head")?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect();

    let has_body = request.method != "HEAD" && status != 204 && status != 304;
    let body: Option<Box<dyn Read + Send>> =
        has_body.then(|| Box::new(response.into_body().into_reader()) as Box<dyn Read + Send>);

    tracing::debug!(status, has_body, "response head received");
    Ok(Exchange {
        status,
        connection_uri: request.uri.clone(),
        headers,
        body,
    })
}
