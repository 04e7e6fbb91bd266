//! Per-request orchestration on top of the transport.
//!
//! # Design
//! `NativeHandler::send` is the async entry point. Each exchange collects
//! the outgoing headers (content headers, message headers, then the jar's
//! `Cookie` value), builds the native request and configuration, and runs the
//! blocking native call on `tokio::task::spawn_blocking`. Everything the raw
//! structs point into lives inside that worker closure until the call
//! returns.
//!
//! After every exchange the response's `Set-Cookie` values go back into the
//! jar; a bad cookie is logged and never fails the request. Redirects are
//! only followed when a [`RedirectPolicy`] produces a follow-up request.

use std::panic;
use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::abi::NativeStack;
use crate::config::HandlerConfig;
use crate::cookies::{CookieJar, CookieStoreJar};
use crate::error::HttpError;
use crate::hooks::{CancellationSource, DefaultTlsHooks, TlsHooks};
use crate::http::{Headers, HttpRequest, HttpResponse};
use crate::proxy::{NoProxy, ProxyResolver, StaticProxy};
use crate::redirect::{NoRedirects, RedirectPolicy};
use crate::transport::{NativeConfiguration, NativeRequest, Transport};

struct Inner {
    transport: Transport,
    tls_hooks: Arc<dyn TlsHooks>,
    cookies: Arc<dyn CookieJar>,
    proxy: Arc<dyn ProxyResolver>,
    redirects: Arc<dyn RedirectPolicy>,
    config: HandlerConfig,
}

/// HTTP handler backed by a native stack.
#[derive(Clone)]
pub struct NativeHandler {
    inner: Arc<Inner>,
}

impl NativeHandler {
    /// A handler with the default configuration and strategies.
    pub fn new(stack: Arc<dyn NativeStack>) -> Self {
        let config = HandlerConfig::default();
        Self {
            inner: Arc::new(Inner {
                transport: Transport::new(stack),
                tls_hooks: Arc::new(DefaultTlsHooks),
                cookies: Arc::new(CookieStoreJar::new()),
                proxy: Arc::new(NoProxy),
                redirects: Arc::new(NoRedirects),
                config,
            }),
        }
    }

    pub fn builder(stack: Arc<dyn NativeStack>) -> NativeHandlerBuilder {
        NativeHandlerBuilder {
            stack,
            config: HandlerConfig::default(),
            tls_hooks: None,
            cookies: None,
            proxy: None,
            redirects: None,
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.inner.config
    }

    pub fn cookie_jar(&self) -> &Arc<dyn CookieJar> {
        &self.inner.cookies
    }

    /// Send `request`, following redirects the policy asks for.
    pub async fn send(
        &self,
        request: HttpRequest,
        cancellation: &CancellationSource,
    ) -> Result<HttpResponse, HttpError> {
        let span = tracing::debug_span!(
            "native_request",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            uri = %request.uri,
        );
        self.send_inner(request, cancellation).instrument(span).await
    }

    async fn send_inner(
        &self,
        request: HttpRequest,
        cancellation: &CancellationSource,
    ) -> Result<HttpResponse, HttpError> {
        let config = &self.inner.config;
        let mut next = request;
        let mut requests = 0i64;

        loop {
            requests += 1;
            let response = self.make_request(next, cancellation).await?;
            self.inner.process_cookies(&response);

            if !config.allow_auto_redirect
                || requests >= i64::from(config.max_automatic_redirections) + 1
            {
                return Ok(response);
            }
            let Some(answered) = response.request.as_ref() else {
                return Ok(response);
            };
            match self.inner.redirects.redirect_request(answered, &response) {
                Some(redirect) => {
                    tracing::debug!(status = response.status, to = %redirect.uri, "following redirect");
                    next = redirect;
                }
                None => return Ok(response),
            }
        }
    }

    async fn make_request(
        &self,
        request: HttpRequest,
        cancellation: &CancellationSource,
    ) -> Result<HttpResponse, HttpError> {
        if cancellation.is_cancellation_requested() {
            return Err(HttpError::Cancelled);
        }

        let inner = self.inner.clone();
        let cancellation = cancellation.clone();
        let span = tracing::Span::current();
        let worker = tokio::task::spawn_blocking(move || {
            span.in_scope(|| inner.execute(request, &cancellation))
        });

        match worker.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
            Err(_) => Err(HttpError::Cancelled),
        }
    }
}

impl Inner {
    fn execute(
        &self,
        request: HttpRequest,
        cancellation: &CancellationSource,
    ) -> Result<HttpResponse, HttpError> {
        let headers = self.collect_headers(&request);
        let native_request = NativeRequest::new(&request.method, &request.uri, &headers)?;

        let proxy = if self.config.use_proxy {
            self.proxy.proxy_for(&request.uri)
        } else {
            None
        };
        let configuration = NativeConfiguration::new(
            &self.config,
            proxy.as_ref(),
            self.tls_hooks.clone(),
            cancellation,
        )?;

        let mut response = self
            .transport
            .execute(&native_request, &configuration, cancellation)?;

        let mut request = request;
        request.uri = response.connection_uri.clone();
        response.request = Some(request);
        Ok(response)
    }

    fn collect_headers(&self, request: &HttpRequest) -> Headers {
        let mut headers = request
            .content_headers
            .iter()
            .chain(request.headers.iter())
            .collect::<Headers>()
            .flatten();

        if self.config.use_cookies {
            let cookie = self.cookies.cookie_header(&request.uri);
            if !cookie.is_empty() {
                let merged = match headers.get("Cookie") {
                    Some(supplied) => format!("{supplied}; {cookie}"),
                    None => cookie,
                };
                headers.set("Cookie", merged);
            }
        }
        headers
    }

    /// Stores `Set-Cookie` values under the effective URI of the exchange.
    fn process_cookies(&self, response: &HttpResponse) {
        if !self.config.use_cookies {
            return;
        }
        let uri = response
            .request
            .as_ref()
            .map_or(&response.connection_uri, |request| &request.uri);
        let values: Vec<&str> = response.headers.get_all("Set-Cookie").collect();
        if values.is_empty() {
            return;
        }
        if let Err(e) = self.cookies.set_cookies(uri, &values.join(",")) {
            tracing::warn!(error = %e, %uri, "ignoring invalid Set-Cookie");
        }
    }
}

pub struct NativeHandlerBuilder {
    stack: Arc<dyn NativeStack>,
    config: HandlerConfig,
    tls_hooks: Option<Arc<dyn TlsHooks>>,
    cookies: Option<Arc<dyn CookieJar>>,
    proxy: Option<Arc<dyn ProxyResolver>>,
    redirects: Option<Arc<dyn RedirectPolicy>>,
}

impl NativeHandlerBuilder {
    pub fn config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tls_hooks(mut self, hooks: Arc<dyn TlsHooks>) -> Self {
        self.tls_hooks = Some(hooks);
        self
    }

    pub fn cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.cookies = Some(jar);
        self
    }

    pub fn proxy_resolver(mut self, resolver: Arc<dyn ProxyResolver>) -> Self {
        self.proxy = Some(resolver);
        self
    }

    pub fn redirect_policy(mut self, policy: Arc<dyn RedirectPolicy>) -> Self {
        self.redirects = Some(policy);
        self
    }

    pub fn build(self) -> Result<NativeHandler, HttpError> {
        self.config.validate()?;

        let proxy = match (self.proxy, &self.config.proxy) {
            (Some(resolver), _) => resolver,
            (None, Some(url)) => {
                let mut resolver = StaticProxy::new(url.clone());
                if let Some(bypass) = &self.config.proxy_bypass {
                    resolver = resolver.with_bypass(bypass);
                }
                Arc::new(resolver)
            }
            (None, None) => Arc::new(NoProxy),
        };

        Ok(NativeHandler {
            inner: Arc::new(Inner {
                transport: Transport::new(self.stack),
                tls_hooks: self.tls_hooks.unwrap_or_else(|| Arc::new(DefaultTlsHooks)),
                cookies: self
                    .cookies
                    .unwrap_or_else(|| Arc::new(CookieStoreJar::new())),
                proxy,
                redirects: self.redirects.unwrap_or_else(|| Arc::new(NoRedirects)),
                config: self.config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::NativeResult;
    use crate::hooks::{
        configure_key_store_callback, is_cancellation_requested_callback, NativeObject,
    };
    use crate::http::HttpMethod;
    use crate::test_support::{FakeEvent, FakeStack};
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    /// Follows every response to `/next` and counts how often it was asked.
    #[derive(Default)]
    struct AlwaysRedirect {
        asked: AtomicUsize,
    }

    impl RedirectPolicy for AlwaysRedirect {
        fn redirect_request(
            &self,
            request: &HttpRequest,
            _response: &HttpResponse,
        ) -> Option<HttpRequest> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            let next = request.uri.join("/next").ok()?;
            Some(HttpRequest::from_url(request.method.clone(), next))
        }
    }

    fn handler(stack: &Arc<FakeStack>) -> NativeHandler {
        NativeHandler::new(stack.clone())
    }

    #[tokio::test]
    async fn send_returns_response_with_effective_request() {
        let stack = Arc::new(
            FakeStack::new()
                .with_connection_uri("https://example.com/final")
                .with_body("ok"),
        );
        let request = HttpRequest::get("https://example.com:443/start").unwrap();
        let response = handler(&stack)
            .send(request, &CancellationSource::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        let answered = response.request.as_ref().unwrap();
        assert_eq!(answered.uri.as_str(), "https://example.com/final");
        assert_eq!(answered.method, HttpMethod::Get);
        assert_eq!(response.body.into_bytes().await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn headers_are_flattened_with_content_headers_first() {
        let stack = Arc::new(FakeStack::new());
        let request = HttpRequest::get("http://example.com/")
            .unwrap()
            .with_header("Accept", "text/html")
            .with_header("accept", "application/json")
            .with_content_header("Content-Language", "en");
        handler(&stack)
            .send(request, &CancellationSource::new())
            .await
            .unwrap();

        let seen = stack.last_seen();
        let names: Vec<&str> = seen.headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["Content-Language", "Accept"]);
        assert_eq!(seen.headers.get("accept"), Some("text/html,application/json"));
    }

    #[tokio::test]
    async fn cookies_round_trip_through_the_jar() {
        let stack = Arc::new(FakeStack::new().with_header("Set-Cookie", "session=abc; Path=/"));
        let handler = handler(&stack);
        let cancellation = CancellationSource::new();

        handler
            .send(HttpRequest::get("http://example.com/login").unwrap(), &cancellation)
            .await
            .unwrap();
        assert_eq!(stack.last_seen().headers.get("cookie"), None);

        handler
            .send(HttpRequest::get("http://example.com/home").unwrap(), &cancellation)
            .await
            .unwrap();
        assert_eq!(stack.last_seen().headers.get("cookie"), Some("session=abc"));
    }

    #[tokio::test]
    async fn cookies_are_stored_for_the_effective_uri() {
        let stack = Arc::new(
            FakeStack::new()
                .with_connection_uri("http://moved.test/landing")
                .with_header("Set-Cookie", "session=abc; Path=/"),
        );
        let handler = handler(&stack);
        handler
            .send(HttpRequest::get("http://origin.test/start").unwrap(), &CancellationSource::new())
            .await
            .unwrap();

        let jar = handler.cookie_jar();
        let moved = Url::parse("http://moved.test/").unwrap();
        let origin = Url::parse("http://origin.test/").unwrap();
        assert_eq!(jar.cookie_header(&moved), "session=abc");
        assert!(jar.cookie_header(&origin).is_empty());
    }

    #[tokio::test]
    async fn jar_cookies_merge_into_a_supplied_cookie_header() {
        let stack = Arc::new(FakeStack::new().with_header("Set-Cookie", "jar=1; Path=/"));
        let handler = handler(&stack);
        let cancellation = CancellationSource::new();
        handler
            .send(HttpRequest::get("http://example.com/").unwrap(), &cancellation)
            .await
            .unwrap();

        let request = HttpRequest::get("http://example.com/")
            .unwrap()
            .with_header("Cookie", "user=2");
        handler.send(request, &cancellation).await.unwrap();

        let seen = stack.last_seen();
        let cookies: Vec<&str> = seen.headers.get_all("cookie").collect();
        assert_eq!(cookies, ["user=2; jar=1"]);
    }

    #[tokio::test]
    async fn cookies_disabled_skips_the_jar() {
        let stack = Arc::new(FakeStack::new().with_header("Set-Cookie", "session=abc"));
        let config = HandlerConfig {
            use_cookies: false,
            ..HandlerConfig::default()
        };
        let handler = NativeHandler::builder(stack.clone())
            .config(config)
            .build()
            .unwrap();
        let uri = Url::parse("http://example.com/").unwrap();

        handler
            .send(HttpRequest::from_url(HttpMethod::Get, uri.clone()), &CancellationSource::new())
            .await
            .unwrap();
        assert!(handler.cookie_jar().cookie_header(&uri).is_empty());
    }

    #[tokio::test]
    async fn bad_set_cookie_does_not_fail_the_request() {
        let stack = Arc::new(FakeStack::new().with_header("Set-Cookie", "=broken"));
        let response = handler(&stack)
            .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationSource::new())
            .await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn pre_cancelled_request_never_reaches_the_stack() {
        let stack = Arc::new(FakeStack::new());
        let cancellation = CancellationSource::new();
        cancellation.cancel();
        let err = handler(&stack)
            .send(HttpRequest::get("http://example.com/").unwrap(), &cancellation)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Cancelled));
        assert!(stack.events().is_empty());
    }

    #[tokio::test]
    async fn native_failure_propagates_and_frees() {
        let stack = Arc::new(FakeStack::new().with_result(NativeResult::Timeout.code()));
        let err = handler(&stack)
            .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationSource::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Timeout));
        assert_eq!(stack.count(FakeEvent::FreeResponse), 1);
    }

    #[tokio::test]
    async fn redirect_policy_is_ignored_unless_enabled() {
        let stack = Arc::new(FakeStack::new().with_status(302));
        let policy = Arc::new(AlwaysRedirect::default());
        let handler = NativeHandler::builder(stack.clone())
            .redirect_policy(policy.clone())
            .build()
            .unwrap();

        let response = handler
            .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationSource::new())
            .await
            .unwrap();
        assert_eq!(response.status, 302);
        assert_eq!(policy.asked.load(Ordering::SeqCst), 0);
        assert_eq!(stack.count(FakeEvent::MakeRequest), 1);
    }

    #[tokio::test]
    async fn redirects_stop_at_the_configured_budget() {
        let stack = Arc::new(FakeStack::new().with_status(302));
        let policy = Arc::new(AlwaysRedirect::default());
        let mut config = HandlerConfig {
            allow_auto_redirect: true,
            ..HandlerConfig::default()
        };
        config.set_max_automatic_redirections(3).unwrap();
        let handler = NativeHandler::builder(stack.clone())
            .config(config)
            .redirect_policy(policy.clone())
            .build()
            .unwrap();

        handler
            .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationSource::new())
            .await
            .unwrap();
        assert_eq!(stack.count(FakeEvent::MakeRequest), 4);
        assert_eq!(stack.last_seen().uri, "http://example.com/next");
    }

    #[tokio::test]
    async fn configured_proxy_is_used_unless_disabled() {
        let stack = Arc::new(FakeStack::new());
        let config = HandlerConfig {
            proxy: Some(Url::parse("http://proxy.local:8080").unwrap()),
            proxy_bypass: Some("internal.test".to_string()),
            ..HandlerConfig::default()
        };
        let handler = NativeHandler::builder(stack.clone())
            .config(config.clone())
            .build()
            .unwrap();
        let cancellation = CancellationSource::new();

        handler
            .send(HttpRequest::get("http://example.com/").unwrap(), &cancellation)
            .await
            .unwrap();
        assert_eq!(stack.last_seen().proxy_host.as_deref(), Some("proxy.local"));
        assert_eq!(stack.last_seen().proxy_port, 8080);

        handler
            .send(HttpRequest::get("http://internal.test/").unwrap(), &cancellation)
            .await
            .unwrap();
        assert_eq!(stack.last_seen().proxy_host, None);

        let direct = NativeHandler::builder(stack.clone())
            .config(HandlerConfig {
                use_proxy: false,
                ..config
            })
            .build()
            .unwrap();
        direct
            .send(HttpRequest::get("http://example.com/").unwrap(), &cancellation)
            .await
            .unwrap();
        let seen = stack.last_seen();
        assert!(!seen.use_proxy);
        assert_eq!(seen.proxy_host, None);
    }

    struct KeyStoreHooks;

    impl TlsHooks for KeyStoreHooks {
        fn configure_key_store(&self, _key_store: NativeObject) -> NativeObject {
            NativeObject(0x55 as *mut c_void)
        }
    }

    #[tokio::test]
    async fn registrations_are_released_after_every_exchange() {
        for result in [NativeResult::Success, NativeResult::Error] {
            let stack = Arc::new(FakeStack::new().with_result(result.code()));
            let handler = NativeHandler::builder(stack.clone())
                .tls_hooks(Arc::new(KeyStoreHooks))
                .build()
                .unwrap();
            let cancellation = CancellationSource::new();
            let outcome = handler
                .send(HttpRequest::get("https://example.com/").unwrap(), &cancellation)
                .await;
            assert_eq!(outcome.is_ok(), result == NativeResult::Success);

            let seen = stack.last_seen();
            cancellation.cancel();
            let object = 0x11 as *mut c_void;
            assert!(configure_key_store_callback(seen.hooks_handler, object).is_null());
            assert!(!is_cancellation_requested_callback(seen.cancellation_token));
        }
    }

    #[test]
    fn invalid_config_is_rejected_by_the_builder() {
        let stack: Arc<dyn NativeStack> = Arc::new(FakeStack::new());
        let config = HandlerConfig {
            max_automatic_redirections: -1,
            ..HandlerConfig::default()
        };
        assert!(matches!(
            NativeHandler::builder(stack).config(config).build(),
            Err(HttpError::Argument(_))
        ));
    }
}
