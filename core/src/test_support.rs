//! In-process native stack used by unit tests.

use std::ffi::{c_void, CStr};
use std::ptr;
use std::sync::Mutex;

use crate::abi::{NativeResult, NativeStack, RawConfiguration, RawRequest, RawResponse};
use crate::headers::{decode_raw, HeaderList};
use crate::http::Headers;
use crate::strings::StringsList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeEvent {
    MakeRequest,
    FreeResponse,
    Close,
    Release,
}

/// What the fake saw when `make_request` ran.
#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    pub method: String,
    pub uri: String,
    pub headers: Headers,
    pub use_proxy: bool,
    pub proxy_host: Option<String>,
    pub proxy_port: i32,
    pub connect_timeout_ms: i32,
    pub read_timeout_ms: i32,
    pub cancelled: bool,
    pub socket_factory: usize,
    pub hooks_handler: isize,
    pub cancellation_token: isize,
}

struct FakeBody {
    data: Vec<u8>,
    position: usize,
}

pub(crate) struct FakeStack {
    result: i32,
    status: i32,
    connection_uri: Option<Vec<u8>>,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    body: Option<Vec<u8>>,
    read_result: i32,
    close_result: i32,
    events: Mutex<Vec<FakeEvent>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl FakeStack {
    pub fn new() -> Self {
        Self {
            result: NativeResult::Success.code(),
            status: 200,
            connection_uri: None,
            headers: Vec::new(),
            body: None,
            read_result: NativeResult::Success.code(),
            close_result: NativeResult::Success.code(),
            events: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_result(mut self, code: i32) -> Self {
        self.result = code;
        self
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }

    pub fn with_connection_uri(mut self, uri: impl Into<Vec<u8>>) -> Self {
        self.connection_uri = Some(uri.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_read_result(mut self, code: i32) -> Self {
        self.read_result = code;
        self
    }

    pub fn with_close_result(mut self, code: i32) -> Self {
        self.close_result = code;
        self
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: FakeEvent) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last_seen(&self) -> SeenRequest {
        self.seen().pop().expect("no request was made")
    }

    /// Open a stream handle over `data` without making a request.
    pub fn open_stream(&self, data: &[u8]) -> *mut c_void {
        Box::into_raw(Box::new(FakeBody {
            data: data.to_vec(),
            position: 0,
        })) as *mut c_void
    }

    fn record(&self, event: FakeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

unsafe fn c_string(pointer: *const std::ffi::c_char) -> Option<String> {
    (!pointer.is_null()).then(|| CStr::from_ptr(pointer).to_string_lossy().into_owned())
}

impl NativeStack for FakeStack {
    unsafe fn make_request(
        &self,
        request: &RawRequest,
        configuration: &RawConfiguration,
        response: &mut RawResponse,
    ) -> i32 {
        self.record(FakeEvent::MakeRequest);

        let uri = c_string(request.uri).unwrap_or_default();
        let cancelled = configuration
            .is_cancellation_requested
            .is_some_and(|poll| poll(configuration.cancellation_token));
        let socket_factory = configuration
            .hooks
            .configure_custom_ssl_socket_factory
            .map_or(0, |hook| hook(configuration.hooks.handler, ptr::null_mut()) as usize);

        self.seen.lock().unwrap().push(SeenRequest {
            method: c_string(request.method).unwrap_or_default(),
            uri: uri.clone(),
            headers: decode_raw(&request.headers).unwrap(),
            use_proxy: configuration.proxy.use_proxy,
            proxy_host: c_string(configuration.proxy.host),
            proxy_port: configuration.proxy.port,
            connect_timeout_ms: configuration.connect_timeout_ms,
            read_timeout_ms: configuration.read_timeout_ms,
            cancelled,
            socket_factory,
            hooks_handler: configuration.hooks.handler,
            cancellation_token: configuration.cancellation_token,
        });

        let connection_uri = self
            .connection_uri
            .clone()
            .unwrap_or_else(|| uri.into_bytes())
            .into_boxed_slice();
        response.status_code = self.status;
        response.connection_uri_length = connection_uri.len();
        response.connection_uri = Box::into_raw(connection_uri) as *mut u8;

        let names = StringsList::new(self.headers.iter().map(|(name, _)| name)).unwrap();
        let values = StringsList::new(self.headers.iter().map(|(_, value)| value)).unwrap();
        response.headers = HeaderList::from_lists(names, values).unwrap().into_raw();

        if let Some(body) = &self.body {
            response.input_stream = self.open_stream(body);
        }

        self.result
    }

    unsafe fn free_response(&self, response: &mut RawResponse) {
        self.record(FakeEvent::FreeResponse);
        drop(HeaderList::from_raw(response.headers));
        if !response.connection_uri.is_null() {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                response.connection_uri,
                response.connection_uri_length,
            )));
        }
        *response = RawResponse::default();
    }

    unsafe fn read_from_input_stream(
        &self,
        stream: *mut c_void,
        buffer: &mut [u8],
        bytes_read: &mut usize,
    ) -> i32 {
        if self.read_result != NativeResult::Success.code() {
            return self.read_result;
        }
        let body = &mut *(stream as *mut FakeBody);
        let remaining = &body.data[body.position..];
        let count = remaining.len().min(buffer.len());
        buffer[..count].copy_from_slice(&remaining[..count]);
        body.position += count;
        *bytes_read = count;
        NativeResult::Success.code()
    }

    unsafe fn close_input_stream(&self, _stream: *mut c_void) -> i32 {
        self.record(FakeEvent::Close);
        self.close_result
    }

    unsafe fn release_input_stream(&self, stream: *mut c_void) {
        self.record(FakeEvent::Release);
        drop(Box::from_raw(stream as *mut FakeBody));
    }
}
