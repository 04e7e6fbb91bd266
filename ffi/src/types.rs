//! Conversions between the `#[repr(C)]` structs and the native stack.
//!
//! # Design
//! Requests are decoded into owned Rust values before any I/O starts, so a
//! malformed request fails with `Error` before a socket is opened. Responses
//! are written with the same `StringsList`/`HeaderList` owners the managed
//! side uses; `into_raw` hands them to the caller and `free_response`
//! reclaims them. The input stream is boxed separately and outlives the
//! response struct.

use std::ffi::{c_char, c_void, CStr};
use std::io::{self, Read};
use std::ptr;

use httpbridge_core::abi::{RawHeaders, RawRequest, RawResponse};
use httpbridge_core::headers::{decode_raw, HeaderList};
use httpbridge_core::http::Headers;
use httpbridge_core::strings::StringsList;

use crate::engine::{Exchange, NativeError};

/// An owned request decoded from a [`RawRequest`].
#[derive(Debug, Clone)]
pub(crate) struct DecodedRequest {
    pub method: String,
    pub uri: String,
    pub headers: Headers,
}

unsafe fn required_str(pointer: *const c_char, what: &str) -> Result<String, NativeError> {
    if pointer.is_null() {
        return Err(NativeError::InvalidRequest(format!("{what} is null")));
    }
    CStr::from_ptr(pointer)
        .to_str()
        .map(str::to_string)
        .map_err(|_| NativeError::InvalidRequest(format!("{what} is not valid UTF-8")))
}

impl DecodedRequest {
    /// # Safety
    /// Every pointer in `raw` must be null or valid for reads.
    pub(crate) unsafe fn from_raw(raw: &RawRequest) -> Result<Self, NativeError> {
        let headers = if raw.headers.count == 0 {
            Headers::new()
        } else {
            decode_raw(&raw.headers)?
        };
        Ok(Self {
            method: required_str(raw.method, "method")?,
            uri: required_str(raw.uri, "uri")?,
            headers,
        })
    }
}

/// # Safety
/// `host` must be null or a valid C string.
pub(crate) unsafe fn optional_str(host: *const c_char) -> Option<String> {
    (!host.is_null()).then(|| CStr::from_ptr(host).to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// Input stream
// ---------------------------------------------------------------------------

/// A response body handed out as an opaque input-stream handle.
pub struct NativeInputStream {
    reader: Option<Box<dyn Read + Send>>,
}

impl NativeInputStream {
    pub(crate) fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Some(Box::new(reader)),
        }
    }

    pub(crate) fn into_raw(self) -> *mut c_void {
        Box::into_raw(Box::new(self)) as *mut c_void
    }

    /// # Safety
    /// `handle` must come from [`NativeInputStream::into_raw`] and not be
    /// released yet.
    pub(crate) unsafe fn from_handle<'a>(handle: *mut c_void) -> &'a mut Self {
        &mut *(handle as *mut Self)
    }

    /// # Safety
    /// Same contract as [`NativeInputStream::from_handle`]; the handle is
    /// dangling afterwards.
    pub(crate) unsafe fn release(handle: *mut c_void) {
        drop(Box::from_raw(handle as *mut Self));
    }

    /// Read at most `buffer.len()` bytes; `Ok(0)` is end of stream.
    pub(crate) fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| io::Error::other("input stream is closed"))?;
        loop {
            match reader.read(buffer) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    pub(crate) fn close(&mut self) {
        self.reader = None;
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Fill `response` from a completed exchange.
pub(crate) fn write_response(exchange: Exchange, response: &mut RawResponse) -> Result<(), NativeError> {
    let names = StringsList::new(exchange.headers.iter().map(|(name, _)| name))?;
    let values = StringsList::new(exchange.headers.iter().map(|(_, value)| value))?;
    let headers = HeaderList::from_lists(names, values)?;

    let connection_uri = exchange.connection_uri.into_bytes().into_boxed_slice();

    response.status_code = i32::from(exchange.status);
    response.connection_uri_length = connection_uri.len();
    response.connection_uri = Box::into_raw(connection_uri) as *mut u8;
    response.headers = headers.into_raw();
    response.input_stream = exchange
        .body
        .map_or(ptr::null_mut(), |body| NativeInputStream::new(body).into_raw());
    Ok(())
}

/// Release headers and the connection URI. The input stream is left alone.
///
/// # Safety
/// `response` must have been filled by [`write_response`] or be default.
pub(crate) unsafe fn free_response(response: &mut RawResponse) {
    drop(HeaderList::from_raw(response.headers));
    response.headers = RawHeaders::null();

    if !response.connection_uri.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
            response.connection_uri,
            response.connection_uri_length,
        )));
    }
    response.connection_uri = ptr::null_mut();
    response.connection_uri_length = 0;
}
