//! C-ABI native HTTP stack for `httpbridge-core`.
//!
//! # Overview
//! Exposes the five native entry points the managed side drives:
//! `httpbridge_make_request`, `httpbridge_free_response`,
//! `httpbridge_read_from_input_stream`, `httpbridge_close_input_stream` and
//! `httpbridge_release_input_stream`. [`native_api`] bundles them into the
//! `NativeApi` table `httpbridge-core` consumes.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary; a panic reports `Error`.
//! - Results are plain `i32` codes of `NativeResult`.
//! - The response struct owns its headers and connection URI until
//!   `httpbridge_free_response`. The input stream is a separate handle:
//!   close it, then release it.

mod engine;
pub mod types;

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use httpbridge_core::abi::{NativeApi, NativeResult, NativeStack, RawConfiguration, RawRequest, RawResponse};

pub use engine::NativeError;
use types::{DecodedRequest, NativeInputStream};

/// The function table of this native stack.
pub fn native_api() -> NativeApi {
    NativeApi {
        make_request: httpbridge_make_request,
        free_response: httpbridge_free_response,
        read_from_input_stream: httpbridge_read_from_input_stream,
        close_input_stream: httpbridge_close_input_stream,
        release_input_stream: httpbridge_release_input_stream,
    }
}

/// [`native_api`] as a shareable `NativeStack`.
pub fn native_stack() -> Arc<dyn NativeStack> {
    Arc::new(native_api())
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Perform one HTTP exchange.
///
/// On `Success`, `response` holds the status, connection URI, headers and
/// an input stream (null when there is no body). The caller must pass
/// `response` to `httpbridge_free_response` on every path.
#[unsafe(no_mangle)]
pub extern "C" fn httpbridge_make_request(
    request: RawRequest,
    configuration: RawConfiguration,
    response: *mut RawResponse,
) -> i32 {
    if response.is_null() {
        return NativeResult::Error.code();
    }
    catch_unwind(AssertUnwindSafe(|| {
        let response = unsafe { &mut *response };
        *response = RawResponse::default();

        let result = unsafe { DecodedRequest::from_raw(&request) }
            .and_then(|decoded| engine::execute(&decoded, &configuration))
            .and_then(|exchange| types::write_response(exchange, response));

        match result {
            Ok(()) => NativeResult::Success.code(),
            Err(e) => {
                tracing::debug!(error = %e, "native request failed");
                e.result().code()
            }
        }
    }))
    .unwrap_or(NativeResult::Error.code())
}

/// Release the headers and connection URI of `response`. Safe to call with
/// null and safe to call twice.
#[unsafe(no_mangle)]
pub extern "C" fn httpbridge_free_response(response: *mut RawResponse) {
    if !response.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| unsafe {
            types::free_response(&mut *response)
        }));
    }
}

// ---------------------------------------------------------------------------
// Input streams
// ---------------------------------------------------------------------------

/// Blocking read of at most `length` bytes. `Success` with
/// `*bytes_read == 0` is end of stream.
#[unsafe(no_mangle)]
pub extern "C" fn httpbridge_read_from_input_stream(
    stream: *mut c_void,
    buffer: *mut u8,
    length: usize,
    bytes_read: *mut usize,
) -> i32 {
    if stream.is_null() || bytes_read.is_null() || (buffer.is_null() && length > 0) {
        return NativeResult::Error.code();
    }
    catch_unwind(AssertUnwindSafe(|| {
        let bytes_read = unsafe { &mut *bytes_read };
        *bytes_read = 0;
        if length == 0 {
            return NativeResult::Success.code();
        }
        let buffer = unsafe { std::slice::from_raw_parts_mut(buffer, length) };
        match unsafe { NativeInputStream::from_handle(stream) }.read(buffer) {
            Ok(read) => {
                *bytes_read = read;
                NativeResult::Success.code()
            }
            Err(e) => {
                tracing::debug!(error = %e, "input stream read failed");
                match e.kind() {
                    std::io::ErrorKind::TimedOut => NativeResult::Timeout.code(),
                    _ => NativeResult::Error.code(),
                }
            }
        }
    }))
    .unwrap_or(NativeResult::Error.code())
}

/// Close the stream; later reads fail. The handle stays valid until
/// `httpbridge_release_input_stream`.
#[unsafe(no_mangle)]
pub extern "C" fn httpbridge_close_input_stream(stream: *mut c_void) -> i32 {
    if stream.is_null() {
        return NativeResult::Error.code();
    }
    catch_unwind(AssertUnwindSafe(|| {
        unsafe { NativeInputStream::from_handle(stream) }.close();
        NativeResult::Success.code()
    }))
    .unwrap_or(NativeResult::Error.code())
}

/// Free the stream handle. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn httpbridge_release_input_stream(stream: *mut c_void) {
    if !stream.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| unsafe {
            NativeInputStream::release(stream)
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpbridge_core::abi::{RawHeaders, RawHooks, RawProxy};
    use httpbridge_core::hooks::{CancellationRegistration, CancellationSource};
    use std::ffi::CString;
    use std::io::Cursor;
    use std::ptr;

    fn configuration() -> RawConfiguration {
        RawConfiguration {
            proxy: RawProxy {
                use_proxy: false,
                host: ptr::null(),
                port: -1,
            },
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
            cancellation_token: 0,
            is_cancellation_requested: None,
            hooks: RawHooks {
                handler: 0,
                configure_key_store: None,
                configure_trust_manager_factory: None,
                configure_key_manager_factory: None,
                configure_custom_ssl_socket_factory: None,
            },
        }
    }

    #[test]
    fn null_response_is_an_error() {
        let method = CString::new("GET").unwrap();
        let uri = CString::new("http://127.0.0.1:9/").unwrap();
        let request = RawRequest {
            method: method.as_ptr(),
            uri: uri.as_ptr(),
            headers: RawHeaders::null(),
        };
        let code = httpbridge_make_request(request, configuration(), ptr::null_mut());
        assert_eq!(code, NativeResult::Error.code());
    }

    #[test]
    fn null_uri_is_an_error() {
        let method = CString::new("GET").unwrap();
        let request = RawRequest {
            method: method.as_ptr(),
            uri: ptr::null(),
            headers: RawHeaders::null(),
        };
        let mut response = RawResponse::default();
        let code = httpbridge_make_request(request, configuration(), &mut response);
        assert_eq!(code, NativeResult::Error.code());
        httpbridge_free_response(&mut response);
    }

    #[test]
    fn pre_cancelled_request_reports_cancelled() {
        let source = CancellationSource::new();
        source.cancel();
        let registration = CancellationRegistration::register(&source);
        let mut raw = configuration();
        raw.cancellation_token = registration.handle();
        raw.is_cancellation_requested = Some(registration.callback());

        let method = CString::new("GET").unwrap();
        let uri = CString::new("http://127.0.0.1:9/").unwrap();
        let request = RawRequest {
            method: method.as_ptr(),
            uri: uri.as_ptr(),
            headers: RawHeaders::null(),
        };
        let mut response = RawResponse::default();
        let code = httpbridge_make_request(request, raw, &mut response);
        assert_eq!(code, NativeResult::Cancelled.code());
        assert!(response.input_stream.is_null());
        httpbridge_free_response(&mut response);
    }

    #[test]
    fn stream_reads_then_reports_eof() {
        let stream = NativeInputStream::new(Cursor::new(b"abc".to_vec())).into_raw();
        let mut buffer = [0u8; 8];
        let mut read = 0usize;

        let code = httpbridge_read_from_input_stream(stream, buffer.as_mut_ptr(), buffer.len(), &mut read);
        assert_eq!(code, NativeResult::Success.code());
        assert_eq!(&buffer[..read], b"abc");

        let code = httpbridge_read_from_input_stream(stream, buffer.as_mut_ptr(), buffer.len(), &mut read);
        assert_eq!(code, NativeResult::Success.code());
        assert_eq!(read, 0);

        assert_eq!(httpbridge_close_input_stream(stream), NativeResult::Success.code());
        let code = httpbridge_read_from_input_stream(stream, buffer.as_mut_ptr(), buffer.len(), &mut read);
        assert_eq!(code, NativeResult::Error.code());
        httpbridge_release_input_stream(stream);
    }

    #[test]
    fn null_handles_are_safe() {
        let mut read = 0usize;
        assert_eq!(
            httpbridge_read_from_input_stream(ptr::null_mut(), ptr::null_mut(), 0, &mut read),
            NativeResult::Error.code()
        );
        assert_eq!(httpbridge_close_input_stream(ptr::null_mut()), NativeResult::Error.code());
        httpbridge_release_input_stream(ptr::null_mut());
        httpbridge_free_response(ptr::null_mut());
    }

    #[test]
    fn api_table_dispatches_to_exports() {
        let api = native_api();
        let stream = NativeInputStream::new(Cursor::new(b"xy".to_vec())).into_raw();
        let mut buffer = [0u8; 4];
        let mut read = 0usize;
        unsafe {
            assert_eq!(
                api.read_from_input_stream(stream, &mut buffer, &mut read),
                NativeResult::Success.code()
            );
            assert_eq!(&buffer[..read], b"xy");
            assert_eq!(api.close_input_stream(stream), NativeResult::Success.code());
            api.release_input_stream(stream);
        }
    }
}
