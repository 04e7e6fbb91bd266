//! `#[repr(C)]` layouts shared with the native HTTP stack.
//!
//! # Design
//! These structs are plain views: they carry raw pointers but own nothing.
//! Ownership lives in the wrappers that produce them (`StringsList`,
//! `HeaderList`, `NativeRequest`, `NativeConfiguration`) on the managed side,
//! and in the native stack for everything reachable from a `RawResponse`
//! until `free_response` runs.
//!
//! Result codes cross the boundary as plain `i32` so an out-of-range value
//! from the native side is representable and can be reported instead of
//! being undefined behavior.

use std::ffi::{c_char, c_void};
use std::ptr;

/// Polls a cancellation token handle. Returns `true` once cancellation was
/// requested.
pub type IsCancellationRequestedFn = extern "C" fn(isize) -> bool;

/// TLS configuration hook: `(handler handle, native object) -> native object`.
pub type ConfigurationFn = extern "C" fn(isize, *mut c_void) -> *mut c_void;

/// Result codes returned by the native entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum NativeResult {
    Success = 0,
    Error = 1,
    Timeout = 2,
    Cancelled = 3,
}

impl NativeResult {
    /// Map a raw code back to a known result. Unknown codes yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(NativeResult::Success),
            1 => Some(NativeResult::Error),
            2 => Some(NativeResult::Timeout),
            3 => Some(NativeResult::Cancelled),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

// ---------------------------------------------------------------------------
// String lists and headers
// ---------------------------------------------------------------------------

/// Parallel blocks of string pointers and their byte lengths.
///
/// Every `values[i]` is null-terminated, but consumers must use
/// `lengths[i]` to find its end.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStringsList {
    pub values: *mut *mut u8,
    pub lengths: *mut usize,
}

impl RawStringsList {
    pub const fn null() -> Self {
        Self {
            values: ptr::null_mut(),
            lengths: ptr::null_mut(),
        }
    }
}

/// A header mapping as two parallel string lists.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawHeaders {
    pub count: usize,
    pub names: RawStringsList,
    pub values: RawStringsList,
}

impl RawHeaders {
    pub const fn null() -> Self {
        Self {
            count: 0,
            names: RawStringsList::null(),
            values: RawStringsList::null(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request, configuration, response
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawRequest {
    pub method: *const c_char,
    pub uri: *const c_char,
    pub headers: RawHeaders,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawProxy {
    pub use_proxy: bool,
    /// Null when no proxy applies to the target URI.
    pub host: *const c_char,
    /// `-1` when no proxy applies.
    pub port: i32,
}

/// TLS hook table. `handler` is an opaque registry handle, never an address.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawHooks {
    pub handler: isize,
    pub configure_key_store: Option<ConfigurationFn>,
    pub configure_trust_manager_factory: Option<ConfigurationFn>,
    pub configure_key_manager_factory: Option<ConfigurationFn>,
    pub configure_custom_ssl_socket_factory: Option<ConfigurationFn>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawConfiguration {
    pub proxy: RawProxy,
    pub connect_timeout_ms: i32,
    pub read_timeout_ms: i32,
    pub cancellation_token: isize,
    pub is_cancellation_requested: Option<IsCancellationRequestedFn>,
    pub hooks: RawHooks,
}

/// Filled in by `make_request`; owned by the native stack until
/// `free_response`. `input_stream` is released separately.
#[repr(C)]
#[derive(Debug)]
pub struct RawResponse {
    pub status_code: i32,
    pub connection_uri: *mut u8,
    pub connection_uri_length: usize,
    pub headers: RawHeaders,
    pub input_stream: *mut c_void,
}

impl Default for RawResponse {
    fn default() -> Self {
        Self {
            status_code: 0,
            connection_uri: ptr::null_mut(),
            connection_uri_length: 0,
            headers: RawHeaders::null(),
            input_stream: ptr::null_mut(),
        }
    }
}

// ---------------------------------------------------------------------------
// Native entry points
// ---------------------------------------------------------------------------

/// The native HTTP stack as seen from the managed side.
///
/// Implemented by [`NativeApi`] for a real C-ABI library and by in-process
/// fakes in tests.
pub trait NativeStack: Send + Sync {
    /// Perform one request. Returns a raw [`NativeResult`] code.
    ///
    /// # Safety
    /// Every pointer reachable from `request` and `configuration` must stay
    /// valid for the duration of the call.
    unsafe fn make_request(
        &self,
        request: &RawRequest,
        configuration: &RawConfiguration,
        response: &mut RawResponse,
    ) -> i32;

    /// Release the native allocations referenced by `response`.
    ///
    /// # Safety
    /// `response` must have been passed to `make_request` of the same stack
    /// and not yet freed.
    unsafe fn free_response(&self, response: &mut RawResponse);

    /// Blocking read into `buffer`. `bytes_read == 0` with `Success` is EOF.
    ///
    /// # Safety
    /// `stream` must be a live input-stream handle from this stack.
    unsafe fn read_from_input_stream(
        &self,
        stream: *mut c_void,
        buffer: &mut [u8],
        bytes_read: &mut usize,
    ) -> i32;

    /// # Safety
    /// `stream` must be a live input-stream handle from this stack.
    unsafe fn close_input_stream(&self, stream: *mut c_void) -> i32;

    /// # Safety
    /// `stream` must be a live input-stream handle; it is dangling afterwards.
    unsafe fn release_input_stream(&self, stream: *mut c_void);
}

/// Function-pointer table of a C-ABI native stack.
#[derive(Debug, Clone, Copy)]
pub struct NativeApi {
    pub make_request:
        unsafe extern "C" fn(RawRequest, RawConfiguration, *mut RawResponse) -> i32,
    pub free_response: unsafe extern "C" fn(*mut RawResponse),
    pub read_from_input_stream:
        unsafe extern "C" fn(*mut c_void, *mut u8, usize, *mut usize) -> i32,
    pub close_input_stream: unsafe extern "C" fn(*mut c_void) -> i32,
    pub release_input_stream: unsafe extern "C" fn(*mut c_void),
}

impl NativeStack for NativeApi {
    unsafe fn make_request(
        &self,
        request: &RawRequest,
        configuration: &RawConfiguration,
        response: &mut RawResponse,
    ) -> i32 {
        (self.make_request)(*request, *configuration, response)
    }

    unsafe fn free_response(&self, response: &mut RawResponse) {
        (self.free_response)(response)
    }

    unsafe fn read_from_input_stream(
        &self,
        stream: *mut c_void,
        buffer: &mut [u8],
        bytes_read: &mut usize,
    ) -> i32 {
        (self.read_from_input_stream)(stream, buffer.as_mut_ptr(), buffer.len(), bytes_read)
    }

    unsafe fn close_input_stream(&self, stream: *mut c_void) -> i32 {
        (self.close_input_stream)(stream)
    }

    unsafe fn release_input_stream(&self, stream: *mut c_void) {
        (self.release_input_stream)(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_round_trip_known_values() {
        for result in [
            NativeResult::Success,
            NativeResult::Error,
            NativeResult::Timeout,
            NativeResult::Cancelled,
        ] {
            assert_eq!(NativeResult::from_code(result.code()), Some(result));
        }
    }

    #[test]
    fn unknown_result_codes_are_rejected() {
        assert_eq!(NativeResult::from_code(4), None);
        assert_eq!(NativeResult::from_code(-1), None);
    }

    #[test]
    fn default_response_is_empty() {
        let response = RawResponse::default();
        assert!(response.connection_uri.is_null());
        assert!(response.input_stream.is_null());
        assert_eq!(response.headers.count, 0);
        assert!(response.headers.names.values.is_null());
    }
}
