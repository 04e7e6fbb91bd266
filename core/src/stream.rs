//! Response body streaming over a native input-stream handle.
//!
//! # Design
//! `ContentStream` owns one native input-stream handle and walks a small
//! lifecycle: `Open → Closed → Released`. Closing issues the native close;
//! dropping closes first if needed and then issues the native release.
//! Each native call happens at most once, in that order, on every path.
//!
//! Reads are blocking native calls. The stream is `Read`, not seekable and
//! not restartable; `ResponseBody::Empty` stands in when the native stack
//! returned no stream at all.

use std::ffi::c_void;
use std::fmt;
use std::io::{self, BufReader, Read};
use std::panic;
use std::sync::Arc;

use crate::abi::{NativeResult, NativeStack};
use crate::error::HttpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Closed,
    Released,
}

/// An owned native input stream.
pub struct ContentStream {
    stack: Arc<dyn NativeStack>,
    handle: *mut c_void,
    state: StreamState,
}

// The handle is owned exclusively by this value and is only ever used from
// one thread at a time; the stack itself is `Send + Sync`.
unsafe impl Send for ContentStream {}

impl ContentStream {
    /// Take ownership of a native input-stream handle.
    ///
    /// # Safety
    /// `handle` must be a live, non-null input stream produced by `stack`
    /// that nothing else will close or release.
    pub unsafe fn from_raw(stack: Arc<dyn NativeStack>, handle: *mut c_void) -> Self {
        tracing::trace!(?handle, "content stream opened");
        Self {
            stack,
            handle,
            state: StreamState::Open,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state != StreamState::Open
    }

    /// Issue the native close. A second call is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        if self.state != StreamState::Open {
            return Ok(());
        }
        self.state = StreamState::Closed;
        let code = unsafe { self.stack.close_input_stream(self.handle) };
        tracing::trace!(handle = ?self.handle, code, "content stream closed");
        match NativeResult::from_code(code) {
            Some(NativeResult::Success) => Ok(()),
            _ => Err(result_to_io(code)),
        }
    }
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state != StreamState::Open {
            return Err(io::Error::other("content stream is closed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut bytes_read = 0usize;
        let code = unsafe {
            self.stack
                .read_from_input_stream(self.handle, buf, &mut bytes_read)
        };
        match NativeResult::from_code(code) {
            Some(NativeResult::Success) if bytes_read <= buf.len() => Ok(bytes_read),
            Some(NativeResult::Success) => Err(io::Error::other(HttpError::InvariantViolation(
                format!("native read reported {bytes_read} bytes into a {} byte buffer", buf.len()),
            ))),
            _ => Err(result_to_io(code)),
        }
    }
}

impl Drop for ContentStream {
    fn drop(&mut self) {
        if self.state == StreamState::Open {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "closing content stream failed");
            }
        }
        if self.state == StreamState::Closed {
            self.state = StreamState::Released;
            unsafe { self.stack.release_input_stream(self.handle) };
            tracing::trace!(handle = ?self.handle, "content stream released");
        }
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStream")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish()
    }
}

fn result_to_io(code: i32) -> io::Error {
    match NativeResult::from_code(code) {
        Some(NativeResult::Timeout) => io::Error::new(io::ErrorKind::TimedOut, HttpError::Timeout),
        Some(NativeResult::Cancelled) => io::Error::other(HttpError::Cancelled),
        Some(NativeResult::Error) => io::Error::other(HttpError::Transport(
            "native input stream failed".to_string(),
        )),
        Some(NativeResult::Success) | None => io::Error::other(HttpError::InvariantViolation(
            format!("unexpected native stream result {code}"),
        )),
    }
}

/// Recover the `HttpError` a stream read wrapped into an `io::Error`.
fn body_error(e: io::Error) -> HttpError {
    if !e.get_ref().is_some_and(|inner| inner.is::<HttpError>()) {
        return HttpError::Io(e);
    }
    let kind = e.kind();
    match e.into_inner().map(|inner| inner.downcast::<HttpError>()) {
        Some(Ok(err)) => *err,
        Some(Err(inner)) => HttpError::Io(io::Error::new(kind, inner)),
        None => HttpError::Io(kind.into()),
    }
}

/// The body of an [`HttpResponse`](crate::http::HttpResponse).
pub enum ResponseBody {
    /// The native stack returned no input stream.
    Empty,
    Native(BufReader<ContentStream>),
}

impl ResponseBody {
    /// Wrap a native handle; a null handle yields an empty body.
    ///
    /// # Safety
    /// Same contract as [`ContentStream::from_raw`] for non-null handles.
    pub unsafe fn from_handle(stack: Arc<dyn NativeStack>, handle: *mut c_void) -> Self {
        if handle.is_null() {
            ResponseBody::Empty
        } else {
            ResponseBody::Native(BufReader::new(ContentStream::from_raw(stack, handle)))
        }
    }

    pub fn is_empty_stream(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }

    /// Close the underlying native stream. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        match self {
            ResponseBody::Empty => Ok(()),
            ResponseBody::Native(reader) => reader.get_mut().close(),
        }
    }

    /// Read the remaining body into memory.
    ///
    /// Native `Timeout` and `Cancelled` read results surface as the matching
    /// `HttpError` variants rather than as `HttpError::Io`.
    pub fn read_all(&mut self) -> Result<Vec<u8>, HttpError> {
        let mut buffer = Vec::new();
        self.read_to_end(&mut buffer).map_err(body_error)?;
        Ok(buffer)
    }

    /// Read the remaining body as UTF-8.
    pub fn text(&mut self) -> Result<String, HttpError> {
        Ok(String::from_utf8(self.read_all()?)?)
    }

    /// Read the whole body on a blocking worker.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>, HttpError> {
        match tokio::task::spawn_blocking(move || self.read_all()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
            Err(_) => Err(HttpError::Cancelled),
        }
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ResponseBody::Empty => Ok(0),
            ResponseBody::Native(reader) => reader.read(buf),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("ResponseBody::Empty"),
            ResponseBody::Native(reader) => f
                .debug_tuple("ResponseBody::Native")
                .field(reader.get_ref())
                .finish(),
        }
    }
}
