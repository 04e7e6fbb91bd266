//! Byte-string exchange layer.
//!
//! # Design
//! A `StringsList` owns one pointer block, one length block, and one
//! independently allocated, null-terminated buffer per string. Lengths are
//! stored explicitly so strings with embedded NULs survive the trip and the
//! reader never scans for the terminator.
//!
//! Per-string buffers go through a [`ByteAllocator`] so a failing allocation
//! can be injected. Construction fills the list in order; if allocation `k`
//! fails, the partially built list is dropped and releases exactly the
//! buffers `0..k`.
//!
//! Freeing tolerates partial state: missing blocks and null entries are
//! skipped, and a list is never freed twice.

use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::slice;

use crate::abi::RawStringsList;
use crate::error::HttpError;

/// Allocator for per-string buffers. `len` always includes the terminator.
pub trait ByteAllocator {
    fn allocate(&self, len: usize) -> Option<NonNull<u8>>;

    /// # Safety
    /// `buffer` must come from `allocate(len)` on this allocator and must not
    /// have been released already.
    unsafe fn release(&self, buffer: NonNull<u8>, len: usize);
}

impl<A: ByteAllocator + ?Sized> ByteAllocator for &A {
    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        (**self).allocate(len)
    }

    unsafe fn release(&self, buffer: NonNull<u8>, len: usize) {
        (**self).release(buffer, len)
    }
}

/// Global-heap allocator. The only allocator whose lists may cross into the
/// native stack through [`StringsList::into_raw`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl ByteAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        let buffer = vec![0u8; len].into_boxed_slice();
        NonNull::new(Box::into_raw(buffer) as *mut u8)
    }

    unsafe fn release(&self, buffer: NonNull<u8>, len: usize) {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(buffer.as_ptr(), len)));
    }
}

/// An owned list of native strings.
pub struct StringsList<A: ByteAllocator = HeapAllocator> {
    values: Option<Box<[*mut u8]>>,
    lengths: Option<Box<[usize]>>,
    allocator: A,
}

impl StringsList<HeapAllocator> {
    /// Encode `strings` into heap buffers.
    pub fn new<I, S>(strings: I) -> Result<Self, HttpError>
    where
        I: IntoIterator<Item = S>,
        I::IntoIter: ExactSizeIterator,
        S: AsRef<[u8]>,
    {
        Self::with_allocator(strings, HeapAllocator)
    }

    /// Hand ownership of every block to the caller.
    ///
    /// The result must come back through [`StringsList::from_raw`] with the
    /// same count to be released.
    pub fn into_raw(self) -> RawStringsList {
        let mut this = ManuallyDrop::new(self);
        let values = this
            .values
            .take()
            .map_or(ptr::null_mut(), |block| Box::into_raw(block) as *mut *mut u8);
        let lengths = this
            .lengths
            .take()
            .map_or(ptr::null_mut(), |block| Box::into_raw(block) as *mut usize);
        RawStringsList { values, lengths }
    }

    /// Reclaim a list produced by [`StringsList::into_raw`].
    ///
    /// # Safety
    /// `raw` must come from `into_raw` of a list with exactly `count`
    /// entries, and must not be reclaimed twice. Null blocks are accepted.
    pub unsafe fn from_raw(raw: RawStringsList, count: usize) -> Self {
        let values = (!raw.values.is_null())
            .then(|| Box::from_raw(ptr::slice_from_raw_parts_mut(raw.values, count)));
        let lengths = (!raw.lengths.is_null())
            .then(|| Box::from_raw(ptr::slice_from_raw_parts_mut(raw.lengths, count)));
        Self {
            values,
            lengths,
            allocator: HeapAllocator,
        }
    }
}

impl<A: ByteAllocator> StringsList<A> {
    /// Encode `strings` using `allocator` for the per-string buffers.
    pub fn with_allocator<I, S>(strings: I, allocator: A) -> Result<Self, HttpError>
    where
        I: IntoIterator<Item = S>,
        I::IntoIter: ExactSizeIterator,
        S: AsRef<[u8]>,
    {
        let strings = strings.into_iter();
        let count = strings.len();
        let mut list = Self {
            values: Some(vec![ptr::null_mut(); count].into_boxed_slice()),
            lengths: Some(vec![0usize; count].into_boxed_slice()),
            allocator,
        };

        for (index, string) in strings.take(count).enumerate() {
            let bytes = string.as_ref();
            let size = bytes.len() + 1;
            // On failure `list` drops here and frees entries 0..index.
            let buffer = list
                .allocator
                .allocate(size)
                .ok_or(HttpError::Allocation { index, size })?;

            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.as_ptr(), bytes.len());
                *buffer.as_ptr().add(bytes.len()) = 0;
            }

            if let (Some(values), Some(lengths)) = (list.values.as_mut(), list.lengths.as_mut()) {
                lengths[index] = bytes.len();
                values[index] = buffer.as_ptr();
            }
        }

        Ok(list)
    }

    /// Number of entries the pointer block holds.
    pub fn count(&self) -> usize {
        self.values.as_ref().map_or(0, |values| values.len())
    }

    /// Borrow the blocks as a raw view. The view dangles once `self` drops.
    pub fn as_raw(&self) -> RawStringsList {
        RawStringsList {
            values: self
                .values
                .as_ref()
                .map_or(ptr::null_mut(), |values| values.as_ptr() as *mut *mut u8),
            lengths: self
                .lengths
                .as_ref()
                .map_or(ptr::null_mut(), |lengths| lengths.as_ptr() as *mut usize),
        }
    }

    pub fn decode_item(&self, index: usize) -> Result<String, HttpError> {
        if index >= self.count() {
            return Err(HttpError::InvariantViolation(format!(
                "string index {index} out of range for {} entries",
                self.count()
            )));
        }
        unsafe { decode_raw_item(&self.as_raw(), index) }
    }

    /// Release every per-string buffer, then both blocks. Idempotent.
    pub fn free(&mut self) {
        let Some(values) = self.values.take() else {
            self.lengths = None;
            return;
        };

        match self.lengths.as_deref() {
            Some(lengths) => {
                for (value, length) in values.iter().zip(lengths) {
                    if let Some(buffer) = NonNull::new(*value) {
                        unsafe { self.allocator.release(buffer, length + 1) };
                    }
                }
            }
            None if values.iter().any(|value| !value.is_null()) => {
                tracing::error!(
                    count = values.len(),
                    "string list has no length block; leaking per-string buffers"
                );
            }
            None => {}
        }

        drop(values);
        self.lengths = None;
    }
}

impl<A: ByteAllocator> Drop for StringsList<A> {
    fn drop(&mut self) {
        self.free();
    }
}

/// Decode entry `index` of a raw list using its stored length.
///
/// # Safety
/// Both blocks of `raw` must hold more than `index` valid entries, and
/// `values[index]` must point to at least `lengths[index]` readable bytes.
pub unsafe fn decode_raw_item(raw: &RawStringsList, index: usize) -> Result<String, HttpError> {
    if raw.values.is_null() || raw.lengths.is_null() {
        return Err(HttpError::InvariantViolation(
            "string list blocks are null".to_string(),
        ));
    }

    let value = *raw.values.add(index);
    let length = *raw.lengths.add(index);
    if value.is_null() {
        return Err(HttpError::InvariantViolation(format!(
            "string {index} is null"
        )));
    }

    let bytes = slice::from_raw_parts(value, length);
    Ok(String::from_utf8(bytes.to_vec())?)
}
