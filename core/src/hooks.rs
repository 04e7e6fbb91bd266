//! Native callback hooks.
//!
//! # Design
//! The native stack calls back into the bridge through fixed-signature
//! `extern "C"` trampolines. Each trampoline receives an opaque `isize`
//! handle, not a pointer: handles index a process-wide [`HandleRegistry`]
//! (slot index plus generation), so a handle that outlives its registration
//! resolves to nothing instead of to freed memory.
//!
//! TLS behavior is a [`TlsHooks`] strategy injected once at construction.
//! Every method has a default that returns a null object; implementors
//! override the ones they need. Cancellation uses the same registry scheme
//! and reports "not cancelled" for a released handle, since the native side
//! may poll after teardown has started.
//!
//! Registrations are RAII guards owned by one request's configuration.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::abi::{IsCancellationRequestedFn, RawHooks};

/// An opaque object owned by the native stack (key store, trust manager
/// factory, connection, ...).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeObject(pub *mut c_void);

impl NativeObject {
    pub const NULL: NativeObject = NativeObject(ptr::null_mut());

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// TLS configuration strategy consulted by the native stack.
pub trait TlsHooks: Send + Sync {
    fn configure_key_store(&self, _key_store: NativeObject) -> NativeObject {
        NativeObject::NULL
    }

    fn configure_trust_manager_factory(&self, _key_store: NativeObject) -> NativeObject {
        NativeObject::NULL
    }

    fn configure_key_manager_factory(&self, _key_store: NativeObject) -> NativeObject {
        NativeObject::NULL
    }

    fn configure_custom_ssl_socket_factory(&self, _connection: NativeObject) -> NativeObject {
        NativeObject::NULL
    }
}

/// Leaves every TLS decision to the native stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTlsHooks;

impl TlsHooks for DefaultTlsHooks {}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// A cancellation signal shared between the caller and in-flight requests.
#[derive(Debug, Clone, Default)]
pub struct CancellationSource {
    cancelled: Arc<AtomicBool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;

struct Slot<T> {
    generation: usize,
    value: Option<T>,
}

struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

/// Slot arena addressed by opaque handles.
///
/// A handle packs `index + 1` in the low half and the slot generation in
/// the high half, so `0` is never a valid handle and a reused slot never
/// answers to a stale one.
pub struct HandleRegistry<T> {
    inner: Mutex<Slab<T>>,
}

impl<T: Clone> HandleRegistry<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Slab {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    pub fn insert(&self, value: T) -> isize {
        let mut slab = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let index = match slab.free.pop() {
            Some(index) => {
                slab.slots[index].value = Some(value);
                index
            }
            None => {
                slab.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                slab.slots.len() - 1
            }
        };
        let generation = slab.slots[index].generation;
        pack(index, generation)
    }

    pub fn get(&self, handle: isize) -> Option<T> {
        let (index, generation) = unpack(handle)?;
        let slab = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slab.slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.clone()
    }

    pub fn remove(&self, handle: isize) -> Option<T> {
        let (index, generation) = unpack(handle)?;
        let mut slab = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slab.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = (slot.generation + 1) & INDEX_MASK;
        slab.free.push(index);
        Some(value)
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        let slab = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slab.slots.len() - slab.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn pack(index: usize, generation: usize) -> isize {
    (((generation & INDEX_MASK) << INDEX_BITS) | ((index + 1) & INDEX_MASK)) as isize
}

fn unpack(handle: isize) -> Option<(usize, usize)> {
    let raw = handle as usize;
    let index = raw & INDEX_MASK;
    if index == 0 {
        return None;
    }
    Some((index - 1, raw >> INDEX_BITS))
}

static TLS_HOOKS: HandleRegistry<Arc<dyn TlsHooks>> = HandleRegistry::new();
static CANCELLATION: HandleRegistry<CancellationSource> = HandleRegistry::new();

// ---------------------------------------------------------------------------
// Registrations
// ---------------------------------------------------------------------------

/// A TLS strategy registered for the lifetime of one request.
pub struct HookTable {
    handle: isize,
}

impl HookTable {
    pub fn register(hooks: Arc<dyn TlsHooks>) -> Self {
        let handle = TLS_HOOKS.insert(hooks);
        tracing::trace!(handle, "registered tls hooks");
        Self { handle }
    }

    pub fn handle(&self) -> isize {
        self.handle
    }

    pub fn as_raw(&self) -> RawHooks {
        RawHooks {
            handler: self.handle,
            configure_key_store: Some(configure_key_store_callback),
            configure_trust_manager_factory: Some(configure_trust_manager_factory_callback),
            configure_key_manager_factory: Some(configure_key_manager_factory_callback),
            configure_custom_ssl_socket_factory: Some(configure_custom_ssl_socket_factory_callback),
        }
    }
}

impl Drop for HookTable {
    fn drop(&mut self) {
        TLS_HOOKS.remove(self.handle);
        tracing::trace!(handle = self.handle, "released tls hooks");
    }
}

/// A cancellation signal registered for the lifetime of one request.
pub struct CancellationRegistration {
    handle: isize,
}

impl CancellationRegistration {
    pub fn register(source: &CancellationSource) -> Self {
        Self {
            handle: CANCELLATION.insert(source.clone()),
        }
    }

    pub fn handle(&self) -> isize {
        self.handle
    }

    pub fn callback(&self) -> IsCancellationRequestedFn {
        is_cancellation_requested_callback
    }
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        CANCELLATION.remove(self.handle);
    }
}

// ---------------------------------------------------------------------------
// Trampolines
// ---------------------------------------------------------------------------

fn dispatch(
    handler: isize,
    hook: &'static str,
    object: *mut c_void,
    call: impl FnOnce(&dyn TlsHooks, NativeObject) -> NativeObject,
) -> *mut c_void {
    let Some(hooks) = TLS_HOOKS.get(handler) else {
        tracing::warn!(handler, hook, "tls hook called with a released handle");
        return ptr::null_mut();
    };

    match catch_unwind(AssertUnwindSafe(|| call(hooks.as_ref(), NativeObject(object)))) {
        Ok(result) => {
            tracing::debug!(hook, input = ?object, output = ?result.0, "tls hook");
            result.0
        }
        Err(_) => {
            tracing::warn!(hook, "tls hook panicked; returning null");
            ptr::null_mut()
        }
    }
}

pub extern "C" fn configure_key_store_callback(handler: isize, key_store: *mut c_void) -> *mut c_void {
    dispatch(handler, "configure_key_store", key_store, |hooks, object| {
        hooks.configure_key_store(object)
    })
}

pub extern "C" fn configure_trust_manager_factory_callback(
    handler: isize,
    key_store: *mut c_void,
) -> *mut c_void {
    dispatch(handler, "configure_trust_manager_factory", key_store, |hooks, object| {
        hooks.configure_trust_manager_factory(object)
    })
}

pub extern "C" fn configure_key_manager_factory_callback(
    handler: isize,
    key_store: *mut c_void,
) -> *mut c_void {
    dispatch(handler, "configure_key_manager_factory", key_store, |hooks, object| {
        hooks.configure_key_manager_factory(object)
    })
}

pub extern "C" fn configure_custom_ssl_socket_factory_callback(
    handler: isize,
    connection: *mut c_void,
) -> *mut c_void {
    dispatch(handler, "configure_custom_ssl_socket_factory", connection, |hooks, object| {
        hooks.configure_custom_ssl_socket_factory(object)
    })
}

/// Released or unknown tokens report `false`.
pub extern "C" fn is_cancellation_requested_callback(token: isize) -> bool {
    CANCELLATION
        .get(token)
        .is_some_and(|source| source.is_cancellation_requested())
}
