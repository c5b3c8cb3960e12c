//! Fixed-capacity arena mapping opaque user-data tokens to callback contexts.
//!
//! The engine hands the token back verbatim on every invocation. Lookup is an index plus one
//! atomic load, so the audio thread never allocates or locks to find its context.

use core::ffi::c_void;
use core::num::NonZeroUsize;
use core::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::CallbackContext;

pub const REGISTRY_CAPACITY: usize = 128;
const SLOT_BITS: u32 = REGISTRY_CAPACITY.trailing_zeros();
const SLOT_MASK: usize = REGISTRY_CAPACITY - 1;
const GENERATION_MASK: usize = usize::MAX >> SLOT_BITS;

const _: () = assert!(REGISTRY_CAPACITY.is_power_of_two());

/// Opaque user-data value registered with the engine: a slot index plus a generation.
///
/// The generation makes a stale token from a closed stream miss, even if its slot was reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamToken(NonZeroUsize);

impl StreamToken {
    fn new(slot: usize, generation: usize) -> Option<Self> {
        NonZeroUsize::new((generation & GENERATION_MASK) << SLOT_BITS | (slot & SLOT_MASK))
            .map(Self)
    }

    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn into_raw(self) -> usize {
        self.0.get()
    }

    pub fn slot(self) -> usize {
        self.0.get() & SLOT_MASK
    }

    pub fn generation(self) -> usize {
        self.0.get() >> SLOT_BITS
    }

    /// Encodes the token as the engine's `void *userData`. The pointer is never dereferenced.
    pub fn into_user_data(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }

    pub fn from_user_data(user_data: *mut c_void) -> Option<Self> {
        Self::from_raw(user_data as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("all {0} stream slots are in use")]
    Full(usize),
    #[error("context is already registered as {0:?}")]
    AlreadyRegistered(StreamToken),
}

struct Slot {
    context: AtomicPtr<CallbackContext>,
}

impl Slot {
    const EMPTY: Slot = Slot {
        context: AtomicPtr::new(ptr::null_mut()),
    };
}

pub struct ContextRegistry {
    slots: [Slot; REGISTRY_CAPACITY],
    generation: AtomicUsize,
    live: AtomicUsize,
}

static GLOBAL: ContextRegistry = ContextRegistry::new();

/// The process-wide registry the trampoline and relay resolve tokens against.
pub fn global() -> &'static ContextRegistry {
    &GLOBAL
}

impl ContextRegistry {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; REGISTRY_CAPACITY],
            generation: AtomicUsize::new(1),
            live: AtomicUsize::new(0),
        }
    }

    /// Publishes `context` and returns the token to hand to the engine as user data.
    ///
    /// Must happen before the engine can invoke the stream.
    pub fn register(&self, context: Arc<CallbackContext>) -> Result<StreamToken, RegistryError> {
        if let Some(existing) = context.token() {
            return Err(RegistryError::AlreadyRegistered(existing));
        }

        let raw = Arc::into_raw(context).cast_mut();
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .context
                .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            let token = loop {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) & GENERATION_MASK;
                if generation == 0 {
                    continue;
                }
                if let Some(token) = StreamToken::new(index, generation) {
                    break token;
                }
            };
            // Safety: `raw` came from `Arc::into_raw` above and the slot keeps it alive.
            let context = unsafe { &*raw };
            if !context.claim_token(token) {
                // Lost a race with a concurrent registration of the same context.
                slot.context.store(ptr::null_mut(), Ordering::Release);
                let existing = context.token();
                drop(unsafe { Arc::from_raw(raw) });
                return Err(match existing {
                    Some(existing) => RegistryError::AlreadyRegistered(existing),
                    None => RegistryError::Full(REGISTRY_CAPACITY),
                });
            }
            self.live.fetch_add(1, Ordering::Relaxed);
            return Ok(token);
        }

        // Safety: not published anywhere, reclaim the reference we leaked above.
        drop(unsafe { Arc::from_raw(raw) });
        Err(RegistryError::Full(REGISTRY_CAPACITY))
    }

    /// Resolves a token on the audio or lifecycle thread. O(1), lock- and allocation-free.
    ///
    /// # Safety
    /// The returned reference is only valid while the token stays registered. Callers must be
    /// running inside an engine invocation for that token, which the engine guarantees never
    /// overlaps [`ContextRegistry::unregister`].
    pub(crate) unsafe fn resolve(&self, token: StreamToken) -> Option<&CallbackContext> {
        let slot = self.slots.get(token.slot())?;
        let context = slot.context.load(Ordering::Acquire).as_ref()?;
        (context.token() == Some(token)).then_some(context)
    }

    pub fn contains(&self, token: StreamToken) -> bool {
        // Safety: the reference does not escape this call.
        unsafe { self.resolve(token).is_some() }
    }

    /// Removes the context for `token` and hands back ownership of it.
    ///
    /// # Safety
    /// The engine must guarantee that neither the trampoline nor the relay can still be invoked
    /// for this token, i.e. the stream was never started or has been confirmed closed.
    pub unsafe fn unregister(&self, token: StreamToken) -> Option<Arc<CallbackContext>> {
        let slot = self.slots.get(token.slot())?;
        let current = slot.context.load(Ordering::Acquire);
        let context = current.as_ref()?;
        if context.token() != Some(token) {
            return None;
        }
        slot.context
            .compare_exchange(current, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        context.release_token();
        self.live.fetch_sub(1, Ordering::Relaxed);
        Some(Arc::from_raw(current))
    }

    /// Number of registered contexts.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl Drop for ContextRegistry {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            let raw = core::mem::replace(slot.context.get_mut(), ptr::null_mut());
            if !raw.is_null() {
                // Safety: exclusive access; every non-null slot owns one `Arc` reference.
                let context = unsafe { Arc::from_raw(raw) };
                context.release_token();
            }
        }
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}
