//! Process-wide counters for engine contract violations.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of lifecycle misuse observed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleDiagnostics {
    /// Trampoline invocations whose user data resolved to no registered context.
    pub orphan_callbacks: u64,
    /// Relay invocations whose user data resolved to no registered context.
    pub orphan_finishes: u64,
    /// Relay invocations for a stream that had already been notified.
    pub duplicate_finishes: u64,
}

static ORPHAN_CALLBACKS: AtomicU64 = AtomicU64::new(0);
static ORPHAN_FINISHES: AtomicU64 = AtomicU64::new(0);
static DUPLICATE_FINISHES: AtomicU64 = AtomicU64::new(0);

pub fn lifecycle_diagnostics() -> LifecycleDiagnostics {
    LifecycleDiagnostics {
        orphan_callbacks: ORPHAN_CALLBACKS.load(Ordering::Relaxed),
        orphan_finishes: ORPHAN_FINISHES.load(Ordering::Relaxed),
        duplicate_finishes: DUPLICATE_FINISHES.load(Ordering::Relaxed),
    }
}

#[inline]
pub(crate) fn orphan_callback() {
    ORPHAN_CALLBACKS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn orphan_finish() {
    ORPHAN_FINISHES.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn duplicate_finish() {
    DUPLICATE_FINISHES.fetch_add(1, Ordering::Relaxed);
}
