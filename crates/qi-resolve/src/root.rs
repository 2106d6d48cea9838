//! Requirement fed by an external event instead of a computation.
//!
//! A [`RootRequirement`] has no upstream. Its value is pushed in with
//! [`RootRequirement::resolve`], typically when a connection is established.
//! Invalidation rearms the slot so later `satisfy()` calls wait for the next
//! push instead of the stale one.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use qi_core::QiError;
use tracing::{debug, warn};

use crate::future::{Promise, QiFuture};
use crate::requirement::{Requirement, Resolver};

struct RootSlot<T> {
    name: String,
    promise: Mutex<Promise<T>>,
}

impl<T: Clone + Send + 'static> RootSlot<T> {
    fn arm() -> Promise<T> {
        let promise = Promise::new();
        promise.set_on_cancel(|p| {
            let _ = p.set_cancelled();
        });
        promise
    }

    /// The current slot, replaced first if it failed or was cancelled.
    fn live(&self) -> Promise<T> {
        let mut promise = self.promise.lock();
        if promise.future().has_failed() {
            debug!(requirement = %self.name, "rearming cancelled slot");
            *promise = Self::arm();
        }
        promise.clone()
    }
}

struct SlotResolver<T>(Arc<RootSlot<T>>);

impl<T: Clone + Send + 'static> Resolver<T> for SlotResolver<T> {
    fn create(&self) -> QiFuture<T> {
        self.0.live().future()
    }

    fn on_invalidate(&self) {
        let mut promise = self.0.promise.lock();
        if promise.is_settled() {
            *promise = RootSlot::arm();
        }
    }
}

/// Event-driven [`Requirement`] with a rearmable slot.
///
/// Derefs to the underlying [`Requirement`] for `satisfy`, `invalidate` and
/// availability listeners.
pub struct RootRequirement<T> {
    requirement: Requirement<T>,
    slot: Arc<RootSlot<T>>,
}

impl<T> Clone for RootRequirement<T> {
    fn clone(&self) -> Self {
        Self {
            requirement: self.requirement.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Deref for RootRequirement<T> {
    type Target = Requirement<T>;

    fn deref(&self) -> &Requirement<T> {
        &self.requirement
    }
}

impl<T: Clone + Send + 'static> RootRequirement<T> {
    /// Create a root requirement with an armed, unsettled slot.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let slot = Arc::new(RootSlot {
            name: name.clone(),
            promise: Mutex::new(RootSlot::arm()),
        });
        Self {
            requirement: Requirement::new(name, SlotResolver(Arc::clone(&slot))),
            slot,
        }
    }

    /// The underlying requirement, for chaining.
    pub fn requirement(&self) -> &Requirement<T> {
        &self.requirement
    }

    /// Push the value for the current epoch.
    ///
    /// Fails with [`QiError::AlreadySettled`] when the current slot already
    /// holds a value; a slot must be invalidated before it can be pushed again.
    pub fn resolve(&self, value: T) -> Result<(), QiError> {
        let promise = self.slot.live();
        promise.set_value(value).inspect_err(|_| {
            warn!(requirement = %self.slot.name, "root resolved twice in the same epoch");
        })
    }

    /// Whether the current slot has been pushed.
    pub fn is_resolved(&self) -> bool {
        self.slot.promise.lock().future().is_success()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
