//! Marking of the consumer application's UI thread.
//!
//! Blocking accessors refuse to wait on a marked thread so a single-threaded
//! UI cannot deadlock itself waiting for a resource that needs that same
//! thread to make progress.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static IS_UI_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as the UI thread until dropped.
///
/// Not `Send`: the mark belongs to the thread that created it.
#[must_use = "the mark is removed when the guard is dropped"]
pub struct UiThreadGuard {
    previous: bool,
    _not_send: PhantomData<*const ()>,
}

impl Drop for UiThreadGuard {
    fn drop(&mut self) {
        IS_UI_THREAD.with(|flag| flag.set(self.previous));
    }
}

/// Mark the calling thread as the UI thread.
pub fn mark_ui_thread() -> UiThreadGuard {
    let previous = IS_UI_THREAD.with(|flag| flag.replace(true));
    UiThreadGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Whether the calling thread is marked as the UI thread.
pub fn is_ui_thread() -> bool {
    IS_UI_THREAD.with(Cell::get)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
