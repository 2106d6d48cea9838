//! Settable, shareable, cancellable asynchronous result.
//!
//! A [`Promise`] is the write side and a [`QiFuture`] the read side of one
//! shared slot. The slot settles exactly once, as a value, an error, or a
//! cancellation. Readers can:
//!
//! - register continuations with [`QiFuture::then`] (run on the settling
//!   thread, or immediately when already settled)
//! - block with a bound via [`QiFuture::get`]
//! - `.await` it from async code
//!
//! Cancellation is advisory: [`QiFuture::request_cancellation`] only invokes
//! the handler installed with [`Promise::set_on_cancel`]; the producer
//! decides whether to settle as cancelled.
//!
//! No internal lock is held while continuations, cancel handlers, or wakers run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use qi_core::QiError;
use tracing::error;

use crate::ui_thread;

type Continuation<T> = Box<dyn FnOnce(&QiFuture<T>) + Send>;
type CancelHandler<T> = Box<dyn FnOnce(&Promise<T>) + Send>;

/// Terminal state of a settled slot.
#[derive(Clone, Debug)]
pub(crate) enum Outcome<T> {
    Value(T),
    Error(QiError),
    Cancelled,
}

impl<T: Clone> Outcome<T> {
    fn to_result(&self) -> Result<T, QiError> {
        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Error(e) => Err(e.clone()),
            Self::Cancelled => Err(QiError::Cancelled),
        }
    }
}

struct State<T> {
    outcome: Option<Outcome<T>>,
    continuations: Vec<Continuation<T>>,
    wakers: Vec<Waker>,
    on_cancel: Option<CancelHandler<T>>,
    cancel_requested: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
    /// Derived futures that still rely on this one.
    dependents: AtomicUsize,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                outcome: None,
                continuations: Vec::new(),
                wakers: Vec::new(),
                on_cancel: None,
                cancel_requested: false,
            }),
            settled: Condvar::new(),
            dependents: AtomicUsize::new(0),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Promise
// ─────────────────────────────────────────────────────────────────────────────

/// Write side of an asynchronous result.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Create an unsettled promise.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
        }
    }

    /// The read side of this promise.
    pub fn future(&self) -> QiFuture<T> {
        QiFuture {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Settle with a value.
    pub fn set_value(&self, value: T) -> Result<(), QiError> {
        self.settle(Outcome::Value(value))
    }

    /// Settle with an error.
    pub fn set_error(&self, err: QiError) -> Result<(), QiError> {
        self.settle(Outcome::Error(err))
    }

    /// Settle as cancelled.
    pub fn set_cancelled(&self) -> Result<(), QiError> {
        self.settle(Outcome::Cancelled)
    }

    /// Whether the promise has already been settled.
    pub fn is_settled(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// Install the handler run when a reader requests cancellation.
    ///
    /// Runs immediately if cancellation was already requested while pending.
    /// Replaces any previous handler.
    pub fn set_on_cancel<F>(&self, handler: F)
    where
        F: FnOnce(&Promise<T>) + Send + 'static,
    {
        {
            let mut st = self.shared.state.lock();
            if st.outcome.is_some() {
                return;
            }
            if !st.cancel_requested {
                st.on_cancel = Some(Box::new(handler));
                return;
            }
        }
        handler(self);
    }

    /// Settle this promise with whatever `source` settles with.
    ///
    /// A cancellation request on this promise is forwarded to `source`.
    pub fn bind(&self, source: &QiFuture<T>) {
        let upstream = source.clone();
        self.set_on_cancel(move |_| upstream.request_cancellation());
        let target = self.clone();
        source.then(move |done| target.settle_from(done));
    }

    /// Copy the outcome of an already settled future. Ignores a pending one.
    pub(crate) fn settle_from(&self, source: &QiFuture<T>) {
        if let Some(outcome) = source.outcome() {
            let _ = self.settle(outcome);
        }
    }

    fn settle(&self, outcome: Outcome<T>) -> Result<(), QiError> {
        let (continuations, wakers) = {
            let mut st = self.shared.state.lock();
            if st.outcome.is_some() {
                return Err(QiError::AlreadySettled);
            }
            st.outcome = Some(outcome);
            st.on_cancel = None;
            (
                std::mem::take(&mut st.continuations),
                std::mem::take(&mut st.wakers),
            )
        };
        let _ = self.shared.settled.notify_all();

        let future = self.future();
        for continuation in continuations {
            run_continuation(continuation, &future);
        }
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }
}

fn run_continuation<T>(continuation: Continuation<T>, future: &QiFuture<T>) {
    if catch_unwind(AssertUnwindSafe(|| continuation(future))).is_err() {
        error!("future continuation panicked");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// QiFuture
// ─────────────────────────────────────────────────────────────────────────────

/// Read side of an asynchronous result. Cheap to clone; clones share the slot.
pub struct QiFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for QiFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for QiFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.shared.state.lock().outcome {
            None => "pending",
            Some(Outcome::Value(_)) => "success",
            Some(Outcome::Error(_)) => "error",
            Some(Outcome::Cancelled) => "cancelled",
        };
        f.debug_struct("QiFuture")
            .field("ptr", &Arc::as_ptr(&self.shared))
            .field("state", &state)
            .finish()
    }
}

/// An already successful future.
pub fn ready<T: Clone + Send + 'static>(value: T) -> QiFuture<T> {
    let promise = Promise::new();
    let _ = promise.set_value(value);
    promise.future()
}

/// An already failed future.
pub fn failed<T: Clone + Send + 'static>(err: QiError) -> QiFuture<T> {
    let promise = Promise::new();
    let _ = promise.set_error(err);
    promise.future()
}

/// An already cancelled future.
pub fn cancelled<T: Clone + Send + 'static>() -> QiFuture<T> {
    let promise = Promise::new();
    let _ = promise.set_cancelled();
    promise.future()
}

impl<T: Clone + Send + 'static> QiFuture<T> {
    /// Whether both handles refer to the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Whether the slot is settled.
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// Whether the slot settled with a value.
    pub fn is_success(&self) -> bool {
        matches!(self.shared.state.lock().outcome, Some(Outcome::Value(_)))
    }

    /// Whether the slot settled with an error.
    pub fn has_error(&self) -> bool {
        matches!(self.shared.state.lock().outcome, Some(Outcome::Error(_)))
    }

    /// Whether the slot settled as cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.state.lock().outcome, Some(Outcome::Cancelled))
    }

    /// Settled with an error or cancelled.
    pub fn has_failed(&self) -> bool {
        matches!(
            self.shared.state.lock().outcome,
            Some(Outcome::Error(_) | Outcome::Cancelled)
        )
    }

    /// The value, if settled successfully.
    pub fn value(&self) -> Option<T> {
        match &self.shared.state.lock().outcome {
            Some(Outcome::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// The error, if settled with one.
    pub fn error(&self) -> Option<QiError> {
        match &self.shared.state.lock().outcome {
            Some(Outcome::Error(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// The settled result without blocking; `None` while pending.
    pub fn try_result(&self) -> Option<Result<T, QiError>> {
        self.shared
            .state
            .lock()
            .outcome
            .as_ref()
            .map(Outcome::to_result)
    }

    pub(crate) fn outcome(&self) -> Option<Outcome<T>> {
        self.shared.state.lock().outcome.clone()
    }

    /// Register a continuation run once the slot settles.
    pub fn then<F>(&self, continuation: F)
    where
        F: FnOnce(&QiFuture<T>) + Send + 'static,
    {
        {
            let mut st = self.shared.state.lock();
            if st.outcome.is_none() {
                st.continuations.push(Box::new(continuation));
                return;
            }
        }
        run_continuation(Box::new(continuation), self);
    }

    /// Ask the producer to cancel. No-op once settled or already requested.
    pub fn request_cancellation(&self) {
        let handler = {
            let mut st = self.shared.state.lock();
            if st.outcome.is_some() || st.cancel_requested {
                return;
            }
            st.cancel_requested = true;
            st.on_cancel.take()
        };
        if let Some(handler) = handler {
            handler(&Promise {
                shared: Arc::clone(&self.shared),
            });
        }
    }

    /// Block until settled, at most `timeout`.
    ///
    /// Refuses to block a thread marked with [`ui_thread::mark_ui_thread`]
    /// while the slot is still pending.
    pub fn get(&self, timeout: Duration) -> Result<T, QiError> {
        let mut st = self.shared.state.lock();
        if st.outcome.is_none() && ui_thread::is_ui_thread() {
            return Err(QiError::BlockingOnUiThread);
        }
        let deadline = Instant::now() + timeout;
        while st.outcome.is_none() {
            if self.shared.settled.wait_until(&mut st, deadline).timed_out() {
                break;
            }
        }
        match &st.outcome {
            Some(outcome) => outcome.to_result(),
            None => Err(QiError::Timeout(timeout)),
        }
    }

    /// On success, continue with `f(value)` and settle with its outcome.
    ///
    /// Errors and cancellation of `self` are forwarded without calling `f`.
    /// Cancelling the returned future cancels the stage started by `f` and
    /// withdraws interest in `self`; `self` is asked to cancel only when no
    /// other derived future still depends on it.
    pub fn and_then_compose<U, F>(&self, f: F) -> QiFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> QiFuture<U> + Send + 'static,
    {
        let promise = Promise::<U>::new();
        let derived = promise.future();
        let stage: Arc<Mutex<Option<QiFuture<U>>>> = Arc::new(Mutex::new(None));
        let _ = self.shared.dependents.fetch_add(1, Ordering::AcqRel);

        let source: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        let cancel_stage = Arc::clone(&stage);
        promise.set_on_cancel(move |p| {
            let running = cancel_stage.lock().clone();
            if let Some(running) = running {
                running.request_cancellation();
            }
            if let Some(shared) = source.upgrade() {
                QiFuture { shared }.withdraw_interest();
            }
            let _ = p.set_cancelled();
        });

        self.then(move |done| match done.outcome() {
            Some(Outcome::Value(value)) => {
                if promise.is_settled() {
                    return;
                }
                let next = f(value);
                *stage.lock() = Some(next.clone());
                if promise.is_settled() {
                    next.request_cancellation();
                    return;
                }
                next.then(move |settled| promise.settle_from(settled));
            }
            Some(Outcome::Error(err)) => {
                let _ = promise.set_error(err);
            }
            Some(Outcome::Cancelled) | None => {
                let _ = promise.set_cancelled();
            }
        });

        derived
    }

    /// On success, map the value with `f`, which may itself fail.
    pub fn and_then_apply<U, F>(&self, f: F) -> QiFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, QiError> + Send + 'static,
    {
        self.and_then_compose(move |value| match f(value) {
            Ok(mapped) => ready(mapped),
            Err(err) => failed(err),
        })
    }

    fn withdraw_interest(&self) {
        let previous = self.shared.dependents.fetch_sub(1, Ordering::AcqRel);
        if previous <= 1 {
            self.request_cancellation();
        }
    }
}

impl<T: Clone + Send + 'static> std::future::Future for QiFuture<T> {
    type Output = Result<T, QiError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut st = self.shared.state.lock();
        match &st.outcome {
            Some(outcome) => Poll::Ready(outcome.to_result()),
            None => {
                if !st.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    st.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
