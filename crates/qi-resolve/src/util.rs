//! Helpers over [`QiFuture`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use qi_core::QiError;
use tracing::{debug, warn};

use crate::future::{Promise, QiFuture};

pub use crate::future::{cancelled, failed, ready};

/// Wait for every future and collect their values in input order.
///
/// Settles once all inputs have settled. If any input was cancelled the
/// result is cancelled; otherwise the first error in input order wins.
/// Cancelling the result asks every input to cancel.
pub fn zip<T: Clone + Send + 'static>(futures: Vec<QiFuture<T>>) -> QiFuture<Vec<T>> {
    if futures.is_empty() {
        return ready(Vec::new());
    }

    let promise = Promise::new();
    let inputs = Arc::new(futures);
    let remaining = Arc::new(AtomicUsize::new(inputs.len()));

    let to_cancel = Arc::clone(&inputs);
    promise.set_on_cancel(move |_| {
        for future in to_cancel.iter() {
            future.request_cancellation();
        }
    });

    for future in inputs.iter() {
        let promise = promise.clone();
        let inputs = Arc::clone(&inputs);
        let remaining = Arc::clone(&remaining);
        future.then(move |_| {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let _ = match collect(&inputs) {
                    Ok(values) => promise.set_value(values),
                    Err(QiError::Cancelled) => promise.set_cancelled(),
                    Err(err) => promise.set_error(err),
                };
            }
        });
    }
    promise.future()
}

fn collect<T: Clone + Send + 'static>(inputs: &[QiFuture<T>]) -> Result<Vec<T>, QiError> {
    if inputs.iter().any(QiFuture::is_cancelled) {
        return Err(QiError::Cancelled);
    }
    inputs
        .iter()
        .map(|f| f.try_result().unwrap_or(Err(QiError::Cancelled)))
        .collect()
}

/// Log the future's failure when it settles, then hand the future back.
///
/// Errors are logged at `warn`, cancellations at `debug`.
pub fn auto_log<T: Clone + Send + 'static>(future: QiFuture<T>, message: &str) -> QiFuture<T> {
    let message = message.to_owned();
    future.then(move |done| {
        if let Some(err) = done.error() {
            warn!(future = %message, error = %err, kind = err.error_kind(), "future failed");
        } else if done.is_cancelled() {
            debug!(future = %message, "future cancelled");
        }
    });
    future
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
