//! Requirement resolved from the value of another requirement.
//!
//! Each attempt satisfies the upstream and, once it succeeds, runs the fetch
//! function on its value. Upstream failure or cancellation is forwarded
//! without calling fetch. Cancelling an attempt cancels the running fetch
//! and withdraws interest in the upstream future, which is itself asked to
//! cancel only when nothing else derived from it is still waiting.

use std::sync::Arc;

use crate::future::QiFuture;
use crate::requirement::{Requirement, Resolver};

/// Resolver composing an upstream [`Requirement`] with a fetch step.
pub struct ChainResolver<U, T> {
    upstream: Requirement<U>,
    fetch: Arc<dyn Fn(U) -> QiFuture<T> + Send + Sync>,
}

impl<U, T> ChainResolver<U, T>
where
    U: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    /// Resolve by fetching from each value `upstream` produces.
    pub fn new<F>(upstream: Requirement<U>, fetch: F) -> Self
    where
        F: Fn(U) -> QiFuture<T> + Send + Sync + 'static,
    {
        Self {
            upstream,
            fetch: Arc::new(fetch),
        }
    }

    /// The requirement this resolver depends on.
    pub fn upstream(&self) -> &Requirement<U> {
        &self.upstream
    }
}

impl<U, T> Resolver<T> for ChainResolver<U, T>
where
    U: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    fn create(&self) -> QiFuture<T> {
        let fetch = Arc::clone(&self.fetch);
        self.upstream
            .satisfy()
            .and_then_compose(move |value| fetch(value))
    }
}

/// Build a [`Requirement`] whose value is fetched from `upstream`'s value.
pub fn chained<U, T, F>(
    name: impl Into<String>,
    upstream: &Requirement<U>,
    fetch: F,
) -> Requirement<T>
where
    U: Clone + Send + 'static,
    T: Clone + Send + 'static,
    F: Fn(U) -> QiFuture<T> + Send + Sync + 'static,
{
    Requirement::new(name, ChainResolver::new(upstream.clone(), fetch))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
