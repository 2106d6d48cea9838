//! Lazily created, memoized, invalidatable asynchronous value.
//!
//! A [`Requirement`] holds at most one cached [`QiFuture`]. [`satisfy`] hands
//! out the cached future while it is pending or successful and still valid;
//! otherwise it starts a new resolution attempt through its [`Resolver`].
//! [`invalidate`] drops the cache and requests its cancellation.
//!
//! Every invalidation and every new attempt bumps a generation counter. A
//! completion only marks the requirement available if its generation is
//! still current, so a slow attempt superseded by an invalidate-and-retry
//! cycle cannot resurrect availability.
//!
//! All state lives behind one lock. [`Resolver::create`] and availability
//! listeners never run under it: notices are queued under the lock and
//! delivered afterwards, in transition order, by whichever thread drains the
//! queue first.
//!
//! [`satisfy`]: Requirement::satisfy
//! [`invalidate`]: Requirement::invalidate

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use qi_core::{ListenerId, QiError};
use tracing::{debug, error};

use crate::future::{Promise, QiFuture};

/// Resolution strategy of a [`Requirement`].
pub trait Resolver<T>: Send + Sync + 'static {
    /// Start a new resolution attempt.
    ///
    /// Called at most once per generation, never under the requirement lock.
    fn create(&self) -> QiFuture<T>;

    /// Whether a successfully cached value may still be handed out.
    fn is_still_valid(&self, _value: &T) -> bool {
        true
    }

    /// Hook run under the requirement lock whenever the cache is dropped:
    /// on every [`Requirement::invalidate`], and from
    /// [`Requirement::satisfy`] when a cached value is no longer valid.
    ///
    /// Must not call back into the requirement.
    fn on_invalidate(&self) {}
}

/// Observer of availability transitions.
///
/// A value is available iff `satisfy()` would hand out an already
/// successful future.
pub trait AvailableListener: Send + Sync {
    /// The availability changed to `available`.
    fn on_available_changed(&self, available: bool);
}

impl<F> AvailableListener for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_available_changed(&self, available: bool) {
        self(available);
    }
}

struct Notice {
    available: bool,
    targets: Vec<Arc<dyn AvailableListener>>,
}

struct State<T> {
    cache: Option<QiFuture<T>>,
    generation: u64,
    available: bool,
    listeners: Vec<(ListenerId, Arc<dyn AvailableListener>)>,
    notices: VecDeque<Notice>,
    dispatching: bool,
}

impl<T> State<T> {
    fn set_available(&mut self, available: bool) {
        if self.available == available {
            return;
        }
        self.available = available;
        let targets = self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        self.notices.push_back(Notice { available, targets });
    }
}

struct Inner<T> {
    name: String,
    resolver: Box<dyn Resolver<T>>,
    state: Mutex<State<T>>,
}

/// A lazily resolved, shareable resource. Clones share the same state.
pub struct Requirement<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Requirement<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Requirement<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Requirement")
            .field("name", &self.inner.name)
            .field("generation", &st.generation)
            .field("available", &st.available)
            .field("cached", &st.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Requirement<T> {
    /// Create a requirement resolved by `resolver`.
    pub fn new(name: impl Into<String>, resolver: impl Resolver<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                resolver: Box::new(resolver),
                state: Mutex::new(State {
                    cache: None,
                    generation: 0,
                    available: false,
                    listeners: Vec::new(),
                    notices: VecDeque::new(),
                    dispatching: false,
                }),
            }),
        }
    }

    /// Create a requirement resolved by calling `create`.
    pub fn from_fn<F>(name: impl Into<String>, create: F) -> Self
    where
        F: Fn() -> QiFuture<T> + Send + Sync + 'static,
    {
        Self::new(
            name,
            FnResolver {
                create,
                still_valid: |_: &T| true,
            },
        )
    }

    /// Like [`Requirement::from_fn`], with a staleness predicate on cached values.
    pub fn from_fn_with_validity<F, V>(name: impl Into<String>, create: F, still_valid: V) -> Self
    where
        F: Fn() -> QiFuture<T> + Send + Sync + 'static,
        V: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(name, FnResolver { create, still_valid })
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current generation counter.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// The cached future, if any, without starting work.
    pub fn cached(&self) -> Option<QiFuture<T>> {
        self.inner.state.lock().cache.clone()
    }

    /// Whether the last attempt succeeded and has not been invalidated since.
    pub fn is_available(&self) -> bool {
        self.inner.state.lock().available
    }

    /// Return the cached future, or start a new resolution attempt.
    ///
    /// Concurrent callers within one generation share the same future. A
    /// failed or cancelled cache is replaced; a successful one is replaced
    /// when the resolver reports it is no longer valid.
    pub fn satisfy(&self) -> QiFuture<T> {
        let mut stale = None;
        let (future, launch) = {
            let mut st = self.inner.state.lock();

            if let Some(value) = st.cache.as_ref().and_then(QiFuture::value) {
                if !self.inner.resolver.is_still_valid(&value) {
                    debug!(requirement = %self.inner.name, "cached value no longer valid");
                    stale = self.invalidate_locked(&mut st);
                    self.inner.resolver.on_invalidate();
                }
            }

            let reusable = st.cache.as_ref().filter(|c| !c.has_failed()).cloned();
            if let Some(cache) = reusable {
                (cache, None)
            } else {
                st.generation += 1;
                let promise = Promise::new();
                let future = promise.future();
                st.cache = Some(future.clone());
                (future, Some((promise, st.generation)))
            }
        };

        if let Some(stale) = stale {
            stale.request_cancellation();
        }
        self.dispatch();

        if let Some((promise, generation)) = launch {
            debug!(requirement = %self.inner.name, generation, "resolving");
            self.launch(&promise, generation);
        }
        future
    }

    /// Drop the cached future and request its cancellation.
    ///
    /// Marks the requirement unavailable. A no-op when nothing is cached.
    pub fn invalidate(&self) {
        let taken = {
            let mut st = self.inner.state.lock();
            let taken = self.invalidate_locked(&mut st);
            self.inner.resolver.on_invalidate();
            taken
        };
        if let Some(taken) = taken {
            debug!(requirement = %self.inner.name, "invalidated");
            taken.request_cancellation();
        }
        self.dispatch();
    }

    /// Register an availability observer.
    ///
    /// If the requirement is currently available the new listener alone is
    /// told so right away; on an uncontended requirement this happens before
    /// returning.
    pub fn add_available_listener(&self, listener: Arc<dyn AvailableListener>) -> ListenerId {
        let id = ListenerId::next();
        {
            let mut st = self.inner.state.lock();
            st.listeners.push((id, Arc::clone(&listener)));
            if st.available {
                st.notices.push_back(Notice {
                    available: true,
                    targets: vec![listener],
                });
            }
        }
        self.dispatch();
        id
    }

    /// Unregister an availability observer. Returns whether it was registered.
    pub fn remove_available_listener(&self, id: ListenerId) -> bool {
        let mut st = self.inner.state.lock();
        let before = st.listeners.len();
        st.listeners.retain(|(existing, _)| *existing != id);
        st.listeners.len() != before
    }

    fn invalidate_locked(&self, st: &mut State<T>) -> Option<QiFuture<T>> {
        let taken = st.cache.take()?;
        st.generation += 1;
        st.set_available(false);
        Some(taken)
    }

    fn launch(&self, promise: &Promise<T>, generation: u64) {
        let produced = catch_unwind(AssertUnwindSafe(|| self.inner.resolver.create()));
        match produced {
            Ok(produced) => promise.bind(&produced),
            Err(_) => {
                error!(requirement = %self.inner.name, "resolver panicked");
                let _ = promise.set_error(QiError::Internal(format!(
                    "resolver for {} panicked",
                    self.inner.name
                )));
            }
        }

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        promise.future().then(move |done| {
            if let Some(inner) = weak.upgrade() {
                Requirement { inner }.on_settled(generation, done);
            }
        });
    }

    fn on_settled(&self, generation: u64, done: &QiFuture<T>) {
        {
            let mut st = self.inner.state.lock();
            if st.generation != generation {
                debug!(
                    requirement = %self.inner.name,
                    generation,
                    current = st.generation,
                    "dropping stale completion"
                );
                return;
            }
            if done.is_success() {
                st.set_available(true);
            } else if let Some(err) = done.error() {
                debug!(requirement = %self.inner.name, generation, error = %err, "resolution failed");
            }
        }
        self.dispatch();
    }

    /// Deliver queued notices unless another thread is already doing so.
    fn dispatch(&self) {
        {
            let mut st = self.inner.state.lock();
            if st.dispatching || st.notices.is_empty() {
                return;
            }
            st.dispatching = true;
        }
        loop {
            let notice = {
                let mut st = self.inner.state.lock();
                match st.notices.pop_front() {
                    Some(notice) => notice,
                    None => {
                        st.dispatching = false;
                        return;
                    }
                }
            };
            for listener in notice.targets {
                let delivered = catch_unwind(AssertUnwindSafe(|| {
                    listener.on_available_changed(notice.available);
                }));
                if delivered.is_err() {
                    error!(
                        requirement = %self.inner.name,
                        available = notice.available,
                        "availability listener panicked"
                    );
                }
            }
        }
    }
}

struct FnResolver<F, V> {
    create: F,
    still_valid: V,
}

impl<T, F, V> Resolver<T> for FnResolver<F, V>
where
    T: Clone + Send + 'static,
    F: Fn() -> QiFuture<T> + Send + Sync + 'static,
    V: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn create(&self) -> QiFuture<T> {
        (self.create)()
    }

    fn is_still_valid(&self, value: &T) -> bool {
        (self.still_valid)(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::{failed, ready};
    use qi_core::logging::capture_logs;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tracing::Level;

    /// Resolver handing out promises the test settles by hand.
    #[derive(Clone, Default)]
    struct Manual {
        issued: Arc<Mutex<Vec<Promise<u32>>>>,
    }

    impl Manual {
        fn promise(&self, index: usize) -> Promise<u32> {
            self.issued.lock()[index].clone()
        }

        fn count(&self) -> usize {
            self.issued.lock().len()
        }
    }

    impl Resolver<u32> for Manual {
        fn create(&self) -> QiFuture<u32> {
            let promise = Promise::new();
            self.issued.lock().push(promise.clone());
            promise.future()
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, Arc<dyn AvailableListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn AvailableListener> =
            Arc::new(move |available: bool| sink.lock().push(available));
        (seen, listener)
    }

    #[test]
    fn pending_future_is_shared() {
        let manual = Manual::default();
        let req = Requirement::new("alpha", manual.clone());

        let a = req.satisfy();
        let b = req.satisfy();
        assert!(a.ptr_eq(&b));
        assert_eq!(manual.count(), 1);
        assert_eq!(req.generation(), 1);
    }

    #[test]
    fn success_marks_available_and_is_reused() {
        let manual = Manual::default();
        let req = Requirement::new("alpha", manual.clone());

        let first = req.satisfy();
        assert!(!req.is_available());
        manual.promise(0).set_value(7).unwrap();
        assert!(req.is_available());
        assert_eq!(first.value(), Some(7));

        assert!(req.satisfy().ptr_eq(&first));
        assert_eq!(manual.count(), 1);
    }

    #[test]
    fn failure_is_retried_on_next_satisfy_only() {
        let manual = Manual::default();
        let req = Requirement::new("alpha", manual.clone());

        let first = req.satisfy();
        manual.promise(0).set_error(QiError::resolution("down")).unwrap();
        assert_eq!(first.error(), Some(QiError::resolution("down")));
        assert!(!req.is_available());
        assert_eq!(manual.count(), 1);

        let second = req.satisfy();
        assert!(!second.ptr_eq(&first));
        assert_eq!(manual.count(), 2);
    }

    #[test]
    fn cancellation_is_treated_as_failure() {
        let manual = Manual::default();
        let req = Requirement::new("alpha", manual.clone());

        let first = req.satisfy();
        manual.promise(0).set_cancelled().unwrap();
        assert!(first.is_cancelled());
        assert!(!req.is_available());
        assert!(!req.satisfy().ptr_eq(&first));
    }

    #[test]
    fn invalidate_then_satisfy_never_returns_old_cache() {
        let manual = Manual::default();
        let req = Requirement::new("alpha", manual.clone());

        let first = req.satisfy();
        manual.promise(0).set_value(1).unwrap();
        let gen_before = req.generation();

        req.invalidate();
        assert!(!req.is_available());
        assert!(req.cached().is_none());
        assert!(req.generation() > gen_before);

        let second = req.satisfy();
        assert!(!second.ptr_eq(&first));
        assert_eq!(manual.count(), 2);
    }

    #[test]
    fn invalidate_requests_cancellation_of_pending_cache() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let req = Requirement::from_fn("alpha", move || {
            let promise: Promise<u32> = Promise::new();
            let flag = Arc::clone(&flag);
            promise.set_on_cancel(move |p| {
                flag.store(true, Ordering::SeqCst);
                let _ = p.set_cancelled();
            });
            promise.future()
        });

        let pending = req.satisfy();
        req.invalidate();
        assert!(cancelled.load(Ordering::SeqCst));
        assert!(pending.is_cancelled());
    }

    #[test]
    fn invalidate_is_idempotent() {
        let (seen, listener) = recorder();
        let req = Requirement::from_fn("alpha", || ready(3));
        let _ = req.add_available_listener(listener);

        let _ = req.satisfy();
        req.invalidate();
        let generation = req.generation();
        req.invalidate();

        assert_eq!(req.generation(), generation);
        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[test]
    fn stale_completion_does_not_flip_availability() {
        let manual = Manual::default();
        let req = Requirement::new("alpha", manual.clone());
        let (seen, listener) = recorder();
        let _ = req.add_available_listener(listener);

        let slow = req.satisfy();
        req.invalidate();
        let fresh = req.satisfy();

        // the first attempt ignored cancellation and completes late
        manual.promise(0).set_value(1).unwrap();
        assert!(!req.is_available());
        assert!(seen.lock().is_empty());
        assert!(!slow.ptr_eq(&fresh));

        manual.promise(1).set_value(2).unwrap();
        assert!(req.is_available());
        assert_eq!(*seen.lock(), vec![true]);
    }

    #[test]
    fn stale_success_after_new_success_is_ignored() {
        let manual = Manual::default();
        let req = Requirement::new("alpha", manual.clone());

        let _ = req.satisfy();
        req.invalidate();
        let _ = req.satisfy();
        manual.promise(1).set_value(2).unwrap();
        req.invalidate();
        assert!(!req.is_available());

        manual.promise(0).set_value(1).unwrap();
        assert!(!req.is_available());
    }

    #[test]
    fn listener_fires_once_per_transition() {
        let manual = Manual::default();
        let req = Requirement::new("alpha", manual.clone());
        let (seen, listener) = recorder();
        let _ = req.add_available_listener(listener);

        let _ = req.satisfy();
        manual.promise(0).set_value(1).unwrap();
        let _ = req.satisfy();
        let _ = req.satisfy();
        req.invalidate();
        req.invalidate();

        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[test]
    fn late_listener_is_caught_up_once() {
        let req = Requirement::from_fn("alpha", || ready(9));
        let _ = req.satisfy();
        assert!(req.is_available());

        let (seen, listener) = recorder();
        let _ = req.add_available_listener(listener);
        assert_eq!(*seen.lock(), vec![true]);

        let _ = req.satisfy();
        assert_eq!(*seen.lock(), vec![true]);
    }

    #[test]
    fn removed_listener_is_not_notified() {
        let req = Requirement::from_fn("alpha", || ready(9));
        let (seen, listener) = recorder();
        let id = req.add_available_listener(listener);
        assert!(req.remove_available_listener(id));
        assert!(!req.remove_available_listener(id));

        let _ = req.satisfy();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn listener_may_reenter_without_deadlock() {
        let req = Requirement::from_fn("alpha", || ready(1));
        let (seen, recorder_listener) = recorder();
        let _ = req.add_available_listener(recorder_listener);

        let handle = req.clone();
        let _ = req.add_available_listener(Arc::new(move |available: bool| {
            if available {
                handle.invalidate();
            }
        }));

        let _ = req.satisfy();
        assert!(!req.is_available());
        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[test]
    fn panicking_listener_is_logged_and_others_still_notified() {
        let (logs, _guard) = capture_logs();
        let req = Requirement::from_fn("alpha", || ready(1));
        let _ = req.add_available_listener(Arc::new(|available: bool| {
            if available {
                panic!("faulty observer");
            }
        }));
        let (seen, listener) = recorder();
        let _ = req.add_available_listener(listener);

        let _ = req.satisfy();
        assert_eq!(*seen.lock(), vec![true]);
        assert!(logs.has_event(Level::ERROR, "availability listener panicked"));
    }

    #[test]
    fn invalid_cached_value_is_replaced() {
        let created = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&created);
        let req = Requirement::from_fn_with_validity(
            "alpha",
            move || ready(counter.fetch_add(1, Ordering::SeqCst)),
            |value: &u32| *value >= 1,
        );

        let first = req.satisfy();
        assert_eq!(first.value(), Some(0));
        let second = req.satisfy();
        assert_eq!(second.value(), Some(1));
        let third = req.satisfy();
        assert!(third.ptr_eq(&second));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stale_value_runs_the_invalidate_hook() {
        struct Expiring {
            created: AtomicU32,
            invalidated: Arc<AtomicU32>,
        }

        impl Resolver<u32> for Expiring {
            fn create(&self) -> QiFuture<u32> {
                ready(self.created.fetch_add(1, Ordering::SeqCst))
            }

            fn is_still_valid(&self, value: &u32) -> bool {
                *value >= 1
            }

            fn on_invalidate(&self) {
                let _ = self.invalidated.fetch_add(1, Ordering::SeqCst);
            }
        }

        let invalidated = Arc::new(AtomicU32::new(0));
        let req = Requirement::new(
            "alpha",
            Expiring {
                created: AtomicU32::new(0),
                invalidated: Arc::clone(&invalidated),
            },
        );

        assert_eq!(req.satisfy().value(), Some(0));
        assert_eq!(invalidated.load(Ordering::SeqCst), 0);

        assert_eq!(req.satisfy().value(), Some(1));
        assert_eq!(invalidated.load(Ordering::SeqCst), 1);

        req.invalidate();
        assert_eq!(invalidated.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_resolver_fails_the_attempt() {
        let req: Requirement<u32> = Requirement::from_fn("alpha", || panic!("bad resolver"));
        let future = req.satisfy();
        assert!(future.has_error());
        assert!(!req.is_available());
    }

    #[test]
    fn failed_resolver_future_surfaces_error() {
        let req: Requirement<u32> =
            Requirement::from_fn("alpha", || failed(QiError::resolution("no robot")));
        let err = req.satisfy().try_result().unwrap().unwrap_err();
        assert_eq!(err, QiError::resolution("no robot"));
    }

    #[test]
    fn concurrent_satisfy_creates_once_per_generation() {
        let manual = Manual::default();
        let req = Requirement::new("alpha", manual.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let req = req.clone();
                std::thread::spawn(move || req.satisfy())
            })
            .collect();
        let futures: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(manual.count(), 1);
        assert!(futures.windows(2).all(|w| w[0].ptr_eq(&w[1])));
    }
}
