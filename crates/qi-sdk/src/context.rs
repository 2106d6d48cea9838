//! Per-consumer focus-gated access to robot services.
//!
//! A [`QiContext`] keeps weak references to the consumer's
//! [`RobotLifecycleCallbacks`], follows the focus state reported by the host,
//! and fans every transition out to the callbacks that are still alive:
//!
//! ```text
//!             gained(ctx)                   refused(reason)
//!   NO_FOCUS ─────────────▶ HAS_FOCUS       (either state, no change)
//!            ◀─────────────
//!                lost
//! ```
//!
//! The context subscribes to its [`FocusProvider`] when the first callback is
//! registered and unsubscribes when the last one goes away. A callback
//! registered while focus is held is told so before `register` returns.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use qi_core::{ContextKey, QiError};
use qi_resolve::QiFuture;
use tracing::{debug, error};

use crate::lifecycle::{
    DisconnectionListener, FocusCallback, FocusProvider, RobotContext, RobotLifecycleCallbacks,
};
use crate::services::ServiceRegistry;
use crate::session::ServiceHandle;

#[derive(Default)]
struct ContextState {
    callbacks: Vec<Weak<dyn RobotLifecycleCallbacks>>,
    has_focus: bool,
    /// Bumped on every focus change.
    focus_epoch: u64,
    robot_context: Option<RobotContext>,
    listening: bool,
    disconnection: Option<Arc<dyn DisconnectionListener>>,
}

impl ContextState {
    fn prune(&mut self) {
        self.callbacks.retain(|weak| weak.strong_count() > 0);
    }

    fn position(&self, callbacks: &Arc<dyn RobotLifecycleCallbacks>) -> Option<usize> {
        self.callbacks
            .iter()
            .position(|weak| std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(callbacks)))
    }

    fn live(&self) -> Vec<Arc<dyn RobotLifecycleCallbacks>> {
        self.callbacks.iter().filter_map(Weak::upgrade).collect()
    }

    /// Mark as not listening; true if the provider must be unsubscribed.
    fn stop_listening(&mut self) -> bool {
        std::mem::replace(&mut self.listening, false)
    }

    fn set_focus(&mut self, robot_context: Option<RobotContext>) {
        self.has_focus = robot_context.is_some();
        self.robot_context = robot_context;
        self.focus_epoch += 1;
    }
}

struct ContextInner {
    key: ContextKey,
    registry: Arc<ServiceRegistry>,
    focus: Arc<dyn FocusProvider>,
    service_timeout: Duration,
    state: Mutex<ContextState>,
    /// Held from the subscribe/unsubscribe decision until the provider call
    /// returns. Reentrant because a provider may report focus synchronously
    /// from `register`, and callbacks may unregister themselves.
    subscription: ReentrantMutex<()>,
}

/// Focus-gated view of the robot services for one consumer.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QiContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for QiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("QiContext")
            .field("key", &self.inner.key)
            .field("has_focus", &st.has_focus)
            .field("callbacks", &st.callbacks.len())
            .field("listening", &st.listening)
            .finish_non_exhaustive()
    }
}

impl QiContext {
    /// Create a context reading services from `registry`.
    pub fn new(
        key: ContextKey,
        registry: Arc<ServiceRegistry>,
        focus: Arc<dyn FocusProvider>,
        service_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                key,
                registry,
                focus,
                service_timeout,
                state: Mutex::new(ContextState::default()),
                subscription: ReentrantMutex::new(()),
            }),
        }
    }

    /// Key identifying this context.
    pub fn key(&self) -> &ContextKey {
        &self.inner.key
    }

    /// Whether the consumer currently holds the focus.
    pub fn has_focus(&self) -> bool {
        self.inner.state.lock().has_focus
    }

    /// Payload of the current focus grant.
    pub fn robot_context(&self) -> Option<RobotContext> {
        self.inner.state.lock().robot_context.clone()
    }

    /// Whether at least one registered callback is still alive.
    pub fn has_callbacks(&self) -> bool {
        let mut st = self.inner.state.lock();
        st.prune();
        !st.callbacks.is_empty()
    }

    /// Whether the context is subscribed to its focus provider.
    pub fn is_listening(&self) -> bool {
        self.inner.state.lock().listening
    }

    /// Install the listener told about session loss.
    pub fn set_disconnection_listener(&self, listener: Arc<dyn DisconnectionListener>) {
        self.inner.state.lock().disconnection = Some(listener);
    }

    /// Register `callbacks`, held weakly.
    ///
    /// Registering the same callbacks twice keeps one entry. If focus is
    /// currently held, newly added `callbacks` alone receive
    /// `on_robot_focus_gained` before this returns.
    pub fn register(&self, callbacks: &Arc<dyn RobotLifecycleCallbacks>) {
        let catch_up = {
            let _subscription = self.inner.subscription.lock();
            let (subscribe, catch_up) = {
                let mut st = self.inner.state.lock();
                st.prune();
                let added = st.position(callbacks).is_none();
                if added {
                    st.callbacks.push(Arc::downgrade(callbacks));
                }
                let subscribe = !st.listening;
                st.listening = true;
                (subscribe, (added && st.has_focus).then_some(st.focus_epoch))
            };
            if subscribe {
                debug!(context = %self.inner.key, "subscribing to focus");
                let relay: Arc<dyn FocusCallback> =
                    Arc::new(FocusRelay(Arc::downgrade(&self.inner)));
                self.inner.focus.register(relay);
            }
            catch_up
        };

        // a focus change since the callback was added was already fanned out to it
        if catch_up.is_some_and(|epoch| epoch == self.inner.state.lock().focus_epoch) {
            self.deliver(callbacks, "gained", |cb| cb.on_robot_focus_gained(self));
        }
    }

    /// Unregister `callbacks`. Returns whether they were registered.
    ///
    /// Unsubscribes from the focus provider once no callback is left.
    pub fn unregister(&self, callbacks: &Arc<dyn RobotLifecycleCallbacks>) -> bool {
        let _subscription = self.inner.subscription.lock();
        let (removed, unsubscribe) = {
            let mut st = self.inner.state.lock();
            let removed = st.position(callbacks).map(|index| st.callbacks.remove(index));
            st.prune();
            let unsubscribe = st.callbacks.is_empty() && st.stop_listening();
            (removed.is_some(), unsubscribe)
        };
        if unsubscribe {
            self.unsubscribe();
        }
        removed
    }

    /// Drop every callback and unsubscribe from the focus provider.
    pub fn unregister_all(&self) {
        let _subscription = self.inner.subscription.lock();
        let unsubscribe = {
            let mut st = self.inner.state.lock();
            st.callbacks.clear();
            st.stop_listening()
        };
        if unsubscribe {
            self.unsubscribe();
        }
    }

    /// Dispose of the context: unregister everything and forget the focus.
    pub fn teardown(&self) {
        self.unregister_all();
        let mut st = self.inner.state.lock();
        st.set_focus(None);
        st.disconnection = None;
    }

    /// Block until service `name` is resolved, within the configured bound.
    ///
    /// Fails with [`QiError::ServiceUnavailable`] when focus is not held or
    /// the bound expires, [`QiError::UnknownService`] for a name the
    /// registry does not hold, and [`QiError::BlockingOnUiThread`] on the
    /// marked UI thread.
    pub fn service(&self, name: impl AsRef<str>) -> Result<ServiceHandle, QiError> {
        let name = name.as_ref();
        let requirement = self.inner.registry.requirement(name)?;
        if !self.has_focus() {
            return Err(QiError::service_unavailable(name));
        }
        match requirement.satisfy().get(self.inner.service_timeout) {
            Ok(handle) => Ok(handle),
            Err(QiError::BlockingOnUiThread) => Err(QiError::BlockingOnUiThread),
            Err(err) => {
                debug!(service = name, error = %err, "service unavailable");
                Err(QiError::service_unavailable(name))
            }
        }
    }

    /// Current or new resolution of service `name`, without blocking.
    pub fn service_async(&self, name: impl AsRef<str>) -> Result<QiFuture<ServiceHandle>, QiError> {
        self.inner.registry.satisfy(name.as_ref())
    }

    /// Clear the focus state and tell the disconnection listener.
    pub(crate) fn fire_disconnected(&self, reason: &str) {
        let listener = {
            let mut st = self.inner.state.lock();
            st.set_focus(None);
            st.disconnection.clone()
        };
        if let Some(listener) = listener {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_qi_disconnected(reason)));
            if delivered.is_err() {
                error!(context = %self.inner.key, "disconnection listener panicked");
            }
        }
    }

    fn unsubscribe(&self) {
        debug!(context = %self.inner.key, "unsubscribing from focus");
        self.inner.focus.unregister();
    }

    fn fan_out(&self, transition: &str, notify: impl Fn(&dyn RobotLifecycleCallbacks)) {
        let snapshot = self.inner.state.lock().live();
        for callbacks in &snapshot {
            self.deliver(callbacks, transition, &notify);
        }
    }

    fn deliver(
        &self,
        callbacks: &Arc<dyn RobotLifecycleCallbacks>,
        transition: &str,
        notify: impl Fn(&dyn RobotLifecycleCallbacks),
    ) {
        if catch_unwind(AssertUnwindSafe(|| notify(callbacks.as_ref()))).is_err() {
            error!(context = %self.inner.key, transition, "lifecycle callback panicked");
        }
    }
}

impl FocusCallback for QiContext {
    fn on_focus_gained(&self, context: RobotContext) {
        {
            let mut st = self.inner.state.lock();
            st.set_focus(Some(context));
        }
        debug!(context = %self.inner.key, "focus gained");
        self.fan_out("gained", |cb| cb.on_robot_focus_gained(self));
    }

    fn on_focus_lost(&self) {
        {
            let mut st = self.inner.state.lock();
            if !st.has_focus {
                debug!(context = %self.inner.key, "focus lost while not held, ignored");
                return;
            }
            st.set_focus(None);
        }
        debug!(context = %self.inner.key, "focus lost");
        self.fan_out("lost", |cb| cb.on_robot_focus_lost());
    }

    fn on_focus_refused(&self, reason: &str) {
        debug!(context = %self.inner.key, reason, "focus refused");
        self.fan_out("refused", |cb| cb.on_robot_focus_refused(reason));
    }
}

/// Provider-side handle; does not keep the context alive.
struct FocusRelay(Weak<ContextInner>);

impl FocusRelay {
    fn context(&self) -> Option<QiContext> {
        self.0.upgrade().map(|inner| QiContext { inner })
    }
}

impl FocusCallback for FocusRelay {
    fn on_focus_gained(&self, context: RobotContext) {
        if let Some(qi) = self.context() {
            qi.on_focus_gained(context);
        }
    }

    fn on_focus_lost(&self) {
        if let Some(qi) = self.context() {
            qi.on_focus_lost();
        }
    }

    fn on_focus_refused(&self, reason: &str) {
        if let Some(qi) = self.context() {
            qi.on_focus_refused(reason);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
