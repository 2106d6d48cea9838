//! Focus and lifecycle contracts between the SDK and the host application.
//!
//! The host owns the notion of "focus" (which consumer may drive the robot
//! right now). It reports transitions to a [`FocusCallback`] registered on
//! its [`FocusProvider`]. Consumers observe those transitions through
//! [`RobotLifecycleCallbacks`] registered on a [`QiContext`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::context::QiContext;

/// Opaque payload handed over with a focus grant.
///
/// Owned by the focus provider; replaced wholesale on every grant.
#[derive(Clone)]
pub struct RobotContext(Arc<dyn Any + Send + Sync>);

impl RobotContext {
    /// Wrap a provider-specific payload.
    pub fn new(payload: impl Any + Send + Sync) -> Self {
        Self(Arc::new(payload))
    }

    /// Typed access to the payload.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether both contexts carry the same payload.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RobotContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RobotContext")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

/// Receiver of raw focus transitions from a [`FocusProvider`].
pub trait FocusCallback: Send + Sync {
    /// Focus was granted along with its context payload.
    fn on_focus_gained(&self, context: RobotContext);
    /// Focus was taken away.
    fn on_focus_lost(&self);
    /// A focus request was refused.
    fn on_focus_refused(&self, reason: &str);
}

/// Host-side source of focus transitions for one consumer.
pub trait FocusProvider: Send + Sync {
    /// Start reporting transitions to `callback`.
    fn register(&self, callback: Arc<dyn FocusCallback>);
    /// Stop reporting transitions.
    fn unregister(&self);
}

/// Consumer-facing focus notifications.
pub trait RobotLifecycleCallbacks: Send + Sync {
    /// The consumer holds the focus; robot services may be used through `context`.
    fn on_robot_focus_gained(&self, context: &QiContext);
    /// The focus was lost; stop using robot services.
    fn on_robot_focus_lost(&self);
    /// The focus could not be obtained.
    fn on_robot_focus_refused(&self, reason: &str);
}

/// Notified when the connection to the robot is lost.
///
/// Every service handle obtained before the disconnection is invalid afterwards.
pub trait DisconnectionListener: Send + Sync {
    /// The session was disconnected for `reason`.
    fn on_qi_disconnected(&self, reason: &str);
}

impl<F> DisconnectionListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_qi_disconnected(&self, reason: &str) {
        self(reason);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
