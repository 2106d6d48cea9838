//! Connection to the robot, as seen by the service registry.
//!
//! The transport itself lives outside this crate. A [`Session`] only has to
//! report whether it is connected, wait for a named service to be
//! registered, and hand out an opaque [`ServiceHandle`] for it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use qi_resolve::{Promise, QiFuture};

/// Shared handle to a connected session.
pub type SessionHandle = Arc<dyn Session>;

/// A connected session to the robot.
pub trait Session: Send + Sync + 'static {
    /// Whether the session is currently connected.
    fn is_connected(&self) -> bool;

    /// Settles once `name` is registered on the robot.
    fn wait_for_service(&self, name: &str) -> QiFuture<()>;

    /// Fetch the remote object registered as `name`.
    fn service(&self, name: &str) -> QiFuture<ServiceHandle>;
}

/// Connection lifecycle events reported by the transport layer.
pub trait ConnectionCallbacks: Send + Sync {
    /// A session to the robot was established.
    fn on_robot_ready(&self, session: SessionHandle);
    /// The session to the robot was lost.
    fn on_robot_lost(&self);
    /// No robot is reachable at all.
    fn on_robot_absent(&self);
}

/// Opaque, cloneable reference to a remote service object.
#[derive(Clone)]
pub struct ServiceHandle {
    name: Arc<str>,
    object: Arc<dyn Any + Send + Sync>,
}

impl ServiceHandle {
    /// Wrap a transport-level object for service `name`.
    pub fn new(name: impl Into<Arc<str>>, object: impl Any + Send + Sync) -> Self {
        Self {
            name: name.into(),
            object: Arc::new(object),
        }
    }

    /// Name the service was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Typed access to the underlying object.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).downcast::<T>().ok()
    }

    /// Whether both handles wrap the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Wait for `name` to be registered, then fetch it.
///
/// The wait is relayed through a local promise so that cancelling the fetch
/// settles it right away, whatever the session does with its own wait.
pub(crate) fn fetch_service(session: &SessionHandle, name: &str) -> QiFuture<ServiceHandle> {
    let registered = Promise::<()>::new();
    registered.set_on_cancel(|p| {
        let _ = p.set_cancelled();
    });
    let relay = registered.clone();
    session.wait_for_service(name).then(move |waited| {
        let _ = match waited.try_result() {
            Some(Ok(())) => relay.set_value(()),
            Some(Err(qi_core::QiError::Cancelled)) | None => relay.set_cancelled(),
            Some(Err(err)) => relay.set_error(err),
        };
    });

    let session = Arc::clone(session);
    let name = name.to_owned();
    registered
        .future()
        .and_then_compose(move |()| session.service(&name))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
