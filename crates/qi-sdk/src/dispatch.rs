//! Lifecycle callbacks re-posted onto the shared pool.
//!
//! Focus transitions are delivered on whatever thread the host reports them
//! from. Wrapping the consumer's callbacks in [`DispatchedCallbacks`] moves
//! each call onto a [`QiThreadPool`] worker instead, so slow consumers do not
//! hold up the fan-out.

use std::sync::Arc;

use crate::context::QiContext;
use crate::lifecycle::RobotLifecycleCallbacks;
use crate::thread_pool::{QiThreadPool, SerialQueue};

/// [`RobotLifecycleCallbacks`] adapter that runs every call on a pool.
///
/// Calls reach the target one at a time and in the order they were made.
pub struct DispatchedCallbacks {
    target: Arc<dyn RobotLifecycleCallbacks>,
    queue: SerialQueue,
}

impl DispatchedCallbacks {
    /// Wrap `target` so its calls run on `pool`.
    pub fn new(target: Arc<dyn RobotLifecycleCallbacks>, pool: &QiThreadPool) -> Self {
        Self {
            target,
            queue: pool.serial_queue(),
        }
    }

    /// Wrap `target` and return it ready to register.
    pub fn wrap(
        target: Arc<dyn RobotLifecycleCallbacks>,
        pool: &QiThreadPool,
    ) -> Arc<dyn RobotLifecycleCallbacks> {
        Arc::new(Self::new(target, pool))
    }

    fn post(&self, call: impl FnOnce(&dyn RobotLifecycleCallbacks) + Send + 'static) {
        let target = Arc::clone(&self.target);
        let _ = self.queue.post(move || call(target.as_ref()));
    }
}

impl RobotLifecycleCallbacks for DispatchedCallbacks {
    fn on_robot_focus_gained(&self, context: &QiContext) {
        let context = context.clone();
        self.post(move |target| target.on_robot_focus_gained(&context));
    }

    fn on_robot_focus_lost(&self) {
        self.post(|target| target.on_robot_focus_lost());
    }

    fn on_robot_focus_refused(&self, reason: &str) {
        let reason = reason.to_owned();
        self.post(move |target| target.on_robot_focus_refused(&reason));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
