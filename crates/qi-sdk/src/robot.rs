//! Root object tying a connection, its services and its consumers together.
//!
//! A [`QiRobot`] owns the settings, the shared pool, one [`ServiceRegistry`]
//! and a [`QiContext`] per consumer. The transport reports connection events
//! to it through [`ConnectionCallbacks`]. Lifecycle: created with
//! [`QiRobot::new`], active while contexts are registered, torn down by
//! [`QiRobot::shutdown`].

use std::sync::Arc;

use dashmap::DashMap;
use qi_core::{ContextKey, QiError};
use qi_settings::SdkSettings;
use tracing::{debug, info, warn};

use crate::context::QiContext;
use crate::lifecycle::{FocusProvider, RobotLifecycleCallbacks};
use crate::services::ServiceRegistry;
use crate::session::{ConnectionCallbacks, SessionHandle};
use crate::thread_pool::QiThreadPool;

/// Reason handed to disconnection listeners when the session is lost.
pub const DISCONNECTED_REASON: &str = "Robot is disconnected";

/// Connection to one robot and everything resolved through it.
pub struct QiRobot {
    settings: SdkSettings,
    pool: Arc<QiThreadPool>,
    registry: Arc<ServiceRegistry>,
    contexts: DashMap<ContextKey, QiContext>,
}

impl std::fmt::Debug for QiRobot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QiRobot")
            .field("registry", &self.registry)
            .field("contexts", &self.contexts.len())
            .finish_non_exhaustive()
    }
}

impl QiRobot {
    /// Build a robot from validated `settings`.
    ///
    /// Installs the global stderr subscriber at `settings.log_level` unless
    /// the host already installed one.
    pub fn new(settings: SdkSettings) -> Result<Self, QiError> {
        settings
            .validate()
            .map_err(|e| QiError::Internal(format!("invalid settings: {e}")))?;
        qi_core::logging::init_subscriber(&settings.log_level);
        let pool = Arc::new(QiThreadPool::new(settings.thread_pool_size)?);
        let registry = Arc::new(
            ServiceRegistry::new(settings.services.iter().cloned())
                .with_auto_log(settings.auto_log_future_errors),
        );
        info!(
            services = settings.services.len(),
            workers = settings.thread_pool_size,
            "robot created"
        );
        Ok(Self {
            settings,
            pool,
            registry,
            contexts: DashMap::new(),
        })
    }

    /// Settings this robot was built with.
    pub fn settings(&self) -> &SdkSettings {
        &self.settings
    }

    /// Shared worker pool.
    pub fn pool(&self) -> &Arc<QiThreadPool> {
        &self.pool
    }

    /// Service registry shared by every context.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The context for `key`, if one is registered.
    pub fn context(&self, key: &ContextKey) -> Option<QiContext> {
        self.contexts.get(key).map(|entry| entry.value().clone())
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Register `callbacks` on the context for `key`, creating it on first use.
    pub fn register(
        &self,
        key: &ContextKey,
        focus: Arc<dyn FocusProvider>,
        callbacks: &Arc<dyn RobotLifecycleCallbacks>,
    ) -> QiContext {
        let context = self
            .contexts
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(context = %key, "creating context");
                QiContext::new(
                    key.clone(),
                    Arc::clone(&self.registry),
                    focus,
                    self.settings.service_timeout(),
                )
            })
            .clone();
        context.register(callbacks);
        context
    }

    /// Unregister `callbacks` from the context for `key`.
    ///
    /// The context is dropped once it has no callbacks left.
    pub fn unregister(&self, key: &ContextKey, callbacks: &Arc<dyn RobotLifecycleCallbacks>) -> bool {
        let Some(context) = self.context(key) else {
            return false;
        };
        let removed = context.unregister(callbacks);
        if !context.has_callbacks() {
            self.remove_context(key);
        }
        removed
    }

    /// Unregister every callback of the context for `key` and drop it.
    pub fn unregister_all(&self, key: &ContextKey) {
        if let Some(context) = self.context(key) {
            context.unregister_all();
            self.remove_context(key);
        }
    }

    /// Tear down every context and invalidate all services.
    pub fn shutdown(&self) {
        for context in self.snapshot() {
            context.teardown();
        }
        self.contexts.clear();
        self.registry.deactivate_all();
        info!("robot shut down");
    }

    fn remove_context(&self, key: &ContextKey) {
        if let Some((_, context)) = self.contexts.remove(key) {
            context.teardown();
            debug!(context = %key, "context removed");
        }
        if self.contexts.is_empty() {
            self.registry.deactivate_all();
        }
    }

    fn snapshot(&self) -> Vec<QiContext> {
        self.contexts.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl ConnectionCallbacks for QiRobot {
    fn on_robot_ready(&self, session: SessionHandle) {
        match self.registry.activate_all(session) {
            Ok(()) => info!("robot ready"),
            Err(err) => warn!(error = %err, "robot ready while services already active"),
        }
    }

    fn on_robot_lost(&self) {
        self.registry.deactivate_all();
        for context in self.snapshot() {
            context.fire_disconnected(DISCONNECTED_REASON);
        }
        info!("robot lost");
    }

    fn on_robot_absent(&self) {
        debug!("robot absent");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::FocusCallback;
    use crate::session::{ServiceHandle, Session};
    use assert_matches::assert_matches;
    use qi_resolve::QiFuture;
    use qi_resolve::util::ready;

    struct Connected;

    impl Session for Connected {
        fn is_connected(&self) -> bool {
            true
        }

        fn wait_for_service(&self, _name: &str) -> QiFuture<()> {
            ready(())
        }

        fn service(&self, name: &str) -> QiFuture<ServiceHandle> {
            ready(ServiceHandle::new(name, ()))
        }
    }

    struct Silent;

    impl FocusProvider for Silent {
        fn register(&self, _callback: Arc<dyn FocusCallback>) {}
        fn unregister(&self) {}
    }

    struct Quiet;

    impl RobotLifecycleCallbacks for Quiet {
        fn on_robot_focus_gained(&self, _context: &QiContext) {}
        fn on_robot_focus_lost(&self) {}
        fn on_robot_focus_refused(&self, _reason: &str) {}
    }

    fn robot() -> QiRobot {
        QiRobot::new(SdkSettings {
            services: vec!["Alpha".into(), "Beta".into()],
            thread_pool_size: 1,
            ..SdkSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = SdkSettings {
            thread_pool_size: 0,
            ..SdkSettings::default()
        };
        assert_matches!(QiRobot::new(settings), Err(QiError::Internal(_)));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let settings = SdkSettings {
            log_level: "chatty".into(),
            ..SdkSettings::default()
        };
        assert_matches!(QiRobot::new(settings), Err(QiError::Internal(m)) if m.contains("logLevel"));
    }

    #[test]
    fn contexts_are_created_once_per_key() {
        let robot = robot();
        let key = ContextKey::new();
        let a: Arc<dyn RobotLifecycleCallbacks> = Arc::new(Quiet);
        let b: Arc<dyn RobotLifecycleCallbacks> = Arc::new(Quiet);

        let first = robot.register(&key, Arc::new(Silent), &a);
        let second = robot.register(&key, Arc::new(Silent), &b);
        assert_eq!(first.key(), second.key());
        assert_eq!(robot.context_count(), 1);
    }

    #[test]
    fn last_unregister_drops_context_and_invalidates_services() {
        let robot = robot();
        robot.on_robot_ready(Arc::new(Connected));
        assert_eq!(robot.registry().is_available("Alpha"), Ok(true));

        let key = ContextKey::new();
        let cb: Arc<dyn RobotLifecycleCallbacks> = Arc::new(Quiet);
        let _ = robot.register(&key, Arc::new(Silent), &cb);
        assert!(robot.unregister(&key, &cb));

        assert_eq!(robot.context_count(), 0);
        assert_eq!(robot.registry().is_available("Alpha"), Ok(false));
    }

    #[test]
    fn unregister_unknown_key_is_false() {
        let robot = robot();
        let cb: Arc<dyn RobotLifecycleCallbacks> = Arc::new(Quiet);
        assert!(!robot.unregister(&ContextKey::new(), &cb));
    }

    #[test]
    fn shutdown_clears_everything() {
        let robot = robot();
        robot.on_robot_ready(Arc::new(Connected));
        let cb: Arc<dyn RobotLifecycleCallbacks> = Arc::new(Quiet);
        let context = robot.register(&ContextKey::new(), Arc::new(Silent), &cb);

        robot.shutdown();
        assert_eq!(robot.context_count(), 0);
        assert!(!context.is_listening());
        assert_eq!(robot.registry().is_available("Beta"), Ok(false));
    }

    #[test]
    fn absent_robot_changes_nothing() {
        let robot = robot();
        robot.on_robot_ready(Arc::new(Connected));
        robot.on_robot_absent();
        assert_eq!(robot.registry().is_available("Alpha"), Ok(true));
    }
}
