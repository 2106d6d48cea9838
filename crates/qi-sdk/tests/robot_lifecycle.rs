//! End-to-end tests driving a `QiRobot` through connection and focus events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use parking_lot::Mutex;
use qi_core::{ContextKey, QiError};
use qi_resolve::QiFuture;
use qi_resolve::util::ready;
use qi_sdk::{
    ConnectionCallbacks, DISCONNECTED_REASON, FocusCallback, FocusProvider, QiContext, QiRobot,
    RobotContext, RobotLifecycleCallbacks, ServiceHandle, Session,
};
use qi_settings::SdkSettings;

const TIMEOUT: Duration = Duration::from_secs(5);

struct FakeSession;

impl Session for FakeSession {
    fn is_connected(&self) -> bool {
        true
    }

    fn wait_for_service(&self, _name: &str) -> QiFuture<()> {
        ready(())
    }

    fn service(&self, name: &str) -> QiFuture<ServiceHandle> {
        ready(ServiceHandle::new(name, name.to_owned()))
    }
}

/// Focus provider the test drives by hand.
#[derive(Default)]
struct ManualFocus {
    subscriber: Mutex<Option<Arc<dyn FocusCallback>>>,
}

impl ManualFocus {
    fn grant(&self, payload: &'static str) {
        let subscriber = self.subscriber.lock().clone();
        if let Some(subscriber) = subscriber {
            subscriber.on_focus_gained(RobotContext::new(payload));
        }
    }

    fn revoke(&self) {
        let subscriber = self.subscriber.lock().clone();
        if let Some(subscriber) = subscriber {
            subscriber.on_focus_lost();
        }
    }
}

impl FocusProvider for ManualFocus {
    fn register(&self, callback: Arc<dyn FocusCallback>) {
        *self.subscriber.lock() = Some(callback);
    }

    fn unregister(&self) {
        *self.subscriber.lock() = None;
    }
}

#[derive(Default)]
struct Journal {
    events: Mutex<Vec<String>>,
}

impl RobotLifecycleCallbacks for Journal {
    fn on_robot_focus_gained(&self, context: &QiContext) {
        let payload = context
            .robot_context()
            .and_then(|ctx| ctx.downcast_ref::<&'static str>().map(|s| (*s).to_owned()))
            .unwrap_or_default();
        self.events.lock().push(format!("gained:{payload}"));
    }

    fn on_robot_focus_lost(&self) {
        self.events.lock().push("lost".into());
    }

    fn on_robot_focus_refused(&self, reason: &str) {
        self.events.lock().push(format!("refused:{reason}"));
    }
}

fn robot(timeout_ms: u64) -> QiRobot {
    QiRobot::new(SdkSettings {
        services: vec!["Alpha".into(), "Beta".into()],
        service_timeout_ms: timeout_ms,
        thread_pool_size: 2,
        ..SdkSettings::default()
    })
    .unwrap()
}

#[test]
fn services_follow_connection_state() {
    let robot = robot(1_000);
    let registry = Arc::clone(robot.registry());

    robot.on_robot_ready(Arc::new(FakeSession));
    for name in ["Alpha", "Beta"] {
        let handle = registry.satisfy(name).unwrap().get(TIMEOUT).unwrap();
        assert_eq!(handle.name(), name);
        assert_eq!(registry.is_available(name), Ok(true));
    }

    robot.on_robot_lost();
    assert_eq!(registry.is_available("Alpha"), Ok(false));
    assert_eq!(registry.is_available("Beta"), Ok(false));

    let pending = registry.satisfy("Alpha").unwrap();
    assert_matches!(pending.get(Duration::from_millis(50)), Err(QiError::Timeout(_)));
    assert!(!pending.is_done());

    robot.on_robot_ready(Arc::new(FakeSession));
    assert_eq!(pending.get(TIMEOUT).map(|h| h.name().to_owned()), Ok("Alpha".to_owned()));
    assert_eq!(registry.is_available("Alpha"), Ok(true));
}

#[test]
fn late_callbacks_catch_up_on_held_focus() {
    let robot = robot(1_000);
    let focus = Arc::new(ManualFocus::default());
    let first: Arc<dyn RobotLifecycleCallbacks> = Arc::new(Journal::default());
    let key = ContextKey::new();

    let context = robot.register(&key, focus.clone(), &first);
    assert!(context.unregister(&first));
    context.on_focus_gained(RobotContext::new("ctx1"));

    let late = Arc::new(Journal::default());
    let late_dyn: Arc<dyn RobotLifecycleCallbacks> = late.clone();
    context.register(&late_dyn);

    assert_eq!(*late.events.lock(), vec!["gained:ctx1".to_owned()]);
}

#[test]
fn focus_transitions_fan_out_to_every_callback() {
    let robot = robot(1_000);
    let focus = Arc::new(ManualFocus::default());
    let key = ContextKey::new();
    let a = Arc::new(Journal::default());
    let b = Arc::new(Journal::default());
    let a_dyn: Arc<dyn RobotLifecycleCallbacks> = a.clone();
    let b_dyn: Arc<dyn RobotLifecycleCallbacks> = b.clone();

    let _ = robot.register(&key, focus.clone(), &a_dyn);
    let _ = robot.register(&key, focus.clone(), &b_dyn);

    focus.grant("ctx1");
    focus.revoke();
    focus.revoke();

    for journal in [&a, &b] {
        assert_eq!(
            *journal.events.lock(),
            vec!["gained:ctx1".to_owned(), "lost".to_owned()]
        );
    }

    assert!(robot.unregister(&key, &a_dyn));
    assert!(robot.unregister(&key, &b_dyn));
    assert_eq!(robot.context_count(), 0);
    assert!(focus.subscriber.lock().is_none());
}

#[test]
fn blocking_access_is_gated_on_focus() {
    let robot = robot(1_000);
    robot.on_robot_ready(Arc::new(FakeSession));
    let focus = Arc::new(ManualFocus::default());
    let cb: Arc<dyn RobotLifecycleCallbacks> = Arc::new(Journal::default());
    let context = robot.register(&ContextKey::new(), focus.clone(), &cb);

    assert_matches!(context.service("Alpha"), Err(QiError::ServiceUnavailable { .. }));
    assert_matches!(context.service("Gamma"), Err(QiError::UnknownService { .. }));

    focus.grant("ctx1");
    let handle = context.service("Alpha").unwrap();
    assert_eq!(handle.downcast::<String>().as_deref().map(String::as_str), Some("Alpha"));

    focus.revoke();
    assert_matches!(context.service("Alpha"), Err(QiError::ServiceUnavailable { .. }));
    assert!(context.service_async("Alpha").unwrap().is_success());
}

#[test]
fn unresolved_connection_fails_within_the_bound() {
    let robot = robot(50);
    let focus = Arc::new(ManualFocus::default());
    let cb: Arc<dyn RobotLifecycleCallbacks> = Arc::new(Journal::default());
    let context = robot.register(&ContextKey::new(), focus.clone(), &cb);
    focus.grant("ctx1");

    let started = Instant::now();
    assert_matches!(context.service("Beta"), Err(QiError::ServiceUnavailable { .. }));
    assert!(started.elapsed() < TIMEOUT);

    let waiting = context.service_async("Beta").unwrap();
    robot.on_robot_lost();
    assert_eq!(waiting.get(TIMEOUT).map(|_| ()), Err(QiError::Cancelled));
}

#[test]
fn losing_the_robot_notifies_disconnection_listeners() {
    let robot = robot(1_000);
    robot.on_robot_ready(Arc::new(FakeSession));
    let focus = Arc::new(ManualFocus::default());
    let cb: Arc<dyn RobotLifecycleCallbacks> = Arc::new(Journal::default());
    let context = robot.register(&ContextKey::new(), focus.clone(), &cb);
    focus.grant("ctx1");

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reasons);
    context.set_disconnection_listener(Arc::new(move |reason: &str| {
        sink.lock().push(reason.to_owned());
    }));

    robot.on_robot_lost();
    assert_eq!(*reasons.lock(), vec![DISCONNECTED_REASON.to_owned()]);
    assert!(!context.has_focus());
    assert_matches!(context.service("Alpha"), Err(QiError::ServiceUnavailable { .. }));
}
