//! Service registry: one chained requirement per named robot service.
//!
//! Every service requirement hangs off the same root session requirement.
//! The connection layer drives the whole set at once through
//! [`ServiceRegistry::activate_all`] and [`ServiceRegistry::deactivate_all`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use qi_core::QiError;
use qi_resolve::util::auto_log;
use qi_resolve::{QiFuture, Requirement, RootRequirement, chained};
use tracing::{debug, error, warn};

use crate::session::{ServiceHandle, SessionHandle, fetch_service};

/// Well-known robot services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KnownService {
    /// Motion and posture.
    Actuation,
    /// Background behaviours such as breathing and blinking.
    AutonomousAbilities,
    /// Robot focus arbitration.
    Focus,
    /// Speech and chat.
    Conversation,
    /// Head and tablet cameras.
    Camera,
    /// Maps and localization.
    Mapping,
    /// Robot context creation.
    ContextFactory,
    /// Touch sensors.
    Touch,
    /// Knowledge base.
    Knowledge,
    /// Human detection and engagement.
    HumanAwareness,
    /// Battery and power state.
    Power,
}

impl KnownService {
    /// Every known service, in registration order.
    pub const ALL: [Self; 11] = [
        Self::Actuation,
        Self::AutonomousAbilities,
        Self::Focus,
        Self::Conversation,
        Self::Camera,
        Self::Mapping,
        Self::ContextFactory,
        Self::Touch,
        Self::Knowledge,
        Self::HumanAwareness,
        Self::Power,
    ];

    /// Name the service is registered under on the robot.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actuation => "Actuation",
            Self::AutonomousAbilities => "AutonomousAbilities",
            Self::Focus => "Focus",
            Self::Conversation => "Conversation",
            Self::Camera => "Camera",
            Self::Mapping => "Mapping",
            Self::ContextFactory => "ContextFactory",
            Self::Touch => "Touch",
            Self::Knowledge => "Knowledge",
            Self::HumanAwareness => "HumanAwareness",
            Self::Power => "Power",
        }
    }
}

impl AsRef<str> for KnownService {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for KnownService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnownService {
    type Err = QiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|known| known.as_str() == s)
            .ok_or_else(|| QiError::unknown_service(s))
    }
}

/// Fixed set of service requirements sharing one session requirement.
pub struct ServiceRegistry {
    session: RootRequirement<SessionHandle>,
    services: HashMap<String, Requirement<ServiceHandle>>,
    auto_log: bool,
}

impl ServiceRegistry {
    /// Create a registry for `names`. Duplicate names share one entry.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let session = RootRequirement::new("session");
        let services = names
            .into_iter()
            .map(Into::into)
            .map(|name: String| {
                let service = name.clone();
                let requirement = chained(name.clone(), &session, move |s: SessionHandle| {
                    fetch_service(&s, &service)
                });
                (name, requirement)
            })
            .collect();
        Self {
            session,
            services,
            auto_log: true,
        }
    }

    /// Create a registry for every [`KnownService`].
    pub fn with_known_services() -> Self {
        Self::new(KnownService::ALL.iter().map(|s| s.as_str()))
    }

    /// Whether failures of pre-warmed services are logged.
    pub fn with_auto_log(mut self, enabled: bool) -> Self {
        self.auto_log = enabled;
        self
    }

    /// The shared session requirement.
    pub fn session(&self) -> &RootRequirement<SessionHandle> {
        &self.session
    }

    /// Push a connected session and start resolving every service.
    ///
    /// A disconnected session is ignored with a warning. Pushing a second
    /// session without [`deactivate_all`](Self::deactivate_all) in between
    /// fails with [`QiError::AlreadySettled`].
    pub fn activate_all(&self, session: SessionHandle) -> Result<(), QiError> {
        if !session.is_connected() {
            warn!("session is not connected, services not retrieved");
            return Ok(());
        }

        self.session.resolve(session)?;
        let _ = self.session.satisfy();
        for name in self.names() {
            if let Some(requirement) = self.services.get(&name) {
                let pending = requirement.satisfy();
                if self.auto_log {
                    let _ = auto_log(pending, &name);
                }
            }
        }
        debug!(services = self.services.len(), "services activated");
        Ok(())
    }

    /// Invalidate the session and every service.
    pub fn deactivate_all(&self) {
        self.session.invalidate();
        for requirement in self.services.values() {
            requirement.invalidate();
        }
        debug!(services = self.services.len(), "services deactivated");
    }

    /// The requirement for service `name`.
    ///
    /// An unknown name is a programming error and is logged as such.
    pub fn requirement(&self, name: &str) -> Result<&Requirement<ServiceHandle>, QiError> {
        self.services.get(name).ok_or_else(|| {
            error!(service = name, "unknown service requested");
            QiError::unknown_service(name)
        })
    }

    /// Current or new resolution of service `name`.
    pub fn satisfy(&self, name: &str) -> Result<QiFuture<ServiceHandle>, QiError> {
        Ok(self.requirement(name)?.satisfy())
    }

    /// Whether service `name` is resolved and still valid.
    pub fn is_available(&self, name: &str) -> Result<bool, QiError> {
        Ok(self.requirement(name)?.is_available())
    }

    /// Whether `name` is part of this registry.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::with_known_services()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .field("session_resolved", &self.session.is_resolved())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
