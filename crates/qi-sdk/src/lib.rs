//! # qi-sdk
//!
//! The robot-facing half of the Qi SDK, built on the resolution engine in
//! `qi-resolve`:
//!
//! - **Services**: [`ServiceRegistry`] keeps one invalidatable requirement per
//!   named remote service, chained on the current [`Session`]
//! - **Contexts**: [`QiContext`] gates blocking service access on robot focus
//!   and fans focus transitions out to [`RobotLifecycleCallbacks`]
//! - **Root**: [`QiRobot`] owns settings, pool, registry and contexts, and
//!   reacts to [`ConnectionCallbacks`] from the transport
//! - **Pool**: [`QiThreadPool`] runs jobs and delayed work, and
//!   [`DispatchedCallbacks`] re-posts lifecycle calls onto it

#![deny(unsafe_code)]

pub mod context;
pub mod dispatch;
pub mod lifecycle;
pub mod robot;
pub mod services;
pub mod session;
pub mod thread_pool;

pub use context::QiContext;
pub use dispatch::DispatchedCallbacks;
pub use lifecycle::{
    DisconnectionListener, FocusCallback, FocusProvider, RobotContext, RobotLifecycleCallbacks,
};
pub use robot::{DISCONNECTED_REASON, QiRobot};
pub use services::{KnownService, ServiceRegistry};
pub use session::{ConnectionCallbacks, ServiceHandle, Session, SessionHandle};
pub use thread_pool::{QiThreadPool, SerialQueue};
