//! # qi-resolve
//!
//! The resolution engine of the Qi robot SDK.
//!
//! - [`future`]: [`Promise`]/[`QiFuture`], a settable, cancellable,
//!   continuation-driven asynchronous result that can also be awaited
//! - [`requirement`]: [`Requirement`], a lazily created, memoized value with
//!   generation-checked invalidation and availability listeners
//! - [`root`]: [`RootRequirement`], fed by an external push and rearmed on
//!   invalidation
//! - [`chained`]: requirements derived from the value of another one
//! - [`util`]: `zip` and `auto_log`
//! - [`ui_thread`]: marking the thread blocking accessors must never block

#![deny(unsafe_code)]

pub mod chained;
pub mod future;
pub mod requirement;
pub mod root;
pub mod ui_thread;
pub mod util;

pub use chained::{ChainResolver, chained};
pub use future::{Promise, QiFuture};
pub use requirement::{AvailableListener, Requirement, Resolver};
pub use root::RootRequirement;
pub use ui_thread::{UiThreadGuard, is_ui_thread, mark_ui_thread};
