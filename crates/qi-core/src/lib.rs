//! # qi-core
//!
//! Foundation types, errors, branded IDs, and logging for the Qi robot SDK.
//!
//! This crate provides the shared vocabulary that the other Qi crates depend on:
//!
//! - **Errors**: [`QiError`] taxonomy via `thiserror` (resolution failure,
//!   cancellation, service unavailable, unknown service, protocol violations)
//! - **Branded IDs**: [`ListenerId`], [`ContextKey`] newtypes for type safety
//! - **Logging**: `tracing` subscriber bootstrap and in-memory log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{QiError, Result};
pub use ids::{ContextKey, ListenerId};
