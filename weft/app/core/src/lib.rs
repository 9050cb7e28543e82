//! Core infrastructure for the proxy application.
//!
//! Conglomerates:
//! - Configuration loading from the environment
//! - The controller client and its watch channels
//! - Listener binding and original-destination recovery
//! - Response classification
//! - Tracing initialization

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

pub use weft_drain as drain;
pub use weft_error::{cause_ref, is_caused_by, Error, Result};
pub use weft_exp_backoff as exp_backoff;
pub use weft_metrics as metrics;
pub use weft_policy as policy;
pub use weft_stack as svc;

pub mod classify;
pub mod config;
pub mod control;
pub mod http;
pub mod trace;
pub mod transport;

/// Marks a locally generated 503 so callers and tooling can tell load
/// shedding apart from an upstream failure.
pub const SHED_HEADER: &str = "weft-shed";

