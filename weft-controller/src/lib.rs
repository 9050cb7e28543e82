//! The weft control plane.
//!
//! The controller's input is a directory of operator-authored intent
//! documents, one YAML file per workload, re-read on an interval so that the
//! files themselves remain the reviewable configuration artifact. Each
//! document is compiled into an immutable, content-versioned configuration
//! bundle held in the [`Index`]; proxies subscribe to their own workload's
//! bundle and to per-service endpoint membership over the discovery API.
//!
//! Scopes are deliberately narrow: editing one workload's intent recomputes
//! one bundle, and a registry update republishes one service's endpoint
//! watch. Subscribers sharing a scope share a `tokio::sync::watch` channel,
//! so a slow proxy only ever misses intermediate values, never blocks others.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

pub mod index;
pub mod intents;
pub mod registry;
pub mod server;

pub use self::index::{Index, SharedIndex};
