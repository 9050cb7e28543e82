//! Attaches the weft proxy to workload manifests.
//!
//! Injection happens at deployment time, before the workload's own process
//! accepts its first connection: the proxy container is inserted ahead of
//! the workload container and an init step installs the interception rules,
//! so no request is ever handled unmediated. A workload opts in with one
//! annotation; everything else is derived from what the manifest already
//! declares. The injector also emits the workload's baseline intent
//! document, so the common path needs no hand-authored configuration at all.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

pub mod inject;
pub mod manifest;
pub mod rules;

pub use self::inject::{inject, Injection, Params};
pub use self::manifest::Manifest;
pub use self::rules::Redirect;
