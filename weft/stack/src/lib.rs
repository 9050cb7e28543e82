//! Utilities for composing Tower services.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

mod new_service;

pub use self::new_service::NewService;
pub use tower::{util::ServiceExt, Service};
