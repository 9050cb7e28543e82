//! Resolves service names to streams of endpoint membership updates.
//!
//! The [`Resolve`] trait abstracts over the source of updates so that the
//! controller's registry watches and in-process test fixtures share one
//! consumer-side interface. [`Client`] implements it over the registry gRPC
//! surface; [`sustain`] wraps any resolver in a reconnect loop governed by a
//! [`Recover`] policy.
//!
//! [`Recover`]: weft_error::Recover

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

pub mod client;
#[cfg(feature = "test-util")]
pub mod mock;
mod sustain;

pub use self::client::Client;
pub use self::sustain::{sustain, StreamEnded};

use futures::Stream;
use std::future::Future;
use std::net::SocketAddr;
use weft_error::Error;

/// Resolves a target to a stream of endpoint updates.
pub trait Resolve<T> {
    type Endpoint;
    type Error: Into<Error>;
    type Resolution: Stream<Item = Result<Update<Self::Endpoint>, Self::Error>> + Unpin;
    type Future: Future<Output = Result<Self::Resolution, Self::Error>>;

    fn resolve(&self, target: T) -> Self::Future;
}

/// A change to a resolved endpoint set.
#[derive(Clone, Debug, PartialEq)]
pub enum Update<E> {
    /// Replaces all prior state with the given set.
    Reset(Vec<E>),
    Add(Vec<E>),
    Remove(Vec<SocketAddr>),
    /// The target is not known to the registry. Prior state is void.
    DoesNotExist,
}
