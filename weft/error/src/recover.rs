use super::Error;
use futures::{stream, Stream};

/// Decides whether a failed operation may be retried.
pub trait Recover<E = Error> {
    type Backoff: Stream<Item = ()>;

    /// Classifies an E-typed error as recoverable or fatal.
    ///
    /// A recoverable error yields a backoff stream. Each item the stream
    /// produces grants one retry; polling it again after that retry fails
    /// begins the next, possibly longer, delay. A fatal error is handed
    /// back to the caller unchanged.
    fn recover(&self, err: E) -> Result<Self::Backoff, E>;
}

/// Retries every failure with no delay between attempts.
#[derive(Copy, Clone, Debug, Default)]
pub struct Immediately(());

// === impl Recover ===

impl<E, B, F> Recover<E> for F
where
    B: Stream<Item = ()>,
    F: Fn(E) -> Result<B, E>,
{
    type Backoff = B;

    fn recover(&self, err: E) -> Result<Self::Backoff, E> {
        (*self)(err)
    }
}

// === impl Immediately ===

impl Immediately {
    pub fn new() -> Self {
        Immediately(())
    }
}

impl<E> Recover<E> for Immediately {
    type Backoff = stream::Repeat<()>;

    fn recover(&self, _: E) -> Result<Self::Backoff, E> {
        Ok(stream::repeat(()))
    }
}
