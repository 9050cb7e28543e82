use crate::{Resolve, Update};
use futures::prelude::*;
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, trace, warn};
use weft_error::Recover;

/// The resolution stream ended without an error.
#[derive(Clone, Debug, Error)]
#[error("endpoint stream ended")]
pub struct StreamEnded(());

/// Keeps a resolution alive across failures.
///
/// The target is re-resolved whenever its stream fails or ends, with delays
/// drawn from the recovery policy's backoff. A backoff is retained across
/// consecutive failures so that delays escalate, and dropped once a new
/// resolution is established. The returned stream ends only when the policy
/// deems an error fatal.
///
/// An `Add` arriving first on a fresh resolution is widened to a `Reset` so
/// that consumers observe a full set after reconnecting.
pub fn sustain<T, R, C>(
    resolve: R,
    recover: C,
    target: T,
) -> impl Stream<Item = Update<R::Endpoint>>
where
    T: Clone,
    R: Resolve<T>,
    C: Recover,
{
    async_stream::stream! {
        let mut staged: Option<Pin<Box<C::Backoff>>> = None;
        loop {
            let error = match resolve.resolve(target.clone()).await {
                Ok(mut resolution) => {
                    trace!("Connected");
                    staged = None;
                    let mut initial = true;
                    loop {
                        match resolution.next().await {
                            Some(Ok(update)) => {
                                let update = match update {
                                    Update::Add(eps) if initial => Update::Reset(eps),
                                    update => update,
                                };
                                initial = false;
                                yield update;
                            }
                            Some(Err(e)) => break e.into(),
                            None => break StreamEnded(()).into(),
                        }
                    }
                }
                Err(e) => e.into(),
            };

            debug!(%error, "Recovering");
            let backoff = match recover.recover(error) {
                Ok(backoff) => backoff,
                Err(error) => {
                    warn!(%error, "Resolution failed");
                    break;
                }
            };

            // Prefer a backoff staged by an earlier failure so delays keep
            // escalating; a fresh one would start over at the minimum.
            let mut backoff = match staged.take() {
                Some(staged) => staged,
                None => Box::pin(backoff),
            };
            if backoff.next().await.is_some() {
                staged = Some(backoff);
            } else {
                trace!("Backoff exhausted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use weft_error::{recover, Error};

    /// Yields one scripted resolution per `resolve` call, then errors.
    #[derive(Clone)]
    struct Script(Arc<Mutex<VecDeque<Vec<Result<Update<u8>, Error>>>>>);

    impl Script {
        fn new(scripts: Vec<Vec<Result<Update<u8>, Error>>>) -> Self {
            Self(Arc::new(Mutex::new(scripts.into_iter().collect())))
        }
    }

    impl Resolve<()> for Script {
        type Endpoint = u8;
        type Error = Error;
        type Resolution = stream::Iter<std::vec::IntoIter<Result<Update<u8>, Error>>>;
        type Future = future::Ready<Result<Self::Resolution, Self::Error>>;

        fn resolve(&self, (): ()) -> Self::Future {
            match self.0.lock().unwrap().pop_front() {
                Some(items) => future::ok(stream::iter(items)),
                None => future::err("script exhausted".into()),
            }
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reconnects_across_stream_failures() {
        let resolve = Script::new(vec![
            vec![Ok(Update::Reset(vec![1])), Err("disconnect".into())],
            vec![Ok(Update::Reset(vec![2]))],
        ]);

        let updates = sustain(resolve, recover::Immediately::new(), ())
            .take(2)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(
            updates,
            vec![Update::Reset(vec![1]), Update::Reset(vec![2])],
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fatal_recovery_ends_stream() {
        let resolve = Script::new(vec![vec![Ok(Update::Reset(vec![1]))]]);

        let updates = sustain(resolve, fail_fast, ()).collect::<Vec<_>>().await;
        assert_eq!(updates, vec![Update::Reset(vec![1])]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn initial_add_becomes_reset() {
        let resolve = Script::new(vec![vec![
            Ok(Update::Add(vec![7])),
            Ok(Update::Add(vec![8])),
        ]]);

        let updates = sustain(resolve, fail_fast, ()).collect::<Vec<_>>().await;
        assert_eq!(updates, vec![Update::Reset(vec![7]), Update::Add(vec![8])]);
    }

    /// A recovery policy that treats every error as fatal.
    fn fail_fast(e: Error) -> Result<stream::Empty<()>, Error> {
        Err(e)
    }
}
