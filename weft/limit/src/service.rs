use crate::{GradientLimit, Permit, ShedError};
use futures::ready;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use weft_error::Error;

/// Applies a shared [`GradientLimit`] to every service it wraps.
#[derive(Clone, Debug)]
pub struct Layer {
    limit: GradientLimit,
}

/// Rejects requests with [`ShedError`] while the window is full.
///
/// Unlike a queuing concurrency limit, readiness never blocks on the window:
/// admission is decided per call so that rejected requests fail in
/// microseconds rather than waiting for a slot.
#[derive(Clone, Debug)]
pub struct Shed<S> {
    inner: S,
    limit: GradientLimit,
}

#[pin_project(project = ResponseFutureProj)]
pub enum ResponseFuture<F> {
    Inner {
        #[pin]
        inner: F,
        permit: Option<Permit>,
    },
    Shed,
}

// === impl Layer ===

impl Layer {
    pub fn new(limit: GradientLimit) -> Self {
        Self { limit }
    }
}

impl From<GradientLimit> for Layer {
    fn from(limit: GradientLimit) -> Self {
        Self::new(limit)
    }
}

impl<S> tower::layer::Layer<S> for Layer {
    type Service = Shed<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Shed {
            inner,
            limit: self.limit.clone(),
        }
    }
}

// === impl Shed ===

impl<S, Req> tower::Service<Req> for Shed<S>
where
    S: tower::Service<Req>,
    S::Error: Into<Error>,
{
    type Response = S::Response;
    type Error = Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        match self.limit.try_acquire() {
            Some(permit) => ResponseFuture::Inner {
                inner: self.inner.call(req),
                permit: Some(permit),
            },
            None => ResponseFuture::Shed,
        }
    }
}

// === impl ResponseFuture ===

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: Into<Error>,
{
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Inner { inner, permit } => {
                let res = ready!(inner.poll(cx));
                let permit = permit.take().expect("permit held until completion");
                match res {
                    Ok(rsp) => {
                        // Only successful calls sample the round trip; fast
                        // failures would drag the baseline down.
                        permit.complete();
                        Poll::Ready(Ok(rsp))
                    }
                    Err(e) => {
                        drop(permit);
                        Poll::Ready(Err(e.into()))
                    }
                }
            }
            ResponseFutureProj::Shed => Poll::Ready(Err(ShedError(()).into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};
    use tower::{util::service_fn, Service, ServiceExt};
    use weft_policy::LimitPolicy;

    fn limit(initial: u32) -> GradientLimit {
        GradientLimit::new(LimitPolicy {
            initial,
            min: 1,
            max: 10,
            tolerance: 2.0,
        })
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sheds_when_full_and_admits_after_drop() {
        let limit = limit(1);
        let mut svc = tower::ServiceBuilder::new()
            .layer(Layer::new(limit.clone()))
            .service(service_fn(|()| futures::future::pending::<Result<(), Error>>()));

        svc.ready().await.expect("ready");
        let held = task::spawn(svc.call(()));

        // The slot is taken; the next call sheds instead of waiting.
        svc.ready().await.expect("ready");
        let mut shed = task::spawn(svc.call(()));
        let err = assert_ready_err!(shed.poll());
        assert!(err.is::<ShedError>(), "unexpected error: {err}");

        // Dropping the in-flight call frees the slot for the next request.
        drop(held);
        assert_eq!(limit.in_flight(), 0);
        svc.ready().await.expect("ready");
        let mut admitted = task::spawn(svc.call(()));
        assert_pending!(admitted.poll());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn releases_on_completion() {
        let limit = limit(1);
        let mut svc = tower::ServiceBuilder::new()
            .layer(Layer::new(limit.clone()))
            .service(service_fn(|()| futures::future::ok::<_, Error>("hi")));

        svc.ready().await.expect("ready");
        let mut call = task::spawn(svc.call(()));
        assert_ready_ok!(call.poll());
        assert_eq!(limit.in_flight(), 0);
    }
}
