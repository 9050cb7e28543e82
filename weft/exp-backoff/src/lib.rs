#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

use pin_project::pin_project;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    future::Future,
    ops::Mul,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time;

/// A jittered exponential backoff strategy.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ExponentialBackoff {
    /// The minimum amount of time to wait before resuming an operation.
    min: Duration,

    /// The maximum amount of time to wait before resuming an operation.
    max: Duration,

    /// The ratio of the base timeout that may be randomly added to a backoff.
    ///
    /// Must be greater than or equal to 0.0.
    jitter: f64,
}

/// A jittered exponential backoff stream.
#[pin_project]
#[derive(Debug)]
pub struct ExponentialBackoffStream {
    backoff: ExponentialBackoff,
    rng: SmallRng,
    iterations: u32,
    #[pin]
    sleeping: Option<time::Sleep>,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid backoff: {0}")]
pub struct InvalidBackoff(&'static str);

// === impl ExponentialBackoff ===

impl ExponentialBackoff {
    pub fn try_new(min: Duration, max: Duration, jitter: f64) -> Result<Self, InvalidBackoff> {
        if min > max {
            return Err(InvalidBackoff("maximum must not be less than minimum"));
        }
        if max == Duration::ZERO {
            return Err(InvalidBackoff("maximum must be non-zero"));
        }
        if jitter < 0.0 {
            return Err(InvalidBackoff("jitter must not be negative"));
        }
        if jitter > 100.0 {
            return Err(InvalidBackoff("jitter must not be greater than 100"));
        }
        if !jitter.is_finite() {
            return Err(InvalidBackoff("jitter must be finite"));
        }

        Ok(ExponentialBackoff { min, max, jitter })
    }

    /// Builds a backoff without validating the parameters, for use in
    /// constant defaults.
    pub const fn new_unchecked(min: Duration, max: Duration, jitter: f64) -> Self {
        Self { min, max, jitter }
    }

    pub fn stream(&self) -> ExponentialBackoffStream {
        ExponentialBackoffStream {
            backoff: *self,
            rng: SmallRng::from_entropy(),
            iterations: 0,
            sleeping: None,
        }
    }

    fn base(&self, iterations: u32) -> Duration {
        debug_assert!(
            self.min <= self.max,
            "maximum backoff must not be less than minimum backoff"
        );
        debug_assert!(
            self.max > Duration::ZERO,
            "Maximum backoff must be non-zero"
        );
        self.min.mul(2_u32.saturating_pow(iterations)).min(self.max)
    }

    /// Returns a random, uniform duration on `[0, base*self.jitter]` no
    /// greater than `self.max`.
    fn jitter<R: Rng>(&self, base: Duration, rng: &mut R) -> Duration {
        if self.jitter <= 0.0 {
            Duration::ZERO
        } else {
            let jitter_factor = rng.gen::<f64>();
            debug_assert!(
                jitter_factor > 0.0,
                "rng returns values between 0.0 and 1.0"
            );
            let rand_jitter = jitter_factor * self.jitter;
            let secs = (base.as_secs() as f64) * rand_jitter;
            let nanos = (base.subsec_nanos() as f64) * rand_jitter;
            let remaining = self.max.saturating_sub(base);
            Duration::new(secs as u64, nanos as u32).min(remaining)
        }
    }
}

// === impl ExponentialBackoffStream ===

impl futures::Stream for ExponentialBackoffStream {
    type Item = ();

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<()>> {
        let mut this = self.project();
        loop {
            // If there's an active delay, wait until it's done and then
            // update the state.
            if let Some(sleep) = this.sleeping.as_mut().as_pin_mut() {
                futures::ready!(sleep.poll(cx));

                this.sleeping.set(None);
                *this.iterations += 1;
                return Poll::Ready(Some(()));
            }
            if *this.iterations == u32::MAX {
                return Poll::Ready(None);
            }

            let time = {
                let base = this.backoff.base(*this.iterations);
                base + this.backoff.jitter(base, this.rng)
            };
            this.sleeping.set(Some(time::sleep(time)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::*;

    quickcheck! {
        fn backoff_base_first(min_ms: u64, max_ms: u64) -> TestResult {
            let min = Duration::from_millis(min_ms);
            let max = Duration::from_millis(max_ms);
            let backoff = match ExponentialBackoff::try_new(min, max, 0.0) {
                Err(_) => return TestResult::discard(),
                Ok(backoff) => backoff,
            };
            let delay = backoff.base(0);
            TestResult::from_bool(min == delay)
        }

        fn backoff_base(min_ms: u64, max_ms: u64, iterations: u32) -> TestResult {
            let min = Duration::from_millis(min_ms);
            let max = Duration::from_millis(max_ms);
            let backoff = match ExponentialBackoff::try_new(min, max, 0.0) {
                Err(_) => return TestResult::discard(),
                Ok(backoff) => backoff,
            };
            let delay = backoff.base(iterations);
            TestResult::from_bool(min <= delay && delay <= max)
        }

        fn backoff_jitter(base_ms: u64, max_ms: u64, jitter: f64) -> TestResult {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(max_ms);
            let backoff = match ExponentialBackoff::try_new(base, max, jitter) {
                Err(_) => return TestResult::discard(),
                Ok(backoff) => backoff,
            };

            let j = backoff.jitter(base, &mut rand::thread_rng());
            if jitter == 0.0 || base_ms == 0 || max_ms == base_ms {
                TestResult::from_bool(j == Duration::ZERO)
            } else {
                TestResult::from_bool(j > Duration::ZERO)
            }
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stream_doubles_until_max() {
        use futures::StreamExt;

        let backoff = ExponentialBackoff::try_new(
            Duration::from_millis(100),
            Duration::from_millis(400),
            0.0,
        )
        .unwrap();
        let stream = backoff.stream();
        futures::pin_mut!(stream);

        let t0 = time::Instant::now();
        stream.next().await;
        assert_eq!(time::Instant::now() - t0, Duration::from_millis(100));

        let t1 = time::Instant::now();
        stream.next().await;
        assert_eq!(time::Instant::now() - t1, Duration::from_millis(200));

        let t2 = time::Instant::now();
        stream.next().await;
        assert_eq!(time::Instant::now() - t2, Duration::from_millis(400));

        // Capped at the maximum thereafter.
        let t3 = time::Instant::now();
        stream.next().await;
        assert_eq!(time::Instant::now() - t3, Duration::from_millis(400));
    }
}
