//! Tracing initialization.

use std::fmt;
use tokio::time::Instant;
use tracing::Dispatch;
use tracing_subscriber::{
    fmt::{format, time::FormatTime},
    prelude::*,
    registry::LookupSpan,
    EnvFilter, Layer,
};
use weft_error::Error;

pub use tracing::Subscriber;

pub const ENV_LOG_LEVEL: &str = "WEFT_PROXY_LOG";
pub const ENV_LOG_FORMAT: &str = "WEFT_PROXY_LOG_FORMAT";

const DEFAULT_LOG_LEVEL: &str = "warn,weft=info";
const DEFAULT_LOG_FORMAT: &str = "PLAIN";

#[derive(Debug)]
#[must_use]
pub struct Settings {
    filter: String,
    format: String,
    start_time: Option<Instant>,
    is_test: bool,
}

/// Stamps events with the time elapsed since process startup.
#[derive(Copy, Clone, Debug)]
struct Uptime {
    start_time: Instant,
}

pub fn init_log_compat() -> Result<(), Error> {
    tracing_log::LogTracer::init()?;
    Ok(())
}

// === impl Settings ===

impl Settings {
    pub fn from_env(start_time: Instant) -> Self {
        Self {
            filter: std::env::var(ENV_LOG_LEVEL)
                .ok()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            format: std::env::var(ENV_LOG_FORMAT)
                .ok()
                .unwrap_or_else(|| DEFAULT_LOG_FORMAT.to_string()),
            start_time: Some(start_time),
            is_test: false,
        }
    }

    fn for_test(filter: String, format: String) -> Self {
        Self {
            filter,
            format,
            start_time: None,
            is_test: true,
        }
    }

    fn timer(&self) -> Uptime {
        self.start_time
            .map(Uptime::starting_at)
            .unwrap_or_else(Uptime::starting_now)
    }

    fn mk_json<S>(&self) -> Box<dyn Layer<S> + Send + Sync + 'static>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
        S: Send + Sync,
    {
        let fmt = tracing_subscriber::fmt::format()
            .with_timer(self.timer())
            .with_thread_ids(!self.is_test)
            .json()
            // Output the current span context as a JSON list rather than
            // duplicating it in a current-span field.
            .with_span_list(true)
            .with_current_span(false);

        let fmt = tracing_subscriber::fmt::layer()
            .event_format(fmt)
            .fmt_fields(format::JsonFields::default());

        if self.is_test {
            Box::new(fmt.with_test_writer())
        } else {
            Box::new(fmt)
        }
    }

    fn mk_plain<S>(&self) -> Box<dyn Layer<S> + Send + Sync + 'static>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
        S: Send + Sync,
    {
        let fmt = tracing_subscriber::fmt::format()
            .with_timer(self.timer())
            .with_thread_ids(!self.is_test);
        let fmt = tracing_subscriber::fmt::layer().event_format(fmt);
        if self.is_test {
            Box::new(fmt.with_test_writer())
        } else {
            Box::new(fmt)
        }
    }

    /// Initialize tracing and logging with the value of the `WEFT_PROXY_LOG`
    /// environment variable as the verbosity-level filter.
    pub fn init(self) -> Result<(), Error> {
        if self.filter.trim().eq_ignore_ascii_case("off") {
            return Ok(());
        }

        let dispatch = self.build();
        tracing::dispatcher::set_global_default(dispatch)?;
        init_log_compat()?;
        Ok(())
    }

    pub fn build(self) -> Dispatch {
        let stdout = if self.format.eq_ignore_ascii_case("json") {
            self.mk_json()
        } else {
            self.mk_plain()
        };

        let filter = EnvFilter::new(&self.filter);
        tracing_subscriber::registry()
            .with(stdout.with_filter(filter))
            .into()
    }
}

// === impl Uptime ===

impl Uptime {
    fn starting_at(start_time: Instant) -> Self {
        Self { start_time }
    }

    fn starting_now() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl FormatTime for Uptime {
    fn format_time(&self, w: &mut format::Writer<'_>) -> fmt::Result {
        let elapsed = self.start_time.elapsed();
        write!(w, "[{:>6}.{:06}s]", elapsed.as_secs(), elapsed.subsec_micros())
    }
}

pub mod test {
    use super::*;

    /// By default, disable logging in modules that are expected to error in
    /// tests.
    pub const DEFAULT_LOG: &str = "warn,weft=debug";

    pub fn trace_subscriber(default: impl ToString) -> Dispatch {
        let log_level = std::env::var(ENV_LOG_LEVEL)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| default.to_string());
        // This may fail, since the global log compat layer may have been
        // initialized by another test.
        let _ = init_log_compat();
        Settings::for_test(log_level, "".into()).build()
    }

    pub fn with_default_filter(default: impl ToString) -> tracing::dispatcher::DefaultGuard {
        tracing::dispatcher::set_default(&trace_subscriber(default))
    }

    pub fn trace_init() -> tracing::dispatcher::DefaultGuard {
        with_default_filter(DEFAULT_LOG)
    }
}
