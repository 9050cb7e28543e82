use prometheus_client::{encoding::text, registry::Registry};
use std::{fmt, sync::Arc};

/// Renders a shared registry in the OpenMetrics text format.
///
/// The admin server holds one of these; everything else holds the family
/// handles in [`crate::Metrics`].
#[derive(Clone, Debug)]
pub struct Serve {
    registry: Arc<Registry>,
}

// === impl Serve ===

impl Serve {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub const CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";

    pub fn encode(&self) -> Result<String, fmt::Error> {
        Self::encode_registry(&self.registry)
    }

    pub fn encode_registry(registry: &Registry) -> Result<String, fmt::Error> {
        let mut out = String::new();
        text::encode(&mut out, registry)?;
        Ok(out)
    }
}
