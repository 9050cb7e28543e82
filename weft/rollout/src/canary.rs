//! Canary traffic splitting.
//!
//! A code canary shifts traffic rather than replicas: the stable and canary
//! builds register under distinct clusters, and the workload's intent
//! carries a weighted split between them. [`CanarySpec::apply`] rewrites one
//! route to the requested split and installs (or clears) the header override
//! that force-routes tagged requests to the canary, so live testing against
//! the new build costs untagged traffic nothing. Rolling back is `percent`
//! zero with no override: the same rewrite that rolled forward, returning
//! the whole weight to the stable cluster.

use weft_policy::intent::{BackendSpec, HeaderOverrideSpec, Intent};

/// One canary split: which route shifts, between which clusters, and how far.
#[derive(Clone, Debug)]
pub struct CanarySpec {
    /// The route whose backends are rewritten.
    pub route: String,
    /// The cluster serving the stable build.
    pub stable: String,
    /// The cluster serving the canary build.
    pub canary: String,
    /// Share of untagged traffic steered to the canary, `0..=100`.
    pub percent: u8,
    /// Header name and value that force-route a request to the canary
    /// regardless of the split.
    pub header: Option<(String, String)>,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum InvalidCanary {
    #[error("intent has no route `{0}`")]
    UnknownRoute(String),

    #[error("intent has no cluster `{0}`")]
    UnknownCluster(String),

    #[error("canary percent {0} exceeds 100")]
    OutOfRange(u8),
}

// === impl CanarySpec ===

impl CanarySpec {
    /// Rewrites `intent` so the named route splits its weight between the
    /// stable and canary clusters.
    ///
    /// Zero-weight backends are dropped rather than carried, so at zero
    /// percent the route names only the stable cluster again. Only the
    /// clusters the rewrite actually references must exist in the intent;
    /// rolling back does not demand a canary cluster that may already be
    /// gone.
    pub fn apply(&self, intent: &Intent) -> Result<Intent, InvalidCanary> {
        if self.percent > 100 {
            return Err(InvalidCanary::OutOfRange(self.percent));
        }

        let backends = self.backends();
        let header_override = self.header.as_ref().map(|(header, value)| HeaderOverrideSpec {
            header: header.clone(),
            value: value.clone(),
            cluster: self.canary.clone(),
        });

        let referenced = backends
            .iter()
            .map(|b| &b.cluster)
            .chain(header_override.iter().map(|o| &o.cluster));
        for cluster in referenced {
            if !intent.clusters.iter().any(|c| &c.name == cluster) {
                return Err(InvalidCanary::UnknownCluster(cluster.clone()));
            }
        }

        let mut intent = intent.clone();
        let route = intent
            .routes
            .iter_mut()
            .find(|r| r.name == self.route)
            .ok_or_else(|| InvalidCanary::UnknownRoute(self.route.clone()))?;
        route.backends = backends;
        route.header_override = header_override;
        Ok(intent)
    }

    fn backends(&self) -> Vec<BackendSpec> {
        let mut backends = Vec::with_capacity(2);
        if self.percent < 100 {
            backends.push(BackendSpec {
                cluster: self.stable.clone(),
                weight: u32::from(100 - self.percent),
            });
        }
        if self.percent > 0 {
            backends.push(BackendSpec {
                cluster: self.canary.clone(),
                weight: u32::from(self.percent),
            });
        }
        backends
    }
}
