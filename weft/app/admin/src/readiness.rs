use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared flag flipped once the proxy is serving meshed traffic.
///
/// Probes read it through the admin server's `/ready` endpoint; the app sets
/// it after the listeners are bound and the initial configuration applied.
#[derive(Clone, Debug)]
pub struct Readiness(Arc<AtomicBool>);

// === impl Readiness ===

impl Readiness {
    pub fn new(init: bool) -> Readiness {
        Readiness(Arc::new(init.into()))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release)
    }
}
