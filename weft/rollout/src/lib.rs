//! Replica-ratio rollouts.
//!
//! A workload enters the mesh without a flag day: two instance groups share
//! one service identity, so callers reach both through the same discovery
//! name and cannot tell them apart. Traffic therefore divides by replica
//! count alone, and a rollout is nothing more than a schedule of replica
//! rebalances between the groups. Rolling back is the same walk with the
//! percentages reversed; there is no separate rollback mechanism.
//!
//! The [`canary`] module covers the code-rollout variant, where the split is
//! expressed as route weights in the workload's intent rather than replica
//! counts.

#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

pub mod canary;

pub use self::canary::CanarySpec;

use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info};
use weft_error::Error;

/// Where a workload stands on its way into the mesh.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RolloutState {
    /// No instance runs behind a proxy.
    Unmeshed,
    /// Both groups serve; the meshed group holds `percent` of the replicas.
    PartiallyMeshed { percent: u8 },
    /// Every instance runs behind a proxy.
    FullyMeshed,
}

/// One scalable instance group: `replicas` instances registered under
/// `service`, distinguishable from a sibling group only by `group` name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupSpec {
    pub service: String,
    pub group: String,
    pub replicas: u32,
}

/// The deployment-system seam: drives one instance group to a replica count.
///
/// Implemented for any `FnMut(GroupSpec) -> Future` so tests and small
/// integrations can pass a closure.
pub trait Orchestrator {
    type Error: Into<Error>;
    type Future: Future<Output = Result<(), Self::Error>>;

    fn scale(&mut self, group: GroupSpec) -> Self::Future;
}

/// The schedule a rollout follows: target percentages applied in order with
/// a hold between steps. Steps may move in either direction; a rollback plan
/// is just a plan whose steps descend.
#[derive(Clone, Debug)]
pub struct RolloutPlan {
    steps: Vec<u8>,
    step_interval: Duration,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum InvalidPlan {
    #[error("a rollout plan needs at least one step")]
    Empty,

    #[error("step {0} exceeds 100 percent")]
    OutOfRange(u8),
}

/// Drives one workload's rollout by rebalancing replicas between its
/// original group and its variant (meshed or canary) group.
#[derive(Debug)]
pub struct Rollout<O> {
    orchestrator: O,
    service: String,
    original: String,
    variant: String,
    total: u32,
    percent: u8,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum InvalidPair {
    #[error("groups `{0}` and `{1}` serve different identities")]
    ServiceMismatch(String, String),

    #[error("group pair has no replicas")]
    Empty,
}

/// Splits a fleet so the variant group holds `percent` of `total` replicas.
///
/// Rounds to the nearest replica, except that a percentage strictly between
/// 0 and 100 never empties either group: a 1% step on a ten-replica fleet
/// still places one live variant instance, and its mirror keeps one original
/// until the walk actually completes. When the fleet is too small to honor
/// both floors the original group keeps its instance.
pub fn split_replicas(total: u32, percent: u8) -> (u32, u32) {
    debug_assert!(percent <= 100);
    if total == 0 {
        return (0, 0);
    }
    let total = u64::from(total);
    let variant = match (total * u64::from(percent) + 50) / 100 {
        0 if percent > 0 => 1,
        n if n >= total && percent < 100 => total - 1,
        n => n.min(total),
    } as u32;
    (total as u32 - variant, variant)
}

// === impl RolloutState ===

impl RolloutState {
    /// The state implied by the variant group's replica share.
    pub fn of(percent: u8) -> Self {
        match percent {
            0 => Self::Unmeshed,
            100 => Self::FullyMeshed,
            percent => Self::PartiallyMeshed { percent },
        }
    }
}

// === impl Orchestrator ===

impl<F, Fut, E> Orchestrator for F
where
    F: FnMut(GroupSpec) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<Error>,
{
    type Error = E;
    type Future = Fut;

    fn scale(&mut self, group: GroupSpec) -> Self::Future {
        (self)(group)
    }
}

// === impl RolloutPlan ===

impl RolloutPlan {
    pub fn new(steps: Vec<u8>, step_interval: Duration) -> Result<Self, InvalidPlan> {
        if steps.is_empty() {
            return Err(InvalidPlan::Empty);
        }
        if let Some(&step) = steps.iter().find(|s| **s > 100) {
            return Err(InvalidPlan::OutOfRange(step));
        }
        Ok(Self {
            steps,
            step_interval,
        })
    }

    pub fn steps(&self) -> &[u8] {
        &self.steps
    }

    pub fn step_interval(&self) -> Duration {
        self.step_interval
    }
}

// === impl Rollout ===

impl<O: Orchestrator> Rollout<O> {
    /// Builds a rollout over a pair of groups observed in their current
    /// state. The starting percentage reflects the live split, so a
    /// restarted controller resumes from wherever the fleet actually is.
    pub fn new(
        orchestrator: O,
        original: GroupSpec,
        variant: GroupSpec,
    ) -> Result<Self, InvalidPair> {
        if original.service != variant.service {
            return Err(InvalidPair::ServiceMismatch(original.group, variant.group));
        }
        let total = original.replicas + variant.replicas;
        if total == 0 {
            return Err(InvalidPair::Empty);
        }
        let percent =
            ((u64::from(variant.replicas) * 100 + u64::from(total) / 2) / u64::from(total)) as u8;
        Ok(Self {
            orchestrator,
            service: original.service,
            original: original.group,
            variant: variant.group,
            total,
            percent,
        })
    }

    pub fn state(&self) -> RolloutState {
        RolloutState::of(self.percent)
    }

    /// Rebalances the pair so the variant group holds `percent` of the
    /// replicas. The growing group always scales first, so aggregate
    /// capacity never dips below the fleet total mid-step.
    pub async fn advance(&mut self, percent: u8) -> Result<RolloutState, Error> {
        let (original, variant) = split_replicas(self.total, percent);
        debug!(service = %self.service, original, variant, "Rebalancing");
        if percent >= self.percent {
            self.scale_variant(variant).await?;
            self.scale_original(original).await?;
        } else {
            self.scale_original(original).await?;
            self.scale_variant(variant).await?;
        }
        self.percent = percent;
        let state = self.state();
        info!(service = %self.service, percent, ?state, "Rollout advanced");
        Ok(state)
    }

    /// Walks a plan step by step, holding `step_interval` between steps.
    ///
    /// An orchestrator failure aborts the walk with the fleet at the last
    /// completed step; a reversed plan walks it back through the same code.
    pub async fn run(&mut self, plan: &RolloutPlan) -> Result<RolloutState, Error> {
        let mut steps = plan.steps().iter();
        if let Some(&step) = steps.next() {
            self.advance(step).await?;
        }
        for &step in steps {
            time::sleep(plan.step_interval()).await;
            self.advance(step).await?;
        }
        Ok(self.state())
    }

    async fn scale_original(&mut self, replicas: u32) -> Result<(), Error> {
        let group = GroupSpec {
            service: self.service.clone(),
            group: self.original.clone(),
            replicas,
        };
        self.orchestrator.scale(group).await.map_err(Into::into)
    }

    async fn scale_variant(&mut self, replicas: u32) -> Result<(), Error> {
        let group = GroupSpec {
            service: self.service.clone(),
            group: self.variant.clone(),
            replicas,
        };
        self.orchestrator.scale(group).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::future;
    use std::sync::Arc;

    fn pair(original: u32, variant: u32) -> (GroupSpec, GroupSpec) {
        (
            GroupSpec {
                service: "billing.svc".into(),
                group: "billing".into(),
                replicas: original,
            },
            GroupSpec {
                service: "billing.svc".into(),
                group: "billing-meshed".into(),
                replicas: variant,
            },
        )
    }

    /// Records every scale call and tracks the implied live fleet.
    fn recorder(
        original: u32,
        variant: u32,
    ) -> (
        impl FnMut(GroupSpec) -> future::Ready<Result<(), Error>>,
        Arc<Mutex<Vec<(String, u32)>>>,
        Arc<Mutex<u32>>,
    ) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let min_total = Arc::new(Mutex::new(original + variant));
        let counts = Mutex::new((original, variant));
        let fake = {
            let calls = calls.clone();
            let min_total = min_total.clone();
            move |group: GroupSpec| {
                calls.lock().push((group.group.clone(), group.replicas));
                let mut counts = counts.lock();
                if group.group.ends_with("-meshed") {
                    counts.1 = group.replicas;
                } else {
                    counts.0 = group.replicas;
                }
                let total = counts.0 + counts.1;
                let mut min = min_total.lock();
                *min = (*min).min(total);
                future::ready(Ok(()))
            }
        };
        (fake, calls, min_total)
    }

    #[test]
    fn split_rounds_to_the_nearest_replica() {
        assert_eq!(split_replicas(10, 0), (10, 0));
        assert_eq!(split_replicas(10, 50), (5, 5));
        assert_eq!(split_replicas(10, 100), (0, 10));
        assert_eq!(split_replicas(3, 33), (2, 1));
        assert_eq!(split_replicas(3, 50), (1, 2));
        assert_eq!(split_replicas(0, 50), (0, 0));
    }

    #[test]
    fn split_never_empties_a_group_mid_walk() {
        // 1% of ten rounds to zero replicas; the floor still places one.
        assert_eq!(split_replicas(10, 1), (9, 1));
        // 99% rounds to all ten; the mirror keeps one original.
        assert_eq!(split_replicas(10, 99), (1, 9));
        // A one-replica fleet cannot honor both floors; the original wins.
        assert_eq!(split_replicas(1, 50), (1, 0));
    }

    #[test]
    fn state_follows_the_percentage() {
        assert_eq!(RolloutState::of(0), RolloutState::Unmeshed);
        assert_eq!(
            RolloutState::of(37),
            RolloutState::PartiallyMeshed { percent: 37 }
        );
        assert_eq!(RolloutState::of(100), RolloutState::FullyMeshed);
    }

    #[test]
    fn plans_are_validated() {
        assert_eq!(
            RolloutPlan::new(Vec::new(), Duration::from_secs(60)).unwrap_err(),
            InvalidPlan::Empty,
        );
        assert_eq!(
            RolloutPlan::new(vec![10, 101], Duration::from_secs(60)).unwrap_err(),
            InvalidPlan::OutOfRange(101),
        );
    }

    #[test]
    fn pairs_must_share_an_identity() {
        let (original, mut variant) = pair(10, 0);
        variant.service = "other.svc".into();
        let err = Rollout::new(
            |_: GroupSpec| future::ready(Ok::<(), Error>(())),
            original,
            variant,
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            InvalidPair::ServiceMismatch("billing".into(), "billing-meshed".into()),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn walking_a_plan_tracks_the_replica_ratio() {
        let (fake, calls, min_total) = recorder(10, 0);
        let (original, variant) = pair(10, 0);
        let mut rollout = Rollout::new(fake, original, variant).unwrap();
        assert_eq!(rollout.state(), RolloutState::Unmeshed);

        let plan = RolloutPlan::new(vec![10, 50, 100], Duration::from_secs(60)).unwrap();
        let state = rollout.run(&plan).await.unwrap();
        assert_eq!(state, RolloutState::FullyMeshed);

        // Growing group scales first at every step, and the counts at each
        // step match the declared percentage of the ten-replica fleet.
        assert_eq!(
            *calls.lock(),
            vec![
                ("billing-meshed".to_string(), 1),
                ("billing".to_string(), 9),
                ("billing-meshed".to_string(), 5),
                ("billing".to_string(), 5),
                ("billing-meshed".to_string(), 10),
                ("billing".to_string(), 0),
            ],
        );
        // Aggregate capacity never dipped below the fleet total.
        assert_eq!(*min_total.lock(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_is_the_same_walk_reversed() {
        let (fake, calls, min_total) = recorder(0, 10);
        let (original, variant) = pair(0, 10);
        let mut rollout = Rollout::new(fake, original, variant).unwrap();
        assert_eq!(rollout.state(), RolloutState::FullyMeshed);

        let plan = RolloutPlan::new(vec![50, 0], Duration::from_secs(60)).unwrap();
        let state = rollout.run(&plan).await.unwrap();
        assert_eq!(state, RolloutState::Unmeshed);

        // Shrinking the variant grows the original first.
        assert_eq!(
            *calls.lock(),
            vec![
                ("billing".to_string(), 5),
                ("billing-meshed".to_string(), 5),
                ("billing".to_string(), 10),
                ("billing-meshed".to_string(), 0),
            ],
        );
        assert_eq!(*min_total.lock(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn an_orchestrator_failure_stops_the_walk() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fake = {
            let calls = calls.clone();
            move |group: GroupSpec| {
                let fail = group.group == "billing" && group.replicas == 5;
                calls.lock().push((group.group, group.replicas));
                future::ready(if fail {
                    Err(Error::from("orchestrator unavailable"))
                } else {
                    Ok(())
                })
            }
        };
        let (original, variant) = pair(10, 0);
        let mut rollout = Rollout::new(fake, original, variant).unwrap();

        let plan = RolloutPlan::new(vec![10, 50, 100], Duration::from_secs(60)).unwrap();
        rollout.run(&plan).await.unwrap_err();

        // The walk stopped mid-step; the recorded state is the last step
        // that completed in full.
        assert_eq!(rollout.state(), RolloutState::PartiallyMeshed { percent: 10 });
        assert_eq!(
            *calls.lock(),
            vec![
                ("billing-meshed".to_string(), 1),
                ("billing".to_string(), 9),
                ("billing-meshed".to_string(), 5),
                ("billing".to_string(), 5),
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn a_resumed_rollout_starts_from_the_live_split() {
        let (fake, calls, _) = recorder(5, 5);
        let (original, variant) = pair(5, 5);
        let mut rollout = Rollout::new(fake, original, variant).unwrap();
        assert_eq!(rollout.state(), RolloutState::PartiallyMeshed { percent: 50 });

        let plan = RolloutPlan::new(vec![100], Duration::from_secs(60)).unwrap();
        rollout.run(&plan).await.unwrap();
        assert_eq!(rollout.state(), RolloutState::FullyMeshed);
        assert_eq!(
            *calls.lock(),
            vec![
                ("billing-meshed".to_string(), 10),
                ("billing".to_string(), 0),
            ],
        );
    }
}
