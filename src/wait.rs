//! Convergence waits
//!
//! Every wait in the engine goes through [`poll_until`]: probe, classify as
//! satisfied or pending, sleep, repeat until the deadline. API errors abort a
//! wait immediately; only the timeout ends one otherwise.
//!
//! ```text
//! Polling ──▶ Satisfied
//!    │
//!    ├─────▶ TimedOut   (deadline elapsed, last pending observation kept)
//!    └─────▶ Failed     (provider error, propagated verbatim)
//! ```

use std::collections::HashMap;
use std::ops::AsyncFnMut;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::api::{AsgApi, AttachmentPage, ObservedGroup};
use crate::error::{AsgError, Result};
use crate::spec::GroupSpec;

/// Default spacing between convergence probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// One probe observation
#[derive(Debug)]
pub enum Probe<T, P> {
    /// The target condition holds
    Satisfied(T),
    /// Not yet; carries the pending observation for diagnostics
    Pending(P),
}

/// Terminal state of a wait
#[derive(Debug)]
pub enum WaitOutcome<T, P> {
    /// The condition held before the deadline
    Satisfied(T),
    /// The deadline elapsed; carries the last pending observation
    TimedOut(P),
}

/// Poll `probe` every `interval` until it reports satisfied or `timeout`
/// elapses. A zero timeout performs exactly one probe. Errors from the probe
/// abort the wait immediately.
pub async fn poll_until<T, P, F>(
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<WaitOutcome<T, P>>
where
    F: AsyncFnMut() -> Result<Probe<T, P>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        match probe().await? {
            Probe::Satisfied(value) => return Ok(WaitOutcome::Satisfied(value)),
            Probe::Pending(pending) => {
                if Instant::now() >= deadline {
                    return Ok(WaitOutcome::TimedOut(pending));
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Which lifecycle phase a capacity wait serves; the two sites use different
/// ELB thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacitySite {
    /// Immediately after group creation
    Create,
    /// After a min/desired capacity change
    Update,
}

/// Healthy-instance thresholds a capacity wait must reach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityTarget {
    /// Instances that must be healthy at the group level
    pub want_asg: i32,
    /// Instances that must additionally be healthy in every attached load
    /// balancer and target group
    pub want_elb: i32,
}

impl CapacityTarget {
    /// Thresholds for the given wait site
    pub fn for_site(spec: &GroupSpec, site: CapacitySite) -> Self {
        let want_asg = spec.desired_capacity.unwrap_or(spec.min_size);
        let want_elb = match site {
            CapacitySite::Create => spec
                .wait_for_elb_capacity
                .or(spec.min_elb_capacity)
                .unwrap_or(0),
            CapacitySite::Update => spec.wait_for_elb_capacity.unwrap_or(0),
        };
        Self { want_asg, want_elb }
    }

    /// `None` when satisfied, else the unmet condition spelled out
    pub fn unmet_reason(&self, have_asg: i32, have_elb: i32) -> Option<String> {
        if have_asg < self.want_asg {
            return Some(format!(
                "need at least {} healthy instances in the group, have {have_asg}",
                self.want_asg
            ));
        }
        if have_elb < self.want_elb {
            return Some(format!(
                "need at least {} instances healthy in all attached load balancers, have {have_elb}",
                self.want_elb
            ));
        }
        None
    }
}

/// Count instances healthy at the group level and, of those, the number
/// healthy in every attached load balancer and target group.
fn count_healthy(
    group: &ObservedGroup,
    elb_states: &HashMap<String, HashMap<String, String>>,
    target_states: &HashMap<String, HashMap<String, String>>,
) -> (i32, i32) {
    let mut have_asg = 0;
    let mut have_elb = 0;

    for instance in &group.instances {
        if !instance.is_healthy_in_group() {
            continue;
        }
        have_asg += 1;

        let in_all_elbs = group.load_balancer_names.iter().all(|lb| {
            elb_states
                .get(lb)
                .and_then(|states| states.get(&instance.instance_id))
                .is_some_and(|state| state == "InService")
        });
        let in_all_targets = group.target_group_arns.iter().all(|tg| {
            target_states
                .get(tg)
                .and_then(|states| states.get(&instance.instance_id))
                .is_some_and(|state| state == "healthy")
        });

        if in_all_elbs && in_all_targets {
            have_elb += 1;
        }
    }

    (have_asg, have_elb)
}

/// Block until the group's healthy-instance counts reach `target`.
///
/// A zero timeout disables the wait entirely (the caller opted out of
/// convergence checking). Timing out surfaces the unmet condition.
pub async fn wait_for_capacity<A: AsgApi>(
    api: &A,
    group_name: &str,
    target: CapacityTarget,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    if timeout.is_zero() {
        debug!(group = %group_name, "capacity wait disabled, skipping");
        return Ok(());
    }

    info!(
        group = %group_name,
        want_asg = target.want_asg,
        want_elb = target.want_elb,
        timeout_secs = timeout.as_secs(),
        "waiting for capacity"
    );

    let outcome = poll_until(timeout, interval, async || {
        let group = api
            .describe_group(group_name)
            .await
            .map_err(|e| AsgError::provider("describing Auto Scaling Group", group_name, e))?
            .ok_or_else(|| AsgError::CapacityTimeout {
                group: group_name.to_string(),
                reason: "group no longer exists".to_string(),
            })?;

        let mut elb_states = HashMap::new();
        for lb in &group.load_balancer_names {
            let states = api.elb_instance_health(lb).await.map_err(|e| {
                AsgError::provider("describing load balancer instance health", group_name, e)
            })?;
            elb_states.insert(lb.clone(), states);
        }

        let mut target_states = HashMap::new();
        for tg in &group.target_group_arns {
            let states = api
                .target_health(tg)
                .await
                .map_err(|e| AsgError::provider("describing target health", group_name, e))?;
            target_states.insert(tg.clone(), states);
        }

        let (have_asg, have_elb) = count_healthy(&group, &elb_states, &target_states);

        match target.unmet_reason(have_asg, have_elb) {
            None => Ok(Probe::Satisfied(())),
            Some(reason) => {
                debug!(group = %group_name, have_asg, have_elb, %reason, "capacity not yet satisfied");
                Ok(Probe::Pending(reason))
            }
        }
    })
    .await?;

    match outcome {
        WaitOutcome::Satisfied(()) => {
            info!(group = %group_name, "capacity satisfied");
            Ok(())
        }
        WaitOutcome::TimedOut(reason) => Err(AsgError::CapacityTimeout {
            group: group_name.to_string(),
            reason,
        }),
    }
}

/// Which attachment kind a wait inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// ELB Classic load balancers
    LoadBalancer,
    /// ELBv2 target groups
    TargetGroup,
}

impl AttachmentKind {
    fn describe(self) -> &'static str {
        match self {
            Self::LoadBalancer => "load balancers",
            Self::TargetGroup => "target groups",
        }
    }
}

/// Transitional state a wait drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentTransition {
    /// Waiting for "Adding" items to settle
    Adding,
    /// Waiting for "Removing" items to settle
    Removing,
}

impl AttachmentTransition {
    fn state(self) -> &'static str {
        match self {
            Self::Adding => "Adding",
            Self::Removing => "Removing",
        }
    }
}

/// Block until no attachment of the given kind is in the transitional state.
///
/// Pagination restarts from the first page whenever a transitional item is
/// seen, because later pages can go stale while earlier attachments settle.
/// The wait completes only on a full pass with zero transitional items and no
/// further pagination token. The loop is unbounded; an API error aborts it.
pub async fn wait_for_attachments_settled<A: AsgApi>(
    api: &A,
    group_name: &str,
    kind: AttachmentKind,
    transition: AttachmentTransition,
    interval: Duration,
) -> Result<()> {
    let transitional = transition.state();
    let mut token: Option<String> = None;

    debug!(
        group = %group_name,
        kind = kind.describe(),
        state = transitional,
        "waiting for attachments to settle"
    );

    loop {
        let fetched = match kind {
            AttachmentKind::LoadBalancer => {
                api.describe_load_balancers(group_name, token.clone()).await
            }
            AttachmentKind::TargetGroup => {
                api.describe_target_groups(group_name, token.clone()).await
            }
        };
        let page: AttachmentPage = fetched.map_err(|e| match kind {
            AttachmentKind::LoadBalancer => {
                AsgError::provider("describing load balancer attachment state", group_name, e)
            }
            AttachmentKind::TargetGroup => {
                AsgError::provider("describing target group attachment state", group_name, e)
            }
        })?;

        if page.items.iter().any(|item| item.state == transitional) {
            // Stale-page defense: restart the pass from the first page.
            token = None;
            tokio::time::sleep(interval).await;
            continue;
        }

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    debug!(group = %group_name, kind = kind.describe(), "attachments settled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ObservedInstance;

    #[tokio::test]
    async fn test_poll_until_satisfied() {
        let mut attempts = 0;
        let outcome = poll_until(Duration::from_secs(5), Duration::from_millis(1), async || {
            attempts += 1;
            if attempts >= 3 {
                Ok(Probe::Satisfied(attempts))
            } else {
                Ok(Probe::Pending(attempts))
            }
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WaitOutcome::Satisfied(3)));
    }

    #[tokio::test]
    async fn test_poll_until_times_out_with_last_observation() {
        let outcome = poll_until(
            Duration::from_millis(5),
            Duration::from_millis(1),
            async || Ok(Probe::<(), _>::Pending("still waiting")),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, WaitOutcome::TimedOut("still waiting")));
    }

    #[tokio::test]
    async fn test_poll_until_zero_timeout_probes_once() {
        let mut attempts = 0;
        let outcome = poll_until(Duration::ZERO, Duration::from_millis(1), async || {
            attempts += 1;
            Ok(Probe::<(), _>::Pending(attempts))
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WaitOutcome::TimedOut(1)));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_poll_until_error_aborts() {
        let result: Result<WaitOutcome<(), ()>> = poll_until(
            Duration::from_secs(5),
            Duration::from_millis(1),
            async || Err(AsgError::invalid_spec("boom")),
        )
        .await;

        assert!(result.is_err());
    }

    fn spec_with_capacity(min: i32, desired: Option<i32>) -> GroupSpec {
        GroupSpec::from_json(&format!(
            r#"{{"name": "web", "min_size": {min}, "max_size": 10, "launch_configuration": "lc"}}"#
        ))
        .map(|mut spec| {
            spec.desired_capacity = desired;
            spec
        })
        .unwrap()
    }

    #[test]
    fn test_capacity_target_create_site_prefers_wait_for_elb_capacity() {
        let mut spec = spec_with_capacity(2, Some(4));
        spec.min_elb_capacity = Some(1);
        spec.wait_for_elb_capacity = Some(3);

        let target = CapacityTarget::for_site(&spec, CapacitySite::Create);
        assert_eq!(target.want_asg, 4);
        assert_eq!(target.want_elb, 3);
    }

    #[test]
    fn test_capacity_target_update_site_ignores_min_elb_capacity() {
        let mut spec = spec_with_capacity(2, None);
        spec.min_elb_capacity = Some(1);

        let target = CapacityTarget::for_site(&spec, CapacitySite::Update);
        assert_eq!(target.want_asg, 2);
        assert_eq!(target.want_elb, 0);
    }

    #[test]
    fn test_unmet_reason_names_remaining_counts() {
        let target = CapacityTarget {
            want_asg: 3,
            want_elb: 2,
        };

        let reason = target.unmet_reason(1, 0).unwrap();
        assert!(reason.contains("at least 3"));
        assert!(reason.contains("have 1"));

        let reason = target.unmet_reason(3, 1).unwrap();
        assert!(reason.contains("load balancers"));

        assert!(target.unmet_reason(3, 2).is_none());
    }

    #[test]
    fn test_count_healthy_requires_health_in_every_attachment() {
        let group = ObservedGroup {
            load_balancer_names: vec!["lb-a".to_string(), "lb-b".to_string()],
            instances: vec![
                ObservedInstance {
                    instance_id: "i-1".to_string(),
                    health_status: "Healthy".to_string(),
                    lifecycle_state: "InService".to_string(),
                },
                ObservedInstance {
                    instance_id: "i-2".to_string(),
                    health_status: "Healthy".to_string(),
                    lifecycle_state: "InService".to_string(),
                },
            ],
            ..Default::default()
        };

        let mut elb_states = HashMap::new();
        elb_states.insert(
            "lb-a".to_string(),
            HashMap::from([
                ("i-1".to_string(), "InService".to_string()),
                ("i-2".to_string(), "InService".to_string()),
            ]),
        );
        // i-2 is still out of service behind the second balancer.
        elb_states.insert(
            "lb-b".to_string(),
            HashMap::from([
                ("i-1".to_string(), "InService".to_string()),
                ("i-2".to_string(), "OutOfService".to_string()),
            ]),
        );

        let (have_asg, have_elb) = count_healthy(&group, &elb_states, &HashMap::new());
        assert_eq!(have_asg, 2);
        assert_eq!(have_elb, 1);
    }
}
