//! Lifecycle orchestration
//!
//! [`GroupManager`] sequences the full lifecycle of an Auto Scaling Group:
//! two-phase creation with lifecycle hooks, incremental updates, and
//! drain-before-delete teardown. It owns every retry and every wait; the
//! modules it calls into stay pure or single-purpose.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{AsgApi, ObservedGroup, UpdateGroupInput};
use crate::error::{AsgError, Result};
use crate::observe::{self, GroupState, split_vpc_zone_identifier};
use crate::reconcile::{
    reconcile_load_balancers, reconcile_metrics, reconcile_suspended_processes,
    reconcile_tags, reconcile_target_groups,
};
use crate::spec::GroupSpec;
use crate::tags::TagSet;
use crate::translate::{
    build_create_request, build_update_request, new_refresh_token, resolve_group_name,
};
use crate::wait::{
    self, CapacitySite, CapacityTarget, Probe, WaitOutcome, poll_until, wait_for_capacity,
};

/// How long creation retries through IAM eventual-consistency rejections.
/// The window for a freshly created instance profile to propagate is short;
/// after this bound one final attempt is made and its error surfaced as-is.
const IAM_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of converging a group on its desired state
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// The group's resolved name
    pub group: String,
    /// The group's ARN, when the post-apply read could fetch it
    pub arn: Option<String>,
    /// Present when dependent instances are stale and should be refreshed;
    /// a fresh opaque token per change
    pub instance_refresh_token: Option<String>,
}

/// Drives a group through creation, convergence, update, and deletion.
///
/// Holds the API handle and the polling cadence; per-group timeouts come from
/// each [`GroupSpec`].
pub struct GroupManager<A: AsgApi> {
    api: A,
    poll_interval: Duration,
}

impl<A: AsgApi> GroupManager<A> {
    /// Build a manager around an API handle with the default polling cadence
    pub fn new(api: A) -> Self {
        Self {
            api,
            poll_interval: wait::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the polling cadence (tests use a short one)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Converge the named group on `spec`: create it if absent, otherwise
    /// apply the incremental update path.
    pub async fn apply(&self, spec: &GroupSpec) -> Result<ApplyReport> {
        spec.validate()?;
        let name = resolve_group_name(spec);

        match self
            .api
            .describe_group(&name)
            .await
            .map_err(|e| AsgError::provider("describing Auto Scaling Group", &name, e))?
        {
            None => self.create(&name, spec).await,
            Some(observed) => self.update(&name, observed, spec).await,
        }
    }

    /// Create the group and wait for it to converge.
    ///
    /// With initial lifecycle hooks, creation is two-phase: the group is born
    /// pinned to zero capacity, hooks are registered, and only then do the
    /// real capacity bounds land. No instance can launch before its
    /// termination hooks exist.
    async fn create(&self, name: &str, spec: &GroupSpec) -> Result<ApplyReport> {
        let (create_input, deferred_capacity) = build_create_request(spec, name)?;

        info!(
            group = %name,
            two_phase = deferred_capacity.is_some(),
            "creating Auto Scaling Group"
        );
        self.create_with_iam_retry(name, &create_input).await?;

        for hook in &spec.initial_lifecycle_hooks {
            debug!(group = %name, hook = %hook.name, "registering lifecycle hook");
            self.api
                .put_lifecycle_hook(name, hook)
                .await
                .map_err(|e| AsgError::provider("PutLifecycleHook", name, e))?;
        }

        if let Some(update) = deferred_capacity {
            debug!(group = %name, "raising capacity after hook registration");
            self.api
                .update_group(&update)
                .await
                .map_err(|e| AsgError::provider("UpdateAutoScalingGroup", name, e))?;
        }

        wait_for_capacity(
            &self.api,
            name,
            CapacityTarget::for_site(spec, CapacitySite::Create),
            spec.capacity_wait_timeout()?,
            self.poll_interval,
        )
        .await?;

        if !spec.suspended_processes.is_empty() {
            let processes: Vec<String> = spec.suspended_processes.iter().cloned().collect();
            self.api
                .suspend_processes(name, &processes)
                .await
                .map_err(|e| AsgError::provider("SuspendProcesses", name, e))?;
        }

        if !spec.enabled_metrics.is_empty() {
            let metrics: Vec<String> = spec.enabled_metrics.iter().cloned().collect();
            self.api
                .enable_metrics(name, &metrics, &spec.metrics_granularity)
                .await
                .map_err(|e| AsgError::provider("EnableMetricsCollection", name, e))?;
        }

        let arn = self
            .api
            .describe_group(name)
            .await
            .map_err(|e| AsgError::provider("describing Auto Scaling Group", name, e))?
            .map(|g| g.arn);

        info!(group = %name, "Auto Scaling Group created");
        Ok(ApplyReport {
            group: name.to_string(),
            arn,
            instance_refresh_token: None,
        })
    }

    /// Creation call with the IAM eventual-consistency retry: a launch source
    /// naming a just-created instance profile is rejected with a validation
    /// error until the profile propagates. Such rejections are retried within
    /// a bounded window, then one final attempt is made outside it so the
    /// terminal error is the provider's, not a timeout.
    async fn create_with_iam_retry(
        &self,
        name: &str,
        input: &crate::api::CreateGroupInput,
    ) -> Result<()> {
        let outcome = poll_until(IAM_PROPAGATION_TIMEOUT, self.poll_interval, async || {
            match self.api.create_group(input).await {
                Ok(()) => Ok(Probe::Satisfied(())),
                Err(e) if e.is_iam_propagation() => {
                    warn!(group = %name, error = %e, "instance profile not yet propagated, retrying");
                    Ok(Probe::Pending(()))
                }
                Err(e) => Err(AsgError::provider("CreateAutoScalingGroup", name, e)),
            }
        })
        .await?;

        match outcome {
            WaitOutcome::Satisfied(()) => Ok(()),
            WaitOutcome::TimedOut(()) => self
                .api
                .create_group(input)
                .await
                .map_err(|e| AsgError::provider("CreateAutoScalingGroup", name, e)),
        }
    }

    /// Incremental update: diff observed against desired and issue only the
    /// calls that close the gap. Tags go first so freshly launched instances
    /// pick up the new propagated set even while capacity is still moving.
    async fn update(
        &self,
        name: &str,
        observed: ObservedGroup,
        spec: &GroupSpec,
    ) -> Result<ApplyReport> {
        let old = observed_spec(&observed, spec);
        let arn = Some(observed.arn.clone());

        let tag_outcome = reconcile_tags(
            &self.api,
            name,
            &TagSet::from_observed(&observed.tags).ignore_aws(),
            &spec.declared_tags(),
        )
        .await?;

        let (update_input, effects) = build_update_request(&old, spec, name);
        self.api
            .update_group(&update_input)
            .await
            .map_err(|e| AsgError::provider("UpdateAutoScalingGroup", name, e))?;

        reconcile_load_balancers(
            &self.api,
            name,
            &old.load_balancers,
            &spec.load_balancers,
            self.poll_interval,
        )
        .await?;

        reconcile_target_groups(
            &self.api,
            name,
            &old.target_group_arns,
            &spec.target_group_arns,
            self.poll_interval,
        )
        .await?;

        if effects.wait_for_capacity {
            wait_for_capacity(
                &self.api,
                name,
                CapacityTarget::for_site(spec, CapacitySite::Update),
                spec.capacity_wait_timeout()?,
                self.poll_interval,
            )
            .await?;
        }

        reconcile_metrics(
            &self.api,
            name,
            &old.enabled_metrics,
            &spec.enabled_metrics,
            &spec.metrics_granularity,
        )
        .await?;

        reconcile_suspended_processes(
            &self.api,
            name,
            &old.suspended_processes,
            &spec.suspended_processes,
        )
        .await?;

        let instance_refresh_token = (effects.needs_instance_refresh
            || tag_outcome.needs_instance_refresh)
            .then(new_refresh_token);

        info!(
            group = %name,
            refresh = instance_refresh_token.is_some(),
            "Auto Scaling Group updated"
        );
        Ok(ApplyReport {
            group: name.to_string(),
            arn,
            instance_refresh_token,
        })
    }

    /// Delete the named group. Absent groups are a success, not an error.
    ///
    /// Unless the spec forces deletion, a populated group is drained first:
    /// capacity is pinned to zero and the instance count polled down before
    /// the delete call is issued. The delete itself is retried through
    /// resource-in-use and scaling-activity-in-progress rejections.
    pub async fn delete(&self, name: &str, spec: &GroupSpec) -> Result<()> {
        let timeout = spec.deletion_timeout()?;

        let Some(observed) = self
            .api
            .describe_group(name)
            .await
            .map_err(|e| AsgError::provider("describing Auto Scaling Group", name, e))?
        else {
            debug!(group = %name, "group already gone, nothing to delete");
            return Ok(());
        };

        let populated = !observed.instances.is_empty() || observed.desired_capacity > 0;
        if populated && !spec.force_delete {
            self.drain(name, timeout).await?;
        } else if populated {
            info!(group = %name, "forced delete, skipping drain");
        }

        self.delete_with_retry(name, spec.force_delete, timeout)
            .await?;
        self.wait_until_gone(name, timeout).await?;

        info!(group = %name, "Auto Scaling Group deleted");
        Ok(())
    }

    /// Pin capacity to zero and poll until every instance has terminated
    async fn drain(&self, name: &str, timeout: Duration) -> Result<()> {
        info!(group = %name, "draining group before delete");
        self.api
            .update_group(&UpdateGroupInput::drain(name))
            .await
            .map_err(|e| AsgError::provider("UpdateAutoScalingGroup", name, e))?;

        let outcome = poll_until(timeout, self.poll_interval, async || {
            match self
                .api
                .describe_group(name)
                .await
                .map_err(|e| AsgError::provider("describing Auto Scaling Group", name, e))?
            {
                None => Ok(Probe::Satisfied(())),
                Some(group) if group.instances.is_empty() => Ok(Probe::Satisfied(())),
                Some(group) => {
                    debug!(
                        group = %name,
                        remaining = group.instances.len(),
                        "instances still terminating"
                    );
                    Ok(Probe::Pending(group.instances.len()))
                }
            }
        })
        .await?;

        match outcome {
            WaitOutcome::Satisfied(()) => Ok(()),
            WaitOutcome::TimedOut(remaining) => Err(AsgError::DrainTimeout {
                group: name.to_string(),
                remaining,
            }),
        }
    }

    /// Issue the delete, retrying while the provider reports the group busy.
    /// After the deadline one final attempt is made so the terminal error is
    /// the provider's own.
    async fn delete_with_retry(&self, name: &str, force: bool, timeout: Duration) -> Result<()> {
        let outcome = poll_until(timeout, self.poll_interval, async || {
            match self.api.delete_group(name, force).await {
                Ok(()) => Ok(Probe::Satisfied(())),
                Err(e) if e.is_not_found() => Ok(Probe::Satisfied(())),
                Err(e) if e.is_retryable_delete() => {
                    debug!(group = %name, error = %e, "delete rejected, group busy");
                    Ok(Probe::Pending(()))
                }
                Err(e) => Err(AsgError::provider("DeleteAutoScalingGroup", name, e)),
            }
        })
        .await?;

        match outcome {
            WaitOutcome::Satisfied(()) => Ok(()),
            WaitOutcome::TimedOut(()) => match self.api.delete_group(name, force).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(AsgError::provider("DeleteAutoScalingGroup", name, e)),
            },
        }
    }

    /// Poll until the group stops being describable
    async fn wait_until_gone(&self, name: &str, timeout: Duration) -> Result<()> {
        let outcome = poll_until(timeout, self.poll_interval, async || {
            match self
                .api
                .describe_group(name)
                .await
                .map_err(|e| AsgError::provider("describing Auto Scaling Group", name, e))?
            {
                None => Ok(Probe::Satisfied(())),
                Some(_) => Ok(Probe::Pending(())),
            }
        })
        .await?;

        match outcome {
            WaitOutcome::Satisfied(()) => Ok(()),
            WaitOutcome::TimedOut(()) => Err(AsgError::GroupStillExists {
                group: name.to_string(),
            }),
        }
    }

    /// Read the named group back in the declarative shape
    pub async fn read(
        &self,
        name: &str,
        spec: &GroupSpec,
        ignore_tag_keys: &[String],
    ) -> Result<Option<GroupState>> {
        observe::read_group(&self.api, name, spec, ignore_tag_keys).await
    }
}

/// Project an observed group into a spec-shaped baseline for diffing.
///
/// The default termination policy is elided relative to the incoming spec's
/// declaration: a group reporting exactly `["Default"]` against a document
/// declaring nothing diffs as unchanged, since the provider injects that
/// value itself. Desired capacity is elided the same way, so a document that
/// never pins it does not re-trigger a capacity wait on every apply.
fn observed_spec(observed: &ObservedGroup, incoming: &GroupSpec) -> GroupSpec {
    let termination_policies = if incoming.termination_policies.is_empty()
        && observed.termination_policies == ["Default".to_string()]
    {
        Vec::new()
    } else {
        observed.termination_policies.clone()
    };
    let desired_capacity = incoming
        .desired_capacity
        .map(|_| observed.desired_capacity);

    GroupSpec {
        name: Some(observed.name.clone()),
        name_prefix: None,
        min_size: observed.min_size,
        max_size: observed.max_size,
        desired_capacity,
        launch_configuration: observed.launch_configuration.clone(),
        launch_template: observed.launch_template.clone(),
        mixed_instances_policy: observed.mixed_instances_policy.clone(),
        availability_zones: observed.availability_zones.clone(),
        vpc_zone_identifier: split_vpc_zone_identifier(&observed.vpc_zone_identifier),
        placement_group: observed.placement_group.clone(),
        health_check_type: observed.health_check_type.clone(),
        health_check_grace_period: observed.health_check_grace_period,
        default_cooldown: observed.default_cooldown,
        termination_policies,
        tag: Vec::new(),
        tags: Vec::new(),
        initial_lifecycle_hooks: Vec::new(),
        suspended_processes: to_set(&observed.suspended_processes),
        enabled_metrics: to_set(&observed.enabled_metrics),
        metrics_granularity: observed
            .metrics_granularity
            .clone()
            .unwrap_or_else(|| incoming.metrics_granularity.clone()),
        load_balancers: to_set(&observed.load_balancer_names),
        target_group_arns: to_set(&observed.target_group_arns),
        min_elb_capacity: None,
        wait_for_elb_capacity: None,
        wait_for_capacity_timeout: incoming.wait_for_capacity_timeout.clone(),
        service_linked_role_arn: observed.service_linked_role_arn.clone(),
        max_instance_lifetime: observed.max_instance_lifetime,
        protect_from_scale_in: observed.protect_from_scale_in,
        force_delete: incoming.force_delete,
        delete_timeout: incoming.delete_timeout.clone(),
    }
}

fn to_set(items: &[String]) -> BTreeSet<String> {
    items.iter().cloned().collect()
}
