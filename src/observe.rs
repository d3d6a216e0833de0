//! Read-side projection of a live group
//!
//! [`read_group`] turns the provider's view of a group back into the
//! declarative shape, applying the read-time rules that keep a converged
//! group from reporting spurious drift: tag echoing per representation,
//! default termination-policy elision, and subnet-list splitting.

use serde::Serialize;
use tracing::debug;

use crate::api::{AsgApi, ObservedGroup, ObservedInstance};
use crate::error::{AsgError, Result};
use crate::spec::{GroupSpec, LaunchTemplateSpec, MixedInstancesPolicy};
use crate::tags::{TagEntry, TagRepresentation, TagSet};

/// Declarative-shaped snapshot of a live group
#[derive(Debug, Clone, Serialize)]
pub struct GroupState {
    /// Group name
    pub name: String,
    /// Group ARN
    pub arn: String,
    /// Minimum size
    pub min_size: i32,
    /// Maximum size
    pub max_size: i32,
    /// Desired capacity
    pub desired_capacity: i32,
    /// Scaling cooldown in seconds
    pub default_cooldown: Option<i32>,
    /// Availability zones
    pub availability_zones: Vec<String>,
    /// VPC subnet ids, split back out of the provider's comma-joined form
    pub vpc_zone_identifier: Vec<String>,
    /// Placement group
    pub placement_group: Option<String>,
    /// Health check type
    pub health_check_type: Option<String>,
    /// Health check grace period in seconds
    pub health_check_grace_period: Option<i32>,
    /// Launch configuration name, when that is the launch source
    pub launch_configuration: Option<String>,
    /// Launch template, when that is the launch source
    pub launch_template: Option<LaunchTemplateSpec>,
    /// Mixed-instances policy, when that is the launch source
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    /// Current instances
    pub instances: Vec<ObservedInstance>,
    /// Attached ELB Classic load balancer names
    pub load_balancers: Vec<String>,
    /// Attached target group ARNs
    pub target_group_arns: Vec<String>,
    /// Enabled metrics
    pub enabled_metrics: Vec<String>,
    /// Metrics granularity; defaults even when collection is off
    pub metrics_granularity: String,
    /// Suspended scaling processes
    pub suspended_processes: Vec<String>,
    /// Termination policies, with the provider's implicit default elided
    pub termination_policies: Vec<String>,
    /// Tags echoed in the same representation the document declared
    pub tags: Vec<TagEntry>,
    /// Service-linked role ARN
    pub service_linked_role_arn: Option<String>,
    /// Maximum instance lifetime in seconds
    pub max_instance_lifetime: Option<i32>,
    /// Scale-in protection flag
    pub protect_from_scale_in: bool,
}

/// Split the provider's comma-joined subnet list; empty input yields an
/// empty list, not one empty element.
pub fn split_vpc_zone_identifier(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Apply the default termination-policy elision: a group reporting exactly
/// `["Default"]` against a document that declared nothing reads back empty,
/// because the provider injects that value on its own.
fn effective_termination_policies(observed: &[String], declared: &[String]) -> Vec<String> {
    if declared.is_empty() && observed == ["Default".to_string()] {
        return Vec::new();
    }
    observed.to_vec()
}

/// Echo observed tags in the representation the document uses.
///
/// With an itemized or legacy declaration, only keys the declaration names
/// are echoed; drift in undeclared keys belongs to whoever put them there.
/// Without any declaration, everything survives except provider-managed and
/// explicitly ignored keys.
fn echo_tags(
    observed: &TagSet,
    spec: &GroupSpec,
    ignore_tag_keys: &[String],
) -> Vec<TagEntry> {
    let observed = observed.clone().ignore_aws().ignore_keys(ignore_tag_keys);

    match spec.tag_representation() {
        TagRepresentation::Itemized => {
            observed.only(&TagSet::from_declared(&spec.tag)).entries()
        }
        TagRepresentation::Legacy => {
            observed.only(&TagSet::from_declared(&spec.tags)).entries()
        }
        // Both representations in play: keys declared in either list count.
        TagRepresentation::Both => observed.only(&spec.declared_tags()).entries(),
        TagRepresentation::None => observed.entries(),
    }
}

/// Project an observed group into the declarative shape
pub fn project_group(
    observed: ObservedGroup,
    spec: &GroupSpec,
    ignore_tag_keys: &[String],
) -> GroupState {
    let tags = echo_tags(
        &TagSet::from_observed(&observed.tags),
        spec,
        ignore_tag_keys,
    );
    let termination_policies =
        effective_termination_policies(&observed.termination_policies, &spec.termination_policies);

    GroupState {
        name: observed.name,
        arn: observed.arn,
        min_size: observed.min_size,
        max_size: observed.max_size,
        desired_capacity: observed.desired_capacity,
        default_cooldown: observed.default_cooldown,
        availability_zones: observed.availability_zones,
        vpc_zone_identifier: split_vpc_zone_identifier(&observed.vpc_zone_identifier),
        placement_group: observed.placement_group,
        health_check_type: observed.health_check_type,
        health_check_grace_period: observed.health_check_grace_period,
        launch_configuration: observed.launch_configuration,
        launch_template: observed.launch_template,
        mixed_instances_policy: observed.mixed_instances_policy,
        instances: observed.instances,
        load_balancers: observed.load_balancer_names,
        target_group_arns: observed.target_group_arns,
        enabled_metrics: observed.enabled_metrics,
        metrics_granularity: observed
            .metrics_granularity
            .unwrap_or_else(|| spec.metrics_granularity.clone()),
        suspended_processes: observed.suspended_processes,
        termination_policies,
        tags,
        service_linked_role_arn: observed.service_linked_role_arn,
        max_instance_lifetime: observed.max_instance_lifetime,
        protect_from_scale_in: observed.protect_from_scale_in,
    }
}

/// Fetch a group and project it. Absent groups read as `None` so callers can
/// treat disappearance as state to record, not a failure.
pub async fn read_group<A: AsgApi>(
    api: &A,
    name: &str,
    spec: &GroupSpec,
    ignore_tag_keys: &[String],
) -> Result<Option<GroupState>> {
    let Some(observed) = api
        .describe_group(name)
        .await
        .map_err(|e| AsgError::provider("describing Auto Scaling Group", name, e))?
    else {
        debug!(group = %name, "group not found on read");
        return Ok(None);
    };

    Ok(Some(project_group(observed, spec, ignore_tag_keys)))
}
