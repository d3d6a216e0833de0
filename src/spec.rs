//! Desired-state document for an Auto Scaling Group
//!
//! [`GroupSpec`] is the strongly-typed boundary between configuration loading
//! and the reconciliation engine: it is parsed and validated once, and the
//! engine never re-interprets raw configuration after that.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AsgError, Result};
use crate::tags::{TagEntry, TagRepresentation, TagSet};

/// Default wait applied to capacity convergence and deletion
pub const DEFAULT_WAIT_TIMEOUT: &str = "10m";

/// Default CloudWatch metrics granularity
pub const DEFAULT_METRICS_GRANULARITY: &str = "1Minute";

fn default_wait_timeout() -> String {
    DEFAULT_WAIT_TIMEOUT.to_string()
}

fn default_granularity() -> String {
    DEFAULT_METRICS_GRANULARITY.to_string()
}

/// Reference to a launch template, by id or name plus optional version.
///
/// The provider requires exactly one of id/name per request; when a document
/// carries both, the translator prefers the id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTemplateSpec {
    /// Launch template id
    #[serde(default)]
    pub id: Option<String>,
    /// Launch template name
    #[serde(default)]
    pub name: Option<String>,
    /// Template version; the provider resolves its own default when absent
    #[serde(default)]
    pub version: Option<String>,
}

/// On-demand/spot distribution inside a mixed-instances policy.
/// Every field is independently optional; the provider applies defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancesDistribution {
    /// Allocation strategy for on-demand capacity
    #[serde(default)]
    pub on_demand_allocation_strategy: Option<String>,
    /// Absolute base of on-demand instances
    #[serde(default)]
    pub on_demand_base_capacity: Option<i32>,
    /// Percentage of capacity above the base that is on-demand
    #[serde(default)]
    pub on_demand_percentage_above_base_capacity: Option<i32>,
    /// Allocation strategy for spot capacity
    #[serde(default)]
    pub spot_allocation_strategy: Option<String>,
    /// Number of spot pools to diversify across
    #[serde(default)]
    pub spot_instance_pools: Option<i32>,
    /// Maximum spot price (empty means on-demand price)
    #[serde(default)]
    pub spot_max_price: Option<String>,
}

/// Instance-type override inside a mixed-instances launch template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTemplateOverride {
    /// Overriding instance type
    #[serde(default)]
    pub instance_type: Option<String>,
    /// Capacity units this instance type counts for
    #[serde(default)]
    pub weighted_capacity: Option<String>,
}

/// Launch template plus ordered overrides, inside a mixed-instances policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedLaunchTemplate {
    /// The underlying launch template
    pub specification: LaunchTemplateSpec,
    /// Ordered instance-type overrides
    #[serde(default)]
    pub overrides: Vec<LaunchTemplateOverride>,
}

/// Mixed-instances policy: a launch template and a capacity distribution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedInstancesPolicy {
    /// Capacity distribution; provider defaults apply when absent
    #[serde(default)]
    pub instances_distribution: Option<InstancesDistribution>,
    /// Launch template and overrides
    pub launch_template: MixedLaunchTemplate,
}

/// Lifecycle hook registered during two-phase creation.
/// Hooks are applied once at creation time and never reconciled thereafter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleHookSpec {
    /// Hook name
    pub name: String,
    /// Lifecycle transition the hook fires on
    pub lifecycle_transition: String,
    /// Result applied when the heartbeat times out
    #[serde(default)]
    pub default_result: Option<String>,
    /// Heartbeat timeout in seconds
    #[serde(default)]
    pub heartbeat_timeout: Option<i32>,
    /// Opaque metadata forwarded to the notification target
    #[serde(default)]
    pub notification_metadata: Option<String>,
    /// SNS/SQS target ARN
    #[serde(default)]
    pub notification_target_arn: Option<String>,
    /// IAM role used to publish to the notification target
    #[serde(default)]
    pub role_arn: Option<String>,
}

/// Desired state for one Auto Scaling Group.
///
/// Zone and subnet lists are mutually exclusive at the document level; that
/// precondition is assumed satisfied upstream and not enforced here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Explicit group name; generated from `name_prefix` when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Prefix for a generated name
    #[serde(default)]
    pub name_prefix: Option<String>,

    /// Minimum group size
    pub min_size: i32,
    /// Maximum group size
    pub max_size: i32,
    /// Desired capacity; provider keeps it between min and max when absent
    #[serde(default)]
    pub desired_capacity: Option<i32>,

    /// Launch configuration name (one launch source must be set)
    #[serde(default)]
    pub launch_configuration: Option<String>,
    /// Launch template reference (one launch source must be set)
    #[serde(default)]
    pub launch_template: Option<LaunchTemplateSpec>,
    /// Mixed-instances policy (one launch source must be set)
    #[serde(default)]
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,

    /// Availability zones (EC2-Classic style placement)
    #[serde(default)]
    pub availability_zones: Vec<String>,
    /// VPC subnet ids
    #[serde(default)]
    pub vpc_zone_identifier: Vec<String>,
    /// Placement group
    #[serde(default)]
    pub placement_group: Option<String>,

    /// Health check type ("EC2" or "ELB")
    #[serde(default)]
    pub health_check_type: Option<String>,
    /// Grace period in seconds before health checks apply
    #[serde(default)]
    pub health_check_grace_period: Option<i32>,
    /// Cooldown between scaling activities, in seconds
    #[serde(default)]
    pub default_cooldown: Option<i32>,
    /// Ordered termination policies
    #[serde(default)]
    pub termination_policies: Vec<String>,

    /// Itemized tag representation
    #[serde(default)]
    pub tag: Vec<TagEntry>,
    /// Legacy free-form tag representation, coerced at the config boundary
    #[serde(default)]
    pub tags: Vec<TagEntry>,

    /// Lifecycle hooks registered at creation time (triggers two-phase create)
    #[serde(default)]
    pub initial_lifecycle_hooks: Vec<LifecycleHookSpec>,

    /// Scaling processes to keep suspended
    #[serde(default)]
    pub suspended_processes: BTreeSet<String>,
    /// CloudWatch group metrics to collect
    #[serde(default)]
    pub enabled_metrics: BTreeSet<String>,
    /// Granularity for enabled metrics
    #[serde(default = "default_granularity")]
    pub metrics_granularity: String,

    /// Attached ELB Classic load balancer names
    #[serde(default)]
    pub load_balancers: BTreeSet<String>,
    /// Attached ELBv2 target group ARNs
    #[serde(default)]
    pub target_group_arns: BTreeSet<String>,

    /// Minimum instances that must be healthy in all attached load balancers
    /// before creation is considered converged
    #[serde(default)]
    pub min_elb_capacity: Option<i32>,
    /// ELB-healthy threshold applied on both create and update, overriding
    /// `min_elb_capacity`
    #[serde(default)]
    pub wait_for_elb_capacity: Option<i32>,
    /// Capacity convergence timeout as a duration string; "0" disables the wait
    #[serde(default = "default_wait_timeout")]
    pub wait_for_capacity_timeout: String,

    /// Service-linked role the group uses to call other AWS services
    #[serde(default)]
    pub service_linked_role_arn: Option<String>,
    /// Maximum instance lifetime in seconds
    #[serde(default)]
    pub max_instance_lifetime: Option<i32>,
    /// Protect new instances from scale-in termination
    #[serde(default)]
    pub protect_from_scale_in: bool,

    /// Delete without draining first
    #[serde(default)]
    pub force_delete: bool,
    /// Deletion (and drain) timeout as a duration string
    #[serde(default = "default_wait_timeout")]
    pub delete_timeout: String,
}

impl GroupSpec {
    /// Load a spec from a JSON document
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Number of launch sources the document sets
    pub fn launch_source_count(&self) -> usize {
        [
            self.launch_configuration.is_some(),
            self.launch_template.is_some(),
            self.mixed_instances_policy.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Validate the document. Runs pre-flight; no API call is attempted for
    /// an invalid spec.
    pub fn validate(&self) -> Result<()> {
        match self.launch_source_count() {
            1 => {}
            0 => {
                return Err(AsgError::invalid_spec(
                    "one of launch_configuration, launch_template, or mixed_instances_policy must be set",
                ));
            }
            n => {
                return Err(AsgError::invalid_spec(format!(
                    "exactly one launch source must be set, found {n}",
                )));
            }
        }

        if self.min_size > self.max_size {
            return Err(AsgError::invalid_spec(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }

        if let Some(desired) = self.desired_capacity {
            if desired < self.min_size || desired > self.max_size {
                return Err(AsgError::invalid_spec(format!(
                    "desired_capacity ({desired}) must be between min_size ({}) and max_size ({})",
                    self.min_size, self.max_size
                )));
            }
        }

        self.capacity_wait_timeout()?;
        self.deletion_timeout()?;

        Ok(())
    }

    /// Parsed capacity convergence timeout; zero disables the wait
    pub fn capacity_wait_timeout(&self) -> Result<Duration> {
        parse_duration(&self.wait_for_capacity_timeout).map_err(|err| {
            AsgError::invalid_spec(format!("wait_for_capacity_timeout: {err}"))
        })
    }

    /// Parsed deletion/drain timeout
    pub fn deletion_timeout(&self) -> Result<Duration> {
        parse_duration(&self.delete_timeout)
            .map_err(|err| AsgError::invalid_spec(format!("delete_timeout: {err}")))
    }

    /// The canonical tag collection: both representations merged, with
    /// provider-managed keys marked ignored.
    pub fn declared_tags(&self) -> TagSet {
        TagSet::from_declared(&self.tag)
            .merge(TagSet::from_declared(&self.tags))
            .ignore_aws()
    }

    /// Which declarative tag representation(s) the document uses
    pub fn tag_representation(&self) -> TagRepresentation {
        match (!self.tag.is_empty(), !self.tags.is_empty()) {
            (true, true) => TagRepresentation::Both,
            (true, false) => TagRepresentation::Itemized,
            (false, true) => TagRepresentation::Legacy,
            (false, false) => TagRepresentation::None,
        }
    }
}

/// Parse a duration string like `"10m"`, `"300s"`, `"500ms"`, `"1h"`, or a
/// plain number of seconds. Negative durations are rejected.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s.starts_with('-') {
        return Err(format!("duration must not be negative: {s}"));
    }

    let (number, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };

    let value: f64 = number
        .parse()
        .map_err(|_| format!("cannot be parsed as a duration: {s}"))?;

    let seconds = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(format!("unknown duration unit {unit:?} in {s}")),
    };

    Ok(Duration::from_secs_f64(seconds))
}
