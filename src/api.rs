//! Provider API boundary
//!
//! The engine never talks to a global SDK handle: every operation takes an
//! [`AsgApi`] implementation by reference. Production code uses the SDK-backed
//! client in [`crate::aws`]; tests script a fake.
//!
//! Shapes here are the engine's own types, not SDK types — the SDK surface
//! stays confined to the `aws` module so test doubles are trivially
//! constructible.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::spec::{LaunchTemplateSpec, LifecycleHookSpec, MixedInstancesPolicy};
use crate::tags::TagEntry;

/// Classified provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The named resource does not exist
    NotFound,
    /// The resource is busy ("ResourceInUse")
    ResourceInUse,
    /// A scaling activity is running ("ScalingActivityInProgress")
    ScalingInProgress,
    /// The provider rejected the request ("ValidationError")
    Validation,
    /// Anything else
    Other,
}

/// Error returned by a provider call, classified by error code
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// Classified error kind
    pub kind: ProviderErrorKind,
    /// Verbatim provider message
    pub message: String,
}

impl ProviderError {
    /// Build an error from a kind and message
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Unclassified error
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, message)
    }

    /// The resource does not exist
    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }

    /// Deletion may be retried past this error
    pub fn is_retryable_delete(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::ResourceInUse | ProviderErrorKind::ScalingInProgress
        )
    }

    /// Creation hit the IAM eventual-consistency window: the instance profile
    /// named in the launch source has not propagated yet.
    pub fn is_iam_propagation(&self) -> bool {
        self.kind == ProviderErrorKind::Validation
            && self.message.contains("Invalid IAM Instance Profile")
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Request to create a group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateGroupInput {
    /// Group name
    pub name: String,
    /// Minimum size
    pub min_size: i32,
    /// Maximum size
    pub max_size: i32,
    /// Desired capacity
    pub desired_capacity: Option<i32>,
    /// Launch configuration name
    pub launch_configuration: Option<String>,
    /// Launch template reference (id-or-name already resolved)
    pub launch_template: Option<LaunchTemplateSpec>,
    /// Mixed-instances policy
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    /// Availability zones
    pub availability_zones: Vec<String>,
    /// Comma-joined VPC subnet ids
    pub vpc_zone_identifier: Option<String>,
    /// Placement group
    pub placement_group: Option<String>,
    /// Scaling cooldown in seconds
    pub default_cooldown: Option<i32>,
    /// Health check type
    pub health_check_type: Option<String>,
    /// Health check grace period in seconds
    pub health_check_grace_period: Option<i32>,
    /// Ordered termination policies
    pub termination_policies: Vec<String>,
    /// ELB Classic load balancer names attached at creation
    pub load_balancers: Vec<String>,
    /// Target group ARNs attached at creation
    pub target_group_arns: Vec<String>,
    /// Group tags
    pub tags: Vec<TagEntry>,
    /// Service-linked role ARN
    pub service_linked_role_arn: Option<String>,
    /// Maximum instance lifetime in seconds
    pub max_instance_lifetime: Option<i32>,
    /// Scale-in protection for new instances
    pub protect_from_scale_in: bool,
}

/// Request to update a group; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateGroupInput {
    /// Group name
    pub name: String,
    /// New minimum size
    pub min_size: Option<i32>,
    /// New maximum size
    pub max_size: Option<i32>,
    /// New desired capacity
    pub desired_capacity: Option<i32>,
    /// New launch configuration name
    pub launch_configuration: Option<String>,
    /// New launch template reference
    pub launch_template: Option<LaunchTemplateSpec>,
    /// New mixed-instances policy
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    /// New availability zone list
    pub availability_zones: Option<Vec<String>>,
    /// New comma-joined subnet list
    pub vpc_zone_identifier: Option<String>,
    /// New placement group
    pub placement_group: Option<String>,
    /// New cooldown
    pub default_cooldown: Option<i32>,
    /// New health check type
    pub health_check_type: Option<String>,
    /// New health check grace period
    pub health_check_grace_period: Option<i32>,
    /// New termination policies
    pub termination_policies: Option<Vec<String>>,
    /// New service-linked role
    pub service_linked_role_arn: Option<String>,
    /// New maximum instance lifetime
    pub max_instance_lifetime: Option<i32>,
    /// New scale-in protection flag
    pub protect_from_scale_in: Option<bool>,
}

impl UpdateGroupInput {
    /// Empty update for a named group
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Update that pins all capacity bounds to zero, used to drain
    pub fn drain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_size: Some(0),
            max_size: Some(0),
            desired_capacity: Some(0),
            ..Default::default()
        }
    }
}

/// One instance in the provider's view of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedInstance {
    /// EC2 instance id
    pub instance_id: String,
    /// Group-level health status ("Healthy"/"Unhealthy")
    pub health_status: String,
    /// Lifecycle state ("InService", "Pending", ...)
    pub lifecycle_state: String,
}

impl ObservedInstance {
    /// Healthy and serving from the group's perspective
    pub fn is_healthy_in_group(&self) -> bool {
        self.lifecycle_state == "InService" && self.health_status == "Healthy"
    }
}

/// The provider's live view of a group. Produced per read and never mutated;
/// each reconciliation cycle re-fetches it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedGroup {
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
    /// Scaling cooldown
    pub default_cooldown: Option<i32>,
    /// Availability zones
    pub availability_zones: Vec<String>,
    /// Comma-joined subnet ids (may be empty)
    pub vpc_zone_identifier: String,
    /// Placement group
    pub placement_group: Option<String>,
    /// Health check type
    pub health_check_type: Option<String>,
    /// Health check grace period
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
    pub load_balancer_names: Vec<String>,
    /// Attached target group ARNs
    pub target_group_arns: Vec<String>,
    /// Enabled metrics
    pub enabled_metrics: Vec<String>,
    /// Granularity of enabled metrics
    pub metrics_granularity: Option<String>,
    /// Suspended scaling processes
    pub suspended_processes: Vec<String>,
    /// Termination policies as reported
    pub termination_policies: Vec<String>,
    /// Group tags as reported
    pub tags: Vec<TagEntry>,
    /// Service-linked role ARN
    pub service_linked_role_arn: Option<String>,
    /// Maximum instance lifetime
    pub max_instance_lifetime: Option<i32>,
    /// Scale-in protection flag
    pub protect_from_scale_in: bool,
}

impl ObservedGroup {
    /// Instances counted healthy at the group level
    pub fn healthy_instance_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|i| i.is_healthy_in_group())
            .count()
    }
}

/// One load-balancer or target-group attachment with its state string.
/// `"Adding"` and `"Removing"` are the transitional states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentItem {
    /// Load balancer name or target group ARN
    pub id: String,
    /// Attachment state as reported by the provider
    pub state: String,
}

/// One page of attachment state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentPage {
    /// Attachments on this page
    pub items: Vec<AttachmentItem>,
    /// Token for the next page, when more remain
    pub next_token: Option<String>,
}

/// Everything the engine needs from the control plane.
///
/// All calls are sequential and blocking from the engine's perspective; batch
/// size limits (10 attachments per call) are the caller's responsibility.
pub trait AsgApi {
    /// Create a group
    fn create_group(
        &self,
        input: &CreateGroupInput,
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Apply a partial update to a group
    fn update_group(
        &self,
        input: &UpdateGroupInput,
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Delete a group; `force` skips the provider-side emptiness check
    fn delete_group(
        &self,
        name: &str,
        force: bool,
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Fetch a group by exact name; absent groups are `None`, not an error
    fn describe_group(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<ObservedGroup>, ProviderError>>;

    /// Register a lifecycle hook on a group
    fn put_lifecycle_hook(
        &self,
        group: &str,
        hook: &LifecycleHookSpec,
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Attach ELB Classic load balancers (≤10 per call)
    fn attach_load_balancers(
        &self,
        group: &str,
        names: &[String],
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Detach ELB Classic load balancers (≤10 per call)
    fn detach_load_balancers(
        &self,
        group: &str,
        names: &[String],
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Attach target groups (≤10 per call)
    fn attach_target_groups(
        &self,
        group: &str,
        arns: &[String],
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Detach target groups (≤10 per call)
    fn detach_target_groups(
        &self,
        group: &str,
        arns: &[String],
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// One page of load balancer attachment state
    fn describe_load_balancers(
        &self,
        group: &str,
        page: Option<String>,
    ) -> impl Future<Output = Result<AttachmentPage, ProviderError>>;

    /// One page of target group attachment state
    fn describe_target_groups(
        &self,
        group: &str,
        page: Option<String>,
    ) -> impl Future<Output = Result<AttachmentPage, ProviderError>>;

    /// Suspend the named scaling processes
    fn suspend_processes(
        &self,
        group: &str,
        processes: &[String],
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Resume the named scaling processes
    fn resume_processes(
        &self,
        group: &str,
        processes: &[String],
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Enable metrics collection at the given granularity
    fn enable_metrics(
        &self,
        group: &str,
        metrics: &[String],
        granularity: &str,
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Disable metrics collection
    fn disable_metrics(
        &self,
        group: &str,
        metrics: &[String],
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Create or overwrite group tags
    fn create_or_update_tags(
        &self,
        group: &str,
        tags: &[TagEntry],
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// Delete group tags
    fn delete_tags(
        &self,
        group: &str,
        tags: &[TagEntry],
    ) -> impl Future<Output = Result<(), ProviderError>>;

    /// ELB Classic instance health for one load balancer:
    /// instance id → state ("InService" when healthy)
    fn elb_instance_health(
        &self,
        lb_name: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>, ProviderError>>;

    /// ELBv2 target health for one target group:
    /// instance id → state ("healthy" when healthy)
    fn target_health(
        &self,
        tg_arn: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>, ProviderError>>;
}
