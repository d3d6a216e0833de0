//! Desired state to provider requests
//!
//! Pure translation: a [`GroupSpec`] in, provider request structures out.
//! Nothing here talks to the network, which keeps the two-phase creation
//! split and the update diff directly testable.

use uuid::Uuid;

use crate::api::{CreateGroupInput, UpdateGroupInput};
use crate::error::{AsgError, Result};
use crate::spec::{GroupSpec, LaunchTemplateSpec, MixedInstancesPolicy, MixedLaunchTemplate};

/// Default version for a mixed-instances launch template specification
const DEFAULT_TEMPLATE_VERSION: &str = "$Default";

/// Prefix for generated group names when the document names nothing
const GENERATED_NAME_PREFIX: &str = "asgctl-";

/// Resolve the group name: explicit name, prefixed unique name, or a
/// generated one.
pub fn resolve_group_name(spec: &GroupSpec) -> String {
    if let Some(name) = &spec.name {
        return name.clone();
    }
    let prefix = spec
        .name_prefix
        .as_deref()
        .unwrap_or(GENERATED_NAME_PREFIX);
    format!("{prefix}{}", unique_suffix())
}

/// Opaque token minted when dependent instances need a rolling refresh
pub fn new_refresh_token() -> String {
    unique_suffix()
}

fn unique_suffix() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Prefer the template id over the name when both are present; the provider
/// rejects requests carrying both.
fn resolve_launch_template(template: &LaunchTemplateSpec) -> LaunchTemplateSpec {
    if template.id.is_some() {
        LaunchTemplateSpec {
            id: template.id.clone(),
            name: None,
            version: template.version.clone(),
        }
    } else {
        template.clone()
    }
}

/// Mixed-instances policies carry their own template specification; its
/// version falls back to `$Default` when unset.
fn resolve_mixed_instances_policy(policy: &MixedInstancesPolicy) -> MixedInstancesPolicy {
    let mut specification = resolve_launch_template(&policy.launch_template.specification);
    if specification.version.is_none() {
        specification.version = Some(DEFAULT_TEMPLATE_VERSION.to_string());
    }

    MixedInstancesPolicy {
        instances_distribution: policy.instances_distribution.clone(),
        launch_template: MixedLaunchTemplate {
            specification,
            overrides: policy.launch_template.overrides.clone(),
        },
    }
}

/// Join subnet ids into the provider's comma-separated form
pub fn join_vpc_zone_identifier(subnets: &[String]) -> Option<String> {
    if subnets.is_empty() {
        None
    } else {
        Some(subnets.join(","))
    }
}

/// Build the creation request(s) for a spec.
///
/// When initial lifecycle hooks are present, creation is two-phase: the
/// create request pins min/max to zero so no instance launches before the
/// hooks are registered, and the returned update request carries the real
/// capacity bounds.
pub fn build_create_request(
    spec: &GroupSpec,
    name: &str,
) -> Result<(CreateGroupInput, Option<UpdateGroupInput>)> {
    if spec.launch_source_count() == 0 {
        return Err(AsgError::invalid_spec(
            "one of launch_configuration, launch_template, or mixed_instances_policy must be set",
        ));
    }

    let mut create = CreateGroupInput {
        name: name.to_string(),
        launch_configuration: spec.launch_configuration.clone(),
        launch_template: spec.launch_template.as_ref().map(resolve_launch_template),
        mixed_instances_policy: spec
            .mixed_instances_policy
            .as_ref()
            .map(resolve_mixed_instances_policy),
        availability_zones: spec.availability_zones.clone(),
        vpc_zone_identifier: join_vpc_zone_identifier(&spec.vpc_zone_identifier),
        placement_group: spec.placement_group.clone(),
        default_cooldown: spec.default_cooldown,
        health_check_type: spec.health_check_type.clone(),
        health_check_grace_period: spec.health_check_grace_period,
        termination_policies: spec.termination_policies.clone(),
        load_balancers: spec.load_balancers.iter().cloned().collect(),
        target_group_arns: spec.target_group_arns.iter().cloned().collect(),
        tags: spec.declared_tags().entries(),
        service_linked_role_arn: spec.service_linked_role_arn.clone(),
        max_instance_lifetime: spec.max_instance_lifetime,
        protect_from_scale_in: spec.protect_from_scale_in,
        ..Default::default()
    };

    let two_phase = !spec.initial_lifecycle_hooks.is_empty();
    let deferred = if two_phase {
        create.min_size = 0;
        create.max_size = 0;
        create.desired_capacity = None;

        let mut update = UpdateGroupInput::new(name);
        update.min_size = Some(spec.min_size);
        update.max_size = Some(spec.max_size);
        update.desired_capacity = spec.desired_capacity;
        Some(update)
    } else {
        create.min_size = spec.min_size;
        create.max_size = spec.max_size;
        create.desired_capacity = spec.desired_capacity;
        None
    };

    Ok((create, deferred))
}

/// Side effects an update implies beyond the request itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateEffects {
    /// Capacity-affecting fields changed; the caller should wait for
    /// convergence after the update lands
    pub wait_for_capacity: bool,
    /// The launch source, placement, or network layout changed; dependent
    /// instances are stale until refreshed
    pub needs_instance_refresh: bool,
}

/// Diff two specs into a partial update request.
///
/// Only changed fields are carried; scale-in protection is always sent, as an
/// absolute value rather than a diff.
pub fn build_update_request(
    old: &GroupSpec,
    new: &GroupSpec,
    name: &str,
) -> (UpdateGroupInput, UpdateEffects) {
    let mut input = UpdateGroupInput::new(name);
    let mut effects = UpdateEffects::default();

    input.protect_from_scale_in = Some(new.protect_from_scale_in);

    if old.default_cooldown != new.default_cooldown {
        input.default_cooldown = new.default_cooldown;
    }

    if old.desired_capacity != new.desired_capacity {
        input.desired_capacity = new.desired_capacity;
        effects.wait_for_capacity = true;
    }

    if old.min_size != new.min_size {
        input.min_size = Some(new.min_size);
        effects.wait_for_capacity = true;
    }

    if old.max_size != new.max_size {
        input.max_size = Some(new.max_size);
    }

    if old.launch_configuration != new.launch_configuration {
        input.launch_configuration = new.launch_configuration.clone();
        effects.needs_instance_refresh = true;
    }

    if old.launch_template != new.launch_template {
        input.launch_template = new.launch_template.as_ref().map(resolve_launch_template);
        effects.needs_instance_refresh = true;
    }

    if old.mixed_instances_policy != new.mixed_instances_policy {
        input.mixed_instances_policy = new
            .mixed_instances_policy
            .as_ref()
            .map(resolve_mixed_instances_policy);
        effects.needs_instance_refresh = true;
    }

    if old.max_instance_lifetime != new.max_instance_lifetime {
        input.max_instance_lifetime = new.max_instance_lifetime;
    }

    if old.health_check_grace_period != new.health_check_grace_period {
        input.health_check_grace_period = new.health_check_grace_period;
    }

    if old.health_check_type != new.health_check_type {
        input.health_check_type = new.health_check_type.clone();
        input.health_check_grace_period = new.health_check_grace_period;
    }

    if old.vpc_zone_identifier != new.vpc_zone_identifier {
        input.vpc_zone_identifier = join_vpc_zone_identifier(&new.vpc_zone_identifier);
        effects.needs_instance_refresh = true;
    }

    if old.availability_zones != new.availability_zones {
        if !new.availability_zones.is_empty() {
            input.availability_zones = Some(new.availability_zones.clone());
        }
        effects.needs_instance_refresh = true;
    }

    if old.placement_group != new.placement_group {
        input.placement_group = new.placement_group.clone();
        effects.needs_instance_refresh = true;
    }

    if old.termination_policies != new.termination_policies {
        // Clearing the policy list must explicitly send "Default", or the
        // provider keeps the old policies.
        if new.termination_policies.is_empty() {
            input.termination_policies = Some(vec!["Default".to_string()]);
        } else {
            input.termination_policies = Some(new.termination_policies.clone());
        }
    }

    if old.service_linked_role_arn != new.service_linked_role_arn {
        input.service_linked_role_arn = new.service_linked_role_arn.clone();
    }

    (input, effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{InstancesDistribution, LifecycleHookSpec};

    fn spec_with_lc() -> GroupSpec {
        GroupSpec::from_json(
            r#"{
                "name": "web",
                "min_size": 2,
                "max_size": 8,
                "desired_capacity": 4,
                "launch_configuration": "web-lc"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_single_phase_create_carries_real_capacity() {
        let spec = spec_with_lc();
        let (create, deferred) = build_create_request(&spec, "web").unwrap();

        assert_eq!(create.min_size, 2);
        assert_eq!(create.max_size, 8);
        assert_eq!(create.desired_capacity, Some(4));
        assert!(deferred.is_none());
    }

    #[test]
    fn test_two_phase_create_pins_capacity_to_zero() {
        let mut spec = spec_with_lc();
        spec.initial_lifecycle_hooks = vec![LifecycleHookSpec {
            name: "drainer".to_string(),
            lifecycle_transition: "autoscaling:EC2_INSTANCE_TERMINATING".to_string(),
            ..Default::default()
        }];

        let (create, deferred) = build_create_request(&spec, "web").unwrap();
        assert_eq!(create.min_size, 0);
        assert_eq!(create.max_size, 0);
        assert_eq!(create.desired_capacity, None);

        let update = deferred.unwrap();
        assert_eq!(update.min_size, Some(2));
        assert_eq!(update.max_size, Some(8));
        assert_eq!(update.desired_capacity, Some(4));
    }

    #[test]
    fn test_create_requires_a_launch_source() {
        let mut spec = spec_with_lc();
        spec.launch_configuration = None;

        let err = build_create_request(&spec, "web").unwrap_err();
        assert!(matches!(err, AsgError::InvalidSpec(_)));
    }

    #[test]
    fn test_launch_template_id_preferred_over_name() {
        let mut spec = spec_with_lc();
        spec.launch_configuration = None;
        spec.launch_template = Some(LaunchTemplateSpec {
            id: Some("lt-123".to_string()),
            name: Some("web-template".to_string()),
            version: Some("3".to_string()),
        });

        let (create, _) = build_create_request(&spec, "web").unwrap();
        let template = create.launch_template.unwrap();
        assert_eq!(template.id.as_deref(), Some("lt-123"));
        assert_eq!(template.name, None);
        assert_eq!(template.version.as_deref(), Some("3"));
    }

    #[test]
    fn test_mixed_policy_version_defaults() {
        let mut spec = spec_with_lc();
        spec.launch_configuration = None;
        spec.mixed_instances_policy = Some(MixedInstancesPolicy {
            instances_distribution: Some(InstancesDistribution {
                spot_allocation_strategy: Some("capacity-optimized".to_string()),
                ..Default::default()
            }),
            launch_template: MixedLaunchTemplate {
                specification: LaunchTemplateSpec {
                    name: Some("web-template".to_string()),
                    ..Default::default()
                },
                overrides: vec![],
            },
        });

        let (create, _) = build_create_request(&spec, "web").unwrap();
        let policy = create.mixed_instances_policy.unwrap();
        assert_eq!(
            policy.launch_template.specification.version.as_deref(),
            Some("$Default")
        );
    }

    #[test]
    fn test_vpc_zone_identifier_joins_with_commas() {
        assert_eq!(
            join_vpc_zone_identifier(&["subnet-a".to_string(), "subnet-b".to_string()]),
            Some("subnet-a,subnet-b".to_string())
        );
        assert_eq!(join_vpc_zone_identifier(&[]), None);
    }

    #[test]
    fn test_resolve_group_name_uses_prefix() {
        let mut spec = spec_with_lc();
        spec.name = None;
        spec.name_prefix = Some("edge-".to_string());

        let name = resolve_group_name(&spec);
        assert!(name.starts_with("edge-"));
        assert!(name.len() > "edge-".len());
    }

    #[test]
    fn test_update_diff_capacity_change_requests_wait() {
        let old = spec_with_lc();
        let mut new = spec_with_lc();
        new.desired_capacity = Some(6);

        let (input, effects) = build_update_request(&old, &new, "web");
        assert_eq!(input.desired_capacity, Some(6));
        assert_eq!(input.min_size, None);
        assert!(effects.wait_for_capacity);
        assert!(!effects.needs_instance_refresh);
    }

    #[test]
    fn test_update_diff_launch_source_change_marks_refresh() {
        let old = spec_with_lc();
        let mut new = spec_with_lc();
        new.launch_configuration = Some("web-lc-v2".to_string());

        let (input, effects) = build_update_request(&old, &new, "web");
        assert_eq!(input.launch_configuration.as_deref(), Some("web-lc-v2"));
        assert!(effects.needs_instance_refresh);
        assert!(!effects.wait_for_capacity);
    }

    #[test]
    fn test_update_diff_cleared_termination_policies_send_default() {
        let mut old = spec_with_lc();
        old.termination_policies = vec!["OldestInstance".to_string()];
        let new = spec_with_lc();

        let (input, _) = build_update_request(&old, &new, "web");
        assert_eq!(
            input.termination_policies,
            Some(vec!["Default".to_string()])
        );
    }

    #[test]
    fn test_update_diff_always_sends_scale_in_protection() {
        let old = spec_with_lc();
        let new = spec_with_lc();

        let (input, effects) = build_update_request(&old, &new, "web");
        assert_eq!(input.protect_from_scale_in, Some(false));
        assert_eq!(effects, UpdateEffects::default());
    }
}
