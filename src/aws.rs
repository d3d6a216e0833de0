//! SDK-backed provider client
//!
//! The only module that touches the AWS SDKs. Everything crossing the
//! [`AsgApi`] boundary is converted to the engine's own shapes, and every SDK
//! error is classified into a [`ProviderError`] by its error code so the
//! engine can decide what is retryable without parsing strings twice.

use std::collections::HashMap;

use aws_sdk_autoscaling::Client as AsgClient;
use aws_sdk_autoscaling::error::ProvideErrorMetadata;
use aws_sdk_autoscaling::types as asg_types;
use aws_sdk_elasticloadbalancing::Client as ElbClassicClient;
use aws_sdk_elasticloadbalancingv2::Client as ElbV2Client;
use tracing::debug;

use crate::api::{
    AsgApi, AttachmentItem, AttachmentPage, CreateGroupInput, ObservedGroup, ObservedInstance,
    ProviderError, ProviderErrorKind, UpdateGroupInput,
};
use crate::spec::{
    InstancesDistribution, LaunchTemplateOverride, LaunchTemplateSpec, LifecycleHookSpec,
    MixedInstancesPolicy, MixedLaunchTemplate,
};
use crate::tags::TagEntry;

/// Resource type string the tagging APIs require
const TAG_RESOURCE_TYPE: &str = "auto-scaling-group";

/// [`AsgApi`] implementation over the Auto Scaling, ELB Classic, and ELBv2
/// service clients
pub struct AwsAsgClient {
    asg: AsgClient,
    elb: ElbClassicClient,
    elbv2: ElbV2Client,
}

impl AwsAsgClient {
    /// Build from already-constructed service clients
    pub fn new(asg: AsgClient, elb: ElbClassicClient, elbv2: ElbV2Client) -> Self {
        Self { asg, elb, elbv2 }
    }

    /// Build all three service clients from one shared AWS config
    pub fn from_config(config: &aws_config::SdkConfig) -> Self {
        Self::new(
            AsgClient::new(config),
            ElbClassicClient::new(config),
            ElbV2Client::new(config),
        )
    }
}

/// Map an SDK error onto the engine's classification by its error code.
///
/// The Auto Scaling API reports absent groups through "ValidationError" with
/// a "not found" message rather than a dedicated code, so that case needs the
/// message inspected.
fn classify<E>(err: E) -> ProviderError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let code = err.code().unwrap_or("").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());

    let kind = match code.as_str() {
        "ResourceInUse" => ProviderErrorKind::ResourceInUse,
        "ScalingActivityInProgress" => ProviderErrorKind::ScalingInProgress,
        "ValidationError" => {
            if message.contains("not found") {
                ProviderErrorKind::NotFound
            } else {
                ProviderErrorKind::Validation
            }
        }
        _ => ProviderErrorKind::Other,
    };

    if code.is_empty() {
        ProviderError::new(kind, message)
    } else {
        ProviderError::new(kind, format!("{code}: {message}"))
    }
}

fn none_if_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

fn launch_template_to_sdk(template: &LaunchTemplateSpec) -> asg_types::LaunchTemplateSpecification {
    asg_types::LaunchTemplateSpecification::builder()
        .set_launch_template_id(template.id.clone())
        .set_launch_template_name(template.name.clone())
        .set_version(template.version.clone())
        .build()
}

fn launch_template_from_sdk(
    template: &asg_types::LaunchTemplateSpecification,
) -> LaunchTemplateSpec {
    LaunchTemplateSpec {
        id: template.launch_template_id().map(str::to_string),
        name: template.launch_template_name().map(str::to_string),
        version: template.version().map(str::to_string),
    }
}

fn mixed_policy_to_sdk(policy: &MixedInstancesPolicy) -> asg_types::MixedInstancesPolicy {
    let distribution = policy.instances_distribution.as_ref().map(|dist| {
        asg_types::InstancesDistribution::builder()
            .set_on_demand_allocation_strategy(dist.on_demand_allocation_strategy.clone())
            .set_on_demand_base_capacity(dist.on_demand_base_capacity)
            .set_on_demand_percentage_above_base_capacity(
                dist.on_demand_percentage_above_base_capacity,
            )
            .set_spot_allocation_strategy(dist.spot_allocation_strategy.clone())
            .set_spot_instance_pools(dist.spot_instance_pools)
            .set_spot_max_price(dist.spot_max_price.clone())
            .build()
    });

    let overrides: Vec<asg_types::LaunchTemplateOverrides> = policy
        .launch_template
        .overrides
        .iter()
        .map(|o| {
            asg_types::LaunchTemplateOverrides::builder()
                .set_instance_type(o.instance_type.clone())
                .set_weighted_capacity(o.weighted_capacity.clone())
                .build()
        })
        .collect();

    let launch_template = asg_types::LaunchTemplate::builder()
        .launch_template_specification(launch_template_to_sdk(
            &policy.launch_template.specification,
        ))
        .set_overrides(none_if_empty(overrides))
        .build();

    asg_types::MixedInstancesPolicy::builder()
        .set_instances_distribution(distribution)
        .launch_template(launch_template)
        .build()
}

fn mixed_policy_from_sdk(policy: &asg_types::MixedInstancesPolicy) -> Option<MixedInstancesPolicy> {
    let launch_template = policy.launch_template()?;
    let specification = launch_template
        .launch_template_specification()
        .map(launch_template_from_sdk)?;

    let overrides = launch_template
        .overrides()
        .iter()
        .map(|o| LaunchTemplateOverride {
            instance_type: o.instance_type().map(str::to_string),
            weighted_capacity: o.weighted_capacity().map(str::to_string),
        })
        .collect();

    let instances_distribution =
        policy
            .instances_distribution()
            .map(|dist| InstancesDistribution {
                on_demand_allocation_strategy: dist
                    .on_demand_allocation_strategy()
                    .map(str::to_string),
                on_demand_base_capacity: dist.on_demand_base_capacity(),
                on_demand_percentage_above_base_capacity: dist
                    .on_demand_percentage_above_base_capacity(),
                spot_allocation_strategy: dist.spot_allocation_strategy().map(str::to_string),
                spot_instance_pools: dist.spot_instance_pools(),
                spot_max_price: dist.spot_max_price().map(str::to_string),
            });

    Some(MixedInstancesPolicy {
        instances_distribution,
        launch_template: MixedLaunchTemplate {
            specification,
            overrides,
        },
    })
}

fn tag_to_sdk(group: &str, entry: &TagEntry) -> asg_types::Tag {
    asg_types::Tag::builder()
        .key(&entry.key)
        .value(&entry.value)
        .propagate_at_launch(entry.propagate_at_launch)
        .resource_id(group)
        .resource_type(TAG_RESOURCE_TYPE)
        .build()
}

fn tags_to_sdk(group: &str, entries: &[TagEntry]) -> Vec<asg_types::Tag> {
    entries.iter().map(|t| tag_to_sdk(group, t)).collect()
}

fn observed_from_sdk(group: &asg_types::AutoScalingGroup) -> ObservedGroup {
    let instances = group
        .instances()
        .iter()
        .map(|i| ObservedInstance {
            instance_id: i.instance_id().unwrap_or_default().to_string(),
            health_status: i.health_status().unwrap_or_default().to_string(),
            lifecycle_state: i
                .lifecycle_state()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
        })
        .collect();

    let tags = group
        .tags()
        .iter()
        .map(|t| TagEntry {
            key: t.key().unwrap_or_default().to_string(),
            value: t.value().unwrap_or_default().to_string(),
            propagate_at_launch: t.propagate_at_launch().unwrap_or_default(),
        })
        .collect();

    let enabled_metrics: Vec<String> = group
        .enabled_metrics()
        .iter()
        .filter_map(|m| m.metric().map(str::to_string))
        .collect();
    let metrics_granularity = group
        .enabled_metrics()
        .first()
        .and_then(|m| m.granularity())
        .map(str::to_string);

    ObservedGroup {
        name: group.auto_scaling_group_name().unwrap_or_default().to_string(),
        arn: group.auto_scaling_group_arn().unwrap_or_default().to_string(),
        min_size: group.min_size().unwrap_or_default(),
        max_size: group.max_size().unwrap_or_default(),
        desired_capacity: group.desired_capacity().unwrap_or_default(),
        default_cooldown: group.default_cooldown(),
        availability_zones: group.availability_zones().to_vec(),
        vpc_zone_identifier: group.vpc_zone_identifier().unwrap_or_default().to_string(),
        placement_group: group.placement_group().map(str::to_string),
        health_check_type: group.health_check_type().map(str::to_string),
        health_check_grace_period: group.health_check_grace_period(),
        launch_configuration: group.launch_configuration_name().map(str::to_string),
        launch_template: group.launch_template().map(launch_template_from_sdk),
        mixed_instances_policy: group
            .mixed_instances_policy()
            .and_then(mixed_policy_from_sdk),
        instances,
        load_balancer_names: group.load_balancer_names().to_vec(),
        target_group_arns: group.target_group_arns().to_vec(),
        enabled_metrics,
        metrics_granularity,
        suspended_processes: group
            .suspended_processes()
            .iter()
            .filter_map(|p| p.process_name().map(str::to_string))
            .collect(),
        termination_policies: group.termination_policies().to_vec(),
        tags,
        service_linked_role_arn: group.service_linked_role_arn().map(str::to_string),
        max_instance_lifetime: group.max_instance_lifetime(),
        protect_from_scale_in: group.new_instances_protected_from_scale_in().unwrap_or_default(),
    }
}

impl AsgApi for AwsAsgClient {
    async fn create_group(&self, input: &CreateGroupInput) -> Result<(), ProviderError> {
        let tags = tags_to_sdk(&input.name, &input.tags);

        self.asg
            .create_auto_scaling_group()
            .auto_scaling_group_name(&input.name)
            .min_size(input.min_size)
            .max_size(input.max_size)
            .set_desired_capacity(input.desired_capacity)
            .set_launch_configuration_name(input.launch_configuration.clone())
            .set_launch_template(input.launch_template.as_ref().map(launch_template_to_sdk))
            .set_mixed_instances_policy(
                input.mixed_instances_policy.as_ref().map(mixed_policy_to_sdk),
            )
            .set_availability_zones(none_if_empty(input.availability_zones.clone()))
            .set_vpc_zone_identifier(input.vpc_zone_identifier.clone())
            .set_placement_group(input.placement_group.clone())
            .set_default_cooldown(input.default_cooldown)
            .set_health_check_type(input.health_check_type.clone())
            .set_health_check_grace_period(input.health_check_grace_period)
            .set_termination_policies(none_if_empty(input.termination_policies.clone()))
            .set_load_balancer_names(none_if_empty(input.load_balancers.clone()))
            .set_target_group_arns(none_if_empty(input.target_group_arns.clone()))
            .set_tags(none_if_empty(tags))
            .set_service_linked_role_arn(input.service_linked_role_arn.clone())
            .set_max_instance_lifetime(input.max_instance_lifetime)
            .new_instances_protected_from_scale_in(input.protect_from_scale_in)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn update_group(&self, input: &UpdateGroupInput) -> Result<(), ProviderError> {
        self.asg
            .update_auto_scaling_group()
            .auto_scaling_group_name(&input.name)
            .set_min_size(input.min_size)
            .set_max_size(input.max_size)
            .set_desired_capacity(input.desired_capacity)
            .set_launch_configuration_name(input.launch_configuration.clone())
            .set_launch_template(input.launch_template.as_ref().map(launch_template_to_sdk))
            .set_mixed_instances_policy(
                input.mixed_instances_policy.as_ref().map(mixed_policy_to_sdk),
            )
            .set_availability_zones(input.availability_zones.clone())
            .set_vpc_zone_identifier(input.vpc_zone_identifier.clone())
            .set_placement_group(input.placement_group.clone())
            .set_default_cooldown(input.default_cooldown)
            .set_health_check_type(input.health_check_type.clone())
            .set_health_check_grace_period(input.health_check_grace_period)
            .set_termination_policies(input.termination_policies.clone())
            .set_service_linked_role_arn(input.service_linked_role_arn.clone())
            .set_max_instance_lifetime(input.max_instance_lifetime)
            .set_new_instances_protected_from_scale_in(input.protect_from_scale_in)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_group(&self, name: &str, force: bool) -> Result<(), ProviderError> {
        self.asg
            .delete_auto_scaling_group()
            .auto_scaling_group_name(name)
            .force_delete(force)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn describe_group(&self, name: &str) -> Result<Option<ObservedGroup>, ProviderError> {
        let output = self
            .asg
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .map_err(classify)?;

        // The API matches names loosely; insist on an exact match.
        let group = output
            .auto_scaling_groups()
            .iter()
            .find(|g| g.auto_scaling_group_name() == Some(name))
            .map(observed_from_sdk);

        if group.is_none() {
            debug!(group = %name, "group not present in describe response");
        }
        Ok(group)
    }

    async fn put_lifecycle_hook(
        &self,
        group: &str,
        hook: &LifecycleHookSpec,
    ) -> Result<(), ProviderError> {
        self.asg
            .put_lifecycle_hook()
            .auto_scaling_group_name(group)
            .lifecycle_hook_name(&hook.name)
            .lifecycle_transition(&hook.lifecycle_transition)
            .set_default_result(hook.default_result.clone())
            .set_heartbeat_timeout(hook.heartbeat_timeout)
            .set_notification_metadata(hook.notification_metadata.clone())
            .set_notification_target_arn(hook.notification_target_arn.clone())
            .set_role_arn(hook.role_arn.clone())
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn attach_load_balancers(
        &self,
        group: &str,
        names: &[String],
    ) -> Result<(), ProviderError> {
        self.asg
            .attach_load_balancers()
            .auto_scaling_group_name(group)
            .set_load_balancer_names(Some(names.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn detach_load_balancers(
        &self,
        group: &str,
        names: &[String],
    ) -> Result<(), ProviderError> {
        self.asg
            .detach_load_balancers()
            .auto_scaling_group_name(group)
            .set_load_balancer_names(Some(names.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn attach_target_groups(&self, group: &str, arns: &[String]) -> Result<(), ProviderError> {
        self.asg
            .attach_load_balancer_target_groups()
            .auto_scaling_group_name(group)
            .set_target_group_arns(Some(arns.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn detach_target_groups(&self, group: &str, arns: &[String]) -> Result<(), ProviderError> {
        self.asg
            .detach_load_balancer_target_groups()
            .auto_scaling_group_name(group)
            .set_target_group_arns(Some(arns.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn describe_load_balancers(
        &self,
        group: &str,
        page: Option<String>,
    ) -> Result<AttachmentPage, ProviderError> {
        let output = self
            .asg
            .describe_load_balancers()
            .auto_scaling_group_name(group)
            .set_next_token(page)
            .send()
            .await
            .map_err(classify)?;

        let items = output
            .load_balancers()
            .iter()
            .map(|lb| AttachmentItem {
                id: lb.load_balancer_name().unwrap_or_default().to_string(),
                state: lb.state().unwrap_or_default().to_string(),
            })
            .collect();

        Ok(AttachmentPage {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn describe_target_groups(
        &self,
        group: &str,
        page: Option<String>,
    ) -> Result<AttachmentPage, ProviderError> {
        let output = self
            .asg
            .describe_load_balancer_target_groups()
            .auto_scaling_group_name(group)
            .set_next_token(page)
            .send()
            .await
            .map_err(classify)?;

        let items = output
            .load_balancer_target_groups()
            .iter()
            .map(|tg| AttachmentItem {
                id: tg
                    .load_balancer_target_group_arn()
                    .unwrap_or_default()
                    .to_string(),
                state: tg.state().unwrap_or_default().to_string(),
            })
            .collect();

        Ok(AttachmentPage {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn suspend_processes(
        &self,
        group: &str,
        processes: &[String],
    ) -> Result<(), ProviderError> {
        self.asg
            .suspend_processes()
            .auto_scaling_group_name(group)
            .set_scaling_processes(Some(processes.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn resume_processes(
        &self,
        group: &str,
        processes: &[String],
    ) -> Result<(), ProviderError> {
        self.asg
            .resume_processes()
            .auto_scaling_group_name(group)
            .set_scaling_processes(Some(processes.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn enable_metrics(
        &self,
        group: &str,
        metrics: &[String],
        granularity: &str,
    ) -> Result<(), ProviderError> {
        self.asg
            .enable_metrics_collection()
            .auto_scaling_group_name(group)
            .set_metrics(Some(metrics.to_vec()))
            .granularity(granularity)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn disable_metrics(&self, group: &str, metrics: &[String]) -> Result<(), ProviderError> {
        self.asg
            .disable_metrics_collection()
            .auto_scaling_group_name(group)
            .set_metrics(Some(metrics.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_or_update_tags(
        &self,
        group: &str,
        tags: &[TagEntry],
    ) -> Result<(), ProviderError> {
        self.asg
            .create_or_update_tags()
            .set_tags(Some(tags_to_sdk(group, tags)))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_tags(&self, group: &str, tags: &[TagEntry]) -> Result<(), ProviderError> {
        self.asg
            .delete_tags()
            .set_tags(Some(tags_to_sdk(group, tags)))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn elb_instance_health(
        &self,
        lb_name: &str,
    ) -> Result<HashMap<String, String>, ProviderError> {
        let output = self
            .elb
            .describe_instance_health()
            .load_balancer_name(lb_name)
            .send()
            .await
            .map_err(classify)?;

        Ok(output
            .instance_states()
            .iter()
            .filter_map(|s| {
                let id = s.instance_id()?.to_string();
                let state = s.state()?.to_string();
                Some((id, state))
            })
            .collect())
    }

    async fn target_health(&self, tg_arn: &str) -> Result<HashMap<String, String>, ProviderError> {
        let output = self
            .elbv2
            .describe_target_health()
            .target_group_arn(tg_arn)
            .send()
            .await
            .map_err(classify)?;

        Ok(output
            .target_health_descriptions()
            .iter()
            .filter_map(|desc| {
                let id = desc.target()?.id()?.to_string();
                let state = desc.target_health()?.state()?.as_str().to_string();
                Some((id, state))
            })
            .collect())
    }
}
