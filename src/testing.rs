//! Scripted in-memory control plane for tests
//!
//! [`FakeAsgApi`] implements [`AsgApi`] against a single in-memory group. It
//! records every call it receives and lets tests script failures and paged
//! responses, so orchestration-order and retry behavior can be asserted
//! without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::api::{
    AsgApi, AttachmentItem, AttachmentPage, CreateGroupInput, ObservedGroup, ObservedInstance,
    ProviderError, UpdateGroupInput,
};
use crate::spec::LifecycleHookSpec;
use crate::tags::TagEntry;

#[derive(Default)]
struct FakeState {
    group: Option<ObservedGroup>,
    describe_script: VecDeque<Option<ObservedGroup>>,
    create_errors: VecDeque<ProviderError>,
    delete_errors: VecDeque<ProviderError>,
    lb_pages: VecDeque<AttachmentPage>,
    tg_pages: VecDeque<AttachmentPage>,
    elb_health: HashMap<String, HashMap<String, String>>,
    target_health: HashMap<String, HashMap<String, String>>,
    calls: Vec<String>,
    auto_converge: bool,
}

/// In-memory [`AsgApi`] with scripted failures and a call log
pub struct FakeAsgApi {
    state: Mutex<FakeState>,
}

impl Default for FakeAsgApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAsgApi {
    /// Empty control plane; instances converge on capacity instantly
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                auto_converge: true,
                ..Default::default()
            }),
        }
    }

    /// Start with an existing group
    pub fn with_group(self, group: ObservedGroup) -> Self {
        self.state.lock().unwrap().group = Some(group);
        self
    }

    /// Freeze the instance list: capacity changes no longer adjust it
    pub fn without_auto_converge(self) -> Self {
        self.state.lock().unwrap().auto_converge = false;
        self
    }

    /// Script the next describe responses, ahead of the live group
    pub fn push_describe(&self, response: Option<ObservedGroup>) {
        self.state.lock().unwrap().describe_script.push_back(response);
    }

    /// Script the next create call to fail
    pub fn push_create_error(&self, error: ProviderError) {
        self.state.lock().unwrap().create_errors.push_back(error);
    }

    /// Script the next delete call to fail
    pub fn push_delete_error(&self, error: ProviderError) {
        self.state.lock().unwrap().delete_errors.push_back(error);
    }

    /// Script the next load balancer attachment page
    pub fn push_lb_page(&self, page: AttachmentPage) {
        self.state.lock().unwrap().lb_pages.push_back(page);
    }

    /// Script the next target group attachment page
    pub fn push_tg_page(&self, page: AttachmentPage) {
        self.state.lock().unwrap().tg_pages.push_back(page);
    }

    /// Set ELB Classic instance health for one load balancer
    pub fn set_elb_health(&self, lb: &str, states: HashMap<String, String>) {
        self.state.lock().unwrap().elb_health.insert(lb.to_string(), states);
    }

    /// Set target health for one target group
    pub fn set_target_health(&self, tg: &str, states: HashMap<String, String>) {
        self.state
            .lock()
            .unwrap()
            .target_health
            .insert(tg.to_string(), states);
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Current live group, if any
    pub fn group(&self) -> Option<ObservedGroup> {
        self.state.lock().unwrap().group.clone()
    }
}

fn healthy_instances(count: i32) -> Vec<ObservedInstance> {
    (0..count)
        .map(|i| ObservedInstance {
            instance_id: format!("i-{i:08}"),
            health_status: "Healthy".to_string(),
            lifecycle_state: "InService".to_string(),
        })
        .collect()
}

fn settled_page(ids: &[String]) -> AttachmentPage {
    AttachmentPage {
        items: ids
            .iter()
            .map(|id| AttachmentItem {
                id: id.clone(),
                state: "Added".to_string(),
            })
            .collect(),
        next_token: None,
    }
}

impl AsgApi for FakeAsgApi {
    async fn create_group(&self, input: &CreateGroupInput) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create_group".to_string());
        if let Some(err) = state.create_errors.pop_front() {
            return Err(err);
        }

        let desired = input.desired_capacity.unwrap_or(input.min_size);
        let instances = if state.auto_converge {
            healthy_instances(desired)
        } else {
            Vec::new()
        };
        // The provider injects "Default" when no policy is declared.
        let termination_policies = if input.termination_policies.is_empty() {
            vec!["Default".to_string()]
        } else {
            input.termination_policies.clone()
        };

        state.group = Some(ObservedGroup {
            name: input.name.clone(),
            arn: format!("arn:aws:autoscaling:::autoScalingGroup/{}", input.name),
            min_size: input.min_size,
            max_size: input.max_size,
            desired_capacity: desired,
            default_cooldown: input.default_cooldown,
            availability_zones: input.availability_zones.clone(),
            vpc_zone_identifier: input.vpc_zone_identifier.clone().unwrap_or_default(),
            placement_group: input.placement_group.clone(),
            health_check_type: input.health_check_type.clone(),
            health_check_grace_period: input.health_check_grace_period,
            launch_configuration: input.launch_configuration.clone(),
            launch_template: input.launch_template.clone(),
            mixed_instances_policy: input.mixed_instances_policy.clone(),
            instances,
            load_balancer_names: input.load_balancers.clone(),
            target_group_arns: input.target_group_arns.clone(),
            termination_policies,
            tags: input.tags.clone(),
            service_linked_role_arn: input.service_linked_role_arn.clone(),
            max_instance_lifetime: input.max_instance_lifetime,
            protect_from_scale_in: input.protect_from_scale_in,
            ..Default::default()
        });
        Ok(())
    }

    async fn update_group(&self, input: &UpdateGroupInput) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("update_group".to_string());
        let auto_converge = state.auto_converge;

        if let Some(group) = state.group.as_mut() {
            if let Some(min) = input.min_size {
                group.min_size = min;
            }
            if let Some(max) = input.max_size {
                group.max_size = max;
            }
            if let Some(desired) = input.desired_capacity {
                group.desired_capacity = desired;
            }
            if input.launch_configuration.is_some() {
                group.launch_configuration = input.launch_configuration.clone();
            }
            if input.launch_template.is_some() {
                group.launch_template = input.launch_template.clone();
            }
            if let Some(policies) = &input.termination_policies {
                group.termination_policies = policies.clone();
            }
            if let Some(zone_ids) = &input.vpc_zone_identifier {
                group.vpc_zone_identifier = zone_ids.clone();
            }
            if let Some(protect) = input.protect_from_scale_in {
                group.protect_from_scale_in = protect;
            }
            if auto_converge {
                group.instances = healthy_instances(group.desired_capacity);
            }
        }
        Ok(())
    }

    async fn delete_group(&self, _name: &str, force: bool) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_group:force={force}"));
        if let Some(err) = state.delete_errors.pop_front() {
            return Err(err);
        }
        state.group = None;
        Ok(())
    }

    async fn describe_group(&self, _name: &str) -> Result<Option<ObservedGroup>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("describe_group".to_string());
        if let Some(scripted) = state.describe_script.pop_front() {
            return Ok(scripted);
        }
        Ok(state.group.clone())
    }

    async fn put_lifecycle_hook(
        &self,
        _group: &str,
        hook: &LifecycleHookSpec,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("put_lifecycle_hook:{}", hook.name));
        Ok(())
    }

    async fn attach_load_balancers(
        &self,
        _group: &str,
        names: &[String],
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("attach_load_balancers:{}", names.len()));
        if let Some(group) = state.group.as_mut() {
            group.load_balancer_names.extend(names.iter().cloned());
        }
        Ok(())
    }

    async fn detach_load_balancers(
        &self,
        _group: &str,
        names: &[String],
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("detach_load_balancers:{}", names.len()));
        if let Some(group) = state.group.as_mut() {
            group.load_balancer_names.retain(|n| !names.contains(n));
        }
        Ok(())
    }

    async fn attach_target_groups(
        &self,
        _group: &str,
        arns: &[String],
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("attach_target_groups:{}", arns.len()));
        if let Some(group) = state.group.as_mut() {
            group.target_group_arns.extend(arns.iter().cloned());
        }
        Ok(())
    }

    async fn detach_target_groups(
        &self,
        _group: &str,
        arns: &[String],
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("detach_target_groups:{}", arns.len()));
        if let Some(group) = state.group.as_mut() {
            group.target_group_arns.retain(|a| !arns.contains(a));
        }
        Ok(())
    }

    async fn describe_load_balancers(
        &self,
        _group: &str,
        page: Option<String>,
    ) -> Result<AttachmentPage, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!(
            "describe_load_balancers:token={}",
            page.as_deref().unwrap_or("none")
        ));
        if let Some(scripted) = state.lb_pages.pop_front() {
            return Ok(scripted);
        }
        let ids = state
            .group
            .as_ref()
            .map(|g| g.load_balancer_names.clone())
            .unwrap_or_default();
        Ok(settled_page(&ids))
    }

    async fn describe_target_groups(
        &self,
        _group: &str,
        page: Option<String>,
    ) -> Result<AttachmentPage, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!(
            "describe_target_groups:token={}",
            page.as_deref().unwrap_or("none")
        ));
        if let Some(scripted) = state.tg_pages.pop_front() {
            return Ok(scripted);
        }
        let ids = state
            .group
            .as_ref()
            .map(|g| g.target_group_arns.clone())
            .unwrap_or_default();
        Ok(settled_page(&ids))
    }

    async fn suspend_processes(
        &self,
        _group: &str,
        processes: &[String],
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("suspend_processes:{}", processes.join(",")));
        if let Some(group) = state.group.as_mut() {
            group.suspended_processes.extend(processes.iter().cloned());
        }
        Ok(())
    }

    async fn resume_processes(
        &self,
        _group: &str,
        processes: &[String],
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("resume_processes:{}", processes.join(",")));
        if let Some(group) = state.group.as_mut() {
            group.suspended_processes.retain(|p| !processes.contains(p));
        }
        Ok(())
    }

    async fn enable_metrics(
        &self,
        _group: &str,
        metrics: &[String],
        granularity: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("enable_metrics:{}", metrics.join(",")));
        if let Some(group) = state.group.as_mut() {
            group.enabled_metrics.extend(metrics.iter().cloned());
            group.metrics_granularity = Some(granularity.to_string());
        }
        Ok(())
    }

    async fn disable_metrics(&self, _group: &str, metrics: &[String]) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("disable_metrics:{}", metrics.join(",")));
        if let Some(group) = state.group.as_mut() {
            group.enabled_metrics.retain(|m| !metrics.contains(m));
        }
        Ok(())
    }

    async fn create_or_update_tags(
        &self,
        _group: &str,
        tags: &[TagEntry],
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("create_or_update_tags:{}", tags.len()));
        if let Some(group) = state.group.as_mut() {
            for tag in tags {
                group.tags.retain(|t| t.key != tag.key);
                group.tags.push(tag.clone());
            }
        }
        Ok(())
    }

    async fn delete_tags(&self, _group: &str, tags: &[TagEntry]) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_tags:{}", tags.len()));
        if let Some(group) = state.group.as_mut() {
            group
                .tags
                .retain(|t| !tags.iter().any(|dead| dead.key == t.key));
        }
        Ok(())
    }

    async fn elb_instance_health(
        &self,
        lb_name: &str,
    ) -> Result<HashMap<String, String>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("elb_instance_health:{lb_name}"));
        Ok(state.elb_health.get(lb_name).cloned().unwrap_or_default())
    }

    async fn target_health(&self, tg_arn: &str) -> Result<HashMap<String, String>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("target_health:{tg_arn}"));
        Ok(state.target_health.get(tg_arn).cloned().unwrap_or_default())
    }
}
