//! Incremental set reconciliation
//!
//! Load balancers, target groups, suspended processes, metrics, and tags are
//! all reconciled the same way: diff the observed set against the desired
//! set and issue only the calls that close the gap. Attachment operations
//! additionally respect the provider's 10-item batch ceiling and wait for
//! each batch to settle before the next one is issued.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info};

use crate::api::AsgApi;
use crate::error::{AsgError, Result};
use crate::tags::{self, TagSet};
use crate::wait::{AttachmentKind, AttachmentTransition, wait_for_attachments_settled};

/// Largest attach/detach batch the provider accepts in one call
pub const ATTACHMENT_BATCH_SIZE: usize = 10;

/// Elements to add and remove to turn `old` into `new`
pub fn set_delta(old: &BTreeSet<String>, new: &BTreeSet<String>) -> (Vec<String>, Vec<String>) {
    let add = new.difference(old).cloned().collect();
    let remove = old.difference(new).cloned().collect();
    (add, remove)
}

/// Converge the group's ELB Classic attachments on the desired set.
/// Removals run before additions so the group never exceeds both sets at once.
pub async fn reconcile_load_balancers<A: AsgApi>(
    api: &A,
    group_name: &str,
    old: &BTreeSet<String>,
    new: &BTreeSet<String>,
    interval: Duration,
) -> Result<()> {
    let (add, remove) = set_delta(old, new);
    if add.is_empty() && remove.is_empty() {
        return Ok(());
    }
    info!(
        group = %group_name,
        add = add.len(),
        remove = remove.len(),
        "reconciling load balancer attachments"
    );

    for batch in remove.chunks(ATTACHMENT_BATCH_SIZE) {
        api.detach_load_balancers(group_name, batch)
            .await
            .map_err(|e| AsgError::provider("DetachLoadBalancers", group_name, e))?;
        wait_for_attachments_settled(
            api,
            group_name,
            AttachmentKind::LoadBalancer,
            AttachmentTransition::Removing,
            interval,
        )
        .await?;
    }

    for batch in add.chunks(ATTACHMENT_BATCH_SIZE) {
        api.attach_load_balancers(group_name, batch)
            .await
            .map_err(|e| AsgError::provider("AttachLoadBalancers", group_name, e))?;
        wait_for_attachments_settled(
            api,
            group_name,
            AttachmentKind::LoadBalancer,
            AttachmentTransition::Adding,
            interval,
        )
        .await?;
    }

    Ok(())
}

/// Converge the group's target group attachments on the desired set
pub async fn reconcile_target_groups<A: AsgApi>(
    api: &A,
    group_name: &str,
    old: &BTreeSet<String>,
    new: &BTreeSet<String>,
    interval: Duration,
) -> Result<()> {
    let (add, remove) = set_delta(old, new);
    if add.is_empty() && remove.is_empty() {
        return Ok(());
    }
    info!(
        group = %group_name,
        add = add.len(),
        remove = remove.len(),
        "reconciling target group attachments"
    );

    for batch in remove.chunks(ATTACHMENT_BATCH_SIZE) {
        api.detach_target_groups(group_name, batch)
            .await
            .map_err(|e| AsgError::provider("DetachLoadBalancerTargetGroups", group_name, e))?;
        wait_for_attachments_settled(
            api,
            group_name,
            AttachmentKind::TargetGroup,
            AttachmentTransition::Removing,
            interval,
        )
        .await?;
    }

    for batch in add.chunks(ATTACHMENT_BATCH_SIZE) {
        api.attach_target_groups(group_name, batch)
            .await
            .map_err(|e| AsgError::provider("AttachLoadBalancerTargetGroups", group_name, e))?;
        wait_for_attachments_settled(
            api,
            group_name,
            AttachmentKind::TargetGroup,
            AttachmentTransition::Adding,
            interval,
        )
        .await?;
    }

    Ok(())
}

/// Converge the suspended-process set: resume what should run, suspend what
/// should not.
pub async fn reconcile_suspended_processes<A: AsgApi>(
    api: &A,
    group_name: &str,
    old: &BTreeSet<String>,
    new: &BTreeSet<String>,
) -> Result<()> {
    let (suspend, resume) = set_delta(old, new);

    if !resume.is_empty() {
        debug!(group = %group_name, count = resume.len(), "resuming scaling processes");
        api.resume_processes(group_name, &resume)
            .await
            .map_err(|e| AsgError::provider("ResumeProcesses", group_name, e))?;
    }

    if !suspend.is_empty() {
        debug!(group = %group_name, count = suspend.len(), "suspending scaling processes");
        api.suspend_processes(group_name, &suspend)
            .await
            .map_err(|e| AsgError::provider("SuspendProcesses", group_name, e))?;
    }

    Ok(())
}

/// Converge the enabled-metrics set. Disables run first so a metric moving
/// between granularities never reports under both.
pub async fn reconcile_metrics<A: AsgApi>(
    api: &A,
    group_name: &str,
    old: &BTreeSet<String>,
    new: &BTreeSet<String>,
    granularity: &str,
) -> Result<()> {
    let (enable, disable) = set_delta(old, new);

    if !disable.is_empty() {
        debug!(group = %group_name, count = disable.len(), "disabling metrics collection");
        api.disable_metrics(group_name, &disable)
            .await
            .map_err(|e| AsgError::provider("DisableMetricsCollection", group_name, e))?;
    }

    if !enable.is_empty() {
        debug!(group = %group_name, count = enable.len(), "enabling metrics collection");
        api.enable_metrics(group_name, &enable, granularity)
            .await
            .map_err(|e| AsgError::provider("EnableMetricsCollection", group_name, e))?;
    }

    Ok(())
}

/// What a tag reconciliation did, and whether dependent instances are stale
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagReconcileOutcome {
    /// Any tag was created, changed, or removed
    pub changed: bool,
    /// The propagate-at-launch subset changed, so instances launched under the
    /// old tags no longer match the desired state
    pub needs_instance_refresh: bool,
}

/// Converge tags on the desired set. Removals are issued before upserts so a
/// key changing case on the provider side is not left duplicated.
pub async fn reconcile_tags<A: AsgApi>(
    api: &A,
    group_name: &str,
    old: &TagSet,
    new: &TagSet,
) -> Result<TagReconcileOutcome> {
    let delta = tags::TagSet::diff(old, new);
    if delta.is_empty() {
        return Ok(TagReconcileOutcome::default());
    }

    info!(
        group = %group_name,
        upsert = delta.upsert.len(),
        remove = delta.remove.len(),
        "reconciling tags"
    );

    if !delta.remove.is_empty() {
        api.delete_tags(group_name, &delta.remove)
            .await
            .map_err(|e| AsgError::provider("DeleteTags", group_name, e))?;
    }

    if !delta.upsert.is_empty() {
        api.create_or_update_tags(group_name, &delta.upsert)
            .await
            .map_err(|e| AsgError::provider("CreateOrUpdateTags", group_name, e))?;
    }

    Ok(TagReconcileOutcome {
        changed: true,
        needs_instance_refresh: tags::propagated_subset_changed(old, new),
    })
}
