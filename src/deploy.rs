//! Service redeploy orchestration.
//!
//! Both entry points follow the same fixed order: look up what the service
//! runs now, register the replacement revision, point the service at it, then
//! optionally stop the old tasks and deregister the old revision, and finally
//! poll until the service has its desired number of tasks running again. The
//! service scheduler does the actual rollout, stopping tasks only shortcuts
//! its draining.

use stacked_errors::{Result, StackableErr};
use tracing::info;

use crate::{ecs::EcsClient, parsing::family_revision, taskdef::TaskDefDoc};

/// What a redeploy does besides registering the new revision and pointing
/// the service at it
#[derive(Debug, Clone, Copy, Default)]
pub struct RedeployOptions {
    /// Stop the running tasks of the service's family instead of waiting for
    /// the scheduler's rolling replacement
    pub restart: bool,
    /// Deregister the superseded task definition revision afterwards
    pub deregister: bool,
    /// Return as soon as the control plane accepted the update, without
    /// polling for stability
    pub no_wait: bool,
}

/// Clones the service's current task definition with the container named
/// `container` retargeted to `image`, and redeploys the service onto the
/// clone. `image: None` redeploys onto a plain revision bump, which is how a
/// `:latest`-style tag gets re-pulled.
#[tracing::instrument(skip_all, fields(cluster = %cluster, service = %service_arn))]
pub async fn redeploy_image(
    ecs: &EcsClient,
    cluster: &str,
    service_arn: &str,
    container: &str,
    image: Option<&str>,
    opts: RedeployOptions,
) -> Result<()> {
    let old_arn = ecs.task_definition_arn(cluster, service_arn).await?;
    let old = ecs.describe_task_definition(&old_arn).await?;
    let new_arn = ecs
        .clone_task_definition(&old, container, image)
        .await
        .stack_err_with(|| format!("redeploy_image -> could not clone {old_arn}"))?;
    info!("registered task definition {new_arn}");
    redeploy_service(ecs, cluster, service_arn, &old_arn, &new_arn, opts).await
}

/// Registers a caller-supplied task definition document under the service's
/// current family (whatever family the document itself names is overridden)
/// and redeploys the service onto it
#[tracing::instrument(skip_all, fields(cluster = %cluster, service = %service_arn))]
pub async fn redeploy_task_definition(
    ecs: &EcsClient,
    cluster: &str,
    service_arn: &str,
    doc: TaskDefDoc,
    opts: RedeployOptions,
) -> Result<()> {
    let old_arn = ecs.task_definition_arn(cluster, service_arn).await?;
    let old = ecs.describe_task_definition(&old_arn).await?;
    let family = old.family.stack_err_with(|| {
        format!("redeploy_task_definition -> task definition {old_arn} has no family")
    })?;
    let mut reg = doc
        .into_register()
        .stack_err("redeploy_task_definition -> bad task definition document")?;
    if reg.family != family {
        info!("overriding document family \"{}\" with \"{family}\"", reg.family);
        reg.family = family;
    }
    let new_arn = ecs.register_task_definition(reg).await?;
    info!("registered task definition {new_arn}");
    redeploy_service(ecs, cluster, service_arn, &old_arn, &new_arn, opts).await
}

/// The common tail of a redeploy, ordering is fixed: update the service
/// first so that any task the scheduler starts afterwards is already the new
/// revision, only then stop tasks or deregister
async fn redeploy_service(
    ecs: &EcsClient,
    cluster: &str,
    service_arn: &str,
    old_taskdef_arn: &str,
    new_taskdef_arn: &str,
    opts: RedeployOptions,
) -> Result<()> {
    let service = ecs
        .update_service(cluster, service_arn, new_taskdef_arn)
        .await
        .stack_err_with(|| {
            format!("redeploy_service -> could not move {service_arn} onto {new_taskdef_arn}")
        })?;
    info!("service {service_arn} now targets {new_taskdef_arn}");
    if opts.restart {
        let (family, _) = family_revision(old_taskdef_arn)?;
        let stopped = ecs
            .stop_family_tasks(cluster, family, &restart_reason(new_taskdef_arn))
            .await?;
        info!("stopped {} running task(s) of family {family}", stopped.len());
    }
    if opts.deregister {
        ecs.deregister_task_definition(old_taskdef_arn).await?;
        info!("deregistered {old_taskdef_arn}");
    }
    if opts.no_wait {
        return Ok(())
    }
    ecs.wait_service_stable(cluster, service_arn, service.desired_count)
        .await
}

/// Stop reason recorded on the tasks, visible in the stopped task details
fn restart_reason(new_taskdef_arn: &str) -> String {
    match family_revision(new_taskdef_arn) {
        Ok((family, revision)) => format!("superseded by {family}:{revision}"),
        Err(_) => format!("superseded by {new_taskdef_arn}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_reasons() {
        assert_eq!(
            restart_reason("arn:aws:ecs:us-east-1:012345678901:task-definition/billing:43"),
            "superseded by billing:43"
        );
        // a malformed ARN still produces a usable reason
        assert_eq!(restart_reason("nonsense"), "superseded by nonsense");
    }

    #[test]
    fn options_default_to_plain_rollout() {
        let opts = RedeployOptions::default();
        assert!(!opts.restart);
        assert!(!opts.deregister);
        assert!(!opts.no_wait);
    }
}
