//! Thin adapter over the ECS control plane.
//!
//! [EcsClient] wraps the raw API client with the handful of calls the
//! command-line tools need, stacking enough context onto every error that a
//! failed call can be traced without rerunning it. Nothing here decides call
//! order, that is [crate::deploy]'s job.

use std::time::Duration;

use aws_config::SdkConfig;
use aws_sdk_ecs::{
    error::DisplayErrorContext,
    types::{
        ContainerDefinition, DesiredStatus, Service, Session, Task, TaskDefinition,
        TaskDefinitionStatus,
    },
    Client,
};
use stacked_errors::{bail, Result, StackableErr};
use tracing::{debug, info};

use crate::{taskdef::RegisterTaskDef, wait_for_ok, STD_POLL_DELAY};

/// Renders an SDK error with its full source chain, the plain `Display` of
/// the wrapper is just the variant name
pub(crate) fn sdk_display<E: std::error::Error>(err: E) -> String {
    format!("{}", DisplayErrorContext(err))
}

fn none_if_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

/// Number of [STD_POLL_DELAY] polls that fit in `timeout`, at least one so
/// that `--timeout 0` still checks once
fn poll_tries(timeout: Duration) -> u64 {
    timeout
        .as_secs()
        .div_ceil(STD_POLL_DELAY.as_secs())
        .max(1)
}

/// Swaps the image of every container named `container` in place. When
/// `image` is `None` the definitions are left untouched, registering the
/// clone then only bumps the revision. Errors if no container matches.
pub(crate) fn retarget_image(
    defs: &mut [ContainerDefinition],
    container: &str,
    image: Option<&str>,
) -> Result<()> {
    let mut found = false;
    for def in defs.iter_mut() {
        if def.name.as_deref() == Some(container) {
            if let Some(image) = image {
                def.image = Some(image.to_owned());
            }
            found = true;
        }
    }
    if !found {
        bail!(
            "retarget_image -> no container named \"{container}\" in the task definition \
             (containers: {:?})",
            defs.iter().filter_map(|d| d.name.as_deref()).collect::<Vec<_>>()
        )
    }
    Ok(())
}

/// Abstraction over the ECS API client
#[derive(Debug, Clone)]
pub struct EcsClient {
    client: Client,
    /// Polling budget for [EcsClient::wait_service_stable]
    timeout: Duration,
}

impl EcsClient {
    /// Creates the adapter from a loaded AWS config. `timeout` bounds
    /// [EcsClient::wait_service_stable].
    pub fn new(config: &SdkConfig, timeout: Duration) -> Self {
        Self {
            client: Client::new(config),
            timeout,
        }
    }

    /// Returns the ARNs of all services in the cluster, following pagination
    pub async fn list_services(&self, cluster: &str) -> Result<Vec<String>> {
        let mut stream = self
            .client
            .list_services()
            .cluster(cluster)
            .into_paginator()
            .items()
            .send();
        let mut arns = vec![];
        while let Some(arn) = stream.next().await {
            arns.push(
                arn.map_err(sdk_display)
                    .stack_err_with(|| format!("EcsClient::list_services(cluster: {cluster})"))?,
            );
        }
        Ok(arns)
    }

    /// Returns the first service ARN listed for the cluster, if there is any
    pub async fn default_service_arn(&self, cluster: &str) -> Result<Option<String>> {
        let output = self
            .client
            .list_services()
            .cluster(cluster)
            .max_results(1)
            .send()
            .await
            .map_err(sdk_display)
            .stack_err_with(|| format!("EcsClient::default_service_arn(cluster: {cluster})"))?;
        Ok(output.service_arns.unwrap_or_default().into_iter().next())
    }

    /// Returns the service `service_arn` (a plain service name also works)
    pub async fn describe_service(&self, cluster: &str, service_arn: &str) -> Result<Service> {
        let output = self
            .client
            .describe_services()
            .cluster(cluster)
            .services(service_arn)
            .send()
            .await
            .map_err(sdk_display)
            .stack_err_with(|| {
                format!("EcsClient::describe_service(cluster: {cluster}, service: {service_arn})")
            })?;
        output
            .services
            .unwrap_or_default()
            .into_iter()
            .find(|s| {
                s.service_arn.as_deref() == Some(service_arn)
                    || s.service_name.as_deref() == Some(service_arn)
            })
            .stack_err_with(|| {
                format!(
                    "EcsClient::describe_service -> cluster {cluster} has no service matching \
                     {service_arn}"
                )
            })
    }

    /// Returns the ARN of the task definition the service currently runs
    pub async fn task_definition_arn(&self, cluster: &str, service_arn: &str) -> Result<String> {
        let service = self.describe_service(cluster, service_arn).await?;
        service.task_definition.stack_err_with(|| {
            format!("EcsClient::task_definition_arn -> service {service_arn} has no task definition")
        })
    }

    /// Returns the full task definition for an ARN, a `family:revision`, or a
    /// bare family name (which resolves to the latest ACTIVE revision)
    pub async fn describe_task_definition(&self, taskdef: &str) -> Result<TaskDefinition> {
        let output = self
            .client
            .describe_task_definition()
            .task_definition(taskdef)
            .send()
            .await
            .map_err(sdk_display)
            .stack_err_with(|| format!("EcsClient::describe_task_definition(taskdef: {taskdef})"))?;
        output
            .task_definition
            .stack_err_with(|| {
                format!("EcsClient::describe_task_definition(taskdef: {taskdef}) -> empty response")
            })
    }

    /// Registers a new revision of `taskdef`'s family, cloned from `taskdef`
    /// with the container named `container` retargeted to `image` (see
    /// [RegisterTaskDef::from_existing] for what a clone carries). Returns
    /// the new revision's ARN.
    #[tracing::instrument(skip_all, fields(container = %container))]
    pub async fn clone_task_definition(
        &self,
        taskdef: &TaskDefinition,
        container: &str,
        image: Option<&str>,
    ) -> Result<String> {
        let mut reg = RegisterTaskDef::from_existing(taskdef)
            .stack_err("EcsClient::clone_task_definition -> task definition cannot be cloned")?;
        retarget_image(&mut reg.container_definitions, container, image)?;
        let arn = self.register_task_definition(reg).await?;
        debug!("registered cloned task definition {arn}");
        Ok(arn)
    }

    /// Registers a task definition and returns the new revision's ARN
    pub async fn register_task_definition(&self, reg: RegisterTaskDef) -> Result<String> {
        let output = self
            .client
            .register_task_definition()
            .family(reg.family)
            .set_container_definitions(Some(reg.container_definitions))
            .set_task_role_arn(reg.task_role_arn)
            .set_execution_role_arn(reg.execution_role_arn)
            .set_network_mode(reg.network_mode)
            .set_cpu(reg.cpu)
            .set_memory(reg.memory)
            .set_requires_compatibilities(none_if_empty(reg.requires_compatibilities))
            .set_volumes(none_if_empty(reg.volumes))
            .set_placement_constraints(none_if_empty(reg.placement_constraints))
            .set_runtime_platform(reg.runtime_platform)
            .set_ephemeral_storage(reg.ephemeral_storage)
            .set_pid_mode(reg.pid_mode)
            .set_ipc_mode(reg.ipc_mode)
            .set_proxy_configuration(reg.proxy_configuration)
            .set_inference_accelerators(none_if_empty(reg.inference_accelerators))
            .send()
            .await
            .map_err(sdk_display)
            .stack_err("EcsClient::register_task_definition -> registration failed")?;
        output
            .task_definition
            .and_then(|td| td.task_definition_arn)
            .stack_err("EcsClient::register_task_definition -> response has no task definition ARN")
    }

    /// Points the service at a different task definition revision. Errors
    /// unless the updated service reports ACTIVE.
    pub async fn update_service(
        &self,
        cluster: &str,
        service_arn: &str,
        taskdef_arn: &str,
    ) -> Result<Service> {
        let output = self
            .client
            .update_service()
            .cluster(cluster)
            .service(service_arn)
            .task_definition(taskdef_arn)
            .send()
            .await
            .map_err(sdk_display)
            .stack_err_with(|| {
                format!(
                    "EcsClient::update_service(cluster: {cluster}, service: {service_arn}, \
                     taskdef: {taskdef_arn})"
                )
            })?;
        let service = output
            .service
            .stack_err("EcsClient::update_service -> empty response")?;
        if service.status.as_deref() != Some("ACTIVE") {
            bail!(
                "EcsClient::update_service -> service {service_arn} is not ACTIVE after the \
                 update (status: {:?})",
                service.status
            )
        }
        Ok(service)
    }

    /// Deregisters a task definition revision. Errors unless the control
    /// plane reports it INACTIVE afterwards.
    pub async fn deregister_task_definition(&self, taskdef_arn: &str) -> Result<()> {
        let output = self
            .client
            .deregister_task_definition()
            .task_definition(taskdef_arn)
            .send()
            .await
            .map_err(sdk_display)
            .stack_err_with(|| {
                format!("EcsClient::deregister_task_definition(taskdef: {taskdef_arn})")
            })?;
        let status = output.task_definition.and_then(|td| td.status);
        if status != Some(TaskDefinitionStatus::Inactive) {
            bail!(
                "EcsClient::deregister_task_definition -> {taskdef_arn} did not become INACTIVE \
                 (status: {status:?})"
            )
        }
        Ok(())
    }

    /// Stops every RUNNING task of the family in the cluster, leaving it to
    /// the service scheduler to start replacements. Returns the ARNs of the
    /// tasks that were stopped.
    #[tracing::instrument(skip_all, fields(cluster = %cluster, family = %family))]
    pub async fn stop_family_tasks(
        &self,
        cluster: &str,
        family: &str,
        reason: &str,
    ) -> Result<Vec<String>> {
        let mut stream = self
            .client
            .list_tasks()
            .cluster(cluster)
            .family(family)
            .desired_status(DesiredStatus::Running)
            .into_paginator()
            .items()
            .send();
        let mut task_arns = vec![];
        while let Some(arn) = stream.next().await {
            task_arns.push(arn.map_err(sdk_display).stack_err_with(|| {
                format!("EcsClient::stop_family_tasks(cluster: {cluster}, family: {family})")
            })?);
        }
        if task_arns.is_empty() {
            info!("no running tasks found for family {family}");
            return Ok(task_arns)
        }
        for task_arn in &task_arns {
            self.client
                .stop_task()
                .cluster(cluster)
                .task(task_arn)
                .reason(reason)
                .send()
                .await
                .map_err(sdk_display)
                .stack_err_with(|| {
                    format!("EcsClient::stop_family_tasks -> could not stop task {task_arn}")
                })?;
            info!("stopped task {task_arn}");
        }
        Ok(task_arns)
    }

    /// Returns the ARNs of the service's RUNNING tasks
    pub async fn running_tasks(&self, cluster: &str, service_name: &str) -> Result<Vec<String>> {
        let mut stream = self
            .client
            .list_tasks()
            .cluster(cluster)
            .service_name(service_name)
            .desired_status(DesiredStatus::Running)
            .into_paginator()
            .items()
            .send();
        let mut task_arns = vec![];
        while let Some(arn) = stream.next().await {
            task_arns.push(arn.map_err(sdk_display).stack_err_with(|| {
                format!(
                    "EcsClient::running_tasks(cluster: {cluster}, service_name: {service_name})"
                )
            })?);
        }
        Ok(task_arns)
    }

    /// Returns the task `task_arn` in the cluster
    pub async fn describe_task(&self, cluster: &str, task_arn: &str) -> Result<Task> {
        let output = self
            .client
            .describe_tasks()
            .cluster(cluster)
            .tasks(task_arn)
            .send()
            .await
            .map_err(sdk_display)
            .stack_err_with(|| {
                format!("EcsClient::describe_task(cluster: {cluster}, task: {task_arn})")
            })?;
        output
            .tasks
            .unwrap_or_default()
            .into_iter()
            .find(|t| t.task_arn.as_deref() == Some(task_arn))
            .stack_err_with(|| {
                format!("EcsClient::describe_task -> no task {task_arn} in cluster {cluster}")
            })
    }

    /// Starts an interactive exec session running `command` in the container.
    /// The returned session is only useful when handed to the session plugin,
    /// see [crate::exec].
    pub async fn execute_command(
        &self,
        cluster: &str,
        task_arn: &str,
        container: &str,
        command: &str,
    ) -> Result<Session> {
        let output = self
            .client
            .execute_command()
            .cluster(cluster)
            .task(task_arn)
            .container(container)
            .command(command)
            .interactive(true)
            .send()
            .await
            .map_err(sdk_display)
            .stack_err_with(|| {
                format!(
                    "EcsClient::execute_command(cluster: {cluster}, task: {task_arn}, container: \
                     {container})"
                )
            })?;
        output
            .session
            .stack_err("EcsClient::execute_command -> response has no session")
    }

    /// Polls the service every [STD_POLL_DELAY] until `running_count` reaches
    /// `desired`, or the configured timeout elapses
    #[tracing::instrument(skip_all, fields(service = %service_arn))]
    pub async fn wait_service_stable(
        &self,
        cluster: &str,
        service_arn: &str,
        desired: i32,
    ) -> Result<()> {
        async fn check(
            this: &EcsClient,
            cluster: &str,
            service_arn: &str,
            desired: i32,
        ) -> Result<()> {
            let service = this.describe_service(cluster, service_arn).await?;
            if service.running_count == desired {
                Ok(())
            } else {
                info!(
                    "waiting for service to restart ({} of {} tasks running)",
                    service.running_count, desired
                );
                bail!(
                    "service {service_arn} has {} of {} tasks running",
                    service.running_count,
                    desired
                )
            }
        }
        wait_for_ok(poll_tries(self.timeout), STD_POLL_DELAY, || {
            check(self, cluster, service_arn, desired)
        })
        .await
        .stack_err_with(|| {
            format!(
                "EcsClient::wait_service_stable(cluster: {cluster}, service: {service_arn}) -> \
                 service did not stabilize within {:?}",
                self.timeout
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> Vec<ContainerDefinition> {
        vec![
            ContainerDefinition::builder()
                .name("app")
                .image("registry.example.com/app:1.0")
                .build(),
            ContainerDefinition::builder()
                .name("sidecar")
                .image("registry.example.com/sidecar:2.3")
                .build(),
        ]
    }

    #[test]
    fn retargets_only_the_named_container() {
        let mut defs = defs();
        retarget_image(&mut defs, "app", Some("registry.example.com/app:1.1")).unwrap();
        assert_eq!(defs[0].image.as_deref(), Some("registry.example.com/app:1.1"));
        assert_eq!(defs[1].image.as_deref(), Some("registry.example.com/sidecar:2.3"));
    }

    #[test]
    fn retarget_without_image_is_a_revision_bump() {
        let mut defs = defs();
        retarget_image(&mut defs, "sidecar", None).unwrap();
        assert_eq!(defs[0].image.as_deref(), Some("registry.example.com/app:1.0"));
        assert_eq!(defs[1].image.as_deref(), Some("registry.example.com/sidecar:2.3"));
    }

    #[test]
    fn retarget_unknown_container_errors() {
        let mut defs = defs();
        let res = retarget_image(&mut defs, "nginx", Some("nginx:1.27"));
        let msg = format!("{:?}", res.unwrap_err());
        assert!(msg.contains("no container named \"nginx\""));
        assert!(msg.contains("app"));
        assert!(msg.contains("sidecar"));
    }

    #[test]
    fn none_if_empty_drops_empty_vecs() {
        assert_eq!(none_if_empty(Vec::<u8>::new()), None);
        assert_eq!(none_if_empty(vec![1]), Some(vec![1]));
    }

    #[test]
    fn poll_budgets() {
        assert_eq!(poll_tries(Duration::from_secs(60)), 12);
        assert_eq!(poll_tries(Duration::from_secs(61)), 13);
        assert_eq!(poll_tries(Duration::from_secs(4)), 1);
        // a zero budget still checks once
        assert_eq!(poll_tries(Duration::ZERO), 1);
    }
}
