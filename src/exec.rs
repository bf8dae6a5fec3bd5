//! Interactive shells into running containers.
//!
//! `ssh-service` picks a running task of the service, asks the control plane
//! for an interactive exec session, and hands that session to the local
//! `session-manager-plugin` binary with all standard streams inherited. The
//! plugin owns the terminal until the remote command exits, the same way the
//! vendor CLI drives it.

use std::{process::Stdio, time::Duration};

use aws_config::SdkConfig;
use aws_sdk_ecs::types::{Session, Task};
use serde::Serialize;
use stacked_errors::{bail, Result, StackableErr};
use tokio::time::sleep;
use tracing::info;

use crate::{ctrlc_issued_reset, ecs::EcsClient, parsing::resource_name};

/// Name of the session plugin binary, which must be on the PATH
pub const SESSION_PLUGIN: &str = "session-manager-plugin";

const WAIT_DELAY: Duration = Duration::from_millis(300);

/// Where [ssh_service] should open its shell
#[derive(Debug, Clone, Default)]
pub struct ExecTarget {
    pub cluster: String,
    pub service_arn: String,
    /// Explicit task ARN, skips task discovery
    pub task: Option<String>,
    /// Container to enter, may only be omitted when the task runs exactly one
    pub container: Option<String>,
    /// Command to run, "/bin/sh" if unset
    pub command: Option<String>,
    /// Shared-config profile forwarded to the session plugin
    pub profile: Option<String>,
}

/// Opens an interactive shell in a running container of the service and
/// blocks until it exits
#[tracing::instrument(skip_all, fields(cluster = %target.cluster, service = %target.service_arn))]
pub async fn ssh_service(ecs: &EcsClient, config: &SdkConfig, target: ExecTarget) -> Result<()> {
    let task_arn = match target.task.clone() {
        Some(arn) => arn,
        None => {
            let service_name = resource_name(&target.service_arn).to_owned();
            let tasks = ecs.running_tasks(&target.cluster, &service_name).await?;
            let total = tasks.len();
            let task_arn = tasks.into_iter().next().stack_err_with(|| {
                format!("ssh_service -> no running tasks found for service {service_name}")
            })?;
            if total > 1 {
                info!("service has {total} running tasks, entering {task_arn}");
            }
            task_arn
        }
    };
    let task = ecs.describe_task(&target.cluster, &task_arn).await?;
    if !task.enable_execute_command {
        bail!(
            "ssh_service -> task {task_arn} was not started with execute command enabled, update \
             the service with `--enable-execute-command` and restart it first"
        )
    }
    let (container, runtime_id) = choose_container(&task, target.container.as_deref())?;
    let command = target.command.as_deref().unwrap_or("/bin/sh");

    info!("starting `{command}` in container {container} of {task_arn}");
    let session = ecs
        .execute_command(&target.cluster, &task_arn, &container, command)
        .await?;
    let region = config
        .region()
        .map(|r| r.to_string())
        .stack_err("ssh_service -> no AWS region is configured, pass --region or set AWS_REGION")?;
    let args = plugin_args(
        &session,
        &region,
        target.profile.as_deref(),
        &ssm_target(&target.cluster, &task_arn, &runtime_id),
    )?;
    run_session_plugin(args).await
}

/// Picks the container to enter and returns its name and runtime id. Without
/// an explicit request the task must run exactly one container.
fn choose_container(task: &Task, requested: Option<&str>) -> Result<(String, String)> {
    let containers = task.containers.as_deref().unwrap_or_default();
    let names = || {
        containers
            .iter()
            .filter_map(|c| c.name.as_deref())
            .collect::<Vec<_>>()
    };
    let container = match requested {
        Some(requested) => containers
            .iter()
            .find(|c| c.name.as_deref() == Some(requested))
            .stack_err_with(|| {
                format!(
                    "choose_container -> task has no container named \"{requested}\" \
                     (containers: {:?})",
                    names()
                )
            })?,
        None => match containers {
            [container] => container,
            [] => bail!("choose_container -> task reports no containers"),
            _ => bail!(
                "choose_container -> task runs more than one container, pass --container \
                 (containers: {:?})",
                names()
            ),
        },
    };
    let name = container
        .name
        .clone()
        .stack_err("choose_container -> container has no name")?;
    let runtime_id = container.runtime_id.clone().stack_err_with(|| {
        format!("choose_container -> container {name} has no runtime id yet, is it RUNNING?")
    })?;
    Ok((name, runtime_id))
}

/// SSM target encoding for an exec session,
/// `ecs:<cluster>_<task id>_<container runtime id>`
fn ssm_target(cluster: &str, task_arn: &str, runtime_id: &str) -> String {
    format!(
        "ecs:{}_{}_{}",
        resource_name(cluster),
        resource_name(task_arn),
        runtime_id
    )
}

#[derive(Debug, Serialize)]
struct PluginSession<'a> {
    #[serde(rename = "SessionId")]
    session_id: &'a str,
    #[serde(rename = "StreamUrl")]
    stream_url: &'a str,
    #[serde(rename = "TokenValue")]
    token_value: &'a str,
}

#[derive(Debug, Serialize)]
struct PluginParameters<'a> {
    #[serde(rename = "Target")]
    target: &'a str,
}

/// Builds the six-argument invocation the session plugin expects: session
/// JSON, region, "StartSession", profile, request parameters JSON, and the
/// SSM endpoint
fn plugin_args(
    session: &Session,
    region: &str,
    profile: Option<&str>,
    target: &str,
) -> Result<Vec<String>> {
    let session = PluginSession {
        session_id: session
            .session_id
            .as_deref()
            .stack_err("plugin_args -> session has no id")?,
        stream_url: session
            .stream_url
            .as_deref()
            .stack_err("plugin_args -> session has no stream url")?,
        token_value: session
            .token_value
            .as_deref()
            .stack_err("plugin_args -> session has no token")?,
    };
    Ok(vec![
        serde_json::to_string(&session).stack()?,
        region.to_owned(),
        "StartSession".to_owned(),
        profile.unwrap_or_default().to_owned(),
        serde_json::to_string(&PluginParameters { target }).stack()?,
        format!("https://ssm.{region}.amazonaws.com"),
    ])
}

/// Runs the session plugin with inherited standard streams and waits for the
/// session to end. Ctrl-c is watched so a plugin that never reaches raw mode
/// (e.g. it could not connect) can still be torn down.
async fn run_session_plugin(args: Vec<String>) -> Result<()> {
    let mut child = tokio::process::Command::new(SESSION_PLUGIN)
        .args(&args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .stack_err_with(|| {
            format!(
                "run_session_plugin -> could not start `{SESSION_PLUGIN}`, is the Session \
                 Manager plugin installed and on the PATH?"
            )
        })?;
    loop {
        if ctrlc_issued_reset() {
            child.kill().await.stack()?;
            break
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    bail!("run_session_plugin -> `{SESSION_PLUGIN}` exited with {status}")
                }
                break
            }
            Ok(None) => (),
            Err(e) => {
                let _ = child.kill().await;
                return Err(e).stack_err("run_session_plugin -> failed waiting on the plugin")
            }
        }
        sleep(WAIT_DELAY).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use aws_sdk_ecs::types::Container;
    use serde_json::Value;

    use super::*;

    fn task(names_and_ids: &[(&str, Option<&str>)]) -> Task {
        let mut b = Task::builder().enable_execute_command(true);
        for (name, id) in names_and_ids {
            let mut c = Container::builder().name(*name);
            if let Some(id) = id {
                c = c.runtime_id(*id);
            }
            b = b.containers(c.build());
        }
        b.build()
    }

    #[test]
    fn ssm_targets() {
        assert_eq!(
            ssm_target(
                "prod",
                "arn:aws:ecs:us-east-1:012345678901:task/prod/8f03e41fe56d4f0db85a5e3fc3e28a3d",
                "8f03e41fe56d4f0db85a5e3fc3e28a3d-1234567890"
            ),
            "ecs:prod_8f03e41fe56d4f0db85a5e3fc3e28a3d_8f03e41fe56d4f0db85a5e3fc3e28a3d-1234567890"
        );
        // a cluster ARN reduces to the cluster name
        assert!(ssm_target(
            "arn:aws:ecs:us-east-1:012345678901:cluster/prod",
            "task-id",
            "runtime-id"
        )
        .starts_with("ecs:prod_"));
    }

    #[test]
    fn container_choice() {
        let single = task(&[("app", Some("runtime-1"))]);
        assert_eq!(
            choose_container(&single, None).unwrap(),
            ("app".to_owned(), "runtime-1".to_owned())
        );

        let double = task(&[("app", Some("runtime-1")), ("sidecar", Some("runtime-2"))]);
        assert!(choose_container(&double, None).is_err());
        assert_eq!(
            choose_container(&double, Some("sidecar")).unwrap(),
            ("sidecar".to_owned(), "runtime-2".to_owned())
        );
        assert!(choose_container(&double, Some("nginx")).is_err());

        // a container that has not started yet has no runtime id
        let pending = task(&[("app", None)]);
        assert!(choose_container(&pending, None).is_err());

        let empty = Task::builder().build();
        assert!(choose_container(&empty, None).is_err());
    }

    #[test]
    fn plugin_invocation_shape() {
        let session = Session::builder()
            .session_id("sid-0")
            .stream_url("wss://ssmmessages.us-east-1.amazonaws.com/v1/data-channel/sid-0")
            .token_value("tok")
            .build();
        let args = plugin_args(&session, "us-east-1", Some("staging"), "ecs:prod_tid_rid").unwrap();
        assert_eq!(args.len(), 6);
        let session_json: Value = serde_json::from_str(&args[0]).unwrap();
        assert_eq!(session_json["SessionId"], "sid-0");
        assert_eq!(session_json["TokenValue"], "tok");
        assert_eq!(args[1], "us-east-1");
        assert_eq!(args[2], "StartSession");
        assert_eq!(args[3], "staging");
        let params: Value = serde_json::from_str(&args[4]).unwrap();
        assert_eq!(params["Target"], "ecs:prod_tid_rid");
        assert_eq!(args[5], "https://ssm.us-east-1.amazonaws.com");

        // no profile is passed through as an empty argument, not dropped
        let args = plugin_args(&session, "us-east-1", None, "t").unwrap();
        assert_eq!(args[3], "");

        let incomplete = Session::builder().session_id("sid-0").build();
        assert!(plugin_args(&incomplete, "us-east-1", None, "t").is_err());
    }
}
