use std::{io::IsTerminal, time::Duration};

use aws_config::{BehaviorVersion, Region};
use clap::{Parser, Subcommand};
use ecs_cluster::{
    deploy::{redeploy_image, redeploy_task_definition, RedeployOptions},
    ecs::EcsClient,
    exec::{ssh_service, ExecTarget},
    parsing::match_service_arn,
    std_init,
    taskdef::TaskDefDoc,
};
use owo_colors::OwoColorize;
use stacked_errors::{bail, Result, StackableErr};
use tokio::io::AsyncReadExt;

/// Tools for working with AWS ECS clusters
#[derive(Debug, Parser)]
#[command(about)]
struct Args {
    /// Seconds to wait for a service to stabilize after a redeploy
    #[arg(long, default_value_t = 60)]
    timeout: u64,
    /// AWS region, falls back to the profile/environment chain
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,
    /// AWS shared-config profile
    #[arg(long, env = "AWS_PROFILE")]
    profile: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every command that needs a target service
#[derive(Debug, Clone, clap::Args)]
struct ServiceSelector {
    /// Cluster name or ARN
    #[arg(long)]
    cluster: String,
    /// Service name, must match one of the cluster's services
    #[arg(long, conflicts_with = "service_arn")]
    service: Option<String>,
    /// Full service ARN, an alternative to --service
    #[arg(long)]
    service_arn: Option<String>,
}

#[derive(Debug, Clone, Copy, clap::Args)]
struct RedeployFlags {
    /// Stop the service's running tasks so replacements start immediately
    #[arg(long)]
    restart: bool,
    /// Deregister the superseded task definition revision
    #[arg(long)]
    deregister: bool,
    /// Do not wait for the service to stabilize
    #[arg(long)]
    no_wait: bool,
}

impl From<RedeployFlags> for RedeployOptions {
    fn from(f: RedeployFlags) -> Self {
        Self {
            restart: f.restart,
            deregister: f.deregister,
            no_wait: f.no_wait,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the service ARNs of a cluster
    ListServices {
        /// Cluster name or ARN
        #[arg(long)]
        cluster: String,
    },
    /// Register a new task definition revision with an updated container
    /// image and redeploy the service onto it
    UpdateImage {
        #[command(flatten)]
        selector: ServiceSelector,
        /// Container whose image is replaced
        #[arg(long)]
        container: String,
        /// New image reference, when omitted the current image is kept and
        /// only a new revision is registered
        #[arg(long)]
        image: Option<String>,
        #[command(flatten)]
        flags: RedeployFlags,
    },
    /// Register a caller-supplied task definition document under the
    /// service's family and redeploy the service onto it
    UpdateTaskdef {
        #[command(flatten)]
        selector: ServiceSelector,
        #[command(flatten)]
        flags: RedeployFlags,
        /// Task definition JSON, read from stdin when omitted
        taskdef_json: Option<String>,
    },
    /// Open an interactive shell in a running container of a service
    SshService {
        #[command(flatten)]
        selector: ServiceSelector,
        /// Task ARN to enter, defaults to the first running task of the
        /// service
        #[arg(long)]
        task: Option<String>,
        /// Container to enter, may only be omitted when the task runs
        /// exactly one
        #[arg(long)]
        container: Option<String>,
        /// Command to run in the container
        #[arg(long, default_value = "/bin/sh")]
        command: String,
    },
}

/// Resolves the target service ARN: an explicit `--service` name must match
/// one of the cluster's services, `--service-arn` is taken as is, and with
/// neither the cluster's first service is used
async fn resolve_service_arn(ecs: &EcsClient, selector: &ServiceSelector) -> Result<String> {
    if let Some(ref name) = selector.service {
        let arns = ecs.list_services(&selector.cluster).await?;
        return match_service_arn(&arns, name)
            .map(str::to_owned)
            .stack_err_with(|| {
                format!(
                    "No service named {name} found for cluster {}",
                    selector.cluster
                )
            })
    }
    if let Some(ref arn) = selector.service_arn {
        return Ok(arn.clone())
    }
    ecs.default_service_arn(&selector.cluster)
        .await?
        .stack_err_with(|| {
            format!("No matching service found for cluster {}", selector.cluster)
        })
}

/// Reads the document from stdin, refusing to hang on an interactive terminal
async fn read_stdin() -> Result<String> {
    if std::io::stdin().is_terminal() {
        bail!("update-taskdef -> no task definition JSON was given and stdin is a terminal")
    }
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .stack_err("update-taskdef -> could not read the task definition from stdin")?;
    Ok(text)
}

#[tokio::main]
async fn main() -> Result<()> {
    std_init()?;
    let args = Args::parse();

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = args.region.clone() {
        loader = loader.region(Region::new(region));
    }
    if let Some(ref profile) = args.profile {
        loader = loader.profile_name(profile);
    }
    let config = loader.load().await;
    let ecs = EcsClient::new(&config, Duration::from_secs(args.timeout));

    match args.command {
        Commands::ListServices { cluster } => {
            let arns = ecs.list_services(&cluster).await?;
            println!("-- services for {} --", cluster.bold());
            for arn in &arns {
                println!("    {arn}");
            }
            println!();
        }
        Commands::UpdateImage {
            selector,
            container,
            image,
            flags,
        } => {
            let service_arn = resolve_service_arn(&ecs, &selector).await?;
            redeploy_image(
                &ecs,
                &selector.cluster,
                &service_arn,
                &container,
                image.as_deref(),
                flags.into(),
            )
            .await?;
            println!("{}", "Success".green());
        }
        Commands::UpdateTaskdef {
            selector,
            flags,
            taskdef_json,
        } => {
            let service_arn = resolve_service_arn(&ecs, &selector).await?;
            let text = match taskdef_json {
                Some(text) => text,
                None => read_stdin().await?,
            };
            let doc = TaskDefDoc::from_json(&text)
                .stack_err("update-taskdef -> bad task definition document")?;
            redeploy_task_definition(&ecs, &selector.cluster, &service_arn, doc, flags.into())
                .await?;
            println!("{}", "Success".green());
        }
        Commands::SshService {
            selector,
            task,
            container,
            command,
        } => {
            let service_arn = resolve_service_arn(&ecs, &selector).await?;
            ssh_service(&ecs, &config, ExecTarget {
                cluster: selector.cluster,
                service_arn,
                task,
                container,
                command: Some(command),
                profile: args.profile,
            })
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_declaration() {
        Args::command().debug_assert();
    }

    #[test]
    fn update_image_parse() {
        let args = Args::try_parse_from([
            "ecs-cluster",
            "update-image",
            "--cluster",
            "prod",
            "--service",
            "billing-api",
            "--container",
            "app",
            "--image",
            "registry.example.com/billing:4.3",
            "--restart",
        ])
        .unwrap();
        assert_eq!(args.timeout, 60);
        match args.command {
            Commands::UpdateImage {
                selector,
                container,
                image,
                flags,
            } => {
                assert_eq!(selector.cluster, "prod");
                assert_eq!(selector.service.as_deref(), Some("billing-api"));
                assert_eq!(container, "app");
                assert_eq!(image.as_deref(), Some("registry.example.com/billing:4.3"));
                assert!(flags.restart);
                assert!(!flags.deregister);
                assert!(!flags.no_wait);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn service_name_conflicts_with_arn() {
        assert!(Args::try_parse_from([
            "ecs-cluster",
            "update-image",
            "--cluster",
            "prod",
            "--service",
            "billing-api",
            "--service-arn",
            "arn:aws:ecs:us-east-1:012345678901:service/prod/billing-api",
            "--container",
            "app",
        ])
        .is_err());
    }

    #[test]
    fn ssh_service_defaults() {
        let args = Args::try_parse_from(["ecs-cluster", "ssh-service", "--cluster", "prod"])
            .unwrap();
        match args.command {
            Commands::SshService {
                task,
                container,
                command,
                ..
            } => {
                assert!(task.is_none());
                assert!(container.is_none());
                assert_eq!(command, "/bin/sh");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn update_taskdef_takes_positional_json() {
        // the document itself is optional, stdin covers it
        let args = Args::try_parse_from([
            "ecs-cluster",
            "update-taskdef",
            "--cluster",
            "prod",
            "{\"family\": \"x\", \"containerDefinitions\": []}",
        ])
        .unwrap();
        match args.command {
            Commands::UpdateTaskdef { taskdef_json, .. } => {
                assert!(taskdef_json.unwrap().starts_with('{'));
            }
            _ => unreachable!(),
        }
    }
}
