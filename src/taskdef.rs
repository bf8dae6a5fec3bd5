//! Task definition JSON documents.
//!
//! `update-taskdef` accepts the same JSON document shape that the control
//! plane's register call takes (the thing usually kept in a `taskdef.json`
//! next to the service). The SDK's input types do not deserialize, so
//! [TaskDefDoc] mirrors the document with serde and [TaskDefDoc::into_register]
//! produces the SDK-typed payload. Unknown fields are rejected rather than
//! silently dropped, a typo in a document should never reach the control
//! plane as a smaller task definition.

use std::collections::HashMap;

use aws_sdk_ecs::{
    error::BuildError,
    types::{
        ApplicationProtocol, Compatibility, ContainerCondition, ContainerDefinition,
        ContainerDependency, CpuArchitecture, Device, DeviceCgroupPermission,
        DockerVolumeConfiguration, EfsAuthorizationConfig, EfsAuthorizationConfigIam,
        EfsTransitEncryption, EfsVolumeConfiguration, EnvironmentFile, EnvironmentFileType,
        EphemeralStorage, FirelensConfiguration, FirelensConfigurationType, HealthCheck,
        HostEntry, HostVolumeProperties, InferenceAccelerator, IpcMode, KernelCapabilities,
        KeyValuePair, LinuxParameters, LogConfiguration, LogDriver, MountPoint, NetworkMode,
        OsFamily, PidMode, PortMapping, ProxyConfiguration, RepositoryCredentials,
        RuntimePlatform, Scope, Secret, SystemControl, TaskDefinition,
        TaskDefinitionPlacementConstraint, TaskDefinitionPlacementConstraintType, Tmpfs,
        TransportProtocol, Ulimit, UlimitName, Volume, VolumeFrom,
    },
};
use serde::Deserialize;

/// Why a task definition document could not be turned into a registration
#[derive(Debug, thiserror::Error)]
pub enum TaskDefError {
    /// The text did not parse as JSON or did not match the document shape
    #[error("task definition JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
    /// A parsed field could not be converted for the control plane
    #[error("task definition field `{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, err: BuildError) -> TaskDefError {
    TaskDefError::Invalid {
        field,
        reason: err.to_string(),
    }
}

/// A register-task-definition document
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskDefDoc {
    pub family: String,
    pub container_definitions: Vec<ContainerDef>,
    pub task_role_arn: Option<String>,
    pub execution_role_arn: Option<String>,
    pub network_mode: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    #[serde(default)]
    pub requires_compatibilities: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<VolumeDef>,
    #[serde(default)]
    pub placement_constraints: Vec<PlacementConstraintDef>,
    pub runtime_platform: Option<RuntimePlatformDef>,
    pub ephemeral_storage: Option<EphemeralStorageDef>,
    pub pid_mode: Option<String>,
    pub ipc_mode: Option<String>,
}

/// An SDK-typed registration payload, consumed by
/// [crate::ecs::EcsClient::register_task_definition]. Built either from a
/// [TaskDefDoc] or from an existing task definition via
/// [RegisterTaskDef::from_existing].
#[derive(Debug, Clone)]
pub struct RegisterTaskDef {
    pub family: String,
    pub container_definitions: Vec<ContainerDefinition>,
    pub task_role_arn: Option<String>,
    pub execution_role_arn: Option<String>,
    pub network_mode: Option<NetworkMode>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub requires_compatibilities: Vec<Compatibility>,
    pub volumes: Vec<Volume>,
    pub placement_constraints: Vec<TaskDefinitionPlacementConstraint>,
    pub runtime_platform: Option<RuntimePlatform>,
    pub ephemeral_storage: Option<EphemeralStorage>,
    pub pid_mode: Option<PidMode>,
    pub ipc_mode: Option<IpcMode>,
    pub proxy_configuration: Option<ProxyConfiguration>,
    pub inference_accelerators: Vec<InferenceAccelerator>,
}

impl RegisterTaskDef {
    /// Builds a registration that reproduces an existing task definition (a
    /// describe output), carrying over every schedulable field so the new
    /// revision stays deployable on the same launch type
    pub fn from_existing(taskdef: &TaskDefinition) -> Result<Self, TaskDefError> {
        let family = taskdef.family.clone().ok_or(TaskDefError::Invalid {
            field: "family",
            reason: "the task definition has no family".to_owned(),
        })?;
        Ok(Self {
            family,
            container_definitions: taskdef.container_definitions.clone().unwrap_or_default(),
            task_role_arn: taskdef.task_role_arn.clone(),
            execution_role_arn: taskdef.execution_role_arn.clone(),
            network_mode: taskdef.network_mode.clone(),
            cpu: taskdef.cpu.clone(),
            memory: taskdef.memory.clone(),
            requires_compatibilities: taskdef
                .requires_compatibilities
                .clone()
                .unwrap_or_default(),
            volumes: taskdef.volumes.clone().unwrap_or_default(),
            placement_constraints: taskdef.placement_constraints.clone().unwrap_or_default(),
            runtime_platform: taskdef.runtime_platform.clone(),
            ephemeral_storage: taskdef.ephemeral_storage.clone(),
            pid_mode: taskdef.pid_mode.clone(),
            ipc_mode: taskdef.ipc_mode.clone(),
            proxy_configuration: taskdef.proxy_configuration.clone(),
            inference_accelerators: taskdef.inference_accelerators.clone().unwrap_or_default(),
        })
    }
}

impl TaskDefDoc {
    /// Parses a register-task-definition JSON document
    pub fn from_json(text: &str) -> Result<Self, TaskDefError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Converts the document into the SDK-typed registration payload
    pub fn into_register(self) -> Result<RegisterTaskDef, TaskDefError> {
        let container_definitions = self
            .container_definitions
            .into_iter()
            .map(ContainerDef::into_sdk)
            .collect::<Result<Vec<_>, _>>()?;
        let volumes = self
            .volumes
            .into_iter()
            .map(VolumeDef::into_sdk)
            .collect::<Result<Vec<_>, _>>()?;
        let placement_constraints = self
            .placement_constraints
            .into_iter()
            .map(|c| {
                TaskDefinitionPlacementConstraint::builder()
                    .r#type(TaskDefinitionPlacementConstraintType::from(
                        c.r#type.as_str(),
                    ))
                    .set_expression(c.expression)
                    .build()
            })
            .collect();
        Ok(RegisterTaskDef {
            family: self.family,
            container_definitions,
            task_role_arn: self.task_role_arn,
            execution_role_arn: self.execution_role_arn,
            network_mode: self.network_mode.map(|s| NetworkMode::from(s.as_str())),
            cpu: self.cpu,
            memory: self.memory,
            requires_compatibilities: self
                .requires_compatibilities
                .iter()
                .map(|s| Compatibility::from(s.as_str()))
                .collect(),
            volumes,
            placement_constraints,
            runtime_platform: self.runtime_platform.map(|rp| {
                RuntimePlatform::builder()
                    .set_cpu_architecture(
                        rp.cpu_architecture.map(|s| CpuArchitecture::from(s.as_str())),
                    )
                    .set_operating_system_family(
                        rp.operating_system_family.map(|s| OsFamily::from(s.as_str())),
                    )
                    .build()
            }),
            ephemeral_storage: self
                .ephemeral_storage
                .map(|e| {
                    EphemeralStorage::builder()
                        .size_in_gib(e.size_in_gib)
                        .build()
                }),
            pid_mode: self.pid_mode.map(|s| PidMode::from(s.as_str())),
            ipc_mode: self.ipc_mode.map(|s| IpcMode::from(s.as_str())),
            // not part of the document surface
            proxy_configuration: None,
            inference_accelerators: vec![],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerDef {
    pub name: String,
    pub image: String,
    pub cpu: Option<i32>,
    pub memory: Option<i32>,
    pub memory_reservation: Option<i32>,
    pub essential: Option<bool>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub entry_point: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub environment: Vec<KeyValueDef>,
    #[serde(default)]
    pub environment_files: Vec<EnvironmentFileDef>,
    #[serde(default)]
    pub port_mappings: Vec<PortMappingDef>,
    #[serde(default)]
    pub mount_points: Vec<MountPointDef>,
    #[serde(default)]
    pub volumes_from: Vec<VolumeFromDef>,
    pub linux_parameters: Option<LinuxParametersDef>,
    #[serde(default)]
    pub secrets: Vec<SecretDef>,
    #[serde(default)]
    pub depends_on: Vec<DependencyDef>,
    pub start_timeout: Option<i32>,
    pub stop_timeout: Option<i32>,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub working_directory: Option<String>,
    pub disable_networking: Option<bool>,
    pub privileged: Option<bool>,
    pub readonly_root_filesystem: Option<bool>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub dns_search_domains: Vec<String>,
    #[serde(default)]
    pub extra_hosts: Vec<HostEntryDef>,
    #[serde(default)]
    pub docker_security_options: Vec<String>,
    pub interactive: Option<bool>,
    pub pseudo_terminal: Option<bool>,
    #[serde(default)]
    pub docker_labels: HashMap<String, String>,
    #[serde(default)]
    pub ulimits: Vec<UlimitDef>,
    pub log_configuration: Option<LogConfigurationDef>,
    pub health_check: Option<HealthCheckDef>,
    #[serde(default)]
    pub system_controls: Vec<SystemControlDef>,
    pub firelens_configuration: Option<FirelensDef>,
    pub repository_credentials: Option<RepositoryCredentialsDef>,
}

impl ContainerDef {
    fn into_sdk(self) -> Result<ContainerDefinition, TaskDefError> {
        let environment = self
            .environment
            .into_iter()
            .map(|e| KeyValuePair::builder().name(e.name).value(e.value).build())
            .collect::<Vec<_>>();
        let environment_files = self
            .environment_files
            .into_iter()
            .map(|f| {
                EnvironmentFile::builder()
                    .value(f.value)
                    .r#type(EnvironmentFileType::from(f.r#type.as_str()))
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("environmentFiles", e))?;
        let port_mappings = self
            .port_mappings
            .into_iter()
            .map(|p| {
                PortMapping::builder()
                    .set_container_port(p.container_port)
                    .set_host_port(p.host_port)
                    .set_protocol(p.protocol.map(|s| TransportProtocol::from(s.as_str())))
                    .set_name(p.name)
                    .set_app_protocol(
                        p.app_protocol.map(|s| ApplicationProtocol::from(s.as_str())),
                    )
                    .build()
            })
            .collect::<Vec<_>>();
        let mount_points = self
            .mount_points
            .into_iter()
            .map(|m| {
                MountPoint::builder()
                    .source_volume(m.source_volume)
                    .container_path(m.container_path)
                    .set_read_only(m.read_only)
                    .build()
            })
            .collect::<Vec<_>>();
        let volumes_from = self
            .volumes_from
            .into_iter()
            .map(|v| {
                VolumeFrom::builder()
                    .source_container(v.source_container)
                    .set_read_only(v.read_only)
                    .build()
            })
            .collect::<Vec<_>>();
        let secrets = secrets_to_sdk(self.secrets, "secrets")?;
        let depends_on = self
            .depends_on
            .into_iter()
            .map(|d| {
                ContainerDependency::builder()
                    .container_name(d.container_name)
                    .condition(ContainerCondition::from(d.condition.as_str()))
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("dependsOn", e))?;
        let extra_hosts = self
            .extra_hosts
            .into_iter()
            .map(|h| {
                HostEntry::builder()
                    .hostname(h.hostname)
                    .ip_address(h.ip_address)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("extraHosts", e))?;
        let ulimits = self
            .ulimits
            .into_iter()
            .map(|u| {
                Ulimit::builder()
                    .name(UlimitName::from(u.name.as_str()))
                    .soft_limit(u.soft_limit)
                    .hard_limit(u.hard_limit)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("ulimits", e))?;
        let system_controls = self
            .system_controls
            .into_iter()
            .map(|s| {
                SystemControl::builder()
                    .set_namespace(s.namespace)
                    .set_value(s.value)
                    .build()
            })
            .collect::<Vec<_>>();

        let mut b = ContainerDefinition::builder()
            .name(self.name)
            .image(self.image)
            .set_cpu(self.cpu)
            .set_memory(self.memory)
            .set_memory_reservation(self.memory_reservation)
            .set_essential(self.essential)
            .set_links((!self.links.is_empty()).then_some(self.links))
            .set_entry_point((!self.entry_point.is_empty()).then_some(self.entry_point))
            .set_command((!self.command.is_empty()).then_some(self.command))
            .set_environment((!environment.is_empty()).then_some(environment))
            .set_environment_files((!environment_files.is_empty()).then_some(environment_files))
            .set_port_mappings((!port_mappings.is_empty()).then_some(port_mappings))
            .set_mount_points((!mount_points.is_empty()).then_some(mount_points))
            .set_volumes_from((!volumes_from.is_empty()).then_some(volumes_from))
            .set_secrets((!secrets.is_empty()).then_some(secrets))
            .set_depends_on((!depends_on.is_empty()).then_some(depends_on))
            .set_start_timeout(self.start_timeout)
            .set_stop_timeout(self.stop_timeout)
            .set_hostname(self.hostname)
            .set_user(self.user)
            .set_working_directory(self.working_directory)
            .set_disable_networking(self.disable_networking)
            .set_privileged(self.privileged)
            .set_readonly_root_filesystem(self.readonly_root_filesystem)
            .set_dns_servers((!self.dns_servers.is_empty()).then_some(self.dns_servers))
            .set_dns_search_domains(
                (!self.dns_search_domains.is_empty()).then_some(self.dns_search_domains),
            )
            .set_extra_hosts((!extra_hosts.is_empty()).then_some(extra_hosts))
            .set_docker_security_options(
                (!self.docker_security_options.is_empty()).then_some(self.docker_security_options),
            )
            .set_interactive(self.interactive)
            .set_pseudo_terminal(self.pseudo_terminal)
            .set_docker_labels((!self.docker_labels.is_empty()).then_some(self.docker_labels))
            .set_ulimits((!ulimits.is_empty()).then_some(ulimits))
            .set_system_controls((!system_controls.is_empty()).then_some(system_controls));
        if let Some(lp) = self.linux_parameters {
            b = b.linux_parameters(lp.into_sdk()?);
        }
        if let Some(lc) = self.log_configuration {
            b = b.log_configuration(lc.into_sdk()?);
        }
        if let Some(hc) = self.health_check {
            b = b.health_check(
                HealthCheck::builder()
                    .set_command(Some(hc.command))
                    .set_interval(hc.interval)
                    .set_timeout(hc.timeout)
                    .set_retries(hc.retries)
                    .set_start_period(hc.start_period)
                    .build()
                    .map_err(|e| invalid("healthCheck", e))?,
            );
        }
        if let Some(f) = self.firelens_configuration {
            b = b.firelens_configuration(
                FirelensConfiguration::builder()
                    .r#type(FirelensConfigurationType::from(f.r#type.as_str()))
                    .set_options((!f.options.is_empty()).then_some(f.options))
                    .build()
                    .map_err(|e| invalid("firelensConfiguration", e))?,
            );
        }
        if let Some(rc) = self.repository_credentials {
            b = b.repository_credentials(
                RepositoryCredentials::builder()
                    .credentials_parameter(rc.credentials_parameter)
                    .build()
                    .map_err(|e| invalid("repositoryCredentials", e))?,
            );
        }
        Ok(b.build())
    }
}

fn secrets_to_sdk(
    secrets: Vec<SecretDef>,
    field: &'static str,
) -> Result<Vec<Secret>, TaskDefError> {
    secrets
        .into_iter()
        .map(|s| {
            Secret::builder()
                .name(s.name)
                .value_from(s.value_from)
                .build()
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(field, e))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KeyValueDef {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvironmentFileDef {
    pub value: String,
    pub r#type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortMappingDef {
    pub container_port: Option<i32>,
    pub host_port: Option<i32>,
    pub protocol: Option<String>,
    pub name: Option<String>,
    pub app_protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MountPointDef {
    pub source_volume: String,
    pub container_path: String,
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeFromDef {
    pub source_container: String,
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinuxParametersDef {
    pub capabilities: Option<KernelCapabilitiesDef>,
    #[serde(default)]
    pub devices: Vec<DeviceDef>,
    pub init_process_enabled: Option<bool>,
    pub shared_memory_size: Option<i32>,
    #[serde(default)]
    pub tmpfs: Vec<TmpfsDef>,
    pub max_swap: Option<i32>,
    pub swappiness: Option<i32>,
}

impl LinuxParametersDef {
    fn into_sdk(self) -> Result<LinuxParameters, TaskDefError> {
        let devices = self
            .devices
            .into_iter()
            .map(|d| {
                Device::builder()
                    .host_path(d.host_path)
                    .set_container_path(d.container_path)
                    .set_permissions((!d.permissions.is_empty()).then(|| {
                        d.permissions
                            .iter()
                            .map(|p| DeviceCgroupPermission::from(p.as_str()))
                            .collect()
                    }))
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("linuxParameters.devices", e))?;
        let tmpfs = self
            .tmpfs
            .into_iter()
            .map(|t| {
                Tmpfs::builder()
                    .container_path(t.container_path)
                    .size(t.size)
                    .set_mount_options((!t.mount_options.is_empty()).then_some(t.mount_options))
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("linuxParameters.tmpfs", e))?;
        let mut b = LinuxParameters::builder()
            .set_init_process_enabled(self.init_process_enabled)
            .set_shared_memory_size(self.shared_memory_size)
            .set_max_swap(self.max_swap)
            .set_swappiness(self.swappiness)
            .set_devices((!devices.is_empty()).then_some(devices))
            .set_tmpfs((!tmpfs.is_empty()).then_some(tmpfs));
        if let Some(caps) = self.capabilities {
            b = b.capabilities(
                KernelCapabilities::builder()
                    .set_add((!caps.add.is_empty()).then_some(caps.add))
                    .set_drop((!caps.drop.is_empty()).then_some(caps.drop))
                    .build(),
            );
        }
        Ok(b.build())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KernelCapabilitiesDef {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub drop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeviceDef {
    pub host_path: String,
    pub container_path: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TmpfsDef {
    pub container_path: String,
    pub size: i32,
    #[serde(default)]
    pub mount_options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretDef {
    pub name: String,
    pub value_from: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DependencyDef {
    pub container_name: String,
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HostEntryDef {
    pub hostname: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UlimitDef {
    pub name: String,
    pub soft_limit: i32,
    pub hard_limit: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogConfigurationDef {
    pub log_driver: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
    #[serde(default)]
    pub secret_options: Vec<SecretDef>,
}

impl LogConfigurationDef {
    fn into_sdk(self) -> Result<LogConfiguration, TaskDefError> {
        let secret_options = secrets_to_sdk(self.secret_options, "logConfiguration.secretOptions")?;
        LogConfiguration::builder()
            .log_driver(LogDriver::from(self.log_driver.as_str()))
            .set_options((!self.options.is_empty()).then_some(self.options))
            .set_secret_options((!secret_options.is_empty()).then_some(secret_options))
            .build()
            .map_err(|e| invalid("logConfiguration", e))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheckDef {
    pub command: Vec<String>,
    pub interval: Option<i32>,
    pub timeout: Option<i32>,
    pub retries: Option<i32>,
    pub start_period: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SystemControlDef {
    pub namespace: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FirelensDef {
    pub r#type: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RepositoryCredentialsDef {
    pub credentials_parameter: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeDef {
    pub name: String,
    pub host: Option<HostVolumeDef>,
    pub docker_volume_configuration: Option<DockerVolumeDef>,
    pub efs_volume_configuration: Option<EfsVolumeDef>,
}

impl VolumeDef {
    fn into_sdk(self) -> Result<Volume, TaskDefError> {
        let mut b = Volume::builder().name(self.name);
        if let Some(host) = self.host {
            b = b.host(
                HostVolumeProperties::builder()
                    .set_source_path(host.source_path)
                    .build(),
            );
        }
        if let Some(d) = self.docker_volume_configuration {
            b = b.docker_volume_configuration(
                DockerVolumeConfiguration::builder()
                    .set_scope(d.scope.map(|s| Scope::from(s.as_str())))
                    .set_autoprovision(d.autoprovision)
                    .set_driver(d.driver)
                    .set_driver_opts((!d.driver_opts.is_empty()).then_some(d.driver_opts))
                    .set_labels((!d.labels.is_empty()).then_some(d.labels))
                    .build(),
            );
        }
        if let Some(efs) = self.efs_volume_configuration {
            let mut efs_b = EfsVolumeConfiguration::builder()
                .file_system_id(efs.file_system_id)
                .set_root_directory(efs.root_directory)
                .set_transit_encryption(
                    efs.transit_encryption
                        .map(|s| EfsTransitEncryption::from(s.as_str())),
                )
                .set_transit_encryption_port(efs.transit_encryption_port);
            if let Some(auth) = efs.authorization_config {
                efs_b = efs_b.authorization_config(
                    EfsAuthorizationConfig::builder()
                        .set_access_point_id(auth.access_point_id)
                        .set_iam(auth.iam.map(|s| EfsAuthorizationConfigIam::from(s.as_str())))
                        .build(),
                );
            }
            b = b.efs_volume_configuration(
                efs_b
                    .build()
                    .map_err(|e| invalid("efsVolumeConfiguration", e))?,
            );
        }
        Ok(b.build())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HostVolumeDef {
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DockerVolumeDef {
    pub scope: Option<String>,
    pub autoprovision: Option<bool>,
    pub driver: Option<String>,
    #[serde(default)]
    pub driver_opts: HashMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EfsVolumeDef {
    pub file_system_id: String,
    pub root_directory: Option<String>,
    pub transit_encryption: Option<String>,
    pub transit_encryption_port: Option<i32>,
    pub authorization_config: Option<EfsAuthDef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EfsAuthDef {
    pub access_point_id: Option<String>,
    pub iam: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlacementConstraintDef {
    pub r#type: String,
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuntimePlatformDef {
    pub cpu_architecture: Option<String>,
    pub operating_system_family: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EphemeralStorageDef {
    #[serde(rename = "sizeInGiB")]
    pub size_in_gib: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_DOC: &str = r#"{
        "family": "billing",
        "taskRoleArn": "arn:aws:iam::012345678901:role/billing-task",
        "executionRoleArn": "arn:aws:iam::012345678901:role/billing-exec",
        "networkMode": "awsvpc",
        "cpu": "256",
        "memory": "512",
        "requiresCompatibilities": ["FARGATE"],
        "containerDefinitions": [
            {
                "name": "app",
                "image": "registry.example.com/billing:4.2",
                "essential": true,
                "command": ["serve", "--port", "8080"],
                "environment": [{"name": "RUST_LOG", "value": "info"}],
                "portMappings": [{"containerPort": 8080, "protocol": "tcp"}],
                "mountPoints": [
                    {"sourceVolume": "cache", "containerPath": "/var/cache/billing"}
                ],
                "ulimits": [{"name": "nofile", "softLimit": 4096, "hardLimit": 8192}],
                "secrets": [
                    {"name": "DB_PASSWORD", "valueFrom": "arn:aws:ssm:us-east-1:012345678901:parameter/db"}
                ],
                "logConfiguration": {
                    "logDriver": "awslogs",
                    "options": {"awslogs-group": "/ecs/billing"}
                },
                "healthCheck": {
                    "command": ["CMD-SHELL", "curl -f http://localhost:8080/health"],
                    "interval": 30,
                    "retries": 3
                },
                "linuxParameters": {"initProcessEnabled": true}
            }
        ],
        "volumes": [
            {
                "name": "cache",
                "efsVolumeConfiguration": {
                    "fileSystemId": "fs-0123456789abcdef0",
                    "transitEncryption": "ENABLED"
                }
            }
        ],
        "ephemeralStorage": {"sizeInGiB": 30}
    }"#;

    #[test]
    fn full_document_converts() {
        let doc = TaskDefDoc::from_json(FULL_DOC).unwrap();
        assert_eq!(doc.family, "billing");
        let reg = doc.into_register().unwrap();
        assert_eq!(reg.family, "billing");
        assert_eq!(reg.network_mode, Some(NetworkMode::Awsvpc));
        assert_eq!(reg.requires_compatibilities, vec![Compatibility::Fargate]);
        assert_eq!(reg.cpu.as_deref(), Some("256"));
        assert_eq!(
            reg.ephemeral_storage.as_ref().map(|e| e.size_in_gib),
            Some(30)
        );

        let app = &reg.container_definitions[0];
        assert_eq!(app.name.as_deref(), Some("app"));
        assert_eq!(app.image.as_deref(), Some("registry.example.com/billing:4.2"));
        assert_eq!(app.essential, Some(true));
        let env = app.environment.as_deref().unwrap();
        assert_eq!(env[0].name.as_deref(), Some("RUST_LOG"));
        let ports = app.port_mappings.as_deref().unwrap();
        assert_eq!(ports[0].container_port, Some(8080));
        assert_eq!(ports[0].protocol, Some(TransportProtocol::Tcp));
        let ulimits = app.ulimits.as_deref().unwrap();
        assert_eq!(ulimits[0].name, UlimitName::Nofile);
        assert_eq!(ulimits[0].hard_limit, 8192);
        let log = app.log_configuration.as_ref().unwrap();
        assert_eq!(log.log_driver, LogDriver::Awslogs);
        assert_eq!(
            log.options.as_ref().unwrap().get("awslogs-group").map(String::as_str),
            Some("/ecs/billing")
        );
        let hc = app.health_check.as_ref().unwrap();
        assert_eq!(hc.retries, Some(3));
        assert_eq!(
            app.linux_parameters.as_ref().unwrap().init_process_enabled,
            Some(true)
        );

        let efs = reg.volumes[0].efs_volume_configuration.as_ref().unwrap();
        assert_eq!(efs.file_system_id, "fs-0123456789abcdef0");
        assert_eq!(efs.transit_encryption, Some(EfsTransitEncryption::Enabled));
    }

    #[test]
    fn minimal_document_converts() {
        let doc = TaskDefDoc::from_json(
            r#"{
                "family": "tiny",
                "containerDefinitions": [{"name": "app", "image": "alpine:3.20"}]
            }"#,
        )
        .unwrap();
        let reg = doc.into_register().unwrap();
        assert_eq!(reg.family, "tiny");
        assert!(reg.network_mode.is_none());
        assert!(reg.volumes.is_empty());
        let app = &reg.container_definitions[0];
        assert!(app.command.is_none());
        assert!(app.environment.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = TaskDefDoc::from_json(
            r#"{
                "family": "tiny",
                "containerDefinitions": [{"name": "app", "image": "alpine:3.20"}],
                "taskRoleArm": "arn:aws:iam::012345678901:role/billing-task"
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, TaskDefError::Json(_)));
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn missing_containers_are_rejected() {
        let err = TaskDefDoc::from_json(r#"{"family": "tiny"}"#).unwrap_err();
        assert!(err.to_string().contains("containerDefinitions"));
    }

    #[test]
    fn family_can_be_overridden_after_parse() {
        let mut doc = TaskDefDoc::from_json(
            r#"{
                "family": "whatever",
                "containerDefinitions": [{"name": "app", "image": "alpine:3.20"}]
            }"#,
        )
        .unwrap();
        doc.family = "billing".to_owned();
        assert_eq!(doc.into_register().unwrap().family, "billing");
    }

    #[test]
    fn from_existing_carries_schedulable_fields() {
        let existing = TaskDefinition::builder()
            .family("billing")
            .task_definition_arn("arn:aws:ecs:us-east-1:012345678901:task-definition/billing:42")
            .container_definitions(
                ContainerDefinition::builder()
                    .name("app")
                    .image("registry.example.com/billing:4.2")
                    .build(),
            )
            .task_role_arn("arn:aws:iam::012345678901:role/billing-task")
            .execution_role_arn("arn:aws:iam::012345678901:role/billing-exec")
            .network_mode(NetworkMode::Awsvpc)
            .requires_compatibilities(Compatibility::Fargate)
            .cpu("256")
            .memory("512")
            .runtime_platform(
                RuntimePlatform::builder()
                    .cpu_architecture(CpuArchitecture::Arm64)
                    .build(),
            )
            .build();
        let reg = RegisterTaskDef::from_existing(&existing).unwrap();
        assert_eq!(reg.family, "billing");
        assert_eq!(reg.container_definitions.len(), 1);
        assert_eq!(
            reg.task_role_arn.as_deref(),
            Some("arn:aws:iam::012345678901:role/billing-task")
        );
        assert_eq!(
            reg.execution_role_arn.as_deref(),
            Some("arn:aws:iam::012345678901:role/billing-exec")
        );
        assert_eq!(reg.network_mode, Some(NetworkMode::Awsvpc));
        assert_eq!(reg.requires_compatibilities, vec![Compatibility::Fargate]);
        assert_eq!(reg.cpu.as_deref(), Some("256"));
        assert_eq!(reg.memory.as_deref(), Some("512"));
        assert_eq!(
            reg.runtime_platform.and_then(|rp| rp.cpu_architecture),
            Some(CpuArchitecture::Arm64)
        );

        let nameless = TaskDefinition::builder().build();
        assert!(RegisterTaskDef::from_existing(&nameless).is_err());
    }
}
