//! Virtual machine forging.

use crate::error::ControllerError;
use crate::forge::quantity::{millicores, scale_memory};
use crate::forge::{GUI_PORT_NUMBER, SSH_PORT_NUMBER, instance_selector_labels, object_meta};
use crds::{
    CloudInitNoCloudSource, ContainerDiskSource, Cpu, DataVolumeSourceRegistry, DataVolumeSpec,
    DataVolumeVolumeSource, Devices, Disk, DiskTarget, DomainSpec, Environment, Instance,
    Interface, Memory, Network, ResourceRequirements, SecretReference, VirtualMachineInstanceSpec,
    VirtualMachineInstanceTemplate, VirtualMachineSpec, Volume,
};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaimSpec, Probe, TCPSocketAction,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Name of the root disk and of its volume.
pub const ROOT_VOLUME_NAME: &str = "root";
/// Name of the cloud-init disk and of its volume.
pub const CLOUD_INIT_VOLUME_NAME: &str = "cloud-init";
/// Bus every disk is attached to.
pub const DISK_BUS: &str = "virtio";
/// Secret used to pull container disks.
pub const REGISTRY_PULL_SECRET: &str = "registry-credentials";
/// Name of the default pod network and of the bound interface.
pub const DEFAULT_NETWORK_NAME: &str = "default";
/// Grace period granted to a guest on shutdown.
pub const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 60;

/// Memory overhead factor applied to requests and limits, as a fraction.
const MEMORY_OVERHEAD: (i128, i128) = (14, 10);

/// Spec of the VirtualMachine realizing a persistent environment.
pub fn virtual_machine_spec(
    instance: &Instance,
    environment: &Environment,
) -> Result<VirtualMachineSpec, ControllerError> {
    Ok(VirtualMachineSpec {
        running: Some(instance.spec.running),
        template: VirtualMachineInstanceTemplate {
            metadata: Some(ObjectMeta {
                labels: Some(instance_selector_labels(instance)),
                ..Default::default()
            }),
            spec: virtual_machine_instance_spec(instance, environment)?,
        },
    })
}

/// Spec of the VirtualMachineInstance realizing an environment.
pub fn virtual_machine_instance_spec(
    instance: &Instance,
    environment: &Environment,
) -> Result<VirtualMachineInstanceSpec, ControllerError> {
    Ok(VirtualMachineInstanceSpec {
        domain: virtual_machine_domain(environment)?,
        volumes: vec![
            volume_root_disk(instance, environment),
            volume_cloud_init(&object_meta(instance).name.unwrap_or_default()),
        ],
        networks: vec![Network {
            name: DEFAULT_NETWORK_NAME.to_string(),
            pod: Some(BTreeMap::new()),
        }],
        readiness_probe: Some(virtual_machine_readiness_probe(environment)),
        termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
    })
}

/// Virtual hardware of an environment.
pub fn virtual_machine_domain(environment: &Environment) -> Result<DomainSpec, ControllerError> {
    Ok(DomainSpec {
        cpu: Some(Cpu {
            cores: environment.resources.cpu,
        }),
        memory: Some(Memory {
            guest: Some(environment.resources.memory.clone()),
        }),
        resources: virtual_machine_resources(environment)?,
        devices: Devices {
            disks: vec![
                volume_disk_target(ROOT_VOLUME_NAME),
                volume_disk_target(CLOUD_INIT_VOLUME_NAME),
            ],
            interfaces: vec![Interface {
                name: DEFAULT_NETWORK_NAME.to_string(),
                bridge: Some(BTreeMap::new()),
            }],
        },
    })
}

/// Requests and limits of the launcher pod.
pub fn virtual_machine_resources(
    environment: &Environment,
) -> Result<ResourceRequirements, ControllerError> {
    let memory = memory_requirements(environment)?;
    Ok(ResourceRequirements {
        requests: BTreeMap::from([
            ("cpu".to_string(), cpu_requests(environment)),
            ("memory".to_string(), memory.clone()),
        ]),
        limits: BTreeMap::from([
            ("cpu".to_string(), cpu_limits(environment)),
            ("memory".to_string(), memory),
        ]),
    })
}

fn cpu_requests_milli(environment: &Environment) -> u64 {
    u64::from(environment.resources.cpu) * 1000 * u64::from(environment.resources.reserved_cpu_percentage)
        / 100
}

/// Reserved share of the cores, in millicores.
pub fn cpu_requests(environment: &Environment) -> Quantity {
    millicores(cpu_requests_milli(environment))
}

/// Every core plus the reserved share, in millicores.
pub fn cpu_limits(environment: &Environment) -> Quantity {
    millicores(u64::from(environment.resources.cpu) * 1000 + cpu_requests_milli(environment))
}

/// Guest memory plus the virtualization overhead.
pub fn memory_requirements(environment: &Environment) -> Result<Quantity, ControllerError> {
    scale_memory(&environment.resources.memory, MEMORY_OVERHEAD.0, MEMORY_OVERHEAD.1)
}

/// TCP probe on the GUI port, or on SSH for headless environments.
pub fn virtual_machine_readiness_probe(environment: &Environment) -> Probe {
    let port = if environment.gui_enabled {
        GUI_PORT_NUMBER
    } else {
        SSH_PORT_NUMBER
    };
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            host: None,
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(2),
        failure_threshold: Some(5),
        ..Default::default()
    }
}

/// Root volume: the imported DataVolume when persistent, the image otherwise.
pub fn volume_root_disk(instance: &Instance, environment: &Environment) -> Volume {
    if environment.persistent {
        volume_persistent_disk(&object_meta(instance).name.unwrap_or_default())
    } else {
        volume_container_disk(&environment.image)
    }
}

/// Root volume backed by a DataVolume.
pub fn volume_persistent_disk(data_volume_name: &str) -> Volume {
    Volume {
        name: ROOT_VOLUME_NAME.to_string(),
        data_volume: Some(DataVolumeVolumeSource {
            name: data_volume_name.to_string(),
        }),
        ..Default::default()
    }
}

/// Root volume pulled from a container image.
pub fn volume_container_disk(image: &str) -> Volume {
    Volume {
        name: ROOT_VOLUME_NAME.to_string(),
        container_disk: Some(ContainerDiskSource {
            image: image.to_string(),
            image_pull_policy: Some("IfNotPresent".to_string()),
            image_pull_secret: Some(REGISTRY_PULL_SECRET.to_string()),
        }),
        ..Default::default()
    }
}

/// NoCloud volume reading user data from `secret_name`.
pub fn volume_cloud_init(secret_name: &str) -> Volume {
    Volume {
        name: CLOUD_INIT_VOLUME_NAME.to_string(),
        cloud_init_no_cloud: Some(CloudInitNoCloudSource {
            user_data_secret_ref: Some(SecretReference {
                name: secret_name.to_string(),
            }),
        }),
        ..Default::default()
    }
}

/// Disk bound to the volume `name`.
pub fn volume_disk_target(name: &str) -> Disk {
    Disk {
        name: name.to_string(),
        disk: Some(DiskTarget {
            bus: Some(DISK_BUS.to_string()),
        }),
    }
}

/// Spec of the DataVolume importing the disk of a persistent environment.
pub fn data_volume_spec(environment: &Environment) -> Result<DataVolumeSpec, ControllerError> {
    let disk = environment.resources.disk.clone().ok_or_else(|| {
        ControllerError::InvalidResource(format!(
            "persistent environment '{}' has no disk size",
            environment.name
        ))
    })?;
    Ok(DataVolumeSpec {
        source: crds::DataVolumeSource {
            registry: Some(DataVolumeSourceRegistry {
                url: Some(format!("docker://{}", environment.image)),
                secret_ref: None,
            }),
        },
        pvc: PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), disk)])),
                ..Default::default()
            }),
            ..Default::default()
        },
    })
}
