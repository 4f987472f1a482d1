//! Container environment forging.
//!
//! A container environment runs as a single-replica Deployment: the
//! environment image, a noVNC bridge when the GUI is enabled and a file
//! browser serving the tenant's home.

use crate::config::ContainerEnvOpts;
use crate::error::ControllerError;
use crate::forge::virtualmachines::{
    cpu_limits, cpu_requests, memory_requirements, virtual_machine_readiness_probe,
};
use crate::forge::{
    GUI_PORT_NAME, GUI_PORT_NUMBER, MYDRIVE_PORT_NAME, MYDRIVE_PORT_NUMBER,
    ingress_mydrive_path, instance_selector_labels, object_meta,
};
use crds::{Environment, Instance};
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

/// Name of the volume holding the tenant's home.
pub const MYDRIVE_VOLUME_NAME: &str = "mydrive";
/// Mount point of the tenant's home in every container.
pub const MYDRIVE_CONTAINER_PATH: &str = "/mydrive";
/// VNC display served by the environment container.
const VNC_PORT: i32 = 5900;

/// Number of replicas matching the requested power state.
pub fn replicas_for(instance: &Instance) -> i32 {
    i32::from(instance.spec.running)
}

/// Spec of the Deployment realizing a container environment.
pub fn deployment_spec(
    instance: &Instance,
    environment: &Environment,
    opts: &ContainerEnvOpts,
) -> Result<DeploymentSpec, ControllerError> {
    let selector = instance_selector_labels(instance);
    Ok(DeploymentSpec {
        replicas: Some(replicas_for(instance)),
        selector: LabelSelector {
            match_labels: Some(selector.clone()),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(selector),
                ..Default::default()
            }),
            spec: Some(pod_spec(instance, environment, opts)?),
        },
        ..Default::default()
    })
}

fn pod_spec(
    instance: &Instance,
    environment: &Environment,
    opts: &ContainerEnvOpts,
) -> Result<PodSpec, ControllerError> {
    let mut containers = vec![environment_container(environment)?];
    if environment.gui_enabled {
        containers.push(websockify_container(opts));
    }
    containers.push(filebrowser_container(instance, opts));

    Ok(PodSpec {
        containers,
        volumes: Some(vec![mydrive_volume(instance, environment)]),
        termination_grace_period_seconds: Some(10),
        ..Default::default()
    })
}

fn mydrive_mount() -> VolumeMount {
    VolumeMount {
        name: MYDRIVE_VOLUME_NAME.to_string(),
        mount_path: MYDRIVE_CONTAINER_PATH.to_string(),
        ..Default::default()
    }
}

fn environment_container(environment: &Environment) -> Result<Container, ControllerError> {
    let memory = memory_requirements(environment)?;
    Ok(Container {
        name: environment.name.clone(),
        image: Some(environment.image.clone()),
        env: Some(vec![EnvVar {
            name: "CROWNLABS_VNC_PORT".to_string(),
            value: Some(VNC_PORT.to_string()),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), cpu_requests(environment)),
                ("memory".to_string(), memory.clone()),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), cpu_limits(environment)),
                ("memory".to_string(), memory),
            ])),
            ..Default::default()
        }),
        readiness_probe: Some(virtual_machine_readiness_probe(environment)),
        volume_mounts: Some(vec![mydrive_mount()]),
        ..Default::default()
    })
}

fn websockify_container(opts: &ContainerEnvOpts) -> Container {
    Container {
        name: "websockify".to_string(),
        image: Some(format!("{}:{}", opts.websockify_image, opts.image_tag)),
        args: Some(vec![
            "--web".to_string(),
            "/usr/share/novnc".to_string(),
            GUI_PORT_NUMBER.to_string(),
            format!("localhost:{}", VNC_PORT),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some(GUI_PORT_NAME.to_string()),
            container_port: GUI_PORT_NUMBER,
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn filebrowser_container(instance: &Instance, opts: &ContainerEnvOpts) -> Container {
    Container {
        name: "filebrowser".to_string(),
        image: Some(format!("{}:{}", opts.filebrowser_image, opts.filebrowser_image_tag)),
        args: Some(vec![
            format!("--port={}", MYDRIVE_PORT_NUMBER),
            format!("--root={}", MYDRIVE_CONTAINER_PATH),
            format!("--baseurl={}", ingress_mydrive_path(instance)),
            "--noauth".to_string(),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some(MYDRIVE_PORT_NAME.to_string()),
            container_port: MYDRIVE_PORT_NUMBER,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![mydrive_mount()]),
        ..Default::default()
    }
}

fn mydrive_volume(instance: &Instance, environment: &Environment) -> Volume {
    if environment.persistent {
        Volume {
            name: MYDRIVE_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: object_meta(instance).name.unwrap_or_default(),
                read_only: None,
            }),
            ..Default::default()
        }
    } else {
        Volume {
            name: MYDRIVE_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }
    }
}

/// Spec of the claim backing the home of a persistent container environment.
pub fn persistent_volume_claim_spec(
    environment: &Environment,
) -> Result<PersistentVolumeClaimSpec, ControllerError> {
    let disk = environment.resources.disk.clone().ok_or_else(|| {
        ControllerError::InvalidResource(format!(
            "persistent environment '{}' has no disk size",
            environment.name
        ))
    })?;
    Ok(PersistentVolumeClaimSpec {
        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
        resources: Some(VolumeResourceRequirements {
            requests: Some(BTreeMap::from([("storage".to_string(), disk)])),
            ..Default::default()
        }),
        ..Default::default()
    })
}
