//! Service forging.

use crate::forge::{
    GUI_PORT_NAME, GUI_PORT_NUMBER, MYDRIVE_PORT_NAME, MYDRIVE_PORT_NUMBER, SSH_PORT_NAME,
    SSH_PORT_NUMBER, instance_selector_labels,
};
use crds::{Environment, EnvironmentType, Instance};
use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Spec of the ClusterIP service exposing an instance.
pub fn service_spec(instance: &Instance, environment: &Environment) -> ServiceSpec {
    let mut ports = vec![
        service_port(SSH_PORT_NAME, SSH_PORT_NUMBER),
        service_port(GUI_PORT_NAME, GUI_PORT_NUMBER),
    ];
    if environment.environment_type == EnvironmentType::Container {
        ports.push(service_port(MYDRIVE_PORT_NAME, MYDRIVE_PORT_NUMBER));
    }

    ServiceSpec {
        type_: Some("ClusterIP".to_string()),
        selector: Some(instance_selector_labels(instance)),
        ports: Some(ports),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}
