//! Exposition enforcement.
//!
//! A running instance is reachable through a ClusterIP Service and, when it
//! has a GUI, through an Ingress; container environments also publish their
//! file browser. A stopped instance exposes nothing.

use super::Reconciler;
use crate::cluster::ClusterClient;
use crate::error::ControllerError;
use crate::forge::{
    GUI_PORT_NAME, INGRESS_DEFAULT_CERTIFICATE_NAME, INGRESS_GUI_NAME_SUFFIX,
    INGRESS_MYDRIVE_NAME_SUFFIX, MYDRIVE_PORT_NAME, ingress_authentication_annotations,
    ingress_gui_annotations, ingress_gui_path, ingress_mydrive_annotations, ingress_mydrive_path,
    ingress_spec, ingress_url, instance_object_labels, object_meta, object_meta_with_suffix,
    service_spec,
};
use crate::reconcile_helpers::{
    create_or_update, ensure_absent, log_enforced, set_controller_reference,
};
use crds::{Environment, EnvironmentType, Instance, InstanceStatus};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::error;

impl<C: ClusterClient> Reconciler<C> {
    /// Make the exposition objects match the requested power state.
    pub(crate) async fn enforce_instance_exposition(
        &self,
        instance: &Instance,
        environment: &Environment,
        status: &mut InstanceStatus,
    ) -> Result<(), ControllerError> {
        if instance.spec.running {
            self.enforce_instance_exposition_presence(instance, environment, status)
                .await
        } else {
            self.enforce_instance_exposition_absence(instance, status).await
        }
    }

    async fn enforce_instance_exposition_presence(
        &self,
        instance: &Instance,
        environment: &Environment,
        status: &mut InstanceStatus,
    ) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();

        let service = Service {
            metadata: object_meta(instance),
            ..Default::default()
        };
        let (service, result) = create_or_update(&self.client, service, |service| {
            if service.metadata.creation_timestamp.is_none() {
                service.spec = Some(service_spec(instance, environment));
            }
            service.metadata.labels = Some(instance_object_labels(
                service.metadata.labels.as_ref(),
                instance,
            ));
            set_controller_reference(instance, service)
        })
        .await
        .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce service"))?;
        log_enforced("Service", &namespace, &service.name_any(), result);
        status.ip = service
            .spec
            .as_ref()
            .and_then(|spec| spec.cluster_ip.clone())
            .filter(|ip| !ip.is_empty());

        if environment.environment_type == EnvironmentType::VirtualMachine
            && !environment.gui_enabled
        {
            status.url = None;
            status.my_drive_url = None;
            return Ok(());
        }

        let path = ingress_gui_path(instance);
        self.enforce_ingress(
            instance,
            INGRESS_GUI_NAME_SUFFIX,
            &path,
            &service.name_any(),
            GUI_PORT_NAME,
            |existing| ingress_gui_annotations(existing, &path),
        )
        .await?;
        status.url = Some(ingress_url(&self.config.website_base_url, &path));

        if environment.environment_type == EnvironmentType::VirtualMachine {
            status.my_drive_url = None;
            return Ok(());
        }

        let path = ingress_mydrive_path(instance);
        self.enforce_ingress(
            instance,
            INGRESS_MYDRIVE_NAME_SUFFIX,
            &path,
            &service.name_any(),
            MYDRIVE_PORT_NAME,
            |existing| ingress_mydrive_annotations(existing, &path),
        )
        .await?;
        status.my_drive_url = Some(ingress_url(&self.config.website_base_url, &path));

        Ok(())
    }

    async fn enforce_ingress<A>(
        &self,
        instance: &Instance,
        suffix: &str,
        path: &str,
        service_name: &str,
        port_name: &str,
        annotations: A,
    ) -> Result<(), ControllerError>
    where
        A: FnOnce(Option<&BTreeMap<String, String>>) -> BTreeMap<String, String>,
    {
        let host = &self.config.website_base_url;
        let ingress = Ingress {
            metadata: object_meta_with_suffix(instance, suffix),
            ..Default::default()
        };
        let namespace = instance.namespace().unwrap_or_default();
        let (ingress, result) = create_or_update(&self.client, ingress, |ingress| {
            if ingress.metadata.creation_timestamp.is_none() {
                ingress.spec = Some(ingress_spec(
                    host,
                    path,
                    INGRESS_DEFAULT_CERTIFICATE_NAME,
                    service_name,
                    port_name,
                ));
            }
            ingress.metadata.labels = Some(instance_object_labels(
                ingress.metadata.labels.as_ref(),
                instance,
            ));
            ingress.metadata.annotations = Some(ingress_authentication_annotations(
                annotations(ingress.metadata.annotations.as_ref()),
                &self.config.instances_auth_url,
            ));
            set_controller_reference(instance, ingress)
        })
        .await
        .inspect_err(|e| error!(namespace = %namespace, suffix, error = %e, "failed to enforce ingress"))?;
        log_enforced("Ingress", &namespace, &ingress.name_any(), result);
        Ok(())
    }

    async fn enforce_instance_exposition_absence(
        &self,
        instance: &Instance,
        status: &mut InstanceStatus,
    ) -> Result<(), ControllerError> {
        status.ip = None;
        status.url = None;
        status.my_drive_url = None;

        let namespace = instance.namespace().unwrap_or_default();
        let name = instance.name_any();
        ensure_absent::<_, Service>(&self.client, &namespace, &name).await?;
        ensure_absent::<_, Ingress>(
            &self.client,
            &namespace,
            &format!("{}{}", name, INGRESS_GUI_NAME_SUFFIX),
        )
        .await?;
        ensure_absent::<_, Ingress>(
            &self.client,
            &namespace,
            &format!("{}{}", name, INGRESS_MYDRIVE_NAME_SUFFIX),
        )
        .await
    }
}
