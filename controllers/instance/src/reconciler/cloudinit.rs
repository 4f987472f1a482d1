//! Cloud-init secret enforcement.

use super::Reconciler;
use crate::cluster::ClusterClient;
use crate::error::ControllerError;
use crate::forge::{WebdavCredentials, cloud_init_secret_data, instance_object_labels, object_meta};
use crate::reconcile_helpers::{create_or_update, log_enforced, set_controller_reference};
use crds::{Instance, Tenant};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, error, warn};

/// Key of the webdav user name in the credentials Secret.
pub const WEBDAV_USERNAME_KEY: &str = "username";
/// Key of the webdav password in the credentials Secret.
pub const WEBDAV_PASSWORD_KEY: &str = "password";

impl<C: ClusterClient> Reconciler<C> {
    /// Make the Secret carrying the cloud-init payload of `instance` exist.
    ///
    /// Missing webdav credentials only disable the drive mount.
    pub(crate) async fn enforce_cloud_init_secret(
        &self,
        instance: &Instance,
        tenant: &Tenant,
    ) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();
        let credentials = match self.webdav_credentials(&namespace).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(namespace = %namespace, secret = %self.config.webdav_secret_name, error = %e, "failed to retrieve webdav credentials, the drive will not be mounted");
                WebdavCredentials::default()
            }
        };

        let data = cloud_init_secret_data(
            &self.config.nextcloud_base_url,
            &credentials,
            &tenant.spec.public_keys,
        )?;

        let secret = Secret {
            metadata: object_meta(instance),
            ..Default::default()
        };
        let (secret, result) = create_or_update(&self.client, secret, |secret| {
            secret.type_ = Some("Opaque".to_string());
            secret.data = Some(data);
            secret.metadata.labels = Some(instance_object_labels(
                secret.metadata.labels.as_ref(),
                instance,
            ));
            set_controller_reference(instance, secret)
        })
        .await
        .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce the cloud-init secret"))?;
        log_enforced("Secret", &namespace, &secret.name_any(), result);
        Ok(())
    }

    /// Read the webdav credentials shared by the instances of `namespace`.
    pub(crate) async fn webdav_credentials(
        &self,
        namespace: &str,
    ) -> Result<WebdavCredentials, ControllerError> {
        let name = &self.config.webdav_secret_name;
        let secret = self
            .client
            .get::<Secret>(namespace, name)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("secret {}/{}", namespace, name)))?;

        let field = |key: &str| -> Result<String, ControllerError> {
            let bytes = secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .ok_or_else(|| {
                    ControllerError::InvalidResource(format!(
                        "secret {}/{} has no '{}' key",
                        namespace, name, key
                    ))
                })?;
            String::from_utf8(bytes.0.clone()).map_err(|_| {
                ControllerError::InvalidResource(format!(
                    "secret {}/{} key '{}' is not valid UTF-8",
                    namespace, name, key
                ))
            })
        };

        let credentials = WebdavCredentials {
            username: field(WEBDAV_USERNAME_KEY)?,
            password: field(WEBDAV_PASSWORD_KEY)?,
        };
        debug!(namespace, "webdav credentials retrieved");
        Ok(credentials)
    }
}
