//! Cloud-init bootstrap payload.
//!
//! The guest receives a `#cloud-config` document that brings up DHCP
//! networking, mounts the tenant's Nextcloud drive through davfs and
//! authorizes the tenant's SSH keys.

use crate::error::ControllerError;
use k8s_openapi::ByteString;
use serde::Serialize;
use std::collections::BTreeMap;

/// Secret key holding the cloud-init user data.
pub const USER_DATA_KEY: &str = "userdata";
/// Mount point of the tenant drive inside the guest.
pub const MYDRIVE_MOUNT_POINT: &str = "/media/MyDrive";
/// davfs credentials file.
const DAVFS_SECRETS_PATH: &str = "/etc/davfs2/secrets";

/// Credentials used to mount the tenant's Nextcloud drive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebdavCredentials {
    /// Nextcloud user name
    pub username: String,
    /// Nextcloud password
    pub password: String,
}

impl WebdavCredentials {
    /// Whether both fields are populated.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct CloudConfig {
    network: NetworkConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mounts: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    write_files: Vec<WriteFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct NetworkConfig {
    version: u8,
    id0: InterfaceConfig,
}

#[derive(Debug, Serialize)]
struct InterfaceConfig {
    dhcp4: bool,
}

#[derive(Debug, Serialize)]
struct WriteFile {
    content: String,
    path: String,
    permissions: String,
}

/// Render the `#cloud-config` document.
///
/// The drive mount is skipped when no webdav credentials are available.
pub fn cloud_init_user_data(
    nextcloud_base_url: &str,
    credentials: &WebdavCredentials,
    public_keys: &[String],
) -> Result<String, ControllerError> {
    let mut config = CloudConfig {
        network: NetworkConfig {
            version: 2,
            id0: InterfaceConfig { dhcp4: true },
        },
        mounts: Vec::new(),
        write_files: Vec::new(),
        ssh_authorized_keys: public_keys.to_vec(),
    };

    if credentials.is_complete() {
        let drive_url = format!(
            "{}/remote.php/dav/files/{}",
            nextcloud_base_url.trim_end_matches('/'),
            credentials.username
        );
        config.mounts.push(vec![
            drive_url.clone(),
            MYDRIVE_MOUNT_POINT.to_string(),
            "davfs".to_string(),
            "_netdev,auto,user,rw,uid=1000,gid=1000".to_string(),
            "0".to_string(),
            "0".to_string(),
        ]);
        config.write_files.push(WriteFile {
            content: format!(
                "{} {} {}",
                drive_url, credentials.username, credentials.password
            ),
            path: DAVFS_SECRETS_PATH.to_string(),
            permissions: "0600".to_string(),
        });
    }

    let body = serde_yaml::to_string(&config).map_err(|e| {
        ControllerError::InvalidResource(format!("failed to render cloud-init: {}", e))
    })?;
    Ok(format!("#cloud-config\n{}", body))
}

/// Data of the Secret carrying the cloud-init payload.
pub fn cloud_init_secret_data(
    nextcloud_base_url: &str,
    credentials: &WebdavCredentials,
    public_keys: &[String],
) -> Result<BTreeMap<String, ByteString>, ControllerError> {
    let user_data = cloud_init_user_data(nextcloud_base_url, credentials, public_keys)?;
    Ok(BTreeMap::from([(
        USER_DATA_KEY.to_string(),
        ByteString(user_data.into_bytes()),
    )]))
}
