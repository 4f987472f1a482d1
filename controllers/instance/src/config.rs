//! Controller configuration.
//!
//! Everything is read from environment variables once at startup.

use crate::error::ControllerError;
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;

/// Default label selector restricting the namespaces the controller acts in.
pub const DEFAULT_NAMESPACE_WHITELIST: &str = "crownlabs.polito.it/operator-selector=production";

/// Images of the sidecars and helpers used by container environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEnvOpts {
    /// noVNC/websockify sidecar image
    pub websockify_image: String,
    /// File browser sidecar image
    pub filebrowser_image: String,
    /// Tag of the file browser image
    pub filebrowser_image_tag: String,
    /// Tag of the websockify sidecar image
    pub image_tag: String,
}

impl Default for ContainerEnvOpts {
    fn default() -> Self {
        Self {
            websockify_image: "crownlabs/websockify".to_string(),
            filebrowser_image: "filebrowser/filebrowser".to_string(),
            filebrowser_image_tag: "latest".to_string(),
            image_tag: "latest".to_string(),
        }
    }
}

/// Runtime configuration of the Instance Controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace to watch; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Labels a namespace must carry for its instances to be reconciled
    pub namespace_whitelist: BTreeMap<String, String>,
    /// Host serving the instance ingresses
    pub website_base_url: String,
    /// Nextcloud base URL used for the MyDrive mount
    pub nextcloud_base_url: String,
    /// Name of the Secret holding the webdav credentials
    pub webdav_secret_name: String,
    /// External authentication endpoint for ingresses (empty disables it)
    pub instances_auth_url: String,
    /// Upper bound of concurrently running reconciliations
    pub max_concurrent_reconciles: u16,
    /// Container environment images
    pub container_env: ContainerEnvOpts,
    /// Bind address of the probes/metrics server
    pub metrics_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            namespace_whitelist: parse_label_selector(DEFAULT_NAMESPACE_WHITELIST)
                .unwrap_or_default(),
            website_base_url: "crownlabs.polito.it".to_string(),
            nextcloud_base_url: "https://crownlabs.polito.it/cloud".to_string(),
            webdav_secret_name: "webdav".to_string(),
            instances_auth_url: String::new(),
            max_concurrent_reconciles: 1,
            container_env: ContainerEnvOpts::default(),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Config {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let namespace_whitelist = match get("NAMESPACE_WHITELIST") {
            Some(raw) => parse_label_selector(&raw)?,
            None => defaults.namespace_whitelist,
        };

        let max_concurrent_reconciles = match get("MAX_CONCURRENT_RECONCILES") {
            Some(raw) => raw.parse::<u16>().ok().filter(|n| *n > 0).ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "MAX_CONCURRENT_RECONCILES must be a positive integer, got '{}'",
                    raw
                ))
            })?,
            None => defaults.max_concurrent_reconciles,
        };

        let metrics_addr = match get("METRICS_ADDR") {
            Some(raw) => raw.parse::<SocketAddr>().map_err(|e| {
                ControllerError::InvalidConfig(format!("METRICS_ADDR '{}' is invalid: {}", raw, e))
            })?,
            None => defaults.metrics_addr,
        };

        let container_env = ContainerEnvOpts {
            websockify_image: get("CONTAINER_ENV_WEBSOCKIFY_IMG")
                .unwrap_or(defaults.container_env.websockify_image),
            filebrowser_image: get("CONTAINER_ENV_FILEBROWSER_IMG")
                .unwrap_or(defaults.container_env.filebrowser_image),
            filebrowser_image_tag: get("CONTAINER_ENV_FILEBROWSER_IMG_TAG")
                .unwrap_or(defaults.container_env.filebrowser_image_tag),
            image_tag: get("CONTAINER_ENV_SIDECARS_TAG").unwrap_or(defaults.container_env.image_tag),
        };

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            namespace_whitelist,
            website_base_url: get("WEBSITE_BASE_URL").unwrap_or(defaults.website_base_url),
            nextcloud_base_url: get("NEXTCLOUD_BASE_URL").unwrap_or(defaults.nextcloud_base_url),
            webdav_secret_name: get("WEBDAV_SECRET_NAME").unwrap_or(defaults.webdav_secret_name),
            instances_auth_url: get("INSTANCES_AUTH_URL").unwrap_or_default(),
            max_concurrent_reconciles,
            container_env,
            metrics_addr,
        })
    }
}

/// Parse an equality-based label selector (`k=v,k2=v2`).
pub fn parse_label_selector(raw: &str) -> Result<BTreeMap<String, String>, ControllerError> {
    let mut labels = BTreeMap::new();
    for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (key, value) = term.split_once('=').ok_or_else(|| {
            ControllerError::InvalidConfig(format!("label selector term '{}' is not key=value", term))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "label selector term '{}' has an empty key",
                term
            )));
        }
        labels.insert(key.to_string(), value.trim().to_string());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(
            config.namespace_whitelist.get("crownlabs.polito.it/operator-selector"),
            Some(&"production".to_string())
        );
        assert_eq!(config.max_concurrent_reconciles, 1);
        assert_eq!(config.metrics_addr.port(), 8080);
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "tenant-tester"),
            ("NAMESPACE_WHITELIST", "a=b, c=d"),
            ("WEBSITE_BASE_URL", "labs.example.com"),
            ("MAX_CONCURRENT_RECONCILES", "8"),
            ("INSTANCES_AUTH_URL", "https://auth.example.com/verify"),
        ]))
        .unwrap();
        assert_eq!(config.watch_namespace.as_deref(), Some("tenant-tester"));
        assert_eq!(config.namespace_whitelist.len(), 2);
        assert_eq!(config.namespace_whitelist["c"], "d");
        assert_eq!(config.website_base_url, "labs.example.com");
        assert_eq!(config.max_concurrent_reconciles, 8);
        assert_eq!(config.instances_auth_url, "https://auth.example.com/verify");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("MAX_CONCURRENT_RECONCILES", "zero")])),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("MAX_CONCURRENT_RECONCILES", "0")])),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("NAMESPACE_WHITELIST", "novalue")])),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("METRICS_ADDR", "not-an-addr")])),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(parse_label_selector("").unwrap().is_empty());
    }
}
