//! Ingress forging.
//!
//! Instances are published under `https://<website>/instance/<uid>/...`.
//! Paths are regular expressions so the nginx controller can strip the
//! instance prefix before proxying.

use crate::forge::instance_uid;
use crds::Instance;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, IngressTLS, ServiceBackendPort,
};
use std::collections::BTreeMap;

/// Suffix of the GUI ingress name.
pub const INGRESS_GUI_NAME_SUFFIX: &str = "-gui";
/// Suffix of the file browser ingress name.
pub const INGRESS_MYDRIVE_NAME_SUFFIX: &str = "-mydrive";
/// TLS certificate used by every instance ingress.
pub const INGRESS_DEFAULT_CERTIFICATE_NAME: &str = "crownlabs-ingress-secret";

const ANNOTATION_REWRITE_TARGET: &str = "nginx.ingress.kubernetes.io/rewrite-target";
const ANNOTATION_USE_REGEX: &str = "nginx.ingress.kubernetes.io/use-regex";
const ANNOTATION_PROXY_READ_TIMEOUT: &str = "nginx.ingress.kubernetes.io/proxy-read-timeout";
const ANNOTATION_PROXY_SEND_TIMEOUT: &str = "nginx.ingress.kubernetes.io/proxy-send-timeout";
const ANNOTATION_PROXY_BODY_SIZE: &str = "nginx.ingress.kubernetes.io/proxy-body-size";
const ANNOTATION_FORWARDED_PREFIX: &str = "nginx.ingress.kubernetes.io/x-forwarded-prefix";
const ANNOTATION_AUTH_URL: &str = "nginx.ingress.kubernetes.io/auth-url";
const ANNOTATION_AUTH_SIGNIN: &str = "nginx.ingress.kubernetes.io/auth-signin";

/// Public path of the GUI of an instance.
pub fn ingress_gui_path(instance: &Instance) -> String {
    format!("/instance/{}/app", instance_uid(instance))
}

/// Public path of the file browser of an instance.
pub fn ingress_mydrive_path(instance: &Instance) -> String {
    format!("/instance/{}/mydrive", instance_uid(instance))
}

/// Public URL for `path` on `host`.
pub fn ingress_url(host: &str, path: &str) -> String {
    format!("https://{}{}", host, path)
}

/// Spec routing `path` on `host` to a named port of `service_name`.
pub fn ingress_spec(
    host: &str,
    path: &str,
    certificate_name: &str,
    service_name: &str,
    service_port: &str,
) -> IngressSpec {
    IngressSpec {
        tls: Some(vec![IngressTLS {
            hosts: Some(vec![host.to_string()]),
            secret_name: Some(certificate_name.to_string()),
        }]),
        rules: Some(vec![IngressRule {
            host: Some(host.to_string()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some(format!("{}(/|$)(.*)", path)),
                    path_type: "ImplementationSpecific".to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: service_name.to_string(),
                            port: Some(ServiceBackendPort {
                                name: Some(service_port.to_string()),
                                number: None,
                            }),
                        }),
                        resource: None,
                    },
                }],
            }),
        }]),
        ..Default::default()
    }
}

fn rewrite_annotations(
    existing: Option<&BTreeMap<String, String>>,
    path: &str,
) -> BTreeMap<String, String> {
    let mut annotations = existing.cloned().unwrap_or_default();
    annotations.insert(ANNOTATION_USE_REGEX.to_string(), "true".to_string());
    annotations.insert(ANNOTATION_REWRITE_TARGET.to_string(), "/$2".to_string());
    annotations.insert(ANNOTATION_FORWARDED_PREFIX.to_string(), path.to_string());
    annotations
}

/// Annotations of the GUI ingress, merged into `existing`.
pub fn ingress_gui_annotations(
    existing: Option<&BTreeMap<String, String>>,
    path: &str,
) -> BTreeMap<String, String> {
    let mut annotations = rewrite_annotations(existing, path);
    annotations.insert(ANNOTATION_PROXY_READ_TIMEOUT.to_string(), "3600".to_string());
    annotations.insert(ANNOTATION_PROXY_SEND_TIMEOUT.to_string(), "3600".to_string());
    annotations
}

/// Annotations of the file browser ingress, merged into `existing`.
pub fn ingress_mydrive_annotations(
    existing: Option<&BTreeMap<String, String>>,
    path: &str,
) -> BTreeMap<String, String> {
    let mut annotations = rewrite_annotations(existing, path);
    annotations.insert(ANNOTATION_PROXY_BODY_SIZE.to_string(), "0".to_string());
    annotations
}

/// External authentication annotations; a no-op when `auth_url` is empty.
pub fn ingress_authentication_annotations(
    mut annotations: BTreeMap<String, String>,
    auth_url: &str,
) -> BTreeMap<String, String> {
    if !auth_url.is_empty() {
        annotations.insert(ANNOTATION_AUTH_URL.to_string(), auth_url.to_string());
        annotations.insert(
            ANNOTATION_AUTH_SIGNIN.to_string(),
            "https://$host/oauth2/start?rd=$escaped_request_uri".to_string(),
        );
    }
    annotations
}
