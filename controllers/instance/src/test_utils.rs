//! Test utilities for unit testing reconcilers
//!
//! `FakeCluster` is an in-memory API server: objects are stored as JSON,
//! stamped with uid/resourceVersion/creationTimestamp on create, and
//! patched conditionally when the patch carries a resourceVersion. Failures can be
//! injected per verb and kind, and every write is counted.

use crate::cluster::{ClusterClient, ClusterObject, NamespacedObject};
use crate::config::Config;
use crate::error::ControllerError;
use crate::events::EventPublisher;
use crate::reconciler::Reconciler;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use crds::{
    Environment, EnvironmentResources, EnvironmentType, GenericRef, Instance, InstanceSpec,
    InstanceStatus, Template, TemplateSpec, Tenant, TenantSpec,
};
use k8s_openapi::api::core::v1::{Namespace, ObjectReference};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube::runtime::events::EventType;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

pub const INSTANCE_NAME: &str = "kubernetes-0000";
pub const INSTANCE_NAMESPACE: &str = "tenant-tester";
pub const INSTANCE_UID: &str = "4e3a8f9c-3b5e-4a4f-9d0e-6c2b1f7a9e10";
pub const TEMPLATE_NAME: &str = "kubernetes";
pub const TEMPLATE_NAMESPACE: &str = "workspace-netgroup";
pub const WORKSPACE_NAME: &str = "netgroup";
pub const TENANT_NAME: &str = "tester";
pub const IMAGE: &str = "internal/registry/image:v1.0";
pub const WEBSITE_BASE_URL: &str = "crownlabs.example.com";

/// API verbs the fake can fail on and count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Patch,
    PatchStatus,
    Delete,
}

/// Failure injected by [`FakeCluster::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// HTTP 409 optimistic-concurrency conflict
    Conflict,
    /// Any other server-side failure
    Server,
}

impl Failure {
    fn to_error(self, verb: Verb, kind: &str) -> ControllerError {
        match self {
            Self::Conflict => ControllerError::Conflict(format!("injected conflict on {:?} {}", verb, kind)),
            Self::Server => ControllerError::InvalidResource(format!("injected failure on {:?} {}", verb, kind)),
        }
    }
}

type ObjectKey = (String, String, String);

#[derive(Debug, Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, Value>,
    resource_version: u64,
    cluster_ips: u32,
    writes: HashMap<(Verb, String), usize>,
    failures: HashMap<(Verb, String), Failure>,
}

impl FakeState {
    fn check(&self, verb: Verb, kind: &str) -> Result<(), ControllerError> {
        match self.failures.get(&(verb, kind.to_string())) {
            Some(failure) => Err(failure.to_error(verb, kind)),
            None => Ok(()),
        }
    }

    fn record(&mut self, verb: Verb, kind: &str) {
        *self.writes.entry((verb, kind.to_string())).or_default() += 1;
    }

    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn stamp_new(&mut self, kind: &str, namespace: &str, value: &mut Value) {
        let resource_version = self.next_resource_version();
        let metadata = metadata_mut(value);
        if !namespace.is_empty() {
            metadata.insert("namespace".to_string(), json!(namespace));
        }
        metadata
            .entry("uid".to_string())
            .or_insert_with(|| json!(uuid::Uuid::new_v4().to_string()));
        metadata.insert("resourceVersion".to_string(), json!(resource_version));
        metadata.insert(
            "creationTimestamp".to_string(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        metadata.insert("generation".to_string(), json!(1));

        if kind == "Service" {
            self.cluster_ips += 1;
            let ip = format!("10.96.{}.{}", self.cluster_ips / 250, self.cluster_ips % 250 + 1);
            if let Some(spec) = value.get_mut("spec").and_then(Value::as_object_mut) {
                spec.entry("clusterIP".to_string()).or_insert_with(|| json!(ip));
            }
        }
    }
}

fn metadata_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let Value::Object(root) = value else {
        unreachable!("value was just made an object")
    };
    let metadata = root
        .entry("metadata".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    let Value::Object(metadata) = metadata else {
        unreachable!("metadata was just made an object")
    };
    metadata
}

fn name_of(value: &Value) -> Option<String> {
    value
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn resource_version_of(value: &Value) -> Option<String> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Apply a JSON merge patch (RFC 7386) to `target`.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(fields) = target {
                for (key, value) in entries {
                    if value.is_null() {
                        fields.remove(key);
                    } else {
                        apply_merge_patch(fields.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

/// In-memory [`ClusterClient`].
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn key<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> ObjectKey {
        (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
    }

    /// Store an object as-is (status included), stamping server metadata.
    pub fn seed<K: Resource<DynamicType = ()> + Serialize>(&self, obj: &K) {
        let mut value = serde_json::to_value(obj).unwrap();
        let kind = K::kind(&()).to_string();
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let name = name_of(&value).expect("seeded objects need a name");
        let mut state = self.lock();
        state.stamp_new(&kind, &namespace, &mut value);
        state.objects.insert((kind, namespace, name), value);
    }

    /// Current content of an object.
    pub fn object<K: Resource<DynamicType = ()> + DeserializeOwned>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<K> {
        self.lock()
            .objects
            .get(&Self::key::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Whether an object exists.
    pub fn exists<K: Resource<DynamicType = ()>>(&self, namespace: &str, name: &str) -> bool {
        self.lock().objects.contains_key(&Self::key::<K>(namespace, name))
    }

    /// Number of stored objects of kind `K`.
    pub fn count<K: Resource<DynamicType = ()>>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.lock().objects.keys().filter(|(k, _, _)| *k == kind).count()
    }

    /// Overwrite the status of an object, as a backend controller would.
    pub fn set_status<K: Resource<DynamicType = ()>>(&self, namespace: &str, name: &str, status: Value) {
        let mut state = self.lock();
        let resource_version = state.next_resource_version();
        let object = state
            .objects
            .get_mut(&Self::key::<K>(namespace, name))
            .expect("object to update must exist");
        object["status"] = status;
        metadata_mut(object).insert("resourceVersion".to_string(), json!(resource_version));
    }

    /// Remove an object behind the controller's back.
    pub fn remove<K: Resource<DynamicType = ()>>(&self, namespace: &str, name: &str) {
        self.lock().objects.remove(&Self::key::<K>(namespace, name));
    }

    /// Writes of `verb` performed on kind `K`.
    pub fn writes<K: Resource<DynamicType = ()>>(&self, verb: Verb) -> usize {
        self.lock()
            .writes
            .get(&(verb, K::kind(&()).to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Every write performed so far, across kinds.
    pub fn total_writes(&self) -> usize {
        self.lock().writes.values().sum()
    }

    /// Make every `verb` on kind `K` fail until cleared.
    pub fn fail<K: Resource<DynamicType = ()>>(&self, verb: Verb, failure: Failure) {
        self.lock()
            .failures
            .insert((verb, K::kind(&()).to_string()), failure);
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    fn read<K: DeserializeOwned>(value: &Value) -> Result<K, ControllerError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, ControllerError> {
        let state = self.lock();
        state.check(Verb::Get, &K::kind(&()))?;
        state
            .objects
            .get(&Self::key::<K>(namespace, name))
            .map(Self::read)
            .transpose()
    }

    async fn get_cluster_scoped<K: ClusterObject>(
        &self,
        name: &str,
    ) -> Result<Option<K>, ControllerError> {
        let state = self.lock();
        state.check(Verb::Get, &K::kind(&()))?;
        state
            .objects
            .get(&Self::key::<K>("", name))
            .map(Self::read)
            .transpose()
    }

    async fn create<K: NamespacedObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ControllerError> {
        let kind = K::kind(&()).to_string();
        let mut state = self.lock();
        state.check(Verb::Create, &kind)?;

        let mut value = serde_json::to_value(obj)?;
        let name = name_of(&value)
            .ok_or_else(|| ControllerError::InvalidResource(format!("{} without a name", kind)))?;
        let key = (kind.clone(), namespace.to_string(), name.clone());
        if state.objects.contains_key(&key) {
            return Err(ControllerError::AlreadyExists(format!("{} {}/{}", kind, namespace, name)));
        }
        if let Value::Object(fields) = &mut value {
            fields.remove("status");
        }
        state.stamp_new(&kind, namespace, &mut value);
        state.record(Verb::Create, &kind);
        state.objects.insert(key, value.clone());
        Self::read(&value)
    }

    async fn patch_merge<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, ControllerError> {
        let kind = K::kind(&()).to_string();
        let mut state = self.lock();
        state.check(Verb::Patch, &kind)?;

        let resource_version = state.next_resource_version();
        let key = (kind.clone(), namespace.to_string(), name.to_string());
        let object = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| ControllerError::NotFound(format!("{} {}/{}", kind, namespace, name)))?;

        if let Some(requested) = resource_version_of(patch) {
            if Some(&requested) != resource_version_of(object).as_ref() {
                return Err(ControllerError::Conflict(format!(
                    "{} {}/{} has been modified",
                    kind, namespace, name
                )));
            }
        }

        let mut patch = patch.clone();
        if let Value::Object(fields) = &mut patch {
            fields.remove("status");
        }
        apply_merge_patch(object, &patch);
        metadata_mut(object).insert("resourceVersion".to_string(), json!(resource_version));
        let value = object.clone();

        state.record(Verb::Patch, &kind);
        Self::read(&value)
    }

    async fn patch_status<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, ControllerError> {
        let kind = K::kind(&()).to_string();
        let mut state = self.lock();
        state.check(Verb::PatchStatus, &kind)?;

        let resource_version = state.next_resource_version();
        let key = (kind.clone(), namespace.to_string(), name.to_string());
        let object = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| ControllerError::NotFound(format!("{} {}/{}", kind, namespace, name)))?;

        if let Some(status_patch) = patch.get("status") {
            let status = object
                .as_object_mut()
                .map(|fields| fields.entry("status".to_string()).or_insert(Value::Null));
            if let Some(status) = status {
                apply_merge_patch(status, status_patch);
            }
        }
        metadata_mut(object).insert("resourceVersion".to_string(), json!(resource_version));
        let value = object.clone();

        state.record(Verb::PatchStatus, &kind);
        Self::read(&value)
    }

    async fn delete<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ControllerError> {
        let kind = K::kind(&()).to_string();
        let mut state = self.lock();
        state.check(Verb::Delete, &kind)?;
        let existed = state
            .objects
            .remove(&(kind.clone(), namespace.to_string(), name.to_string()))
            .is_some();
        if existed {
            state.record(Verb::Delete, &kind);
        }
        Ok(existed)
    }
}

/// An event captured by [`RecordingEventPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
    pub object: Option<String>,
}

/// [`EventPublisher`] keeping every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
            object: resource_ref.name.clone(),
        });
    }
}

/// Helper to create a test Environment
pub fn create_test_environment(environment_type: EnvironmentType, persistent: bool) -> Environment {
    Environment {
        name: "control-plane".to_string(),
        image: IMAGE.to_string(),
        environment_type,
        gui_enabled: true,
        persistent,
        resources: EnvironmentResources {
            cpu: 2,
            reserved_cpu_percentage: 25,
            memory: Quantity("1250M".to_string()),
            disk: Some(Quantity("20Gi".to_string())),
        },
    }
}

/// Helper to create a test Template wrapping `environments`
pub fn create_test_template(environments: Vec<Environment>) -> Template {
    let mut template = Template::new(
        TEMPLATE_NAME,
        TemplateSpec {
            pretty_name: "Kubernetes".to_string(),
            description: "Kubernetes lab".to_string(),
            workspace: GenericRef::cluster(WORKSPACE_NAME),
            environment_list: environments,
        },
    );
    template.metadata.namespace = Some(TEMPLATE_NAMESPACE.to_string());
    template
}

/// Helper to create a test Tenant
pub fn create_test_tenant() -> Tenant {
    Tenant::new(
        TENANT_NAME,
        TenantSpec {
            first_name: "Test".to_string(),
            last_name: "Er".to_string(),
            email: "tester@example.com".to_string(),
            public_keys: vec!["ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIKey tester@lab".to_string()],
        },
    )
}

/// Helper to create a test Instance, persisted-looking (uid set)
pub fn create_test_instance(running: bool) -> Instance {
    let mut instance = Instance::new(
        INSTANCE_NAME,
        InstanceSpec {
            template: GenericRef::namespaced(TEMPLATE_NAME, TEMPLATE_NAMESPACE),
            tenant: GenericRef::cluster(TENANT_NAME),
            running,
        },
    );
    instance.metadata.namespace = Some(INSTANCE_NAMESPACE.to_string());
    instance.metadata.uid = Some(INSTANCE_UID.to_string());
    instance
}

/// Helper to create a Namespace selected by the default whitelist
pub fn create_test_namespace(name: &str, selected: bool) -> Namespace {
    let value = if selected { "production" } else { "staging" };
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                "crownlabs.polito.it/operator-selector".to_string(),
                value.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Configuration used by reconciler tests
pub fn test_config() -> Config {
    Config {
        website_base_url: WEBSITE_BASE_URL.to_string(),
        nextcloud_base_url: "https://cloud.example.com".to_string(),
        webdav_secret_name: "webdav-credentials".to_string(),
        ..Config::default()
    }
}

/// A fake cluster pre-populated with a selected namespace, the template,
/// the tenant and the instance, plus a reconciler bound to it.
pub struct TestHarness {
    pub cluster: FakeCluster,
    pub events: RecordingEventPublisher,
    pub reconciler: Reconciler<FakeCluster>,
}

impl TestHarness {
    pub fn new(instance: &Instance, template: &Template) -> Self {
        Self::with_config(instance, template, test_config())
    }

    pub fn with_config(instance: &Instance, template: &Template, config: Config) -> Self {
        let cluster = FakeCluster::new();
        cluster.seed(&create_test_namespace(INSTANCE_NAMESPACE, true));
        cluster.seed(template);
        cluster.seed(&create_test_tenant());
        cluster.seed(instance);

        let events = RecordingEventPublisher::default();
        let reconciler = Reconciler::new(cluster.clone(), Arc::new(events.clone()), config);
        Self {
            cluster,
            events,
            reconciler,
        }
    }

    pub async fn reconcile(&self) -> Result<(), ControllerError> {
        self.reconciler.reconcile(INSTANCE_NAMESPACE, INSTANCE_NAME).await
    }

    /// Flip the requested power state, as a tenant would.
    pub async fn set_running(&self, running: bool) {
        self.cluster
            .patch_merge::<Instance>(
                INSTANCE_NAMESPACE,
                INSTANCE_NAME,
                &json!({ "spec": { "running": running } }),
            )
            .await
            .unwrap();
    }

    pub fn status(&self) -> InstanceStatus {
        self.instance().status.unwrap_or_default()
    }

    pub fn instance(&self) -> Instance {
        self.cluster
            .object::<Instance>(INSTANCE_NAMESPACE, INSTANCE_NAME)
            .expect("instance must exist")
    }
}
