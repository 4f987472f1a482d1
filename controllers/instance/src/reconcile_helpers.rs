//! Helper functions for common reconciliation patterns
//!
//! Create-or-update with a mutate callback, idempotent deletion, controller
//! owner references and status diffing.

use crate::cluster::{ClusterClient, NamespacedObject};
use crate::error::ControllerError;
use kube::{Resource, ResourceExt};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, error, info};

/// Outcome of [`create_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// The object did not exist and was created
    Created,
    /// The object existed and was patched
    Updated,
    /// The object existed and the mutation changed nothing
    Unchanged,
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
            Self::Unchanged => f.write_str("unchanged"),
        }
    }
}

/// Make the cluster object named like `obj` match what `mutate` produces.
///
/// `obj` only needs name and namespace. When the object exists, `mutate`
/// runs on the live copy, which carries a `creationTimestamp`; when it does
/// not, `mutate` runs on `obj` itself, which does not. Callers use that to
/// forge immutable specs only once. Updates are sent as a merge patch of
/// the difference only, conditional on the `resourceVersion` that was read,
/// so fields this controller does not model are left alone.
pub async fn create_or_update<C, K, F>(
    client: &C,
    obj: K,
    mutate: F,
) -> Result<(K, OperationResult), ControllerError>
where
    C: ClusterClient,
    K: NamespacedObject,
    F: FnOnce(&mut K) -> Result<(), ControllerError>,
{
    let name = obj.name_any();
    let namespace = obj.namespace().ok_or_else(|| {
        ControllerError::InvalidResource(format!("{} {} has no namespace", K::kind(&()), name))
    })?;

    match client.get::<K>(&namespace, &name).await? {
        None => {
            let mut desired = obj;
            mutate(&mut desired)?;
            let created = client.create(&namespace, &desired).await?;
            Ok((created, OperationResult::Created))
        }
        Some(existing) => {
            let before = serde_json::to_value(&existing)?;
            let mut desired = existing;
            mutate(&mut desired)?;
            let Some(mut patch) = json_merge_diff(&before, &serde_json::to_value(&desired)?) else {
                return Ok((desired, OperationResult::Unchanged));
            };
            if let (Some(version), Value::Object(fields)) =
                (desired.resource_version(), &mut patch)
            {
                let metadata = fields
                    .entry("metadata".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(metadata) = metadata {
                    metadata.insert("resourceVersion".to_string(), Value::String(version));
                }
            }
            let updated = client.patch_merge::<K>(&namespace, &name, &patch).await?;
            Ok((updated, OperationResult::Updated))
        }
    }
}

/// Log the outcome of an enforcement at a level matching its significance.
pub fn log_enforced(kind: &str, namespace: &str, name: &str, result: OperationResult) {
    match result {
        OperationResult::Unchanged => {
            debug!(kind, namespace, name, result = %result, "object enforced");
        }
        OperationResult::Created | OperationResult::Updated => {
            info!(kind, namespace, name, result = %result, "object enforced");
        }
    }
}

/// Delete an object, treating a missing one as success.
pub async fn ensure_absent<C, K>(client: &C, namespace: &str, name: &str) -> Result<(), ControllerError>
where
    C: ClusterClient,
    K: NamespacedObject,
{
    let kind = K::kind(&());
    match client.delete::<K>(namespace, name).await {
        Ok(true) => {
            info!(kind = %kind, namespace, name, "object correctly removed");
            Ok(())
        }
        Ok(false) => {
            debug!(kind = %kind, namespace, name, "the object was already removed");
            Ok(())
        }
        Err(e) => {
            error!(kind = %kind, namespace, name, error = %e, "failed to delete object");
            Err(e)
        }
    }
}

/// Make `owner` the controller of `obj`.
///
/// Fails when the owner was never persisted, or when another object already
/// controls `obj`.
pub fn set_controller_reference<O, K>(owner: &O, obj: &mut K) -> Result<(), ControllerError>
where
    O: Resource<DynamicType = ()>,
    K: Resource,
{
    let reference = owner.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::InvalidResource(format!(
            "{} {} has no uid and cannot own objects",
            O::kind(&()),
            owner.meta().name.as_deref().unwrap_or_default()
        ))
    })?;

    let references = obj.meta_mut().owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = references
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != reference.uid)
    {
        return Err(ControllerError::InvalidResource(format!(
            "object is already controlled by {} {}",
            other.kind, other.name
        )));
    }

    match references.iter_mut().find(|r| r.uid == reference.uid) {
        Some(existing) => *existing = reference,
        None => references.push(reference),
    }
    Ok(())
}

/// JSON merge patch (RFC 7386) turning `original` into `modified`.
///
/// Returns `None` when the two documents are equal. Removed keys are
/// emitted as `null`; arrays are replaced wholesale.
pub fn json_merge_diff(original: &Value, modified: &Value) -> Option<Value> {
    if original == modified {
        return None;
    }
    match (original, modified) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, old) in before {
                match after.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) => {
                        if let Some(diff) = json_merge_diff(old, new) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                }
            }
            for (key, new) in after {
                if !before.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Some(Value::Object(patch))
        }
        _ => Some(modified.clone()),
    }
}
