//! Snapshot resource and the object metadata shared by every cluster resource.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::Conditions;

/// Resource kind name of a snapshot.
pub const SNAPSHOT_KIND: &str = "ContainerSnapshot";

/// API version of the snapshot resource.
pub const SNAPSHOT_API_VERSION: &str = "snapshot.container-snapshot.io/v1alpha1";

/// Namespaced identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parent/child link used for lookup and cascading deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    /// Set when the owner is the managing controller of the child.
    #[serde(default)]
    pub controller: bool,
}

/// Reference to another object in the same namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    pub name: String,
}

impl LocalObjectReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Metadata common to all cluster resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    /// Prefix the cluster completes with a random suffix when `name` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    /// Opaque version used for conditional updates.
    #[serde(default)]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|o| o.controller)
    }
}

/// Lifecycle of the delegated worker as observed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Created,
    Running,
    Complete,
    Failed,
    Unknown,
}

impl WorkerState {
    /// States that still have a live job to watch.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            WorkerState::Created | WorkerState::Running | WorkerState::Unknown
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Complete | WorkerState::Failed)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Created => "Created",
            WorkerState::Running => "Running",
            WorkerState::Complete => "Complete",
            WorkerState::Failed => "Failed",
            WorkerState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Desired state of a snapshot. Write-once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    /// Pod running the source container.
    pub pod_name: String,
    /// Name of the source container inside the pod.
    pub container_name: String,
    /// Target image; registry host and tag are optional.
    pub image: String,
    /// Registry credential bundles in the snapshot's namespace used for the push.
    #[serde(default)]
    pub image_push_secrets: Vec<LocalObjectReference>,
}

/// Observed state of a snapshot, written only by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_ref: Option<LocalObjectReference>,
    /// Node of the source container; the job is pinned here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Runtime id of the source container, without the runtime scheme prefix.
    #[serde(default, rename = "containerID", skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// Absent until the controller first acts on the snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_state: Option<WorkerState>,
    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
}

/// Request for an image snapshot of a running container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: ObjectMeta,
    pub spec: SnapshotSpec,
    #[serde(default)]
    pub status: SnapshotStatus,
}

impl Snapshot {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: SnapshotSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            spec,
            status: SnapshotStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Owner reference that marks a child as controlled by this snapshot.
    pub fn controller_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: SNAPSHOT_API_VERSION.to_string(),
            kind: SNAPSHOT_KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::new("default", "snap-1");
        assert_eq!(key.to_string(), "default/snap-1");
    }

    #[test]
    fn test_worker_state_groups() {
        assert!(WorkerState::Created.is_active());
        assert!(WorkerState::Unknown.is_active());
        assert!(!WorkerState::Complete.is_active());
        assert!(WorkerState::Failed.is_terminal());
        assert!(!WorkerState::Running.is_terminal());
    }

    #[test]
    fn test_status_field_names() {
        let status = SnapshotStatus {
            job_ref: Some(LocalObjectReference::new("snap-1-abcde")),
            node_name: Some("node-a".to_string()),
            container_id: Some("0123abcd".to_string()),
            worker_state: Some(WorkerState::Running),
            conditions: Conditions::new(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["workerState"], "Running");
        assert_eq!(json["containerID"], "0123abcd");
        assert_eq!(json["nodeName"], "node-a");
        assert_eq!(json["jobRef"]["name"], "snap-1-abcde");
        assert!(json.get("conditions").is_none());
    }

    #[test]
    fn test_snapshot_deserialize_without_status() {
        let json = r#"{
            "metadata": {"name": "snap", "namespace": "ml"},
            "spec": {"podName": "trainer-0", "containerName": "main", "image": "ghcr.io/org/trainer:ckpt"}
        }"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.key(), ObjectKey::new("ml", "snap"));
        assert!(snapshot.spec.image_push_secrets.is_empty());
        assert_eq!(snapshot.status.worker_state, None);
        assert!(!snapshot.is_deleting());
    }

    #[test]
    fn test_controller_reference() {
        let mut snapshot = Snapshot::new("ml", "snap", SnapshotSpec::default());
        snapshot.metadata.uid = "uid-1".to_string();
        let owner = snapshot.controller_reference();
        assert_eq!(owner.kind, SNAPSHOT_KIND);
        assert_eq!(owner.uid, "uid-1");
        assert!(owner.controller);
    }
}
