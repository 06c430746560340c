//! Delegated job construction.

use container_snapshot_core::config::{ControllerConfig, ENV_NAMESPACE, ENV_TIMEOUT};
use container_snapshot_core::resource::{LocalObjectReference, ObjectMeta, Snapshot};
use container_snapshot_core::workload::{
    ContainerSpec, EnvVar, Job, JobSpec, JobStatus, RestartPolicy, SecretProjection, Volume,
    VolumeMount, VolumeSource,
};

/// Prefix of every label the controller sets on a job.
pub const LABEL_PREFIX: &str = "container-snapshot.io/";

pub const WORKER_CONTAINER_NAME: &str = "snapshot-worker";

const ARG_CONTAINER: &str = "--container";

const CREDENTIALS_VOLUME: &str = "push-credentials";
const RUNTIME_SOCKET_VOLUME: &str = "runtime-socket";

/// Build the job that snapshots `container_id` on `node_name`.
///
/// The job is named after the snapshot with a generated suffix, is
/// controlled by the snapshot, and never restarts its container.
pub fn build_job(
    snapshot: &Snapshot,
    node_name: &str,
    container_id: &str,
    config: &ControllerConfig,
) -> Job {
    let spec = &snapshot.spec;

    let mut labels = snapshot.metadata.labels.clone();
    for (key, value) in [
        ("snapshot", snapshot.metadata.name.as_str()),
        ("pod", spec.pod_name.as_str()),
        ("container", spec.container_name.as_str()),
        ("image", spec.image.as_str()),
    ] {
        labels.insert(format!("{}{}", LABEL_PREFIX, key), value.to_string());
    }

    let args = vec![
        ARG_CONTAINER.to_string(),
        container_id.to_string(),
        "--image".to_string(),
        spec.image.clone(),
        "--snapshot".to_string(),
        snapshot.metadata.name.clone(),
        "--config".to_string(),
        config.credentials_mount_path.clone(),
        "--termination-log".to_string(),
        config.termination_message_path.clone(),
    ];

    let mut env = vec![EnvVar::new(ENV_NAMESPACE, &snapshot.metadata.namespace)];
    if let Some(timeout) = config.worker_timeout {
        env.push(EnvVar::new(
            ENV_TIMEOUT,
            humantime::format_duration(timeout).to_string(),
        ));
    }

    // Each bundle gets its own subdirectory so equal file names never collide
    let projections = spec
        .image_push_secrets
        .iter()
        .map(|secret| SecretProjection {
            secret_name: secret.name.clone(),
            sub_path: secret.name.clone(),
        })
        .collect();

    let container = ContainerSpec {
        name: WORKER_CONTAINER_NAME.to_string(),
        image: config.worker_image.clone(),
        args,
        env,
        volume_mounts: vec![
            VolumeMount {
                name: CREDENTIALS_VOLUME.to_string(),
                mount_path: config.credentials_mount_path.clone(),
                read_only: true,
            },
            VolumeMount {
                name: RUNTIME_SOCKET_VOLUME.to_string(),
                mount_path: config.runtime_socket_path.clone(),
                read_only: false,
            },
        ],
        termination_message_path: config.termination_message_path.clone(),
    };

    Job {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", snapshot.metadata.name)),
            namespace: snapshot.metadata.namespace.clone(),
            labels,
            owner_references: vec![snapshot.controller_reference()],
            ..Default::default()
        },
        spec: JobSpec {
            node_name: Some(node_name.to_string()),
            service_account_name: config.worker_service_account.clone(),
            image_pull_secrets: config
                .worker_image_pull_secret
                .iter()
                .map(LocalObjectReference::new)
                .collect(),
            restart_policy: RestartPolicy::Never,
            container,
            volumes: vec![
                Volume {
                    name: CREDENTIALS_VOLUME.to_string(),
                    source: VolumeSource::ProjectedSecrets {
                        sources: projections,
                    },
                },
                Volume {
                    name: RUNTIME_SOCKET_VOLUME.to_string(),
                    source: VolumeSource::HostSocket {
                        path: config.runtime_socket_path.clone(),
                    },
                },
            ],
        },
        status: JobStatus::default(),
    }
}

/// Container id a job was built for.
pub fn container_id_of(job: &Job) -> Option<&str> {
    let args = &job.spec.container.args;
    args.iter()
        .position(|a| a == ARG_CONTAINER)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use container_snapshot_core::resource::SnapshotSpec;
    use std::time::Duration;

    fn config() -> ControllerConfig {
        ControllerConfig {
            worker_image: "registry.local/snapshot-worker:0.1".to_string(),
            worker_image_pull_secret: Some("regcred".to_string()),
            worker_service_account: Some("snapshot-worker".to_string()),
            ..Default::default()
        }
    }

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new(
            "ml",
            "nightly",
            SnapshotSpec {
                pod_name: "trainer-0".to_string(),
                container_name: "trainer".to_string(),
                image: "ghcr.io/org/trainer:ckpt".to_string(),
                image_push_secrets: vec![
                    LocalObjectReference::new("ghcr-bot"),
                    LocalObjectReference::new("ghcr-team"),
                ],
            },
        );
        snapshot.metadata.uid = "uid-1".to_string();
        snapshot
            .metadata
            .labels
            .insert("team".to_string(), "research".to_string());
        snapshot
    }

    #[test]
    fn test_job_args_and_placement() {
        let job = build_job(&snapshot(), "node-a", "4f2a9c", &config());

        let args = &job.spec.container.args;
        let arg = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };
        assert_eq!(arg("--container"), "4f2a9c");
        assert_eq!(arg("--image"), "ghcr.io/org/trainer:ckpt");
        assert_eq!(arg("--snapshot"), "nightly");
        assert_eq!(arg("--config"), "/config");
        assert_eq!(container_id_of(&job), Some("4f2a9c"));

        assert_eq!(job.spec.node_name.as_deref(), Some("node-a"));
        assert_eq!(job.spec.restart_policy, RestartPolicy::Never);
        assert_eq!(
            job.spec.service_account_name.as_deref(),
            Some("snapshot-worker")
        );
        assert_eq!(
            job.spec.image_pull_secrets,
            vec![LocalObjectReference::new("regcred")]
        );
        assert_eq!(job.spec.container.image, "registry.local/snapshot-worker:0.1");
        assert_eq!(
            job.spec.container.env,
            vec![EnvVar::new(ENV_NAMESPACE, "ml")]
        );
    }

    #[test]
    fn test_job_identity_and_owner() {
        let job = build_job(&snapshot(), "node-a", "4f2a9c", &config());

        assert!(job.metadata.name.is_empty());
        assert_eq!(job.metadata.generate_name.as_deref(), Some("nightly-"));
        assert_eq!(job.metadata.namespace, "ml");

        let owner = job.metadata.controller_owner().unwrap();
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.name, "nightly");

        let labels = &job.metadata.labels;
        assert_eq!(labels["container-snapshot.io/snapshot"], "nightly");
        assert_eq!(labels["container-snapshot.io/pod"], "trainer-0");
        assert_eq!(labels["container-snapshot.io/container"], "trainer");
        assert_eq!(labels["container-snapshot.io/image"], "ghcr.io/org/trainer:ckpt");
        assert_eq!(labels["team"], "research");
    }

    #[test]
    fn test_credentials_projected_into_distinct_subpaths() {
        let job = build_job(&snapshot(), "node-a", "4f2a9c", &config());

        let sources = job
            .spec
            .volumes
            .iter()
            .find_map(|v| match &v.source {
                VolumeSource::ProjectedSecrets { sources } => Some(sources.clone()),
                _ => None,
            })
            .unwrap();
        let paths: Vec<&str> = sources.iter().map(|s| s.sub_path.as_str()).collect();
        assert_eq!(paths, vec!["ghcr-bot", "ghcr-team"]);

        let socket = job
            .spec
            .volumes
            .iter()
            .any(|v| v.source == VolumeSource::HostSocket {
                path: "/var/run/docker.sock".to_string(),
            });
        assert!(socket);

        let creds_mount = job
            .spec
            .container
            .volume_mounts
            .iter()
            .find(|m| m.name == CREDENTIALS_VOLUME)
            .unwrap();
        assert!(creds_mount.read_only);
    }

    #[test]
    fn test_timeout_forwarded() {
        let mut config = config();
        config.worker_timeout = Some(Duration::from_secs(45 * 60));
        config.worker_image_pull_secret = None;

        let job = build_job(&snapshot(), "node-a", "4f2a9c", &config);
        assert!(job
            .spec
            .container
            .env
            .contains(&EnvVar::new(ENV_TIMEOUT, "45m")));
        assert!(job.spec.image_pull_secrets.is_empty());
    }

    #[test]
    fn test_job_serializes() {
        let job = build_job(&snapshot(), "node-a", "4f2a9c", &config());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["metadata"]["generateName"], "nightly-");
        assert_eq!(json["spec"]["restartPolicy"], "Never");
    }
}
