use std::time::Duration;

use crate::error::{Result, SnapshotError};

/// Root directory the worker scans for registry credentials.
pub const DEFAULT_CREDENTIALS_ROOT: &str = "/config";

/// Host path of the container runtime control socket.
pub const DEFAULT_RUNTIME_SOCKET: &str = "/var/run/docker.sock";

/// Where the worker writes its failure message.
pub const DEFAULT_TERMINATION_LOG: &str = "/dev/termination-log";

/// Deadline for a whole worker run when none is configured.
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub const ENV_WORKER_IMAGE: &str = "WORKER_IMAGE";
pub const ENV_WORKER_IMAGE_PULL_SECRET: &str = "WORKER_IMAGE_PULL_SECRET";
pub const ENV_WORKER_SERVICE_ACCOUNT: &str = "WORKER_SERVICE_ACCOUNT";
pub const ENV_WORKER_TIMEOUT: &str = "WORKER_TIMEOUT";
pub const ENV_MAX_CONCURRENT_RECONCILES: &str = "MAX_CONCURRENT_RECONCILES";

/// Environment variables read by the worker process.
pub const ENV_NAMESPACE: &str = "NAMESPACE";
pub const ENV_TIMEOUT: &str = "TIMEOUT";

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Image the delegated job runs
    pub worker_image: String,

    /// Pull credential for the worker image
    pub worker_image_pull_secret: Option<String>,

    /// Service identity the worker runs as
    pub worker_service_account: Option<String>,

    /// Deadline passed to the worker (defaults to the worker's own)
    pub worker_timeout: Option<Duration>,

    /// Mount point of the projected credential bundles inside the job
    pub credentials_mount_path: String,

    /// Runtime socket mounted from the node
    pub runtime_socket_path: String,

    /// Termination message file of the worker container
    pub termination_message_path: String,

    /// Reconciliations allowed to run at once across different snapshots
    pub max_concurrent_reconciles: usize,

    /// First requeue delay after a retryable failure
    pub requeue_base_delay: Duration,

    /// Ceiling of the exponential requeue delay
    pub requeue_max_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_image: String::new(),
            worker_image_pull_secret: None,
            worker_service_account: None,
            worker_timeout: None,
            credentials_mount_path: DEFAULT_CREDENTIALS_ROOT.to_string(),
            runtime_socket_path: DEFAULT_RUNTIME_SOCKET.to_string(),
            termination_message_path: DEFAULT_TERMINATION_LOG.to_string(),
            max_concurrent_reconciles: 4,
            requeue_base_delay: Duration::from_secs(1),
            requeue_max_delay: Duration::from_secs(300),
        }
    }
}

impl ControllerConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let worker_image = non_empty(ENV_WORKER_IMAGE).ok_or_else(|| {
            SnapshotError::Config(format!("{} must be set", ENV_WORKER_IMAGE))
        })?;

        let worker_timeout = non_empty(ENV_WORKER_TIMEOUT)
            .map(|v| parse_duration(ENV_WORKER_TIMEOUT, &v))
            .transpose()?;

        let mut config = Self {
            worker_image,
            worker_image_pull_secret: non_empty(ENV_WORKER_IMAGE_PULL_SECRET),
            worker_service_account: non_empty(ENV_WORKER_SERVICE_ACCOUNT),
            worker_timeout,
            ..Default::default()
        };

        if let Some(raw) = non_empty(ENV_MAX_CONCURRENT_RECONCILES) {
            config.max_concurrent_reconciles = raw.trim().parse().map_err(|_| {
                SnapshotError::Config(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_MAX_CONCURRENT_RECONCILES, raw
                ))
            })?;
        }
        if config.max_concurrent_reconciles == 0 {
            return Err(SnapshotError::Config(format!(
                "{} must be at least 1",
                ENV_MAX_CONCURRENT_RECONCILES
            )));
        }

        Ok(config)
    }

    /// Requeue delay for the given consecutive failure count (1-based).
    pub fn requeue_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.requeue_base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.requeue_max_delay)
    }
}

/// Parse a human duration such as `30m` or `1h 15m`.
pub fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value.trim()).map_err(|e| {
        SnapshotError::Config(format!("{} is not a valid duration '{}': {}", name, value, e))
    })?;
    if duration.is_zero() {
        return Err(SnapshotError::Config(format!("{} must be positive", name)));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_minimal() {
        let config = ControllerConfig::from_lookup(lookup(&[(
            ENV_WORKER_IMAGE,
            "registry.local/snapshot-worker:0.1",
        )]))
        .unwrap();
        assert_eq!(config.worker_image, "registry.local/snapshot-worker:0.1");
        assert_eq!(config.worker_image_pull_secret, None);
        assert_eq!(config.credentials_mount_path, DEFAULT_CREDENTIALS_ROOT);
        assert_eq!(config.runtime_socket_path, DEFAULT_RUNTIME_SOCKET);
        assert_eq!(config.max_concurrent_reconciles, 4);
    }

    #[test]
    fn test_from_lookup_missing_image() {
        let err = ControllerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, SnapshotError::Config(_)));
        assert!(err.to_string().contains(ENV_WORKER_IMAGE));
    }

    #[test]
    fn test_from_lookup_all_fields() {
        let config = ControllerConfig::from_lookup(lookup(&[
            (ENV_WORKER_IMAGE, "worker:1"),
            (ENV_WORKER_IMAGE_PULL_SECRET, "regcred"),
            (ENV_WORKER_SERVICE_ACCOUNT, "snapshot-worker"),
            (ENV_WORKER_TIMEOUT, "45m"),
            (ENV_MAX_CONCURRENT_RECONCILES, "8"),
        ]))
        .unwrap();
        assert_eq!(config.worker_image_pull_secret.as_deref(), Some("regcred"));
        assert_eq!(config.worker_service_account.as_deref(), Some("snapshot-worker"));
        assert_eq!(config.worker_timeout, Some(Duration::from_secs(45 * 60)));
        assert_eq!(config.max_concurrent_reconciles, 8);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(ControllerConfig::from_lookup(lookup(&[
            (ENV_WORKER_IMAGE, "worker:1"),
            (ENV_WORKER_TIMEOUT, "soon"),
        ]))
        .is_err());

        assert!(ControllerConfig::from_lookup(lookup(&[
            (ENV_WORKER_IMAGE, "worker:1"),
            (ENV_MAX_CONCURRENT_RECONCILES, "0"),
        ]))
        .is_err());
    }

    #[test]
    fn test_requeue_delay_backoff() {
        let config = ControllerConfig::default();
        assert_eq!(config.requeue_delay(1), Duration::from_secs(1));
        assert_eq!(config.requeue_delay(2), Duration::from_secs(2));
        assert_eq!(config.requeue_delay(4), Duration::from_secs(8));
        assert_eq!(config.requeue_delay(30), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("TIMEOUT", "1h 30m").unwrap(),
            Duration::from_secs(90 * 60)
        );
        assert!(parse_duration("TIMEOUT", "0s").is_err());
        assert!(parse_duration("TIMEOUT", "abc").is_err());
    }
}
