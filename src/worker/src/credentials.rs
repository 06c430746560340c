//! Registry credentials loaded from mounted credential bundles.
//!
//! The worker's credential root holds one subdirectory per bundle. Each
//! bundle contributes either a `.dockercfg` file (a flat host → auth map) or
//! a `.dockerconfigjson` file (the same map under an `auths` key). Entries
//! for the same host from several bundles are all kept, in walk order.

use std::collections::HashMap;
use std::path::Path;

use base64::Engine;
use container_snapshot_core::error::{Result, SnapshotError};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// File name of a flat host → auth map.
pub const DOCKER_CONFIG_KEY: &str = ".dockercfg";

/// File name of a wrapper object holding the map under `auths`.
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Authentication entry for one registry, in Docker's auth config shape.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// base64 of `username:password`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serveraddress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identitytoken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrytoken: Option<String>,
}

impl RegistryAuth {
    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    /// Fill username/password from the encoded `auth` field when absent.
    fn decode_auth(mut self) -> std::result::Result<Self, String> {
        if self.username.is_some() {
            return Ok(self);
        }
        let Some(encoded) = self.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(self);
        };

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("invalid auth field: {}", e))?;
        let decoded =
            String::from_utf8(decoded).map_err(|_| "auth field is not UTF-8".to_string())?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| "auth field is not 'username:password'".to_string())?;

        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        Ok(self)
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("auth", &redact(&self.auth))
            .field("serveraddress", &self.serveraddress)
            .field("identitytoken", &redact(&self.identitytoken))
            .field("registrytoken", &redact(&self.registrytoken))
            .finish()
    }
}

type AuthMap = HashMap<String, RegistryAuth>;

#[derive(Deserialize)]
struct DockerConfigJson {
    #[serde(default)]
    auths: AuthMap,
}

/// Merged, read-only registry credentials.
#[derive(Debug, Default, Clone)]
pub struct CredentialStore {
    registries: HashMap<String, Vec<RegistryAuth>>,
}

impl CredentialStore {
    /// Store with no credentials; every push is anonymous.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Walk `root` and merge every recognized credential file.
    ///
    /// Any unreadable or unparsable file aborts the whole load. A missing
    /// root yields an empty store. Symlinks are followed, since a mounted
    /// secret exposes each bundle as a link into its current revision.
    /// Entries whose names start with `..` (that revision directory and the
    /// `..data` link to it) are skipped so each bundle is read once.
    pub fn load(root: &Path) -> Result<Self> {
        let mut store = Self::empty();

        if !root.exists() {
            tracing::warn!(
                root = %root.display(),
                "Credential root does not exist, pushing anonymously"
            );
            return Ok(store);
        }

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with(".."));

        for entry in walker {
            let entry = entry.map_err(|e| SnapshotError::CredentialLoad {
                path: e
                    .path()
                    .unwrap_or(root)
                    .display()
                    .to_string(),
                message: e.to_string(),
            })?;
            if entry.file_type().is_dir() {
                continue;
            }

            let auths = match entry.file_name().to_str() {
                Some(DOCKER_CONFIG_KEY) => parse_file::<AuthMap>(entry.path())?,
                Some(DOCKER_CONFIG_JSON_KEY) => parse_file::<DockerConfigJson>(entry.path())?.auths,
                _ => continue,
            };

            tracing::debug!(
                path = %entry.path().display(),
                registries = auths.len(),
                "Loaded credential file"
            );
            store.merge(entry.path(), auths)?;
        }

        tracing::info!(
            root = %root.display(),
            registries = ?store.registries(),
            credentials = store.len(),
            "Registry credentials loaded"
        );
        Ok(store)
    }

    fn merge(&mut self, path: &Path, auths: AuthMap) -> Result<()> {
        // Sort hosts so a single file merges deterministically
        let mut auths: Vec<(String, RegistryAuth)> = auths.into_iter().collect();
        auths.sort_by(|a, b| a.0.cmp(&b.0));

        for (registry, auth) in auths {
            let auth = auth.decode_auth().map_err(|message| SnapshotError::CredentialLoad {
                path: path.display().to_string(),
                message: format!("{}: {}", registry, message),
            })?;
            self.registries.entry(registry).or_default().push(auth);
        }
        Ok(())
    }

    /// Add one credential for a registry, after any already known.
    pub fn insert(&mut self, registry: impl Into<String>, auth: RegistryAuth) {
        self.registries.entry(registry.into()).or_default().push(auth);
    }

    /// Credentials for an exact registry host, in discovery order.
    pub fn credentials_for(&self, registry: &str) -> &[RegistryAuth] {
        self.registries
            .get(registry)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Registries with at least one credential, sorted.
    pub fn registries(&self) -> Vec<&str> {
        let mut registries: Vec<&str> = self.registries.keys().map(String::as_str).collect();
        registries.sort_unstable();
        registries
    }

    /// Total number of credentials across registries.
    pub fn len(&self) -> usize {
        self.registries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|e| SnapshotError::CredentialLoad {
        path: path.display().to_string(),
        message: format!("failed to read: {}", e),
    })?;
    serde_json::from_str(&data).map_err(|e| SnapshotError::CredentialLoad {
        path: path.display().to_string(),
        message: format!("failed to parse: {}", e),
    })
}
