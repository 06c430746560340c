//! Image reference parsing and normalization.
//!
//! Parses snapshot targets like `ghcr.io/org/app:v1` into registry,
//! repository and tag, applying the Docker Hub defaults to short names.

use std::sync::OnceLock;

use container_snapshot_core::error::{Result, SnapshotError};
use regex::Regex;

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Maximum length of the full repository name, registry included.
const NAME_TOTAL_LENGTH_MAX: usize = 255;

fn path_component() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid path component regex")
    })
}

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("valid tag regex"))
}

fn domain_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)(?:\.(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?))*(?::[0-9]+)?$",
        )
        .expect("valid domain regex")
    })
}

/// Normalized snapshot target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, with port if any (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/app")
    pub repository: String,
    /// Tag (e.g., "latest", "v1")
    pub tag: String,
}

impl ImageReference {
    /// Parse and normalize a snapshot target.
    ///
    /// Supports formats:
    /// - `app` → docker.io/library/app:latest
    /// - `user/app:v1` → docker.io/user/app:v1
    /// - `ghcr.io/org/app` → ghcr.io/org/app:latest
    /// - `localhost:5000/app:dev` → localhost:5000/app:dev
    ///
    /// Digest references are rejected: a commit produces a tag.
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid(reference, "empty image reference"));
        }
        if trimmed.contains('@') {
            return Err(invalid(
                reference,
                "digest references cannot be a snapshot target",
            ));
        }

        // Tag separator is the last colon after the last slash
        let last_slash = trimmed.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match trimmed[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                (&trimmed[..split], Some(&trimmed[split + 1..]))
            }
            None => (trimmed, None),
        };

        let tag = match tag {
            Some(tag) if tag_pattern().is_match(tag) => tag.to_string(),
            Some(tag) => return Err(invalid(reference, &format!("invalid tag '{}'", tag))),
            None => DEFAULT_TAG.to_string(),
        };

        let (registry, repository) = split_registry_repository(name);
        if !domain_pattern().is_match(&registry) {
            return Err(invalid(reference, &format!("invalid registry '{}'", registry)));
        }
        if let Some(bad) = repository
            .split('/')
            .find(|component| !path_component().is_match(component))
        {
            return Err(invalid(
                reference,
                &format!("invalid repository component '{}'", bad),
            ));
        }
        if registry.len() + 1 + repository.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(invalid(reference, "repository name too long"));
        }

        Ok(ImageReference {
            registry,
            repository,
            tag,
        })
    }

    /// Repository including the registry, without tag.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str) -> (String, String) {
    // The first component is a registry when it looks like a hostname
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first.to_string(), rest.to_string());
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };

    (DEFAULT_REGISTRY.to_string(), repository)
}

fn invalid(image: &str, reason: &str) -> SnapshotError {
    SnapshotError::InvalidImage {
        image: image.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_user_repo_with_tag() {
        let r = ImageReference::parse("myuser/myimage:v1.0").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "myuser/myimage");
        assert_eq!(r.tag, "v1.0");
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("ghcr.io/org/trainer:ckpt-7").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/trainer");
        assert_eq!(r.tag, "ckpt-7");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("registry.local:5000/team/app").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_localhost_registry() {
        let r = ImageReference::parse("localhost/myimage:test").unwrap();
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "myimage");
    }

    #[test]
    fn test_parse_deep_repository_path() {
        let r = ImageReference::parse("ghcr.io/org/sub/image:v1").unwrap();
        assert_eq!(r.repository, "org/sub/image");
    }

    #[test]
    fn test_parse_whitespace_trimmed() {
        let r = ImageReference::parse("  nginx:1.25  ").unwrap();
        assert_eq!(r.full_reference(), "docker.io/library/nginx:1.25");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "invalid image",
            "UPPER/case",
            "app:",
            "app:-tag",
            "org//app",
            "ghcr.io/",
            "nginx@sha256:abcdef",
            "-leading/dash",
        ] {
            let err = ImageReference::parse(bad).unwrap_err();
            assert!(
                matches!(err, SnapshotError::InvalidImage { .. }),
                "expected InvalidImage for {:?}, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_parse_rejects_long_name() {
        let long = format!("ghcr.io/{}", "a".repeat(300));
        assert!(ImageReference::parse(&long).is_err());
    }

    #[test]
    fn test_name_and_display() {
        let r = ImageReference::parse("quay.io/org/app:v2").unwrap();
        assert_eq!(r.name(), "quay.io/org/app");
        assert_eq!(format!("{}", r), "quay.io/org/app:v2");
    }
}
