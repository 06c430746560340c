//! Status conditions attached to a snapshot.
//!
//! A condition explains why a snapshot is in its current state. The set is
//! ordered by first insertion and holds at most one entry per type; all
//! mutation goes through [`Conditions::upsert`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition categories a snapshot can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    SourcePodNotFound,
    SourceContainerNotFound,
    SourcePodNotReady,
    DockerCommitFailed,
    DockerPushFailed,
    InvalidImage,
}

impl ConditionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::SourcePodNotFound => "SourcePodNotFound",
            ConditionType::SourceContainerNotFound => "SourceContainerNotFound",
            ConditionType::SourcePodNotReady => "SourcePodNotReady",
            ConditionType::DockerCommitFailed => "DockerCommitFailed",
            ConditionType::DockerPushFailed => "DockerPushFailed",
            ConditionType::InvalidImage => "InvalidImage",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observation about a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<DateTime<Utc>>,
    pub last_transition_time: DateTime<Utc>,
}

/// Ordered set of conditions keyed by type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Condition>", into = "Vec<Condition>")]
pub struct Conditions {
    entries: Vec<Condition>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a condition, returning whether anything changed.
    ///
    /// A new type is appended. For an existing type, a status change
    /// overwrites the entry and moves `last_transition_time` to `now`; a
    /// message change with the same status updates the message and probe time
    /// only; an identical condition is left untouched.
    pub fn upsert(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let message = message.into();

        let Some(existing) = self
            .entries
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        else {
            self.entries.push(Condition {
                condition_type,
                status,
                message,
                last_probe_time: Some(now),
                last_transition_time: now,
            });
            return true;
        };

        if existing.status != status {
            existing.status = status;
            existing.message = message;
            existing.last_probe_time = Some(now);
            existing.last_transition_time = now;
            return true;
        }

        if existing.message != message {
            existing.message = message;
            existing.last_probe_time = Some(now);
            return true;
        }

        false
    }

    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.entries
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// True when the condition is present with status `True`.
    pub fn is_true(&self, condition_type: ConditionType) -> bool {
        self.get(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<Condition>> for Conditions {
    // Later duplicates replace earlier ones in place.
    fn from(list: Vec<Condition>) -> Self {
        let mut entries: Vec<Condition> = Vec::with_capacity(list.len());
        for condition in list {
            match entries
                .iter_mut()
                .find(|c| c.condition_type == condition.condition_type)
            {
                Some(slot) => *slot = condition,
                None => entries.push(condition),
            }
        }
        Self { entries }
    }
}

impl From<Conditions> for Vec<Condition> {
    fn from(conditions: Conditions) -> Self {
        conditions.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_upsert_appends_new_type() {
        let mut conditions = Conditions::new();
        assert!(conditions.upsert(
            ConditionType::SourcePodNotFound,
            ConditionStatus::True,
            "pod web-0 not found",
            t0(),
        ));
        assert_eq!(conditions.len(), 1);

        let c = conditions.get(ConditionType::SourcePodNotFound).unwrap();
        assert_eq!(c.status, ConditionStatus::True);
        assert_eq!(c.message, "pod web-0 not found");
        assert_eq!(c.last_transition_time, t0());
    }

    #[test]
    fn test_upsert_same_condition_is_noop() {
        let mut conditions = Conditions::new();
        conditions.upsert(
            ConditionType::DockerPushFailed,
            ConditionStatus::True,
            "denied",
            t0(),
        );
        let later = t0() + Duration::minutes(5);
        assert!(!conditions.upsert(
            ConditionType::DockerPushFailed,
            ConditionStatus::True,
            "denied",
            later,
        ));

        let c = conditions.get(ConditionType::DockerPushFailed).unwrap();
        assert_eq!(c.last_transition_time, t0());
        assert_eq!(c.last_probe_time, Some(t0()));
    }

    #[test]
    fn test_upsert_status_change_bumps_transition() {
        let mut conditions = Conditions::new();
        conditions.upsert(
            ConditionType::SourcePodNotReady,
            ConditionStatus::True,
            "Pending",
            t0(),
        );
        let later = t0() + Duration::seconds(30);
        assert!(conditions.upsert(
            ConditionType::SourcePodNotReady,
            ConditionStatus::False,
            "",
            later,
        ));

        let c = conditions.get(ConditionType::SourcePodNotReady).unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.last_transition_time, later);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_upsert_message_change_keeps_transition() {
        let mut conditions = Conditions::new();
        conditions.upsert(
            ConditionType::DockerCommitFailed,
            ConditionStatus::True,
            "first",
            t0(),
        );
        let later = t0() + Duration::seconds(10);
        assert!(conditions.upsert(
            ConditionType::DockerCommitFailed,
            ConditionStatus::True,
            "second",
            later,
        ));

        let c = conditions.get(ConditionType::DockerCommitFailed).unwrap();
        assert_eq!(c.message, "second");
        assert_eq!(c.last_transition_time, t0());
        assert_eq!(c.last_probe_time, Some(later));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut conditions = Conditions::new();
        conditions.upsert(ConditionType::InvalidImage, ConditionStatus::True, "", t0());
        conditions.upsert(ConditionType::DockerPushFailed, ConditionStatus::True, "", t0());
        conditions.upsert(ConditionType::InvalidImage, ConditionStatus::False, "", t0());

        let order: Vec<ConditionType> = conditions.iter().map(|c| c.condition_type).collect();
        assert_eq!(
            order,
            vec![ConditionType::InvalidImage, ConditionType::DockerPushFailed]
        );
    }

    #[test]
    fn test_is_true() {
        let mut conditions = Conditions::new();
        conditions.upsert(ConditionType::InvalidImage, ConditionStatus::True, "", t0());
        assert!(conditions.is_true(ConditionType::InvalidImage));
        assert!(!conditions.is_true(ConditionType::DockerPushFailed));

        conditions.upsert(ConditionType::InvalidImage, ConditionStatus::False, "", t0());
        assert!(!conditions.is_true(ConditionType::InvalidImage));
    }

    #[test]
    fn test_deserialize_deduplicates_by_type() {
        let json = r#"[
            {"type": "DockerPushFailed", "status": "True", "message": "old", "lastTransitionTime": "2026-03-01T10:00:00Z"},
            {"type": "InvalidImage", "status": "True", "lastTransitionTime": "2026-03-01T10:00:00Z"},
            {"type": "DockerPushFailed", "status": "False", "message": "new", "lastTransitionTime": "2026-03-01T11:00:00Z"}
        ]"#;
        let conditions: Conditions = serde_json::from_str(json).unwrap();
        assert_eq!(conditions.len(), 2);

        let push = conditions.get(ConditionType::DockerPushFailed).unwrap();
        assert_eq!(push.status, ConditionStatus::False);
        assert_eq!(push.message, "new");
    }

    #[test]
    fn test_serialize_uses_type_key() {
        let mut conditions = Conditions::new();
        conditions.upsert(
            ConditionType::SourceContainerNotFound,
            ConditionStatus::True,
            "sidecar",
            t0(),
        );
        let json = serde_json::to_string(&conditions).unwrap();
        assert!(json.contains("\"type\":\"SourceContainerNotFound\""));
        assert!(json.contains("\"lastTransitionTime\""));
    }
}
