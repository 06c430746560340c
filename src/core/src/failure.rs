//! Worker failure categories and the exit codes that carry them.
//!
//! The worker has no channel back to the controller other than its own
//! termination record, so every terminal failure maps to a distinct exit
//! code, a termination reason, and the condition the controller records.

use serde::{Deserialize, Serialize};

use crate::condition::ConditionType;

/// Exit code for a malformed target image reference.
pub const EXIT_INVALID_IMAGE: i32 = 100;

/// Exit code for a rejected container commit.
pub const EXIT_COMMIT_FAILED: i32 = 101;

/// Exit code for a push that failed with every credential.
pub const EXIT_PUSH_FAILED: i32 = 102;

/// Exit code for any other snapshot failure, including deadline expiry.
pub const EXIT_UNCLASSIFIED: i32 = 127;

/// Exit code for invalid arguments or setup failures before the snapshot starts.
pub const EXIT_SETUP_FAILED: i32 = 1;

/// Classified worker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    InvalidImage,
    CommitFailed,
    PushFailed,
}

impl FailureKind {
    /// All failure kinds, in exit code order.
    pub const ALL: [FailureKind; 3] = [
        FailureKind::InvalidImage,
        FailureKind::CommitFailed,
        FailureKind::PushFailed,
    ];

    /// Process exit code the worker terminates with.
    pub fn exit_code(self) -> i32 {
        match self {
            FailureKind::InvalidImage => EXIT_INVALID_IMAGE,
            FailureKind::CommitFailed => EXIT_COMMIT_FAILED,
            FailureKind::PushFailed => EXIT_PUSH_FAILED,
        }
    }

    /// Termination reason string as reported on the job.
    pub fn reason(self) -> &'static str {
        self.condition_type().as_str()
    }

    /// Condition recorded on the snapshot for this failure.
    pub fn condition_type(self) -> ConditionType {
        match self {
            FailureKind::InvalidImage => ConditionType::InvalidImage,
            FailureKind::CommitFailed => ConditionType::DockerCommitFailed,
            FailureKind::PushFailed => ConditionType::DockerPushFailed,
        }
    }

    pub fn from_exit_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.exit_code() == code)
    }

    pub fn from_reason(reason: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.reason() == reason)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes: Vec<i32> = FailureKind::ALL.iter().map(|k| k.exit_code()).collect();
        assert_eq!(codes, vec![100, 101, 102]);
        assert!(!codes.contains(&EXIT_UNCLASSIFIED));
        assert!(!codes.contains(&EXIT_SETUP_FAILED));
    }

    #[test]
    fn test_reason_round_trip() {
        assert_eq!(
            FailureKind::from_reason("DockerCommitFailed"),
            Some(FailureKind::CommitFailed)
        );
        assert_eq!(
            FailureKind::from_reason("InvalidImage"),
            Some(FailureKind::InvalidImage)
        );
        assert_eq!(FailureKind::from_reason("Error"), None);
    }

    #[test]
    fn test_from_exit_code() {
        assert_eq!(FailureKind::from_exit_code(102), Some(FailureKind::PushFailed));
        assert_eq!(FailureKind::from_exit_code(127), None);
        assert_eq!(FailureKind::from_exit_code(0), None);
    }

    #[test]
    fn test_condition_type() {
        assert_eq!(
            FailureKind::PushFailed.condition_type(),
            ConditionType::DockerPushFailed
        );
    }
}
