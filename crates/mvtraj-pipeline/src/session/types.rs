//! Bookkeeping records stored alongside a session: identity, audit trail,
//! exports.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Identity and change counter of a session.
///
/// `revision` increases with every mutation made through the session API,
/// so two snapshots of the same run can be ordered without wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// [`ProblemType::name`](super::ProblemType::name) of the owning problem.
    pub problem_type: String,
    pub schema_version: u32,
    pub revision: u64,
    /// Unix seconds.
    pub created_at: u64,
    pub modified_at: u64,
    pub description: Option<String>,
}

impl SessionMetadata {
    pub fn new(problem_type: impl Into<String>, schema_version: u32) -> Self {
        let now = unix_seconds();
        Self {
            problem_type: problem_type.into(),
            schema_version,
            revision: 0,
            created_at: now,
            modified_at: now,
            description: None,
        }
    }

    /// Advance the revision and return it.
    pub fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.modified_at = unix_seconds();
        self.revision
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Failed,
}

/// One executed step of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Step name, e.g. `"register_camera"`.
    pub step: String,
    pub outcome: StepOutcome,
    /// Summary on success, error message on failure.
    pub detail: Option<String>,
    /// Session revision right after the step.
    pub revision: u64,
    pub at: u64,
}

impl LogEntry {
    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Completed
    }
}

/// A converted output, stamped with the revision it was taken from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord<E> {
    pub revision: u64,
    pub at: u64,
    pub value: E,
}

/// Seconds since the Unix epoch, `0` when the clock is earlier.
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_orders_changes() {
        let mut meta = SessionMetadata::new("trajectory_reconstruction", 2);
        assert_eq!(meta.revision, 0);
        assert_eq!(meta.bump(), 1);
        assert_eq!(meta.bump(), 2);
        assert!(meta.modified_at >= meta.created_at);
        assert_eq!(meta.schema_version, 2);
    }

    #[test]
    fn log_entries_serialize_their_outcome() {
        let entry = LogEntry {
            step: "register_camera".into(),
            outcome: StepOutcome::Failed,
            detail: Some("12 inliers".into()),
            revision: 7,
            at: 0,
        };
        assert!(!entry.is_success());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["outcome"], "failed");
        let back: LogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
