//! Schedule entries
//!
//! A [`ScheduleEntry`] is the passive record of one pending download:
//! an id, the owning peer, a priority within that peer, and whether the
//! transfer can resume after interruption. The scheduler holds the
//! canonical copy; observers receive clones.

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// Identifier of a schedule entry, unique within one scheduler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Validate and wrap an entry id: non-empty, printable, usable as a
    /// single path component
    pub fn new(id: impl Into<String>) -> SchedulerResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(SchedulerError::InvalidParameters(
                "entry id is empty".to_string(),
            ));
        }
        if id.contains('/') || id.contains('\\') {
            return Err(SchedulerError::InvalidParameters(format!(
                "entry id {:?} contains a path separator",
                id
            )));
        }
        if id.chars().any(|c| c.is_control()) {
            return Err(SchedulerError::InvalidParameters(format!(
                "entry id {:?} contains control characters",
                id
            )));
        }
        Ok(Self(id))
    }

    /// The raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pending download registered with the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Entry identifier
    pub id: EntryId,
    /// Id of the owning peer
    pub owner: String,
    /// Priority among this peer's own entries; higher is more important
    pub priority: u32,
    /// Whether the download can be paused and resumed without starting
    /// over
    pub resumable: bool,
}

impl ScheduleEntry {
    /// Create an entry with default priority and no resume support
    pub fn new(id: EntryId, owner: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            priority: 0,
            resumable: false,
        }
    }

    /// Set the per-peer priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the entry resumable
    pub fn with_resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_validation() {
        assert!(EntryId::new("update-42").is_ok());
        assert!(EntryId::new("").is_err());
        assert!(EntryId::new("a/b").is_err());
        assert!(EntryId::new("a\\b").is_err());
        assert!(EntryId::new("tab\there").is_err());
    }

    #[test]
    fn test_entry_builders() {
        let entry = ScheduleEntry::new(EntryId::new("e1").unwrap(), "org.example.app")
            .with_priority(5)
            .with_resumable(true);
        assert_eq!(entry.priority, 5);
        assert!(entry.resumable);
        assert_eq!(entry.owner, "org.example.app");
    }
}
