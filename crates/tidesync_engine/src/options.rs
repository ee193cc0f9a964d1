//! Conflict and field policy for sync jobs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Conflict policy applied when local and remote copies diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeMode {
    /// The client always wins.
    #[default]
    Overwrite,
    /// The server wins if its copy changed since the client last saw it.
    LeaveIfChanged,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::Overwrite => f.write_str("OVERWRITE"),
            MergeMode::LeaveIfChanged => f.write_str("LEAVE_IF_CHANGED"),
        }
    }
}

/// Immutable options of a sync job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fieldlist: Option<Vec<String>>,
    #[serde(default)]
    merge_mode: MergeMode,
}

impl SyncOptions {
    /// Creates options with the given merge mode and every field.
    pub fn new(merge_mode: MergeMode) -> Self {
        Self {
            fieldlist: None,
            merge_mode,
        }
    }

    /// Options where the client always wins.
    pub fn overwrite() -> Self {
        Self::new(MergeMode::Overwrite)
    }

    /// Options where server-side changes are left alone.
    pub fn leave_if_changed() -> Self {
        Self::new(MergeMode::LeaveIfChanged)
    }

    /// Restricts pushed records to the given fields.
    pub fn with_fieldlist<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fieldlist = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Fields to push, or `None` for all fields.
    pub fn fieldlist(&self) -> Option<&[String]> {
        self.fieldlist.as_deref()
    }

    /// The merge mode.
    pub fn merge_mode(&self) -> MergeMode {
        self.merge_mode
    }
}
