//! Core types for declarative resource management

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status persisted on every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
}

impl Status {
    /// Whether the last apply of this record completed
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Updating => "updating",
            Self::Updated => "updated",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// The lifecycle event a handler is invoked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Create,
    Update,
    Delete,
}

impl Event {
    /// Status persisted while the handler runs
    pub fn in_progress_status(&self) -> Status {
        match self {
            Self::Create => Status::Creating,
            Self::Update => Status::Updating,
            Self::Delete => Status::Deleting,
        }
    }

    /// Status persisted once the handler returns successfully
    pub fn settled_status(&self) -> Status {
        match self {
            Self::Create => Status::Created,
            Self::Update => Status::Updated,
            Self::Delete => Status::Deleted,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Run phase, propagated from the root scope to every child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Apply declarations and destroy what is no longer declared
    #[default]
    Up,
    /// Return stored outputs without side effects
    Read,
    /// Tear everything down
    Destroy,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Up => "up",
            Self::Read => "read",
            Self::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// Snapshot of an instance superseded by `replace()` and awaiting deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacedInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
    /// Scratch data written by a failed attempt to delete this instance
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

/// Persisted state for one resource instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub kind: String,
    pub id: String,
    #[serde(rename = "fullyQualifiedName")]
    pub fqn: String,
    pub sequence: u64,
    pub status: Status,
    /// Opaque per-resource scratch map owned by the provider
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    /// Last applied input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_props: Option<Value>,
    /// Last successful output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<ReplacedInstance>,
}

impl ResourceRecord {
    /// A fresh record for a resource that has never been applied
    pub fn new(kind: &str, id: &str, fqn: &str, sequence: u64) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.to_string(),
            fqn: fqn.to_string(),
            sequence,
            status: Status::Creating,
            data: BTreeMap::new(),
            props: None,
            old_props: None,
            output: None,
            replace: None,
        }
    }
}

/// Result of reconciling or destroying one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Created,
    Updated,
    /// Inputs unchanged, handler not invoked
    Skipped,
    /// Read phase returned the stored output
    Read,
    Deleted,
    /// A superseded instance was deleted after its replacement settled
    Replaced,
    Failed { error: String },
}

impl Outcome {
    /// Check if the outcome represents a change
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated | Self::Deleted | Self::Replaced
        )
    }
}

/// Counts of outcomes for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub read: usize,
    pub deleted: usize,
    pub replaced: usize,
    pub failed: usize,
}

impl RunSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted + self.replaced
    }

    /// Check if the run was free of failures
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Add an outcome to the summary
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Read => self.read += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Replaced => self.replaced += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }
}
