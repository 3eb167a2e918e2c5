//! Domain types shared by the tracking side and the pipeline side.
//!
//! Identifiers on each side get their own newtype so a tracking id can never
//! be handed to the pipeline hub by accident.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::UnknownEntityKind;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a node in the pipeline database (32 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub String);

impl PipelineId {
    /// Fresh random id in the pipeline's canonical hex form.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PipelineId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PipelineId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A record in the production tracker: entity type name plus numeric id.
///
/// The type is kept as a string because links may point at types the sync
/// never projects (users, steps, tags).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackingRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: i64,
}

impl TrackingRef {
    pub fn new(entity_type: impl Into<String>, id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }

    /// The link form used in tracking filters and link fields.
    pub fn to_link(&self) -> Value {
        json!({ "type": self.entity_type, "id": self.id })
    }
}

impl fmt::Display for TrackingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.entity_type, self.id)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Tracking entity types the sync knows how to project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Project,
    Episode,
    Sequence,
    Scene,
    Shot,
    Asset,
    AssetCategory,
    Task,
    Version,
}

impl EntityKind {
    /// Enabled when the configuration does not say otherwise.
    pub const DEFAULT_ENABLED: [EntityKind; 7] = [
        EntityKind::Project,
        EntityKind::Episode,
        EntityKind::Sequence,
        EntityKind::Shot,
        EntityKind::Asset,
        EntityKind::Task,
        EntityKind::Version,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Project => "Project",
            EntityKind::Episode => "Episode",
            EntityKind::Sequence => "Sequence",
            EntityKind::Scene => "Scene",
            EntityKind::Shot => "Shot",
            EntityKind::Asset => "Asset",
            EntityKind::AssetCategory => "AssetCategory",
            EntityKind::Task => "Task",
            EntityKind::Version => "Version",
        }
    }

    /// Kinds that become folders on the pipeline side.
    pub fn is_folder_like(self) -> bool {
        matches!(
            self,
            EntityKind::Episode
                | EntityKind::Sequence
                | EntityKind::Scene
                | EntityKind::Shot
                | EntityKind::Asset
                | EntityKind::AssetCategory
        )
    }

    /// Tracking field holding the display name of a record of this kind.
    pub fn name_field(self) -> &'static str {
        match self {
            EntityKind::Project => "name",
            EntityKind::Task => "content",
            _ => "code",
        }
    }

    pub fn pipeline_kind(self) -> PipelineKind {
        match self {
            EntityKind::Project => PipelineKind::Project,
            EntityKind::Task => PipelineKind::Task,
            EntityKind::Version => PipelineKind::Version,
            _ => PipelineKind::Folder,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Project" => Ok(EntityKind::Project),
            "Episode" => Ok(EntityKind::Episode),
            "Sequence" => Ok(EntityKind::Sequence),
            "Scene" => Ok(EntityKind::Scene),
            "Shot" => Ok(EntityKind::Shot),
            "Asset" => Ok(EntityKind::Asset),
            "AssetCategory" => Ok(EntityKind::AssetCategory),
            "Task" => Ok(EntityKind::Task),
            "Version" => Ok(EntityKind::Version),
            other => Err(UnknownEntityKind(other.to_owned())),
        }
    }
}

/// Outcome of the last reconciliation, persisted on the tracking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SyncStatus {
    #[default]
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Synced => "Synced",
            SyncStatus::Failed => "Failed",
        }
    }

    /// Parse the value stored on a tracking record; unknown values are `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Synced" => Some(SyncStatus::Synced),
            "Failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node kinds in the pipeline database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Project,
    Folder,
    Task,
    Version,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Project => write!(f, "project"),
            PipelineKind::Folder => write!(f, "folder"),
            PipelineKind::Task => write!(f, "task"),
            PipelineKind::Version => write!(f, "version"),
        }
    }
}

// ---------------------------------------------------------------------------
// Name normalization
// ---------------------------------------------------------------------------

/// Normalize a display name into a pipeline node name.
///
/// Keeps ASCII alphanumerics, `_`, `-` and `.`; every other run of characters
/// collapses into a single `_`. Leading and trailing separators are dropped.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    out.trim_matches('_').to_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
