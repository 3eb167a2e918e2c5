//! Error types for shotlink-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::PipelineId;

/// An entity type name that the sync has no projection for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown entity type '{0}'")]
pub struct UnknownEntityKind(pub String);

/// Errors surfaced by a [`crate::tracking::TrackingSession`].
#[derive(Debug, Error)]
pub enum TrackingError {
    /// The tracker's schema has no such entity type.
    #[error("entity type '{entity_type}' does not exist in the tracking schema")]
    UnknownEntityType { entity_type: String },

    /// Update target missing or retired.
    #[error("{entity_type} <{id}> not found in the tracker")]
    NotFound { entity_type: String, id: i64 },

    /// Transport or server-side failure reported by the backend.
    #[error("tracking backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by a [`crate::pipeline::EntityHub`].
#[derive(Debug, Error)]
pub enum HubError {
    #[error("pipeline entity {0} not found")]
    NotFound(PipelineId),

    #[error("pipeline entity {0} already exists")]
    DuplicateId(PipelineId),

    /// Two siblings would share a name (names compare case-insensitively).
    #[error("duplicate name '{name}' under parent {parent}")]
    DuplicateName { parent: PipelineId, name: String },

    #[error("entity {parent} cannot hold a {child_kind}")]
    InvalidParent {
        parent: PipelineId,
        child_kind: &'static str,
    },

    #[error("status '{0}' is not defined on the project")]
    InvalidStatus(String),

    #[error("user '{0}' does not exist")]
    UnknownUser(String),

    #[error("entity {id} does not support {feature}")]
    Unsupported {
        id: PipelineId,
        feature: &'static str,
    },

    /// A subtree holding a hierarchy-immutable node or a version.
    #[error("entity {id} cannot be deleted, {protected} below it is protected")]
    Protected {
        id: PipelineId,
        protected: PipelineId,
    },

    #[error("commit failed: {0}")]
    Commit(String),
}

/// Errors loading the sync configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors reading or writing backend snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Parse error on load, with the offending file.
    #[error("failed to parse snapshot at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("snapshot not found at {path}")]
    NotFound { path: PathBuf },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("invalid snapshot at {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}
