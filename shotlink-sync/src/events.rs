//! Change descriptors accepted by the entry points.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use shotlink_core::{PipelineId, PipelineKind, TrackingRef};

use crate::SyncError;

/// Prefix of tracking event-log type names.
const EVENT_PREFIX: &str = "Shotgun_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeAction {
    New,
    Change,
    Retirement,
    Revival,
}

impl ChangeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeAction::New => "New",
            ChangeAction::Change => "Change",
            ChangeAction::Retirement => "Retirement",
            ChangeAction::Revival => "Revival",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(ChangeAction::New),
            "Change" => Ok(ChangeAction::Change),
            "Retirement" => Ok(ChangeAction::Retirement),
            "Revival" => Ok(ChangeAction::Revival),
            other => Err(SyncError::UnknownEventType(other.to_owned())),
        }
    }
}

/// Split `Shotgun_<Type>_<Action>` into entity type and action.
pub fn parse_event_type(event_type: &str) -> Result<(String, ChangeAction), SyncError> {
    let unknown = || SyncError::UnknownEventType(event_type.to_owned());
    let rest = event_type.strip_prefix(EVENT_PREFIX).ok_or_else(unknown)?;
    let (entity_type, action) = rest.rsplit_once('_').ok_or_else(unknown)?;
    if entity_type.is_empty() {
        return Err(unknown());
    }
    let action = action.parse().map_err(|_| unknown())?;
    Ok((entity_type.to_owned(), action))
}

/// A single-entity change notification, already decoded from the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub entity_type: String,
    pub entity_id: i64,
    pub project_name: String,
    pub project_code: String,
    /// Field that changed, for `Change` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
}

impl ChangeEvent {
    /// Build from an event-log type name such as `Shotgun_Shot_Change`.
    pub fn from_event_type(
        event_type: &str,
        entity_id: i64,
        project_name: impl Into<String>,
        project_code: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let (entity_type, action) = parse_event_type(event_type)?;
        Ok(Self {
            action,
            entity_type,
            entity_id,
            project_name: project_name.into(),
            project_code: project_code.into(),
            attribute_name: None,
        })
    }

    pub fn with_attribute(mut self, attribute_name: impl Into<String>) -> Self {
        self.attribute_name = Some(attribute_name.into());
        self
    }

    pub fn target(&self) -> TrackingRef {
        TrackingRef::new(self.entity_type.clone(), self.entity_id)
    }

    /// Reject events that do not name an entity.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.entity_type.is_empty() || self.entity_id <= 0 {
            return Err(SyncError::EmptyPayload(format!(
                "{} {} <{}>",
                self.action, self.entity_type, self.entity_id
            )));
        }
        Ok(())
    }
}

/// Side whose hierarchy a full-project pass mirrors onto the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    #[default]
    Tracking,
    Pipeline,
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncSource::Tracking => write!(f, "tracking"),
            SyncSource::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Request for a full-project pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSyncRequest {
    pub project_name: String,
    pub project_code: String,
    #[serde(default)]
    pub source: SyncSource,
}

impl ProjectSyncRequest {
    pub fn new(project_name: impl Into<String>, project_code: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            project_code: project_code.into(),
            source: SyncSource::default(),
        }
    }

    pub fn with_source(mut self, source: SyncSource) -> Self {
        self.source = source;
        self
    }
}

// ---------------------------------------------------------------------------
// Pipeline-side changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for PipelineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineAction::Create => write!(f, "create"),
            PipelineAction::Update => write!(f, "update"),
            PipelineAction::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for PipelineAction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(PipelineAction::Create),
            "update" => Ok(PipelineAction::Update),
            "delete" => Ok(PipelineAction::Delete),
            other => Err(SyncError::UnknownTopic(other.to_owned())),
        }
    }
}

/// Split `entity.<folder|task>.<verb>` into node kind and action.
///
/// `created` creates, `deleted` deletes; `renamed`, `attrib_changed`,
/// `status_changed` and `tags_changed` update.
pub fn parse_pipeline_topic(topic: &str) -> Result<(PipelineKind, PipelineAction), SyncError> {
    let unknown = || SyncError::UnknownTopic(topic.to_owned());
    let mut parts = topic.split('.');
    let (Some("entity"), Some(kind), Some(verb), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(unknown());
    };
    let kind = match kind {
        "folder" => PipelineKind::Folder,
        "task" => PipelineKind::Task,
        _ => return Err(unknown()),
    };
    let action = match verb {
        "created" => PipelineAction::Create,
        "deleted" => PipelineAction::Delete,
        "renamed" | "attrib_changed" | "status_changed" | "tags_changed" => PipelineAction::Update,
        _ => return Err(unknown()),
    };
    Ok((kind, action))
}

/// A single pipeline node change, to be mirrored into tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineChange {
    pub action: PipelineAction,
    pub pipeline_id: PipelineId,
    pub project_name: String,
    pub project_code: String,
    /// Tracking identity the node carried. Deletions need it because the
    /// node itself is gone by the time the change is handled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingRef>,
}

impl PipelineChange {
    pub fn new(
        action: PipelineAction,
        pipeline_id: impl Into<PipelineId>,
        project_name: impl Into<String>,
        project_code: impl Into<String>,
    ) -> Self {
        Self {
            action,
            pipeline_id: pipeline_id.into(),
            project_name: project_name.into(),
            project_code: project_code.into(),
            tracking: None,
        }
    }

    /// Build from an event topic such as `entity.folder.renamed`.
    pub fn from_topic(
        topic: &str,
        pipeline_id: impl Into<PipelineId>,
        project_name: impl Into<String>,
        project_code: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let (_, action) = parse_pipeline_topic(topic)?;
        Ok(Self::new(action, pipeline_id, project_name, project_code))
    }

    pub fn with_tracking(mut self, tracking: TrackingRef) -> Self {
        self.tracking = Some(tracking);
        self
    }

    /// Reject changes that do not name a node.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.pipeline_id.as_str().is_empty() {
            return Err(SyncError::EmptyPayload(format!(
                "pipeline {} without an entity id",
                self.action
            )));
        }
        Ok(())
    }
}
