//! Pipeline-database side: entities, the status table and the hub interface.
//!
//! The hub is a transactional staging area bound to one project. Entities are
//! addressed by [`PipelineId`]; mutations accumulate in memory until
//! [`EntityHub::commit_changes`] flushes them in one batch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;
use crate::types::{PipelineId, PipelineKind};
use crate::TRACKING_ID_ATTRIB;

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Attribute bag of a pipeline entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attribs(BTreeMap<String, Value>);

impl Attribs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for Attribs {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A node of the pipeline hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEntity {
    pub id: PipelineId,
    pub kind: PipelineKind,
    /// Folder type or task type; empty for the project.
    #[serde(default)]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<PipelineId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attribs: Attribs,
    /// Set when downstream data depends on this node's place in the tree.
    #[serde(default)]
    pub immutable_for_hierarchy: bool,
}

impl PipelineEntity {
    /// Tracking id stored on the node, normalized to its string form.
    pub fn tracking_id(&self) -> Option<String> {
        match self.attribs.get(TRACKING_ID_ATTRIB)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Nodes the sync must never delete: hierarchy-immutable ones and
    /// published versions.
    pub fn is_protected(&self) -> bool {
        self.immutable_for_hierarchy || self.kind == PipelineKind::Version
    }
}

/// Request for [`EntityHub::add_new_folder`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewFolder {
    pub folder_type: String,
    pub name: String,
    pub label: Option<String>,
    pub parent_id: PipelineId,
    /// Reuse a known id instead of generating one.
    pub entity_id: Option<PipelineId>,
    pub attribs: Attribs,
}

/// Request for [`EntityHub::add_new_task`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub task_type: String,
    pub name: String,
    pub label: Option<String>,
    pub parent_id: PipelineId,
    pub entity_id: Option<PipelineId>,
    pub attribs: Attribs,
}

// ---------------------------------------------------------------------------
// Status table
// ---------------------------------------------------------------------------

/// A status defined on the pipeline project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub name: String,
    pub short_name: String,
}

impl ProjectStatus {
    pub fn new(name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_name: short_name.into(),
        }
    }
}

/// Lookup between tracking short status codes and pipeline status names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTable {
    by_short: BTreeMap<String, String>,
    by_long: BTreeMap<String, String>,
}

impl StatusTable {
    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a ProjectStatus>) -> Self {
        let mut table = Self::default();
        for s in statuses {
            table
                .by_short
                .insert(s.short_name.to_lowercase(), s.name.clone());
            table
                .by_long
                .insert(s.name.to_lowercase(), s.short_name.clone());
        }
        table
    }

    /// Long name for a short code; codes compare case-insensitively.
    pub fn long_name(&self, short_name: &str) -> Option<&str> {
        self.by_short
            .get(&short_name.to_lowercase())
            .map(String::as_str)
    }

    /// Short code for a pipeline status name, as defined on the project.
    pub fn short_name(&self, long_name: &str) -> Option<&str> {
        self.by_long
            .get(&long_name.to_lowercase())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_short.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Transactional view of one pipeline project.
pub trait EntityHub {
    fn project_name(&self) -> &str;

    fn project_entity(&self) -> &PipelineEntity;

    /// Cached entity, if the hub already holds it.
    fn entity(&self, id: &PipelineId) -> Option<&PipelineEntity>;

    fn entity_mut(&mut self, id: &PipelineId) -> Option<&mut PipelineEntity>;

    /// Look up an entity, querying the backend if it is not cached yet.
    /// `kinds` restricts the match; an empty slice accepts any kind.
    fn get_or_query_entity_by_id(
        &mut self,
        id: &PipelineId,
        kinds: &[PipelineKind],
    ) -> Result<Option<PipelineId>, HubError>;

    /// Current children of `parent`, including uncommitted ones.
    fn children(&mut self, parent: &PipelineId) -> Result<Vec<PipelineId>, HubError>;

    fn add_new_folder(&mut self, folder: NewFolder) -> Result<PipelineId, HubError>;

    fn add_new_task(&mut self, task: NewTask) -> Result<PipelineId, HubError>;

    fn set_status(&mut self, id: &PipelineId, status: &str) -> Result<(), HubError>;

    fn set_assignees(&mut self, id: &PipelineId, assignees: Vec<String>) -> Result<(), HubError>;

    fn set_tags(&mut self, id: &PipelineId, tags: Vec<String>) -> Result<(), HubError>;

    /// Remove an entity and everything below it.
    ///
    /// Fails with [`HubError::Protected`] if the entity or any descendant is
    /// [protected](PipelineEntity::is_protected); nothing is removed then.
    fn delete_entity(&mut self, id: &PipelineId) -> Result<(), HubError>;

    /// Flush all pending mutations in one batch.
    fn commit_changes(&mut self) -> Result<(), HubError>;

    /// Drop every uncommitted mutation.
    fn discard_changes(&mut self);

    fn status_table(&self) -> StatusTable;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
