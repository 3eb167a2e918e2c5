//! In-memory [`EntityHub`] with a working set and a persisted set.
//!
//! Mutations land in the working set. `commit_changes` validates the whole
//! working set and, only if it is consistent, copies it over the persisted
//! set. A failed commit leaves the working set ahead of the persisted one.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::pipeline::{
    Attribs, EntityHub, NewFolder, NewTask, PipelineEntity, ProjectStatus, StatusTable,
};
use crate::types::{PipelineId, PipelineKind};

/// Serializable state of a [`MemoryHub`] (persisted set only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSnapshot {
    pub project_name: String,
    pub project_id: PipelineId,
    #[serde(default)]
    pub statuses: Vec<ProjectStatus>,
    #[serde(default)]
    pub users: BTreeSet<String>,
    #[serde(default)]
    pub entities: Vec<PipelineEntity>,
}

#[derive(Debug, Clone)]
pub struct MemoryHub {
    project_name: String,
    project_id: PipelineId,
    statuses: Vec<ProjectStatus>,
    /// Known users; empty accepts anyone.
    users: BTreeSet<String>,
    working: BTreeMap<PipelineId, PipelineEntity>,
    persisted: BTreeMap<PipelineId, PipelineEntity>,
    created: usize,
    commits: usize,
    fail_next_commit: Option<String>,
}

impl MemoryHub {
    /// Empty project with a freshly generated project id.
    pub fn new(project_name: impl Into<String>) -> Self {
        let project_name = project_name.into();
        let project_id = PipelineId::generate();
        let project = PipelineEntity {
            id: project_id.clone(),
            kind: PipelineKind::Project,
            entity_type: String::new(),
            parent_id: None,
            name: project_name.clone(),
            label: None,
            status: None,
            assignees: vec![],
            tags: vec![],
            attribs: Attribs::new(),
            immutable_for_hierarchy: false,
        };
        let mut working = BTreeMap::new();
        working.insert(project_id.clone(), project);
        Self {
            project_name,
            project_id,
            statuses: vec![],
            users: BTreeSet::new(),
            persisted: working.clone(),
            working,
            created: 0,
            commits: 0,
            fail_next_commit: None,
        }
    }

    pub fn with_statuses(mut self, statuses: Vec<ProjectStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = users.into_iter().map(Into::into).collect();
        self
    }

    /// Rebuild from a snapshot; the working set starts equal to the persisted set.
    pub fn from_snapshot(snapshot: HubSnapshot) -> Result<Self, HubError> {
        let persisted: BTreeMap<PipelineId, PipelineEntity> = snapshot
            .entities
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        if !persisted.contains_key(&snapshot.project_id) {
            return Err(HubError::NotFound(snapshot.project_id));
        }
        Ok(Self {
            project_name: snapshot.project_name,
            project_id: snapshot.project_id,
            statuses: snapshot.statuses,
            users: snapshot.users,
            working: persisted.clone(),
            persisted,
            created: 0,
            commits: 0,
            fail_next_commit: None,
        })
    }

    /// Snapshot of the persisted set; uncommitted work is not included.
    pub fn to_snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            project_name: self.project_name.clone(),
            project_id: self.project_id.clone(),
            statuses: self.statuses.clone(),
            users: self.users.clone(),
            entities: self.persisted.values().cloned().collect(),
        }
    }

    /// Working-set entities, including uncommitted ones.
    pub fn entities(&self) -> impl Iterator<Item = &PipelineEntity> {
        self.working.values()
    }

    pub fn persisted(&self, id: &PipelineId) -> Option<&PipelineEntity> {
        self.persisted.get(id)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.working != self.persisted
    }

    /// Number of nodes created through `add_new_*` since construction.
    pub fn created_count(&self) -> usize {
        self.created
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Make the next `commit_changes` fail with `message`.
    pub fn fail_next_commit(&mut self, message: impl Into<String>) {
        self.fail_next_commit = Some(message.into());
    }

    pub fn set_immutable(&mut self, id: &PipelineId, immutable: bool) -> Result<(), HubError> {
        let entity = self
            .working
            .get_mut(id)
            .ok_or_else(|| HubError::NotFound(id.clone()))?;
        entity.immutable_for_hierarchy = immutable;
        Ok(())
    }

    /// Add a published version under a folder or task.
    ///
    /// Versions come from publishing in the pipeline, never from the sync,
    /// so this lives outside the [`EntityHub`] interface.
    pub fn add_version(
        &mut self,
        parent_id: &PipelineId,
        name: impl Into<String>,
        attribs: Attribs,
    ) -> Result<PipelineId, HubError> {
        self.require_parent(parent_id, PipelineKind::Version)?;
        let id = PipelineId::generate();
        self.working.insert(
            id.clone(),
            PipelineEntity {
                id: id.clone(),
                kind: PipelineKind::Version,
                entity_type: "version".to_owned(),
                parent_id: Some(parent_id.clone()),
                name: name.into(),
                label: None,
                status: None,
                assignees: vec![],
                tags: vec![],
                attribs,
                immutable_for_hierarchy: false,
            },
        );
        Ok(id)
    }

    fn require_parent(&self, parent_id: &PipelineId, child: PipelineKind) -> Result<(), HubError> {
        let parent = self
            .working
            .get(parent_id)
            .ok_or_else(|| HubError::NotFound(parent_id.clone()))?;
        let allowed = match child {
            PipelineKind::Folder => {
                matches!(parent.kind, PipelineKind::Project | PipelineKind::Folder)
            }
            PipelineKind::Task => parent.kind == PipelineKind::Folder,
            PipelineKind::Version => {
                matches!(parent.kind, PipelineKind::Folder | PipelineKind::Task)
            }
            PipelineKind::Project => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(HubError::InvalidParent {
                parent: parent_id.clone(),
                child_kind: kind_name(child),
            })
        }
    }

    fn insert_new(&mut self, entity: PipelineEntity) -> Result<PipelineId, HubError> {
        if self.working.contains_key(&entity.id) {
            return Err(HubError::DuplicateId(entity.id));
        }
        let id = entity.id.clone();
        self.working.insert(id.clone(), entity);
        self.created += 1;
        Ok(id)
    }

    fn validate(&self) -> Result<(), HubError> {
        let mut seen: HashSet<(PipelineId, bool, String)> = HashSet::new();
        for entity in self.working.values() {
            let Some(parent) = &entity.parent_id else {
                continue;
            };
            if !self.working.contains_key(parent) {
                return Err(HubError::NotFound(parent.clone()));
            }
            let key = (
                parent.clone(),
                entity.kind == PipelineKind::Task,
                entity.name.to_lowercase(),
            );
            if !seen.insert(key) {
                return Err(HubError::DuplicateName {
                    parent: parent.clone(),
                    name: entity.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn working_mut(&mut self, id: &PipelineId) -> Result<&mut PipelineEntity, HubError> {
        self.working
            .get_mut(id)
            .ok_or_else(|| HubError::NotFound(id.clone()))
    }
}

fn kind_name(kind: PipelineKind) -> &'static str {
    match kind {
        PipelineKind::Project => "project",
        PipelineKind::Folder => "folder",
        PipelineKind::Task => "task",
        PipelineKind::Version => "version",
    }
}

impl EntityHub for MemoryHub {
    fn project_name(&self) -> &str {
        &self.project_name
    }

    fn project_entity(&self) -> &PipelineEntity {
        // The project entity cannot be deleted, so it is always present.
        &self.working[&self.project_id]
    }

    fn entity(&self, id: &PipelineId) -> Option<&PipelineEntity> {
        self.working.get(id)
    }

    fn entity_mut(&mut self, id: &PipelineId) -> Option<&mut PipelineEntity> {
        self.working.get_mut(id)
    }

    fn get_or_query_entity_by_id(
        &mut self,
        id: &PipelineId,
        kinds: &[PipelineKind],
    ) -> Result<Option<PipelineId>, HubError> {
        Ok(self
            .working
            .get(id)
            .filter(|e| kinds.is_empty() || kinds.contains(&e.kind))
            .map(|e| e.id.clone()))
    }

    fn children(&mut self, parent: &PipelineId) -> Result<Vec<PipelineId>, HubError> {
        if !self.working.contains_key(parent) {
            return Err(HubError::NotFound(parent.clone()));
        }
        let mut children: Vec<&PipelineEntity> = self
            .working
            .values()
            .filter(|e| e.parent_id.as_ref() == Some(parent))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children.into_iter().map(|e| e.id.clone()).collect())
    }

    fn add_new_folder(&mut self, folder: NewFolder) -> Result<PipelineId, HubError> {
        self.require_parent(&folder.parent_id, PipelineKind::Folder)?;
        self.insert_new(PipelineEntity {
            id: folder.entity_id.unwrap_or_else(PipelineId::generate),
            kind: PipelineKind::Folder,
            entity_type: folder.folder_type,
            parent_id: Some(folder.parent_id),
            name: folder.name,
            label: folder.label,
            status: None,
            assignees: vec![],
            tags: vec![],
            attribs: folder.attribs,
            immutable_for_hierarchy: false,
        })
    }

    fn add_new_task(&mut self, task: NewTask) -> Result<PipelineId, HubError> {
        self.require_parent(&task.parent_id, PipelineKind::Task)?;
        self.insert_new(PipelineEntity {
            id: task.entity_id.unwrap_or_else(PipelineId::generate),
            kind: PipelineKind::Task,
            entity_type: task.task_type,
            parent_id: Some(task.parent_id),
            name: task.name,
            label: task.label,
            status: None,
            assignees: vec![],
            tags: vec![],
            attribs: task.attribs,
            immutable_for_hierarchy: false,
        })
    }

    fn set_status(&mut self, id: &PipelineId, status: &str) -> Result<(), HubError> {
        if !self.statuses.is_empty() && !self.statuses.iter().any(|s| s.name == status) {
            return Err(HubError::InvalidStatus(status.to_owned()));
        }
        self.working_mut(id)?.status = Some(status.to_owned());
        Ok(())
    }

    fn set_assignees(&mut self, id: &PipelineId, assignees: Vec<String>) -> Result<(), HubError> {
        if let Some(unknown) = assignees
            .iter()
            .find(|u| !self.users.is_empty() && !self.users.contains(*u))
        {
            return Err(HubError::UnknownUser(unknown.clone()));
        }
        let entity = self.working_mut(id)?;
        if entity.kind != PipelineKind::Task {
            return Err(HubError::Unsupported {
                id: id.clone(),
                feature: "assignees",
            });
        }
        entity.assignees = assignees;
        Ok(())
    }

    fn set_tags(&mut self, id: &PipelineId, tags: Vec<String>) -> Result<(), HubError> {
        self.working_mut(id)?.tags = tags;
        Ok(())
    }

    fn delete_entity(&mut self, id: &PipelineId) -> Result<(), HubError> {
        if *id == self.project_id {
            return Err(HubError::Unsupported {
                id: id.clone(),
                feature: "deletion",
            });
        }
        if !self.working.contains_key(id) {
            return Err(HubError::NotFound(id.clone()));
        }
        let mut doomed = vec![id.clone()];
        let mut i = 0;
        while i < doomed.len() {
            let current = doomed[i].clone();
            doomed.extend(
                self.working
                    .values()
                    .filter(|e| e.parent_id.as_ref() == Some(&current))
                    .map(|e| e.id.clone()),
            );
            i += 1;
        }
        if let Some(protected) = doomed
            .iter()
            .find(|d| self.working.get(*d).is_some_and(PipelineEntity::is_protected))
        {
            return Err(HubError::Protected {
                id: id.clone(),
                protected: protected.clone(),
            });
        }
        for gone in doomed {
            self.working.remove(&gone);
        }
        Ok(())
    }

    fn commit_changes(&mut self) -> Result<(), HubError> {
        if let Some(message) = self.fail_next_commit.take() {
            return Err(HubError::Commit(message));
        }
        self.validate()?;
        self.persisted = self.working.clone();
        self.commits += 1;
        Ok(())
    }

    fn discard_changes(&mut self) {
        self.working = self.persisted.clone();
    }

    fn status_table(&self) -> StatusTable {
        StatusTable::from_statuses(&self.statuses)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
