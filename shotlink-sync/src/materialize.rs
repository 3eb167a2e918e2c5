//! Node creation, one constructor per projected variant.

use tracing::{debug, info};

use shotlink_core::{
    Attribs, EntityHub, NewFolder, NewTask, PipelineId, PipelineKind, TRACKING_ID_ATTRIB,
    TRACKING_TYPE_ATTRIB,
};

use crate::projection::{
    CategoryEntity, FolderEntity, ProjectedEntity, TaskEntity, TrackedFields, VersionEntity,
    CATEGORY_FOLDER_TYPE,
};
use crate::SyncError;

/// Create the pipeline node for a projected entity under `parent`.
///
/// `Ok(None)` means the variant cannot be created there; nothing was added.
pub trait Materialize {
    fn materialize(
        &self,
        hub: &mut dyn EntityHub,
        parent: &PipelineId,
    ) -> Result<Option<PipelineId>, SyncError>;
}

/// Mapped attributes plus the tracking identity pair.
fn identity_attribs(tracked: &TrackedFields) -> Attribs {
    let mut attribs: Attribs = tracked
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    attribs.set(TRACKING_ID_ATTRIB, tracked.source.id.to_string());
    attribs.set(TRACKING_TYPE_ATTRIB, tracked.source.entity_type.clone());
    attribs
}

impl Materialize for FolderEntity {
    fn materialize(
        &self,
        hub: &mut dyn EntityHub,
        parent: &PipelineId,
    ) -> Result<Option<PipelineId>, SyncError> {
        let id = hub.add_new_folder(NewFolder {
            folder_type: self.folder_type.as_str().to_owned(),
            name: self.tracked.name.clone(),
            label: Some(self.tracked.label.clone()),
            parent_id: parent.clone(),
            entity_id: self.tracked.target_id.clone(),
            attribs: identity_attribs(&self.tracked),
        })?;
        info!(
            pipeline_id = %id,
            entity_type = %self.tracked.source.entity_type,
            entity_id = self.tracked.source.id,
            "created folder '{}'",
            self.tracked.name
        );
        Ok(Some(id))
    }
}

impl Materialize for TaskEntity {
    fn materialize(
        &self,
        hub: &mut dyn EntityHub,
        parent: &PipelineId,
    ) -> Result<Option<PipelineId>, SyncError> {
        if hub.entity(parent).map(|e| e.kind) == Some(PipelineKind::Project) {
            debug!(
                entity_id = self.tracked.source.id,
                "task '{}' is linked to the project, tasks need a folder parent",
                self.tracked.name
            );
            return Ok(None);
        }
        let id = hub.add_new_task(NewTask {
            task_type: self.task_type.clone(),
            name: self.tracked.name.clone(),
            label: Some(self.tracked.label.clone()),
            parent_id: parent.clone(),
            entity_id: self.tracked.target_id.clone(),
            attribs: identity_attribs(&self.tracked),
        })?;
        info!(
            pipeline_id = %id,
            entity_id = self.tracked.source.id,
            "created task '{}'",
            self.tracked.name
        );
        Ok(Some(id))
    }
}

impl Materialize for VersionEntity {
    /// Versions are published from the pipeline side, never created here.
    fn materialize(
        &self,
        _hub: &mut dyn EntityHub,
        _parent: &PipelineId,
    ) -> Result<Option<PipelineId>, SyncError> {
        Ok(None)
    }
}

impl Materialize for CategoryEntity {
    fn materialize(
        &self,
        hub: &mut dyn EntityHub,
        parent: &PipelineId,
    ) -> Result<Option<PipelineId>, SyncError> {
        let mut attribs = Attribs::new();
        attribs.set(TRACKING_TYPE_ATTRIB, CATEGORY_FOLDER_TYPE);
        let id = hub.add_new_folder(NewFolder {
            folder_type: CATEGORY_FOLDER_TYPE.to_owned(),
            name: self.name.clone(),
            label: Some(self.label.clone()),
            parent_id: parent.clone(),
            entity_id: None,
            attribs,
        })?;
        info!(pipeline_id = %id, "created asset category '{}'", self.name);
        Ok(Some(id))
    }
}

impl Materialize for ProjectedEntity {
    fn materialize(
        &self,
        hub: &mut dyn EntityHub,
        parent: &PipelineId,
    ) -> Result<Option<PipelineId>, SyncError> {
        match self {
            ProjectedEntity::Folder(f) => f.materialize(hub, parent),
            ProjectedEntity::Task(t) => t.materialize(hub, parent),
            ProjectedEntity::Version(v) => v.materialize(hub, parent),
            ProjectedEntity::Category(c) => c.materialize(hub, parent),
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup helpers
// ---------------------------------------------------------------------------

/// Child of `parent` with the given kind whose name matches case-insensitively.
pub fn find_child_by_name(
    hub: &mut dyn EntityHub,
    parent: &PipelineId,
    name: &str,
    kind: PipelineKind,
) -> Result<Option<PipelineId>, SyncError> {
    let wanted = name.to_lowercase();
    let found = hub.children(parent)?.into_iter().find(|child| {
        hub.entity(child)
            .is_some_and(|e| e.kind == kind && e.name.to_lowercase() == wanted)
    });
    Ok(found)
}

/// Category folder under the project root, created on first use.
pub fn find_or_create_category(
    hub: &mut dyn EntityHub,
    category: &CategoryEntity,
) -> Result<PipelineId, SyncError> {
    let root = hub.project_entity().id.clone();
    if let Some(id) = find_child_by_name(hub, &root, &category.name, PipelineKind::Folder)? {
        return Ok(id);
    }
    category
        .materialize(hub, &root)?
        .ok_or_else(|| SyncError::UnsupportedEntityType(CATEGORY_FOLDER_TYPE.to_owned()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
