//! Pipeline node → tracking payload: the inverse of [`projection`](crate::projection).
//!
//! Category folders have no tracking record; they surface as the category
//! field of the assets below them. Folders whose type has no tracking kind
//! are passed through, and their children hang from the nearest trackable
//! ancestor.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{debug, warn};

use shotlink_core::{
    slugify, EntityHub, EntityKind, Fields, Filter, HubError, PipelineEntity, PipelineKind,
    StatusTable, SyncConfig, SyncStatus, TrackingRecord, TrackingRef, TrackingSession,
    DEFAULT_TASK_TYPE, PIPELINE_ID_FIELD, REMOVED_UPSTREAM, SYNC_STATUS_FIELD,
    TRACKING_TYPE_ATTRIB,
};

use crate::merge::{SoftFailure, SoftFeature};
use crate::projection::{
    parent_field, projection_fields, ParentRef, ASSET_CATEGORY_FIELD, CATEGORY_FOLDER_TYPE,
    PROJECT_LINK_FIELD, PROJECT_STATUS_FIELD, STATUS_FIELD, STEP_FIELD,
};
use crate::SyncError;

const STEP_ENTITY: &str = "Step";

/// Parent types whose steps are scoped by entity type.
const STEP_SCOPED_PARENTS: [&str; 2] = ["Asset", "Shot"];

// ---------------------------------------------------------------------------
// Node classification
// ---------------------------------------------------------------------------

pub fn is_category(entity: &PipelineEntity) -> bool {
    entity.kind == PipelineKind::Folder
        && (entity.entity_type == CATEGORY_FOLDER_TYPE
            || entity.attribs.get(TRACKING_TYPE_ATTRIB).and_then(Value::as_str)
                == Some(CATEGORY_FOLDER_TYPE))
}

/// The node's tracking counterpart was retired and the node kept.
pub fn is_removed_upstream(entity: &PipelineEntity) -> bool {
    entity.tracking_id().as_deref() == Some(REMOVED_UPSTREAM)
}

/// Category value written to the assets under a category folder.
pub fn category_label(entity: &PipelineEntity) -> String {
    entity.label.clone().unwrap_or_else(|| entity.name.clone())
}

/// Tracking name for a node: the label when it still matches the node name,
/// the node name otherwise.
pub fn display_name(entity: &PipelineEntity) -> &str {
    match entity.label.as_deref() {
        Some(label) if slugify(label).eq_ignore_ascii_case(&entity.name) => label,
        _ => &entity.name,
    }
}

/// Tracking record the node says it mirrors.
pub fn stored_identity(entity: &PipelineEntity, kind: EntityKind) -> Option<TrackingRef> {
    let id = entity.tracking_id()?.parse::<i64>().ok()?;
    Some(TrackingRef::new(kind.as_str(), id))
}

fn status_field(kind: EntityKind) -> &'static str {
    if kind == EntityKind::Project {
        PROJECT_STATUS_FIELD
    } else {
        STATUS_FIELD
    }
}

/// Tracking field linking `kind` to an entity parent. Asset categories are
/// plain values, never links.
fn link_field(kind: EntityKind, config: &SyncConfig) -> Option<&'static str> {
    parent_field(kind, config).filter(|field| *field != ASSET_CATEGORY_FIELD)
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Mapped attributes of `entity` that differ from `existing`.
///
/// Each value goes to the tracking field `existing` already uses, plain name
/// first, then the `sg_` form. Without an existing value the `sg_` form is
/// used.
pub fn outbound_attributes(
    entity: &PipelineEntity,
    attribute_map: &BTreeMap<String, String>,
    existing: Option<&TrackingRecord>,
) -> Fields {
    let mut data = Fields::new();
    for (attrib, field) in attribute_map {
        let Some(value) = entity.attribs.get(attrib).filter(|v| !v.is_null()) else {
            continue;
        };
        let prefixed = format!("sg_{field}");
        let target = match existing {
            Some(record) if record.get(field).is_some() => field.clone(),
            Some(record) if record.get(&prefixed).is_some() => prefixed,
            _ if field.starts_with("sg_") => field.clone(),
            _ => prefixed,
        };
        if existing.and_then(|record| record.get(&target)) != Some(value) {
            data.insert(target, value.clone());
        }
    }
    data
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// What every pipeline → tracking write needs: the tracking project, the
/// pipeline status table and the sync configuration.
pub struct Outbound<'a> {
    pub project: TrackingRef,
    pub statuses: StatusTable,
    pub config: &'a SyncConfig,
}

impl<'a> Outbound<'a> {
    pub fn new(hub: &dyn EntityHub, project: TrackingRef, config: &'a SyncConfig) -> Self {
        Self {
            project,
            statuses: hub.status_table(),
            config,
        }
    }

    /// Tracking kind mirrored from `entity`, if it has one and it is enabled.
    pub fn tracking_kind(&self, entity: &PipelineEntity) -> Option<EntityKind> {
        let kind = match entity.kind {
            PipelineKind::Task => EntityKind::Task,
            PipelineKind::Folder => {
                let declared = entity
                    .attribs
                    .get(TRACKING_TYPE_ATTRIB)
                    .and_then(Value::as_str)
                    .unwrap_or(entity.entity_type.as_str());
                let kind = declared.parse::<EntityKind>().ok()?;
                if !kind.is_folder_like() || kind == EntityKind::AssetCategory {
                    return None;
                }
                kind
            }
            PipelineKind::Project | PipelineKind::Version => return None,
        };
        self.config.is_enabled(kind).then_some(kind)
    }

    /// Where `entity` hangs in tracking, found by walking up its ancestors.
    ///
    /// Fails with [`SyncError::ParentNotInTracking`] when the nearest
    /// trackable ancestor has no tracking identity yet.
    pub fn tracking_parent(
        &self,
        hub: &dyn EntityHub,
        entity: &PipelineEntity,
    ) -> Result<ParentRef, SyncError> {
        let mut category = None;
        let mut current = entity.parent_id.clone();
        while let Some(id) = current {
            let parent = hub.entity(&id).ok_or_else(|| HubError::NotFound(id.clone()))?;
            if parent.kind == PipelineKind::Project {
                break;
            }
            if is_category(parent) {
                category.get_or_insert_with(|| category_label(parent));
            } else if let Some(kind) = self.tracking_kind(parent) {
                return stored_identity(parent, kind).map(ParentRef::Entity).ok_or(
                    SyncError::ParentNotInTracking {
                        pipeline_id: entity.id.clone(),
                        parent: id,
                    },
                );
            }
            current = parent.parent_id.clone();
        }
        Ok(category.map_or(ParentRef::ProjectRoot, ParentRef::Category))
    }

    /// Live, unclaimed tracking record of `kind` under `parent` whose name
    /// matches the node's.
    pub fn find_by_name(
        &self,
        session: &dyn TrackingSession,
        entity: &PipelineEntity,
        kind: EntityKind,
        parent: &ParentRef,
    ) -> Result<Option<TrackingRecord>, SyncError> {
        let mut filters = vec![Filter::is(PROJECT_LINK_FIELD, self.project.to_link())];
        if let (ParentRef::Entity(link), Some(field)) = (parent, link_field(kind, self.config)) {
            filters.push(Filter::is(field, link.to_link()));
        }
        let fields = projection_fields(kind, self.config);
        let found = session
            .find(kind.as_str(), &filters, &fields)?
            .into_iter()
            .find(|record| {
                let named = record
                    .get_str(kind.name_field())
                    .is_some_and(|name| slugify(name).eq_ignore_ascii_case(&entity.name));
                let free = record
                    .get_str(PIPELINE_ID_FIELD)
                    .map_or(true, |id| id == entity.id.as_str());
                named && free
            });
        Ok(found)
    }

    /// Tracking status code for the node's status.
    pub fn status_code(&self, entity: &PipelineEntity) -> Result<Option<String>, SoftFailure> {
        let Some(status) = entity.status.as_deref() else {
            return Ok(None);
        };
        match self.statuses.short_name(status) {
            Some(code) => Ok(Some(code.to_owned())),
            None => {
                warn!(pipeline_id = %entity.id, status, "status has no tracking code");
                Err(SoftFailure::new(
                    SoftFeature::Status,
                    &entity.id,
                    format!("status '{status}' has no tracking code"),
                ))
            }
        }
    }

    /// Payload for a new tracking record mirroring `entity`.
    pub fn creation_fields(
        &self,
        session: &dyn TrackingSession,
        entity: &PipelineEntity,
        kind: EntityKind,
        parent: &ParentRef,
        warnings: &mut Vec<SoftFailure>,
    ) -> Result<Fields, SyncError> {
        let mut data = outbound_attributes(entity, &self.config.attribute_map, None);
        data.insert(PROJECT_LINK_FIELD.to_owned(), self.project.to_link());
        data.insert(
            kind.name_field().to_owned(),
            Value::from(display_name(entity)),
        );
        data.insert(PIPELINE_ID_FIELD.to_owned(), Value::from(entity.id.as_str()));
        data.insert(
            SYNC_STATUS_FIELD.to_owned(),
            Value::from(SyncStatus::Synced.as_str()),
        );

        match parent {
            ParentRef::Entity(link) => {
                if let Some(field) = link_field(kind, self.config) {
                    data.insert(field.to_owned(), link.to_link());
                }
            }
            ParentRef::Category(label) if kind == EntityKind::Asset => {
                data.insert(ASSET_CATEGORY_FIELD.to_owned(), Value::from(label.as_str()));
            }
            _ => {}
        }

        if kind == EntityKind::Task {
            if let Some(step) = step_link(session, &entity.entity_type, parent)? {
                data.insert(STEP_FIELD.to_owned(), step);
            }
        }

        match self.status_code(entity) {
            Ok(Some(code)) => {
                data.insert(status_field(kind).to_owned(), Value::from(code));
            }
            Ok(None) => {}
            Err(w) => warnings.push(w),
        }
        Ok(data)
    }

    /// Fields of `record` that no longer agree with `entity`.
    ///
    /// The name field is only compared when `with_name` is set; the full-tree
    /// pass never renames tracking records.
    pub fn changed_fields(
        &self,
        entity: &PipelineEntity,
        kind: EntityKind,
        record: &TrackingRecord,
        with_name: bool,
        warnings: &mut Vec<SoftFailure>,
    ) -> Fields {
        let mut data = outbound_attributes(entity, &self.config.attribute_map, Some(record));
        if with_name {
            let name = display_name(entity);
            if record.get_str(kind.name_field()) != Some(name) {
                data.insert(kind.name_field().to_owned(), Value::from(name));
            }
        }
        if record.get_str(PIPELINE_ID_FIELD) != Some(entity.id.as_str()) {
            data.insert(PIPELINE_ID_FIELD.to_owned(), Value::from(entity.id.as_str()));
        }
        if record.get_str(SYNC_STATUS_FIELD) != Some(SyncStatus::Synced.as_str()) {
            data.insert(
                SYNC_STATUS_FIELD.to_owned(),
                Value::from(SyncStatus::Synced.as_str()),
            );
        }
        match self.status_code(entity) {
            Ok(Some(code)) if record.get_str(status_field(kind)) != Some(code.as_str()) => {
                data.insert(status_field(kind).to_owned(), Value::from(code));
            }
            Ok(_) => {}
            Err(w) => warnings.push(w),
        }
        data
    }
}

/// Step link for a new task of `task_type`. The default task type may go
/// without one; any other type needs a matching step.
fn step_link(
    session: &dyn TrackingSession,
    task_type: &str,
    parent: &ParentRef,
) -> Result<Option<Value>, SyncError> {
    let mut filters = vec![Filter::is("code", task_type)];
    if let ParentRef::Entity(link) = parent {
        if STEP_SCOPED_PARENTS.contains(&link.entity_type.as_str()) {
            filters.push(Filter::is("entity_type", link.entity_type.clone()));
        }
    }
    match session.find_one(STEP_ENTITY, &filters, &["code".to_owned()])? {
        Some(step) => Ok(Some(json!({
            "type": STEP_ENTITY,
            "id": step.id,
            "name": task_type,
        }))),
        None if task_type == DEFAULT_TASK_TYPE => {
            debug!(task_type, "no step for the default task type, creating task without one");
            Ok(None)
        }
        None => Err(SyncError::MissingStep {
            task_type: task_type.to_owned(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use shotlink_core::{
        Attribs, MemoryHub, MemoryTracker, NewFolder, NewTask, PipelineId, ProjectStatus,
        TRACKING_ID_ATTRIB,
    };

    fn config() -> SyncConfig {
        let mut cfg = SyncConfig::default();
        cfg.attribute_map.insert("fps".into(), "fps".into());
        cfg
    }

    fn folder(
        hub: &mut MemoryHub,
        parent: &PipelineId,
        folder_type: &str,
        name: &str,
        tracking_id: Option<&str>,
    ) -> PipelineId {
        let mut attribs = Attribs::new();
        if let Some(id) = tracking_id {
            attribs.set(TRACKING_ID_ATTRIB, id);
        }
        hub.add_new_folder(NewFolder {
            folder_type: folder_type.into(),
            name: name.into(),
            label: None,
            parent_id: parent.clone(),
            entity_id: None,
            attribs,
        })
        .expect("folder")
    }

    fn task(hub: &mut MemoryHub, parent: &PipelineId, task_type: &str) -> PipelineId {
        hub.add_new_task(NewTask {
            task_type: task_type.into(),
            name: "anim".into(),
            label: Some("Anim".into()),
            parent_id: parent.clone(),
            entity_id: None,
            attribs: Attribs::new(),
        })
        .expect("task")
    }

    fn hub() -> MemoryHub {
        MemoryHub::new("ABC").with_statuses(vec![ProjectStatus::new("In progress", "ip")])
    }

    #[test]
    fn tracking_kind_follows_folder_type() {
        let cfg = config();
        let mut hub = hub();
        let root = hub.project_entity().id.clone();
        let shot = folder(&mut hub, &root, "Shot", "sh010", None);
        let plain = folder(&mut hub, &root, "Folder", "misc", None);
        let category = folder(&mut hub, &root, CATEGORY_FOLDER_TYPE, "prop", None);
        let scene = folder(&mut hub, &root, "Scene", "sc01", None);
        let out = Outbound::new(&hub, TrackingRef::new("Project", 1), &cfg);

        let kind_of = |id: &PipelineId| out.tracking_kind(hub.entity(id).expect("entity"));
        assert_eq!(kind_of(&shot), Some(EntityKind::Shot));
        assert_eq!(kind_of(&plain), None);
        assert_eq!(kind_of(&category), None);
        // Scene is not enabled by default.
        assert_eq!(kind_of(&scene), None);
        assert_eq!(kind_of(&root), None);
    }

    #[test]
    fn display_name_prefers_matching_label() {
        let mut entity = hub().project_entity().clone();
        entity.name = "sh_010".into();
        entity.label = Some("sh 010".into());
        assert_eq!(display_name(&entity), "sh 010");
        entity.name = "sh_020".into();
        assert_eq!(display_name(&entity), "sh_020");
    }

    #[test]
    fn attributes_follow_the_existing_field_form() {
        let mut entity = hub().project_entity().clone();
        entity.attribs.set("fps", 25);
        let map = config().attribute_map;

        let fresh = outbound_attributes(&entity, &map, None);
        assert_eq!(fresh.get("sg_fps"), Some(&Value::from(25)));

        let plain = TrackingRecord::new("Shot", 1).with("fps", 24);
        let data = outbound_attributes(&entity, &map, Some(&plain));
        assert_eq!(data.get("fps"), Some(&Value::from(25)));
        assert!(!data.contains_key("sg_fps"));

        let same = TrackingRecord::new("Shot", 1).with("sg_fps", 25);
        assert!(outbound_attributes(&entity, &map, Some(&same)).is_empty());
    }

    #[test]
    fn parent_walk_passes_through_categories_and_plain_folders() {
        let cfg = config();
        let mut hub = hub();
        let root = hub.project_entity().id.clone();
        let category = folder(&mut hub, &root, CATEGORY_FOLDER_TYPE, "prop", None);
        let asset = folder(&mut hub, &category, "Asset", "chair", None);
        let seq = folder(&mut hub, &root, "Sequence", "seq01", Some("2"));
        let plain = folder(&mut hub, &seq, "Folder", "misc", None);
        let shot = folder(&mut hub, &plain, "Shot", "sh010", None);
        let out = Outbound::new(&hub, TrackingRef::new("Project", 1), &cfg);

        let parent_of = |id: &PipelineId| out.tracking_parent(&hub, hub.entity(id).expect("entity"));
        assert_eq!(
            parent_of(&asset).expect("asset"),
            ParentRef::Category("prop".into())
        );
        assert_eq!(
            parent_of(&shot).expect("shot"),
            ParentRef::Entity(TrackingRef::new("Sequence", 2))
        );
        assert_eq!(parent_of(&seq).expect("seq"), ParentRef::ProjectRoot);
    }

    #[test]
    fn parent_without_identity_is_an_error() {
        let cfg = config();
        let mut hub = hub();
        let root = hub.project_entity().id.clone();
        let seq = folder(&mut hub, &root, "Sequence", "seq01", None);
        let shot = folder(&mut hub, &seq, "Shot", "sh010", None);
        let out = Outbound::new(&hub, TrackingRef::new("Project", 1), &cfg);

        let err = out
            .tracking_parent(&hub, hub.entity(&shot).expect("shot"))
            .unwrap_err();
        assert!(
            matches!(err, SyncError::ParentNotInTracking { ref parent, .. } if *parent == seq),
            "got: {err}"
        );
    }

    #[test]
    fn task_creation_needs_a_step() {
        let cfg = config();
        let mut hub = hub();
        let root = hub.project_entity().id.clone();
        let shot = folder(&mut hub, &root, "Shot", "sh010", Some("10"));
        let sh020 = folder(&mut hub, &root, "Shot", "sh020", Some("11"));
        let anim = task(&mut hub, &shot, "Animation");
        let generic = task(&mut hub, &sh020, DEFAULT_TASK_TYPE);
        let out = Outbound::new(&hub, TrackingRef::new("Project", 1), &cfg);
        let parent = ParentRef::Entity(TrackingRef::new("Shot", 10));
        let mut warnings = vec![];

        let mut tracker = MemoryTracker::default();
        let anim_node = hub.entity(&anim).expect("task").clone();
        let err = out
            .creation_fields(&tracker, &anim_node, EntityKind::Task, &parent, &mut warnings)
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingStep { .. }), "got: {err}");

        tracker.insert(
            TrackingRecord::new("Step", 7)
                .with("code", "Animation")
                .with("entity_type", "Shot"),
        );
        let data = out
            .creation_fields(&tracker, &anim_node, EntityKind::Task, &parent, &mut warnings)
            .expect("fields");
        assert_eq!(data["content"], "Anim");
        assert_eq!(data["entity"], json!({"type": "Shot", "id": 10}));
        assert_eq!(data[STEP_FIELD]["id"], 7);
        assert_eq!(data[PIPELINE_ID_FIELD], anim.as_str());

        let generic_node = hub.entity(&generic).expect("task").clone();
        let data = out
            .creation_fields(&tracker, &generic_node, EntityKind::Task, &parent, &mut warnings)
            .expect("fields");
        assert!(!data.contains_key(STEP_FIELD));
        assert!(warnings.is_empty());
    }

    #[test]
    fn changed_fields_map_status_and_skip_unchanged() {
        let cfg = config();
        let mut hub = hub();
        let root = hub.project_entity().id.clone();
        let shot = folder(&mut hub, &root, "Shot", "sh010", Some("10"));
        hub.entity_mut(&shot).expect("shot").status = Some("In progress".into());
        let node = hub.entity(&shot).expect("shot").clone();
        let out = Outbound::new(&hub, TrackingRef::new("Project", 1), &cfg);

        let synced = TrackingRecord::new("Shot", 10)
            .with("code", "sh010")
            .with(PIPELINE_ID_FIELD, shot.as_str())
            .with(SYNC_STATUS_FIELD, "Synced")
            .with(STATUS_FIELD, "ip");
        let mut warnings = vec![];
        assert!(out
            .changed_fields(&node, EntityKind::Shot, &synced, true, &mut warnings)
            .is_empty());

        let stale = synced.clone().with("code", "sh009").with(STATUS_FIELD, "wtg");
        let data = out.changed_fields(&node, EntityKind::Shot, &stale, true, &mut warnings);
        assert_eq!(data.get("code"), Some(&Value::from("sh010")));
        assert_eq!(data.get(STATUS_FIELD), Some(&Value::from("ip")));
        let data = out.changed_fields(&node, EntityKind::Shot, &stale, false, &mut warnings);
        assert!(!data.contains_key("code"));
        assert!(warnings.is_empty());

        hub.entity_mut(&shot).expect("shot").status = Some("Omitted".into());
        let node = hub.entity(&shot).expect("shot").clone();
        out.changed_fields(&node, EntityKind::Shot, &synced, false, &mut warnings);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].feature, SoftFeature::Status);
    }
}
