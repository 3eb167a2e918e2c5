//! Projection of tracking records into the sync's canonical form.
//!
//! A [`ProjectedEntity`] is built fresh for every matcher visit or event and
//! never persisted. Each variant carries only the fields its kind supports.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use shotlink_core::{
    slugify, EntityKind, PipelineId, PipelineKind, SyncConfig, SyncStatus, TrackingRecord,
    TrackingRef, DEFAULT_TASK_TYPE, PIPELINE_ID_FIELD, SYNC_STATUS_FIELD,
};

use crate::merge::collect_attributes;
use crate::SyncError;

pub const STATUS_FIELD: &str = "sg_status_list";
pub const PROJECT_STATUS_FIELD: &str = "sg_status";
pub const TAGS_FIELD: &str = "tags";
pub const ASSIGNEES_FIELD: &str = "task_assignees";
pub const STEP_FIELD: &str = "step";
pub const ASSET_CATEGORY_FIELD: &str = "sg_asset_type";
pub const PROJECT_LINK_FIELD: &str = "project";

/// Folder type of synthetic asset-category nodes.
pub const CATEGORY_FOLDER_TYPE: &str = "AssetCategory";

// ---------------------------------------------------------------------------
// Keys and parent references
// ---------------------------------------------------------------------------

/// Where a projected entity hangs in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParentRef {
    ProjectRoot,
    /// Synthetic category under the project, by normalized name.
    Category(String),
    Entity(TrackingRef),
}

/// Identity of a node in the resolved hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Project,
    Tracked(TrackingRef),
    /// Lower-cased category name.
    Category(String),
}

impl NodeKey {
    pub fn category(name: &str) -> Self {
        NodeKey::Category(name.to_lowercase())
    }
}

impl From<&ParentRef> for NodeKey {
    fn from(parent: &ParentRef) -> Self {
        match parent {
            ParentRef::ProjectRoot => NodeKey::Project,
            ParentRef::Category(name) => NodeKey::category(name),
            ParentRef::Entity(r) => NodeKey::Tracked(r.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Fields shared by every variant that originates from a tracking record.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFields {
    pub source: TrackingRef,
    /// Normalized node name.
    pub name: String,
    /// Display name as stored in the tracker.
    pub label: String,
    pub parent: ParentRef,
    /// Pipeline id cached on the tracking record.
    pub target_id: Option<PipelineId>,
    pub sync_status: Option<SyncStatus>,
    /// Pipeline attribute name → value, from the configured attribute map.
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderEntity {
    pub tracked: TrackedFields,
    pub folder_type: EntityKind,
    pub status: Option<String>,
    pub tags: Vec<String>,
    /// Raw category value; only assets carry one.
    pub asset_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskEntity {
    pub tracked: TrackedFields,
    pub task_type: String,
    pub status: Option<String>,
    pub assignees: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionEntity {
    pub tracked: TrackedFields,
    pub status: Option<String>,
    pub tags: Vec<String>,
}

/// Pipeline-only grouping folder. Never carries a tracking identity.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryEntity {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectedEntity {
    Folder(FolderEntity),
    Task(TaskEntity),
    Version(VersionEntity),
    Category(CategoryEntity),
}

impl ProjectedEntity {
    pub fn tracked(&self) -> Option<&TrackedFields> {
        match self {
            ProjectedEntity::Folder(f) => Some(&f.tracked),
            ProjectedEntity::Task(t) => Some(&t.tracked),
            ProjectedEntity::Version(v) => Some(&v.tracked),
            ProjectedEntity::Category(_) => None,
        }
    }

    pub fn key(&self) -> NodeKey {
        match self {
            ProjectedEntity::Category(c) => NodeKey::category(&c.name),
            _ => self
                .tracked()
                .map(|t| NodeKey::Tracked(t.source.clone()))
                .unwrap_or(NodeKey::Project),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ProjectedEntity::Category(c) => &c.name,
            ProjectedEntity::Folder(f) => &f.tracked.name,
            ProjectedEntity::Task(t) => &t.tracked.name,
            ProjectedEntity::Version(v) => &v.tracked.name,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ProjectedEntity::Category(c) => &c.label,
            ProjectedEntity::Folder(f) => &f.tracked.label,
            ProjectedEntity::Task(t) => &t.tracked.label,
            ProjectedEntity::Version(v) => &v.tracked.label,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            ProjectedEntity::Folder(f) => f.folder_type,
            ProjectedEntity::Task(_) => EntityKind::Task,
            ProjectedEntity::Version(_) => EntityKind::Version,
            ProjectedEntity::Category(_) => EntityKind::AssetCategory,
        }
    }

    pub fn pipeline_kind(&self) -> PipelineKind {
        self.kind().pipeline_kind()
    }

    pub fn parent(&self) -> ParentRef {
        match self {
            ProjectedEntity::Category(_) => ParentRef::ProjectRoot,
            _ => self
                .tracked()
                .map(|t| t.parent.clone())
                .unwrap_or(ParentRef::ProjectRoot),
        }
    }

    pub fn status(&self) -> Option<&str> {
        match self {
            ProjectedEntity::Folder(f) => f.status.as_deref(),
            ProjectedEntity::Task(t) => t.status.as_deref(),
            ProjectedEntity::Version(v) => v.status.as_deref(),
            ProjectedEntity::Category(_) => None,
        }
    }

    pub fn assignees(&self) -> &[String] {
        match self {
            ProjectedEntity::Task(t) => &t.assignees,
            _ => &[],
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            ProjectedEntity::Folder(f) => &f.tags,
            ProjectedEntity::Task(t) => &t.tags,
            ProjectedEntity::Version(v) => &v.tags,
            ProjectedEntity::Category(_) => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Field selection
// ---------------------------------------------------------------------------

/// Tracking field linking a record of `kind` to its parent, if any.
///
/// Asset parents are synthetic categories read from the category field.
pub fn parent_field(kind: EntityKind, config: &SyncConfig) -> Option<&'static str> {
    match kind {
        EntityKind::Project | EntityKind::AssetCategory | EntityKind::Episode => None,
        EntityKind::Sequence => config.is_enabled(EntityKind::Episode).then_some("episode"),
        EntityKind::Scene => config
            .is_enabled(EntityKind::Sequence)
            .then_some("sg_sequence"),
        EntityKind::Shot => {
            if config.is_enabled(EntityKind::Sequence) {
                Some("sg_sequence")
            } else if config.is_enabled(EntityKind::Episode) {
                Some("sg_episode")
            } else {
                None
            }
        }
        EntityKind::Asset => Some(ASSET_CATEGORY_FIELD),
        EntityKind::Task | EntityKind::Version => Some("entity"),
    }
}

/// Every tracking field needed to project a record of `kind`.
pub fn projection_fields(kind: EntityKind, config: &SyncConfig) -> Vec<String> {
    let mut fields: BTreeSet<String> = [
        kind.name_field(),
        PROJECT_LINK_FIELD,
        PIPELINE_ID_FIELD,
        SYNC_STATUS_FIELD,
        TAGS_FIELD,
    ]
    .into_iter()
    .map(str::to_owned)
    .collect();

    for tracking_field in config.attribute_map.values() {
        fields.insert(tracking_field.clone());
        fields.insert(format!("sg_{tracking_field}"));
    }

    match kind {
        EntityKind::Project => {
            fields.insert(config.project_code_field.clone());
            fields.insert(PROJECT_STATUS_FIELD.to_owned());
        }
        EntityKind::Task => {
            fields.insert(STATUS_FIELD.to_owned());
            fields.insert(STEP_FIELD.to_owned());
            fields.insert(ASSIGNEES_FIELD.to_owned());
        }
        _ => {
            fields.insert(STATUS_FIELD.to_owned());
        }
    }

    if let Some(parent) = parent_field(kind, config) {
        fields.insert(parent.to_owned());
    }
    fields.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Where `record` hangs, given its kind and the enabled types.
pub fn parent_ref(record: &TrackingRecord, kind: EntityKind, config: &SyncConfig) -> ParentRef {
    if kind == EntityKind::Asset {
        return match record.get_str(ASSET_CATEGORY_FIELD).map(slugify) {
            Some(name) if !name.is_empty() => ParentRef::Category(name),
            _ => ParentRef::ProjectRoot,
        };
    }
    let Some(field) = parent_field(kind, config) else {
        return ParentRef::ProjectRoot;
    };
    match record.get_link(field) {
        Some(link) if link.entity_type != EntityKind::Project.as_str() => ParentRef::Entity(link),
        _ => ParentRef::ProjectRoot,
    }
}

/// Project a tracking record of `kind`.
///
/// Fails with [`SyncError::UnsupportedEntityType`] for the project itself and
/// for synthetic kinds, which have no tracking records.
pub fn project_record(
    record: &TrackingRecord,
    kind: EntityKind,
    config: &SyncConfig,
) -> Result<ProjectedEntity, SyncError> {
    if matches!(kind, EntityKind::Project | EntityKind::AssetCategory) {
        return Err(SyncError::UnsupportedEntityType(kind.as_str().to_owned()));
    }

    let label = record
        .get_str(kind.name_field())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{}_{}", record.entity_type, record.id));
    let mut name = slugify(&label);
    if name.is_empty() {
        name = format!("{}_{}", record.entity_type, record.id);
    }

    let tracked = TrackedFields {
        source: record.reference(),
        name,
        label,
        parent: parent_ref(record, kind, config),
        target_id: record.get_str(PIPELINE_ID_FIELD).map(PipelineId::from),
        sync_status: record.get_str(SYNC_STATUS_FIELD).and_then(SyncStatus::parse),
        attributes: collect_attributes(record, &config.attribute_map),
    };
    let status = record.get_str(STATUS_FIELD).map(str::to_owned);
    let tags = record.get_names(TAGS_FIELD);

    let projected = match kind {
        EntityKind::Task => ProjectedEntity::Task(TaskEntity {
            tracked,
            task_type: record
                .get(STEP_FIELD)
                .and_then(|step| step.get("name"))
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_TASK_TYPE)
                .to_owned(),
            status,
            assignees: record.get_names(ASSIGNEES_FIELD),
            tags,
        }),
        EntityKind::Version => ProjectedEntity::Version(VersionEntity {
            tracked,
            status,
            tags,
        }),
        folder_type => ProjectedEntity::Folder(FolderEntity {
            tracked,
            folder_type,
            status,
            tags,
            asset_category: (folder_type == EntityKind::Asset)
                .then(|| record.get_str(ASSET_CATEGORY_FIELD).map(str::to_owned))
                .flatten(),
        }),
    };
    Ok(projected)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SyncConfig {
        let mut cfg = SyncConfig::default();
        cfg.attribute_map.insert("frameStart".into(), "frame_start".into());
        cfg
    }

    #[test]
    fn shot_projects_to_folder_under_sequence() {
        let rec = TrackingRecord::new("Shot", 12)
            .with("code", "sh 010")
            .with("sg_sequence", json!({"type": "Sequence", "id": 3}))
            .with("sg_frame_start", 1001)
            .with("sg_status_list", "ip")
            .with(PIPELINE_ID_FIELD, "abc123")
            .with(SYNC_STATUS_FIELD, "Synced");
        let p = project_record(&rec, EntityKind::Shot, &config()).expect("project");
        let ProjectedEntity::Folder(f) = &p else {
            panic!("expected folder, got {p:?}");
        };
        assert_eq!(f.tracked.name, "sh_010");
        assert_eq!(f.tracked.label, "sh 010");
        assert_eq!(f.tracked.parent, ParentRef::Entity(TrackingRef::new("Sequence", 3)));
        assert_eq!(f.tracked.attributes.get("frameStart"), Some(&json!(1001)));
        assert_eq!(f.tracked.target_id, Some(PipelineId::from("abc123")));
        assert_eq!(f.tracked.sync_status, Some(SyncStatus::Synced));
        assert_eq!(f.status.as_deref(), Some("ip"));
        assert!(f.asset_category.is_none());
        assert_eq!(p.key(), NodeKey::Tracked(TrackingRef::new("Shot", 12)));
    }

    #[test]
    fn asset_parent_is_category() {
        let rec = TrackingRecord::new("Asset", 5)
            .with("code", "hero")
            .with(ASSET_CATEGORY_FIELD, "Character");
        let p = project_record(&rec, EntityKind::Asset, &config()).expect("project");
        assert_eq!(p.parent(), ParentRef::Category("Character".into()));
        assert_eq!(NodeKey::from(&p.parent()), NodeKey::Category("character".into()));
        let ProjectedEntity::Folder(f) = p else {
            panic!("expected folder");
        };
        assert_eq!(f.asset_category.as_deref(), Some("Character"));
    }

    #[test]
    fn asset_without_category_hangs_from_project() {
        let rec = TrackingRecord::new("Asset", 5).with("code", "hero");
        let p = project_record(&rec, EntityKind::Asset, &config()).expect("project");
        assert_eq!(p.parent(), ParentRef::ProjectRoot);
    }

    #[test]
    fn task_reads_step_and_assignees() {
        let rec = TrackingRecord::new("Task", 9)
            .with("content", "anim")
            .with("entity", json!({"type": "Shot", "id": 12}))
            .with("step", json!({"type": "Step", "id": 1, "name": "Animation"}))
            .with("task_assignees", json!([{"type": "HumanUser", "id": 2, "login": "alee"}]));
        let p = project_record(&rec, EntityKind::Task, &config()).expect("project");
        let ProjectedEntity::Task(t) = &p else {
            panic!("expected task");
        };
        assert_eq!(t.task_type, "Animation");
        assert_eq!(t.assignees, vec!["alee"]);
        assert_eq!(p.pipeline_kind(), PipelineKind::Task);
    }

    #[test]
    fn task_linked_to_project_parents_at_root() {
        let rec = TrackingRecord::new("Task", 9)
            .with("content", "edit")
            .with("entity", json!({"type": "Project", "id": 1}));
        let p = project_record(&rec, EntityKind::Task, &config()).expect("project");
        assert_eq!(p.parent(), ParentRef::ProjectRoot);
        let ProjectedEntity::Task(t) = p else {
            panic!("expected task");
        };
        assert_eq!(t.task_type, DEFAULT_TASK_TYPE);
    }

    #[test]
    fn shot_parent_falls_back_to_episode() {
        let mut cfg = config();
        cfg.enabled_entities.retain(|k| *k != EntityKind::Sequence);
        assert_eq!(parent_field(EntityKind::Shot, &cfg), Some("sg_episode"));
        cfg.enabled_entities.retain(|k| *k != EntityKind::Episode);
        assert_eq!(parent_field(EntityKind::Shot, &cfg), None);
        assert_eq!(parent_field(EntityKind::Sequence, &cfg), None);
    }

    #[test]
    fn projection_fields_include_prefixed_attributes() {
        let fields = projection_fields(EntityKind::Shot, &config());
        for expected in ["code", "frame_start", "sg_frame_start", "sg_sequence", PIPELINE_ID_FIELD] {
            assert!(fields.iter().any(|f| f == expected), "missing {expected}");
        }
    }

    #[test]
    fn project_kind_is_rejected() {
        let rec = TrackingRecord::new("Project", 1).with("name", "ABC");
        assert!(matches!(
            project_record(&rec, EntityKind::Project, &config()),
            Err(SyncError::UnsupportedEntityType(_))
        ));
    }

    #[test]
    fn nameless_record_gets_stable_name() {
        let rec = TrackingRecord::new("Shot", 77);
        let p = project_record(&rec, EntityKind::Shot, &config()).expect("project");
        assert_eq!(p.name(), "Shot_77");
    }
}
