//! Hierarchy resolver: bulk-fetch a tracking project and index it by parent.

use std::collections::HashMap;

use tracing::{debug, warn};

use shotlink_core::{
    EntityKind, Filter, SyncConfig, TrackingError, TrackingRecord, TrackingSession,
};

use crate::projection::{
    project_record, projection_fields, CategoryEntity, NodeKey, ParentRef, ProjectedEntity,
    PROJECT_LINK_FIELD,
};
use crate::SyncError;

/// Every projected entity of a project plus a parent → children index.
///
/// The project root is the [`NodeKey::Project`] parent key; it has no entry
/// in `entities`. Children keep fetch order so traversals are deterministic.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    entities: HashMap<NodeKey, ProjectedEntity>,
    children: HashMap<NodeKey, Vec<NodeKey>>,
}

impl Hierarchy {
    pub fn get(&self, key: &NodeKey) -> Option<&ProjectedEntity> {
        self.entities.get(key)
    }

    pub fn children_of(&self, key: &NodeKey) -> &[NodeKey] {
        self.children.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Fetch every enabled entity type under `project` and build the hierarchy.
///
/// Types missing from the tracker schema are skipped. Entities whose parent is
/// not part of the fetched set are left out of the children index.
pub fn resolve_hierarchy(
    session: &dyn TrackingSession,
    project: &TrackingRecord,
    config: &SyncConfig,
) -> Result<Hierarchy, SyncError> {
    let mut entities: HashMap<NodeKey, ProjectedEntity> = HashMap::new();
    let mut order: Vec<NodeKey> = Vec::new();
    let project_filter = [Filter::is(PROJECT_LINK_FIELD, project.reference().to_link())];

    for kind in &config.enabled_entities {
        let kind = *kind;
        if matches!(kind, EntityKind::Project | EntityKind::AssetCategory) {
            continue;
        }
        let fields = projection_fields(kind, config);
        let records = match session.find(kind.as_str(), &project_filter, &fields) {
            Ok(records) => records,
            Err(TrackingError::UnknownEntityType { entity_type }) => {
                warn!(entity_type = %entity_type, "entity type not in tracking schema, skipping");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        debug!(entity_type = %kind, count = records.len(), "fetched tracking entities");

        for record in &records {
            let projected = project_record(record, kind, config)?;
            if let ProjectedEntity::Folder(folder) = &projected {
                if let (ParentRef::Category(name), Some(raw)) =
                    (&folder.tracked.parent, &folder.asset_category)
                {
                    let key = NodeKey::category(name);
                    if !entities.contains_key(&key) {
                        entities.insert(
                            key.clone(),
                            ProjectedEntity::Category(CategoryEntity {
                                name: name.clone(),
                                label: raw.clone(),
                            }),
                        );
                        order.push(key);
                    }
                }
            }
            let key = projected.key();
            if entities.insert(key.clone(), projected).is_none() {
                order.push(key);
            }
        }
    }

    let mut children: HashMap<NodeKey, Vec<NodeKey>> = HashMap::new();
    for key in order {
        let Some(entity) = entities.get(&key) else {
            continue;
        };
        let parent = NodeKey::from(&entity.parent());
        if parent != NodeKey::Project && !entities.contains_key(&parent) {
            warn!(
                entity = ?key,
                parent = ?parent,
                "parent is not part of the synced hierarchy, skipping"
            );
            continue;
        }
        children.entry(parent).or_default().push(key);
    }

    Ok(Hierarchy { entities, children })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shotlink_core::{MemoryTracker, TrackingRef};

    fn project_link() -> serde_json::Value {
        json!({"type": "Project", "id": 1})
    }

    fn tracker() -> MemoryTracker {
        let mut t = MemoryTracker::default();
        t.insert(TrackingRecord::new("Project", 1).with("code", "ABC"));
        t.insert(
            TrackingRecord::new("Sequence", 2)
                .with("code", "seq01")
                .with("project", project_link()),
        );
        t.insert(
            TrackingRecord::new("Shot", 3)
                .with("code", "sh010")
                .with("project", project_link())
                .with("sg_sequence", json!({"type": "Sequence", "id": 2})),
        );
        t.insert(
            TrackingRecord::new("Asset", 4)
                .with("code", "hero")
                .with("project", project_link())
                .with("sg_asset_type", "Character"),
        );
        t.insert(
            TrackingRecord::new("Asset", 5)
                .with("code", "villain")
                .with("project", project_link())
                .with("sg_asset_type", "Character"),
        );
        t.insert(
            TrackingRecord::new("Asset", 6)
                .with("code", "forest")
                .with("project", project_link())
                .with("sg_asset_type", "Environment"),
        );
        t
    }

    fn project() -> TrackingRecord {
        TrackingRecord::new("Project", 1).with("code", "ABC")
    }

    #[test]
    fn builds_parent_index() {
        let h = resolve_hierarchy(&tracker(), &project(), &SyncConfig::default()).expect("resolve");
        let seq = NodeKey::Tracked(TrackingRef::new("Sequence", 2));
        let shot = NodeKey::Tracked(TrackingRef::new("Shot", 3));
        assert!(h.children_of(&NodeKey::Project).contains(&seq));
        assert_eq!(h.children_of(&seq), &[shot]);
    }

    #[test]
    fn one_category_per_distinct_value() {
        let h = resolve_hierarchy(&tracker(), &project(), &SyncConfig::default()).expect("resolve");
        let character = NodeKey::Category("character".into());
        let environment = NodeKey::Category("environment".into());
        assert_eq!(h.children_of(&character).len(), 2);
        assert_eq!(h.children_of(&environment).len(), 1);
        let roots = h.children_of(&NodeKey::Project);
        assert_eq!(roots.iter().filter(|k| **k == character).count(), 1);
        assert!(matches!(h.get(&character), Some(ProjectedEntity::Category(_))));
    }

    #[test]
    fn dangling_parent_is_orphaned() {
        let mut t = tracker();
        t.insert(
            TrackingRecord::new("Shot", 9)
                .with("code", "sh999")
                .with("project", project_link())
                .with("sg_sequence", json!({"type": "Sequence", "id": 404})),
        );
        let h = resolve_hierarchy(&t, &project(), &SyncConfig::default()).expect("resolve");
        let orphan = NodeKey::Tracked(TrackingRef::new("Shot", 9));
        assert!(h.get(&orphan).is_some());
        assert!(!h
            .children_of(&NodeKey::Tracked(TrackingRef::new("Sequence", 404)))
            .contains(&orphan));
        assert!(!h.children_of(&NodeKey::Project).contains(&orphan));
    }

    #[test]
    fn unknown_schema_type_is_skipped() {
        let t = MemoryTracker::with_schema(["Project", "Shot"]);
        let h = resolve_hierarchy(&t, &project(), &SyncConfig::default()).expect("resolve");
        assert!(h.is_empty());
    }

    #[test]
    fn other_projects_are_ignored() {
        let mut t = tracker();
        t.insert(
            TrackingRecord::new("Sequence", 20)
                .with("code", "other")
                .with("project", json!({"type": "Project", "id": 2})),
        );
        let h = resolve_hierarchy(&t, &project(), &SyncConfig::default()).expect("resolve");
        assert!(h
            .get(&NodeKey::Tracked(TrackingRef::new("Sequence", 20)))
            .is_none());
    }
}
