//! Event reconciler: create, update and remove one pipeline node from a
//! single tracking change.
//!
//! Unlike the full-tree matcher, identity problems here are hard errors:
//! there is no surrounding pass to flag as failed, and continuing would
//! cross-wire unrelated entities.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use shotlink_core::{
    EntityHub, EntityKind, Fields, Filter, HubError, PipelineEntity, PipelineId, SyncConfig,
    SyncStatus, TrackingRecord, TrackingRef, TrackingSession, PIPELINE_ID_FIELD,
    REMOVED_UPSTREAM, SYNC_STATUS_FIELD, TRACKING_ID_ATTRIB,
};

use crate::materialize::{find_child_by_name, find_or_create_category, Materialize};
use crate::merge::{
    apply_soft_features, check_identity, merge_into, write_identity, IdentityCheck, SoftFailure,
};
use crate::projection::{
    parent_field, project_record, projection_fields, CategoryEntity, ParentRef, ProjectedEntity,
    TrackedFields,
};
use crate::SyncError;

/// What a single change did to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    Created {
        pipeline_id: PipelineId,
        warnings: Vec<SoftFailure>,
    },
    /// The entity already had a live pipeline node; it was refreshed.
    Revived {
        pipeline_id: PipelineId,
        warnings: Vec<SoftFailure>,
    },
    Updated {
        pipeline_id: PipelineId,
        warnings: Vec<SoftFailure>,
    },
    Removed {
        pipeline_id: PipelineId,
    },
    /// The node is hierarchy-immutable; its tracking identity now reads
    /// `removed` instead of the node being deleted.
    FlaggedRemoved {
        pipeline_id: PipelineId,
    },
    Ignored {
        reason: String,
    },
    /// A retirement event for an entity that is still live.
    Stale,
}

impl ChangeOutcome {
    pub fn pipeline_id(&self) -> Option<&PipelineId> {
        match self {
            ChangeOutcome::Created { pipeline_id, .. }
            | ChangeOutcome::Revived { pipeline_id, .. }
            | ChangeOutcome::Updated { pipeline_id, .. }
            | ChangeOutcome::Removed { pipeline_id }
            | ChangeOutcome::FlaggedRemoved { pipeline_id } => Some(pipeline_id),
            ChangeOutcome::Ignored { .. } | ChangeOutcome::Stale => None,
        }
    }

    pub fn warnings(&self) -> &[SoftFailure] {
        match self {
            ChangeOutcome::Created { warnings, .. }
            | ChangeOutcome::Revived { warnings, .. }
            | ChangeOutcome::Updated { warnings, .. } => warnings,
            _ => &[],
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        ChangeOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn id_filter(id: i64) -> [Filter; 1] {
    [Filter::is("id", id)]
}

/// Live record of `target`, projected. `None` if it no longer exists.
fn fetch_projected(
    session: &dyn TrackingSession,
    target: &TrackingRef,
    kind: EntityKind,
    config: &SyncConfig,
) -> Result<Option<ProjectedEntity>, SyncError> {
    let fields = projection_fields(kind, config);
    let Some(record) = session.find_one(kind.as_str(), &id_filter(target.id), &fields)? else {
        return Ok(None);
    };
    project_record(&record, kind, config).map(Some)
}

fn tracked_of(projected: &ProjectedEntity) -> Result<&TrackedFields, SyncError> {
    projected
        .tracked()
        .ok_or_else(|| SyncError::UnsupportedEntityType(projected.kind().as_str().to_owned()))
}

/// Write the pipeline id and a `Synced` status back, skipping unchanged fields.
fn write_back(
    session: &mut dyn TrackingSession,
    tracked: &TrackedFields,
    pipeline_id: &PipelineId,
) -> Result<(), SyncError> {
    let mut data = Fields::new();
    if tracked.target_id.as_ref() != Some(pipeline_id) {
        data.insert(PIPELINE_ID_FIELD.to_owned(), Value::from(pipeline_id.as_str()));
    }
    if tracked.sync_status != Some(SyncStatus::Synced) {
        data.insert(
            SYNC_STATUS_FIELD.to_owned(),
            Value::from(SyncStatus::Synced.as_str()),
        );
    }
    if data.is_empty() {
        return Ok(());
    }
    session.update(&tracked.source.entity_type, tracked.source.id, data)?;
    Ok(())
}

/// Pipeline id cached on the tracking record `parent`, if it has one.
fn cached_pipeline_id(
    session: &dyn TrackingSession,
    parent: &TrackingRef,
) -> Result<Option<PipelineId>, SyncError> {
    let fields = [PIPELINE_ID_FIELD.to_owned()];
    Ok(session
        .find_one(&parent.entity_type, &id_filter(parent.id), &fields)?
        .and_then(|r| r.get_str(PIPELINE_ID_FIELD).map(PipelineId::from)))
}

/// Pipeline node the projected entity should hang from.
fn resolve_parent(
    hub: &mut dyn EntityHub,
    session: &dyn TrackingSession,
    projected: &ProjectedEntity,
) -> Result<PipelineId, SyncError> {
    match projected.parent() {
        ParentRef::ProjectRoot => Ok(hub.project_entity().id.clone()),
        ParentRef::Category(name) => {
            let label = match projected {
                ProjectedEntity::Folder(f) => f.asset_category.clone(),
                _ => None,
            };
            let category = CategoryEntity {
                label: label.unwrap_or_else(|| name.clone()),
                name,
            };
            find_or_create_category(hub, &category)
        }
        ParentRef::Entity(parent) => {
            let source = tracked_of(projected)?.source.clone();
            let missing = || SyncError::ParentNotInPipeline {
                entity: source.clone(),
                parent: parent.clone(),
            };
            let parent_kind: EntityKind = parent
                .entity_type
                .parse()
                .map_err(|_| SyncError::UnsupportedEntityType(parent.entity_type.clone()))?;
            let Some(cached) = cached_pipeline_id(session, &parent)? else {
                return Err(missing());
            };
            hub.get_or_query_entity_by_id(&cached, &[parent_kind.pipeline_kind()])?
                .ok_or_else(missing)
        }
    }
}

/// Commit, dropping every pending mutation if the flush fails.
pub(crate) fn commit_or_discard(hub: &mut dyn EntityHub) -> Result<(), SyncError> {
    if let Err(e) = hub.commit_changes() {
        error!(project = %hub.project_name(), "commit failed, discarding pending changes: {e}");
        hub.discard_changes();
        return Err(e.into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Create the pipeline node for a new or revived tracking entity.
///
/// An entity whose cached pipeline node still exists is refreshed in place,
/// and so is a same-named sibling under the resolved parent, so a stale or
/// cleared pipeline id never produces a duplicate. A missing parent fails
/// with [`SyncError::ParentNotInPipeline`] before anything is added to the
/// hub. Any failure drops the uncommitted hub work of this call.
pub fn create_from_event(
    target: &TrackingRef,
    kind: EntityKind,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
    config: &SyncConfig,
) -> Result<ChangeOutcome, SyncError> {
    if kind == EntityKind::Version {
        return Ok(ChangeOutcome::ignored(
            "versions are published from the pipeline side",
        ));
    }
    let Some(projected) = fetch_projected(&*session, target, kind, config)? else {
        warn!(entity = %target, "entity no longer exists in tracking, aborting");
        return Ok(ChangeOutcome::ignored("entity no longer exists in tracking"));
    };

    let outcome = create_or_bind(target, &projected, session, hub);
    if outcome.is_err() {
        hub.discard_changes();
    }
    outcome
}

fn create_or_bind(
    target: &TrackingRef,
    projected: &ProjectedEntity,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
) -> Result<ChangeOutcome, SyncError> {
    let tracked = tracked_of(projected)?;
    let kind = projected.pipeline_kind();

    if let Some(cached) = &tracked.target_id {
        if let Some(id) = hub.get_or_query_entity_by_id(cached, &[kind])? {
            info!(entity = %target, pipeline_id = %id, "entity exists in pipeline, refreshing");
            let entity = hub
                .entity_mut(&id)
                .ok_or_else(|| HubError::NotFound(id.clone()))?;
            if check_identity(entity, &tracked.source) != IdentityCheck::Match {
                write_identity(entity, &tracked.source);
            }
            return refresh(id, projected, tracked, session, hub);
        }
        debug!(pipeline_id = %cached, "cached pipeline id not found, matching by name");
    }

    let parent_id = resolve_parent(hub, &*session, projected)?;
    if let Some(id) = find_child_by_name(hub, &parent_id, projected.name(), kind)? {
        let entity = hub
            .entity_mut(&id)
            .ok_or_else(|| HubError::NotFound(id.clone()))?;
        match check_identity(entity, &tracked.source) {
            IdentityCheck::Mismatch { stored } => {
                error!(
                    pipeline_id = %id,
                    stored = %stored,
                    entity = %target,
                    "same-named pipeline node belongs to another tracking entity"
                );
                return Err(SyncError::IdentityMismatch {
                    pipeline_id: id,
                    stored,
                    expected: tracked.source.id.to_string(),
                });
            }
            IdentityCheck::Unclaimed => {
                info!(entity = %target, pipeline_id = %id, "claiming same-named pipeline node");
                write_identity(entity, &tracked.source);
            }
            IdentityCheck::Match => {
                info!(entity = %target, pipeline_id = %id, "bound by name, refreshing");
            }
        }
        return refresh(id, projected, tracked, session, hub);
    }

    let Some(id) = projected.materialize(hub, &parent_id)? else {
        warn!(entity = %target, parent = %parent_id, "entity cannot be created under its parent");
        hub.discard_changes();
        return Ok(ChangeOutcome::ignored("entity cannot be created under its parent"));
    };
    let statuses = hub.status_table();
    let warnings = apply_soft_features(hub, &id, projected, &statuses);
    hub.commit_changes()?;
    write_back(session, tracked, &id)?;

    Ok(ChangeOutcome::Created {
        pipeline_id: id,
        warnings,
    })
}

/// Merge onto an existing node, commit, and write the binding back.
fn refresh(
    id: PipelineId,
    projected: &ProjectedEntity,
    tracked: &TrackedFields,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
) -> Result<ChangeOutcome, SyncError> {
    let statuses = hub.status_table();
    let warnings = merge_into(hub, &id, projected, &statuses)?;
    hub.commit_changes()?;
    write_back(session, tracked, &id)?;
    Ok(ChangeOutcome::Revived {
        pipeline_id: id,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Whether the tracking parent of `projected` differs from the pipeline
/// parent of `entity`.
fn parent_moved(
    hub: &dyn EntityHub,
    session: &dyn TrackingSession,
    entity: &PipelineEntity,
    projected: &ProjectedEntity,
) -> Result<bool, SyncError> {
    let current = entity.parent_id.as_ref();
    let moved = match projected.parent() {
        ParentRef::ProjectRoot => current != Some(&hub.project_entity().id),
        ParentRef::Category(name) => current
            .and_then(|p| hub.entity(p))
            .map_or(true, |parent| parent.name.to_lowercase() != name.to_lowercase()),
        ParentRef::Entity(parent) => cached_pipeline_id(session, &parent)?.as_ref() != current,
    };
    Ok(moved)
}

/// First restricted tracking field the update would change on node `id`.
///
/// The field named by the event counts even when its value looks unchanged;
/// a differing name or parent counts whatever field the event names.
fn restricted_change(
    hub: &dyn EntityHub,
    session: &dyn TrackingSession,
    id: &PipelineId,
    projected: &ProjectedEntity,
    changed_field: Option<&str>,
    config: &SyncConfig,
) -> Result<Option<String>, SyncError> {
    let entity = hub.entity(id).ok_or_else(|| HubError::NotFound(id.clone()))?;
    let tracked = tracked_of(projected)?;
    let kind = projected.kind();

    let mut changed: Vec<&str> = changed_field.into_iter().collect();
    if entity.name != tracked.name {
        changed.push(kind.name_field());
    }
    if let Some(field) = parent_field(kind, config) {
        if parent_moved(hub, session, entity, projected)? {
            changed.push(field);
        }
    }
    Ok(changed
        .into_iter()
        .find(|f| config.restricted_fields.contains(*f))
        .map(str::to_owned))
}

/// Refresh name, label, attributes and soft features of a bound node.
///
/// `changed_field` is the tracking field named by the event, if any. On a
/// hierarchy-immutable node the update is refused if that field, or the
/// name or parent field the tracking record actually changed, is restricted.
pub fn update_from_event(
    target: &TrackingRef,
    kind: EntityKind,
    changed_field: Option<&str>,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
    config: &SyncConfig,
) -> Result<ChangeOutcome, SyncError> {
    let Some(projected) = fetch_projected(&*session, target, kind, config)? else {
        warn!(entity = %target, "entity no longer exists in tracking, nothing to update");
        return Ok(ChangeOutcome::ignored("entity no longer exists in tracking"));
    };
    let tracked = tracked_of(&projected)?;
    let Some(cached) = &tracked.target_id else {
        info!(entity = %target, "no pipeline id yet, creating instead");
        return create_from_event(target, kind, session, hub, config);
    };

    let id = hub
        .get_or_query_entity_by_id(cached, &[projected.pipeline_kind()])?
        .ok_or_else(|| SyncError::CounterpartMissing {
            entity: tracked.source.clone(),
            pipeline_id: cached.clone(),
        })?;

    if hub.entity(&id).is_some_and(|e| e.immutable_for_hierarchy) {
        let restricted =
            restricted_change(&*hub, &*session, &id, &projected, changed_field, config)?;
        if let Some(field) = restricted {
            warn!(pipeline_id = %id, field = %field, "restricted field changed on immutable node");
            return Err(SyncError::RestrictedField {
                pipeline_id: id,
                field,
            });
        }
    }

    let entity = hub
        .entity_mut(&id)
        .ok_or_else(|| HubError::NotFound(id.clone()))?;
    if let IdentityCheck::Mismatch { stored } = check_identity(entity, &tracked.source) {
        error!(pipeline_id = %id, stored = %stored, entity = %target, "tracking id mismatch");
        return Err(SyncError::IdentityMismatch {
            pipeline_id: id,
            stored,
            expected: tracked.source.id.to_string(),
        });
    }

    if entity.name != tracked.name {
        info!(pipeline_id = %id, from = %entity.name, to = %tracked.name, "renaming");
    }
    entity.name = tracked.name.clone();
    entity.label = Some(tracked.label.clone());
    write_identity(entity, &tracked.source);

    let statuses = hub.status_table();
    let warnings = merge_into(hub, &id, &projected, &statuses)?;
    commit_or_discard(hub)?;
    write_back(session, tracked, &id)?;

    Ok(ChangeOutcome::Updated {
        pipeline_id: id,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Remove
// ---------------------------------------------------------------------------

/// First protected node in the subtree rooted at `id`, `id` included.
fn find_protected(
    hub: &mut dyn EntityHub,
    id: &PipelineId,
) -> Result<Option<PipelineId>, SyncError> {
    let mut queue = VecDeque::from([id.clone()]);
    while let Some(current) = queue.pop_front() {
        if hub.entity(&current).is_some_and(PipelineEntity::is_protected) {
            return Ok(Some(current));
        }
        queue.extend(hub.children(&current)?);
    }
    Ok(None)
}

/// Delete, or flag as removed upstream, the node of a retired entity.
///
/// A node is only deleted when neither it nor anything below it is
/// protected; otherwise its tracking identity is replaced by the
/// `removed` sentinel and the subtree stays.
pub fn remove_from_event(
    target: &TrackingRef,
    kind: EntityKind,
    session: &dyn TrackingSession,
    hub: &mut dyn EntityHub,
) -> Result<ChangeOutcome, SyncError> {
    if kind == EntityKind::Version {
        return Ok(ChangeOutcome::ignored(
            "versions are owned by the pipeline side",
        ));
    }
    let fields = [PIPELINE_ID_FIELD.to_owned(), SYNC_STATUS_FIELD.to_owned()];
    let filters = id_filter(target.id);
    let record: Option<TrackingRecord> =
        match session.find_one_retired(kind.as_str(), &filters, &fields)? {
            Some(record) => Some(record),
            None => {
                if session.find_one(kind.as_str(), &filters, &fields)?.is_some() {
                    warn!(entity = %target, "entity is still live, ignoring stale retirement");
                    return Ok(ChangeOutcome::Stale);
                }
                warn!(entity = %target, "entity no longer exists in tracking");
                None
            }
        };

    let cached = record
        .as_ref()
        .and_then(|r| r.get_str(PIPELINE_ID_FIELD))
        .map(PipelineId::from)
        .ok_or_else(|| SyncError::MissingPipelineId {
            entity: target.clone(),
        })?;
    let id = hub
        .get_or_query_entity_by_id(&cached, &[kind.pipeline_kind()])?
        .ok_or_else(|| SyncError::CounterpartMissing {
            entity: target.clone(),
            pipeline_id: cached.clone(),
        })?;
    let entity = hub.entity(&id).ok_or_else(|| HubError::NotFound(id.clone()))?;

    match check_identity(entity, target) {
        IdentityCheck::Mismatch { stored } if stored == REMOVED_UPSTREAM => {
            info!(pipeline_id = %id, "already flagged as removed upstream");
            return Ok(ChangeOutcome::FlaggedRemoved { pipeline_id: id });
        }
        IdentityCheck::Mismatch { stored } => {
            error!(pipeline_id = %id, stored = %stored, entity = %target, "tracking id mismatch");
            return Err(SyncError::IdentityMismatch {
                pipeline_id: id,
                stored,
                expected: target.id.to_string(),
            });
        }
        IdentityCheck::Match | IdentityCheck::Unclaimed => {}
    }

    let outcome = match find_protected(hub, &id)? {
        Some(protected) => {
            info!(
                pipeline_id = %id,
                protected = %protected,
                "subtree is protected, flagging instead of deleting"
            );
            hub.entity_mut(&id)
                .ok_or_else(|| HubError::NotFound(id.clone()))?
                .attribs
                .set(TRACKING_ID_ATTRIB, REMOVED_UPSTREAM);
            ChangeOutcome::FlaggedRemoved { pipeline_id: id }
        }
        None => {
            info!(pipeline_id = %id, entity = %target, "deleting pipeline node");
            hub.delete_entity(&id)?;
            ChangeOutcome::Removed { pipeline_id: id }
        }
    };
    commit_or_discard(hub)?;
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
