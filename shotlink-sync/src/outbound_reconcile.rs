//! Reverse event reconciler: create, update and retire one tracking record
//! from a single pipeline change.
//!
//! As in the forward direction, identity problems are hard errors.

use tracing::{debug, info, warn};

use shotlink_core::{
    EntityHub, EntityKind, HubError, PipelineEntity, PipelineId, PipelineKind, SyncConfig,
    TrackingRecord, TrackingRef, TrackingSession, PIPELINE_ID_FIELD,
};

use crate::merge::{write_identity, SoftFailure};
use crate::outbound::{is_category, is_removed_upstream, stored_identity, Outbound};
use crate::projection::projection_fields;
use crate::reconcile::{commit_or_discard, id_filter};
use crate::SyncError;

/// What a single pipeline change did to tracking.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingOutcome {
    Created {
        entity: TrackingRef,
        warnings: Vec<SoftFailure>,
    },
    /// A live record already mirrored the node, or was claimed by name.
    Bound {
        entity: TrackingRef,
    },
    Updated {
        entity: TrackingRef,
        warnings: Vec<SoftFailure>,
    },
    Retired {
        entity: TrackingRef,
    },
    Ignored {
        reason: String,
    },
    /// A deletion for a node that still exists.
    Stale,
}

impl TrackingOutcome {
    pub fn entity(&self) -> Option<&TrackingRef> {
        match self {
            TrackingOutcome::Created { entity, .. }
            | TrackingOutcome::Bound { entity }
            | TrackingOutcome::Updated { entity, .. }
            | TrackingOutcome::Retired { entity } => Some(entity),
            TrackingOutcome::Ignored { .. } | TrackingOutcome::Stale => None,
        }
    }

    pub fn warnings(&self) -> &[SoftFailure] {
        match self {
            TrackingOutcome::Created { warnings, .. } | TrackingOutcome::Updated { warnings, .. } => {
                warnings
            }
            _ => &[],
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        TrackingOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

/// The changed node with its tracking kind, or why the change is ignored.
fn trackable(
    hub: &mut dyn EntityHub,
    out: &Outbound<'_>,
    pipeline_id: &PipelineId,
) -> Result<Result<(PipelineEntity, EntityKind), TrackingOutcome>, SyncError> {
    let found =
        hub.get_or_query_entity_by_id(pipeline_id, &[PipelineKind::Folder, PipelineKind::Task])?;
    let Some(entity) = found.and_then(|id| hub.entity(&id).cloned()) else {
        return Ok(Err(TrackingOutcome::ignored(format!(
            "no pipeline folder or task {pipeline_id}"
        ))));
    };
    if is_removed_upstream(&entity) {
        return Ok(Err(TrackingOutcome::ignored("retired in tracking")));
    }
    if is_category(&entity) {
        return Ok(Err(TrackingOutcome::ignored(
            "asset categories have no tracking record",
        )));
    }
    match out.tracking_kind(&entity) {
        Some(kind) => Ok(Ok((entity, kind))),
        None => Ok(Err(TrackingOutcome::ignored(format!(
            "{} type '{}' is not synced",
            entity.kind, entity.entity_type
        )))),
    }
}

/// Reject a tracking record already bound to a different node.
fn check_claim(record: &TrackingRecord, entity: &PipelineEntity) -> Result<(), SyncError> {
    match record.get_str(PIPELINE_ID_FIELD) {
        Some(claimed) if claimed != entity.id.as_str() => Err(SyncError::TrackingIdentityMismatch {
            entity: record.reference(),
            pipeline_id: entity.id.clone(),
            claimed_by: claimed.to_owned(),
        }),
        _ => Ok(()),
    }
}

fn claim(
    hub: &mut dyn EntityHub,
    entity: &PipelineEntity,
    record: &TrackingRef,
) -> Result<(), SyncError> {
    let node = hub
        .entity_mut(&entity.id)
        .ok_or_else(|| HubError::NotFound(entity.id.clone()))?;
    write_identity(node, record);
    commit_or_discard(hub)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Mirror a new pipeline node into tracking.
///
/// A node whose stored identity points at a live record is only bound. Next
/// comes an unclaimed same-named record under the same tracking parent, and
/// only then a new record.
pub fn create_tracking_from_event(
    pipeline_id: &PipelineId,
    project: &TrackingRecord,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
    config: &SyncConfig,
) -> Result<TrackingOutcome, SyncError> {
    let out = Outbound::new(&*hub, project.reference(), config);
    let (entity, kind) = match trackable(hub, &out, pipeline_id)? {
        Ok(found) => found,
        Err(outcome) => return Ok(outcome),
    };

    if let Some(stored) = stored_identity(&entity, kind) {
        let fields = projection_fields(kind, config);
        if let Some(record) = session.find_one(kind.as_str(), &id_filter(stored.id), &fields)? {
            check_claim(&record, &entity)?;
            warn!(pipeline_id = %entity.id, entity = %stored, "already mirrored in tracking");
            return Ok(TrackingOutcome::Bound { entity: stored });
        }
        debug!(pipeline_id = %entity.id, entity = %stored, "stored tracking record is not live");
    }

    let parent = out.tracking_parent(&*hub, &entity)?;
    let mut warnings = vec![];

    if let Some(record) = out.find_by_name(&*session, &entity, kind, &parent)? {
        let data = out.changed_fields(&entity, kind, &record, false, &mut warnings);
        if !data.is_empty() {
            session.update(&record.entity_type, record.id, data)?;
        }
        claim(hub, &entity, &record.reference())?;
        info!(pipeline_id = %entity.id, entity = %record.reference(), "bound to existing tracking record");
        return Ok(TrackingOutcome::Bound {
            entity: record.reference(),
        });
    }

    let data = out.creation_fields(&*session, &entity, kind, &parent, &mut warnings)?;
    let record = session.create(kind.as_str(), data)?;
    claim(hub, &entity, &record.reference())?;
    info!(
        pipeline_id = %entity.id,
        entity = %record.reference(),
        "created tracking record '{}'",
        entity.name
    );
    Ok(TrackingOutcome::Created {
        entity: record.reference(),
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Push name, attributes and status of a changed node to its tracking record.
///
/// A node with no tracking identity yet is created instead.
pub fn update_tracking_from_event(
    pipeline_id: &PipelineId,
    project: &TrackingRecord,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
    config: &SyncConfig,
) -> Result<TrackingOutcome, SyncError> {
    let out = Outbound::new(&*hub, project.reference(), config);
    let (entity, kind) = match trackable(hub, &out, pipeline_id)? {
        Ok(found) => found,
        Err(outcome) => return Ok(outcome),
    };

    let Some(stored) = stored_identity(&entity, kind) else {
        debug!(pipeline_id = %entity.id, "no tracking identity yet, creating");
        return create_tracking_from_event(pipeline_id, project, session, hub, config);
    };
    let fields = projection_fields(kind, config);
    let record = session
        .find_one(kind.as_str(), &id_filter(stored.id), &fields)?
        .ok_or_else(|| SyncError::TrackingCounterpartMissing {
            pipeline_id: entity.id.clone(),
            entity: stored.clone(),
        })?;
    check_claim(&record, &entity)?;

    let mut warnings = vec![];
    let data = out.changed_fields(&entity, kind, &record, true, &mut warnings);
    if data.is_empty() {
        debug!(entity = %stored, "tracking record already up to date");
    } else {
        session.update(&stored.entity_type, stored.id, data)?;
    }
    info!(pipeline_id = %entity.id, entity = %stored, "updated tracking record");
    Ok(TrackingOutcome::Updated {
        entity: stored,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Remove
// ---------------------------------------------------------------------------

/// Retire the tracking record of a deleted pipeline node.
///
/// `tracking` is the identity the node carried before it was deleted.
pub fn remove_tracking_from_event(
    pipeline_id: &PipelineId,
    tracking: Option<&TrackingRef>,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
    config: &SyncConfig,
) -> Result<TrackingOutcome, SyncError> {
    let Some(target) = tracking else {
        warn!(pipeline_id = %pipeline_id, "deleted entity carried no tracking identity");
        return Ok(TrackingOutcome::ignored("no tracking identity to retire"));
    };
    if hub
        .get_or_query_entity_by_id(pipeline_id, &[PipelineKind::Folder, PipelineKind::Task])?
        .is_some()
    {
        warn!(pipeline_id = %pipeline_id, "pipeline entity still exists, not retiring");
        return Ok(TrackingOutcome::Stale);
    }
    let trackable = target
        .entity_type
        .parse::<EntityKind>()
        .is_ok_and(|kind| {
            ((kind.is_folder_like() && kind != EntityKind::AssetCategory) || kind == EntityKind::Task)
                && config.is_enabled(kind)
        });
    if !trackable {
        return Ok(TrackingOutcome::ignored(format!(
            "entity type '{}' is not synced",
            target.entity_type
        )));
    }

    let fields = [PIPELINE_ID_FIELD.to_owned()];
    let Some(record) = session.find_one(&target.entity_type, &id_filter(target.id), &fields)? else {
        info!(entity = %target, "tracking record is not live, nothing to retire");
        return Ok(TrackingOutcome::ignored(format!("{target} is not live")));
    };
    if let Some(claimed) = record
        .get_str(PIPELINE_ID_FIELD)
        .filter(|claimed| *claimed != pipeline_id.as_str())
    {
        return Err(SyncError::TrackingIdentityMismatch {
            entity: target.clone(),
            pipeline_id: pipeline_id.clone(),
            claimed_by: claimed.to_owned(),
        });
    }

    if !session.delete(&target.entity_type, target.id)? {
        return Ok(TrackingOutcome::ignored(format!("{target} is not live")));
    }
    info!(pipeline_id = %pipeline_id, entity = %target, "retired tracking record");
    Ok(TrackingOutcome::Retired {
        entity: target.clone(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shotlink_core::{
        Attribs, MemoryHub, MemoryTracker, NewFolder, ProjectStatus, SYNC_STATUS_FIELD,
        TRACKING_ID_ATTRIB, TRACKING_TYPE_ATTRIB,
    };

    fn tracker() -> MemoryTracker {
        let mut t = MemoryTracker::default();
        t.insert(TrackingRecord::new("Project", 1).with("code", "ABC"));
        t.insert(
            TrackingRecord::new("Sequence", 2)
                .with("code", "seq01")
                .with("project", json!({"type": "Project", "id": 1})),
        );
        t
    }

    fn project(t: &MemoryTracker) -> TrackingRecord {
        t.record(&TrackingRef::new("Project", 1))
            .cloned()
            .expect("project")
    }

    /// seq01 bound to Sequence 2, committed.
    fn hub() -> (MemoryHub, PipelineId) {
        let mut hub = MemoryHub::new("ABC")
            .with_statuses(vec![ProjectStatus::new("In progress", "ip")]);
        let root = hub.project_entity().id.clone();
        let mut attribs = Attribs::new();
        attribs.set(TRACKING_ID_ATTRIB, "2");
        attribs.set(TRACKING_TYPE_ATTRIB, "Sequence");
        let seq = hub
            .add_new_folder(NewFolder {
                folder_type: "Sequence".into(),
                name: "seq01".into(),
                label: Some("seq01".into()),
                parent_id: root,
                entity_id: None,
                attribs,
            })
            .expect("seq");
        hub.commit_changes().expect("commit");
        (hub, seq)
    }

    fn add_shot(hub: &mut MemoryHub, parent: &PipelineId, name: &str) -> PipelineId {
        let id = hub
            .add_new_folder(NewFolder {
                folder_type: "Shot".into(),
                name: name.into(),
                label: None,
                parent_id: parent.clone(),
                entity_id: None,
                attribs: Attribs::new(),
            })
            .expect("shot");
        hub.commit_changes().expect("commit");
        id
    }

    #[test]
    fn create_links_new_record_to_tracking_parent() {
        let mut t = tracker();
        let (mut hub, seq) = hub();
        let shot = add_shot(&mut hub, &seq, "sh010");
        let p = project(&t);

        let outcome =
            create_tracking_from_event(&shot, &p, &mut t, &mut hub, &SyncConfig::default())
                .expect("create");
        let TrackingOutcome::Created { entity, .. } = outcome else {
            panic!("expected Created, got {outcome:?}");
        };
        let rec = t.record(&entity).expect("record");
        assert_eq!(rec.get_str("code"), Some("sh010"));
        assert_eq!(rec.get_link("sg_sequence"), Some(TrackingRef::new("Sequence", 2)));
        assert_eq!(rec.get_str(PIPELINE_ID_FIELD), Some(shot.as_str()));
        assert_eq!(
            hub.persisted(&shot).and_then(PipelineEntity::tracking_id),
            Some(entity.id.to_string())
        );
    }

    #[test]
    fn create_under_unmirrored_parent_fails() {
        let mut t = tracker();
        let (mut hub, seq) = hub();
        let sh010 = add_shot(&mut hub, &seq, "sh010");
        let child = hub
            .add_new_folder(NewFolder {
                folder_type: "Shot".into(),
                name: "sh010a".into(),
                label: None,
                parent_id: sh010.clone(),
                entity_id: None,
                attribs: Attribs::new(),
            })
            .expect("child");
        let p = project(&t);

        let err = create_tracking_from_event(&child, &p, &mut t, &mut hub, &SyncConfig::default())
            .unwrap_err();
        assert!(
            matches!(err, SyncError::ParentNotInTracking { ref parent, .. } if *parent == sh010),
            "got: {err}"
        );
        assert!(t.find("Shot", &[], &[]).expect("find").is_empty());
    }

    #[test]
    fn create_of_mirrored_node_only_binds() {
        let mut t = tracker();
        let (mut hub, seq) = hub();
        let p = project(&t);
        t.clear_write_log();

        let outcome = create_tracking_from_event(&seq, &p, &mut t, &mut hub, &SyncConfig::default())
            .expect("create");
        assert_eq!(
            outcome,
            TrackingOutcome::Bound {
                entity: TrackingRef::new("Sequence", 2)
            }
        );
        assert!(t.write_log().is_empty());
    }

    #[test]
    fn update_pushes_rename_and_status() {
        let mut t = tracker();
        let (mut hub, seq) = hub();
        {
            let node = hub.entity_mut(&seq).expect("seq");
            node.name = "seq99".into();
            node.status = Some("In progress".into());
        }
        hub.commit_changes().expect("commit");
        let p = project(&t);

        let outcome = update_tracking_from_event(&seq, &p, &mut t, &mut hub, &SyncConfig::default())
            .expect("update");
        assert!(matches!(outcome, TrackingOutcome::Updated { .. }), "{outcome:?}");
        let rec = t.record(&TrackingRef::new("Sequence", 2)).expect("seq");
        assert_eq!(rec.get_str("code"), Some("seq99"));
        assert_eq!(rec.get_str("sg_status_list"), Some("ip"));
        assert_eq!(rec.get_str(PIPELINE_ID_FIELD), Some(seq.as_str()));
        assert_eq!(rec.get_str(SYNC_STATUS_FIELD), Some("Synced"));
    }

    #[test]
    fn update_with_unmapped_status_warns() {
        let mut t = tracker();
        let (mut hub, seq) = hub();
        hub.entity_mut(&seq).expect("seq").status = Some("Omitted".into());
        let p = project(&t);

        let outcome = update_tracking_from_event(&seq, &p, &mut t, &mut hub, &SyncConfig::default())
            .expect("update");
        assert_eq!(outcome.warnings().len(), 1);
        let rec = t.record(&TrackingRef::new("Sequence", 2)).expect("seq");
        assert!(rec.get_str("sg_status_list").is_none());
    }

    #[test]
    fn update_of_retired_counterpart_fails() {
        let mut t = tracker();
        t.retire(&TrackingRef::new("Sequence", 2));
        let (mut hub, seq) = hub();
        let p = project(&t);

        let err = update_tracking_from_event(&seq, &p, &mut t, &mut hub, &SyncConfig::default())
            .unwrap_err();
        assert!(
            matches!(err, SyncError::TrackingCounterpartMissing { .. }),
            "got: {err}"
        );
    }

    #[test]
    fn update_refuses_record_bound_elsewhere() {
        let mut t = tracker();
        t.record_mut(&TrackingRef::new("Sequence", 2))
            .expect("seq")
            .fields
            .insert(PIPELINE_ID_FIELD.into(), json!("ffff"));
        let (mut hub, seq) = hub();
        let p = project(&t);

        let err = update_tracking_from_event(&seq, &p, &mut t, &mut hub, &SyncConfig::default())
            .unwrap_err();
        assert!(
            matches!(err, SyncError::TrackingIdentityMismatch { ref claimed_by, .. } if claimed_by == "ffff"),
            "got: {err}"
        );
    }

    #[test]
    fn remove_retires_only_after_the_node_is_gone() {
        let mut t = tracker();
        let (mut hub, seq) = hub();
        let target = TrackingRef::new("Sequence", 2);
        let cfg = SyncConfig::default();

        let outcome =
            remove_tracking_from_event(&seq, Some(&target), &mut t, &mut hub, &cfg).expect("remove");
        assert_eq!(outcome, TrackingOutcome::Stale);

        hub.delete_entity(&seq).expect("delete");
        hub.commit_changes().expect("commit");
        let outcome =
            remove_tracking_from_event(&seq, Some(&target), &mut t, &mut hub, &cfg).expect("remove");
        assert_eq!(outcome, TrackingOutcome::Retired { entity: target.clone() });
        assert!(t.record(&target).is_some());
        assert!(t
            .rows()
            .any(|row| row.record.reference() == target && row.retired));

        let outcome =
            remove_tracking_from_event(&seq, Some(&target), &mut t, &mut hub, &cfg).expect("again");
        assert!(matches!(outcome, TrackingOutcome::Ignored { .. }));
    }

    #[test]
    fn remove_without_identity_is_ignored() {
        let mut t = tracker();
        let (mut hub, _) = hub();
        let gone = PipelineId::from("0f0f");
        let outcome =
            remove_tracking_from_event(&gone, None, &mut t, &mut hub, &SyncConfig::default())
                .expect("remove");
        assert!(matches!(outcome, TrackingOutcome::Ignored { .. }));
        assert!(t.write_log().is_empty());
    }
}
