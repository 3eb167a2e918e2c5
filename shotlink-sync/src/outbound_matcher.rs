//! Reverse full-tree matcher: mirror a whole pipeline project into tracking.
//!
//! Breadth-first from the project root like [`match_hierarchy`](crate::match_hierarchy),
//! so every tracking parent exists before its children are created. Each
//! queue entry carries the tracking parent its node hangs from. Tracking
//! writes happen per node; the identities stamped on pipeline nodes are
//! committed once after the walk.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use shotlink_core::{
    EntityHub, EntityKind, Fields, HubError, PipelineEntity, PipelineId, PipelineKind,
    SyncConfig, SyncStatus, TrackingRecord, TrackingRef, TrackingSession, PIPELINE_ID_FIELD,
    SYNC_STATUS_FIELD,
};

use crate::matcher::{commit, MatchReport};
use crate::merge::write_identity;
use crate::outbound::{
    category_label, is_category, is_removed_upstream, stored_identity, Outbound,
};
use crate::projection::{projection_fields, ParentRef};
use crate::reconcile::id_filter;
use crate::SyncError;

struct Walk {
    queue: VecDeque<(ParentRef, PipelineId)>,
    processed: HashSet<PipelineId>,
    report: MatchReport,
}

impl Walk {
    fn seeded(hub: &mut dyn EntityHub, root: &PipelineId) -> Result<Self, SyncError> {
        let queue = hub
            .children(root)?
            .into_iter()
            .map(|child| (ParentRef::ProjectRoot, child))
            .collect();
        Ok(Self {
            queue,
            processed: HashSet::new(),
            report: MatchReport::default(),
        })
    }
}

/// Mirror every pipeline node of the hub's project into `project`.
///
/// Nodes that cannot be mirrored are listed in
/// [`MatchReport::unmirrored`] and their subtrees skipped; only tracking
/// read failures and the final project write escape as errors.
pub fn match_pipeline_hierarchy(
    hub: &mut dyn EntityHub,
    project: &TrackingRecord,
    session: &mut dyn TrackingSession,
    config: &SyncConfig,
) -> Result<MatchReport, SyncError> {
    info!(project = %hub.project_name(), "matching pipeline hierarchy");
    let out = Outbound::new(&*hub, project.reference(), config);
    let root = hub.project_entity().id.clone();

    let mut walk = Walk::seeded(hub, &root)?;
    while let Some((parent, id)) = walk.queue.pop_front() {
        visit(hub, session, &out, parent, id, &mut walk)?;
    }
    let mut report = walk.report;

    let root_entity = hub
        .entity_mut(&root)
        .ok_or_else(|| HubError::NotFound(root.clone()))?;
    write_identity(root_entity, &project.reference());
    let root_entity = root_entity.clone();
    commit(hub, &mut report);

    let mut data = out.changed_fields(
        &root_entity,
        EntityKind::Project,
        project,
        false,
        &mut report.warnings,
    );
    data.insert(
        SYNC_STATUS_FIELD.to_owned(),
        Value::from(report.status.as_str()),
    );
    session.update(EntityKind::Project.as_str(), project.id, data)?;

    info!(
        project = %hub.project_name(),
        status = %report.status,
        created = report.created,
        bound = report.bound,
        skipped = report.skipped,
        failed = report.failed.len(),
        unmirrored = report.unmirrored.len(),
        "pipeline hierarchy match finished"
    );
    Ok(report)
}

fn visit(
    hub: &mut dyn EntityHub,
    session: &mut dyn TrackingSession,
    out: &Outbound<'_>,
    parent: ParentRef,
    id: PipelineId,
    w: &mut Walk,
) -> Result<(), SyncError> {
    if !w.processed.insert(id.clone()) {
        warn!(pipeline_id = %id, "already processed in this pass, skipping");
        w.report.skipped += 1;
        return Ok(());
    }
    let Some(entity) = hub.entity(&id).cloned() else {
        warn!(pipeline_id = %id, "queued pipeline entity is gone, skipping");
        w.report.skipped += 1;
        return Ok(());
    };
    if entity.kind == PipelineKind::Version {
        return Ok(());
    }
    if is_removed_upstream(&entity) {
        debug!(pipeline_id = %id, "retired in tracking, subtree skipped");
        w.report.skipped += 1;
        return Ok(());
    }
    debug!(pipeline_id = %id, parent = ?parent, "visiting");

    let below = if is_category(&entity) {
        ParentRef::Category(category_label(&entity))
    } else {
        match out.tracking_kind(&entity) {
            None => parent,
            Some(kind) => match mirror(hub, session, out, &entity, kind, &parent, w)? {
                Some(record) => ParentRef::Entity(record),
                None => {
                    debug!(pipeline_id = %id, "no tracking record, children not queued");
                    w.report.skipped += 1;
                    return Ok(());
                }
            },
        }
    };

    for child in hub.children(&id)? {
        w.queue.push_back((below.clone(), child));
    }
    Ok(())
}

/// Bind `entity` to a tracking record, creating one if nothing matches.
fn mirror(
    hub: &mut dyn EntityHub,
    session: &mut dyn TrackingSession,
    out: &Outbound<'_>,
    entity: &PipelineEntity,
    kind: EntityKind,
    parent: &ParentRef,
    w: &mut Walk,
) -> Result<Option<TrackingRef>, SyncError> {
    let fields = projection_fields(kind, out.config);

    if let Some(stored) = stored_identity(entity, kind) {
        if let Some(record) = session.find_one(kind.as_str(), &id_filter(stored.id), &fields)? {
            if let Some(claimed_by) = record
                .get_str(PIPELINE_ID_FIELD)
                .filter(|claimed| *claimed != entity.id.as_str())
            {
                error!(
                    pipeline_id = %entity.id,
                    entity = %stored,
                    claimed_by,
                    "tracking record belongs to another pipeline entity"
                );
                flag_failed(session, &stored);
                w.report.fail(&stored);
                return Ok(None);
            }
            refresh(session, out, entity, kind, &record, w);
            w.report.bound += 1;
            return Ok(Some(stored));
        }
        debug!(pipeline_id = %entity.id, entity = %stored, "stored tracking record is not live, matching by name");
    }

    if let Some(record) = out.find_by_name(&*session, entity, kind, parent)? {
        debug!(pipeline_id = %entity.id, entity = %record.reference(), "claiming tracking record by name");
        claim(hub, entity, &record.reference())?;
        refresh(session, out, entity, kind, &record, w);
        w.report.bound += 1;
        return Ok(Some(record.reference()));
    }

    let data = match out.creation_fields(&*session, entity, kind, parent, &mut w.report.warnings) {
        Ok(data) => data,
        Err(e @ SyncError::MissingStep { .. }) => {
            error!(pipeline_id = %entity.id, "cannot create tracking record: {e}");
            w.report.unmirror(&entity.id);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    match session.create(kind.as_str(), data) {
        Ok(record) => {
            info!(
                pipeline_id = %entity.id,
                entity = %record.reference(),
                "created tracking record '{}'",
                entity.name
            );
            claim(hub, entity, &record.reference())?;
            w.report.created += 1;
            Ok(Some(record.reference()))
        }
        Err(e) => {
            error!(pipeline_id = %entity.id, entity_type = %kind, "cannot create tracking record: {e}");
            w.report.unmirror(&entity.id);
            Ok(None)
        }
    }
}

/// Stamp the tracking identity onto the working copy of `entity`.
fn claim(
    hub: &mut dyn EntityHub,
    entity: &PipelineEntity,
    record: &TrackingRef,
) -> Result<(), SyncError> {
    let node = hub
        .entity_mut(&entity.id)
        .ok_or_else(|| HubError::NotFound(entity.id.clone()))?;
    write_identity(node, record);
    Ok(())
}

/// Write whatever drifted on a bound record. Failures flag the record.
fn refresh(
    session: &mut dyn TrackingSession,
    out: &Outbound<'_>,
    entity: &PipelineEntity,
    kind: EntityKind,
    record: &TrackingRecord,
    w: &mut Walk,
) {
    let data = out.changed_fields(entity, kind, record, false, &mut w.report.warnings);
    if data.is_empty() {
        return;
    }
    if let Err(e) = session.update(&record.entity_type, record.id, data) {
        error!(entity = %record.reference(), "tracking update failed: {e}");
        w.report.fail(&record.reference());
    }
}

/// Mark a record `Failed`, leaving its pipeline id for an operator to inspect.
fn flag_failed(session: &mut dyn TrackingSession, target: &TrackingRef) {
    let mut data = Fields::new();
    data.insert(
        SYNC_STATUS_FIELD.to_owned(),
        Value::from(SyncStatus::Failed.as_str()),
    );
    if let Err(e) = session.update(&target.entity_type, target.id, data) {
        error!(entity = %target, "cannot flag tracking record: {e}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shotlink_core::{
        Attribs, MemoryHub, MemoryTracker, NewFolder, NewTask, TRACKING_ID_ATTRIB,
    };

    fn project_link() -> Value {
        json!({"type": "Project", "id": 1})
    }

    fn tracker() -> MemoryTracker {
        let mut t = MemoryTracker::default();
        t.insert(TrackingRecord::new("Project", 1).with("code", "ABC"));
        t.insert(
            TrackingRecord::new("Step", 1)
                .with("code", "Animation")
                .with("entity_type", "Shot"),
        );
        t
    }

    fn project(t: &MemoryTracker) -> TrackingRecord {
        t.record(&TrackingRef::new("Project", 1))
            .cloned()
            .expect("project")
    }

    fn folder(hub: &mut MemoryHub, parent: &PipelineId, folder_type: &str, name: &str) -> PipelineId {
        hub.add_new_folder(NewFolder {
            folder_type: folder_type.into(),
            name: name.into(),
            label: None,
            parent_id: parent.clone(),
            entity_id: None,
            attribs: Attribs::new(),
        })
        .expect("folder")
    }

    /// seq01 / sh010 / animation, committed.
    fn hub() -> (MemoryHub, PipelineId, PipelineId, PipelineId) {
        let mut hub = MemoryHub::new("ABC");
        let root = hub.project_entity().id.clone();
        let seq = folder(&mut hub, &root, "Sequence", "seq01");
        let shot = folder(&mut hub, &seq, "Shot", "sh010");
        let task = hub
            .add_new_task(NewTask {
                task_type: "Animation".into(),
                name: "animation".into(),
                label: None,
                parent_id: shot.clone(),
                entity_id: None,
                attribs: Attribs::new(),
            })
            .expect("task");
        hub.commit_changes().expect("commit");
        (hub, seq, shot, task)
    }

    fn tracking_ref(hub: &MemoryHub, id: &PipelineId, entity_type: &str) -> TrackingRef {
        let tracking_id = hub
            .persisted(id)
            .and_then(PipelineEntity::tracking_id)
            .expect("tracking id");
        TrackingRef::new(entity_type, tracking_id.parse().expect("numeric"))
    }

    #[test]
    fn first_pass_creates_records_top_down() {
        let mut t = tracker();
        let (mut hub, seq, shot, task) = hub();
        let p = project(&t);
        let report =
            match_pipeline_hierarchy(&mut hub, &p, &mut t, &SyncConfig::default()).expect("match");
        assert_eq!(report.status, SyncStatus::Synced, "{report:?}");
        assert_eq!(report.created, 3);

        let seq_ref = tracking_ref(&hub, &seq, "Sequence");
        let shot_ref = tracking_ref(&hub, &shot, "Shot");
        let shot_rec = t.record(&shot_ref).expect("shot");
        assert_eq!(shot_rec.get_str("code"), Some("sh010"));
        assert_eq!(shot_rec.get_link("sg_sequence"), Some(seq_ref));
        assert_eq!(shot_rec.get_str(PIPELINE_ID_FIELD), Some(shot.as_str()));

        let task_rec = t
            .record(&tracking_ref(&hub, &task, "Task"))
            .expect("task");
        assert_eq!(task_rec.get_link("entity"), Some(shot_ref));
        assert_eq!(task_rec.get("step").and_then(|s| s.get("id")), Some(&json!(1)));

        let project = t.record(&TrackingRef::new("Project", 1)).expect("project");
        assert_eq!(project.get_str(SYNC_STATUS_FIELD), Some("Synced"));
        assert_eq!(
            project.get_str(PIPELINE_ID_FIELD),
            Some(hub.project_entity().id.as_str())
        );
    }

    #[test]
    fn second_pass_binds_without_writes() {
        let mut t = tracker();
        let (mut hub, ..) = hub();
        let cfg = SyncConfig::default();
        let p = project(&t);
        match_pipeline_hierarchy(&mut hub, &p, &mut t, &cfg).expect("first");
        t.clear_write_log();

        let p = project(&t);
        let report = match_pipeline_hierarchy(&mut hub, &p, &mut t, &cfg).expect("second");
        assert_eq!(report.created, 0);
        assert_eq!(report.bound, 3);
        let targets: Vec<&TrackingRef> = t.write_log().iter().map(|w| &w.target).collect();
        assert_eq!(targets, vec![&TrackingRef::new("Project", 1)]);
    }

    #[test]
    fn existing_record_is_claimed_by_name() {
        let mut t = tracker();
        t.insert(
            TrackingRecord::new("Sequence", 2)
                .with("code", "SEQ01")
                .with("project", project_link()),
        );
        let (mut hub, seq, ..) = hub();
        let p = project(&t);
        let report =
            match_pipeline_hierarchy(&mut hub, &p, &mut t, &SyncConfig::default()).expect("match");
        assert_eq!(report.bound, 1);
        assert_eq!(report.created, 2);
        assert_eq!(
            tracking_ref(&hub, &seq, "Sequence"),
            TrackingRef::new("Sequence", 2)
        );
        let rec = t.record(&TrackingRef::new("Sequence", 2)).expect("seq");
        assert_eq!(rec.get_str(PIPELINE_ID_FIELD), Some(seq.as_str()));
    }

    #[test]
    fn record_claimed_by_another_node_is_flagged() {
        let mut t = tracker();
        t.insert(
            TrackingRecord::new("Sequence", 2)
                .with("code", "seq01")
                .with("project", project_link())
                .with(PIPELINE_ID_FIELD, "ffff"),
        );
        let (mut hub, seq, ..) = hub();
        hub.entity_mut(&seq)
            .expect("seq")
            .attribs
            .set(TRACKING_ID_ATTRIB, "2");
        let p = project(&t);
        let report =
            match_pipeline_hierarchy(&mut hub, &p, &mut t, &SyncConfig::default()).expect("match");

        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(report.failed, vec![TrackingRef::new("Sequence", 2)]);
        assert_eq!(report.created, 0, "subtree must not be mirrored");
        let rec = t.record(&TrackingRef::new("Sequence", 2)).expect("seq");
        assert_eq!(rec.get_str(SYNC_STATUS_FIELD), Some("Failed"));
        assert_eq!(rec.get_str(PIPELINE_ID_FIELD), Some("ffff"));
    }

    #[test]
    fn missing_step_leaves_task_unmirrored() {
        let mut t = MemoryTracker::default();
        t.insert(TrackingRecord::new("Project", 1).with("code", "ABC"));
        let (mut hub, _, shot, task) = hub();
        let p = project(&t);
        let report =
            match_pipeline_hierarchy(&mut hub, &p, &mut t, &SyncConfig::default()).expect("match");

        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(report.unmirrored, vec![task.clone()]);
        assert_eq!(report.created, 2);
        assert!(hub.persisted(&shot).and_then(PipelineEntity::tracking_id).is_some());
        assert!(hub.persisted(&task).and_then(PipelineEntity::tracking_id).is_none());
    }

    #[test]
    fn category_folders_become_asset_category_values() {
        let mut t = tracker();
        let mut hub = MemoryHub::new("ABC");
        let root = hub.project_entity().id.clone();
        let category = hub
            .add_new_folder(NewFolder {
                folder_type: "AssetCategory".into(),
                name: "Character".into(),
                label: Some("Character".into()),
                parent_id: root,
                entity_id: None,
                attribs: Attribs::new(),
            })
            .expect("category");
        let asset = folder(&mut hub, &category, "Asset", "hero");
        hub.commit_changes().expect("commit");

        let p = project(&t);
        let report =
            match_pipeline_hierarchy(&mut hub, &p, &mut t, &SyncConfig::default()).expect("match");
        assert_eq!(report.created, 1);
        let rec = t
            .record(&tracking_ref(&hub, &asset, "Asset"))
            .expect("asset");
        assert_eq!(rec.get_str("sg_asset_type"), Some("Character"));
        assert!(hub
            .persisted(&category)
            .and_then(PipelineEntity::tracking_id)
            .is_none());
    }

    #[test]
    fn duplicate_queue_entry_is_skipped() {
        let mut t = tracker();
        let (mut hub, seq, ..) = hub();
        let cfg = SyncConfig::default();
        let p = project(&t);
        let out = Outbound::new(&hub, p.reference(), &cfg);
        let root = hub.project_entity().id.clone();

        let mut walk = Walk::seeded(&mut hub, &root).expect("seed");
        walk.queue.push_back((ParentRef::ProjectRoot, seq));
        while let Some((parent, id)) = walk.queue.pop_front() {
            visit(&mut hub, &mut t, &out, parent, id, &mut walk).expect("visit");
        }
        assert_eq!(walk.report.created, 3);
        assert_eq!(walk.report.skipped, 1);
        assert_eq!(t.find("Sequence", &[], &[]).expect("find").len(), 1);
    }
}
