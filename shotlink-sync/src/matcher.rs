//! Full-tree matcher: mirror a whole tracking project into the pipeline hub.
//!
//! The walk is breadth-first from the project root, so every parent is bound
//! to a pipeline node before any of its children is dequeued. Pipeline
//! mutations are buffered in the hub and committed once after the walk;
//! tracking writes happen eagerly, per node, and only when something changed.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use shotlink_core::{
    EntityHub, EntityKind, Fields, HubError, PipelineId, StatusTable, SyncConfig, SyncStatus,
    TrackingRecord, TrackingRef, TrackingSession, PIPELINE_ID_FIELD, SYNC_STATUS_FIELD,
};

use crate::materialize::{find_child_by_name, Materialize};
use crate::merge::{
    apply_attributes, apply_soft_features, check_identity, collect_attributes, merge_into,
    write_identity, IdentityCheck, SoftFailure, SoftFeature,
};
use crate::projection::{NodeKey, ProjectedEntity, PROJECT_STATUS_FIELD};
use crate::resolver::{resolve_hierarchy, Hierarchy};
use crate::SyncError;

/// Outcome of one full-tree pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchReport {
    /// Project-level status, also written to the tracking project.
    pub status: SyncStatus,
    /// Pipeline nodes created in this pass.
    pub created: usize,
    /// Entities bound to an existing pipeline node.
    pub bound: usize,
    /// Entities left out of this pass (duplicates, uncreatable nodes).
    pub skipped: usize,
    /// Tracking entities flagged `Failed` in this pass.
    pub failed: Vec<TrackingRef>,
    /// Pipeline nodes that could not be mirrored into tracking (reverse pass).
    pub unmirrored: Vec<PipelineId>,
    pub warnings: Vec<SoftFailure>,
    pub commit_errors: Vec<String>,
}

impl MatchReport {
    pub(crate) fn fail(&mut self, source: &TrackingRef) {
        self.status = SyncStatus::Failed;
        self.failed.push(source.clone());
    }

    pub(crate) fn unmirror(&mut self, node: &PipelineId) {
        self.status = SyncStatus::Failed;
        self.unmirrored.push(node.clone());
    }
}

/// Per-invocation traversal state.
struct Traversal {
    queue: VecDeque<(PipelineId, NodeKey)>,
    processed: HashSet<NodeKey>,
    report: MatchReport,
}

impl Traversal {
    fn seeded(root: &PipelineId, hierarchy: &Hierarchy) -> Self {
        let queue = hierarchy
            .children_of(&NodeKey::Project)
            .iter()
            .map(|child| (root.clone(), child.clone()))
            .collect();
        Self {
            queue,
            processed: HashSet::new(),
            report: MatchReport::default(),
        }
    }
}

/// Mirror `project` and everything under it into `hub`.
///
/// Per-node problems are recorded in the returned report and never abort the
/// walk; only tracking read failures and a failed project write-back escape
/// as errors.
pub fn match_hierarchy(
    hub: &mut dyn EntityHub,
    project: &TrackingRecord,
    session: &mut dyn TrackingSession,
    config: &SyncConfig,
) -> Result<MatchReport, SyncError> {
    info!(project = %hub.project_name(), "matching tracking hierarchy");
    let hierarchy = resolve_hierarchy(&*session, project, config)?;
    let statuses = hub.status_table();
    let root = hub.project_entity().id.clone();

    let mut traversal = Traversal::seeded(&root, &hierarchy);
    walk(hub, session, &hierarchy, &statuses, &mut traversal)?;
    let mut report = traversal.report;

    commit(hub, &mut report);
    sync_project_root(hub, project, config, &mut report)?;
    commit(hub, &mut report);

    let mut data = Fields::new();
    data.insert(PIPELINE_ID_FIELD.to_owned(), Value::from(root.as_str()));
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
        "hierarchy match finished"
    );
    Ok(report)
}

/// Drain the queue in FIFO order.
fn walk(
    hub: &mut dyn EntityHub,
    session: &mut dyn TrackingSession,
    hierarchy: &Hierarchy,
    statuses: &StatusTable,
    t: &mut Traversal,
) -> Result<(), SyncError> {
    while let Some((parent_id, key)) = t.queue.pop_front() {
        visit(hub, session, hierarchy, statuses, &parent_id, key, t)?;
    }
    Ok(())
}

fn visit(
    hub: &mut dyn EntityHub,
    session: &mut dyn TrackingSession,
    hierarchy: &Hierarchy,
    statuses: &StatusTable,
    parent_id: &PipelineId,
    key: NodeKey,
    t: &mut Traversal,
) -> Result<(), SyncError> {
    if !t.processed.insert(key.clone()) {
        warn!(entity = ?key, "already processed in this pass, skipping");
        t.report.skipped += 1;
        return Ok(());
    }
    let Some(projected) = hierarchy.get(&key) else {
        warn!(entity = ?key, "no projection for queued entity, skipping");
        t.report.skipped += 1;
        return Ok(());
    };
    debug!(entity = ?key, parent = %parent_id, "visiting");

    let mut sync_status = SyncStatus::Synced;
    let node = match bind_existing(hub, parent_id, projected)? {
        Some(id) => {
            t.report.bound += 1;
            if let Some(tracked) = projected.tracked() {
                let entity = hub
                    .entity_mut(&id)
                    .ok_or_else(|| HubError::NotFound(id.clone()))?;
                match check_identity(entity, &tracked.source) {
                    IdentityCheck::Mismatch { stored } => {
                        error!(
                            pipeline_id = %id,
                            entity_type = %tracked.source.entity_type,
                            entity_id = tracked.source.id,
                            stored = %stored,
                            "pipeline node belongs to another tracking entity"
                        );
                        sync_status = SyncStatus::Failed;
                        t.report.fail(&tracked.source);
                    }
                    check => {
                        if check == IdentityCheck::Unclaimed {
                            debug!(pipeline_id = %id, "claiming unbound pipeline node");
                            write_identity(entity, &tracked.source);
                        }
                        let warnings = merge_into(hub, &id, projected, statuses)?;
                        t.report.warnings.extend(warnings);
                    }
                }
            }
            Some(id)
        }
        None => match projected.materialize(hub, parent_id) {
            Ok(Some(id)) => {
                t.report.created += 1;
                let warnings = apply_soft_features(hub, &id, projected, statuses);
                t.report.warnings.extend(warnings);
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                error!(entity = ?key, parent = %parent_id, "cannot create pipeline node: {e}");
                if let Some(tracked) = projected.tracked() {
                    t.report.fail(&tracked.source);
                }
                None
            }
        },
    };

    let Some(node) = node else {
        debug!(entity = ?key, "no pipeline node, children not queued");
        t.report.skipped += 1;
        return Ok(());
    };

    if let Some(tracked) = projected.tracked() {
        let mut data = Fields::new();
        if sync_status == SyncStatus::Synced && tracked.target_id.as_ref() != Some(&node) {
            data.insert(PIPELINE_ID_FIELD.to_owned(), Value::from(node.as_str()));
        }
        if tracked.sync_status != Some(sync_status) {
            data.insert(
                SYNC_STATUS_FIELD.to_owned(),
                Value::from(sync_status.as_str()),
            );
        }
        if !data.is_empty() {
            if let Err(e) = session.update(&tracked.source.entity_type, tracked.source.id, data) {
                error!(entity = %tracked.source, "tracking write-back failed: {e}");
                t.report.fail(&tracked.source);
            }
        }
    }

    for child in hierarchy.children_of(&key) {
        t.queue.push_back((node.clone(), child.clone()));
    }
    Ok(())
}

/// Existing pipeline node for `projected`: cached id first, then by name
/// among the children of `parent_id`.
fn bind_existing(
    hub: &mut dyn EntityHub,
    parent_id: &PipelineId,
    projected: &ProjectedEntity,
) -> Result<Option<PipelineId>, SyncError> {
    let kind = projected.pipeline_kind();
    if let Some(target) = projected.tracked().and_then(|t| t.target_id.as_ref()) {
        if let Some(id) = hub.get_or_query_entity_by_id(target, &[kind])? {
            return Ok(Some(id));
        }
        debug!(pipeline_id = %target, "cached pipeline id not found, matching by name");
    }
    find_child_by_name(hub, parent_id, projected.name(), kind)
}

/// Copy identity, mapped attributes and status onto the pipeline project.
fn sync_project_root(
    hub: &mut dyn EntityHub,
    project: &TrackingRecord,
    config: &SyncConfig,
    report: &mut MatchReport,
) -> Result<(), SyncError> {
    let root = hub.project_entity().id.clone();
    let attributes = collect_attributes(project, &config.attribute_map);
    let entity = hub
        .entity_mut(&root)
        .ok_or_else(|| HubError::NotFound(root.clone()))?;
    write_identity(entity, &project.reference());
    apply_attributes(entity, &attributes);

    if let Some(status) = project.get_str(PROJECT_STATUS_FIELD) {
        if let Err(e) = hub.set_status(&root, status) {
            warn!(project = %hub.project_name(), "cannot set project status: {e}");
            report.warnings.push(SoftFailure {
                feature: SoftFeature::Status,
                entity: root,
                message: e.to_string(),
            });
        }
    }
    Ok(())
}

pub(crate) fn commit(hub: &mut dyn EntityHub, report: &mut MatchReport) {
    if let Err(e) = hub.commit_changes() {
        error!(project = %hub.project_name(), "commit failed: {e}");
        report.commit_errors.push(e.to_string());
        report.status = SyncStatus::Failed;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
