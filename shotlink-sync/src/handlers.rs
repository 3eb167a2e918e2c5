//! Entry points: a full-project pass in either direction, one tracking change,
//! one pipeline change.

use tracing::info;

use shotlink_core::{EntityHub, EntityKind, Filter, SyncConfig, TrackingRecord, TrackingSession};

use crate::events::{
    ChangeAction, ChangeEvent, PipelineAction, PipelineChange, ProjectSyncRequest, SyncSource,
};
use crate::matcher::{match_hierarchy, MatchReport};
use crate::outbound_matcher::match_pipeline_hierarchy;
use crate::outbound_reconcile::{
    create_tracking_from_event, remove_tracking_from_event, update_tracking_from_event,
    TrackingOutcome,
};
use crate::projection::projection_fields;
use crate::reconcile::{create_from_event, remove_from_event, update_from_event, ChangeOutcome};
use crate::SyncError;

/// Locate the tracking project whose code field equals `code`.
pub fn find_project(
    session: &dyn TrackingSession,
    code: &str,
    config: &SyncConfig,
) -> Result<TrackingRecord, SyncError> {
    let filters = [Filter::is(config.project_code_field.clone(), code)];
    let fields = projection_fields(EntityKind::Project, config);
    session
        .find_one(EntityKind::Project.as_str(), &filters, &fields)?
        .ok_or_else(|| SyncError::ProjectNotFound {
            field: config.project_code_field.clone(),
            code: code.to_owned(),
        })
}

fn check_project(hub: &dyn EntityHub, project_name: &str) -> Result<(), SyncError> {
    if hub.project_name() != project_name {
        return Err(SyncError::ProjectMismatch {
            expected: hub.project_name().to_owned(),
            got: project_name.to_owned(),
        });
    }
    Ok(())
}

/// Run the full-tree matcher for the requested project, in the direction
/// named by [`ProjectSyncRequest::source`].
pub fn process_project_sync(
    request: &ProjectSyncRequest,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
    config: &SyncConfig,
) -> Result<MatchReport, SyncError> {
    check_project(&*hub, &request.project_name)?;
    let project = find_project(&*session, &request.project_code, config)?;
    info!(project = %request.project_name, source = %request.source, "project sync");
    match request.source {
        SyncSource::Tracking => match_hierarchy(hub, &project, session, config),
        SyncSource::Pipeline => match_pipeline_hierarchy(hub, &project, session, config),
    }
}

/// Reconcile one tracking change against the pipeline hub.
///
/// `New` and `Revival` create, `Change` updates, `Retirement` removes. Events
/// for the project itself and for disabled or unknown types are ignored.
pub fn process_entity_change(
    event: &ChangeEvent,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
    config: &SyncConfig,
) -> Result<ChangeOutcome, SyncError> {
    event.validate()?;
    check_project(&*hub, &event.project_name)?;

    let Ok(kind) = event.entity_type.parse::<EntityKind>() else {
        info!(entity_type = %event.entity_type, "entity type is not synced, ignoring");
        return Ok(ChangeOutcome::Ignored {
            reason: format!("entity type '{}' is not synced", event.entity_type),
        });
    };
    if matches!(kind, EntityKind::Project | EntityKind::AssetCategory) || !config.is_enabled(kind)
    {
        info!(entity_type = %kind, "entity type is not enabled, ignoring");
        return Ok(ChangeOutcome::Ignored {
            reason: format!("entity type '{kind}' is not enabled"),
        });
    }

    let target = event.target();
    info!(
        project = %event.project_name,
        entity_type = %kind,
        entity_id = event.entity_id,
        action = %event.action,
        "processing change"
    );
    match event.action {
        ChangeAction::New | ChangeAction::Revival => {
            create_from_event(&target, kind, session, hub, config)
        }
        ChangeAction::Change => update_from_event(
            &target,
            kind,
            event.attribute_name.as_deref(),
            session,
            hub,
            config,
        ),
        ChangeAction::Retirement => remove_from_event(&target, kind, &*session, hub),
    }
}

/// Mirror one pipeline change into tracking.
pub fn process_pipeline_change(
    change: &PipelineChange,
    session: &mut dyn TrackingSession,
    hub: &mut dyn EntityHub,
    config: &SyncConfig,
) -> Result<TrackingOutcome, SyncError> {
    change.validate()?;
    check_project(&*hub, &change.project_name)?;
    let project = find_project(&*session, &change.project_code, config)?;

    info!(
        project = %change.project_name,
        pipeline_id = %change.pipeline_id,
        action = %change.action,
        "processing pipeline change"
    );
    match change.action {
        PipelineAction::Create => {
            create_tracking_from_event(&change.pipeline_id, &project, session, hub, config)
        }
        PipelineAction::Update => {
            update_tracking_from_event(&change.pipeline_id, &project, session, hub, config)
        }
        PipelineAction::Delete => remove_tracking_from_event(
            &change.pipeline_id,
            change.tracking.as_ref(),
            session,
            hub,
            config,
        ),
    }
}
