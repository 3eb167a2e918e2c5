//! Error types for shotlink-sync.

use thiserror::Error;

use shotlink_core::{HubError, PipelineId, TrackingError, TrackingRef};

/// All errors that can escape a sync pass or an event reconciliation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("pipeline error: {0}")]
    Hub(#[from] HubError),

    #[error("entity type '{0}' is not supported by the sync")]
    UnsupportedEntityType(String),

    #[error("cannot parse tracking event type '{0}'")]
    UnknownEventType(String),

    #[error("no tracking project with {field} = '{code}'")]
    ProjectNotFound { field: String, code: String },

    /// The event targets a different project than the hub is bound to.
    #[error("event for project '{got}' delivered to hub of project '{expected}'")]
    ProjectMismatch { expected: String, got: String },

    /// The parent has no pipeline counterpart yet; a full project sync is needed.
    #[error("parent {parent} of {entity} does not exist in the pipeline, run a project sync")]
    ParentNotInPipeline {
        entity: TrackingRef,
        parent: TrackingRef,
    },

    #[error("{entity} points at pipeline entity {pipeline_id} which does not exist, run a project sync")]
    CounterpartMissing {
        entity: TrackingRef,
        pipeline_id: PipelineId,
    },

    /// Stored cross-system identity disagrees with the resolved one.
    #[error("pipeline entity {pipeline_id} belongs to tracking id '{stored}', expected '{expected}'")]
    IdentityMismatch {
        pipeline_id: PipelineId,
        stored: String,
        expected: String,
    },

    #[error("field '{field}' cannot change on hierarchy-immutable pipeline entity {pipeline_id}")]
    RestrictedField {
        pipeline_id: PipelineId,
        field: String,
    },

    #[error("{entity} has no pipeline id, nothing to remove")]
    MissingPipelineId { entity: TrackingRef },

    /// A pipeline ancestor that should exist in tracking carries no identity.
    #[error("parent {parent} of pipeline entity {pipeline_id} does not exist in tracking, run a project sync from the pipeline")]
    ParentNotInTracking {
        pipeline_id: PipelineId,
        parent: PipelineId,
    },

    #[error("pipeline entity {pipeline_id} points at {entity} which is not live in tracking")]
    TrackingCounterpartMissing {
        pipeline_id: PipelineId,
        entity: TrackingRef,
    },

    /// The tracking record is already bound to a different pipeline node.
    #[error("{entity} is bound to pipeline entity '{claimed_by}', not {pipeline_id}")]
    TrackingIdentityMismatch {
        entity: TrackingRef,
        pipeline_id: PipelineId,
        claimed_by: String,
    },

    #[error("tracking has no pipeline step '{task_type}'")]
    MissingStep { task_type: String },

    #[error("cannot parse pipeline event topic '{0}'")]
    UnknownTopic(String),

    /// A change event without an entity type or a positive entity id.
    #[error("change event carries no entity: {0}")]
    EmptyPayload(String),
}
