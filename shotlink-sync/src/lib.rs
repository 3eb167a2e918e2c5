//! Shotlink sync engine — keeps a pipeline database hierarchy and a
//! production tracker in step, in either direction.
//!
//! - [`projection`]: tracking record → [`ProjectedEntity`]
//! - [`resolver`]: bulk fetch of a project into a parent → children index
//! - [`matcher`]: breadth-first full-tree match ([`match_hierarchy`])
//! - [`reconcile`]: create / update / remove from a single change
//! - [`merge`]: attribute map, status translation, assignees and tags
//! - [`outbound`]: pipeline node → tracking payload
//! - [`outbound_matcher`]: breadth-first reverse match ([`match_pipeline_hierarchy`])
//! - [`outbound_reconcile`]: create / update / retire a tracking record from a
//!   single pipeline change
//! - [`handlers`]: the entry points

pub mod error;
pub mod events;
pub mod handlers;
pub mod matcher;
pub mod materialize;
pub mod merge;
pub mod outbound;
pub mod outbound_matcher;
pub mod outbound_reconcile;
pub mod projection;
pub mod reconcile;
pub mod resolver;

pub use error::SyncError;
pub use events::{
    parse_event_type, parse_pipeline_topic, ChangeAction, ChangeEvent, PipelineAction,
    PipelineChange, ProjectSyncRequest, SyncSource,
};
pub use handlers::{
    find_project, process_entity_change, process_pipeline_change, process_project_sync,
};
pub use matcher::{match_hierarchy, MatchReport};
pub use materialize::Materialize;
pub use merge::{SoftFailure, SoftFeature};
pub use outbound::Outbound;
pub use outbound_matcher::match_pipeline_hierarchy;
pub use outbound_reconcile::{
    create_tracking_from_event, remove_tracking_from_event, update_tracking_from_event,
    TrackingOutcome,
};
pub use projection::{NodeKey, ParentRef, ProjectedEntity};
pub use reconcile::{create_from_event, remove_from_event, update_from_event, ChangeOutcome};
pub use resolver::{resolve_hierarchy, Hierarchy};
