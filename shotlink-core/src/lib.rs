//! Shotlink core library — domain types, collaborator interfaces, in-memory
//! backends and snapshot persistence.
//!
//! - [`types`]: ids, entity kinds, sync status, name normalization
//! - [`tracking`]: production-tracker records and [`TrackingSession`]
//! - [`pipeline`]: pipeline entities, status table and [`EntityHub`]
//! - [`config`]: [`SyncConfig`]
//! - [`memory_tracker`] / [`memory_hub`]: in-memory implementations
//! - [`snapshot`]: YAML load / save of both backends

pub mod config;
pub mod error;
pub mod memory_hub;
pub mod memory_tracker;
pub mod pipeline;
pub mod snapshot;
pub mod tracking;
pub mod types;

pub use config::SyncConfig;
pub use error::{ConfigError, HubError, SnapshotError, TrackingError, UnknownEntityKind};
pub use memory_hub::{HubSnapshot, MemoryHub};
pub use memory_tracker::MemoryTracker;
pub use pipeline::{
    Attribs, EntityHub, NewFolder, NewTask, PipelineEntity, ProjectStatus, StatusTable,
};
pub use tracking::{BatchRequest, Fields, Filter, FilterOp, TrackingRecord, TrackingSession};
pub use types::{slugify, EntityKind, PipelineId, PipelineKind, SyncStatus, TrackingRef};

/// Tracking field holding the bound pipeline id.
pub const PIPELINE_ID_FIELD: &str = "sg_pipeline_id";
/// Tracking field holding the last [`SyncStatus`].
pub const SYNC_STATUS_FIELD: &str = "sg_pipeline_sync_status";
/// Pipeline attribute holding the tracking id.
pub const TRACKING_ID_ATTRIB: &str = "trackingId";
/// Pipeline attribute holding the tracking entity type.
pub const TRACKING_TYPE_ATTRIB: &str = "trackingType";
/// Written to [`TRACKING_ID_ATTRIB`] when the tracking source is retired but
/// the pipeline node must stay.
pub const REMOVED_UPSTREAM: &str = "removed";
/// Task type used when a tracking task has no pipeline step.
pub const DEFAULT_TASK_TYPE: &str = "Generic";
