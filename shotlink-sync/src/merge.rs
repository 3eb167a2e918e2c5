//! Attribute, status, assignee and tag merge onto a pipeline node.
//!
//! Attributes are merged additively: values present in the tracking payload
//! overwrite, attributes missing from it are left alone. Status, assignees and
//! tags are soft features; their failures come back as [`SoftFailure`]s and
//! never abort the caller.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::warn;

use shotlink_core::{
    EntityHub, HubError, PipelineEntity, PipelineId, StatusTable, TrackingRecord, TrackingRef,
    TRACKING_ID_ATTRIB, TRACKING_TYPE_ATTRIB,
};

use crate::projection::ProjectedEntity;
use crate::SyncError;

// ---------------------------------------------------------------------------
// Soft failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftFeature {
    Status,
    Assignees,
    Tags,
}

impl fmt::Display for SoftFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftFeature::Status => write!(f, "status"),
            SoftFeature::Assignees => write!(f, "assignees"),
            SoftFeature::Tags => write!(f, "tags"),
        }
    }
}

/// A status/assignee/tag assignment that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftFailure {
    pub feature: SoftFeature,
    pub entity: PipelineId,
    pub message: String,
}

impl SoftFailure {
    pub(crate) fn new(feature: SoftFeature, entity: &PipelineId, message: impl Into<String>) -> Self {
        Self {
            feature,
            entity: entity.clone(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SoftFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.feature, self.entity, self.message)
    }
}

// ---------------------------------------------------------------------------
// Attributes and identity
// ---------------------------------------------------------------------------

/// Read the mapped attributes off a tracking record.
///
/// Each tracking field is tried as-is, then with the `sg_` prefix. Absent and
/// `null` values are skipped.
pub fn collect_attributes(
    record: &TrackingRecord,
    attribute_map: &BTreeMap<String, String>,
) -> BTreeMap<String, Value> {
    attribute_map
        .iter()
        .filter_map(|(attrib, field)| {
            record
                .get(field)
                .or_else(|| record.get(&format!("sg_{field}")))
                .map(|value| (attrib.clone(), value.clone()))
        })
        .collect()
}

/// Overwrite the listed attributes; everything else on the node stays.
pub fn apply_attributes(entity: &mut PipelineEntity, attributes: &BTreeMap<String, Value>) {
    for (name, value) in attributes {
        entity.attribs.set(name.clone(), value.clone());
    }
}

/// Stamp the tracking identity pair onto a pipeline node.
pub fn write_identity(entity: &mut PipelineEntity, source: &TrackingRef) {
    entity
        .attribs
        .set(TRACKING_ID_ATTRIB, source.id.to_string());
    entity
        .attribs
        .set(TRACKING_TYPE_ATTRIB, source.entity_type.clone());
}

/// How a pipeline node's stored identity relates to a tracking record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    Match,
    /// The node carries no tracking identity yet.
    Unclaimed,
    Mismatch { stored: String },
}

pub fn check_identity(entity: &PipelineEntity, source: &TrackingRef) -> IdentityCheck {
    match entity.tracking_id() {
        None => IdentityCheck::Unclaimed,
        Some(stored) if stored == source.id.to_string() => IdentityCheck::Match,
        Some(stored) => IdentityCheck::Mismatch { stored },
    }
}

// ---------------------------------------------------------------------------
// Soft features
// ---------------------------------------------------------------------------

/// Translate a tracking short status and set it. `None` leaves the node alone.
pub fn apply_status(
    hub: &mut dyn EntityHub,
    id: &PipelineId,
    short_name: Option<&str>,
    statuses: &StatusTable,
) -> Result<(), SoftFailure> {
    let Some(short_name) = short_name else {
        return Ok(());
    };
    let long_name = statuses.long_name(short_name).ok_or_else(|| {
        SoftFailure::new(
            SoftFeature::Status,
            id,
            format!("no pipeline status for short name '{short_name}'"),
        )
    })?;
    hub.set_status(id, long_name)
        .map_err(|e| SoftFailure::new(SoftFeature::Status, id, e.to_string()))
}

pub fn apply_assignees(
    hub: &mut dyn EntityHub,
    id: &PipelineId,
    assignees: &[String],
) -> Result<(), SoftFailure> {
    if assignees.is_empty() {
        return Ok(());
    }
    hub.set_assignees(id, assignees.to_vec())
        .map_err(|e| SoftFailure::new(SoftFeature::Assignees, id, e.to_string()))
}

pub fn apply_tags(hub: &mut dyn EntityHub, id: &PipelineId, tags: &[String]) -> Result<(), SoftFailure> {
    if tags.is_empty() {
        return Ok(());
    }
    hub.set_tags(id, tags.to_vec())
        .map_err(|e| SoftFailure::new(SoftFeature::Tags, id, e.to_string()))
}

/// Run every soft feature the projected variant supports, collecting failures.
pub fn apply_soft_features(
    hub: &mut dyn EntityHub,
    id: &PipelineId,
    projected: &ProjectedEntity,
    statuses: &StatusTable,
) -> Vec<SoftFailure> {
    let results = [
        apply_status(hub, id, projected.status(), statuses),
        apply_assignees(hub, id, projected.assignees()),
        apply_tags(hub, id, projected.tags()),
    ];
    let failures: Vec<SoftFailure> = results.into_iter().filter_map(Result::err).collect();
    for failure in &failures {
        warn!(
            pipeline_id = %failure.entity,
            feature = %failure.feature,
            "soft sync feature failed: {}",
            failure.message
        );
    }
    failures
}

/// Merge attributes and soft features of `projected` onto node `id`.
pub fn merge_into(
    hub: &mut dyn EntityHub,
    id: &PipelineId,
    projected: &ProjectedEntity,
    statuses: &StatusTable,
) -> Result<Vec<SoftFailure>, SyncError> {
    let entity = hub
        .entity_mut(id)
        .ok_or_else(|| HubError::NotFound(id.clone()))?;
    if let Some(tracked) = projected.tracked() {
        apply_attributes(entity, &tracked.attributes);
    }
    Ok(apply_soft_features(hub, id, projected, statuses))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
