//! Production-tracker side: records, filters and the session interface.
//!
//! Records are typed by `(entity_type, id)` and carry a loose field bag,
//! mirroring the tracker's own query API. Filters use the tracker's
//! `[field, operator, value]` shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TrackingError;
use crate::types::TrackingRef;

/// Field bag of a tracking record or of a write request.
pub type Fields = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A record returned by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: i64,
    #[serde(default)]
    pub fields: Fields,
}

impl TrackingRecord {
    pub fn new(entity_type: impl Into<String>, id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            fields: Fields::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn reference(&self) -> TrackingRef {
        TrackingRef::new(self.entity_type.clone(), self.id)
    }

    /// Field value, treating an explicit `null` as absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Non-empty string value of a field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Entity link stored in a field (`{"type": .., "id": ..}`).
    pub fn get_link(&self, field: &str) -> Option<TrackingRef> {
        self.get(field).and_then(link_from_value)
    }

    /// Names from a multi-entity field such as `tags` or `task_assignees`.
    ///
    /// Linked users prefer `login` over `name`; plain strings pass through.
    pub fn get_names(&self, field: &str) -> Vec<String> {
        let Some(Value::Array(items)) = self.get(field) else {
            return vec![];
        };
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map
                    .get("login")
                    .or_else(|| map.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                _ => None,
            })
            .collect()
    }
}

/// Parse a link value into a [`TrackingRef`].
pub fn link_from_value(value: &Value) -> Option<TrackingRef> {
    let map = value.as_object()?;
    let entity_type = map.get("type")?.as_str()?;
    let id = map.get("id")?.as_i64()?;
    Some(TrackingRef::new(entity_type, id))
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Is,
    IsNot,
    In,
}

/// One `[field, operator, value]` condition. All filters of a query must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn is(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Is,
            value: value.into(),
        }
    }

    pub fn is_not(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::IsNot,
            value: value.into(),
        }
    }

    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::In,
            value: Value::Array(values),
        }
    }

    /// Evaluate against a field value (`None` means the field is unset).
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Is => values_equal(actual, &self.value),
            FilterOp::IsNot => !values_equal(actual, &self.value),
            FilterOp::In => match &self.value {
                Value::Array(candidates) => candidates.iter().any(|c| values_equal(actual, c)),
                other => values_equal(actual, other),
            },
        }
    }
}

/// Links compare by type and id only; everything else compares structurally.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (link_from_value(a), link_from_value(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A queued write for [`TrackingSession::batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchRequest {
    Create { entity_type: String, data: Fields },
    Update { entity_type: String, id: i64, data: Fields },
}

/// Query/mutate API of the production tracker.
///
/// Reads only return live records unless the `_retired` variant is used.
/// An entity type missing from the tracker's schema is reported as
/// [`TrackingError::UnknownEntityType`].
pub trait TrackingSession {
    fn find_one(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Option<TrackingRecord>, TrackingError>;

    /// Like [`find_one`](Self::find_one) but only matches retired records.
    fn find_one_retired(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Option<TrackingRecord>, TrackingError>;

    fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Vec<TrackingRecord>, TrackingError>;

    fn create(&mut self, entity_type: &str, data: Fields) -> Result<TrackingRecord, TrackingError>;

    fn update(
        &mut self,
        entity_type: &str,
        id: i64,
        data: Fields,
    ) -> Result<TrackingRecord, TrackingError>;

    /// Retire a live record, the tracker's soft delete. `Ok(false)` when no
    /// live record with that id exists.
    fn delete(&mut self, entity_type: &str, id: i64) -> Result<bool, TrackingError>;

    /// Run several writes in order; stops at the first failure.
    fn batch(&mut self, requests: Vec<BatchRequest>) -> Result<Vec<TrackingRecord>, TrackingError> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            let record = match request {
                BatchRequest::Create { entity_type, data } => self.create(&entity_type, data)?,
                BatchRequest::Update {
                    entity_type,
                    id,
                    data,
                } => self.update(&entity_type, id, data)?,
            };
            out.push(record);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
