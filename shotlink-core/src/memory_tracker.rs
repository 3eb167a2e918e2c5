//! In-memory [`TrackingSession`] backed by a record table.
//!
//! Used by the CLI over YAML snapshots and by tests. Reads honour the schema,
//! retirement flags and requested field lists; writes are appended to a log so
//! callers can observe write volume.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::tracking::{Fields, Filter, TrackingRecord, TrackingSession};
use crate::types::{EntityKind, TrackingRef};

/// One row of the tracker table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerRow {
    #[serde(flatten)]
    pub record: TrackingRecord,
    #[serde(default)]
    pub retired: bool,
}

/// A write observed by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteLogEntry {
    pub target: TrackingRef,
    pub data: Fields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTracker {
    schema: BTreeSet<String>,
    rows: BTreeMap<TrackingRef, TrackerRow>,
    writes: Vec<WriteLogEntry>,
}

impl Default for MemoryTracker {
    /// Schema with every projectable entity type plus the link targets the
    /// projection reads.
    fn default() -> Self {
        let mut schema: BTreeSet<String> = [
            EntityKind::Project,
            EntityKind::Episode,
            EntityKind::Sequence,
            EntityKind::Scene,
            EntityKind::Shot,
            EntityKind::Asset,
            EntityKind::Task,
            EntityKind::Version,
        ]
        .iter()
        .map(|k| k.as_str().to_owned())
        .collect();
        schema.insert("HumanUser".to_owned());
        schema.insert("Step".to_owned());
        Self::with_schema(schema)
    }
}

impl MemoryTracker {
    pub fn with_schema<I, S>(schema: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schema: schema.into_iter().map(Into::into).collect(),
            rows: BTreeMap::new(),
            writes: Vec::new(),
        }
    }

    /// Rebuild from snapshot rows.
    pub fn from_rows(schema: Vec<String>, rows: Vec<TrackerRow>) -> Self {
        let mut tracker = Self::with_schema(schema);
        for row in rows {
            tracker.rows.insert(row.record.reference(), row);
        }
        tracker
    }

    pub fn schema(&self) -> impl Iterator<Item = &String> {
        self.schema.iter()
    }

    pub fn rows(&self) -> impl Iterator<Item = &TrackerRow> {
        self.rows.values()
    }

    /// Insert or replace a record without logging a write.
    pub fn insert(&mut self, record: TrackingRecord) -> TrackingRef {
        let key = record.reference();
        self.rows.insert(
            key.clone(),
            TrackerRow {
                record,
                retired: false,
            },
        );
        key
    }

    /// Full stored record, live or retired.
    pub fn record(&self, target: &TrackingRef) -> Option<&TrackingRecord> {
        self.rows.get(target).map(|row| &row.record)
    }

    pub fn record_mut(&mut self, target: &TrackingRef) -> Option<&mut TrackingRecord> {
        self.rows.get_mut(target).map(|row| &mut row.record)
    }

    pub fn retire(&mut self, target: &TrackingRef) -> bool {
        self.set_retired(target, true)
    }

    pub fn revive(&mut self, target: &TrackingRef) -> bool {
        self.set_retired(target, false)
    }

    /// Delete a record outright, as if it never existed.
    pub fn purge(&mut self, target: &TrackingRef) -> Option<TrackingRecord> {
        self.rows.remove(target).map(|row| row.record)
    }

    pub fn write_log(&self) -> &[WriteLogEntry] {
        &self.writes
    }

    pub fn clear_write_log(&mut self) {
        self.writes.clear();
    }

    fn set_retired(&mut self, target: &TrackingRef, retired: bool) -> bool {
        match self.rows.get_mut(target) {
            Some(row) => {
                row.retired = retired;
                true
            }
            None => false,
        }
    }

    fn check_schema(&self, entity_type: &str) -> Result<(), TrackingError> {
        if self.schema.contains(entity_type) {
            Ok(())
        } else {
            Err(TrackingError::UnknownEntityType {
                entity_type: entity_type.to_owned(),
            })
        }
    }

    fn select(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
        retired: bool,
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        self.check_schema(entity_type)?;
        let out = self
            .rows
            .values()
            .filter(|row| row.record.entity_type == entity_type && row.retired == retired)
            .filter(|row| filters.iter().all(|f| filter_matches(f, &row.record)))
            .map(|row| project_fields(&row.record, fields))
            .collect();
        Ok(out)
    }

    fn next_id(&self, entity_type: &str) -> i64 {
        self.rows
            .keys()
            .filter(|k| k.entity_type == entity_type)
            .map(|k| k.id)
            .max()
            .unwrap_or(0)
            + 1
    }
}

fn filter_matches(filter: &Filter, record: &TrackingRecord) -> bool {
    if filter.field == "id" {
        let id = serde_json::Value::from(record.id);
        return filter.matches(Some(&id));
    }
    filter.matches(record.get(&filter.field))
}

/// Copy only the requested fields; an empty list returns everything.
fn project_fields(record: &TrackingRecord, fields: &[String]) -> TrackingRecord {
    if fields.is_empty() {
        return record.clone();
    }
    let mut out = TrackingRecord::new(record.entity_type.clone(), record.id);
    for field in fields {
        if let Some(value) = record.fields.get(field) {
            out.fields.insert(field.clone(), value.clone());
        }
    }
    out
}

impl TrackingSession for MemoryTracker {
    fn find_one(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Option<TrackingRecord>, TrackingError> {
        Ok(self
            .select(entity_type, filters, fields, false)?
            .into_iter()
            .next())
    }

    fn find_one_retired(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Option<TrackingRecord>, TrackingError> {
        Ok(self
            .select(entity_type, filters, fields, true)?
            .into_iter()
            .next())
    }

    fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        self.select(entity_type, filters, fields, false)
    }

    fn create(&mut self, entity_type: &str, data: Fields) -> Result<TrackingRecord, TrackingError> {
        self.check_schema(entity_type)?;
        let id = self.next_id(entity_type);
        let record = TrackingRecord {
            entity_type: entity_type.to_owned(),
            id,
            fields: data.clone(),
        };
        let target = self.insert(record.clone());
        self.writes.push(WriteLogEntry { target, data });
        Ok(record)
    }

    fn update(
        &mut self,
        entity_type: &str,
        id: i64,
        data: Fields,
    ) -> Result<TrackingRecord, TrackingError> {
        self.check_schema(entity_type)?;
        let target = TrackingRef::new(entity_type, id);
        let row = self
            .rows
            .get_mut(&target)
            .filter(|row| !row.retired)
            .ok_or_else(|| TrackingError::NotFound {
                entity_type: entity_type.to_owned(),
                id,
            })?;
        for (k, v) in &data {
            row.record.fields.insert(k.clone(), v.clone());
        }
        let updated = row.record.clone();
        self.writes.push(WriteLogEntry { target, data });
        Ok(updated)
    }

    fn delete(&mut self, entity_type: &str, id: i64) -> Result<bool, TrackingError> {
        self.check_schema(entity_type)?;
        let target = TrackingRef::new(entity_type, id);
        let Some(row) = self.rows.get_mut(&target).filter(|row| !row.retired) else {
            return Ok(false);
        };
        row.retired = true;
        let mut data = Fields::new();
        data.insert("retired".to_owned(), serde_json::Value::Bool(true));
        self.writes.push(WriteLogEntry { target, data });
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
