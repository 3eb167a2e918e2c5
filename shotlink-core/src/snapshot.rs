//! YAML snapshots of both backends.
//!
//! # Storage layout
//!
//! ```text
//! ~/.shotlink/
//!   projects/
//!     <project_code>/
//!       tracking.yaml   (tracker rows, mode 0600)
//!       pipeline.yaml   (persisted pipeline entities, mode 0600)
//!       config.yaml     (optional SyncConfig)
//! ```
//!
//! # API pattern
//!
//! Functions take an explicit state directory (`_at`); [`state_dir`] derives
//! the default one from `dirs::home_dir()`. Tests always use `_at` with a
//! temporary directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::memory_hub::{HubSnapshot, MemoryHub};
use crate::memory_tracker::{MemoryTracker, TrackerRow};

pub const TRACKING_FILE: &str = "tracking.yaml";
pub const PIPELINE_FILE: &str = "pipeline.yaml";
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackerDocument {
    saved_at: DateTime<Utc>,
    schema: Vec<String>,
    #[serde(default)]
    rows: Vec<TrackerRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PipelineDocument {
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    hub: HubSnapshot,
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.shotlink/projects/<project_code>/` (pure, no I/O).
pub fn state_dir_at(home: &Path, project_code: &str) -> PathBuf {
    home.join(".shotlink").join("projects").join(project_code)
}

/// `state_dir_at` using `dirs::home_dir()`.
pub fn state_dir(project_code: &str) -> Result<PathBuf, SnapshotError> {
    let home = dirs::home_dir().ok_or(SnapshotError::HomeNotFound)?;
    Ok(state_dir_at(&home, project_code))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load `<state>/tracking.yaml`.
pub fn load_tracker_at(state: &Path) -> Result<MemoryTracker, SnapshotError> {
    let doc: TrackerDocument = read_yaml(&state.join(TRACKING_FILE))?;
    Ok(MemoryTracker::from_rows(doc.schema, doc.rows))
}

/// Load `<state>/pipeline.yaml`.
pub fn load_hub_at(state: &Path) -> Result<MemoryHub, SnapshotError> {
    let path = state.join(PIPELINE_FILE);
    let doc: PipelineDocument = read_yaml(&path)?;
    MemoryHub::from_snapshot(doc.hub).map_err(|e| SnapshotError::Invalid {
        path,
        reason: e.to_string(),
    })
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, SnapshotError> {
    if !path.exists() {
        return Err(SnapshotError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|source| SnapshotError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `<state>/tracking.yaml`.
pub fn save_tracker_at(state: &Path, tracker: &MemoryTracker) -> Result<(), SnapshotError> {
    let doc = TrackerDocument {
        saved_at: Utc::now(),
        schema: tracker.schema().cloned().collect(),
        rows: tracker.rows().cloned().collect(),
    };
    write_yaml(state, TRACKING_FILE, &doc)
}

/// Atomically write `<state>/pipeline.yaml` from the hub's persisted set.
pub fn save_hub_at(state: &Path, hub: &MemoryHub) -> Result<(), SnapshotError> {
    let doc = PipelineDocument {
        saved_at: Utc::now(),
        hub: hub.to_snapshot(),
    };
    write_yaml(state, PIPELINE_FILE, &doc)
}

/// Write flow: serialize → `.tmp` sibling → `chmod 0600` → `rename`.
fn write_yaml<T: Serialize>(state: &Path, file: &str, value: &T) -> Result<(), SnapshotError> {
    if !state.exists() {
        std::fs::create_dir_all(state)?;
        set_dir_permissions(state)?;
    }
    let path = state.join(file);
    let tmp_path = state.join(format!("{file}.tmp"));

    let yaml = serde_yaml::to_string(value)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), SnapshotError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), SnapshotError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), SnapshotError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), SnapshotError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
