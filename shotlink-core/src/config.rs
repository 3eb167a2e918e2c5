//! Per-project sync configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::EntityKind;

/// Which entity types to sync and how tracking fields map onto pipeline
/// attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled_entities: Vec<EntityKind>,
    /// Tracking project field holding the project code.
    pub project_code_field: String,
    /// Pipeline attribute name → tracking field name (without `sg_` prefix).
    pub attribute_map: BTreeMap<String, String>,
    /// Tracking fields that may not change on hierarchy-immutable nodes.
    pub restricted_fields: BTreeSet<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled_entities: EntityKind::DEFAULT_ENABLED.to_vec(),
            project_code_field: "code".to_owned(),
            attribute_map: BTreeMap::new(),
            restricted_fields: [
                "code",
                "content",
                "sg_sequence",
                "sg_episode",
                "entity",
                "sg_asset_type",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
        }
    }
}

impl SyncConfig {
    pub fn is_enabled(&self, kind: EntityKind) -> bool {
        self.enabled_entities.contains(&kind)
    }

    /// Parse a YAML document; missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load from `path`.
    ///
    /// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with
    /// path) if malformed.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_enable_core_types() {
        let cfg = SyncConfig::default();
        assert!(cfg.is_enabled(EntityKind::Shot));
        assert!(!cfg.is_enabled(EntityKind::Scene));
        assert!(cfg.restricted_fields.contains("code"));
        assert_eq!(cfg.project_code_field, "code");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg = SyncConfig::from_yaml_str(
            "attribute_map:\n  fps: fps\n  frameStart: frame_start\nproject_code_field: sg_code\n",
        )
        .expect("parse");
        assert_eq!(cfg.project_code_field, "sg_code");
        assert_eq!(cfg.attribute_map.get("frameStart").map(String::as_str), Some("frame_start"));
        assert_eq!(cfg.enabled_entities, EntityKind::DEFAULT_ENABLED.to_vec());
    }

    #[test]
    fn load_missing_returns_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let err = SyncConfig::load_at(&dir.path().join("config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn load_bad_yaml_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "enabled_entities: [Shot, Spaceship]\n").expect("write");
        let err = SyncConfig::load_at(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }
}
