pub mod event;
pub mod pipeline_event;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;
use shotlink_core::{
    snapshot::{self, CONFIG_FILE},
    ConfigError, MemoryHub, MemoryTracker, SyncConfig,
};

/// Where a command finds the project state.
#[derive(Args, Debug)]
pub struct StateArgs {
    /// State directory with tracking.yaml and pipeline.yaml
    /// [default: ~/.shotlink/projects/<project-code>]
    #[arg(long, value_name = "DIR")]
    pub state: Option<PathBuf>,

    /// Sync configuration file [default: <state>/config.yaml, if present]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Both backends and the configuration of one project, loaded from disk.
pub struct ProjectState {
    pub dir: PathBuf,
    pub tracker: MemoryTracker,
    pub hub: MemoryHub,
    pub config: SyncConfig,
}

impl ProjectState {
    pub fn load(project_code: &str, args: &StateArgs) -> Result<Self> {
        let dir = match &args.state {
            Some(dir) => dir.clone(),
            None => snapshot::state_dir(project_code).context("could not resolve state directory")?,
        };

        let config = match &args.config {
            Some(path) => SyncConfig::load_at(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => match SyncConfig::load_at(&dir.join(CONFIG_FILE)) {
                Ok(config) => config,
                Err(ConfigError::NotFound { .. }) => SyncConfig::default(),
                Err(e) => return Err(e).context("failed to load project config"),
            },
        };

        let tracker = snapshot::load_tracker_at(&dir)
            .with_context(|| format!("failed to load tracking snapshot from {}", dir.display()))?;
        let hub = snapshot::load_hub_at(&dir)
            .with_context(|| format!("failed to load pipeline snapshot from {}", dir.display()))?;

        Ok(Self {
            dir,
            tracker,
            hub,
            config,
        })
    }

    pub fn save(&self) -> Result<()> {
        snapshot::save_tracker_at(&self.dir, &self.tracker)
            .context("failed to save tracking snapshot")?;
        snapshot::save_hub_at(&self.dir, &self.hub).context("failed to save pipeline snapshot")?;
        debug!(dir = %self.dir.display(), "snapshots saved");
        Ok(())
    }
}
