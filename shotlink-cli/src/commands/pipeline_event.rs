//! `shotlink pipeline-event` — replay one pipeline change into tracking.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use shotlink_core::{EntityHub, PipelineId, TrackingRef};
use shotlink_sync::{process_pipeline_change, PipelineChange, TrackingOutcome};

use super::{ProjectState, StateArgs};

/// Arguments for `shotlink pipeline-event`.
#[derive(Args, Debug)]
pub struct PipelineEventArgs {
    /// Tracking project code.
    pub project_code: String,

    /// Event topic, e.g. `entity.folder.renamed`.
    #[arg(long)]
    pub topic: String,

    /// Id of the changed pipeline entity.
    #[arg(long, value_name = "PIPELINE_ID")]
    pub id: String,

    /// Tracking type the deleted entity carried.
    #[arg(long, value_name = "TYPE", requires = "tracking_id")]
    pub tracking_type: Option<String>,

    /// Tracking id the deleted entity carried.
    #[arg(long, value_name = "ID", requires = "tracking_type")]
    pub tracking_id: Option<i64>,

    #[command(flatten)]
    pub state: StateArgs,
}

impl PipelineEventArgs {
    pub fn run(self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("--id must not be empty");
        }
        let mut state = ProjectState::load(&self.project_code, &self.state)?;
        let mut change = PipelineChange::from_topic(
            &self.topic,
            self.id.as_str(),
            state.hub.project_name(),
            &self.project_code,
        )
        .context("invalid --topic")?;
        if let (Some(entity_type), Some(id)) = (&self.tracking_type, self.tracking_id) {
            change = change.with_tracking(TrackingRef::new(entity_type.clone(), id));
        }

        let outcome =
            process_pipeline_change(&change, &mut state.tracker, &mut state.hub, &state.config)
                .with_context(|| format!("{} of pipeline entity {} failed", change.action, self.id))?;
        state.save()?;

        print_outcome(&change.pipeline_id, &outcome);
        Ok(())
    }
}

fn print_outcome(pipeline_id: &PipelineId, outcome: &TrackingOutcome) {
    match outcome {
        TrackingOutcome::Created { entity, .. } => {
            println!("{} {pipeline_id} → {entity}", "created".green().bold())
        }
        TrackingOutcome::Bound { entity } => {
            println!("{} {pipeline_id} → {entity}", "bound".green().bold())
        }
        TrackingOutcome::Updated { entity, .. } => {
            println!("{} {pipeline_id} → {entity}", "updated".green().bold())
        }
        TrackingOutcome::Retired { entity } => {
            println!("{} {pipeline_id} → {entity}", "retired".yellow().bold())
        }
        TrackingOutcome::Ignored { reason } => {
            println!("{} {pipeline_id}: {reason}", "ignored".dimmed())
        }
        TrackingOutcome::Stale => {
            println!("{} {pipeline_id}: entity still exists", "stale".dimmed())
        }
    }
    for warning in outcome.warnings() {
        println!("  !  {warning}");
    }
}
