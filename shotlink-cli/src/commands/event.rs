//! `shotlink event` — replay one tracking change.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use shotlink_core::EntityHub;
use shotlink_sync::{process_entity_change, ChangeEvent, ChangeOutcome};

use super::{ProjectState, StateArgs};

/// Arguments for `shotlink event`.
#[derive(Args, Debug)]
pub struct EventArgs {
    /// Tracking project code.
    pub project_code: String,

    /// Event-log type, e.g. `Shotgun_Shot_Change`.
    #[arg(long, value_name = "TYPE")]
    pub event_type: String,

    /// Id of the changed tracking entity.
    #[arg(long)]
    pub id: i64,

    /// Tracking field named by a `Change` event.
    #[arg(long, value_name = "NAME")]
    pub field: Option<String>,

    #[command(flatten)]
    pub state: StateArgs,
}

impl EventArgs {
    pub fn run(self) -> Result<()> {
        let mut state = ProjectState::load(&self.project_code, &self.state)?;
        let mut event = ChangeEvent::from_event_type(
            &self.event_type,
            self.id,
            state.hub.project_name(),
            &self.project_code,
        )
        .context("invalid --event-type")?;
        if let Some(field) = &self.field {
            event = event.with_attribute(field);
        }

        let outcome = process_entity_change(&event, &mut state.tracker, &mut state.hub, &state.config)
            .with_context(|| {
                format!(
                    "{} of {} <{}> failed",
                    event.action, event.entity_type, event.entity_id
                )
            })?;
        state.save()?;

        print_outcome(&event, &outcome);
        Ok(())
    }
}

fn print_outcome(event: &ChangeEvent, outcome: &ChangeOutcome) {
    let target = event.target();
    match outcome {
        ChangeOutcome::Created { pipeline_id, .. } => {
            println!("{} {target} → {pipeline_id}", "created".green().bold())
        }
        ChangeOutcome::Revived { pipeline_id, .. } => {
            println!("{} {target} → {pipeline_id}", "revived".green().bold())
        }
        ChangeOutcome::Updated { pipeline_id, .. } => {
            println!("{} {target} → {pipeline_id}", "updated".green().bold())
        }
        ChangeOutcome::Removed { pipeline_id } => {
            println!("{} {target} → {pipeline_id}", "removed".yellow().bold())
        }
        ChangeOutcome::FlaggedRemoved { pipeline_id } => println!(
            "{} {target} → {pipeline_id} (hierarchy-immutable)",
            "flagged".yellow().bold()
        ),
        ChangeOutcome::Ignored { reason } => println!("{} {target}: {reason}", "ignored".dimmed()),
        ChangeOutcome::Stale => println!("{} {target}: entity is still live", "stale".dimmed()),
    }
    for warning in outcome.warnings() {
        println!("  !  {warning}");
    }
}
