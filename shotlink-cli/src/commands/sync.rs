//! `shotlink sync` — full-tree match of one project.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde_json::json;
use shotlink_core::{EntityHub, SyncStatus};
use shotlink_sync::{process_project_sync, MatchReport, ProjectSyncRequest, SyncSource};

use super::{ProjectState, StateArgs};

/// Arguments for `shotlink sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Tracking project code.
    pub project_code: String,

    /// Side whose hierarchy is mirrored onto the other.
    #[arg(long, value_enum, default_value_t = Source::Tracking)]
    pub from: Source,

    #[command(flatten)]
    pub state: StateArgs,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Source {
    Tracking,
    Pipeline,
}

impl From<Source> for SyncSource {
    fn from(source: Source) -> Self {
        match source {
            Source::Tracking => SyncSource::Tracking,
            Source::Pipeline => SyncSource::Pipeline,
        }
    }
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let mut state = ProjectState::load(&self.project_code, &self.state)?;
        let request = ProjectSyncRequest::new(state.hub.project_name(), &self.project_code)
            .with_source(self.from.into());
        let report = process_project_sync(
            &request,
            &mut state.tracker,
            &mut state.hub,
            &state.config,
        )
        .with_context(|| {
            format!(
                "sync from {} failed for '{}'",
                request.source, self.project_code
            )
        })?;
        state.save()?;

        if self.json {
            print_json(&self.project_code, &report)?;
        } else {
            print_report(&self.project_code, &report);
        }
        Ok(())
    }
}

fn print_json(project_code: &str, report: &MatchReport) -> Result<()> {
    let failed: Vec<String> = report.failed.iter().map(ToString::to_string).collect();
    let warnings: Vec<String> = report.warnings.iter().map(ToString::to_string).collect();
    let unmirrored: Vec<&str> = report.unmirrored.iter().map(|id| id.as_str()).collect();
    let doc = json!({
        "project": project_code,
        "status": report.status.as_str(),
        "created": report.created,
        "bound": report.bound,
        "skipped": report.skipped,
        "failed": failed,
        "unmirrored": unmirrored,
        "warnings": warnings,
        "commit_errors": report.commit_errors,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&doc).context("failed to encode report")?
    );
    Ok(())
}

fn print_report(project_code: &str, report: &MatchReport) {
    let status = match report.status {
        SyncStatus::Synced => report.status.as_str().green().bold(),
        SyncStatus::Failed => report.status.as_str().red().bold(),
    };
    println!(
        "{status} '{project_code}' ({} created, {} bound, {} skipped, {} failed)",
        report.created,
        report.bound,
        report.skipped,
        report.failed.len()
    );
    for entity in &report.failed {
        println!("  ✗  {entity}");
    }
    for node in &report.unmirrored {
        println!("  ✗  pipeline {node} not mirrored");
    }
    for warning in &report.warnings {
        println!("  !  {warning}");
    }
    for error in &report.commit_errors {
        println!("  ✗  commit: {error}");
    }
}
