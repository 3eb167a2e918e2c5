use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::json;
use shotlink_core::{
    snapshot, Attribs, EntityHub, MemoryHub, MemoryTracker, NewFolder, PipelineId, PipelineKind,
    TrackingRecord, TrackingRef, PIPELINE_ID_FIELD,
};
use tempfile::TempDir;

fn shotlink_cmd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("shotlink").expect("shotlink binary");
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1");
    cmd
}

fn seed_state(state: &Path) {
    let link = json!({"type": "Project", "id": 1});
    let mut tracker = MemoryTracker::default();
    tracker.insert(TrackingRecord::new("Project", 1).with("code", "ABC"));
    tracker.insert(
        TrackingRecord::new("Sequence", 2)
            .with("code", "seq01")
            .with("project", link.clone()),
    );
    tracker.insert(
        TrackingRecord::new("Shot", 10)
            .with("code", "sh010")
            .with("project", link)
            .with("sg_sequence", json!({"type": "Sequence", "id": 2})),
    );
    snapshot::save_tracker_at(state, &tracker).expect("save tracker");
    snapshot::save_hub_at(state, &MemoryHub::new("ABC")).expect("save hub");
}

/// Pipeline-only project: seq01 / sh010, tracker holds just the project.
fn seed_pipeline_state(state: &Path) {
    let mut tracker = MemoryTracker::default();
    tracker.insert(TrackingRecord::new("Project", 1).with("code", "ABC"));

    let mut hub = MemoryHub::new("ABC");
    let root = hub.project_entity().id.clone();
    let seq = hub
        .add_new_folder(NewFolder {
            folder_type: "Sequence".into(),
            name: "seq01".into(),
            label: None,
            parent_id: root,
            entity_id: None,
            attribs: Attribs::new(),
        })
        .expect("seq");
    hub.add_new_folder(NewFolder {
        folder_type: "Shot".into(),
        name: "sh010".into(),
        label: None,
        parent_id: seq,
        entity_id: None,
        attribs: Attribs::new(),
    })
    .expect("shot");
    hub.commit_changes().expect("commit");

    snapshot::save_tracker_at(state, &tracker).expect("save tracker");
    snapshot::save_hub_at(state, &hub).expect("save hub");
}

fn folder_id(state: &Path, name: &str) -> PipelineId {
    snapshot::load_hub_at(state)
        .expect("load hub")
        .entities()
        .find(|e| e.name == name)
        .map(|e| e.id.clone())
        .expect("folder")
}

fn folder_names(state: &Path) -> Vec<String> {
    let hub = snapshot::load_hub_at(state).expect("load hub");
    let mut names: Vec<String> = hub
        .entities()
        .filter(|e| e.kind == PipelineKind::Folder)
        .map(|e| e.name.clone())
        .collect();
    names.sort();
    names
}

#[test]
fn sync_builds_the_pipeline_tree() {
    let home = TempDir::new().expect("tempdir");
    let state = home.path().join("state");
    seed_state(&state);

    shotlink_cmd(home.path())
        .args(["sync", "ABC", "--state"])
        .arg(&state)
        .assert()
        .success()
        .stdout(contains("Synced"))
        .stdout(contains("2 created"));

    assert_eq!(folder_names(&state), vec!["seq01", "sh010"]);

    let tracker = snapshot::load_tracker_at(&state).expect("load tracker");
    let shot = tracker
        .record(&TrackingRef::new("Shot", 10))
        .expect("shot");
    assert!(shot.get_str(PIPELINE_ID_FIELD).is_some());
}

#[test]
fn second_sync_binds_instead_of_creating() {
    let home = TempDir::new().expect("tempdir");
    let state = home.path().join("state");
    seed_state(&state);

    for _ in 0..2 {
        shotlink_cmd(home.path())
            .args(["sync", "ABC", "--state"])
            .arg(&state)
            .assert()
            .success();
    }
    assert_eq!(folder_names(&state).len(), 2);
}

#[test]
fn sync_json_report() {
    let home = TempDir::new().expect("tempdir");
    let state = home.path().join("state");
    seed_state(&state);

    shotlink_cmd(home.path())
        .args(["sync", "ABC", "--json", "--state"])
        .arg(&state)
        .assert()
        .success()
        .stdout(contains("\"status\": \"Synced\""))
        .stdout(contains("\"created\": 2"));
}

#[test]
fn rename_event_updates_the_folder() {
    let home = TempDir::new().expect("tempdir");
    let state = home.path().join("state");
    seed_state(&state);

    shotlink_cmd(home.path())
        .args(["sync", "ABC", "--state"])
        .arg(&state)
        .assert()
        .success();

    let mut tracker = snapshot::load_tracker_at(&state).expect("load tracker");
    tracker
        .record_mut(&TrackingRef::new("Shot", 10))
        .expect("shot")
        .fields
        .insert("code".into(), json!("sh099"));
    snapshot::save_tracker_at(&state, &tracker).expect("save tracker");

    shotlink_cmd(home.path())
        .args([
            "event",
            "ABC",
            "--event-type",
            "Shotgun_Shot_Change",
            "--id",
            "10",
            "--field",
            "code",
            "--state",
        ])
        .arg(&state)
        .assert()
        .success()
        .stdout(contains("updated"));

    assert_eq!(folder_names(&state), vec!["seq01", "sh099"]);
}

#[test]
fn unknown_event_type_fails() {
    let home = TempDir::new().expect("tempdir");
    let state = home.path().join("state");
    seed_state(&state);

    shotlink_cmd(home.path())
        .args(["event", "ABC", "--event-type", "Shotgun_Shot", "--id", "10", "--state"])
        .arg(&state)
        .assert()
        .failure()
        .stderr(contains("invalid --event-type"));
}

#[test]
fn missing_state_fails() {
    let home = TempDir::new().expect("tempdir");

    shotlink_cmd(home.path())
        .args(["sync", "ABC"])
        .assert()
        .failure()
        .stderr(contains("failed to load tracking snapshot"));
}

#[test]
fn sync_from_pipeline_creates_tracking_records() {
    let home = TempDir::new().expect("tempdir");
    let state = home.path().join("state");
    seed_pipeline_state(&state);

    shotlink_cmd(home.path())
        .args(["sync", "ABC", "--from", "pipeline", "--state"])
        .arg(&state)
        .assert()
        .success()
        .stdout(contains("Synced"))
        .stdout(contains("2 created"));

    let shot_id = folder_id(&state, "sh010");
    let tracker = snapshot::load_tracker_at(&state).expect("load tracker");
    let shot = tracker
        .rows()
        .map(|row| &row.record)
        .find(|r| r.entity_type == "Shot")
        .expect("shot record");
    assert_eq!(shot.get_str("code"), Some("sh010"));
    assert_eq!(shot.get_str(PIPELINE_ID_FIELD), Some(shot_id.as_str()));
}

#[test]
fn pipeline_rename_event_updates_the_record() {
    let home = TempDir::new().expect("tempdir");
    let state = home.path().join("state");
    seed_state(&state);

    shotlink_cmd(home.path())
        .args(["sync", "ABC", "--state"])
        .arg(&state)
        .assert()
        .success();

    let shot_id = folder_id(&state, "sh010");
    let mut hub = snapshot::load_hub_at(&state).expect("load hub");
    hub.entity_mut(&shot_id).expect("shot").name = "sh099".into();
    hub.commit_changes().expect("commit");
    snapshot::save_hub_at(&state, &hub).expect("save hub");

    shotlink_cmd(home.path())
        .args(["pipeline-event", "ABC", "--topic", "entity.folder.renamed", "--id"])
        .arg(shot_id.as_str())
        .arg("--state")
        .arg(&state)
        .assert()
        .success()
        .stdout(contains("updated"));

    let tracker = snapshot::load_tracker_at(&state).expect("load tracker");
    let shot = tracker
        .record(&TrackingRef::new("Shot", 10))
        .expect("shot");
    assert_eq!(shot.get_str("code"), Some("sh099"));
}

#[test]
fn unknown_pipeline_topic_fails() {
    let home = TempDir::new().expect("tempdir");
    let state = home.path().join("state");
    seed_state(&state);

    shotlink_cmd(home.path())
        .args(["pipeline-event", "ABC", "--topic", "entity.version.created", "--id", "0f0f", "--state"])
        .arg(&state)
        .assert()
        .failure()
        .stderr(contains("invalid --topic"));
}
