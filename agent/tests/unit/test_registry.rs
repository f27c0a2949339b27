//! Updater registry tests

use std::sync::Arc;

use ddi_agent::deploy::registry::UpdaterRegistry;
use ddi_agent::providers::{CommandUpdater, UpdateResult, Updater};

use crate::common::{artifact, chunk, RecordingUpdater};

#[test]
fn test_resolve_orders_by_priority() {
    let late: Arc<dyn Updater> = Arc::new(RecordingUpdater::new("late", 5, UpdateResult::success(vec![])));
    let early: Arc<dyn Updater> = Arc::new(RecordingUpdater::new("early", -1, UpdateResult::success(vec![])));
    let also_early: Arc<dyn Updater> =
        Arc::new(RecordingUpdater::new("also-early", -1, UpdateResult::success(vec![])));
    let registry = UpdaterRegistry::new(vec![late, early, also_early]);

    let assignments = registry.resolve(&[chunk("os", "fw", vec![])]);
    let names: Vec<&str> = assignments.iter().map(|a| a.updater.name()).collect();

    assert_eq!(names, vec!["early", "also-early", "late"]);
}

#[test]
fn test_required_artifacts_only_from_claimed_chunks() {
    let os_only: Arc<dyn Updater> = Arc::new(CommandUpdater::new("install-os", vec![]).for_part("os"));
    let registry = UpdaterRegistry::new(vec![os_only]);

    let fw = artifact("fw.bin", b"firmware", "https://srv/fw.bin");
    let ui = artifact("ui.tar", b"frontend", "https://srv/ui.tar");
    let chunks = vec![chunk("os", "fw", vec![fw.clone()]), chunk("app", "ui", vec![ui])];

    let required = registry.required_artifacts(&chunks);
    assert_eq!(required, vec![fw]);
}

#[test]
fn test_required_artifacts_deduplicated_by_md5() {
    let all: Arc<dyn Updater> = Arc::new(RecordingUpdater::new("all", 0, UpdateResult::success(vec![])));
    let registry = UpdaterRegistry::new(vec![all]);

    let shared = artifact("lib.so", b"shared library", "https://srv/lib.so");
    let mut upper = shared.clone();
    upper.hashes.md5 = upper.hashes.md5.to_uppercase();
    let chunks = vec![chunk("app", "a", vec![shared]), chunk("app", "b", vec![upper])];

    assert_eq!(registry.required_artifacts(&chunks).len(), 1);
}

#[test]
fn test_all_cancellable() {
    let yes: Arc<dyn Updater> = Arc::new(CommandUpdater::new("a", vec![]));
    let no: Arc<dyn Updater> = Arc::new(CommandUpdater::new("b", vec![]).cancellable(false));

    assert!(UpdaterRegistry::new(vec![yes.clone()]).all_cancellable());
    assert!(!UpdaterRegistry::new(vec![yes, no]).all_cancellable());
    assert!(UpdaterRegistry::default().is_empty());
}
