//! Download phase tests

use std::sync::atomic::Ordering;
use std::time::Duration;

use ddi_agent::actor::ActorRef;
use ddi_agent::deploy::deployment::{DeploymentMsg, DownloadOutcome};
use ddi_agent::deploy::download::{DownloadMsg, DownloadOrchestrator};
use ddi_agent::events::{ClientEvent, ClientState, Notification};
use ddi_agent::models::feedback::OutgoingFeedback;
use ddi_models::{Execution, Finished, ProvisioningType};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::common::{
    artifact, cancel, chunk, descriptor, drain_for, next, next_matching, probe, Harness,
    HarnessOptions, MockTransport,
};

const FW_URL: &str = "https://srv/artifacts/fw.bin";
const FW: &[u8] = b"firmware image v2";
const UI_URL: &str = "https://srv/artifacts/ui.tar";
const UI: &[u8] = b"ui bundle with assets";

fn start(harness: &Harness) -> (ActorRef<DownloadMsg>, UnboundedReceiver<DeploymentMsg>) {
    let (parent, rx) = probe::<DeploymentMsg>(&harness.system, "deployment");
    let (download, _handle) = harness.system.spawn(
        "download",
        DownloadOrchestrator::new(harness.services.clone(), parent),
    );
    (download, rx)
}

fn two_files(id: &str, download: ProvisioningType) -> ddi_models::DeploymentDescriptor {
    descriptor(
        id,
        download,
        ProvisioningType::Forced,
        vec![
            chunk("os", "fw", vec![artifact("fw.bin", FW, FW_URL)]),
            chunk("app", "ui", vec![artifact("ui.tar", UI, UI_URL)]),
        ],
    )
}

#[tokio::test]
async fn test_present_artifacts_skip_download() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    let mut harness = Harness::new(dir.path(), transport.clone(), HarnessOptions::default());
    let (download, mut parent) = start(&harness);

    let folder = harness.services.action_dir("4");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join(ddi_agent::utils::md5_hash(FW)), FW).unwrap();
    std::fs::write(folder.join(ddi_agent::utils::md5_hash(UI)), UI).unwrap();

    download
        .send(DownloadMsg::Deployment(two_files("4", ProvisioningType::Attempt)))
        .await;

    match next(&mut parent).await {
        DeploymentMsg::Download(DownloadOutcome::Finished(d)) => assert_eq!(d.id, "4"),
        other => panic!("unexpected {:?}", other),
    }
    next_matching(&mut harness.notifications, |n| {
        matches!(n, Notification::Event(ClientEvent::AllFilesDownloaded { .. }))
    })
    .await;
    assert!(harness.feedback_within(Duration::from_millis(100)).await.is_empty());
    assert_eq!(transport.total_downloads(), 0);
}

#[tokio::test]
async fn test_denied_permit_waits() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    transport.serve(FW_URL, vec![FW.to_vec()]);
    transport.serve(UI_URL, vec![UI.to_vec()]);
    let mut harness = Harness::new(
        dir.path(),
        transport.clone(),
        HarnessOptions {
            soft_permit: false,
            ..Default::default()
        },
    );
    let (download, mut parent) = start(&harness);

    download
        .send(DownloadMsg::Deployment(two_files("5", ProvisioningType::Attempt)))
        .await;

    next_matching(&mut harness.notifications, |n| {
        *n == Notification::State(ClientState::WaitingDownloadAuthorization)
    })
    .await;
    assert!(drain_for(&mut parent, Duration::from_millis(200)).await.is_empty());
    assert!(harness.feedback_within(Duration::from_millis(50)).await.is_empty());
    assert_eq!(transport.total_downloads(), 0);
}

#[tokio::test]
async fn test_download_reports_progress_until_complete() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    transport.serve(FW_URL, vec![FW.to_vec()]);
    transport.serve(UI_URL, vec![UI.to_vec()]);
    let mut harness = Harness::new(dir.path(), transport.clone(), HarnessOptions::default());
    let (download, mut parent) = start(&harness);

    download
        .send(DownloadMsg::Deployment(two_files("6", ProvisioningType::Forced)))
        .await;

    match next(&mut parent).await {
        DeploymentMsg::Download(DownloadOutcome::Finished(d)) => assert_eq!(d.id, "6"),
        other => panic!("unexpected {:?}", other),
    }

    let feedback = harness.feedback_within(Duration::from_millis(100)).await;
    assert!(feedback.len() >= 2);
    for sent in &feedback {
        assert!(matches!(sent, OutgoingFeedback::Deployment(_)));
        assert_eq!(sent.feedback().execution, Execution::Proceeding);
    }

    let first = feedback[0].feedback();
    assert_eq!(first.details, vec!["Downloading 2 file(s)".to_string()]);
    assert_eq!(first.progress.map(|p| (p.total, p.completed)), Some((2, 0)));

    let last = feedback[feedback.len() - 1].feedback();
    assert_eq!(last.details, vec!["All files downloaded".to_string()]);
    assert_eq!(last.progress.map(|p| (p.total, p.completed)), Some((2, 2)));

    assert!(feedback.iter().any(|f| f.feedback().details[0].starts_with("Downloaded ")));
    assert_eq!(transport.downloads(FW_URL), 1);
    assert_eq!(transport.downloads(UI_URL), 1);

    let folder = harness.services.action_dir("6");
    assert_eq!(std::fs::read(folder.join(ddi_agent::utils::md5_hash(UI))).unwrap(), UI);
}

#[tokio::test]
async fn test_failed_artifact_ends_phase() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    transport.serve(FW_URL, vec![b"not the firmware".to_vec()]);
    transport.serve(UI_URL, vec![UI.to_vec()]);
    let mut harness = Harness::new(
        dir.path(),
        transport.clone(),
        HarnessOptions {
            max_failures: 1,
            ..Default::default()
        },
    );
    let (download, mut parent) = start(&harness);

    download
        .send(DownloadMsg::Deployment(two_files("7", ProvisioningType::Forced)))
        .await;

    match next(&mut parent).await {
        DeploymentMsg::Download(DownloadOutcome::Failed(details)) => {
            assert_eq!(details[0], "Download of fw.bin failed");
            assert!(details.iter().any(|d| d.contains("MD5 mismatch")));
        }
        other => panic!("unexpected {:?}", other),
    }

    let feedback = harness.feedback_within(Duration::from_millis(100)).await;
    let last = feedback.last().unwrap().feedback();
    assert_eq!(last.execution, Execution::Closed);
    assert_eq!(last.finished, Finished::Failure);
    assert_eq!(transport.downloads(FW_URL), 2);
}

#[tokio::test]
async fn test_cancel_acknowledged_while_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    let mut harness = Harness::new(
        dir.path(),
        transport.clone(),
        HarnessOptions {
            soft_permit: false,
            ..Default::default()
        },
    );
    let (download, mut parent) = start(&harness);

    download
        .send(DownloadMsg::Deployment(two_files("8", ProvisioningType::Attempt)))
        .await;
    next_matching(&mut harness.notifications, |n| {
        *n == Notification::State(ClientState::WaitingDownloadAuthorization)
    })
    .await;

    download.send(DownloadMsg::Cancel(cancel("9", "8"))).await;

    assert!(matches!(
        next(&mut parent).await,
        DeploymentMsg::Download(DownloadOutcome::Stopped)
    ));
    match harness.next_feedback().await {
        OutgoingFeedback::Cancel(feedback) => {
            assert_eq!(feedback.action_id, "9");
            assert_eq!(feedback.execution, Execution::Closed);
            assert_eq!(feedback.finished, Finished::Success);
        }
        other => panic!("unexpected {:?}", other),
    }
    next_matching(&mut harness.notifications, |n| {
        *n == Notification::State(ClientState::CancellingUpdate)
    })
    .await;
}

#[tokio::test]
async fn test_duplicate_descriptor_while_waiting_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    let mut harness = Harness::new(
        dir.path(),
        transport,
        HarnessOptions {
            soft_permit: false,
            ..Default::default()
        },
    );
    let (download, _parent) = start(&harness);

    download
        .send(DownloadMsg::Deployment(two_files("3", ProvisioningType::Attempt)))
        .await;
    next_matching(&mut harness.notifications, |n| {
        *n == Notification::State(ClientState::WaitingDownloadAuthorization)
    })
    .await;

    download
        .send(DownloadMsg::Deployment(two_files("3", ProvisioningType::Attempt)))
        .await;

    let later = drain_for(&mut harness.notifications, Duration::from_millis(150)).await;
    assert!(!later.contains(&Notification::State(ClientState::WaitingDownloadAuthorization)));
}

#[tokio::test]
async fn test_forced_stop_tears_down_running_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    let dropped = transport.stall(FW_URL);
    transport.serve(UI_URL, vec![UI.to_vec()]);
    let mut harness = Harness::new(dir.path(), transport.clone(), HarnessOptions::default());
    let (download, mut parent) = start(&harness);

    download
        .send(DownloadMsg::Deployment(two_files("10", ProvisioningType::Forced)))
        .await;
    next_matching(&mut harness.notifications, |n| {
        *n == Notification::State(ClientState::Downloading)
    })
    .await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.downloads(FW_URL) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    download.send(DownloadMsg::CancelForced).await;

    assert!(matches!(
        next(&mut parent).await,
        DeploymentMsg::Download(DownloadOutcome::Stopped)
    ));
    tokio::time::timeout(Duration::from_secs(5), async {
        while !dropped.load(Ordering::Acquire) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(!harness.system.paths().iter().any(|p| p.contains("file-")));

    // A forced stop sends no cancel acknowledgement
    let feedback = harness.feedback_within(Duration::from_millis(50)).await;
    assert!(!feedback.iter().any(|f| matches!(f, OutgoingFeedback::Cancel(_))));
}
