//! Update phase tests

use std::sync::Arc;
use std::time::Duration;

use ddi_agent::actor::ActorRef;
use ddi_agent::deploy::deployment::{DeploymentMsg, UpdateOutcome, UPDATE_NOT_STOPPABLE};
use ddi_agent::deploy::update::{UpdateMsg, UpdateOrchestrator};
use ddi_agent::events::{ClientEvent, ClientState, Notification};
use ddi_agent::models::feedback::OutgoingFeedback;
use ddi_agent::providers::{CommandUpdater, UpdateResult, Updater};
use ddi_models::{DeploymentDescriptor, Execution, Finished, ProvisioningType};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::common::{
    artifact, cancel, chunk, descriptor, next, next_matching, probe, Harness, HarnessOptions,
    MockTransport, RecordingUpdater,
};

fn start(harness: &Harness) -> (ActorRef<UpdateMsg>, UnboundedReceiver<DeploymentMsg>) {
    let (parent, rx) = probe::<DeploymentMsg>(&harness.system, "deployment");
    let (update, _handle) = harness.system.spawn(
        "update",
        UpdateOrchestrator::new(harness.services.clone(), parent),
    );
    (update, rx)
}

fn os_update(id: &str, update: ProvisioningType) -> DeploymentDescriptor {
    descriptor(
        id,
        ProvisioningType::Forced,
        update,
        vec![chunk(
            "os",
            "fw",
            vec![artifact("fw.bin", b"firmware", "https://srv/fw.bin")],
        )],
    )
}

fn progress(feedback: &OutgoingFeedback) -> Option<(u32, u32)> {
    feedback.feedback().progress.map(|p| (p.total, p.completed))
}

#[tokio::test]
async fn test_first_failure_stops_the_update() {
    let dir = tempfile::tempdir().unwrap();
    let first = RecordingUpdater::new("first", 0, UpdateResult::failure(vec!["disk full".to_string()]));
    let second = RecordingUpdater::new("second", 1, UpdateResult::success(vec![]));
    let second_calls = second.calls.clone();
    let updaters: Vec<Arc<dyn Updater>> = vec![Arc::new(second), Arc::new(first)];
    let mut harness = Harness::new(
        dir.path(),
        MockTransport::new(),
        HarnessOptions {
            updaters,
            ..Default::default()
        },
    );
    let (update, mut parent) = start(&harness);

    update
        .send(UpdateMsg::Deployment(os_update("11", ProvisioningType::Forced)))
        .await;

    match next(&mut parent).await {
        DeploymentMsg::Update(UpdateOutcome::Failed(details)) => {
            assert_eq!(details, vec!["disk full".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }

    let feedback = harness.feedback_within(Duration::from_millis(100)).await;
    assert_eq!(feedback.len(), 3);
    assert_eq!(feedback[0].feedback().details, vec!["Applying 2 update(s)".to_string()]);
    assert_eq!(progress(&feedback[0]), Some((2, 0)));
    assert_eq!(feedback[1].feedback().details, vec!["first applying".to_string()]);
    assert_eq!(progress(&feedback[1]), Some((2, 0)));

    let last = feedback[2].feedback();
    assert_eq!(last.execution, Execution::Closed);
    assert_eq!(last.finished, Finished::Failure);
    assert_eq!(last.details, vec!["disk full".to_string()]);
    assert_eq!(progress(&feedback[2]), Some((2, 0)));

    assert!(second_calls.lock().unwrap().is_empty());
    next_matching(&mut harness.notifications, |n| {
        matches!(n, Notification::Event(ClientEvent::UpdateFinished { success: false, .. }))
    })
    .await;
}

#[tokio::test]
async fn test_all_updaters_applied_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let first = RecordingUpdater::new("first", 0, UpdateResult::success(vec!["os done".to_string()]));
    let second = RecordingUpdater::new("second", 1, UpdateResult::success(vec!["app done".to_string()]));
    let first_calls = first.calls.clone();
    let second_calls = second.calls.clone();
    let updaters: Vec<Arc<dyn Updater>> = vec![Arc::new(first), Arc::new(second)];
    let mut harness = Harness::new(
        dir.path(),
        MockTransport::new(),
        HarnessOptions {
            updaters,
            ..Default::default()
        },
    );
    let (update, mut parent) = start(&harness);

    update
        .send(UpdateMsg::Deployment(os_update("12", ProvisioningType::Attempt)))
        .await;

    match next(&mut parent).await {
        DeploymentMsg::Update(UpdateOutcome::Finished(details)) => {
            assert_eq!(details, vec!["os done".to_string(), "app done".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }

    let feedback = harness.feedback_within(Duration::from_millis(100)).await;
    let last = feedback.last().unwrap();
    assert_eq!(last.feedback().execution, Execution::Closed);
    assert_eq!(last.feedback().finished, Finished::Success);
    assert_eq!(progress(last), Some((2, 2)));

    let first_modules = first_calls.lock().unwrap();
    assert_eq!(first_modules.len(), 1);
    let path = &first_modules[0][0].artifacts[0].path;
    assert_eq!(
        path,
        &harness
            .services
            .action_dir("12")
            .join(ddi_agent::utils::md5_hash(b"firmware"))
    );
    assert_eq!(second_calls.lock().unwrap().len(), 1);

    next_matching(&mut harness.notifications, |n| {
        *n == Notification::State(ClientState::WaitingUpdateAuthorization)
    })
    .await;
    next_matching(&mut harness.notifications, |n| {
        *n == Notification::State(ClientState::Updating)
    })
    .await;
}

#[tokio::test]
async fn test_unclaimed_modules_finish_without_update() {
    let dir = tempfile::tempdir().unwrap();
    let bootloader: Arc<dyn Updater> = Arc::new(CommandUpdater::new("flash-boot", vec![]).for_part("bootloader"));
    let mut harness = Harness::new(
        dir.path(),
        MockTransport::new(),
        HarnessOptions {
            updaters: vec![bootloader],
            ..Default::default()
        },
    );
    let (update, mut parent) = start(&harness);

    update
        .send(UpdateMsg::Deployment(os_update("13", ProvisioningType::Attempt)))
        .await;

    assert!(matches!(
        next(&mut parent).await,
        DeploymentMsg::Update(UpdateOutcome::Finished(_))
    ));
    assert_eq!(
        next(&mut harness.notifications).await,
        Notification::Event(ClientEvent::NoUpdate {
            action_id: "13".to_string()
        })
    );
    let feedback = harness.next_feedback().await;
    assert_eq!(feedback.feedback().finished, Finished::Success);
    assert_eq!(feedback.feedback().details, vec!["No update applied".to_string()]);
}

#[tokio::test]
async fn test_cancel_rejected_in_update_phase() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = Harness::new(
        dir.path(),
        MockTransport::new(),
        HarnessOptions {
            soft_permit: false,
            ..Default::default()
        },
    );
    let (update, mut parent) = start(&harness);

    update
        .send(UpdateMsg::Deployment(os_update("14", ProvisioningType::Attempt)))
        .await;
    next_matching(&mut harness.notifications, |n| {
        *n == Notification::State(ClientState::WaitingUpdateAuthorization)
    })
    .await;

    update.send(UpdateMsg::Cancel(cancel("15", "14"))).await;

    match harness.next_feedback().await {
        OutgoingFeedback::Cancel(feedback) => {
            assert_eq!(feedback.action_id, "15");
            assert_eq!(feedback.execution, Execution::Rejected);
            assert_eq!(feedback.details, vec![UPDATE_NOT_STOPPABLE.to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(parent.try_recv().is_err());
}
