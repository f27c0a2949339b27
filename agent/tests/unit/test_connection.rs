//! Connection coordinator tests: polling, backoff, feedback delivery

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ddi_agent::actor::{ActorRef, ActorSystem};
use ddi_agent::errors::AgentError;
use ddi_agent::events::{ClientEvent, Notification};
use ddi_agent::models::feedback::{Feedback, OutgoingFeedback};
use ddi_agent::providers::StaticConfigData;
use ddi_agent::utils::CooldownOptions;
use ddi_agent::workers::actions::ActionMsg;
use ddi_agent::workers::feedback;
use ddi_agent::workers::poller::{self, ConnectionCoordinator, ConnectionMsg};
use ddi_models::{ConfigDataMode, ControllerBase, Execution, Link, ProvisioningType};
use http::StatusCode;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::common::{
    base_with_cancel, base_with_deployment, cancel, changed, descriptor, drain_for, next,
    next_matching, probe, MockTransport,
};

const HOUR: Duration = Duration::from_secs(3600);

struct Connection {
    _system: ActorSystem,
    coordinator: ActorRef<ConnectionMsg>,
    hub: UnboundedReceiver<Notification>,
    actions: UnboundedReceiver<ActionMsg>,
}

fn options(backoff_base: Duration, timeout_backoff: Duration) -> poller::Options {
    poller::Options {
        default_poll_interval: HOUR,
        backoff: CooldownOptions {
            base_delay: backoff_base,
            max_delay: backoff_base * 4,
            multiplier: 2.0,
        },
        timeout_backoff,
    }
}

async fn connect(transport: &MockTransport, attributes: BTreeMap<String, String>, options: poller::Options) -> Connection {
    let system = ActorSystem::new();
    let (hub_ref, hub) = probe::<Notification>(&system, "hub");
    let (listener, actions) = probe::<ActionMsg>(&system, "actions");
    let (coordinator, _handle) = system.spawn(
        "connection",
        ConnectionCoordinator::new(
            Arc::new(transport.clone()),
            Arc::new(StaticConfigData::new(attributes)),
            hub_ref,
            options,
            feedback::Options {
                retry: CooldownOptions {
                    base_delay: Duration::from_millis(5),
                    max_delay: Duration::from_millis(20),
                    multiplier: 2.0,
                },
                max_attempts: 5,
            },
        ),
    );
    coordinator.send(ConnectionMsg::Register(listener)).await;
    coordinator.send(ConnectionMsg::Start).await;
    Connection {
        _system: system,
        coordinator,
        hub,
        actions,
    }
}

fn is_polling(n: &Notification) -> bool {
    *n == Notification::Event(ClientEvent::Polling)
}

fn deployment_21() -> ddi_models::DeploymentDescriptor {
    descriptor("21", ProvisioningType::Forced, ProvisioningType::Forced, vec![])
}

#[tokio::test]
async fn test_deployment_info_uses_cached_etags() {
    let transport = MockTransport::new();
    transport.push_base(changed(base_with_deployment("21"), "b1"));
    transport.push_base(changed(base_with_deployment("21"), "b2"));
    transport.set_deployment(deployment_21(), "d1");
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(20), HOUR)).await;

    match next(&mut conn.actions).await {
        ActionMsg::DeploymentInfo { descriptor, info_changed } => {
            assert_eq!(descriptor.id, "21");
            assert!(info_changed);
        }
        other => panic!("unexpected {:?}", other),
    }

    // A settled feedback triggers the next round with the cached tokens
    conn.coordinator.send(ConnectionMsg::FeedbackSettled).await;
    match next(&mut conn.actions).await {
        ActionMsg::DeploymentInfo { descriptor, info_changed } => {
            assert_eq!(descriptor.id, "21");
            assert!(!info_changed);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(transport.base_etags(), vec![None, Some("b1".to_string())]);
    assert_eq!(transport.deployment_fetches(), 2);
}

#[tokio::test]
async fn test_cancel_info_reaches_listeners() {
    let transport = MockTransport::new();
    transport.push_base(changed(base_with_cancel("22"), "b1"));
    transport.set_cancel(cancel("22", "21"));
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(20), HOUR)).await;

    match next(&mut conn.actions).await {
        ActionMsg::CancelInfo(descriptor) => {
            assert_eq!(descriptor.action_id(), "22");
            assert_eq!(descriptor.stop_id(), "21");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(transport.deployment_fetches(), 0);
}

#[tokio::test]
async fn test_forced_ping_without_change_reports_no_new_state() {
    let transport = MockTransport::new();
    transport.push_base(changed(ControllerBase::default(), "b1"));
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(20), HOUR)).await;

    assert!(matches!(next(&mut conn.actions).await, ActionMsg::NoAction));

    conn.coordinator.send(ConnectionMsg::ForcePing).await;
    next_matching(&mut conn.hub, |n| *n == Notification::Event(ClientEvent::NoNewState)).await;

    // Forced rounds drop the cached base tag
    assert_eq!(transport.base_etags(), vec![None, None]);
    assert!(conn.actions.try_recv().is_err());
}

#[tokio::test]
async fn test_failure_clears_tokens_and_backoff_resets_after_success() {
    let transport = MockTransport::new();
    transport.push_base(changed(ControllerBase::default(), "b1"));
    transport.push_base(Err(AgentError::HttpStatus {
        status: 500,
        body: "down".to_string(),
    }));
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(150), HOUR)).await;

    assert!(matches!(next(&mut conn.actions).await, ActionMsg::NoAction));
    conn.coordinator.send(ConnectionMsg::FeedbackSettled).await;

    next_matching(&mut conn.hub, |n| {
        matches!(n, Notification::Event(ClientEvent::Error { .. }))
    })
    .await;

    // The backoff timer polls again without the cached tag
    next_matching(&mut conn.hub, is_polling).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.base_etags().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        transport.base_etags(),
        vec![None, Some("b1".to_string()), None]
    );

    // Success restores the hourly interval
    let later = drain_for(&mut conn.hub, Duration::from_millis(400)).await;
    assert!(!later.iter().any(is_polling));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_to_cap_and_resets_on_success() {
    let transport = MockTransport::new();
    for _ in 0..4 {
        transport.push_base(Err(AgentError::HttpStatus {
            status: 500,
            body: "down".to_string(),
        }));
    }
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(40), HOUR)).await;

    let mut polled_at = Vec::new();
    for _ in 0..5 {
        next_matching(&mut conn.hub, is_polling).await;
        polled_at.push(tokio::time::Instant::now());
    }
    let gaps: Vec<u128> = polled_at
        .windows(2)
        .map(|w| (w[1] - w[0]).as_millis())
        .collect();

    // 40ms doubling, capped at 160ms
    for (gap, expected) in gaps.iter().zip([40u128, 80, 160, 160]) {
        assert!(
            *gap >= expected && *gap < expected + 10,
            "gaps {:?}",
            gaps
        );
    }

    // The fifth round succeeds and the hourly interval applies again
    let later = drain_for(&mut conn.hub, Duration::from_secs(60)).await;
    assert!(!later.iter().any(is_polling));
    assert_eq!(transport.base_etags().len(), 5);
}

#[tokio::test]
async fn test_timeout_uses_timeout_backoff() {
    let transport = MockTransport::new();
    transport.push_base(Err(AgentError::Timeout("request timed out".to_string())));
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(10), HOUR)).await;

    next_matching(&mut conn.hub, |n| {
        matches!(n, Notification::Event(ClientEvent::Error { .. }))
    })
    .await;

    let later = drain_for(&mut conn.hub, Duration::from_millis(200)).await;
    assert!(!later.iter().any(is_polling));
    assert_eq!(transport.base_etags().len(), 1);
}

#[tokio::test]
async fn test_feedback_resent_after_server_error() {
    let transport = MockTransport::new();
    transport.push_feedback_status(StatusCode::SERVICE_UNAVAILABLE);
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(20), HOUR)).await;
    next_matching(&mut conn.hub, is_polling).await;

    conn.coordinator
        .send(ConnectionMsg::Feedback(OutgoingFeedback::Deployment(
            Feedback::closed_success("21", vec!["done".to_string()]),
        )))
        .await;

    let result = next_matching(&mut conn.hub, |n| {
        matches!(n, Notification::Event(ClientEvent::FeedbackResult { .. }))
    })
    .await;
    assert_eq!(
        result,
        Notification::Event(ClientEvent::FeedbackResult {
            action_id: "21".to_string(),
            execution: Execution::Closed,
            delivered: true,
            status: Some(200),
            attempts: 2,
        })
    );

    let posted = transport.posted();
    assert_eq!(posted.len(), 2);
    assert_eq!(posted[0].body().status.details, vec!["done".to_string()]);
    let resent = &posted[1].body().status.details;
    assert_eq!(resent.len(), 2);
    assert!(resent[1].starts_with("Resent at "));

    // Closed feedback prompts a fresh poll
    next_matching(&mut conn.hub, is_polling).await;
}

#[tokio::test]
async fn test_feedback_keeps_order_while_resending() {
    let transport = MockTransport::new();
    transport.push_feedback_status(StatusCode::SERVICE_UNAVAILABLE);
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(20), HOUR)).await;
    next_matching(&mut conn.hub, is_polling).await;

    for detail in ["A", "B"] {
        conn.coordinator
            .send(ConnectionMsg::Feedback(OutgoingFeedback::Deployment(Feedback::proceeding(
                "50",
                vec![detail.to_string()],
            ))))
            .await;
    }

    for _ in 0..2 {
        next_matching(&mut conn.hub, |n| {
            matches!(n, Notification::Event(ClientEvent::FeedbackResult { .. }))
        })
        .await;
    }

    let first_details: Vec<String> = transport
        .posted()
        .iter()
        .map(|p| p.body().status.details[0].clone())
        .collect();
    assert_eq!(first_details, vec!["A", "A", "B"]);
    assert!(transport.posted()[1].body().status.details[1].starts_with("Resent at "));
}

#[tokio::test]
async fn test_feedback_client_error_not_retried() {
    let transport = MockTransport::new();
    transport.push_feedback_status(StatusCode::NOT_FOUND);
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(20), HOUR)).await;

    conn.coordinator
        .send(ConnectionMsg::Feedback(OutgoingFeedback::Cancel(Feedback::proceeding(
            "30",
            vec![],
        ))))
        .await;

    let result = next_matching(&mut conn.hub, |n| {
        matches!(n, Notification::Event(ClientEvent::FeedbackResult { .. }))
    })
    .await;
    match result {
        Notification::Event(ClientEvent::FeedbackResult {
            delivered,
            status,
            attempts,
            ..
        }) => {
            assert!(!delivered);
            assert_eq!(status, Some(404));
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(transport.posted().len(), 1);
}

#[tokio::test]
async fn test_config_data_pushed_once() {
    let transport = MockTransport::new();
    let mut base = ControllerBase::default();
    base.links.config_data = Some(Link {
        href: "http://srv/DEFAULT/controller/v1/dev/configData".to_string(),
    });
    transport.push_base(changed(base.clone(), "b1"));
    transport.push_base(changed(base, "b2"));
    let attributes = BTreeMap::from([("hw".to_string(), "rev2".to_string())]);
    let mut conn = connect(&transport, attributes.clone(), options(Duration::from_millis(20), HOUR)).await;

    assert!(matches!(next(&mut conn.actions).await, ActionMsg::NoAction));
    conn.coordinator.send(ConnectionMsg::FeedbackSettled).await;
    assert!(matches!(next(&mut conn.actions).await, ActionMsg::NoAction));

    let pushes = transport.config_pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].mode, ConfigDataMode::Merge);
    assert_eq!(pushes[0].data, attributes);
}

#[tokio::test]
async fn test_stopped_connection_drops_feedback() {
    let transport = MockTransport::new();
    let mut conn = connect(&transport, BTreeMap::new(), options(Duration::from_millis(20), HOUR)).await;
    next_matching(&mut conn.hub, is_polling).await;

    conn.coordinator.send(ConnectionMsg::Stop).await;
    conn.coordinator
        .send(ConnectionMsg::Feedback(OutgoingFeedback::Deployment(Feedback::proceeding(
            "40",
            vec![],
        ))))
        .await;
    conn.coordinator.send(ConnectionMsg::ForcePing).await;

    let later = drain_for(&mut conn.hub, Duration::from_millis(150)).await;
    assert!(!later.iter().any(is_polling));
    assert!(transport.posted().is_empty());
}
