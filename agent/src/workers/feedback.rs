//! Ordered feedback delivery
//!
//! A single consumer drains the queue so feedback reaches the server in the
//! order it was produced. Retryable responses hold the queue until the message
//! is delivered or its attempts run out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::poller::ConnectionMsg;
use crate::actor::ActorRef;
use crate::events::{ClientEvent, HubRef};
use crate::http::DdiTransport;
use crate::models::feedback::OutgoingFeedback;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Feedback worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay window between resends
    pub retry: CooldownOptions,

    /// Attempts per message, the first send included
    pub max_attempts: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            retry: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
            max_attempts: 300,
        }
    }
}

/// How one message fared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: bool,
    pub status: Option<u16>,
    pub attempts: u32,
}

/// 5xx, 409 and 429 are worth sending again
pub fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::CONFLICT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Send one message, retrying the same payload with a resend note each time
pub async fn deliver(transport: &dyn DdiTransport, feedback: &OutgoingFeedback, options: &Options) -> Delivery {
    let max_attempts = options.max_attempts.max(1);
    let mut payload = feedback.clone();
    let mut attempts = 0;
    let mut last_status = None;

    loop {
        attempts += 1;
        let wire = payload.feedback().to_wire();
        let sent = match &payload {
            OutgoingFeedback::Deployment(_) => transport.post_deployment_feedback(&wire).await,
            OutgoingFeedback::Cancel(_) => transport.post_cancel_feedback(&wire).await,
        };

        let retry = match sent {
            Ok(status) if status.is_success() => {
                return Delivery {
                    delivered: true,
                    status: Some(status.as_u16()),
                    attempts,
                };
            }
            Ok(status) => {
                last_status = Some(status.as_u16());
                is_retryable(status)
            }
            Err(e) => {
                debug!(error = %e, "Feedback send failed");
                true
            }
        };

        if !retry || attempts >= max_attempts {
            warn!(
                action_id = %payload.feedback().action_id,
                attempts,
                status = ?last_status,
                "Giving up on feedback"
            );
            return Delivery {
                delivered: false,
                status: last_status,
                attempts,
            };
        }

        let delay = calc_exp_backoff(&options.retry, attempts - 1);
        debug!(action_id = %payload.feedback().action_id, attempts, ?delay, "Resending feedback");
        tokio::time::sleep(delay).await;
        payload = feedback.resent(Utc::now());
    }
}

/// Run the delivery worker until the queue closes
pub async fn run(
    mut rx: mpsc::UnboundedReceiver<OutgoingFeedback>,
    transport: Arc<dyn DdiTransport>,
    hub: HubRef,
    connection: ActorRef<ConnectionMsg>,
    options: Options,
) {
    info!("Feedback worker starting...");

    while let Some(feedback) = rx.recv().await {
        let delivery = deliver(transport.as_ref(), &feedback, &options).await;
        let inner = feedback.feedback();
        debug!(action_id = %inner.action_id, execution = ?inner.execution, ?delivery, "Feedback processed");

        hub.send(
            ClientEvent::FeedbackResult {
                action_id: inner.action_id.clone(),
                execution: inner.execution,
                delivered: delivery.delivered,
                status: delivery.status,
                attempts: delivery.attempts,
            }
            .into(),
        )
        .await;

        if inner.is_closed() {
            connection.send(ConnectionMsg::FeedbackSettled).await;
        }
    }

    info!("Feedback worker stopped");
}
