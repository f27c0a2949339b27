//! Action coordinator
//!
//! Turns what the connection observed on the server into at most one running
//! deployment. A deployment for another action first stops the running one; the
//! new action is picked up by the poll that follows.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::poller::ConnectionMsg;
use crate::actor::{Actor, ActorRef, ChildFailure, Context};
use crate::deploy::deployment::{DeploymentMsg, DeploymentOrchestrator};
use crate::deploy::fsm::DeploymentOutcome;
use crate::deploy::DeploymentServices;
use crate::errors::AgentError;
use crate::events::{ClientEvent, ClientState};
use crate::models::deployment::{CancelDescriptor, DeploymentDescriptor};
use crate::models::feedback::{Feedback, OutgoingFeedback};

const DEPLOYMENT_CHILD: &str = "deployment";

/// Action coordinator options
#[derive(Debug, Clone)]
pub struct Options {
    /// Poll interval while a deployment runs
    pub deployment_poll_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            deployment_poll_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ActionMsg {
    DeploymentInfo {
        descriptor: DeploymentDescriptor,
        /// False when the server returned the descriptor as unchanged
        info_changed: bool,
    },
    CancelInfo(CancelDescriptor),
    NoAction,
    DeploymentEnded {
        action_id: String,
        outcome: DeploymentOutcome,
    },
    ChildFailed(ChildFailure),
}

impl From<ChildFailure> for ActionMsg {
    fn from(failure: ChildFailure) -> Self {
        ActionMsg::ChildFailed(failure)
    }
}

#[derive(Debug)]
struct InFlight {
    action_id: String,
    orchestrator: ActorRef<DeploymentMsg>,
    /// A forced cancel went out; the next action waits for the end
    stopping: bool,
    /// Another action showed up meanwhile
    superseded: bool,
}

pub struct ActionCoordinator {
    services: DeploymentServices,
    options: Options,
    current: Option<InFlight>,
}

impl ActionCoordinator {
    pub fn new(services: DeploymentServices, options: Options) -> Self {
        Self {
            services,
            options,
            current: None,
        }
    }

    async fn set_ping(&self, interval: Option<Duration>) {
        self.services
            .connection
            .send(ConnectionMsg::SetPing(interval))
            .await;
    }

    async fn force_cancel(&mut self) {
        if let Some(current) = self.current.as_mut() {
            if !current.stopping {
                current.stopping = true;
                current.orchestrator.send(DeploymentMsg::CancelForced).await;
            }
        }
    }

    async fn on_deployment(&mut self, ctx: &mut Context<ActionMsg>, descriptor: DeploymentDescriptor, info_changed: bool) {
        let action_id = descriptor.action_id().to_string();

        if let Some(current) = self.current.as_mut() {
            if current.action_id == action_id {
                if info_changed {
                    current
                        .orchestrator
                        .send(DeploymentMsg::Deployment(descriptor))
                        .await;
                }
            } else {
                info!(current = %current.action_id, next = %action_id, "New action supersedes running deployment");
                current.superseded = true;
                self.force_cancel().await;
            }
            return;
        }

        info!(action_id = %action_id, "Starting deployment");
        let me = ctx.myself();
        let orchestrator = ctx.spawn_child(
            DEPLOYMENT_CHILD,
            DeploymentOrchestrator::new(self.services.clone(), me),
        );
        orchestrator.send(DeploymentMsg::Deployment(descriptor)).await;
        self.current = Some(InFlight {
            action_id: action_id.clone(),
            orchestrator,
            stopping: false,
            superseded: false,
        });

        self.services
            .notify(ClientEvent::UpdateAvailable { action_id })
            .await;
        self.set_ping(Some(self.options.deployment_poll_interval)).await;
    }

    async fn on_cancel(&mut self, cancel: CancelDescriptor) {
        if !self.services.registry.all_cancellable() {
            info!(action_id = %cancel.action_id(), "Cancel rejected, an updater is not cancellable");
            self.services
                .feedback(OutgoingFeedback::Cancel(Feedback::rejected(
                    cancel.action_id(),
                    vec!["Cancellation not supported by the installed updaters".to_string()],
                )))
                .await;
            return;
        }

        match &self.current {
            Some(current) if current.action_id == cancel.stop_id() => {
                current.orchestrator.send(DeploymentMsg::Cancel(cancel)).await
            }
            Some(current) => {
                warn!(
                    action_id = %cancel.action_id(),
                    stop_id = %cancel.stop_id(),
                    running = %current.action_id,
                    "Cancel targets an action that is not running, acknowledging it"
                );
                self.services
                    .feedback(OutgoingFeedback::Cancel(Feedback::closed_success(
                        cancel.action_id(),
                        vec![format!("Cancelled, action {} not in progress", cancel.stop_id())],
                    )))
                    .await;
            }
            None => {
                info!(action_id = %cancel.action_id(), "Cancel acknowledged, nothing running");
                self.services
                    .feedback(OutgoingFeedback::Cancel(Feedback::closed_success(
                        cancel.action_id(),
                        vec!["Cancelled, no deployment in progress".to_string()],
                    )))
                    .await;
                self.services.notify(ClientState::CancellingUpdate).await;
            }
        }
    }

    /// Forget the running deployment and go back to the server's interval
    async fn clear(&mut self) -> bool {
        let superseded = self.current.take().is_some_and(|c| c.superseded);
        self.set_ping(None).await;
        superseded
    }
}

#[async_trait]
impl Actor for ActionCoordinator {
    type Msg = ActionMsg;

    async fn started(&mut self, ctx: &mut Context<ActionMsg>) -> Result<(), AgentError> {
        self.services
            .connection
            .send(ConnectionMsg::Register(ctx.myself()))
            .await;
        Ok(())
    }

    async fn handle(&mut self, ctx: &mut Context<ActionMsg>, msg: ActionMsg) -> Result<(), AgentError> {
        match msg {
            ActionMsg::DeploymentInfo {
                descriptor,
                info_changed,
            } => self.on_deployment(ctx, descriptor, info_changed).await,
            ActionMsg::CancelInfo(cancel) => self.on_cancel(cancel).await,
            ActionMsg::NoAction => {
                if self.current.is_some() {
                    warn!("Server reports no action while a deployment runs, stopping it");
                    self.force_cancel().await;
                } else {
                    self.services.notify(ClientState::Idle).await;
                }
            }
            ActionMsg::DeploymentEnded { action_id, outcome } => {
                if self.current.as_ref().is_none_or(|c| c.action_id != action_id) {
                    debug!(action_id = %action_id, "Ignoring end of unknown deployment");
                    return Ok(());
                }
                info!(action_id = %action_id, ?outcome, "Deployment finished");
                if self.clear().await {
                    self.services.connection.send(ConnectionMsg::ForcePing).await;
                }
            }
            ActionMsg::ChildFailed(failure) => {
                warn!(%failure, "Deployment failed unexpectedly");
                if let Some(current) = &self.current {
                    self.services
                        .feedback(OutgoingFeedback::Deployment(Feedback::closed_failure(
                            &current.action_id,
                            vec![failure.to_string()],
                        )))
                        .await;
                }
                self.clear().await;
                self.services
                    .notify(ClientEvent::error(failure.to_string()))
                    .await;
            }
        }
        Ok(())
    }

    async fn stopped(&mut self, ctx: &mut Context<ActionMsg>) {
        self.services
            .connection
            .send(ConnectionMsg::Unregister(ctx.id()))
            .await;
    }
}
