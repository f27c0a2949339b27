//! One deployment from descriptor to final outcome
//!
//! Runs the download phase, then the update phase, each as a child unit.
//! Cancellation is honored until the update phase starts.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::download::{DownloadMsg, DownloadOrchestrator};
use super::fsm::{DeploymentFsm, DeploymentOutcome, DeploymentPhase, PhaseEvent};
use super::update::{UpdateMsg, UpdateOrchestrator};
use super::DeploymentServices;
use crate::actor::{Actor, ActorRef, ChildFailure, Context};
use crate::errors::AgentError;
use crate::events::ClientState;
use crate::models::deployment::{CancelDescriptor, DeploymentDescriptor};
use crate::models::feedback::{Feedback, OutgoingFeedback};
use crate::workers::actions::ActionMsg;

const DOWNLOAD_CHILD: &str = "download";
const UPDATE_CHILD: &str = "update";

pub const UPDATE_NOT_STOPPABLE: &str = "Update already started, can't be stopped";

#[derive(Debug)]
pub enum DownloadOutcome {
    /// Every artifact is on disk; carries the descriptor the phase ran with
    Finished(DeploymentDescriptor),
    Failed(Vec<String>),
    Stopped,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Finished(Vec<String>),
    Failed(Vec<String>),
}

#[derive(Debug)]
pub enum DeploymentMsg {
    Deployment(DeploymentDescriptor),
    Cancel(CancelDescriptor),
    CancelForced,
    Download(DownloadOutcome),
    Update(UpdateOutcome),
    ChildFailed(ChildFailure),
}

impl From<ChildFailure> for DeploymentMsg {
    fn from(failure: ChildFailure) -> Self {
        DeploymentMsg::ChildFailed(failure)
    }
}

pub struct DeploymentOrchestrator {
    services: DeploymentServices,
    parent: ActorRef<ActionMsg>,
    fsm: DeploymentFsm,
    descriptor: Option<DeploymentDescriptor>,
    download: Option<ActorRef<DownloadMsg>>,
    update: Option<ActorRef<UpdateMsg>>,
}

impl DeploymentOrchestrator {
    pub fn new(services: DeploymentServices, parent: ActorRef<ActionMsg>) -> Self {
        Self {
            services,
            parent,
            fsm: DeploymentFsm::new(),
            descriptor: None,
            download: None,
            update: None,
        }
    }

    fn action_id(&self) -> Option<String> {
        self.descriptor.as_ref().map(|d| d.action_id().to_string())
    }

    async fn acknowledge_cancel(&self, cancel: &CancelDescriptor) {
        self.services
            .feedback(OutgoingFeedback::Cancel(Feedback::closed_success(
                cancel.action_id(),
                vec!["Deployment cancelled".to_string()],
            )))
            .await;
        self.services.notify(ClientState::CancellingUpdate).await;
    }

    async fn reject_cancel(&self, cancel: &CancelDescriptor) {
        self.services
            .feedback(OutgoingFeedback::Cancel(Feedback::rejected(
                cancel.action_id(),
                vec![UPDATE_NOT_STOPPABLE.to_string()],
            )))
            .await;
    }

    fn live_download(&self, ctx: &Context<DeploymentMsg>) -> Option<ActorRef<DownloadMsg>> {
        self.download.clone().filter(|_| ctx.has_child(DOWNLOAD_CHILD))
    }

    fn live_update(&self, ctx: &Context<DeploymentMsg>) -> Option<ActorRef<UpdateMsg>> {
        self.update.clone().filter(|_| ctx.has_child(UPDATE_CHILD))
    }

    async fn end(&mut self, ctx: &mut Context<DeploymentMsg>, event: PhaseEvent) -> Result<(), AgentError> {
        self.fsm.process(event)?;
        let outcome = self.fsm.outcome().unwrap_or(DeploymentOutcome::Stopped);
        info!(action_id = ?self.action_id(), ?outcome, "Deployment ended");

        ctx.close_children();
        self.parent
            .send(ActionMsg::DeploymentEnded {
                action_id: self.action_id().unwrap_or_default(),
                outcome,
            })
            .await;
        ctx.stop();
        Ok(())
    }

    async fn on_beginning(&mut self, ctx: &mut Context<DeploymentMsg>, msg: DeploymentMsg) -> Result<(), AgentError> {
        match msg {
            DeploymentMsg::Deployment(descriptor) => {
                self.fsm.process(PhaseEvent::Begin)?;
                let me = ctx.myself();
                let download = ctx.spawn_child(
                    DOWNLOAD_CHILD,
                    DownloadOrchestrator::new(self.services.clone(), me),
                );
                download
                    .send(DownloadMsg::Deployment(descriptor.clone()))
                    .await;
                self.download = Some(download);
                self.descriptor = Some(descriptor);
            }
            DeploymentMsg::Cancel(cancel) => {
                self.acknowledge_cancel(&cancel).await;
                self.end(ctx, PhaseEvent::Stopped).await?;
            }
            DeploymentMsg::CancelForced => self.end(ctx, PhaseEvent::Stopped).await?,
            other => debug!(?other, "Ignoring message before deployment start"),
        }
        Ok(())
    }

    async fn on_downloading(&mut self, ctx: &mut Context<DeploymentMsg>, msg: DeploymentMsg) -> Result<(), AgentError> {
        match msg {
            DeploymentMsg::Deployment(descriptor) => {
                if let Some(download) = self.live_download(ctx) {
                    download
                        .send(DownloadMsg::Deployment(descriptor.clone()))
                        .await;
                }
                self.descriptor = Some(descriptor);
            }
            DeploymentMsg::Download(DownloadOutcome::Finished(descriptor)) => {
                self.fsm.process(PhaseEvent::DownloadFinished)?;
                self.download = None;

                // A descriptor received meanwhile for the same action wins
                let descriptor = match self.descriptor.take() {
                    Some(latest) if latest.action_id() == descriptor.action_id() => latest,
                    _ => descriptor,
                };
                let me = ctx.myself();
                let update = ctx.spawn_child(
                    UPDATE_CHILD,
                    UpdateOrchestrator::new(self.services.clone(), me),
                );
                update.send(UpdateMsg::Deployment(descriptor.clone())).await;
                self.update = Some(update);
                self.descriptor = Some(descriptor);
            }
            DeploymentMsg::Download(DownloadOutcome::Failed(details)) => {
                self.end(ctx, PhaseEvent::Failed(details.join("; "))).await?;
            }
            DeploymentMsg::Download(DownloadOutcome::Stopped) => {
                self.end(ctx, PhaseEvent::Stopped).await?;
            }
            DeploymentMsg::Cancel(cancel) => match self.live_download(ctx) {
                Some(download) => download.send(DownloadMsg::Cancel(cancel)).await,
                None => {
                    self.acknowledge_cancel(&cancel).await;
                    self.end(ctx, PhaseEvent::Stopped).await?;
                }
            },
            DeploymentMsg::CancelForced => match self.live_download(ctx) {
                Some(download) => download.send(DownloadMsg::CancelForced).await,
                None => self.end(ctx, PhaseEvent::Stopped).await?,
            },
            DeploymentMsg::ChildFailed(failure) => self.child_failed(ctx, failure).await?,
            other => debug!(?other, "Ignoring message while downloading"),
        }
        Ok(())
    }

    async fn on_updating(&mut self, ctx: &mut Context<DeploymentMsg>, msg: DeploymentMsg) -> Result<(), AgentError> {
        match msg {
            DeploymentMsg::Deployment(descriptor) => {
                if let Some(update) = self.live_update(ctx) {
                    update.send(UpdateMsg::Deployment(descriptor)).await;
                }
            }
            DeploymentMsg::Update(UpdateOutcome::Finished(_)) => {
                self.end(ctx, PhaseEvent::UpdateFinished).await?;
            }
            DeploymentMsg::Update(UpdateOutcome::Failed(details)) => {
                self.end(ctx, PhaseEvent::Failed(details.join("; "))).await?;
            }
            DeploymentMsg::Cancel(cancel) => match self.live_update(ctx) {
                Some(update) => update.send(UpdateMsg::Cancel(cancel)).await,
                None => self.reject_cancel(&cancel).await,
            },
            DeploymentMsg::CancelForced => {
                warn!(action_id = ?self.action_id(), "Forced cancel ignored, update already started");
            }
            DeploymentMsg::ChildFailed(failure) => self.child_failed(ctx, failure).await?,
            other => debug!(?other, "Ignoring message while updating"),
        }
        Ok(())
    }

    async fn child_failed(&mut self, ctx: &mut Context<DeploymentMsg>, failure: ChildFailure) -> Result<(), AgentError> {
        warn!(%failure, "Deployment phase failed unexpectedly");
        if let Some(action_id) = self.action_id() {
            self.services
                .feedback(OutgoingFeedback::Deployment(Feedback::closed_failure(
                    action_id,
                    vec![failure.to_string()],
                )))
                .await;
        }
        self.end(ctx, PhaseEvent::Failed(failure.error)).await
    }
}

#[async_trait]
impl Actor for DeploymentOrchestrator {
    type Msg = DeploymentMsg;

    async fn handle(
        &mut self,
        ctx: &mut Context<DeploymentMsg>,
        msg: DeploymentMsg,
    ) -> Result<(), AgentError> {
        match self.fsm.phase() {
            DeploymentPhase::Beginning => self.on_beginning(ctx, msg).await,
            DeploymentPhase::Downloading => self.on_downloading(ctx, msg).await,
            DeploymentPhase::Updating => self.on_updating(ctx, msg).await,
            DeploymentPhase::Terminal => {
                debug!(?msg, "Deployment already ended");
                Ok(())
            }
        }
    }
}
