//! Update phase of one deployment
//!
//! Waits for an update permit, then hands the claimed modules to each updater
//! in ascending priority. The first failing updater ends the phase.

use std::panic::AssertUnwindSafe;
use std::path::Path;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::deployment::{DeploymentMsg, UpdateOutcome, UPDATE_NOT_STOPPABLE};
use super::registry::Assignment;
use super::DeploymentServices;
use crate::actor::{Actor, ActorRef, Context};
use crate::errors::AgentError;
use crate::events::{ClientEvent, ClientState};
use crate::models::deployment::{
    CancelDescriptor, DeploymentDescriptor, ProvisioningType, ResolvedArtifact, ResolvedModule,
};
use crate::models::feedback::{Feedback, OutgoingFeedback};
use crate::providers::{PermitRequest, Phase, UpdateResult};

const PERMIT_TASK: &str = "permit";
const APPLY_TASK: &str = "apply";

/// Lets an updater report progress text while it runs
#[derive(Debug, Clone)]
pub struct Messenger {
    target: ActorRef<UpdateMsg>,
    index: u32,
}

impl Messenger {
    pub fn new(target: ActorRef<UpdateMsg>, index: u32) -> Self {
        Self { target, index }
    }

    pub async fn send(&self, text: impl Into<String>) {
        self.target
            .send(UpdateMsg::Message {
                index: self.index,
                text: text.into(),
            })
            .await;
    }
}

#[derive(Debug)]
pub enum UpdateMsg {
    Deployment(DeploymentDescriptor),
    Permit { action_id: String, granted: bool },
    /// Progress text from the updater at `index`
    Message { index: u32, text: String },
    Applied { index: u32, result: UpdateResult },
    Cancel(CancelDescriptor),
    CancelForced,
}

#[derive(Debug)]
enum State {
    Idle,
    WaitingPermit(DeploymentDescriptor),
    Updating {
        descriptor: DeploymentDescriptor,
        assignments: Vec<Assignment>,
        index: u32,
        details: Vec<String>,
    },
    Done,
}

pub struct UpdateOrchestrator {
    services: DeploymentServices,
    parent: ActorRef<DeploymentMsg>,
    state: State,
}

impl UpdateOrchestrator {
    pub fn new(services: DeploymentServices, parent: ActorRef<DeploymentMsg>) -> Self {
        Self {
            services,
            parent,
            state: State::Idle,
        }
    }

    fn claims(&self, descriptor: &DeploymentDescriptor) -> Vec<Assignment> {
        self.services
            .registry
            .resolve(descriptor.chunks())
            .into_iter()
            .filter(|a| !a.chunks.is_empty())
            .collect()
    }

    async fn begin(&mut self, ctx: &mut Context<UpdateMsg>, descriptor: DeploymentDescriptor) {
        ctx.cancel_task(PERMIT_TASK);
        let action_id = descriptor.action_id().to_string();

        if self.claims(&descriptor).is_empty() {
            info!(action_id = %action_id, "No updater claimed any module");
            self.services
                .notify(ClientEvent::NoUpdate {
                    action_id: action_id.clone(),
                })
                .await;
            let details = vec!["No update applied".to_string()];
            self.services
                .feedback(OutgoingFeedback::Deployment(Feedback::closed_success(
                    &action_id,
                    details.clone(),
                )))
                .await;
            self.end(ctx, UpdateOutcome::Finished(details)).await;
            return;
        }

        let provisioning = descriptor.update_type();
        match provisioning {
            ProvisioningType::Forced => {}
            ProvisioningType::Skip => {
                warn!(action_id = %action_id, "Update type 'skip' is handled like 'attempt'");
                self.services.notify(ClientState::WaitingUpdateAuthorization).await;
            }
            ProvisioningType::Attempt => {
                self.services.notify(ClientState::WaitingUpdateAuthorization).await;
            }
        }

        let provider = self.services.authorizations.for_type(provisioning);
        let request = PermitRequest {
            action_id,
            phase: Phase::Update,
        };
        let me = ctx.myself();
        ctx.spawn_task(PERMIT_TASK, async move {
            let granted = provider.authorize(&request).await;
            me.send(UpdateMsg::Permit {
                action_id: request.action_id,
                granted,
            })
            .await;
        });
        self.state = State::WaitingPermit(descriptor);
    }

    async fn start_update(&mut self, ctx: &mut Context<UpdateMsg>, descriptor: DeploymentDescriptor) {
        let assignments = self.claims(&descriptor);
        let total = assignments.len() as u32;
        let action_id = descriptor.action_id().to_string();
        info!(action_id = %action_id, updaters = total, "Starting update");

        self.services.notify(ClientState::Updating).await;
        self.services
            .feedback(OutgoingFeedback::Deployment(
                Feedback::proceeding(&action_id, vec![format!("Applying {} update(s)", total)])
                    .with_progress(total, 0),
            ))
            .await;

        self.state = State::Updating {
            descriptor,
            assignments,
            index: 0,
            details: Vec::new(),
        };
        self.apply_current(ctx);
    }

    fn apply_current(&mut self, ctx: &mut Context<UpdateMsg>) {
        let State::Updating {
            descriptor,
            assignments,
            index,
            ..
        } = &self.state
        else {
            return;
        };
        let Some(assignment) = assignments.get(*index as usize) else {
            return;
        };

        let index = *index;
        let updater = assignment.updater.clone();
        let folder = self.services.action_dir(descriptor.action_id());
        let modules = resolve_modules(assignment, &folder);
        let messenger = Messenger::new(ctx.myself(), index);
        let me = ctx.myself();

        debug!(updater = %updater.name(), modules = modules.len(), "Applying update");
        ctx.spawn_task(APPLY_TASK, async move {
            let result = match AssertUnwindSafe(updater.apply(modules, messenger))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    error!(updater = %updater.name(), "Updater panicked");
                    UpdateResult::failure(vec![format!("Updater {} panicked", updater.name())])
                }
            };
            me.send(UpdateMsg::Applied { index, result }).await;
        });
    }

    async fn on_message(&self, index: u32, text: String) {
        let State::Updating {
            descriptor,
            assignments,
            index: current,
            ..
        } = &self.state
        else {
            return;
        };
        if index != *current {
            return;
        }
        self.services
            .feedback(OutgoingFeedback::Deployment(
                Feedback::proceeding(descriptor.action_id(), vec![text])
                    .with_progress(assignments.len() as u32, index),
            ))
            .await;
    }

    async fn on_applied(&mut self, ctx: &mut Context<UpdateMsg>, applied: u32, result: UpdateResult) {
        let State::Updating {
            descriptor,
            assignments,
            index,
            details,
        } = &mut self.state
        else {
            return;
        };
        if applied != *index {
            return;
        }

        let total = assignments.len() as u32;
        let action_id = descriptor.action_id().to_string();
        details.extend(result.details);

        if !result.success {
            let details = std::mem::take(details);
            warn!(action_id = %action_id, updater = %assignments[applied as usize].updater.name(), "Update failed");
            self.services
                .feedback(OutgoingFeedback::Deployment(
                    Feedback::closed_failure(&action_id, details.clone()).with_progress(total, applied),
                ))
                .await;
            self.services
                .notify(ClientEvent::UpdateFinished {
                    action_id,
                    success: false,
                    details: details.clone(),
                })
                .await;
            self.end(ctx, UpdateOutcome::Failed(details)).await;
            return;
        }

        *index += 1;
        if *index < total {
            self.apply_current(ctx);
            return;
        }

        let details = std::mem::take(details);
        info!(action_id = %action_id, "Update finished");
        self.services
            .feedback(OutgoingFeedback::Deployment(
                Feedback::closed_success(&action_id, details.clone()).with_progress(total, total),
            ))
            .await;
        self.services
            .notify(ClientEvent::UpdateFinished {
                action_id,
                success: true,
                details: details.clone(),
            })
            .await;
        self.end(ctx, UpdateOutcome::Finished(details)).await;
    }

    async fn end(&mut self, ctx: &mut Context<UpdateMsg>, outcome: UpdateOutcome) {
        self.state = State::Done;
        self.parent.send(DeploymentMsg::Update(outcome)).await;
        ctx.stop();
    }
}

fn resolve_modules(assignment: &Assignment, folder: &Path) -> Vec<ResolvedModule> {
    assignment
        .chunks
        .iter()
        .map(|chunk| ResolvedModule {
            chunk: chunk.clone(),
            artifacts: chunk
                .artifacts
                .iter()
                .map(|artifact| ResolvedArtifact {
                    artifact: artifact.clone(),
                    path: folder.join(artifact.hashes.md5.to_lowercase()),
                })
                .collect(),
        })
        .collect()
}

#[async_trait]
impl Actor for UpdateOrchestrator {
    type Msg = UpdateMsg;

    async fn handle(&mut self, ctx: &mut Context<UpdateMsg>, msg: UpdateMsg) -> Result<(), AgentError> {
        match msg {
            UpdateMsg::Deployment(descriptor) => match &self.state {
                State::Idle => self.begin(ctx, descriptor).await,
                State::WaitingPermit(current) => {
                    if current.action_id() == descriptor.action_id()
                        && current.update_type() == descriptor.update_type()
                    {
                        debug!(action_id = %descriptor.action_id(), "Duplicate descriptor while waiting");
                    } else {
                        info!(action_id = %descriptor.action_id(), "Descriptor changed, restarting update phase");
                        self.begin(ctx, descriptor).await;
                    }
                }
                State::Updating { .. } | State::Done => {}
            },
            UpdateMsg::Permit { action_id, granted } => {
                let State::WaitingPermit(descriptor) = std::mem::replace(&mut self.state, State::Idle) else {
                    return Ok(());
                };
                if descriptor.action_id() != action_id {
                    self.state = State::WaitingPermit(descriptor);
                } else if granted {
                    self.start_update(ctx, descriptor).await;
                } else {
                    info!(action_id = %action_id, "Update not authorized");
                    self.state = State::WaitingPermit(descriptor);
                }
            }
            UpdateMsg::Message { index, text } => self.on_message(index, text).await,
            UpdateMsg::Applied { index, result } => self.on_applied(ctx, index, result).await,
            UpdateMsg::Cancel(cancel) => {
                info!(action_id = %cancel.action_id(), "Rejecting cancel during update phase");
                self.services
                    .feedback(OutgoingFeedback::Cancel(Feedback::rejected(
                        cancel.action_id(),
                        vec![UPDATE_NOT_STOPPABLE.to_string()],
                    )))
                    .await;
            }
            UpdateMsg::CancelForced => {
                warn!("Forced cancel ignored, update already started");
            }
        }
        Ok(())
    }
}
