//! Download phase of one deployment
//!
//! Checks whether the required artifacts are already on disk, otherwise waits
//! for a permit and drives one [`FileDownloader`] per artifact. The first failed
//! artifact ends the phase.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::deployment::{DeploymentMsg, DownloadOutcome};
use super::downloader::{self, DownloaderMsg, FileDownloader, FileReport};
use super::DeploymentServices;
use crate::actor::{Actor, ActorRef, ChildFailure, Context};
use crate::errors::AgentError;
use crate::events::{ClientEvent, ClientState};
use crate::filesys::dir::Dir;
use crate::models::deployment::{CancelDescriptor, DeploymentDescriptor, FileToDownload, ProvisioningType};
use crate::models::feedback::{Feedback, OutgoingFeedback};
use crate::providers::{PermitRequest, Phase};

const CHECK_TASK: &str = "check";
const PERMIT_TASK: &str = "permit";
const CHILD_PREFIX: &str = "file-";

#[derive(Debug)]
pub enum DownloadMsg {
    Deployment(DeploymentDescriptor),
    Checked { action_id: String, present: bool },
    Permit { action_id: String, granted: bool },
    File(FileReport),
    Cancel(CancelDescriptor),
    CancelForced,
    ChildFailed(ChildFailure),
}

impl From<ChildFailure> for DownloadMsg {
    fn from(failure: ChildFailure) -> Self {
        DownloadMsg::ChildFailed(failure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Running,
    Success,
    Error,
}

/// Per-artifact status during the download phase
#[derive(Debug)]
pub struct DownloadRecord {
    pub file: FileToDownload,
    status: RecordStatus,
    pub messages: Vec<String>,
    pub worker: Option<ActorRef<DownloaderMsg>>,
}

impl DownloadRecord {
    pub fn new(file: FileToDownload) -> Self {
        Self {
            file,
            status: RecordStatus::Running,
            messages: Vec::new(),
            worker: None,
        }
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    /// Leave RUNNING for a final status. Returns false once already final.
    pub fn complete(&mut self, status: RecordStatus) -> bool {
        if self.status != RecordStatus::Running || status == RecordStatus::Running {
            return false;
        }
        self.status = status;
        true
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Checking(DeploymentDescriptor),
    WaitingPermit(DeploymentDescriptor),
    Downloading(DeploymentDescriptor),
    Done,
}

pub struct DownloadOrchestrator {
    services: DeploymentServices,
    parent: ActorRef<DeploymentMsg>,
    state: State,
    files: Vec<FileToDownload>,
    records: BTreeMap<String, DownloadRecord>,
}

impl DownloadOrchestrator {
    pub fn new(services: DeploymentServices, parent: ActorRef<DeploymentMsg>) -> Self {
        Self {
            services,
            parent,
            state: State::Idle,
            files: Vec::new(),
            records: BTreeMap::new(),
        }
    }

    fn required_files(&self, descriptor: &DeploymentDescriptor) -> Vec<FileToDownload> {
        let folder = self.services.action_dir(descriptor.action_id());
        self.services
            .registry
            .required_artifacts(descriptor.chunks())
            .iter()
            .map(|artifact| FileToDownload::from_artifact(descriptor.action_id(), artifact, folder.clone()))
            .collect()
    }

    /// Start over with a new descriptor, dropping any pending check or permit
    fn begin(&mut self, ctx: &mut Context<DownloadMsg>, descriptor: DeploymentDescriptor) {
        ctx.cancel_task(CHECK_TASK);
        ctx.cancel_task(PERMIT_TASK);

        self.files = self.required_files(&descriptor);
        let files = self.files.clone();
        let action_id = descriptor.action_id().to_string();
        let me = ctx.myself();
        ctx.spawn_task(CHECK_TASK, async move {
            let mut present = true;
            for file in &files {
                if !downloader::is_present(file).await {
                    present = false;
                    break;
                }
            }
            me.send(DownloadMsg::Checked { action_id, present }).await;
        });
        self.state = State::Checking(descriptor);
    }

    async fn request_permit(&mut self, ctx: &mut Context<DownloadMsg>, descriptor: DeploymentDescriptor) {
        let provisioning = descriptor.download_type();
        match provisioning {
            ProvisioningType::Forced => {}
            ProvisioningType::Skip => {
                warn!(action_id = %descriptor.action_id(), "Download type 'skip' is handled like 'attempt'");
                self.services.notify(ClientState::WaitingDownloadAuthorization).await;
            }
            ProvisioningType::Attempt => {
                self.services.notify(ClientState::WaitingDownloadAuthorization).await;
            }
        }

        let provider = self.services.authorizations.for_type(provisioning);
        let request = PermitRequest {
            action_id: descriptor.action_id().to_string(),
            phase: Phase::Download,
        };
        let me = ctx.myself();
        ctx.spawn_task(PERMIT_TASK, async move {
            let granted = provider.authorize(&request).await;
            me.send(DownloadMsg::Permit {
                action_id: request.action_id,
                granted,
            })
            .await;
        });
        self.state = State::WaitingPermit(descriptor);
    }

    async fn start_downloads(&mut self, ctx: &mut Context<DownloadMsg>, descriptor: DeploymentDescriptor) {
        let action_id = descriptor.action_id().to_string();
        info!(action_id = %action_id, files = self.files.len(), "Starting download");

        let artifacts = Dir::new(self.services.directories.artifacts_dir());
        match artifacts.purge_subdirs_except(&action_id).await {
            Ok(removed) if !removed.is_empty() => debug!(?removed, "Purged stale artifact folders"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to purge stale artifact folders"),
        }

        self.records.clear();
        let me = ctx.myself();
        for file in self.files.clone() {
            let worker = ctx.spawn_child(
                &format!("{}{}", CHILD_PREFIX, file.md5),
                FileDownloader::new(
                    file.clone(),
                    self.services.transport.clone(),
                    self.services.retry_policy.clone(),
                    self.services.hub.clone(),
                    me.clone(),
                    self.services.downloader.clone(),
                ),
            );
            worker.send(DownloaderMsg::Start).await;
            let mut record = DownloadRecord::new(file.clone());
            record.worker = Some(worker);
            self.records.insert(file.md5.clone(), record);
        }

        let total = self.records.len() as u32;
        self.services
            .feedback(OutgoingFeedback::Deployment(
                Feedback::proceeding(&action_id, vec![format!("Downloading {} file(s)", total)])
                    .with_progress(total, 0),
            ))
            .await;
        self.services.notify(ClientState::Downloading).await;
        self.state = State::Downloading(descriptor);

        if self.records.is_empty() {
            self.all_downloaded(ctx).await;
        }
    }

    fn counts(&self) -> (u32, u32) {
        let total = self.records.len() as u32;
        let done = self
            .records
            .values()
            .filter(|r| r.status() == RecordStatus::Success)
            .count() as u32;
        (total, done)
    }

    fn action_id(&self) -> Option<&str> {
        match &self.state {
            State::Checking(d) | State::WaitingPermit(d) | State::Downloading(d) => Some(d.action_id()),
            State::Idle | State::Done => None,
        }
    }

    async fn on_file(&mut self, ctx: &mut Context<DownloadMsg>, report: FileReport) {
        let Some(action_id) = self.action_id().map(str::to_string) else {
            return;
        };

        match report {
            FileReport::Success { md5 } | FileReport::AlreadyDownloaded { md5 } => {
                let Some(record) = self.records.get_mut(&md5) else {
                    return;
                };
                if !record.complete(RecordStatus::Success) {
                    return;
                }
                let file_name = record.file.file_name.clone();
                let (total, done) = self.counts();
                if done == total {
                    self.all_downloaded(ctx).await;
                } else {
                    self.services
                        .feedback(OutgoingFeedback::Deployment(
                            Feedback::proceeding(&action_id, vec![format!("Downloaded {}", file_name)])
                                .with_progress(total, done),
                        ))
                        .await;
                }
            }
            FileReport::Info { md5, message } => {
                if let Some(record) = self.records.get_mut(&md5) {
                    info!(file = %record.file.file_name, "{}", message);
                    record.messages.push(message);
                }
            }
            FileReport::Progress { md5, percent } => {
                if let Some(record) = self.records.get(&md5) {
                    let (total, done) = self.counts();
                    self.services
                        .feedback(OutgoingFeedback::Deployment(
                            Feedback::proceeding(
                                &action_id,
                                vec![format!("Downloading {}: {}%", record.file.file_name, percent)],
                            )
                            .with_progress(total, done),
                        ))
                        .await;
                }
            }
            FileReport::Error { md5, messages } => {
                let Some(record) = self.records.get_mut(&md5) else {
                    return;
                };
                record.messages.extend(messages);
                if record.complete(RecordStatus::Error) {
                    let mut details = vec![format!("Download of {} failed", record.file.file_name)];
                    details.extend(record.messages.iter().cloned());
                    self.failed(ctx, &action_id, details).await;
                }
            }
        }
    }

    async fn failed(&mut self, ctx: &mut Context<DownloadMsg>, action_id: &str, details: Vec<String>) {
        warn!(action_id = %action_id, ?details, "Download failed");
        let (total, done) = self.counts();
        self.services
            .feedback(OutgoingFeedback::Deployment(
                Feedback::closed_failure(action_id, details.clone()).with_progress(total, done),
            ))
            .await;
        self.services
            .notify(ClientEvent::Error {
                details: details.clone(),
            })
            .await;
        self.end(ctx, DownloadOutcome::Failed(details)).await;
    }

    async fn all_downloaded(&mut self, ctx: &mut Context<DownloadMsg>) {
        let State::Downloading(descriptor) = std::mem::replace(&mut self.state, State::Done) else {
            return;
        };
        let action_id = descriptor.action_id().to_string();
        info!(action_id = %action_id, "All files downloaded");

        let (total, _) = self.counts();
        self.services
            .feedback(OutgoingFeedback::Deployment(
                Feedback::proceeding(&action_id, vec!["All files downloaded".to_string()])
                    .with_progress(total, total),
            ))
            .await;
        self.services
            .notify(ClientEvent::AllFilesDownloaded { action_id })
            .await;
        self.end(ctx, DownloadOutcome::Finished(descriptor)).await;
    }

    async fn end(&mut self, ctx: &mut Context<DownloadMsg>, outcome: DownloadOutcome) {
        ctx.close_children();
        self.records.clear();
        self.state = State::Done;
        self.parent.send(DeploymentMsg::Download(outcome)).await;
        ctx.stop();
    }
}

#[async_trait]
impl Actor for DownloadOrchestrator {
    type Msg = DownloadMsg;

    async fn handle(
        &mut self,
        ctx: &mut Context<DownloadMsg>,
        msg: DownloadMsg,
    ) -> Result<(), AgentError> {
        match msg {
            DownloadMsg::Deployment(descriptor) => match &self.state {
                State::Idle => self.begin(ctx, descriptor),
                State::Checking(current) | State::WaitingPermit(current) => {
                    if current.action_id() == descriptor.action_id()
                        && current.download_type() == descriptor.download_type()
                    {
                        debug!(action_id = %descriptor.action_id(), "Duplicate descriptor while waiting");
                    } else {
                        info!(action_id = %descriptor.action_id(), "Descriptor changed, restarting download phase");
                        self.begin(ctx, descriptor);
                    }
                }
                State::Downloading(current) => {
                    if current.action_id() != descriptor.action_id() {
                        warn!(
                            current = %current.action_id(),
                            received = %descriptor.action_id(),
                            "Ignoring descriptor for another action while downloading"
                        );
                    }
                }
                State::Done => {}
            },
            DownloadMsg::Checked { action_id, present } => {
                let State::Checking(descriptor) = std::mem::replace(&mut self.state, State::Idle) else {
                    return Ok(());
                };
                if descriptor.action_id() != action_id {
                    self.state = State::Checking(descriptor);
                } else if present {
                    info!(action_id = %action_id, "Artifacts already downloaded");
                    self.services
                        .notify(ClientEvent::AllFilesDownloaded { action_id })
                        .await;
                    self.end(ctx, DownloadOutcome::Finished(descriptor)).await;
                } else {
                    self.request_permit(ctx, descriptor).await;
                }
            }
            DownloadMsg::Permit { action_id, granted } => {
                let State::WaitingPermit(descriptor) = std::mem::replace(&mut self.state, State::Idle) else {
                    return Ok(());
                };
                if descriptor.action_id() != action_id {
                    self.state = State::WaitingPermit(descriptor);
                } else if granted {
                    self.start_downloads(ctx, descriptor).await;
                } else {
                    info!(action_id = %action_id, "Download not authorized");
                    self.state = State::WaitingPermit(descriptor);
                }
            }
            DownloadMsg::File(report) => {
                if matches!(self.state, State::Downloading(_)) {
                    self.on_file(ctx, report).await;
                }
            }
            DownloadMsg::ChildFailed(failure) => {
                let md5 = failure
                    .path
                    .rsplit('/')
                    .next()
                    .and_then(|name| name.strip_prefix(CHILD_PREFIX))
                    .map(str::to_string);
                let downloading = matches!(self.state, State::Downloading(_));
                if let (Some(md5), true) = (md5, downloading) {
                    self.on_file(
                        ctx,
                        FileReport::Error {
                            md5,
                            messages: vec![failure.error],
                        },
                    )
                    .await;
                }
            }
            DownloadMsg::Cancel(cancel) => {
                info!(action_id = %cancel.action_id(), "Download cancelled by server");
                self.services
                    .feedback(OutgoingFeedback::Cancel(Feedback::closed_success(
                        cancel.action_id(),
                        vec!["Download cancelled".to_string()],
                    )))
                    .await;
                self.services.notify(ClientState::CancellingUpdate).await;
                self.end(ctx, DownloadOutcome::Stopped).await;
            }
            DownloadMsg::CancelForced => {
                info!("Download stopped");
                self.end(ctx, DownloadOutcome::Stopped).await;
            }
        }
        Ok(())
    }
}
