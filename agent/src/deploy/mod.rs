//! Deployment lifecycle: download, verify, authorize and apply

pub mod deployment;
pub mod download;
pub mod downloader;
pub mod fsm;
pub mod registry;
pub mod update;

use std::path::PathBuf;
use std::sync::Arc;

use crate::actor::ActorRef;
use crate::events::{HubRef, Notification};
use crate::http::DdiTransport;
use crate::models::feedback::OutgoingFeedback;
use crate::providers::{Authorizations, DirectoryProvider, DownloadRetryPolicy};
use crate::workers::poller::ConnectionMsg;

use self::registry::UpdaterRegistry;

/// Collaborators shared by every unit of a deployment
#[derive(Clone)]
pub struct DeploymentServices {
    pub transport: Arc<dyn DdiTransport>,
    pub hub: HubRef,
    pub connection: ActorRef<ConnectionMsg>,
    pub directories: Arc<dyn DirectoryProvider>,
    pub authorizations: Authorizations,
    pub retry_policy: Arc<dyn DownloadRetryPolicy>,
    pub registry: Arc<UpdaterRegistry>,
    pub downloader: downloader::Options,
}

impl DeploymentServices {
    pub async fn notify(&self, notification: impl Into<Notification>) {
        self.hub.send(notification.into()).await;
    }

    /// Queue feedback on the connection's delivery worker
    pub async fn feedback(&self, feedback: OutgoingFeedback) {
        self.connection.send(ConnectionMsg::Feedback(feedback)).await;
    }

    pub fn action_dir(&self, action_id: &str) -> PathBuf {
        self.directories.action_dir(action_id)
    }
}
