//! Notifications published to the embedding application

pub mod hub;

use ddi_models::Execution;

pub use hub::{HubRef, Listener, NotificationHub};

/// Coarse client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Downloading,
    Updating,
    CancellingUpdate,
    WaitingDownloadAuthorization,
    WaitingUpdateAuthorization,
    Idle,
}

/// Discrete things that happened
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Polling,
    UpdateAvailable {
        action_id: String,
    },
    FileDownloadStarted {
        action_id: String,
        file_name: String,
    },
    FileDownloadProgress {
        file_name: String,
        downloaded: u64,
        size: u64,
    },
    FileDownloadFinished {
        file_name: String,
    },
    AllFilesDownloaded {
        action_id: String,
    },
    UpdateFinished {
        action_id: String,
        success: bool,
        details: Vec<String>,
    },
    FeedbackResult {
        action_id: String,
        execution: Execution,
        delivered: bool,
        status: Option<u16>,
        attempts: u32,
    },
    Error {
        details: Vec<String>,
    },
    NoUpdate {
        action_id: String,
    },
    NoNewState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    State(ClientState),
    Event(ClientEvent),
}

impl From<ClientState> for Notification {
    fn from(state: ClientState) -> Self {
        Notification::State(state)
    }
}

impl From<ClientEvent> for Notification {
    fn from(event: ClientEvent) -> Self {
        Notification::Event(event)
    }
}

impl ClientEvent {
    pub fn error(detail: impl Into<String>) -> Self {
        ClientEvent::Error {
            details: vec![detail.into()],
        }
    }
}
