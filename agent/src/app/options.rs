//! Client configuration options

use std::time::Duration;

use crate::actor::DEFAULT_MAILBOX_CAPACITY;
use crate::deploy::downloader;
use crate::workers::{actions, feedback, poller};

/// Main client options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Poller worker options
    pub connection: poller::Options,

    /// Feedback worker options
    pub feedback: feedback::Options,

    /// Per-artifact downloader options
    pub download: downloader::Options,

    /// Deployment handling options
    pub actions: actions::Options,

    /// Messages queued per unit before senders wait
    pub mailbox_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            connection: poller::Options::default(),
            feedback: feedback::Options::default(),
            download: downloader::Options::default(),
            actions: actions::Options::default(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

/// Lifecycle options for the client
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
