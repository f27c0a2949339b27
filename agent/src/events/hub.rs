//! Fan-out of notifications to external listeners

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::Notification;
use crate::actor::{Actor, ActorRef, Context};
use crate::errors::AgentError;

pub type HubRef = ActorRef<Notification>;

/// Receives every state and event notification
pub trait Listener: Send + Sync {
    fn on_notification(&self, notification: &Notification);
}

impl<F> Listener for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_notification(&self, notification: &Notification) {
        self(notification)
    }
}

pub struct NotificationHub {
    listeners: Vec<Arc<dyn Listener>>,
}

impl NotificationHub {
    pub fn new(listeners: Vec<Arc<dyn Listener>>) -> Self {
        Self { listeners }
    }

    /// Invoke every listener; a panicking listener is logged and skipped
    pub fn dispatch(&self, notification: &Notification) {
        for listener in &self.listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_notification(notification)));
            if result.is_err() {
                warn!(?notification, "Listener panicked while handling notification");
            }
        }
    }
}

#[async_trait]
impl Actor for NotificationHub {
    type Msg = Notification;

    async fn handle(
        &mut self,
        _ctx: &mut Context<Notification>,
        msg: Notification,
    ) -> Result<(), AgentError> {
        self.dispatch(&msg);
        Ok(())
    }
}
