//! Message-driven units every orchestration component is built on
//!
//! A unit is a plain struct implementing [`Actor`]. It owns a private, bounded,
//! ordered mailbox and processes one message at a time, so no unit ever needs
//! locks around its own state. Units keep their finite-state-machine state in an
//! enum and dispatch on `(state, message)` inside [`Actor::handle`].
//!
//! Units live in an [`ActorSystem`] arena that records the parent/child tree.
//! Closing a unit closes its descendants first, then aborts any background task
//! it owns. A unit whose handler fails (returns an error or panics) is closed and
//! its parent receives a [`ChildFailure`]; a top-level unit surfaces the error
//! through its join handle instead.

mod context;
mod system;
mod timer;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};

use crate::errors::AgentError;

pub use context::Context;
pub use system::{ActorId, ActorSystem};
pub use timer::{initial_delay, Ticker};

/// Default number of queued messages per mailbox
pub const DEFAULT_MAILBOX_CAPACITY: usize = 128;

/// Structured report sent to a parent when one of its children fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildFailure {
    pub id: ActorId,
    pub path: String,
    pub error: String,
}

impl fmt::Display for ChildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.path, self.error)
    }
}

/// Behavior of a unit
#[async_trait]
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;

    /// Called once before the first message
    async fn started(&mut self, _ctx: &mut Context<Self::Msg>) -> Result<(), AgentError> {
        Ok(())
    }

    /// Process one message
    async fn handle(
        &mut self,
        ctx: &mut Context<Self::Msg>,
        msg: Self::Msg,
    ) -> Result<(), AgentError>;

    /// Called once after the mailbox is closed and children are closed
    async fn stopped(&mut self, _ctx: &mut Context<Self::Msg>) {}
}

/// Address of a unit's mailbox
pub struct ActorRef<M> {
    id: ActorId,
    path: Arc<str>,
    tx: mpsc::Sender<M>,
    closed: Arc<AtomicBool>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            path: self.path.clone(),
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<M> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M> ActorRef<M> {
    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the mailbox no longer accepts messages
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

impl<M: Send + 'static> ActorRef<M> {
    /// Queue a message, waiting for mailbox capacity.
    ///
    /// Messages to a closed mailbox are dropped.
    pub async fn send(&self, msg: M) {
        if self.is_closed() {
            trace!(actor = %self.path, "Dropping message for closed mailbox");
            return;
        }
        if self.tx.send(msg).await.is_err() {
            trace!(actor = %self.path, "Mailbox closed while sending");
        }
    }

    /// Queue a message without waiting. Returns false when it was dropped.
    pub fn try_send(&self, msg: M) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(actor = %self.path, "Mailbox full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
