//! Per-unit handle given to every handler invocation

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;

use super::system::{ActorId, ActorSystem, FailureReporter};
use super::{Actor, ActorRef, ChildFailure};

pub struct Context<M: Send + 'static> {
    id: ActorId,
    path: String,
    system: ActorSystem,
    myself: ActorRef<M>,
    closed: Arc<AtomicBool>,
    children: HashMap<String, ActorId>,
    tasks: HashMap<&'static str, JoinHandle<()>>,
    stopping: bool,
}

impl<M: Send + 'static> Context<M> {
    pub(crate) fn new(
        id: ActorId,
        path: String,
        system: ActorSystem,
        myself: ActorRef<M>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            path,
            system,
            myself,
            closed,
            children: HashMap::new(),
            tasks: HashMap::new(),
            stopping: false,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Own mailbox, for background tasks reporting back
    pub fn myself(&self) -> ActorRef<M> {
        self.myself.clone()
    }

    /// Spawn a named child. A previous child with the same name is closed first.
    ///
    /// Failures of the child arrive in this unit's mailbox as [`ChildFailure`].
    pub fn spawn_child<A>(&mut self, name: &str, actor: A) -> ActorRef<A::Msg>
    where
        A: Actor,
        M: From<ChildFailure>,
    {
        self.close_child(name);

        let parent = self.myself.clone();
        let reporter: FailureReporter = Arc::new(move |failure: ChildFailure| {
            let parent = parent.clone();
            async move { parent.send(M::from(failure)).await }.boxed()
        });

        let path = format!("{}/{}", self.path, name);
        let (child, _handle) = self
            .system
            .spawn_node(Some(self.id), path, actor, Some(reporter));
        self.children.insert(name.to_string(), child.id());
        child
    }

    /// Close a named child and its descendants
    pub fn close_child(&mut self, name: &str) -> bool {
        match self.children.remove(name) {
            Some(id) => {
                self.system.close(id);
                true
            }
            None => false,
        }
    }

    pub fn close_children(&mut self) {
        for (_, id) in self.children.drain() {
            self.system.close(id);
        }
    }

    /// Whether a named child is still running
    pub fn has_child(&self, name: &str) -> bool {
        self.children
            .get(name)
            .is_some_and(|id| self.system.is_alive(*id))
    }

    /// Run a future owned by this unit, replacing any running task under `key`.
    ///
    /// Owned tasks are aborted when the unit stops.
    pub fn spawn_task<F>(&mut self, key: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel_task(key);
        self.tasks.insert(key, tokio::spawn(fut));
    }

    pub fn cancel_task(&mut self, key: &'static str) -> bool {
        match self.tasks.remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Deliver `msg` to this unit after `delay`, replacing any pending delivery under `key`
    pub fn schedule_once(&mut self, key: &'static str, delay: Duration, msg: M) {
        let me = self.myself();
        self.spawn_task(key, async move {
            tokio::time::sleep(delay).await;
            me.send(msg).await;
        });
    }

    /// Finish after the current message
    pub fn stop(&mut self) {
        self.stopping = true;
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn abort_tasks(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}
