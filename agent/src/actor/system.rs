//! Arena of live units and the per-unit message loop

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{Actor, ActorRef, ChildFailure, Context, DEFAULT_MAILBOX_CAPACITY};
use crate::errors::AgentError;

pub type ActorId = u64;

pub(crate) type FailureReporter = Arc<dyn Fn(ChildFailure) -> BoxFuture<'static, ()> + Send + Sync>;

struct Node {
    path: String,
    parent: Option<ActorId>,
    children: Vec<ActorId>,
    closed: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

#[derive(Default)]
struct Arena {
    next_id: ActorId,
    nodes: HashMap<ActorId, Node>,
}

impl Arena {
    fn post_order(&self, id: ActorId, out: &mut Vec<ActorId>) {
        if let Some(node) = self.nodes.get(&id) {
            for child in &node.children {
                self.post_order(*child, out);
            }
            out.push(id);
        }
    }
}

/// Ownership tree of all units
#[derive(Clone)]
pub struct ActorSystem {
    arena: Arc<Mutex<Arena>>,
    mailbox_capacity: usize,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        Self::with_mailbox_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_mailbox_capacity(mailbox_capacity: usize) -> Self {
        Self {
            arena: Arc::new(Mutex::new(Arena::default())),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn a top-level unit. Its failure is returned by the join handle.
    pub fn spawn<A: Actor>(
        &self,
        name: &str,
        actor: A,
    ) -> (ActorRef<A::Msg>, JoinHandle<Result<(), AgentError>>) {
        self.spawn_node(None, format!("/{}", name), actor, None)
    }

    pub(crate) fn spawn_node<A: Actor>(
        &self,
        parent: Option<ActorId>,
        path: String,
        actor: A,
        reporter: Option<FailureReporter>,
    ) -> (ActorRef<A::Msg>, JoinHandle<Result<(), AgentError>>) {
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let closed = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(Notify::new());

        let id = {
            let mut arena = self.lock();
            arena.next_id += 1;
            let id = arena.next_id;
            arena.nodes.insert(
                id,
                Node {
                    path: path.clone(),
                    parent,
                    children: Vec::new(),
                    closed: closed.clone(),
                    stop: stop.clone(),
                },
            );
            if let Some(parent_id) = parent {
                match arena.nodes.get_mut(&parent_id) {
                    Some(node) if !node.closed.load(Ordering::Acquire) => node.children.push(id),
                    // Parent already gone, the child never runs a message
                    _ => {
                        closed.store(true, Ordering::Release);
                        stop.notify_one();
                    }
                }
            }
            id
        };

        let myself = ActorRef {
            id,
            path: Arc::from(path.as_str()),
            tx,
            closed: closed.clone(),
        };
        let ctx = Context::new(id, path, self.clone(), myself.clone(), closed);
        let handle = tokio::spawn(run_actor(actor, ctx, rx, stop, reporter));
        (myself, handle)
    }

    /// Close a unit and all of its descendants, deepest first
    pub fn close(&self, id: ActorId) {
        let targets: Vec<(Arc<AtomicBool>, Arc<Notify>)> = {
            let arena = self.lock();
            let mut order = Vec::new();
            arena.post_order(id, &mut order);
            order
                .into_iter()
                .filter_map(|id| arena.nodes.get(&id))
                .map(|node| (node.closed.clone(), node.stop.clone()))
                .collect()
        };
        for (closed, stop) in targets {
            if !closed.swap(true, Ordering::AcqRel) {
                stop.notify_one();
            }
        }
    }

    fn remove(&self, id: ActorId) {
        let mut arena = self.lock();
        if let Some(node) = arena.nodes.remove(&id) {
            if let Some(parent) = node.parent.and_then(|p| arena.nodes.get_mut(&p)) {
                parent.children.retain(|child| *child != id);
            }
        }
    }

    /// Whether the unit is registered and its mailbox is open
    pub fn is_alive(&self, id: ActorId) -> bool {
        self.lock()
            .nodes
            .get(&id)
            .is_some_and(|node| !node.closed.load(Ordering::Acquire))
    }

    /// Ids of the live children of a unit
    pub fn children(&self, id: ActorId) -> Vec<ActorId> {
        let arena = self.lock();
        arena
            .nodes
            .get(&id)
            .map(|node| {
                node.children
                    .iter()
                    .copied()
                    .filter(|child| {
                        arena
                            .nodes
                            .get(child)
                            .is_some_and(|n| !n.closed.load(Ordering::Acquire))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Paths of every live unit, sorted
    pub fn paths(&self) -> Vec<String> {
        let arena = self.lock();
        let mut paths: Vec<String> = arena
            .nodes
            .values()
            .filter(|node| !node.closed.load(Ordering::Acquire))
            .map(|node| node.path.clone())
            .collect();
        paths.sort();
        paths
    }
}

async fn guarded<F>(fut: F) -> Result<(), AgentError>
where
    F: Future<Output = Result<(), AgentError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(AgentError::Internal(format!(
            "handler panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_actor<A: Actor>(
    mut actor: A,
    mut ctx: Context<A::Msg>,
    mut rx: mpsc::Receiver<A::Msg>,
    stop: Arc<Notify>,
    reporter: Option<FailureReporter>,
) -> Result<(), AgentError> {
    debug!(actor = %ctx.path(), "Actor started");

    let mut outcome = if ctx.is_closed() {
        Ok(())
    } else {
        guarded(actor.started(&mut ctx)).await
    };

    while outcome.is_ok() && !ctx.is_stopping() && !ctx.is_closed() {
        let msg = tokio::select! {
            biased;
            _ = stop.notified() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if ctx.is_closed() {
            break;
        }
        outcome = guarded(actor.handle(&mut ctx, msg)).await;
    }

    let system = ctx.system().clone();
    system.close(ctx.id());
    rx.close();
    actor.stopped(&mut ctx).await;
    ctx.abort_tasks();
    system.remove(ctx.id());

    match outcome {
        Ok(()) => {
            debug!(actor = %ctx.path(), "Actor stopped");
            Ok(())
        }
        Err(e) => {
            error!(actor = %ctx.path(), error = %e, "Actor failed");
            match reporter {
                Some(report) => {
                    report(ChildFailure {
                        id: ctx.id(),
                        path: ctx.path().to_string(),
                        error: e.to_string(),
                    })
                    .await;
                    Ok(())
                }
                None => Err(e),
            }
        }
    }
}
