//! Actor runtime tests

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ddi_agent::actor::{Actor, ActorRef, ActorSystem, ChildFailure, Context};
use ddi_agent::errors::AgentError;

use crate::common::{next, probe};

enum WorkerMsg {
    Echo(u32),
    Fail,
    Panic,
    Later(u32),
    Reschedule(u32),
}

struct Worker {
    out: ActorRef<u32>,
}

#[async_trait]
impl Actor for Worker {
    type Msg = WorkerMsg;

    async fn handle(&mut self, ctx: &mut Context<WorkerMsg>, msg: WorkerMsg) -> Result<(), AgentError> {
        match msg {
            WorkerMsg::Echo(n) => self.out.send(n).await,
            WorkerMsg::Fail => return Err(AgentError::Internal("boom".to_string())),
            WorkerMsg::Panic => panic!("handler exploded"),
            WorkerMsg::Later(n) => {
                ctx.schedule_once("later", Duration::from_millis(30), WorkerMsg::Echo(n));
            }
            WorkerMsg::Reschedule(n) => {
                ctx.schedule_once("later", Duration::from_millis(5), WorkerMsg::Echo(n));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
enum SupervisorMsg {
    Spawn(&'static str),
    Forward(&'static str, u32),
    Failed(ChildFailure),
}

impl From<ChildFailure> for SupervisorMsg {
    fn from(failure: ChildFailure) -> Self {
        SupervisorMsg::Failed(failure)
    }
}

struct Supervisor {
    out: ActorRef<u32>,
    failures: mpsc::UnboundedSender<ChildFailure>,
    children: Vec<(&'static str, ActorRef<WorkerMsg>)>,
}

#[async_trait]
impl Actor for Supervisor {
    type Msg = SupervisorMsg;

    async fn handle(&mut self, ctx: &mut Context<SupervisorMsg>, msg: SupervisorMsg) -> Result<(), AgentError> {
        match msg {
            SupervisorMsg::Spawn(name) => {
                let child = ctx.spawn_child(name, Worker { out: self.out.clone() });
                self.children.push((name, child));
            }
            SupervisorMsg::Forward(name, n) => {
                let msg = match n {
                    0 => WorkerMsg::Panic,
                    1 => WorkerMsg::Fail,
                    n => WorkerMsg::Echo(n),
                };
                if let Some((_, child)) = self.children.iter().rev().find(|(c, _)| *c == name) {
                    child.send(msg).await;
                }
            }
            SupervisorMsg::Failed(failure) => {
                let _ = self.failures.send(failure);
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_messages_processed_in_send_order() {
    let system = ActorSystem::new();
    let (out, mut rx) = probe::<u32>(&system, "out");
    let (worker, _handle) = system.spawn("worker", Worker { out });

    for n in 0..50 {
        worker.send(WorkerMsg::Echo(n)).await;
    }
    for n in 0..50 {
        assert_eq!(next(&mut rx).await, n);
    }
}

#[tokio::test]
async fn test_top_level_failure_surfaces_through_handle() {
    let system = ActorSystem::new();
    let (out, _rx) = probe::<u32>(&system, "out");
    let (worker, handle) = system.spawn("worker", Worker { out });

    worker.send(WorkerMsg::Fail).await;

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(AgentError::Internal(_))));
    assert!(worker.is_closed());
}

#[tokio::test]
async fn test_child_panic_reported_to_parent() {
    let system = ActorSystem::new();
    let (out, mut out_rx) = probe::<u32>(&system, "out");
    let (failures_tx, mut failures) = mpsc::unbounded_channel();
    let (supervisor, _handle) = system.spawn(
        "supervisor",
        Supervisor {
            out,
            failures: failures_tx,
            children: Vec::new(),
        },
    );

    supervisor.send(SupervisorMsg::Spawn("a")).await;
    supervisor.send(SupervisorMsg::Spawn("b")).await;
    supervisor.send(SupervisorMsg::Forward("a", 0)).await;

    let failure = next(&mut failures).await;
    assert_eq!(failure.path, "/supervisor/a");
    assert!(failure.error.contains("handler exploded"));

    // The sibling keeps working and the parent is unaffected
    supervisor.send(SupervisorMsg::Forward("b", 7)).await;
    assert_eq!(next(&mut out_rx).await, 7);
    assert!(!supervisor.is_closed());
}

#[tokio::test]
async fn test_close_cascades_to_descendants() {
    let system = ActorSystem::new();
    let (out, _rx) = probe::<u32>(&system, "out");
    let (failures_tx, _failures) = mpsc::unbounded_channel();
    let (supervisor, handle) = system.spawn(
        "supervisor",
        Supervisor {
            out,
            failures: failures_tx,
            children: Vec::new(),
        },
    );
    supervisor.send(SupervisorMsg::Spawn("a")).await;
    supervisor.send(SupervisorMsg::Spawn("b")).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while system.children(supervisor.id()).len() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    let children = system.children(supervisor.id());

    system.close(supervisor.id());

    for child in &children {
        assert!(!system.is_alive(*child));
    }
    assert!(!system.is_alive(supervisor.id()));
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(system.paths(), vec!["/out".to_string()]);
}

#[tokio::test]
async fn test_schedule_once_replaces_pending_delivery() {
    let system = ActorSystem::new();
    let (out, mut rx) = probe::<u32>(&system, "out");
    let (worker, _handle) = system.spawn("worker", Worker { out });

    worker.send(WorkerMsg::Later(1)).await;
    worker.send(WorkerMsg::Reschedule(2)).await;

    assert_eq!(next(&mut rx).await, 2);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_messages_to_closed_mailbox_are_dropped() {
    let system = ActorSystem::new();
    let (out, mut rx) = probe::<u32>(&system, "out");
    let (worker, handle) = system.spawn("worker", Worker { out });

    system.close(worker.id());
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    worker.send(WorkerMsg::Echo(3)).await;
    assert!(!worker.try_send(WorkerMsg::Echo(4)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
}
