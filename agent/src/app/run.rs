//! Root unit and the main client run loop

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::actor::{Actor, ActorRef, ActorSystem, ChildFailure, Context};
use crate::app::options::ClientOptions;
use crate::deploy::registry::UpdaterRegistry;
use crate::deploy::DeploymentServices;
use crate::errors::AgentError;
use crate::events::{Listener, NotificationHub};
use crate::http::DdiTransport;
use crate::providers::{Authorizations, ConfigDataProvider, DirectoryProvider, DownloadRetryPolicy, Updater};
use crate::workers::actions::ActionCoordinator;
use crate::workers::poller::{ConnectionCoordinator, ConnectionMsg};

/// Capabilities the embedder plugs into the client
#[derive(Clone)]
pub struct ClientDeps {
    pub transport: Arc<dyn DdiTransport>,
    pub directories: Arc<dyn DirectoryProvider>,
    pub config_data: Arc<dyn ConfigDataProvider>,
    pub authorizations: Authorizations,
    pub retry_policy: Arc<dyn DownloadRetryPolicy>,
    pub updaters: Vec<Arc<dyn Updater>>,
    pub listeners: Vec<Arc<dyn Listener>>,
}

#[derive(Debug)]
pub enum RootMsg {
    Start,
    Stop,
    ForcePing,
    ChildFailed(ChildFailure),
}

impl From<ChildFailure> for RootMsg {
    fn from(failure: ChildFailure) -> Self {
        RootMsg::ChildFailed(failure)
    }
}

struct Root {
    options: ClientOptions,
    deps: ClientDeps,
    connection: Option<ActorRef<ConnectionMsg>>,
}

impl Root {
    async fn connection(&self, msg: ConnectionMsg) {
        if let Some(connection) = &self.connection {
            connection.send(msg).await;
        }
    }
}

#[async_trait]
impl Actor for Root {
    type Msg = RootMsg;

    async fn started(&mut self, ctx: &mut Context<RootMsg>) -> Result<(), AgentError> {
        let hub = ctx.spawn_child(
            "notifications",
            NotificationHub::new(self.deps.listeners.clone()),
        );
        let connection = ctx.spawn_child(
            "connection",
            ConnectionCoordinator::new(
                self.deps.transport.clone(),
                self.deps.config_data.clone(),
                hub.clone(),
                self.options.connection.clone(),
                self.options.feedback.clone(),
            ),
        );

        let services = DeploymentServices {
            transport: self.deps.transport.clone(),
            hub,
            connection: connection.clone(),
            directories: self.deps.directories.clone(),
            authorizations: self.deps.authorizations.clone(),
            retry_policy: self.deps.retry_policy.clone(),
            registry: Arc::new(UpdaterRegistry::new(self.deps.updaters.clone())),
            downloader: self.options.download.clone(),
        };
        ctx.spawn_child(
            "actions",
            ActionCoordinator::new(services, self.options.actions.clone()),
        );

        self.connection = Some(connection);
        Ok(())
    }

    async fn handle(&mut self, _ctx: &mut Context<RootMsg>, msg: RootMsg) -> Result<(), AgentError> {
        match msg {
            RootMsg::Start => self.connection(ConnectionMsg::Start).await,
            RootMsg::Stop => self.connection(ConnectionMsg::Stop).await,
            RootMsg::ForcePing => self.connection(ConnectionMsg::ForcePing).await,
            RootMsg::ChildFailed(failure) => {
                error!(%failure, "Client component failed");
                return Err(AgentError::Internal(failure.to_string()));
            }
        }
        Ok(())
    }
}

/// Handle on a running client: start, stop and force an immediate poll
pub struct UpdateClient {
    system: ActorSystem,
    root: ActorRef<RootMsg>,
    handle: Option<JoinHandle<Result<(), AgentError>>>,
}

impl UpdateClient {
    /// Build the unit tree. Nothing is polled before [`UpdateClient::start`].
    pub fn spawn(options: ClientOptions, deps: ClientDeps) -> Self {
        let system = ActorSystem::with_mailbox_capacity(options.mailbox_capacity);
        let (root, handle) = system.spawn(
            "root",
            Root {
                options,
                deps,
                connection: None,
            },
        );
        Self {
            system,
            root,
            handle: Some(handle),
        }
    }

    pub async fn start(&self) {
        self.root.send(RootMsg::Start).await;
    }

    pub async fn stop(&self) {
        self.root.send(RootMsg::Stop).await;
    }

    pub async fn force_ping(&self) {
        self.root.send(RootMsg::ForcePing).await;
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Resolves when the root ends on its own, which only happens on failure
    pub async fn finished(&mut self) -> Result<(), AgentError> {
        match self.handle.as_mut() {
            Some(handle) => {
                let result = handle
                    .await
                    .map_err(|e| AgentError::ShutdownError(e.to_string()));
                self.handle = None;
                result?
            }
            None => std::future::pending().await,
        }
    }

    /// Stop polling, close every unit and wait for the root to finish
    pub async fn shutdown(mut self) -> Result<(), AgentError> {
        info!("Shutting down update client...");
        self.stop().await;
        self.system.close(self.root.id());

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }
        info!("Shutdown complete");
        Ok(())
    }
}

/// Run the update client until `shutdown_signal` resolves or the client fails
pub async fn run(
    options: ClientOptions,
    deps: ClientDeps,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing update client...");

    let max_shutdown_delay = options.lifecycle.max_shutdown_delay;
    let mut client = UpdateClient::spawn(options, deps);
    client.start().await;

    let failure = tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
            None
        }
        result = client.finished() => Some(result),
    };

    if let Some(result) = failure {
        error!("Update client stopped unexpectedly");
        result?;
        return Err(AgentError::Internal("update client stopped".to_string()));
    }

    match tokio::time::timeout(max_shutdown_delay, client.shutdown()).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                "Shutdown timed out after {:?}, forcing shutdown...",
                max_shutdown_delay
            );
            std::process::exit(1);
        }
    }
}
