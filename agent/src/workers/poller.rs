//! Connection coordinator: the long-poll loop against the controller base
//!
//! Polls on a timer whose period is the active backoff, else the caller's
//! override, else the interval the server advertised. Rounds run as a
//! background task and report back as [`ConnectionMsg::RoundFinished`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ddi_models::{ConfigData, ConfigDataMode, ControllerBase};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::actions::ActionMsg;
use super::feedback;
use crate::actor::{initial_delay, Actor, ActorId, ActorRef, Context, Ticker};
use crate::errors::AgentError;
use crate::events::{ClientEvent, HubRef};
use crate::http::{DdiTransport, Fetched};
use crate::models::deployment::DeploymentDescriptor;
use crate::models::feedback::OutgoingFeedback;
use crate::providers::ConfigDataProvider;
use crate::utils::{calc_exp_backoff, CooldownOptions};

const POLL_TASK: &str = "poll";
const FEEDBACK_TASK: &str = "feedback";

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Used until the server advertises its own sleep interval
    pub default_poll_interval: Duration,

    /// Backoff after consecutive transport failures
    pub backoff: CooldownOptions,

    /// Backoff after a timed out request
    pub timeout_backoff: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_poll_interval: Duration::from_secs(30),
            backoff: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
            timeout_backoff: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
pub enum ConnectionMsg {
    Start,
    Stop,
    /// Poll now, ignoring cached change tokens
    ForcePing,
    Tick,
    /// Override the poll interval, `None` restores the server's
    SetPing(Option<Duration>),
    Register(ActorRef<ActionMsg>),
    Unregister(ActorId),
    Feedback(OutgoingFeedback),
    RoundFinished {
        round: u64,
        result: Result<RoundReport, AgentError>,
    },
    /// A closed feedback went out, the server state likely moved
    FeedbackSettled,
}

#[derive(Debug, Clone)]
struct CachedDeployment {
    action_id: String,
    etag: Option<String>,
    descriptor: DeploymentDescriptor,
}

/// ETags of the resources seen last
#[derive(Debug, Clone, Default)]
pub struct ChangeTokens {
    base: Option<String>,
    deployment: Option<CachedDeployment>,
}

impl ChangeTokens {
    pub fn is_empty(&self) -> bool {
        self.base.is_none() && self.deployment.is_none()
    }
}

/// What one poll round found
#[derive(Debug)]
pub struct RoundReport {
    tokens: ChangeTokens,
    sleep: Option<Duration>,
    /// `None` when the base resource did not change
    fact: Option<ActionMsg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Running,
}

pub struct ConnectionCoordinator {
    transport: Arc<dyn DdiTransport>,
    config_data: Arc<dyn ConfigDataProvider>,
    hub: HubRef,
    options: Options,
    feedback_options: feedback::Options,
    state: State,
    listeners: Vec<ActorRef<ActionMsg>>,
    tokens: ChangeTokens,
    server_interval: Option<Duration>,
    override_interval: Option<Duration>,
    backoff: Option<Duration>,
    failures: u32,
    ticker: Option<Ticker>,
    last_tick: Option<Instant>,
    round: u64,
    round_forced: bool,
    round_in_flight: bool,
    extra_round: bool,
    queue: Option<mpsc::UnboundedSender<OutgoingFeedback>>,
}

impl ConnectionCoordinator {
    pub fn new(
        transport: Arc<dyn DdiTransport>,
        config_data: Arc<dyn ConfigDataProvider>,
        hub: HubRef,
        options: Options,
        feedback_options: feedback::Options,
    ) -> Self {
        Self {
            transport,
            config_data,
            hub,
            options,
            feedback_options,
            state: State::Stopped,
            listeners: Vec::new(),
            tokens: ChangeTokens::default(),
            server_interval: None,
            override_interval: None,
            backoff: None,
            failures: 0,
            ticker: None,
            last_tick: None,
            round: 0,
            round_forced: false,
            round_in_flight: false,
            extra_round: false,
            queue: None,
        }
    }

    /// Backoff, else override, else the server interval
    pub fn effective_interval(&self) -> Duration {
        self.backoff
            .or(self.override_interval)
            .or(self.server_interval)
            .unwrap_or(self.options.default_poll_interval)
    }

    fn restart_timer(&mut self, ctx: &mut Context<ConnectionMsg>) {
        if self.state != State::Running {
            return;
        }
        let period = self.effective_interval();
        if self.ticker.as_ref().is_some_and(|t| t.period() == period) {
            return;
        }
        let delay = initial_delay(self.last_tick, period, Instant::now());
        debug!(?period, ?delay, "Restarting poll timer");
        self.ticker = Some(Ticker::start(ctx.myself(), delay, period, || ConnectionMsg::Tick));
    }

    fn start(&mut self, ctx: &mut Context<ConnectionMsg>) {
        info!("Connection coordinator starting...");
        self.state = State::Running;

        let (tx, rx) = mpsc::unbounded_channel();
        self.queue = Some(tx);
        let me = ctx.myself();
        ctx.spawn_task(
            FEEDBACK_TASK,
            feedback::run(
                rx,
                self.transport.clone(),
                self.hub.clone(),
                me,
                self.feedback_options.clone(),
            ),
        );

        self.ticker = None;
        self.restart_timer(ctx);
    }

    fn stop(&mut self, ctx: &mut Context<ConnectionMsg>) {
        info!("Connection coordinator stopping...");
        self.state = State::Stopped;
        self.ticker = None;
        self.queue = None;
        ctx.cancel_task(FEEDBACK_TASK);
        ctx.cancel_task(POLL_TASK);
        self.round_in_flight = false;
        self.extra_round = false;
    }

    fn poll(&mut self, ctx: &mut Context<ConnectionMsg>, forced: bool) {
        self.round += 1;
        self.round_forced = forced;
        self.round_in_flight = true;

        let round = self.round;
        let transport = self.transport.clone();
        let config_data = self.config_data.clone();
        let hub = self.hub.clone();
        let tokens = self.tokens.clone();
        let me = ctx.myself();
        ctx.spawn_task(POLL_TASK, async move {
            hub.send(ClientEvent::Polling.into()).await;
            let result = poll_round(transport.as_ref(), config_data.as_ref(), tokens).await;
            me.send(ConnectionMsg::RoundFinished { round, result }).await;
        });
    }

    async fn on_round(&mut self, ctx: &mut Context<ConnectionMsg>, round: u64, result: Result<RoundReport, AgentError>) {
        if round != self.round || self.state != State::Running {
            debug!(round, "Dropping stale poll round");
            return;
        }
        self.round_in_flight = false;

        match result {
            Ok(report) => {
                self.tokens = report.tokens;
                self.failures = 0;
                self.backoff = None;
                if report.sleep.is_some() {
                    self.server_interval = report.sleep;
                }
                match report.fact {
                    Some(fact) => self.broadcast(fact).await,
                    None if self.round_forced => {
                        self.hub.send(ClientEvent::NoNewState.into()).await;
                    }
                    None => debug!("Controller state unchanged"),
                }
            }
            Err(e) => {
                self.tokens = ChangeTokens::default();
                self.failures = self.failures.saturating_add(1);
                let backoff = if e.is_timeout() {
                    self.options.timeout_backoff
                } else {
                    calc_exp_backoff(&self.options.backoff, self.failures - 1)
                };
                warn!(error = %e, ?backoff, failures = self.failures, "Poll failed");
                self.backoff = Some(backoff);
                self.hub.send(ClientEvent::error(e.to_string()).into()).await;
            }
        }

        self.restart_timer(ctx);
        if std::mem::take(&mut self.extra_round) {
            self.poll(ctx, false);
        }
    }

    async fn broadcast(&mut self, fact: ActionMsg) {
        self.listeners.retain(|l| !l.is_closed());
        for listener in &self.listeners {
            listener.send(fact.clone()).await;
        }
    }
}

/// One round-trip against the controller base and whatever it points at
async fn poll_round(
    transport: &dyn DdiTransport,
    config_data: &dyn ConfigDataProvider,
    mut tokens: ChangeTokens,
) -> Result<RoundReport, AgentError> {
    let base = match transport.check_actions(tokens.base.as_deref()).await? {
        Fetched::Unchanged => {
            return Ok(RoundReport {
                tokens,
                sleep: None,
                fact: None,
            });
        }
        Fetched::Changed { value, etag } => {
            tokens.base = etag;
            value
        }
    };
    let sleep = base.sleep_interval();

    if base.config_data_requested() && !config_data.is_current() {
        push_config_data(transport, config_data).await?;
    }

    let fact = derive_fact(transport, &base, &mut tokens).await?;
    Ok(RoundReport {
        tokens,
        sleep,
        fact: Some(fact),
    })
}

async fn push_config_data(transport: &dyn DdiTransport, provider: &dyn ConfigDataProvider) -> Result<(), AgentError> {
    let data = provider.config_data();
    let body = ConfigData {
        mode: ConfigDataMode::Merge,
        data: data.clone(),
    };
    let status = transport.put_config_data(&body).await?;
    if status.is_success() {
        info!(entries = data.len(), "Config data pushed");
        provider.on_pushed(&data);
    } else {
        warn!(%status, "Config data push rejected");
    }
    Ok(())
}

async fn derive_fact(
    transport: &dyn DdiTransport,
    base: &ControllerBase,
    tokens: &mut ChangeTokens,
) -> Result<ActionMsg, AgentError> {
    if let Some(action_id) = base.deployment_action_id() {
        let cached = tokens
            .deployment
            .take()
            .filter(|c| c.action_id == action_id);
        let etag = cached.as_ref().and_then(|c| c.etag.clone());

        return match transport.fetch_deployment(&action_id, etag.as_deref()).await? {
            Fetched::Changed { value, etag } => {
                tokens.deployment = Some(CachedDeployment {
                    action_id,
                    etag,
                    descriptor: value.clone(),
                });
                Ok(ActionMsg::DeploymentInfo {
                    descriptor: value,
                    info_changed: true,
                })
            }
            Fetched::Unchanged => match cached {
                Some(cached) => {
                    let descriptor = cached.descriptor.clone();
                    tokens.deployment = Some(cached);
                    Ok(ActionMsg::DeploymentInfo {
                        descriptor,
                        info_changed: false,
                    })
                }
                None => Err(AgentError::Internal(format!(
                    "deployment {} reported unchanged without a cached copy",
                    action_id
                ))),
            },
        };
    }

    tokens.deployment = None;
    if let Some(action_id) = base.cancel_action_id() {
        let cancel = transport.fetch_cancel(&action_id).await?;
        return Ok(ActionMsg::CancelInfo(cancel));
    }
    Ok(ActionMsg::NoAction)
}

#[async_trait]
impl Actor for ConnectionCoordinator {
    type Msg = ConnectionMsg;

    async fn handle(
        &mut self,
        ctx: &mut Context<ConnectionMsg>,
        msg: ConnectionMsg,
    ) -> Result<(), AgentError> {
        match (self.state, msg) {
            (_, ConnectionMsg::Register(listener)) => {
                debug!(path = %listener.path(), "Listener registered");
                self.listeners.push(listener);
            }
            (_, ConnectionMsg::Unregister(id)) => {
                self.listeners.retain(|l| l.id() != id);
            }
            (_, ConnectionMsg::SetPing(interval)) => {
                debug!(?interval, "Poll interval override");
                self.override_interval = interval;
                self.restart_timer(ctx);
            }
            (State::Stopped, ConnectionMsg::Start) => self.start(ctx),
            (State::Running, ConnectionMsg::Stop) => self.stop(ctx),
            (State::Running, ConnectionMsg::Tick) => {
                self.last_tick = Some(Instant::now());
                if self.round_in_flight {
                    debug!("Poll round still running, skipping tick");
                } else {
                    self.poll(ctx, false);
                }
            }
            (State::Running, ConnectionMsg::ForcePing) => {
                info!("Forced poll");
                self.tokens = ChangeTokens::default();
                self.extra_round = false;
                self.poll(ctx, true);
            }
            (State::Running, ConnectionMsg::RoundFinished { round, result }) => {
                self.on_round(ctx, round, result).await;
            }
            (State::Running, ConnectionMsg::FeedbackSettled) => {
                if self.round_in_flight {
                    self.extra_round = true;
                } else {
                    self.poll(ctx, false);
                }
            }
            (State::Running, ConnectionMsg::Feedback(feedback)) => {
                let sent = self.queue.as_ref().is_some_and(|q| q.send(feedback).is_ok());
                if !sent {
                    error!("Feedback queue closed, message dropped");
                }
            }
            (State::Stopped, ConnectionMsg::Feedback(feedback)) => {
                warn!(action_id = %feedback.feedback().action_id, "Connection stopped, feedback dropped");
            }
            (state, msg) => debug!(?state, ?msg, "Ignoring message"),
        }
        Ok(())
    }

    async fn stopped(&mut self, ctx: &mut Context<ConnectionMsg>) {
        if self.state == State::Running {
            self.stop(ctx);
        }
    }
}
