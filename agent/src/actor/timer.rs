//! Periodic message delivery

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::ActorRef;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Sends a message to a unit on a fixed period until dropped
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
    period: Duration,
}

impl Ticker {
    pub fn start<M, F>(target: ActorRef<M>, first_delay: Duration, period: Duration, make: F) -> Self
    where
        M: Send + 'static,
        F: Fn() -> M + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + first_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if target.is_closed() {
                    break;
                }
                target.send(make()).await;
            }
        });
        Self { handle, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Delay before the first tick of a restarted timer so it stays aligned with the
/// previous tick. Zero when a full period already elapsed.
pub fn initial_delay(last_tick: Option<Instant>, period: Duration, now: Instant) -> Duration {
    match last_tick {
        Some(last) => (last + period).saturating_duration_since(now),
        None => Duration::ZERO,
    }
}
