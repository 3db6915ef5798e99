//! Named timers owned by one session.
//!
//! Re-registering a name replaces the previous timer. `shutdown` (or
//! dropping the ticker) cancels everything still scheduled.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    Countdown,
    FaceCheck,
    Snapshot,
    Heartbeat,
    MobileLiveness,
    MobileGrace,
    MobileHeartbeat,
    TerminateRetry,
}

impl TimerName {
    pub fn default_period(&self) -> Duration {
        match self {
            TimerName::Countdown => Duration::from_secs(1),
            TimerName::FaceCheck => Duration::from_secs(2),
            TimerName::Snapshot => Duration::from_secs(15),
            TimerName::Heartbeat => Duration::from_secs(5),
            TimerName::MobileLiveness => Duration::from_secs(15),
            TimerName::MobileGrace => Duration::from_secs(60),
            TimerName::MobileHeartbeat => Duration::from_secs(2),
            TimerName::TerminateRetry => Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
pub struct Ticker {
    timers: Mutex<HashMap<TimerName, JoinHandle<()>>>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `tick` every `period`, first after one full period.
    pub fn every<F, Fut>(&self, name: TimerName, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        self.install(name, handle);
    }

    /// Runs `fire` once after `delay`. Calling it again under the same name
    /// pushes the deadline back, which makes it a watchdog.
    pub fn once<F, Fut>(&self, name: TimerName, delay: Duration, fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire().await;
        });
        self.install(name, handle);
    }

    pub fn cancel(&self, name: TimerName) -> bool {
        match self.lock().remove(&name) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, name: TimerName) -> bool {
        self.lock()
            .get(&name)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|h| !h.is_finished()).count()
    }

    pub fn shutdown(&self) {
        for (name, handle) in self.lock().drain() {
            tracing::trace!("Cancelling {:?} timer", name);
            handle.abort();
        }
    }

    fn install(&self, name: TimerName, handle: JoinHandle<()>) {
        if let Some(previous) = self.lock().insert(name, handle) {
            previous.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TimerName, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
