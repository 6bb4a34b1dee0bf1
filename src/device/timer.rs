//! Repeating frame timers.
//!
//! A [`FrameTimer`] runs a [`TimerTick`] on a Tokio task at a fixed period,
//! starting immediately. A tick is awaited to completion before the next one may
//! start; ticks missed meanwhile are skipped. Dropping the timer cancels it.
//! Periods below [`MIN_PERIOD`] are raised to it.

use async_trait::async_trait;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::trace;

/// Shortest period a timer fires at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// The kind of a running timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Sends the landing page.
    LandingPage,
    /// Pulls producer frames and pushes them directly.
    PullPush,
    /// Pumps producer frames through a smoothing frame processor.
    Smoothing,
}

/// Work performed on every timer fire.
#[async_trait]
pub trait TimerTick: Send + 'static {
    /// Runs one fire.
    async fn tick(&mut self);
}

/// A running repeating timer, cancelled on drop.
#[derive(Debug)]
pub struct FrameTimer {
    kind: TimerKind,
    handle: JoinHandle<()>,
}

impl FrameTimer {
    /// Starts firing `tick` every `period`, the first time right away.
    pub fn spawn<T: TimerTick>(runtime: &Handle, kind: TimerKind, period: Duration, mut tick: T) -> Self {
        let period = period.max(MIN_PERIOD);
        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tick.tick().await;
            }
        });
        trace!(?kind, ?period, "Timer started");

        Self { kind, handle }
    }

    /// The kind of the timer.
    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}

impl Drop for FrameTimer {
    fn drop(&mut self) {
        self.handle.abort();
        trace!(kind = ?self.kind, "Timer cancelled");
    }
}
