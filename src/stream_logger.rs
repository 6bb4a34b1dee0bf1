//! Out-of-band diagnostic log delivery.
//!
//! A sandboxed camera extension has no channel to its log consumer besides the
//! stream it publishes. [`StreamLogger`] collects diagnostic strings in a bounded
//! queue and delivers them through the log property of the source stream:
//!
//! - [`LoggerMode::Push`]: a background task drains the whole queue every 200 ms
//!   (first drain after 500 ms) and publishes all messages joined by
//!   [`LOG_MESSAGES_SEPARATOR`] as one property change.
//! - [`LoggerMode::Pull`]: a consumer writes the log property and reads it back;
//!   every read pops exactly one message.
//!
//! Entries can additionally be duplicated to the host console through a
//! [`ConsoleSink`], guarded by a [`StringThrottle`].

use crate::error::{CameraError, CameraResult};
use crate::media::{PropertyValue, SourceEndpoint, StreamProperties, StreamProperty};
use crate::queue::BoundedSafeQueue;
use crate::stream::properties::{
    LOG_MESSAGES_SEPARATOR, NO_LOG_MESSAGES_AVAILABLE, UNSUPPORTED_LOG_COLLECTION_MODE,
};
use crate::throttle::{Passthrough, StringThrottle};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Delay before the first push, giving the device time to finish wiring up its streams.
pub const PUSH_SETUP_DELAY: Duration = Duration::from_millis(500);

/// Interval between two pushes.
pub const PUSH_INTERVAL: Duration = Duration::from_millis(200);

/// `tracing` target of console duplicates.
pub const CONSOLE_TARGET: &str = "virtual_camera::console";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Where a log entry goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogBehavior {
    /// Only into the stream log.
    StreamOnly,
    /// Into the stream log and, throttled, to the console.
    #[default]
    StreamAndConsole,
    /// Into the stream log and, throttled, to the console at warning level.
    StreamAndConsoleWarning,
}

/// Severity of a console duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    /// Regular diagnostics
    Info,
    /// A genuine problem, e.g. a producer stall
    Warning,
}

/// Host console receiving duplicated log entries.
pub trait ConsoleSink: Send + Sync {
    /// Emits one message. The console adds its own timestamp.
    fn emit(&self, level: ConsoleLevel, message: &str);
}

/// Console sink emitting `tracing` events on [`CONSOLE_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl ConsoleSink for TracingConsole {
    fn emit(&self, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::Info => info!(target: CONSOLE_TARGET, "{message}"),
            ConsoleLevel::Warning => warn!(target: CONSOLE_TARGET, "{message}"),
        }
    }
}

/// Delivery mode, fixed when the logger is started.
pub enum LoggerMode {
    /// Periodically push batches to this endpoint's log property.
    Push(Weak<dyn SourceEndpoint>),
    /// Let a consumer pull single messages.
    Pull,
}

enum State {
    Initialized,
    Pushing(JoinHandle<()>),
    Pulled,
}

/// Collects diagnostic log entries and delivers them through the stream.
pub struct StreamLogger {
    message_prefix: String,
    log_queue: Arc<BoundedSafeQueue<String>>,
    throttle: Mutex<Box<dyn StringThrottle>>,
    console: Option<Arc<dyn ConsoleSink>>,
    state: Mutex<State>,
}

impl StreamLogger {
    /// Creates a logger that is not yet delivering.
    ///
    /// * `message_prefix` - prepended to every stream log entry
    /// * `throttle` - guards console duplication, [`Passthrough`] if `None`
    /// * `console` - console duplicates are discarded if `None`
    pub fn new(
        message_prefix: impl Into<String>,
        throttle: Option<Box<dyn StringThrottle>>,
        console: Option<Arc<dyn ConsoleSink>>,
    ) -> Self {
        Self {
            message_prefix: message_prefix.into(),
            log_queue: Arc::new(BoundedSafeQueue::with_defaults()),
            throttle: Mutex::new(throttle.unwrap_or_else(|| Box::new(Passthrough))),
            console,
            state: Mutex::new(State::Initialized),
        }
    }

    /// Starts log delivery.
    ///
    /// # Errors
    /// Returns [`CameraError::LoggerAlreadyStarted`] if called more than once.
    pub fn start(&self, mode: LoggerMode, runtime: &Handle) -> CameraResult<()> {
        let mut state = self.state.lock();
        if !matches!(*state, State::Initialized) {
            return Err(CameraError::LoggerAlreadyStarted);
        }

        *state = match mode {
            LoggerMode::Push(endpoint) => {
                let queue = Arc::clone(&self.log_queue);
                State::Pushing(runtime.spawn(push_log_queue(queue, endpoint)))
            }
            LoggerMode::Pull => State::Pulled,
        };
        Ok(())
    }

    /// Whether the logger pushes batches on its own.
    pub fn is_pushing(&self) -> bool {
        matches!(*self.state.lock(), State::Pushing(_))
    }

    /// Queues `entry` for the stream and duplicates it to the console.
    pub fn push_log_entry(&self, entry: impl AsRef<str>) {
        self.push_log_entry_with(entry, LogBehavior::default());
    }

    /// Queues `entry` for the stream; `behavior` decides about console duplication.
    ///
    /// The stream copy is decorated as `"<prefix> <yyyy-MM-dd HH:mm:ss.SSS> <entry>"`.
    /// A full queue keeps its oldest entries.
    pub fn push_log_entry_with(&self, entry: impl AsRef<str>, behavior: LogBehavior) {
        let entry = entry.as_ref();
        let date = chrono::Local::now().format(DATE_FORMAT);
        let decorated = format!("{} {} {}", self.message_prefix, date, entry);
        if let Some(dropped) = self.log_queue.enqueue(decorated).dropped() {
            debug!(entry = %dropped, "Stream log queue is full, dropping entry");
        }

        let level = match behavior {
            LogBehavior::StreamOnly => return,
            LogBehavior::StreamAndConsole => ConsoleLevel::Info,
            LogBehavior::StreamAndConsoleWarning => ConsoleLevel::Warning,
        };
        let Some(console) = &self.console else {
            return;
        };
        // The console adds its own timestamp, so only the bare entry is throttled and emitted.
        let throttled = self.throttle.lock().add(entry);
        if let Some(message) = throttled {
            console.emit(level, &message);
        }
    }

    /// Pops the next entry for a consumer pulling the log property.
    ///
    /// Returns [`NO_LOG_MESSAGES_AVAILABLE`] if the queue is empty and
    /// [`UNSUPPORTED_LOG_COLLECTION_MODE`] unless the logger was started in pull mode.
    pub fn pop_log_entry(&self) -> String {
        if !matches!(*self.state.lock(), State::Pulled) {
            return UNSUPPORTED_LOG_COLLECTION_MODE.to_string();
        }
        self.log_queue
            .dequeue()
            .unwrap_or_else(|| NO_LOG_MESSAGES_AVAILABLE.to_string())
    }

    /// Number of entries waiting for delivery.
    pub fn queued_entries(&self) -> usize {
        self.log_queue.len()
    }
}

impl Drop for StreamLogger {
    fn drop(&mut self) {
        if let State::Pushing(handle) = &*self.state.lock() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for StreamLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLogger")
            .field("message_prefix", &self.message_prefix)
            .field("log_queue", &self.log_queue)
            .field("pushing", &self.is_pushing())
            .finish()
    }
}

/// Splits a pushed log batch back into single messages.
pub fn split_log_batch(batch: &str) -> Vec<&str> {
    batch
        .split(LOG_MESSAGES_SEPARATOR)
        .filter(|message| !message.is_empty())
        .collect()
}

async fn push_log_queue(queue: Arc<BoundedSafeQueue<String>>, endpoint: Weak<dyn SourceEndpoint>) {
    let mut ticker = interval_at(Instant::now() + PUSH_SETUP_DELAY, PUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(endpoint) = endpoint.upgrade() else {
            debug!("Log stream is gone, stopping log delivery");
            break;
        };

        // Property changes delivered in quick succession get coalesced by the
        // receiver, so everything queued goes out as one change.
        let messages = queue.drain();
        if messages.is_empty() {
            continue;
        }

        let mut properties = StreamProperties::new();
        properties.insert(
            StreamProperty::Log,
            PropertyValue::Text(messages.join(LOG_MESSAGES_SEPARATOR)),
        );
        endpoint.notify_properties_changed(properties);
    }
}
