//! Timer ticks of the device.
//!
//! [`PullPushPump`] moves producer frames to consumers, one per tick:
//!
//! 1. Pull a frame from the sink.
//! 2. If more frames are queued behind it, discard it and pull again, so consumers
//!    always see the newest frame and never a backlog.
//! 3. Send the last frame with the current host time and report the scheduled
//!    output to the producer.
//! 4. If no frame is available after the producer delivered its first one, retry
//!    up to [`PULL_RETRY_COUNT_MAX`] times, spaced so that all retries fit into
//!    the first half of the frame interval. A freshly attached producer is given
//!    one interval to deliver before retries kick in.
//!
//! [`LandingPageTick`] sends the pre-converted landing page instead.

use super::timer::TimerTick;
use crate::clock::host_time_nanos;
use crate::landing_page::LandingPage;
use crate::media::{ClientId, Discontinuity, ScheduledOutput};
use crate::stream::properties::BUFFER_RETRIES_FAILED;
use crate::stream::{StreamSink, StreamSource};
use crate::stream_logger::{LogBehavior, StreamLogger};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// How many times a tick retries pulling before it gives up.
pub const PULL_RETRY_COUNT_MAX: u32 = 5;

/// Result of one pull/push tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// A frame was sent.
    Sent {
        /// Older frames discarded to reach the newest one.
        skipped: u32,
        /// Retries needed before a frame was available.
        retries: u32,
    },
    /// No frame was available, nothing was sent.
    NoFrame {
        /// Retries performed before giving up.
        retries: u32,
    },
    /// Pulling failed, nothing was sent.
    Failed,
    /// A stream endpoint is gone, nothing was pulled.
    StreamGone,
}

/// Pulls frames of one producer and pushes them to consumers.
pub struct PullPushPump {
    client: ClientId,
    sink: Arc<StreamSink>,
    source: Arc<StreamSource>,
    logger: Arc<StreamLogger>,
    retry_interval: Duration,
    waited_for_first_frame: bool,
}

impl PullPushPump {
    /// Creates a pump for a freshly attached producer.
    pub fn new(
        client: ClientId,
        sink: Arc<StreamSink>,
        source: Arc<StreamSource>,
        logger: Arc<StreamLogger>,
        frame_interval: Duration,
    ) -> Self {
        Self {
            client,
            sink,
            source,
            logger,
            retry_interval: Self::retry_interval(frame_interval),
            waited_for_first_frame: false,
        }
    }

    /// Spacing of retries within one frame interval.
    pub fn retry_interval(frame_interval: Duration) -> Duration {
        frame_interval / 2 / PULL_RETRY_COUNT_MAX
    }

    /// Whether the producer delivered at least one frame to this pump.
    pub fn waited_for_first_frame(&self) -> bool {
        self.waited_for_first_frame
    }

    /// Runs one pull/push cycle.
    pub async fn pull_push_frame(&mut self) -> PumpOutcome {
        let mut retries_left = PULL_RETRY_COUNT_MAX;
        let mut retries = 0;
        let mut skipped = 0;

        loop {
            let Some(result) = self.sink.consume_sample_buffer(&self.client).await else {
                return PumpOutcome::StreamGone;
            };

            let consumed = match result {
                Ok(consumed) => consumed,
                Err(err) => {
                    self.logger
                        .push_log_entry(format!("Error occurred consuming buffers: {err}"));
                    return PumpOutcome::Failed;
                }
            };

            let Some(buffer) = consumed.buffer else {
                // Only retry once the producer is known to deliver. Otherwise the
                // timer could lock into a phase where every regular pull is early.
                if self.waited_for_first_frame && retries_left > 0 {
                    retries_left -= 1;
                    retries += 1;
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }

                if self.waited_for_first_frame {
                    self.logger.push_log_entry_with(
                        BUFFER_RETRIES_FAILED,
                        LogBehavior::StreamAndConsoleWarning,
                    );
                } else {
                    self.logger.push_log_entry("Waiting for first buffer.");
                }
                return PumpOutcome::NoFrame { retries };
            };

            if consumed.has_more_buffers {
                skipped += 1;
                continue;
            }

            let now = host_time_nanos();
            if !self.source.send(&buffer, consumed.discontinuity, now) {
                return PumpOutcome::StreamGone;
            }
            self.sink.notify_scheduled_output(ScheduledOutput {
                sequence_number: consumed.sequence_number,
                host_time_ns: now,
            });
            self.waited_for_first_frame = true;

            return PumpOutcome::Sent { skipped, retries };
        }
    }
}

#[async_trait]
impl TimerTick for PullPushPump {
    async fn tick(&mut self) {
        let outcome = self.pull_push_frame().await;
        trace!(?outcome, producer = %self.client, "Pull/push tick");
    }
}

/// Sends the landing page to consumers.
pub struct LandingPageTick {
    landing_page: Arc<LandingPage>,
    source: Arc<StreamSource>,
    logger: Arc<StreamLogger>,
}

impl LandingPageTick {
    /// Creates a landing-page tick.
    pub fn new(
        landing_page: Arc<LandingPage>,
        source: Arc<StreamSource>,
        logger: Arc<StreamLogger>,
    ) -> Self {
        Self {
            landing_page,
            source,
            logger,
        }
    }

    /// Sends one landing-page frame, returns whether it went out.
    pub fn send_landing_page(&self) -> bool {
        let now = host_time_nanos();
        match self.landing_page.frame(now) {
            Ok(frame) => self.source.send(&frame, Discontinuity::NONE, now),
            Err(err) => {
                self.logger
                    .push_log_entry(format!("Error creating sample buffer {err}"));
                false
            }
        }
    }
}

#[async_trait]
impl TimerTick for LandingPageTick {
    async fn tick(&mut self) {
        self.send_landing_page();
    }
}
