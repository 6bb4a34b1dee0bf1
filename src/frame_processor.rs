//! Smoothing frame pump.
//!
//! [`FrameProcessor`] sits between one [`StreamSink`] and one [`StreamSource`] and
//! turns producer jitter into a constant one-frame latency. Two unsynchronized
//! tasks tick at the frame rate:
//!
//! - the consume task pulls one frame per tick into a queue holding
//!   `TARGET_DELAY_FRAMES + 1` frames that keeps the newest ones,
//! - the send task releases the front frame only while more than
//!   `TARGET_DELAY_FRAMES` frames are queued.
//!
//! After `n` consume ticks at most `n - TARGET_DELAY_FRAMES` frames were released.

use crate::clock::host_time_nanos;
use crate::error::{CameraError, CameraResult};
use crate::media::{ClientId, Discontinuity, SampleBuffer};
use crate::queue::{BoundedSafeQueue, Enqueued, PreservationPolicy};
use crate::stream::{StreamSink, StreamSource};
use crate::stream_logger::StreamLogger;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// Frame rates the smoothing pump supports.
pub const SUPPORTED_FRAME_RATES: RangeInclusive<u32> = 15..=60;

/// Number of frames held back before the first one is released.
pub const TARGET_DELAY_FRAMES: usize = 1;

/// Upper bound for [`FrameProcessor::stop`] to wait for in-flight ticks.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

const FRAME_BUFFER_QUEUE_SIZE: usize = TARGET_DELAY_FRAMES + 1;
const UNAVAILABLE_FRAME_LOGGING_THRESHOLD: u64 = 10;
const REPEATING_UNAVAILABLE_FRAME_LOGGING_THRESHOLD: u64 = 100;

/// A running smoothing pump.
///
/// Dropping the processor cancels both tasks without waiting for them.
pub struct FrameProcessor {
    cancel_guard: DropGuard,
    consuming: JoinHandle<()>,
    sending: JoinHandle<()>,
    logger: Arc<StreamLogger>,
}

impl FrameProcessor {
    /// Starts pumping frames of `client` from `sink` to `source`.
    ///
    /// # Errors
    /// Returns [`CameraError::UnsupportedFrameRate`] if `frame_rate` is outside
    /// [`SUPPORTED_FRAME_RATES`].
    pub fn start(
        runtime: &Handle,
        source: Arc<StreamSource>,
        sink: Arc<StreamSink>,
        client: ClientId,
        frame_rate: u32,
        logger: Arc<StreamLogger>,
    ) -> CameraResult<Self> {
        if !SUPPORTED_FRAME_RATES.contains(&frame_rate) {
            return Err(CameraError::UnsupportedFrameRate {
                frame_rate,
                min: *SUPPORTED_FRAME_RATES.start(),
                max: *SUPPORTED_FRAME_RATES.end(),
            });
        }

        let frame_buffers = Arc::new(BoundedSafeQueue::new(
            FRAME_BUFFER_QUEUE_SIZE,
            PreservationPolicy::Newest,
        )?);
        let frame_duration = Duration::from_secs_f64(1.0 / f64::from(frame_rate));
        let cancel = CancellationToken::new();

        let consuming = {
            let cancel = cancel.clone();
            let frame_buffers = Arc::clone(&frame_buffers);
            let logger = Arc::clone(&logger);
            runtime.spawn(async move {
                let mut ticker = interval(frame_duration);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    consume_frame(&sink, &client, &frame_buffers, &logger).await;
                }
            })
        };

        let sending = {
            let cancel = cancel.clone();
            let logger = Arc::clone(&logger);
            runtime.spawn(async move {
                let mut ticker = interval(frame_duration);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut unavailable_frame_counter = 0u64;
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    send_frame(&source, &frame_buffers, &logger, &mut unavailable_frame_counter);
                }
            })
        };

        debug!(frame_rate, producer = %client, "Frame processor started");

        Ok(Self {
            cancel_guard: cancel.drop_guard(),
            consuming,
            sending,
            logger,
        })
    }

    /// Stops both tasks.
    ///
    /// Cancellation takes effect immediately; the returned future waits up to
    /// [`STOP_TIMEOUT`] for an in-flight tick to finish and resolves to whether it did.
    pub fn stop(self) -> impl Future<Output = bool> + Send + 'static {
        let Self {
            cancel_guard,
            mut consuming,
            mut sending,
            logger,
        } = self;
        cancel_guard.disarm().cancel();

        async move {
            let finished = tokio::time::timeout(STOP_TIMEOUT, async {
                let _ = (&mut consuming).await;
                let _ = (&mut sending).await;
            })
            .await
            .is_ok();

            if finished {
                logger.push_log_entry("Finished consuming and sending frames.");
            } else {
                consuming.abort();
                sending.abort();
                warn!("Frame processor did not stop within {:?}", STOP_TIMEOUT);
                logger.push_log_entry(
                    "Failed stopping consuming and sending frames, finishing nonetheless.",
                );
            }
            finished
        }
    }
}

impl std::fmt::Debug for FrameProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProcessor")
            .field("consuming", &!self.consuming.is_finished())
            .field("sending", &!self.sending.is_finished())
            .finish()
    }
}

async fn consume_frame(
    sink: &StreamSink,
    client: &ClientId,
    frame_buffers: &BoundedSafeQueue<SampleBuffer>,
    logger: &StreamLogger,
) {
    let Some(result) = sink.consume_sample_buffer(client).await else {
        return;
    };

    match result {
        Err(err) => logger.push_log_entry(format!("Error consuming sample buffer: {err}")),
        Ok(consumed) => match consumed.buffer {
            None => logger.push_log_entry("Failed consuming sample buffer, because it was nil."),
            Some(buffer) => {
                if let Enqueued::Evicted(_) | Enqueued::Rejected(_) = frame_buffers.enqueue(buffer) {
                    logger.push_log_entry("Dropped sample buffer.");
                }
            }
        },
    }
}

fn send_frame(
    source: &StreamSource,
    frame_buffers: &BoundedSafeQueue<SampleBuffer>,
    logger: &StreamLogger,
    unavailable_frame_counter: &mut u64,
) {
    // Only release a frame once the target delay is buffered.
    let Some(frame) = frame_buffers.dequeue_if(|count| count > TARGET_DELAY_FRAMES) else {
        *unavailable_frame_counter += 1;
        let attempt = *unavailable_frame_counter;
        if attempt <= UNAVAILABLE_FRAME_LOGGING_THRESHOLD
            || attempt % REPEATING_UNAVAILABLE_FRAME_LOGGING_THRESHOLD == 0
        {
            logger.push_log_entry(format!("Failed dequeueing sample buffer, attempt #{attempt}"));
        }
        return;
    };

    source.send(&frame, Discontinuity::NONE, host_time_nanos());
    *unavailable_frame_counter = 0;
}
