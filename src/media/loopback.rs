//! In-memory media endpoints.
//!
//! [`LoopbackSink`] stands in for the OS sink stream: a producer pushes frames
//! into it and the camera core pulls them out again. [`LoopbackSource`] stands in
//! for the OS source stream and records everything the core sends to consumers.
//! Both are used by the integration tests and by the `run` simulator.

use super::{
    ClientId, ConsumedBuffer, Discontinuity, FormatDescription, PixelCodec, SampleBuffer,
    ScheduledOutput, SinkEndpoint, SourceEndpoint, StreamProperties, StreamProperty,
};
use crate::error::{CameraError, CameraResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

enum Pending {
    Frame(SampleBuffer, Discontinuity),
    Failure(String),
}

#[derive(Default)]
struct SinkState {
    pending: VecDeque<Pending>,
    next_sequence_number: u64,
    scheduled_outputs: Vec<ScheduledOutput>,
}

/// Producer-facing loopback stream.
///
/// Frames are handed out in FIFO order. A pull reports `has_more_buffers` while
/// more entries are queued behind the returned one; pulling an empty sink yields
/// a [`ConsumedBuffer`] without a frame.
#[derive(Default)]
pub struct LoopbackSink {
    state: Mutex<SinkState>,
    consume_calls: AtomicU64,
}

impl LoopbackSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a frame as the producer would.
    pub fn push_frame(&self, buffer: SampleBuffer) {
        self.push_frame_with(buffer, Discontinuity::NONE);
    }

    /// Queues a frame with discontinuity flags.
    pub fn push_frame_with(&self, buffer: SampleBuffer, discontinuity: Discontinuity) {
        self.state
            .lock()
            .pending
            .push_back(Pending::Frame(buffer, discontinuity));
    }

    /// Makes a future pull fail with a media error, in queue order.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.state
            .lock()
            .pending
            .push_back(Pending::Failure(message.into()));
    }

    /// Number of entries waiting to be pulled.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of pulls performed so far.
    pub fn consume_calls(&self) -> u64 {
        self.consume_calls.load(Ordering::SeqCst)
    }

    /// Scheduled outputs reported by the core, oldest first.
    pub fn scheduled_outputs(&self) -> Vec<ScheduledOutput> {
        self.state.lock().scheduled_outputs.clone()
    }
}

#[async_trait]
impl SinkEndpoint for LoopbackSink {
    async fn consume_sample_buffer(&self, _client: &ClientId) -> CameraResult<ConsumedBuffer> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        match state.pending.pop_front() {
            None => Ok(ConsumedBuffer::empty()),
            Some(Pending::Failure(message)) => Err(CameraError::media(message)),
            Some(Pending::Frame(buffer, discontinuity)) => {
                let sequence_number = state.next_sequence_number;
                state.next_sequence_number += 1;
                Ok(ConsumedBuffer {
                    buffer: Some(buffer),
                    sequence_number,
                    discontinuity,
                    has_more_buffers: !state.pending.is_empty(),
                })
            }
        }
    }

    fn notify_scheduled_output(&self, output: ScheduledOutput) {
        self.state.lock().scheduled_outputs.push(output);
    }
}

/// A frame recorded by [`LoopbackSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// The frame as sent.
    pub buffer: SampleBuffer,
    /// Discontinuity flags passed with the frame.
    pub discontinuity: Discontinuity,
    /// Host time passed with the frame.
    pub host_time_ns: u64,
}

#[derive(Default)]
struct SourceState {
    sent: Vec<SentFrame>,
    notifications: Vec<StreamProperties>,
}

/// Consumer-facing loopback stream recording sends and property notifications.
#[derive(Default)]
pub struct LoopbackSource {
    state: Mutex<SourceState>,
}

impl LoopbackSource {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All frames sent so far, oldest first.
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.state.lock().sent.clone()
    }

    /// Number of frames sent so far.
    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// Number of frames sent in `codec`.
    pub fn sent_count_with_codec(&self, codec: PixelCodec) -> usize {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|frame| frame.buffer.format().codec == codec)
            .count()
    }

    /// Forgets all recorded frames.
    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// All property notifications so far, oldest first.
    pub fn notifications(&self) -> Vec<StreamProperties> {
        self.state.lock().notifications.clone()
    }

    /// Text values published for `property`, oldest first.
    pub fn published_texts(&self, property: StreamProperty) -> Vec<String> {
        self.state
            .lock()
            .notifications
            .iter()
            .filter_map(|properties| properties.get(&property))
            .filter_map(|value| value.as_text().map(str::to_string))
            .collect()
    }
}

impl SourceEndpoint for LoopbackSource {
    fn send(&self, buffer: &SampleBuffer, discontinuity: Discontinuity, host_time_ns: u64) {
        self.state.lock().sent.push(SentFrame {
            buffer: buffer.clone(),
            discontinuity,
            host_time_ns,
        });
    }

    fn notify_properties_changed(&self, properties: StreamProperties) {
        self.state.lock().notifications.push(properties);
    }
}

/// Builds a synthetic frame whose pixels are all set to `fill`.
///
/// # Errors
/// Returns [`CameraError::AcquiringPixelBufferFailed`] if the format is too large
/// to allocate.
pub fn solid_frame(
    format: FormatDescription,
    fill: u8,
    presentation_time_ns: u64,
) -> CameraResult<SampleBuffer> {
    let len = format.frame_len().ok_or_else(|| {
        CameraError::AcquiringPixelBufferFailed(format!("{format} exceeds addressable memory"))
    })?;
    SampleBuffer::new(format, Bytes::from(vec![fill; len]), presentation_time_ns)
}
