//! Media vocabulary shared with the OS media subsystem.
//!
//! The camera core never talks to the operating system directly. Everything that
//! crosses that boundary is expressed with the types in this module:
//!
//! - [`ClientId`]: opaque identity of a producer or consumer process
//! - [`FormatDescription`] and [`SampleBuffer`]: frame format and frame payload
//! - [`StreamProperties`] and [`DeviceProperties`]: property reads and notifications
//! - [`SinkEndpoint`] / [`SourceEndpoint`]: the OS-side stream objects the core
//!   pulls frames from and pushes frames to
//!
//! [`loopback`] provides in-memory endpoints for tests and the simulator.

pub mod loopback;

use crate::error::{CameraError, CameraResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Formats
// =============================================================================

/// Pixel codec of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelCodec {
    /// Bi-planar 4:2:0 YpCbCr, 8 bit, video range.
    Nv12,
    /// Packed 32 bit BGRA.
    Bgra,
}

impl PixelCodec {
    /// Four-character code identifying the codec to the media subsystem.
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Nv12 => *b"420v",
            Self::Bgra => *b"BGRA",
        }
    }

    /// Number of bytes one frame of `width` x `height` pixels occupies.
    ///
    /// Returns `None` if the size does not fit into `usize`.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = usize::try_from(width)
            .ok()?
            .checked_mul(usize::try_from(height).ok()?)?;
        match self {
            Self::Nv12 => pixels.checked_mul(3).map(|len| len / 2),
            Self::Bgra => pixels.checked_mul(4),
        }
    }
}

impl fmt::Display for PixelCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nv12 => write!(f, "nv12"),
            Self::Bgra => write!(f, "bgra"),
        }
    }
}

/// Codec and dimensions of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatDescription {
    /// Pixel codec
    pub codec: PixelCodec,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl FormatDescription {
    /// Creates a format description.
    pub fn new(codec: PixelCodec, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
        }
    }

    /// Byte length of one frame in this format, if representable.
    pub fn frame_len(&self) -> Option<usize> {
        self.codec.frame_len(self.width, self.height)
    }
}

impl fmt::Display for FormatDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.codec, self.width, self.height)
    }
}

// =============================================================================
// Frames
// =============================================================================

/// One video frame together with its format and presentation time.
///
/// The payload is reference counted, cloning a sample buffer never copies pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    format: FormatDescription,
    data: Bytes,
    presentation_time_ns: u64,
}

impl SampleBuffer {
    /// Wraps `data` as a frame of `format`.
    ///
    /// # Errors
    /// Returns [`CameraError::InvalidSampleBuffer`] if the payload length does not
    /// match the format.
    pub fn new(format: FormatDescription, data: Bytes, presentation_time_ns: u64) -> CameraResult<Self> {
        let expected = format.frame_len().ok_or(CameraError::InvalidSampleBuffer {
            expected: usize::MAX,
            actual: data.len(),
        })?;
        if data.len() != expected {
            return Err(CameraError::InvalidSampleBuffer {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            format,
            data,
            presentation_time_ns,
        })
    }

    /// Format of the frame.
    pub fn format(&self) -> FormatDescription {
        self.format
    }

    /// Raw pixel data.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Presentation time stamp in host-clock nanoseconds.
    pub fn presentation_time_ns(&self) -> u64 {
        self.presentation_time_ns
    }
}

/// Discontinuity flags attached to a sent frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Discontinuity(u32);

impl Discontinuity {
    /// Frame continues the previous one.
    pub const NONE: Self = Self(0);
    /// Reason for the discontinuity is unknown.
    pub const UNKNOWN: Self = Self(1 << 0);
    /// Presentation time jumped.
    pub const TIME: Self = Self(1 << 1);
    /// Frames were dropped before this one.
    pub const SAMPLE_DROPPED: Self = Self(1 << 6);

    /// Creates flags from their raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether all flags in `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Discontinuity {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Result of pulling one frame from a sink endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedBuffer {
    /// The frame, or `None` if the producer has not delivered one yet.
    pub buffer: Option<SampleBuffer>,
    /// Sequence number the producer assigned to the frame.
    pub sequence_number: u64,
    /// Discontinuity reported by the producer.
    pub discontinuity: Discontinuity,
    /// Whether the producer has queued more frames behind this one.
    pub has_more_buffers: bool,
}

impl ConsumedBuffer {
    /// A pull that produced no frame.
    pub fn empty() -> Self {
        Self {
            buffer: None,
            sequence_number: 0,
            discontinuity: Discontinuity::NONE,
            has_more_buffers: false,
        }
    }
}

/// Tells the producer when one of its frames went out to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledOutput {
    /// Sequence number of the frame that was output.
    pub sequence_number: u64,
    /// Host time of the output in nanoseconds.
    pub host_time_ns: u64,
}

// =============================================================================
// Clients
// =============================================================================

/// Identity of a process attached to a stream.
///
/// Streams only ever hold identities, never the clients themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId {
    /// Unique identifier of the connection.
    pub id: Uuid,
    /// Process identifier of the client.
    pub pid: u32,
}

impl ClientId {
    /// Creates a new client identity for process `pid`.
    pub fn new(pid: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            pid,
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pid)
    }
}

// =============================================================================
// Properties
// =============================================================================

/// Properties a stream exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamProperty {
    /// Index of the active format, always 0.
    ActiveFormatIndex,
    /// Duration of one frame.
    FrameDuration,
    /// Process identifiers of connected consumers.
    StreamingClients,
    /// Diagnostic log delivery.
    Log,
    /// Number of buffers the sink queues.
    SinkBufferQueueSize,
    /// Number of buffers a producer delivers before the sink starts.
    SinkBuffersRequiredForStartup,
}

/// Value of a stream property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// An index into a list.
    Index(usize),
    /// A time span.
    Duration(Duration),
    /// A count.
    Count(u32),
    /// A string.
    Text(String),
}

impl PropertyValue {
    /// The string payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// A set of stream property values keyed by property.
pub type StreamProperties = BTreeMap<StreamProperty, PropertyValue>;

/// Properties a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceProperty {
    /// How the device is attached to the host.
    TransportType,
    /// Device model name.
    Model,
}

/// How a device is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Software device without hardware.
    Virtual,
}

/// Device property values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProperties {
    /// Transport type, if requested.
    pub transport_type: Option<TransportType>,
    /// Model name, if requested.
    pub model: Option<String>,
}

// =============================================================================
// Endpoints
// =============================================================================

/// The OS-side stream a producer feeds frames into.
#[async_trait]
pub trait SinkEndpoint: Send + Sync {
    /// Pulls the next queued frame of `client`.
    async fn consume_sample_buffer(&self, client: &ClientId) -> CameraResult<ConsumedBuffer>;

    /// Reports to the producer that a frame was output.
    fn notify_scheduled_output(&self, output: ScheduledOutput);
}

/// The OS-side stream that fans frames out to consumers.
pub trait SourceEndpoint: Send + Sync {
    /// Delivers a frame to every connected consumer. Never blocks.
    fn send(&self, buffer: &SampleBuffer, discontinuity: Discontinuity, host_time_ns: u64);

    /// Sets stream properties and notifies consumers of the change.
    fn notify_properties_changed(&self, properties: StreamProperties);
}
