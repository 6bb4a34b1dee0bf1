//! Stream adapters between the OS media subsystem and the device.
//!
//! - [`StreamSource`]: outbound stream, fans frames out to consumers and carries
//!   the diagnostic log property
//! - [`StreamSink`]: inbound stream, accepts frames from the single producer
//!
//! Both forward lifecycle callbacks to a delegate, which is the
//! [`crate::device::Device`] owning them. Delegates and endpoints are held weakly;
//! a callback arriving after either is gone is answered with an error or skipped.

pub mod properties;
mod sink;
mod source;

pub use sink::{StreamSink, StreamSinkDelegate};
pub use source::{StreamSource, StreamSourceDelegate};

use crate::config::Configuration;
use crate::media::FormatDescription;
use std::time::Duration;
use uuid::Uuid;

/// Identity and format shared by both stream directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Stream identifier
    pub id: Uuid,
    /// Human-readable name
    pub name: String,
    /// The single format the stream offers
    pub format: FormatDescription,
    /// Duration of one frame
    pub frame_duration: Duration,
}

impl StreamDescriptor {
    /// Descriptor of the consumer-facing stream.
    pub fn source(config: &Configuration) -> Self {
        Self {
            id: config.source_stream_id,
            name: config.source_stream_name.clone(),
            format: config.video_format(),
            frame_duration: config.frame_interval(),
        }
    }

    /// Descriptor of the producer-facing stream.
    pub fn sink(config: &Configuration) -> Self {
        Self {
            id: config.sink_stream_id,
            name: config.sink_stream_name.clone(),
            format: config.video_format(),
            frame_duration: config.frame_interval(),
        }
    }
}
