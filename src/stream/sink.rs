use super::StreamDescriptor;
use crate::error::{CameraError, CameraResult};
use crate::media::{
    ClientId, ConsumedBuffer, FormatDescription, PropertyValue, ScheduledOutput, SinkEndpoint,
    StreamProperties, StreamProperty,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Receives lifecycle callbacks of a [`StreamSink`].
pub trait StreamSinkDelegate: Send + Sync {
    /// The producer `client` started streaming.
    fn start_streaming_sink(&self, client: ClientId);

    /// The producer stopped streaming.
    fn stop_streaming_sink(&self);
}

/// The producer-facing stream.
///
/// Holds at most one producer client. Attaching a second producer before the
/// first one detached is left to the delegate to reject.
pub struct StreamSink {
    descriptor: StreamDescriptor,
    buffer_queue_size: u32,
    buffers_required_for_startup: u32,
    endpoint: Weak<dyn SinkEndpoint>,
    delegate: Weak<dyn StreamSinkDelegate>,
    client: Mutex<Option<ClientId>>,
}

impl StreamSink {
    /// Creates a sink stream pulling from `endpoint`.
    pub fn new(
        descriptor: StreamDescriptor,
        buffer_queue_size: u32,
        buffers_required_for_startup: u32,
        endpoint: Weak<dyn SinkEndpoint>,
        delegate: Weak<dyn StreamSinkDelegate>,
    ) -> Self {
        Self {
            descriptor,
            buffer_queue_size,
            buffers_required_for_startup,
            endpoint,
            delegate,
            client: Mutex::new(None),
        }
    }

    /// Identity and format of the stream.
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Formats the stream accepts, exactly one.
    pub fn formats(&self) -> Vec<FormatDescription> {
        vec![self.descriptor.format]
    }

    /// The OS endpoint, if it still exists.
    pub fn endpoint(&self) -> Option<Arc<dyn SinkEndpoint>> {
        self.endpoint.upgrade()
    }

    /// The attached producer.
    pub fn client(&self) -> Option<ClientId> {
        *self.client.lock()
    }

    /// Properties the stream answers.
    pub fn available_properties(&self) -> Vec<StreamProperty> {
        vec![
            StreamProperty::ActiveFormatIndex,
            StreamProperty::FrameDuration,
            StreamProperty::SinkBufferQueueSize,
            StreamProperty::SinkBuffersRequiredForStartup,
        ]
    }

    /// Reads the requested properties. Unknown properties are left out.
    pub fn stream_properties(&self, properties: &[StreamProperty]) -> StreamProperties {
        let mut values = StreamProperties::new();
        for property in properties {
            let value = match property {
                StreamProperty::ActiveFormatIndex => PropertyValue::Index(0),
                StreamProperty::FrameDuration => {
                    PropertyValue::Duration(self.descriptor.frame_duration)
                }
                StreamProperty::SinkBufferQueueSize => PropertyValue::Count(self.buffer_queue_size),
                StreamProperty::SinkBuffersRequiredForStartup => {
                    PropertyValue::Count(self.buffers_required_for_startup)
                }
                _ => continue,
            };
            values.insert(*property, value);
        }
        values
    }

    /// Property writes are ignored.
    pub fn set_stream_properties(&self, _properties: &StreamProperties) {}

    /// Every client may stream.
    pub fn authorized_to_start_stream(&self, _client: &ClientId) -> bool {
        true
    }

    /// The OS started the stream for the producer `client`.
    ///
    /// # Errors
    /// Returns [`CameraError::NoDelegate`] if the owning device is gone.
    pub fn start_stream(&self, client: ClientId) -> CameraResult<()> {
        let delegate = self
            .delegate
            .upgrade()
            .ok_or(CameraError::NoDelegate("start"))?;
        *self.client.lock() = Some(client);
        delegate.start_streaming_sink(client);
        Ok(())
    }

    /// The OS stopped the producer's stream.
    ///
    /// # Errors
    /// Returns [`CameraError::NoDelegate`] if the owning device is gone.
    pub fn stop_stream(&self) -> CameraResult<()> {
        let delegate = self
            .delegate
            .upgrade()
            .ok_or(CameraError::NoDelegate("stop"))?;
        *self.client.lock() = None;
        delegate.stop_streaming_sink();
        Ok(())
    }

    /// Pulls the next frame of `client`.
    ///
    /// Returns `None` if the endpoint is gone.
    pub async fn consume_sample_buffer(&self, client: &ClientId) -> Option<CameraResult<ConsumedBuffer>> {
        let endpoint = self.endpoint.upgrade()?;
        Some(endpoint.consume_sample_buffer(client).await)
    }

    /// Tells the producer when its frame was output.
    pub fn notify_scheduled_output(&self, output: ScheduledOutput) {
        match self.endpoint.upgrade() {
            Some(endpoint) => endpoint.notify_scheduled_output(output),
            None => trace!(stream = %self.descriptor.name, "Sink endpoint is gone, dropping scheduled output"),
        }
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("descriptor", &self.descriptor)
            .field("client", &self.client())
            .finish()
    }
}
