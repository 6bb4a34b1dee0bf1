use super::properties::STREAMING_CLIENTS_SEPARATOR;
use super::StreamDescriptor;
use crate::error::{CameraError, CameraResult};
use crate::media::{
    ClientId, Discontinuity, FormatDescription, PropertyValue, SampleBuffer, SourceEndpoint,
    StreamProperties, StreamProperty,
};
use crate::stream_logger::StreamLogger;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Receives lifecycle callbacks of a [`StreamSource`].
pub trait StreamSourceDelegate: Send + Sync {
    /// A consumer started streaming.
    fn start_streaming_source(&self);

    /// A consumer stopped streaming.
    fn stop_streaming_source(&self);

    /// Logger receiving the stream's diagnostics.
    fn stream_logger(&self) -> &StreamLogger;
}

/// The consumer-facing stream.
///
/// Tracks the identities of connected consumers and publishes the log property.
/// Frames sent while the OS endpoint is gone are skipped.
pub struct StreamSource {
    descriptor: StreamDescriptor,
    endpoint: Weak<dyn SourceEndpoint>,
    delegate: Weak<dyn StreamSourceDelegate>,
    streaming_clients: Mutex<BTreeSet<ClientId>>,
    log: Mutex<String>,
}

impl StreamSource {
    /// Creates a source stream publishing through `endpoint`.
    pub fn new(
        descriptor: StreamDescriptor,
        endpoint: Weak<dyn SourceEndpoint>,
        delegate: Weak<dyn StreamSourceDelegate>,
    ) -> Self {
        Self {
            descriptor,
            endpoint,
            delegate,
            streaming_clients: Mutex::new(BTreeSet::new()),
            log: Mutex::new(String::new()),
        }
    }

    /// Identity and format of the stream.
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Formats the stream offers, exactly one.
    pub fn formats(&self) -> Vec<FormatDescription> {
        vec![self.descriptor.format]
    }

    /// The OS endpoint, if it still exists.
    pub fn endpoint(&self) -> Option<Arc<dyn SourceEndpoint>> {
        self.endpoint.upgrade()
    }

    /// Properties the stream answers.
    pub fn available_properties(&self) -> Vec<StreamProperty> {
        vec![
            StreamProperty::ActiveFormatIndex,
            StreamProperty::FrameDuration,
            StreamProperty::StreamingClients,
            StreamProperty::Log,
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
                StreamProperty::StreamingClients => {
                    PropertyValue::Text(self.streaming_clients_property())
                }
                StreamProperty::Log => PropertyValue::Text(self.log.lock().clone()),
                _ => continue,
            };
            values.insert(*property, value);
        }
        values
    }

    /// Applies property writes.
    ///
    /// Writing the log property, with any value, loads the next pulled log message
    /// into it. All other writes are ignored.
    pub fn set_stream_properties(&self, properties: &StreamProperties) {
        if !properties.contains_key(&StreamProperty::Log) {
            return;
        }
        let Some(delegate) = self.delegate.upgrade() else {
            return;
        };
        let entry = delegate.stream_logger().pop_log_entry();
        *self.log.lock() = entry;
    }

    /// Every client may stream.
    pub fn authorized_to_start_stream(&self, _client: &ClientId) -> bool {
        true
    }

    /// The OS started the stream for a consumer.
    ///
    /// # Errors
    /// Returns [`CameraError::NoDelegate`] if the owning device is gone.
    pub fn start_stream(&self) -> CameraResult<()> {
        let delegate = self
            .delegate
            .upgrade()
            .ok_or(CameraError::NoDelegate("start"))?;
        delegate.start_streaming_source();
        Ok(())
    }

    /// The OS stopped the stream for a consumer.
    ///
    /// # Errors
    /// Returns [`CameraError::NoDelegate`] if the owning device is gone.
    pub fn stop_stream(&self) -> CameraResult<()> {
        let delegate = self
            .delegate
            .upgrade()
            .ok_or(CameraError::NoDelegate("stop"))?;
        delegate.stop_streaming_source();
        Ok(())
    }

    /// Replaces the set of connected consumers, as observed by the OS.
    ///
    /// A change is logged and published through the streaming-clients property.
    pub fn set_streaming_clients(&self, clients: impl IntoIterator<Item = ClientId>) {
        let clients: BTreeSet<ClientId> = clients.into_iter().collect();
        let count = clients.len();
        {
            let mut current = self.streaming_clients.lock();
            if *current == clients {
                return;
            }
            *current = clients;
        }

        debug!(stream = %self.descriptor.name, consumers = count, "Consumer set changed");
        self.add_log_entry(format!("Connected consumers: {count}"));

        if let Some(endpoint) = self.endpoint.upgrade() {
            let mut properties = StreamProperties::new();
            properties.insert(
                StreamProperty::StreamingClients,
                PropertyValue::Text(self.streaming_clients_property()),
            );
            endpoint.notify_properties_changed(properties);
        }
    }

    /// Identities of the connected consumers.
    pub fn streaming_clients(&self) -> Vec<ClientId> {
        self.streaming_clients.lock().iter().copied().collect()
    }

    /// Sends a frame to all consumers.
    ///
    /// Returns `false` if the endpoint is gone and the frame was skipped.
    pub fn send(&self, buffer: &SampleBuffer, discontinuity: Discontinuity, host_time_ns: u64) -> bool {
        match self.endpoint.upgrade() {
            Some(endpoint) => {
                endpoint.send(buffer, discontinuity, host_time_ns);
                true
            }
            None => {
                trace!(stream = %self.descriptor.name, "Source endpoint is gone, skipping frame");
                false
            }
        }
    }

    /// Pushes a diagnostic entry to the owning device's logger.
    pub fn add_log_entry(&self, message: impl AsRef<str>) {
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.stream_logger().push_log_entry(message);
        }
    }

    fn streaming_clients_property(&self) -> String {
        self.streaming_clients
            .lock()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(STREAMING_CLIENTS_SEPARATOR)
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("descriptor", &self.descriptor)
            .field("streaming_clients", &self.streaming_clients.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::media::loopback::{solid_frame, LoopbackSource};
    use crate::stream::properties::NO_LOG_MESSAGES_AVAILABLE;
    use crate::stream_logger::LoggerMode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::runtime::Handle;

    struct CountingDelegate {
        started: AtomicU32,
        stopped: AtomicU32,
        logger: StreamLogger,
    }

    impl CountingDelegate {
        fn new() -> Arc<Self> {
            let logger = StreamLogger::new("[test]", None, None);
            logger.start(LoggerMode::Pull, &Handle::current()).unwrap();
            Arc::new(Self {
                started: AtomicU32::new(0),
                stopped: AtomicU32::new(0),
                logger,
            })
        }
    }

    impl StreamSourceDelegate for CountingDelegate {
        fn start_streaming_source(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn stop_streaming_source(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn stream_logger(&self) -> &StreamLogger {
            &self.logger
        }
    }

    fn source_with(
        endpoint: &Arc<LoopbackSource>,
        delegate: &Arc<CountingDelegate>,
    ) -> StreamSource {
        let endpoint: Arc<dyn SourceEndpoint> = endpoint.clone();
        let delegate: Arc<dyn StreamSourceDelegate> = delegate.clone();
        StreamSource::new(
            StreamDescriptor::source(&Configuration::default()),
            Arc::downgrade(&endpoint),
            Arc::downgrade(&delegate),
        )
    }

    #[tokio::test]
    async fn test_start_and_stop_forward_to_delegate() {
        let endpoint = Arc::new(LoopbackSource::new());
        let delegate = CountingDelegate::new();
        let source = source_with(&endpoint, &delegate);

        source.start_stream().unwrap();
        source.start_stream().unwrap();
        source.stop_stream().unwrap();

        assert_eq!(delegate.started.load(Ordering::SeqCst), 2);
        assert_eq!(delegate.stopped.load(Ordering::SeqCst), 1);
        assert!(source.authorized_to_start_stream(&ClientId::new(7)));
    }

    #[tokio::test]
    async fn test_missing_delegate_fails_start() {
        let endpoint = Arc::new(LoopbackSource::new());
        let delegate = CountingDelegate::new();
        let source = source_with(&endpoint, &delegate);
        drop(delegate);

        assert!(matches!(
            source.start_stream(),
            Err(CameraError::NoDelegate("start"))
        ));
        assert!(matches!(
            source.stop_stream(),
            Err(CameraError::NoDelegate("stop"))
        ));
    }

    #[tokio::test]
    async fn test_consumer_set_changes_are_published_once() {
        let endpoint = Arc::new(LoopbackSource::new());
        let delegate = CountingDelegate::new();
        let source = source_with(&endpoint, &delegate);
        let first = ClientId::new(101);
        let second = ClientId::new(202);

        source.set_streaming_clients([first]);
        source.set_streaming_clients([first]);
        source.set_streaming_clients([first, second]);

        let published = endpoint.published_texts(StreamProperty::StreamingClients);
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], "101");
        let mut pids: Vec<&str> = published[1].split(STREAMING_CLIENTS_SEPARATOR).collect();
        pids.sort_unstable();
        assert_eq!(pids, vec!["101", "202"]);

        assert!(delegate.logger.pop_log_entry().ends_with("Connected consumers: 1"));
        assert!(delegate.logger.pop_log_entry().ends_with("Connected consumers: 2"));
    }

    #[tokio::test]
    async fn test_log_property_write_pops_entry() {
        let endpoint = Arc::new(LoopbackSource::new());
        let delegate = CountingDelegate::new();
        let source = source_with(&endpoint, &delegate);
        delegate.logger.push_log_entry("pulled message");

        let mut write = StreamProperties::new();
        write.insert(StreamProperty::Log, PropertyValue::Text(String::new()));
        source.set_stream_properties(&write);

        let read = source.stream_properties(&[StreamProperty::Log]);
        let log = read[&StreamProperty::Log].as_text().unwrap();
        assert!(log.ends_with("pulled message"));

        source.set_stream_properties(&write);
        let read = source.stream_properties(&[StreamProperty::Log]);
        assert_eq!(
            read[&StreamProperty::Log].as_text(),
            Some(NO_LOG_MESSAGES_AVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_stream_properties_report_format_and_duration() {
        let endpoint = Arc::new(LoopbackSource::new());
        let delegate = CountingDelegate::new();
        let source = source_with(&endpoint, &delegate);

        let read = source.stream_properties(&[
            StreamProperty::ActiveFormatIndex,
            StreamProperty::FrameDuration,
            StreamProperty::SinkBufferQueueSize,
        ]);
        assert_eq!(read[&StreamProperty::ActiveFormatIndex], PropertyValue::Index(0));
        assert_eq!(
            read[&StreamProperty::FrameDuration],
            PropertyValue::Duration(Configuration::default().frame_interval())
        );
        assert!(!read.contains_key(&StreamProperty::SinkBufferQueueSize));
        assert_eq!(source.formats().len(), 1);
    }

    #[tokio::test]
    async fn test_send_skips_when_endpoint_is_gone() {
        let endpoint = Arc::new(LoopbackSource::new());
        let delegate = CountingDelegate::new();
        let source = source_with(&endpoint, &delegate);
        let frame = solid_frame(source.descriptor().format, 0, 0).unwrap();

        assert!(source.send(&frame, Discontinuity::NONE, 1));
        assert_eq!(endpoint.sent_count(), 1);

        drop(endpoint);
        assert!(!source.send(&frame, Discontinuity::NONE, 2));
    }
}
