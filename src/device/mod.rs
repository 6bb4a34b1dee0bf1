//! The virtual camera device.
//!
//! A [`Device`] owns one [`StreamSource`], one [`StreamSink`], the
//! [`StreamLogger`] and the pre-converted [`LandingPage`]. Lifecycle callbacks of
//! both streams are funnelled into [`DeviceState::apply`] under one lock, which
//! is the only place the consumer count, the producer and the timer slot change.
//!
//! At most one timer runs at any time:
//!
//! | consumers | producer | timer |
//! |-----------|----------|-------|
//! | 0         | any      | none |
//! | > 0       | none     | landing page at `idle_frame_rate` |
//! | > 0       | attached | pull/push at `frame_rate` (or a smoothing [`FrameProcessor`]) |
//!
//! The previous timer is always cancelled before its successor starts.

pub mod pump;
pub mod state;
pub mod timer;

pub use pump::{LandingPageTick, PullPushPump, PumpOutcome, PULL_RETRY_COUNT_MAX};
pub use state::{DeviceMode, DeviceState, StateChange, TimerCommand, TimerRequest};
pub use timer::{FrameTimer, TimerKind, TimerTick};

use crate::config::{Configuration, LogCollectionMode, PacingStrategy};
use crate::error::{CameraError, CameraResult};
use crate::frame_processor::FrameProcessor;
use crate::landing_page::LandingPage;
use crate::media::{
    ClientId, DeviceProperties, DeviceProperty, SinkEndpoint, SourceEndpoint, TransportType,
};
use crate::stream::{
    StreamDescriptor, StreamSink, StreamSinkDelegate, StreamSource, StreamSourceDelegate,
};
use crate::stream_logger::{ConsoleSink, LoggerMode, StreamLogger, TracingConsole};
use crate::throttle::MultipleValues;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

enum ActiveTimer {
    Frame(FrameTimer),
    Smoothing(FrameProcessor),
}

impl ActiveTimer {
    fn kind(&self) -> TimerKind {
        match self {
            Self::Frame(timer) => timer.kind(),
            Self::Smoothing(_) => TimerKind::Smoothing,
        }
    }

    fn cancel(self, runtime: &Handle) {
        match self {
            Self::Frame(timer) => drop(timer),
            Self::Smoothing(processor) => {
                // Cancellation is immediate, only the bounded wait runs in the background.
                let stopping = processor.stop();
                runtime.spawn(stopping);
            }
        }
    }
}

struct DeviceSlot {
    state: DeviceState,
    timer: Option<ActiveTimer>,
}

/// A virtual camera device.
pub struct Device {
    configuration: Configuration,
    runtime: Handle,
    logger: Arc<StreamLogger>,
    landing_page: Arc<LandingPage>,
    source: Arc<StreamSource>,
    sink: Arc<StreamSink>,
    slot: Mutex<DeviceSlot>,
}

impl Device {
    /// Creates a device that loads its landing page from the configured asset and
    /// duplicates log entries to the `tracing` console.
    ///
    /// Must be called within a Tokio runtime; timers run on that runtime.
    ///
    /// # Errors
    /// Fails with a construction-fatal [`CameraError`] if the configuration is
    /// invalid, the landing page can't be loaded or no runtime is available.
    pub fn new(
        configuration: Configuration,
        source_endpoint: Weak<dyn SourceEndpoint>,
        sink_endpoint: Weak<dyn SinkEndpoint>,
    ) -> CameraResult<Arc<Self>> {
        configuration.validate()?;
        let landing_page = LandingPage::load(&configuration.landing_page, configuration.resolution)?;
        Self::with_landing_page(
            configuration,
            landing_page,
            source_endpoint,
            sink_endpoint,
            Some(Arc::new(TracingConsole)),
        )
    }

    /// Creates a device around an already converted landing page.
    ///
    /// Log entries are duplicated to `console` if given.
    pub fn with_landing_page(
        configuration: Configuration,
        landing_page: LandingPage,
        source_endpoint: Weak<dyn SourceEndpoint>,
        sink_endpoint: Weak<dyn SinkEndpoint>,
        console: Option<Arc<dyn ConsoleSink>>,
    ) -> CameraResult<Arc<Self>> {
        configuration.validate()?;
        let runtime = Handle::try_current().map_err(|_| CameraError::RuntimeUnavailable)?;

        let throttle = MultipleValues::<String>::new(
            configuration.console_throttle.interval(),
            configuration.console_throttle.activation_count,
            1.0,
        );
        let logger = Arc::new(StreamLogger::new(
            configuration.log_message_prefix.clone(),
            Some(Box::new(throttle)),
            console,
        ));
        logger.push_log_entry("Landing page initialized.");

        let device = Arc::new_cyclic(|device: &Weak<Device>| {
            let source_delegate: Weak<dyn StreamSourceDelegate> = device.clone();
            let sink_delegate: Weak<dyn StreamSinkDelegate> = device.clone();

            let source = StreamSource::new(
                StreamDescriptor::source(&configuration),
                source_endpoint.clone(),
                source_delegate,
            );
            let sink = StreamSink::new(
                StreamDescriptor::sink(&configuration),
                configuration.sink_buffer_queue_size,
                configuration.sink_buffers_required_for_startup,
                sink_endpoint,
                sink_delegate,
            );
            logger.push_log_entry(format!("Device {} created.", configuration.name));
            logger.push_log_entry("Stream source and stream sink initialized and added to device.");

            Device {
                configuration,
                runtime,
                logger: Arc::clone(&logger),
                landing_page: Arc::new(landing_page),
                source: Arc::new(source),
                sink: Arc::new(sink),
                slot: Mutex::new(DeviceSlot {
                    state: DeviceState::default(),
                    timer: None,
                }),
            }
        });

        let mode = match device.configuration.log_collection_mode {
            LogCollectionMode::Push => LoggerMode::Push(source_endpoint),
            LogCollectionMode::Pull => LoggerMode::Pull,
        };
        device.logger.start(mode, &device.runtime)?;
        device.logger.push_log_entry("Log delivery started.");
        device.logger.push_log_entry("Device source successfully initialized.");

        info!(
            camera = %device.configuration.name,
            format = %device.configuration.video_format(),
            frame_rate = device.configuration.frame_rate,
            pacing = ?device.configuration.pacing,
            "Virtual camera device created"
        );
        Ok(device)
    }

    /// The configuration the device was created with.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// The consumer-facing stream.
    pub fn source(&self) -> &Arc<StreamSource> {
        &self.source
    }

    /// The producer-facing stream.
    pub fn sink(&self) -> &Arc<StreamSink> {
        &self.sink
    }

    /// The diagnostic logger.
    pub fn logger(&self) -> &Arc<StreamLogger> {
        &self.logger
    }

    /// The current mode.
    pub fn mode(&self) -> DeviceMode {
        self.slot.lock().state.mode()
    }

    /// A snapshot of the consumer count and producer.
    pub fn state(&self) -> DeviceState {
        self.slot.lock().state.clone()
    }

    /// The kind of the running timer, if any.
    pub fn active_timer_kind(&self) -> Option<TimerKind> {
        self.slot.lock().timer.as_ref().map(ActiveTimer::kind)
    }

    /// Device properties the device answers.
    pub fn available_properties(&self) -> Vec<DeviceProperty> {
        vec![DeviceProperty::TransportType, DeviceProperty::Model]
    }

    /// Reads the requested device properties.
    pub fn device_properties(&self, properties: &[DeviceProperty]) -> DeviceProperties {
        let mut values = DeviceProperties::default();
        if properties.contains(&DeviceProperty::TransportType) {
            values.transport_type = Some(TransportType::Virtual);
        }
        if properties.contains(&DeviceProperty::Model) {
            values.model = Some(self.configuration.model.clone());
        }
        values
    }

    /// Device property writes are accepted and ignored.
    pub fn set_device_properties(&self, _properties: &DeviceProperties) {}

    /// Applies a state change and updates the timer slot accordingly.
    pub fn update(&self, change: StateChange) {
        let mut slot = self.slot.lock();

        if let StateChange::ProducerConnecting(client) = change {
            let previous = slot.state.producer();
            debug_assert!(
                previous.is_none() || previous == Some(client),
                "producer attached while another one is streaming"
            );
            if let Some(previous) = previous.filter(|previous| *previous != client) {
                warn!(%previous, %client, "Producer attached twice, replacing the previous one");
            }
        }

        match slot.state.apply(change) {
            TimerCommand::Keep => {}
            TimerCommand::Stop => {
                if let Some(timer) = slot.timer.take() {
                    timer.cancel(&self.runtime);
                }
            }
            TimerCommand::Replace(request) => {
                if let Some(timer) = slot.timer.take() {
                    timer.cancel(&self.runtime);
                }
                let producer = slot.state.producer();
                slot.timer = Some(self.make_timer(request, producer));
            }
        }

        let stream = if slot.timer.is_some() { "active" } else { "inactive" };
        debug!(?change, mode = ?slot.state.mode(), timer = ?slot.timer.as_ref().map(ActiveTimer::kind), "Device state updated");
        self.logger
            .push_log_entry(format!("Updated state: {}, stream: {stream}", slot.state));
    }

    fn make_timer(&self, request: TimerRequest, producer: Option<ClientId>) -> ActiveTimer {
        match (request, producer) {
            (TimerRequest::PullPush, Some(client)) => self.make_pull_push_timer(client),
            (TimerRequest::PullPush, None) => {
                warn!("Pull/push timer requested without a producer, showing the landing page");
                self.make_landing_page_timer()
            }
            (TimerRequest::LandingPage, _) => self.make_landing_page_timer(),
        }
    }

    fn make_landing_page_timer(&self) -> ActiveTimer {
        let tick = LandingPageTick::new(
            Arc::clone(&self.landing_page),
            Arc::clone(&self.source),
            Arc::clone(&self.logger),
        );
        ActiveTimer::Frame(FrameTimer::spawn(
            &self.runtime,
            TimerKind::LandingPage,
            self.configuration.idle_frame_interval(),
            tick,
        ))
    }

    fn make_pull_push_timer(&self, client: ClientId) -> ActiveTimer {
        if self.configuration.pacing == PacingStrategy::Smoothing {
            match FrameProcessor::start(
                &self.runtime,
                Arc::clone(&self.source),
                Arc::clone(&self.sink),
                client,
                self.configuration.frame_rate,
                Arc::clone(&self.logger),
            ) {
                Ok(processor) => return ActiveTimer::Smoothing(processor),
                Err(err) => {
                    warn!(error = %err, "Frame processor unavailable, pacing frames directly");
                    self.logger
                        .push_log_entry(format!("Failed starting frame processor: {err}"));
                }
            }
        }

        // A new pump starts without having waited for the producer's first frame.
        let pump = PullPushPump::new(
            client,
            Arc::clone(&self.sink),
            Arc::clone(&self.source),
            Arc::clone(&self.logger),
            self.configuration.frame_interval(),
        );
        ActiveTimer::Frame(FrameTimer::spawn(
            &self.runtime,
            TimerKind::PullPush,
            self.configuration.frame_interval(),
            pump,
        ))
    }
}

impl StreamSourceDelegate for Device {
    fn start_streaming_source(&self) {
        self.update(StateChange::ConsumerConnecting);
    }

    fn stop_streaming_source(&self) {
        self.update(StateChange::ConsumerDisconnecting);
    }

    fn stream_logger(&self) -> &StreamLogger {
        &self.logger
    }
}

impl StreamSinkDelegate for Device {
    fn start_streaming_sink(&self, client: ClientId) {
        self.update(StateChange::ProducerConnecting(client));
    }

    fn stop_streaming_sink(&self) {
        self.update(StateChange::ProducerDisconnecting);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(timer) = self.slot.get_mut().timer.take() {
            timer.cancel(&self.runtime);
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("Device")
            .field("name", &self.configuration.name)
            .field("state", &slot.state)
            .field("timer", &slot.timer.as_ref().map(ActiveTimer::kind))
            .finish()
    }
}
