//! Shared fixtures for the device integration tests.
#![allow(dead_code)]

use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::sync::Arc;
use virtual_camera::config::{Configuration, LogCollectionMode, Resolution};
use virtual_camera::landing_page::LandingPage;
use virtual_camera::media::loopback::{solid_frame, LoopbackSink, LoopbackSource};
use virtual_camera::media::{ClientId, SampleBuffer, SinkEndpoint, SourceEndpoint};
use virtual_camera::stream::properties::NO_LOG_MESSAGES_AVAILABLE;
use virtual_camera::stream_logger::{ConsoleLevel, ConsoleSink, StreamLogger};
use virtual_camera::Device;

/// Small frames keep the tests fast.
pub const RESOLUTION: Resolution = Resolution {
    width: 8,
    height: 4,
};

/// Process id used for the producer in all tests.
pub const PRODUCER_PID: u32 = 4242;

/// Default configuration shrunk to [`RESOLUTION`], logs collected by pulling.
pub fn test_configuration() -> Configuration {
    Configuration {
        resolution: RESOLUTION,
        log_collection_mode: LogCollectionMode::Pull,
        ..Configuration::default()
    }
}

/// A uniformly colored landing page.
pub fn landing_page() -> LandingPage {
    let image = RgbaImage::from_pixel(2, 2, Rgba([200, 40, 10, 255]));
    LandingPage::from_image(&DynamicImage::ImageRgba8(image), RESOLUTION)
        .expect("landing page converts")
}

/// Console recording every duplicated log entry.
#[derive(Default)]
pub struct RecordingConsole {
    messages: Mutex<Vec<(ConsoleLevel, String)>>,
}

impl RecordingConsole {
    pub fn messages(&self) -> Vec<(ConsoleLevel, String)> {
        self.messages.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(level, _)| *level == ConsoleLevel::Warning)
            .map(|(_, message)| message)
            .collect()
    }
}

impl ConsoleSink for RecordingConsole {
    fn emit(&self, level: ConsoleLevel, message: &str) {
        self.messages.lock().push((level, message.to_string()));
    }
}

/// A device wired to loopback endpoints.
pub struct Harness {
    pub device: Arc<Device>,
    pub source: Arc<LoopbackSource>,
    pub sink: Arc<LoopbackSink>,
    pub console: Arc<RecordingConsole>,
    producer: ClientId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_configuration(test_configuration())
    }

    pub fn with_configuration(configuration: Configuration) -> Self {
        let source = Arc::new(LoopbackSource::new());
        let sink = Arc::new(LoopbackSink::new());
        let console = Arc::new(RecordingConsole::default());

        let source_endpoint: Arc<dyn SourceEndpoint> = source.clone();
        let sink_endpoint: Arc<dyn SinkEndpoint> = sink.clone();
        let console_sink: Arc<dyn ConsoleSink> = console.clone();
        let device = Device::with_landing_page(
            configuration,
            landing_page(),
            Arc::downgrade(&source_endpoint),
            Arc::downgrade(&sink_endpoint),
            Some(console_sink),
        )
        .expect("device is created");

        Self {
            device,
            source,
            sink,
            console,
            producer: ClientId::new(PRODUCER_PID),
        }
    }

    /// The producer identity, the same for every call.
    pub fn producer(&self) -> ClientId {
        self.producer
    }

    /// A producer frame in the configured format whose bytes are all `fill`.
    pub fn frame(&self, fill: u8) -> SampleBuffer {
        solid_frame(self.device.configuration().video_format(), fill, 0).expect("frame fits")
    }

    pub fn connect_consumer(&self) {
        self.device.source().start_stream().expect("device alive");
    }

    pub fn disconnect_consumer(&self) {
        self.device.source().stop_stream().expect("device alive");
    }

    pub fn connect_producer(&self) {
        self.device
            .sink()
            .start_stream(self.producer())
            .expect("device alive");
    }

    pub fn disconnect_producer(&self) {
        self.device.sink().stop_stream().expect("device alive");
    }

    /// Pops every queued log entry of a pull-mode device.
    pub fn drain_log(&self) -> Vec<String> {
        drain_log(self.device.logger())
    }
}

/// Pops every queued entry of a pull-mode logger.
pub fn drain_log(logger: &StreamLogger) -> Vec<String> {
    let mut entries = Vec::new();
    loop {
        let entry = logger.pop_log_entry();
        if entry == NO_LOG_MESSAGES_AVAILABLE {
            return entries;
        }
        entries.push(entry);
    }
}

/// Whether any entry ends with `message`, ignoring the prefix and timestamp.
pub fn logged(entries: &[String], message: &str) -> bool {
    entries.iter().any(|entry| entry.ends_with(message))
}
