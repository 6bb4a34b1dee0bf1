//! Integration tests for the device lifecycle
//!
//! These tests drive a device through consumer and producer attach/detach
//! sequences using loopback endpoints and check that exactly the right timer runs
//! in every state and that frames of the right kind reach consumers.

mod common;

use common::{logged, test_configuration, Harness, RESOLUTION};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use virtual_camera::config::{PacingStrategy, MAX_FRAME_RATE};
use virtual_camera::device::{DeviceMode, TimerKind};
use virtual_camera::media::loopback::{LoopbackSink, LoopbackSource};
use virtual_camera::media::{
    DeviceProperty, PixelCodec, SinkEndpoint, SourceEndpoint, TransportType,
};
use virtual_camera::{CameraError, Device};

#[tokio::test(start_paused = true)]
async fn test_consumer_without_producer_sees_landing_page() {
    let harness = Harness::new();
    assert_eq!(harness.device.mode(), DeviceMode::Idle);
    assert_eq!(harness.device.active_timer_kind(), None);

    harness.connect_consumer();
    assert_eq!(harness.device.mode(), DeviceMode::LandingPage);
    assert_eq!(harness.device.active_timer_kind(), Some(TimerKind::LandingPage));

    // 5 fps idle rate, first frame right away
    sleep(Duration::from_millis(950)).await;
    let expected = common::landing_page().frame(0).expect("frame");
    let frames = harness.source.sent_frames();
    assert_eq!(frames.len(), 5);
    for frame in &frames {
        assert_eq!(frame.buffer.format().codec, PixelCodec::Bgra);
        assert_eq!(frame.buffer.format().width, RESOLUTION.width);
        assert_eq!(frame.buffer.data(), expected.data());
    }
}

#[tokio::test(start_paused = true)]
async fn test_consumer_count_floors_at_zero() {
    let harness = Harness::new();

    harness.disconnect_consumer();
    assert_eq!(harness.device.state().streaming_counter(), 0);
    assert_eq!(harness.device.active_timer_kind(), None);

    harness.connect_consumer();
    harness.connect_consumer();
    harness.disconnect_consumer();
    assert_eq!(harness.device.state().streaming_counter(), 1);
    assert_eq!(harness.device.active_timer_kind(), Some(TimerKind::LandingPage));

    harness.disconnect_consumer();
    harness.disconnect_consumer();
    assert_eq!(harness.device.state().streaming_counter(), 0);
    assert_eq!(harness.device.active_timer_kind(), None);

    harness.connect_consumer();
    assert_eq!(harness.device.state().streaming_counter(), 1);
    assert_eq!(harness.device.active_timer_kind(), Some(TimerKind::LandingPage));
}

#[tokio::test(start_paused = true)]
async fn test_producer_replaces_landing_page_and_back() {
    let harness = Harness::new();
    harness.connect_consumer();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.source.sent_count_with_codec(PixelCodec::Bgra), 1);

    harness.connect_producer();
    assert_eq!(harness.device.mode(), DeviceMode::Streaming);
    assert_eq!(harness.device.active_timer_kind(), Some(TimerKind::PullPush));
    assert_eq!(harness.device.sink().client(), Some(harness.producer()));

    harness.source.clear_sent();
    for fill in 1..=3 {
        harness.sink.push_frame(harness.frame(fill));
        sleep(Duration::from_millis(34)).await;
    }
    let frames = harness.source.sent_frames();
    assert_eq!(frames.len(), 3);
    assert!(frames
        .iter()
        .all(|frame| frame.buffer.format().codec == PixelCodec::Nv12));
    assert_eq!(frames[2].buffer.data()[0], 3);

    harness.disconnect_producer();
    assert_eq!(harness.device.mode(), DeviceMode::LandingPage);
    assert_eq!(harness.device.active_timer_kind(), Some(TimerKind::LandingPage));
    assert_eq!(harness.device.sink().client(), None);

    harness.source.clear_sent();
    sleep(Duration::from_millis(450)).await;
    assert_eq!(harness.source.sent_count(), 3);
    assert_eq!(harness.source.sent_count_with_codec(PixelCodec::Bgra), 3);
}

#[tokio::test(start_paused = true)]
async fn test_producer_without_consumers_runs_no_timer() {
    let harness = Harness::new();

    harness.connect_producer();
    assert_eq!(harness.device.mode(), DeviceMode::Idle);
    assert_eq!(harness.device.active_timer_kind(), None);

    harness.sink.push_frame(harness.frame(7));
    sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.sink.consume_calls(), 0);
    assert_eq!(harness.source.sent_count(), 0);

    // The first consumer goes straight to producer frames.
    harness.connect_consumer();
    assert_eq!(harness.device.active_timer_kind(), Some(TimerKind::PullPush));
    sleep(Duration::from_millis(10)).await;
    let frames = harness.source.sent_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].buffer.data()[0], 7);

    harness.disconnect_producer();
    harness.disconnect_consumer();
    assert_eq!(harness.device.active_timer_kind(), None);
}

#[tokio::test(start_paused = true)]
async fn test_landing_page_never_overlaps_producer_frames() {
    let harness = Harness::new();
    harness.connect_consumer();
    harness.connect_consumer();
    harness.connect_producer();
    harness.source.clear_sent();

    // A silent producer yields no frames at all, and no landing page either.
    sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.source.sent_count(), 0);

    // Consumers leaving and rejoining must not restart the landing page.
    harness.disconnect_consumer();
    harness.connect_consumer();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.source.sent_count_with_codec(PixelCodec::Bgra), 0);
    assert_eq!(harness.device.active_timer_kind(), Some(TimerKind::PullPush));
}

#[tokio::test(start_paused = true)]
async fn test_last_consumer_leaving_stops_frames() {
    let harness = Harness::new();
    harness.connect_consumer();
    harness.connect_producer();
    harness.disconnect_consumer();
    assert_eq!(harness.device.mode(), DeviceMode::Idle);
    assert_eq!(harness.device.active_timer_kind(), None);

    let calls = harness.sink.consume_calls();
    harness.sink.push_frame(harness.frame(1));
    sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.sink.consume_calls(), calls);
    assert_eq!(harness.sink.pending(), 1);

    // The producer stays attached while nobody watches.
    assert_eq!(harness.device.state().producer(), Some(harness.producer()));
}

#[tokio::test(start_paused = true)]
async fn test_smoothing_pacing_runs_frame_processor() {
    let mut configuration = test_configuration();
    configuration.pacing = PacingStrategy::Smoothing;
    let harness = Harness::with_configuration(configuration);

    harness.connect_consumer();
    harness.connect_producer();
    assert_eq!(harness.device.active_timer_kind(), Some(TimerKind::Smoothing));

    for fill in 1..=5 {
        harness.sink.push_frame(harness.frame(fill));
    }
    sleep(Duration::from_millis(200)).await;
    let frames = harness.source.sent_frames();
    assert!(!frames.is_empty());
    assert_eq!(frames[0].buffer.data()[0], 1);

    harness.disconnect_producer();
    assert_eq!(harness.device.active_timer_kind(), Some(TimerKind::LandingPage));

    sleep(Duration::from_millis(100)).await;
    let entries = harness.drain_log();
    assert!(logged(&entries, "Finished consuming and sending frames."));
}

#[tokio::test(start_paused = true)]
async fn test_state_updates_are_logged() {
    let harness = Harness::new();
    harness.connect_consumer();
    harness.connect_producer();
    harness.disconnect_producer();
    harness.disconnect_consumer();

    let entries = harness.drain_log();
    assert!(logged(&entries, "Device source successfully initialized."));
    assert!(logged(
        &entries,
        "Updated state: connected consumers: 1, producer: 0, stream: active"
    ));
    assert!(logged(
        &entries,
        "Updated state: connected consumers: 1, producer: 1, stream: active"
    ));
    assert!(logged(
        &entries,
        "Updated state: connected consumers: 0, producer: 0, stream: inactive"
    ));
    assert!(entries.iter().all(|entry| entry.starts_with("[vcam] ")));
}

#[tokio::test(start_paused = true)]
async fn test_streaming_clients_are_published() {
    let harness = Harness::new();
    let clients = [
        virtual_camera::media::ClientId::new(100),
        virtual_camera::media::ClientId::new(200),
    ];

    harness.device.source().set_streaming_clients(clients);
    harness.device.source().set_streaming_clients(clients);
    harness.device.source().set_streaming_clients(clients[..1].iter().copied());

    let published = harness
        .source
        .published_texts(virtual_camera::media::StreamProperty::StreamingClients);
    assert_eq!(published.len(), 2);
    let mut pids: Vec<&str> = published[0].split(',').collect();
    pids.sort_unstable();
    assert_eq!(pids, vec!["100", "200"]);
    assert_eq!(published[1], "100");
    assert!(logged(&harness.drain_log(), "Connected consumers: 1"));
}

#[tokio::test]
async fn test_device_properties() {
    let harness = Harness::new();
    let device = &harness.device;

    let available = device.available_properties();
    assert!(available.contains(&DeviceProperty::TransportType));
    assert!(available.contains(&DeviceProperty::Model));

    let properties = device.device_properties(&[DeviceProperty::TransportType]);
    assert_eq!(properties.transport_type, Some(TransportType::Virtual));
    assert_eq!(properties.model, None);

    let properties = device.device_properties(&available);
    assert_eq!(properties.model.as_deref(), Some("Virtual Camera Model 1"));

    // Writes are accepted and change nothing.
    device.set_device_properties(&properties);
    assert_eq!(device.device_properties(&available), properties);
}

#[tokio::test]
async fn test_construction_rejects_invalid_configuration() {
    let source: Arc<dyn SourceEndpoint> = Arc::new(LoopbackSource::new());
    let sink: Arc<dyn SinkEndpoint> = Arc::new(LoopbackSink::new());

    // A rate too high for the timer resolution would stall every frame timer.
    for frame_rate in [0, MAX_FRAME_RATE + 1, 3_000_000_000] {
        let mut configuration = test_configuration();
        configuration.frame_rate = frame_rate;
        configuration.idle_frame_rate = frame_rate;

        let result = Device::with_landing_page(
            configuration,
            common::landing_page(),
            Arc::downgrade(&source),
            Arc::downgrade(&sink),
            None,
        );

        let err = result.expect_err("invalid configuration");
        assert!(matches!(err, CameraError::Configuration(_)), "{frame_rate}: {err}");
        assert!(err.is_construction_fatal());
    }
}

#[tokio::test]
async fn test_construction_requires_landing_page_asset() {
    let mut configuration = test_configuration();
    configuration.landing_page = "does/not/exist.png".into();

    let source: Arc<dyn SourceEndpoint> = Arc::new(LoopbackSource::new());
    let sink: Arc<dyn SinkEndpoint> = Arc::new(LoopbackSink::new());
    let err = Device::new(configuration, Arc::downgrade(&source), Arc::downgrade(&sink))
        .expect_err("missing asset");
    assert!(matches!(err, CameraError::LandingPageAssetNotFound(_)));
}

#[test]
fn test_construction_requires_runtime() {
    let source: Arc<dyn SourceEndpoint> = Arc::new(LoopbackSource::new());
    let sink: Arc<dyn SinkEndpoint> = Arc::new(LoopbackSink::new());
    let err = Device::with_landing_page(
        test_configuration(),
        common::landing_page(),
        Arc::downgrade(&source),
        Arc::downgrade(&sink),
        None,
    )
    .expect_err("no runtime");
    assert!(matches!(err, CameraError::RuntimeUnavailable));
}

#[tokio::test(start_paused = true)]
async fn test_vanished_source_endpoint_skips_frames() {
    let harness = Harness::new();
    let common::Harness { device, source, .. } = harness;

    device.source().start_stream().expect("device alive");
    drop(source);

    sleep(Duration::from_millis(500)).await;
    assert!(device.source().endpoint().is_none());
    assert_eq!(device.active_timer_kind(), Some(TimerKind::LandingPage));
}
