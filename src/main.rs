//! CLI Entry Point for virtual_camera
//!
//! Provides command-line interface for:
//! - Validating a camera configuration
//! - Simulating a streaming session against in-memory streams
//!
//! # Usage
//!
//! Check a configuration:
//! ```bash
//! virtual_camera check --config config/camera.toml
//! ```
//!
//! Simulate two consumers and a jittery producer for ten seconds:
//! ```bash
//! virtual_camera run --consumers 2 --duration 10 --jitter-ms 8
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use virtual_camera::config::{Configuration, LogCollectionMode, DEFAULT_CONFIG_PATH};
use virtual_camera::landing_page::LandingPage;
use virtual_camera::media::loopback::{solid_frame, LoopbackSink, LoopbackSource};
use virtual_camera::media::{
    ClientId, FormatDescription, PropertyValue, SinkEndpoint, SourceEndpoint, StreamProperties,
    StreamProperty,
};
use virtual_camera::stream::properties::NO_LOG_MESSAGES_AVAILABLE;
use virtual_camera::stream_logger::{split_log_batch, PUSH_INTERVAL};
use virtual_camera::{logging, Device};

#[derive(Parser)]
#[command(name = "virtual_camera")]
#[command(about = "Virtual camera device core with a simulated OS media layer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the effective configuration
    Check {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Run a simulated session with in-memory producer and consumers
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Session length in seconds
        #[arg(long, default_value = "5")]
        duration: u64,

        /// Number of consumers attaching to the camera
        #[arg(long, default_value = "2")]
        consumers: u32,

        /// Time the landing page is shown before the producer attaches, in milliseconds
        #[arg(long, default_value = "1000")]
        producer_delay_ms: u64,

        /// Maximum deviation of the producer from its frame interval, in milliseconds
        #[arg(long, default_value = "10")]
        jitter_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => check_configuration(config),
        Commands::Run {
            config,
            duration,
            consumers,
            producer_delay_ms,
            jitter_ms,
        } => {
            run_simulation(
                config,
                Duration::from_secs(duration),
                consumers,
                Duration::from_millis(producer_delay_ms),
                jitter_ms,
            )
            .await
        }
    }
}

fn check_configuration(path: PathBuf) -> Result<()> {
    let config = Configuration::load_from(&path)
        .with_context(|| format!("Loading configuration from {}", path.display()))?;
    config.validate()?;

    LandingPage::load(&config.landing_page, config.resolution)
        .with_context(|| format!("Loading landing page {}", config.landing_page.display()))?;

    println!("✅ Configuration is valid: {}", path.display());
    println!();
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn run_simulation(
    path: PathBuf,
    duration: Duration,
    consumer_count: u32,
    producer_delay: Duration,
    jitter_ms: u64,
) -> Result<()> {
    let config = Configuration::load_from(&path)
        .with_context(|| format!("Loading configuration from {}", path.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    println!("🎥 {} ({})", config.name, config.video_format());
    println!(
        "   {} fps, landing page at {} fps, {:?} pacing, {:?} log collection",
        config.frame_rate, config.idle_frame_rate, config.pacing, config.log_collection_mode
    );
    println!();

    let source = Arc::new(LoopbackSource::new());
    let sink = Arc::new(LoopbackSink::new());
    let source_endpoint: Arc<dyn SourceEndpoint> = source.clone();
    let sink_endpoint: Arc<dyn SinkEndpoint> = sink.clone();

    let device = Device::new(
        config.clone(),
        Arc::downgrade(&source_endpoint),
        Arc::downgrade(&sink_endpoint),
    )?;

    println!("👥 Attaching {consumer_count} consumer(s)...");
    let consumers: Vec<ClientId> = (0..consumer_count).map(|index| ClientId::new(5000 + index)).collect();
    for attached in 1..=consumers.len() {
        device.source().set_streaming_clients(consumers[..attached].iter().copied());
        device.source().start_stream()?;
    }

    sleep(producer_delay).await;
    let landing_page_frames = source.sent_count();

    println!("📡 Attaching producer...");
    let producer = ClientId::new(std::process::id());
    device.sink().start_stream(producer)?;

    let produced = Arc::new(AtomicU64::new(0));
    let producer_task = tokio::spawn(produce_frames(
        Arc::clone(&sink),
        config.video_format(),
        config.frame_interval(),
        jitter_ms,
        Arc::clone(&produced),
    ));

    sleep(duration).await;

    println!("🛑 Detaching producer and consumers...");
    producer_task.abort();
    device.sink().stop_stream()?;
    for remaining in (0..consumers.len()).rev() {
        device.source().stop_stream()?;
        device.source().set_streaming_clients(consumers[..remaining].iter().copied());
    }

    // Give the log push task a chance to deliver the teardown entries.
    sleep(PUSH_INTERVAL * 2).await;

    let sent = source.sent_count();
    println!();
    println!("📊 Session statistics");
    println!("   Frames produced:        {}", produced.load(Ordering::SeqCst));
    println!("   Producer pulls:         {}", sink.consume_calls());
    println!("   Frames left in sink:    {}", sink.pending());
    println!("   Frames sent:            {sent}");
    println!("   Landing page frames:    {landing_page_frames}");
    println!("   Scheduled outputs:      {}", sink.scheduled_outputs().len());

    let log_messages = match config.log_collection_mode {
        LogCollectionMode::Push => source
            .published_texts(StreamProperty::Log)
            .iter()
            .flat_map(|batch| split_log_batch(batch).into_iter().map(str::to_string).collect::<Vec<_>>())
            .collect(),
        LogCollectionMode::Pull => pull_log_messages(&device),
    };
    println!("   Log messages delivered: {}", log_messages.len());
    println!();
    for message in log_messages.iter().rev().take(5).rev() {
        println!("   {message}");
    }

    Ok(())
}

/// Pushes frames into the sink at the frame interval, give or take `jitter_ms`.
async fn produce_frames(
    sink: Arc<LoopbackSink>,
    format: FormatDescription,
    frame_interval: Duration,
    jitter_ms: u64,
    produced: Arc<AtomicU64>,
) {
    let jitter_ms = i64::try_from(jitter_ms).unwrap_or(i64::MAX);
    let mut index = 0u64;
    loop {
        // Shade cycles so consecutive frames differ.
        let shade = (index % 256) as u8;
        match solid_frame(format, shade, virtual_camera::clock::host_time_nanos()) {
            Ok(frame) => {
                sink.push_frame(frame);
                produced.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                tracing::error!(error = %err, "Producer failed creating a frame");
                return;
            }
        }
        index += 1;

        let offset_ms = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
        let delay = if offset_ms >= 0 {
            frame_interval + Duration::from_millis(offset_ms.unsigned_abs())
        } else {
            frame_interval.saturating_sub(Duration::from_millis(offset_ms.unsigned_abs()))
        };
        sleep(delay).await;
    }
}

/// Reads the log property until the logger runs dry.
fn pull_log_messages(device: &Device) -> Vec<String> {
    let mut write = StreamProperties::new();
    write.insert(StreamProperty::Log, PropertyValue::Text(String::new()));

    let mut messages = Vec::new();
    loop {
        device.source().set_stream_properties(&write);
        let read = device.source().stream_properties(&[StreamProperty::Log]);
        match read.get(&StreamProperty::Log).and_then(PropertyValue::as_text) {
            Some(NO_LOG_MESSAGES_AVAILABLE) | None => break,
            Some(message) => messages.push(message.to_string()),
        }
    }
    messages
}
