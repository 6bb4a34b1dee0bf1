//! Camera configuration using Figment
//!
//! The [`Configuration`] value is constructed once, handed to [`crate::device::Device`]
//! and never mutated afterwards. It is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `VIRTUAL_CAMERA_` (`__` separates nested keys)
//!
//! # Example
//! ```no_run
//! use virtual_camera::config::Configuration;
//!
//! let config = Configuration::load_from("config/camera.toml")?;
//! config.validate()?;
//! println!("Camera: {} @ {} fps", config.name, config.frame_rate);
//! # Ok::<(), virtual_camera::error::CameraError>(())
//! ```

use crate::error::{CameraError, CameraResult};
use crate::frame_processor::SUPPORTED_FRAME_RATES;
use crate::media::{FormatDescription, PixelCodec};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/camera.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "VIRTUAL_CAMERA_";

/// Highest accepted `frame_rate` and `idle_frame_rate`.
pub const MAX_FRAME_RATE: u32 = 240;

/// How diagnostic log messages leave the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCollectionMode {
    /// Logs are bulk pushed every 200 ms as a change of the log stream property,
    /// joined by [`crate::stream::properties::LOG_MESSAGES_SEPARATOR`].
    Push,
    /// A consumer writes the log property and then reads it to get the next message.
    Pull,
}

/// How frames travel from the producer to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingStrategy {
    /// One timer pulls the newest producer frame and pushes it straight away.
    Direct,
    /// A [`crate::frame_processor::FrameProcessor`] buffers one frame to even out jitter.
    Smoothing,
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Settings for the throttle that guards console duplication of log entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsoleThrottleConfig {
    /// Throttle window per unique message, in milliseconds
    #[serde(default = "default_throttle_interval_ms")]
    pub interval_ms: u64,
    /// Number of occurrences of a message let through before throttling starts
    #[serde(default = "default_activation_count")]
    pub activation_count: u32,
}

impl ConsoleThrottleConfig {
    /// Throttle window as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ConsoleThrottleConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_throttle_interval_ms(),
            activation_count: default_activation_count(),
        }
    }
}

/// The configuration specifying the details of the virtual camera.
///
/// In this context,
/// * _sink_ refers to the input side of the virtual camera, where the producer pushes frames to,
/// * _source_ refers to the output side of the virtual camera, where frames are pushed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Name of the camera as presented in consuming apps
    pub name: String,
    /// Manufacturer of the camera as presented in consuming apps
    pub manufacturer: String,
    /// Model of the camera as presented in consuming apps
    pub model: String,
    /// Identifier by which the OS discovers the device
    pub device_id: Uuid,
    /// Identifier of the consumer-facing stream
    pub source_stream_id: Uuid,
    /// Identifier of the producer-facing stream
    pub sink_stream_id: Uuid,
    /// Human-readable name of the consumer-facing stream
    pub source_stream_name: String,
    /// Human-readable name of the producer-facing stream
    pub sink_stream_name: String,
    /// Camera resolution
    pub resolution: Resolution,
    /// Playthrough frame rate
    pub frame_rate: u32,
    /// Frame rate while presenting the landing page
    pub idle_frame_rate: u32,
    /// Pixel codec of the published stream
    pub codec: PixelCodec,
    /// Image presented when no producer is connected
    pub landing_page: PathBuf,
    /// Prefix for all messages pushed to the stream logger
    #[serde(default)]
    pub log_message_prefix: String,
    /// Determines how logs are collected
    pub log_collection_mode: LogCollectionMode,
    /// Determines how producer frames are paced
    #[serde(default = "default_pacing")]
    pub pacing: PacingStrategy,
    /// Number of buffers the sink stream queues for its producer
    #[serde(default = "default_sink_buffer_queue_size")]
    pub sink_buffer_queue_size: u32,
    /// Number of buffers the producer has to deliver before the sink starts
    #[serde(default = "default_sink_buffers_required_for_startup")]
    pub sink_buffers_required_for_startup: u32,
    /// Console duplication throttle
    #[serde(default)]
    pub console_throttle: ConsoleThrottleConfig,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_pacing() -> PacingStrategy {
    PacingStrategy::Direct
}

fn default_sink_buffer_queue_size() -> u32 {
    3
}

fn default_sink_buffers_required_for_startup() -> u32 {
    1
}

fn default_throttle_interval_ms() -> u64 {
    60_000
}

fn default_activation_count() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: "Virtual Camera".to_string(),
            manufacturer: "Virtual Camera Contributors".to_string(),
            model: "Virtual Camera Model 1".to_string(),
            device_id: Uuid::from_u128(0x6d0c_1a2e_8f3b_4c7d_9e10_2b3c_4d5e_6f70),
            source_stream_id: Uuid::from_u128(0x6d0c_1a2e_8f3b_4c7d_9e10_2b3c_4d5e_6f71),
            sink_stream_id: Uuid::from_u128(0x6d0c_1a2e_8f3b_4c7d_9e10_2b3c_4d5e_6f72),
            source_stream_name: "virtual-camera.source".to_string(),
            sink_stream_name: "virtual-camera.sink".to_string(),
            resolution: Resolution {
                width: 1280,
                height: 720,
            },
            frame_rate: 30,
            idle_frame_rate: 5,
            codec: PixelCodec::Nv12,
            landing_page: PathBuf::from("assets/landing_page.png"),
            log_message_prefix: "[vcam]".to_string(),
            log_collection_mode: LogCollectionMode::Push,
            pacing: default_pacing(),
            sink_buffer_queue_size: default_sink_buffer_queue_size(),
            sink_buffers_required_for_startup: default_sink_buffers_required_for_startup(),
            console_throttle: ConsoleThrottleConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Configuration {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and environment variables
    pub fn load() -> CameraResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Missing keys fall back to [`Configuration::default`].
    /// Environment variables override the file, e.g. `VIRTUAL_CAMERA_FRAME_RATE=60`
    /// or `VIRTUAL_CAMERA_RESOLUTION__WIDTH=1920`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> CameraResult<Self> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> CameraResult<()> {
        let Resolution { width, height } = self.resolution;
        if width == 0 || height == 0 {
            return Err(CameraError::configuration(format!(
                "Invalid resolution {width}x{height}. Both dimensions must be non-zero"
            )));
        }
        if self.codec == PixelCodec::Nv12 && (width % 2 != 0 || height % 2 != 0) {
            return Err(CameraError::configuration(format!(
                "Invalid resolution {width}x{height}. NV12 requires even dimensions"
            )));
        }

        if self.frame_rate == 0 || self.idle_frame_rate == 0 {
            return Err(CameraError::configuration(
                "frame_rate and idle_frame_rate must be positive",
            ));
        }
        if self.frame_rate > MAX_FRAME_RATE || self.idle_frame_rate > MAX_FRAME_RATE {
            return Err(CameraError::configuration(format!(
                "frame_rate {} and idle_frame_rate {} must not exceed {MAX_FRAME_RATE}",
                self.frame_rate, self.idle_frame_rate
            )));
        }
        if self.idle_frame_rate > self.frame_rate {
            return Err(CameraError::configuration(format!(
                "idle_frame_rate {} exceeds frame_rate {}",
                self.idle_frame_rate, self.frame_rate
            )));
        }
        if self.pacing == PacingStrategy::Smoothing
            && !SUPPORTED_FRAME_RATES.contains(&self.frame_rate)
        {
            return Err(CameraError::UnsupportedFrameRate {
                frame_rate: self.frame_rate,
                min: *SUPPORTED_FRAME_RATES.start(),
                max: *SUPPORTED_FRAME_RATES.end(),
            });
        }

        if self.sink_buffer_queue_size == 0 {
            return Err(CameraError::configuration(
                "sink_buffer_queue_size must be at least 1",
            ));
        }
        if self.console_throttle.activation_count == 0 {
            return Err(CameraError::configuration(
                "console_throttle.activation_count must be at least 1",
            ));
        }
        if self.source_stream_id == self.sink_stream_id {
            return Err(CameraError::configuration(format!(
                "Source and sink streams share the identifier {}",
                self.source_stream_id
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(CameraError::configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Duration of one frame at the playthrough frame rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }

    /// Duration of one frame while presenting the landing page
    pub fn idle_frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.idle_frame_rate.max(1)))
    }

    /// Format of the published stream
    pub fn video_format(&self) -> FormatDescription {
        FormatDescription::new(self.codec, self.resolution.width, self.resolution.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
        assert_eq!(config.idle_frame_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_load_from_file_merges_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name = "Studio Camera"
frame_rate = 60
codec = "bgra"
log_collection_mode = "pull"
pacing = "smoothing"

[resolution]
width = 1920
height = 1080
"#
        )
        .unwrap();

        let config = Configuration::load_from(file.path()).unwrap();
        assert_eq!(config.name, "Studio Camera");
        assert_eq!(config.frame_rate, 60);
        assert_eq!(config.codec, PixelCodec::Bgra);
        assert_eq!(config.log_collection_mode, LogCollectionMode::Pull);
        assert_eq!(config.pacing, PacingStrategy::Smoothing);
        assert_eq!(config.resolution.width, 1920);
        // Untouched keys keep their defaults
        assert_eq!(config.idle_frame_rate, 5);
        assert_eq!(config.sink_buffer_queue_size, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let config = Configuration {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_odd_nv12_resolution_rejected() {
        let config = Configuration {
            resolution: Resolution {
                width: 641,
                height: 480,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Configuration {
            codec: PixelCodec::Bgra,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_smoothing_requires_supported_frame_rate() {
        let config = Configuration {
            pacing: PacingStrategy::Smoothing,
            frame_rate: 10,
            idle_frame_rate: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CameraError::UnsupportedFrameRate { frame_rate: 10, .. })
        ));

        // Direct pacing has no such restriction
        let config = Configuration {
            pacing: PacingStrategy::Direct,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_idle_rate_above_frame_rate_rejected() {
        let config = Configuration {
            idle_frame_rate: 45,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_rate_upper_bound() {
        let config = Configuration {
            frame_rate: MAX_FRAME_RATE,
            idle_frame_rate: MAX_FRAME_RATE,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.frame_interval() > Duration::ZERO);

        let config = Configuration {
            frame_rate: 3_000_000_000,
            idle_frame_rate: 3_000_000_000,
            ..config
        };
        assert!(matches!(
            config.validate(),
            Err(CameraError::Configuration(_))
        ));
    }

    #[test]
    fn test_shared_stream_ids_rejected() {
        let defaults = Configuration::default();
        let config = Configuration {
            sink_stream_id: defaults.source_stream_id,
            ..defaults
        };
        assert!(config.validate().is_err());
    }
}
