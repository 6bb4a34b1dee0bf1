//! # Virtual Camera Core Library
//!
//! This crate implements the core of a virtual camera device extension. The device
//! registers with the operating system's media subsystem as a camera, accepts video
//! frames from one producer application and republishes them to any number of
//! consumer applications as if they came from hardware. With consumers but no
//! producer it shows a static landing page.
//!
//! ## Crate Structure
//!
//! - **`device`**: The `Device` with its explicit state machine, its single timer
//!   slot and the pull/push frame pump.
//! - **`stream`**: `StreamSource` (consumer-facing) and `StreamSink`
//!   (producer-facing) adapters between the OS callbacks and the device.
//! - **`frame_processor`**: The smoothing pacing strategy that trades producer
//!   jitter for a constant one-frame delay.
//! - **`stream_logger`**: Diagnostic log delivery through the source stream's log
//!   property, pushed in batches or pulled one message at a time.
//! - **`queue`**: `BoundedSafeQueue<T>`, the thread-safe bounded FIFO used for frames
//!   and log messages.
//! - **`throttle`**: Time-window throttles guarding console duplication.
//! - **`landing_page`**: Decoding and pre-conversion of the landing-page asset.
//! - **`media`**: Vocabulary shared with the OS media subsystem and the endpoint
//!   traits it implements, plus in-memory loopback endpoints.
//! - **`config`**: The immutable `Configuration`, loaded with `figment`.
//! - **`error`**: The `CameraError` enum for centralized error handling.
//! - **`logging`**: `tracing` subscriber initialization.
//! - **`clock`**: Monotonic host clock used to time-stamp frames.

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod frame_processor;
pub mod landing_page;
pub mod logging;
pub mod media;
pub mod queue;
pub mod stream;
pub mod stream_logger;
pub mod throttle;

pub use config::Configuration;
pub use device::Device;
pub use error::{CameraError, CameraResult};
