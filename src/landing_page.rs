//! Landing page presented while no producer is attached.
//!
//! The asset is decoded, scaled to the camera resolution and converted to BGRA
//! once when the device is created. Every landing-page tick only wraps the
//! shared pixels in a freshly time-stamped [`SampleBuffer`].
//!
//! The landing page is always BGRA, regardless of the published codec; the media
//! subsystem converts it for consumers expecting another format.

use crate::config::Resolution;
use crate::error::{CameraError, CameraResult};
use crate::media::{FormatDescription, PixelCodec, SampleBuffer};
use bytes::Bytes;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;

/// Pre-converted landing-page frame.
#[derive(Debug, Clone)]
pub struct LandingPage {
    format: FormatDescription,
    pixels: Bytes,
}

impl LandingPage {
    /// Codec of landing-page frames.
    pub const CODEC: PixelCodec = PixelCodec::Bgra;

    /// Loads and converts the image at `path`.
    ///
    /// # Errors
    /// - [`CameraError::LandingPageAssetNotFound`] if `path` is not a file
    /// - [`CameraError::ImageLoading`] if the image can't be decoded
    /// - [`CameraError::AcquiringPixelBufferFailed`] if no buffer of `resolution` can be allocated
    pub fn load(path: impl AsRef<Path>, resolution: Resolution) -> CameraResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CameraError::LandingPageAssetNotFound(path.to_path_buf()));
        }

        let image = image::open(path)?;
        Self::from_image(&image, resolution)
    }

    /// Converts an already decoded image.
    ///
    /// Transparent regions are composited over black.
    pub fn from_image(image: &DynamicImage, resolution: Resolution) -> CameraResult<Self> {
        let Resolution { width, height } = resolution;
        let format = FormatDescription::new(Self::CODEC, width, height);
        let len = format
            .frame_len()
            .filter(|len| *len > 0)
            .ok_or_else(|| CameraError::AcquiringPixelBufferFailed(format!("{format}")))?;

        let rgba = if image.width() == width && image.height() == height {
            image.to_rgba8()
        } else {
            image.resize_exact(width, height, FilterType::Triangle).to_rgba8()
        };

        let mut pixels = Vec::with_capacity(len);
        for pixel in rgba.pixels() {
            let [r, g, b, a] = pixel.0;
            pixels.extend_from_slice(&[over_black(b, a), over_black(g, a), over_black(r, a), u8::MAX]);
        }
        if pixels.len() != len {
            return Err(CameraError::AcquiringPixelBufferFailed(format!(
                "{format}: converted {} of {len} bytes",
                pixels.len()
            )));
        }

        Ok(Self {
            format,
            pixels: Bytes::from(pixels),
        })
    }

    /// Format of landing-page frames.
    pub fn format(&self) -> FormatDescription {
        self.format
    }

    /// Wraps the landing page in a frame presented at `presentation_time_ns`.
    pub fn frame(&self, presentation_time_ns: u64) -> CameraResult<SampleBuffer> {
        SampleBuffer::new(self.format, self.pixels.clone(), presentation_time_ns)
    }
}

fn over_black(channel: u8, alpha: u8) -> u8 {
    // Both factors are at most 255, the quotient fits into u8.
    ((u16::from(channel) * u16::from(alpha) + 127) / 255) as u8
}
