// SPDX-License-Identifier: MPL-2.0

//! Resizing and JPEG compression of decoded frames.

use fast_image_resize::{FilterType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, codecs::jpeg::JpegEncoder};

use crate::{error::EncodeError, frame::FrameRecord, source::RawFrame};

/// Turns raw frames into [`FrameRecord`]s of a fixed size and quality.
///
/// Stateless apart from its settings, so one encoder can be shared by a
/// rayon pool.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    width: u32,
    height: u32,
    quality: u8,
}

impl FrameEncoder {
    /// `quality` follows the 0-100 JPEG scale; 0 is encoded as 1.
    #[must_use]
    pub fn new((width, height): (u32, u32), quality: u8) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn encode(&self, frame: RawFrame) -> Result<FrameRecord, EncodeError> {
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(frame.image.into_rgb8());
        let resized = self.resize(rgb)?.into_rgb8();

        let mut payload = Vec::new();
        JpegEncoder::new_with_quality(&mut payload, self.quality).encode_image(&resized)?;

        Ok(FrameRecord::new(payload, frame.duration))
    }

    fn resize(&self, image: DynamicImage) -> Result<DynamicImage, EncodeError> {
        if image.width() == self.width && image.height() == self.height {
            return Ok(image);
        }

        let mut resized = DynamicImage::new(self.width, self.height, image.color());
        let options =
            ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));

        Resizer::new()
            .resize(&image, &mut resized, &options)
            .map_err(|e| EncodeError::Resize {
                width: self.width,
                height: self.height,
                reason: e.to_string(),
            })?;

        Ok(resized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    fn raw(width: u32, height: u32) -> RawFrame {
        RawFrame {
            image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                width,
                height,
                Rgba([200, 30, 90, 255]),
            )),
            duration: Duration::from_millis(40),
        }
    }

    #[test]
    fn encodes_to_planned_size() {
        let encoder = FrameEncoder::new((64, 36), 80);
        let record = encoder.encode(raw(320, 180)).unwrap();

        assert_eq!(record.duration(), Duration::from_millis(40));
        assert_eq!(&record.payload()[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(record.payload()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 36));
    }

    #[test]
    fn quality_changes_payload_size() {
        let mut image = RgbaImage::new(128, 128);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgba([(x * 2) as u8, (y * 2) as u8, ((x ^ y) * 3) as u8, 255]);
        }
        let frame = RawFrame {
            image: DynamicImage::ImageRgba8(image),
            duration: Duration::from_millis(40),
        };

        let low = FrameEncoder::new((128, 128), 10).encode(frame.clone()).unwrap();
        let high = FrameEncoder::new((128, 128), 95).encode(frame).unwrap();
        assert!(low.payload().len() < high.payload().len());
    }

    #[test]
    fn zero_quality_is_clamped() {
        let encoder = FrameEncoder::new((8, 8), 0);
        assert!(encoder.encode(raw(8, 8)).is_ok());
    }
}
