// SPDX-License-Identifier: MPL-2.0

//! Source decoding for the frame pipeline.
//!
//! A source is either a video or an animated image. Both are exposed as a
//! [`FrameSource`]: a lazy, finite iterator of decoded frames, each paired
//! with the time it should stay on screen.
//!
//! # Module Structure
//!
//! - [`types`]: Core types (RawFrame, SourceKind, DecodeOptions, Retiming)
//! - [`detection`]: File type detection and archive identity
//! - `image_decoder`: GIF / animated WebP / APNG decoding via `image`
//! - `video_decoder`: GStreamer-based video decoding
//!
//! # Frame skipping
//!
//! | Kind | Skipping on | Skipping off |
//! |------|-------------|--------------|
//! | Video | keep every `round(source_fps / target_fps)`-th frame at `1/target_fps` | keep all at `1/target_fps` |
//! | Animated image | rate from mean authored duration, keep every n-th at `1/target_fps` | keep all with authored durations |

mod detection;
mod image_decoder;
mod types;
#[cfg(feature = "video")]
mod video_decoder;

use std::path::Path;

pub use detection::source_identity;
pub use image_decoder::AnimatedImageSource;
pub use types::{DecodeOptions, RawFrame};
use types::SourceKind;
#[cfg(feature = "video")]
pub use video_decoder::VideoSource;

use crate::error::DecodeError;

/// A lazy, finite sequence of decoded frames.
///
/// Decoding stops with `None` at the natural end of the source and yields
/// `Some(Err(_))` when a frame cannot be decoded.
pub trait FrameSource: Iterator<Item = Result<RawFrame, DecodeError>> {
    /// Width and height of the frames as decoded.
    fn native_size(&self) -> (u32, u32);
}

/// Opens a source file as a [`FrameSource`].
pub trait SourceDecoder {
    fn open(
        &self,
        path: &Path,
        options: &DecodeOptions,
    ) -> Result<Box<dyn FrameSource>, DecodeError>;
}

/// Decoder dispatching on the file extension: GStreamer for video,
/// the `image` codecs for everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl SourceDecoder for FileDecoder {
    fn open(
        &self,
        path: &Path,
        options: &DecodeOptions,
    ) -> Result<Box<dyn FrameSource>, DecodeError> {
        match SourceKind::from_path(path) {
            SourceKind::Video => open_video(path, options),
            SourceKind::AnimatedImage => Ok(Box::new(AnimatedImageSource::open(path, options)?)),
        }
    }
}

#[cfg(feature = "video")]
fn open_video(path: &Path, options: &DecodeOptions) -> Result<Box<dyn FrameSource>, DecodeError> {
    Ok(Box::new(VideoSource::open(path, options)?))
}

#[cfg(not(feature = "video"))]
fn open_video(path: &Path, _options: &DecodeOptions) -> Result<Box<dyn FrameSource>, DecodeError> {
    Err(DecodeError::Unsupported {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests;
