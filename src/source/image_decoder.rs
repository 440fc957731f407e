// SPDX-License-Identifier: MPL-2.0

//! CPU decoding of animated images (GIF, animated WebP, APNG).

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use image::{
    AnimationDecoder, Delay, DynamicImage, Frame, Frames, ImageDecoder, ImageError, ImageFormat,
    Limits,
    codecs::{gif::GifDecoder, png::PngDecoder, webp::WebPDecoder},
    error::DecodingError,
};
use tracing::{debug, info};

use super::types::{DEFAULT_FRAME_DURATION, DecodeOptions, RawFrame, Retiming};
use super::FrameSource;
use crate::error::DecodeError;

/// Lazily decoded sub-images of an animated image file.
pub struct AnimatedImageSource {
    path: PathBuf,
    size: (u32, u32),
    frames: Frames<'static>,
    retiming: Retiming,
    index: usize,
    finished: bool,
}

impl AnimatedImageSource {
    pub fn open(path: &Path, options: &DecodeOptions) -> Result<Self, DecodeError> {
        let retiming = if options.frame_skipping {
            // The effective source rate needs every authored duration up front.
            let durations = match ImageFormat::from_path(path).ok() {
                Some(ImageFormat::Gif) => gif_durations(path, options)?,
                _ => scan_durations(path, options)?,
            };

            let retiming = Retiming::for_animation(&durations, options);
            info!(
                path = %path.display(),
                source_frames = durations.len(),
                keep_every = retiming.keep_every(),
                target_fps = options.target_fps,
                "Animated image frame skipping"
            );
            retiming
        } else {
            info!(
                path = %path.display(),
                "Keeping every animated image frame with its authored duration"
            );
            Retiming::Authored
        };

        let (size, frames) = open_frames(path)?;
        debug!(path = %path.display(), width = size.0, height = size.1, "Opened animated image");

        Ok(Self {
            path: path.to_path_buf(),
            size,
            frames,
            retiming,
            index: 0,
            finished: false,
        })
    }
}

impl Iterator for AnimatedImageSource {
    type Item = Result<RawFrame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let frame = match self.frames.next() {
                Some(Ok(frame)) => frame,
                Some(Err(source)) => {
                    self.finished = true;
                    return Some(Err(image_error(&self.path, source)));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            let index = self.index;
            self.index += 1;
            if !self.retiming.keeps(index) {
                continue;
            }

            let duration = self.retiming.duration_for(authored_duration(frame.delay()));
            return Some(Ok(RawFrame {
                image: DynamicImage::ImageRgba8(frame.into_buffer()),
                duration,
            }));
        }
    }
}

impl FrameSource for AnimatedImageSource {
    fn native_size(&self) -> (u32, u32) {
        self.size
    }
}

/// Duration carried by a sub-image, [`DEFAULT_FRAME_DURATION`] when unset.
fn authored_duration(delay: Delay) -> Duration {
    let (numer, denom) = delay.numer_denom_ms();
    if numer == 0 || denom == 0 {
        return DEFAULT_FRAME_DURATION;
    }
    Duration::from_nanos(u64::from(numer) * 1_000_000 / u64::from(denom))
}

fn image_error(path: &Path, source: image::ImageError) -> DecodeError {
    DecodeError::Image {
        path: path.to_path_buf(),
        source,
    }
}

/// Authored durations of every GIF frame, read from the frame headers
/// without decompressing or compositing any pixels.
pub(super) fn gif_durations(
    path: &Path,
    options: &DecodeOptions,
) -> Result<Vec<Duration>, DecodeError> {
    let gif_error = |source: gif::DecodingError| {
        image_error(
            path,
            ImageError::Decoding(DecodingError::new(ImageFormat::Gif.into(), source)),
        )
    };

    let mut gif_opts = gif::DecodeOptions::new();
    gif_opts.skip_frame_decoding(true);
    let mut decoder = gif_opts.read_info(open_reader(path)?).map_err(gif_error)?;

    let mut durations = Vec::new();
    while let Some(frame) = decoder.read_next_frame().map_err(gif_error)? {
        if options.is_cancelled() {
            return Err(cancelled(path));
        }
        // GIF delays are in hundredths of a second.
        let delay = Delay::from_numer_denom_ms(u32::from(frame.delay) * 10, 1);
        durations.push(authored_duration(delay));
    }
    Ok(durations)
}

/// Authored durations of every sub-image, found by decoding the whole animation.
fn scan_durations(path: &Path, options: &DecodeOptions) -> Result<Vec<Duration>, DecodeError> {
    let (_, frames) = open_frames(path)?;
    let mut durations = Vec::new();
    for frame in frames {
        if options.is_cancelled() {
            return Err(cancelled(path));
        }
        let frame = frame.map_err(|source| image_error(path, source))?;
        durations.push(authored_duration(frame.delay()));
    }
    Ok(durations)
}

fn cancelled(path: &Path) -> DecodeError {
    DecodeError::Cancelled {
        path: path.to_path_buf(),
    }
}

fn open_reader(path: &Path) -> Result<BufReader<File>, DecodeError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| DecodeError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Refuse canvases the default decoding limits would not allow, before any
/// decoder allocates one.
fn check_canvas((width, height): (u32, u32)) -> Result<(), ImageError> {
    let mut limits = Limits::default();
    limits.check_dimensions(width, height)?;
    limits.reserve(u64::from(width) * u64::from(height) * 4)
}

/// Open `path` with the decoder matching its format and return the canvas
/// size along with its frame iterator. Still images yield one frame.
fn open_frames(path: &Path) -> Result<((u32, u32), Frames<'static>), DecodeError> {
    let err = |source| image_error(path, source);

    match ImageFormat::from_path(path).ok() {
        Some(ImageFormat::Gif) => {
            let mut decoder = GifDecoder::new(open_reader(path)?).map_err(err)?;
            check_canvas(decoder.dimensions()).map_err(err)?;
            decoder.set_limits(Limits::default()).map_err(err)?;
            Ok((decoder.dimensions(), decoder.into_frames()))
        }
        Some(ImageFormat::WebP) => {
            let mut decoder = WebPDecoder::new(open_reader(path)?).map_err(err)?;
            if decoder.has_animation() {
                check_canvas(decoder.dimensions()).map_err(err)?;
                decoder.set_limits(Limits::default()).map_err(err)?;
                Ok((decoder.dimensions(), decoder.into_frames()))
            } else {
                still_frame(path)
            }
        }
        Some(ImageFormat::Png) => {
            let mut decoder = PngDecoder::new(open_reader(path)?).map_err(err)?;
            if decoder.is_apng().map_err(err)? {
                let size = decoder.dimensions();
                check_canvas(size).map_err(err)?;
                decoder.set_limits(Limits::default()).map_err(err)?;
                Ok((size, decoder.apng().map_err(err)?.into_frames()))
            } else {
                still_frame(path)
            }
        }
        _ => still_frame(path),
    }
}

fn still_frame(path: &Path) -> Result<((u32, u32), Frames<'static>), DecodeError> {
    let image = image::open(path).map_err(|source| image_error(path, source))?;
    let size = (image.width(), image.height());
    let frame = Frame::from_parts(image.into_rgba8(), 0, 0, Delay::from_numer_denom_ms(0, 1));

    Ok((size, Frames::new(Box::new(std::iter::once(Ok(frame))))))
}
