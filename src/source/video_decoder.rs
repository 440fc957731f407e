// SPDX-License-Identifier: MPL-2.0

//! GStreamer-based video decoding.
//!
//! The source is decoded through `decodebin` into RGBA and pulled from an
//! `appsink` as fast as the pipeline produces it. Unlike live playback,
//! the sink neither syncs to the clock nor drops buffers, so every
//! decoded frame reaches the encoder:
//!
//! ```text
//! filesrc → decodebin → videoconvert → RGBA caps → appsink (sync=false)
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use gstreamer::prelude::*;
use image::{DynamicImage, RgbaImage};
use tracing::{debug, info, warn};

use super::FrameSource;
use super::types::{DecodeOptions, RawFrame, Retiming};
use crate::error::DecodeError;

/// How long a single pull may wait for the next sample, in seconds.
const PULL_TIMEOUT_SECS: u64 = 1;

/// Consecutive empty pulls after which a silent pipeline is declared stalled.
const MAX_EMPTY_PULLS: u32 = 30;

/// Time allowed for the pipeline to preroll and expose its caps, in seconds.
const PREROLL_TIMEOUT_SECS: u64 = 10;

/// Decoded frames of a video file.
pub struct VideoSource {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    path: PathBuf,
    size: (u32, u32),
    retiming: Retiming,
    decoded: usize,
    finished: bool,
}

impl VideoSource {
    pub fn open(path: &Path, options: &DecodeOptions) -> Result<Self, DecodeError> {
        let video_err = |reason: String| DecodeError::Video {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(DecodeError::Open {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such video file"),
            });
        }

        gstreamer::init().map_err(|e| video_err(e.to_string()))?;

        let path_str = path
            .to_str()
            .ok_or_else(|| video_err("path is not valid UTF-8".into()))?;
        let escaped_path = path_str.replace('\\', "\\\\").replace('"', "\\\"");

        let pipeline_str = format!(
            concat!(
                "filesrc location=\"{path}\" ! ",
                "decodebin ! ",
                "videoconvert ! ",
                "video/x-raw,format=RGBA ! ",
                "appsink name=sink sync=false max-buffers=8 drop=false"
            ),
            path = escaped_path,
        );
        debug!(pipeline = %pipeline_str, "Creating GStreamer decode pipeline");

        let pipeline = gstreamer::parse::launch(&pipeline_str)
            .map_err(|e| video_err(e.to_string()))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| video_err("failed to create pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| video_err("failed to get appsink from pipeline".into()))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| video_err("element 'sink' is not an AppSink".into()))?;

        let mut source = Self {
            pipeline,
            appsink,
            path: path.to_path_buf(),
            size: (0, 0),
            retiming: Retiming::for_video(None, options),
            decoded: 0,
            finished: false,
        };

        let (size, source_fps) = source.preroll()?;
        source.size = size;
        source.retiming = Retiming::for_video(source_fps, options);

        if options.frame_skipping {
            info!(
                source_fps = ?source_fps,
                target_fps = options.target_fps,
                keep_every = source.retiming.keep_every(),
                "Video frame skipping"
            );
        } else {
            info!(
                target_fps = options.target_fps,
                "Processing all video frames without frame skipping"
            );
        }

        source
            .pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| video_err(format!("failed to start pipeline: {e:?}")))?;

        Ok(source)
    }

    /// Bring the pipeline to PAUSED and read the negotiated size and rate.
    fn preroll(&self) -> Result<((u32, u32), Option<f64>), DecodeError> {
        self.pipeline
            .set_state(gstreamer::State::Paused)
            .map_err(|e| self.video_error(format!("failed to preroll: {e:?}")))?;

        let (result, _, _) = self.pipeline
            .state(gstreamer::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
        if result.is_err() {
            return Err(self
                .bus_error()
                .unwrap_or_else(|| self.video_error("pipeline failed to reach PAUSED".into())));
        }

        let caps = self
            .appsink
            .static_pad("sink")
            .and_then(|pad| pad.current_caps())
            .ok_or_else(|| self.video_error("no caps negotiated on appsink".into()))?;
        let info = gstreamer_video::VideoInfo::from_caps(&caps)
            .map_err(|e| self.video_error(e.to_string()))?;

        let fps = info.fps();
        let source_fps = (fps.numer() > 0 && fps.denom() > 0)
            .then(|| f64::from(fps.numer()) / f64::from(fps.denom()));

        debug!(
            width = info.width(),
            height = info.height(),
            fps = ?source_fps,
            "Video caps negotiated"
        );

        Ok(((info.width(), info.height()), source_fps))
    }

    fn video_error(&self, reason: String) -> DecodeError {
        DecodeError::Video {
            path: self.path.clone(),
            reason,
        }
    }

    /// Pop the first error message posted on the bus, if any.
    fn bus_error(&self) -> Option<DecodeError> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gstreamer::MessageType::Error])?;
        match msg.view() {
            gstreamer::MessageView::Error(err) => Some(self.video_error(format!(
                "{} ({:?})",
                err.error(),
                err.src().map(|s| s.path_string())
            ))),
            _ => None,
        }
    }

    fn sample_to_frame(&self, sample: &gstreamer::Sample) -> Result<RawFrame, DecodeError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| self.video_error("sample without buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| self.video_error("sample without caps".into()))?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|e| self.video_error(e.to_string()))?;

        let width = info.width();
        let height = info.height();
        let stride = info.stride()[0] as usize;
        let row_len = width as usize * 4;

        let map = buffer
            .map_readable()
            .map_err(|e| self.video_error(e.to_string()))?;
        let data = map.as_slice();

        let needed = stride * (height as usize).saturating_sub(1) + row_len;
        if height == 0 || stride < row_len || data.len() < needed {
            return Err(self.video_error(format!(
                "buffer of {} bytes too small for {width}x{height} (stride {stride})",
                data.len()
            )));
        }

        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for row in data.chunks(stride).take(height as usize) {
            pixels.extend_from_slice(&row[..row_len]);
        }

        let image = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| self.video_error("frame buffer size mismatch".into()))?;

        Ok(RawFrame {
            image: DynamicImage::ImageRgba8(image),
            duration: self.retiming.duration_for(Duration::ZERO),
        })
    }
}

impl Iterator for VideoSource {
    type Item = Result<RawFrame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut empty_pulls = 0;

        while !self.finished {
            let Some(sample) = self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_seconds(PULL_TIMEOUT_SECS)) else {
                if self.appsink.is_eos() {
                    debug!(decoded = self.decoded, "Video reached end of stream");
                    self.finished = true;
                    return None;
                }
                if let Some(err) = self.bus_error() {
                    self.finished = true;
                    return Some(Err(err));
                }
                empty_pulls += 1;
                if empty_pulls >= MAX_EMPTY_PULLS {
                    self.finished = true;
                    return Some(Err(self.video_error("decoder stalled".into())));
                }
                continue;
            };

            let index = self.decoded;
            self.decoded += 1;
            if !self.retiming.keeps(index) {
                continue;
            }

            let frame = self.sample_to_frame(&sample);
            if frame.is_err() {
                self.finished = true;
            }
            return Some(frame);
        }

        None
    }
}

impl FrameSource for VideoSource {
    fn native_size(&self) -> (u32, u32) {
        self.size
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(?e, path = %self.path.display(), "Failed to stop video pipeline on drop");
        }
    }
}
