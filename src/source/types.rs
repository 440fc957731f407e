// SPDX-License-Identifier: MPL-2.0

//! Core types shared by the source decoders.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use image::DynamicImage;

/// Duration of an animated-image frame that does not carry its own.
pub(crate) const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(100);

/// A decoded, full-resolution frame with its display time.
#[derive(Clone)]
pub struct RawFrame {
    pub image: DynamicImage,
    pub duration: Duration,
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("duration", &self.duration)
            .finish()
    }
}

/// The two kinds of input the pipeline can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Video,
    AnimatedImage,
}

/// Options that shape which decoded frames are kept and how long they last.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub target_fps: u32,
    pub frame_skipping: bool,
    /// Once set, long decoding passes give up early.
    pub cancel: Arc<AtomicBool>,
}

impl DecodeOptions {
    #[must_use]
    pub fn new(target_fps: u32, frame_skipping: bool) -> Self {
        Self {
            target_fps,
            frame_skipping,
            cancel: Arc::default(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Display time of one frame at the target rate.
    #[must_use]
    pub fn frame_delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(1)))
    }
}

/// Number of source frames per kept frame: `max(1, round(source_fps / target_fps))`.
///
/// Rounds half away from zero. A non-positive or non-finite source rate keeps every frame.
#[must_use]
pub fn skip_factor(source_fps: f64, target_fps: u32) -> usize {
    if !source_fps.is_finite() || source_fps <= 0.0 || target_fps == 0 {
        return 1;
    }
    ((source_fps / f64::from(target_fps)).round() as usize).max(1)
}

/// Which decoded frames survive and what duration they are stamped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retiming {
    /// Keep every frame with its own authored duration.
    Authored,
    /// Keep every `keep_every`-th frame, all with the same duration.
    Uniform {
        keep_every: usize,
        duration: Duration,
    },
}

impl Retiming {
    /// Retiming of a video decoded at `source_fps`.
    ///
    /// Video frames are always stamped with the target delay; skipping only
    /// decides how many are kept.
    #[must_use]
    pub fn for_video(source_fps: Option<f64>, options: &DecodeOptions) -> Self {
        let keep_every = match (options.frame_skipping, source_fps) {
            (true, Some(fps)) => skip_factor(fps, options.target_fps),
            _ => 1,
        };
        Retiming::Uniform {
            keep_every,
            duration: options.frame_delay(),
        }
    }

    /// Retiming of an animated image whose sub-images last `durations`.
    ///
    /// With skipping, the mean authored duration gives the effective
    /// source rate and kept frames are re-stamped with the target delay.
    #[must_use]
    pub fn for_animation(durations: &[Duration], options: &DecodeOptions) -> Self {
        if !options.frame_skipping {
            return Retiming::Authored;
        }

        let mean = if durations.is_empty() {
            DEFAULT_FRAME_DURATION
        } else {
            durations.iter().sum::<Duration>() / durations.len() as u32
        };
        let source_fps = if mean.is_zero() {
            f64::from(options.target_fps)
        } else {
            1.0 / mean.as_secs_f64()
        };

        Retiming::Uniform {
            keep_every: skip_factor(source_fps, options.target_fps),
            duration: options.frame_delay(),
        }
    }

    #[must_use]
    pub fn keeps(&self, index: usize) -> bool {
        match self {
            Retiming::Authored => true,
            Retiming::Uniform { keep_every, .. } => index % keep_every == 0,
        }
    }

    #[must_use]
    pub fn duration_for(&self, authored: Duration) -> Duration {
        match self {
            Retiming::Authored => authored,
            Retiming::Uniform { duration, .. } => *duration,
        }
    }

    #[must_use]
    pub fn keep_every(&self) -> usize {
        match self {
            Retiming::Authored => 1,
            Retiming::Uniform { keep_every, .. } => *keep_every,
        }
    }
}
