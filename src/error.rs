// SPDX-License-Identifier: MPL-2.0

//! Error taxonomy of the frame pipeline.

use std::path::PathBuf;

/// The source could not be opened or one of its frames failed to decode.
///
/// Fatal to the preprocessing stage.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("video pipeline error for {path}: {reason}")]
    Video { path: PathBuf, reason: String },
    #[error("{path} is a video but this build has no video support")]
    Unsupported { path: PathBuf },
    #[error("decoding of {path} was cancelled")]
    Cancelled { path: PathBuf },
}

/// A single frame failed to resize or compress. The frame is skipped.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to resize frame to {width}x{height}: {reason}")]
    Resize {
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("failed to compress frame: {0}")]
    Compress(#[from] image::ImageError),
}

/// The Display Sink failed to paint a staging slot. Logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("no frames were produced or loaded for {0}")]
    NoFrames(PathBuf),
    #[error("preprocessing was cancelled")]
    Cancelled,
    #[error("pipeline cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::pipeline::PipelineState,
        to: crate::pipeline::PipelineState,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] bg_animator_config::ConfigError),
}

impl PipelineError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
