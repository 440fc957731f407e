// SPDX-License-Identifier: MPL-2.0

//! One-time preprocessing of a source into a playable [`FrameSequence`].
//!
//! ```text
//! archive complete? ──yes──► load archived frames
//!        │ no (empty or inconsistent)
//!        ▼
//! purge ► decode ► resize + JPEG (rayon, in batches) ► archive in order
//! ```

use std::{
    path::{Path, PathBuf},
    sync::{Arc, atomic::AtomicBool},
};

use bg_animator_config::Config;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::{
    archive::{ArchiveState, FrameArchive},
    encoder::FrameEncoder,
    error::{DecodeError, EncodeError, PipelineError},
    frame::{FrameRecord, FrameSequence},
    resolution,
    source::{DecodeOptions, FileDecoder, SourceDecoder, source_identity},
};

/// Where a prepared sequence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Archive,
    Decoded,
}

/// Frames ready for playback.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub sequence: FrameSequence,
    pub origin: Origin,
}

/// Decodes, encodes and archives a source, or loads a previous archive of it.
#[derive(Debug, Clone)]
pub struct Preprocessor<D = FileDecoder> {
    decoder: D,
    archive_root: PathBuf,
    options: DecodeOptions,
    quality: u8,
    scale_factor: f32,
    display_bound: (u32, u32),
}

impl Preprocessor<FileDecoder> {
    pub fn new(config: &Config, display_bound: (u32, u32)) -> Self {
        Self {
            decoder: FileDecoder,
            archive_root: config.archive_root(),
            options: DecodeOptions::new(config.target_fps, config.frame_skipping),
            quality: config.quality,
            scale_factor: config.scale_factor,
            display_bound,
        }
    }
}

impl<D: SourceDecoder> Preprocessor<D> {
    /// Replace the source decoder.
    #[cfg(test)]
    pub fn with_decoder<E: SourceDecoder>(self, decoder: E) -> Preprocessor<E> {
        Preprocessor {
            decoder,
            archive_root: self.archive_root,
            options: self.options,
            quality: self.quality,
            scale_factor: self.scale_factor,
            display_bound: self.display_bound,
        }
    }

    /// Flag that aborts a running [`Preprocessor::prepare`], checked per
    /// batch and while scanning animated images.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.options.cancel)
    }

    /// Produce the frame sequence of `source`, from the archive when it holds
    /// a complete run and by decoding otherwise.
    pub fn prepare(&self, source: &Path) -> Result<Prepared, PipelineError> {
        let identity = source_identity(source);
        let archive = FrameArchive::open(&self.archive_root, &identity);
        info!(dir = %archive.dir().display(), "Archive directory");

        match archive.scan() {
            ArchiveState::Complete(count) => {
                info!(frames = count, "Loading frames from archive");
                match archive.load(count, self.options.frame_delay()) {
                    Ok(frames) => {
                        if let Some(sequence) = FrameSequence::new(frames) {
                            return Ok(Prepared {
                                sequence,
                                origin: Origin::Archive,
                            });
                        }
                    }
                    Err(why) => {
                        warn!(?why, "Failed to read archived frames, reprocessing source");
                    }
                }
            }
            ArchiveState::Empty => {
                info!(source = %source.display(), "No archived frames, processing source");
            }
            ArchiveState::Inconsistent { found, missing } => {
                warn!(
                    found,
                    missing = ?missing,
                    "Archive is incomplete and will not be trusted, reprocessing source"
                );
            }
        }

        let sequence = self.build(source, &archive)?;
        Ok(Prepared {
            sequence,
            origin: Origin::Decoded,
        })
    }

    /// Rebuild the archive from scratch. Nothing is left behind on failure.
    fn build(&self, source: &Path, archive: &FrameArchive) -> Result<FrameSequence, PipelineError> {
        archive
            .purge()
            .map_err(|e| PipelineError::io("failed to clear stale archive", e))?;

        let result = self
            .encode_into(source, archive)
            .and_then(|frames| {
                FrameSequence::new(frames).ok_or_else(|| PipelineError::NoFrames(source.to_path_buf()))
            });

        if let Err(why) = &result {
            match why {
                PipelineError::Cancelled => info!("Preprocessing cancelled, discarding archive"),
                _ => error!(%why, source = %source.display(), "Preprocessing failed, discarding archive"),
            }
            if let Err(why) = archive.purge() {
                warn!(?why, "Failed to discard partial archive");
            }
        }

        result
    }

    fn encode_into(
        &self,
        source: &Path,
        archive: &FrameArchive,
    ) -> Result<Vec<FrameRecord>, PipelineError> {
        let frames_source = self
            .decoder
            .open(source, &self.options)
            .map_err(decode_failed)?;

        let native = frames_source.native_size();
        let size = resolution::plan(native, self.display_bound, self.scale_factor);
        info!(
            native_width = native.0,
            native_height = native.1,
            width = size.0,
            height = size.1,
            "Optimal resolution"
        );

        let encoder = FrameEncoder::new(size, self.quality);
        let batch_size = rayon::current_num_threads().max(1) * 2;
        let mut raw_frames = frames_source.fuse();
        let mut frames = Vec::new();
        let mut decoded = 0;
        let mut failed = 0;

        loop {
            if self.options.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let batch = raw_frames
                .by_ref()
                .take(batch_size)
                .collect::<Result<Vec<_>, _>>()
                .map_err(decode_failed)?;
            if batch.is_empty() {
                break;
            }
            decoded += batch.len();

            let encoded: Vec<_> = batch
                .into_par_iter()
                .map(|raw| encoder.encode(raw))
                .collect();
            failed += store_batch(archive, encoded, &mut frames)?;
        }

        info!(
            frames = frames.len(),
            decoded,
            failed,
            "Processed frames"
        );
        Ok(frames)
    }
}

fn decode_failed(why: DecodeError) -> PipelineError {
    match why {
        DecodeError::Cancelled { .. } => PipelineError::Cancelled,
        why => PipelineError::Decode(why),
    }
}

/// Archive the successfully encoded frames of a batch, in order, at the next
/// free indices. Returns how many frames were skipped.
fn store_batch(
    archive: &FrameArchive,
    encoded: Vec<Result<FrameRecord, EncodeError>>,
    frames: &mut Vec<FrameRecord>,
) -> Result<usize, PipelineError> {
    let mut failed = 0;

    for result in encoded {
        match result {
            Ok(record) => {
                let index = frames.len();
                archive
                    .write(index, record.payload())
                    .map_err(|e| PipelineError::io(format!("failed to archive frame {index}"), e))?;
                frames.push(record);

                if frames.len() % 100 == 0 {
                    info!(frames = frames.len(), "Processed frames...");
                }
            }
            Err(why) => {
                failed += 1;
                warn!(%why, index = frames.len(), "Failed to encode frame, skipping");
            }
        }
    }

    debug!(stored = frames.len(), failed, "Stored batch");
    Ok(failed)
}
