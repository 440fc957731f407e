// SPDX-License-Identifier: MPL-2.0

//! On-disk archive of encoded frames.
//!
//! Each source gets a directory named by its identity (`{stem}_{ext}`)
//! holding one file per frame, named by its zero-based index:
//!
//! ```text
//! AnimationFrames/
//! └── badapple_mp4/
//!     ├── 0.jpg
//!     ├── 1.jpg
//!     └── ...
//! ```
//!
//! Only a contiguous run `0..n` is trusted. Gaps or a
//! leftover `.part` file mark the archive inconsistent, which callers treat
//! like a miss.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::frame::FrameRecord;

/// Extension of archived frames.
pub const FRAME_EXTENSION: &str = "jpg";

/// Suffix of a frame that is still being written.
const PARTIAL_SUFFIX: &str = ".part";

/// What a scan found in an archive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveState {
    /// No archived frames.
    Empty,
    /// Frames `0..count` are all present.
    Complete(usize),
    /// Frames exist but do not form a trusted run.
    Inconsistent { found: usize, missing: Vec<usize> },
}

/// Directory of archived frames for one source.
#[derive(Debug, Clone)]
pub struct FrameArchive {
    dir: PathBuf,
}

impl FrameArchive {
    /// The archive of `identity` under `root`. The directory is created by
    /// the first [`FrameArchive::write`].
    #[must_use]
    pub fn open(root: &Path, identity: &str) -> Self {
        Self {
            dir: root.join(identity),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{index}.{FRAME_EXTENSION}"))
    }

    /// Check which frames are present.
    #[must_use]
    pub fn scan(&self) -> ArchiveState {
        let mut indices = Vec::new();
        let mut partial = false;

        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(PARTIAL_SUFFIX) {
                partial = true;
            } else if let Some(index) = parse_frame_name(&name) {
                indices.push(index);
            }
        }

        if indices.is_empty() && !partial {
            return ArchiveState::Empty;
        }

        indices.sort_unstable();
        let found = indices.len();
        let expected = indices.last().map_or(0, |last| last + 1);
        let contiguous = indices.iter().enumerate().all(|(i, index)| i == *index);

        if contiguous && !partial {
            return ArchiveState::Complete(found);
        }

        let missing = (0..expected)
            .filter(|i| indices.binary_search(i).is_err())
            .collect();
        ArchiveState::Inconsistent { found, missing }
    }

    /// Write frame `index`. The file only appears under its final name once complete.
    pub fn write(&self, index: usize, payload: &[u8]) -> io::Result<()> {
        let path = self.frame_path(index);
        let partial = path.with_extension(format!("{FRAME_EXTENSION}{PARTIAL_SUFFIX}"));
        fs::create_dir_all(&self.dir)?;
        fs::write(&partial, payload)?;
        fs::rename(&partial, &path)
    }

    /// Read frames `0..count`, each lasting `duration`.
    pub fn load(&self, count: usize, duration: Duration) -> io::Result<Vec<FrameRecord>> {
        (0..count)
            .map(|index| {
                fs::read(self.frame_path(index)).map(|bytes| FrameRecord::new(bytes, duration))
            })
            .collect()
    }

    /// Remove every archived or partially written frame. Returns how many files went.
    pub fn purge(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(PARTIAL_SUFFIX) || parse_frame_name(&name).is_some() {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(why) => {
                        warn!(?why, path = %entry.path().display(), "Failed to remove archived frame");
                        return Err(why);
                    }
                }
            }
        }

        // Only succeeds once nothing else is left in it.
        if fs::remove_dir(&self.dir).is_ok() {
            debug!(dir = %self.dir.display(), "Removed empty archive directory");
        }

        debug!(removed, dir = %self.dir.display(), "Purged frame archive");
        Ok(removed)
    }
}

/// Parse `"<index>.jpg"`. Non-canonical numbers such as `01.jpg` are not frames.
fn parse_frame_name(name: &str) -> Option<usize> {
    let stem = name.strip_suffix(FRAME_EXTENSION)?.strip_suffix('.')?;
    let index = stem.parse::<usize>().ok()?;
    (index.to_string() == stem).then_some(index)
}
