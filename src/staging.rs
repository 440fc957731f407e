// SPDX-License-Identifier: MPL-2.0

//! Staging slots the display sink reads from.
//!
//! The scheduler writes each frame into the next slot of a fixed ring and
//! points the sink at it. A slot is only rewritten after every other slot
//! has been used once, so the sink never reads a file that is being
//! overwritten.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use bg_animator_config::{Config, NAME};
use tracing::{debug, info, warn};

use crate::archive::FRAME_EXTENSION;

const SLOT_PREFIX: &str = "slot_";

/// Directory holding the staging slots.
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    /// Whether the directory was created by us and should be removed on release.
    created: bool,
}

impl StagingArea {
    /// Pick and create the staging directory: `staging_dir` from the config,
    /// else the runtime directory (tmpfs on most Linux systems), else the
    /// system temp directory.
    pub fn provision(config: &Config) -> io::Result<Self> {
        let dir = config.staging_dir.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(NAME)
        });
        Self::at(dir)
    }

    pub fn at(dir: PathBuf) -> io::Result<Self> {
        let created = !dir.is_dir();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), created, "Staging area ready");
        Ok(Self { dir, created })
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A ring of `count` slots (at least one) inside this area, each slot
    /// created empty.
    pub fn ring(&self, count: usize) -> io::Result<StagingRing> {
        let ring = StagingRing::new(&self.dir, count);
        for path in ring.slots.iter() {
            fs::File::create(path)?;
        }
        debug!(slots = ring.len(), dir = %self.dir.display(), "Created staging slots");
        Ok(ring)
    }

    /// Delete every slot file, and the directory itself if we created it.
    pub fn release(&self) -> io::Result<()> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if is_slot_name(&entry.file_name().to_string_lossy()) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }

        if self.created {
            if let Err(why) = fs::remove_dir(&self.dir) {
                warn!(?why, dir = %self.dir.display(), "Failed to remove staging directory");
            }
        }

        info!(removed, dir = %self.dir.display(), "Cleaned up staging slots");
        Ok(())
    }
}

fn is_slot_name(name: &str) -> bool {
    name.strip_prefix(SLOT_PREFIX)
        .and_then(|rest| rest.strip_suffix(FRAME_EXTENSION))
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

/// Fixed ring of slot files with a rotating write index.
///
/// Owned by the scheduler; the index only moves through [`StagingRing::rotate`].
#[derive(Debug)]
pub struct StagingRing {
    slots: Box<[PathBuf]>,
    next: usize,
}

impl StagingRing {
    pub fn new(dir: &Path, count: usize) -> Self {
        let slots = (0..count.max(1))
            .map(|i| dir.join(format!("{SLOT_PREFIX}{i}.{FRAME_EXTENSION}")))
            .collect();

        Self { slots, next: 0 }
    }

    /// Index of the slot the next frame goes to.
    #[must_use]
    pub fn next_slot(&self) -> usize {
        self.next
    }

    #[must_use]
    pub fn slot_path(&self, index: usize) -> &Path {
        &self.slots[index % self.slots.len()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Overwrite the current slot with `payload` and return its path.
    ///
    /// The index is left alone; call [`StagingRing::rotate`] once the sink is done.
    pub fn write(&self, payload: &[u8]) -> io::Result<&Path> {
        let path = self.slot_path(self.next);
        fs::write(path, payload)?;
        debug!(slot = self.next, bytes = payload.len(), "Wrote staging slot");
        Ok(path)
    }

    /// Advance to `(i + 1) mod N`.
    pub fn rotate(&mut self) {
        self.next = (self.next + 1) % self.slots.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = StagingRing::new(dir.path(), 3);

        let order: Vec<usize> = (0..7)
            .map(|_| {
                let slot = ring.next_slot();
                ring.rotate();
                slot
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn write_goes_to_current_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = StagingRing::new(dir.path(), 2);

        let first = ring.write(b"one").unwrap().to_path_buf();
        ring.rotate();
        let second = ring.write(b"two").unwrap().to_path_buf();

        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"one");
        assert_eq!(fs::read(&second).unwrap(), b"two");
        assert!(first.ends_with("slot_0.jpg"));
    }

    #[test]
    fn zero_slots_becomes_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = StagingRing::new(dir.path(), 0);
        assert_eq!(ring.len(), 1);
        ring.rotate();
        assert_eq!(ring.next_slot(), 0);
    }

    #[test]
    fn release_removes_created_directory() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::at(root.path().join("staging")).unwrap();
        let ring = area.ring(2).unwrap();
        ring.write(b"frame").unwrap();

        area.release().unwrap();
        assert!(!root.path().join("staging").exists());
    }

    #[test]
    fn release_keeps_existing_directory_and_foreign_files() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("keep.txt"), b"x").unwrap();

        let area = StagingArea::at(root.path().to_path_buf()).unwrap();
        area.ring(2).unwrap().write(b"frame").unwrap();
        area.release().unwrap();

        assert!(root.path().join("keep.txt").exists());
        assert!(!root.path().join("slot_0.jpg").exists());
        assert!(!root.path().join("slot_1.jpg").exists());
    }

    #[test]
    fn ring_creates_empty_slots() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::at(root.path().join("staging")).unwrap();
        fs::write(area.dir().join("slot_1.jpg"), b"previous run").unwrap();

        let ring = area.ring(3).unwrap();
        for index in 0..ring.len() {
            assert_eq!(fs::read(ring.slot_path(index)).unwrap(), b"");
        }

        area.release().unwrap();
        assert!(!root.path().join("staging").exists());
    }

    #[test]
    fn provision_honours_configured_dir() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::default().staging_dir(root.path().join("ram"));
        let area = StagingArea::provision(&config).unwrap();
        assert_eq!(area.dir(), root.path().join("ram"));
    }

    #[test]
    fn slot_names() {
        assert!(is_slot_name("slot_0.jpg"));
        assert!(is_slot_name("slot_24.jpg"));
        assert!(!is_slot_name("slot_.jpg"));
        assert!(!is_slot_name("0.jpg"));
        assert!(!is_slot_name("slot_1.png"));
    }
}
