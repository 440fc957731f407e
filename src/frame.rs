// SPDX-License-Identifier: MPL-2.0

//! Prepared frames and the looping sequence they form.

use std::{sync::Arc, time::Duration};

/// Shortest display time a frame may carry.
pub const MIN_FRAME_DURATION: Duration = Duration::from_millis(1);

/// An encoded frame and how long it stays on screen.
///
/// The payload is shared, so cloning a record into the playback queue
/// never copies the image bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameRecord {
    payload: Arc<[u8]>,
    duration: Duration,
}

impl FrameRecord {
    /// Create a record. Durations shorter than [`MIN_FRAME_DURATION`] are raised to it.
    pub fn new(payload: impl Into<Arc<[u8]>>, duration: Duration) -> Self {
        Self {
            payload: payload.into(),
            duration: duration.max(MIN_FRAME_DURATION),
        }
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl std::fmt::Debug for FrameRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRecord")
            .field("payload", &format_args!("{} bytes", self.payload.len()))
            .field("duration", &self.duration)
            .finish()
    }
}

/// Ordered, non-empty list of frames in playback order.
///
/// Cheap to clone; the producer walks it forever, wrapping to the first
/// frame after the last.
#[derive(Clone, Debug)]
pub struct FrameSequence {
    frames: Arc<[FrameRecord]>,
}

impl FrameSequence {
    /// Returns `None` for an empty list, which can never be played.
    #[must_use]
    pub fn new(frames: Vec<FrameRecord>) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        Some(Self {
            frames: frames.into(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> &FrameRecord {
        &self.frames[index % self.frames.len()]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameRecord> {
        self.frames.iter()
    }

    /// Sum of all frame durations, i.e. the length of one loop.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.frames.iter().map(FrameRecord::duration).sum()
    }
}

impl<'a> IntoIterator for &'a FrameSequence {
    type Item = &'a FrameRecord;
    type IntoIter = std::slice::Iter<'a, FrameRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_is_rejected() {
        assert!(FrameSequence::new(Vec::new()).is_none());
    }

    #[test]
    fn index_wraps_around() {
        let sequence = FrameSequence::new(vec![
            FrameRecord::new(vec![0u8], Duration::from_millis(10)),
            FrameRecord::new(vec![1u8], Duration::from_millis(20)),
        ])
        .unwrap();

        assert_eq!(sequence.get(2).payload(), &[0]);
        assert_eq!(sequence.get(3).payload(), &[1]);
        assert_eq!(sequence.total_duration(), Duration::from_millis(30));
    }

    #[test]
    fn zero_duration_is_raised() {
        let frame = FrameRecord::new(vec![1u8, 2, 3], Duration::ZERO);
        assert_eq!(frame.duration(), MIN_FRAME_DURATION);
    }
}
