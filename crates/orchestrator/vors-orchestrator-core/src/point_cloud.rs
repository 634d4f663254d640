//! Point cloud section index.
//!
//! Sections are recorded only when the tracker promotes a keyframe, so the
//! index grows with the number of keyframes rather than frames. Relocalization
//! candidates are stacked after the committed sections as *provisional*
//! sections; they are addressable through [`PointSectionIndex::section`] but
//! can never be a reset target.

use std::ops::Range;

use crate::buffer::{BufferKind, GrowableBuffer, Section};
use crate::error::{OrchestratorError, Result};
use crate::ids::{Epoch, KeyframeId};
use crate::tracker::Tracker;

#[derive(Debug, Clone)]
pub struct PointSectionIndex {
    buffer: GrowableBuffer,
    sections: Vec<Section>,
    committed: usize,
    epoch: Epoch,
}

impl PointSectionIndex {
    /// `capacity` and `initial` are in scalars (3 per point).
    pub fn new(capacity: usize, initial: usize) -> Self {
        Self {
            buffer: GrowableBuffer::new(BufferKind::Points, capacity, initial),
            sections: Vec::new(),
            committed: 0,
            epoch: Epoch::default(),
        }
    }

    pub fn buffer(&self) -> &GrowableBuffer {
        &self.buffer
    }

    /// End of the valid range, including provisional sections.
    pub fn end_valid(&self) -> usize {
        self.buffer.end()
    }

    /// End of the committed keyframe sections.
    pub fn committed_end(&self) -> usize {
        match self.committed {
            0 => 0,
            n => self.sections[n - 1].end,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of committed keyframes.
    pub fn keyframe_count(&self) -> usize {
        self.committed
    }

    pub fn provisional_count(&self) -> usize {
        self.sections.len() - self.committed
    }

    /// Latest committed keyframe, if any.
    pub fn last_keyframe(&self) -> Option<KeyframeId> {
        self.committed.checked_sub(1).map(KeyframeId)
    }

    pub fn section(&self, keyframe: KeyframeId) -> Result<Section> {
        self.sections
            .get(keyframe.0)
            .copied()
            .ok_or(OrchestratorError::UnknownKeyframe { keyframe })
    }

    /// Committed sections in keyframe order.
    pub fn sections(&self) -> &[Section] {
        &self.sections[..self.committed]
    }

    /// Check that [`PointSectionIndex::tick`] would fit, without writing.
    pub fn check_tick<T: Tracker + ?Sized>(&self, tracker: &T) -> Result<()> {
        if tracker.change_keyframe() {
            self.buffer.check_room(tracker.keyframe_points().len())?;
        }
        Ok(())
    }

    /// Append the tracker's keyframe points when it just promoted a keyframe.
    /// Returns the new end of the valid range.
    pub fn tick<T: Tracker + ?Sized>(&mut self, tracker: &T, epoch: Epoch) -> Result<usize> {
        debug_assert_eq!(
            self.provisional_count(),
            0,
            "ticking over provisional sections"
        );
        if tracker.change_keyframe() {
            let range = self.buffer.append(tracker.keyframe_points())?;
            self.sections.push(Section::new(range.start, range.end));
            self.committed = self.sections.len();
            log::debug!(
                "point section {} = {:?}",
                self.committed - 1,
                range
            );
        } else {
            self.buffer.touch();
        }
        self.epoch = epoch;
        Ok(self.buffer.end())
    }

    /// Check that `keyframe` can be truncated to, without mutating anything.
    /// Returns the valid end the truncation would produce.
    pub fn plan_reset(&self, keyframe: KeyframeId) -> Result<usize> {
        if keyframe.0 >= self.committed {
            return Err(OrchestratorError::InvalidResetTarget {
                keyframe,
                reason: format!("only {} keyframes reached", self.committed),
            });
        }
        Ok(self.sections[keyframe.0].start)
    }

    /// Forget `keyframe` and everything after it (provisional sections included).
    /// Returns the new end of the valid range, i.e. the old start of `keyframe`'s section.
    pub fn reset_kf(&mut self, keyframe: KeyframeId, epoch: Epoch) -> Result<usize> {
        let end = self.plan_reset(keyframe)?;
        self.sections.truncate(keyframe.0);
        self.committed = keyframe.0;
        self.buffer.truncate(end);
        self.epoch = epoch;
        Ok(end)
    }

    /// Stack a relocalization candidate after the committed sections.
    pub fn append_provisional(&mut self, points: &[f32], epoch: Epoch) -> Result<Section> {
        let range = self.buffer.append(points)?;
        let section = Section::new(range.start, range.end);
        self.sections.push(section);
        self.epoch = epoch;
        Ok(section)
    }

    /// Drop every provisional section. Returns the scalar range they occupied.
    pub fn discard_provisional(&mut self, epoch: Epoch) -> Range<usize> {
        let end = self.buffer.end();
        let committed_end = self.committed_end();
        self.sections.truncate(self.committed);
        if end != committed_end {
            self.buffer.truncate(committed_end);
        }
        self.epoch = epoch;
        committed_end..end
    }

    /// Advance the epoch for a step that leaves the points untouched.
    pub fn stamp(&mut self, epoch: Epoch) {
        self.epoch = epoch;
    }
}
