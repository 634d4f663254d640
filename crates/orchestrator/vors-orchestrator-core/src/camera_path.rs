//! Camera path index: one position per tracked frame, keyframes as pose offsets.

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferKind, GrowableBuffer, STRIDE};
use crate::error::{OrchestratorError, Result};
use crate::ids::{Epoch, FrameId, KeyframeId};
use crate::tracker::Tracker;

/// One line of the camera path export.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraPoseRecord {
    pub frame: FrameId,
    pub position: [f32; 3],
}

#[derive(Debug, Clone)]
pub struct CameraPathIndex {
    buffer: GrowableBuffer,
    /// Scalar offset of each keyframe's pose.
    keyframes: Vec<usize>,
    epoch: Epoch,
}

impl CameraPathIndex {
    /// `nb_frames` poses of capacity, `initial_frames` allocated up front.
    pub fn new(nb_frames: usize, initial_frames: usize) -> Self {
        Self {
            buffer: GrowableBuffer::new(
                BufferKind::Poses,
                STRIDE * nb_frames,
                STRIDE * initial_frames,
            ),
            keyframes: Vec::new(),
            epoch: Epoch::default(),
        }
    }

    pub fn buffer(&self) -> &GrowableBuffer {
        &self.buffer
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of tracked frames with a pose.
    pub fn len(&self) -> usize {
        self.buffer.end() / STRIDE
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.end() == 0
    }

    /// Last frame with a pose.
    pub fn last_tracked_frame(&self) -> Option<FrameId> {
        self.len().checked_sub(1).map(FrameId)
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }

    /// Frame at which `keyframe` was promoted.
    pub fn index_kf(&self, keyframe: KeyframeId) -> Result<FrameId> {
        self.keyframes
            .get(keyframe.0)
            .map(|&offset| FrameId(offset / STRIDE))
            .ok_or(OrchestratorError::UnknownKeyframe { keyframe })
    }

    /// Check that [`CameraPathIndex::tick`] would fit, without writing.
    pub fn check_tick(&self) -> Result<()> {
        self.buffer.check_room(STRIDE)
    }

    /// Append the tracker's current position; records a keyframe on promotion.
    /// Returns the scalar range written.
    pub fn tick<T: Tracker + ?Sized>(
        &mut self,
        tracker: &T,
        epoch: Epoch,
    ) -> Result<std::ops::Range<usize>> {
        let pose = tracker.current_pose();
        let range = self.buffer.append(&pose.translation)?;
        if tracker.change_keyframe() {
            self.keyframes.push(range.start);
        }
        self.epoch = epoch;
        Ok(range)
    }

    /// Check that `keyframe` can be truncated to, without mutating anything.
    /// Returns the last tracked frame the truncation would produce.
    pub fn plan_reset(&self, keyframe: KeyframeId) -> Result<FrameId> {
        let frame = self
            .keyframes
            .get(keyframe.0)
            .map(|&offset| FrameId(offset / STRIDE))
            .ok_or_else(|| OrchestratorError::InvalidResetTarget {
                keyframe,
                reason: format!("only {} keyframes reached", self.keyframes.len()),
            })?;
        frame
            .prev()
            .ok_or_else(|| OrchestratorError::InvalidResetTarget {
                keyframe,
                reason: "keyframe anchors the first frame of the dataset".to_string(),
            })
    }

    /// Reset as if `keyframe` was never reached (not included).
    /// Returns the frame tracking resumes after.
    pub fn reset_kf(&mut self, keyframe: KeyframeId, epoch: Epoch) -> Result<FrameId> {
        let last_tracked = self.plan_reset(keyframe)?;
        let end = self.keyframes[keyframe.0];
        self.keyframes.truncate(keyframe.0);
        self.buffer.truncate(end);
        self.epoch = epoch;
        Ok(last_tracked)
    }

    /// Advance the epoch for a step that leaves the poses untouched.
    pub fn stamp(&mut self, epoch: Epoch) {
        self.epoch = epoch;
    }

    /// Positions of every tracked frame, in frame order.
    pub fn records(&self) -> Vec<CameraPoseRecord> {
        self.buffer
            .read()
            .chunks_exact(STRIDE)
            .enumerate()
            .map(|(i, p)| CameraPoseRecord {
                frame: FrameId(i),
                position: [p[0], p[1], p[2]],
            })
            .collect()
    }
}

/// Render records as `<index> <x> <y> <z> 0 0 0 1` lines (identity rotation placeholder).
pub fn format_camera_path(records: &[CameraPoseRecord]) -> String {
    records
        .iter()
        .map(|r| {
            let [x, y, z] = r.position;
            format!("{} {x} {y} {z} 0 0 0 1", r.frame.0)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubTracker;

    /// Track `frames` frames, promoting keyframes at the listed frame ids.
    fn path_with(frames: usize, keyframes: &[usize]) -> CameraPathIndex {
        let mut path = CameraPathIndex::new(16, 2);
        let mut tracker = StubTracker::default();
        for f in 0..frames {
            tracker.set_position([f as f32, 0.0, 2.0 * f as f32]);
            if keyframes.contains(&f) {
                tracker.set_keyframe(Vec::new());
            } else {
                tracker.clear_keyframe();
            }
            path.tick(&tracker, Epoch(f as u64 + 1)).unwrap();
        }
        path
    }

    #[test]
    fn tick_appends_one_pose_per_frame() {
        let path = path_with(10, &[0, 4, 8]);
        assert_eq!(path.len(), 10);
        assert_eq!(path.last_tracked_frame(), Some(FrameId(9)));
        assert_eq!(path.index_kf(KeyframeId(1)).unwrap(), FrameId(4));
        assert_eq!(path.index_kf(KeyframeId(2)).unwrap(), FrameId(8));
        assert!(matches!(
            path.index_kf(KeyframeId(3)),
            Err(OrchestratorError::UnknownKeyframe { .. })
        ));
    }

    #[test]
    fn reset_stops_just_before_keyframe() {
        let mut path = path_with(10, &[0, 4, 8]);
        assert_eq!(path.reset_kf(KeyframeId(1), Epoch(20)).unwrap(), FrameId(3));
        assert_eq!(path.len(), 4);
        assert_eq!(path.keyframe_count(), 1);
        assert_eq!(path.epoch(), Epoch(20));
    }

    #[test]
    fn first_keyframe_is_not_a_reset_target() {
        let mut path = path_with(3, &[0]);
        let err = path.reset_kf(KeyframeId(0), Epoch(9)).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidResetTarget { .. }));
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn export_lines_use_identity_rotation() {
        let path = path_with(2, &[0]);
        let dump = format_camera_path(&path.records());
        assert_eq!(dump, "0 0 0 0 0 0 0 1\n1 1 0 2 0 0 0 1");
    }

    #[test]
    fn exhausted_pose_capacity() {
        let mut path = CameraPathIndex::new(1, 1);
        let tracker = StubTracker::default();
        path.tick(&tracker, Epoch(1)).unwrap();
        let err = path.tick(&tracker, Epoch(2)).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ExhaustedCapacity {
                buffer: BufferKind::Poses,
                ..
            }
        ));
    }
}
