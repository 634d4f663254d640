use std::collections::HashMap;

use crate::ids::{FrameId, KeyframeId};
use crate::tracker::{
    CameraModel, ImagePoint, P3pEvaluation, PoseSummary, Tracker, TrackerError, TrackerErrorKind,
};

/// Hand-driven tracker for unit tests.
///
/// The index tests set the keyframe state directly; session tests describe a
/// dataset with [`StubTracker::with_frames`] and a keyframe schedule.
#[derive(Debug, Default)]
pub struct StubTracker {
    pub nb_frames: usize,
    /// Points promoted when the frame is tracked (frame 0 on `init`).
    pub schedule: HashMap<usize, Vec<f32>>,
    pub evaluation: P3pEvaluation,
    pub fail_at: Option<usize>,
    /// `reset_at` arguments, in call order.
    pub resets: Vec<(FrameId, FrameId, KeyframeId)>,
    pub chosen: Vec<(usize, FrameId)>,
    points: Vec<f32>,
    changed: bool,
    pose: PoseSummary,
    keyframes: usize,
}

impl StubTracker {
    pub fn with_frames(nb_frames: usize, schedule: &[(usize, usize)]) -> Self {
        Self {
            nb_frames,
            schedule: schedule
                .iter()
                .map(|&(frame, len)| (frame, vec![frame as f32; len]))
                .collect(),
            ..Self::default()
        }
    }

    pub fn set_keyframe(&mut self, points: Vec<f32>) {
        self.points = points;
        self.changed = true;
    }

    pub fn clear_keyframe(&mut self) {
        self.changed = false;
    }

    pub fn set_position(&mut self, position: [f32; 3]) {
        self.pose.translation = position;
    }

    fn visit(&mut self, frame: FrameId, force: bool) {
        self.pose = PoseSummary {
            timestamp: frame.0 as f64 / 30.0,
            translation: [frame.0 as f32, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
        };
        match self.schedule.get(&frame.0) {
            Some(points) => self.set_keyframe(points.clone()),
            None if force => self.set_keyframe(vec![frame.0 as f32; 3]),
            None => self.clear_keyframe(),
        }
        if self.changed {
            self.keyframes += 1;
        }
    }
}

impl Tracker for StubTracker {
    fn init(&mut self, _camera: CameraModel) -> Result<usize, TrackerError> {
        self.keyframes = 0;
        self.visit(FrameId(0), true);
        Ok(self.nb_frames)
    }

    fn track(&mut self, frame: FrameId, force_keyframe: bool) -> Result<PoseSummary, TrackerError> {
        if self.fail_at == Some(frame.0) {
            return Err(TrackerError::new(TrackerErrorKind::Divergence, "scripted failure"));
        }
        self.visit(frame, force_keyframe);
        Ok(self.pose)
    }

    fn change_keyframe(&self) -> bool {
        self.changed
    }

    fn current_pose(&self) -> PoseSummary {
        self.pose
    }

    fn keyframe_points(&self) -> &[f32] {
        &self.points
    }

    fn reset_at(
        &mut self,
        base_frame: FrameId,
        last_tracked_frame: FrameId,
        keyframe: KeyframeId,
    ) -> Result<(), TrackerError> {
        self.resets.push((base_frame, last_tracked_frame, keyframe));
        self.keyframes = keyframe.0;
        self.changed = false;
        Ok(())
    }

    fn p3p_visualize(
        &mut self,
        _base_frame: FrameId,
        _last_tracked_frame: FrameId,
        _ref_points: &[ImagePoint; 3],
        _key_points: &[ImagePoint; 3],
    ) -> Result<P3pEvaluation, TrackerError> {
        Ok(self.evaluation.clone())
    }

    fn choose_p3p_initial(
        &mut self,
        candidate: usize,
        base_frame: FrameId,
    ) -> Result<KeyframeId, TrackerError> {
        self.chosen.push((candidate, base_frame));
        self.keyframes = self.keyframes.saturating_sub(1);
        self.changed = false;
        Ok(KeyframeId(self.keyframes))
    }
}
