use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vors_orchestrator::{
    CameraModel, FrameId, ImagePoint, KeyframeId, P3pEvaluation, PoseSummary, Tracker,
    TrackerError, TrackerErrorKind,
};

fn default_forced_scalars() -> usize {
    3
}

fn default_fps() -> f64 {
    30.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyframeScript {
    pub frame: usize,
    /// Flat scalars contributed to the point cloud.
    pub scalars: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HypothesisScript {
    pub probability: f64,
    pub scalars: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct P3pScript {
    /// Probability of keeping the current pose.
    pub keep: f64,
    #[serde(default)]
    pub hypotheses: Vec<HypothesisScript>,
}

/// A dataset as seen by the orchestration layer: frame count, where keyframes
/// are promoted and how many points each one carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerScript {
    pub camera: CameraModel,
    pub nb_frames: usize,
    pub keyframes: Vec<KeyframeScript>,
    /// Scalars of a keyframe promoted by `force_keyframe` outside the schedule.
    #[serde(default = "default_forced_scalars")]
    pub forced_scalars: usize,
    /// Camera translation per frame.
    #[serde(default)]
    pub velocity: [f32; 3],
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub p3p: P3pScript,
    /// Frame whose tracking diverges.
    #[serde(default)]
    pub fail_at: Option<usize>,
}

/// Tracker calls, recorded in order for assertions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TrackerCall {
    Init(CameraModel),
    Track { frame: FrameId, force: bool },
    ResetAt { base_frame: FrameId, last_tracked_frame: FrameId, keyframe: KeyframeId },
    P3pVisualize { base_frame: FrameId, last_tracked_frame: FrameId },
    ChooseP3pInitial { candidate: usize, base_frame: FrameId },
}

/// Deterministic [`Tracker`]: everything it reports is a function of the frame id,
/// so re-tracking a frame after a rewind reproduces the same output.
#[derive(Debug, Clone)]
pub struct ScriptedTracker {
    script: TrackerScript,
    schedule: BTreeMap<usize, usize>,
    calls: Vec<TrackerCall>,
    points: Vec<f32>,
    changed: bool,
    pose: PoseSummary,
    keyframes: usize,
}

impl ScriptedTracker {
    pub fn new(script: TrackerScript) -> Self {
        let schedule = script
            .keyframes
            .iter()
            .map(|kf| (kf.frame, kf.scalars))
            .collect();
        Self {
            script,
            schedule,
            calls: Vec::new(),
            points: Vec::new(),
            changed: false,
            pose: PoseSummary::default(),
            keyframes: 0,
        }
    }

    pub fn calls(&self) -> &[TrackerCall] {
        &self.calls
    }

    fn visit(&mut self, frame: FrameId, force: bool) {
        let [vx, vy, vz] = self.script.velocity;
        let t = frame.0 as f32;
        self.pose = PoseSummary {
            timestamp: frame.0 as f64 / self.script.fps,
            translation: [vx * t, vy * t, vz * t],
            rotation: [0.0, 0.0, 0.0, 1.0],
        };
        let scalars = match self.schedule.get(&frame.0) {
            Some(&n) => Some(n),
            None if force => Some(self.script.forced_scalars),
            None => None,
        };
        self.changed = scalars.is_some();
        if let Some(n) = scalars {
            self.points = cloud(frame.0, n);
            self.keyframes += 1;
        }
    }
}

/// Deterministic points for a keyframe at `frame`.
fn cloud(frame: usize, scalars: usize) -> Vec<f32> {
    (0..scalars)
        .map(|i| frame as f32 + i as f32 / scalars.max(1) as f32)
        .collect()
}

impl Tracker for ScriptedTracker {
    fn init(&mut self, camera: CameraModel) -> Result<usize, TrackerError> {
        self.calls.push(TrackerCall::Init(camera));
        if camera != self.script.camera {
            return Err(TrackerError::new(
                TrackerErrorKind::InvalidRequest,
                format!("dataset was recorded with {}, not {camera}", self.script.camera),
            ));
        }
        self.keyframes = 0;
        self.visit(FrameId(0), true);
        Ok(self.script.nb_frames)
    }

    fn track(&mut self, frame: FrameId, force_keyframe: bool) -> Result<PoseSummary, TrackerError> {
        self.calls.push(TrackerCall::Track {
            frame,
            force: force_keyframe,
        });
        if frame.0 >= self.script.nb_frames {
            return Err(TrackerError::new(
                TrackerErrorKind::MalformedFrame,
                format!("{frame} is past the end of the dataset"),
            ));
        }
        if self.script.fail_at == Some(frame.0) {
            return Err(TrackerError::new(
                TrackerErrorKind::Divergence,
                format!("photometric residual diverged at {frame}"),
            ));
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
        self.calls.push(TrackerCall::ResetAt {
            base_frame,
            last_tracked_frame,
            keyframe,
        });
        if base_frame > last_tracked_frame || last_tracked_frame.0 >= self.script.nb_frames {
            return Err(TrackerError::new(
                TrackerErrorKind::InvalidRequest,
                format!("cannot reset from {base_frame} with history up to {last_tracked_frame}"),
            ));
        }
        self.keyframes = keyframe.0;
        self.changed = false;
        Ok(())
    }

    fn p3p_visualize(
        &mut self,
        base_frame: FrameId,
        last_tracked_frame: FrameId,
        _ref_points: &[ImagePoint; 3],
        _key_points: &[ImagePoint; 3],
    ) -> Result<P3pEvaluation, TrackerError> {
        self.calls.push(TrackerCall::P3pVisualize {
            base_frame,
            last_tracked_frame,
        });
        let p3p = &self.script.p3p;
        let mut probabilities = vec![p3p.keep];
        probabilities.extend(p3p.hypotheses.iter().map(|h| h.probability));
        let hypotheses = p3p
            .hypotheses
            .iter()
            .enumerate()
            .map(|(i, h)| cloud(last_tracked_frame.0 * 10 + i, h.scalars))
            .collect();
        Ok(P3pEvaluation {
            probabilities,
            hypotheses,
        })
    }

    fn choose_p3p_initial(
        &mut self,
        candidate: usize,
        base_frame: FrameId,
    ) -> Result<KeyframeId, TrackerError> {
        self.calls.push(TrackerCall::ChooseP3pInitial {
            candidate,
            base_frame,
        });
        if candidate > self.script.p3p.hypotheses.len() {
            return Err(TrackerError::new(
                TrackerErrorKind::InvalidRequest,
                format!("no hypothesis {candidate}"),
            ));
        }
        self.keyframes = self.keyframes.saturating_sub(1);
        self.changed = false;
        Ok(KeyframeId(self.keyframes))
    }
}
