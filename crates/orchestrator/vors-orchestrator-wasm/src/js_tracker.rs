use js_sys::{Array, Float32Array, Function, Reflect};
use serde_wasm_bindgen as swb;
use wasm_bindgen::{JsCast, JsValue};

use vors_orchestrator::{
    CameraModel, FrameId, ImagePoint, KeyframeId, P3pEvaluation, PoseSummary, Tracker,
    TrackerError, TrackerErrorKind,
};

/// [`Tracker`] backed by a JS object.
///
/// The object exposes `init(cameraId)`, `track(frame, force)`,
/// `changeKeyframe()`, `currentPose()`, `keyframePoints()`,
/// `resetAt(baseFrame, lastTrackedFrame, keyframe)`,
/// `p3pVisualize(baseFrame, lastTrackedFrame, refPoints, keyPoints)` and
/// `chooseP3pInitial(candidate, baseFrame)`. Keyframe points and the pose are
/// copied out of JS after every call that can change them, since the JS side
/// may hand out views on memory it later reallocates.
pub struct JsTracker {
    target: JsValue,
    points: Vec<f32>,
    changed: bool,
    pose: PoseSummary,
}

impl JsTracker {
    pub fn new(target: JsValue) -> Result<Self, TrackerError> {
        if !target.is_object() {
            return Err(TrackerError::new(
                TrackerErrorKind::InvalidRequest,
                "tracker must be an object",
            ));
        }
        Ok(Self {
            target,
            points: Vec::new(),
            changed: false,
            pose: PoseSummary::default(),
        })
    }

    fn call(
        &self,
        name: &str,
        args: &[JsValue],
        kind: TrackerErrorKind,
    ) -> Result<JsValue, TrackerError> {
        let method = Reflect::get(&self.target, &JsValue::from_str(name))
            .ok()
            .and_then(|f| f.dyn_into::<Function>().ok())
            .ok_or_else(|| {
                TrackerError::new(
                    TrackerErrorKind::InvalidRequest,
                    format!("tracker has no method '{name}'"),
                )
            })?;
        let args: Array = args.iter().collect();
        method.apply(&self.target, &args).map_err(|err| {
            let message = err
                .as_string()
                .or_else(|| {
                    Reflect::get(&err, &JsValue::from_str("message"))
                        .ok()
                        .and_then(|m| m.as_string())
                })
                .unwrap_or_else(|| format!("{err:?}"));
            log::warn!("tracker.{name} threw: {message}");
            TrackerError::new(kind, format!("{name}: {message}"))
        })
    }

    /// Copy keyframe state and pose out of JS.
    fn refresh(&mut self) -> Result<(), TrackerError> {
        self.changed = self
            .call("changeKeyframe", &[], TrackerErrorKind::InvalidRequest)?
            .is_truthy();
        self.pose = pose_from(self.call("currentPose", &[], TrackerErrorKind::InvalidRequest)?)?;
        if self.changed {
            let points = self.call("keyframePoints", &[], TrackerErrorKind::InvalidRequest)?;
            self.points = Float32Array::new(&points).to_vec();
        }
        Ok(())
    }
}

fn pose_from(value: JsValue) -> Result<PoseSummary, TrackerError> {
    swb::from_value(value).map_err(|e| {
        TrackerError::new(TrackerErrorKind::MalformedFrame, format!("pose: {e}"))
    })
}

fn frame_arg(frame: FrameId) -> JsValue {
    JsValue::from_f64(frame.0 as f64)
}

fn points_arg(points: &[ImagePoint; 3]) -> JsValue {
    let flat: Vec<f32> = points.iter().flat_map(|&(u, v)| [u, v]).collect();
    Float32Array::from(flat.as_slice()).into()
}

fn index_from(value: &JsValue, what: &str) -> Result<usize, TrackerError> {
    value
        .as_f64()
        .filter(|n| *n >= 0.0 && n.fract() == 0.0)
        .map(|n| n as usize)
        .ok_or_else(|| {
            TrackerError::new(
                TrackerErrorKind::InvalidRequest,
                format!("{what} must be a non-negative integer"),
            )
        })
}

impl Tracker for JsTracker {
    fn init(&mut self, camera: CameraModel) -> Result<usize, TrackerError> {
        let nb_frames = self.call(
            "init",
            &[JsValue::from_str(camera.as_str())],
            TrackerErrorKind::MalformedFrame,
        )?;
        let nb_frames = index_from(&nb_frames, "frame count")?;
        self.refresh()?;
        Ok(nb_frames)
    }

    fn track(&mut self, frame: FrameId, force_keyframe: bool) -> Result<PoseSummary, TrackerError> {
        let pose = self.call(
            "track",
            &[frame_arg(frame), JsValue::from_bool(force_keyframe)],
            TrackerErrorKind::Divergence,
        )?;
        let pose = pose_from(pose)?;
        self.refresh()?;
        Ok(pose)
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
        self.call(
            "resetAt",
            &[
                frame_arg(base_frame),
                frame_arg(last_tracked_frame),
                JsValue::from_f64(keyframe.0 as f64),
            ],
            TrackerErrorKind::InvalidRequest,
        )?;
        self.refresh()
    }

    fn p3p_visualize(
        &mut self,
        base_frame: FrameId,
        last_tracked_frame: FrameId,
        ref_points: &[ImagePoint; 3],
        key_points: &[ImagePoint; 3],
    ) -> Result<P3pEvaluation, TrackerError> {
        let result = self.call(
            "p3pVisualize",
            &[
                frame_arg(base_frame),
                frame_arg(last_tracked_frame),
                points_arg(ref_points),
                points_arg(key_points),
            ],
            TrackerErrorKind::Divergence,
        )?;
        let malformed = |what: &str| {
            TrackerError::new(
                TrackerErrorKind::MalformedFrame,
                format!("p3pVisualize result: {what}"),
            )
        };
        let probabilities = Reflect::get(&result, &JsValue::from_str("probabilities"))
            .map_err(|_| malformed("missing probabilities"))?;
        let probabilities: Vec<f64> =
            swb::from_value(probabilities).map_err(|e| malformed(&e.to_string()))?;
        let hypotheses = Reflect::get(&result, &JsValue::from_str("hypotheses"))
            .map_err(|_| malformed("missing hypotheses"))?;
        if !Array::is_array(&hypotheses) {
            return Err(malformed("hypotheses must be an array"));
        }
        let hypotheses = Array::from(&hypotheses)
            .iter()
            .map(|points| Float32Array::new(&points).to_vec())
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
        let keyframe = self.call(
            "chooseP3pInitial",
            &[JsValue::from_f64(candidate as f64), frame_arg(base_frame)],
            TrackerErrorKind::InvalidRequest,
        )?;
        let keyframe = index_from(&keyframe, "keyframe id")?;
        self.refresh()?;
        Ok(KeyframeId(keyframe))
    }
}
