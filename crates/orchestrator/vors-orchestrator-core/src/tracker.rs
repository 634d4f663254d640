//! The tracker capability consumed by the orchestration layer.
//!
//! The tracking algorithm itself (photometric alignment, P3P solving, keyframe
//! selection) lives behind [`Tracker`]. The orchestration layer only drives it
//! frame by frame and copies what it exposes into the session buffers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::ids::{FrameId, KeyframeId};

/// Camera calibrations known to the tracker (TUM RGB-D and ICL-NUIM datasets).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraModel {
    Fr1,
    Fr2,
    Fr3,
    Icl,
}

impl CameraModel {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraModel::Fr1 => "fr1",
            CameraModel::Fr2 => "fr2",
            CameraModel::Fr3 => "fr3",
            CameraModel::Icl => "icl",
        }
    }
}

impl FromStr for CameraModel {
    type Err = OrchestratorError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        match id {
            "fr1" => Ok(CameraModel::Fr1),
            "fr2" => Ok(CameraModel::Fr2),
            "fr3" => Ok(CameraModel::Fr3),
            "icl" => Ok(CameraModel::Icl),
            _ => Err(OrchestratorError::UnknownCamera { id: id.to_string() }),
        }
    }
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel coordinates `(u, v)` picked by the operator on a keyframe image.
pub type ImagePoint = (f32, f32);

/// Camera pose reported by the tracker after a frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseSummary {
    pub timestamp: f64,
    pub translation: [f32; 3],
    /// Unit quaternion `[x, y, z, w]`.
    pub rotation: [f32; 4],
}

/// TUM trajectory order: `timestamp tx ty tz qx qy qz qw`.
impl fmt::Display for PoseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [tx, ty, tz] = self.translation;
        let [qx, qy, qz, qw] = self.rotation;
        write!(f, "{} {tx} {ty} {tz} {qx} {qy} {qz} {qw}", self.timestamp)
    }
}

/// Result of evaluating P3P relocalization hypotheses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct P3pEvaluation {
    /// One probability per hypothesis plus a leading slot for "keep current pose".
    pub probabilities: Vec<f64>,
    /// Point cloud (flat xyz scalars) seen from each hypothesis, in hypothesis order.
    /// `hypotheses[i]` belongs to `probabilities[i + 1]`.
    pub hypotheses: Vec<Vec<f32>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerErrorKind {
    /// Frame could not be decoded or is missing from the dataset.
    MalformedFrame,
    /// Pose estimation failed to converge.
    Divergence,
    /// Reset or relocalization request the tracker cannot honour.
    InvalidRequest,
}

/// Error surfaced by a [`Tracker`] implementation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct TrackerError {
    pub kind: TrackerErrorKind,
    pub message: String,
}

impl TrackerError {
    pub fn new(kind: TrackerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Incremental visual odometry tracker.
///
/// Calls are strictly sequential. Any call taking `&mut self` may reallocate
/// the tracker's internal memory, which is why the session re-reads
/// [`Tracker::keyframe_points`] and [`Tracker::current_pose`] after each call
/// instead of holding on to them.
pub trait Tracker {
    /// Initialize from the first frame of the loaded dataset. Returns the number of frames.
    fn init(&mut self, camera: CameraModel) -> Result<usize, TrackerError>;

    /// Track `frame`, optionally forcing it to become a keyframe.
    fn track(&mut self, frame: FrameId, force_keyframe: bool) -> Result<PoseSummary, TrackerError>;

    /// Whether the last `init`/`track`/reset promoted a new keyframe.
    fn change_keyframe(&self) -> bool;

    /// Pose of the last tracked frame.
    fn current_pose(&self) -> PoseSummary;

    /// Points (flat xyz scalars) of the current keyframe.
    ///
    /// The length need not be a multiple of 3. Sections are addressed in
    /// scalars and stored as given, so a ragged payload shifts the xyz
    /// alignment of later sections; consumers read each section from its own
    /// start rather than by global point index.
    fn keyframe_points(&self) -> &[f32];

    /// Restart from `base_frame`, keeping history up to `last_tracked_frame`
    /// and keyframes strictly before `keyframe`.
    fn reset_at(
        &mut self,
        base_frame: FrameId,
        last_tracked_frame: FrameId,
        keyframe: KeyframeId,
    ) -> Result<(), TrackerError>;

    /// Evaluate P3P relocalization hypotheses for `last_tracked_frame`, anchored
    /// on `base_frame`, from three point correspondences.
    fn p3p_visualize(
        &mut self,
        base_frame: FrameId,
        last_tracked_frame: FrameId,
        ref_points: &[ImagePoint; 3],
        key_points: &[ImagePoint; 3],
    ) -> Result<P3pEvaluation, TrackerError>;

    /// Re-initialize from hypothesis `candidate` (0 keeps the current pose).
    /// Returns the keyframe id the next forced track will promote.
    fn choose_p3p_initial(
        &mut self,
        candidate: usize,
        base_frame: FrameId,
    ) -> Result<KeyframeId, TrackerError>;
}
