//! Truncate-then-retrack protocol for manual restarts.

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::ids::{FrameId, KeyframeId};
use crate::tracker::Tracker;
use crate::tracking::{Timeline, TrackOutcome};

/// A validated restart, resolved against the indices before anything is mutated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPlan {
    pub base: KeyframeId,
    pub target: KeyframeId,
    pub base_frame: FrameId,
    /// Cursor before the restart.
    pub last_tracked: FrameId,
    /// Cursor after truncation; tracking resumes on the next frame.
    pub resume_after: FrameId,
}

impl RestartPlan {
    /// Resolve `base` and `target` and check that the truncation is possible.
    pub fn resolve(timeline: &Timeline, base: KeyframeId, target: KeyframeId) -> Result<Self> {
        if base >= target {
            return Err(OrchestratorError::InvalidRange { base, target });
        }
        let last_tracked = timeline
            .last_tracked_frame()
            .ok_or(OrchestratorError::NotLoaded)?;
        let base_frame = timeline.camera_path().index_kf(base)?;
        let resume_after = timeline.plan_rewind(target)?;
        Ok(Self {
            base,
            target,
            base_frame,
            last_tracked,
            resume_after,
        })
    }
}

/// Rewind both indices to just before `plan.target`, reset the tracker there
/// and force-track the next frame so the target keyframe is promoted again.
pub fn restart<T: Tracker + ?Sized>(
    timeline: &mut Timeline,
    tracker: &mut T,
    plan: RestartPlan,
) -> Result<TrackOutcome> {
    timeline.ensure_lockstep()?;
    let resume_after = timeline.rewind(plan.target)?;
    debug_assert_eq!(resume_after, plan.resume_after);

    tracker
        .reset_at(plan.base_frame, resume_after, plan.target)
        .map_err(|source| OrchestratorError::TrackerDivergence {
            frame: resume_after,
            source,
        })?;
    log::info!(
        "restart from {} ({}) at {}: {} -> {}",
        plan.base,
        plan.base_frame,
        plan.target,
        plan.last_tracked,
        resume_after
    );

    let outcome = timeline.step(tracker, true)?;
    timeline.stats_mut().restarts += 1;
    Ok(outcome)
}
