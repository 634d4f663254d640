//! Speculative relocalization candidates.
//!
//! After a tracking failure the operator picks three point correspondences
//! between a base keyframe and the latest one. The tracker evaluates P3P
//! hypotheses for them; the first [`MAX_CANDIDATES`] are stacked after the
//! committed point cloud so they can be displayed side by side, one per slot.
//! Committing a candidate throws the provisional sections away, rewinds the
//! latest keyframe and re-tracks it from the chosen initialization.

use serde::{Deserialize, Serialize};

use crate::buffer::{RenderEvent, Section};
use crate::error::{OrchestratorError, Result};
use crate::ids::{FrameId, KeyframeId};
use crate::tracker::{ImagePoint, Tracker};
use crate::tracking::{Timeline, TrackOutcome};

/// Display slots available to relocalization candidates.
pub const MAX_CANDIDATES: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelocalizationCandidate {
    /// Display slot, `1..=MAX_CANDIDATES`.
    pub slot: u8,
    pub section: Section,
    pub probability: f64,
}

/// Candidates being visualized, awaiting a commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingRelocalization {
    pub base: KeyframeId,
    pub restart: KeyframeId,
    /// Frame that promoted `restart`; the cursor while candidates are shown.
    pub frame: FrameId,
    /// Index 0 is "keep the current pose", index `i` is hypothesis `i`.
    pub probabilities: Vec<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct CandidateManager {
    slots: [Option<RelocalizationCandidate>; MAX_CANDIDATES],
    pending: Option<PendingRelocalization>,
}

impl CandidateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &[Option<RelocalizationCandidate>; MAX_CANDIDATES] {
        &self.slots
    }

    pub fn live(&self) -> impl Iterator<Item = &RelocalizationCandidate> {
        self.slots.iter().flatten()
    }

    pub fn pending(&self) -> Option<&PendingRelocalization> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Evaluate P3P hypotheses and stack the first [`MAX_CANDIDATES`] for display.
    /// Returns the probabilities, hypotheses without a slot included.
    pub fn visualize<T: Tracker + ?Sized>(
        &mut self,
        timeline: &mut Timeline,
        tracker: &mut T,
        base: KeyframeId,
        restart: KeyframeId,
        ref_points: &[ImagePoint; 3],
        key_points: &[ImagePoint; 3],
    ) -> Result<Vec<f64>> {
        if base >= restart {
            return Err(OrchestratorError::InvalidRange {
                base,
                target: restart,
            });
        }
        let last_tracked = timeline
            .last_tracked_frame()
            .ok_or(OrchestratorError::NotLoaded)?;
        let base_frame = timeline.camera_path().index_kf(base)?;
        if timeline.points().last_keyframe() != Some(restart) {
            return Err(OrchestratorError::InvalidResetTarget {
                keyframe: restart,
                reason: "not the latest keyframe".to_string(),
            });
        }
        let anchor = timeline.camera_path().index_kf(restart)?;
        if anchor != last_tracked {
            return Err(OrchestratorError::InvalidResetTarget {
                keyframe: restart,
                reason: format!("tracking moved on to {last_tracked} since {anchor}"),
            });
        }

        self.abandon(timeline)?;
        let evaluation = tracker
            .p3p_visualize(base_frame, last_tracked, ref_points, key_points)
            .map_err(|source| OrchestratorError::TrackerDivergence {
                frame: last_tracked,
                source,
            })?;

        let shown = evaluation
            .probabilities
            .len()
            .saturating_sub(1)
            .min(evaluation.hypotheses.len())
            .min(MAX_CANDIDATES);
        for (i, points) in evaluation.hypotheses.iter().take(shown).enumerate() {
            let slot = i + 1;
            let section = timeline.stack_candidate(points)?;
            debug_assert_eq!(timeline.points().section(restart.offset(slot)).ok(), Some(section));
            self.slots[i] = Some(RelocalizationCandidate {
                slot: slot as u8,
                section,
                probability: evaluation.probabilities[slot],
            });
            timeline.push_event(RenderEvent::Candidate {
                slot: slot as u8,
                section: Some(section),
            });
        }
        if evaluation.hypotheses.len() > shown {
            log::debug!(
                "{} relocalization hypotheses left without a display slot",
                evaluation.hypotheses.len() - shown
            );
        }

        self.pending = Some(PendingRelocalization {
            base,
            restart,
            frame: last_tracked,
            probabilities: evaluation.probabilities.clone(),
        });
        timeline.stats_mut().visualizations += 1;
        log::info!(
            "visualizing {shown} relocalization candidates for {restart} from {base}"
        );
        Ok(evaluation.probabilities)
    }

    /// Commit `candidate` (0 keeps the current pose) and re-track the restart keyframe from it.
    pub fn choose_initial<T: Tracker + ?Sized>(
        &mut self,
        timeline: &mut Timeline,
        tracker: &mut T,
        candidate: usize,
        base: KeyframeId,
    ) -> Result<TrackOutcome> {
        let (base_frame, resume_after) = {
            let pending = self
                .pending
                .as_ref()
                .ok_or(OrchestratorError::NoPendingRelocalization)?;
            if candidate >= pending.probabilities.len() {
                return Err(OrchestratorError::UnknownCandidate {
                    candidate,
                    available: pending.probabilities.len(),
                });
            }
            if base != pending.base {
                return Err(OrchestratorError::InvalidRange {
                    base,
                    target: pending.restart,
                });
            }
            let resume_after = timeline.plan_rewind(pending.restart)?;
            (timeline.camera_path().index_kf(base)?, resume_after)
        };
        let pending = self
            .pending
            .take()
            .ok_or(OrchestratorError::NoPendingRelocalization)?;

        // Undo the provisional advance: the restart keyframe is tracked again below.
        let undone = pending.frame.prev();
        debug_assert_eq!(undone, Some(resume_after));

        timeline.discard_candidates()?;
        let rewound = timeline.rewind(pending.restart)?;
        debug_assert_eq!(rewound, resume_after);

        let promoted = tracker
            .choose_p3p_initial(candidate, base_frame)
            .map_err(|source| OrchestratorError::TrackerDivergence {
                frame: pending.frame,
                source,
            })?;
        if promoted != pending.restart {
            log::warn!(
                "tracker will promote {promoted}, expected {} after commit",
                pending.restart
            );
        }

        let outcome = timeline.step(tracker, true)?;
        self.clear_slots(timeline);
        timeline.stats_mut().commits += 1;
        log::info!(
            "committed relocalization candidate {candidate} for {} from {base}",
            pending.restart
        );
        Ok(outcome)
    }

    /// Supersede the current candidates, if any: drop their points and free their slots.
    pub fn abandon(&mut self, timeline: &mut Timeline) -> Result<()> {
        timeline.discard_candidates()?;
        for slot in self.slots.iter_mut() {
            if let Some(candidate) = slot.take() {
                timeline.push_event(RenderEvent::Candidate {
                    slot: candidate.slot,
                    section: None,
                });
            }
        }
        self.pending = None;
        Ok(())
    }

    fn clear_slots(&mut self, timeline: &mut Timeline) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            *slot = None;
            timeline.push_event(RenderEvent::Candidate {
                slot: (i + 1) as u8,
                section: None,
            });
        }
    }
}
