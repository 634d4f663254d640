//! Frame tracking state machine and the tick protocol shared by every command.
//!
//! A [`Timeline`] owns both indices and advances them in a fixed order: the
//! tracker first, then the point cloud, then the camera path. Each mutating
//! step stamps both indices with the same [`Epoch`]; reads that combine the two
//! indices go through [`Timeline::ensure_lockstep`].

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferKind, GrowableBuffer, RenderEvent, RenderLog, Section, ViewToken};
use crate::camera_path::CameraPathIndex;
use crate::config::SessionConfig;
use crate::diagnostics::{DiagnosticsCfg, SessionStats};
use crate::error::{OrchestratorError, Result};
use crate::ids::{Epoch, FrameId, KeyframeId};
use crate::point_cloud::PointSectionIndex;
use crate::tracker::{PoseSummary, Tracker};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// No dataset loaded.
    #[default]
    Idle,
    /// Dataset loaded, first frame tracked.
    Ready,
    Tracking,
    /// Last frame of the dataset tracked; `track` is a no-op.
    Exhausted,
    /// A fatal error was raised; the dataset must be loaded again.
    Terminated,
}

impl TrackingState {
    pub(crate) fn after(outcome: &TrackOutcome) -> Self {
        if outcome.more_frames {
            TrackingState::Tracking
        } else {
            TrackingState::Exhausted
        }
    }
}

/// What one `track` call did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackOutcome {
    pub frame: FrameId,
    pub more_frames: bool,
    pub new_keyframe: bool,
    /// `None` when nothing was tracked.
    pub pose: Option<PoseSummary>,
}

impl TrackOutcome {
    /// Outcome of a poll that tracked nothing; `frame` is the unchanged cursor.
    pub fn idle(frame: FrameId) -> Self {
        Self {
            frame,
            more_frames: false,
            new_keyframe: false,
            pose: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    points: PointSectionIndex,
    path: CameraPathIndex,
    nb_frames: usize,
    events: RenderLog,
    stats: SessionStats,
    diagnostics: DiagnosticsCfg,
}

impl Timeline {
    pub fn new(config: &SessionConfig, nb_frames: usize) -> Self {
        Self {
            points: PointSectionIndex::new(config.point_capacity(), config.initial_point_scalars()),
            path: CameraPathIndex::new(config.camera_path_nb_frames, config.initial_camera_frames()),
            nb_frames,
            events: RenderLog::new(),
            stats: SessionStats::default(),
            diagnostics: config.diagnostics.clone(),
        }
    }

    pub fn points(&self) -> &PointSectionIndex {
        &self.points
    }

    pub fn camera_path(&self) -> &CameraPathIndex {
        &self.path
    }

    pub fn nb_frames(&self) -> usize {
        self.nb_frames
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    pub fn events(&self) -> &RenderLog {
        &self.events
    }

    #[cfg(test)]
    pub(crate) fn points_mut(&mut self) -> &mut PointSectionIndex {
        &mut self.points
    }

    pub(crate) fn push_event(&mut self, event: RenderEvent) {
        self.events.push(event);
    }

    pub(crate) fn take_events(&mut self) -> Vec<RenderEvent> {
        self.events.drain()
    }

    /// The cursor: last frame with a pose.
    pub fn last_tracked_frame(&self) -> Option<FrameId> {
        self.path.last_tracked_frame()
    }

    /// Frame ids are zero-based, so frames remain while `last + 1 < nb_frames`.
    pub fn more_frames(&self) -> bool {
        match self.last_tracked_frame() {
            Some(last) => last.0 + 1 < self.nb_frames,
            None => self.nb_frames > 0,
        }
    }

    /// Common epoch of both indices.
    pub fn ensure_lockstep(&self) -> Result<Epoch> {
        let (points, poses) = (self.points.epoch(), self.path.epoch());
        if points != poses {
            return Err(OrchestratorError::EpochMismatch { points, poses });
        }
        Ok(points)
    }

    /// Track the frame after the cursor and copy the tracker's output into both indices.
    pub(crate) fn step<T: Tracker + ?Sized>(
        &mut self,
        tracker: &mut T,
        force_keyframe: bool,
    ) -> Result<TrackOutcome> {
        self.ensure_lockstep()?;
        let frame = self.last_tracked_frame().map_or(FrameId(0), FrameId::next);
        let pose = tracker
            .track(frame, force_keyframe)
            .map_err(|source| OrchestratorError::TrackerDivergence { frame, source })?;
        let new_keyframe = self.record_tick(&*tracker)?;
        Ok(TrackOutcome {
            frame,
            more_frames: self.more_frames(),
            new_keyframe,
            pose: Some(pose),
        })
    }

    /// Copy the tracker's state after a call into both indices.
    /// Returns whether a keyframe was promoted.
    ///
    /// Capacity is checked on both indices before either is written, so a
    /// failed tick leaves the timeline as it was.
    pub(crate) fn record_tick<T: Tracker + ?Sized>(&mut self, tracker: &T) -> Result<bool> {
        let epoch = self.ensure_lockstep()?.next();
        self.points.check_tick(tracker)?;
        self.path.check_tick()?;
        let points_before = self.points.buffer().acquire();
        let poses_before = self.path.buffer().acquire();
        let old_end = self.points.end_valid();

        let new_end = self.points.tick(tracker, epoch)?;
        let poses = self.path.tick(tracker, epoch)?;

        publish(
            &mut self.events,
            &mut self.stats,
            &self.diagnostics,
            self.points.buffer(),
            &points_before,
            old_end..new_end,
        );
        publish(
            &mut self.events,
            &mut self.stats,
            &self.diagnostics,
            self.path.buffer(),
            &poses_before,
            poses,
        );

        let new_keyframe = tracker.change_keyframe();
        self.stats.ticks += 1;
        if new_keyframe {
            self.stats.keyframes += 1;
        }
        log::debug!(
            "tick {:?}: end_valid {} -> {}, keyframe {}",
            self.last_tracked_frame(),
            old_end,
            new_end,
            new_keyframe
        );
        Ok(new_keyframe)
    }

    /// Validate a rewind to just before `keyframe` without touching anything.
    /// Returns the frame tracking would resume after.
    pub(crate) fn plan_rewind(&self, keyframe: KeyframeId) -> Result<FrameId> {
        self.points.plan_reset(keyframe)?;
        self.path.plan_reset(keyframe)
    }

    /// Truncate both indices as if `keyframe` was never reached.
    pub(crate) fn rewind(&mut self, keyframe: KeyframeId) -> Result<FrameId> {
        self.plan_rewind(keyframe)?;
        let epoch = self.ensure_lockstep()?.next();
        let end = self.points.reset_kf(keyframe, epoch)?;
        let resume_after = self.path.reset_kf(keyframe, epoch)?;
        self.events.push(RenderEvent::Extent {
            buffer: BufferKind::Points,
            end,
        });
        self.events.push(RenderEvent::Extent {
            buffer: BufferKind::Poses,
            end: self.path.buffer().end(),
        });
        Ok(resume_after)
    }

    /// Stack a relocalization candidate after the committed point sections.
    pub(crate) fn stack_candidate(&mut self, points: &[f32]) -> Result<Section> {
        let epoch = self.ensure_lockstep()?.next();
        let before = self.points.buffer().acquire();
        let section = self.points.append_provisional(points, epoch)?;
        self.path.stamp(epoch);
        publish(
            &mut self.events,
            &mut self.stats,
            &self.diagnostics,
            self.points.buffer(),
            &before,
            section.range(),
        );
        Ok(section)
    }

    /// Drop every stacked candidate.
    pub(crate) fn discard_candidates(&mut self) -> Result<()> {
        if self.points.provisional_count() == 0 {
            return Ok(());
        }
        let epoch = self.ensure_lockstep()?.next();
        let dropped = self.points.discard_provisional(epoch);
        self.path.stamp(epoch);
        log::debug!("discarded candidate points {:?}", dropped);
        self.events.push(RenderEvent::Extent {
            buffer: BufferKind::Points,
            end: self.points.end_valid(),
        });
        Ok(())
    }
}

/// Emit a rebind when the allocation moved, then the incremental dirty range.
fn publish(
    events: &mut RenderLog,
    stats: &mut SessionStats,
    diagnostics: &DiagnosticsCfg,
    buffer: &GrowableBuffer,
    before: &ViewToken,
    range: Range<usize>,
) {
    let after = buffer.acquire();
    if after.moved_since(before) {
        stats.reallocations += 1;
        events.push(RenderEvent::Rebind {
            buffer: buffer.kind(),
            generation: after.generation,
            allocated: buffer.allocated(),
        });
    }
    if diagnostics.enabled && diagnostics.log_dirty_ranges && !range.is_empty() {
        log::debug!("{:?} dirty {:?}", buffer.kind(), range);
    }
    events.dirty(buffer.kind(), range);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubTracker;
    use crate::tracker::CameraModel;

    fn config(points: usize, frames: usize) -> SessionConfig {
        SessionConfig {
            nb_particles: points,
            camera_path_nb_frames: frames,
            initial_particles: 1,
            initial_camera_frames: frames,
            ..SessionConfig::default()
        }
    }

    fn loaded(tracker: &mut StubTracker, cfg: &SessionConfig) -> Timeline {
        let nb_frames = tracker.init(CameraModel::Fr1).unwrap();
        let mut timeline = Timeline::new(cfg, nb_frames);
        timeline.record_tick(&*tracker).unwrap();
        timeline
    }

    #[test]
    fn step_advances_cursor_and_reports_dirty_ranges() {
        let mut tracker = StubTracker::with_frames(3, &[(0, 3), (2, 6)]);
        let mut timeline = loaded(&mut tracker, &config(10, 10));
        timeline.take_events();

        let outcome = timeline.step(&mut tracker, false).unwrap();
        assert_eq!(outcome.frame, FrameId(1));
        assert!(outcome.more_frames);
        assert!(!outcome.new_keyframe);
        assert_eq!(
            timeline.take_events(),
            vec![RenderEvent::Dirty {
                buffer: BufferKind::Poses,
                start: 3,
                end: 6
            }]
        );

        let outcome = timeline.step(&mut tracker, false).unwrap();
        assert!(outcome.new_keyframe);
        assert!(!outcome.more_frames);
        assert_eq!(timeline.points().end_valid(), 9);
        assert_eq!(timeline.stats().keyframes, 2);
    }

    #[test]
    fn growth_emits_rebind_before_dirty() {
        let mut tracker = StubTracker::with_frames(4, &[(0, 3), (1, 6)]);
        let mut timeline = loaded(&mut tracker, &config(10, 10));
        timeline.take_events();

        timeline.step(&mut tracker, false).unwrap();
        let events = timeline.take_events();
        assert!(matches!(
            events[0],
            RenderEvent::Rebind {
                buffer: BufferKind::Points,
                ..
            }
        ));
        assert_eq!(
            events[1],
            RenderEvent::Dirty {
                buffer: BufferKind::Points,
                start: 3,
                end: 9
            }
        );
        assert!(timeline.stats().reallocations >= 1);
    }

    #[test]
    fn tracker_failure_is_divergence() {
        let mut tracker = StubTracker::with_frames(4, &[(0, 3)]);
        tracker.fail_at = Some(1);
        let mut timeline = loaded(&mut tracker, &config(10, 10));
        let err = timeline.step(&mut tracker, false).unwrap_err();
        assert!(
            matches!(err, OrchestratorError::TrackerDivergence { frame, .. } if frame == FrameId(1))
        );
        assert_eq!(timeline.last_tracked_frame(), Some(FrameId(0)));
    }

    #[test]
    fn rewind_truncates_both_indices_in_lockstep() {
        let mut tracker = StubTracker::with_frames(10, &[(0, 6), (4, 3), (8, 1)]);
        let mut timeline = loaded(&mut tracker, &config(10, 10));
        for _ in 1..10 {
            timeline.step(&mut tracker, false).unwrap();
        }
        let epoch = timeline.ensure_lockstep().unwrap();
        timeline.take_events();

        assert_eq!(timeline.rewind(KeyframeId(1)).unwrap(), FrameId(3));
        assert_eq!(timeline.points().end_valid(), 6);
        assert_eq!(timeline.ensure_lockstep().unwrap(), epoch.next());
        assert_eq!(
            timeline.take_events(),
            vec![
                RenderEvent::Extent {
                    buffer: BufferKind::Points,
                    end: 6
                },
                RenderEvent::Extent {
                    buffer: BufferKind::Poses,
                    end: 12
                },
            ]
        );
    }

    #[test]
    fn full_pose_buffer_leaves_points_untouched() {
        let mut tracker = StubTracker::with_frames(4, &[(0, 3), (2, 30)]);
        let mut timeline = loaded(&mut tracker, &config(100, 2));
        timeline.step(&mut tracker, false).unwrap();
        let epoch = timeline.ensure_lockstep().unwrap();
        let allocation = timeline.points().buffer().allocation();
        timeline.take_events();

        let err = timeline.step(&mut tracker, false).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ExhaustedCapacity {
                buffer: BufferKind::Poses,
                ..
            }
        ));
        assert_eq!(timeline.points().end_valid(), 3);
        assert_eq!(timeline.points().keyframe_count(), 1);
        assert_eq!(timeline.camera_path().keyframe_count(), 1);
        assert_eq!(timeline.points().buffer().allocation(), allocation);
        assert_eq!(timeline.ensure_lockstep().unwrap(), epoch);
        assert_eq!(timeline.last_tracked_frame(), Some(FrameId(1)));
        assert!(timeline.take_events().is_empty());
    }

    #[test]
    fn full_point_buffer_leaves_poses_untouched() {
        let mut tracker = StubTracker::with_frames(4, &[(0, 3), (1, 6)]);
        let mut timeline = loaded(&mut tracker, &config(2, 10));
        let epoch = timeline.ensure_lockstep().unwrap();
        timeline.take_events();

        let err = timeline.step(&mut tracker, false).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ExhaustedCapacity {
                buffer: BufferKind::Points,
                requested: 9,
                capacity: 6
            }
        ));
        assert_eq!(timeline.camera_path().len(), 1);
        assert_eq!(timeline.ensure_lockstep().unwrap(), epoch);
        assert!(timeline.take_events().is_empty());
    }

    #[test]
    fn diverged_epochs_refuse_every_step() {
        let mut tracker = StubTracker::with_frames(10, &[(0, 6), (4, 3)]);
        let mut timeline = loaded(&mut tracker, &config(10, 10));
        for _ in 1..6 {
            timeline.step(&mut tracker, false).unwrap();
        }
        timeline.points_mut().stamp(Epoch(99));
        let end_valid = timeline.points().end_valid();

        let mismatch = |err: OrchestratorError| {
            matches!(err, OrchestratorError::EpochMismatch { points, .. } if points == Epoch(99))
        };
        assert!(mismatch(timeline.ensure_lockstep().unwrap_err()));
        assert!(mismatch(timeline.step(&mut tracker, false).unwrap_err()));
        assert!(mismatch(timeline.rewind(KeyframeId(1)).unwrap_err()));
        assert!(mismatch(timeline.stack_candidate(&[1.0; 3]).unwrap_err()));
        assert_eq!(timeline.points().end_valid(), end_valid);
        assert_eq!(timeline.last_tracked_frame(), Some(FrameId(5)));
    }

    #[test]
    fn candidates_keep_epochs_aligned() {
        let mut tracker = StubTracker::with_frames(4, &[(0, 3)]);
        let mut timeline = loaded(&mut tracker, &config(20, 10));
        let section = timeline.stack_candidate(&[1.0; 6]).unwrap();
        assert_eq!(section, Section::new(3, 9));
        timeline.ensure_lockstep().unwrap();
        timeline.discard_candidates().unwrap();
        assert_eq!(timeline.points().end_valid(), 3);
        timeline.ensure_lockstep().unwrap();
    }
}
