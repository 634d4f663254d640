//! The tracking session: one tracker, its buffers and every command a host can issue.

use crate::buffer::RenderEvent;
use crate::camera_path::{format_camera_path, CameraPoseRecord};
use crate::config::SessionConfig;
use crate::diagnostics::SessionStats;
use crate::error::{OrchestratorError, Result};
use crate::ids::{FrameId, KeyframeId};
use crate::relocalization::CandidateManager;
use crate::restart::{self, RestartPlan};
use crate::tracker::{CameraModel, ImagePoint, Tracker, TrackerError, TrackerErrorKind};
use crate::tracking::{Timeline, TrackOutcome, TrackingState};

/// Everything that only exists once a dataset is loaded.
#[derive(Debug)]
struct Loaded<T> {
    tracker: T,
    camera: CameraModel,
    timeline: Timeline,
    candidates: CandidateManager,
    state: TrackingState,
}

impl<T: Tracker> Loaded<T> {
    fn track(&mut self, force_keyframe: bool) -> Result<TrackOutcome> {
        if self.state == TrackingState::Exhausted {
            self.timeline.stats_mut().noop_polls += 1;
            let last = self.timeline.last_tracked_frame().unwrap_or_default();
            return Ok(TrackOutcome::idle(last));
        }
        if self.candidates.is_pending() {
            log::warn!("tracking resumed with relocalization candidates pending; discarding them");
            self.candidates.abandon(&mut self.timeline)?;
        }
        let outcome = self.timeline.step(&mut self.tracker, force_keyframe)?;
        self.state = TrackingState::after(&outcome);
        Ok(outcome)
    }

    fn restart_from(&mut self, base: KeyframeId, target: KeyframeId) -> Result<TrackOutcome> {
        let plan = RestartPlan::resolve(&self.timeline, base, target)?;
        self.timeline.ensure_lockstep()?;
        self.candidates.abandon(&mut self.timeline)?;
        let outcome = restart::restart(&mut self.timeline, &mut self.tracker, plan)?;
        self.state = TrackingState::after(&outcome);
        Ok(outcome)
    }

    fn p3p_visualize(
        &mut self,
        base: KeyframeId,
        restart: KeyframeId,
        ref_points: &[ImagePoint; 3],
        key_points: &[ImagePoint; 3],
    ) -> Result<Vec<f64>> {
        self.timeline.ensure_lockstep()?;
        self.candidates.visualize(
            &mut self.timeline,
            &mut self.tracker,
            base,
            restart,
            ref_points,
            key_points,
        )
    }

    fn choose_p3p_initial(&mut self, candidate: usize, base: KeyframeId) -> Result<TrackOutcome> {
        self.timeline.ensure_lockstep()?;
        let outcome =
            self.candidates
                .choose_initial(&mut self.timeline, &mut self.tracker, candidate, base)?;
        self.state = TrackingState::after(&outcome);
        Ok(outcome)
    }

    fn export_camera_poses(&self) -> Result<Vec<CameraPoseRecord>> {
        self.timeline.ensure_lockstep()?;
        Ok(self.timeline.camera_path().records())
    }
}

/// Owns the tracker and everything the renderer reads.
///
/// Commands validate their arguments before mutating anything; a rejected
/// command leaves the session as it was. A fatal error moves the session to
/// [`TrackingState::Terminated`] and every later command fails with
/// [`OrchestratorError::SessionTerminated`] until a dataset is loaded again.
#[derive(Debug)]
pub struct Session<T: Tracker> {
    config: SessionConfig,
    loaded: Option<Loaded<T>>,
    terminated: Option<String>,
}

impl<T: Tracker> Session<T> {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            loaded: None,
            terminated: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> TrackingState {
        if self.terminated.is_some() {
            return TrackingState::Terminated;
        }
        self.loaded
            .as_ref()
            .map_or(TrackingState::Idle, |loaded| loaded.state)
    }

    /// Initialize `tracker` on its dataset and track the first frame.
    /// Returns the number of frames in the dataset.
    pub fn load_dataset(&mut self, mut tracker: T, camera: CameraModel) -> Result<usize> {
        self.loaded = None;
        self.terminated = None;

        let nb_frames = tracker
            .init(camera)
            .map_err(|source| OrchestratorError::TrackerDivergence {
                frame: FrameId(0),
                source,
            })?;
        if nb_frames == 0 {
            return Err(OrchestratorError::TrackerDivergence {
                frame: FrameId(0),
                source: TrackerError::new(TrackerErrorKind::MalformedFrame, "dataset has no frames"),
            });
        }

        let mut timeline = Timeline::new(&self.config, nb_frames);
        if let Err(err) = timeline.record_tick(&tracker) {
            log::error!("first frame rejected ({}): {err}", err.category());
            return Err(err);
        }
        let state = if timeline.more_frames() {
            TrackingState::Ready
        } else {
            TrackingState::Exhausted
        };
        log::info!("dataset loaded: {nb_frames} frames, camera {camera}");
        self.loaded = Some(Loaded {
            tracker,
            camera,
            timeline,
            candidates: CandidateManager::new(),
            state,
        });
        Ok(nb_frames)
    }

    /// Track the next frame. After the last frame this is a no-op.
    pub fn track(&mut self, force_keyframe: bool) -> Result<TrackOutcome> {
        self.command("track", |loaded| loaded.track(force_keyframe))
    }

    /// Rewind to just before `target` and restart tracking from `base`.
    pub fn restart_from(&mut self, base: KeyframeId, target: KeyframeId) -> Result<TrackOutcome> {
        self.command("restart_from", |loaded| loaded.restart_from(base, target))
    }

    /// Visualize relocalization candidates for `restart`, the latest keyframe.
    pub fn p3p_visualize(
        &mut self,
        base: KeyframeId,
        restart: KeyframeId,
        ref_points: &[ImagePoint; 3],
        key_points: &[ImagePoint; 3],
    ) -> Result<Vec<f64>> {
        self.command("p3p_visualize", |loaded| {
            loaded.p3p_visualize(base, restart, ref_points, key_points)
        })
    }

    /// Commit a visualized candidate; 0 keeps the current pose.
    pub fn choose_p3p_initial(&mut self, candidate: usize, base: KeyframeId) -> Result<TrackOutcome> {
        self.command("choose_p3p_initial", |loaded| {
            loaded.choose_p3p_initial(candidate, base)
        })
    }

    pub fn export_camera_poses(&mut self) -> Result<Vec<CameraPoseRecord>> {
        self.command("export_camera_poses", |loaded| loaded.export_camera_poses())
    }

    /// Camera path as `<index> <x> <y> <z> 0 0 0 1` lines.
    pub fn camera_path_dump(&mut self) -> Result<String> {
        self.command("camera_path_dump", |loaded| {
            loaded
                .export_camera_poses()
                .map(|records| format_camera_path(&records))
        })
    }

    /// Drain the render events accumulated since the last call.
    pub fn take_render_events(&mut self) -> Vec<RenderEvent> {
        self.loaded
            .as_mut()
            .map(|loaded| loaded.timeline.take_events())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SessionStats {
        self.loaded
            .as_ref()
            .map(|loaded| loaded.timeline.stats().clone())
            .unwrap_or_default()
    }

    /// Drop the dataset and hand the tracker back.
    pub fn close(&mut self) -> Option<T> {
        self.terminated = None;
        let loaded = self.loaded.take()?;
        log::info!("session closed after {} ticks", loaded.timeline.stats().ticks);
        Some(loaded.tracker)
    }

    pub fn timeline(&self) -> Option<&Timeline> {
        self.loaded.as_ref().map(|loaded| &loaded.timeline)
    }

    pub fn candidates(&self) -> Option<&CandidateManager> {
        self.loaded.as_ref().map(|loaded| &loaded.candidates)
    }

    pub fn tracker(&self) -> Option<&T> {
        self.loaded.as_ref().map(|loaded| &loaded.tracker)
    }

    pub fn camera(&self) -> Option<CameraModel> {
        self.loaded.as_ref().map(|loaded| loaded.camera)
    }

    pub fn last_tracked_frame(&self) -> Option<FrameId> {
        self.timeline().and_then(Timeline::last_tracked_frame)
    }

    pub fn end_valid(&self) -> usize {
        self.timeline().map_or(0, |t| t.points().end_valid())
    }

    pub fn terminated_reason(&self) -> Option<&str> {
        self.terminated.as_deref()
    }

    fn command<R>(
        &mut self,
        name: &'static str,
        run: impl FnOnce(&mut Loaded<T>) -> Result<R>,
    ) -> Result<R> {
        if let Some(reason) = &self.terminated {
            return Err(OrchestratorError::SessionTerminated {
                reason: reason.clone(),
            });
        }
        let Some(loaded) = self.loaded.as_mut() else {
            log::warn!("{name} rejected: no dataset loaded");
            return Err(OrchestratorError::NotLoaded);
        };
        match run(loaded) {
            Ok(value) => Ok(value),
            Err(err) if err.is_recoverable() => {
                log::warn!("{name} rejected ({}): {err}", err.category());
                loaded.timeline.stats_mut().rejected_commands += 1;
                Err(err)
            }
            Err(err) => {
                log::error!("{name} failed ({}), session terminated: {err}", err.category());
                loaded.state = TrackingState::Terminated;
                self.terminated = Some(err.to_string());
                Err(err)
            }
        }
    }
}
