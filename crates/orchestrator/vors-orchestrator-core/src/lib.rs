//! vors-orchestrator
//!
//! Keeps the point cloud and camera path buffers of a live visual odometry
//! session in step with the tracker producing them. The tracker is driven one
//! frame at a time through [`Session::track`]; each tick appends the keyframe
//! points and the camera position and records which ranges the renderer must
//! re-upload ([`RenderEvent`]). Sessions can be rewound to an earlier keyframe
//! ([`Session::restart_from`]) and relocalized from operator-picked point
//! correspondences ([`Session::p3p_visualize`], [`Session::choose_p3p_initial`]).

pub mod buffer;
pub mod camera_path;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ids;
pub mod point_cloud;
pub mod relocalization;
pub mod restart;
pub mod session;
pub mod tracker;
pub mod tracking;

#[cfg(test)]
mod testing;

pub use crate::buffer::{BufferKind, GrowableBuffer, RenderEvent, RenderLog, Section, ViewToken, STRIDE};
pub use crate::camera_path::{format_camera_path, CameraPathIndex, CameraPoseRecord};
pub use crate::config::SessionConfig;
pub use crate::diagnostics::{DiagnosticsCfg, SessionStats};
pub use crate::error::{OrchestratorError, Result};
pub use crate::ids::{Epoch, FrameId, Generation, KeyframeId};
pub use crate::point_cloud::PointSectionIndex;
pub use crate::relocalization::{
    CandidateManager, PendingRelocalization, RelocalizationCandidate, MAX_CANDIDATES,
};
pub use crate::restart::RestartPlan;
pub use crate::session::Session;
pub use crate::tracker::{
    CameraModel, ImagePoint, P3pEvaluation, PoseSummary, Tracker, TrackerError, TrackerErrorKind,
};
pub use crate::tracking::{Timeline, TrackOutcome, TrackingState};
