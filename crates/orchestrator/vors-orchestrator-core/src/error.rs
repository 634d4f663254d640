//! Error types for the orchestration layer.

use crate::buffer::BufferKind;
use crate::ids::{Epoch, FrameId, Generation, KeyframeId};
use crate::tracker::TrackerError;

/// Everything a session command can be rejected or aborted with.
///
/// Recoverable errors are raised before any mutation and leave the session
/// untouched. Fatal errors terminate the session; the dataset must be loaded
/// again before further commands are accepted.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// Keyframe id was never promoted (or was rewound away)
    #[error("Unknown keyframe: {keyframe}")]
    UnknownKeyframe { keyframe: KeyframeId },

    /// Keyframe cannot be used as a truncation point
    #[error("Invalid reset target {keyframe}: {reason}")]
    InvalidResetTarget { keyframe: KeyframeId, reason: String },

    /// Base keyframe must precede the target keyframe
    #[error("Invalid keyframe range: base {base} must precede target {target}")]
    InvalidRange { base: KeyframeId, target: KeyframeId },

    /// Candidate index outside the visualized hypotheses
    #[error("Unknown relocalization candidate {candidate} ({available} hypotheses visualized)")]
    UnknownCandidate { candidate: usize, available: usize },

    /// Commit requested without a preceding visualization
    #[error("No relocalization candidates are being visualized")]
    NoPendingRelocalization,

    /// Camera model identifier not supported
    #[error("Unknown camera id: {id}")]
    UnknownCamera { id: String },

    /// Command needs a loaded dataset
    #[error("No dataset loaded")]
    NotLoaded,

    /// View token acquired under an older buffer generation
    #[error("Stale {buffer:?} view: acquired at generation {acquired:?}, buffer is at {current:?}")]
    StaleView {
        buffer: BufferKind,
        acquired: Generation,
        current: Generation,
    },

    /// Session configuration rejected
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Buffer capacity was sized too small upstream
    #[error("{buffer:?} buffer exhausted: {requested} elements requested, capacity {capacity}")]
    ExhaustedCapacity {
        buffer: BufferKind,
        requested: usize,
        capacity: usize,
    },

    /// The tracker failed while processing a frame or a reset
    #[error("Tracker diverged at {frame}: {source}")]
    TrackerDivergence {
        frame: FrameId,
        #[source]
        source: TrackerError,
    },

    /// Point and pose indices were not stamped by the same step
    #[error("Index epochs diverged: points at {points:?}, poses at {poses:?}")]
    EpochMismatch { points: Epoch, poses: Epoch },

    /// A previous fatal error terminated the session
    #[error("Session terminated: {reason}")]
    SessionTerminated { reason: String },
}

impl OrchestratorError {
    /// Whether the session survives this error unchanged.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownKeyframe { .. }
                | Self::InvalidResetTarget { .. }
                | Self::InvalidRange { .. }
                | Self::UnknownCandidate { .. }
                | Self::NoPendingRelocalization
                | Self::UnknownCamera { .. }
                | Self::NotLoaded
                | Self::StaleView { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Get error category for logging
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownKeyframe { .. }
            | Self::InvalidResetTarget { .. }
            | Self::InvalidRange { .. } => "index",
            Self::UnknownCandidate { .. } | Self::NoPendingRelocalization => "relocalization",
            Self::UnknownCamera { .. } | Self::InvalidConfig { .. } => "config",
            Self::NotLoaded | Self::SessionTerminated { .. } => "session",
            Self::StaleView { .. } | Self::ExhaustedCapacity { .. } => "buffer",
            Self::TrackerDivergence { .. } => "tracker",
            Self::EpochMismatch { .. } => "consistency",
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
