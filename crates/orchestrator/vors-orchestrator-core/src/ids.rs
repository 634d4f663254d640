//! Identifiers and counters shared by the indices.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dense identifier of a tracked image (0 is the dataset's first frame).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub usize);

/// Sparse identifier of a frame promoted to keyframe, in promotion order.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyframeId(pub usize);

impl FrameId {
    #[inline]
    pub fn next(self) -> Self {
        FrameId(self.0 + 1)
    }

    /// Previous frame, `None` for the first frame of the dataset.
    #[inline]
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(FrameId)
    }
}

impl KeyframeId {
    #[inline]
    pub fn offset(self, by: usize) -> Self {
        KeyframeId(self.0 + by)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

impl fmt::Display for KeyframeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kf#{}", self.0)
    }
}

/// Consistency stamp shared by the point and pose indices.
///
/// Every step that mutates either index stamps both with the same epoch, so a
/// mismatch means a step was applied to one index only.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(pub u64);

impl Epoch {
    #[inline]
    pub fn next(self) -> Self {
        Epoch(self.0.wrapping_add(1))
    }
}

/// Allocation generation of a growable buffer. Bumped by every mutating call.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    #[inline]
    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}
