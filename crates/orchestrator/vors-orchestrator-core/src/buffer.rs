//! Growable scalar buffers and the render-side view of them.
//!
//! A [`GrowableBuffer`] owns a prefix-valid `f32` allocation. Writes past the
//! current allocation reallocate it (doubling, capped at the capacity), which
//! invalidates any pointer a renderer may hold. Renderers therefore never keep
//! raw views: they hold a [`ViewToken`] and resolve it through
//! [`GrowableBuffer::view`], which refuses tokens from an older generation.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::ids::Generation;

/// Scalars per stored element (xyz for points and camera positions).
pub const STRIDE: usize = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    Points,
    Poses,
}

/// Half-open scalar range `[start, end)` contributed by one keyframe.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub start: usize,
    pub end: usize,
}

impl Section {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "section start {start} past end {end}");
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Handle on a buffer's memory as of one generation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ViewToken {
    pub buffer: BufferKind,
    pub generation: Generation,
    /// Reallocation count at acquisition; differs between tokens when the memory moved.
    pub allocation: u64,
    /// Valid scalars at acquisition.
    pub len: usize,
}

impl ViewToken {
    /// Whether the backing memory was reallocated between `older` and `self`.
    /// Consumers re-bind the whole buffer in that case.
    pub fn moved_since(&self, older: &ViewToken) -> bool {
        self.allocation != older.allocation
    }
}

#[derive(Debug, Clone)]
pub struct GrowableBuffer {
    kind: BufferKind,
    data: Vec<f32>,
    end: usize,
    capacity: usize,
    generation: Generation,
    allocation: u64,
}

impl GrowableBuffer {
    /// Create a buffer holding at most `capacity` scalars, allocating `initial` up front.
    pub fn new(kind: BufferKind, capacity: usize, initial: usize) -> Self {
        Self {
            kind,
            data: vec![0.0; initial.min(capacity)],
            end: 0,
            capacity,
            generation: Generation::default(),
            allocation: 0,
        }
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Scalars in the valid prefix.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Scalars currently allocated (valid prefix plus stale tail).
    pub fn allocated(&self) -> usize {
        self.data.len()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn allocation(&self) -> u64 {
        self.allocation
    }

    /// Borrow the valid prefix. The borrow ends before any mutation can happen.
    pub fn read(&self) -> &[f32] {
        &self.data[..self.end]
    }

    /// Base address of the allocation, for hosts that map it directly (wasm memory).
    pub fn as_ptr(&self) -> *const f32 {
        self.data.as_ptr()
    }

    pub fn acquire(&self) -> ViewToken {
        ViewToken {
            buffer: self.kind,
            generation: self.generation,
            allocation: self.allocation,
            len: self.end,
        }
    }

    /// Resolve a token into the slice it was acquired for.
    pub fn view(&self, token: &ViewToken) -> Result<&[f32]> {
        if token.buffer != self.kind || token.generation != self.generation {
            return Err(OrchestratorError::StaleView {
                buffer: token.buffer,
                acquired: token.generation,
                current: self.generation,
            });
        }
        Ok(&self.data[..token.len.min(self.end)])
    }

    /// Append `values` after the valid prefix, growing the allocation if needed.
    /// Returns the written range. Nothing is written when capacity would be exceeded.
    pub(crate) fn append(&mut self, values: &[f32]) -> Result<Range<usize>> {
        self.check_room(values.len())?;
        let start = self.end;
        let end = start + values.len();
        if end > self.data.len() {
            self.grow(end);
        }
        self.data[start..end].copy_from_slice(values);
        self.end = end;
        self.generation = self.generation.next();
        Ok(start..end)
    }

    /// `ExhaustedCapacity` unless `additional` more scalars fit after the valid prefix.
    pub(crate) fn check_room(&self, additional: usize) -> Result<()> {
        let requested = self.end + additional;
        if requested > self.capacity {
            return Err(OrchestratorError::ExhaustedCapacity {
                buffer: self.kind,
                requested,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Shrink the valid prefix to `end`. The allocation is kept.
    pub(crate) fn truncate(&mut self, end: usize) {
        debug_assert!(end <= self.end, "truncate to {end} past valid end {}", self.end);
        self.end = end.min(self.end);
        self.generation = self.generation.next();
    }

    /// Invalidate outstanding tokens without changing the content.
    pub(crate) fn touch(&mut self) {
        self.generation = self.generation.next();
    }

    fn grow(&mut self, needed: usize) {
        let doubled = self.data.len().saturating_mul(2).max(STRIDE);
        let new_len = doubled.max(needed).min(self.capacity);
        log::debug!(
            "{:?} buffer reallocated: {} -> {} scalars",
            self.kind,
            self.data.len(),
            new_len
        );
        self.data.resize(new_len, 0.0);
        self.allocation += 1;
    }
}

/// Notification for the rendering consumer, applied in emission order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderEvent {
    /// Backing memory moved: re-bind the whole buffer (no re-upload implied).
    Rebind {
        buffer: BufferKind,
        generation: Generation,
        allocated: usize,
    },
    /// Re-upload `[start, end)`.
    Dirty {
        buffer: BufferKind,
        start: usize,
        end: usize,
    },
    /// Valid extent changed without new data (truncation).
    Extent { buffer: BufferKind, end: usize },
    /// Relocalization slot (1..=4) shows `section`, or nothing when `None`.
    Candidate { slot: u8, section: Option<Section> },
}

/// Ordered buffer of render events, drained by the host once per frame.
#[derive(Debug, Default, Clone)]
pub struct RenderLog {
    events: Vec<RenderEvent>,
}

impl RenderLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: RenderEvent) {
        self.events.push(event);
    }

    /// Record `[start, end)` as dirty. Empty ranges are dropped.
    pub fn dirty(&mut self, buffer: BufferKind, range: Range<usize>) {
        if range.start < range.end {
            self.events.push(RenderEvent::Dirty {
                buffer,
                start: range.start,
                end: range.end,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderEvent> {
        self.events.iter()
    }

    pub fn drain(&mut self) -> Vec<RenderEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_and_bumps_generation() {
        let mut buf = GrowableBuffer::new(BufferKind::Points, 30, 6);
        let before = buf.acquire();
        let range = buf.append(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(range, 0..3);
        assert_eq!(buf.allocation(), 0, "fits the initial allocation");

        buf.append(&[4.0; 6]).unwrap();
        assert_eq!(buf.end(), 9);
        assert_eq!(buf.allocated(), 12);
        let after = buf.acquire();
        assert!(after.moved_since(&before));
        assert_eq!(after.generation, Generation(2));
        assert_eq!(buf.read()[3..], [4.0; 6]);
    }

    #[test]
    fn growth_is_capped_at_capacity() {
        let mut buf = GrowableBuffer::new(BufferKind::Poses, 10, 3);
        buf.append(&[0.0; 9]).unwrap();
        assert_eq!(buf.allocated(), 9);
        buf.append(&[0.5]).unwrap();
        assert_eq!(buf.allocated(), 10);
    }

    #[test]
    fn exhausted_capacity_writes_nothing() {
        let mut buf = GrowableBuffer::new(BufferKind::Points, 10, 10);
        buf.append(&[1.0; 9]).unwrap();
        let generation = buf.generation();
        let err = buf.append(&[2.0; 3]).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ExhaustedCapacity {
                requested: 12,
                capacity: 10,
                ..
            }
        ));
        assert_eq!(buf.end(), 9);
        assert_eq!(buf.generation(), generation);
    }

    #[test]
    fn stale_token_is_refused() {
        let mut buf = GrowableBuffer::new(BufferKind::Points, 12, 12);
        buf.append(&[1.0; 3]).unwrap();
        let token = buf.acquire();
        assert_eq!(buf.view(&token).unwrap(), &[1.0; 3]);

        buf.touch();
        let err = buf.view(&token).unwrap_err();
        assert!(matches!(err, OrchestratorError::StaleView { .. }));
        assert_eq!(buf.view(&buf.acquire()).unwrap().len(), 3);
    }

    #[test]
    fn truncate_keeps_allocation() {
        let mut buf = GrowableBuffer::new(BufferKind::Points, 12, 3);
        buf.append(&[1.0; 9]).unwrap();
        let allocated = buf.allocated();
        buf.truncate(3);
        assert_eq!(buf.end(), 3);
        assert_eq!(buf.allocated(), allocated);
    }

    #[test]
    fn render_log_drops_empty_dirty_ranges() {
        let mut log = RenderLog::new();
        log.dirty(BufferKind::Points, 4..4);
        assert!(log.is_empty());
        log.dirty(BufferKind::Points, 4..7);
        assert_eq!(
            log.drain(),
            vec![RenderEvent::Dirty {
                buffer: BufferKind::Points,
                start: 4,
                end: 7
            }]
        );
        assert!(log.is_empty());
    }
}
