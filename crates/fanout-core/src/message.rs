//! Message buffers and views.
//!
//! A message moves through three states: a [`MessageBuffer`] grows segment
//! by segment during the build callback, [`freeze`](MessageBuffer::freeze)
//! consumes it into an immutable [`FrozenMessage`], and the frozen message
//! is released when the last clone drops. The builder and the frozen type
//! are distinct, so the frozen invariant is structural: there is no way to
//! append to a message that dispatch can see.
//!
//! Each delivery task holds its own [`FrozenMessage`] clone; the clone count
//! is the buffer's reference count, and the shared segments are freed
//! exactly once, when the slowest delivery finishes.

use std::marker::PhantomData;
use std::sync::Arc;

use fanout_abi::{Index, MsgSegmentView, MsgType, MsgView, Word};
use smallvec::SmallVec;

use crate::arena::{Segment, WordArena};
use crate::Error;

// ---------------------------------------------------------------------------
// MessageBuffer
// ---------------------------------------------------------------------------

/// A message under construction.
///
/// Grow-only: segments are appended via [`allocate_segment`] and never
/// removed or resized. Dropping an unfrozen buffer discards the partial
/// message whole.
///
/// [`allocate_segment`]: MessageBuffer::allocate_segment
#[derive(Debug)]
pub struct MessageBuffer {
    msg_type: MsgType,
    arena: WordArena,
    segments: SmallVec<[Segment; 4]>,
}

impl MessageBuffer {
    /// Creates an empty buffer tagged with `msg_type`.
    #[must_use]
    pub fn new(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            arena: WordArena::new(),
            segments: SmallVec::new(),
        }
    }

    /// The schema tag this message will be published under.
    #[must_use]
    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    /// Number of segments appended so far.
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Appends a fresh zeroed segment of at least `min_words` words and
    /// returns a write view into it.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the arena allocation fails; the buffer is
    /// left unchanged.
    pub fn allocate_segment(&mut self, min_words: usize) -> Result<&mut [Word], Error> {
        let segment = self.arena.allocate(min_words)?;
        self.segments.push(segment);

        Ok(self
            .segments
            .last_mut()
            .expect("segment just pushed")
            .as_mut_slice())
    }

    /// Freezes the buffer into an immutable, shareable message.
    #[must_use]
    pub fn freeze(self) -> FrozenMessage {
        FrozenMessage {
            inner: Arc::new(FrozenInner {
                msg_type: self.msg_type,
                segments: self.segments,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FrozenMessage
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FrozenInner {
    msg_type: MsgType,
    segments: SmallVec<[Segment; 4]>,
}

/// An immutable message shared across a fan-out.
///
/// Clones are cheap (one atomic increment) and each outstanding delivery
/// holds one; the segments are released when the last clone drops.
#[derive(Debug, Clone)]
pub struct FrozenMessage {
    inner: Arc<FrozenInner>,
}

impl FrozenMessage {
    /// The schema tag the message was published under.
    #[must_use]
    pub fn msg_type(&self) -> MsgType {
        self.inner.msg_type
    }

    /// Number of segments, in insertion order.
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.inner.segments.len()
    }

    /// Read view of segment `index`.
    #[must_use]
    pub fn segment(&self, index: usize) -> Option<&[Word]> {
        self.inner.segments.get(index).map(Segment::as_slice)
    }

    /// Number of outstanding references, including this one.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Borrows a zero-copy view over all segments.
    #[must_use]
    pub fn view(&self) -> MessageView<'_> {
        let raw: SmallVec<[MsgSegmentView; 4]> = self
            .inner
            .segments
            .iter()
            .map(|s| MsgSegmentView {
                data: s.as_ptr(),
                len: s.len() as Index,
            })
            .collect();

        MessageView {
            raw,
            msg_type: self.inner.msg_type,
            _frozen: PhantomData,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageView
// ---------------------------------------------------------------------------

/// Borrowed read-only view over a frozen message's segments.
///
/// Valid only while the [`FrozenMessage`] it was taken from is; callbacks
/// receive a view scoped to their invocation and must not retain it.
#[derive(Debug)]
pub struct MessageView<'a> {
    raw: SmallVec<[MsgSegmentView; 4]>,
    msg_type: MsgType,
    _frozen: PhantomData<&'a FrozenInner>,
}

impl<'a> MessageView<'a> {
    /// The schema tag the message was published under.
    #[must_use]
    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    /// Number of segments.
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.raw.len()
    }

    /// Read view of segment `index`.
    #[must_use]
    pub fn segment(&self, index: usize) -> Option<&'a [Word]> {
        self.raw.get(index).map(|s| {
            // SAFETY: s points into a Segment owned by the FrozenMessage
            // this view borrows, alive and immutable for 'a.
            unsafe { std::slice::from_raw_parts(s.data, s.len as usize) }
        })
    }

    /// Iterates all segments in insertion order.
    pub fn segments(&self) -> impl Iterator<Item = &'a [Word]> + '_ {
        (0..self.raw.len()).filter_map(move |i| self.segment(i))
    }

    /// The ABI representation of this view.
    ///
    /// The returned struct points into `self` and is valid only while this
    /// view is borrowed and not moved.
    #[must_use]
    pub fn as_raw(&self) -> MsgView {
        MsgView {
            segments: self.raw.as_ptr(),
            num_segments: self.raw.len() as Index,
            msg_type: self.msg_type,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
