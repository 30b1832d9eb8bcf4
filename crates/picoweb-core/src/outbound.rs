//! Outbound send queue.
//!
//! The transport accepts only as many bytes as fit in its send window and
//! later reports how many it has consumed as a single cumulative count per
//! event, not per logical message. Each queued buffer therefore tracks two
//! offsets besides its size:
//!
//! ```text
//! 0 <= acknowledged <= sent <= size
//!
//! |<-- acknowledged -->|<-- in flight -->|<-- unsent -->|
//! ```
//!
//! A buffer leaves the queue exactly when `acknowledged == size`; releasing
//! it drops owned storage. Externally-static buffers are never freed.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{error, trace, warn};

/// Errors reported by [`OutboundQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutboundError {
    /// Zero-length buffers are not queued.
    #[error("Refusing to queue an empty buffer")]
    Empty,

    /// Nothing has been sent that could be rolled back.
    #[error("Nothing in flight to requeue")]
    NothingSent,

    /// The rollback would move `sent` below `acknowledged`.
    #[error("{requested} bytes to requeue exceeds {available} unacknowledged bytes")]
    RequeueExceedsSent { requested: usize, available: usize },

    /// The bytes handed back do not match what was sent.
    #[error("Buffer mismatch, {0} bytes not requeued")]
    RequeueMismatch(usize),
}

/// Ownership mode of a queued buffer.
#[derive(Debug, Clone)]
pub enum BufferSource {
    /// The queue made its own copy of the caller's bytes.
    Copied(Vec<u8>),
    /// Bytes live for the whole program and are never freed by the queue.
    Static(&'static [u8]),
    /// The caller handed over ownership; freed once fully acknowledged.
    Transferred(Vec<u8>),
}

impl BufferSource {
    /// Copy `data` into a queue-owned buffer.
    pub fn copy_of(data: &[u8]) -> Self {
        BufferSource::Copied(data.to_vec())
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            BufferSource::Copied(v) | BufferSource::Transferred(v) => v,
            BufferSource::Static(s) => s,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct OutboundBuffer {
    source: BufferSource,
    sent: usize,
    acknowledged: usize,
}

impl OutboundBuffer {
    fn size(&self) -> usize {
        self.source.len()
    }

    fn unsent(&self) -> usize {
        self.size() - self.sent
    }

    fn is_acknowledged(&self) -> bool {
        self.acknowledged == self.size()
    }
}

/// Ordered chain of pending send buffers for one session.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    buffers: VecDeque<OutboundBuffer>,
    released: u64,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer to the tail of the queue.
    pub fn enqueue(&mut self, source: BufferSource) -> Result<(), OutboundError> {
        if source.is_empty() {
            return Err(OutboundError::Empty);
        }
        trace!(len = source.len(), "Queued outbound buffer");
        self.buffers.push_back(OutboundBuffer {
            source,
            sent: 0,
            acknowledged: 0,
        });
        Ok(())
    }

    /// Take the next run of unsent bytes, at most `max_len` long, and mark
    /// them sent.
    ///
    /// Bytes come from the first buffer that still has unsent data; every
    /// buffer ahead of it has been fully handed to the transport. Whether the
    /// transport actually accepted the bytes is the caller's business, see
    /// [`requeue`](Self::requeue).
    pub fn next_chunk(&mut self, max_len: usize) -> Option<&[u8]> {
        if max_len == 0 {
            return None;
        }
        let buffer = self.buffers.iter_mut().find(|b| b.unsent() > 0)?;
        let start = buffer.sent;
        let len = buffer.unsent().min(max_len);
        buffer.sent += len;
        Some(&buffer.source.as_slice()[start..start + len])
    }

    /// Roll back a chunk the transport refused.
    ///
    /// `chunk` must be the tail of the most recent [`next_chunk`](Self::next_chunk)
    /// result. The bytes are compared against the buffer before the `sent`
    /// offset is moved back; a mismatch leaves the queue untouched.
    pub fn requeue(&mut self, chunk: &[u8]) -> Result<(), OutboundError> {
        let buffer = self
            .buffers
            .iter_mut()
            .rev()
            .find(|b| b.sent > 0)
            .ok_or(OutboundError::NothingSent)?;

        let available = buffer.sent - buffer.acknowledged;
        if chunk.len() > available {
            error!(
                requested = chunk.len(),
                available, "Requeue exceeds unacknowledged bytes"
            );
            return Err(OutboundError::RequeueExceedsSent {
                requested: chunk.len(),
                available,
            });
        }

        let start = buffer.sent - chunk.len();
        if &buffer.source.as_slice()[start..buffer.sent] != chunk {
            error!(len = chunk.len(), "Buffer mismatch, bytes not requeued");
            return Err(OutboundError::RequeueMismatch(chunk.len()));
        }

        buffer.sent = start;
        warn!(len = chunk.len(), "Bytes requeued");
        Ok(())
    }

    /// Apply a cumulative acknowledgement of `count` bytes.
    ///
    /// The count is spread across buffers from the head; every buffer that
    /// becomes fully acknowledged is released. Only bytes already handed
    /// out by [`next_chunk`](Self::next_chunk) can be acknowledged; any
    /// excess is logged and ignored. Returns how many buffers were released.
    pub fn acknowledge(&mut self, count: usize) -> usize {
        let mut remaining = count;
        let mut released = 0;

        while let Some(front) = self.buffers.front_mut() {
            let take = remaining.min(front.sent - front.acknowledged);
            front.acknowledged += take;
            remaining -= take;

            if !front.is_acknowledged() {
                break;
            }
            self.buffers.pop_front();
            self.released += 1;
            released += 1;
        }

        if remaining > 0 {
            error!(excess = remaining, "Acknowledge count exceeds sent bytes");
        }
        released
    }

    /// True while any buffer is waiting to be sent or acknowledged.
    pub fn has_pending(&self) -> bool {
        !self.buffers.is_empty()
    }

    /// Number of queued buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Bytes not yet handed to the transport.
    pub fn unsent_bytes(&self) -> usize {
        self.buffers.iter().map(OutboundBuffer::unsent).sum()
    }

    /// Bytes handed to the transport but not yet acknowledged.
    pub fn in_flight_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.sent - b.acknowledged).sum()
    }

    /// Total buffers released over the queue's lifetime.
    pub fn released_count(&self) -> u64 {
        self.released
    }

    /// Drop everything still queued. Used when a connection is torn down.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buffers.len();
        self.buffers.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    static GREETING: &[u8] = b"static greeting";

    #[test]
    fn test_empty_enqueue_rejected() {
        let mut queue = OutboundQueue::new();
        assert_eq!(queue.enqueue(BufferSource::copy_of(b"")), Err(OutboundError::Empty));
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_next_chunk_respects_max_len() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"hello world")).unwrap();

        assert_eq!(queue.next_chunk(5), Some(&b"hello"[..]));
        assert_eq!(queue.next_chunk(100), Some(&b" world"[..]));
        assert_eq!(queue.next_chunk(100), None);
        assert_eq!(queue.in_flight_bytes(), 11);
        assert_eq!(queue.next_chunk(0), None);
    }

    #[test]
    fn test_next_chunk_moves_to_following_buffer() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"abc")).unwrap();
        queue.enqueue(BufferSource::Static(GREETING)).unwrap();

        assert_eq!(queue.next_chunk(10), Some(&b"abc"[..]));
        // First buffer is in flight, the next chunk comes from the second.
        assert_eq!(queue.next_chunk(6), Some(&b"static"[..]));
        assert_eq!(queue.unsent_bytes(), GREETING.len() - 6);
    }

    #[test]
    fn test_requeue_round_trip() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"0123456789")).unwrap();
        queue.next_chunk(3);
        let before = queue.unsent_bytes();

        let chunk = queue.next_chunk(4).unwrap().to_vec();
        assert_eq!(chunk, b"3456");
        queue.requeue(&chunk).unwrap();

        assert_eq!(queue.unsent_bytes(), before);
        assert_eq!(queue.next_chunk(4), Some(&b"3456"[..]));
    }

    #[test]
    fn test_requeue_partial_tail() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"abcdef")).unwrap();
        let chunk = queue.next_chunk(6).unwrap().to_vec();

        // Transport took four bytes, hand back the last two.
        queue.requeue(&chunk[4..]).unwrap();
        assert_eq!(queue.unsent_bytes(), 2);
        assert_eq!(queue.next_chunk(10), Some(&b"ef"[..]));
    }

    #[test]
    fn test_requeue_mismatch_refused() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"abcdef")).unwrap();
        queue.next_chunk(3);

        assert_eq!(queue.requeue(b"xyz"), Err(OutboundError::RequeueMismatch(3)));
        assert_eq!(queue.unsent_bytes(), 3);
    }

    #[test]
    fn test_requeue_cannot_cross_acknowledged() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"abcdef")).unwrap();
        queue.next_chunk(4);
        queue.acknowledge(3);

        assert_eq!(
            queue.requeue(b"bcd"),
            Err(OutboundError::RequeueExceedsSent {
                requested: 3,
                available: 1
            })
        );
        assert_eq!(queue.requeue(b"d"), Ok(()));
    }

    #[test]
    fn test_requeue_with_nothing_sent() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"abc")).unwrap();
        assert_eq!(queue.requeue(b"a"), Err(OutboundError::NothingSent));
    }

    #[test]
    fn test_acknowledge_spans_buffers() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"aaaa")).unwrap();
        queue.enqueue(BufferSource::Transferred(b"bbbb".to_vec())).unwrap();
        queue.enqueue(BufferSource::Static(GREETING)).unwrap();
        while queue.next_chunk(3).is_some() {}

        assert_eq!(queue.acknowledge(2), 0);
        assert_eq!(queue.len(), 3);

        // Finishes the first buffer, the whole second, one byte of the third.
        assert_eq!(queue.acknowledge(7), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.in_flight_bytes(), GREETING.len() - 1);

        assert_eq!(queue.acknowledge(GREETING.len() - 1), 1);
        assert!(!queue.has_pending());
        assert_eq!(queue.released_count(), 3);
    }

    #[test]
    fn test_buffer_released_exactly_once() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"xy")).unwrap();
        queue.next_chunk(2);

        assert_eq!(queue.acknowledge(1), 0);
        assert_eq!(queue.acknowledge(1), 1);
        assert_eq!(queue.acknowledge(0), 0);
        assert_eq!(queue.released_count(), 1);
    }

    #[test]
    fn test_acknowledge_beyond_sent_keeps_unsent_bytes() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"abcdef")).unwrap();
        queue.next_chunk(2);

        assert_eq!(queue.acknowledge(4), 0);
        assert_eq!(queue.in_flight_bytes(), 0);
        assert_eq!(queue.unsent_bytes(), 4);
        assert_eq!(queue.next_chunk(10), Some(&b"cdef"[..]));
    }

    #[test]
    fn test_acknowledge_beyond_sent_spares_later_buffers() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"abc")).unwrap();
        queue.enqueue(BufferSource::copy_of(b"def")).unwrap();
        assert_eq!(queue.next_chunk(3), Some(&b"abc"[..]));

        assert_eq!(queue.acknowledge(6), 1);
        assert!(queue.has_pending());
        assert_eq!(queue.next_chunk(10), Some(&b"def"[..]));
        assert_eq!(queue.acknowledge(3), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_acknowledge_never_exceeds_enqueued() {
        let mut queue = OutboundQueue::new();
        let sizes = [5usize, 1, 9, 3];
        for size in sizes {
            queue.enqueue(BufferSource::Transferred(vec![7; size])).unwrap();
        }
        while queue.next_chunk(4).is_some() {}

        let mut released = 0;
        for step in [2usize, 2, 2, 2, 2, 2, 2, 2, 100] {
            released += queue.acknowledge(step);
        }
        assert_eq!(released, sizes.len());
        assert!(!queue.has_pending());
        assert_eq!(queue.acknowledge(10), 0);
    }

    #[test]
    fn test_clear_drops_pending() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(BufferSource::copy_of(b"a")).unwrap();
        queue.enqueue(BufferSource::copy_of(b"b")).unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
