//! FIFO of received audio segments awaiting commit.

use std::collections::VecDeque;

use bytes::Bytes;

/// Counters for one audio stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    pub received: u64,
    pub committed: u64,
    pub dropped: u64,
}

/// Segments in arrival order. At most one segment is in flight to the
/// sink at any time.
#[derive(Debug, Default)]
pub struct SegmentQueue {
    segments: VecDeque<Bytes>,
    committing: bool,
    closed: bool,
    ended: bool,
    stats: AudioStats,
}

impl SegmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment. Refused once the queue is closed.
    pub fn push(&mut self, segment: Bytes) -> bool {
        if self.closed {
            self.stats.dropped += 1;
            return false;
        }
        self.stats.received += 1;
        self.segments.push_back(segment);
        true
    }

    /// Take the head for commit, unless a commit is in flight, the queue is
    /// closed, or the sink is not open.
    pub fn begin_commit(&mut self, sink_open: bool) -> Option<Bytes> {
        if self.committing || self.closed || !sink_open {
            return None;
        }
        let segment = self.segments.pop_front()?;
        self.committing = true;
        Some(segment)
    }

    /// The in-flight commit finished (successfully or not).
    pub fn finish_commit(&mut self, committed: bool) {
        if self.committing {
            self.committing = false;
            if committed {
                self.stats.committed += 1;
            } else {
                self.stats.dropped += 1;
            }
        }
    }

    /// Stop accepting and drop everything pending. Returns the number dropped.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let pending = self.segments.len();
        self.segments.clear();
        self.stats.dropped += pending as u64;
        pending
    }

    /// No more segments will arrive; pending ones may still be committed.
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// Nothing left to commit now or later.
    pub fn is_drained(&self) -> bool {
        self.closed || (self.ended && self.segments.is_empty() && !self.committing)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub const fn is_committing(&self) -> bool {
        self.committing
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    pub const fn stats(&self) -> AudioStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[test]
    fn commits_in_arrival_order_one_at_a_time() {
        let mut q = SegmentQueue::new();
        q.push(seg(1));
        q.push(seg(2));

        assert_eq!(q.begin_commit(true), Some(seg(1)));
        assert!(q.is_committing());
        assert_eq!(q.begin_commit(true), None);

        q.finish_commit(true);
        assert_eq!(q.begin_commit(true), Some(seg(2)));
        q.finish_commit(true);
        assert_eq!(q.begin_commit(true), None);
        assert_eq!(q.stats().committed, 2);
    }

    #[test]
    fn waits_for_sink_to_open() {
        let mut q = SegmentQueue::new();
        q.push(seg(1));
        assert_eq!(q.begin_commit(false), None);
        assert_eq!(q.len(), 1);
        assert_eq!(q.begin_commit(true), Some(seg(1)));
    }

    #[test]
    fn ended_queue_drains_before_reporting_done() {
        let mut q = SegmentQueue::new();
        q.push(seg(1));
        q.end();
        assert!(!q.is_drained());
        assert_eq!(q.begin_commit(true), Some(seg(1)));
        assert!(!q.is_drained());
        q.finish_commit(true);
        assert!(q.is_drained());
    }

    #[test]
    fn close_drops_pending_and_refuses_more() {
        let mut q = SegmentQueue::new();
        q.push(seg(1));
        q.push(seg(2));
        assert_eq!(q.close(), 2);
        assert!(!q.push(seg(3)));
        assert_eq!(q.begin_commit(true), None);
        assert_eq!(
            q.stats(),
            AudioStats {
                received: 2,
                committed: 0,
                dropped: 3
            }
        );
    }
}
