//! K-way merge of date-ordered partition streams.
//!
//! A multi-partition plan issues one paginated query per partition. Each
//! stream is already ordered by sort key; [`KWayMerge`] interleaves their
//! heads through a binary heap so the combined output is globally ordered
//! without materializing every page.
//!
//! The merge is synchronous. The driver refills a stream whenever
//! [`KWayMerge::pending_refill`] names one, then calls [`KWayMerge::pop`]:
//!
//! ```text
//! loop {
//!     while let Some(s) = merge.pending_refill() { fetch page for s; merge.push_page(s, ..) }
//!     match merge.pop() { Some(item) => emit(item), None => break }
//! }
//! ```

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use chrono::NaiveDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Head {
    key: Option<NaiveDateTime>,
    stream: usize,
    descending: bool,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: "greater" pops first. Undated items always pop last.
        let by_key = match (self.key, other.key) {
            (Some(a), Some(b)) if self.descending => a.cmp(&b),
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        by_key.then_with(|| other.stream.cmp(&self.stream))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct Stream<T> {
    buffer: VecDeque<(Option<NaiveDateTime>, T)>,
    has_more: bool,
}

/// Merges `n` ordered streams of `T`, keyed by an optional timestamp.
#[derive(Debug)]
pub struct KWayMerge<T> {
    streams: Vec<Stream<T>>,
    heap: BinaryHeap<Head>,
    descending: bool,
}

impl<T> KWayMerge<T> {
    /// Every stream starts empty and awaiting its first page.
    pub fn new(streams: usize, descending: bool) -> Self {
        Self {
            streams: (0..streams)
                .map(|_| Stream {
                    buffer: VecDeque::new(),
                    has_more: true,
                })
                .collect(),
            heap: BinaryHeap::new(),
            descending,
        }
    }

    /// Appends a fetched page to `stream`. `has_more` is false once the
    /// stream's last page has been delivered.
    pub fn push_page(
        &mut self,
        stream: usize,
        items: Vec<(Option<NaiveDateTime>, T)>,
        has_more: bool,
    ) {
        let Some(s) = self.streams.get_mut(stream) else {
            return;
        };
        let was_empty = s.buffer.is_empty();
        s.buffer.extend(items);
        s.has_more = has_more;
        if was_empty {
            if let Some((key, _)) = s.buffer.front() {
                self.heap.push(Head {
                    key: *key,
                    stream,
                    descending: self.descending,
                });
            }
        }
    }

    /// A stream whose buffer ran dry but may still have pages. The merge
    /// cannot safely pop until it is refilled or marked finished.
    pub fn pending_refill(&self) -> Option<usize> {
        self.streams
            .iter()
            .position(|s| s.buffer.is_empty() && s.has_more)
    }

    /// Next item in global order, or `None` once every stream is drained.
    pub fn pop(&mut self) -> Option<T> {
        let head = self.heap.pop()?;
        let stream = &mut self.streams[head.stream];
        let (_, item) = stream.buffer.pop_front()?;
        if let Some((key, _)) = stream.buffer.front() {
            self.heap.push(Head {
                key: *key,
                stream: head.stream,
                descending: self.descending,
            });
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2025, 7, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
    }

    fn drain(m: &mut KWayMerge<&'static str>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Some(x) = m.pop() {
            out.push(x);
        }
        out
    }

    #[test]
    fn test_descending_interleave() {
        let mut m = KWayMerge::new(2, true);
        m.push_page(0, vec![(at(20), "a20"), (at(5), "a5")], false);
        m.push_page(1, vec![(at(15), "b15"), (at(10), "b10"), (at(1), "b1")], false);
        assert_eq!(m.pending_refill(), None);
        assert_eq!(drain(&mut m), vec!["a20", "b15", "b10", "a5", "b1"]);
    }

    #[test]
    fn test_ascending_with_undated_last() {
        let mut m = KWayMerge::new(2, false);
        m.push_page(0, vec![(at(3), "a3"), (None, "a?")], false);
        m.push_page(1, vec![(at(1), "b1"), (at(9), "b9")], false);
        assert_eq!(drain(&mut m), vec!["b1", "a3", "b9", "a?"]);
    }

    #[test]
    fn test_ties_break_by_stream() {
        let mut m = KWayMerge::new(2, true);
        m.push_page(1, vec![(at(4), "b")], false);
        m.push_page(0, vec![(at(4), "a")], false);
        assert_eq!(drain(&mut m), vec!["a", "b"]);
    }

    #[test]
    fn test_refill_is_requested_when_buffer_runs_dry() {
        let mut m = KWayMerge::new(2, true);
        assert_eq!(m.pending_refill(), Some(0));
        m.push_page(0, vec![(at(9), "a9")], true);
        assert_eq!(m.pending_refill(), Some(1));
        m.push_page(1, vec![(at(2), "b2")], false);
        assert_eq!(m.pop(), Some("a9"));
        assert_eq!(m.pending_refill(), Some(0));
        m.push_page(0, vec![(at(3), "a3")], false);
        assert_eq!(m.pending_refill(), None);
        assert_eq!(drain(&mut m), vec!["a3", "b2"]);
    }
}
