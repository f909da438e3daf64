//! Aegis Merge - Query Streams and K-Way Merge
//!
//! Lazy result streams returned by every `select`, and the two ways of
//! combining per-series streams: a heap-based k-way merge that keeps global
//! order, and a round-robin interleave used when too many series are
//! selected to keep one head per series in order.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use aegis_common::Result;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

pub type BoxedIter<'a, T> = Box<dyn Iterator<Item = Result<T>> + 'a>;

// =============================================================================
// Query Stream
// =============================================================================

/// Lazy stream of query results.
///
/// `is_time_ordered()` reports whether items arrive in the store's natural
/// order (timestamp order for records). Dropping the stream drops every
/// cursor feeding it.
pub struct QueryStream<'a, T> {
    inner: BoxedIter<'a, T>,
    sorted: bool,
}

impl<'a, T: 'a> QueryStream<'a, T> {
    pub fn new(inner: impl Iterator<Item = Result<T>> + 'a, sorted: bool) -> Self {
        Self {
            inner: Box::new(inner),
            sorted,
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty(), true)
    }

    pub fn is_time_ordered(&self) -> bool {
        self.sorted
    }

    /// Stop after `limit` successful items. Errors pass through uncounted.
    pub fn limit(self, limit: Option<u64>) -> Self {
        let Some(limit) = limit else {
            return self;
        };
        let sorted = self.sorted;
        let mut remaining = limit;
        let inner = self.inner;
        let limited = inner
            .take_while(move |item| {
                if remaining == 0 {
                    return false;
                }
                if item.is_ok() {
                    remaining -= 1;
                }
                true
            });
        Self::new(limited, sorted)
    }

    pub fn filter_ok(self, mut predicate: impl FnMut(&T) -> bool + 'a) -> Self {
        let sorted = self.sorted;
        Self::new(
            self.inner.filter(move |item| match item {
                Ok(value) => predicate(value),
                Err(_) => true,
            }),
            sorted,
        )
    }

    pub fn map_ok<U: 'a>(self, mut f: impl FnMut(T) -> U + 'a) -> QueryStream<'a, U> {
        let sorted = self.sorted;
        QueryStream::new(self.inner.map(move |item| item.map(&mut f)), sorted)
    }

    /// Collect every item, failing on the first error.
    pub fn try_collect(self) -> Result<Vec<T>> {
        self.inner.collect()
    }

    /// Count items, failing on the first error.
    pub fn try_count(self) -> Result<u64> {
        let mut count = 0;
        for item in self.inner {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

impl<T> Iterator for QueryStream<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

// =============================================================================
// K-Way Merge
// =============================================================================

struct HeapEntry<K, T> {
    key: K,
    stream: usize,
    item: T,
}

impl<K: Ord, T> PartialEq for HeapEntry<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.stream == other.stream
    }
}

impl<K: Ord, T> Eq for HeapEntry<K, T> {}

impl<K: Ord, T> PartialOrd for HeapEntry<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, T> Ord for HeapEntry<K, T> {
    /// Reversed so the max-heap pops the smallest key; ties go to the
    /// stream that was listed first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.stream.cmp(&self.stream))
    }
}

/// Merges streams that are each sorted by `key_fn` into one sorted stream.
///
/// Holds exactly one head item per non-exhausted input. Errors from an
/// input are yielded as soon as they are read.
pub struct MergeSortIter<'a, T, K, F> {
    streams: Vec<BoxedIter<'a, T>>,
    heap: BinaryHeap<HeapEntry<K, T>>,
    errors: VecDeque<aegis_common::AegisError>,
    key_fn: F,
    primed: bool,
}

impl<'a, T, K, F> MergeSortIter<'a, T, K, F>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    pub fn new(streams: Vec<BoxedIter<'a, T>>, key_fn: F) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(streams.len()),
            streams,
            errors: VecDeque::new(),
            key_fn,
            primed: false,
        }
    }

    /// Read the next good item of `stream` into the heap.
    fn advance(&mut self, stream: usize) {
        match self.streams[stream].next() {
            Some(Ok(item)) => {
                let key = (self.key_fn)(&item);
                self.heap.push(HeapEntry { key, stream, item });
            }
            Some(Err(e)) => {
                self.errors.push_back(e);
                // keep the stream alive after the error
                self.advance(stream);
            }
            None => {}
        }
    }
}

impl<T, K, F> Iterator for MergeSortIter<'_, T, K, F>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.primed = true;
            for stream in 0..self.streams.len() {
                self.advance(stream);
            }
        }
        if let Some(e) = self.errors.pop_front() {
            return Some(Err(e));
        }
        let entry = self.heap.pop()?;
        self.advance(entry.stream);
        Some(Ok(entry.item))
    }
}

// =============================================================================
// Round-Robin Interleave
// =============================================================================

/// Takes one item from each stream in turn. Ordering across streams is
/// not preserved.
pub struct RoundRobinIter<'a, T> {
    streams: VecDeque<BoxedIter<'a, T>>,
}

impl<'a, T> RoundRobinIter<'a, T> {
    pub fn new(streams: Vec<BoxedIter<'a, T>>) -> Self {
        Self {
            streams: streams.into(),
        }
    }
}

impl<T> Iterator for RoundRobinIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(mut stream) = self.streams.pop_front() {
            if let Some(item) = stream.next() {
                self.streams.push_back(stream);
                return Some(item);
            }
        }
        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::AegisError;

    fn boxed(items: Vec<(u32, &'static str)>) -> BoxedIter<'static, (u32, &'static str)> {
        Box::new(items.into_iter().map(Ok))
    }

    #[test]
    fn test_merge_is_stable_and_sorted() {
        let streams = vec![
            boxed(vec![(1, "a1"), (4, "a4"), (4, "a4b"), (9, "a9")]),
            boxed(vec![(2, "b2"), (4, "b4"), (10, "b10")]),
            boxed(vec![]),
            boxed(vec![(0, "c0"), (4, "c4")]),
        ];
        let merged: Vec<&str> = MergeSortIter::new(streams, |item: &(u32, &str)| item.0)
            .map(|item| item.expect("item").1)
            .collect();
        assert_eq!(merged, vec!["c0", "a1", "b2", "a4", "a4b", "b4", "c4", "a9", "b10"]);
    }

    #[test]
    fn test_merge_yields_errors() {
        let failing: BoxedIter<'static, (u32, &'static str)> = Box::new(
            vec![Ok((3, "x")), Err(AegisError::Corruption("bad".to_string())), Ok((5, "y"))].into_iter(),
        );
        let items: Vec<Result<(u32, &str)>> = MergeSortIter::new(vec![failing, boxed(vec![(4, "z")])], |i: &(u32, &str)| i.0).collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items.iter().filter(|i| i.is_err()).count(), 1);
        let ok: Vec<u32> = items.into_iter().filter_map(|i| i.ok()).map(|i| i.0).collect();
        assert_eq!(ok, vec![3, 4, 5]);
    }

    #[test]
    fn test_round_robin() {
        let streams = vec![boxed(vec![(1, "a"), (2, "b"), (3, "c")]), boxed(vec![(9, "x")])];
        let items: Vec<&str> = RoundRobinIter::new(streams).map(|i| i.expect("item").1).collect();
        assert_eq!(items, vec!["a", "x", "b", "c"]);
    }

    #[test]
    fn test_limit_counts_only_items() {
        let stream = QueryStream::new((0..10u64).map(Ok), true).limit(Some(3));
        assert!(stream.is_time_ordered());
        assert_eq!(stream.try_collect().expect("collect"), vec![0, 1, 2]);

        let filtered = QueryStream::new((0..10u64).map(Ok), true)
            .filter_ok(|v| v % 2 == 1)
            .limit(Some(2));
        assert_eq!(filtered.try_count().expect("count"), 2);
    }
}
