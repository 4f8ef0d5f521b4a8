//! Append-only, time-indexed history with skip-indexing and bounded eviction; single-writer,
//! many-reader (spec §4.1 `SearchList<T>`).
//!
//! Nodes are chained `Arc`s, newest (head) to oldest (tail). Readers walk `next` links through an
//! `Arc` they already hold, so a concurrent `append` or `remove_oldest` can never invalidate a
//! cursor mid-walk: `append` only ever publishes a new head or pushes into the existing head's
//! sample buffer, and `remove_oldest` only ever unlinks from the tail, skipping any node a live
//! [`View`] still references (spec §3 "Eviction is cooperative").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::time::{TimeSeries, TimeStamp};

/// Samples packed per node, chosen for cache locality over per-sample allocation.
const NODE_CAPACITY: usize = 32;

/// Skip-pointer stride: the back-pointer distance doubles every `STRIDE` nodes.
const STRIDE: usize = 4;

struct Node<T> {
    /// Sequential node index since list creation (0 = first node ever created), used to compute
    /// the skip distance.
    ord: usize,
    /// The only field ever mutated after creation: new samples are pushed here only while this
    /// node remains the head.
    values: Mutex<Vec<(T, TimeStamp)>>,
    /// The timestamp of this node's first sample, fixed at creation; used for skip comparisons.
    time: TimeStamp,
    /// The node directly behind this one (older). `None` at the tail.
    next: Option<Arc<Node<T>>>,
    /// A node `skip_delta` hops further back, or `None` near the tail.
    skip: Option<Arc<Node<T>>>,
}

impl<T> Node<T> {
    fn approx_size(&self) -> usize {
        let values = self.values.lock().expect("search list node mutex poisoned");
        std::mem::size_of::<Self>() + values.capacity() * std::mem::size_of::<(T, TimeStamp)>()
    }
}

fn skip_delta(ord: usize) -> usize {
    if ord < STRIDE {
        0
    } else {
        1usize << (ord / STRIDE).ilog2()
    }
}

/// A read cursor into a [`SearchList`], positioned at the first sample `>= series.start_time` and
/// advancing forward (toward the head, i.e. newer samples) only (spec §4.1 `getView`).
pub struct View<T> {
    /// The node the cursor is currently positioned at; keeping it alive here is what guarantees
    /// `remove_oldest` can't free it or anything newer out from under the cursor.
    current: Option<Arc<Node<T>>>,
    index_in_node: usize,
    series: TimeSeries,
    last_yielded: Option<TimeStamp>,
}

impl<T: Clone> View<T> {
    /// Whether this view has no samples to yield at all (the list was empty when the view was
    /// created).
    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Return the next sample that satisfies `series.start_time`/`series.micro_step`, if any is
    /// currently available.
    pub fn next(&mut self) -> Option<(T, TimeStamp)> {
        loop {
            let node = self.current.clone()?;
            let values = node.values.lock().expect("search list node mutex poisoned");

            if self.index_in_node >= values.len() {
                drop(values);
                self.current = node.next.clone();
                self.index_in_node = 0;

                if self.current.is_none() {
                    return None;
                }

                continue;
            }

            let (value, time) = values[self.index_in_node].clone();
            drop(values);
            self.index_in_node += 1;

            if time < self.series.start_time {
                continue;
            }

            if let Some(last) = self.last_yielded {
                if time < last.saturating_add(self.series.micro_step) {
                    continue;
                }
            }

            self.last_yielded = Some(time);

            return Some((value, time));
        }
    }
}

/// Append-only time-series history: single writer, many concurrent readers (spec §4.1).
pub struct SearchList<T> {
    head: Mutex<Option<Arc<Node<T>>>>,
    tail: Mutex<Option<Arc<Node<T>>>>,
    node_count: AtomicUsize,
}

impl<T> Default for SearchList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SearchList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            head: Mutex::new(None),
            tail: Mutex::new(None),
            node_count: AtomicUsize::new(0),
        }
    }

    /// Append a sample. `time` must be `>=` the last appended time; violating this is a caller
    /// bug, not a recoverable error (spec §4.1 "Failure: appending out-of-order times is undefined
    /// behaviour").
    pub fn append(&self, value: T, time: TimeStamp) {
        let mut head_guard = self.head.lock().expect("search list head mutex poisoned");

        if let Some(head) = head_guard.as_ref() {
            let mut values = head.values.lock().expect("search list node mutex poisoned");

            if values.len() < NODE_CAPACITY {
                values.push((value, time));
                return;
            }
        }

        let ord = self.node_count.fetch_add(1, Ordering::AcqRel);
        let delta = skip_delta(ord);

        let skip = if delta == 0 {
            None
        } else {
            let mut cursor = head_guard.clone();
            for _ in 0..delta.saturating_sub(1) {
                cursor = cursor.and_then(|node| node.next.clone());
            }
            cursor
        };

        let new_node = Arc::new(Node {
            ord,
            values: Mutex::new(vec![(value, time)]),
            time,
            next: head_guard.clone(),
            skip,
        });

        if head_guard.is_none() {
            *self.tail.lock().expect("search list tail mutex poisoned") = Some(new_node.clone());
        }

        *head_guard = Some(new_node);
    }

    /// A lazy cursor positioned at the first sample `>= series.start_time` (spec §4.1 `getView`).
    pub fn get_view(&self, series: TimeSeries) -> View<T> {
        let head = self.head.lock().expect("search list head mutex poisoned").clone();

        let Some(head) = head else {
            return View {
                current: None,
                index_in_node: 0,
                series,
                last_yielded: None,
            };
        };

        // Walk from the head backward (toward the tail) using skip links while the target is
        // still further back, then finish with a linear walk to land exactly on the node whose
        // range covers `start_time`.
        let mut cursor = head;

        loop {
            if cursor.time <= series.start_time {
                break;
            }

            let stepped = match &cursor.skip {
                Some(skip) if skip.time > series.start_time => Some(skip.clone()),
                _ => cursor.next.clone(),
            };

            match stepped {
                Some(next) => cursor = next,
                None => break,
            }
        }

        // `cursor` now has `cursor.time <= start_time` or is the tail; if its node's earliest
        // sample is still after start_time (tail case, all data is newer than requested start),
        // index_in_node stays 0 and every sample in it qualifies.
        let values = cursor.values.lock().expect("search list node mutex poisoned");
        let index_in_node = values.partition_point(|(_, t)| *t < series.start_time);
        drop(values);

        View {
            current: Some(cursor),
            index_in_node,
            series,
            last_yielded: None,
        }
    }

    /// Free tail nodes totalling at most `max_bytes`, skipping (and stopping at) any node a live
    /// [`View`] still holds a reference to. Returns bytes freed.
    pub fn remove_oldest(&self, max_bytes: usize) -> usize {
        let mut tail_guard = self.tail.lock().expect("search list tail mutex poisoned");
        let mut freed = 0;

        loop {
            let Some(candidate) = tail_guard.clone() else { break };

            // Baseline strong count is always 3: `tail_guard`'s own slot, our local `candidate`
            // clone, and one structural predecessor reference — either `self.head`'s slot, if this
            // node is also the head (a single-node list), or the node ahead of it, which keeps this
            // node alive via its own `next` field (set in `append`) otherwise. Any higher count
            // means a live `View` holds it too.
            let expected_refs = 3;

            if Arc::strong_count(&candidate) > expected_refs {
                break;
            }

            let size = candidate.approx_size();
            if freed > 0 && freed + size > max_bytes {
                break;
            }
            if freed == 0 && size > max_bytes {
                break;
            }

            match candidate.next.clone() {
                Some(next_node) => *tail_guard = Some(next_node),
                None => {
                    *tail_guard = None;
                    *self.head.lock().expect("search list head mutex poisoned") = None;
                }
            }

            freed += size;
        }

        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: u64) -> TimeStamp {
        TimeStamp::from_nanos(n)
    }

    #[test]
    fn append_then_view_yields_in_order() {
        let list: SearchList<u32> = SearchList::new();

        for i in 0..10u32 {
            list.append(i, ts(u64::from(i) * 10));
        }

        let mut view = list.get_view(TimeSeries::every_sample(ts(0)));
        let mut collected = Vec::new();

        while let Some((value, _)) = view.next() {
            collected.push(value);
        }

        assert_eq!(collected, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn view_respects_start_time() {
        let list: SearchList<u32> = SearchList::new();

        for i in 0..10u32 {
            list.append(i, ts(u64::from(i) * 10));
        }

        let mut view = list.get_view(TimeSeries::every_sample(ts(55)));
        let mut collected = Vec::new();

        while let Some((value, time)) = view.next() {
            collected.push(value);
            assert!(time >= ts(55));
        }

        assert_eq!(collected, vec![6, 7, 8, 9]);
    }

    #[test]
    fn view_respects_micro_step() {
        use crate::time::TimeStep;

        let list: SearchList<u32> = SearchList::new();

        for i in 0..10u32 {
            list.append(i, ts(u64::from(i) * 10));
        }

        let mut view = list.get_view(TimeSeries {
            start_time: ts(0),
            micro_step: TimeStep::from_nanos(25),
        });

        let mut times = Vec::new();
        while let Some((_, time)) = view.next() {
            times.push(time);
        }

        for pair in times.windows(2) {
            assert!(pair[1].as_nanos() >= pair[0].as_nanos() + 25);
        }
    }

    #[test]
    fn empty_list_view_is_empty() {
        let list: SearchList<u32> = SearchList::new();
        let view = list.get_view(TimeSeries::every_sample(ts(0)));

        assert!(view.is_empty());
    }

    #[test]
    fn large_history_spanning_many_nodes_still_orders_correctly() {
        let list: SearchList<u32> = SearchList::new();

        for i in 0..(NODE_CAPACITY as u32 * 5) {
            list.append(i, ts(u64::from(i)));
        }

        let mut view = list.get_view(TimeSeries::every_sample(ts(u64::from(NODE_CAPACITY as u32 * 3))));
        let mut collected = Vec::new();

        while let Some((value, _)) = view.next() {
            collected.push(value);
        }

        assert_eq!(collected, (NODE_CAPACITY as u32 * 3..NODE_CAPACITY as u32 * 5).collect::<Vec<_>>());
    }

    #[test]
    fn remove_oldest_does_not_free_nodes_held_by_a_live_view() {
        let list: SearchList<u32> = SearchList::new();

        for i in 0..(NODE_CAPACITY as u32 * 3) {
            list.append(i, ts(u64::from(i)));
        }

        let mut view = list.get_view(TimeSeries::every_sample(ts(0)));
        assert!(view.next().is_some());

        let freed_with_live_view = list.remove_oldest(usize::MAX);
        assert_eq!(freed_with_live_view, 0);

        while view.next().is_some() {}
        drop(view);

        let freed_after_drop = list.remove_oldest(usize::MAX);
        assert!(freed_after_drop > 0);
    }
}
