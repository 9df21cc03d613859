use std::cmp::Ordering;

use crate::external_sort::cancel::CancellationToken;
use crate::external_sort::queue::BoundedQueue;

/// Merges already-sorted sequences into one sorted sequence.
///
/// Keeps a binary min-heap of the sequences keyed by their current head.
/// Each yielded element costs one sift-down; an exhausted sequence is
/// swapped out of the heap and the heap is restored from the root.
/// Single pass only. Equal heads may come out in either order.
pub struct KWayMerge<I, F>
where
    I: Iterator,
{
    heap: Vec<Head<I>>,
    compare: F,
}

struct Head<I: Iterator> {
    current: I::Item,
    rest: I,
}

impl<I, F> KWayMerge<I, F>
where
    I: Iterator,
    F: FnMut(&I::Item, &I::Item) -> Ordering,
{
    pub fn new(sources: impl IntoIterator<Item = I>, compare: F) -> Self {
        let heap = sources
            .into_iter()
            .filter_map(|mut rest| rest.next().map(|current| Head { current, rest }))
            .collect();
        let mut merge = Self { heap, compare };
        merge.build_heap();
        merge
    }

    fn build_heap(&mut self) {
        for index in (0..self.heap.len() / 2).rev() {
            self.sift_down(index);
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && self.is_greater(smallest, left) {
                smallest = left;
            }
            if right < len && self.is_greater(smallest, right) {
                smallest = right;
            }
            if smallest == index {
                return;
            }
            self.heap.swap(index, smallest);
            index = smallest;
        }
    }

    fn is_greater(&mut self, upper: usize, lower: usize) -> bool {
        (self.compare)(&self.heap[upper].current, &self.heap[lower].current) == Ordering::Greater
    }
}

impl<I, F> Iterator for KWayMerge<I, F>
where
    I: Iterator,
    F: FnMut(&I::Item, &I::Item) -> Ordering,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let top = self.heap.first_mut()?;
        match top.rest.next() {
            Some(next) => {
                let out = std::mem::replace(&mut top.current, next);
                self.sift_down(0);
                Some(out)
            }
            None => {
                let exhausted = self.heap.swap_remove(0);
                if !self.heap.is_empty() {
                    self.sift_down(0);
                }
                Some(exhausted.current)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.heap.len(), None)
    }
}

/// Merges sorted sequences of `Ord` items in ascending order.
pub fn merge_sorted<I>(
    sources: impl IntoIterator<Item = I>,
) -> KWayMerge<I, fn(&I::Item, &I::Item) -> Ordering>
where
    I: Iterator,
    I::Item: Ord,
{
    KWayMerge::new(
        sources,
        <I::Item as Ord>::cmp as fn(&I::Item, &I::Item) -> Ordering,
    )
}

/// Sorted sequence fed by a background reader through a [`BoundedQueue`] of
/// line blocks; the pipelined input of a [`KWayMerge`].
pub struct QueueSource<'a, T> {
    queue: &'a BoundedQueue<Vec<T>>,
    cancel: &'a CancellationToken,
    block: std::vec::IntoIter<T>,
}

impl<'a, T> QueueSource<'a, T> {
    pub fn new(queue: &'a BoundedQueue<Vec<T>>, cancel: &'a CancellationToken) -> Self {
        Self {
            queue,
            cancel,
            block: Vec::new().into_iter(),
        }
    }
}

impl<T> Iterator for QueueSource<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.block.next() {
                return Some(item);
            }
            self.block = self.queue.take(self.cancel)?.into_iter();
        }
    }
}
