use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::external_sort::cancel::CancellationToken;
use crate::external_sort::constants::QUEUE_CANCELLATION_POLL_MS;
use crate::external_sort::error::{Result, SortError};
use crate::external_sort::events::SortEventSink;

/// Fixed-capacity hand-off buffer between pipeline stages.
///
/// `put` blocks while the queue is full, [`drain`](Self::drain) blocks while
/// it is empty. After [`complete`](Self::complete) no more items are
/// accepted and consumers stop once the remaining items are taken.
/// [`abort`](Self::abort) additionally discards pending items and fails
/// blocked producers, which is how a consumer that gave up releases them.
pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct QueueState<T> {
    items: VecDeque<T>,
    completed: bool,
    aborted: bool,
}

impl<T> BoundedQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                completed: false,
                aborted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `item`, waiting for free space.
    ///
    /// Fails with `Cancelled` when the token fires or the queue was aborted
    /// while waiting, and with `InvalidState` when the queue is completed.
    pub fn put(&self, item: T, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(SortError::Cancelled);
            }
            if state.completed {
                return Err(SortError::InvalidState(format!(
                    "queue '{}' is already completed",
                    self.name
                )));
            }
            cancel.check()?;
            if state.items.len() < self.capacity {
                break;
            }
            self.not_full
                .wait_for(&mut state, Duration::from_millis(QUEUE_CANCELLATION_POLL_MS));
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Same as [`put`](Self::put) but reports the time spent blocked.
    pub fn put_measured(
        &self,
        item: T,
        cancel: &CancellationToken,
        sink: &dyn SortEventSink,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.put(item, cancel);
        sink.queue_wait(self.name, true, started.elapsed());
        result
    }

    /// Marks the end of input. Idempotent.
    pub fn complete(&self) {
        self.state.lock().completed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Drops pending items and wakes every waiter. Idempotent.
    pub fn abort(&self) {
        {
            let mut state = self.state.lock();
            state.aborted = true;
            state.completed = true;
            state.items.clear();
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Takes one item, `None` once the queue is completed and empty, aborted,
    /// or the token fired.
    pub fn take(&self, cancel: &CancellationToken) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.aborted || cancel.is_cancelled() {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.completed {
                return None;
            }
            self.not_empty
                .wait_for(&mut state, Duration::from_millis(QUEUE_CANCELLATION_POLL_MS));
        }
    }

    /// Consuming iterator over the queue; see [`take`](Self::take).
    pub fn drain<'a>(&'a self, cancel: &'a CancellationToken) -> Drain<'a, T> {
        Drain {
            queue: self,
            cancel,
            sink: None,
        }
    }

    /// Like [`drain`](Self::drain), reporting read waits to `sink`.
    pub fn drain_measured<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        sink: &'a dyn SortEventSink,
    ) -> Drain<'a, T> {
        Drain {
            queue: self,
            cancel,
            sink: Some(sink),
        }
    }
}

pub struct Drain<'a, T> {
    queue: &'a BoundedQueue<T>,
    cancel: &'a CancellationToken,
    sink: Option<&'a dyn SortEventSink>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.sink {
            Some(sink) => {
                let started = Instant::now();
                let item = self.queue.take(self.cancel);
                sink.queue_wait(self.queue.name, false, started.elapsed());
                item
            }
            None => self.queue.take(self.cancel),
        }
    }
}

/// Completes the queue when dropped, so consumers are released even if the
/// producer returns early with an error or panics.
pub struct CompleteOnDrop<'a, T>(pub &'a BoundedQueue<T>);

impl<T> Drop for CompleteOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

/// Aborts the queue when dropped; held by consumers that may stop early.
pub struct AbortOnDrop<'a, T>(pub &'a BoundedQueue<T>);

impl<T> Drop for AbortOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_fifo_and_completion() {
        let queue = BoundedQueue::new("test", 4);
        let cancel = CancellationToken::new();
        for i in 0..3 {
            queue.put(i, &cancel).unwrap();
        }
        queue.complete();
        queue.complete();
        assert!(queue.put(99, &cancel).is_err());
        assert_eq!(queue.drain(&cancel).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_producer_blocks_until_consumer_takes() {
        let queue = BoundedQueue::new("backpressure", 2);
        let cancel = CancellationToken::new();
        let max_seen = AtomicUsize::new(0);

        thread::scope(|s| {
            s.spawn(|| {
                let _done = CompleteOnDrop(&queue);
                for i in 0..100 {
                    queue.put(i, &cancel).unwrap();
                    max_seen.fetch_max(queue.len(), Ordering::Relaxed);
                }
            });

            let received: Vec<i32> = queue.drain(&cancel).collect();
            assert_eq!(received, (0..100).collect::<Vec<_>>());
        });

        assert!(max_seen.load(Ordering::Relaxed) <= 2);
    }

    #[test]
    fn test_many_producers_single_consumer() {
        let queue = BoundedQueue::new("fan-in", 3);
        let cancel = CancellationToken::new();
        let producers_left = AtomicUsize::new(4);

        let mut received = thread::scope(|s| {
            for p in 0..4 {
                let (queue, cancel, producers_left) = (&queue, &cancel, &producers_left);
                s.spawn(move || {
                    for i in 0..25 {
                        queue.put(p * 100 + i, cancel).unwrap();
                    }
                    if producers_left.fetch_sub(1, Ordering::AcqRel) == 1 {
                        queue.complete();
                    }
                });
            }
            queue.drain(&cancel).collect::<Vec<_>>()
        });

        received.sort_unstable();
        let mut expected: Vec<i32> =
            (0..4).flat_map(|p| (0..25).map(move |i| p * 100 + i)).collect();
        expected.sort_unstable();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_cancellation_releases_blocked_producer() {
        let queue = BoundedQueue::new("cancel", 1);
        let cancel = CancellationToken::new();
        queue.put(1, &cancel).unwrap();

        thread::scope(|s| {
            let blocked = s.spawn(|| queue.put(2, &cancel));
            thread::sleep(Duration::from_millis(20));
            cancel.cancel();
            let result = blocked.join().unwrap();
            assert!(result.unwrap_err().is_cancelled());
        });
    }

    #[test]
    fn test_abort_releases_producer_and_drops_items() {
        let queue = BoundedQueue::new("abort", 1);
        let cancel = CancellationToken::new();
        queue.put(1, &cancel).unwrap();

        thread::scope(|s| {
            let blocked = s.spawn(|| queue.put(2, &cancel));
            thread::sleep(Duration::from_millis(20));
            queue.abort();
            assert!(blocked.join().unwrap().unwrap_err().is_cancelled());
        });
        assert!(queue.is_empty());
        assert_eq!(queue.take(&cancel), None);
    }
}
